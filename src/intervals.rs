use crate::errors::{AppError, Result};
use crate::reference_index::ReferenceIndex;
use flate2::read::GzDecoder;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

/// Upper bound used for a contig named without coordinates; replaced by the
/// real length in `IntervalSet::clamped_to`.
pub const WHOLE_CONTIG: u64 = u64::MAX;

const KNOWN_SITE_LEADING_PAD: u64 = 100;
const KNOWN_SITE_SPAN: u64 = 150;

/// 1-based inclusive range on a single contig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    first: u64,
    last: u64,
}

impl Interval {
    pub fn new(first: u64, last: u64) -> Result<Self> {
        if first == 0 || first > last {
            return Err(AppError::InvalidValue {
                flag: "interval".to_string(),
                value: format!("{first}-{last}"),
                reason: "intervals are 1-based and need first <= last".to_string(),
            });
        }
        Ok(Self { first, last })
    }

    pub fn first(&self) -> u64 {
        self.first
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    pub fn size(&self) -> u64 {
        (self.last - self.first).saturating_add(1)
    }

    pub fn contains(&self, position: u64) -> bool {
        self.first <= position && position <= self.last
    }

    /// Strict overlap: the intervals share more than a single boundary base.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.last > other.first && other.last > self.first
    }

    /// Overlapping, sharing a boundary base, or directly adjacent.
    pub fn touches(&self, other: &Interval) -> bool {
        self.first <= other.last.saturating_add(1) && other.first <= self.last.saturating_add(1)
    }

    pub fn merge(&self, other: &Interval) -> Interval {
        Interval {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }
}

impl Ord for Interval {
    fn cmp(&self, other: &Self) -> Ordering {
        self.first
            .cmp(&other.first)
            .then_with(|| self.last.cmp(&other.last))
    }
}

impl PartialOrd for Interval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.last == WHOLE_CONTIG {
            write!(f, "{}-end", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

/// Genomic regions grouped by contig, contigs kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    contigs: Vec<(String, Vec<Interval>)>,
    index: HashMap<String, usize>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, contig: &str, first: u64, last: u64) -> Result<()> {
        self.add_interval(contig, Interval::new(first, last)?);
        Ok(())
    }

    pub fn add_interval(&mut self, contig: &str, interval: Interval) {
        let slot = match self.index.get(contig) {
            Some(&slot) => slot,
            None => {
                self.contigs.push((contig.to_string(), Vec::new()));
                self.index.insert(contig.to_string(), self.contigs.len() - 1);
                self.contigs.len() - 1
            }
        };
        self.contigs[slot].1.push(interval);
    }

    /// Sorts each contig's intervals and merges every touching pair, so the
    /// result is sorted and disjoint.
    pub fn sort_and_merge(&mut self) {
        for (_, intervals) in &mut self.contigs {
            intervals.sort();
            let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
            for interval in intervals.drain(..) {
                match merged.last_mut() {
                    Some(previous) if previous.touches(&interval) => {
                        *previous = previous.merge(&interval);
                    }
                    _ => merged.push(interval),
                }
            }
            *intervals = merged;
        }
    }

    /// Total number of bases covered, counting overlaps twice before merging.
    pub fn extent(&self) -> u64 {
        self.iter()
            .fold(0_u64, |total, (_, interval)| total.saturating_add(interval.size()))
    }

    pub fn interval_count(&self) -> usize {
        self.contigs.iter().map(|(_, intervals)| intervals.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.interval_count() == 0
    }

    pub fn contigs(&self) -> impl Iterator<Item = &str> {
        self.contigs.iter().map(|(name, _)| name.as_str())
    }

    pub fn intervals_in(&self, contig: &str) -> &[Interval] {
        self.index
            .get(contig)
            .map(|&slot| self.contigs[slot].1.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Interval)> {
        self.contigs.iter().flat_map(|(name, intervals)| {
            intervals.iter().map(move |interval| (name.as_str(), *interval))
        })
    }

    /// The largest interval, earliest in iteration order on ties.
    pub fn biggest_interval(&self) -> Option<(String, Interval)> {
        let mut best: Option<(&str, Interval)> = None;
        for (contig, interval) in self.iter() {
            if best.is_none_or(|(_, current)| interval.size() > current.size()) {
                best = Some((contig, interval));
            }
        }
        best.map(|(contig, interval)| (contig.to_string(), interval))
    }

    pub fn remove_interval(&mut self, contig: &str, interval: &Interval) -> bool {
        let Some(&slot) = self.index.get(contig) else {
            return false;
        };
        let intervals = &mut self.contigs[slot].1;
        let Some(found) = intervals.iter().position(|candidate| candidate == interval) else {
            return false;
        };
        intervals.remove(found);
        if intervals.is_empty() {
            self.contigs.remove(slot);
            self.reindex();
        }
        true
    }

    fn reindex(&mut self) {
        self.index = self
            .contigs
            .iter()
            .enumerate()
            .map(|(slot, (name, _))| (name.clone(), slot))
            .collect();
    }

    /// Bounds every interval by its contig's length. Intervals starting past
    /// the end of the contig are dropped with a warning.
    pub fn clamped_to(&self, reference: &ReferenceIndex) -> Result<Self> {
        let mut clamped = Self::new();
        for (contig, interval) in self.iter() {
            let length = reference.contig_length(contig)?;
            if interval.first() > length {
                warn!(contig, interval = %interval, length, "interval starts past contig end, dropping");
                continue;
            }
            clamped.add_interval(contig, Interval::new(interval.first(), interval.last().min(length))?);
        }
        Ok(clamped)
    }

    /// Parses `contig:first-last` tokens separated by commas. A bare contig
    /// covers the whole contig; `contig:pos` covers a single base.
    pub fn parse_region_str(regions: &str) -> Result<Self> {
        let mut set = Self::new();
        for token in regions.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            let parse_error = || AppError::ParseError {
                message: format!("could not parse interval from {token}"),
            };
            let Some((contig, bounds)) = token.split_once(':') else {
                set.add_interval(token, Interval::new(1, WHOLE_CONTIG)?);
                continue;
            };
            if contig.is_empty() {
                return Err(parse_error());
            }
            let (first, last) = match bounds.split_once('-') {
                Some((first, last)) => (first.trim(), last.trim()),
                None => (bounds.trim(), bounds.trim()),
            };
            let first = first.parse::<u64>().map_err(|_| parse_error())?;
            let last = last.parse::<u64>().map_err(|_| parse_error())?;
            set.add(contig, first, last)?;
        }
        Ok(set)
    }

    /// Reads `contig \t first \t last` lines; coordinates are taken as
    /// 1-based inclusive. `#` lines are skipped; malformed lines are warned
    /// about and skipped.
    pub fn from_bed_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut set = if path.extension().is_some_and(|extension| extension == "gz") {
            Self::from_bed_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            Self::from_bed_reader(BufReader::new(file))?
        };
        set.sort_and_merge();
        Ok(set)
    }

    pub fn from_bed_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut set = Self::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields = trimmed.split('\t').collect::<Vec<_>>();
            if fields.len() < 3 {
                warn!(line = %line, "incorrect number of fields on region line, skipping");
                continue;
            }
            let bounds = fields[1]
                .trim()
                .parse::<u64>()
                .ok()
                .zip(fields[2].trim().parse::<u64>().ok())
                .and_then(|(first, last)| Interval::new(first.max(1), last).ok());
            match bounds {
                Some(interval) => set.add_interval(fields[0], interval),
                None => warn!(line = %line, "could not parse positions on region line, skipping"),
            }
        }
        Ok(set)
    }

    /// One window around each site of a VCF-like file: from 100 bases before
    /// the site, spanning 150 bases.
    pub fn from_known_sites(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut set = if path.extension().is_some_and(|extension| extension == "gz") {
            Self::from_known_sites_reader(BufReader::new(GzDecoder::new(file)))?
        } else {
            Self::from_known_sites_reader(BufReader::new(file))?
        };
        set.sort_and_merge();
        Ok(set)
    }

    pub fn from_known_sites_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut set = Self::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let (Some(contig), Some(position)) = (fields.next(), fields.next()) else {
                return Err(AppError::ParseError {
                    message: format!("known-sites line without position: {line}"),
                });
            };
            let position = position.trim().parse::<u64>().map_err(|_| AppError::ParseError {
                message: format!("invalid known-sites position on line: {line}"),
            })?;
            let first = position.saturating_sub(KNOWN_SITE_LEADING_PAD).max(1);
            set.add(contig, first, first.saturating_add(KNOWN_SITE_SPAN))?;
        }
        Ok(set)
    }

    /// Every contig of the reference at full length.
    pub fn from_reference(reference: &ReferenceIndex) -> Result<Self> {
        let mut set = Self::new();
        for contig in reference.contigs() {
            let length = reference.contig_length(contig)?;
            if length > 0 {
                set.add(contig, 1, length)?;
            }
        }
        Ok(set)
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.interval_count();
        if count == 1
            && let Some((contig, interval)) = self.iter().next()
        {
            return write!(f, "{contig}:{interval}");
        }
        write!(f, "extent: {} count: {count} ", self.extent())?;
        let mut skipped = false;
        for (position, (contig, interval)) in self.iter().enumerate() {
            if position < 3 || position + 2 > count {
                write!(f, " {contig}:{interval}")?;
            } else if !skipped {
                write!(f, " ...")?;
                skipped = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Interval, IntervalSet, WHOLE_CONTIG};
    use crate::errors::AppError;
    use crate::reference_index::ReferenceIndex;
    use std::io::{Cursor, Write};

    fn interval(first: u64, last: u64) -> Interval {
        Interval::new(first, last).expect("expected interval")
    }

    #[test]
    fn parses_region_string() {
        let set = IntervalSet::parse_region_str("1:100-200,2:50-80").expect("expected regions");
        assert_eq!(set.extent(), 132);
        assert_eq!(set.contigs().collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(set.intervals_in("2"), &[interval(50, 80)]);
    }

    #[test]
    fn parses_single_positions_and_whole_contigs() {
        let set = IntervalSet::parse_region_str("3:7, X").expect("expected regions");
        assert_eq!(set.intervals_in("3"), &[interval(7, 7)]);
        assert_eq!(set.intervals_in("X"), &[interval(1, WHOLE_CONTIG)]);
        assert!(IntervalSet::parse_region_str("1:a-b").is_err());
        assert!(IntervalSet::parse_region_str("1:20-10").is_err());
    }

    #[test]
    fn overlap_is_strict_but_merge_joins_touching() {
        assert!(!interval(1, 10).overlaps(&interval(10, 20)));
        assert!(interval(1, 11).overlaps(&interval(10, 20)));
        assert!(interval(1, 10).touches(&interval(11, 20)));
        assert!(!interval(1, 10).touches(&interval(12, 20)));

        let mut set = IntervalSet::new();
        set.add_interval("1", interval(30, 40));
        set.add_interval("1", interval(1, 10));
        set.add_interval("1", interval(10, 15));
        set.add_interval("1", interval(16, 20));
        set.add_interval("1", interval(35, 50));
        set.sort_and_merge();
        assert_eq!(set.intervals_in("1"), &[interval(1, 20), interval(30, 50)]);
        assert_eq!(set.extent(), 41);
    }

    #[test]
    fn removes_interval_and_empty_contig() {
        let mut set = IntervalSet::parse_region_str("1:1-10,2:5-9,1:20-30").expect("expected regions");
        assert_eq!(set.biggest_interval(), Some(("1".to_string(), interval(20, 30))));
        assert!(set.remove_interval("2", &interval(5, 9)));
        assert!(!set.remove_interval("2", &interval(5, 9)));
        assert_eq!(set.contigs().collect::<Vec<_>>(), vec!["1"]);
        assert_eq!(set.interval_count(), 2);
    }

    #[test]
    fn clamps_to_reference_lengths() {
        let index = ReferenceIndex::from_reader(Cursor::new("1\t50\t3\t60\t61\n"))
            .expect("expected index");
        let set = IntervalSet::parse_region_str("1,1:40-80").expect("expected regions");
        let clamped = set.clamped_to(&index).expect("expected clamp");
        assert_eq!(clamped.intervals_in("1"), &[interval(1, 50), interval(40, 50)]);

        let unknown = IntervalSet::parse_region_str("7:1-5").expect("expected regions");
        assert!(matches!(
            unknown.clamped_to(&index),
            Err(AppError::UnknownContig { .. })
        ));
    }

    #[test]
    fn reads_bed_lines_skipping_comments_and_junk() {
        let bed = "# header\n1\t10\t20\n1\t15\t30\nbroken\n2\tx\t5\n2\t100\t110\textra\n";
        let set = IntervalSet::from_bed_reader(Cursor::new(bed)).expect("expected bed");
        assert_eq!(set.interval_count(), 3);
        assert_eq!(set.intervals_in("2"), &[interval(100, 110)]);
    }

    #[test]
    fn reads_gzipped_known_sites() {
        let dir = tempfile::tempdir().expect("expected tempdir");
        let path = dir.path().join("sites.vcf.gz");
        let file = std::fs::File::create(&path).expect("expected file");
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder
            .write_all(b"##fileformat=VCFv4.2\n#CHROM\tPOS\n1\t50\n1\t1000\n")
            .expect("expected write");
        encoder.finish().expect("expected gzip finish");

        let set = IntervalSet::from_known_sites(&path).expect("expected sites");
        assert_eq!(set.intervals_in("1"), &[interval(1, 151), interval(900, 1050)]);
    }

    #[test]
    fn known_site_windows_stop_at_the_largest_position() {
        let line = format!("1\t{}\n", u64::MAX - 10);
        let set = IntervalSet::from_known_sites_reader(Cursor::new(line)).expect("expected sites");
        assert_eq!(set.intervals_in("1"), &[interval(u64::MAX - 110, u64::MAX)]);
    }

    #[test]
    fn summarises_large_sets() {
        let set = IntervalSet::parse_region_str("1:1-2,1:5-6,1:9-10,1:13-14,1:17-18,1:21-22")
            .expect("expected regions");
        let text = set.to_string();
        assert!(text.starts_with("extent: 12 count: 6"));
        assert!(text.contains("..."));
        assert_eq!(
            IntervalSet::parse_region_str("2:3-4").expect("expected regions").to_string(),
            "2:3-4"
        );
    }
}
