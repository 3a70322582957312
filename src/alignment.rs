use crate::errors::{AppError, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub const FLAG_PAIRED: u16 = 0x1;
pub const FLAG_UNMAPPED: u16 = 0x4;
pub const FLAG_MATE_UNMAPPED: u16 = 0x8;
pub const FLAG_REVERSE: u16 = 0x10;
pub const FLAG_FIRST_IN_PAIR: u16 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarKind {
    Match,
    Insertion,
    Deletion,
    Skip,
    SoftClip,
    HardClip,
    Padding,
    SequenceMatch,
    SequenceMismatch,
}

impl CigarKind {
    pub fn from_code(code: char) -> Option<Self> {
        let kind = match code {
            'M' => Self::Match,
            'I' => Self::Insertion,
            'D' => Self::Deletion,
            'N' => Self::Skip,
            'S' => Self::SoftClip,
            'H' => Self::HardClip,
            'P' => Self::Padding,
            '=' => Self::SequenceMatch,
            'X' => Self::SequenceMismatch,
            _ => return None,
        };
        Some(kind)
    }

    pub fn code(self) -> char {
        match self {
            Self::Match => 'M',
            Self::Insertion => 'I',
            Self::Deletion => 'D',
            Self::Skip => 'N',
            Self::SoftClip => 'S',
            Self::HardClip => 'H',
            Self::Padding => 'P',
            Self::SequenceMatch => '=',
            Self::SequenceMismatch => 'X',
        }
    }

    pub fn consumes_read(self) -> bool {
        matches!(
            self,
            Self::Match
                | Self::Insertion
                | Self::SoftClip
                | Self::SequenceMatch
                | Self::SequenceMismatch
        )
    }

    pub fn consumes_reference(self) -> bool {
        matches!(
            self,
            Self::Match
                | Self::Deletion
                | Self::Skip
                | Self::SequenceMatch
                | Self::SequenceMismatch
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    pub kind: CigarKind,
    pub len: u32,
}

impl CigarOp {
    pub fn new(kind: CigarKind, len: u32) -> Self {
        Self { kind, len }
    }
}

/// Parses a SAM CIGAR string such as `10M2I5M`.
pub fn parse_cigar(text: &str) -> Result<Vec<CigarOp>> {
    let mut ops = Vec::new();
    let mut length = 0_u32;
    let mut has_digits = false;
    for ch in text.chars() {
        if let Some(digit) = ch.to_digit(10) {
            length = length
                .checked_mul(10)
                .and_then(|value| value.checked_add(digit))
                .ok_or_else(|| AppError::ParseError {
                    message: format!("CIGAR operation length overflows in {text}"),
                })?;
            has_digits = true;
            continue;
        }
        let kind = CigarKind::from_code(ch).ok_or_else(|| AppError::ParseError {
            message: format!("unknown CIGAR operation {ch} in {text}"),
        })?;
        if !has_digits {
            return Err(AppError::ParseError {
                message: format!("CIGAR operation {ch} without length in {text}"),
            });
        }
        ops.push(CigarOp::new(kind, length));
        length = 0;
        has_digits = false;
    }
    if has_digits {
        return Err(AppError::ParseError {
            message: format!("trailing length without operation in CIGAR {text}"),
        });
    }
    Ok(ops)
}

/// One aligned read as delivered by an `AlignmentSource`. Positions are
/// 1-based; bases are upper-case ASCII and qualities are raw phred values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedRecord {
    pub start: u64,
    pub mapq: u8,
    pub flags: u16,
    pub cigar: Vec<CigarOp>,
    pub bases: Vec<u8>,
    pub qualities: Vec<u8>,
}

impl AlignedRecord {
    pub fn new(
        start: u64,
        mapq: u8,
        flags: u16,
        cigar: Vec<CigarOp>,
        bases: Vec<u8>,
        qualities: Vec<u8>,
    ) -> Self {
        Self {
            start,
            mapq,
            flags,
            cigar,
            bases: bases.into_iter().map(|base| base.to_ascii_uppercase()).collect(),
            qualities,
        }
    }

    /// Convenience constructor for a forward-strand read with uniform base
    /// quality.
    pub fn simple(start: u64, mapq: u8, cigar: &str, bases: &str, quality: u8) -> Result<Self> {
        let cigar = parse_cigar(cigar)?;
        let qualities = vec![quality; bases.len()];
        Ok(Self::new(start, mapq, 0, cigar, bases.as_bytes().to_vec(), qualities))
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Number of reference bases covered by the alignment.
    pub fn reference_length(&self) -> u64 {
        self.cigar
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| u64::from(op.len))
            .sum()
    }

    /// Last reference position covered (inclusive).
    pub fn end(&self) -> u64 {
        (self.start + self.reference_length()).saturating_sub(1).max(self.start)
    }

    pub fn read_length(&self) -> usize {
        self.bases.len()
    }

    pub fn is_reverse(&self) -> bool {
        self.flags & FLAG_REVERSE != 0
    }

    pub fn is_unmapped(&self) -> bool {
        self.flags & FLAG_UNMAPPED != 0
    }

    pub fn is_mate_unmapped(&self) -> bool {
        self.flags & FLAG_PAIRED != 0 && self.flags & FLAG_MATE_UNMAPPED != 0
    }

    pub fn is_first_of_pair(&self) -> bool {
        self.flags & FLAG_FIRST_IN_PAIR != 0
    }
}

/// Sorted, indexed alignment records for one sample.
///
/// `fetch` repositions the stream at the first record on `contig` whose
/// alignment covers `start` or lies beyond it; `next_record` then yields
/// records in ascending start order until the contig is exhausted.
pub trait AlignmentSource: Send {
    fn contig_length(&self, contig: &str) -> Result<u64>;

    fn fetch(&mut self, contig: &str, start: u64) -> Result<()>;

    fn next_record(&mut self) -> Result<Option<AlignedRecord>>;
}

impl<S: AlignmentSource + ?Sized> AlignmentSource for Box<S> {
    fn contig_length(&self, contig: &str) -> Result<u64> {
        (**self).contig_length(contig)
    }

    fn fetch(&mut self, contig: &str, start: u64) -> Result<()> {
        (**self).fetch(contig, start)
    }

    fn next_record(&mut self) -> Result<Option<AlignedRecord>> {
        (**self).next_record()
    }
}

#[derive(Debug, Default)]
struct ContigRecords {
    length: u64,
    records: Vec<AlignedRecord>,
}

/// In-memory source. Clones share the record store and keep independent
/// cursors, so one source can back every window of a pool.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    contigs: Arc<HashMap<String, ContigRecords>>,
    cursor: Option<Cursor>,
}

#[derive(Debug, Clone)]
struct Cursor {
    contig: String,
    start: u64,
    next: usize,
}

impl VecSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a source from `(contig, length, records)` triples; records are
    /// sorted by start.
    pub fn from_contigs<I>(contigs: I) -> Self
    where
        I: IntoIterator<Item = (String, u64, Vec<AlignedRecord>)>,
    {
        let mut table = HashMap::new();
        for (name, length, mut records) in contigs {
            records.sort_by_key(|record| record.start);
            table.insert(name, ContigRecords { length, records });
        }
        Self {
            contigs: Arc::new(table),
            cursor: None,
        }
    }

    pub fn record_count(&self) -> usize {
        self.contigs.values().map(|entry| entry.records.len()).sum()
    }
}

impl AlignmentSource for VecSource {
    fn contig_length(&self, contig: &str) -> Result<u64> {
        self.contigs
            .get(contig)
            .map(|entry| entry.length)
            .ok_or_else(|| AppError::UnknownContig {
                contig: contig.to_string(),
            })
    }

    fn fetch(&mut self, contig: &str, start: u64) -> Result<()> {
        let entry = self.contigs.get(contig).ok_or_else(|| AppError::UnknownContig {
            contig: contig.to_string(),
        })?;
        let next = entry
            .records
            .iter()
            .position(|record| record.end() >= start)
            .unwrap_or(entry.records.len());
        self.cursor = Some(Cursor {
            contig: contig.to_string(),
            start,
            next,
        });
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<AlignedRecord>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        let Some(entry) = self.contigs.get(&cursor.contig) else {
            return Ok(None);
        };
        while let Some(record) = entry.records.get(cursor.next) {
            cursor.next += 1;
            if record.end() >= cursor.start {
                return Ok(Some(record.clone()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_cigar, AlignedRecord, AlignmentSource, CigarKind, VecSource};
    use crate::alignment::{FLAG_MATE_UNMAPPED, FLAG_PAIRED, FLAG_REVERSE};

    #[test]
    fn parses_cigar_strings() {
        let ops = parse_cigar("3S10M2I4D5M").expect("expected cigar parse");
        assert_eq!(ops.len(), 5);
        assert_eq!(ops[0].kind, CigarKind::SoftClip);
        assert_eq!(ops[3].len, 4);
        assert!(parse_cigar("10").is_err());
        assert!(parse_cigar("M").is_err());
        assert!(parse_cigar("5Q").is_err());
    }

    #[test]
    fn reference_span_ignores_insertions_and_clips() {
        let record = AlignedRecord::simple(100, 60, "2S5M3I4D6M", "AAAAAAAAAAAAAAAA", 30)
            .expect("expected record");
        assert_eq!(record.reference_length(), 15);
        assert_eq!(record.end(), 114);
    }

    #[test]
    fn decodes_flags() {
        let record = AlignedRecord::simple(1, 60, "4M", "acgt", 30)
            .expect("expected record")
            .with_flags(FLAG_PAIRED | FLAG_MATE_UNMAPPED | FLAG_REVERSE);
        assert!(record.is_reverse());
        assert!(record.is_mate_unmapped());
        assert!(!record.is_first_of_pair());
        assert_eq!(record.bases, b"ACGT");
    }

    #[test]
    fn vec_source_fetches_overlapping_records() {
        let records = vec![
            AlignedRecord::simple(20, 60, "5M", "ACGTA", 30).expect("expected record"),
            AlignedRecord::simple(1, 60, "5M", "ACGTA", 30).expect("expected record"),
            AlignedRecord::simple(8, 60, "5M", "ACGTA", 30).expect("expected record"),
        ];
        let mut source = VecSource::from_contigs([("1".to_string(), 100, records)]);
        source.fetch("1", 10).expect("expected fetch");
        let first = source.next_record().expect("expected read").expect("expected record");
        assert_eq!(first.start, 8);
        let second = source.next_record().expect("expected read").expect("expected record");
        assert_eq!(second.start, 20);
        assert!(source.next_record().expect("expected read").is_none());
        assert!(source.fetch("2", 1).is_err());
        assert_eq!(source.contig_length("1").expect("expected length"), 100);
    }
}
