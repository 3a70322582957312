use crate::errors::{AppError, Result};
use crate::pileup::{PileEntry, PileupColumn, MAX_PILE};
use crate::reference_window::ReferenceWindow;
use crate::utils::binom_pdf;
use tracing::debug;

const MIN_COUNTED_QUALITY: u8 = 10;
const BINOMIAL_DEPTH_CAP: u64 = 250;
const QUALITY_SUM_CAP: f64 = 1024.0;
const MISMATCH_CAP: f64 = 50.0;
const HOMOPOLYMER_LOOKAROUND: u64 = 10;
const DIVERSITY_HALF_WIDTH: u64 = 10;

/// Computes one group of feature columns for a candidate site.
///
/// `compute` appends exactly `column_count()` values to `values`, each
/// finite and inside `range()`.
pub trait FeatureCounter: Send + Sync {
    fn name(&self) -> &'static str;

    fn column_count(&self) -> usize;

    fn column_description(&self, column: usize) -> &'static str;

    fn range(&self) -> (f64, f64);

    fn compute(
        &self,
        reference_base: u8,
        reference: &ReferenceWindow,
        column: &PileupColumn<'_>,
        values: &mut Vec<f64>,
    );
}

/// Reference and non-reference tallies over usable piled bases.
fn split_by_reference<F>(reference_base: u8, column: &PileupColumn<'_>, mut weigh: F) -> [(f64, f64); 2]
where
    F: FnMut(&PileEntry) -> Option<f64>,
{
    let mut sums = [(0.0, 0.0); 2];
    for entry in column.entries() {
        if entry.base == b'N' {
            continue;
        }
        let Some(weight) = weigh(entry) else {
            continue;
        };
        let slot = usize::from(entry.base != reference_base);
        sums[slot].0 += weight;
        sums[slot].1 += 1.0;
    }
    sums
}

fn mean(sum: f64, count: f64) -> f64 {
    if count > 0.0 { sum / count } else { 0.0 }
}

#[derive(Debug, Default)]
pub struct DepthCounter;

impl FeatureCounter for DepthCounter {
    fn name(&self) -> &'static str {
        "total.depth"
    }

    fn column_count(&self) -> usize {
        1
    }

    fn column_description(&self, _column: usize) -> &'static str {
        "Total read depth at site"
    }

    fn range(&self) -> (f64, f64) {
        (0.0, MAX_PILE as f64)
    }

    fn compute(&self, _: u8, _: &ReferenceWindow, column: &PileupColumn<'_>, values: &mut Vec<f64>) {
        values.push(column.depth() as f64);
    }
}

/// Probability that the site is not homozygous reference under a simple
/// three-genotype binomial model.
#[derive(Debug, Default)]
pub struct BinomialProbabilityCounter;

impl FeatureCounter for BinomialProbabilityCounter {
    fn name(&self) -> &'static str {
        "distro.prob"
    }

    fn column_count(&self) -> usize {
        1
    }

    fn column_description(&self, _column: usize) -> &'static str {
        "Binomial probability that site is not homozygous reference"
    }

    fn range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn compute(&self, reference_base: u8, _: &ReferenceWindow, column: &PileupColumn<'_>, values: &mut Vec<f64>) {
        let [(reference_count, _), (alternate_count, _)] =
            split_by_reference(reference_base, column, |entry| {
                (entry.quality >= MIN_COUNTED_QUALITY).then_some(1.0)
            });
        let mut total = (reference_count + alternate_count) as u64;
        let mut alternate = alternate_count as u64;
        if total > BINOMIAL_DEPTH_CAP {
            alternate = BINOMIAL_DEPTH_CAP * alternate / total;
            total = BINOMIAL_DEPTH_CAP;
        }
        let het = binom_pdf(alternate, total, 0.5);
        let hom_alt = binom_pdf(alternate, total, 0.99);
        let hom_ref = binom_pdf(alternate, total, 0.005);
        let denominator = het + hom_alt + hom_ref;
        let value = if denominator > 0.0 {
            1.0 - hom_ref / denominator
        } else {
            1.0
        };
        values.push(value.clamp(0.0, 1.0));
    }
}

#[derive(Debug, Default)]
pub struct QualitySumCounter;

impl FeatureCounter for QualitySumCounter {
    fn name(&self) -> &'static str {
        "quality.sums"
    }

    fn column_count(&self) -> usize {
        2
    }

    fn column_description(&self, column: usize) -> &'static str {
        if column == 0 {
            "Sum of quality scores of reference bases"
        } else {
            "Sum of quality scores of non-reference bases"
        }
    }

    fn range(&self) -> (f64, f64) {
        (-1.0, 1.0)
    }

    fn compute(&self, reference_base: u8, _: &ReferenceWindow, column: &PileupColumn<'_>, values: &mut Vec<f64>) {
        let sums = split_by_reference(reference_base, column, |entry| Some(f64::from(entry.quality)));
        for (sum, _) in sums {
            values.push(sum.min(QUALITY_SUM_CAP) / QUALITY_SUM_CAP * 2.0 - 1.0);
        }
    }
}

#[derive(Debug, Default)]
pub struct MappingQualityCounter;

impl FeatureCounter for MappingQualityCounter {
    fn name(&self) -> &'static str {
        "mapping.quality"
    }

    fn column_count(&self) -> usize {
        2
    }

    fn column_description(&self, column: usize) -> &'static str {
        if column == 0 {
            "Mean mapping quality of reads with reference base"
        } else {
            "Mean mapping quality of reads with non-reference base"
        }
    }

    fn range(&self) -> (f64, f64) {
        (0.0, 255.0)
    }

    fn compute(&self, reference_base: u8, _: &ReferenceWindow, column: &PileupColumn<'_>, values: &mut Vec<f64>) {
        let sums = split_by_reference(reference_base, column, |entry| Some(f64::from(entry.mapq)));
        for (sum, count) in sums {
            values.push(mean(sum, count));
        }
    }
}

#[derive(Debug, Default)]
pub struct VariantFractionCounter;

impl FeatureCounter for VariantFractionCounter {
    fn name(&self) -> &'static str {
        "var.frac"
    }

    fn column_count(&self) -> usize {
        1
    }

    fn column_description(&self, _column: usize) -> &'static str {
        "Fraction of non-reference bases at site"
    }

    fn range(&self) -> (f64, f64) {
        (-1.0, 1.0)
    }

    fn compute(&self, reference_base: u8, _: &ReferenceWindow, column: &PileupColumn<'_>, values: &mut Vec<f64>) {
        let [(reference_count, _), (alternate_count, _)] =
            split_by_reference(reference_base, column, |entry| {
                (entry.quality >= MIN_COUNTED_QUALITY).then_some(1.0)
            });
        let fraction = mean(alternate_count, reference_count + alternate_count);
        values.push(fraction * 2.0 - 1.0);
    }
}

/// Divergence of the per-strand variant fraction from one half.
#[derive(Debug, Default)]
pub struct StrandBiasCounter;

impl FeatureCounter for StrandBiasCounter {
    fn name(&self) -> &'static str {
        "strand.bias"
    }

    fn column_count(&self) -> usize {
        1
    }

    fn column_description(&self, _column: usize) -> &'static str {
        "Strand bias of non-reference bases"
    }

    fn range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn compute(&self, reference_base: u8, _: &ReferenceWindow, column: &PileupColumn<'_>, values: &mut Vec<f64>) {
        let mut forward = [0.0_f64; 2];
        let mut reverse = [0.0_f64; 2];
        for entry in column.entries().iter().filter(|entry| entry.base != b'N') {
            let slot = usize::from(entry.base != reference_base);
            if entry.reverse {
                reverse[slot] += 1.0;
            } else {
                forward[slot] += 1.0;
            }
        }
        let deviation = |counts: [f64; 2]| {
            let total = counts[0] + counts[1];
            if total == 0.0 {
                return 0.0;
            }
            let fraction = counts[1] / total;
            (fraction - 0.5) * (fraction - 0.5) / 0.5
        };
        values.push(deviation(forward) + deviation(reverse));
    }
}

#[derive(Debug, Default)]
pub struct MismatchCounter;

impl FeatureCounter for MismatchCounter {
    fn name(&self) -> &'static str {
        "mismatch.counts"
    }

    fn column_count(&self) -> usize {
        2
    }

    fn column_description(&self, column: usize) -> &'static str {
        if column == 0 {
            "Mean number of mismatching bases on reference reads"
        } else {
            "Mean number of mismatching bases on non-reference reads"
        }
    }

    fn range(&self) -> (f64, f64) {
        (-1.0, 1.0)
    }

    fn compute(&self, reference_base: u8, reference: &ReferenceWindow, column: &PileupColumn<'_>, values: &mut Vec<f64>) {
        let position = column.position();
        let mut sums = [(0.0_f64, 0.0_f64); 2];
        for read in column.records().take(MAX_PILE) {
            let Some(base) = read.base_at(position) else {
                continue;
            };
            if base == b'N' {
                continue;
            }
            let slot = usize::from(base != reference_base);
            sums[slot].0 += f64::from(read.mismatch_count(reference));
            sums[slot].1 += 1.0;
        }
        for (sum, count) in sums {
            values.push(mean(sum, count).min(MISMATCH_CAP) / MISMATCH_CAP * 2.0 - 1.0);
        }
    }
}

/// Mean relative offset within the read of reference and non-reference bases.
#[derive(Debug, Default)]
pub struct ReadPositionCounter;

impl FeatureCounter for ReadPositionCounter {
    fn name(&self) -> &'static str {
        "read.pos"
    }

    fn column_count(&self) -> usize {
        2
    }

    fn column_description(&self, column: usize) -> &'static str {
        if column == 0 {
            "Mean read position of reference bases"
        } else {
            "Mean read position of non-reference bases"
        }
    }

    fn range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn compute(&self, reference_base: u8, _: &ReferenceWindow, column: &PileupColumn<'_>, values: &mut Vec<f64>) {
        let sums = split_by_reference(reference_base, column, |entry| {
            (entry.read_length > 0)
                .then(|| entry.read_offset as f64 / entry.read_length as f64)
        });
        for (sum, count) in sums {
            values.push(mean(sum, count));
        }
    }
}

#[derive(Debug, Default)]
pub struct HomopolymerRunCounter;

impl HomopolymerRunCounter {
    fn run_length(reference: &ReferenceWindow, anchor: Option<u64>, step: impl Fn(u64) -> Option<u64>) -> f64 {
        let Some(anchor) = anchor else {
            return 0.0;
        };
        let Some(base) = reference.get(anchor) else {
            return 0.0;
        };
        let mut count = 0;
        let mut cursor = anchor;
        while count < HOMOPOLYMER_LOOKAROUND {
            let Some(next) = step(cursor) else {
                break;
            };
            if reference.get(next) != Some(base) {
                break;
            }
            count += 1;
            cursor = next;
        }
        count as f64
    }
}

impl FeatureCounter for HomopolymerRunCounter {
    fn name(&self) -> &'static str {
        "hrun.counter"
    }

    fn column_count(&self) -> usize {
        2
    }

    fn column_description(&self, column: usize) -> &'static str {
        if column == 0 {
            "Length of homopolymer run to left of site"
        } else {
            "Length of homopolymer run to right of site"
        }
    }

    fn range(&self) -> (f64, f64) {
        (0.0, HOMOPOLYMER_LOOKAROUND as f64)
    }

    fn compute(&self, _: u8, reference: &ReferenceWindow, column: &PileupColumn<'_>, values: &mut Vec<f64>) {
        let position = column.position();
        values.push(Self::run_length(reference, position.checked_sub(1), |p| p.checked_sub(1)));
        values.push(Self::run_length(reference, position.checked_add(1), |p| p.checked_add(1)));
    }
}

/// Squared distance of local base composition from genome-wide expectation.
#[derive(Debug, Default)]
pub struct NucleotideDiversityCounter;

impl FeatureCounter for NucleotideDiversityCounter {
    fn name(&self) -> &'static str {
        "nuc.diversity"
    }

    fn column_count(&self) -> usize {
        1
    }

    fn column_description(&self, _column: usize) -> &'static str {
        "Divergence of local base composition from expected frequencies"
    }

    fn range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn compute(&self, _: u8, reference: &ReferenceWindow, column: &PileupColumn<'_>, values: &mut Vec<f64>) {
        const EXPECTED: [(u8, f64); 4] = [(b'A', 0.3), (b'C', 0.2), (b'G', 0.2), (b'T', 0.3)];
        let position = column.position();
        let first = position.saturating_sub(DIVERSITY_HALF_WIDTH);
        let mut counts = [0.0_f64; 4];
        for base in (first..=position + DIVERSITY_HALF_WIDTH).filter_map(|p| reference.get(p)) {
            if let Some(slot) = EXPECTED.iter().position(|(expected, _)| *expected == base) {
                counts[slot] += 1.0;
            }
        }
        let total: f64 = counts.iter().sum();
        if total == 0.0 {
            values.push(0.0);
            return;
        }
        let divergence = EXPECTED
            .iter()
            .zip(counts)
            .map(|((_, expected), count)| (count / total - expected).powi(2))
            .sum();
        values.push(divergence);
    }
}

/// Ordered, immutable list of counters used for every site of a run.
pub struct FeatureSet {
    counters: Vec<Box<dyn FeatureCounter>>,
}

impl std::fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.counters.iter().map(|counter| counter.name()))
            .finish()
    }
}

impl FeatureSet {
    pub fn new(counters: Vec<Box<dyn FeatureCounter>>) -> Self {
        Self { counters }
    }

    pub fn standard() -> Self {
        Self::new(standard_counters())
    }

    /// The standard list minus the counters at `exclusions` (indices into
    /// the standard list).
    pub fn with_exclusions(exclusions: &[usize]) -> Result<Self> {
        let counters = standard_counters();
        if let Some(&bad) = exclusions.iter().find(|&&index| index >= counters.len()) {
            return Err(AppError::InvalidValue {
                flag: "--exclude-counter".to_string(),
                value: bad.to_string(),
                reason: format!("there are only {} counters", counters.len()),
            });
        }
        let kept = counters
            .into_iter()
            .enumerate()
            .filter_map(|(index, counter)| {
                if exclusions.contains(&index) {
                    debug!(counter = counter.name(), "excluding feature counter");
                    None
                } else {
                    Some(counter)
                }
            })
            .collect();
        Ok(Self::new(kept))
    }

    pub fn counter_names(&self) -> Vec<&'static str> {
        self.counters.iter().map(|counter| counter.name()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.counters.iter().map(|counter| counter.column_count()).sum()
    }

    pub fn describe_columns(&self) -> Vec<String> {
        self.counters
            .iter()
            .flat_map(|counter| {
                (0..counter.column_count())
                    .map(move |column| format!("{}: {}", counter.name(), counter.column_description(column)))
            })
            .collect()
    }

    /// Replaces `values` with the feature vector for the site. Any value that
    /// is non-finite or outside its counter's range is an `InvalidFeature`.
    pub fn extract(
        &self,
        reference_base: u8,
        reference: &ReferenceWindow,
        column: &PileupColumn<'_>,
        values: &mut Vec<f64>,
    ) -> Result<()> {
        values.clear();
        for counter in &self.counters {
            let start = values.len();
            counter.compute(reference_base, reference, column, values);
            let (min, max) = counter.range();
            let produced = &values[start..];
            if produced.len() != counter.column_count() {
                return Err(AppError::InvalidFeature {
                    name: counter.name().to_string(),
                    value: produced.len() as f64,
                    min: counter.column_count() as f64,
                    max: counter.column_count() as f64,
                });
            }
            if let Some(&value) = produced
                .iter()
                .find(|value| !value.is_finite() || **value < min || **value > max)
            {
                return Err(AppError::InvalidFeature {
                    name: counter.name().to_string(),
                    value,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }
}

fn standard_counters() -> Vec<Box<dyn FeatureCounter>> {
    vec![
        Box::new(DepthCounter),
        Box::new(BinomialProbabilityCounter),
        Box::new(QualitySumCounter),
        Box::new(MappingQualityCounter),
        Box::new(VariantFractionCounter),
        Box::new(StrandBiasCounter),
        Box::new(MismatchCounter),
        Box::new(ReadPositionCounter),
        Box::new(HomopolymerRunCounter),
        Box::new(NucleotideDiversityCounter),
    ]
}

#[cfg(test)]
mod tests {
    use super::{FeatureCounter, FeatureSet};
    use crate::alignment::{AlignedRecord, VecSource, FLAG_REVERSE};
    use crate::alignment_window::AlignmentWindow;
    use crate::errors::AppError;
    use crate::pileup::PileupColumn;
    use crate::reference_index::ReferenceIndex;
    use crate::reference_window::tests::write_fasta;
    use crate::reference_window::ReferenceWindow;
    use std::sync::Arc;

    const REFERENCE: &str = "ACGTACGTAAAAAGCCTTACGGATCCATGACGTACGTAC";

    fn fixture(dir: &std::path::Path) -> (ReferenceWindow, AlignmentWindow) {
        let path = write_fasta(dir, &[("1", REFERENCE)], 10);
        let index = Arc::new(ReferenceIndex::from_fasta(&path).expect("expected index"));
        let mut reference = ReferenceWindow::open(index, 64).expect("expected window");
        reference.reset_to("1", 1).expect("expected reset");

        // Site 14 is G in the reference; two reads carry T there.
        let read = |start: u64, bases: &str, flags: u16| {
            AlignedRecord::simple(start, 50, "10M", bases, 30)
                .expect("expected record")
                .with_flags(flags)
        };
        let records = vec![
            read(9, "AAAAAGCCTT", 0),
            read(10, "AAAATCCTTA", FLAG_REVERSE),
            read(11, "AAATCCTTAC", 0),
            read(12, "AAGCCTTACG", FLAG_REVERSE),
        ];
        let source = VecSource::from_contigs([("1".to_string(), REFERENCE.len() as u64, records)]);
        (reference, AlignmentWindow::new(Box::new(source)))
    }

    #[test]
    fn extracts_validated_feature_vector() {
        let dir = tempfile::tempdir().expect("expected tempdir");
        let (reference, mut window) = fixture(dir.path());
        let mut column = PileupColumn::new(&mut window);
        column.advance_to("1", 14).expect("expected advance");
        assert_eq!(column.bases_string(), "GTTG");

        let features = FeatureSet::standard();
        let mut values = Vec::new();
        features
            .extract(b'G', &reference, &column, &mut values)
            .expect("expected features");
        assert_eq!(values.len(), features.column_count());
        assert_eq!(values.len(), 15);
        assert_eq!(values[0], 4.0);
        assert_eq!(values[6], 0.0);
        assert_eq!(features.describe_columns().len(), 15);
    }

    #[test]
    fn homopolymer_runs_look_both_ways() {
        let dir = tempfile::tempdir().expect("expected tempdir");
        let (reference, mut window) = fixture(dir.path());
        let mut column = PileupColumn::new(&mut window);
        column.advance_to("1", 14).expect("expected advance");
        let mut values = Vec::new();
        super::HomopolymerRunCounter.compute(b'G', &reference, &column, &mut values);
        assert_eq!(values, vec![4.0, 1.0]);
    }

    #[test]
    fn exclusions_drop_counters_by_index() {
        let features = FeatureSet::with_exclusions(&[0, 9]).expect("expected feature set");
        assert_eq!(features.column_count(), 13);
        assert_eq!(features.counter_names()[0], "distro.prob");
        assert!(matches!(
            FeatureSet::with_exclusions(&[10]),
            Err(AppError::InvalidValue { .. })
        ));
    }

    struct BrokenCounter;

    impl FeatureCounter for BrokenCounter {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn column_count(&self) -> usize {
            1
        }

        fn column_description(&self, _column: usize) -> &'static str {
            "always out of range"
        }

        fn range(&self) -> (f64, f64) {
            (0.0, 1.0)
        }

        fn compute(&self, _: u8, _: &ReferenceWindow, _: &PileupColumn<'_>, values: &mut Vec<f64>) {
            values.push(f64::NAN);
        }
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let dir = tempfile::tempdir().expect("expected tempdir");
        let (reference, mut window) = fixture(dir.path());
        let mut column = PileupColumn::new(&mut window);
        column.advance_to("1", 14).expect("expected advance");
        let features = FeatureSet::new(vec![Box::new(BrokenCounter)]);
        let mut values = Vec::new();
        assert!(matches!(
            features.extract(b'G', &reference, &column, &mut values),
            Err(AppError::InvalidFeature { .. })
        ));
    }
}
