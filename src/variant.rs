use crate::errors::{AppError, Result};
use crate::pileup::BaseCounts;
use crate::reference_index::ReferenceIndex;
use crate::utils::{binom_pdf, phred};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::warn;

const GENOTYPE_DEPTH_CAP: u64 = 250;
const MIN_REPORTED_QUALITY: f64 = 0.01;
/// Reported in place of an infinite quality when the classifier gives the
/// no-variant class zero probability.
pub const MAX_REPORTED_QUALITY: f64 = 999.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenotypeProbabilities {
    pub hom_ref: f64,
    pub het: f64,
    pub hom_alt: f64,
}

impl GenotypeProbabilities {
    /// Normalised binomial likelihoods of seeing `alternate` of `total`
    /// reads under each genotype.
    pub fn from_counts(alternate: u64, total: u64) -> Self {
        let (alternate, total) = if total > GENOTYPE_DEPTH_CAP {
            (GENOTYPE_DEPTH_CAP * alternate / total, GENOTYPE_DEPTH_CAP)
        } else {
            (alternate, total)
        };
        let hom_ref = binom_pdf(alternate, total, 0.005);
        let het = binom_pdf(alternate, total, 0.5);
        let hom_alt = binom_pdf(alternate, total, 0.99);
        let sum = hom_ref + het + hom_alt;
        if sum <= 0.0 || !sum.is_finite() {
            return Self {
                hom_ref: 1.0 / 3.0,
                het: 1.0 / 3.0,
                hom_alt: 1.0 / 3.0,
            };
        }
        Self {
            hom_ref: hom_ref / sum,
            het: het / sum,
            hom_alt: hom_alt / sum,
        }
    }
}

/// A scored candidate site.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub contig: String,
    pub position: u64,
    pub ref_base: u8,
    pub alt_base: u8,
    pub quality: f64,
    pub depth: u64,
    pub var_depth: u64,
    pub genotype: GenotypeProbabilities,
}

impl Variant {
    pub fn is_het_most_likely(&self) -> bool {
        self.genotype.het >= self.genotype.hom_alt && self.genotype.het >= self.genotype.hom_ref
    }

    pub fn genotype_label(&self) -> &'static str {
        if self.is_het_most_likely() {
            "0/1"
        } else if self.genotype.hom_alt >= self.genotype.hom_ref {
            "1/1"
        } else {
            "0/0"
        }
    }

    pub fn report_header() -> &'static str {
        "contig\tposition\tref\talt\tquality\tdepth\tvar.depth\tgenotype\tp.het\tp.hom.alt"
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{:.2}\t{}\t{}\t{}\t{:.4}\t{:.4}",
            self.contig,
            self.position,
            char::from(self.ref_base),
            char::from(self.alt_base),
            self.quality,
            self.depth,
            self.var_depth,
            self.genotype_label(),
            self.genotype.het,
            self.genotype.hom_alt
        )
    }
}

/// Side-channel line written for each feature row, used to rebuild a
/// variant from the classifier's prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRecord {
    pub contig: String,
    pub position: u64,
    pub reference_base: u8,
    pub counts: BaseCounts,
}

impl PositionRecord {
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        writeln!(
            out,
            "{}\t{}\t{}\t{},{},{},{}",
            self.contig,
            self.position,
            char::from(self.reference_base),
            self.counts.a,
            self.counts.c,
            self.counts.g,
            self.counts.t
        )?;
        Ok(())
    }

    pub fn parse(line: &str) -> Result<Self> {
        let parse_error = || AppError::ParseError {
            message: format!("malformed position record: {line}"),
        };
        let fields = line.trim_end().split('\t').collect::<Vec<_>>();
        let [contig, position, reference, counts] = fields.as_slice() else {
            return Err(parse_error());
        };
        let counts = counts
            .split(',')
            .map(|value| value.parse::<usize>().map_err(|_| parse_error()))
            .collect::<Result<Vec<_>>>()?;
        let [a, c, g, t] = counts.as_slice() else {
            return Err(parse_error());
        };
        Ok(Self {
            contig: (*contig).to_string(),
            position: position.parse().map_err(|_| parse_error())?,
            reference_base: *reference.as_bytes().first().ok_or_else(parse_error)?,
            counts: BaseCounts {
                a: *a,
                c: *c,
                g: *g,
                t: *t,
            },
        })
    }

    pub fn to_variant(&self, quality: f64) -> Variant {
        let alt_base = self.counts.top_alternate(self.reference_base).unwrap_or(b'N');
        let depth = self.counts.total() as u64;
        let var_depth = self.counts.get(alt_base) as u64;
        Variant {
            contig: self.contig.clone(),
            position: self.position,
            ref_base: self.reference_base,
            alt_base,
            quality,
            depth,
            var_depth,
            genotype: GenotypeProbabilities::from_counts(var_depth, depth),
        }
    }
}

/// Phred quality of the site being a variant given the classifier's two
/// class probabilities.
pub fn variant_quality(p_no_variant: f64, p_variant: f64) -> f64 {
    let total = p_no_variant + p_variant;
    if total <= 0.0 {
        return 0.0;
    }
    phred(p_no_variant / total).min(MAX_REPORTED_QUALITY)
}

/// Pairs each prediction row with its position record. A missing or empty
/// prediction file yields no variants.
pub fn convert_predictions(predictions: &Path, positions: &Path, min_quality: f64) -> Result<Vec<Variant>> {
    let prediction_file = match File::open(predictions) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %predictions.display(), error = %err, "classifier output missing, no variants converted");
            return Ok(Vec::new());
        }
    };
    let position_file = File::open(positions)?;
    convert_prediction_readers(
        BufReader::new(prediction_file),
        BufReader::new(position_file),
        min_quality,
    )
}

pub fn convert_prediction_readers<P: BufRead, Q: BufRead>(
    predictions: P,
    positions: Q,
    min_quality: f64,
) -> Result<Vec<Variant>> {
    let mut prediction_lines = predictions.lines();
    let Some(header) = prediction_lines.next().transpose()? else {
        warn!("classifier output is empty, no variants converted");
        return Ok(Vec::new());
    };
    let labels = header.split_whitespace().collect::<Vec<_>>();
    if labels.len() < 3 || labels[0] != "labels" {
        return Err(AppError::ParseError {
            message: format!("unrecognised prediction header: {header}"),
        });
    }
    let (variant_column, no_variant_column) = if labels[2] == "1" { (2, 1) } else { (1, 2) };

    let mut position_lines = positions.lines();
    let mut variants = Vec::new();
    let mut paired = 0_usize;
    loop {
        let (prediction, position) = match (
            prediction_lines.next().transpose()?,
            position_lines.next().transpose()?,
        ) {
            (Some(prediction), Some(position)) => (prediction, position),
            (None, None) => break,
            (prediction, position) => {
                let predictions = paired + usize::from(prediction.is_some()) + prediction_lines.count();
                let positions = paired + usize::from(position.is_some()) + position_lines.count();
                warn!(predictions, positions, "prediction and position row counts differ, unmatched rows ignored");
                break;
            }
        };
        paired += 1;
        let columns = prediction.split_whitespace().collect::<Vec<_>>();
        let probability = |column: usize| {
            columns
                .get(column)
                .and_then(|value| value.parse::<f64>().ok())
                .ok_or_else(|| AppError::ParseError {
                    message: format!("malformed prediction row: {prediction}"),
                })
        };
        let quality = variant_quality(probability(no_variant_column)?, probability(variant_column)?);
        if quality <= MIN_REPORTED_QUALITY || quality < min_quality {
            continue;
        }
        variants.push(PositionRecord::parse(&position)?.to_variant(quality));
    }
    Ok(variants)
}

/// Orders variants by reference contig order, then position.
pub fn sort_variants(variants: &mut [Variant], reference: &ReferenceIndex) {
    variants.sort_by(|left, right| {
        reference
            .contig_rank(&left.contig)
            .cmp(&reference.contig_rank(&right.contig))
            .then_with(|| left.contig.cmp(&right.contig))
            .then_with(|| left.position.cmp(&right.position))
    });
}

#[cfg(test)]
mod tests {
    use super::{
        convert_prediction_readers, sort_variants, variant_quality, GenotypeProbabilities,
        PositionRecord, MAX_REPORTED_QUALITY,
    };
    use crate::pileup::BaseCounts;
    use crate::reference_index::ReferenceIndex;
    use std::io::Cursor;

    const POSITIONS: &str = "2\t15\tA\t3,5,0,0\n1\t40\tG\t0,0,1,9\n1\t7\tC\t0,10,0,0\n";

    #[test]
    fn position_records_survive_a_write() {
        let record = PositionRecord {
            contig: "chr1".to_string(),
            position: 123,
            reference_base: b'T',
            counts: BaseCounts { a: 1, c: 2, g: 3, t: 4 },
        };
        let mut out = Vec::new();
        record.write_to(&mut out).expect("expected write");
        let line = String::from_utf8(out).expect("expected utf8");
        assert_eq!(line, "chr1\t123\tT\t1,2,3,4\n");
        assert_eq!(PositionRecord::parse(&line).expect("expected parse"), record);
        assert!(PositionRecord::parse("chr1\t1\tA\t1,2").is_err());
    }

    #[test]
    fn converts_rows_and_drops_low_quality() {
        let predictions = "labels 1 -1\n1 0.99 0.01\n1 0.9999 0.0001\n-1 0.001 0.999\n";
        let variants =
            convert_prediction_readers(Cursor::new(predictions), Cursor::new(POSITIONS), 0.0)
                .expect("expected conversion");
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].alt_base, b'C');
        assert_eq!(variants[0].var_depth, 5);
        assert!((variants[0].quality - 20.0).abs() < 1e-6);
        assert!(variants[0].is_het_most_likely());
        assert_eq!(variants[1].alt_base, b'T');
        assert!(!variants[1].is_het_most_likely());

        let strict = convert_prediction_readers(Cursor::new(predictions), Cursor::new(POSITIONS), 30.0)
            .expect("expected conversion");
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].position, 40);
    }

    #[test]
    fn header_order_selects_variant_column() {
        let predictions = "labels -1 1\n-1 0.01 0.99\n";
        let variants =
            convert_prediction_readers(Cursor::new(predictions), Cursor::new(POSITIONS), 0.0)
                .expect("expected conversion");
        assert_eq!(variants.len(), 1);
        assert!((variants[0].quality - 20.0).abs() < 1e-6);
    }

    #[test]
    fn empty_prediction_output_yields_nothing() {
        let variants = convert_prediction_readers(Cursor::new(""), Cursor::new(POSITIONS), 0.0)
            .expect("expected conversion");
        assert!(variants.is_empty());
        assert!(convert_prediction_readers(Cursor::new("garbage\n"), Cursor::new(""), 0.0).is_err());
    }

    #[test]
    fn certain_variants_get_a_finite_quality() {
        assert_eq!(variant_quality(0.0, 1.0), MAX_REPORTED_QUALITY);
        let predictions = "labels 1 -1\n1 1 0\n";
        let variants =
            convert_prediction_readers(Cursor::new(predictions), Cursor::new(POSITIONS), 0.0)
                .expect("expected conversion");
        assert_eq!(variants.len(), 1);
        assert!(variants[0].to_string().contains("\t999.00\t"));
    }

    #[test]
    fn unmatched_rows_are_ignored() {
        let predictions = "labels 1 -1\n1 0.99 0.01\n1 0.99 0.01\n1 0.99 0.01\n1 0.99 0.01\n";
        let variants =
            convert_prediction_readers(Cursor::new(predictions), Cursor::new(POSITIONS), 0.0)
                .expect("expected conversion");
        assert_eq!(variants.len(), 3);

        let short = "2\t15\tA\t3,5,0,0\n";
        let variants = convert_prediction_readers(
            Cursor::new("labels 1 -1\n1 0.99 0.01\n1 0.99 0.01\n"),
            Cursor::new(short),
            0.0,
        )
        .expect("expected conversion");
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].position, 15);
    }

    #[test]
    fn genotype_probabilities_are_normalised() {
        let genotype = GenotypeProbabilities::from_counts(300, 600);
        let total = genotype.hom_ref + genotype.het + genotype.hom_alt;
        assert!((total - 1.0).abs() < 1e-9);
        assert!(genotype.het > 0.99);
        assert!((variant_quality(0.5, 0.5) - 3.0103).abs() < 1e-3);
    }

    #[test]
    fn sorts_by_reference_order() {
        let index = ReferenceIndex::from_reader(Cursor::new("2\t100\t3\t60\t61\n1\t100\t110\t60\t61\n"))
            .expect("expected index");
        let predictions = "labels 1 -1\n1 0.99 0.01\n1 0.99 0.01\n1 0.99 0.01\n";
        let mut variants =
            convert_prediction_readers(Cursor::new(predictions), Cursor::new(POSITIONS), 0.0)
                .expect("expected conversion");
        sort_variants(&mut variants, &index);
        let order = variants
            .iter()
            .map(|variant| (variant.contig.as_str(), variant.position))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![("2", 15), ("1", 7), ("1", 40)]);
    }
}
