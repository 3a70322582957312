use snvscan::alignment::{AlignedRecord, VecSource};
use snvscan::alignment_window::AlignmentWindow;
use snvscan::classifier::Classifier;
use snvscan::cli::CallingOptions;
use snvscan::errors::Result;
use snvscan::features::FeatureSet;
use snvscan::intervals::IntervalSet;
use snvscan::pipeline::{call_variants, measure_coverage};
use snvscan::reference_index::ReferenceIndex;
use snvscan::scan_worker::ScanContext;
use snvscan::window_pool::{PoolPolicy, WindowPool, MAX_WINDOWS};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CHR1: &str = "ACGTTGCAACGGTACCATGGCATTACGATCGGATCCTAGCTAGGCTTACCGATGCAATCG";
const CHR2: &str = "TTGACCGTAGCATGCAAGTCGATCGGCTAAGCTTGCAGTC";
const SITES: [(&str, u64); 3] = [("chr1", 15), ("chr1", 40), ("chr2", 20)];

/// Marks every candidate as a confident variant.
#[derive(Default)]
struct ConfidentClassifier {
    rows: AtomicUsize,
}

impl Classifier for ConfidentClassifier {
    fn predict(&self, features: &Path, predictions: &Path) -> Result<()> {
        let rows = fs::read_to_string(features)?.lines().count();
        self.rows.fetch_add(rows, Ordering::SeqCst);
        let mut out = String::from("labels 1 -1\n");
        for _ in 0..rows {
            out.push_str("1 0.999 0.001\n");
        }
        fs::write(predictions, out)?;
        Ok(())
    }
}

fn write_reference(dir: &Path) -> PathBuf {
    let mut fasta = String::new();
    let mut fai = String::new();
    for (name, sequence) in [("chr1", CHR1), ("chr2", CHR2)] {
        let _ = writeln!(fasta, ">{name}");
        let offset = fasta.len();
        for chunk in sequence.as_bytes().chunks(16) {
            fasta.push_str(std::str::from_utf8(chunk).expect("expected ascii"));
            fasta.push('\n');
        }
        let _ = writeln!(fai, "{name}\t{}\t{offset}\t16\t17", sequence.len());
    }
    let path = dir.join("genome.fa");
    fs::write(&path, fasta).expect("expected fasta write");
    fs::write(dir.join("genome.fa.fai"), fai).expect("expected fai write");
    path
}

fn alternate(base: u8) -> u8 {
    match base {
        b'A' => b'C',
        b'C' => b'G',
        b'G' => b'T',
        _ => b'A',
    }
}

/// Four 12-base reads over each site, two of them carrying an alternate base.
fn reads_for(sequence: &str, site: u64) -> Vec<AlignedRecord> {
    let start = site - 5;
    let window = &sequence.as_bytes()[(start - 1) as usize..(start + 11) as usize];
    (0..4)
        .map(|copy| {
            let mut bases = window.to_vec();
            if copy % 2 == 1 {
                bases[5] = alternate(bases[5]);
            }
            let bases = String::from_utf8(bases).expect("expected ascii");
            AlignedRecord::simple(start, 60, "12M", &bases, 35).expect("expected record")
        })
        .collect()
}

fn source() -> VecSource {
    source_with_chr1_length(CHR1.len() as u64)
}

/// Alignments whose `chr1` header may be shorter than the reference contig.
fn source_with_chr1_length(chr1_length: u64) -> VecSource {
    let contigs = [("chr1", CHR1), ("chr2", CHR2)].map(|(name, sequence)| {
        let records = SITES
            .iter()
            .filter(|(contig, _)| *contig == name)
            .flat_map(|&(_, site)| reads_for(sequence, site))
            .collect::<Vec<_>>();
        let length = if name == "chr1" { chr1_length } else { sequence.len() as u64 };
        (name.to_string(), length, records)
    });
    VecSource::from_contigs(contigs)
}

fn window_pool(initial: usize, policy: PoolPolicy) -> Arc<WindowPool> {
    window_pool_over(source(), initial, policy)
}

fn window_pool_over(source: VecSource, initial: usize, policy: PoolPolicy) -> Arc<WindowPool> {
    Arc::new(
        WindowPool::new(initial, MAX_WINDOWS, policy, move || {
            Ok(AlignmentWindow::new(Box::new(source.clone())))
        })
        .expect("expected window pool"),
    )
}

fn options(dir: &Path) -> CallingOptions {
    CallingOptions {
        min_quality: 0.0,
        temp_dir: dir.join("handoff"),
        window_capacity: 32,
        split_threshold: 20,
        ..CallingOptions::default()
    }
}

#[test]
fn multi_task_scan_returns_sorted_variants() {
    let dir = tempfile::tempdir().expect("expected tempdir");
    let reference = Arc::new(
        ReferenceIndex::from_fasta(write_reference(dir.path())).expect("expected index"),
    );
    let classifier = Arc::new(ConfidentClassifier::default());
    let windows = window_pool(2, PoolPolicy::Grow);
    let context = ScanContext {
        reference: Arc::clone(&reference),
        windows: Arc::clone(&windows),
        features: Arc::new(FeatureSet::standard()),
        classifier: classifier.clone(),
        options: Arc::new(options(dir.path())),
    };
    let intervals = IntervalSet::from_reference(&reference).expect("expected intervals");

    let variants = call_variants(context, intervals, 3, false).expect("expected scan");

    let called = variants
        .iter()
        .map(|variant| (variant.contig.as_str(), variant.position))
        .collect::<Vec<_>>();
    assert_eq!(called, SITES.to_vec());
    assert_eq!(classifier.rows.load(Ordering::SeqCst), SITES.len());
    for variant in &variants {
        let sequence = if variant.contig == "chr1" { CHR1 } else { CHR2 };
        let reference_base = sequence.as_bytes()[(variant.position - 1) as usize];
        assert_eq!(variant.ref_base, reference_base);
        assert_eq!(variant.alt_base, alternate(reference_base));
        assert_eq!((variant.depth, variant.var_depth), (4, 2));
        assert!(variant.is_het_most_likely());
        assert!((variant.quality - 30.0).abs() < 1e-6);
    }
    assert_eq!(windows.available(), windows.created());
    assert!(windows.created() <= MAX_WINDOWS);
    let leftovers = fs::read_dir(dir.path().join("handoff"))
        .expect("expected handoff dir")
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn short_alignment_contig_skips_only_the_uncovered_intervals() {
    let dir = tempfile::tempdir().expect("expected tempdir");
    let reference = Arc::new(
        ReferenceIndex::from_fasta(write_reference(dir.path())).expect("expected index"),
    );
    let windows = window_pool_over(source_with_chr1_length(30), 2, PoolPolicy::Grow);
    let context = ScanContext {
        reference: Arc::clone(&reference),
        windows: Arc::clone(&windows),
        features: Arc::new(FeatureSet::standard()),
        classifier: Arc::new(ConfidentClassifier::default()),
        options: Arc::new(options(dir.path())),
    };
    let intervals = IntervalSet::from_reference(&reference).expect("expected intervals");

    let variants = call_variants(context, intervals, 3, false).expect("expected scan");
    let called = variants
        .iter()
        .map(|variant| (variant.contig.as_str(), variant.position))
        .collect::<Vec<_>>();
    assert_eq!(called, vec![("chr1", 15), ("chr2", 20)]);
    assert_eq!(windows.available(), windows.created());

    let options = CallingOptions {
        coverage_cutoffs: vec![0],
        ..options(dir.path())
    };
    let beyond = IntervalSet::parse_region_str("chr1:41-50").expect("expected regions");
    let coverage = measure_coverage(
        window_pool_over(source_with_chr1_length(30), 1, PoolPolicy::Block),
        &reference,
        beyond,
        &options,
        1,
        false,
    )
    .expect("expected coverage");
    assert_eq!(coverage.len(), 1);
    assert_eq!(coverage[0].positions_examined, 0);
}

#[test]
fn coverage_rows_follow_reference_order() {
    let dir = tempfile::tempdir().expect("expected tempdir");
    let reference = ReferenceIndex::from_fasta(write_reference(dir.path())).expect("expected index");
    let intervals =
        IntervalSet::parse_region_str("chr2:1-40,chr1:10-20,chr1:50-60").expect("expected regions");
    let options = CallingOptions {
        coverage_cutoffs: vec![0, 3],
        ..options(dir.path())
    };

    let coverage = measure_coverage(
        window_pool(1, PoolPolicy::Block),
        &reference,
        intervals,
        &options,
        2,
        false,
    )
    .expect("expected coverage");

    let rows = coverage
        .iter()
        .map(|row| (row.contig.as_str(), row.interval.first()))
        .collect::<Vec<_>>();
    assert_eq!(rows, vec![("chr1", 10), ("chr1", 50), ("chr2", 1), ("chr2", 21)]);

    let around_site = &coverage[0];
    assert_eq!(around_site.positions_examined, 6);
    assert!((around_site.mean() - 4.0).abs() < 1e-12);
    assert_eq!(around_site.above_cutoff, vec![6, 6]);
    assert_eq!(coverage[1].mean(), 0.0);
}

#[test]
fn pool_grows_past_its_initial_windows() {
    let windows = window_pool(4, PoolPolicy::Grow);
    let held = (0..4)
        .map(|_| windows.checkout().expect("expected pooled window"))
        .collect::<Vec<_>>();
    assert_eq!(windows.created(), 4);
    assert_eq!(windows.available(), 0);

    let fifth = windows.checkout().expect("expected a newly built window");
    assert_eq!(windows.created(), 5);
    drop(fifth);
    drop(held);
    assert_eq!(windows.available(), 5);
}
