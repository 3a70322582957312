use crate::alignment::AlignmentSource;
use crate::alignment_window::AlignmentWindow;
use crate::classifier::SvmPredictor;
use crate::cli::{CallingOptions, Mode, ScanArgs};
use crate::coverage::{CoverageTask, IntervalCoverage};
use crate::distributor::{IntervalTask, ProgressHandle, WorkDistributor};
use crate::errors::{AppError, Result};
use crate::features::FeatureSet;
use crate::intervals::IntervalSet;
use crate::reference_index::ReferenceIndex;
use crate::scan_worker::{ScanContext, SnpScanTask};
use crate::variant::{sort_variants, Variant};
use crate::window_pool::WindowPool;
use crate::writer;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::io::{stdout, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn run(args: &ScanArgs) -> Result<()> {
    match args.mode {
        Mode::Emit => {
            info!(excluded = ?args.excluded_counters, "emitting feature columns");
            let features = FeatureSet::with_exclusions(&args.excluded_counters)?;
            let mut out = stdout().lock();
            emit_columns(&mut out, &features)?;
            out.flush()?;
            Ok(())
        }
        Mode::Call | Mode::Coverage => {
            info!(
                mode = ?args.mode,
                reference = %args.reference,
                alignments = %args.alignments,
                threads = args.threads,
                output = %args.output,
                "starting snvscan run"
            );
            if args.mode == Mode::Call {
                run_call(args)
            } else {
                run_coverage(args)
            }
        }
    }
}

/// Prints `index \t description` for each feature column, 1-based to match
/// the classifier's feature numbering.
pub fn emit_columns<W: Write + ?Sized>(out: &mut W, features: &FeatureSet) -> Result<()> {
    for (index, description) in features.describe_columns().iter().enumerate() {
        writeln!(out, "{}\t{description}", index + 1)?;
    }
    Ok(())
}

fn run_call(args: &ScanArgs) -> Result<()> {
    let reference = Arc::new(ReferenceIndex::from_fasta(&args.reference)?);
    let intervals = resolve_intervals(args, &reference)?;
    let options = Arc::new(args.calling_options());

    let predictor = SvmPredictor::new(&options.classifier, &options.model);
    if !predictor.is_available() {
        return Err(AppError::CommandNotFound {
            command: options.classifier.clone(),
        });
    }
    if !options.model.exists() {
        return Err(AppError::InvalidValue {
            flag: "--model".to_string(),
            value: options.model.to_string_lossy().into_owned(),
            reason: "model file does not exist".to_string(),
        });
    }

    let context = ScanContext {
        reference: Arc::clone(&reference),
        windows: Arc::new(alignment_window_pool(&args.alignments, &options)?),
        features: Arc::new(FeatureSet::with_exclusions(&options.excluded_counters)?),
        classifier: Arc::new(predictor),
        options,
    };
    let variants = call_variants(context, intervals, args.threads, args.progress)?;
    info!(variants = variants.len(), output = %args.output, "writing variant report");
    writer::with_text_output_writer(&args.output, |out| writer::write_variant_report(out, &variants))
}

fn run_coverage(args: &ScanArgs) -> Result<()> {
    let reference = ReferenceIndex::from_fasta(&args.reference)?;
    let intervals = resolve_intervals(args, &reference)?;
    let options = args.calling_options();
    let windows = Arc::new(alignment_window_pool(&args.alignments, &options)?);
    let coverage = measure_coverage(
        windows,
        &reference,
        intervals,
        &options,
        args.threads,
        args.progress,
    )?;
    info!(intervals = coverage.len(), output = %args.output, "writing coverage report");
    writer::with_text_output_writer(&args.output, |out| {
        writer::write_coverage_report(out, &options.coverage_cutoffs, &coverage)
    })
}

/// Scans every interval for candidate sites and classifies them. Variants
/// come back in reference order.
pub fn call_variants(
    context: ScanContext,
    intervals: IntervalSet,
    threads: usize,
    show_progress: bool,
) -> Result<Vec<Variant>> {
    let reference = Arc::clone(&context.reference);
    let threshold = context.options.split_threshold;
    let mut variants = distribute(
        intervals,
        threads,
        threshold,
        show_progress,
        "calling variants",
        move |set| Ok(Some(SnpScanTask::new(set, context.clone()))),
    )?;
    sort_variants(&mut variants, &reference);
    Ok(variants)
}

/// Mean depth per interval, in reference order.
pub fn measure_coverage(
    windows: Arc<WindowPool>,
    reference: &ReferenceIndex,
    intervals: IntervalSet,
    options: &CallingOptions,
    threads: usize,
    show_progress: bool,
) -> Result<Vec<IntervalCoverage>> {
    let cutoffs: Arc<[usize]> = Arc::from(options.coverage_cutoffs.as_slice());
    let mut coverage = distribute(
        intervals,
        threads,
        options.split_threshold,
        show_progress,
        "measuring coverage",
        move |set| Ok(Some(CoverageTask::new(set, Arc::clone(&windows), Arc::clone(&cutoffs)))),
    )?;
    coverage.sort_by(|left, right| {
        reference
            .contig_rank(&left.contig)
            .cmp(&reference.contig_rank(&right.contig))
            .then_with(|| left.contig.cmp(&right.contig))
            .then_with(|| left.interval.cmp(&right.interval))
    });
    Ok(coverage)
}

/// Intervals from `--intervals` (a BED file when the path exists, a region
/// list otherwise), from `--known-sites`, or the whole reference; merged and
/// bounded by contig lengths.
pub fn resolve_intervals(args: &ScanArgs, reference: &ReferenceIndex) -> Result<IntervalSet> {
    let mut intervals = if let Some(regions) = &args.intervals {
        if Path::new(regions).exists() {
            IntervalSet::from_bed_file(regions)?
        } else {
            IntervalSet::parse_region_str(regions)?
        }
    } else if let Some(sites) = &args.known_sites {
        IntervalSet::from_known_sites(sites)?
    } else {
        IntervalSet::from_reference(reference)?
    };
    intervals.sort_and_merge();
    let intervals = intervals.clamped_to(reference)?;
    if intervals.is_empty() {
        warn!("no intervals left to scan");
    }
    Ok(intervals)
}

pub fn build_thread_pool(threads: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|index| format!("snvscan-worker-{index}"))
        .build()
        .map_err(|err| AppError::ParseError {
            message: format!("failed to initialize rayon thread pool: {err}"),
        })
}

fn alignment_window_pool(alignments: &str, options: &CallingOptions) -> Result<WindowPool> {
    let path = alignments.to_string();
    WindowPool::new(
        options.initial_windows,
        options.max_windows,
        options.pool_policy,
        move || Ok(AlignmentWindow::new(open_alignment_source(&path)?)),
    )
}

#[cfg(feature = "htslib")]
pub fn open_alignment_source(path: &str) -> Result<Box<dyn AlignmentSource>> {
    Ok(Box::new(crate::htslib_source::HtslibSource::open(path)?))
}

#[cfg(not(feature = "htslib"))]
pub fn open_alignment_source(path: &str) -> Result<Box<dyn AlignmentSource>> {
    Err(AppError::InvalidValue {
        flag: "--bam".to_string(),
        value: path.to_string(),
        reason: "binary built without feature \"htslib\"; rebuild with --features htslib".to_string(),
    })
}

fn distribute<T, F>(
    intervals: IntervalSet,
    threads: usize,
    threshold: u64,
    show_progress: bool,
    label: &'static str,
    factory: F,
) -> Result<Vec<T::Item>>
where
    T: IntervalTask,
    F: FnMut(IntervalSet) -> Result<Option<T>>,
{
    let total = intervals.extent();
    let pool = Arc::new(build_thread_pool(threads)?);
    let mut distributor = WorkDistributor::new(pool, factory, threshold);
    let started = Instant::now();
    let tasks = distributor.submit(intervals)?;
    info!(
        bases = total,
        threads,
        tasks,
        threshold = distributor.threshold(),
        "{label}"
    );

    let reporter = ProgressReporter::start(show_progress, total, distributor.progress_handle());
    let outcome = distributor.wait_for_completion();
    reporter.finish(outcome.is_ok());
    outcome?;

    info!(
        bases = distributor.bases_processed(),
        elapsed_secs = started.elapsed().as_secs_f64(),
        "{label} finished"
    );
    Ok(distributor.into_results())
}

/// Progress bar on stderr fed by a thread polling the task counters.
struct ProgressReporter {
    bar: Option<ProgressBar>,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    fn start(enabled: bool, total: u64, handle: ProgressHandle) -> Self {
        if !enabled {
            return Self {
                bar: None,
                stop: None,
                thread: None,
            };
        }

        let bar = ProgressBar::new(total);
        bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(4));
        let style = ProgressStyle::with_template(
            "{spinner:.green} {elapsed_precise} [{bar:40}] {pos}/{len} bases ({per_sec}) {percent}%",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);

        let (stop, stopped) = bounded::<()>(0);
        let polled = bar.clone();
        let thread = thread::spawn(move || loop {
            match stopped.recv_timeout(PROGRESS_POLL_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => polled.set_position(handle.bases_processed()),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    polled.set_position(handle.bases_processed());
                    break;
                }
            }
        });

        Self {
            bar: Some(bar),
            stop: Some(stop),
            thread: Some(thread),
        }
    }

    fn finish(mut self, succeeded: bool) {
        self.stop.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("progress reporter thread panicked");
        }
        if let Some(bar) = self.bar.take() {
            if succeeded {
                bar.finish();
            } else {
                bar.abandon();
            }
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
