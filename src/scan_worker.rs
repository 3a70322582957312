use crate::alignment_window::AlignmentWindow;
use crate::classifier::{write_feature_line, Classifier, HandoffFiles};
use crate::cli::CallingOptions;
use crate::distributor::{IntervalTask, TaskProgress};
use crate::errors::{AppError, Result};
use crate::features::FeatureSet;
use crate::intervals::{Interval, IntervalSet};
use crate::pileup::PileupColumn;
use crate::reference_index::ReferenceIndex;
use crate::reference_window::ReferenceWindow;
use crate::variant::{convert_predictions, PositionRecord, Variant};
use crate::window_pool::WindowPool;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a scan task needs besides its intervals, shared by all
/// tasks of one run.
#[derive(Clone)]
pub struct ScanContext {
    pub reference: Arc<ReferenceIndex>,
    pub windows: Arc<WindowPool>,
    pub features: Arc<FeatureSet>,
    pub classifier: Arc<dyn Classifier>,
    pub options: Arc<CallingOptions>,
}

impl std::fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanContext")
            .field("contigs", &self.reference.len())
            .field("windows", &self.windows)
            .field("features", &self.features)
            .field("options", &self.options)
            .finish()
    }
}

/// Candidate-site scan over one interval set, ending in a classifier run.
#[derive(Debug)]
pub struct SnpScanTask {
    set: IntervalSet,
    context: ScanContext,
}

/// Feature and positional rows written for one task.
struct CandidateSink<F, P> {
    features: F,
    positions: P,
    values: Vec<f64>,
    written: usize,
}

impl SnpScanTask {
    pub fn new(set: IntervalSet, context: ScanContext) -> Self {
        Self { set, context }
    }

    pub fn intervals(&self) -> &IntervalSet {
        &self.set
    }

    fn scan<F: Write, P: Write>(
        &self,
        window: &mut AlignmentWindow,
        sink: &mut CandidateSink<F, P>,
        progress: &TaskProgress,
    ) -> Result<()> {
        let mut reference = ReferenceWindow::open(
            Arc::clone(&self.context.reference),
            self.context.options.window_capacity,
        )?;
        let mut column = PileupColumn::new(window);
        for (contig, interval) in self.set.iter() {
            match self.scan_interval(contig, interval, &mut reference, &mut column, sink) {
                Ok(()) => progress.add(interval.size()),
                Err(AppError::UnknownContig { contig }) => {
                    warn!(contig = %contig, "contig absent from alignments, skipping interval");
                }
                Err(error) if error.is_boundary() => {
                    warn!(
                        contig,
                        first = interval.first(),
                        last = interval.last(),
                        error = %error,
                        "interval lies outside the alignment contig, skipping"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn scan_interval<F: Write, P: Write>(
        &self,
        contig: &str,
        interval: Interval,
        reference: &mut ReferenceWindow,
        column: &mut PileupColumn<'_>,
        sink: &mut CandidateSink<F, P>,
    ) -> Result<()> {
        let half = (reference.capacity() / 2) as u64;
        reference.reset_to(contig, interval.first().saturating_sub(half).max(1))?;
        column.advance_to(contig, interval.first())?;

        let mut position = interval.first();
        while position <= interval.last() && column.has_more_records() {
            let Some(reference_base) = reference.get(position) else {
                debug!(contig, position, "reference window exhausted");
                break;
            };
            if is_candidate(reference_base, column) {
                sink.write(
                    &self.context.features,
                    contig,
                    position,
                    reference_base,
                    reference,
                    column,
                )?;
            }

            position += 1;
            if reference.left_edge() + half < position {
                match reference.shift() {
                    Ok(()) => {}
                    Err(error) if error.is_boundary() => {
                        debug!(contig, position, "reference window reached end of contig");
                    }
                    Err(error) => return Err(error),
                }
            }
            if position > interval.last() || !column.advance_by(1)? {
                break;
            }
        }
        Ok(())
    }
}

impl<F: Write, P: Write> CandidateSink<F, P> {
    fn write(
        &mut self,
        features: &FeatureSet,
        contig: &str,
        position: u64,
        reference_base: u8,
        reference: &ReferenceWindow,
        column: &PileupColumn<'_>,
    ) -> Result<()> {
        features.extract(reference_base, reference, column, &mut self.values)?;
        write_feature_line(&mut self.features, &self.values)?;
        PositionRecord {
            contig: contig.to_string(),
            position,
            reference_base,
            counts: column.base_counts(),
        }
        .write_to(&mut self.positions)?;
        self.written += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<usize> {
        self.features.flush()?;
        self.positions.flush()?;
        Ok(self.written)
    }
}

/// Admission filter for candidate sites.
pub fn is_candidate(reference_base: u8, column: &PileupColumn<'_>) -> bool {
    column.approx_depth() > 1
        && reference_base != b'N'
        && column.has_at_least_two_differing_bases(reference_base)
}

impl IntervalTask for SnpScanTask {
    type Item = Variant;

    fn run(self, progress: &TaskProgress) -> Result<Vec<Variant>> {
        let options = &self.context.options;
        let handoff = HandoffFiles::create(&options.temp_dir, options.keep_temp_files)?;

        let candidates = {
            let mut window = self.context.windows.checkout()?;
            let mut sink = CandidateSink {
                features: handoff.feature_writer()?,
                positions: handoff.position_writer()?,
                values: Vec::with_capacity(self.context.features.column_count()),
                written: 0,
            };
            self.scan(&mut window, &mut sink, progress)?;
            sink.finish()?
        };

        if candidates == 0 {
            debug!(intervals = self.set.interval_count(), "no candidate sites in task");
            handoff.finish()?;
            return Ok(Vec::new());
        }

        debug!(candidates, "classifying candidate sites");
        match self
            .context
            .classifier
            .predict(handoff.features_path(), handoff.predictions_path())
        {
            Ok(()) => {}
            Err(error @ AppError::CommandFailed { .. }) => {
                warn!(error = %error, "classifier failed, task yields no variants");
            }
            Err(error) => return Err(error),
        }

        let variants = convert_predictions(
            handoff.predictions_path(),
            handoff.positions_path(),
            options.min_quality,
        )?;
        handoff.finish()?;
        Ok(variants)
    }
}
