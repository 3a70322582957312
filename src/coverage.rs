use crate::alignment_window::AlignmentWindow;
use crate::distributor::{IntervalTask, TaskProgress};
use crate::errors::{AppError, Result};
use crate::intervals::{Interval, IntervalSet};
use crate::window_pool::WindowPool;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Only every `STEP_SIZE`-th position of an interval is examined.
pub const STEP_SIZE: u64 = 2;

/// Depth summary of one interval.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalCoverage {
    pub contig: String,
    pub interval: Interval,
    pub positions_examined: u64,
    pub coverage_sum: u64,
    pub cutoffs: Arc<[usize]>,
    /// Examined positions covered by more than `cutoffs[i]` reads.
    pub above_cutoff: Vec<u64>,
}

impl IntervalCoverage {
    fn empty(contig: &str, interval: Interval, cutoffs: Arc<[usize]>) -> Self {
        let above_cutoff = vec![0; cutoffs.len()];
        Self {
            contig: contig.to_string(),
            interval,
            positions_examined: 0,
            coverage_sum: 0,
            cutoffs,
            above_cutoff,
        }
    }

    fn record(&mut self, depth: usize, positions: u64) {
        self.positions_examined += positions;
        self.coverage_sum += depth as u64 * positions;
        for (cutoff, above) in self.cutoffs.iter().zip(self.above_cutoff.iter_mut()) {
            if depth > *cutoff {
                *above += positions;
            }
        }
    }

    pub fn mean(&self) -> f64 {
        if self.positions_examined == 0 {
            return 0.0;
        }
        self.coverage_sum as f64 / self.positions_examined as f64
    }

    pub fn fraction_above(&self, cutoff_index: usize) -> f64 {
        match self.above_cutoff.get(cutoff_index) {
            Some(&above) if self.positions_examined > 0 => above as f64 / self.positions_examined as f64,
            _ => 0.0,
        }
    }

    pub fn report_header(cutoffs: &[usize]) -> String {
        let mut header = "contig\tfirst\tlast\texamined\tmean".to_string();
        for cutoff in cutoffs {
            header.push_str(&format!("\tfrac.above.{cutoff}"));
        }
        header
    }
}

impl fmt::Display for IntervalCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{:.2}",
            self.contig,
            self.interval.first(),
            self.interval.last(),
            self.positions_examined,
            self.mean()
        )?;
        for index in 0..self.above_cutoff.len() {
            write!(f, "\t{:.4}", self.fraction_above(index))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct CoverageTask {
    set: IntervalSet,
    windows: Arc<WindowPool>,
    cutoffs: Arc<[usize]>,
}

impl CoverageTask {
    pub fn new(set: IntervalSet, windows: Arc<WindowPool>, cutoffs: Arc<[usize]>) -> Self {
        Self { set, windows, cutoffs }
    }

    fn measure(&self, window: &mut AlignmentWindow, contig: &str, interval: Interval) -> Result<IntervalCoverage> {
        let mut coverage = IntervalCoverage::empty(contig, interval, Arc::clone(&self.cutoffs));
        window.advance_to(contig, interval.first())?;
        loop {
            coverage.record(window.size(), 1);
            let next = window.position() + STEP_SIZE;
            if next > interval.last() {
                break;
            }
            if !window.advance_by(STEP_SIZE)? {
                // Nothing left on the contig: the remaining steps have no reads.
                coverage.record(0, (interval.last() - next) / STEP_SIZE + 1);
                break;
            }
        }
        Ok(coverage)
    }
}

impl IntervalTask for CoverageTask {
    type Item = IntervalCoverage;

    fn run(self, progress: &TaskProgress) -> Result<Vec<IntervalCoverage>> {
        let mut window = self.windows.checkout()?;
        let mut results = Vec::with_capacity(self.set.interval_count());
        for (contig, interval) in self.set.iter() {
            let coverage = match self.measure(&mut window, contig, interval) {
                Ok(coverage) => {
                    progress.add(interval.size());
                    coverage
                }
                Err(AppError::UnknownContig { .. }) => {
                    warn!(contig, "contig absent from alignments, reporting zero coverage");
                    IntervalCoverage::empty(contig, interval, Arc::clone(&self.cutoffs))
                }
                Err(error) if error.is_boundary() => {
                    warn!(
                        contig,
                        first = interval.first(),
                        error = %error,
                        "interval lies outside the alignment contig, reporting zero coverage"
                    );
                    IntervalCoverage::empty(contig, interval, Arc::clone(&self.cutoffs))
                }
                Err(error) => return Err(error),
            };
            results.push(coverage);
        }
        Ok(results)
    }
}
