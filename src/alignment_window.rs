use crate::alignment::{AlignedRecord, AlignmentSource};
use crate::errors::{AppError, Result};
use crate::read_map::MappedRead;
use std::collections::VecDeque;
use tracing::debug;

/// Forward jumps longer than this reposition the source instead of
/// streaming through every intermediate record.
pub const RESEEK_DISTANCE: u64 = 10_000;

/// The records overlapping the current scan position on one contig.
///
/// Moves forward only; a move backwards or onto another contig discards the
/// queue and refetches from the source.
pub struct AlignmentWindow {
    source: Box<dyn AlignmentSource>,
    records: VecDeque<MappedRead>,
    pending: Option<AlignedRecord>,
    contig: Option<String>,
    contig_length: u64,
    position: u64,
    generation: u64,
}

impl std::fmt::Debug for AlignmentWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignmentWindow")
            .field("contig", &self.contig)
            .field("position", &self.position)
            .field("size", &self.records.len())
            .field("generation", &self.generation)
            .finish()
    }
}

impl AlignmentWindow {
    pub fn new(source: Box<dyn AlignmentSource>) -> Self {
        Self {
            source,
            records: VecDeque::new(),
            pending: None,
            contig: None,
            contig_length: 0,
            position: 0,
            generation: 0,
        }
    }

    pub fn contig(&self) -> Option<&str> {
        self.contig.as_deref()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Records currently held; an upper bound on depth.
    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &MappedRead> {
        self.records.iter()
    }

    /// Bumped on every move so cached per-column views can tell they are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while records overlap the current position or more remain
    /// ahead on the current contig.
    pub fn has_more_records(&self) -> bool {
        !self.records.is_empty() || self.pending.is_some()
    }

    pub fn advance_to(&mut self, contig: &str, position: u64) -> Result<()> {
        let same_contig = self.contig.as_deref() == Some(contig);
        let length = if same_contig {
            self.contig_length
        } else {
            self.source.contig_length(contig)?
        };
        if position == 0 || position > length {
            return Err(AppError::IllegalPosition {
                contig: contig.to_string(),
                position,
                length,
            });
        }

        if !same_contig
            || position < self.position
            || position - self.position > RESEEK_DISTANCE
        {
            debug!(contig, position, "repositioning alignment window");
            self.records.clear();
            self.pending = None;
            self.source.fetch(contig, position)?;
            if !same_contig {
                self.contig = Some(contig.to_string());
                self.contig_length = length;
            }
            self.position = 0;
        }

        self.move_forward(position)
    }

    /// Moves `count` bases forward on the current contig. Returns `false`
    /// without moving when nothing remains to scan.
    pub fn advance_by(&mut self, count: u64) -> Result<bool> {
        if self.contig.is_none() || !self.has_more_records() {
            return Ok(false);
        }
        let target = self.position + count;
        if target > self.contig_length {
            return Ok(false);
        }
        self.move_forward(target)?;
        Ok(true)
    }

    fn move_forward(&mut self, position: u64) -> Result<()> {
        loop {
            if self.pending.is_none() {
                self.pending = self.source.next_record()?;
            }
            let Some(next) = self.pending.as_ref() else {
                break;
            };
            if next.start > position {
                break;
            }
            let Some(record) = self.pending.take() else {
                break;
            };
            if record.mapq == 0 || record.is_unmapped() || record.is_mate_unmapped() {
                continue;
            }
            if record.end() >= position {
                self.records.push_back(MappedRead::new(record));
            }
        }

        self.records.retain(|read| read.end() >= position);
        self.position = position;
        self.generation += 1;
        Ok(())
    }
}
