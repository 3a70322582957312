use crate::alignment_window::AlignmentWindow;
use crate::errors::Result;
use crate::read_map::MappedRead;
use std::cell::OnceCell;

/// Reads past this many are ignored when building a column.
pub const MAX_PILE: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseCounts {
    pub a: usize,
    pub c: usize,
    pub g: usize,
    pub t: usize,
}

impl BaseCounts {
    pub fn get(&self, base: u8) -> usize {
        match base {
            b'A' => self.a,
            b'C' => self.c,
            b'G' => self.g,
            b'T' => self.t,
            _ => 0,
        }
    }

    pub fn total(&self) -> usize {
        self.a + self.c + self.g + self.t
    }

    /// Most frequent base other than `reference`, ties broken in ACGT order.
    pub fn top_alternate(&self, reference: u8) -> Option<u8> {
        [b'A', b'C', b'G', b'T']
            .into_iter()
            .filter(|&base| base != reference && self.get(base) > 0)
            .fold(None, |best: Option<u8>, base| match best {
                Some(current) if self.get(current) >= self.get(base) => Some(current),
                _ => Some(base),
            })
    }

    fn add(&mut self, base: u8) {
        match base {
            b'A' => self.a += 1,
            b'C' => self.c += 1,
            b'G' => self.g += 1,
            b'T' => self.t += 1,
            _ => {}
        }
    }
}

/// One read's contribution to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PileEntry {
    pub base: u8,
    pub quality: u8,
    pub mapq: u8,
    pub reverse: bool,
    pub read_offset: usize,
    pub read_length: usize,
}

#[derive(Debug)]
struct Column {
    generation: u64,
    entries: Vec<PileEntry>,
    bases: Vec<u8>,
    counts: BaseCounts,
}

impl Column {
    fn build(window: &AlignmentWindow) -> Self {
        let position = window.position();
        let mut entries = Vec::with_capacity(window.size().min(MAX_PILE));
        for read in window.records() {
            if entries.len() == MAX_PILE {
                break;
            }
            let Some(read_offset) = read.ref_to_read_pos(position) else {
                continue;
            };
            let record = read.record();
            entries.push(PileEntry {
                base: record.bases[read_offset],
                quality: record.qualities.get(read_offset).copied().unwrap_or(0),
                mapq: record.mapq,
                reverse: record.is_reverse(),
                read_offset,
                read_length: record.read_length(),
            });
        }
        let bases = entries.iter().map(|entry| entry.base).collect::<Vec<_>>();
        let mut counts = BaseCounts::default();
        for &base in &bases {
            counts.add(base);
        }
        Self {
            generation: window.generation(),
            entries,
            bases,
            counts,
        }
    }
}

/// Column view over a borrowed `AlignmentWindow`. The column is computed on
/// first use and dropped whenever the window moves.
#[derive(Debug)]
pub struct PileupColumn<'w> {
    window: &'w mut AlignmentWindow,
    column: OnceCell<Column>,
}

impl<'w> PileupColumn<'w> {
    pub fn new(window: &'w mut AlignmentWindow) -> Self {
        Self {
            window,
            column: OnceCell::new(),
        }
    }

    fn column(&self) -> &Column {
        let column = self.column.get_or_init(|| Column::build(&*self.window));
        debug_assert_eq!(column.generation, self.window.generation());
        column
    }

    pub fn window(&self) -> &AlignmentWindow {
        &*self.window
    }

    pub fn contig(&self) -> Option<&str> {
        self.window.contig()
    }

    pub fn position(&self) -> u64 {
        self.window.position()
    }

    pub fn advance_to(&mut self, contig: &str, position: u64) -> Result<()> {
        self.column.take();
        self.window.advance_to(contig, position)
    }

    pub fn advance_by(&mut self, count: u64) -> Result<bool> {
        self.column.take();
        self.window.advance_by(count)
    }

    pub fn has_more_records(&self) -> bool {
        self.window.has_more_records()
    }

    /// Reads with a base aligned at this position, capped at `MAX_PILE`.
    pub fn depth(&self) -> usize {
        self.column().entries.len()
    }

    /// Reads overlapping the position, including those deleted here.
    pub fn approx_depth(&self) -> usize {
        self.window.size()
    }

    pub fn entries(&self) -> &[PileEntry] {
        &self.column().entries
    }

    pub fn bases(&self) -> &[u8] {
        &self.column().bases
    }

    pub fn bases_string(&self) -> String {
        String::from_utf8_lossy(self.bases()).into_owned()
    }

    pub fn base_counts(&self) -> BaseCounts {
        self.column().counts
    }

    pub fn records(&self) -> impl Iterator<Item = &MappedRead> {
        self.window.records()
    }

    pub fn count_differing_bases(&self, reference: u8) -> usize {
        self.bases()
            .iter()
            .filter(|&&base| base != b'N' && base != reference)
            .count()
    }

    /// Cheap candidate filter: at least two non-`N` piled bases differ from
    /// `reference`.
    pub fn has_at_least_two_differing_bases(&self, reference: u8) -> bool {
        let mut differing = 0;
        for &base in self.bases() {
            if base != b'N' && base != reference {
                differing += 1;
                if differing >= 2 {
                    return true;
                }
            }
        }
        false
    }
}
