use crate::errors::{AppError, Result};
use crate::reference_index::ReferenceIndex;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::sync::Arc;

pub const DEFAULT_WINDOW_CAPACITY: usize = 256;

/// Streams the bases of one contig from a FASTA file, hiding line breaks.
#[derive(Debug)]
struct ContigReader {
    reader: BufReader<File>,
    contig: Option<String>,
    length: u64,
    next_position: u64,
}

impl ContigReader {
    fn seek(&mut self, index: &ReferenceIndex, contig: &str, position: u64) -> Result<()> {
        let offset = index.byte_offset_of(contig, position)?;
        self.reader.seek(SeekFrom::Start(offset))?;
        if self.contig.as_deref() != Some(contig) {
            self.contig = Some(contig.to_string());
        }
        self.length = index.contig_length(contig)?;
        self.next_position = position;
        Ok(())
    }

    fn next_base(&mut self) -> Result<u8> {
        if self.next_position > self.length {
            return Err(self.end_of_contig());
        }
        loop {
            let buffer = self.reader.fill_buf()?;
            let Some(&byte) = buffer.first() else {
                return Err(self.end_of_contig());
            };
            self.reader.consume(1);
            match byte {
                b'\n' | b'\r' => continue,
                b'>' => return Err(self.end_of_contig()),
                base => {
                    self.next_position += 1;
                    return Ok(base.to_ascii_uppercase());
                }
            }
        }
    }

    fn end_of_contig(&self) -> AppError {
        AppError::EndOfContig {
            contig: self.contig.clone().unwrap_or_default(),
            position: self.next_position,
        }
    }
}

/// Fixed-capacity circular buffer of reference bases that slides forward
/// along a contig. Each worker owns its own window.
#[derive(Debug)]
pub struct ReferenceWindow {
    index: Arc<ReferenceIndex>,
    reader: ContigReader,
    bases: VecDeque<u8>,
    capacity: usize,
    left_edge: u64,
}

impl ReferenceWindow {
    pub fn open(index: Arc<ReferenceIndex>, capacity: usize) -> Result<Self> {
        let file = File::open(index.fasta_path())?;
        let capacity = capacity.max(1);
        Ok(Self {
            index,
            reader: ContigReader {
                reader: BufReader::new(file),
                contig: None,
                length: 0,
                next_position: 1,
            },
            bases: VecDeque::with_capacity(capacity),
            capacity,
            left_edge: 0,
        })
    }

    pub fn contig(&self) -> Option<&str> {
        self.reader.contig.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// 1-based position of the first buffered base.
    pub fn left_edge(&self) -> u64 {
        self.left_edge
    }

    /// One past the last buffered position.
    pub fn right_edge(&self) -> u64 {
        self.left_edge + self.bases.len() as u64
    }

    /// Places the left edge at `position`. Short forward moves on the same
    /// contig slide the buffer; anything else reseeks and refills.
    pub fn reset_to(&mut self, contig: &str, position: u64) -> Result<()> {
        let length = self.index.contig_length(contig)?;
        if position == 0 || position > length {
            return Err(AppError::IllegalPosition {
                contig: contig.to_string(),
                position,
                length,
            });
        }

        let slide_limit = self.right_edge() + self.capacity as u64;
        if self.contig() == Some(contig)
            && !self.bases.is_empty()
            && position >= self.left_edge
            && position < slide_limit
        {
            let steps = position - self.left_edge;
            for _ in 0..steps {
                if self.bases.is_empty() {
                    self.left_edge = position;
                    break;
                }
                match self.shift() {
                    Ok(()) => {}
                    Err(error) if error.is_boundary() => {}
                    Err(error) => return Err(error),
                }
            }
            return Ok(());
        }

        self.reseek(contig, position)
    }

    fn reseek(&mut self, contig: &str, position: u64) -> Result<()> {
        self.reader.seek(&self.index, contig, position)?;
        self.bases.clear();
        self.left_edge = position;
        while self.bases.len() < self.capacity {
            match self.reader.next_base() {
                Ok(base) => self.bases.push_back(base),
                Err(error) if error.is_boundary() => break,
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    /// Moves the left edge one base to the right and reads one base at the
    /// right edge. At the end of the contig the left edge still advances,
    /// the buffer shrinks and `EndOfContig` is returned.
    pub fn shift(&mut self) -> Result<()> {
        if self.bases.pop_front().is_none() {
            return Err(self.reader.end_of_contig());
        }
        self.left_edge += 1;
        let base = self.reader.next_base()?;
        self.bases.push_back(base);
        Ok(())
    }

    pub fn shift_by(&mut self, count: u64) -> Result<()> {
        for _ in 0..count {
            self.shift()?;
        }
        Ok(())
    }

    /// Base at the 1-based `position`.
    ///
    /// # Panics
    /// When `position` lies outside `[left_edge, right_edge)`.
    pub fn base_at(&self, position: u64) -> u8 {
        assert!(
            position >= self.left_edge && position < self.right_edge(),
            "reference position {position} outside window [{}, {})",
            self.left_edge,
            self.right_edge()
        );
        self.bases[(position - self.left_edge) as usize]
    }

    pub fn get(&self, position: u64) -> Option<u8> {
        position
            .checked_sub(self.left_edge)
            .and_then(|offset| self.bases.get(offset as usize).copied())
    }

    pub fn contains(&self, position: u64) -> bool {
        position >= self.left_edge && position < self.right_edge()
    }

    pub fn to_text(&self) -> String {
        self.bases.iter().map(|&base| char::from(base)).collect()
    }
}
