use crate::alignment::AlignedRecord;
use crate::reference_window::ReferenceWindow;
use std::cell::OnceCell;

/// Reference offset to read offset translation for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPositionMap {
    /// The read aligns base-for-base from its first reference position.
    Identity,
    /// One entry per reference offset; `-1` where no read base is aligned.
    Mapped(Box<[i32]>),
}

impl ReadPositionMap {
    pub fn build(record: &AlignedRecord) -> Self {
        let reference_length = record.reference_length();
        if let Some(first) = record.cigar.first()
            && first.kind.consumes_read()
            && first.kind.consumes_reference()
            && u64::from(first.len) == reference_length
        {
            return Self::Identity;
        }

        let mut map = vec![-1_i32; reference_length as usize];
        let mut reference_offset = 0_usize;
        let mut read_offset = 0_i32;
        for op in &record.cigar {
            let len = op.len as usize;
            match (op.kind.consumes_read(), op.kind.consumes_reference()) {
                (true, true) => {
                    for (step, slot) in map[reference_offset..reference_offset + len]
                        .iter_mut()
                        .enumerate()
                    {
                        *slot = read_offset + step as i32;
                    }
                    reference_offset += len;
                    read_offset += op.len as i32;
                }
                (false, true) => reference_offset += len,
                (true, false) => read_offset += op.len as i32,
                (false, false) => {}
            }
        }
        Self::Mapped(map.into_boxed_slice())
    }

    pub fn read_offset(&self, reference_offset: usize) -> Option<usize> {
        match self {
            Self::Identity => Some(reference_offset),
            Self::Mapped(map) => map
                .get(reference_offset)
                .and_then(|&offset| usize::try_from(offset).ok()),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }
}

/// An `AlignedRecord` plus its lazily built position map and cached
/// mismatch count. Immutable once admitted to a window.
#[derive(Debug)]
pub struct MappedRead {
    record: AlignedRecord,
    end: u64,
    map: OnceCell<ReadPositionMap>,
    mismatches: OnceCell<u32>,
}

impl MappedRead {
    pub fn new(record: AlignedRecord) -> Self {
        let end = record.end();
        Self {
            record,
            end,
            map: OnceCell::new(),
            mismatches: OnceCell::new(),
        }
    }

    pub fn record(&self) -> &AlignedRecord {
        &self.record
    }

    pub fn start(&self) -> u64 {
        self.record.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn position_map(&self) -> &ReadPositionMap {
        self.map.get_or_init(|| ReadPositionMap::build(&self.record))
    }

    pub fn ref_to_read_pos(&self, reference_position: u64) -> Option<usize> {
        if reference_position < self.record.start || reference_position > self.end {
            return None;
        }
        let offset = (reference_position - self.record.start) as usize;
        self.position_map()
            .read_offset(offset)
            .filter(|&read_position| read_position < self.record.bases.len())
    }

    pub fn has_base_at(&self, reference_position: u64) -> bool {
        self.ref_to_read_pos(reference_position).is_some()
    }

    pub fn base_at(&self, reference_position: u64) -> Option<u8> {
        self.ref_to_read_pos(reference_position)
            .map(|read_position| self.record.bases[read_position])
    }

    pub fn quality_at(&self, reference_position: u64) -> Option<u8> {
        self.ref_to_read_pos(reference_position)
            .and_then(|read_position| self.record.qualities.get(read_position).copied())
    }

    /// Mismatches against the reference over the part of the alignment that
    /// the window currently buffers. Computed once per record.
    pub fn mismatch_count(&self, reference: &ReferenceWindow) -> u32 {
        *self.mismatches.get_or_init(|| {
            if reference.is_empty() {
                return 0;
            }
            let first = self.record.start.max(reference.left_edge());
            let last = self.end.min(reference.right_edge() - 1);
            (first..=last)
                .filter(|&position| {
                    match (self.base_at(position), reference.get(position)) {
                        (Some(read_base), Some(reference_base)) => read_base != reference_base,
                        _ => false,
                    }
                })
                .count() as u32
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{MappedRead, ReadPositionMap};
    use crate::alignment::AlignedRecord;

    fn read(start: u64, cigar: &str, bases: &str) -> MappedRead {
        MappedRead::new(AlignedRecord::simple(start, 60, cigar, bases, 30).expect("expected record"))
    }

    #[test]
    fn plain_match_uses_identity_map() {
        let mapped = read(100, "10M", "ACGTACGTAC");
        assert!(mapped.position_map().is_identity());
        assert_eq!(mapped.ref_to_read_pos(100), Some(0));
        assert_eq!(mapped.ref_to_read_pos(109), Some(9));
        assert_eq!(mapped.ref_to_read_pos(110), None);
        assert_eq!(mapped.ref_to_read_pos(99), None);
        assert_eq!(mapped.base_at(103), Some(b'T'));
    }

    #[test]
    fn deletion_leaves_gap_in_map() {
        let mapped = read(10, "3M2D3M", "AAACCC");
        assert_eq!(mapped.end(), 17);
        assert_eq!(mapped.ref_to_read_pos(12), Some(2));
        assert!(!mapped.has_base_at(13));
        assert!(!mapped.has_base_at(14));
        assert_eq!(mapped.ref_to_read_pos(15), Some(3));
        assert_eq!(mapped.base_at(17), Some(b'C'));
    }

    #[test]
    fn insertion_and_soft_clip_shift_read_offsets() {
        let mapped = read(10, "2S3M2I3M", "NNAAAGGTTT");
        assert!(!mapped.position_map().is_identity());
        assert_eq!(mapped.ref_to_read_pos(10), Some(2));
        assert_eq!(mapped.ref_to_read_pos(12), Some(4));
        assert_eq!(mapped.ref_to_read_pos(13), Some(7));
        assert_eq!(mapped.base_at(15), Some(b'T'));
        assert_eq!(mapped.quality_at(15), Some(30));
    }

    #[test]
    fn mapped_map_matches_expected_table() {
        let record = AlignedRecord::simple(1, 60, "2M1D1I2M", "ACGTA", 30).expect("expected record");
        assert_eq!(
            ReadPositionMap::build(&record),
            ReadPositionMap::Mapped(vec![0, 1, -1, 3, 4].into_boxed_slice())
        );
    }
}
