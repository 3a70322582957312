use crate::alignment::{AlignedRecord, AlignmentSource, CigarKind, CigarOp};
use crate::errors::{AppError, Result};
use rust_htslib::bam;
use rust_htslib::bam::Read;
use std::path::{Path, PathBuf};

/// `AlignmentSource` over a coordinate-sorted, indexed BAM file.
pub struct HtslibSource {
    path: PathBuf,
    reader: bam::IndexedReader,
    record: bam::Record,
    fetched: bool,
}

impl std::fmt::Debug for HtslibSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtslibSource")
            .field("path", &self.path)
            .field("fetched", &self.fetched)
            .finish()
    }
}

impl HtslibSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = bam::IndexedReader::from_path(&path).map_err(|err| AppError::ParseError {
            message: format!(
                "failed to open BAM index reader for {}: {err}",
                path.display()
            ),
        })?;
        Ok(Self {
            path,
            reader,
            record: bam::Record::new(),
            fetched: false,
        })
    }

    fn tid(&self, contig: &str) -> Result<u32> {
        self.reader
            .header()
            .tid(contig.as_bytes())
            .ok_or_else(|| AppError::UnknownContig {
                contig: contig.to_string(),
            })
    }
}

impl AlignmentSource for HtslibSource {
    fn contig_length(&self, contig: &str) -> Result<u64> {
        let tid = self.tid(contig)?;
        self.reader
            .header()
            .target_len(tid)
            .ok_or_else(|| AppError::ParseError {
                message: format!("missing target length for contig: {contig}"),
            })
    }

    fn fetch(&mut self, contig: &str, start: u64) -> Result<()> {
        let tid = self.tid(contig)?;
        let length = self.contig_length(contig)?;
        let start0 = start.saturating_sub(1);
        self.reader
            .fetch((tid, start0, length))
            .map_err(|err| AppError::ParseError {
                message: format!("failed BAM fetch for {contig}:{start}-{length}: {err}"),
            })?;
        self.fetched = true;
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<AlignedRecord>> {
        if !self.fetched {
            return Ok(None);
        }
        loop {
            match self.reader.read(&mut self.record) {
                None => {
                    self.fetched = false;
                    return Ok(None);
                }
                Some(Err(err)) => {
                    return Err(AppError::ParseError {
                        message: format!("failed BAM read from {}: {err}", self.path.display()),
                    });
                }
                Some(Ok(())) => {
                    if self.record.is_unmapped() || self.record.pos() < 0 {
                        continue;
                    }
                    return Ok(Some(convert_record(&self.record)));
                }
            }
        }
    }
}

fn convert_record(record: &bam::Record) -> AlignedRecord {
    let cigar = record
        .cigar()
        .iter()
        .filter_map(|op| CigarKind::from_code(op.char()).map(|kind| CigarOp::new(kind, op.len())))
        .collect();
    AlignedRecord::new(
        record.pos() as u64 + 1,
        record.mapq(),
        record.flags(),
        cigar,
        record.seq().as_bytes(),
        record.qual().to_vec(),
    )
}
