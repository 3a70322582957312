use crate::errors::{AppError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One line of a samtools-style `.fai` index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContigInfo {
    pub name: String,
    pub length: u64,
    pub byte_offset: u64,
    pub line_bases: u64,
    pub line_bytes: u64,
}

/// Contig table parsed from the `.fai` companion of a FASTA file.
#[derive(Debug, Clone)]
pub struct ReferenceIndex {
    fasta_path: PathBuf,
    contigs: Vec<ContigInfo>,
    by_name: HashMap<String, usize>,
}

impl ReferenceIndex {
    pub fn from_fasta(fasta: impl AsRef<Path>) -> Result<Self> {
        let fasta_path = fasta.as_ref().to_path_buf();
        let index_path = index_path_for(&fasta_path);
        let file = File::open(&index_path).map_err(|_| AppError::IndexNotFound {
            path: index_path.to_string_lossy().into_owned(),
        })?;
        let mut index = Self::from_reader(BufReader::new(file))?;
        index.fasta_path = fasta_path;
        Ok(index)
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut contigs = Vec::new();
        let mut by_name = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            let Some(info) = parse_index_line(&line) else {
                if !line.trim().is_empty() {
                    debug!(line = %line, "skipping malformed reference index line");
                }
                continue;
            };
            by_name.insert(info.name.clone(), contigs.len());
            contigs.push(info);
        }
        Ok(Self {
            fasta_path: PathBuf::new(),
            contigs,
            by_name,
        })
    }

    pub fn fasta_path(&self) -> &Path {
        &self.fasta_path
    }

    pub fn contains(&self, contig: &str) -> bool {
        self.by_name.contains_key(contig)
    }

    pub fn info(&self, contig: &str) -> Result<&ContigInfo> {
        self.by_name
            .get(contig)
            .map(|&index| &self.contigs[index])
            .ok_or_else(|| AppError::UnknownContig {
                contig: contig.to_string(),
            })
    }

    pub fn contig_length(&self, contig: &str) -> Result<u64> {
        Ok(self.info(contig)?.length)
    }

    pub fn byte_offset(&self, contig: &str) -> Result<u64> {
        Ok(self.info(contig)?.byte_offset)
    }

    pub fn line_base_count(&self, contig: &str) -> Result<u64> {
        Ok(self.info(contig)?.line_bases)
    }

    pub fn line_byte_width(&self, contig: &str) -> Result<u64> {
        Ok(self.info(contig)?.line_bytes)
    }

    /// File offset of the 1-based `position` on `contig`, skipping the
    /// newline bytes at the end of every full sequence line.
    pub fn byte_offset_of(&self, contig: &str, position: u64) -> Result<u64> {
        let info = self.info(contig)?;
        if position == 0 || position > info.length {
            return Err(AppError::IllegalPosition {
                contig: contig.to_string(),
                position,
                length: info.length,
            });
        }
        let zero_based = position - 1;
        let line_bases = info.line_bases.max(1);
        Ok(info.byte_offset + (zero_based / line_bases) * info.line_bytes + zero_based % line_bases)
    }

    pub fn contigs(&self) -> impl Iterator<Item = &str> {
        self.contigs.iter().map(|info| info.name.as_str())
    }

    /// Position of `contig` in index order, used to sort results.
    pub fn contig_rank(&self, contig: &str) -> usize {
        self.by_name.get(contig).copied().unwrap_or(usize::MAX)
    }

    pub fn total_extent(&self) -> u64 {
        self.contigs.iter().map(|info| info.length).sum()
    }

    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }
}

pub fn index_path_for(fasta: &Path) -> PathBuf {
    let mut path = fasta.as_os_str().to_os_string();
    path.push(".fai");
    PathBuf::from(path)
}

fn parse_index_line(line: &str) -> Option<ContigInfo> {
    let fields = line.trim_end_matches(['\n', '\r']).split('\t').collect::<Vec<_>>();
    if fields.len() != 5 {
        return None;
    }
    let name = fields[0].split(' ').next()?.to_string();
    if name.is_empty() {
        return None;
    }
    Some(ContigInfo {
        name,
        length: fields[1].trim().parse().ok()?,
        byte_offset: fields[2].trim().parse().ok()?,
        line_bases: fields[3].trim().parse().ok()?,
        line_bytes: fields[4].trim().parse().ok()?,
    })
}
