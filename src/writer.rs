use std::fs::File;
use std::io::{BufWriter, Write, stdout};

use crate::coverage::IntervalCoverage;
use crate::errors::Result;
use crate::variant::Variant;
use flate2::Compression;
use flate2::write::GzEncoder;

pub fn write_variant_report<W: Write + ?Sized>(writer: &mut W, variants: &[Variant]) -> Result<()> {
    writeln!(writer, "{}", Variant::report_header())?;
    for variant in variants {
        writeln!(writer, "{variant}")?;
    }
    Ok(())
}

pub fn write_coverage_report<W: Write + ?Sized>(
    writer: &mut W,
    cutoffs: &[usize],
    coverage: &[IntervalCoverage],
) -> Result<()> {
    writeln!(writer, "{}", IntervalCoverage::report_header(cutoffs))?;
    for interval in coverage {
        writeln!(writer, "{interval}")?;
    }
    Ok(())
}

/// Runs `write_fn` against stdout for `-`, a gzip stream for `.gz` paths,
/// or a plain buffered file.
pub fn with_text_output_writer<F>(path: &str, write_fn: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    if path == "-" {
        let mut out = stdout().lock();
        write_fn(&mut out)?;
        out.flush()?;
        return Ok(());
    }

    if path.ends_with(".gz") {
        let mut encoder = GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
        write_fn(&mut encoder)?;
        encoder.finish()?.flush()?;
        return Ok(());
    }

    let mut file = BufWriter::new(File::create(path)?);
    write_fn(&mut file)?;
    file.flush()?;
    Ok(())
}
