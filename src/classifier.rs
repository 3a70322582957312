use crate::errors::{AppError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::{Builder, NamedTempFile};
use tracing::info;

/// Label written in front of every feature row handed to the classifier;
/// prediction does not use it.
const UNKNOWN_LABEL: &str = "-1";

/// Scores a feature file out of process, writing one prediction row per
/// feature row to `predictions`.
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &Path, predictions: &Path) -> Result<()>;
}

/// libsvm's `svm-predict` run with probability estimates enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvmPredictor {
    executable: String,
    model: PathBuf,
}

impl SvmPredictor {
    pub fn new(executable: impl Into<String>, model: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            model: model.into(),
        }
    }

    pub fn command_line(&self, features: &Path, predictions: &Path) -> Vec<String> {
        vec![
            self.executable.clone(),
            "-b".to_string(),
            "1".to_string(),
            features.to_string_lossy().into_owned(),
            self.model.to_string_lossy().into_owned(),
            predictions.to_string_lossy().into_owned(),
        ]
    }

    pub fn is_available(&self) -> bool {
        exists_command(&self.executable)
    }
}

impl Classifier for SvmPredictor {
    fn predict(&self, features: &Path, predictions: &Path) -> Result<()> {
        let command_label = self.command_line(features, predictions).join(" ");
        info!(command = %command_label, "running classifier");
        let output = Command::new(&self.executable)
            .arg("-b")
            .arg("1")
            .arg(features)
            .arg(&self.model)
            .arg(predictions)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    AppError::CommandNotFound {
                        command: self.executable.clone(),
                    }
                } else {
                    AppError::Io(err)
                }
            })?;

        if !output.status.success() {
            return Err(AppError::CommandFailed {
                command: command_label,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}

/// The three files exchanged with the classifier for one task. Deleted on
/// drop unless `keep` was requested.
#[derive(Debug)]
pub struct HandoffFiles {
    features: NamedTempFile,
    positions: NamedTempFile,
    predictions: NamedTempFile,
    keep: bool,
}

impl HandoffFiles {
    pub fn create(temp_dir: &Path, keep: bool) -> Result<Self> {
        std::fs::create_dir_all(temp_dir)?;
        let make = |suffix: &str| {
            Builder::new()
                .prefix("snvscan_")
                .suffix(suffix)
                .tempfile_in(temp_dir)
        };
        Ok(Self {
            features: make(".data")?,
            positions: make(".pos")?,
            predictions: make(".predictions")?,
            keep,
        })
    }

    pub fn features_path(&self) -> &Path {
        self.features.path()
    }

    pub fn positions_path(&self) -> &Path {
        self.positions.path()
    }

    pub fn predictions_path(&self) -> &Path {
        self.predictions.path()
    }

    pub fn feature_writer(&self) -> Result<BufWriter<File>> {
        Ok(BufWriter::new(self.features.reopen()?))
    }

    pub fn position_writer(&self) -> Result<BufWriter<File>> {
        Ok(BufWriter::new(self.positions.reopen()?))
    }

    /// Removes the files, or leaves them on disk when `keep` is set.
    pub fn finish(self) -> Result<()> {
        if !self.keep {
            return Ok(());
        }
        for file in [self.features, self.positions, self.predictions] {
            let (_, path) = file.keep().map_err(|err| AppError::Io(err.error))?;
            info!(path = %path.display(), "kept classifier handoff file");
        }
        Ok(())
    }
}

/// One classifier input row: unknown label, then `index:value` pairs for the
/// non-zero features, 1-based, four decimals.
pub fn write_feature_line<W: Write + ?Sized>(out: &mut W, values: &[f64]) -> Result<()> {
    out.write_all(UNKNOWN_LABEL.as_bytes())?;
    for (index, value) in values.iter().enumerate() {
        if *value != 0.0 {
            write!(out, "\t{}:{value:.4}", index + 1)?;
        }
    }
    out.write_all(b"\n")?;
    Ok(())
}

pub fn exists_command(cmd: &str) -> bool {
    if Path::new(cmd).exists() {
        return true;
    }
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(cmd))
            .any(|full| full.exists())
    })
}

#[cfg(test)]
mod tests {
    use super::{write_feature_line, Classifier, HandoffFiles, SvmPredictor};
    use crate::errors::AppError;
    use std::io::Write;
    use std::path::Path;

    #[test]
    fn formats_sparse_feature_rows() {
        let mut out = Vec::new();
        write_feature_line(&mut out, &[4.0, 0.0, -0.25, 1.0 / 3.0]).expect("expected write");
        assert_eq!(
            String::from_utf8(out).expect("expected utf8"),
            "-1\t1:4.0000\t3:-0.2500\t4:0.3333\n"
        );
    }

    #[test]
    fn builds_probability_command() {
        let predictor = SvmPredictor::new("svm-predict", "model.svm");
        assert_eq!(
            predictor.command_line(Path::new("in.data"), Path::new("out.txt")),
            vec!["svm-predict", "-b", "1", "in.data", "model.svm", "out.txt"]
        );
    }

    #[test]
    fn missing_executable_is_reported() {
        let predictor = SvmPredictor::new("snvscan-no-such-classifier", "model.svm");
        assert!(!predictor.is_available());
        let result = predictor.predict(Path::new("in.data"), Path::new("out.txt"));
        assert!(matches!(result, Err(AppError::CommandNotFound { .. })));
    }

    #[test]
    fn handoff_files_are_removed_unless_kept() {
        let dir = tempfile::tempdir().expect("expected tempdir");
        let files = HandoffFiles::create(dir.path(), false).expect("expected handoff files");
        let features = files.features_path().to_path_buf();
        files
            .feature_writer()
            .expect("expected writer")
            .write_all(b"-1\n")
            .expect("expected write");
        assert!(features.exists());
        files.finish().expect("expected finish");
        assert!(!features.exists());

        let kept = HandoffFiles::create(dir.path(), true).expect("expected handoff files");
        let positions = kept.positions_path().to_path_buf();
        kept.finish().expect("expected finish");
        assert!(positions.exists());
    }
}
