use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing value for argument: {flag}")]
    MissingValue { flag: String },
    #[error("missing required argument: {field}")]
    MissingRequired { field: String },
    #[error("invalid value for {flag}={value}: {reason}")]
    InvalidValue {
        flag: String,
        value: String,
        reason: String,
    },
    #[error("unsupported argument: {arg}")]
    UnsupportedArgument { arg: String },
    #[error("reference index not found or unreadable: {path}")]
    IndexNotFound { path: String },
    #[error("unknown contig: {contig}")]
    UnknownContig { contig: String },
    #[error("end of contig {contig} reached at position {position}")]
    EndOfContig { contig: String, position: u64 },
    #[error("illegal position {contig}:{position} (contig length {length})")]
    IllegalPosition {
        contig: String,
        position: u64,
        length: u64,
    },
    #[error("cannot split interval set ({intervals} intervals, extent {extent}); lower the split threshold")]
    ImpossibleSplit { intervals: usize, extent: u64 },
    #[error("feature {name} produced invalid value {value} (allowed range {min}..={max})")]
    InvalidFeature {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("alignment window pool exhausted ({max} windows in use)")]
    PoolExhausted { max: usize },
    #[error("worker task panicked: {message}")]
    WorkerPanicked { message: String },
    #[error("required command not found in PATH: {command}")]
    CommandNotFound { command: String },
    #[error("command failed: {command} (exit: {code:?}) stderr: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("parse error: {message}")]
    ParseError { message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Boundary conditions are expected during forward iteration and are
    /// handled by callers rather than reported.
    pub fn is_boundary(&self) -> bool {
        matches!(self, Self::EndOfContig { .. } | Self::IllegalPosition { .. })
    }
}
