use crate::distributor::DEFAULT_SPLIT_THRESHOLD;
use crate::errors::{AppError, Result};
use crate::reference_window::DEFAULT_WINDOW_CAPACITY;
use crate::window_pool::{PoolPolicy, MAX_WINDOWS};
use clap::error::ErrorKind;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_MIN_QUALITY: f64 = 1.0;
pub const DEFAULT_COVERAGE_CUTOFFS: [usize; 4] = [0, 10, 20, 50];

#[derive(Debug, Clone, Parser)]
#[command(name = "snvscan", disable_version_flag = true)]
struct CliArgs {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommand {
    /// Call single-nucleotide variants over the requested intervals.
    Call(ScanFlags),
    /// Report mean read depth over the requested intervals.
    Coverage(ScanFlags),
    /// Print the feature columns handed to the classifier.
    Emit(EmitFlags),
}

#[derive(Debug, Clone, Args)]
struct ScanFlags {
    #[arg(short = 'R', long = "reference")]
    reference: Option<String>,
    #[arg(short = 'B', long = "bam")]
    alignments: Option<String>,
    #[arg(short = 'M', long = "model")]
    model: Option<String>,
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: String,
    #[arg(short = 'L', long = "intervals")]
    intervals: Option<String>,
    #[arg(long = "known-sites")]
    known_sites: Option<String>,
    #[arg(short = 't', long = "threads", default_value = "1")]
    threads: String,
    #[arg(short = 'q', long = "min-quality", default_value = "1.0")]
    min_quality: String,
    #[arg(long = "svm-predict", default_value = "svm-predict")]
    classifier: String,
    #[arg(long = "temp-dir")]
    temp_dir: Option<String>,
    #[arg(long = "keep-temp-files", action = ArgAction::SetTrue)]
    keep_temp_files: bool,
    #[arg(long = "window-capacity", default_value = "256")]
    window_capacity: String,
    #[arg(long = "split-threshold", default_value = "1000000")]
    split_threshold: String,
    #[arg(long = "max-windows", default_value = "24")]
    max_windows: String,
    #[arg(long = "pool-policy", default_value = "grow")]
    pool_policy: String,
    #[arg(short = 'X', long = "exclude-counter", value_delimiter = ',')]
    exclude_counter: Vec<String>,
    #[arg(long = "cutoffs", value_delimiter = ',')]
    cutoffs: Vec<String>,
    #[arg(long = "progress", action = ArgAction::SetTrue)]
    progress: bool,
}

#[derive(Debug, Clone, Args)]
struct EmitFlags {
    #[arg(short = 'X', long = "exclude-counter", value_delimiter = ',')]
    exclude_counter: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Call,
    Coverage,
    Emit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanArgs {
    pub mode: Mode,
    pub reference: String,
    pub alignments: String,
    pub model: String,
    pub output: String,
    pub intervals: Option<String>,
    pub known_sites: Option<String>,
    pub threads: usize,
    pub min_quality: f64,
    pub classifier: String,
    pub temp_dir: PathBuf,
    pub keep_temp_files: bool,
    pub window_capacity: usize,
    pub split_threshold: u64,
    pub max_windows: usize,
    pub pool_policy: PoolPolicy,
    pub excluded_counters: Vec<usize>,
    pub coverage_cutoffs: Vec<usize>,
    pub progress: bool,
}

impl Default for ScanArgs {
    fn default() -> Self {
        Self {
            mode: Mode::Call,
            reference: String::new(),
            alignments: String::new(),
            model: String::new(),
            output: "-".to_string(),
            intervals: None,
            known_sites: None,
            threads: 1,
            min_quality: DEFAULT_MIN_QUALITY,
            classifier: "svm-predict".to_string(),
            temp_dir: std::env::temp_dir(),
            keep_temp_files: false,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            max_windows: MAX_WINDOWS,
            pool_policy: PoolPolicy::Grow,
            excluded_counters: Vec::new(),
            coverage_cutoffs: DEFAULT_COVERAGE_CUTOFFS.to_vec(),
            progress: false,
        }
    }
}

impl ScanArgs {
    pub fn validate(&self) -> Result<()> {
        if self.mode == Mode::Emit {
            return Ok(());
        }
        if self.reference.is_empty() {
            return Err(AppError::MissingRequired {
                field: "--reference".to_string(),
            });
        }
        if self.alignments.is_empty() {
            return Err(AppError::MissingRequired {
                field: "--bam".to_string(),
            });
        }
        if self.mode == Mode::Call && self.model.is_empty() {
            return Err(AppError::MissingRequired {
                field: "--model".to_string(),
            });
        }
        if self.intervals.is_some() && self.known_sites.is_some() {
            return Err(AppError::InvalidValue {
                flag: "--known-sites".to_string(),
                value: self.known_sites.clone().unwrap_or_default(),
                reason: "cannot be combined with --intervals".to_string(),
            });
        }
        if self.threads == 0 {
            return Err(AppError::InvalidValue {
                flag: "--threads".to_string(),
                value: "0".to_string(),
                reason: "at least one worker thread is required".to_string(),
            });
        }
        if self.window_capacity < 2 {
            return Err(AppError::InvalidValue {
                flag: "--window-capacity".to_string(),
                value: self.window_capacity.to_string(),
                reason: "must hold at least two bases".to_string(),
            });
        }
        if self.split_threshold == 0 {
            return Err(AppError::InvalidValue {
                flag: "--split-threshold".to_string(),
                value: "0".to_string(),
                reason: "must be a positive number of bases".to_string(),
            });
        }
        if self.max_windows == 0 {
            return Err(AppError::InvalidValue {
                flag: "--max-windows".to_string(),
                value: "0".to_string(),
                reason: "the window pool needs at least one window".to_string(),
            });
        }
        Ok(())
    }

    /// Immutable knobs shared by every worker of one run.
    pub fn calling_options(&self) -> CallingOptions {
        CallingOptions {
            min_quality: self.min_quality,
            temp_dir: self.temp_dir.clone(),
            keep_temp_files: self.keep_temp_files,
            window_capacity: self.window_capacity,
            split_threshold: self.split_threshold,
            initial_windows: self.threads.min(self.max_windows),
            max_windows: self.max_windows,
            pool_policy: self.pool_policy,
            excluded_counters: self.excluded_counters.clone(),
            classifier: self.classifier.clone(),
            model: PathBuf::from(&self.model),
            coverage_cutoffs: self.coverage_cutoffs.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallingOptions {
    pub min_quality: f64,
    pub temp_dir: PathBuf,
    pub keep_temp_files: bool,
    pub window_capacity: usize,
    pub split_threshold: u64,
    pub initial_windows: usize,
    pub max_windows: usize,
    pub pool_policy: PoolPolicy,
    pub excluded_counters: Vec<usize>,
    pub classifier: String,
    pub model: PathBuf,
    pub coverage_cutoffs: Vec<usize>,
}

impl Default for CallingOptions {
    fn default() -> Self {
        ScanArgs::default().calling_options()
    }
}

pub fn parse_from_env() -> Result<ScanArgs> {
    parse_args(std::env::args())
}

pub fn parse_args<I, S>(args: I) -> Result<ScanArgs>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut tokens: Vec<String> = args.into_iter().map(Into::into).collect();
    if tokens.is_empty() {
        tokens.push("snvscan".to_string());
    }

    let cli = CliArgs::try_parse_from(tokens).map_err(map_clap_error)?;
    let parsed = match cli.command {
        CliCommand::Call(flags) => scan_args(Mode::Call, flags)?,
        CliCommand::Coverage(flags) => scan_args(Mode::Coverage, flags)?,
        CliCommand::Emit(flags) => ScanArgs {
            mode: Mode::Emit,
            excluded_counters: parse_list("--exclude-counter", &flags.exclude_counter)?,
            ..ScanArgs::default()
        },
    };

    parsed.validate()?;
    Ok(parsed)
}

fn scan_args(mode: Mode, flags: ScanFlags) -> Result<ScanArgs> {
    let defaults = ScanArgs::default();
    let coverage_cutoffs = if flags.cutoffs.is_empty() {
        defaults.coverage_cutoffs
    } else {
        parse_list("--cutoffs", &flags.cutoffs)?
    };
    Ok(ScanArgs {
        mode,
        reference: flags.reference.unwrap_or_default(),
        alignments: flags.alignments.unwrap_or_default(),
        model: flags.model.unwrap_or_default(),
        output: flags.output,
        intervals: flags.intervals,
        known_sites: flags.known_sites,
        threads: parse_usize("--threads", &flags.threads)?,
        min_quality: parse_f64("--min-quality", &flags.min_quality)?,
        classifier: flags.classifier,
        temp_dir: flags.temp_dir.map_or(defaults.temp_dir, PathBuf::from),
        keep_temp_files: flags.keep_temp_files,
        window_capacity: parse_usize("--window-capacity", &flags.window_capacity)?,
        split_threshold: parse_u64("--split-threshold", &flags.split_threshold)?,
        max_windows: parse_usize("--max-windows", &flags.max_windows)?,
        pool_policy: flags.pool_policy.parse()?,
        excluded_counters: parse_list("--exclude-counter", &flags.exclude_counter)?,
        coverage_cutoffs,
        progress: flags.progress,
    })
}

fn map_clap_error(error: clap::Error) -> AppError {
    let kind = error.kind();
    let rendered = error.to_string();
    match kind {
        ErrorKind::UnknownArgument => AppError::UnsupportedArgument {
            arg: first_quoted_token(&rendered).unwrap_or(rendered),
        },
        ErrorKind::TooFewValues | ErrorKind::WrongNumberOfValues | ErrorKind::InvalidValue => {
            AppError::MissingValue {
                flag: first_quoted_token(&rendered).unwrap_or_else(|| "argument".to_string()),
            }
        }
        ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            AppError::ParseError { message: rendered }
        }
        _ => AppError::ParseError {
            message: clap_error_message(&rendered),
        },
    }
}

fn first_quoted_token(message: &str) -> Option<String> {
    let start = message.find('\'')?;
    let end = message[start + 1..].find('\'')?;
    Some(message[start + 1..start + 1 + end].to_string())
}

fn clap_error_message(message: &str) -> String {
    message
        .lines()
        .find_map(|line| line.strip_prefix("error: "))
        .or_else(|| message.lines().next())
        .unwrap_or("failed to parse arguments")
        .to_string()
}

fn parse_list(flag: &str, values: &[String]) -> Result<Vec<usize>> {
    values
        .iter()
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_usize(flag, value.trim()))
        .collect()
}

fn parse_usize(flag: &str, value: &str) -> Result<usize> {
    value.parse::<usize>().map_err(|_| AppError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason: "must be a non-negative integer".to_string(),
    })
}

fn parse_u64(flag: &str, value: &str) -> Result<u64> {
    value.parse::<u64>().map_err(|_| AppError::InvalidValue {
        flag: flag.to_string(),
        value: value.to_string(),
        reason: "must be a non-negative integer".to_string(),
    })
}

fn parse_f64(flag: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .ok_or_else(|| AppError::InvalidValue {
            flag: flag.to_string(),
            value: value.to_string(),
            reason: "must be a finite floating-point number".to_string(),
        })
}
