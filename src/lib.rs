pub mod alignment;
pub mod alignment_window;
pub mod classifier;
pub mod cli;
pub mod coverage;
pub mod distributor;
pub mod errors;
pub mod features;
#[cfg(feature = "htslib")]
pub mod htslib_source;
pub mod intervals;
pub mod pileup;
pub mod pipeline;
pub mod read_map;
pub mod reference_index;
pub mod reference_window;
pub mod scan_worker;
pub mod splitter;
pub mod utils;
pub mod variant;
pub mod window_pool;
pub mod writer;

use cli::ScanArgs;
use errors::Result;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}

pub fn run_from_args(args: ScanArgs) -> Result<()> {
    pipeline::run(&args)
}

#[cfg(test)]
mod tests {
    use crate::cli::{Mode, parse_args};

    #[test]
    fn wiring_parses_and_runs_emit() {
        let args = parse_args(["snvscan", "emit", "--exclude-counter", "9"]).expect("expected valid args");
        assert_eq!(args.mode, Mode::Emit);
        assert!(crate::run_from_args(args).is_ok());
    }
}
