use std::process::ExitCode;
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> ExitCode {
    snvscan::init_tracing();
    match snvscan::cli::parse_from_env().and_then(snvscan::run_from_args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("snvscan: {error}");
            ExitCode::from(1)
        }
    }
}
