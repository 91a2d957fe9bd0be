//! censorprobe CLI entry point (spec.md §6: "a single entry point, no
//! flags" plus the config path / verbosity the teacher's own CLI exposes
//! as flags). Exit code is always 0 once the scheduler runs, per spec —
//! this is a diagnostic tool, not a pass/fail gate. A fatal configuration
//! error (missing file, malformed JSON, prerequisite cycle) is the one
//! case that exits nonzero, since no test results could even be produced.

use clap::Parser;
use censorprobe::{scheduler, AppSettings, GlobalConfig};
use std::process;
use tracing::error;

#[derive(Parser)]
#[command(name = "censorprobe")]
#[command(version = censorprobe::VERSION)]
#[command(about = "Client-side censorship assessment and circumvention probe", long_about = None)]
struct Cli {
    /// Path to the test config file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let settings = AppSettings { config_path: cli.config, verbose: cli.verbose, ..AppSettings::default() };

    censorprobe::logging::init_logging(&settings.log_level, settings.verbose);

    let config = match GlobalConfig::from_file(&settings.config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            process::exit(1);
        }
    };

    // A malformed-but-enabled section is fatal (spec.md §7): abort before
    // any group runs rather than letting that group silently spawn zero
    // probes and report its all-failed defaults as a normal result.
    if let Err(e) = config.validate() {
        error!("invalid config: {e}");
        process::exit(1);
    }

    if let Err(e) = scheduler::run(&config).await {
        error!("scheduler error: {e}");
        process::exit(1);
    }

    // spec.md §6: "Exit code 0 always (diagnostic tool)" once the
    // scheduler itself has produced results.
    process::exit(0);
}
