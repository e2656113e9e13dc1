//! Synchro command-line client.
//!
//! Parses the command line, sets up logging and runs the selected command.
//! Errors are reported on stderr with a non-zero exit; causes are logged at debug level.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use synchro_cli::cli::{self, Cli};

fn run(cli: Cli) -> Result<()> {
    debug!("Running command: {:?}", cli.command);
    cli::execute(cli)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug,synchro_cli=debug"
    } else {
        "warn,synchro_cli=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            for cause in e.chain().skip(1) {
                debug!("Caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}
