//! linewriter - create or truncate a file and write one string to it.
//!
//! ```text
//! linewriter <FILE> <TEXT>
//! ```
//!
//! Exits with status 1 on bad usage or any I/O failure.

use clap::error::ErrorKind;
use clap::Parser;
use linelogd::system::write_string;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "linewriter", version)]
#[command(about = "Create or truncate a file and write a string to it", long_about = None)]
struct Args {
    /// File to create or truncate
    file: PathBuf,

    /// Text to write
    text: String,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("Usage: linewriter <FILE> <TEXT>");
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match write_string(&args.file, &args.text) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
