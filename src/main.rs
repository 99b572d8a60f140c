//! cvedb - local mirror and query engine for the NVD CVE 1.1 feeds.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod applicability;
mod cli;
mod compiler;
mod config;
mod cpe;
mod cve;
mod database;
mod error;
mod feed;
mod nvd;
mod search;
mod session;
mod sql;

use cli::Commands;

pub use error::{CvedbError, Result as CvedbResult};

/// Local mirror and query engine for the NVD CVE 1.1 feeds
#[derive(Parser)]
#[command(name = "cvedb")]
#[command(version)]
#[command(about = "Local mirror and query engine for the NVD CVE 1.1 feeds", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Resets SIGPIPE to its default disposition. Rust ignores it by default,
/// which turns a closed stdout pipe (`cvedb search ... | head`) into a
/// panic from inside `println!`; restoring the default here lets the
/// process exit on the signal instead.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

#[cfg(not(unix))]
fn reset_sigpipe() {}

fn main() -> Result<()> {
    reset_sigpipe();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_target(false)
        .init();

    let config = config::Config::load(cli.config.as_deref())?;

    cli::execute(cli.command, &config)
}
