//! Command-line interface for cvedb.
//!
//! Thin collaborator over the core session API (per the scope boundary in
//! §1): no query algebra, matching, or persistence logic lives here, only
//! argument parsing, dispatch, and terminal rendering.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::TimeZone;
use clap::Subcommand;
use colored::Colorize;

use crate::config::Config;

mod search;
mod show;
mod update;

#[derive(Subcommand)]
pub enum Commands {
    /// Search the local CVE mirror
    Search {
        /// Search terms (matched against description, CVE id, and references)
        terms: Vec<String>,

        /// Override the configured database path
        #[arg(long)]
        database: Option<PathBuf>,

        /// Sort key(s), in priority order
        #[arg(long = "sort", value_enum)]
        sort: Vec<SortArg>,

        /// Reverse the sort order
        #[arg(long)]
        descending: bool,

        /// Only CVEs published on or after DATE (year or ISO-8601)
        #[arg(long)]
        after: Option<String>,

        /// Only CVEs published on or before DATE (year or ISO-8601)
        #[arg(long)]
        before: Option<String>,

        /// Only CVEs last modified on or after DATE
        #[arg(long = "modified-after")]
        modified_after: Option<String>,

        /// Only CVEs last modified on or before DATE
        #[arg(long = "modified-before")]
        modified_before: Option<String>,

        /// Restrict to a CPE vendor
        #[arg(long)]
        vendor: Option<String>,

        /// Restrict to a CPE software version (the CPE `version` field)
        #[arg(long = "software-version")]
        software_version: Option<String>,

        /// Restrict to a CPE update string (the CPE `update` field)
        #[arg(long)]
        update: Option<String>,
    },

    /// Refresh the local CVE mirror from the NVD feeds
    Update {
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Show the full record for one CVE id
    Show {
        /// CVE identifier, e.g. CVE-2021-12345
        cve_id: String,

        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Print the schema version of the configured database and exit
    #[command(name = "data-version")]
    DataVersion {
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SortArg {
    Cve,
    Description,
    Published,
    Modified,
    Impact,
    Severity,
}

impl From<SortArg> for crate::search::Sort {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Cve => crate::search::Sort::CveId,
            SortArg::Description => crate::search::Sort::Description,
            SortArg::Published => crate::search::Sort::PublishedDate,
            SortArg::Modified => crate::search::Sort::LastModifiedDate,
            SortArg::Impact => crate::search::Sort::Impact,
            SortArg::Severity => crate::search::Sort::Severity,
        }
    }
}

/// Executes a CLI command.
pub fn execute(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Search {
            terms,
            database,
            sort,
            descending,
            after,
            before,
            modified_after,
            modified_before,
            vendor,
            software_version,
            update,
        } => search::run(search::SearchArgs {
            terms,
            database,
            sort,
            descending,
            after,
            before,
            modified_after,
            modified_before,
            vendor,
            software_version,
            update,
        }, config),
        Commands::Update { database } => update::run(database.as_deref(), config),
        Commands::Show { cve_id, database } => show::run(&cve_id, database.as_deref(), config),
        Commands::DataVersion { database } => {
            let path = database.as_deref().unwrap_or(&config.database.path);
            let db = crate::database::Database::open(path, false)?;
            println!("{}", db.schema_version().to_string().bold());
            Ok(())
        }
    }
}

/// Resolves `--database` against the configured default.
pub(crate) fn db_path<'a>(database: Option<&'a Path>, config: &'a Config) -> &'a Path {
    database.unwrap_or(&config.database.path)
}

/// Parses a date flag that accepts either a bare year (`2024`) or a full
/// ISO-8601 timestamp, per §6's "dates accept a year or ISO-8601".
pub(crate) fn parse_datetime_flag(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    if let Ok(year) = s.parse::<i32>() {
        return chrono::Utc
            .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid year {year}"));
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| anyhow::anyhow!("invalid date {s:?}: {e}"))
}

pub(crate) fn parse_date_flag(s: &str) -> Result<chrono::NaiveDate> {
    if let Ok(year) = s.parse::<i32>() {
        return chrono::NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(|| anyhow::anyhow!("invalid year {year}"));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date);
    }
    parse_datetime_flag(s).map(|dt| dt.date_naive())
}
