//! `cvedb search` — filter, sort, and print the local CVE mirror.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::cpe::{AvString, Cpe};
use crate::cve::Cve;
use crate::search::{make_query, Sort, SearchQuery};
use crate::session::Session;

use super::SortArg;

pub struct SearchArgs {
    pub terms: Vec<String>,
    pub database: Option<PathBuf>,
    pub sort: Vec<SortArg>,
    pub descending: bool,
    pub after: Option<String>,
    pub before: Option<String>,
    pub modified_after: Option<String>,
    pub modified_before: Option<String>,
    pub vendor: Option<String>,
    pub software_version: Option<String>,
    pub update: Option<String>,
}

pub fn run(args: SearchArgs, config: &Config) -> Result<()> {
    let database = super::db_path(args.database.as_deref(), config).to_path_buf();
    let session = Session::open_at(&database, config, false)?;

    let mut extra = Vec::new();
    if let Some(after) = &args.after {
        extra.push(SearchQuery::AfterPublished(super::parse_datetime_flag(after)?));
    }
    if let Some(before) = &args.before {
        extra.push(SearchQuery::BeforePublished(super::parse_date_flag(before)?));
    }
    if let Some(after) = &args.modified_after {
        extra.push(SearchQuery::AfterModified(super::parse_datetime_flag(after)?));
    }
    if let Some(before) = &args.modified_before {
        extra.push(SearchQuery::BeforeModified(super::parse_date_flag(before)?));
    }
    if let Some(cpe) = cpe_filter(&args) {
        extra.push(SearchQuery::Cpe(cpe));
    }

    let query = make_query(&args.terms, extra);
    let sort: Vec<Sort> = args.sort.iter().copied().map(Sort::from).collect();
    let cves = session.search(&query, &sort, !args.descending)?;

    print_results(&cves, config);
    Ok(())
}

/// Folds `--vendor`/`--software-version`/`--update` into a single CPE
/// pattern, `ANY` in every field the caller didn't constrain.
fn cpe_filter(args: &SearchArgs) -> Option<Cpe> {
    if args.vendor.is_none() && args.software_version.is_none() && args.update.is_none() {
        return None;
    }
    let mut cpe = Cpe::any();
    if let Some(vendor) = &args.vendor {
        cpe.vendor = AvString::Value(vendor.clone());
    }
    if let Some(version) = &args.software_version {
        cpe.version = AvString::Value(version.clone());
    }
    if let Some(update) = &args.update {
        cpe.update = AvString::Value(update.clone());
    }
    Some(cpe)
}

fn print_results(cves: &[Cve], config: &Config) {
    if cves.is_empty() {
        println!("{}", "no matching CVEs".dimmed());
        return;
    }

    // Piped output gets one compact tab-separated line per CVE, so it stays
    // easy to grep/cut downstream; an interactive terminal gets the fuller
    // block below.
    if !std::io::stdout().is_terminal() {
        for cve in cves {
            println!("{}\t{}", cve.cve_id, cve.description("en").unwrap_or(""));
        }
        return;
    }

    for cve in cves.iter().take(config.display.page_size) {
        let severity = format!("{:?}", cve.severity()).to_uppercase();
        let rendered_severity = if config.display.color {
            color_for_severity(&severity)
        } else {
            severity.clone()
        };
        println!(
            "{}  {}  {}",
            cve.cve_id.bold(),
            rendered_severity,
            cve.published_date.format("%Y-%m-%d")
        );
        if let Some(desc) = cve.description("en") {
            println!("    {}", truncate(desc, 100));
        }
    }
    if cves.len() > config.display.page_size {
        println!(
            "{}",
            format!("... and {} more", cves.len() - config.display.page_size).dimmed()
        );
    }
}

fn color_for_severity(severity: &str) -> String {
    match severity {
        "CRITICAL" => severity.red().bold().to_string(),
        "HIGH" => severity.red().to_string(),
        "MEDIUM" => severity.yellow().to_string(),
        "LOW" => severity.green().to_string(),
        _ => severity.normal().to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}
