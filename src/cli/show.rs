//! `cvedb show` — print the full record for one CVE id.

use std::path::Path;

use anyhow::{bail, Result};
use colored::Colorize;

use crate::config::Config;
use crate::cve::Cve;
use crate::search::SearchQuery;
use crate::session::Session;

pub fn run(cve_id: &str, database: Option<&Path>, config: &Config) -> Result<()> {
    let database = super::db_path(database, config).to_path_buf();
    let session = Session::open_at(&database, config, false)?;

    let query = SearchQuery::Term {
        text: cve_id.to_string(),
        case_sensitive: false,
    };
    let matches = session.search(&query, &[], true)?;
    let Some(cve) = matches.into_iter().find(|c| c.cve_id.eq_ignore_ascii_case(cve_id)) else {
        bail!("no such CVE: {cve_id}");
    };

    print_record(&cve);
    Ok(())
}

fn print_record(cve: &Cve) {
    println!("{}", cve.cve_id.bold());
    println!("  published:      {}", cve.published_date.format("%Y-%m-%d"));
    println!("  last modified:  {}", cve.last_modified_date.format("%Y-%m-%d"));
    println!("  severity:       {:?}", cve.severity());
    if let Some(impact) = &cve.impact {
        println!("  vector:         {}", impact.vector());
        println!("  base score:     {}", impact.base_score());
    }
    if let Some(assigner) = &cve.assigner {
        println!("  assigner:       {assigner}");
    }

    if let Some(desc) = cve.description("en") {
        println!();
        println!("{}", desc);
    }

    if !cve.references.is_empty() {
        println!();
        println!("{}", "references:".bold());
        for reference in &cve.references {
            match (&reference.name, &reference.url) {
                (Some(name), Some(url)) => println!("  {name}: {url}"),
                (None, Some(url)) => println!("  {url}"),
                (Some(name), None) => println!("  {name}"),
                (None, None) => {}
            }
        }
    }

    let cpes = cve.configurations.vulnerable_cpes();
    if !cpes.is_empty() {
        println!();
        println!("{}", "affected:".bold());
        for cpe in cpes {
            println!("  {}", cpe.to_formatted_string());
        }
    }
}
