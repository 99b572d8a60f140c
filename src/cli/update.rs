//! `cvedb update` — refresh the local mirror from the configured NVD feeds.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::session::{ProgressReporter, Session};

/// Drives an indicatif spinner from the session's reload progress
/// notifications.
struct CliProgress {
    bar: ProgressBar,
    checked: usize,
    updated: usize,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("static progress template is valid"),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        CliProgress { bar, checked: 0, updated: 0 }
    }

    fn finish(self) {
        self.bar.finish_and_clear();
        println!(
            "{} checked {} feed(s), updated {}",
            "✓".green(),
            self.checked,
            self.updated
        );
    }
}

impl ProgressReporter for CliProgress {
    fn checking(&mut self, feed_name: &str) {
        self.checked += 1;
        self.bar.set_message(format!("checking {feed_name}"));
    }

    fn downloading(&mut self, feed_name: &str, _total_bytes: Option<u64>) {
        self.bar.set_message(format!("downloading {feed_name}"));
    }

    fn upserting(&mut self, feed_name: &str, count: usize) {
        self.updated += 1;
        self.bar.set_message(format!("upserting {count} CVE(s) from {feed_name}"));
    }
}

pub fn run(database: Option<&Path>, config: &Config) -> Result<()> {
    let database = super::db_path(database, config).to_path_buf();
    let session = Session::open_at(&database, config, true)?;

    let mut progress = CliProgress::new();
    session.reload(&mut progress)?;
    progress.finish();

    Ok(())
}
