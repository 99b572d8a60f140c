//! Configuration management for cvedb.
//!
//! Resolution order: explicit `--config PATH` > system config
//! (`/etc/cvedb/cvedb.toml`) > XDG user config > built-in defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Base URL for the NVD 1.1 JSON feeds. `<year>.meta` and
/// `<year>.json.gz` are appended by the feed layer.
pub const BASE_JSON_URL: &str = "https://nvd.nist.gov/feeds/json/cve/1.1/nvdcve-1.1-";

/// The earliest NVD feed year.
pub const FIRST_FEED_YEAR: u16 = 2002;

/// Main configuration structure assembled from section structs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database (default `~/.config/cvedb/cvedb.sqlite`).
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("org", "cvedb", "cvedb")
        .map(|d| d.config_dir().join("cvedb.sqlite"))
        .unwrap_or_else(|| PathBuf::from(".config/cvedb/cvedb.sqlite"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Base URL the per-year `.meta`/`.json.gz` feeds hang off of.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Inclusive `(first, last)` feed year range. `None` means
    /// `FIRST_FEED_YEAR..=current_year`, computed fresh at session open
    /// rather than fixed at configuration-load time.
    #[serde(default)]
    pub years: Option<(u16, u16)>,
}

fn default_base_url() -> String {
    BASE_JSON_URL.to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            years: None,
        }
    }
}

impl FeedConfig {
    /// The configured year range, or `FIRST_FEED_YEAR..=current_year` as a
    /// pure function of `now` when unconfigured.
    pub fn resolved_years(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<u16> {
        let (first, last) = self
            .years
            .unwrap_or((FIRST_FEED_YEAR, now.format("%Y").to_string().parse().unwrap_or(FIRST_FEED_YEAR)));
        (first..=last).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// The meta probe is a short request; kept separate from the gz
    /// download's long-lived timeout.
    #[serde(default = "default_meta_timeout")]
    pub meta_timeout_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_meta_timeout() -> u64 {
    15
}

fn default_download_timeout() -> u64 {
    600
}

fn default_retries() -> u32 {
    3
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            meta_timeout_secs: default_meta_timeout(),
            download_timeout_secs: default_download_timeout(),
            retries: default_retries(),
        }
    }
}

/// Sort/paging defaults for the CLI surface only; does not affect the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub color: bool,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    20
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            color: true,
            page_size: default_page_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            feed: FeedConfig::default(),
            network: NetworkConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to the system config,
    /// then the XDG user config, then built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            let system_config = PathBuf::from("/etc/cvedb/cvedb.toml");
            if system_config.exists() {
                return Some(system_config);
            }
            directories::ProjectDirs::from("org", "cvedb", "cvedb")
                .map(|d| d.config_dir().join("cvedb.toml"))
                .filter(|p| p.exists())
        });

        match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("failed to parse config: {}", path.display()))
            }
            None => Ok(Config::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_config_parses_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.feed.base_url, BASE_JSON_URL);
    }

    #[test]
    fn resolved_years_defaults_to_2002_through_current() {
        let feed = FeedConfig::default();
        let now = chrono::Utc.with_ymd_and_hms(2026, 7, 27, 0, 0, 0).unwrap();
        let years = feed.resolved_years(now);
        assert_eq!(years.first(), Some(&2002));
        assert_eq!(years.last(), Some(&2026));
    }

    #[test]
    fn explicit_years_override_the_default_range() {
        let feed = FeedConfig {
            years: Some((2020, 2022)),
            ..FeedConfig::default()
        };
        let now = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(feed.resolved_years(now), vec![2020, 2021, 2022]);
    }
}
