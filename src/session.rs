//! The database session: a reentrant guard over one connection, the
//! aggregate multi-feed view, and network-backed reload.
//!
//! Grounded on `cvedb/db.py`'s `CVEdbContext`/`CVEdb`/`DbBackedFeed`. The
//! source uses `__enter__`/`__exit__` with an entry counter; here that
//! becomes an RAII guard returned by `Session::open`, since Rust has no
//! context-manager protocol to hook into.

use std::cell::RefCell;
use std::io::Read as _;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::database::Database;
use crate::error::{CvedbError, Result};
use crate::feed::{Data, Feed};
use crate::nvd;
use crate::search::{Sort, SearchQuery};

/// Per-feed progress notification, fired at the state transitions named
/// in the reload state machine. The CLI wires this to an `indicatif`
/// bar; library callers may ignore it.
pub trait ProgressReporter {
    fn checking(&mut self, _feed_name: &str) {}
    fn downloading(&mut self, _feed_name: &str, _total_bytes: Option<u64>) {}
    fn upserting(&mut self, _feed_name: &str, _count: usize) {}
}

/// A no-op reporter for callers that don't want progress output.
pub struct SilentReporter;
impl ProgressReporter for SilentReporter {}

struct FeedState {
    name: String,
    year: u16,
}

/// A single NVD year feed backed by the store: its freshness is governed
/// by the `feeds` table's `last_modified`/`last_checked` columns rather
/// than an in-memory timestamp.
struct DbBackedFeed {
    state: FeedState,
    feed_id: i64,
    db: Rc<Database>,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl DbBackedFeed {
    fn new(year: u16, base_url: &str, db: Rc<Database>, client: reqwest::blocking::Client) -> Result<Self> {
        let name = year.to_string();
        let feed_id = db.feed_id(&name)?;
        Ok(DbBackedFeed {
            state: FeedState { name, year },
            feed_id,
            db,
            base_url: base_url.to_string(),
            client,
        })
    }

    fn meta_url(&self) -> String {
        format!("{}{}.meta", self.base_url, self.state.year)
    }

    fn gz_url(&self) -> String {
        format!("{}{}.json.gz", self.base_url, self.state.year)
    }
}

impl Feed for DbBackedFeed {
    fn name(&self) -> &str {
        &self.state.name
    }

    /// `Checking -> {Fresh, Downloading -> Upserting -> Fresh}`, with
    /// every failure path falling back to `Fresh` at the previous data
    /// (per the reload state machine: failures are non-fatal to the
    /// session).
    fn reload(&mut self, existing: Option<&Data>) -> Result<Data> {
        info!(feed = %self.state.name, "checking feed freshness");
        let meta_text = match self.client.get(self.meta_url()).send().and_then(|r| r.text()) {
            Ok(text) => text,
            Err(e) => {
                warn!(feed = %self.state.name, error = %e, "meta fetch failed, keeping previous data");
                return Ok(existing.cloned_or_empty());
            }
        };
        let meta = match nvd::Meta::parse(&meta_text) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(feed = %self.state.name, error = %e, "meta parse failed, keeping previous data");
                return Ok(existing.cloned_or_empty());
            }
        };

        if let Some(existing) = existing {
            if existing.last_modified_date >= meta.last_modified_date {
                self.db.touch_feed_checked(self.feed_id, chrono::Utc::now())?;
                return Ok(existing.clone());
            }
        }

        info!(feed = %self.state.name, "downloading updated feed");
        let body = match self.client.get(self.gz_url()).send().and_then(|r| r.bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(feed = %self.state.name, error = %e, "feed download failed, keeping previous data");
                self.db.touch_feed_checked(self.feed_id, chrono::Utc::now())?;
                return Ok(existing.cloned_or_empty());
            }
        };

        let mut decompressed = Vec::new();
        if let Err(e) = flate2::read::GzDecoder::new(body.as_ref()).read_to_end(&mut decompressed) {
            warn!(feed = %self.state.name, error = %e, "gzip decompression failed, keeping previous data");
            self.db.touch_feed_checked(self.feed_id, chrono::Utc::now())?;
            return Ok(existing.cloned_or_empty());
        }

        let (cves, errors) = match nvd::parse_feed_document(&decompressed) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(feed = %self.state.name, error = %e, "feed parse failed, keeping previous data");
                self.db.touch_feed_checked(self.feed_id, chrono::Utc::now())?;
                return Ok(existing.cloned_or_empty());
            }
        };
        for err in &errors {
            warn!(feed = %self.state.name, error = %err, "skipped one malformed CVE entry");
        }

        info!(feed = %self.state.name, count = cves.len(), "upserting feed");
        let now = chrono::Utc::now();
        self.db.reload_feed(self.feed_id, &cves, meta.last_modified_date, now)?;

        Ok(Data {
            cves,
            last_modified_date: meta.last_modified_date,
        })
    }

    fn is_out_of_date(&self, data: Option<&Data>) -> bool {
        if let Ok(Some(last_checked)) = self.db.feed_last_checked(self.feed_id) {
            if (chrono::Utc::now() - last_checked).num_seconds() < crate::feed::UPDATE_INTERVAL_SECONDS {
                return false;
            }
        }
        match data {
            None => true,
            Some(d) => {
                (chrono::Utc::now() - d.last_modified_date).num_seconds() >= crate::feed::MAX_DATA_AGE_SECONDS
            }
        }
    }
}

trait OptionDataExt {
    fn cloned_or_empty(&self) -> Data;
}

impl OptionDataExt for Option<&Data> {
    fn cloned_or_empty(&self) -> Data {
        match self {
            Some(d) => (*d).clone(),
            None => Data {
                cves: Vec::new(),
                last_modified_date: chrono::DateTime::<chrono::Utc>::MIN_UTC,
            },
        }
    }
}

/// Tracks how many `Session::reload` calls are currently in flight on
/// this session, mirroring the source's `__enter__`/`__exit__` entry
/// count. Acquired at the top of `reload` and released on drop, so the
/// count stays balanced across early returns, matching the span of the
/// per-feed transaction each `DbBackedFeed::reload` opens underneath it.
struct ReloadGuard {
    entries: Rc<RefCell<usize>>,
}

impl ReloadGuard {
    fn acquire(entries: &Rc<RefCell<usize>>) -> Self {
        *entries.borrow_mut() += 1;
        ReloadGuard { entries: Rc::clone(entries) }
    }
}

impl Drop for ReloadGuard {
    fn drop(&mut self) {
        *self.entries.borrow_mut() -= 1;
    }
}

/// A reentrant guard over the store, exposing every configured year feed
/// plus an aggregate view across them. Writes within a single feed's
/// `reload()` are wrapped in one `rusqlite` transaction (see
/// `Database::reload_feed`), so a failure partway through rolls that
/// feed back to its previous state instead of leaving a partial upsert.
/// `entries` counts in-flight `reload()` calls via `ReloadGuard`, so a
/// `Session` dropped while one is still running is a real bug, not a
/// cosmetic assertion.
pub struct Session {
    db: Rc<Database>,
    feeds: RefCell<Vec<DbBackedFeed>>,
    cached: RefCell<Vec<Option<Data>>>,
    entries: Rc<RefCell<usize>>,
}

impl Session {
    pub fn open(config: &Config, allow_schema_upgrade: bool) -> Result<Self> {
        Self::open_at(&config.database.path, config, allow_schema_upgrade)
    }

    pub fn open_at(path: &Path, config: &Config, allow_schema_upgrade: bool) -> Result<Self> {
        let db = Rc::new(Database::open(path, allow_schema_upgrade)?);
        Self::from_database(db, config)
    }

    pub fn open_in_memory(config: &Config) -> Result<Self> {
        let db = Rc::new(Database::open_in_memory()?);
        Self::from_database(db, config)
    }

    fn from_database(db: Rc<Database>, config: &Config) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(config.network.connect_timeout_secs))
            .timeout(Duration::from_secs(config.network.download_timeout_secs))
            .build()
            .map_err(|e| CvedbError::Config(format!("failed to build HTTP client: {e}")))?;

        let years = config.feed.resolved_years(chrono::Utc::now());
        let mut feeds = Vec::with_capacity(years.len());
        for year in years {
            feeds.push(DbBackedFeed::new(year, &config.feed.base_url, Rc::clone(&db), client.clone())?);
        }
        let cached = feeds.iter().map(|_| None).collect();

        Ok(Session {
            db,
            feeds: RefCell::new(feeds),
            cached: RefCell::new(cached),
            entries: Rc::new(RefCell::new(0)),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Reloads every out-of-date feed, one at a time, under a progress
    /// reporter. A feed whose reload errors is logged and skipped; the
    /// session proceeds with the rest (failures are non-fatal per the
    /// reload state machine).
    pub fn reload(&self, reporter: &mut dyn ProgressReporter) -> Result<()> {
        let _guard = ReloadGuard::acquire(&self.entries);
        let mut feeds = self.feeds.borrow_mut();
        let mut cached = self.cached.borrow_mut();
        for (feed, slot) in feeds.iter_mut().zip(cached.iter_mut()) {
            reporter.checking(feed.name());
            if !feed.is_out_of_date(slot.as_ref()) {
                continue;
            }
            reporter.downloading(feed.name(), None);
            match feed.reload(slot.as_ref()) {
                Ok(data) => {
                    reporter.upserting(feed.name(), data.cves.len());
                    *slot = Some(data);
                }
                Err(e) => warn!(feed = feed.name(), error = %e, "feed reload failed, skipping"),
            }
        }
        Ok(())
    }

    /// Runs `query` against the store: the schema-appropriate compiled
    /// `Select` when the predicate translates, falling back to streaming
    /// every row through the in-memory predicate otherwise. Either path
    /// re-applies `query.matches` as a safety net over LIKE-approximate
    /// and CPE-join results.
    pub fn search(&self, query: &SearchQuery, sort: &[Sort], ascending: bool) -> Result<Vec<crate::cve::Cve>> {
        let feed_ids = self.feed_ids()?;
        let compiled = if self.db.schema_version() >= 1 {
            crate::compiler::compile_v1(query, &feed_ids, sort, ascending)
        } else {
            crate::compiler::compile_v0(query, &feed_ids, sort, ascending)
        };

        let rows = match compiled {
            Some(select) => self.db.query(&select)?,
            None => {
                let mut all = Vec::new();
                for id in &feed_ids {
                    all.extend(self.db.query(&fallback_select(*id))?);
                }
                all
            }
        };

        Ok(rows.into_iter().filter(|cve| query.matches(cve)).collect())
    }

    fn feed_ids(&self) -> Result<Vec<i64>> {
        Ok(self.feeds.borrow().iter().map(|f| f.feed_id).collect())
    }
}

/// Every CVE row belonging to one feed, unfiltered — the fallback scan
/// used when the query compiler can't translate a predicate.
fn fallback_select(feed_id: i64) -> crate::sql::Select {
    let mut select = crate::sql::Select::new("DISTINCT c.*", "descriptions d INNER JOIN cves c ON d.cve = c.id");
    select.where_clause = Some(crate::sql::SqlExpr::Simple("c.feed = ?".to_string()));
    select.params = vec![crate::sql::SqlParam::Int(feed_id)];
    select
}

impl Drop for Session {
    fn drop(&mut self) {
        debug_assert_eq!(*self.entries.borrow(), 0, "session dropped while a reload was still in flight");
    }
}
