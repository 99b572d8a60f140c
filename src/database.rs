//! Schema-versioned SQLite persistence: table DDL, migrations, CRUD, and
//! CVE row reconstruction.
//!
//! Schema v0 carries `feeds`/`cves`/`descriptions` only. Schema v1 adds
//! `cves.configurations`, `refs`, `cpes`, and the `configurations` join
//! table. Migrating v0 to v1 has no translation path (v0 never recorded
//! references or CPEs) and wipes the old tables, matching the source's
//! `SchemaV1.migrate_from_previous`.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::applicability::Configurations;
use crate::cpe::Cpe;
use crate::cve::{Cve, Description, Impact, Reference};
use crate::error::{DatabaseError, SchemaError};

pub const LATEST_SCHEMA_VERSION: i64 = 1;

const FEED_TABLE_CREATE: &str =
    "CREATE TABLE IF NOT EXISTS feeds(name VARCHAR UNIQUE NOT NULL, last_modified INTEGER NULL, last_checked INTEGER NULL)";

const CVE_TABLE_CREATE_V0: &str = "CREATE TABLE IF NOT EXISTS cves(\
    id VARCHAR NOT NULL, \
    feed REFERENCES feeds(rowid) NOT NULL, \
    published INTEGER NOT NULL, \
    last_modified INTEGER NOT NULL, \
    impact_vector VARCHAR NULL, \
    base_score REAL NULL, \
    severity INTEGER NOT NULL, \
    PRIMARY KEY (id, feed))";

const CVE_TABLE_CREATE_V1: &str = "CREATE TABLE IF NOT EXISTS cves(\
    id VARCHAR NOT NULL, \
    feed REFERENCES feeds(rowid) NOT NULL, \
    published INTEGER NOT NULL, \
    last_modified INTEGER NOT NULL, \
    impact_vector VARCHAR NULL, \
    base_score REAL NULL, \
    severity INTEGER NOT NULL, \
    configurations VARCHAR NULL, \
    PRIMARY KEY (id, feed))";

const DESCRIPTIONS_TABLE_CREATE: &str = "CREATE TABLE IF NOT EXISTS descriptions(\
    cve REFERENCES cves(id) NOT NULL, \
    lang VARCHAR NOT NULL DEFAULT 'en', \
    description VARCHAR NOT NULL)";

const REFERENCES_TABLE_CREATE: &str = "CREATE TABLE IF NOT EXISTS refs(\
    cve REFERENCES cves(id) NOT NULL, \
    name VARCHAR NULL, \
    url VARCHAR NULL)";

/// Ten AV columns, deliberately omitting `target_hw` — the `cpes` table
/// never carried it (see `crate::compiler`, which skips the field rather
/// than referencing a nonexistent column).
const CPES_TABLE_CREATE: &str = "CREATE TABLE IF NOT EXISTS cpes(\
    part VARCHAR NOT NULL, \
    vendor VARCHAR NULL, \
    product VARCHAR NULL, \
    version VARCHAR NULL, \
    update_str VARCHAR NULL, \
    edition VARCHAR NULL, \
    language VARCHAR NULL, \
    sw_edition VARCHAR NULL, \
    target_sw VARCHAR NULL, \
    other VARCHAR NULL)";

const CONFIGURATIONS_TABLE_CREATE: &str = "CREATE TABLE IF NOT EXISTS configurations(\
    cpe REFERENCES cpes(rowid) NOT NULL, \
    cve REFERENCES cves(id) NOT NULL, \
    PRIMARY KEY (cpe, cve))";

const CPE_COLUMNS: [&str; 10] = [
    "part",
    "vendor",
    "product",
    "version",
    "update_str",
    "edition",
    "language",
    "sw_edition",
    "target_sw",
    "other",
];

/// A schema-versioned handle onto the store.
pub struct Database {
    conn: Connection,
    schema_version: i64,
}

impl Database {
    /// Opens (creating if absent) the database at `path`. `allow_upgrade`
    /// governs what happens when the stored schema is older than
    /// [`LATEST_SCHEMA_VERSION`]: the source prompts interactively over a
    /// TTY; a library has no terminal to prompt, so the caller states the
    /// policy up front instead (see DESIGN.md).
    pub fn open(path: &Path, allow_upgrade: bool) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            // Best effort: if this fails, `Connection::open` below fails too,
            // with a clearer SQLite-level error.
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, allow_upgrade)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, true)
    }

    fn from_connection(conn: Connection, allow_upgrade: bool) -> Result<Self, DatabaseError> {
        let schema_version = open_schema(&conn, allow_upgrade)?;
        Ok(Database { conn, schema_version })
    }

    pub fn schema_version(&self) -> i64 {
        self.schema_version
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns the feed's rowid, inserting a fresh row if this is the
    /// first time `name` has been seen.
    pub fn feed_id(&self, name: &str) -> Result<i64, DatabaseError> {
        let inserted = self
            .conn
            .execute("INSERT OR IGNORE INTO feeds (name) VALUES (?1)", params![name])?;
        if inserted > 0 {
            Ok(self.conn.last_insert_rowid())
        } else {
            Ok(self
                .conn
                .query_row("SELECT rowid FROM feeds WHERE name = ?1", params![name], |row| row.get(0))?)
        }
    }

    pub fn feed_last_modified(&self, feed_id: i64) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let epoch: Option<i64> = self
            .conn
            .query_row("SELECT last_modified FROM feeds WHERE rowid = ?1", params![feed_id], |row| row.get(0))?;
        Ok(epoch.map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)))
    }

    pub fn feed_last_checked(&self, feed_id: i64) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let epoch: Option<i64> = self
            .conn
            .query_row("SELECT last_checked FROM feeds WHERE rowid = ?1", params![feed_id], |row| row.get(0))?;
        Ok(epoch.map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)))
    }

    pub fn touch_feed_checked(&self, feed_id: i64, when: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE feeds SET last_checked = ?1 WHERE rowid = ?2",
            params![when.timestamp(), feed_id],
        )?;
        Ok(())
    }

    pub fn touch_feed_modified(&self, feed_id: i64, when: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE feeds SET last_modified = ?1 WHERE rowid = ?2",
            params![when.timestamp(), feed_id],
        )?;
        Ok(())
    }

    /// Upserts a single CVE under `source_feed`, deduplicating CPEs by
    /// their full 10-field key (`INSERT OR IGNORE` + `SELECT rowid`
    /// fallback) on schema v1. Not itself wrapped in a transaction; callers
    /// upserting more than one CVE as a unit should use
    /// [`Self::reload_feed`] instead.
    pub fn add(&self, cve: &Cve, source_feed: i64) -> Result<(), DatabaseError> {
        upsert_cve(&self.conn, self.schema_version, cve, source_feed)
    }

    /// Upserts every CVE in `cves` under `feed_id` and stamps
    /// `last_modified`/`last_checked`, all inside one transaction: per
    /// §5, "writes within one reload() are atomic (single transaction)".
    /// An error partway through rolls the whole batch back (the
    /// transaction is dropped uncommitted), leaving the feed at its
    /// previous state rather than half-upserted.
    pub fn reload_feed(
        &self,
        feed_id: i64,
        cves: &[Cve],
        last_modified: DateTime<Utc>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;
        for cve in cves {
            upsert_cve(&tx, self.schema_version, cve, feed_id)?;
        }
        tx.execute(
            "UPDATE feeds SET last_modified = ?1, last_checked = ?2 WHERE rowid = ?3",
            params![last_modified.timestamp(), checked_at.timestamp(), feed_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Reconstructs `Cve`s from the columns of `cves` (`id, feed,
    /// published, last_modified, impact_vector, base_score, severity[,
    /// configurations]`), re-fetching descriptions, references, and
    /// applicability trees per row.
    pub fn cve_from_row(&self, row: &rusqlite::Row) -> rusqlite::Result<Cve> {
        let cve_id: String = row.get("id")?;
        let published: i64 = row.get("published")?;
        let last_modified: i64 = row.get("last_modified")?;
        let impact_vector: Option<String> = row.get("impact_vector")?;
        let base_score: Option<f64> = row.get("base_score")?;
        let impact = match (impact_vector, base_score) {
            (Some(vector), Some(score)) => Some(Impact::from_stored(&vector, score)),
            _ => None,
        };

        let descriptions = self.descriptions_for(&cve_id)?;
        let (references, configurations) = if self.schema_version >= 1 {
            let configurations_text: Option<String> = row.get("configurations")?;
            let configurations = configurations_text
                .map(|text| Configurations::loads(&text))
                .transpose()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?
                .unwrap_or_default();
            (self.references_for(&cve_id)?, configurations)
        } else {
            (Vec::new(), Configurations::default())
        };

        Ok(Cve {
            cve_id,
            published_date: Utc.timestamp_opt(published, 0).single().unwrap_or_else(Utc::now),
            last_modified_date: Utc.timestamp_opt(last_modified, 0).single().unwrap_or_else(Utc::now),
            impact,
            descriptions,
            references,
            assigner: None,
            configurations,
        })
    }

    fn descriptions_for(&self, cve_id: &str) -> rusqlite::Result<Vec<Description>> {
        let mut stmt = self.conn.prepare("SELECT lang, description FROM descriptions WHERE cve = ?1")?;
        let rows = stmt.query_map(params![cve_id], |row| {
            Ok(Description {
                lang: row.get(0)?,
                value: row.get(1)?,
            })
        })?;
        rows.collect()
    }

    fn references_for(&self, cve_id: &str) -> rusqlite::Result<Vec<Reference>> {
        let mut stmt = self.conn.prepare("SELECT name, url FROM refs WHERE cve = ?1")?;
        let rows = stmt.query_map(params![cve_id], |row| {
            Ok(Reference {
                name: row.get(0)?,
                url: row.get(1)?,
            })
        })?;
        rows.collect()
    }

    /// Runs a compiled `Select` and materializes every row via
    /// [`Self::cve_from_row`].
    pub fn query(&self, select: &crate::sql::Select) -> Result<Vec<Cve>, DatabaseError> {
        let mut stmt = self.conn.prepare(&select.to_sql())?;
        let rows = stmt.query_map(rusqlite::params_from_iter(select.params.iter()), |row| self.cve_from_row(row))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn cve_count(&self) -> Result<i64, DatabaseError> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM cves", [], |row| row.get(0))?)
    }
}

/// The body of `Database::add`, generalized over anything that derefs to
/// a `Connection` (the plain connection, or an open `Transaction`) so a
/// batch of these can be composed into one atomic unit by the caller.
fn upsert_cve(conn: &Connection, schema_version: i64, cve: &Cve, source_feed: i64) -> Result<(), DatabaseError> {
    let (impact_vector, base_score) = match &cve.impact {
        None => (None, None),
        Some(impact) => (Some(impact.vector().to_string()), Some(impact.base_score())),
    };
    let severity = cve.severity().as_i64();

    if schema_version >= 1 {
        let configurations = cve.configurations.dumps();
        conn.execute(
            "INSERT OR REPLACE INTO cves \
             (id, feed, published, last_modified, impact_vector, base_score, severity, configurations) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                cve.cve_id,
                source_feed,
                cve.published_date.timestamp(),
                cve.last_modified_date.timestamp(),
                impact_vector,
                base_score,
                severity,
                configurations,
            ],
        )?;
    } else {
        conn.execute(
            "INSERT OR REPLACE INTO cves \
             (id, feed, published, last_modified, impact_vector, base_score, severity) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                cve.cve_id,
                source_feed,
                cve.published_date.timestamp(),
                cve.last_modified_date.timestamp(),
                impact_vector,
                base_score,
                severity,
            ],
        )?;
    }

    for description in &cve.descriptions {
        conn.execute(
            "INSERT OR REPLACE INTO descriptions (cve, lang, description) VALUES (?1, ?2, ?3)",
            params![cve.cve_id, description.lang, description.value],
        )?;
    }

    if schema_version >= 1 {
        for reference in &cve.references {
            conn.execute(
                "INSERT OR REPLACE INTO refs (cve, name, url) VALUES (?1, ?2, ?3)",
                params![cve.cve_id, reference.name, reference.url],
            )?;
        }
        for cpe in cve.configurations.vulnerable_cpes() {
            let cpe_row = cpe_id(conn, &cpe)?;
            conn.execute(
                "INSERT OR REPLACE INTO configurations (cpe, cve) VALUES (?1, ?2)",
                params![cpe_row, cve.cve_id],
            )?;
        }
    }

    Ok(())
}

fn cpe_id(conn: &Connection, cpe: &Cpe) -> Result<i64, DatabaseError> {
    let values = cpe_column_values(cpe);
    let col_list = CPE_COLUMNS.join(", ");
    let placeholders: Vec<String> = (1..=CPE_COLUMNS.len()).map(|i| format!("?{i}")).collect();
    let inserted = conn.execute(
        &format!("INSERT OR IGNORE INTO cpes ({col_list}) VALUES ({})", placeholders.join(", ")),
        rusqlite::params_from_iter(values.iter()),
    )?;
    if inserted > 0 {
        return Ok(conn.last_insert_rowid());
    }
    let where_clause: Vec<String> = CPE_COLUMNS.iter().enumerate().map(|(i, c)| format!("{c} = ?{}", i + 1)).collect();
    Ok(conn.query_row(
        &format!("SELECT rowid FROM cpes WHERE {}", where_clause.join(" AND ")),
        rusqlite::params_from_iter(values.iter()),
        |row| row.get(0),
    )?)
}

fn cpe_column_values(cpe: &Cpe) -> Vec<String> {
    vec![
        cpe.part.to_av(),
        cpe.vendor.to_av(),
        cpe.product.to_av(),
        cpe.version.to_av(),
        cpe.update.to_av(),
        cpe.edition.to_av(),
        cpe.lang.to_av(),
        cpe.sw_edition.to_av(),
        cpe.target_sw.to_av(),
        cpe.other.to_av(),
    ]
}

fn open_schema(conn: &Connection, allow_upgrade: bool) -> Result<i64, SchemaError> {
    let stored: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if stored == 0 {
        let has_cves_table: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'cves'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)?;
        if !has_cves_table {
            create_schema(conn, LATEST_SCHEMA_VERSION)?;
            return Ok(LATEST_SCHEMA_VERSION);
        }
    }

    if stored < 0 || stored > LATEST_SCHEMA_VERSION {
        return Err(SchemaError::UnsupportedVersion {
            stored,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    if stored < LATEST_SCHEMA_VERSION {
        if allow_upgrade {
            info!(from = stored, to = LATEST_SCHEMA_VERSION, "migrating database schema");
            migrate_to_latest(conn, stored)?;
            return Ok(LATEST_SCHEMA_VERSION);
        }
        warn!(
            stored,
            latest = LATEST_SCHEMA_VERSION,
            "database schema is older than the latest supported version; continuing without upgrading"
        );
    }

    Ok(stored)
}

fn create_schema(conn: &Connection, version: i64) -> rusqlite::Result<()> {
    conn.execute(FEED_TABLE_CREATE, [])?;
    if version == 0 {
        conn.execute(CVE_TABLE_CREATE_V0, [])?;
        conn.execute(DESCRIPTIONS_TABLE_CREATE, [])?;
    } else {
        conn.execute(CVE_TABLE_CREATE_V1, [])?;
        conn.execute(DESCRIPTIONS_TABLE_CREATE, [])?;
        conn.execute(REFERENCES_TABLE_CREATE, [])?;
        conn.execute(CPES_TABLE_CREATE, [])?;
        conn.execute(CONFIGURATIONS_TABLE_CREATE, [])?;
    }
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Schema v0 has no translation path to v1 (no references, no CPE
/// index): the upgrade wipes and recreates from scratch, requiring a
/// full re-download of every configured feed.
fn migrate_to_latest(conn: &Connection, from: i64) -> rusqlite::Result<()> {
    if from == 0 {
        conn.execute("DROP TABLE IF EXISTS cves", [])?;
        conn.execute("DROP TABLE IF EXISTS feeds", [])?;
        conn.execute("DROP TABLE IF EXISTS descriptions", [])?;
        create_schema(conn, LATEST_SCHEMA_VERSION)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applicability::Node;
    use crate::cpe::Cpe;

    fn sample_cve(id: &str) -> Cve {
        Cve {
            cve_id: id.to_string(),
            published_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            last_modified_date: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            impact: Some(Impact::Cvss3 {
                vector: "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H".to_string(),
                base_score: 9.8,
            }),
            descriptions: vec![Description {
                lang: "en".to_string(),
                value: "a description".to_string(),
            }],
            references: vec![Reference {
                name: Some("advisory".to_string()),
                url: Some("https://example.com".to_string()),
            }],
            assigner: None,
            configurations: Configurations(vec![Node::Cpe(
                Cpe::parse("cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*").unwrap(),
            )]),
        }
    }

    #[test]
    fn fresh_in_memory_db_is_at_latest_schema() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.schema_version(), LATEST_SCHEMA_VERSION);
        assert_eq!(db.cve_count().unwrap(), 0);
    }

    #[test]
    fn feed_id_dedups_by_name() {
        let db = Database::open_in_memory().unwrap();
        let a = db.feed_id("2024").unwrap();
        let b = db.feed_id("2024").unwrap();
        assert_eq!(a, b);
        let c = db.feed_id("2023").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn add_and_reconstruct_round_trips_a_cve() {
        let db = Database::open_in_memory().unwrap();
        let feed = db.feed_id("2024").unwrap();
        let cve = sample_cve("CVE-2024-0001");
        db.add(&cve, feed).unwrap();

        let mut stmt = db.connection().prepare("SELECT * FROM cves WHERE id = ?1").unwrap();
        let mut rows = stmt.query(params!["CVE-2024-0001"]).unwrap();
        let row = rows.next().unwrap().unwrap();
        let reconstructed = db.cve_from_row(row).unwrap();

        assert_eq!(reconstructed.cve_id, cve.cve_id);
        assert_eq!(reconstructed.descriptions, cve.descriptions);
        assert_eq!(reconstructed.references, cve.references);
        assert_eq!(reconstructed.configurations, cve.configurations);
        assert_eq!(reconstructed.severity(), cve.severity());
    }

    #[test]
    fn repeated_cpe_insert_reuses_the_same_row() {
        let db = Database::open_in_memory().unwrap();
        let feed = db.feed_id("2024").unwrap();
        let cve_a = sample_cve("CVE-2024-0001");
        let mut cve_b = sample_cve("CVE-2024-0002");
        cve_b.configurations = cve_a.configurations.clone();
        db.add(&cve_a, feed).unwrap();
        db.add(&cve_b, feed).unwrap();

        let cpe_rows: i64 = db.connection().query_row("SELECT COUNT(*) FROM cpes", [], |row| row.get(0)).unwrap();
        assert_eq!(cpe_rows, 1);
        let join_rows: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM configurations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(join_rows, 2);
    }

    #[test]
    fn feed_touch_stamps_are_persisted() {
        let db = Database::open_in_memory().unwrap();
        let feed = db.feed_id("2024").unwrap();
        assert!(db.feed_last_modified(feed).unwrap().is_none());
        let now = Utc::now();
        db.touch_feed_modified(feed, now).unwrap();
        db.touch_feed_checked(feed, now).unwrap();
        assert!(db.feed_last_modified(feed).unwrap().is_some());
        assert!(db.feed_last_checked(feed).unwrap().is_some());
    }

    #[test]
    fn reload_feed_upserts_cves_and_timestamps_as_one_unit() {
        let db = Database::open_in_memory().unwrap();
        let feed = db.feed_id("2024").unwrap();
        let cves = vec![sample_cve("CVE-2024-0001"), sample_cve("CVE-2024-0002")];
        let modified = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let checked = Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap();

        db.reload_feed(feed, &cves, modified, checked).unwrap();

        assert_eq!(db.cve_count().unwrap(), 2);
        assert_eq!(db.feed_last_modified(feed).unwrap().unwrap(), modified);
        assert_eq!(db.feed_last_checked(feed).unwrap().unwrap(), checked);
    }

    #[test]
    fn unsupported_future_schema_version_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(FEED_TABLE_CREATE, []).unwrap();
        conn.execute(CVE_TABLE_CREATE_V1, []).unwrap();
        conn.pragma_update(None, "user_version", 99i64).unwrap();
        let err = open_schema(&conn, true).unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedVersion { stored: 99, .. }));
    }
}
