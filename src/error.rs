//! Error types for cvedb.

use thiserror::Error;

use crate::applicability::ApplicabilityError;
use crate::cpe::CpeError;

/// Errors from parsing the NVD meta file or per-year JSON feed. Fatal to
/// the reload of the feed that produced them; the ingest layer records the
/// failing CVE/node and continues with the rest (partial-success ingest).
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("malformed meta line {0:?}")]
    MalformedMetaLine(String),

    #[error("duplicate meta key {0:?}")]
    DuplicateMetaKey(String),

    #[error("missing required meta key {0:?}")]
    MissingMetaKey(String),

    #[error("unexpected feed header: {0}")]
    UnexpectedHeader(String),

    #[error("unknown key {key:?} on applicability leaf")]
    UnknownLeafKey { key: String },

    #[error("both inclusive and exclusive bounds given for the same end")]
    ConflictingVersionBounds,

    #[error(transparent)]
    Cpe(#[from] CpeError),

    #[error(transparent)]
    Applicability(#[from] ApplicabilityError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("download failed: {0}")]
    Network(String),
}

/// Schema-related errors: unregistered/newer stored version, declined
/// migration. Fatal at session open.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("database schema version {0} is not registered")]
    UnregisteredVersion(i64),

    #[error("database schema version {stored} is newer than the latest supported version {latest}")]
    UnsupportedVersion { stored: i64, latest: i64 },

    #[error("schema upgrade from v{from} to v{to} was declined")]
    UpgradeDeclined { from: i64, to: i64 },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Errors from reading or writing the store once the schema is open:
/// row insertion, row reconstruction (a stored CPE or applicability tree
/// that no longer parses), and ad hoc query execution.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Cpe(#[from] CpeError),

    #[error(transparent)]
    Applicability(#[from] ApplicabilityError),
}

/// The top-level error type aggregating every failure domain.
#[derive(Error, Debug)]
pub enum CvedbError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Cpe(#[from] CpeError),

    #[error(transparent)]
    Applicability(#[from] ApplicabilityError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CvedbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_error_wraps_cpe_error() {
        let cpe_err = cpe_error_sample();
        let ingest: IngestError = cpe_err.into();
        assert!(matches!(ingest, IngestError::Cpe(_)));
    }

    fn cpe_error_sample() -> CpeError {
        crate::cpe::Cpe::parse("not-a-cpe").unwrap_err()
    }

    #[test]
    fn schema_error_display() {
        let err = SchemaError::UnregisteredVersion(7);
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn cvedb_error_from_ingest() {
        let err: CvedbError = IngestError::DuplicateMetaKey("size".to_string()).into();
        assert!(matches!(err, CvedbError::Ingest(_)));
    }

    #[test]
    fn database_error_wraps_schema_error() {
        let schema_err = SchemaError::UnregisteredVersion(2);
        let db_err: DatabaseError = schema_err.into();
        assert!(matches!(db_err, DatabaseError::Schema(_)));
    }

    #[test]
    fn cvedb_error_from_database() {
        let err: CvedbError = DatabaseError::Schema(SchemaError::UnregisteredVersion(2)).into();
        assert!(matches!(err, CvedbError::Database(_)));
    }
}
