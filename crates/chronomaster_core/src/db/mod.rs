//! SQLite storage bootstrap, schema migrations and failure classification.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the master stores.
//! - Apply schema migrations in deterministic order.
//! - Classify driver failures so retry logic never inspects driver codes.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Store code must not read/write documents before migrations succeed.
//! - Only uniqueness/primary-key violations classify as contention.

use rusqlite::ffi;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_db_with_config};

/// Sentinel stored in `*_to` columns for an interval that is still open.
pub const OPEN_END_MICROS: i64 = i64::MAX;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

/// Storage-agnostic classification of a failed statement or commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFailure {
    /// A concurrent writer won a uniqueness race; the unit of work may be retried.
    Contention,
    /// Anything else; surfaced to the caller unchanged.
    Other,
}

impl DbError {
    /// Classifies this error for the retry loop.
    pub fn failure(&self) -> StorageFailure {
        match self {
            Self::Sqlite(err) => classify(err),
            Self::UnsupportedSchemaVersion { .. } => StorageFailure::Other,
        }
    }
}

/// Maps a SQLite error onto [`StorageFailure`].
pub fn classify(err: &rusqlite::Error) -> StorageFailure {
    match err {
        rusqlite::Error::SqliteFailure(code, _) if code.code == ErrorCode::ConstraintViolation => {
            match code.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    StorageFailure::Contention
                }
                _ => StorageFailure::Other,
            }
        }
        _ => StorageFailure::Other,
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{classify, StorageFailure};
    use rusqlite::Connection;

    #[test]
    fn unique_violation_is_contention() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY, u TEXT UNIQUE);")
            .unwrap();
        conn.execute("INSERT INTO t VALUES ('a', 'x');", []).unwrap();

        let pk = conn.execute("INSERT INTO t VALUES ('a', 'y');", []).unwrap_err();
        assert_eq!(classify(&pk), StorageFailure::Contention);

        let unique = conn.execute("INSERT INTO t VALUES ('b', 'x');", []).unwrap_err();
        assert_eq!(classify(&unique), StorageFailure::Contention);
    }

    #[test]
    fn check_violation_and_syntax_errors_are_not_contention() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER CHECK (v > 0));")
            .unwrap();

        let check = conn.execute("INSERT INTO t VALUES (-1);", []).unwrap_err();
        assert_eq!(classify(&check), StorageFailure::Other);

        let syntax = conn.execute("INSERT INTO nowhere VALUES (1);", []).unwrap_err();
        assert_eq!(classify(&syntax), StorageFailure::Other);
    }
}
