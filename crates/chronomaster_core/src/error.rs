//! Error taxonomy shared by every master store.
//!
//! # Invariants
//! - `NotFound`, `DuplicateName`, `OptimisticConflict` and `Validation` are
//!   business outcomes and are never retried.
//! - Only [`MasterError::is_contention`] decides whether a unit of work is
//!   retried.

use crate::db::{DbError, StorageFailure};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type MasterResult<T> = Result<T, MasterError>;

#[derive(Debug)]
pub enum MasterError {
    /// No row satisfies the query.
    NotFound(String),
    /// A live entity of the same kind already holds this name.
    DuplicateName { kind: &'static str, name: String },
    /// The supplied version token is no longer the current one.
    OptimisticConflict { supplied: String, current: String },
    /// The retry budget was exhausted by concurrent writers.
    Contention {
        operation: &'static str,
        attempts: u32,
    },
    /// Malformed caller input.
    Validation(String),
    Db(DbError),
    Serialization(serde_json::Error),
    /// Persisted state violates a storage invariant.
    InvalidData(String),
}

impl MasterError {
    /// True when the failure is a storage uniqueness race worth retrying.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Db(err) if err.failure() == StorageFailure::Contention)
    }

    /// Stable short code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::DuplicateName { .. } => "duplicate_name",
            Self::OptimisticConflict { .. } => "optimistic_conflict",
            Self::Contention { .. } => "contention",
            Self::Validation(_) => "validation",
            Self::Db(_) => "db",
            Self::Serialization(_) => "serialization",
            Self::InvalidData(_) => "invalid_data",
        }
    }
}

impl Display for MasterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::DuplicateName { kind, name } => {
                write!(f, "{kind} name already in use: {name}")
            }
            Self::OptimisticConflict { supplied, current } => write!(
                f,
                "stale version: supplied `{supplied}` but current is `{current}`"
            ),
            Self::Contention {
                operation,
                attempts,
            } => write!(
                f,
                "{operation} gave up after {attempts} attempts due to concurrent writers"
            ),
            Self::Validation(message) => write!(f, "invalid input: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "payload serialization failed: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for MasterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for MasterError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for MasterError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for MasterError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}
