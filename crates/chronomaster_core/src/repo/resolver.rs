//! (ObjectId, coordinate) to UniqueId resolution.
//!
//! # Invariants
//! - Callers pass an already pinned [`FixedVersionCorrection`]; this type
//!   never reads the clock.
//! - More than one matching row is reported as corrupt data, not resolved.

use crate::clock::to_micros;
use crate::error::{MasterError, MasterResult};
use crate::model::id::{ObjectId, UniqueId};
use crate::model::version_correction::FixedVersionCorrection;
use rusqlite::{params, Connection};

/// Resolver for one document kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierResolver {
    kind: &'static str,
    scheme: &'static str,
}

impl IdentifierResolver {
    pub fn new(kind: &'static str, scheme: &'static str) -> Self {
        Self { kind, scheme }
    }

    /// Rejects object ids issued under another scheme.
    pub fn check_scheme(&self, object_id: &ObjectId) -> MasterResult<()> {
        if object_id.scheme != self.scheme {
            return Err(MasterError::Validation(format!(
                "object id `{object_id}` does not belong to scheme `{}`",
                self.scheme
            )));
        }
        Ok(())
    }

    /// Returns the id of the single row visible at `vc`.
    ///
    /// # Errors
    /// - `NotFound` when no row matches.
    /// - `InvalidData` when several rows match.
    pub fn resolve(
        &self,
        conn: &Connection,
        object_id: &ObjectId,
        vc: FixedVersionCorrection,
    ) -> MasterResult<UniqueId> {
        let row_id = self.resolve_row_id(conn, object_id, vc)?;
        Ok(object_id.at_version(row_id.to_string()))
    }

    pub(crate) fn resolve_row_id(
        &self,
        conn: &Connection,
        object_id: &ObjectId,
        vc: FixedVersionCorrection,
    ) -> MasterResult<i64> {
        self.check_scheme(object_id)?;

        let mut stmt = conn.prepare_cached(
            "SELECT doc_id
             FROM documents
             WHERE kind = ?1
               AND doc_oid = ?2
               AND ver_from <= ?3 AND ver_to > ?3
               AND corr_from <= ?4 AND corr_to > ?4
             LIMIT 2;",
        )?;
        let row_ids = stmt
            .query_map(
                params![
                    self.kind,
                    object_id.value,
                    to_micros(vc.version_as_of),
                    to_micros(vc.corrected_to)
                ],
                |row| row.get::<_, i64>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        match row_ids.as_slice() {
            [row_id] => Ok(*row_id),
            [] => Err(MasterError::NotFound(format!(
                "{object_id} at version {} correction {}",
                vc.version_as_of.to_rfc3339(),
                vc.corrected_to.to_rfc3339()
            ))),
            _ => Err(MasterError::InvalidData(format!(
                "several rows of {object_id} overlap at version {} correction {}",
                vc.version_as_of.to_rfc3339(),
                vc.corrected_to.to_rfc3339()
            ))),
        }
    }
}
