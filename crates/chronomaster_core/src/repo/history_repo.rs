//! Field-level audit trail.
//!
//! # Responsibility
//! - Derive ordered change descriptions from two entity snapshots.
//! - Persist one event per written version, inside the mutation's
//!   transaction.
//!
//! # Invariants
//! - Scalar changes read `Changed <field>: <old> -> <new>`.
//! - Collection changes read `Added <field>: <x>` / `Removed <field>: <x>`.
//! - Events are returned in commit order, oldest first, each with its full
//!   change list. A late correction of an old version sorts last.

use crate::clock::{from_micros, to_micros, Instant};
use crate::error::{MasterError, MasterResult};
use crate::model::entity::{Entity, FieldDescriptor};
use crate::model::history::{HistoryEvent, HistoryEventType};
use crate::model::id::ObjectId;
use rusqlite::{params, Connection};

/// Event to persist for one committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry<'a> {
    pub object_id: &'a ObjectId,
    /// Row produced by the mutation, or closed by a removal.
    pub row_id: i64,
    pub event_type: HistoryEventType,
    pub actor: &'a str,
    pub instant: Instant,
    pub changes: Vec<String>,
}

/// Recorder for one document kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHistoryRecorder {
    kind: &'static str,
}

impl EventHistoryRecorder {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }

    /// Lists field changes from `old` to `new` in field declaration order.
    pub fn describe_changes<E: Entity>(old: &E, new: &E) -> Vec<String> {
        let mut changes = Vec::new();
        for field in E::FIELDS {
            match field {
                FieldDescriptor::Scalar { name, read } => {
                    let (before, after) = (read(old), read(new));
                    if before != after {
                        changes.push(format!("Changed {name}: {before} -> {after}"));
                    }
                }
                FieldDescriptor::Collection { name, read } => {
                    let (before, after) = (read(old), read(new));
                    changes.extend(
                        after
                            .difference(&before)
                            .map(|item| format!("Added {name}: {item}")),
                    );
                    changes.extend(
                        before
                            .difference(&after)
                            .map(|item| format!("Removed {name}: {item}")),
                    );
                }
            }
        }
        changes
    }

    /// Writes `entry`; call inside the mutation's transaction.
    pub fn record(&self, conn: &Connection, entry: &HistoryEntry<'_>) -> MasterResult<i64> {
        conn.execute(
            "INSERT INTO history_events (kind, doc_oid, doc_id, event_type, actor, event_instant)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                self.kind,
                entry.object_id.value,
                entry.row_id,
                entry.event_type.as_db(),
                entry.actor,
                to_micros(entry.instant),
            ],
        )?;
        let event_id = conn.last_insert_rowid();

        let mut stmt = conn.prepare_cached(
            "INSERT INTO history_changes (event_id, seq, description) VALUES (?1, ?2, ?3);",
        )?;
        for (seq, description) in entry.changes.iter().enumerate() {
            stmt.execute(params![event_id, seq as i64, description])?;
        }

        Ok(event_id)
    }

    /// Returns every event of `object_id`, oldest first.
    pub fn event_history(
        &self,
        conn: &Connection,
        object_id: &ObjectId,
    ) -> MasterResult<Vec<HistoryEvent>> {
        let mut stmt = conn.prepare_cached(
            "SELECT e.event_id, e.doc_id, e.event_type, e.actor, e.event_instant, c.description
             FROM history_events e
             LEFT JOIN history_changes c ON c.event_id = e.event_id
             WHERE e.kind = ?1 AND e.doc_oid = ?2
             ORDER BY e.event_instant ASC, e.event_id ASC, c.seq ASC;",
        )?;
        let mut rows = stmt.query(params![self.kind, object_id.value])?;

        let mut events: Vec<HistoryEvent> = Vec::new();
        let mut current_event_id: Option<i64> = None;
        while let Some(row) = rows.next()? {
            let event_id: i64 = row.get(0)?;
            let description: Option<String> = row.get(5)?;

            if current_event_id != Some(event_id) {
                let type_text: String = row.get(2)?;
                let event_type = HistoryEventType::from_db(&type_text).ok_or_else(|| {
                    MasterError::InvalidData(format!(
                        "invalid event type `{type_text}` in history_events.event_type"
                    ))
                })?;
                events.push(HistoryEvent {
                    unique_id: object_id.at_version(row.get::<_, i64>(1)?.to_string()),
                    event_type,
                    actor: row.get(3)?,
                    instant: from_micros(row.get(4)?),
                    changes: Vec::new(),
                });
                current_event_id = Some(event_id);
            }

            if let (Some(description), Some(event)) = (description, events.last_mut()) {
                event.changes.push(description);
            }
        }

        Ok(events)
    }
}
