//! Generic bitemporal document master.
//!
//! # Responsibility
//! - Provide add/update/correct/remove over one entity kind with full history.
//! - Serve point-in-time reads, name lookups, searches and the audit trail.
//!
//! # Invariants
//! - For one object id, at most one row is visible at any fixed coordinate.
//! - Every mutation runs through [`RetryCoordinator`]; its history event is
//!   written in the same transaction and its change event is published only
//!   after commit.
//! - A stale version token never overwrites; it fails `OptimisticConflict`.
//! - Unchanged content on update/correct is a no-op: no row, no event.
//! - Version replacement only closes corrections, so every earlier
//!   `corrected_to` view stays readable.

use crate::clock::{from_micros, to_micros, Instant};
use crate::context::MasterContext;
use crate::db::OPEN_END_MICROS;
use crate::error::{MasterError, MasterResult};
use crate::model::document::{Document, NameAlias, VersionReplacement};
use crate::model::entity::{name_key, Entity};
use crate::model::history::{HistoryEvent, HistoryEventType, HistoryRequest, HistoryResult};
use crate::model::id::{ObjectId, UniqueId};
use crate::model::search::{DocumentSearchRequest, DocumentSearchResult};
use crate::model::version_correction::VersionCorrection;
use crate::notify::{ChangeEvent, ChangeType};
use crate::repo::history_repo::{EventHistoryRecorder, HistoryEntry};
use crate::repo::resolver::IdentifierResolver;
use crate::repo::retry::RetryCoordinator;
use log::{error, info, warn};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use uuid::Uuid;

const DOCUMENT_SELECT_SQL: &str = "SELECT
    doc_id,
    doc_oid,
    ver_from,
    ver_to,
    corr_from,
    corr_to,
    payload
FROM documents";

/// Read and write contract of a bitemporal master.
pub trait DocumentMaster<E: Entity> {
    /// Document visible at `vc`.
    fn get_by_id(&self, object_id: &ObjectId, vc: VersionCorrection)
        -> MasterResult<Document<E>>;
    /// Exact cell for a versioned id; latest for an unversioned one.
    fn get_by_unique_id(&self, unique_id: &UniqueId) -> MasterResult<Document<E>>;
    /// Live document by current name, or by an active alias.
    fn get_by_name(&self, name: &str) -> MasterResult<Document<E>>;
    fn name_exists(&self, name: &str) -> MasterResult<bool>;
    fn add(&self, entity: E) -> MasterResult<Document<E>>;
    /// Replaces the live version; `unique_id` must carry the live token.
    fn update(&self, unique_id: &UniqueId, entity: E) -> MasterResult<Document<E>>;
    /// Replaces one version's content without moving its version interval.
    fn correct(&self, unique_id: &UniqueId, entity: E) -> MasterResult<Document<E>>;
    /// Ends the live version; returns the closed document.
    fn remove(&self, object_id: &ObjectId) -> MasterResult<Document<E>>;
    fn search(&self, request: &DocumentSearchRequest) -> MasterResult<DocumentSearchResult<E>>;
    fn history(&self, request: &HistoryRequest) -> MasterResult<HistoryResult<E>>;
    fn event_history(&self, object_id: &ObjectId) -> MasterResult<Vec<HistoryEvent>>;
    fn aliases(&self, object_id: &ObjectId) -> MasterResult<Vec<NameAlias>>;
    /// Marks a former name deleted so it stops resolving.
    fn remove_alias(&self, name: &str) -> MasterResult<()>;
    /// Documents for several ids, keyed by the id asked for.
    fn get_many(&self, unique_ids: &[UniqueId]) -> MasterResult<HashMap<UniqueId, Document<E>>>;
    /// Replaces one current version with versions covering the same interval.
    ///
    /// The first replacement must start where the replaced version starts.
    /// An empty list removes the version and the previous version, if any,
    /// absorbs its interval.
    fn replace_version(
        &self,
        unique_id: &UniqueId,
        replacements: Vec<VersionReplacement<E>>,
    ) -> MasterResult<Vec<Document<E>>>;
    fn remove_version(&self, unique_id: &UniqueId) -> MasterResult<Vec<Document<E>>>;
    /// Replaces every current version from the earliest replacement onwards.
    /// The last replacement becomes the live version.
    fn replace_versions(
        &self,
        object_id: &ObjectId,
        replacements: Vec<VersionReplacement<E>>,
    ) -> MasterResult<Vec<Document<E>>>;
    /// Replaces the whole version history; an empty list removes the object.
    fn replace_all_versions(
        &self,
        object_id: &ObjectId,
        replacements: Vec<VersionReplacement<E>>,
    ) -> MasterResult<Vec<Document<E>>>;
    /// Inserts a version that stays live from `replacement.version_from`.
    fn add_version(
        &self,
        object_id: &ObjectId,
        replacement: VersionReplacement<E>,
    ) -> MasterResult<Document<E>>;
}

/// SQLite-backed master for entity kind `E`.
pub struct VersionedStore<'a, E: Entity> {
    conn: &'a Connection,
    ctx: &'a MasterContext,
    retry: RetryCoordinator,
    resolver: IdentifierResolver,
    history: EventHistoryRecorder,
    _entity: PhantomData<fn() -> E>,
}

/// Committed result of one mutation attempt.
struct Mutation<T> {
    output: T,
    /// `None` for a no-op.
    change: Option<ChangeEvent>,
}

/// Log fields describing what a mutation returned.
trait Outcome {
    fn summary(&self) -> String;
}

impl<E> Outcome for Document<E> {
    fn summary(&self) -> String {
        format!("uid={}", self.unique_id)
    }
}

impl<E> Outcome for Vec<Document<E>> {
    fn summary(&self) -> String {
        format!("versions={}", self.len())
    }
}

impl<'a, E: Entity> VersionedStore<'a, E> {
    pub fn new(conn: &'a Connection, ctx: &'a MasterContext) -> Self {
        Self {
            conn,
            ctx,
            retry: ctx.retry_coordinator(),
            resolver: IdentifierResolver::new(E::KIND, E::SCHEME),
            history: EventHistoryRecorder::new(E::KIND),
            _entity: PhantomData,
        }
    }

    pub fn resolver(&self) -> &IdentifierResolver {
        &self.resolver
    }

    fn complete<T: Outcome>(
        &self,
        operation: &'static str,
        started_at: std::time::Instant,
        result: MasterResult<Mutation<T>>,
    ) -> MasterResult<T> {
        match result {
            Ok(Mutation { output, change }) => {
                info!(
                    "event={} module=store status={} kind={} {} duration_ms={}",
                    operation,
                    if change.is_some() { "ok" } else { "noop" },
                    E::KIND,
                    output.summary(),
                    started_at.elapsed().as_millis()
                );
                if let Some(change) = change {
                    self.ctx.notifier().publish(&change);
                }
                Ok(output)
            }
            Err(err) => {
                log_failure(operation, E::KIND, started_at, &err);
                Err(err)
            }
        }
    }

    fn ensure_name_free(
        &self,
        conn: &Connection,
        name: &str,
        owner: Option<&ObjectId>,
    ) -> MasterResult<()> {
        let holder: Option<String> = conn
            .query_row(
                "SELECT doc_oid
                 FROM documents
                 WHERE kind = ?1
                   AND name_key = ?2
                   AND ver_to = ?3
                   AND corr_to = ?3;",
                params![E::KIND, name_key(name), OPEN_END_MICROS],
                |row| row.get(0),
            )
            .optional()?;

        match holder {
            Some(holder) if owner.map_or(true, |owner| owner.value != holder) => {
                Err(MasterError::DuplicateName {
                    kind: E::KIND,
                    name: name.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn load_live(&self, conn: &Connection, object_id: &ObjectId) -> MasterResult<Document<E>> {
        query_documents::<E, _>(
            conn,
            &format!(
                "{DOCUMENT_SELECT_SQL}
                 WHERE kind = ?1 AND doc_oid = ?2 AND ver_to = ?3 AND corr_to = ?3;"
            ),
            params![E::KIND, object_id.value, OPEN_END_MICROS],
        )?
        .pop()
        .ok_or_else(|| MasterError::NotFound(format!("live {} {object_id}", E::KIND)))
    }

    fn load_row(
        &self,
        conn: &Connection,
        object_id: &ObjectId,
        row_id: i64,
    ) -> MasterResult<Document<E>> {
        query_documents::<E, _>(
            conn,
            &format!("{DOCUMENT_SELECT_SQL} WHERE kind = ?1 AND doc_oid = ?2 AND doc_id = ?3;"),
            params![E::KIND, object_id.value, row_id],
        )?
        .pop()
        .ok_or_else(|| MasterError::NotFound(format!("{}~{row_id}", object_id)))
    }

    fn object_exists(&self, object_id: &ObjectId) -> MasterResult<()> {
        self.resolver.check_scheme(object_id)?;
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE kind = ?1 AND doc_oid = ?2);",
            params![E::KIND, object_id.value],
            |row| row.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(MasterError::NotFound(format!("{} {object_id}", E::KIND)))
        }
    }

    fn upsert_alias(
        &self,
        conn: &Connection,
        name: &str,
        object_id: &ObjectId,
        now: Instant,
    ) -> MasterResult<()> {
        conn.execute(
            "INSERT INTO name_aliases (kind, alias_key, alias, doc_oid, is_deleted, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)
             ON CONFLICT (kind, alias_key) DO UPDATE SET
                alias = excluded.alias,
                doc_oid = excluded.doc_oid,
                is_deleted = 0,
                updated_at = excluded.updated_at;",
            params![
                E::KIND,
                name_key(name),
                name,
                object_id.value,
                to_micros(now)
            ],
        )?;
        Ok(())
    }

    fn insert_row(
        &self,
        conn: &Connection,
        object_id: &ObjectId,
        cell: Cell,
        entity: &E,
    ) -> MasterResult<Document<E>> {
        let payload = serde_json::to_string(entity)?;
        conn.execute(
            "INSERT INTO documents (
                kind,
                doc_oid,
                ver_from,
                ver_to,
                corr_from,
                corr_to,
                name,
                name_key,
                payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                E::KIND,
                object_id.value,
                to_micros(cell.version_from),
                to_open_end(cell.version_to),
                to_micros(cell.correction_from),
                OPEN_END_MICROS,
                entity.name(),
                name_key(entity.name()),
                payload,
            ],
        )?;

        Ok(Document {
            unique_id: object_id.at_version(conn.last_insert_rowid().to_string()),
            version_from: cell.version_from,
            version_to: cell.version_to,
            correction_from: cell.correction_from,
            correction_to: None,
            entity: entity.clone(),
        })
    }

    fn record(
        &self,
        conn: &Connection,
        document: &Document<E>,
        event_type: HistoryEventType,
        instant: Instant,
        changes: Vec<String>,
    ) -> MasterResult<()> {
        let row_id = row_id_of(&document.unique_id)?;
        self.history.record(
            conn,
            &HistoryEntry {
                object_id: &document.object_id(),
                row_id,
                event_type,
                actor: self.ctx.actor(),
                instant,
                changes,
            },
        )?;
        Ok(())
    }

    /// Conflict for a token whose correction was already superseded.
    fn superseded(
        &self,
        conn: &Connection,
        unique_id: &UniqueId,
        target: &Document<E>,
    ) -> MasterResult<MasterError> {
        let object_id = target.object_id();
        let current: Option<i64> = conn
            .query_row(
                "SELECT doc_id FROM documents
                 WHERE kind = ?1 AND doc_oid = ?2 AND ver_from = ?3 AND corr_to = ?4;",
                params![
                    E::KIND,
                    object_id.value,
                    to_micros(target.version_from),
                    OPEN_END_MICROS
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(MasterError::OptimisticConflict {
            supplied: unique_id.to_string(),
            current: current.map_or_else(
                || "none".to_string(),
                |id| object_id.at_version(id.to_string()).to_string(),
            ),
        })
    }

    /// Current-correction rows whose version interval ends after `after`.
    fn current_versions(
        &self,
        conn: &Connection,
        object_id: &ObjectId,
        after: Option<Instant>,
    ) -> MasterResult<Vec<Document<E>>> {
        query_documents::<E, _>(
            conn,
            &format!(
                "{DOCUMENT_SELECT_SQL}
                 WHERE kind = ?1 AND doc_oid = ?2 AND corr_to = ?3 AND ver_to > ?4
                 ORDER BY ver_from ASC;"
            ),
            params![
                E::KIND,
                object_id.value,
                OPEN_END_MICROS,
                after.map_or(i64::MIN, to_micros)
            ],
        )
    }

    /// Inserts `ordered` as consecutive versions ending at `until`.
    ///
    /// Each new row gets a `CHANGED` event diffed against the replaced row
    /// that covered its start.
    fn write_versions(
        &self,
        conn: &Connection,
        object_id: &ObjectId,
        ordered: &[VersionReplacement<E>],
        until: Option<Instant>,
        replaced: &[Document<E>],
        now: Instant,
    ) -> MasterResult<Vec<Document<E>>> {
        if let (Some(last), Some(until)) = (ordered.last(), until) {
            if last.version_from >= until {
                return Err(MasterError::Validation(format!(
                    "replacement at {} starts after the replaced range ends at {}",
                    last.version_from.to_rfc3339(),
                    until.to_rfc3339()
                )));
            }
        }
        if let Some(live) = ordered.last().filter(|_| until.is_none()) {
            self.ensure_name_free(conn, live.entity.name(), Some(object_id))?;
        }

        let mut written = Vec::with_capacity(ordered.len());
        for (index, replacement) in ordered.iter().enumerate() {
            let cell = Cell {
                version_from: replacement.version_from,
                version_to: ordered
                    .get(index + 1)
                    .map(|next| next.version_from)
                    .or(until),
                correction_from: now,
            };
            let document = self.insert_row(conn, object_id, cell, &replacement.entity)?;
            let changes = replaced
                .iter()
                .find(|old| {
                    old.version_from <= cell.version_from
                        && old.version_to.map_or(true, |to| cell.version_from < to)
                })
                .or_else(|| replaced.first())
                .map(|old| EventHistoryRecorder::describe_changes(&old.entity, &document.entity))
                .unwrap_or_default();
            self.record(conn, &document, HistoryEventType::Changed, now, changes)?;
            written.push(document);
        }

        if let Some(live) = written.last().filter(|document| document.version_to.is_none()) {
            self.upsert_alias(conn, live.entity.name(), object_id, now)?;
        }
        Ok(written)
    }

    fn replace_one(
        &self,
        operation: &'static str,
        unique_id: &UniqueId,
        replacements: Vec<VersionReplacement<E>>,
    ) -> MasterResult<Vec<Document<E>>> {
        let started_at = std::time::Instant::now();
        let object_id = unique_id.object_id();
        let precheck = self
            .resolver
            .check_scheme(&object_id)
            .and_then(|()| row_id_of(unique_id))
            .and_then(|row_id| order_replacements(replacements).map(|ordered| (row_id, ordered)));
        let (row_id, ordered) = match precheck {
            Ok(checked) => checked,
            Err(err) => return self.complete(operation, started_at, Err(err)),
        };

        let result = self.retry.execute(self.conn, operation, |tx| {
            let now = self.ctx.now();
            let stored = self.load_row(tx, &object_id, row_id)?;
            if stored.correction_to.is_some() {
                return Err(self.superseded(tx, unique_id, &stored)?);
            }
            if let Some(first) = ordered.first() {
                if first.version_from != stored.version_from {
                    return Err(MasterError::Validation(format!(
                        "first replacement must start at {}, got {}",
                        stored.version_from.to_rfc3339(),
                        first.version_from.to_rfc3339()
                    )));
                }
            }
            close_correction(tx, row_id, now)?;
            let changed = |version_instant| {
                Some(ChangeEvent {
                    change_type: ChangeType::Changed,
                    object_id: object_id.clone(),
                    version_instant,
                    correction_instant: now,
                })
            };

            if !ordered.is_empty() {
                let written = self.write_versions(
                    tx,
                    &object_id,
                    &ordered,
                    stored.version_to,
                    std::slice::from_ref(&stored),
                    now,
                )?;
                return Ok(Mutation {
                    output: written,
                    change: changed(stored.version_from),
                });
            }

            let previous = query_documents::<E, _>(
                tx,
                &format!(
                    "{DOCUMENT_SELECT_SQL}
                     WHERE kind = ?1 AND doc_oid = ?2 AND corr_to = ?3 AND ver_to = ?4;"
                ),
                params![
                    E::KIND,
                    object_id.value,
                    OPEN_END_MICROS,
                    to_micros(stored.version_from)
                ],
            )?
            .pop();
            match previous {
                Some(previous) => {
                    close_correction(tx, row_id_of(&previous.unique_id)?, now)?;
                    let extended = [VersionReplacement::new(
                        previous.version_from,
                        previous.entity.clone(),
                    )];
                    let written = self.write_versions(
                        tx,
                        &object_id,
                        &extended,
                        stored.version_to,
                        std::slice::from_ref(&stored),
                        now,
                    )?;
                    Ok(Mutation {
                        output: written,
                        change: changed(previous.version_from),
                    })
                }
                None => {
                    self.record(tx, &stored, HistoryEventType::Removed, now, Vec::new())?;
                    Ok(Mutation {
                        output: Vec::new(),
                        change: Some(ChangeEvent {
                            change_type: ChangeType::Removed,
                            object_id: object_id.clone(),
                            version_instant: stored.version_from,
                            correction_instant: now,
                        }),
                    })
                }
            }
        });
        self.complete(operation, started_at, result)
    }
}

/// Intervals of a row about to be inserted; correction is always open.
#[derive(Debug, Clone, Copy)]
struct Cell {
    version_from: Instant,
    version_to: Option<Instant>,
    correction_from: Instant,
}

impl<E: Entity> DocumentMaster<E> for VersionedStore<'_, E> {
    fn get_by_id(
        &self,
        object_id: &ObjectId,
        vc: VersionCorrection,
    ) -> MasterResult<Document<E>> {
        let fixed = self.ctx.fix(vc);
        let row_id = self.resolver.resolve_row_id(self.conn, object_id, fixed)?;
        self.load_row(self.conn, object_id, row_id)
    }

    fn get_by_unique_id(&self, unique_id: &UniqueId) -> MasterResult<Document<E>> {
        let object_id = unique_id.object_id();
        self.resolver.check_scheme(&object_id)?;
        match unique_id.version_token {
            Some(_) => self.load_row(self.conn, &object_id, row_id_of(unique_id)?),
            None => self.get_by_id(&object_id, VersionCorrection::LATEST),
        }
    }

    fn get_by_name(&self, name: &str) -> MasterResult<Document<E>> {
        let key = name_key(name);
        let live = query_documents::<E, _>(
            self.conn,
            &format!(
                "{DOCUMENT_SELECT_SQL}
                 WHERE kind = ?1 AND name_key = ?2 AND ver_to = ?3 AND corr_to = ?3;"
            ),
            params![E::KIND, key, OPEN_END_MICROS],
        )?;
        if let Some(document) = live.into_iter().next() {
            return Ok(document);
        }

        let alias: Option<(String, bool)> = self
            .conn
            .query_row(
                "SELECT doc_oid, is_deleted FROM name_aliases WHERE kind = ?1 AND alias_key = ?2;",
                params![E::KIND, key],
                |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
            )
            .optional()?;

        let not_found = || MasterError::NotFound(format!("{} name `{name}`", E::KIND));
        match alias {
            // Active aliases redirect to the current version of their owner.
            Some((oid, false)) => {
                match self.load_live(self.conn, &ObjectId::new(E::SCHEME, oid)) {
                    Err(MasterError::NotFound(_)) => Err(not_found()),
                    other => other,
                }
            }
            _ => Err(not_found()),
        }
    }

    fn name_exists(&self, name: &str) -> MasterResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM documents
                WHERE kind = ?1 AND name_key = ?2 AND ver_to = ?3 AND corr_to = ?3
            );",
            params![E::KIND, name_key(name), OPEN_END_MICROS],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn add(&self, entity: E) -> MasterResult<Document<E>> {
        let started_at = std::time::Instant::now();
        if let Err(message) = entity.validate() {
            return self.complete("doc_add", started_at, Err(MasterError::Validation(message)));
        }

        let result = self.retry.execute(self.conn, "doc_add", |tx| {
            let now = self.ctx.now();
            self.ensure_name_free(tx, entity.name(), None)?;

            let object_id = ObjectId::new(E::SCHEME, Uuid::new_v4().to_string());
            let cell = Cell {
                version_from: now,
                version_to: None,
                correction_from: now,
            };
            let document = self.insert_row(tx, &object_id, cell, &entity)?;
            self.upsert_alias(tx, entity.name(), &object_id, now)?;
            self.record(tx, &document, HistoryEventType::Added, now, Vec::new())?;

            Ok(Mutation {
                change: Some(ChangeEvent {
                    change_type: ChangeType::Added,
                    object_id,
                    version_instant: now,
                    correction_instant: now,
                }),
                output: document,
            })
        });
        self.complete("doc_add", started_at, result)
    }

    fn update(&self, unique_id: &UniqueId, entity: E) -> MasterResult<Document<E>> {
        let started_at = std::time::Instant::now();
        let object_id = unique_id.object_id();
        let precheck = self
            .resolver
            .check_scheme(&object_id)
            .and_then(|()| require_token(unique_id))
            .and_then(|_| entity.validate().map_err(MasterError::Validation));
        if let Err(err) = precheck {
            return self.complete("doc_update", started_at, Err(err));
        }

        let result = self.retry.execute(self.conn, "doc_update", |tx| {
            let now = self.ctx.now();
            let current = self.load_live(tx, &object_id)?;
            if current.unique_id != *unique_id {
                return Err(MasterError::OptimisticConflict {
                    supplied: unique_id.to_string(),
                    current: current.unique_id.to_string(),
                });
            }
            if current.entity == entity {
                return Ok(Mutation {
                    output: current,
                    change: None,
                });
            }

            let renamed = name_key(current.entity.name()) != name_key(entity.name());
            if renamed {
                self.ensure_name_free(tx, entity.name(), Some(&object_id))?;
            }

            close_version(tx, row_id_of(&current.unique_id)?, now)?;
            let cell = Cell {
                version_from: now,
                version_to: None,
                correction_from: now,
            };
            let document = self.insert_row(tx, &object_id, cell, &entity)?;
            if renamed {
                self.upsert_alias(tx, entity.name(), &object_id, now)?;
            }
            let changes = EventHistoryRecorder::describe_changes(&current.entity, &entity);
            self.record(tx, &document, HistoryEventType::Changed, now, changes)?;

            Ok(Mutation {
                change: Some(ChangeEvent {
                    change_type: ChangeType::Changed,
                    object_id: object_id.clone(),
                    version_instant: now,
                    correction_instant: now,
                }),
                output: document,
            })
        });
        self.complete("doc_update", started_at, result)
    }

    fn correct(&self, unique_id: &UniqueId, entity: E) -> MasterResult<Document<E>> {
        let started_at = std::time::Instant::now();
        let object_id = unique_id.object_id();
        let precheck = self
            .resolver
            .check_scheme(&object_id)
            .and_then(|()| row_id_of(unique_id))
            .and_then(|row_id| {
                entity
                    .validate()
                    .map(|()| row_id)
                    .map_err(MasterError::Validation)
            });
        let row_id = match precheck {
            Ok(row_id) => row_id,
            Err(err) => return self.complete("doc_correct", started_at, Err(err)),
        };

        let result = self.retry.execute(self.conn, "doc_correct", |tx| {
            let now = self.ctx.now();
            let target = self.load_row(tx, &object_id, row_id)?;
            if target.correction_to.is_some() {
                return Err(self.superseded(tx, unique_id, &target)?);
            }
            if target.entity == entity {
                return Ok(Mutation {
                    output: target,
                    change: None,
                });
            }

            let renamed_live = target.is_live()
                && name_key(target.entity.name()) != name_key(entity.name());
            if renamed_live {
                self.ensure_name_free(tx, entity.name(), Some(&object_id))?;
            }

            close_correction(tx, row_id, now)?;
            let cell = Cell {
                version_from: target.version_from,
                version_to: target.version_to,
                correction_from: now,
            };
            let document = self.insert_row(tx, &object_id, cell, &entity)?;
            if renamed_live {
                self.upsert_alias(tx, entity.name(), &object_id, now)?;
            }
            let changes = EventHistoryRecorder::describe_changes(&target.entity, &entity);
            self.record(tx, &document, HistoryEventType::Corrected, now, changes)?;

            Ok(Mutation {
                change: Some(ChangeEvent {
                    change_type: ChangeType::Corrected,
                    object_id: object_id.clone(),
                    version_instant: target.version_from,
                    correction_instant: now,
                }),
                output: document,
            })
        });
        self.complete("doc_correct", started_at, result)
    }

    fn remove(&self, object_id: &ObjectId) -> MasterResult<Document<E>> {
        let started_at = std::time::Instant::now();
        if let Err(err) = self.resolver.check_scheme(object_id) {
            return self.complete("doc_remove", started_at, Err(err));
        }

        let result = self.retry.execute(self.conn, "doc_remove", |tx| {
            let now = self.ctx.now();
            let mut current = self.load_live(tx, object_id)?;
            close_version(tx, row_id_of(&current.unique_id)?, now)?;
            current.version_to = Some(now);
            self.record(tx, &current, HistoryEventType::Removed, now, Vec::new())?;

            Ok(Mutation {
                change: Some(ChangeEvent {
                    change_type: ChangeType::Removed,
                    object_id: object_id.clone(),
                    version_instant: now,
                    correction_instant: now,
                }),
                output: current,
            })
        });
        self.complete("doc_remove", started_at, result)
    }

    fn search(&self, request: &DocumentSearchRequest) -> MasterResult<DocumentSearchResult<E>> {
        let started_at = std::time::Instant::now();
        let fixed = self.ctx.fix(request.version_correction);
        let name_pattern = request
            .name
            .as_deref()
            .map(wildcard_regex)
            .transpose()?;
        let wanted: Option<BTreeSet<&str>> = match &request.object_ids {
            Some(ids) => {
                for id in ids {
                    self.resolver.check_scheme(id)?;
                }
                Some(ids.iter().map(|id| id.value.as_str()).collect())
            }
            None => None,
        };

        let visible = query_documents::<E, _>(
            self.conn,
            &format!(
                "{DOCUMENT_SELECT_SQL}
                 WHERE kind = ?1
                   AND ver_from <= ?2 AND ver_to > ?2
                   AND corr_from <= ?3 AND corr_to > ?3
                 ORDER BY name_key ASC, doc_oid ASC;"
            ),
            params![
                E::KIND,
                to_micros(fixed.version_as_of),
                to_micros(fixed.corrected_to)
            ],
        )?;

        let matches: Vec<Document<E>> = visible
            .into_iter()
            .filter(|document| {
                wanted
                    .as_ref()
                    .map_or(true, |ids| ids.contains(document.unique_id.object_id.as_str()))
            })
            .filter(|document| {
                name_pattern
                    .as_ref()
                    .map_or(true, |pattern| pattern.is_match(document.entity.name()))
            })
            .collect();
        let (documents, paging) = request.paging.select(matches);

        info!(
            "event=doc_search module=store status=ok kind={} total={} returned={} duration_ms={}",
            E::KIND,
            paging.total_items,
            documents.len(),
            started_at.elapsed().as_millis()
        );
        Ok(DocumentSearchResult {
            documents,
            paging,
            version_correction: fixed,
        })
    }

    fn history(&self, request: &HistoryRequest) -> MasterResult<HistoryResult<E>> {
        self.object_exists(&request.object_id)?;
        for (label, from, to) in [
            ("versions", request.versions_from, request.versions_to),
            ("corrections", request.corrections_from, request.corrections_to),
        ] {
            if let (Some(from), Some(to)) = (from, to) {
                if from > to {
                    return Err(MasterError::Validation(format!(
                        "{label} window is inverted: {} > {}",
                        from.to_rfc3339(),
                        to.to_rfc3339()
                    )));
                }
            }
        }

        let rows = query_documents::<E, _>(
            self.conn,
            &format!(
                "{DOCUMENT_SELECT_SQL}
                 WHERE kind = ?1
                   AND doc_oid = ?2
                   AND (?3 IS NULL OR ver_to > ?3)
                   AND (?4 IS NULL OR ver_from <= ?4)
                   AND (?5 IS NULL OR corr_to > ?5)
                   AND (?6 IS NULL OR corr_from <= ?6)
                 ORDER BY ver_from DESC, corr_from DESC;"
            ),
            params![
                E::KIND,
                request.object_id.value,
                request.versions_from.map(to_micros),
                request.versions_to.map(to_micros),
                request.corrections_from.map(to_micros),
                request.corrections_to.map(to_micros),
            ],
        )?;
        let (documents, paging) = request.paging.select(rows);
        Ok(HistoryResult { documents, paging })
    }

    fn event_history(&self, object_id: &ObjectId) -> MasterResult<Vec<HistoryEvent>> {
        self.object_exists(object_id)?;
        self.history.event_history(self.conn, object_id)
    }

    fn aliases(&self, object_id: &ObjectId) -> MasterResult<Vec<NameAlias>> {
        self.object_exists(object_id)?;
        let mut stmt = self.conn.prepare_cached(
            "SELECT alias, is_deleted, updated_at
             FROM name_aliases
             WHERE kind = ?1 AND doc_oid = ?2
             ORDER BY updated_at ASC, alias_key ASC;",
        )?;
        let aliases = stmt
            .query_map(params![E::KIND, object_id.value], |row| {
                Ok(NameAlias {
                    name: row.get(0)?,
                    object_id: object_id.clone(),
                    deleted: row.get::<_, i64>(1)? != 0,
                    updated_at: from_micros(row.get(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(aliases)
    }

    fn remove_alias(&self, name: &str) -> MasterResult<()> {
        let started_at = std::time::Instant::now();
        let key = name_key(name);
        let result = self.retry.execute(self.conn, "doc_remove_alias", |tx| {
            let now = self.ctx.now();
            let alias: Option<(String, bool)> = tx
                .query_row(
                    "SELECT doc_oid, is_deleted FROM name_aliases WHERE kind = ?1 AND alias_key = ?2;",
                    params![E::KIND, key],
                    |row| Ok((row.get(0)?, row.get::<_, i64>(1)? != 0)),
                )
                .optional()?;
            let oid = match alias {
                Some((oid, false)) => oid,
                _ => {
                    return Err(MasterError::NotFound(format!(
                        "{} alias `{name}`",
                        E::KIND
                    )))
                }
            };

            let owner = ObjectId::new(E::SCHEME, oid);
            match self.load_live(tx, &owner) {
                Ok(live) if name_key(live.entity.name()) == key => {
                    return Err(MasterError::Validation(format!(
                        "`{name}` is the current name of {owner}"
                    )));
                }
                Ok(_) | Err(MasterError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }

            tx.execute(
                "UPDATE name_aliases
                 SET is_deleted = 1, updated_at = ?3
                 WHERE kind = ?1 AND alias_key = ?2;",
                params![E::KIND, key, to_micros(now)],
            )?;
            Ok(owner)
        });

        match result {
            Ok(owner) => {
                info!(
                    "event=doc_remove_alias module=store status=ok kind={} oid={} duration_ms={}",
                    E::KIND,
                    owner,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                log_failure("doc_remove_alias", E::KIND, started_at, &err);
                Err(err)
            }
        }
    }

    fn get_many(&self, unique_ids: &[UniqueId]) -> MasterResult<HashMap<UniqueId, Document<E>>> {
        unique_ids
            .iter()
            .map(|unique_id| {
                self.get_by_unique_id(unique_id)
                    .map(|document| (unique_id.clone(), document))
            })
            .collect()
    }

    fn replace_version(
        &self,
        unique_id: &UniqueId,
        replacements: Vec<VersionReplacement<E>>,
    ) -> MasterResult<Vec<Document<E>>> {
        self.replace_one("doc_replace_version", unique_id, replacements)
    }

    fn remove_version(&self, unique_id: &UniqueId) -> MasterResult<Vec<Document<E>>> {
        self.replace_one("doc_remove_version", unique_id, Vec::new())
    }

    fn replace_versions(
        &self,
        object_id: &ObjectId,
        replacements: Vec<VersionReplacement<E>>,
    ) -> MasterResult<Vec<Document<E>>> {
        let started_at = std::time::Instant::now();
        let precheck = self
            .object_exists(object_id)
            .and_then(|()| order_replacements(replacements));
        let ordered = match precheck {
            Ok(ordered) => ordered,
            Err(err) => return self.complete("doc_replace_versions", started_at, Err(err)),
        };
        let Some(lowest) = ordered.first().map(|first| first.version_from) else {
            let noop = Mutation {
                output: Vec::new(),
                change: None,
            };
            return self.complete("doc_replace_versions", started_at, Ok(noop));
        };

        let result = self.retry.execute(self.conn, "doc_replace_versions", |tx| {
            let now = self.ctx.now();
            let replaced = self.current_versions(tx, object_id, Some(lowest))?;
            for document in &replaced {
                close_correction(tx, row_id_of(&document.unique_id)?, now)?;
            }
            // The version that straddles `lowest` keeps its earlier part.
            if let Some(earliest) = replaced.first().filter(|first| first.version_from < lowest) {
                let cell = Cell {
                    version_from: earliest.version_from,
                    version_to: Some(lowest),
                    correction_from: now,
                };
                self.insert_row(tx, object_id, cell, &earliest.entity)?;
            }
            let written = self.write_versions(tx, object_id, &ordered, None, &replaced, now)?;

            Ok(Mutation {
                output: written,
                change: Some(ChangeEvent {
                    change_type: ChangeType::Changed,
                    object_id: object_id.clone(),
                    version_instant: lowest,
                    correction_instant: now,
                }),
            })
        });
        self.complete("doc_replace_versions", started_at, result)
    }

    fn replace_all_versions(
        &self,
        object_id: &ObjectId,
        replacements: Vec<VersionReplacement<E>>,
    ) -> MasterResult<Vec<Document<E>>> {
        let started_at = std::time::Instant::now();
        let precheck = self
            .object_exists(object_id)
            .and_then(|()| order_replacements(replacements));
        let ordered = match precheck {
            Ok(ordered) => ordered,
            Err(err) => return self.complete("doc_replace_all_versions", started_at, Err(err)),
        };

        let result = self.retry.execute(self.conn, "doc_replace_all_versions", |tx| {
            let now = self.ctx.now();
            let replaced = self.current_versions(tx, object_id, None)?;
            for document in &replaced {
                close_correction(tx, row_id_of(&document.unique_id)?, now)?;
            }

            let Some(first) = ordered.first() else {
                let Some(last) = replaced.last() else {
                    return Ok(Mutation {
                        output: Vec::new(),
                        change: None,
                    });
                };
                self.record(tx, last, HistoryEventType::Removed, now, Vec::new())?;
                return Ok(Mutation {
                    output: Vec::new(),
                    change: Some(ChangeEvent {
                        change_type: ChangeType::Removed,
                        object_id: object_id.clone(),
                        version_instant: now,
                        correction_instant: now,
                    }),
                });
            };

            let version_instant = first.version_from;
            let written = self.write_versions(tx, object_id, &ordered, None, &replaced, now)?;
            Ok(Mutation {
                output: written,
                change: Some(ChangeEvent {
                    change_type: ChangeType::Changed,
                    object_id: object_id.clone(),
                    version_instant,
                    correction_instant: now,
                }),
            })
        });
        self.complete("doc_replace_all_versions", started_at, result)
    }

    fn add_version(
        &self,
        object_id: &ObjectId,
        replacement: VersionReplacement<E>,
    ) -> MasterResult<Document<E>> {
        self.replace_versions(object_id, vec![replacement])?
            .pop()
            .ok_or_else(|| MasterError::InvalidData(format!("no version written for {object_id}")))
    }
}

/// Validates `replacements` and sorts them by version start.
fn order_replacements<E: Entity>(
    replacements: Vec<VersionReplacement<E>>,
) -> MasterResult<Vec<VersionReplacement<E>>> {
    let mut ordered = Vec::with_capacity(replacements.len());
    for replacement in replacements {
        replacement.entity.validate().map_err(MasterError::Validation)?;
        // Stored instants carry microseconds only.
        let version_from = from_micros(to_micros(replacement.version_from));
        ordered.push(VersionReplacement::new(version_from, replacement.entity));
    }
    ordered.sort_by_key(|replacement| replacement.version_from);
    if let Some(pair) = ordered
        .windows(2)
        .find(|pair| pair[0].version_from == pair[1].version_from)
    {
        return Err(MasterError::Validation(format!(
            "two replacements start at {}",
            pair[0].version_from.to_rfc3339()
        )));
    }
    Ok(ordered)
}

fn log_failure(operation: &str, kind: &str, started_at: std::time::Instant, err: &MasterError) {
    match err {
        MasterError::Db(_)
        | MasterError::Serialization(_)
        | MasterError::InvalidData(_)
        | MasterError::Contention { .. } => error!(
            "event={} module=store status=error kind={} duration_ms={} error_code={} error={}",
            operation,
            kind,
            started_at.elapsed().as_millis(),
            err.code(),
            err
        ),
        _ => warn!(
            "event={} module=store status=rejected kind={} duration_ms={} error_code={}",
            operation,
            kind,
            started_at.elapsed().as_millis(),
            err.code()
        ),
    }
}

fn query_documents<E: Entity, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> MasterResult<Vec<Document<E>>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params)?;
    let mut documents = Vec::new();
    while let Some(row) = rows.next()? {
        documents.push(parse_document_row(row)?);
    }
    Ok(documents)
}

fn parse_document_row<E: Entity>(row: &Row<'_>) -> MasterResult<Document<E>> {
    let row_id: i64 = row.get("doc_id")?;
    let oid: String = row.get("doc_oid")?;
    let payload: String = row.get("payload")?;
    let entity: E = serde_json::from_str(&payload).map_err(|err| {
        MasterError::InvalidData(format!(
            "invalid {} payload in documents.payload for row {row_id}: {err}",
            E::KIND
        ))
    })?;

    Ok(Document {
        unique_id: UniqueId::of(E::SCHEME, oid, Some(row_id.to_string())),
        version_from: from_micros(row.get("ver_from")?),
        version_to: from_open_end(row.get("ver_to")?),
        correction_from: from_micros(row.get("corr_from")?),
        correction_to: from_open_end(row.get("corr_to")?),
        entity,
    })
}

fn close_version(conn: &Connection, row_id: i64, now: Instant) -> MasterResult<()> {
    let changed = conn.execute(
        "UPDATE documents SET ver_to = ?2 WHERE doc_id = ?1 AND ver_to = ?3 AND corr_to = ?3;",
        params![row_id, to_micros(now), OPEN_END_MICROS],
    )?;
    if changed == 0 {
        return Err(MasterError::InvalidData(format!(
            "row {row_id} is not the live version"
        )));
    }
    Ok(())
}

fn close_correction(conn: &Connection, row_id: i64, now: Instant) -> MasterResult<()> {
    let changed = conn.execute(
        "UPDATE documents SET corr_to = ?2 WHERE doc_id = ?1 AND corr_to = ?3;",
        params![row_id, to_micros(now), OPEN_END_MICROS],
    )?;
    if changed == 0 {
        return Err(MasterError::InvalidData(format!(
            "row {row_id} is not the current correction"
        )));
    }
    Ok(())
}

fn require_token(unique_id: &UniqueId) -> MasterResult<&str> {
    unique_id.version_token.as_deref().ok_or_else(|| {
        MasterError::Validation(format!(
            "`{unique_id}` must carry the version token last read"
        ))
    })
}

fn row_id_of(unique_id: &UniqueId) -> MasterResult<i64> {
    let token = require_token(unique_id)?;
    token
        .parse::<i64>()
        .map_err(|_| MasterError::NotFound(format!("{unique_id}")))
}

fn from_open_end(micros: i64) -> Option<Instant> {
    (micros != OPEN_END_MICROS).then(|| from_micros(micros))
}

fn to_open_end(instant: Option<Instant>) -> i64 {
    instant.map_or(OPEN_END_MICROS, to_micros)
}

/// Compiles a `*`/`?` wildcard pattern into a case-insensitive full match.
pub(crate) fn wildcard_regex(pattern: &str) -> MasterResult<Regex> {
    let mut expression = String::from("(?i)^");
    for ch in pattern.trim().chars() {
        match ch {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&expression)
        .map_err(|err| MasterError::Validation(format!("invalid name pattern `{pattern}`: {err}")))
}

#[cfg(test)]
mod tests {
    use super::wildcard_regex;

    #[test]
    fn wildcard_matches_case_insensitively() {
        let pattern = wildcard_regex("al*").unwrap();
        assert!(pattern.is_match("Alice"));
        assert!(pattern.is_match("al"));
        assert!(!pattern.is_match("bal"));

        let single = wildcard_regex("b?b").unwrap();
        assert!(single.is_match("BOB"));
        assert!(!single.is_match("boob"));
    }

    #[test]
    fn wildcard_escapes_regex_metacharacters() {
        let pattern = wildcard_regex("a.b+").unwrap();
        assert!(pattern.is_match("A.B+"));
        assert!(!pattern.is_match("axbb"));
    }
}
