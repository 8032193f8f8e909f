//! Audit trail records and query shapes.

use crate::clock::Instant;
use crate::model::document::Document;
use crate::model::id::{ObjectId, UniqueId};
use crate::model::paging::{Paging, PagingRequest};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Kind of committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEventType {
    Added,
    Changed,
    Corrected,
    Removed,
}

impl HistoryEventType {
    pub(crate) fn as_db(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Changed => "changed",
            Self::Corrected => "corrected",
            Self::Removed => "removed",
        }
    }

    pub(crate) fn from_db(value: &str) -> Option<Self> {
        match value {
            "added" => Some(Self::Added),
            "changed" => Some(Self::Changed),
            "corrected" => Some(Self::Corrected),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

impl Display for HistoryEventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Added => "ADDED",
            Self::Changed => "CHANGED",
            Self::Corrected => "CORRECTED",
            Self::Removed => "REMOVED",
        };
        f.write_str(text)
    }
}

/// One audited mutation with its ordered change descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    /// Version produced (or closed, for removals) by the mutation.
    pub unique_id: UniqueId,
    pub event_type: HistoryEventType,
    pub actor: String,
    pub instant: Instant,
    pub changes: Vec<String>,
}

impl HistoryEvent {
    pub fn object_id(&self) -> ObjectId {
        self.unique_id.object_id()
    }
}

/// Version/correction windows for [`crate::repo::VersionedStore::history`].
///
/// Bounds are inclusive instants; `None` leaves that side unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub object_id: ObjectId,
    pub versions_from: Option<Instant>,
    pub versions_to: Option<Instant>,
    pub corrections_from: Option<Instant>,
    pub corrections_to: Option<Instant>,
    pub paging: PagingRequest,
}

impl HistoryRequest {
    /// Every row ever stored for `object_id`.
    pub fn all(object_id: ObjectId) -> Self {
        Self {
            object_id,
            versions_from: None,
            versions_to: None,
            corrections_from: None,
            corrections_to: None,
            paging: PagingRequest::ALL,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryResult<E> {
    /// Newest version first, then newest correction first.
    pub documents: Vec<Document<E>>,
    pub paging: Paging,
}
