//! One bitemporal cell of an entity.

use crate::clock::Instant;
use crate::model::id::{ObjectId, UniqueId};
use crate::model::version_correction::FixedVersionCorrection;
use serde::{Deserialize, Serialize};

/// Entity payload plus its version and correction intervals.
///
/// `None` on a `*_to` bound means the interval is still open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document<E> {
    pub unique_id: UniqueId,
    pub version_from: Instant,
    pub version_to: Option<Instant>,
    pub correction_from: Instant,
    pub correction_to: Option<Instant>,
    pub entity: E,
}

/// One version of a replacement sequence.
///
/// It lasts until the next replacement starts, or to the end of the replaced
/// range for the last one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionReplacement<E> {
    pub version_from: Instant,
    pub entity: E,
}

impl<E> VersionReplacement<E> {
    pub fn new(version_from: Instant, entity: E) -> Self {
        Self {
            version_from,
            entity,
        }
    }
}

/// A name an entity holds or has held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameAlias {
    pub name: String,
    pub object_id: ObjectId,
    /// Deleted aliases no longer resolve.
    pub deleted: bool,
    pub updated_at: Instant,
}

impl<E> Document<E> {
    pub fn object_id(&self) -> ObjectId {
        self.unique_id.object_id()
    }

    /// Version token of this cell (the storage row id).
    pub fn version_token(&self) -> &str {
        self.unique_id.version_token.as_deref().unwrap_or_default()
    }

    /// True for the current version of a live entity.
    pub fn is_live(&self) -> bool {
        self.version_to.is_none() && self.correction_to.is_none()
    }

    pub fn is_visible_at(&self, vc: &FixedVersionCorrection) -> bool {
        vc.matches(
            self.version_from,
            self.version_to,
            self.correction_from,
            self.correction_to,
        )
    }
}
