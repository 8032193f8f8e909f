//! Document search request and result.

use crate::model::document::Document;
use crate::model::id::ObjectId;
use crate::model::paging::{Paging, PagingRequest};
use crate::model::version_correction::{FixedVersionCorrection, VersionCorrection};

/// Filters applied at one pinned coordinate.
///
/// `name` is matched case-insensitively; `*` matches any run of characters
/// and `?` matches exactly one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentSearchRequest {
    pub name: Option<String>,
    /// `Some(empty)` matches nothing.
    pub object_ids: Option<Vec<ObjectId>>,
    pub version_correction: VersionCorrection,
    pub paging: PagingRequest,
}

impl DocumentSearchRequest {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSearchResult<E> {
    /// Ordered by name, then object id.
    pub documents: Vec<Document<E>>,
    pub paging: Paging,
    pub version_correction: FixedVersionCorrection,
}
