//! Entity contract for documents stored in a [`crate::repo::VersionedStore`].
//!
//! # Invariants
//! - `KIND` and `SCHEME` are unique per entity type.
//! - `FIELDS` lists every audited field in the order changes are reported.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Debug;

/// Compile-time accessor for one audited field.
pub enum FieldDescriptor<E> {
    /// Single value rendered as text.
    Scalar {
        name: &'static str,
        read: fn(&E) -> String,
    },
    /// Association compared by set difference.
    Collection {
        name: &'static str,
        read: fn(&E) -> BTreeSet<String>,
    },
}

impl<E> FieldDescriptor<E> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scalar { name, .. } | Self::Collection { name, .. } => name,
        }
    }
}

/// A domain record versioned bitemporally by the master.
pub trait Entity: Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Storage discriminator in the shared `documents` table.
    const KIND: &'static str;
    /// Identifier scheme for object ids issued to this kind.
    const SCHEME: &'static str;
    /// Audited fields for history diffs.
    const FIELDS: &'static [FieldDescriptor<Self>];

    /// Unique (per kind, case-insensitive) name of a live entity.
    fn name(&self) -> &str;

    /// Checks caller input before any write.
    fn validate(&self) -> Result<(), String> {
        if self.name().trim().is_empty() {
            return Err(format!("{} name cannot be empty", Self::KIND));
        }
        Ok(())
    }
}

/// Case-folded lookup key for entity names and aliases.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Renders an optional scalar for change descriptions.
pub(crate) fn display_optional(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "none".to_string())
}
