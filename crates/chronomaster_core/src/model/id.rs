//! Object and unique identifiers.
//!
//! # Invariants
//! - An `ObjectId` is stable across every version and correction of one entity.
//! - A versioned `UniqueId` names exactly one bitemporal cell; its token is
//!   opaque to callers and must be echoed unchanged on update.
//! - Text form is `scheme~value` or `scheme~value~version`.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

const SEPARATOR: char = '~';

/// Lineage identifier shared by all versions of one entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub scheme: String,
    pub value: String,
}

/// Identifier of one (version, correction) cell of an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueId {
    pub scheme: String,
    pub object_id: String,
    /// `None` means "the latest version".
    pub version_token: Option<String>,
}

impl ObjectId {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }

    /// Parses `scheme~value`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let unique_id = UniqueId::parse(text)?;
        if unique_id.version_token.is_some() {
            return Err(format!("object id must not carry a version: `{text}`"));
        }
        Ok(unique_id.object_id())
    }

    /// Returns the unversioned unique id ("latest") for this object.
    pub fn at_latest_version(&self) -> UniqueId {
        UniqueId {
            scheme: self.scheme.clone(),
            object_id: self.value.clone(),
            version_token: None,
        }
    }

    pub fn at_version(&self, version_token: impl Into<String>) -> UniqueId {
        UniqueId {
            scheme: self.scheme.clone(),
            object_id: self.value.clone(),
            version_token: Some(version_token.into()),
        }
    }
}

impl UniqueId {
    pub fn of(
        scheme: impl Into<String>,
        object_id: impl Into<String>,
        version_token: Option<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            object_id: object_id.into(),
            version_token,
        }
    }

    /// Parses `scheme~value` or `scheme~value~version`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let parts: Vec<&str> = text.split(SEPARATOR).collect();
        let (scheme, value, version) = match parts.as_slice() {
            [scheme, value] => (*scheme, *value, None),
            [scheme, value, version] => (*scheme, *value, Some(*version)),
            _ => return Err(format!("invalid identifier format: `{text}`")),
        };
        if scheme.is_empty() || value.is_empty() || version.is_some_and(str::is_empty) {
            return Err(format!("identifier has an empty component: `{text}`"));
        }
        Ok(Self::of(scheme, value, version.map(str::to_string)))
    }

    pub fn object_id(&self) -> ObjectId {
        ObjectId::new(self.scheme.clone(), self.object_id.clone())
    }

    pub fn is_versioned(&self) -> bool {
        self.version_token.is_some()
    }

    pub fn to_latest(&self) -> Self {
        self.object_id().at_latest_version()
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.scheme, self.value)
    }
}

impl Display for UniqueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.version_token {
            Some(version) => write!(
                f,
                "{}{SEPARATOR}{}{SEPARATOR}{}",
                self.scheme, self.object_id, version
            ),
            None => write!(f, "{}{SEPARATOR}{}", self.scheme, self.object_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ObjectId, UniqueId};

    #[test]
    fn text_form_round_trips() {
        let uid = ObjectId::new("DbUsr", "abc").at_version("42");
        assert_eq!(uid.to_string(), "DbUsr~abc~42");
        assert_eq!(UniqueId::parse("DbUsr~abc~42").unwrap(), uid);
        assert_eq!(
            ObjectId::parse("DbUsr~abc").unwrap(),
            ObjectId::new("DbUsr", "abc")
        );
    }

    #[test]
    fn parse_rejects_malformed_text() {
        assert!(UniqueId::parse("DbUsr").is_err());
        assert!(UniqueId::parse("DbUsr~~1").is_err());
        assert!(UniqueId::parse("a~b~c~d").is_err());
        assert!(ObjectId::parse("DbUsr~abc~1").is_err());
    }

    #[test]
    fn serializes_with_external_field_names() {
        let uid = ObjectId::new("DbUsr", "abc").at_version("7");
        let json = serde_json::to_value(&uid).unwrap();
        assert_eq!(json["scheme"], "DbUsr");
        assert_eq!(json["objectId"], "abc");
        assert_eq!(json["versionToken"], "7");
    }

    #[test]
    fn latest_drops_version() {
        let uid = ObjectId::new("DbUsr", "abc").at_version("7");
        assert!(uid.is_versioned());
        assert!(!uid.to_latest().is_versioned());
        assert_eq!(uid.to_latest().object_id(), uid.object_id());
    }
}
