//! User account entity.
//!
//! # Invariants
//! - `user_name` is non-empty and carries no whitespace.
//! - `email_address`, when set, looks like `local@domain`.

use crate::model::entity::{display_optional, Entity, FieldDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

static USER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s]+$").expect("valid user name regex"));
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").expect("valid email regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageableUser {
    pub user_name: String,
    pub email_address: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

impl ManageableUser {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            email_address: None,
            display_name: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email_address = Some(email.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }
}

impl Entity for ManageableUser {
    const KIND: &'static str = "user";
    const SCHEME: &'static str = "DbUsr";
    const FIELDS: &'static [FieldDescriptor<Self>] = &[
        FieldDescriptor::Scalar {
            name: "userName",
            read: |user| user.user_name.clone(),
        },
        FieldDescriptor::Scalar {
            name: "emailAddress",
            read: |user| display_optional(&user.email_address),
        },
        FieldDescriptor::Scalar {
            name: "displayName",
            read: |user| display_optional(&user.display_name),
        },
        FieldDescriptor::Collection {
            name: "permissions",
            read: |user| user.permissions.clone(),
        },
    ];

    fn name(&self) -> &str {
        &self.user_name
    }

    fn validate(&self) -> Result<(), String> {
        if !USER_NAME_RE.is_match(&self.user_name) {
            return Err(format!(
                "user name must be non-empty without whitespace: `{}`",
                self.user_name
            ));
        }
        if let Some(email) = &self.email_address {
            if !EMAIL_RE.is_match(email) {
                return Err(format!("invalid email address: `{email}`"));
            }
        }
        if self.permissions.iter().any(|p| p.trim().is_empty()) {
            return Err("permissions cannot be blank".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ManageableUser;
    use crate::model::entity::Entity;

    #[test]
    fn validate_rejects_whitespace_names_and_bad_email() {
        assert!(ManageableUser::new("alice").validate().is_ok());
        assert!(ManageableUser::new("").validate().is_err());
        assert!(ManageableUser::new("al ice").validate().is_err());
        assert!(ManageableUser::new("alice")
            .with_email("not-an-email")
            .validate()
            .is_err());
        assert!(ManageableUser::new("alice")
            .with_email("alice@example.com")
            .validate()
            .is_ok());
    }

    #[test]
    fn audited_fields_use_external_names() {
        let names: Vec<&str> = ManageableUser::FIELDS.iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            vec!["userName", "emailAddress", "displayName", "permissions"]
        );
    }
}
