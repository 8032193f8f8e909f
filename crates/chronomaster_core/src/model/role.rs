//! Role entity grouping users and permissions.

use crate::model::entity::{display_optional, Entity, FieldDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManageableRole {
    pub role_name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub associated_users: BTreeSet<String>,
    #[serde(default)]
    pub associated_permissions: BTreeSet<String>,
    #[serde(default)]
    pub associated_roles: BTreeSet<String>,
}

impl ManageableRole {
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            description: None,
            associated_users: BTreeSet::new(),
            associated_permissions: BTreeSet::new(),
            associated_roles: BTreeSet::new(),
        }
    }
}

impl Entity for ManageableRole {
    const KIND: &'static str = "role";
    const SCHEME: &'static str = "DbRol";
    const FIELDS: &'static [FieldDescriptor<Self>] = &[
        FieldDescriptor::Scalar {
            name: "roleName",
            read: |role| role.role_name.clone(),
        },
        FieldDescriptor::Scalar {
            name: "description",
            read: |role| display_optional(&role.description),
        },
        FieldDescriptor::Collection {
            name: "associatedUsers",
            read: |role| role.associated_users.clone(),
        },
        FieldDescriptor::Collection {
            name: "associatedPermissions",
            read: |role| role.associated_permissions.clone(),
        },
        FieldDescriptor::Collection {
            name: "associatedRoles",
            read: |role| role.associated_roles.clone(),
        },
    ];

    fn name(&self) -> &str {
        &self.role_name
    }

    fn validate(&self) -> Result<(), String> {
        if self.role_name.trim().is_empty() {
            return Err("role name cannot be empty".to_string());
        }
        if self.associated_roles.contains(&self.role_name) {
            return Err(format!("role `{}` cannot contain itself", self.role_name));
        }
        Ok(())
    }
}
