//! User account use-case service.
//!
//! # Responsibility
//! - Provide intent-level entry points (rename, grant, revoke) over a master.
//! - Always write through the version token the caller last read.
//!
//! # Invariants
//! - Service APIs never bypass master validation or token checks.
//! - Service layer remains storage-agnostic.

use crate::error::MasterResult;
use crate::model::document::Document;
use crate::model::history::HistoryEvent;
use crate::model::id::{ObjectId, UniqueId};
use crate::model::user::ManageableUser;
use crate::model::version_correction::VersionCorrection;
use crate::repo::DocumentMaster;
use std::collections::BTreeSet;

/// Request model for creating a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateUserRequest {
    pub user_name: String,
    pub email_address: Option<String>,
    pub display_name: Option<String>,
    pub permissions: BTreeSet<String>,
}

/// Use-case service wrapper for user accounts.
pub struct UserService<M: DocumentMaster<ManageableUser>> {
    master: M,
}

impl<M: DocumentMaster<ManageableUser>> UserService<M> {
    pub fn new(master: M) -> Self {
        Self { master }
    }

    pub fn master(&self) -> &M {
        &self.master
    }

    pub fn create_user(
        &self,
        request: CreateUserRequest,
    ) -> MasterResult<Document<ManageableUser>> {
        self.master.add(ManageableUser {
            user_name: request.user_name,
            email_address: request.email_address,
            display_name: request.display_name,
            permissions: request.permissions,
        })
    }

    /// Live user by name or active alias.
    pub fn get_user(&self, user_name: &str) -> MasterResult<Document<ManageableUser>> {
        self.master.get_by_name(user_name)
    }

    pub fn get_user_at(
        &self,
        object_id: &ObjectId,
        vc: VersionCorrection,
    ) -> MasterResult<Document<ManageableUser>> {
        self.master.get_by_id(object_id, vc)
    }

    /// Renames the version identified by `unique_id`.
    ///
    /// # Contract
    /// - `unique_id` must be the live version, else `OptimisticConflict`.
    /// - The old name stays resolvable as an alias.
    pub fn rename_user(
        &self,
        unique_id: &UniqueId,
        new_name: impl Into<String>,
    ) -> MasterResult<Document<ManageableUser>> {
        let new_name = new_name.into();
        self.modify(unique_id, |user| user.user_name = new_name)
    }

    pub fn change_email(
        &self,
        unique_id: &UniqueId,
        email_address: Option<String>,
    ) -> MasterResult<Document<ManageableUser>> {
        self.modify(unique_id, |user| user.email_address = email_address)
    }

    /// Adds `permission`; a no-op when already granted.
    pub fn grant_permission(
        &self,
        unique_id: &UniqueId,
        permission: &str,
    ) -> MasterResult<Document<ManageableUser>> {
        self.modify(unique_id, |user| {
            user.permissions.insert(permission.trim().to_string());
        })
    }

    /// Removes `permission`; a no-op when not granted.
    pub fn revoke_permission(
        &self,
        unique_id: &UniqueId,
        permission: &str,
    ) -> MasterResult<Document<ManageableUser>> {
        self.modify(unique_id, |user| {
            user.permissions.remove(permission.trim());
        })
    }

    pub fn remove_user(&self, object_id: &ObjectId) -> MasterResult<Document<ManageableUser>> {
        self.master.remove(object_id)
    }

    pub fn user_history(&self, object_id: &ObjectId) -> MasterResult<Vec<HistoryEvent>> {
        self.master.event_history(object_id)
    }

    fn modify(
        &self,
        unique_id: &UniqueId,
        change: impl FnOnce(&mut ManageableUser),
    ) -> MasterResult<Document<ManageableUser>> {
        let mut user = self.master.get_by_unique_id(unique_id)?.entity;
        change(&mut user);
        self.master.update(unique_id, user)
    }
}
