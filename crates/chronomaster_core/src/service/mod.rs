//! Service layer orchestration.
//!
//! # Responsibility
//! - Expose intent-level use-case APIs to callers.
//! - Delegate persistence and versioning to the masters.
//!
//! # Invariants
//! - Services never write SQL directly.

pub mod user_service;
