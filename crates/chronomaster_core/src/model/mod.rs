//! Domain model for the bitemporal masters.
//!
//! # Responsibility
//! - Define identifiers, query coordinates and document shapes.
//! - Define the concrete entity kinds and their audited fields.
//!
//! # Invariants
//! - Every stored entity is identified by a stable `ObjectId`.
//! - Removal closes intervals; rows are never hard-deleted.

pub mod document;
pub mod entity;
pub mod history;
pub mod id;
pub mod paging;
pub mod role;
pub mod search;
pub mod time_series;
pub mod user;
pub mod version_correction;
