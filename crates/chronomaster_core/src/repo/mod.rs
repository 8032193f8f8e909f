//! Persistence engines for the bitemporal masters.
//!
//! # Responsibility
//! - Run every mutation through one transactional retry protocol.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Reads never retry and never open write transactions.
//! - Repository APIs return semantic errors (`NotFound`, `OptimisticConflict`,
//!   `DuplicateName`, `Validation`) in addition to storage errors.

pub mod document_repo;
pub mod history_repo;
pub mod point_repo;
pub mod resolver;
pub mod retry;

pub use document_repo::{DocumentMaster, VersionedStore};
pub use history_repo::{EventHistoryRecorder, HistoryEntry};
pub use point_repo::TimeSeriesPointStore;
pub use resolver::IdentifierResolver;
pub use retry::RetryCoordinator;
