//! Bitemporal versioned document masters.
//! This crate is the single source of truth for versioning invariants.

pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod service;

pub use clock::{Clock, Instant, SteppingClock, SystemClock};
pub use config::{LogConfig, MasterConfig};
pub use context::MasterContext;
pub use db::{open_db, open_db_in_memory, open_db_with_config, DbError, StorageFailure};
pub use error::{MasterError, MasterResult};
pub use logging::{
    default_log_level, init_logging, init_logging_from, logging_status, LoggingStatus,
};
pub use model::document::{Document, NameAlias, VersionReplacement};
pub use model::entity::{Entity, FieldDescriptor};
pub use model::history::{HistoryEvent, HistoryEventType, HistoryRequest, HistoryResult};
pub use model::id::{ObjectId, UniqueId};
pub use model::paging::{Paging, PagingRequest};
pub use model::role::ManageableRole;
pub use model::search::{DocumentSearchRequest, DocumentSearchResult};
pub use model::time_series::{
    DateDoubleSeries, DateRange, PointLimit, PointSeries, TimeSeriesInfo, TimeSeriesSummary,
};
pub use model::user::ManageableUser;
pub use model::version_correction::{FixedVersionCorrection, VersionCorrection};
pub use notify::{ChangeEvent, ChangeListener, ChangeNotifier, ChangeType, ListenerResult};
pub use repo::{
    DocumentMaster, EventHistoryRecorder, IdentifierResolver, RetryCoordinator,
    TimeSeriesPointStore, VersionedStore,
};
pub use service::user_service::{CreateUserRequest, UserService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
