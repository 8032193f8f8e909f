//! Post-commit change notification.
//!
//! # Responsibility
//! - Deliver one event per committed mutation to in-process listeners.
//!
//! # Invariants
//! - Publishing happens only after the owning transaction committed.
//! - A failing or panicking listener never fails the mutation.

mod notifier;

pub use notifier::{
    ChangeEvent, ChangeListener, ChangeNotifier, ChangeType, ListenerId, ListenerResult,
    PublishReport,
};
