//! In-process listener registry.

use crate::clock::Instant;
use crate::logging::{panic_payload_summary, sanitize_message};
use crate::model::id::ObjectId;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

const MAX_LISTENER_ERROR_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Added,
    Changed,
    Corrected,
    Removed,
}

/// What changed, and at which point of the (version, correction) plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub change_type: ChangeType,
    pub object_id: ObjectId,
    pub version_instant: Instant,
    pub correction_instant: Instant,
}

pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receiver of committed changes.
pub trait ChangeListener: Send + Sync {
    fn entity_changed(&self, event: &ChangeEvent) -> ListenerResult;
}

impl<F> ChangeListener for F
where
    F: Fn(&ChangeEvent) -> ListenerResult + Send + Sync,
{
    fn entity_changed(&self, event: &ChangeEvent) -> ListenerResult {
        self(event)
    }
}

/// Handle returned on registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Delivery outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Synchronous fan-out to registered listeners.
///
/// Owned by a [`crate::context::MasterContext`]; there is no global instance.
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ChangeListener>)>>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Returns whether a listener was registered under `id`.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `event` to every listener in registration order.
    ///
    /// Listener errors and panics are logged and counted, never propagated.
    pub fn publish(&self, event: &ChangeEvent) -> PublishReport {
        // Snapshot so listeners may (un)register while being called.
        let listeners: Vec<(ListenerId, Arc<dyn ChangeListener>)> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut report = PublishReport::default();
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.entity_changed(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(
                        "event=change_publish module=notify status=error listener={} change={:?} oid={} error={}",
                        id.0,
                        event.change_type,
                        event.object_id,
                        sanitize_message(&err.to_string(), MAX_LISTENER_ERROR_CHARS)
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    error!(
                        "event=change_publish module=notify status=panic listener={} change={:?} oid={} payload={}",
                        id.0,
                        event.change_type,
                        event.object_id,
                        panic_payload_summary(payload.as_ref())
                    );
                }
            }
        }

        debug!(
            "event=change_publish module=notify status=ok change={:?} oid={} delivered={} failed={}",
            event.change_type, event.object_id, report.delivered, report.failed
        );
        report
    }
}
