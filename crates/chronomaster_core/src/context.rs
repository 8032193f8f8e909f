//! Explicit dependency bundle handed to every store.
//!
//! # Invariants
//! - One context may be shared by stores on different connections and threads.
//! - "Latest" coordinates are pinned through [`MasterContext::fix`] only.

use crate::clock::{Clock, Instant, SystemClock};
use crate::config::MasterConfig;
use crate::error::{MasterError, MasterResult};
use crate::model::version_correction::{FixedVersionCorrection, VersionCorrection};
use crate::notify::ChangeNotifier;
use crate::repo::RetryCoordinator;
use std::sync::Arc;

pub struct MasterContext {
    clock: Arc<dyn Clock>,
    notifier: Arc<ChangeNotifier>,
    config: MasterConfig,
}

impl MasterContext {
    /// Builds a context with a [`SystemClock`] and no listeners.
    pub fn new(config: MasterConfig) -> MasterResult<Self> {
        config.validate().map_err(MasterError::Validation)?;
        Ok(Self {
            clock: Arc::new(SystemClock::new()),
            notifier: Arc::new(ChangeNotifier::new()),
            config,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the actor recorded on history events; blank input is ignored.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        let actor = actor.into();
        if !actor.trim().is_empty() {
            self.config.actor = actor;
        }
        self
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Pins every "latest" axis of `vc` to a single fresh instant.
    pub fn fix(&self, vc: VersionCorrection) -> FixedVersionCorrection {
        vc.with_latest_fixed(self.now())
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    pub fn actor(&self) -> &str {
        &self.config.actor
    }

    pub fn retry_coordinator(&self) -> RetryCoordinator {
        RetryCoordinator::new(self.config.max_attempts)
    }
}

impl Default for MasterContext {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            notifier: Arc::new(ChangeNotifier::new()),
            config: MasterConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MasterContext;
    use crate::clock::{Clock, SteppingClock};
    use crate::config::MasterConfig;
    use crate::error::MasterError;
    use crate::model::version_correction::VersionCorrection;
    use std::sync::Arc;

    #[test]
    fn invalid_config_is_rejected() {
        let config = MasterConfig {
            max_attempts: 0,
            ..MasterConfig::default()
        };
        assert!(matches!(
            MasterContext::new(config),
            Err(MasterError::Validation(_))
        ));
    }

    #[test]
    fn fix_uses_one_instant_for_both_axes() {
        let clock = Arc::new(SteppingClock::starting_2020());
        let expected = clock.peek();
        let ctx = MasterContext::default().with_clock(clock.clone());
        let fixed = ctx.fix(VersionCorrection::LATEST);
        assert_eq!(fixed.version_as_of, expected);
        assert_eq!(fixed.corrected_to, expected);
        assert!(clock.now() > expected);
    }

    #[test]
    fn blank_actor_keeps_previous() {
        let ctx = MasterContext::default().with_actor("importer").with_actor("  ");
        assert_eq!(ctx.actor(), "importer");
    }
}
