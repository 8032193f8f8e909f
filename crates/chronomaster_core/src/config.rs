//! Runtime configuration for master stores.
//!
//! # Invariants
//! - `max_attempts >= 1`: every mutation runs at least once.
//! - `actor` is non-empty; it is written to every history event.

use serde::{Deserialize, Serialize};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_ACTOR: &str = "system";

/// Store-wide settings, deserializable from any serde format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Total attempts for one mutation before `Contention` is surfaced.
    pub max_attempts: u32,
    /// SQLite busy timeout applied to every opened connection.
    pub busy_timeout_ms: u64,
    /// Actor recorded on history events when none is supplied.
    pub actor: String,
    pub log: LogConfig,
}

/// File logging settings consumed by [`crate::logging::init_logging_from`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Absolute directory; `None` leaves logging uninitialized.
    pub directory: Option<String>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            actor: DEFAULT_ACTOR.to_string(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            directory: None,
        }
    }
}

impl MasterConfig {
    /// Checks value ranges, returning a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.actor.trim().is_empty() {
            return Err("actor cannot be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MasterConfig;

    #[test]
    fn defaults_are_valid() {
        let config = MasterConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: MasterConfig =
            serde_json::from_str(r#"{"actor": "importer", "log": {"level": "warn"}}"#).unwrap();
        assert_eq!(config.actor, "importer");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.log.level, "warn");
        assert!(config.log.directory.is_none());
    }

    #[test]
    fn zero_attempts_and_blank_actor_are_rejected() {
        let zero = MasterConfig {
            max_attempts: 0,
            ..MasterConfig::default()
        };
        assert!(zero.validate().unwrap_err().contains("max_attempts"));

        let blank = MasterConfig {
            actor: "  ".to_string(),
            ..MasterConfig::default()
        };
        assert!(blank.validate().unwrap_err().contains("actor"));
    }
}
