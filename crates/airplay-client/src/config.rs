//! Connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use airplay_core::PairingRequirement;
use airplay_pairing::{DEFAULT_PIN_ATTEMPTS, DEFAULT_RESPONSE_TIMEOUT};
use tracing::warn;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub const ENV_RESPONSE_TIMEOUT_MS: &str = "AIRPLAY_RESPONSE_TIMEOUT_MS";
pub const ENV_PIN_ATTEMPTS: &str = "AIRPLAY_PIN_ATTEMPTS";
pub const ENV_STORE_PATH: &str = "AIRPLAY_STORE_PATH";

/// Settings for [`AirPlaySenderConnection`](crate::AirPlaySenderConnection).
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    /// Per-response timeout during pairing.
    pub response_timeout: Duration,
    /// PIN entries allowed before Pair-Setup gives up.
    pub pin_attempts: u32,
    /// Pairing store file. `None` keeps pairings in memory.
    pub store_path: Option<PathBuf>,
    /// Identifier presented to receivers instead of the stored one.
    pub controller_id: Option<String>,
    /// Skip requirement detection and pair this way.
    pub requirement_override: Option<PairingRequirement>,
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            pin_attempts: DEFAULT_PIN_ATTEMPTS,
            store_path: None,
            controller_id: None,
            requirement_override: None,
        }
    }

    /// Defaults overlaid with the `AIRPLAY_*` environment variables.
    pub fn from_env() -> Self {
        Self::new().overlay(|key| std::env::var(key).ok())
    }

    /// Apply settings from `lookup`; unparsable values are logged and ignored.
    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup(ENV_RESPONSE_TIMEOUT_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.response_timeout = Duration::from_millis(ms),
                Err(_) => warn!("Ignoring {}={:?}", ENV_RESPONSE_TIMEOUT_MS, value),
            }
        }
        if let Some(value) = lookup(ENV_PIN_ATTEMPTS) {
            match value.trim().parse::<u32>() {
                Ok(attempts) if attempts > 0 => self.pin_attempts = attempts,
                _ => warn!("Ignoring {}={:?}", ENV_PIN_ATTEMPTS, value),
            }
        }
        if let Some(value) = lookup(ENV_STORE_PATH).filter(|v| !v.is_empty()) {
            self.store_path = Some(PathBuf::from(value));
        }
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn pin_attempts(mut self, attempts: u32) -> Self {
        self.pin_attempts = attempts;
        self
    }

    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn controller_id(mut self, id: impl Into<String>) -> Self {
        self.controller_id = Some(id.into());
        self
    }

    pub fn requirement_override(mut self, requirement: PairingRequirement) -> Self {
        self.requirement_override = Some(requirement);
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    mod defaults {
        use super::*;

        #[test]
        fn new_has_defaults() {
            let config = ConnectionConfig::new();
            assert_eq!(config.connect_timeout, Duration::from_secs(5));
            assert_eq!(config.response_timeout, Duration::from_secs(10));
            assert_eq!(config.pin_attempts, 3);
            assert!(config.store_path.is_none());
            assert!(config.controller_id.is_none());
            assert!(config.requirement_override.is_none());
        }

        #[test]
        fn default_matches_new() {
            assert_eq!(ConnectionConfig::default(), ConnectionConfig::new());
        }
    }

    mod setters {
        use super::*;

        #[test]
        fn setters_chain() {
            let config = ConnectionConfig::new()
                .connect_timeout(Duration::from_secs(1))
                .response_timeout(Duration::from_millis(250))
                .pin_attempts(5)
                .store_path("/tmp/pairings.json")
                .controller_id("Sender-1")
                .requirement_override(PairingRequirement::None);

            assert_eq!(config.connect_timeout, Duration::from_secs(1));
            assert_eq!(config.response_timeout, Duration::from_millis(250));
            assert_eq!(config.pin_attempts, 5);
            assert_eq!(config.store_path, Some(PathBuf::from("/tmp/pairings.json")));
            assert_eq!(config.controller_id.as_deref(), Some("Sender-1"));
            assert_eq!(config.requirement_override, Some(PairingRequirement::None));
        }
    }

    mod environment {
        use super::*;

        #[test]
        fn overlay_reads_all_variables() {
            let config = ConnectionConfig::new().overlay(env(&[
                (ENV_RESPONSE_TIMEOUT_MS, "1500"),
                (ENV_PIN_ATTEMPTS, "7"),
                (ENV_STORE_PATH, "/var/lib/airplay/pairings.json"),
            ]));
            assert_eq!(config.response_timeout, Duration::from_millis(1500));
            assert_eq!(config.pin_attempts, 7);
            assert_eq!(
                config.store_path,
                Some(PathBuf::from("/var/lib/airplay/pairings.json"))
            );
        }

        #[test]
        fn bad_values_keep_defaults() {
            let config = ConnectionConfig::new().overlay(env(&[
                (ENV_RESPONSE_TIMEOUT_MS, "soon"),
                (ENV_PIN_ATTEMPTS, "0"),
                (ENV_STORE_PATH, ""),
            ]));
            assert_eq!(config, ConnectionConfig::new());
        }
    }
}
