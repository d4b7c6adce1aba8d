//! Message bus settings.
//!
//! Two settings drive the bus: `message_bus.backoff_delay_ms` (base delay for
//! the queue's exponential backoff) and `message_bus.default_mode` (whether
//! [`MessageBus::send`](crate::MessageBus::send) waits for a handshake). The
//! rest are handshake defaults used when a call does not specify them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid message bus configuration: {0}")]
    Invalid(String),

    #[cfg(feature = "env-config")]
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// How [`MessageBus::send`](crate::MessageBus::send) delivers by default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Enqueue and return the job id.
    #[default]
    #[serde(alias = "fire-and-forget", alias = "fireAndForget")]
    FireAndForget,
    /// Enqueue, then wait for the consumer to call `mark_done`.
    Handshake,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBusConfig {
    #[serde(default = "default_backoff_delay_ms", alias = "backoffDelayMs")]
    pub backoff_delay_ms: u64,

    #[serde(default, alias = "defaultMode")]
    pub default_mode: DeliveryMode,

    #[serde(default = "default_handshake_timeout_ms", alias = "handshakeTimeoutMs")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms", alias = "pollIntervalMs")]
    pub poll_interval_ms: u64,

    /// TTL for handshake results written by `mark_done_default`.
    #[serde(default = "default_handshake_ttl_seconds", alias = "handshakeTtlSeconds")]
    pub handshake_ttl_seconds: u64,
}

fn default_backoff_delay_ms() -> u64 {
    1000
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_handshake_ttl_seconds() -> u64 {
    300
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            backoff_delay_ms: default_backoff_delay_ms(),
            default_mode: DeliveryMode::default(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            handshake_ttl_seconds: default_handshake_ttl_seconds(),
        }
    }
}

impl MessageBusConfig {
    pub fn with_backoff_delay_ms(mut self, delay_ms: u64) -> Self {
        self.backoff_delay_ms = delay_ms;
        self
    }

    pub fn with_default_mode(mut self, mode: DeliveryMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_handshake_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.handshake_timeout_ms = timeout_ms;
        self
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub fn with_handshake_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.handshake_ttl_seconds = ttl_seconds;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.poll_interval_ms == 0 {
            errors.push("poll_interval_ms must be greater than zero".to_string());
        }
        if self.handshake_timeout_ms < self.poll_interval_ms {
            errors.push("handshake_timeout_ms must be >= poll_interval_ms".to_string());
        }
        if self.handshake_ttl_seconds == 0 {
            errors.push("handshake_ttl_seconds must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }
}

/// Root settings document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, alias = "messageBus")]
    pub message_bus: MessageBusConfig,
}

#[cfg(feature = "env-config")]
impl Settings {
    /// Environment variable naming an optional config file.
    pub const FILE_VAR: &'static str = "OUTBOX_BUS_CONFIG";
    /// Prefix for environment overrides, e.g.
    /// `OUTBOX_BUS__MESSAGE_BUS__BACKOFF_DELAY_MS=250`.
    pub const ENV_PREFIX: &'static str = "OUTBOX_BUS";

    /// Load settings from the optional file and the environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(Self::FILE_VAR) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(Self::ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.message_bus.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_when_absent() {
        let settings: Settings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(settings.message_bus, MessageBusConfig::default());
        assert_eq!(settings.message_bus.backoff_delay_ms, 1000);
        assert_eq!(settings.message_bus.default_mode, DeliveryMode::FireAndForget);
    }

    #[test]
    fn camel_case_keys_accepted() {
        let settings: Settings = serde_json::from_value(json!({
            "messageBus": {"backoffDelayMs": 250, "defaultMode": "handshake"}
        }))
        .unwrap();
        assert_eq!(settings.message_bus.backoff_delay_ms, 250);
        assert_eq!(settings.message_bus.default_mode, DeliveryMode::Handshake);
        assert_eq!(settings.message_bus.poll_interval_ms, 50);
    }

    #[test]
    fn validation_rejects_zero_poll_interval() {
        let config = MessageBusConfig::default().with_poll_interval_ms(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validation_rejects_timeout_shorter_than_poll() {
        let config = MessageBusConfig::default()
            .with_poll_interval_ms(100)
            .with_handshake_timeout_ms(10);
        assert!(config.validate().is_err());
        assert!(MessageBusConfig::default().validate().is_ok());
    }
}
