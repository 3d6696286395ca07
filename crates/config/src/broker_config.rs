//! Publish/subscribe broker section

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Use the broker for real-time event sync
    pub enabled: bool,

    /// Broker host name
    pub host: String,

    /// Broker port
    pub port: u16,

    /// User name, empty for anonymous
    pub username: String,

    /// Password
    pub password: String,

    /// Connect over TLS
    pub use_tls: bool,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,

    /// First reconnect delay in seconds
    pub reconnect_initial_secs: u64,

    /// Reconnect delay cap in seconds
    pub reconnect_max_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 8883,
            username: String::new(),
            password: String::new(),
            use_tls: true,
            keep_alive_secs: 60,
            reconnect_initial_secs: 1,
            reconnect_max_secs: 60,
        }
    }
}

impl ConfigSection for BrokerConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut results = vec![
            Validator::in_range(self.port, 1, u16::MAX, "broker.port"),
            Validator::in_range(self.keep_alive_secs, 5, 3600, "broker.keep_alive_secs"),
            Validator::in_range(self.reconnect_initial_secs, 1, 60, "broker.reconnect_initial_secs"),
            Validator::in_range(self.reconnect_max_secs, 1, 3600, "broker.reconnect_max_secs"),
        ];

        if self.reconnect_max_secs < self.reconnect_initial_secs {
            results.push(Err(ValidationError::with_value(
                "broker.reconnect_max_secs",
                "must not be below broker.reconnect_initial_secs",
                self.reconnect_max_secs,
            )));
        }

        if self.enabled {
            results.push(Validator::not_empty(&self.host, "broker.host"));
        }

        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        *self = other;
    }

    fn section_name(&self) -> &'static str {
        "broker"
    }
}
