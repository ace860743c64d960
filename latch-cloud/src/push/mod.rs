//! MQTT push channel for real-time lock state
//!
//! The vendor pushes lock events over a fixed MQTT broker, one topic per
//! device. [`PushListener`] owns a dedicated background thread per
//! device that keeps the subscription alive and hands decoded messages
//! to registered callbacks.

pub mod listener;

pub use listener::{ListenerHandle, PushListener};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Broker host the vendor locks push through
pub const DEFAULT_PUSH_HOST: &str = "106.55.145.207";
/// Broker port
pub const DEFAULT_PUSH_PORT: u16 = 1883;
/// Per-deployment broker username, not per end user
pub const DEFAULT_PUSH_USERNAME: &str = "smartLock";
/// Per-deployment broker password
pub const DEFAULT_PUSH_PASSWORD: &str = "abc123456";
/// Topic prefix; the device id completes the topic
pub const PUSH_TOPIC_PREFIX: &str = "smartLock/homeassistant";

/// First retry delay after a connection failure
const INITIAL_RECONNECT_DELAY_SECS: u64 = 1;
/// Retry delays double up to this cap
const MAX_RECONNECT_DELAY_SECS: u64 = 60;
/// Routine full reconnect after this long online
const MAINTENANCE_INTERVAL_SECS: u64 = 2 * 60 * 60;
/// MQTT keep-alive
const KEEP_ALIVE_SECS: u64 = 60;

/// Push channel configuration
///
/// Defaults match the deployed vendor broker; override for tests or a
/// relocated broker.
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    /// First delay of the exponential backoff
    pub reconnect_initial_delay: Duration,
    /// Backoff cap
    pub reconnect_max_delay: Duration,
    /// Forced reconnect period while healthy
    pub maintenance_interval: Duration,
}

impl PushConfig {
    pub fn new() -> Self {
        Self {
            host: DEFAULT_PUSH_HOST.to_string(),
            port: DEFAULT_PUSH_PORT,
            username: DEFAULT_PUSH_USERNAME.to_string(),
            password: DEFAULT_PUSH_PASSWORD.to_string(),
            keep_alive: Duration::from_secs(KEEP_ALIVE_SECS),
            reconnect_initial_delay: Duration::from_secs(INITIAL_RECONNECT_DELAY_SECS),
            reconnect_max_delay: Duration::from_secs(MAX_RECONNECT_DELAY_SECS),
            maintenance_interval: Duration::from_secs(MAINTENANCE_INTERVAL_SECS),
        }
    }

    pub fn with_broker(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_delay = initial;
        self.reconnect_max_delay = max;
        self
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded push envelope
///
/// Messages with `data` null or absent carry nothing and are dropped
/// before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    /// Vendor message tag, shape varies
    #[serde(default)]
    pub t: Value,
    #[serde(default)]
    pub data: Option<PushData>,
}

/// Device state carried by a push message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocking: Option<bool>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}
