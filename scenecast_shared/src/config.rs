//! Configuration system.
//!
//! Loads broadcast pool configuration from JSON strings (file IO left to app).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Broadcast pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Interface the websocket listener binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// First port tried; later attempts go upward one port at a time.
    #[serde(default = "default_first_port")]
    pub first_port: u16,
    /// Number of consecutive ports tried before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u16,
    /// How often a waiting broadcast re-checks for a live connection.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a broadcast waits for a first connection before sending to nobody.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long an accepted socket has to complete the websocket upgrade.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_first_port() -> u16 {
    7000
}

fn default_max_attempts() -> u16 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            first_port: default_first_port(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

impl PoolConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms.max(1))
    }
}
