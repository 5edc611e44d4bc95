//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for an agent.
//! All types derive Serde traits for deserialization from TOML files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::address::DEFAULT_PORT;
use crate::protocol::codec::DEFAULT_MAX_FRAME_LENGTH;

/// Root configuration for an agent process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    /// Server side: where to listen.
    pub listener: ListenerConfig,

    /// Client side: where to dial.
    pub client: ClientConfig,

    /// Per-connection protocol settings, shared by both sides.
    pub connection: ConnectionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:12457"). Port defaults to 12457 when omitted.
    pub bind_address: String,

    /// Maximum concurrent sessions (backpressure on accept).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            max_connections: 10_000,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address to dial. Empty disables the client.
    pub connect_address: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_address: String::new(),
            connect_timeout_secs: 5,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Per-connection protocol settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Largest envelope accepted or sent, in bytes.
    pub max_frame_length: usize,

    /// Capacity of the incoming packet channel. Small values keep
    /// backpressure on the read loop tight.
    pub incoming_buffer: usize,

    /// Default query deadline in milliseconds. None waits until the reply
    /// arrives or the connection closes.
    pub query_timeout_ms: Option<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            incoming_buffer: 1,
            query_timeout_ms: None,
        }
    }
}

impl ConnectionConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
