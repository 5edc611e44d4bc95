//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffers > 0)
//! - Check addresses resolve to a usable host:port form
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AgentConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::AgentConfig;
use crate::net::address::{dial_address, listen_address};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Smallest frame limit that still fits an envelope header.
const MIN_FRAME_LENGTH: usize = 64;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &AgentConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = listen_address(&config.listener.bind_address) {
        errors.push(ValidationError::new("listener.bind_address", e.to_string()));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than 0",
        ));
    }

    if !config.client.connect_address.is_empty() {
        if let Err(e) = dial_address(&config.client.connect_address) {
            errors.push(ValidationError::new("client.connect_address", e.to_string()));
        }
    }
    if config.client.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "client.connect_timeout_secs",
            "must be greater than 0",
        ));
    }

    if config.connection.max_frame_length < MIN_FRAME_LENGTH {
        errors.push(ValidationError::new(
            "connection.max_frame_length",
            format!("must be at least {} bytes", MIN_FRAME_LENGTH),
        ));
    }
    if config.connection.incoming_buffer == 0 {
        errors.push(ValidationError::new(
            "connection.incoming_buffer",
            "must be greater than 0",
        ));
    }
    if config.connection.query_timeout_ms == Some(0) {
        errors.push(ValidationError::new(
            "connection.query_timeout_ms",
            "must be greater than 0 when set",
        ));
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be an ip:port socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
