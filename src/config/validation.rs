//! Configuration validation.
//!
//! Serde handles syntax; this module checks values. All errors are collected
//! so the operator sees every problem at once.

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ServiceConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is not a valid socket address: {value}")]
    Address { field: &'static str, value: String },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

/// Validate a configuration, returning every error found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let shutdown = &config.shutdown;

    for (field, value) in [
        ("shutdown.timeout_ms", shutdown.timeout_ms),
        ("shutdown.queue_drain_timeout_ms", shutdown.queue_drain_timeout_ms),
        ("shutdown.websocket_close_timeout_ms", shutdown.websocket_close_timeout_ms),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.queue.workers == 0 {
        errors.push(ValidationError::Zero { field: "queue.workers" });
    }
    if config.queue.capacity == 0 {
        errors.push(ValidationError::Zero { field: "queue.capacity" });
    }
    if config.cache.pool_size == 0 {
        errors.push(ValidationError::Zero { field: "cache.pool_size" });
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::Address {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::Empty { field: "admin.api_key" });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
