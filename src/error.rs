//! # Coordination Error Types
//!
//! Structured error handling for the coordination core using thiserror,
//! shared by the message router, task coordinator, and approval workflow.

use thiserror::Error;

/// Errors surfaced by coordination operations.
///
/// Delivery problems inside the router are intentionally absent from public
/// return values: per-subscriber failures are caught, logged, and recorded as
/// the message's final `Failed` status. `DeliveryFailure` exists for that
/// internal bookkeeping and for introspection, never as a `publish` result.
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("invalid state for {operation} on {entity} {id}: currently {current}")]
    InvalidState {
        entity: String,
        id: String,
        current: String,
        operation: String,
    },

    #[error("unauthorized: {actor} may not {operation}: {reason}")]
    Unauthorized {
        actor: String,
        operation: String,
        reason: String,
    },

    #[error("{entity} {id} expired at {expired_at}")]
    Expired {
        entity: String,
        id: String,
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("delivery failed for message {message_id} on topic {topic}: {reason}")]
    DeliveryFailure {
        message_id: String,
        topic: String,
        reason: String,
    },

    #[error("timed out after {waited_ms}ms waiting on {entity} {id}")]
    WaitTimeout {
        entity: String,
        id: String,
        waited_ms: u64,
    },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("internal coordination error: {message}")]
    Internal { message: String },
}

impl CoordinationError {
    /// Create a not-found error for the given entity kind and id
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create an invalid-state error describing the rejected operation
    pub fn invalid_state(
        entity: impl Into<String>,
        id: impl ToString,
        current: impl ToString,
        operation: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            entity: entity.into(),
            id: id.to_string(),
            current: current.to_string(),
            operation: operation.into(),
        }
    }

    /// Create an unauthorized error naming the rejected actor
    pub fn unauthorized(
        actor: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Unauthorized {
            actor: actor.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an expired error for a decision attempted after expiration
    pub fn expired(
        entity: impl Into<String>,
        id: impl ToString,
        expired_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self::Expired {
            entity: entity.into(),
            id: id.to_string(),
            expired_at,
        }
    }

    /// Create a delivery-failure error for internal drain bookkeeping
    pub fn delivery_failure(
        message_id: impl ToString,
        topic: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::DeliveryFailure {
            message_id: message_id.to_string(),
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create a wait-timeout error for a bounded wait that elapsed
    pub fn wait_timeout(entity: impl Into<String>, id: impl ToString, waited_ms: u64) -> Self {
        Self::WaitTimeout {
            entity: entity.into(),
            id: id.to_string(),
            waited_ms,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for CoordinationError {
    fn from(err: config::ConfigError) -> Self {
        CoordinationError::configuration(err.to_string())
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        CoordinationError::internal(format!("payload serialization: {err}"))
    }
}

/// Result type alias for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;
