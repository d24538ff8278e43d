//! # Audit Sink
//!
//! Collaborator interface for compliance-relevant coordination events.
//! The approval workflow reports request creation and decisions through an
//! [`AuditSink`]; callers wrapping coordinator operations can reuse the same
//! seam. Audit logging is fire-and-forget: sink failures are logged and never
//! block or fail coordination.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Severity attached to an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A compliance-relevant event reported to the audit sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened, e.g. "approval_request_created"
    pub event_type: String,
    /// Domain bucket, e.g. "hitl"
    pub category: String,
    pub severity: AuditSeverity,
    /// Whether the underlying operation succeeded
    pub success: bool,
    /// Structured context for the event
    pub details: Value,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        category: impl Into<String>,
        severity: AuditSeverity,
        success: bool,
        details: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            category: category.into(),
            severity,
            success,
            details,
        }
    }
}

/// Destination for audit events.
///
/// Implementations must be cheap to call from coordination paths; anything
/// slow belongs behind the implementation's own buffering.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event, returning the sink-assigned log id
    async fn log_event(&self, event: AuditEvent) -> anyhow::Result<Uuid>;
}

/// Default sink that emits audit events as structured tracing records
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_event(&self, event: AuditEvent) -> anyhow::Result<Uuid> {
        let log_id = Uuid::new_v4();
        tracing::info!(
            log_id = %log_id,
            event_type = %event.event_type,
            category = %event.category,
            severity = %event.severity,
            success = event.success,
            details = %event.details,
            "AUDIT_EVENT"
        );
        Ok(log_id)
    }
}
