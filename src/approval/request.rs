//! Approval request model for human-in-the-loop gating

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::messaging::MessagePriority;

/// Approval request lifecycle states. Every state other than Pending is
/// terminal; a decided request never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for a decision
    Pending,
    Approved,
    Rejected,
    /// Withdrawn by the requester before any decision
    Cancelled,
    /// Expiration passed without a decision
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Invalid approval status: {s}")),
        }
    }
}

/// Parameters for creating an approval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDefinition {
    /// Kind of decision being requested, e.g. "deploy" or "tool_use"
    pub request_type: String,
    pub title: String,
    pub description: String,
    /// Who is asking; decision events are addressed back here
    pub requester: String,
    /// Designated approver. When set, only this identity may decide;
    /// when unset, any caller may.
    pub approver: Option<String>,
    pub priority: MessagePriority,
    pub request_data: Value,
    /// Time until expiration. When unset, the workflow's default TTL
    /// applies; with neither, the request never expires.
    pub expires_in: Option<chrono::Duration>,
}

impl ApprovalDefinition {
    pub fn new(
        request_type: impl Into<String>,
        title: impl Into<String>,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            request_type: request_type.into(),
            title: title.into(),
            description: String::new(),
            requester: requester.into(),
            approver: None,
            priority: MessagePriority::Normal,
            request_data: Value::Null,
            expires_in: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_approver(mut self, approver: impl Into<String>) -> Self {
        self.approver = Some(approver.into());
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_request_data(mut self, request_data: Value) -> Self {
        self.request_data = request_data;
        self
    }

    pub fn with_expires_in(mut self, expires_in: chrono::Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }
}

/// A pending or decided approval request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub request_type: String,
    pub title: String,
    pub description: String,
    pub requester: String,
    pub approver: Option<String>,
    pub status: ApprovalStatus,
    pub priority: MessagePriority,
    pub request_data: Value,
    pub decision_comment: Option<String>,
    pub decision_result: Option<Value>,
    pub decided_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(definition: ApprovalDefinition) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request_type: definition.request_type,
            title: definition.title,
            description: definition.description,
            requester: definition.requester,
            approver: definition.approver,
            status: ApprovalStatus::Pending,
            priority: definition.priority,
            request_data: definition.request_data,
            decision_comment: None,
            decision_result: None,
            decided_by: None,
            created_at,
            decided_at: None,
            expires_at: definition.expires_in.map(|ttl| created_at + ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending
            && self.expires_at.is_some_and(|at| at <= now)
    }
}
