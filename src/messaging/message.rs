//! # Message Structures
//!
//! The message model carried by the router: topic-addressed, priority-ordered,
//! optionally expiring, with a status that only advances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Delivery priority, ordered `Low < Normal < High < Urgent`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for MessagePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Invalid message priority: {s}")),
        }
    }
}

/// Message delivery status.
///
/// Status only advances: `Pending → Delivered → Acknowledged`, or
/// `Pending → Failed`. A failed message is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Delivered,
    Acknowledged,
    Failed,
}

impl MessageStatus {
    /// Check if this is a terminal status (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acknowledged | Self::Failed)
    }

    /// Check whether advancing to `next` is a legal forward transition
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Delivered)
                | (Self::Pending, Self::Failed)
                | (Self::Delivered, Self::Acknowledged)
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Delivered => write!(f, "delivered"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A routed message.
///
/// Immutable once built except for `status`. An absent `receiver` means
/// broadcast to every subscriber on the topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub sender: String,
    pub receiver: Option<String>,
    pub payload: Value,
    pub priority: MessagePriority,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Build a message from publish inputs
    pub fn new(
        topic: impl Into<String>,
        payload: Value,
        sender: impl Into<String>,
        options: PublishOptions,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            sender: sender.into(),
            receiver: options.receiver,
            payload,
            priority: options.priority,
            status: MessageStatus::Pending,
            created_at,
            expires_at: options.expires_in.map(|ttl| created_at + ttl),
        }
    }

    /// Check whether the message's expiration has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Check whether the message's expiration has passed
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Get message age in milliseconds
    pub fn age_ms(&self) -> u64 {
        Utc::now()
            .signed_duration_since(self.created_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Optional publish parameters.
///
/// `expires_in` is signed: a non-positive duration produces a message that is
/// already expired and will be failed by the next drain without delivery.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub receiver: Option<String>,
    pub priority: MessagePriority,
    pub expires_in: Option<chrono::Duration>,
}

impl PublishOptions {
    pub fn with_receiver(mut self, receiver: impl Into<String>) -> Self {
        self.receiver = Some(receiver.into());
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expires_in(mut self, expires_in: chrono::Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(MessagePriority::Low < MessagePriority::Normal);
        assert!(MessagePriority::Normal < MessagePriority::High);
        assert!(MessagePriority::High < MessagePriority::Urgent);
        assert_eq!(MessagePriority::default(), MessagePriority::Normal);
    }

    #[test]
    fn test_priority_string_conversion() {
        assert_eq!(MessagePriority::Urgent.to_string(), "urgent");
        assert_eq!(
            "high".parse::<MessagePriority>().unwrap(),
            MessagePriority::High
        );
        assert!("shiny".parse::<MessagePriority>().is_err());
    }

    #[test]
    fn test_status_advancement() {
        assert!(MessageStatus::Pending.can_advance_to(MessageStatus::Delivered));
        assert!(MessageStatus::Pending.can_advance_to(MessageStatus::Failed));
        assert!(MessageStatus::Delivered.can_advance_to(MessageStatus::Acknowledged));

        assert!(!MessageStatus::Delivered.can_advance_to(MessageStatus::Pending));
        assert!(!MessageStatus::Failed.can_advance_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Acknowledged.can_advance_to(MessageStatus::Failed));

        assert!(MessageStatus::Failed.is_terminal());
        assert!(MessageStatus::Acknowledged.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
    }

    #[test]
    fn test_message_construction() {
        let msg = Message::new(
            "task.created",
            serde_json::json!({"task_id": 1}),
            "coordinator",
            PublishOptions::default()
                .with_receiver("worker_1")
                .with_priority(MessagePriority::High),
        );

        assert_eq!(msg.topic, "task.created");
        assert_eq!(msg.sender, "coordinator");
        assert_eq!(msg.receiver.as_deref(), Some("worker_1"));
        assert_eq!(msg.priority, MessagePriority::High);
        assert_eq!(msg.status, MessageStatus::Pending);
        assert!(msg.expires_at.is_none());
        assert!(!msg.is_expired());
    }

    #[test]
    fn test_negative_expiration_is_already_expired() {
        let msg = Message::new(
            "task.created",
            serde_json::json!({}),
            "coordinator",
            PublishOptions::default().with_expires_in(chrono::Duration::milliseconds(-1)),
        );
        assert!(msg.is_expired());

        let msg = Message::new(
            "task.created",
            serde_json::json!({}),
            "coordinator",
            PublishOptions::default().with_expires_in(chrono::Duration::seconds(60)),
        );
        assert!(!msg.is_expired());
    }

    #[test]
    fn test_message_serde() {
        let msg = Message::new(
            "hitl.request_created",
            serde_json::json!({"request_id": "r-1"}),
            "approval_workflow",
            PublishOptions::default(),
        );

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"pending\""));
        assert!(json.contains("\"normal\""));

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, msg.id);
        assert_eq!(parsed.status, MessageStatus::Pending);
    }
}
