//! # Subscriptions and Handlers
//!
//! The subscriber seam of the router. Components implement [`MessageHandler`]
//! (or wrap a closure in [`FnHandler`]) and register per topic with an
//! optional priority floor and delivery identity.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

use super::message::{Message, MessagePriority};

/// Trait for message subscribers.
///
/// Handler errors are caught by the router, logged, and folded into the
/// message's delivery outcome; they never propagate to the publisher.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a delivered message
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;

    /// Get handler name for logging
    fn handler_name(&self) -> &str {
        "unnamed_handler"
    }
}

/// Adapter that lets a closure act as a [`MessageHandler`]
pub struct FnHandler<F>
where
    F: Fn(Message) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    func: F,
    name: String,
}

impl<F> FnHandler<F>
where
    F: Fn(Message) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            func,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        (self.func)(message.clone()).await
    }

    fn handler_name(&self) -> &str {
        &self.name
    }
}

/// A registered subscription on one topic
#[derive(Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub topic: String,
    pub handler: Arc<dyn MessageHandler>,
    /// Messages below this priority are not delivered to this subscription
    pub min_priority: MessagePriority,
    /// Delivery identity: a message with a `receiver` set is delivered only
    /// to subscriptions whose identity matches it
    pub subscriber_id: Option<String>,
    /// Informational only; no durable subscription storage exists
    pub durable: bool,
    pub created_at: DateTime<Utc>,
    pub deliveries: u64,
    pub last_delivery_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, handler: Arc<dyn MessageHandler>, options: SubscribeOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            handler,
            min_priority: options.min_priority,
            subscriber_id: options.subscriber_id,
            durable: options.durable,
            created_at: Utc::now(),
            deliveries: 0,
            last_delivery_at: None,
        }
    }

    /// Check whether this subscription should receive `message`
    pub fn matches(&self, message: &Message) -> bool {
        if message.priority < self.min_priority {
            return false;
        }
        match &message.receiver {
            Some(receiver) => self.subscriber_id.as_deref() == Some(receiver.as_str()),
            None => true,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("handler", &self.handler.handler_name())
            .field("min_priority", &self.min_priority)
            .field("subscriber_id", &self.subscriber_id)
            .field("durable", &self.durable)
            .field("deliveries", &self.deliveries)
            .field("last_delivery_at", &self.last_delivery_at)
            .finish()
    }
}

/// Optional subscribe parameters
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    pub min_priority: MessagePriority,
    pub subscriber_id: Option<String>,
    pub durable: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            // No floor: deliver every priority, including Low. Deriving
            // Default would inherit MessagePriority's default of Normal,
            // which is the publish default, not the subscribe floor.
            min_priority: MessagePriority::Low,
            subscriber_id: None,
            durable: false,
        }
    }
}

impl SubscribeOptions {
    pub fn with_min_priority(mut self, min_priority: MessagePriority) -> Self {
        self.min_priority = min_priority;
        self
    }

    pub fn with_subscriber_id(mut self, subscriber_id: impl Into<String>) -> Self {
        self.subscriber_id = Some(subscriber_id.into());
        self
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }
}
