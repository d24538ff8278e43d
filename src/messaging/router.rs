//! # Message Router
//!
//! In-process pub/sub with priority-ordered delivery. Publishing records the
//! message in a bounded history, enqueues it, and returns immediately; a
//! single background drain task (claimed by whichever publish finds the
//! router idle) pops messages in priority order with FIFO ordering among
//! equals and invokes matching handlers sequentially.
//!
//! Delivery outcomes never propagate to publishers. A message that expires in
//! the queue, matches no subscription, or fails in every handler ends up
//! `Failed` in the history; callers inspect history or stats to observe
//! outcomes.
//!
//! Handlers run outside all router locks, so they may publish or subscribe
//! freely. A handler must not wait for router idleness, since the drain task
//! cannot finish while one of its handlers is suspended.
//!
//! ## Usage
//!
//! ```rust
//! use avatar_core::messaging::{MessageRouter, MessageStatus};
//! use futures::FutureExt;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let router = MessageRouter::default();
//! router
//!     .subscribe_fn("task.created", "inbox", |message| {
//!         async move {
//!             tracing::debug!(topic = %message.topic, "received");
//!             Ok(())
//!         }
//!         .boxed()
//!     })
//!     .await;
//!
//! let id = router
//!     .publish("task.created", json!({"name": "summarize inbox"}), "demo")
//!     .await;
//! router.wait_until_idle().await;
//!
//! assert_eq!(router.get_message(id).unwrap().status, MessageStatus::Delivered);
//! # });
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RouterConfig;
use crate::error::{CoordinationError, Result};
use crate::messaging::message::{Message, MessageStatus, PublishOptions};
use crate::messaging::subscription::{
    FnHandler, MessageHandler, SubscribeOptions, Subscription,
};

/// Queue entry ordered by priority, then arrival
struct QueuedMessage {
    seq: u64,
    message: Message,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.message.priority == other.message.priority && self.seq == other.seq
    }
}

impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority wins, earlier arrival breaks ties
        self.message
            .priority
            .cmp(&other.message.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Point-in-time router statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStats {
    pub published: u64,
    pub delivered: u64,
    pub failed: u64,
    pub expired: u64,
    pub acknowledged: u64,
    pub pending: usize,
    pub subscriptions: usize,
    pub history_len: usize,
}

/// Priority-ordered in-process message router.
///
/// Cheap to clone; all clones share the same queue, subscriptions, and
/// history.
#[derive(Clone)]
pub struct MessageRouter {
    subscriptions: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
    queue: Arc<Mutex<BinaryHeap<QueuedMessage>>>,
    /// Every published message, oldest evicted past capacity. Status is
    /// updated in place as delivery resolves.
    history: Arc<Mutex<VecDeque<Message>>>,
    history_capacity: usize,
    seq: Arc<AtomicU64>,
    draining: Arc<AtomicBool>,
    idle_notify: Arc<Notify>,
    published: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    expired: Arc<AtomicU64>,
    acknowledged: Arc<AtomicU64>,
}

impl MessageRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(Mutex::new(BinaryHeap::new())),
            history: Arc::new(Mutex::new(VecDeque::new())),
            history_capacity: config.history_capacity,
            seq: Arc::new(AtomicU64::new(0)),
            draining: Arc::new(AtomicBool::new(false)),
            idle_notify: Arc::new(Notify::new()),
            published: Arc::new(AtomicU64::new(0)),
            delivered: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            expired: Arc::new(AtomicU64::new(0)),
            acknowledged: Arc::new(AtomicU64::new(0)),
        }
    }

    // ---------- Subscription management ----------

    /// Subscribe a handler to a topic with default options
    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Uuid {
        self.subscribe_with(topic, handler, SubscribeOptions::default())
            .await
    }

    /// Subscribe a handler to a topic
    pub async fn subscribe_with(
        &self,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
    ) -> Uuid {
        let topic = topic.into();
        let subscription = Subscription::new(topic.clone(), handler, options);
        let subscription_id = subscription.id;

        debug!(
            topic = %topic,
            subscription_id = %subscription_id,
            handler = subscription.handler.handler_name(),
            subscriber_id = ?subscription.subscriber_id,
            "Subscription registered"
        );

        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.entry(topic).or_default().push(subscription);
        subscription_id
    }

    /// Subscribe a closure to a topic. The closure receives an owned copy of
    /// each delivered message.
    pub async fn subscribe_fn<F>(
        &self,
        topic: impl Into<String>,
        name: impl Into<String>,
        func: F,
    ) -> Uuid
    where
        F: Fn(Message) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.subscribe(topic, Arc::new(FnHandler::new(name, func)))
            .await
    }

    /// Remove a subscription by id
    pub async fn unsubscribe(&self, subscription_id: Uuid) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        let mut removed_from: Option<(String, bool)> = None;
        for (topic, subs) in subscriptions.iter_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == subscription_id) {
                subs.remove(pos);
                removed_from = Some((topic.clone(), subs.is_empty()));
                break;
            }
        }
        let Some((topic, emptied)) = removed_from else {
            return Err(CoordinationError::not_found("subscription", subscription_id));
        };
        if emptied {
            subscriptions.remove(&topic);
        }
        debug!(
            topic = %topic,
            subscription_id = %subscription_id,
            "Subscription removed"
        );
        Ok(())
    }

    /// Remove every subscription on a topic. Returns the number removed.
    pub async fn unsubscribe_topic(&self, topic: &str) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let removed = subscriptions.remove(topic).map(|s| s.len()).unwrap_or(0);
        if removed > 0 {
            debug!(topic = %topic, count = removed, "Topic subscriptions removed");
        }
        removed
    }

    /// Total subscriptions across all topics
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.values().map(Vec::len).sum()
    }

    /// Subscriptions on one topic
    pub async fn topic_subscription_count(&self, topic: &str) -> usize {
        self.subscriptions
            .read()
            .await
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    // ---------- Publishing ----------

    /// Publish a broadcast message with default options
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: serde_json::Value,
        sender: impl Into<String>,
    ) -> Uuid {
        self.publish_with(topic, payload, sender, PublishOptions::default())
            .await
    }

    /// Publish a message.
    ///
    /// Records the message, enqueues it, and returns its id without waiting
    /// for delivery. The first publish onto an idle router claims and spawns
    /// the drain task; concurrent and re-entrant publishes only enqueue.
    pub async fn publish_with(
        &self,
        topic: impl Into<String>,
        payload: serde_json::Value,
        sender: impl Into<String>,
        options: PublishOptions,
    ) -> Uuid {
        let message = Message::new(topic, payload, sender, options);
        let message_id = message.id;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        debug!(
            message_id = %message_id,
            topic = %message.topic,
            priority = %message.priority,
            receiver = ?message.receiver,
            "Message published"
        );

        {
            let mut history = self.history.lock();
            history.push_back(message.clone());
            while history.len() > self.history_capacity {
                history.pop_front();
            }
        }
        self.queue.lock().push(QueuedMessage { seq, message });
        self.published.fetch_add(1, Ordering::SeqCst);

        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let router = self.clone();
            tokio::spawn(async move { router.drain().await });
        }

        message_id
    }

    /// Wait until the queue is empty and no drain task is running
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.idle_notify.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.lock().is_empty() && !self.draining.load(Ordering::SeqCst)
    }

    // ---------- Drain loop ----------

    async fn drain(&self) {
        loop {
            let next = self.queue.lock().pop();
            let Some(queued) = next else {
                self.draining.store(false, Ordering::SeqCst);
                // A publisher may have enqueued after our empty pop and lost
                // the claim race. Reclaim if work remains, otherwise signal
                // idle waiters.
                let reclaimed = !self.queue.lock().is_empty()
                    && self
                        .draining
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok();
                if reclaimed {
                    continue;
                }
                self.idle_notify.notify_waiters();
                return;
            };

            self.deliver(queued.message).await;
        }
    }

    /// Deliver one message to every matching subscription and resolve its
    /// final status
    async fn deliver(&self, message: Message) {
        let now = Utc::now();

        if message.is_expired_at(now) {
            warn!(
                message_id = %message.id,
                topic = %message.topic,
                expires_at = ?message.expires_at,
                "Message expired before delivery"
            );
            self.expired.fetch_add(1, Ordering::SeqCst);
            self.resolve(message.id, MessageStatus::Failed);
            return;
        }

        // Snapshot matching subscriptions so handlers run without any lock
        let matching: Vec<Subscription> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .get(&message.topic)
                .map(|subs| {
                    subs.iter()
                        .filter(|s| s.matches(&message))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        if matching.is_empty() {
            let failure = CoordinationError::delivery_failure(
                message.id,
                &message.topic,
                "no matching subscribers",
            );
            warn!(
                message_id = %message.id,
                topic = %message.topic,
                error = %failure,
                "Message undeliverable"
            );
            self.resolve(message.id, MessageStatus::Failed);
            return;
        }

        let mut delivered_to: Vec<Uuid> = Vec::with_capacity(matching.len());
        for subscription in &matching {
            match subscription.handler.handle(&message).await {
                Ok(()) => delivered_to.push(subscription.id),
                Err(e) => {
                    error!(
                        message_id = %message.id,
                        topic = %message.topic,
                        subscription_id = %subscription.id,
                        handler = subscription.handler.handler_name(),
                        error = %e,
                        "Handler failed"
                    );
                }
            }
        }

        if !delivered_to.is_empty() {
            let delivered_at = Utc::now();
            let mut subscriptions = self.subscriptions.write().await;
            if let Some(subs) = subscriptions.get_mut(&message.topic) {
                for sub in subs.iter_mut() {
                    if delivered_to.contains(&sub.id) {
                        sub.deliveries += 1;
                        sub.last_delivery_at = Some(delivered_at);
                    }
                }
            }
        }

        if delivered_to.is_empty() {
            let failure = CoordinationError::delivery_failure(
                message.id,
                &message.topic,
                format!("all {} handlers failed", matching.len()),
            );
            warn!(message_id = %message.id, error = %failure, "Message undeliverable");
            self.resolve(message.id, MessageStatus::Failed);
        } else {
            debug!(
                message_id = %message.id,
                topic = %message.topic,
                handlers = delivered_to.len(),
                "Message delivered"
            );
            self.resolve(message.id, MessageStatus::Delivered);
        }
    }

    /// Record a message's final delivery status in the history
    fn resolve(&self, message_id: Uuid, status: MessageStatus) {
        match status {
            MessageStatus::Delivered => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
            }
            MessageStatus::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        let mut history = self.history.lock();
        // May have been evicted already under publish bursts past capacity
        if let Some(entry) = history.iter_mut().find(|m| m.id == message_id) {
            entry.status = status;
        }
    }

    // ---------- Inspection ----------

    /// Acknowledge receipt of a delivered message
    pub async fn acknowledge(&self, message_id: Uuid) -> Result<()> {
        let mut history = self.history.lock();
        let Some(message) = history.iter_mut().find(|m| m.id == message_id) else {
            return Err(CoordinationError::not_found("message", message_id));
        };
        if !message.status.can_advance_to(MessageStatus::Acknowledged) {
            return Err(CoordinationError::invalid_state(
                "message",
                message_id,
                message.status.to_string(),
                "acknowledge",
            ));
        }
        message.status = MessageStatus::Acknowledged;
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
        info!(message_id = %message_id, "Message acknowledged");
        Ok(())
    }

    /// Look up a message by id
    pub fn get_message(&self, message_id: Uuid) -> Option<Message> {
        self.history
            .lock()
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    /// Most recent messages, newest first
    pub fn history(&self, limit: usize) -> Vec<Message> {
        self.history
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent messages on one topic, newest first
    pub fn topic_history(&self, topic: &str, limit: usize) -> Vec<Message> {
        self.history
            .lock()
            .iter()
            .rev()
            .filter(|m| m.topic == topic)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Messages waiting in the queue
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    pub async fn stats(&self) -> RouterStats {
        let subscriptions = self.subscription_count().await;
        RouterStats {
            published: self.published.load(Ordering::SeqCst),
            delivered: self.delivered.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            expired: self.expired.load(Ordering::SeqCst),
            acknowledged: self.acknowledged.load(Ordering::SeqCst),
            pending: self.pending_count(),
            subscriptions,
            history_len: self.history.lock().len(),
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("pending", &self.pending_count())
            .field("draining", &self.draining.load(Ordering::SeqCst))
            .field("history_capacity", &self.history_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::MessagePriority;
    use std::sync::atomic::AtomicUsize;

    fn collecting_handler(
        log: Arc<Mutex<Vec<String>>>,
    ) -> impl Fn(Message) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync {
        move |message: Message| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().push(message.topic.clone());
                Ok(())
            }) as BoxFuture<'static, anyhow::Result<()>>
        }
    }

    #[tokio::test]
    async fn test_publish_and_deliver() {
        let router = MessageRouter::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        router
            .subscribe_fn("task.created", "collector", collecting_handler(log.clone()))
            .await;

        let id = router
            .publish("task.created", serde_json::json!({"n": 1}), "tester")
            .await;
        router.wait_until_idle().await;

        assert_eq!(log.lock().as_slice(), ["task.created"]);
        let message = router.get_message(id).unwrap();
        assert_eq!(message.status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_priority_order_with_fifo_ties() {
        let router = MessageRouter::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = order.clone();
        router
            .subscribe_fn("work", "collector", move |message: Message| {
                let order = order_clone.clone();
                Box::pin(async move {
                    order
                        .lock()
                        .push(message.payload["label"].as_str().unwrap().to_string());
                    Ok(())
                }) as BoxFuture<'static, anyhow::Result<()>>
            })
            .await;

        // Enqueued before the drain task gets polled on this runtime
        for (label, priority) in [
            ("a", MessagePriority::Low),
            ("b", MessagePriority::Urgent),
            ("c", MessagePriority::Normal),
            ("d", MessagePriority::Urgent),
        ] {
            router
                .publish_with(
                    "work",
                    serde_json::json!({"label": label}),
                    "tester",
                    PublishOptions::default().with_priority(priority),
                )
                .await;
        }
        router.wait_until_idle().await;

        assert_eq!(order.lock().as_slice(), ["b", "d", "c", "a"]);
    }

    #[tokio::test]
    async fn test_no_subscribers_marks_failed() {
        let router = MessageRouter::default();
        let id = router
            .publish("nobody.listens", serde_json::json!({}), "tester")
            .await;
        router.wait_until_idle().await;

        let message = router.get_message(id).unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(router.stats().await.failed, 1);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_others() {
        let router = MessageRouter::default();
        let successes = Arc::new(AtomicUsize::new(0));

        router
            .subscribe_fn("work", "failing", |_message: Message| {
                Box::pin(async move { anyhow::bail!("handler exploded") })
                    as BoxFuture<'static, anyhow::Result<()>>
            })
            .await;
        let successes_clone = successes.clone();
        router
            .subscribe_fn("work", "succeeding", move |_message: Message| {
                let successes = successes_clone.clone();
                Box::pin(async move {
                    successes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as BoxFuture<'static, anyhow::Result<()>>
            })
            .await;

        let id = router.publish("work", serde_json::json!({}), "tester").await;
        router.wait_until_idle().await;

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        // One handler succeeded, so the message still counts as delivered
        assert_eq!(
            router.get_message(id).unwrap().status,
            MessageStatus::Delivered
        );
    }

    #[tokio::test]
    async fn test_all_handlers_failing_marks_failed() {
        let router = MessageRouter::default();
        router
            .subscribe_fn("work", "failing", |_message: Message| {
                Box::pin(async move { anyhow::bail!("nope") })
                    as BoxFuture<'static, anyhow::Result<()>>
            })
            .await;

        let id = router.publish("work", serde_json::json!({}), "tester").await;
        router.wait_until_idle().await;

        assert_eq!(router.get_message(id).unwrap().status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn test_expired_message_not_delivered() {
        let router = MessageRouter::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        router
            .subscribe_fn("work", "collector", collecting_handler(log.clone()))
            .await;

        let id = router
            .publish_with(
                "work",
                serde_json::json!({}),
                "tester",
                PublishOptions::default().with_expires_in(chrono::Duration::milliseconds(-10)),
            )
            .await;
        router.wait_until_idle().await;

        assert!(log.lock().is_empty());
        assert_eq!(router.get_message(id).unwrap().status, MessageStatus::Failed);
        let stats = router.stats().await;
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_targeted_delivery_skips_other_identities() {
        let router = MessageRouter::default();
        let seen_by_one = Arc::new(AtomicUsize::new(0));
        let seen_by_two = Arc::new(AtomicUsize::new(0));
        let seen_anon = Arc::new(AtomicUsize::new(0));

        for (id, counter) in [
            (Some("worker_1"), seen_by_one.clone()),
            (Some("worker_2"), seen_by_two.clone()),
            (None, seen_anon.clone()),
        ] {
            let mut options = SubscribeOptions::default();
            if let Some(id) = id {
                options = options.with_subscriber_id(id);
            }
            router
                .subscribe_with(
                    "task.updated",
                    Arc::new(FnHandler::new("counter", move |_m: Message| {
                        let counter = counter.clone();
                        Box::pin(async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }) as BoxFuture<'static, anyhow::Result<()>>
                    })),
                    options,
                )
                .await;
        }

        router
            .publish_with(
                "task.updated",
                serde_json::json!({}),
                "coordinator",
                PublishOptions::default().with_receiver("worker_1"),
            )
            .await;
        router.wait_until_idle().await;

        assert_eq!(seen_by_one.load(Ordering::SeqCst), 1);
        assert_eq!(seen_by_two.load(Ordering::SeqCst), 0);
        assert_eq!(seen_anon.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_min_priority_filter() {
        let router = MessageRouter::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        router
            .subscribe_with(
                "alerts",
                Arc::new(FnHandler::new("urgent_only", move |_m: Message| {
                    let seen = seen_clone.clone();
                    Box::pin(async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }) as BoxFuture<'static, anyhow::Result<()>>
                })),
                SubscribeOptions::default().with_min_priority(MessagePriority::High),
            )
            .await;

        router
            .publish_with(
                "alerts",
                serde_json::json!({}),
                "tester",
                PublishOptions::default().with_priority(MessagePriority::Normal),
            )
            .await;
        router
            .publish_with(
                "alerts",
                serde_json::json!({}),
                "tester",
                PublishOptions::default().with_priority(MessagePriority::Urgent),
            )
            .await;
        router.wait_until_idle().await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reentrant_publish_from_handler() {
        let router = MessageRouter::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        let router_clone = router.clone();
        let log_clone = log.clone();
        router
            .subscribe_fn("first", "chainer", move |_message: Message| {
                let router = router_clone.clone();
                let log = log_clone.clone();
                Box::pin(async move {
                    log.lock().push("first".to_string());
                    router.publish("second", serde_json::json!({}), "chainer").await;
                    Ok(())
                }) as BoxFuture<'static, anyhow::Result<()>>
            })
            .await;
        router
            .subscribe_fn("second", "collector", collecting_handler(log.clone()))
            .await;

        router.publish("first", serde_json::json!({}), "tester").await;
        router.wait_until_idle().await;

        assert_eq!(log.lock().as_slice(), ["first", "second"]);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let router = MessageRouter::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sub_id = router
            .subscribe_fn("work", "collector", collecting_handler(log.clone()))
            .await;
        assert_eq!(router.subscription_count().await, 1);

        router.unsubscribe(sub_id).await.unwrap();
        assert_eq!(router.subscription_count().await, 0);

        let err = router.unsubscribe(sub_id).await.unwrap_err();
        assert!(matches!(err, CoordinationError::NotFound { .. }));

        router.publish("work", serde_json::json!({}), "tester").await;
        router.wait_until_idle().await;
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_topic() {
        let router = MessageRouter::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        router
            .subscribe_fn("work", "one", collecting_handler(log.clone()))
            .await;
        router
            .subscribe_fn("work", "two", collecting_handler(log.clone()))
            .await;
        router
            .subscribe_fn("other", "three", collecting_handler(log.clone()))
            .await;

        assert_eq!(router.unsubscribe_topic("work").await, 2);
        assert_eq!(router.unsubscribe_topic("work").await, 0);
        assert_eq!(router.subscription_count().await, 1);
    }

    #[tokio::test]
    async fn test_acknowledge_lifecycle() {
        let router = MessageRouter::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        router
            .subscribe_fn("work", "collector", collecting_handler(log.clone()))
            .await;

        let id = router.publish("work", serde_json::json!({}), "tester").await;
        router.wait_until_idle().await;

        router.acknowledge(id).await.unwrap();
        assert_eq!(
            router.get_message(id).unwrap().status,
            MessageStatus::Acknowledged
        );

        // Double acknowledge is rejected
        let err = router.acknowledge(id).await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidState { .. }));

        // Unknown id
        let err = router.acknowledge(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoordinationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_acknowledge_failed_message_rejected() {
        let router = MessageRouter::default();
        let id = router.publish("void", serde_json::json!({}), "tester").await;
        router.wait_until_idle().await;

        let err = router.acknowledge(id).await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_history_capacity_evicts_oldest() {
        let router = MessageRouter::new(RouterConfig {
            history_capacity: 3,
        });
        let first = router.publish("void", serde_json::json!({"n": 0}), "t").await;
        for n in 1..4 {
            router.publish("void", serde_json::json!({"n": n}), "t").await;
        }
        router.wait_until_idle().await;

        let history = router.history(10);
        assert_eq!(history.len(), 3);
        assert!(router.get_message(first).is_none());
        // Newest first
        assert_eq!(history[0].payload["n"], 3);
    }

    #[tokio::test]
    async fn test_pending_message_visible_in_history() {
        let router = MessageRouter::default();
        // No subscriber and no drain has run yet on this runtime
        let id = router.publish("work", serde_json::json!({}), "t").await;

        let message = router.get_message(id).unwrap();
        assert_eq!(message.status, MessageStatus::Pending);
        assert_eq!(router.pending_count(), 1);

        router.wait_until_idle().await;
        assert_eq!(router.get_message(id).unwrap().status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn test_topic_history_filters() {
        let router = MessageRouter::default();
        router.publish("a", serde_json::json!({}), "t").await;
        router.publish("b", serde_json::json!({}), "t").await;
        router.publish("a", serde_json::json!({}), "t").await;
        router.wait_until_idle().await;

        assert_eq!(router.topic_history("a", 10).len(), 2);
        assert_eq!(router.topic_history("b", 10).len(), 1);
        assert_eq!(router.history(10).len(), 3);
    }

    #[tokio::test]
    async fn test_stats() {
        let router = MessageRouter::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        router
            .subscribe_fn("work", "collector", collecting_handler(log.clone()))
            .await;

        router.publish("work", serde_json::json!({}), "t").await;
        router.publish("void", serde_json::json!({}), "t").await;
        router.wait_until_idle().await;

        let stats = router.stats().await;
        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.expired, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.subscriptions, 1);
        assert_eq!(stats.history_len, 2);
    }

    #[tokio::test]
    async fn test_wait_until_idle_on_idle_router() {
        let router = MessageRouter::default();
        // Returns immediately when nothing was ever published
        router.wait_until_idle().await;
    }

    #[tokio::test]
    async fn test_subscription_delivery_counters() {
        let router = MessageRouter::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sub_id = router
            .subscribe_fn("work", "collector", collecting_handler(log.clone()))
            .await;

        router.publish("work", serde_json::json!({}), "t").await;
        router.publish("work", serde_json::json!({}), "t").await;
        router.wait_until_idle().await;

        let subscriptions = router.subscriptions.read().await;
        let sub = subscriptions["work"].iter().find(|s| s.id == sub_id).unwrap();
        assert_eq!(sub.deliveries, 2);
        assert!(sub.last_delivery_at.is_some());
    }
}
