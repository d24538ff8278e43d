//! # Messaging Module
//!
//! In-process priority pub/sub for avatar coordination. Provides the message
//! model, the subscription seam, and the router that drives priority-ordered
//! delivery between coordinator, workers, and approval workflow.

pub mod message;
pub mod router;
pub mod subscription;

pub use message::{Message, MessagePriority, MessageStatus, PublishOptions};
pub use router::{MessageRouter, RouterStats};
pub use subscription::{FnHandler, MessageHandler, SubscribeOptions, Subscription};
