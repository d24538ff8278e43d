#![allow(clippy::doc_markdown)] // Allow technical terms in docs without backticks
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Avatar Core
//!
//! In-process coordination core for avatar worker pools: priority message
//! routing, task assignment, and human-in-the-loop approvals.
//!
//! ## Overview
//!
//! Avatar Core is the coordination substrate beneath a pool of autonomous
//! avatar workers. Components never call each other directly; everything
//! flows through a shared [`messaging::MessageRouter`], so the worker pool,
//! the task coordinator, and the approval workflow stay decoupled behind a
//! fixed topic taxonomy ([`constants::topics`]).
//!
//! ## Architecture
//!
//! Three components share one router:
//!
//! - **Message Router** ([`messaging`]): priority-ordered pub/sub with
//!   targeted delivery, message expiration, and a bounded delivery history.
//!   `publish` never blocks; a single drain task delivers queued messages in
//!   priority-major, arrival-minor order.
//! - **Task Coordinator** ([`coordination`]): task table, worker registry,
//!   and a dispatch queue with pluggable assignment strategies. Workers
//!   report back over `task.*` and `avatar.*` topics; a heartbeat sweep
//!   reclaims tasks from silent workers.
//! - **Approval Workflow** ([`approval`]): human-in-the-loop gating with
//!   designated approvers, TTL expiration, decision hooks, and an audit
//!   trail ([`audit`]).
//!
//! ## Module Organization
//!
//! - [`messaging`] - Priority pub/sub router, messages, subscriptions
//! - [`coordination`] - Tasks, workers, assignment strategies, coordinator
//! - [`approval`] - Approval requests, decisions, expiration
//! - [`audit`] - Audit sink trait and default tracing sink
//! - [`config`] - Layered configuration (defaults, file, environment)
//! - [`constants`] - Topic taxonomy and system-wide defaults
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging bootstrap
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use avatar_core::config::CoordinationConfig;
//! use avatar_core::coordination::{TaskCoordinator, TaskDefinition, WorkerInfo};
//! use avatar_core::messaging::MessageRouter;
//!
//! # async fn example() -> avatar_core::Result<()> {
//! let config = CoordinationConfig::default();
//! let router = MessageRouter::new(config.router.clone());
//! let coordinator = TaskCoordinator::new(router.clone(), config.coordinator.clone());
//! coordinator.start().await?;
//!
//! coordinator.register_worker(WorkerInfo::new("avatar-1")).await?;
//! let task_id = coordinator
//!     .create_task(TaskDefinition::new("summarize inbox", "summarize"))
//!     .await?;
//!
//! router.wait_until_idle().await;
//! println!("task {task_id} dispatched");
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! The router serializes delivery in one drain task and every component
//! guards its own state behind a single lock, so observable ordering stays
//! deterministic even on a multi-threaded runtime. Handlers always run
//! outside locks, so a handler may publish again without deadlocking.
//! `publish` enqueues and returns; [`approval::ApprovalWorkflow::wait_for_decision`]
//! is the only suspending operation, bounded by an optional timeout.

pub mod approval;
pub mod audit;
pub mod config;
pub mod constants;
pub mod coordination;
pub mod error;
pub mod logging;
pub mod messaging;

pub use approval::{
    ApprovalDefinition, ApprovalRequest, ApprovalStats, ApprovalStatus, ApprovalWorkflow,
    DecisionHook,
};
pub use audit::{AuditEvent, AuditSeverity, AuditSink, TracingAuditSink};
pub use config::{ApprovalConfig, CoordinationConfig, CoordinatorConfig, RouterConfig};
pub use coordination::{
    AssignmentStrategy, CoordinatorStats, Task, TaskCoordinator, TaskDefinition, TaskState,
    Worker, WorkerInfo, WorkerStatus,
};
pub use error::{CoordinationError, Result};
pub use messaging::{
    Message, MessageHandler, MessagePriority, MessageRouter, MessageStatus, PublishOptions,
    RouterStats, SubscribeOptions,
};
