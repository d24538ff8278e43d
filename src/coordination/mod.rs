//! # Task Coordination
//!
//! Task and worker lifecycle management on top of the message router.
//!
//! The [`TaskCoordinator`] owns the task table, the worker registry, and a
//! priority dispatch queue. Workers never call the coordinator directly once
//! registered; they report completions, failures, status changes, and
//! heartbeats over router topics, and receive assignments the same way.
//!
//! ## Components
//!
//! - **task**: task records, definitions, and the task state machine
//! - **worker**: worker records and availability states
//! - **strategy**: pluggable worker selection (round robin, least loaded,
//!   capability match, random)
//! - **coordinator**: the coordinator itself plus its event subscriber and
//!   heartbeat sweep

pub mod coordinator;
pub mod strategy;
pub mod task;
pub mod worker;

pub use coordinator::{CoordinatorStats, TaskCoordinator};
pub use strategy::AssignmentStrategy;
pub use task::{Task, TaskDefinition, TaskState};
pub use worker::{Worker, WorkerInfo, WorkerStatus};
