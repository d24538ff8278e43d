//! # System Constants and Topic Taxonomy
//!
//! The fixed channel-name contract shared by every producer and consumer of
//! the coordination core, plus system-wide constants.
//!
//! Topic strings are part of the external contract: callers must use these
//! constants verbatim rather than re-deriving the strings.

/// Topic names, partitioned by domain.
///
/// The core itself publishes and subscribes on the `task.*`, `avatar.*`,
/// `hitl.*` and `system.*` entries. The `collaboration.*` and `resource.*`
/// channels are reserved for external collaborators that share the router.
pub mod topics {
    // Task lifecycle
    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_UPDATED: &str = "task.updated";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_CANCELLED: &str = "task.cancelled";

    // Avatar (worker) lifecycle
    pub const AVATAR_REGISTERED: &str = "avatar.registered";
    pub const AVATAR_UNREGISTERED: &str = "avatar.unregistered";
    pub const AVATAR_STATUS: &str = "avatar.status";
    pub const AVATAR_HEARTBEAT: &str = "avatar.heartbeat";
    pub const AVATAR_OFFLINE: &str = "avatar.offline";

    // Avatar-to-avatar collaboration channels (reserved for collaborators)
    pub const COLLABORATION_REQUEST: &str = "collaboration.request";
    pub const COLLABORATION_RESPONSE: &str = "collaboration.response";

    // Shared resource claims (reserved for collaborators)
    pub const RESOURCE_CLAIMED: &str = "resource.claimed";
    pub const RESOURCE_RELEASED: &str = "resource.released";

    // Human-in-the-loop approval lifecycle
    pub const HITL_REQUEST_CREATED: &str = "hitl.request_created";
    pub const HITL_REQUEST_APPROVED: &str = "hitl.request_approved";
    pub const HITL_REQUEST_REJECTED: &str = "hitl.request_rejected";
    pub const HITL_REQUEST_CANCELLED: &str = "hitl.request_cancelled";
    pub const HITL_REQUEST_EXPIRED: &str = "hitl.request_expired";

    // System-level notifications
    pub const SYSTEM_STARTED: &str = "system.started";
    pub const SYSTEM_SHUTDOWN: &str = "system.shutdown";
    pub const SYSTEM_ERROR: &str = "system.error";
}

/// System-wide constants
pub mod system {
    /// Version compatibility marker
    pub const AVATAR_CORE_VERSION: &str = "0.1.0";

    /// Sender id the core uses for messages it publishes itself
    pub const COORDINATOR_SENDER: &str = "coordinator";

    /// Sender id the approval workflow uses for its own messages
    pub const WORKFLOW_SENDER: &str = "approval_workflow";

    /// Default bound on the router's delivery history
    pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

    /// Default worker heartbeat timeout in milliseconds
    pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 30_000;
}

/// Topic groupings used for wiring permanent subscribers
pub mod topic_groups {
    use super::topics;

    /// Topics the task coordinator reacts to
    pub const COORDINATOR_REACTIONS: &[&str] = &[
        topics::TASK_COMPLETED,
        topics::TASK_FAILED,
        topics::AVATAR_STATUS,
        topics::AVATAR_HEARTBEAT,
    ];

    /// Topics carrying approval decisions
    pub const HITL_DECISIONS: &[&str] = &[
        topics::HITL_REQUEST_APPROVED,
        topics::HITL_REQUEST_REJECTED,
        topics::HITL_REQUEST_CANCELLED,
        topics::HITL_REQUEST_EXPIRED,
    ];
}
