//! # Human-in-the-Loop Approval
//!
//! Approval gating for actions that need an explicit human (or delegated)
//! decision before they proceed. Requests are created Pending, decided by
//! approve/reject/cancel, or lapse to Expired when their TTL passes; every
//! outcome publishes a `hitl.*` event, fires registered decision hooks, and
//! reports to the audit sink.
//!
//! Callers gate on an outcome with [`ApprovalWorkflow::wait_for_decision`],
//! which suspends on a per-request notification rather than polling.

pub mod request;
pub mod workflow;

pub use request::{ApprovalDefinition, ApprovalRequest, ApprovalStatus};
pub use workflow::{ApprovalStats, ApprovalWorkflow, DecisionHook};
