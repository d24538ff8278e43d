//! # Approval Workflow
//!
//! Human-in-the-loop gating: callers create approval requests, designated
//! approvers decide them, and anything awaiting the outcome blocks on a
//! per-request notification instead of polling. Decisions, cancellations,
//! and expirations each publish a `hitl.*` event and report to the audit
//! sink.
//!
//! The request table is the single source of truth; waiters re-read it after
//! every wakeup, so a notification can never outrun the state it announces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSeverity, AuditSink, TracingAuditSink};
use crate::config::ApprovalConfig;
use crate::constants::{system, topics};
use crate::error::{CoordinationError, Result};
use crate::messaging::{MessageRouter, PublishOptions};

use super::request::{ApprovalDefinition, ApprovalRequest, ApprovalStatus};

/// Callback invoked when a request reaches a terminal status.
///
/// Hooks are registered per terminal status and run sequentially after the
/// decision event is published. A hook error is logged and swallowed; it
/// never undoes the decision.
#[async_trait]
pub trait DecisionHook: Send + Sync {
    async fn on_decision(&self, request: &ApprovalRequest) -> anyhow::Result<()>;

    fn hook_name(&self) -> &str {
        "unnamed_hook"
    }
}

/// Point-in-time approval workflow statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalStats {
    pub total_requests: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub cancelled: usize,
    pub expired: usize,
}

/// How a decision attempt resolved inside the request table lock
enum Applied {
    Decided(ApprovalRequest),
    Lapsed(ApprovalRequest, DateTime<Utc>),
}

/// Approval request manager over a shared [`MessageRouter`].
///
/// Cheap to clone; all clones share the same request table.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    router: MessageRouter,
    config: ApprovalConfig,
    requests: Arc<RwLock<HashMap<Uuid, ApprovalRequest>>>,
    waiters: Arc<parking_lot::Mutex<HashMap<Uuid, Arc<Notify>>>>,
    hooks: Arc<RwLock<HashMap<ApprovalStatus, Vec<Arc<dyn DecisionHook>>>>>,
    audit: Arc<dyn AuditSink>,
    running: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl ApprovalWorkflow {
    pub fn new(router: MessageRouter, config: ApprovalConfig) -> Self {
        Self {
            router,
            config,
            requests: Arc::new(RwLock::new(HashMap::new())),
            waiters: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            hooks: Arc::new(RwLock::new(HashMap::new())),
            audit: Arc::new(TracingAuditSink),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Replace the default tracing audit sink
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Spawn the expiration sweep loop
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoordinationError::invalid_state(
                "workflow",
                "approval_workflow",
                "running",
                "start",
            ));
        }

        let workflow = self.clone();
        let shutdown_notify = self.shutdown_notify.clone();
        let interval =
            std::time::Duration::from_millis(self.config.expiration_sweep_interval_ms.max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        workflow.sweep_expirations().await;
                    }
                    _ = shutdown_notify.notified() => {
                        debug!("Expiration sweep stopping");
                        break;
                    }
                }
            }
        });

        self.router
            .publish(
                topics::SYSTEM_STARTED,
                json!({
                    "component": "approval_workflow",
                    "version": system::AVATAR_CORE_VERSION,
                }),
                system::WORKFLOW_SENDER,
            )
            .await;

        info!(
            sweep_interval_ms = self.config.expiration_sweep_interval_ms,
            default_ttl_ms = self.config.default_ttl_ms,
            "Approval workflow started"
        );
        Ok(())
    }

    /// Stop the sweep loop. Idempotent. Pending requests and blocked waiters
    /// are left untouched.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown_notify.notify_waiters();

        self.router
            .publish(
                topics::SYSTEM_SHUTDOWN,
                json!({"component": "approval_workflow"}),
                system::WORKFLOW_SENDER,
            )
            .await;

        info!("Approval workflow shut down");
        Ok(())
    }

    // ---------- Request lifecycle ----------

    /// Create a Pending request. The request-created event is addressed to
    /// the designated approver, or broadcast when the request has none.
    pub async fn create_request(&self, definition: ApprovalDefinition) -> Result<Uuid> {
        let mut definition = definition;
        if definition.expires_in.is_none() {
            definition.expires_in = self
                .config
                .default_ttl_ms
                .map(|ms| chrono::Duration::milliseconds(ms as i64));
        }

        let request = ApprovalRequest::new(definition);
        let request_id = request.id;
        let payload = json!({
            "request_id": request_id,
            "request_type": request.request_type,
            "title": request.title,
            "requester": request.requester,
            "expires_at": request.expires_at,
        });
        let details = json!({
            "request_id": request_id,
            "request_type": request.request_type,
            "requester": request.requester,
            "approver": request.approver,
        });
        let mut options = PublishOptions::default().with_priority(request.priority);
        if let Some(approver) = &request.approver {
            options = options.with_receiver(approver.clone());
        }

        info!(
            request_id = %request_id,
            request_type = %request.request_type,
            requester = %request.requester,
            approver = ?request.approver,
            "Approval request created"
        );
        self.requests.write().await.insert(request_id, request);

        self.router
            .publish_with(
                topics::HITL_REQUEST_CREATED,
                payload,
                system::WORKFLOW_SENDER,
                options,
            )
            .await;
        self.audit_log(AuditEvent::new(
            "approval_request_created",
            "hitl",
            AuditSeverity::Info,
            true,
            details,
        ));
        Ok(request_id)
    }

    /// Approve a Pending request, optionally attaching a comment and a
    /// structured result for the requester.
    pub async fn approve(
        &self,
        request_id: Uuid,
        approver: impl Into<String>,
        comment: Option<String>,
        result: Option<Value>,
    ) -> Result<()> {
        self.decide(
            request_id,
            approver.into(),
            ApprovalStatus::Approved,
            comment,
            result,
        )
        .await
    }

    /// Reject a Pending request
    pub async fn reject(
        &self,
        request_id: Uuid,
        approver: impl Into<String>,
        comment: Option<String>,
    ) -> Result<()> {
        self.decide(
            request_id,
            approver.into(),
            ApprovalStatus::Rejected,
            comment,
            None,
        )
        .await
    }

    async fn decide(
        &self,
        request_id: Uuid,
        actor: String,
        decision: ApprovalStatus,
        comment: Option<String>,
        result: Option<Value>,
    ) -> Result<()> {
        let operation = match decision {
            ApprovalStatus::Approved => "approve",
            _ => "reject",
        };

        let applied = {
            let mut requests = self.requests.write().await;
            let request = requests
                .get_mut(&request_id)
                .ok_or_else(|| CoordinationError::not_found("approval request", request_id))?;

            if request.status != ApprovalStatus::Pending {
                return Err(CoordinationError::invalid_state(
                    "approval request",
                    request_id,
                    request.status.to_string(),
                    operation,
                ));
            }

            let now = Utc::now();
            if request.is_expired_at(now) {
                // The decision arrived too late; the request lapses instead
                request.status = ApprovalStatus::Expired;
                let expired_at = request.expires_at.unwrap_or(now);
                Applied::Lapsed(request.clone(), expired_at)
            } else {
                if let Some(designated) = &request.approver {
                    if *designated != actor {
                        return Err(CoordinationError::unauthorized(
                            actor,
                            operation,
                            format!("designated approver is {designated}"),
                        ));
                    }
                }
                request.status = decision;
                request.decided_by = Some(actor);
                request.decided_at = Some(now);
                request.decision_comment = comment;
                request.decision_result = result;
                Applied::Decided(request.clone())
            }
        };

        match applied {
            Applied::Lapsed(request, expired_at) => {
                warn!(
                    request_id = %request_id,
                    operation,
                    expired_at = %expired_at,
                    "Decision attempted on expired request"
                );
                self.finish(&request, topics::HITL_REQUEST_EXPIRED).await;
                Err(CoordinationError::expired(
                    "approval request",
                    request_id,
                    expired_at,
                ))
            }
            Applied::Decided(request) => {
                info!(
                    request_id = %request_id,
                    status = %request.status,
                    decided_by = ?request.decided_by,
                    "Approval request decided"
                );
                let topic = match request.status {
                    ApprovalStatus::Approved => topics::HITL_REQUEST_APPROVED,
                    _ => topics::HITL_REQUEST_REJECTED,
                };
                self.finish(&request, topic).await;
                Ok(())
            }
        }
    }

    /// Withdraw a Pending request. Only the original requester may cancel.
    pub async fn cancel(&self, request_id: Uuid, caller: &str) -> Result<()> {
        let snapshot = {
            let mut requests = self.requests.write().await;
            let request = requests
                .get_mut(&request_id)
                .ok_or_else(|| CoordinationError::not_found("approval request", request_id))?;

            if request.requester != caller {
                return Err(CoordinationError::unauthorized(
                    caller,
                    "cancel",
                    format!("only requester {} may cancel", request.requester),
                ));
            }
            if request.status != ApprovalStatus::Pending {
                return Err(CoordinationError::invalid_state(
                    "approval request",
                    request_id,
                    request.status.to_string(),
                    "cancel",
                ));
            }

            request.status = ApprovalStatus::Cancelled;
            request.decided_by = Some(caller.to_string());
            request.decided_at = Some(Utc::now());
            request.clone()
        };

        info!(request_id = %request_id, caller, "Approval request cancelled");
        self.finish(&snapshot, topics::HITL_REQUEST_CANCELLED).await;
        Ok(())
    }

    /// Block until the request leaves Pending, returning the terminal
    /// snapshot.
    ///
    /// A timeout reports [`CoordinationError::WaitTimeout`] and leaves the
    /// request Pending; a local wait running out never expires the request
    /// itself. Without a timeout the call waits indefinitely.
    pub async fn wait_for_decision(
        &self,
        request_id: Uuid,
        timeout: Option<std::time::Duration>,
    ) -> Result<ApprovalRequest> {
        let started = std::time::Instant::now();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            // Register for the wakeup before re-reading status, otherwise a
            // decision landing between the check and the await is lost
            let notify = self.waiter(request_id);
            let notified = notify.notified();

            {
                let requests = self.requests.read().await;
                let request = requests.get(&request_id).ok_or_else(|| {
                    CoordinationError::not_found("approval request", request_id)
                })?;
                if request.status.is_terminal() {
                    return Ok(request.clone());
                }
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(CoordinationError::wait_timeout(
                            "approval request",
                            request_id,
                            started.elapsed().as_millis() as u64,
                        ));
                    }
                }
            }
        }
    }

    /// Register a callback for requests reaching `status`. Only terminal
    /// statuses ever fire; a hook keyed on Pending is never invoked.
    pub async fn register_decision_hook(
        &self,
        status: ApprovalStatus,
        hook: Arc<dyn DecisionHook>,
    ) {
        self.hooks.write().await.entry(status).or_default().push(hook);
    }

    // ---------- Expiration and cleanup ----------

    /// Expiration sweep tick: lapse overdue Pending requests and purge
    /// terminal ones past the retention window
    async fn sweep_expirations(&self) {
        let lapsed: Vec<ApprovalRequest> = {
            let mut requests = self.requests.write().await;
            let now = Utc::now();
            let overdue: Vec<Uuid> = requests
                .values()
                .filter(|r| r.is_expired_at(now))
                .map(|r| r.id)
                .collect();
            overdue
                .into_iter()
                .filter_map(|id| {
                    let request = requests.get_mut(&id)?;
                    request.status = ApprovalStatus::Expired;
                    Some(request.clone())
                })
                .collect()
        };

        for request in &lapsed {
            warn!(
                request_id = %request.id,
                request_type = %request.request_type,
                "Approval request expired"
            );
            self.finish(request, topics::HITL_REQUEST_EXPIRED).await;
        }

        let retention = chrono::Duration::milliseconds(self.config.retention_ms as i64);
        self.purge_finished(retention).await;
    }

    /// Evict terminal requests finished longer than `retention` ago.
    /// Returns the number removed.
    pub async fn purge_finished(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut requests = self.requests.write().await;
        let purgeable: Vec<Uuid> = requests
            .values()
            .filter(|request| {
                let finished_at = request
                    .decided_at
                    .or(request.expires_at)
                    .unwrap_or(request.created_at);
                request.status.is_terminal() && finished_at < cutoff
            })
            .map(|request| request.id)
            .collect();

        let removed = purgeable.len();
        if removed > 0 {
            let mut waiters = self.waiters.lock();
            for id in purgeable {
                requests.remove(&id);
                waiters.remove(&id);
            }
            info!(removed, "Purged finished approval requests");
        }
        removed
    }

    // ---------- Introspection ----------

    pub async fn get_request(&self, request_id: Uuid) -> Option<ApprovalRequest> {
        self.requests.read().await.get(&request_id).cloned()
    }

    /// All requests ordered by creation time
    pub async fn get_all_requests(&self) -> Vec<ApprovalRequest> {
        let requests = self.requests.read().await;
        let mut all: Vec<ApprovalRequest> = requests.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        all
    }

    pub async fn requests_in_state(&self, status: ApprovalStatus) -> Vec<ApprovalRequest> {
        let requests = self.requests.read().await;
        let mut matching: Vec<ApprovalRequest> = requests
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        matching
    }

    /// Pending requests this approver may decide: those designating them
    /// plus those with no designated approver
    pub async fn pending_for_approver(&self, approver: &str) -> Vec<ApprovalRequest> {
        let requests = self.requests.read().await;
        let mut matching: Vec<ApprovalRequest> = requests
            .values()
            .filter(|r| {
                r.status == ApprovalStatus::Pending
                    && r.approver.as_deref().map_or(true, |a| a == approver)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        matching
    }

    pub async fn stats(&self) -> ApprovalStats {
        let requests = self.requests.read().await;
        let count =
            |s: ApprovalStatus| requests.values().filter(|r| r.status == s).count();
        ApprovalStats {
            total_requests: requests.len(),
            pending: count(ApprovalStatus::Pending),
            approved: count(ApprovalStatus::Approved),
            rejected: count(ApprovalStatus::Rejected),
            cancelled: count(ApprovalStatus::Cancelled),
            expired: count(ApprovalStatus::Expired),
        }
    }

    // ---------- Internals ----------

    fn waiter(&self, request_id: Uuid) -> Arc<Notify> {
        self.waiters
            .lock()
            .entry(request_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn wake_waiters(&self, request_id: Uuid) {
        if let Some(notify) = self.waiters.lock().remove(&request_id) {
            notify.notify_waiters();
        }
    }

    /// Terminal side effects shared by decisions, cancellations, and
    /// expirations: event publish, waiter wakeup, hooks, audit. Status is
    /// already terminal in the table before this runs.
    async fn finish(&self, request: &ApprovalRequest, topic: &'static str) {
        self.router
            .publish_with(
                topic,
                json!({
                    "request_id": request.id,
                    "request_type": request.request_type,
                    "status": request.status,
                    "decided_by": request.decided_by,
                    "decision_comment": request.decision_comment,
                    "decision_result": request.decision_result,
                }),
                system::WORKFLOW_SENDER,
                PublishOptions::default()
                    .with_receiver(request.requester.clone())
                    .with_priority(request.priority),
            )
            .await;

        self.wake_waiters(request.id);

        let hooks: Vec<Arc<dyn DecisionHook>> = {
            self.hooks
                .read()
                .await
                .get(&request.status)
                .cloned()
                .unwrap_or_default()
        };
        for hook in hooks {
            if let Err(e) = hook.on_decision(request).await {
                warn!(
                    hook = hook.hook_name(),
                    request_id = %request.id,
                    error = %e,
                    "Decision hook failed"
                );
            }
        }

        let severity = match request.status {
            ApprovalStatus::Expired => AuditSeverity::Warning,
            _ => AuditSeverity::Info,
        };
        self.audit_log(AuditEvent::new(
            format!("approval_request_{}", request.status),
            "hitl",
            severity,
            true,
            json!({
                "request_id": request.id,
                "request_type": request.request_type,
                "requester": request.requester,
                "decided_by": request.decided_by,
            }),
        ));
    }

    /// Fire-and-forget audit submission; sink failures never block
    /// coordination
    fn audit_log(&self, event: AuditEvent) {
        let sink = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.log_event(event).await {
                warn!(error = %e, "Audit sink rejected event");
            }
        });
    }
}

impl std::fmt::Debug for ApprovalWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalWorkflow")
            .field("running", &self.running.load(Ordering::SeqCst))
            .field(
                "sweep_interval_ms",
                &self.config.expiration_sweep_interval_ms,
            )
            .finish()
    }
}
