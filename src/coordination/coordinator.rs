//! # Task Coordinator
//!
//! Accepts task definitions, tracks the worker pool, and assigns pending
//! tasks to idle workers through a pluggable strategy. All inbound signals
//! (completions, failures, worker status, heartbeats) arrive as router
//! messages; all outbound notifications leave as router messages.
//!
//! Task, worker, and queue state live behind one lock, so every dispatch
//! decision sees a consistent view of all three. Handler callbacks and the
//! heartbeat sweep both go through the same lock and never hold it across a
//! publish.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::constants::{system, topic_groups, topics};
use crate::error::{CoordinationError, Result};
use crate::messaging::{
    Message, MessageHandler, MessagePriority, MessageRouter, PublishOptions,
};

use super::strategy::AssignmentStrategy;
use super::task::{Task, TaskDefinition, TaskState};
use super::worker::{Worker, WorkerInfo, WorkerStatus};

/// Dispatch queue entry ordered by task priority, then enqueue order
struct QueuedTask {
    priority: i32,
    seq: u64,
    task_id: Uuid,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Mutable coordinator state, all behind one lock
struct CoordinatorState {
    tasks: HashMap<Uuid, Task>,
    workers: HashMap<String, Worker>,
    /// Worker ids in registration order, the iteration order every strategy
    /// sees
    registration_order: Vec<String>,
    queue: BinaryHeap<QueuedTask>,
    /// Ids currently in the queue, so a task is never enqueued twice
    queued: HashSet<Uuid>,
    queue_seq: u64,
    round_robin_cursor: usize,
    strategy: AssignmentStrategy,
}

impl CoordinatorState {
    fn new(strategy: AssignmentStrategy) -> Self {
        Self {
            tasks: HashMap::new(),
            workers: HashMap::new(),
            registration_order: Vec::new(),
            queue: BinaryHeap::new(),
            queued: HashSet::new(),
            queue_seq: 0,
            round_robin_cursor: 0,
            strategy,
        }
    }

    fn enqueue(&mut self, task_id: Uuid, priority: i32) {
        if self.queued.insert(task_id) {
            self.queue_seq += 1;
            self.queue.push(QueuedTask {
                priority,
                seq: self.queue_seq,
                task_id,
            });
        }
    }

    fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.tasks
                .get(dep)
                .map(|t| t.state == TaskState::Completed)
                .unwrap_or(false)
        })
    }

    /// Pull the worker's current task back to Pending and requeue it.
    /// Returns the requeued task id.
    fn requeue_current_task(&mut self, worker_id: &str) -> Option<Uuid> {
        let task_id = self.workers.get_mut(worker_id)?.current_task.take()?;
        let task = self.tasks.get_mut(&task_id)?;
        if !task.state.can_transition_to(TaskState::Pending) {
            return None;
        }
        task.state = TaskState::Pending;
        task.assigned_to = None;
        let priority = task.priority;
        self.enqueue(task_id, priority);
        Some(task_id)
    }

    /// Available workers in registration order
    fn candidates(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> Vec<Worker> {
        self.registration_order
            .iter()
            .filter_map(|id| self.workers.get(id))
            .filter(|w| w.status.is_available() && w.is_alive_at(now, timeout))
            .cloned()
            .collect()
    }
}

/// Point-in-time coordinator statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub queued_tasks: usize,
    pub total_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub offline_workers: usize,
    pub error_workers: usize,
    pub strategy: AssignmentStrategy,
}

/// Task assignment coordinator over a shared [`MessageRouter`].
///
/// Cheap to clone; all clones share the same task and worker tables.
#[derive(Clone)]
pub struct TaskCoordinator {
    router: MessageRouter,
    config: CoordinatorConfig,
    state: Arc<RwLock<CoordinatorState>>,
    running: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    subscription_ids: Arc<parking_lot::Mutex<Vec<Uuid>>>,
}

impl TaskCoordinator {
    pub fn new(router: MessageRouter, config: CoordinatorConfig) -> Self {
        let strategy = config.strategy;
        Self {
            router,
            config,
            state: Arc::new(RwLock::new(CoordinatorState::new(strategy))),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            subscription_ids: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    /// Register event subscriptions and spawn the heartbeat sweep loop
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoordinationError::invalid_state(
                "coordinator",
                "task_coordinator",
                "running",
                "start",
            ));
        }

        let handler: Arc<dyn MessageHandler> = Arc::new(CoordinatorEventHandler {
            coordinator: self.clone(),
        });
        for topic in topic_groups::COORDINATOR_REACTIONS {
            let id = self.router.subscribe(*topic, handler.clone()).await;
            self.subscription_ids.lock().push(id);
        }

        self.spawn_heartbeat_sweep();

        self.router
            .publish(
                topics::SYSTEM_STARTED,
                json!({
                    "component": "task_coordinator",
                    "version": system::AVATAR_CORE_VERSION,
                }),
                system::COORDINATOR_SENDER,
            )
            .await;

        info!(
            heartbeat_timeout_ms = self.config.heartbeat_timeout_ms,
            strategy = %self.config.strategy,
            "Task coordinator started"
        );
        Ok(())
    }

    /// Stop the sweep loop and drop event subscriptions. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown_notify.notify_waiters();

        let ids: Vec<Uuid> = self.subscription_ids.lock().drain(..).collect();
        for id in ids {
            let _ = self.router.unsubscribe(id).await;
        }

        self.router
            .publish(
                topics::SYSTEM_SHUTDOWN,
                json!({"component": "task_coordinator"}),
                system::COORDINATOR_SENDER,
            )
            .await;

        info!("Task coordinator shut down");
        Ok(())
    }

    fn spawn_heartbeat_sweep(&self) {
        let coordinator = self.clone();
        let shutdown_notify = self.shutdown_notify.clone();
        let interval =
            std::time::Duration::from_millis((self.config.heartbeat_timeout_ms / 2).max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        coordinator.sweep_heartbeats().await;
                    }
                    _ = shutdown_notify.notified() => {
                        debug!("Heartbeat sweep stopping");
                        break;
                    }
                }
            }
        });
    }

    // ---------- Task lifecycle ----------

    /// Create a task. The task enters the dispatch queue immediately when all
    /// of its dependencies are already Completed; otherwise it stays parked
    /// until the last dependency completes.
    pub async fn create_task(&self, definition: TaskDefinition) -> Result<Uuid> {
        let task = Task::new(definition);
        let task_id = task.id;
        let created_event = json!({
            "task_id": task_id,
            "name": task.name,
            "task_type": task.task_type,
            "priority": task.priority,
        });

        {
            let mut state = self.state.write().await;
            for dep in &task.dependencies {
                if !state.tasks.contains_key(dep) {
                    return Err(CoordinationError::invalid_state(
                        "dependency",
                        dep,
                        "missing",
                        "create_task",
                    ));
                }
            }
            let eligible = state.dependencies_satisfied(&task);
            let priority = task.priority;
            info!(
                task_id = %task_id,
                name = %task.name,
                task_type = %task.task_type,
                priority,
                eligible,
                "Task created"
            );
            state.tasks.insert(task_id, task);
            if eligible {
                state.enqueue(task_id, priority);
            }
        }

        self.router
            .publish(topics::TASK_CREATED, created_event, system::COORDINATOR_SENDER)
            .await;

        self.dispatch().await;
        Ok(task_id)
    }

    /// Cancel a task. Refused only when the task already Completed or was
    /// already Cancelled; a Busy assignee is freed back to Idle.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<()> {
        let freed_worker;
        {
            let mut state = self.state.write().await;
            let task = state
                .tasks
                .get_mut(&task_id)
                .ok_or_else(|| CoordinationError::not_found("task", task_id))?;
            if matches!(task.state, TaskState::Completed | TaskState::Cancelled) {
                return Err(CoordinationError::invalid_state(
                    "task",
                    task_id,
                    task.state.to_string(),
                    "cancel_task",
                ));
            }
            task.state = TaskState::Cancelled;
            task.completed_at = Some(Utc::now());
            freed_worker = task.assigned_to.take();

            if let Some(worker_id) = &freed_worker {
                if let Some(worker) = state.workers.get_mut(worker_id) {
                    if worker.current_task == Some(task_id) {
                        worker.current_task = None;
                        if worker.status == WorkerStatus::Busy {
                            worker.status = WorkerStatus::Idle;
                        }
                    }
                }
            }
            // The heap entry itself is skipped lazily at the next dispatch
            // pop; only the dedup set drops the id now
            state.queued.remove(&task_id);
        }

        info!(task_id = %task_id, freed_worker = ?freed_worker, "Task cancelled");
        self.router
            .publish(
                topics::TASK_CANCELLED,
                json!({"task_id": task_id}),
                system::COORDINATOR_SENDER,
            )
            .await;

        self.dispatch().await;
        Ok(())
    }

    /// Reaction to `task.completed` events
    async fn record_completion(&self, task_id: Uuid, result: Value) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let task = state
                .tasks
                .get_mut(&task_id)
                .ok_or_else(|| CoordinationError::not_found("task", task_id))?;
            if !task.state.can_transition_to(TaskState::Completed) {
                return Err(CoordinationError::invalid_state(
                    "task",
                    task_id,
                    task.state.to_string(),
                    "complete",
                ));
            }
            task.state = TaskState::Completed;
            task.result = Some(result);
            task.completed_at = Some(Utc::now());
            let worker_id = task.assigned_to.clone();

            if let Some(worker_id) = worker_id {
                if let Some(worker) = state.workers.get_mut(&worker_id) {
                    if worker.current_task == Some(task_id) {
                        worker.current_task = None;
                        if worker.status == WorkerStatus::Busy {
                            worker.status = WorkerStatus::Idle;
                        }
                    }
                    worker.completed_tasks += 1;
                }
            }

            // Dependents of this task may have become dispatchable
            let unlocked: Vec<(Uuid, i32)> = state
                .tasks
                .values()
                .filter(|t| {
                    t.state == TaskState::Pending
                        && !state.queued.contains(&t.id)
                        && t.dependencies.contains(&task_id)
                        && state.dependencies_satisfied(t)
                })
                .map(|t| (t.id, t.priority))
                .collect();
            for (id, priority) in unlocked {
                debug!(task_id = %id, "Dependencies satisfied, task enqueued");
                state.enqueue(id, priority);
            }
        }

        info!(task_id = %task_id, "Task completed");
        self.dispatch().await;
        Ok(())
    }

    /// Reaction to `task.failed` events. Failure is terminal; callers extend
    /// by recreating the task.
    async fn record_failure(&self, task_id: Uuid, error: String) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let task = state
                .tasks
                .get_mut(&task_id)
                .ok_or_else(|| CoordinationError::not_found("task", task_id))?;
            if !task.state.can_transition_to(TaskState::Failed) {
                return Err(CoordinationError::invalid_state(
                    "task",
                    task_id,
                    task.state.to_string(),
                    "fail",
                ));
            }
            task.state = TaskState::Failed;
            task.error = Some(error);
            task.completed_at = Some(Utc::now());
            let worker_id = task.assigned_to.clone();

            if let Some(worker_id) = worker_id {
                if let Some(worker) = state.workers.get_mut(&worker_id) {
                    if worker.current_task == Some(task_id) {
                        worker.current_task = None;
                        if worker.status == WorkerStatus::Busy {
                            worker.status = WorkerStatus::Idle;
                        }
                    }
                    worker.failed_tasks += 1;
                }
            }
        }

        warn!(task_id = %task_id, "Task failed");
        self.dispatch().await;
        Ok(())
    }

    // ---------- Worker lifecycle ----------

    /// Register a worker, or re-register an existing one. Re-registration
    /// resets status and capabilities but keeps the lifetime counters; a task
    /// the worker still held is requeued.
    pub async fn register_worker(&self, info: WorkerInfo) -> Result<()> {
        let worker_id = info.id.clone();
        {
            let mut state = self.state.write().await;
            if state.workers.contains_key(&worker_id) {
                if let Some(requeued) = state.requeue_current_task(&worker_id) {
                    warn!(
                        worker_id = %worker_id,
                        task_id = %requeued,
                        "Re-registration requeued held task"
                    );
                }
                let existing = state.workers.get(&worker_id).cloned();
                let mut worker = Worker::new(info);
                if let Some(existing) = existing {
                    worker.completed_tasks = existing.completed_tasks;
                    worker.failed_tasks = existing.failed_tasks;
                }
                state.workers.insert(worker_id.clone(), worker);
            } else {
                if state.workers.len() >= self.config.max_workers {
                    return Err(CoordinationError::configuration(format!(
                        "worker limit reached (max_workers = {})",
                        self.config.max_workers
                    )));
                }
                state.workers.insert(worker_id.clone(), Worker::new(info));
                state.registration_order.push(worker_id.clone());
            }
        }

        info!(worker_id = %worker_id, "Worker registered");
        self.router
            .publish(
                topics::AVATAR_REGISTERED,
                json!({"worker_id": worker_id}),
                system::COORDINATOR_SENDER,
            )
            .await;

        self.dispatch().await;
        Ok(())
    }

    /// Remove a worker. A task it still held reverts to Pending and is
    /// requeued before the worker disappears.
    pub async fn unregister_worker(&self, worker_id: &str) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.workers.contains_key(worker_id) {
                return Err(CoordinationError::not_found("worker", worker_id));
            }
            if let Some(requeued) = state.requeue_current_task(worker_id) {
                info!(
                    worker_id = %worker_id,
                    task_id = %requeued,
                    "Unregistration requeued held task"
                );
            }
            state.workers.remove(worker_id);
            state.registration_order.retain(|id| id != worker_id);
        }

        info!(worker_id = %worker_id, "Worker unregistered");
        self.router
            .publish(
                topics::AVATAR_UNREGISTERED,
                json!({"worker_id": worker_id}),
                system::COORDINATOR_SENDER,
            )
            .await;

        self.dispatch().await;
        Ok(())
    }

    /// Update a worker's status, refreshing its heartbeat. Also the reaction
    /// to `avatar.status` events. A worker leaving Busy while still holding a
    /// task gets that task requeued.
    pub async fn update_worker_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
    ) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let worker = state
                .workers
                .get_mut(worker_id)
                .ok_or_else(|| CoordinationError::not_found("worker", worker_id))?;
            worker.last_heartbeat = Utc::now();
            let holds_task = worker.current_task.is_some();
            worker.status = status;

            if status != WorkerStatus::Busy && holds_task {
                if let Some(requeued) = state.requeue_current_task(worker_id) {
                    warn!(
                        worker_id = %worker_id,
                        task_id = %requeued,
                        status = %status,
                        "Worker left busy state, task requeued"
                    );
                }
            }
        }

        debug!(worker_id = %worker_id, status = %status, "Worker status updated");
        self.dispatch().await;
        Ok(())
    }

    /// Record a heartbeat. Revives an Offline worker to Idle; an Error
    /// status is only cleared by an explicit status update or
    /// re-registration. Also the reaction to `avatar.heartbeat` events.
    pub async fn heartbeat(&self, worker_id: &str) -> Result<()> {
        let revived;
        {
            let mut state = self.state.write().await;
            let worker = state
                .workers
                .get_mut(worker_id)
                .ok_or_else(|| CoordinationError::not_found("worker", worker_id))?;
            worker.last_heartbeat = Utc::now();
            revived = worker.status == WorkerStatus::Offline;
            if revived {
                worker.status = WorkerStatus::Idle;
                info!(worker_id = %worker_id, "Offline worker revived by heartbeat");
            }
        }

        if revived {
            self.dispatch().await;
        }
        Ok(())
    }

    // ---------- Dispatch ----------

    /// Assign queued tasks to available workers until either runs out. Queue
    /// order is preserved when no worker is available.
    pub async fn dispatch(&self) {
        let mut assignments = Vec::new();
        {
            let mut state = self.state.write().await;
            let now = Utc::now();
            let timeout = chrono::Duration::milliseconds(self.config.heartbeat_timeout_ms as i64);

            loop {
                // Skip entries whose task was cancelled or already handled
                let head = loop {
                    match state.queue.peek() {
                        None => break None,
                        Some(entry) => {
                            let id = entry.task_id;
                            let valid = state
                                .tasks
                                .get(&id)
                                .map(|t| t.state == TaskState::Pending)
                                .unwrap_or(false);
                            if valid {
                                break Some(id);
                            }
                            state.queue.pop();
                            state.queued.remove(&id);
                        }
                    }
                };
                let Some(task_id) = head else { break };

                let candidates = state.candidates(now, timeout);
                if candidates.is_empty() {
                    break;
                }

                let Some(task_snapshot) = state.tasks.get(&task_id).cloned() else {
                    break;
                };
                let strategy = state.strategy;
                let mut cursor = state.round_robin_cursor;
                let selected = strategy
                    .select(&task_snapshot, &candidates, &mut cursor)
                    .map(|w| w.id.clone());
                state.round_robin_cursor = cursor;
                let Some(worker_id) = selected else { break };

                state.queue.pop();
                state.queued.remove(&task_id);

                let Some(task) = state.tasks.get_mut(&task_id) else { break };
                // Pending -> Assigned -> Running in one dispatch step
                task.state = TaskState::Assigned;
                task.assigned_to = Some(worker_id.clone());
                task.state = TaskState::Running;
                task.started_at = Some(now);
                let payload = json!({
                    "task_id": task_id,
                    "name": task.name,
                    "task_type": task.task_type,
                    "parameters": task.parameters,
                    "priority": task.priority,
                    "state": task.state,
                });

                let Some(worker) = state.workers.get_mut(&worker_id) else { break };
                worker.status = WorkerStatus::Busy;
                worker.current_task = Some(task_id);

                info!(task_id = %task_id, worker_id = %worker_id, "Task dispatched");
                assignments.push((worker_id, payload));
            }
        }

        for (worker_id, payload) in assignments {
            self.router
                .publish_with(
                    topics::TASK_UPDATED,
                    payload,
                    system::COORDINATOR_SENDER,
                    PublishOptions::default()
                        .with_receiver(worker_id)
                        .with_priority(MessagePriority::High),
                )
                .await;
        }
    }

    /// Heartbeat sweep tick: lapse silent workers to Offline and requeue
    /// their tasks
    async fn sweep_heartbeats(&self) {
        let mut offline_events = Vec::new();
        {
            let mut state = self.state.write().await;
            let now = Utc::now();
            let timeout = chrono::Duration::milliseconds(self.config.heartbeat_timeout_ms as i64);

            let lapsed: Vec<String> = state
                .workers
                .values()
                .filter(|w| w.status != WorkerStatus::Offline && !w.is_alive_at(now, timeout))
                .map(|w| w.id.clone())
                .collect();

            for worker_id in lapsed {
                if let Some(requeued) = state.requeue_current_task(&worker_id) {
                    warn!(
                        worker_id = %worker_id,
                        task_id = %requeued,
                        "Offline worker's task requeued"
                    );
                }
                if let Some(worker) = state.workers.get_mut(&worker_id) {
                    worker.status = WorkerStatus::Offline;
                    warn!(
                        worker_id = %worker_id,
                        last_heartbeat = %worker.last_heartbeat,
                        "Worker marked offline after missed heartbeats"
                    );
                    offline_events.push(json!({
                        "worker_id": worker_id,
                        "last_heartbeat": worker.last_heartbeat,
                    }));
                }
            }
        }

        let swept = !offline_events.is_empty();
        for payload in offline_events {
            self.router
                .publish(topics::AVATAR_OFFLINE, payload, system::COORDINATOR_SENDER)
                .await;
        }
        if swept {
            self.dispatch().await;
        }
    }

    // ---------- Introspection ----------

    pub async fn set_strategy(&self, strategy: AssignmentStrategy) {
        let mut state = self.state.write().await;
        info!(old = %state.strategy, new = %strategy, "Assignment strategy changed");
        state.strategy = strategy;
    }

    pub async fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.state.read().await.tasks.get(&task_id).cloned()
    }

    /// All tasks ordered by creation time
    pub async fn get_all_tasks(&self) -> Vec<Task> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub async fn tasks_in_state(&self, task_state: TaskState) -> Vec<Task> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.state == task_state)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub async fn get_worker(&self, worker_id: &str) -> Option<Worker> {
        self.state.read().await.workers.get(worker_id).cloned()
    }

    /// All workers in registration order
    pub async fn get_all_workers(&self) -> Vec<Worker> {
        let state = self.state.read().await;
        state
            .registration_order
            .iter()
            .filter_map(|id| state.workers.get(id))
            .cloned()
            .collect()
    }

    /// Evict terminal tasks whose completion is older than `retention`.
    /// Returns the number removed.
    pub async fn purge_finished_tasks(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut state = self.state.write().await;
        let before = state.tasks.len();
        state.tasks.retain(|_, task| {
            let finished_at = task.completed_at.unwrap_or(task.created_at);
            !(task.state.is_terminal() && finished_at < cutoff)
        });
        let removed = before - state.tasks.len();
        if removed > 0 {
            info!(removed, "Purged finished tasks");
        }
        removed
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let state = self.state.read().await;
        let count_tasks =
            |s: TaskState| state.tasks.values().filter(|t| t.state == s).count();
        let count_workers =
            |s: WorkerStatus| state.workers.values().filter(|w| w.status == s).count();
        CoordinatorStats {
            total_tasks: state.tasks.len(),
            pending_tasks: count_tasks(TaskState::Pending),
            running_tasks: count_tasks(TaskState::Running),
            completed_tasks: count_tasks(TaskState::Completed),
            failed_tasks: count_tasks(TaskState::Failed),
            cancelled_tasks: count_tasks(TaskState::Cancelled),
            queued_tasks: state.queued.len(),
            total_workers: state.workers.len(),
            idle_workers: count_workers(WorkerStatus::Idle),
            busy_workers: count_workers(WorkerStatus::Busy),
            offline_workers: count_workers(WorkerStatus::Offline),
            error_workers: count_workers(WorkerStatus::Error),
            strategy: state.strategy,
        }
    }
}

impl std::fmt::Debug for TaskCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCoordinator")
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("heartbeat_timeout_ms", &self.config.heartbeat_timeout_ms)
            .finish()
    }
}

/// Permanent router subscriber translating coordination events into table
/// updates. Stale or unknown ids are logged and swallowed so one lagging
/// event never poisons delivery.
struct CoordinatorEventHandler {
    coordinator: TaskCoordinator,
}

#[async_trait]
impl MessageHandler for CoordinatorEventHandler {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        match message.topic.as_str() {
            topics::TASK_COMPLETED => {
                let task_id = parse_task_id(&message.payload)?;
                let result = message
                    .payload
                    .get("result")
                    .cloned()
                    .unwrap_or(Value::Null);
                if let Err(e) = self.coordinator.record_completion(task_id, result).await {
                    warn!(task_id = %task_id, error = %e, "Ignoring stale completion event");
                }
            }
            topics::TASK_FAILED => {
                let task_id = parse_task_id(&message.payload)?;
                let error = message
                    .payload
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error")
                    .to_string();
                if let Err(e) = self.coordinator.record_failure(task_id, error).await {
                    warn!(task_id = %task_id, error = %e, "Ignoring stale failure event");
                }
            }
            topics::AVATAR_STATUS => {
                let worker_id = parse_worker_id(&message.payload)?;
                let status: WorkerStatus = message
                    .payload
                    .get("status")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("payload missing status"))?
                    .parse()
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                if let Err(e) = self
                    .coordinator
                    .update_worker_status(&worker_id, status)
                    .await
                {
                    warn!(worker_id = %worker_id, error = %e, "Ignoring status for unknown worker");
                }
            }
            topics::AVATAR_HEARTBEAT => {
                let worker_id = parse_worker_id(&message.payload)?;
                if let Err(e) = self.coordinator.heartbeat(&worker_id).await {
                    warn!(worker_id = %worker_id, error = %e, "Ignoring heartbeat for unknown worker");
                }
            }
            other => {
                debug!(topic = %other, "Unexpected topic in coordinator handler");
            }
        }
        Ok(())
    }

    fn handler_name(&self) -> &str {
        "task_coordinator"
    }
}

fn parse_task_id(payload: &Value) -> anyhow::Result<Uuid> {
    let raw = payload
        .get("task_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("payload missing task_id"))?;
    Uuid::parse_str(raw).map_err(|e| anyhow::anyhow!("invalid task_id {raw}: {e}"))
}

fn parse_worker_id(payload: &Value) -> anyhow::Result<String> {
    payload
        .get("worker_id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("payload missing worker_id"))
}
