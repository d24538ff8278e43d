//! # Task Coordination Integration Tests
//!
//! Drives the coordinator purely through its public API and router events,
//! the way a real worker pool would: assignments arrive as `task.updated`
//! messages, workers answer over `task.completed`/`task.failed`, and
//! liveness flows through `avatar.heartbeat`.

use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

use avatar_core::config::CoordinatorConfig;
use avatar_core::constants::topics;
use avatar_core::{
    AssignmentStrategy, Message, MessageRouter, TaskCoordinator, TaskDefinition, TaskState,
    WorkerInfo, WorkerStatus,
};

async fn started_coordinator(config: CoordinatorConfig) -> (MessageRouter, TaskCoordinator) {
    let router = MessageRouter::default();
    let coordinator = TaskCoordinator::new(router.clone(), config);
    coordinator.start().await.unwrap();
    (router, coordinator)
}

/// Report a completion the way a worker would, over the bus
async fn complete_task(router: &MessageRouter, worker: &str, task_id: Uuid) {
    router
        .publish(
            topics::TASK_COMPLETED,
            json!({"task_id": task_id, "result": "done"}),
            worker,
        )
        .await;
    router.wait_until_idle().await;
}

async fn fail_task(router: &MessageRouter, worker: &str, task_id: Uuid) {
    router
        .publish(
            topics::TASK_FAILED,
            json!({"task_id": task_id, "error": "worker error"}),
            worker,
        )
        .await;
    router.wait_until_idle().await;
}

#[tokio::test]
async fn test_end_to_end_task_round_trip() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig::default()).await;

    // Workers see their assignments as targeted task.updated messages
    let assignments = Arc::new(Mutex::new(Vec::new()));
    let sink = assignments.clone();
    router
        .subscribe_with(
            topics::TASK_UPDATED,
            Arc::new(avatar_core::messaging::FnHandler::new(
                "w1_inbox",
                move |message: Message| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().push(message.payload["task_id"].clone());
                        Ok(())
                    }
                    .boxed()
                },
            )),
            avatar_core::SubscribeOptions::default().with_subscriber_id("w1"),
        )
        .await;

    coordinator
        .register_worker(WorkerInfo::new("w1").with_capabilities(vec!["summarize".into()]))
        .await
        .unwrap();
    let before = coordinator.get_worker("w1").await.unwrap().completed_tasks;

    let task_id = coordinator
        .create_task(TaskDefinition::new("summarize inbox", "summarize"))
        .await
        .unwrap();
    router.wait_until_idle().await;

    let task = coordinator.get_task(task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Running);
    assert_eq!(task.assigned_to.as_deref(), Some("w1"));
    assert_eq!(
        coordinator.get_worker("w1").await.unwrap().status,
        WorkerStatus::Busy
    );
    assert_eq!(
        assignments.lock().as_slice(),
        &[json!(task_id.to_string())]
    );

    complete_task(&router, "w1", task_id).await;

    let task = coordinator.get_task(task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.result, Some(json!("done")));
    let worker = coordinator.get_worker("w1").await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert_eq!(worker.completed_tasks, before + 1);
}

#[tokio::test]
async fn test_dependency_gating_until_completion() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig::default()).await;
    coordinator
        .register_worker(WorkerInfo::new("w1"))
        .await
        .unwrap();

    let first = coordinator
        .create_task(TaskDefinition::new("extract", "etl"))
        .await
        .unwrap();
    let second = coordinator
        .create_task(TaskDefinition::new("transform", "etl").with_dependencies(vec![first]))
        .await
        .unwrap();
    router.wait_until_idle().await;

    // The dependent task is parked even though the queue drained
    assert_eq!(
        coordinator.get_task(first).await.unwrap().state,
        TaskState::Running
    );
    assert_eq!(
        coordinator.get_task(second).await.unwrap().state,
        TaskState::Pending
    );

    complete_task(&router, "w1", first).await;

    let second_task = coordinator.get_task(second).await.unwrap();
    assert_eq!(second_task.state, TaskState::Running);
    assert_eq!(second_task.assigned_to.as_deref(), Some("w1"));
}

#[tokio::test]
async fn test_diamond_dependency_waits_for_all_parents() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig::default()).await;
    coordinator
        .register_worker(WorkerInfo::new("w1"))
        .await
        .unwrap();
    coordinator
        .register_worker(WorkerInfo::new("w2"))
        .await
        .unwrap();

    let left = coordinator
        .create_task(TaskDefinition::new("left", "etl"))
        .await
        .unwrap();
    let right = coordinator
        .create_task(TaskDefinition::new("right", "etl"))
        .await
        .unwrap();
    let join = coordinator
        .create_task(TaskDefinition::new("join", "etl").with_dependencies(vec![left, right]))
        .await
        .unwrap();
    router.wait_until_idle().await;

    complete_task(&router, "w1", left).await;
    assert_eq!(
        coordinator.get_task(join).await.unwrap().state,
        TaskState::Pending
    );

    complete_task(&router, "w2", right).await;
    assert_eq!(
        coordinator.get_task(join).await.unwrap().state,
        TaskState::Running
    );
}

#[tokio::test]
async fn test_least_loaded_prefers_lighter_worker() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig {
        strategy: AssignmentStrategy::LeastLoaded,
        ..CoordinatorConfig::default()
    })
    .await;

    // Build w1's history: three completions and one failure
    coordinator
        .register_worker(WorkerInfo::new("w1"))
        .await
        .unwrap();
    for _ in 0..3 {
        let id = coordinator
            .create_task(TaskDefinition::new("warmup", "work"))
            .await
            .unwrap();
        router.wait_until_idle().await;
        complete_task(&router, "w1", id).await;
    }
    let failing = coordinator
        .create_task(TaskDefinition::new("doomed", "work"))
        .await
        .unwrap();
    router.wait_until_idle().await;
    fail_task(&router, "w1", failing).await;

    // w2 arrives and takes one task
    coordinator
        .register_worker(WorkerInfo::new("w2"))
        .await
        .unwrap();
    let w2_task = coordinator
        .create_task(TaskDefinition::new("first for w2", "work"))
        .await
        .unwrap();
    router.wait_until_idle().await;
    let w2_assignee = coordinator.get_task(w2_task).await.unwrap().assigned_to;
    assert_eq!(w2_assignee.as_deref(), Some("w2"));
    complete_task(&router, "w2", w2_task).await;

    // Loads now: w1 = 4, w2 = 1
    let decider = coordinator
        .create_task(TaskDefinition::new("decider", "work"))
        .await
        .unwrap();
    router.wait_until_idle().await;
    assert_eq!(
        coordinator.get_task(decider).await.unwrap().assigned_to.as_deref(),
        Some("w2")
    );
}

#[tokio::test]
async fn test_capability_match_routes_by_task_type() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig {
        strategy: AssignmentStrategy::CapabilityMatch,
        ..CoordinatorConfig::default()
    })
    .await;
    coordinator
        .register_worker(WorkerInfo::new("generalist"))
        .await
        .unwrap();
    coordinator
        .register_worker(WorkerInfo::new("researcher").with_capabilities(vec!["research".into()]))
        .await
        .unwrap();

    let task_id = coordinator
        .create_task(TaskDefinition::new("find sources", "research"))
        .await
        .unwrap();
    router.wait_until_idle().await;

    assert_eq!(
        coordinator.get_task(task_id).await.unwrap().assigned_to.as_deref(),
        Some("researcher")
    );
}

#[tokio::test]
async fn test_worker_loss_recovery_over_real_time() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig {
        heartbeat_timeout_ms: 100,
        ..CoordinatorConfig::default()
    })
    .await;

    coordinator
        .register_worker(WorkerInfo::new("w1"))
        .await
        .unwrap();
    let task_id = coordinator
        .create_task(TaskDefinition::new("long haul", "work"))
        .await
        .unwrap();
    router.wait_until_idle().await;
    assert_eq!(
        coordinator.get_task(task_id).await.unwrap().assigned_to.as_deref(),
        Some("w1")
    );

    // w1 goes silent; the sweep runs every timeout/2
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    router.wait_until_idle().await;

    let task = coordinator.get_task(task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert!(task.assigned_to.is_none());
    assert_eq!(
        coordinator.get_worker("w1").await.unwrap().status,
        WorkerStatus::Offline
    );

    // A replacement picks the reclaimed task up
    coordinator
        .register_worker(WorkerInfo::new("w2"))
        .await
        .unwrap();
    router.wait_until_idle().await;
    let task = coordinator.get_task(task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Running);
    assert_eq!(task.assigned_to.as_deref(), Some("w2"));

    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_events_keep_worker_alive() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig {
        heartbeat_timeout_ms: 200,
        ..CoordinatorConfig::default()
    })
    .await;
    coordinator
        .register_worker(WorkerInfo::new("w1"))
        .await
        .unwrap();

    // Heartbeat over the bus every 50ms, well inside the timeout
    for _ in 0..6 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        router
            .publish(topics::AVATAR_HEARTBEAT, json!({"worker_id": "w1"}), "w1")
            .await;
        router.wait_until_idle().await;
    }

    assert_eq!(
        coordinator.get_worker("w1").await.unwrap().status,
        WorkerStatus::Idle
    );
    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_events_requeue_abandoned_task() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig::default()).await;
    coordinator
        .register_worker(WorkerInfo::new("w1"))
        .await
        .unwrap();
    let task_id = coordinator
        .create_task(TaskDefinition::new("t", "work"))
        .await
        .unwrap();
    router.wait_until_idle().await;

    // Worker reports an error state while holding the task
    router
        .publish(
            topics::AVATAR_STATUS,
            json!({"worker_id": "w1", "status": "error"}),
            "w1",
        )
        .await;
    router.wait_until_idle().await;

    let task = coordinator.get_task(task_id).await.unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert!(task.assigned_to.is_none());
    assert_eq!(
        coordinator.get_worker("w1").await.unwrap().status,
        WorkerStatus::Error
    );

    // Recovery is explicit: the worker reports idle and gets the task back
    router
        .publish(
            topics::AVATAR_STATUS,
            json!({"worker_id": "w1", "status": "idle"}),
            "w1",
        )
        .await;
    router.wait_until_idle().await;
    assert_eq!(
        coordinator.get_task(task_id).await.unwrap().state,
        TaskState::Running
    );
}

#[tokio::test]
async fn test_cancel_prevents_dispatch_of_queued_task() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig::default()).await;

    let task_id = coordinator
        .create_task(TaskDefinition::new("t", "work"))
        .await
        .unwrap();
    coordinator.cancel_task(task_id).await.unwrap();

    // Worker arrives after the cancellation; the stale queue entry is skipped
    coordinator
        .register_worker(WorkerInfo::new("w1"))
        .await
        .unwrap();
    router.wait_until_idle().await;

    assert_eq!(
        coordinator.get_task(task_id).await.unwrap().state,
        TaskState::Cancelled
    );
    assert_eq!(
        coordinator.get_worker("w1").await.unwrap().status,
        WorkerStatus::Idle
    );
}

#[tokio::test]
async fn test_round_robin_spreads_tasks() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig::default()).await;
    coordinator
        .register_worker(WorkerInfo::new("w1"))
        .await
        .unwrap();
    coordinator
        .register_worker(WorkerInfo::new("w2"))
        .await
        .unwrap();

    let a = coordinator
        .create_task(TaskDefinition::new("a", "work"))
        .await
        .unwrap();
    let b = coordinator
        .create_task(TaskDefinition::new("b", "work"))
        .await
        .unwrap();
    router.wait_until_idle().await;

    let first = coordinator.get_task(a).await.unwrap().assigned_to.unwrap();
    let second = coordinator.get_task(b).await.unwrap().assigned_to.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_coordinator_events_visible_on_the_bus() {
    let (router, coordinator) = started_coordinator(CoordinatorConfig::default()).await;
    let topics_seen = Arc::new(Mutex::new(Vec::new()));
    for topic in [
        topics::TASK_CREATED,
        topics::TASK_CANCELLED,
        topics::AVATAR_REGISTERED,
        topics::AVATAR_UNREGISTERED,
    ] {
        let sink = topics_seen.clone();
        router
            .subscribe_fn(topic, "bus_probe", move |message: Message| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(message.topic.clone());
                    Ok(())
                }
                .boxed()
            })
            .await;
    }

    coordinator
        .register_worker(WorkerInfo::new("w1"))
        .await
        .unwrap();
    let task_id = coordinator
        .create_task(TaskDefinition::new("t", "work"))
        .await
        .unwrap();
    complete_task(&router, "w1", task_id).await;
    coordinator.unregister_worker("w1").await.unwrap();
    router.wait_until_idle().await;

    let seen = topics_seen.lock().clone();
    assert_eq!(
        seen,
        vec![
            topics::AVATAR_REGISTERED.to_string(),
            topics::TASK_CREATED.to_string(),
            topics::AVATAR_UNREGISTERED.to_string(),
        ]
    );
}
