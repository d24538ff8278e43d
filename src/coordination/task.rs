//! Task model and state machine for coordinated work items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a worker, either newly created or requeued after worker
    /// loss
    Pending,
    /// Selected for a worker during dispatch
    Assigned,
    /// A worker is executing the task
    Running,
    /// Task finished successfully
    Completed,
    /// Task finished with an error
    Failed,
    /// Task was cancelled
    Cancelled,
}

impl TaskState {
    /// Check if this is a terminal state. A failed task can still be
    /// cancelled to close it out, but never resumes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if a worker currently holds the task
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Assigned | Self::Running)
    }

    /// Check whether a transition to `next` is allowed
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Assigned)
                | (Self::Pending, Self::Cancelled)
                | (Self::Assigned, Self::Running)
                | (Self::Assigned, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Pending)
                | (Self::Running, Self::Cancelled)
                | (Self::Failed, Self::Cancelled)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Assigned => write!(f, "assigned"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

/// Parameters for creating a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    /// Kind of work, matched against worker capability tags by the
    /// capability-match strategy
    pub task_type: String,
    /// Integer rank, higher dispatches first
    pub priority: i32,
    pub parameters: Value,
    /// Tasks that must be Completed before this one becomes dispatchable
    pub dependencies: Vec<Uuid>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            priority: 0,
            parameters: Value::Null,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A coordinated unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub task_type: String,
    pub priority: i32,
    pub state: TaskState,
    pub assigned_to: Option<String>,
    pub parameters: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub dependencies: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(definition: TaskDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: definition.name,
            task_type: definition.task_type,
            priority: definition.priority,
            state: TaskState::Pending,
            assigned_to: None,
            parameters: definition.parameters,
            result: None,
            error: None,
            dependencies: definition.dependencies,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
