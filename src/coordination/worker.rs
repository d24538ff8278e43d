//! Worker (avatar) registration records and availability tracking

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Worker availability states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Registered and ready for assignment
    Idle,
    /// Executing an assigned task
    Busy,
    /// Missed heartbeats or explicitly reported offline. Never auto-revived;
    /// a fresh heartbeat, status update, or re-registration returns the
    /// worker to Idle.
    Offline,
    /// Self-reported fault. Cleared only by an explicit status update or
    /// re-registration.
    Error,
}

impl WorkerStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Offline => write!(f, "offline"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid worker status: {s}")),
        }
    }
}

/// Registration input for a worker avatar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Stable identity, also the delivery target for assignment messages
    pub id: String,
    pub name: String,
    /// Task types this worker can execute, matched by the capability strategy
    pub capabilities: Vec<String>,
}

impl WorkerInfo {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            capabilities: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// A registered worker avatar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub name: String,
    pub status: WorkerStatus,
    pub current_task: Option<Uuid>,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub capabilities: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(info: WorkerInfo) -> Self {
        let now = Utc::now();
        Self {
            id: info.id,
            name: info.name,
            status: WorkerStatus::Idle,
            current_task: None,
            completed_tasks: 0,
            failed_tasks: 0,
            capabilities: info.capabilities,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    /// Lifetime task count, used by the least-loaded strategy
    pub fn load(&self) -> u64 {
        self.completed_tasks + self.failed_tasks
    }

    pub fn can_handle(&self, task_type: &str) -> bool {
        self.capabilities.iter().any(|c| c == task_type)
    }

    /// Check whether the worker heartbeated within the timeout window
    pub fn is_alive_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) <= timeout
    }
}
