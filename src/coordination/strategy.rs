//! Worker assignment strategies.
//!
//! Selection always operates on the idle, alive candidates in registration
//! order, so every strategy except `Random` is deterministic for a given
//! coordinator state.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::task::Task;
use super::worker::Worker;

/// How the coordinator picks a worker for a pending task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Rotate through workers in registration order
    RoundRobin,
    /// Pick the worker with the fewest processed tasks, earliest-registered
    /// on ties
    LeastLoaded,
    /// Prefer workers whose capabilities include the task type, least-loaded
    /// among those; fall back to least-loaded over all candidates when none
    /// match
    CapabilityMatch,
    /// Uniform random choice
    Random,
}

impl Default for AssignmentStrategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl AssignmentStrategy {
    /// Select a worker for `task` from `candidates`.
    ///
    /// `candidates` must already be filtered to available workers, in
    /// registration order. `cursor` is the round-robin position, advanced
    /// only by the round-robin strategy.
    pub(crate) fn select<'a>(
        &self,
        task: &Task,
        candidates: &'a [Worker],
        cursor: &mut usize,
    ) -> Option<&'a Worker> {
        if candidates.is_empty() {
            return None;
        }
        match self {
            Self::RoundRobin => {
                let selected = &candidates[*cursor % candidates.len()];
                *cursor = cursor.wrapping_add(1);
                Some(selected)
            }
            Self::LeastLoaded => least_loaded(candidates),
            Self::CapabilityMatch => {
                let capable: Vec<&Worker> = candidates
                    .iter()
                    .filter(|w| w.can_handle(&task.task_type))
                    .collect();
                if capable.is_empty() {
                    least_loaded(candidates)
                } else {
                    capable.into_iter().min_by_key(|w| w.load())
                }
            }
            Self::Random => candidates.get(fastrand::usize(..candidates.len())),
        }
    }
}

fn least_loaded(candidates: &[Worker]) -> Option<&Worker> {
    // min_by_key keeps the first minimum, preserving registration order on ties
    candidates.iter().min_by_key(|w| w.load())
}

impl fmt::Display for AssignmentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round_robin"),
            Self::LeastLoaded => write!(f, "least_loaded"),
            Self::CapabilityMatch => write!(f, "capability_match"),
            Self::Random => write!(f, "random"),
        }
    }
}

impl std::str::FromStr for AssignmentStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Self::RoundRobin),
            "least_loaded" => Ok(Self::LeastLoaded),
            "capability_match" => Ok(Self::CapabilityMatch),
            "random" => Ok(Self::Random),
            _ => Err(format!("Invalid assignment strategy: {s}")),
        }
    }
}
