//! ============================================================================
//! Generation Module - Lifecycle of asynchronous video generation jobs
//! ============================================================================
//! Drives remote render jobs from submission to a terminal outcome.
//!
//! ## Architecture
//! ```text
//! GenerationRequest → GenerationManager::start_new_generation
//!                              ↓
//!                     GenerationInstance (one tokio task)
//!                     ├── progress ticker ──────────→ Progress events
//!                     └── submit → JobRegistry.add
//!                           ↓
//!                         poll status (4s → 6s → 10s)
//!                           ↓
//!                         fetch result → ProjectStore → JobRegistry.remove
//!                           ↓
//!                         Terminal event (exactly once per attempt)
//! ```
//!
//! On startup `GenerationManager::restore` turns every surviving job record
//! back into an instance that resumes polling without resubmitting.
//! ============================================================================

mod instance;
mod manager;
mod progress;

#[cfg(test)]
pub(crate) mod testing;

pub use instance::GenerationInstance;
pub use manager::GenerationManager;
pub use progress::{GenerationPhase, GenerationProgress};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureKind;

/// State machine of one generation instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Idle,
    Submitting,
    Polling,
    Completed,
    Failed,
    Cancelled,
}

impl InstanceState {
    /// Completed or failed: nothing happens without an explicit retry
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Completed | InstanceState::Failed)
    }

    /// Terminal or cancelled: no task is running
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || *self == InstanceState::Cancelled
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceState::Idle => "idle",
            InstanceState::Submitting => "submitting",
            InstanceState::Polling => "polling",
            InstanceState::Completed => "completed",
            InstanceState::Failed => "failed",
            InstanceState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a generation attempt ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Ready {
        video_url: String,
        thumbnail_url: Option<String>,
        duration_secs: Option<f64>,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

/// Point-in-time view of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSnapshot {
    pub instance_id: Uuid,
    pub project_id: Uuid,
    pub state: InstanceState,
    pub progress: GenerationProgress,
    pub remote_task_id: Option<String>,
    /// 1 for the first submission, incremented by every retry
    pub attempt: u32,
    pub outcome: Option<TerminalOutcome>,
}

/// Event published on the context's bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    Progress {
        instance_id: Uuid,
        project_id: Uuid,
        phase: GenerationPhase,
        percent: u8,
        eta_seconds: u32,
    },
    StateChanged {
        instance_id: Uuid,
        project_id: Uuid,
        state: InstanceState,
    },
    Terminal {
        instance_id: Uuid,
        project_id: Uuid,
        attempt: u32,
        outcome: TerminalOutcome,
    },
}

impl GenerationEvent {
    pub fn instance_id(&self) -> Uuid {
        match self {
            GenerationEvent::Progress { instance_id, .. }
            | GenerationEvent::StateChanged { instance_id, .. }
            | GenerationEvent::Terminal { instance_id, .. } => *instance_id,
        }
    }
}
