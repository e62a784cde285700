//! Refresh job status read model
//!
//! Ephemeral per-dataset state describing the one full-snapshot rebuild
//! that may run at a time. Pollers receive this read model; failures
//! surface here as `Error` status plus a message, never as a thrown error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a refresh job.
///
/// Transitions: Idle → Running → {Completed | Error}; the next refresh
/// resets a terminal state back to Running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Idle,
    Running,
    Completed,
    Error,
}

impl RefreshStatus {
    /// Whether a new refresh may start from this state.
    pub fn can_start(&self) -> bool {
        !matches!(self, RefreshStatus::Running)
    }

    /// Status as a string label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            RefreshStatus::Idle => "idle",
            RefreshStatus::Running => "running",
            RefreshStatus::Completed => "completed",
            RefreshStatus::Error => "error",
        }
    }
}

/// Point-in-time view of a refresh job, served to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshJobView {
    pub status: RefreshStatus,
    /// Completion percentage in [0, 100]; 0 when totals are unknown.
    pub progress_percent: f64,
    pub processed_count: u64,
    /// Total records expected; 0 when the source reported no count hint.
    pub total_count: u64,
    pub current_batch: u32,
    pub total_batches: u32,
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since the job started, up to its finish time if terminal.
    pub elapsed_seconds: f64,
    pub message: Option<String>,
}

impl RefreshJobView {
    /// An idle view with zeroed counters.
    pub fn idle() -> Self {
        Self {
            status: RefreshStatus::Idle,
            progress_percent: 0.0,
            processed_count: 0,
            total_count: 0,
            current_batch: 0,
            total_batches: 0,
            started_at: None,
            elapsed_seconds: 0.0,
            message: None,
        }
    }
}
