//! Refresh job tracking
//!
//! One tracker per dataset enforces the single-running-job invariant and
//! serves the poller read model. Failures surface as `Error` status plus a
//! message; pollers never see a thrown error.
//!
//! State machine: Idle → Running → {Completed | Error}; starting the next
//! refresh resets a terminal state back to Running and zeroes the counters.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use types::refresh::{RefreshJobView, RefreshStatus};

#[derive(Debug)]
struct JobState {
    status: RefreshStatus,
    processed_count: u64,
    total_count: u64,
    current_batch: u32,
    total_batches: u32,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    message: Option<String>,
}

impl JobState {
    fn idle() -> Self {
        Self {
            status: RefreshStatus::Idle,
            processed_count: 0,
            total_count: 0,
            current_batch: 0,
            total_batches: 0,
            started_at: None,
            finished_at: None,
            message: None,
        }
    }
}

/// Tracks the refresh job lifecycle for one dataset.
///
/// A plain mutex suffices: every critical section is a handful of field
/// writes, and the tracker is never held across await points.
pub struct RefreshTracker {
    state: Mutex<JobState>,
}

impl RefreshTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(JobState::idle()),
        }
    }

    /// Attempt to transition into Running.
    ///
    /// Returns false when a job is already running; the in-flight job's
    /// counters are left untouched.
    pub fn try_start(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.status.can_start() {
            return false;
        }
        *state = JobState::idle();
        state.status = RefreshStatus::Running;
        state.started_at = Some(Utc::now());
        true
    }

    /// Record progress after a batch.
    pub fn record_batch(
        &self,
        processed_count: u64,
        total_count: u64,
        current_batch: u32,
        total_batches: u32,
    ) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.processed_count = processed_count;
        state.total_count = total_count;
        state.current_batch = current_batch;
        state.total_batches = total_batches;
    }

    /// Mark the running job completed.
    pub fn complete(&self, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.status = RefreshStatus::Completed;
        state.finished_at = Some(Utc::now());
        state.message = Some(message.into());
    }

    /// Mark the running job failed.
    pub fn fail(&self, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.status = RefreshStatus::Error;
        state.finished_at = Some(Utc::now());
        state.message = Some(message.into());
    }

    /// Whether a job is currently running.
    pub fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.status == RefreshStatus::Running
    }

    /// Point-in-time view for pollers. Elapsed time is computed at read
    /// time, up to the finish time once the job is terminal.
    pub fn view(&self) -> RefreshJobView {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let elapsed_seconds = match state.started_at {
            Some(started) => {
                let until = state.finished_at.unwrap_or_else(Utc::now);
                (until - started).num_milliseconds().max(0) as f64 / 1000.0
            }
            None => 0.0,
        };

        let progress_percent = if state.total_count > 0 {
            (state.processed_count as f64 / state.total_count as f64 * 100.0).min(100.0)
        } else if state.status == RefreshStatus::Completed {
            100.0
        } else {
            0.0
        };

        RefreshJobView {
            status: state.status,
            progress_percent,
            processed_count: state.processed_count,
            total_count: state.total_count,
            current_batch: state.current_batch,
            total_batches: state.total_batches,
            started_at: state.started_at,
            elapsed_seconds,
            message: state.message.clone(),
        }
    }
}

impl Default for RefreshTracker {
    fn default() -> Self {
        Self::new()
    }
}
