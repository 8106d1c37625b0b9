use super::error::BulkError;
use crate::duration_store::{PersistedProgress, WorkerStatus};
use serde::Serialize;
use std::sync::RwLock;
use tokio::sync::watch;

/// Live state of a bulk run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerState {
    pub status: WorkerStatus,
    pub total_tracks: i64,
    pub processed_tracks: i64,
    pub resolved_count: i64,
    pub needs_review_count: i64,
    pub failed_count: i64,
    pub skipped_count: i64,
    pub current_track_id: Option<i64>,
    /// "Artist - Title" of the track being resolved.
    pub current_track: Option<String>,
    pub last_error: Option<String>,
    pub started_at: Option<i64>,
    pub last_activity_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl WorkerState {
    pub fn idle() -> Self {
        Self {
            status: WorkerStatus::Idle,
            total_tracks: 0,
            processed_tracks: 0,
            resolved_count: 0,
            needs_review_count: 0,
            failed_count: 0,
            skipped_count: 0,
            current_track_id: None,
            current_track: None,
            last_error: None,
            started_at: None,
            last_activity_at: None,
            completed_at: None,
        }
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total_tracks <= 0 {
            return 0.0;
        }
        self.processed_tracks as f64 * 100.0 / self.total_tracks as f64
    }

    pub fn to_persisted(&self, last_processed_track_id: Option<i64>) -> PersistedProgress {
        PersistedProgress {
            status: self.status,
            total_tracks: self.total_tracks,
            processed_tracks: self.processed_tracks,
            resolved_count: self.resolved_count,
            needs_review_count: self.needs_review_count,
            failed_count: self.failed_count,
            skipped_count: self.skipped_count,
            current_track_id: self.current_track_id,
            current_track: self.current_track.clone(),
            last_processed_track_id,
            last_error: self.last_error.clone(),
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            completed_at: self.completed_at,
        }
    }

    pub fn from_persisted(progress: &PersistedProgress) -> Self {
        Self {
            status: progress.status,
            total_tracks: progress.total_tracks,
            processed_tracks: progress.processed_tracks,
            resolved_count: progress.resolved_count,
            needs_review_count: progress.needs_review_count,
            failed_count: progress.failed_count,
            skipped_count: progress.skipped_count,
            current_track_id: progress.current_track_id,
            current_track: progress.current_track.clone(),
            last_error: progress.last_error.clone(),
            started_at: progress.started_at,
            last_activity_at: progress.last_activity_at,
            completed_at: progress.completed_at,
        }
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Requests recorded for the worker, applied between tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Run,
    Pause,
    Stop,
}

/// Shared state of one bulk run.
///
/// Control methods only record requests; the worker observes them at its
/// checkpoints and performs the actual transitions.
pub struct StateManager {
    state: RwLock<WorkerState>,
    control: watch::Sender<ControlRequest>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::with_state(WorkerState::idle())
    }

    pub fn with_state(state: WorkerState) -> Self {
        let (control, _) = watch::channel(ControlRequest::Run);
        Self {
            state: RwLock::new(state),
            control,
        }
    }

    pub fn snapshot(&self) -> WorkerState {
        self.state.read().unwrap().clone()
    }

    pub fn status(&self) -> WorkerStatus {
        self.state.read().unwrap().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == WorkerStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status() == WorkerStatus::Paused
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    pub fn control_request(&self) -> ControlRequest {
        *self.control.borrow()
    }

    pub fn request_pause(&self) -> Result<(), BulkError> {
        if !self.is_running() || self.control_request() == ControlRequest::Stop {
            return Err(BulkError::NotRunning);
        }
        self.control.send_replace(ControlRequest::Pause);
        Ok(())
    }

    pub fn request_resume(&self) -> Result<(), BulkError> {
        let pending_pause = self.control_request() == ControlRequest::Pause;
        if !self.is_paused() && !pending_pause {
            return Err(BulkError::NotPaused);
        }
        self.control.send_replace(ControlRequest::Run);
        Ok(())
    }

    /// Moves the run to `stopping` right away; the worker finishes the
    /// current track and then reports `stopped`.
    pub fn request_stop(&self) -> Result<(), BulkError> {
        let mut state = self.state.write().unwrap();
        if !state.status.is_active() {
            return Err(BulkError::NotRunning);
        }
        state.status = WorkerStatus::Stopping;
        state.last_activity_at = Some(chrono::Utc::now().timestamp());
        self.control.send_replace(ControlRequest::Stop);
        Ok(())
    }

    pub fn reset(&self) {
        *self.state.write().unwrap() = WorkerState::idle();
        self.control.send_replace(ControlRequest::Run);
    }

    pub(crate) fn update<F: FnOnce(&mut WorkerState)>(&self, f: F) {
        let mut state = self.state.write().unwrap();
        f(&mut state);
    }

    #[cfg(test)]
    pub(crate) fn set_status(&self, status: WorkerStatus) {
        self.update(|state| state.status = status);
    }

    /// Blocks while a pause is requested. Returns the request that ended it.
    pub(crate) async fn wait_while_paused(&self) -> ControlRequest {
        let mut rx = self.control.subscribe();
        loop {
            let request = *rx.borrow_and_update();
            if request != ControlRequest::Pause {
                return request;
            }
            if rx.changed().await.is_err() {
                return ControlRequest::Stop;
            }
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
