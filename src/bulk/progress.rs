use super::state::WorkerState;
use crate::duration_store::{DurationStore, PersistedProgress, WorkerStatus};
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub const UNEXPECTED_STOP_MESSAGE: &str = "Worker stopped unexpectedly";

/// Durable snapshots of the bulk run in the singleton progress row.
#[derive(Clone)]
pub struct ProgressPersistence {
    store: Arc<dyn DurationStore>,
}

impl ProgressPersistence {
    pub fn new(store: Arc<dyn DurationStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, state: &WorkerState, last_processed_track_id: Option<i64>) -> Result<()> {
        self.store
            .save_progress(&state.to_persisted(last_processed_track_id))
    }

    pub fn load(&self) -> Result<Option<PersistedProgress>> {
        self.store.load_progress()
    }

    pub fn mark_complete(&self) -> Result<()> {
        if let Some(mut progress) = self.load()? {
            let now = chrono::Utc::now().timestamp();
            progress.status = WorkerStatus::Completed;
            progress.current_track_id = None;
            progress.current_track = None;
            progress.completed_at = Some(now);
            progress.last_activity_at = Some(now);
            self.store.save_progress(&progress)?;
        }
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        self.store.clear_progress()
    }

    /// Records a stop request on the persisted snapshot of an active run.
    pub fn mark_stopping(&self) -> Result<()> {
        if let Some(mut progress) = self.load()? {
            if matches!(progress.status, WorkerStatus::Running | WorkerStatus::Paused) {
                progress.status = WorkerStatus::Stopping;
                progress.last_activity_at = Some(chrono::Utc::now().timestamp());
                self.store.save_progress(&progress)?;
            }
        }
        Ok(())
    }

    /// The last snapshot as a restarted process would report it, without
    /// writing anything back.
    pub fn reconciled_view(&self) -> Result<Option<PersistedProgress>> {
        Ok(self.load()?.map(|mut progress| {
            mark_interrupted(&mut progress);
            progress
        }))
    }

    /// A snapshot still claiming to be running or stopping belongs to a
    /// process that died; it is rewritten as failed.
    pub fn reconcile_after_restart(&self) -> Result<Option<PersistedProgress>> {
        let Some(mut progress) = self.load()? else {
            return Ok(None);
        };
        let previous = progress.status;
        if mark_interrupted(&mut progress) {
            warn!(
                "Found bulk progress in '{}' state without a worker, marking as failed",
                previous.as_str()
            );
            self.store.save_progress(&progress)?;
            info!(
                "Interrupted run had processed {}/{} tracks",
                progress.processed_tracks, progress.total_tracks
            );
        }
        Ok(Some(progress))
    }
}

fn mark_interrupted(progress: &mut PersistedProgress) -> bool {
    if !matches!(progress.status, WorkerStatus::Running | WorkerStatus::Stopping) {
        return false;
    }
    progress.status = WorkerStatus::Failed;
    progress.last_error = Some(UNEXPECTED_STOP_MESSAGE.to_string());
    progress.current_track_id = None;
    progress.current_track = None;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration_store::SqliteDurationStore;

    fn persistence() -> ProgressPersistence {
        ProgressPersistence::new(Arc::new(SqliteDurationStore::in_memory().unwrap()))
    }

    fn state(status: WorkerStatus) -> WorkerState {
        WorkerState {
            status,
            total_tracks: 20,
            processed_tracks: 5,
            resolved_count: 5,
            current_track_id: Some(6),
            current_track: Some("Miles Davis - So What".to_string()),
            started_at: Some(1_700_000_000),
            ..WorkerState::idle()
        }
    }

    #[test]
    fn test_save_and_load() {
        let persistence = persistence();
        assert!(persistence.load().unwrap().is_none());

        persistence.save(&state(WorkerStatus::Paused), Some(5)).unwrap();
        let loaded = persistence.load().unwrap().unwrap();
        assert_eq!(loaded.status, WorkerStatus::Paused);
        assert_eq!(loaded.processed_tracks, 5);
        assert_eq!(loaded.last_processed_track_id, Some(5));

        persistence.reset().unwrap();
        assert!(persistence.load().unwrap().is_none());
    }

    #[test]
    fn test_reconcile_marks_running_snapshot_failed() {
        let persistence = persistence();
        persistence.save(&state(WorkerStatus::Running), Some(5)).unwrap();

        let reconciled = persistence.reconcile_after_restart().unwrap().unwrap();
        assert_eq!(reconciled.status, WorkerStatus::Failed);
        assert_eq!(reconciled.last_error.as_deref(), Some(UNEXPECTED_STOP_MESSAGE));
        assert_eq!(reconciled.processed_tracks, 5);
        assert_eq!(persistence.load().unwrap().unwrap(), reconciled);
    }

    #[test]
    fn test_reconciled_view_does_not_write() {
        let persistence = persistence();
        assert!(persistence.reconciled_view().unwrap().is_none());
        persistence.save(&state(WorkerStatus::Running), Some(5)).unwrap();

        let view = persistence.reconciled_view().unwrap().unwrap();
        assert_eq!(view.status, WorkerStatus::Failed);
        assert_eq!(view.last_error.as_deref(), Some(UNEXPECTED_STOP_MESSAGE));

        let stored = persistence.load().unwrap().unwrap();
        assert_eq!(stored.status, WorkerStatus::Running);
        assert_eq!(stored.last_error, None);
    }

    #[test]
    fn test_stopping_snapshot_is_reconciled_as_failed() {
        let persistence = persistence();
        persistence.save(&state(WorkerStatus::Running), Some(5)).unwrap();
        persistence.mark_stopping().unwrap();
        assert_eq!(
            persistence.load().unwrap().unwrap().status,
            WorkerStatus::Stopping
        );

        let reconciled = persistence.reconcile_after_restart().unwrap().unwrap();
        assert_eq!(reconciled.status, WorkerStatus::Failed);
        assert_eq!(reconciled.last_processed_track_id, Some(5));
    }

    #[test]
    fn test_mark_stopping_ignores_finished_runs() {
        let persistence = persistence();
        persistence.mark_stopping().unwrap();
        assert!(persistence.load().unwrap().is_none());

        persistence.save(&state(WorkerStatus::Completed), Some(5)).unwrap();
        persistence.mark_stopping().unwrap();
        assert_eq!(
            persistence.load().unwrap().unwrap().status,
            WorkerStatus::Completed
        );
    }

    #[test]
    fn test_reconcile_leaves_paused_and_completed_alone() {
        let persistence = persistence();
        persistence.save(&state(WorkerStatus::Paused), Some(5)).unwrap();
        let reconciled = persistence.reconcile_after_restart().unwrap().unwrap();
        assert_eq!(reconciled.status, WorkerStatus::Paused);
        assert_eq!(reconciled.last_error, None);

        persistence.mark_complete().unwrap();
        let completed = persistence.load().unwrap().unwrap();
        assert_eq!(completed.status, WorkerStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(completed.current_track_id, None);
    }
}
