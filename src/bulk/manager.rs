use super::error::BulkError;
use super::progress::ProgressPersistence;
use super::state::{StateManager, WorkerState};
use super::worker::DurationWorker;
use crate::config::BulkWorkerSettings;
use crate::duration::DurationResolverService;
use crate::duration_store::{DurationStore, WorkerStatus};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Progress report of the current or last bulk run.
#[derive(Debug, Clone, Serialize)]
pub struct BulkProgress {
    #[serde(flatten)]
    pub state: WorkerState,
    pub percent_complete: f64,
    pub is_running: bool,
    pub is_paused: bool,
}

impl From<WorkerState> for BulkProgress {
    fn from(state: WorkerState) -> Self {
        Self {
            percent_complete: state.percent_complete(),
            is_running: state.status == WorkerStatus::Running,
            is_paused: state.status == WorkerStatus::Paused,
            state,
        }
    }
}

struct ActiveRun {
    state: Arc<StateManager>,
    cancel: CancellationToken,
    /// Cancelled once the worker task returns.
    finished: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the single bulk resolution run.
pub struct BulkResolutionManager {
    resolver: Arc<DurationResolverService>,
    store: Arc<dyn DurationStore>,
    settings: BulkWorkerSettings,
    progress: ProgressPersistence,
    active: Mutex<Option<ActiveRun>>,
}

impl BulkResolutionManager {
    /// Marks progress left behind by a crashed process as failed.
    pub fn new(
        resolver: Arc<DurationResolverService>,
        store: Arc<dyn DurationStore>,
        settings: BulkWorkerSettings,
    ) -> Result<Self, BulkError> {
        let progress = ProgressPersistence::new(store.clone());
        progress.reconcile_after_restart()?;
        Ok(Self {
            resolver,
            store,
            settings,
            progress,
            active: Mutex::new(None),
        })
    }

    pub async fn start(&self) -> Result<BulkProgress, BulkError> {
        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            if run.state.is_active() {
                return Err(BulkError::AlreadyRunning);
            }
        }

        let state = Arc::new(StateManager::new());
        state.update(|s| {
            s.status = WorkerStatus::Running;
            s.started_at = Some(chrono::Utc::now().timestamp());
        });
        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();

        let worker = DurationWorker::new(
            self.resolver.clone(),
            self.store.clone(),
            state.clone(),
            self.settings.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn({
            let finished = finished.clone();
            async move {
                worker.run().await;
                finished.cancel();
            }
        });

        info!("Started bulk duration resolution");
        let snapshot = state.snapshot();
        *active = Some(ActiveRun {
            state,
            cancel,
            finished,
            handle,
        });
        Ok(snapshot.into())
    }

    pub async fn pause(&self) -> Result<(), BulkError> {
        let active = self.active.lock().await;
        let run = active.as_ref().ok_or(BulkError::NotRunning)?;
        run.state.request_pause()?;
        info!("Pause requested for bulk duration resolution");
        Ok(())
    }

    /// Resumes a paused run. A run paused before a restart is picked up
    /// again from its persisted progress.
    pub async fn resume(&self) -> Result<(), BulkError> {
        {
            let active = self.active.lock().await;
            if let Some(run) = active.as_ref() {
                if run.state.is_active() {
                    run.state.request_resume()?;
                    info!("Resume requested for bulk duration resolution");
                    return Ok(());
                }
            }
        }

        match self.progress.load()? {
            Some(progress) if progress.status == WorkerStatus::Paused => {
                info!("Resuming persisted paused bulk run");
                self.start().await.map(|_| ())
            }
            _ => Err(BulkError::NotPaused),
        }
    }

    /// Asks the worker to stop after the current track, keeping its progress.
    pub async fn stop(&self) -> Result<(), BulkError> {
        let active = self.active.lock().await;
        let run = active.as_ref().ok_or(BulkError::NotRunning)?;
        run.state.request_stop()?;
        self.progress.mark_stopping()?;
        info!("Stop requested for bulk duration resolution");
        Ok(())
    }

    /// Aborts the run and discards its progress. Succeeds without a run.
    pub async fn cancel(&self) -> Result<(), BulkError> {
        let mut active = self.active.lock().await;
        if let Some(mut run) = active.take() {
            run.cancel.cancel();
            // Not active any more is fine, the token does the work
            let _ = run.state.request_stop();

            if tokio::time::timeout(self.settings.cancel_grace(), &mut run.handle)
                .await
                .is_err()
            {
                warn!(
                    "Bulk worker did not stop within {:?}, aborting",
                    self.settings.cancel_grace()
                );
                run.handle.abort();
                let _ = run.handle.await;
            }
            run.state.reset();
            info!("Bulk duration resolution cancelled");
        }
        self.progress.reset()?;
        Ok(())
    }

    pub async fn progress(&self) -> Result<BulkProgress, BulkError> {
        {
            let active = self.active.lock().await;
            if let Some(run) = active.as_ref() {
                return Ok(run.state.snapshot().into());
            }
        }
        match self.progress.reconcile_after_restart()? {
            Some(persisted) => Ok(WorkerState::from_persisted(&persisted).into()),
            None => Ok(WorkerState::idle().into()),
        }
    }

    pub async fn is_running(&self) -> bool {
        let active = self.active.lock().await;
        active
            .as_ref()
            .map(|run| run.state.is_active())
            .unwrap_or(false)
    }

    /// Waits for the current run's worker task to return.
    pub async fn wait_for_completion(&self) {
        let finished = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(run) => run.finished.clone(),
                None => return,
            }
        };
        finished.cancelled().await;
    }
}
