use super::progress::ProgressPersistence;
use super::state::{ControlRequest, StateManager, WorkerState};
use crate::config::BulkWorkerSettings;
use crate::duration::{DurationError, DurationResolverService, ResolveContext};
use crate::duration_store::{DurationStore, PersistedProgress, ResolutionStatus, Track, WorkerStatus};
use anyhow::Result;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Completed,
    Stopped,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum TrackOutcome {
    Resolved,
    NeedsReview,
    Failed,
    Skipped,
}

/// Bookkeeping for periodic snapshots.
struct Checkpoint {
    last_processed_track_id: Option<i64>,
    since_save: u64,
    last_save: Instant,
}

impl Checkpoint {
    fn new() -> Self {
        Self {
            last_processed_track_id: None,
            since_save: 0,
            last_save: Instant::now(),
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn sort_key(track: &Track) -> (i64, i32, i64) {
    (track.album_id, track.track_number, track.id)
}

/// A snapshot of a run that never reached completion.
fn is_resumable(status: WorkerStatus) -> bool {
    matches!(
        status,
        WorkerStatus::Running
            | WorkerStatus::Paused
            | WorkerStatus::Stopping
            | WorkerStatus::Stopped
            | WorkerStatus::Failed
    )
}

/// Walks the backlog of tracks without a duration, one track at a time.
pub struct DurationWorker {
    resolver: Arc<DurationResolverService>,
    store: Arc<dyn DurationStore>,
    state: Arc<StateManager>,
    progress: ProgressPersistence,
    settings: BulkWorkerSettings,
    cancel: CancellationToken,
}

impl DurationWorker {
    pub fn new(
        resolver: Arc<DurationResolverService>,
        store: Arc<dyn DurationStore>,
        state: Arc<StateManager>,
        settings: BulkWorkerSettings,
        cancel: CancellationToken,
    ) -> Self {
        let progress = ProgressPersistence::new(store.clone());
        Self {
            resolver,
            store,
            state,
            progress,
            settings,
            cancel,
        }
    }

    pub async fn run(&self) {
        let mut checkpoint = Checkpoint::new();
        match self.process(&mut checkpoint).await {
            Ok(RunOutcome::Completed) => {
                let state = self.state.snapshot();
                info!(
                    "Bulk duration resolution completed: {} processed, {} resolved, {} need review, {} failed, {} skipped",
                    state.processed_tracks,
                    state.resolved_count,
                    state.needs_review_count,
                    state.failed_count,
                    state.skipped_count
                );
            }
            Ok(RunOutcome::Stopped) => info!("Bulk duration resolution stopped"),
            Ok(RunOutcome::Cancelled) => info!("Bulk duration resolution cancelled"),
            Err(e) => {
                error!("Bulk duration resolution failed: {:#}", e);
                self.state.update(|state| {
                    state.status = WorkerStatus::Failed;
                    state.last_error = Some(format!("{:#}", e));
                    state.current_track_id = None;
                    state.current_track = None;
                    state.last_activity_at = Some(now());
                });
                if let Err(save_err) = self
                    .progress
                    .save(&self.state.snapshot(), checkpoint.last_processed_track_id)
                {
                    error!("Failed to persist failed bulk run: {}", save_err);
                }
            }
        }
    }

    async fn process(&self, checkpoint: &mut Checkpoint) -> Result<RunOutcome> {
        let backlog = self.store.list_tracks_needing_duration()?;
        let (remaining, carried) = self.resume_point(backlog)?;

        self.state.update(|state| {
            // A stop can arrive before the backlog is loaded
            let stopping = state.status == WorkerStatus::Stopping;
            if let Some(previous) = &carried {
                let started_at = state.started_at;
                *state = WorkerState::from_persisted(previous);
                state.started_at = previous.started_at.or(started_at);
                state.last_error = None;
                state.completed_at = None;
            }
            state.status = if stopping {
                WorkerStatus::Stopping
            } else {
                WorkerStatus::Running
            };
            state.total_tracks = state.processed_tracks + remaining.len() as i64;
            state.started_at = state.started_at.or(Some(now()));
            state.last_activity_at = Some(now());
        });
        checkpoint.last_processed_track_id = carried.and_then(|p| p.last_processed_track_id);
        self.save(checkpoint)?;

        info!(
            "Bulk duration resolution started with {} tracks to process",
            remaining.len()
        );

        for track in remaining {
            if let Some(outcome) = self.checkpoint(checkpoint).await? {
                return Ok(outcome);
            }

            let outcome = match self.process_track(&track).await? {
                Some(outcome) => outcome,
                None => return Ok(RunOutcome::Cancelled),
            };

            self.state.update(|state| {
                state.processed_tracks += 1;
                match outcome {
                    TrackOutcome::Resolved => state.resolved_count += 1,
                    TrackOutcome::NeedsReview => state.needs_review_count += 1,
                    TrackOutcome::Failed => state.failed_count += 1,
                    TrackOutcome::Skipped => state.skipped_count += 1,
                }
                state.last_activity_at = Some(now());
            });
            checkpoint.last_processed_track_id = Some(track.id);
            checkpoint.since_save += 1;

            if checkpoint.since_save >= self.settings.progress_save_every
                || checkpoint.last_save.elapsed() >= self.settings.progress_save_interval()
            {
                self.save(checkpoint)?;
            }

            let delay = self.settings.inter_track_delay();
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => return Ok(RunOutcome::Cancelled),
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        self.state.update(|state| {
            state.current_track_id = None;
            state.current_track = None;
        });
        self.save(checkpoint)?;
        self.progress.mark_complete()?;
        self.state.update(|state| {
            state.status = WorkerStatus::Completed;
            state.completed_at = Some(now());
        });
        Ok(RunOutcome::Completed)
    }

    /// Tracks left to process and the snapshot being continued, if any.
    fn resume_point(&self, backlog: Vec<Track>) -> Result<(Vec<Track>, Option<PersistedProgress>)> {
        if !self.settings.resume_interrupted {
            return Ok((backlog, None));
        }
        let Some(previous) = self.progress.load()?.filter(|p| is_resumable(p.status)) else {
            return Ok((backlog, None));
        };
        let last = match previous.last_processed_track_id {
            Some(id) => self.store.get_track(id)?,
            None => None,
        };
        let Some(last) = last else {
            return Ok((backlog, None));
        };

        let after = sort_key(&last);
        let remaining: Vec<Track> = backlog.into_iter().filter(|t| sort_key(t) > after).collect();
        info!(
            "Resuming interrupted bulk run after track {} ({} already processed, {} remaining)",
            last.id,
            previous.processed_tracks,
            remaining.len()
        );
        Ok((remaining, Some(previous)))
    }

    /// Applies pending stop, pause and cancel requests. Returns the outcome
    /// when the run has to end here.
    async fn checkpoint(&self, checkpoint: &mut Checkpoint) -> Result<Option<RunOutcome>> {
        if self.cancel.is_cancelled() {
            return Ok(Some(RunOutcome::Cancelled));
        }

        match self.state.control_request() {
            ControlRequest::Run => Ok(None),
            ControlRequest::Stop => self.stop(checkpoint).map(Some),
            ControlRequest::Pause => {
                self.state.update(|state| {
                    if state.status == WorkerStatus::Running {
                        state.status = WorkerStatus::Paused;
                    }
                    state.current_track_id = None;
                    state.current_track = None;
                    state.last_activity_at = Some(now());
                });
                self.save(checkpoint)?;
                info!("Bulk duration resolution paused");

                let request = tokio::select! {
                    request = self.state.wait_while_paused() => request,
                    _ = self.cancel.cancelled() => return Ok(Some(RunOutcome::Cancelled)),
                };
                match request {
                    ControlRequest::Stop => self.stop(checkpoint).map(Some),
                    _ => {
                        info!("Bulk duration resolution resumed");
                        self.state.update(|state| {
                            if state.status == WorkerStatus::Paused {
                                state.status = WorkerStatus::Running;
                            }
                            state.last_activity_at = Some(now());
                        });
                        self.save(checkpoint)?;
                        Ok(None)
                    }
                }
            }
        }
    }

    fn stop(&self, checkpoint: &mut Checkpoint) -> Result<RunOutcome> {
        self.state.update(|state| {
            state.status = WorkerStatus::Stopped;
            state.current_track_id = None;
            state.current_track = None;
            state.last_activity_at = Some(now());
        });
        self.save(checkpoint)?;
        Ok(RunOutcome::Stopped)
    }

    /// `None` when the run was cancelled mid-track.
    async fn process_track(&self, track: &Track) -> Result<Option<TrackOutcome>> {
        let artist = self
            .store
            .get_album(track.album_id)?
            .map(|album| album.artist)
            .unwrap_or_default();
        self.state.update(|state| {
            state.current_track_id = Some(track.id);
            state.current_track = Some(format!("{} - {}", artist, track.title));
            state.last_activity_at = Some(now());
        });

        // The track may have been edited since the backlog was loaded
        let Some(current) = self.store.get_track(track.id)? else {
            debug!("Track {} disappeared, skipping", track.id);
            return Ok(Some(TrackOutcome::Skipped));
        };
        if current.has_duration() {
            debug!("Track {} already has a duration, skipping", track.id);
            return Ok(Some(TrackOutcome::Skipped));
        }

        let ctx = ResolveContext::new(
            Instant::now() + self.settings.track_timeout(),
            self.cancel.child_token(),
        );
        let outcome = match self.resolver.resolve_track(&current, false, &ctx).await {
            Ok(resolution) => match resolution.status {
                ResolutionStatus::Resolved | ResolutionStatus::Approved => TrackOutcome::Resolved,
                ResolutionStatus::NeedsReview => TrackOutcome::NeedsReview,
                _ => TrackOutcome::Failed,
            },
            Err(DurationError::Cancelled) => return Ok(None),
            Err(DurationError::AlreadyHasDuration(_)) => TrackOutcome::Skipped,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!("Failed to resolve track {}: {}", track.id, e);
                TrackOutcome::Failed
            }
        };
        Ok(Some(outcome))
    }

    fn save(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        self.progress
            .save(&self.state.snapshot(), checkpoint.last_processed_track_id)?;
        checkpoint.since_save = 0;
        checkpoint.last_save = Instant::now();
        Ok(())
    }
}
