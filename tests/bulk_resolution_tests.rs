//! End-to-end tests for the bulk resolution worker
//!
//! Runs the real manager, worker and SQLite store against mock providers.

mod common;

use common::{
    wait_for_status, GatedProvider, HangingProvider, StaticProvider, TestEnv, WAIT_TIMEOUT_MS,
};
use duration_resolver::bulk::{BulkError, BulkResolutionManager, UNEXPECTED_STOP_MESSAGE};
use duration_resolver::duration_store::{DurationStore, PersistedProgress, WorkerStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_millis(WAIT_TIMEOUT_MS), future)
        .await
        .expect("timed out")
}

fn interrupted_progress(status: WorkerStatus, processed: i64, last_processed: i64) -> PersistedProgress {
    PersistedProgress {
        status,
        total_tracks: 20,
        processed_tracks: processed,
        resolved_count: processed,
        needs_review_count: 0,
        failed_count: 0,
        skipped_count: 0,
        current_track_id: None,
        current_track: None,
        last_processed_track_id: Some(last_processed),
        last_error: None,
        started_at: Some(1_700_000_000),
        last_activity_at: Some(1_700_000_100),
        completed_at: None,
    }
}

#[tokio::test]
async fn test_pause_after_ten_tracks_and_resume_from_eleventh() {
    let env = TestEnv::with_album(50);
    let musicbrainz = GatedProvider::new("musicbrainz", 10);
    let lastfm = StaticProvider::agreeing("lastfm");
    let manager = env.manager(vec![musicbrainz.clone(), lastfm.clone()]);

    manager.start().await.unwrap();
    within(musicbrainz.reached.notified()).await;
    manager.pause().await.unwrap();
    musicbrainz.release();
    within(wait_for_status(&manager, WorkerStatus::Paused)).await;

    let progress = manager.progress().await.unwrap();
    assert!(progress.is_paused);
    assert!(!progress.is_running);
    assert_eq!(progress.state.processed_tracks, 10);
    assert_eq!(progress.state.total_tracks, 50);
    assert_eq!(progress.percent_complete, 20.0);

    let persisted = env.store.load_progress().unwrap().unwrap();
    assert_eq!(persisted.status, WorkerStatus::Paused);
    assert_eq!(persisted.processed_tracks, 10);
    assert_eq!(persisted.last_processed_track_id, Some(env.track_ids[9]));

    // Paused workers do not query anything
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(lastfm.titles().len(), 10);

    manager.resume().await.unwrap();
    within(manager.wait_for_completion()).await;

    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Completed);
    assert_eq!(progress.state.processed_tracks, 50);
    assert_eq!(progress.state.resolved_count, 50);
    assert!(progress.state.completed_at.is_some());

    let titles = lastfm.titles();
    assert_eq!(titles.len(), 50);
    assert_eq!(titles[10], "Track 11");
    assert_eq!(
        env.store.load_progress().unwrap().unwrap().status,
        WorkerStatus::Completed
    );
    assert_eq!(env.store.get_duration_stats().unwrap().missing_duration, 0);
}

#[tokio::test]
async fn test_second_start_conflicts_while_running() {
    let env = TestEnv::with_album(3);
    let musicbrainz = GatedProvider::new("musicbrainz", 1);
    let manager = env.manager(vec![musicbrainz.clone(), StaticProvider::agreeing("lastfm")]);

    manager.start().await.unwrap();
    assert!(matches!(manager.start().await, Err(BulkError::AlreadyRunning)));
    assert!(manager.is_running().await);

    musicbrainz.release();
    within(manager.wait_for_completion()).await;
    assert!(!manager.is_running().await);

    // A finished run does not block the next one
    manager.start().await.unwrap();
    within(manager.wait_for_completion()).await;
    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Completed);
    assert_eq!(progress.state.total_tracks, 0);
}

#[tokio::test]
async fn test_cancel_during_lookup_discards_everything() {
    let env = TestEnv::with_album(5);
    let hanging = HangingProvider::new();
    let manager = env.manager(vec![hanging.clone()]);

    manager.start().await.unwrap();
    within(hanging.called.notified()).await;

    let started = tokio::time::Instant::now();
    manager.cancel().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(!manager.is_running().await);
    assert!(env.store.load_progress().unwrap().is_none());
    assert!(env
        .store
        .get_active_resolution_for_track(env.track_ids[0])
        .unwrap()
        .is_none());
    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Idle);
    assert_eq!(progress.state.processed_tracks, 0);

    // Restart is allowed after a cancel, and cancel without a run succeeds
    manager.start().await.unwrap();
    manager.cancel().await.unwrap();
    manager.cancel().await.unwrap();
}

#[tokio::test]
async fn test_stop_keeps_progress_and_next_start_continues() {
    let env = TestEnv::with_album(10);
    let musicbrainz = GatedProvider::new("musicbrainz", 3);
    let lastfm = StaticProvider::agreeing("lastfm");
    let manager = env.manager(vec![musicbrainz.clone(), lastfm.clone()]);

    manager.start().await.unwrap();
    within(musicbrainz.reached.notified()).await;
    manager.stop().await.unwrap();
    musicbrainz.release();
    within(manager.wait_for_completion()).await;

    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Stopped);
    assert_eq!(progress.state.processed_tracks, 3);
    let persisted = env.store.load_progress().unwrap().unwrap();
    assert_eq!(persisted.status, WorkerStatus::Stopped);
    assert_eq!(persisted.last_processed_track_id, Some(env.track_ids[2]));

    manager.start().await.unwrap();
    within(manager.wait_for_completion()).await;

    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Completed);
    assert_eq!(progress.state.processed_tracks, 10);
    assert_eq!(progress.state.total_tracks, 10);
    let titles = lastfm.titles();
    assert_eq!(titles.len(), 10);
    assert_eq!(titles[3], "Track 4");
}

#[tokio::test]
async fn test_stop_reports_stopping_while_track_in_flight() {
    let env = TestEnv::with_album(5);
    let musicbrainz = GatedProvider::new("musicbrainz", 1);
    let manager = env.manager(vec![musicbrainz.clone(), StaticProvider::agreeing("lastfm")]);

    manager.start().await.unwrap();
    within(musicbrainz.reached.notified()).await;
    manager.stop().await.unwrap();

    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Stopping);
    assert!(!progress.is_running);
    assert!(!progress.is_paused);
    assert!(manager.is_running().await);
    assert_eq!(
        env.store.load_progress().unwrap().unwrap().status,
        WorkerStatus::Stopping
    );
    assert!(matches!(manager.pause().await, Err(BulkError::NotRunning)));
    assert!(matches!(manager.resume().await, Err(BulkError::NotPaused)));

    musicbrainz.release();
    within(manager.wait_for_completion()).await;

    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Stopped);
    assert_eq!(progress.state.processed_tracks, 1);
    let persisted = env.store.load_progress().unwrap().unwrap();
    assert_eq!(persisted.status, WorkerStatus::Stopped);
    assert_eq!(persisted.last_processed_track_id, Some(env.track_ids[0]));
}

#[tokio::test]
async fn test_store_failure_mid_run_fails_the_run() {
    let env = TestEnv::with_album(3);
    let musicbrainz = GatedProvider::new("musicbrainz", 1);
    let manager = env.manager(vec![musicbrainz.clone(), StaticProvider::agreeing("lastfm")]);

    manager.start().await.unwrap();
    within(musicbrainz.reached.notified()).await;

    // Break the store behind the worker's back
    let conn = rusqlite::Connection::open(env.dir.path().join("duration.db")).unwrap();
    conn.execute_batch("DROP TABLE duration_sources;").unwrap();
    drop(conn);

    musicbrainz.release();
    within(manager.wait_for_completion()).await;

    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Failed);
    assert!(!progress.is_running);
    assert!(!manager.is_running().await);
    assert_eq!(progress.state.processed_tracks, 0);
    let error = progress.state.last_error.clone().unwrap();
    assert!(error.starts_with("no such table: duration_sources"), "{}", error);

    let persisted = env.store.load_progress().unwrap().unwrap();
    assert_eq!(persisted.status, WorkerStatus::Failed);
    assert_eq!(persisted.last_error, Some(error));
}

#[tokio::test]
async fn test_crashed_run_is_reported_as_failed_after_restart() {
    let env = TestEnv::with_album(20);
    env.store
        .save_progress(&interrupted_progress(WorkerStatus::Running, 5, env.track_ids[4]))
        .unwrap();

    // A new process opens the same database
    let store = env.reopen();
    let manager = BulkResolutionManager::new(
        env.resolver(vec![]),
        store.clone(),
        TestEnv::bulk_settings(),
    )
    .unwrap();

    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Failed);
    assert_eq!(progress.state.last_error.as_deref(), Some(UNEXPECTED_STOP_MESSAGE));
    assert_eq!(progress.state.processed_tracks, 5);
    assert!(!progress.is_running);

    let persisted = store.load_progress().unwrap().unwrap();
    assert_eq!(persisted.status, WorkerStatus::Failed);
}

#[tokio::test]
async fn test_interrupted_run_resumes_after_last_processed_track() {
    let env = TestEnv::with_album(20);
    env.store
        .save_progress(&interrupted_progress(WorkerStatus::Running, 5, env.track_ids[4]))
        .unwrap();

    let lastfm = StaticProvider::agreeing("lastfm");
    let manager = env.manager(vec![StaticProvider::agreeing("musicbrainz"), lastfm.clone()]);
    manager.start().await.unwrap();
    within(manager.wait_for_completion()).await;

    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Completed);
    assert_eq!(progress.state.total_tracks, 20);
    assert_eq!(progress.state.processed_tracks, 20);
    assert_eq!(progress.state.resolved_count, 20);
    assert_eq!(progress.state.started_at, Some(1_700_000_000));
    assert_eq!(progress.state.last_error, None);

    let titles = lastfm.titles();
    assert_eq!(titles.len(), 15);
    assert_eq!(titles[0], "Track 6");
}

#[tokio::test]
async fn test_paused_run_can_be_resumed_after_restart() {
    let env = TestEnv::with_album(4);
    env.store
        .save_progress(&interrupted_progress(WorkerStatus::Paused, 2, env.track_ids[1]))
        .unwrap();

    let lastfm = StaticProvider::agreeing("lastfm");
    let manager = env.manager(vec![StaticProvider::agreeing("musicbrainz"), lastfm.clone()]);
    assert!(manager.progress().await.unwrap().is_paused);
    assert!(matches!(manager.pause().await, Err(BulkError::NotRunning)));

    manager.resume().await.unwrap();
    within(manager.wait_for_completion()).await;

    let progress = manager.progress().await.unwrap();
    assert_eq!(progress.state.status, WorkerStatus::Completed);
    assert_eq!(progress.state.processed_tracks, 4);
    assert_eq!(lastfm.titles(), vec!["Track 3".to_string(), "Track 4".to_string()]);
}

#[tokio::test]
async fn test_resume_without_paused_run_fails() {
    let env = TestEnv::with_album(1);
    let manager: Arc<BulkResolutionManager> = env.manager(vec![]);
    assert!(matches!(manager.resume().await, Err(BulkError::NotPaused)));
    assert!(matches!(manager.pause().await, Err(BulkError::NotRunning)));
    assert_eq!(
        manager.progress().await.unwrap().state.status,
        WorkerStatus::Idle
    );
}
