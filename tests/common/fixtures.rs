//! Temporary stores and service wiring

use super::constants::*;
use duration_resolver::bulk::BulkResolutionManager;
use duration_resolver::config::{BulkWorkerSettings, DurationResolverSettings};
use duration_resolver::duration::{DurationProvider, DurationResolverService};
use duration_resolver::duration_store::{
    DurationStore, NewTrack, SqliteDurationStore, WorkerStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestEnv {
    // Keeps the database directory alive
    pub dir: TempDir,
    pub store: Arc<SqliteDurationStore>,
    pub album_id: i64,
    /// Seeded track ids in processing order.
    pub track_ids: Vec<i64>,
}

impl TestEnv {
    /// One album with `track_count` tracks titled "Track 1".."Track N", all
    /// missing a duration.
    pub fn with_album(track_count: i32) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteDurationStore::new(dir.path().join("duration.db")).unwrap());
        let album_id = store.insert_album(ALBUM_TITLE, ALBUM_ARTIST).unwrap();
        let track_ids = (1..=track_count)
            .map(|n| {
                store
                    .insert_track(&NewTrack {
                        album_id,
                        title: format!("Track {}", n),
                        track_number: n,
                        duration: 0,
                    })
                    .unwrap()
            })
            .collect();
        Self {
            dir,
            store,
            album_id,
            track_ids,
        }
    }

    /// Opens a second store on the same file, like a restarted process.
    pub fn reopen(&self) -> Arc<SqliteDurationStore> {
        Arc::new(SqliteDurationStore::new(self.dir.path().join("duration.db")).unwrap())
    }

    pub fn resolver(&self, providers: Vec<Arc<dyn DurationProvider>>) -> Arc<DurationResolverService> {
        Arc::new(DurationResolverService::new(
            self.store.clone(),
            providers,
            DurationResolverSettings::default(),
        ))
    }

    pub fn bulk_settings() -> BulkWorkerSettings {
        BulkWorkerSettings {
            inter_track_delay_ms: 0,
            progress_save_every: 1,
            cancel_grace_secs: 2,
            ..Default::default()
        }
    }

    pub fn manager(&self, providers: Vec<Arc<dyn DurationProvider>>) -> Arc<BulkResolutionManager> {
        Arc::new(
            BulkResolutionManager::new(
                self.resolver(providers),
                self.store.clone(),
                Self::bulk_settings(),
            )
            .unwrap(),
        )
    }
}

/// Polls the manager until its status matches, panicking on timeout.
pub async fn wait_for_status(manager: &BulkResolutionManager, status: WorkerStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(WAIT_TIMEOUT_MS);
    loop {
        let progress = manager.progress().await.unwrap();
        if progress.state.status == status {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "Timed out waiting for status {:?}, last was {:?}",
                status, progress.state.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
