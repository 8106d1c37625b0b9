//! Review workflow on top of the resolver: applying, rejecting and listing
//! resolutions that need a human decision.

use super::error::DurationError;
use super::resolver::DurationResolverService;
use crate::duration_store::{
    Album, DurationResolution, DurationSource, DurationStats, ResolutionEntry, ResolutionFilter,
    ResolutionStatus, Track,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const ADMIN_REVIEWER: &str = "admin";
const SYSTEM_REVIEWER: &str = "system";
const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewQueueQuery {
    pub page: usize,
    pub limit: usize,
    pub search: Option<String>,
}

impl ReviewQueueQuery {
    fn page(&self) -> usize {
        self.page.max(1)
    }

    fn limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.limit.min(MAX_PAGE_SIZE)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewSource {
    #[serde(flatten)]
    pub source: DurationSource,
    /// Within tolerance of the resolved duration.
    pub caused_match: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub resolution: DurationResolution,
    pub track: Track,
    pub album: Option<Album>,
    pub sources: Vec<ReviewSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewPage {
    pub items: Vec<ReviewItem>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkReviewAction {
    ApplyAll,
    RejectAll,
}

impl BulkReviewAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "apply_all" => Some(BulkReviewAction::ApplyAll),
            "reject_all" => Some(BulkReviewAction::RejectAll),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReviewResult {
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DurationStatistics {
    pub total_tracks: i64,
    pub missing_duration: i64,
    pub resolved_duration: i64,
    pub manual_duration: i64,
    pub pending_review: i64,
}

impl From<DurationStats> for DurationStatistics {
    fn from(stats: DurationStats) -> Self {
        Self {
            total_tracks: stats.total_tracks,
            missing_duration: stats.missing_duration,
            resolved_duration: stats.resolved_duration,
            manual_duration: stats.manual_duration,
            pending_review: stats.needs_review,
        }
    }
}

fn validate_duration(duration: i32) -> Result<(), DurationError> {
    if duration <= 0 {
        return Err(DurationError::Validation(format!(
            "Duration must be positive, got {}",
            duration
        )));
    }
    Ok(())
}

impl DurationResolverService {
    fn load_resolution(&self, id: i64) -> Result<DurationResolution, DurationError> {
        self.store
            .get_resolution(id)?
            .ok_or_else(|| DurationError::not_found("Resolution", id))
    }

    // =========================================================================
    // Review actions
    // =========================================================================

    /// Approves a resolution with the given duration and writes it onto the
    /// track as a manual value.
    pub fn apply_resolution(
        &self,
        id: i64,
        duration: i32,
        notes: Option<&str>,
    ) -> Result<DurationResolution, DurationError> {
        validate_duration(duration)?;
        let resolution = self.load_resolution(id)?;
        if !matches!(
            resolution.status,
            ResolutionStatus::NeedsReview | ResolutionStatus::Resolved
        ) {
            return Err(DurationError::InvalidState {
                expected: "needs_review or resolved".to_string(),
                actual: resolution.status.as_str().to_string(),
            });
        }

        let applied = self.store.apply_review(id, duration, ADMIN_REVIEWER, notes)?;
        info!(
            "Applied duration {}s to track {} from resolution {}",
            duration, applied.track_id, id
        );
        Ok(applied)
    }

    pub fn apply_source(
        &self,
        id: i64,
        source_id: i64,
        notes: Option<&str>,
    ) -> Result<DurationResolution, DurationError> {
        let source = self
            .store
            .get_source(source_id)?
            .filter(|s| s.resolution_id == id)
            .ok_or_else(|| DurationError::not_found("Source", source_id))?;
        if source.duration_value <= 0 {
            return Err(DurationError::Validation(format!(
                "Source {} ({}) has no duration",
                source_id, source.source_name
            )));
        }
        self.apply_resolution(id, source.duration_value, notes)
    }

    pub fn reject_resolution(
        &self,
        id: i64,
        actor: &str,
        notes: Option<&str>,
    ) -> Result<DurationResolution, DurationError> {
        let resolution = self.load_resolution(id)?;
        if resolution.status == ResolutionStatus::Rejected {
            return Err(DurationError::InvalidState {
                expected: "not rejected".to_string(),
                actual: resolution.status.as_str().to_string(),
            });
        }
        let rejected = self.store.reject_resolution(id, actor, notes)?;
        info!("Resolution {} rejected by {}", id, actor);
        Ok(rejected)
    }

    pub fn manually_set_duration(
        &self,
        track_id: i64,
        duration: i32,
        notes: Option<&str>,
    ) -> Result<DurationResolution, DurationError> {
        validate_duration(duration)?;
        if self.store.get_track(track_id)?.is_none() {
            return Err(DurationError::not_found("Track", track_id));
        }
        let resolution = self
            .store
            .set_manual_duration(track_id, duration, ADMIN_REVIEWER, notes)?;
        info!("Manually set duration of track {} to {}s", track_id, duration);
        Ok(resolution)
    }

    /// Leaves the resolution in the queue, only recording notes.
    pub fn skip_review(&self, id: i64, notes: Option<&str>) -> Result<(), DurationError> {
        self.load_resolution(id)?;
        self.store.update_review_notes(id, notes)?;
        Ok(())
    }

    pub fn bulk_review(
        &self,
        action: BulkReviewAction,
        ids: &[i64],
        notes: Option<&str>,
    ) -> Result<BulkReviewResult, DurationError> {
        let mut result = BulkReviewResult::default();
        for &id in ids {
            let outcome = match action {
                BulkReviewAction::ApplyAll => self.apply_best_source(id, notes),
                BulkReviewAction::RejectAll => self
                    .reject_resolution(id, SYSTEM_REVIEWER, notes)
                    .map(|_| ()),
            };
            match outcome {
                Ok(()) => result.processed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Bulk review of resolution {} failed: {}", id, e);
                    result.failed += 1;
                }
            }
        }
        info!(
            "Bulk review {:?}: {} processed, {} failed",
            action, result.processed, result.failed
        );
        Ok(result)
    }

    fn apply_best_source(&self, id: i64, notes: Option<&str>) -> Result<(), DurationError> {
        let best = self
            .store
            .get_sources(id)?
            .into_iter()
            .filter(|s| s.is_success())
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .ok_or_else(|| {
                DurationError::Validation(format!("Resolution {} has no successful source", id))
            })?;
        self.apply_resolution(id, best.duration_value, notes)?;
        Ok(())
    }

    // =========================================================================
    // Queues
    // =========================================================================

    pub fn review_queue(&self, query: &ReviewQueueQuery) -> Result<ReviewPage, DurationError> {
        self.list_page(query, vec![ResolutionStatus::NeedsReview], false)
    }

    pub fn resolved_queue(&self, query: &ReviewQueueQuery) -> Result<ReviewPage, DurationError> {
        self.list_page(
            query,
            vec![ResolutionStatus::Resolved, ResolutionStatus::Approved],
            true,
        )
    }

    pub fn review_details(&self, id: i64) -> Result<ReviewItem, DurationError> {
        let resolution = self.load_resolution(id)?;
        let track = self
            .store
            .get_track(resolution.track_id)?
            .ok_or_else(|| DurationError::not_found("Track", resolution.track_id))?;
        let album = self.store.get_album(resolution.album_id)?;
        self.build_item(
            ResolutionEntry {
                resolution,
                track,
                album,
            },
            false,
        )
    }

    pub fn statistics(&self) -> Result<DurationStatistics, DurationError> {
        Ok(self.store.get_duration_stats()?.into())
    }

    fn list_page(
        &self,
        query: &ReviewQueueQuery,
        statuses: Vec<ResolutionStatus>,
        resolved_only: bool,
    ) -> Result<ReviewPage, DurationError> {
        let page = query.page();
        let limit = query.limit();
        let filter = ResolutionFilter {
            statuses,
            search: query
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            newest_first_by_update: resolved_only,
            limit,
            offset: (page - 1).saturating_mul(limit),
        };
        let (entries, total) = self.store.list_resolutions(&filter)?;
        let items = entries
            .into_iter()
            .map(|entry| self.build_item(entry, resolved_only))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ReviewPage {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    fn build_item(&self, entry: ResolutionEntry, successful_only: bool) -> Result<ReviewItem, DurationError> {
        let mut sources = self.store.get_sources(entry.resolution.id)?;
        if successful_only {
            sources.retain(|s| s.is_success());
            sources.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        }
        let tolerance = self.settings.tolerance_secs;
        let sources = sources
            .into_iter()
            .map(|source| ReviewSource {
                caused_match: source.is_success()
                    && entry
                        .resolution
                        .resolved_duration
                        .map(|d| (source.duration_value - d).abs() <= tolerance)
                        .unwrap_or(false),
                source,
            })
            .collect();
        Ok(ReviewItem {
            resolution: entry.resolution,
            track: entry.track,
            album: entry.album,
            sources,
        })
    }
}
