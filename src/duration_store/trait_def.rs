//! Storage trait for the duration resolution data.

use super::models::*;
use anyhow::Result;

/// Persistence for library tracks, resolutions, sources and bulk progress.
///
/// Every method that touches more than one row runs in a single transaction,
/// so readers never observe a resolution without its sources or a track
/// duration without the resolution that produced it.
pub trait DurationStore: Send + Sync {
    // =========================================================================
    // Library
    // =========================================================================

    fn insert_album(&self, title: &str, artist: &str) -> Result<i64>;
    fn insert_track(&self, track: &NewTrack) -> Result<i64>;
    fn get_album(&self, id: i64) -> Result<Option<Album>>;
    fn get_track(&self, id: i64) -> Result<Option<Track>>;

    /// Tracks with duration 0, skipping rows with album_id 0 or an empty
    /// title, ordered by album then track number.
    fn list_tracks_needing_duration(&self) -> Result<Vec<Track>>;
    fn list_album_tracks_needing_duration(&self, album_id: i64) -> Result<Vec<Track>>;

    fn get_duration_stats(&self) -> Result<DurationStats>;

    // =========================================================================
    // Resolutions
    // =========================================================================

    fn get_resolution(&self, id: i64) -> Result<Option<DurationResolution>>;

    /// Latest non-rejected resolution for the track.
    fn get_active_resolution_for_track(&self, track_id: i64) -> Result<Option<DurationResolution>>;

    fn get_sources(&self, resolution_id: i64) -> Result<Vec<DurationSource>>;
    fn get_source(&self, source_id: i64) -> Result<Option<DurationSource>>;

    /// Replaces every prior resolution of the track with the new attempt
    /// and its sources, optionally writing the resolved duration onto the
    /// track. A `needs_review` attempt flags the track for review.
    /// Returns the new resolution.
    fn save_resolution_attempt(&self, attempt: &ResolutionAttempt) -> Result<DurationResolution>;

    /// Marks the resolution approved with the given duration and writes it
    /// onto the track with origin `manual`.
    fn apply_review(
        &self,
        resolution_id: i64,
        duration: i32,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<DurationResolution>;

    /// Marks the resolution rejected. The track is left untouched.
    fn reject_resolution(
        &self,
        resolution_id: i64,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<DurationResolution>;

    /// Writes a manual duration onto the track and records it as an approved
    /// manual review on the active resolution, creating one if needed.
    fn set_manual_duration(
        &self,
        track_id: i64,
        duration: i32,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<DurationResolution>;

    fn update_review_notes(&self, resolution_id: i64, notes: Option<&str>) -> Result<()>;

    /// Returns the page of matching entries and the total match count.
    fn list_resolutions(&self, filter: &ResolutionFilter) -> Result<(Vec<ResolutionEntry>, usize)>;

    // =========================================================================
    // Bulk progress
    // =========================================================================

    fn save_progress(&self, progress: &PersistedProgress) -> Result<()>;
    fn load_progress(&self) -> Result<Option<PersistedProgress>>;
    fn clear_progress(&self) -> Result<()>;
}
