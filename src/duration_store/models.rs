use serde::{Deserialize, Serialize};

// =============================================================================
// Library entities
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub title: String,
    pub artist: String,
}

/// Where a track's current duration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationOrigin {
    None,
    Manual,
    Resolved,
}

impl DurationOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationOrigin::None => "none",
            DurationOrigin::Manual => "manual",
            DurationOrigin::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(DurationOrigin::None),
            "manual" => Some(DurationOrigin::Manual),
            "resolved" => Some(DurationOrigin::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub album_id: i64,
    pub title: String,
    pub track_number: i32,
    /// Seconds, 0 means unresolved.
    pub duration: i32,
    pub duration_source: DurationOrigin,
    pub duration_needs_review: bool,
    pub duration_resolved_at: Option<i64>,
}

impl Track {
    pub fn has_duration(&self) -> bool {
        self.duration > 0
    }
}

/// Fields needed to insert a track into the library tables.
#[derive(Debug, Clone)]
pub struct NewTrack {
    pub album_id: i64,
    pub title: String,
    pub track_number: i32,
    pub duration: i32,
}

// =============================================================================
// Resolutions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    Resolved,
    NeedsReview,
    Rejected,
    Approved,
    Failed,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Pending => "pending",
            ResolutionStatus::Resolved => "resolved",
            ResolutionStatus::NeedsReview => "needs_review",
            ResolutionStatus::Rejected => "rejected",
            ResolutionStatus::Approved => "approved",
            ResolutionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ResolutionStatus::Pending),
            "resolved" => Some(ResolutionStatus::Resolved),
            "needs_review" => Some(ResolutionStatus::NeedsReview),
            "rejected" => Some(ResolutionStatus::Rejected),
            "approved" => Some(ResolutionStatus::Approved),
            "failed" => Some(ResolutionStatus::Failed),
            _ => None,
        }
    }

    /// A successful resolution is returned as-is by a non-forced resolve.
    pub fn is_successful(&self) -> bool {
        matches!(self, ResolutionStatus::Resolved | ResolutionStatus::Approved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Apply,
    Reject,
    Manual,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Apply => "apply",
            ReviewAction::Reject => "reject",
            ReviewAction::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "apply" => Some(ReviewAction::Apply),
            "reject" => Some(ReviewAction::Reject),
            "manual" => Some(ReviewAction::Manual),
            _ => None,
        }
    }
}

/// Outcome of one resolution attempt for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationResolution {
    pub id: i64,
    pub track_id: i64,
    pub album_id: i64,
    pub status: ResolutionStatus,
    pub original_duration: i32,
    pub resolved_duration: Option<i32>,
    /// Independent sources in the winning cluster.
    pub consensus_count: i32,
    pub sources_queried: i32,
    pub successful_queries: i32,
    pub auto_applied: bool,
    pub review_action: Option<ReviewAction>,
    pub reviewed_by: Option<String>,
    pub review_notes: Option<String>,
    pub reviewed_at: Option<i64>,
    pub applied_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One provider's answer, or failure, for a resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationSource {
    pub id: i64,
    pub resolution_id: i64,
    pub source_name: String,
    pub duration_value: i32,
    pub match_score: f64,
    pub confidence: f64,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    /// Empty when the query succeeded.
    pub error_message: String,
    pub query_duration_ms: i64,
    pub queried_at: i64,
}

impl DurationSource {
    pub fn is_success(&self) -> bool {
        self.error_message.is_empty() && self.duration_value > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDurationSource {
    pub source_name: String,
    pub duration_value: i32,
    pub match_score: f64,
    pub confidence: f64,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub error_message: String,
    pub query_duration_ms: i64,
}

impl NewDurationSource {
    pub fn failed(source_name: &str, error_message: impl Into<String>, query_duration_ms: i64) -> Self {
        Self {
            source_name: source_name.to_string(),
            duration_value: 0,
            match_score: 0.0,
            confidence: 0.0,
            external_id: None,
            external_url: None,
            error_message: error_message.into(),
            query_duration_ms,
        }
    }
}

/// Everything written by a single resolve call, persisted in one transaction.
#[derive(Debug, Clone)]
pub struct ResolutionAttempt {
    pub track_id: i64,
    pub album_id: i64,
    pub status: ResolutionStatus,
    pub original_duration: i32,
    pub resolved_duration: Option<i32>,
    pub consensus_count: i32,
    pub sources_queried: i32,
    pub successful_queries: i32,
    /// Write `resolved_duration` onto the track with origin `resolved`.
    pub apply_to_track: bool,
    pub sources: Vec<NewDurationSource>,
}

/// Listing filter for resolutions joined with their track and album.
#[derive(Debug, Clone, Default)]
pub struct ResolutionFilter {
    pub statuses: Vec<ResolutionStatus>,
    /// Matches track title, album title or album artist.
    pub search: Option<String>,
    pub newest_first_by_update: bool,
    pub limit: usize,
    pub offset: usize,
}

/// A resolution together with the library rows it refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionEntry {
    pub resolution: DurationResolution,
    pub track: Track,
    pub album: Option<Album>,
}

// =============================================================================
// Bulk progress
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
    Completed,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Running => "running",
            WorkerStatus::Paused => "paused",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Completed => "completed",
            WorkerStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(WorkerStatus::Idle),
            "running" => Some(WorkerStatus::Running),
            "paused" => Some(WorkerStatus::Paused),
            "stopping" => Some(WorkerStatus::Stopping),
            "stopped" => Some(WorkerStatus::Stopped),
            "completed" => Some(WorkerStatus::Completed),
            "failed" => Some(WorkerStatus::Failed),
            _ => None,
        }
    }

    /// Running, paused or stopping: a worker owns the run.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            WorkerStatus::Running | WorkerStatus::Paused | WorkerStatus::Stopping
        )
    }
}

/// Durable snapshot of a bulk run, stored as a singleton row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedProgress {
    pub status: WorkerStatus,
    pub total_tracks: i64,
    pub processed_tracks: i64,
    pub resolved_count: i64,
    pub needs_review_count: i64,
    pub failed_count: i64,
    pub skipped_count: i64,
    pub current_track_id: Option<i64>,
    pub current_track: Option<String>,
    pub last_processed_track_id: Option<i64>,
    pub last_error: Option<String>,
    pub started_at: Option<i64>,
    pub last_activity_at: Option<i64>,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationStats {
    pub total_tracks: i64,
    pub missing_duration: i64,
    pub resolved_duration: i64,
    pub manual_duration: i64,
    pub needs_review: i64,
}
