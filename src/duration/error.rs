use thiserror::Error;

/// Errors returned by the resolver service and the review workflow.
#[derive(Debug, Error)]
pub enum DurationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid resolution state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Track {0} already has a duration")]
    AlreadyHasDuration(i64),

    #[error("Resolution cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl DurationError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        DurationError::NotFound { entity, id }
    }

    /// Store failures abort a bulk run; everything else is per-track.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DurationError::Store(_))
    }
}
