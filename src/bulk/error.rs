use thiserror::Error;

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("Bulk resolution already running")]
    AlreadyRunning,

    #[error("Bulk resolution is not running")]
    NotRunning,

    #[error("Bulk resolution is not paused")]
    NotPaused,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
