//! Bulk resolution of every track missing a duration: a single background
//! worker with pause, resume, stop and cancel, and crash-safe progress.

mod error;
mod manager;
mod progress;
mod state;
mod worker;

pub use error::BulkError;
pub use manager::{BulkProgress, BulkResolutionManager};
pub use progress::{ProgressPersistence, UNEXPECTED_STOP_MESSAGE};
pub use state::{ControlRequest, StateManager, WorkerState};
pub use worker::DurationWorker;
