//! Duration resolution engine
//!
//! Fills in missing track durations by asking several metadata providers
//! and accepting an answer only when enough of them agree. Disagreements go
//! to a review queue, and a background worker can resolve the whole library
//! with pause, resume and crash-safe progress.

pub mod bulk;
pub mod config;
pub mod duration;
pub mod duration_store;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use bulk::{BulkError, BulkProgress, BulkResolutionManager};
pub use duration::{DurationError, DurationProvider, DurationResolverService};
pub use duration_store::{DurationStore, SqliteDurationStore};
