//! Multi-source duration resolution with consensus and a review workflow.

mod consensus;
mod error;
pub mod matching;
mod provider;
mod resolver;
mod review;

pub use consensus::{Cluster, ConsensusPolicy, Decision, Vote};
pub use error::DurationError;
pub use provider::{
    DurationCandidate, DurationProvider, ProviderError, RateLimitedProvider, TrackQuery,
};
pub use resolver::{AlbumResolutionSummary, DurationResolverService, ResolveContext};
pub use review::{
    BulkReviewAction, BulkReviewResult, DurationStatistics, ReviewItem, ReviewPage,
    ReviewQueueQuery, ReviewSource,
};
