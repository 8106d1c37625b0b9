//! Pluggable metadata sources that can report a track's duration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// What we know about the track being looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackQuery {
    pub title: String,
    pub artist: String,
    pub album: String,
}

/// One match reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationCandidate {
    pub duration_secs: i32,
    /// How well the result matches the query, 0.0-1.0.
    pub match_score: f64,
    /// How much the provider trusts its own data, 0.0-1.0.
    pub confidence: f64,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
}

impl DurationCandidate {
    pub fn new(duration_secs: i32, match_score: f64, confidence: f64) -> Self {
        Self {
            duration_secs,
            match_score,
            confidence,
            external_id: None,
            external_url: None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured")]
    NotConfigured,
}

#[async_trait]
pub trait DurationProvider: Send + Sync {
    /// Stable identifier stored on each source row (e.g. "musicbrainz").
    fn name(&self) -> &str;

    /// Unconfigured providers are skipped and not counted as queried.
    fn is_configured(&self) -> bool {
        true
    }

    /// Quota-limited providers are only queried when the others disagree.
    fn is_expensive(&self) -> bool {
        false
    }

    /// An empty result means the provider found no matching track.
    async fn lookup(&self, query: &TrackQuery) -> Result<Vec<DurationCandidate>, ProviderError>;
}

/// Enforces a minimum interval between lookups of the wrapped provider.
pub struct RateLimitedProvider<P> {
    inner: P,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl<P: DurationProvider> RateLimitedProvider<P> {
    pub fn new(inner: P, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn per_minute(inner: P, requests_per_minute: u32) -> Self {
        let interval = Duration::from_secs(60) / requests_per_minute.max(1);
        Self::new(inner, interval)
    }

    async fn rate_limit(&self) {
        // Held across the sleep so concurrent callers queue up.
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("Rate limiting {} for {:?}", self.inner.name(), wait);
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl<P: DurationProvider> DurationProvider for RateLimitedProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }

    fn is_expensive(&self) -> bool {
        self.inner.is_expensive()
    }

    async fn lookup(&self, query: &TrackQuery) -> Result<Vec<DurationCandidate>, ProviderError> {
        self.rate_limit().await;
        self.inner.lookup(query).await
    }
}
