use super::consensus::{ConsensusPolicy, Decision, Vote};
use super::error::DurationError;
use super::provider::{DurationCandidate, DurationProvider, TrackQuery};
use crate::config::DurationResolverSettings;
use crate::duration_store::{
    DurationResolution, DurationSource, DurationStore, NewDurationSource, ResolutionAttempt,
    ResolutionStatus, Track,
};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(super) const NO_MATCH_MESSAGE: &str = "No matching track found";
const TIMEOUT_MESSAGE: &str = "lookup timed out";

/// Deadline and cancellation for one resolve call.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl ResolveContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Instant::now() + timeout, CancellationToken::new())
    }

    /// Narrower deadline, cancelled together with this context.
    pub fn child(&self, timeout: Duration) -> Self {
        Self::new(
            self.deadline.min(Instant::now() + timeout),
            self.cancel.child_token(),
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// What one provider contributed to an attempt.
struct ProviderOutcome {
    source: NewDurationSource,
    vote: Option<Vote>,
    succeeded: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AlbumResolutionSummary {
    pub album_id: i64,
    pub total_tracks: usize,
    pub resolved: usize,
    pub needs_review: usize,
    pub failed: usize,
    pub skipped: usize,
    pub resolutions: Vec<DurationResolution>,
}

/// Resolves track durations by querying every provider and applying the
/// consensus policy. Review operations live in `review.rs`.
pub struct DurationResolverService {
    pub(super) store: Arc<dyn DurationStore>,
    providers: Vec<Arc<dyn DurationProvider>>,
    pub(super) settings: DurationResolverSettings,
    pub(super) policy: ConsensusPolicy,
}

impl DurationResolverService {
    pub fn new(
        store: Arc<dyn DurationStore>,
        providers: Vec<Arc<dyn DurationProvider>>,
        settings: DurationResolverSettings,
    ) -> Self {
        let policy = ConsensusPolicy::from(&settings);
        Self {
            store,
            providers,
            settings,
            policy,
        }
    }

    pub fn settings(&self) -> &DurationResolverSettings {
        &self.settings
    }

    pub fn tracks_needing_resolution(&self) -> Result<Vec<Track>, DurationError> {
        Ok(self.store.list_tracks_needing_duration()?)
    }

    pub fn tracks_needing_resolution_for_album(&self, album_id: i64) -> Result<Vec<Track>, DurationError> {
        if self.store.get_album(album_id)?.is_none() {
            return Err(DurationError::not_found("Album", album_id));
        }
        Ok(self.store.list_album_tracks_needing_duration(album_id)?)
    }

    /// Active resolution of the track with all its sources.
    pub fn resolution_for_track(
        &self,
        track_id: i64,
    ) -> Result<Option<(DurationResolution, Vec<DurationSource>)>, DurationError> {
        if self.store.get_track(track_id)?.is_none() {
            return Err(DurationError::not_found("Track", track_id));
        }
        match self.store.get_active_resolution_for_track(track_id)? {
            Some(resolution) => {
                let sources = self.store.get_sources(resolution.id)?;
                Ok(Some((resolution, sources)))
            }
            None => Ok(None),
        }
    }

    pub async fn resolve_track_by_id(
        &self,
        track_id: i64,
        force: bool,
    ) -> Result<DurationResolution, DurationError> {
        let track = self
            .store
            .get_track(track_id)?
            .ok_or_else(|| DurationError::not_found("Track", track_id))?;
        let ctx = ResolveContext::with_timeout(self.settings.track_timeout());
        self.resolve_track(&track, force, &ctx).await
    }

    /// Queries the providers for one track and persists the outcome.
    ///
    /// Without `force`, a track with a resolved or approved resolution gets
    /// that resolution back untouched, and a track that already has a
    /// duration is refused with `AlreadyHasDuration`. Cancellation returns
    /// `Cancelled` and persists nothing.
    pub async fn resolve_track(
        &self,
        track: &Track,
        force: bool,
        ctx: &ResolveContext,
    ) -> Result<DurationResolution, DurationError> {
        if ctx.is_cancelled() {
            return Err(DurationError::Cancelled);
        }

        if !force {
            if let Some(existing) = self.store.get_active_resolution_for_track(track.id)? {
                if existing.status.is_successful() {
                    debug!(
                        "Track {} already has a {} resolution",
                        track.id,
                        existing.status.as_str()
                    );
                    return Ok(existing);
                }
                debug!(
                    "Retrying resolution for track {} (previous status: {})",
                    track.id,
                    existing.status.as_str()
                );
            }
            if track.has_duration() {
                return Err(DurationError::AlreadyHasDuration(track.id));
            }
        }

        let album = self.store.get_album(track.album_id)?;
        let query = TrackQuery {
            title: track.title.clone(),
            artist: album.as_ref().map(|a| a.artist.clone()).unwrap_or_default(),
            album: album.as_ref().map(|a| a.title.clone()).unwrap_or_default(),
        };
        debug!(
            "Resolving track {}: title='{}', album='{}', artist='{}'",
            track.id, query.title, query.album, query.artist
        );

        let outcomes = self.query_providers(&query, ctx).await?;

        // Late results after a cancel are discarded
        if ctx.is_cancelled() {
            return Err(DurationError::Cancelled);
        }

        let votes: Vec<Vote> = outcomes.iter().filter_map(|o| o.vote.clone()).collect();
        let successful_queries = outcomes.iter().filter(|o| o.succeeded).count() as i32;
        let sources_queried = outcomes.len() as i32;

        let (status, resolved_duration, consensus_count) = match self.policy.decide(&votes) {
            Decision::Resolved {
                duration,
                consensus_count,
            } => (ResolutionStatus::Resolved, Some(duration), consensus_count),
            Decision::NeedsReview {
                consensus_count, ..
            } => (ResolutionStatus::NeedsReview, None, consensus_count),
            Decision::Failed => (ResolutionStatus::Failed, None, 0),
        };

        let attempt = ResolutionAttempt {
            track_id: track.id,
            album_id: track.album_id,
            status,
            original_duration: track.duration,
            resolved_duration,
            consensus_count,
            sources_queried,
            successful_queries,
            apply_to_track: status == ResolutionStatus::Resolved
                && self.settings.auto_apply_on_consensus,
            sources: outcomes.into_iter().map(|o| o.source).collect(),
        };
        let resolution = self.store.save_resolution_attempt(&attempt)?;

        info!(
            "Track {} '{}': {} ({} of {} sources agree{})",
            track.id,
            track.title,
            resolution.status.as_str(),
            consensus_count,
            sources_queried,
            match resolution.resolved_duration {
                Some(d) if resolution.auto_applied => format!(", applied {}s", d),
                Some(d) => format!(", {}s", d),
                None => String::new(),
            }
        );
        Ok(resolution)
    }

    /// Resolves every track of the album that still needs a duration, under
    /// one overall album deadline.
    pub async fn resolve_album(&self, album_id: i64) -> Result<AlbumResolutionSummary, DurationError> {
        let tracks = self.tracks_needing_resolution_for_album(album_id)?;
        let ctx = ResolveContext::with_timeout(self.settings.album_timeout());
        info!(
            "Resolving {} tracks of album {}",
            tracks.len(),
            album_id
        );

        let mut summary = AlbumResolutionSummary {
            album_id,
            total_tracks: tracks.len(),
            ..Default::default()
        };

        for (index, track) in tracks.iter().enumerate() {
            if ctx.is_expired() {
                let remaining = tracks.len() - index;
                warn!(
                    "Album {} resolution timed out with {} tracks left",
                    album_id, remaining
                );
                summary.failed += remaining;
                break;
            }

            let track_ctx = ctx.child(self.settings.track_timeout());
            match self.resolve_track(track, false, &track_ctx).await {
                Ok(resolution) => {
                    match resolution.status {
                        ResolutionStatus::Resolved | ResolutionStatus::Approved => {
                            summary.resolved += 1
                        }
                        ResolutionStatus::NeedsReview => summary.needs_review += 1,
                        _ => summary.failed += 1,
                    }
                    summary.resolutions.push(resolution);
                }
                Err(DurationError::AlreadyHasDuration(_)) => summary.skipped += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Failed to resolve track {}: {}", track.id, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn query_providers(
        &self,
        query: &TrackQuery,
        ctx: &ResolveContext,
    ) -> Result<Vec<ProviderOutcome>, DurationError> {
        let (expensive, cheap): (Vec<&dyn DurationProvider>, Vec<&dyn DurationProvider>) = self
            .providers
            .iter()
            .map(|p| &**p)
            .filter(|p| p.is_configured())
            .partition(|p| p.is_expensive());

        let mut outcomes = Vec::with_capacity(cheap.len() + expensive.len());
        for outcome in join_all(cheap.iter().map(|p| self.query_provider(*p, query, ctx))).await {
            outcomes.push(outcome?);
        }

        for provider in expensive {
            if self.settings.skip_expensive_on_consensus {
                let votes: Vec<Vote> = outcomes.iter().filter_map(|o| o.vote.clone()).collect();
                if self.policy.has_consensus(&votes) {
                    info!(
                        "Skipping {} - consensus already reached with {} sources",
                        provider.name(),
                        votes.len()
                    );
                    continue;
                }
            }
            outcomes.push(self.query_provider(provider, query, ctx).await?);
        }

        Ok(outcomes)
    }

    async fn query_provider(
        &self,
        provider: &dyn DurationProvider,
        query: &TrackQuery,
        ctx: &ResolveContext,
    ) -> Result<ProviderOutcome, DurationError> {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(DurationError::Cancelled),
            result = tokio::time::timeout_at(ctx.deadline, provider.lookup(query)) => result,
        };
        let elapsed_ms = started.elapsed().as_millis() as i64;
        let name = provider.name();

        let outcome = match result {
            Err(_) => {
                warn!("{} lookup timed out after {}ms", name, elapsed_ms);
                ProviderOutcome {
                    source: NewDurationSource::failed(name, TIMEOUT_MESSAGE, elapsed_ms),
                    vote: None,
                    succeeded: false,
                }
            }
            Ok(Err(e)) => {
                warn!("{} lookup failed: {}", name, e);
                ProviderOutcome {
                    source: NewDurationSource::failed(name, e.to_string(), elapsed_ms),
                    vote: None,
                    succeeded: false,
                }
            }
            Ok(Ok(candidates)) => match best_candidate(candidates) {
                None => ProviderOutcome {
                    source: NewDurationSource::failed(name, NO_MATCH_MESSAGE, elapsed_ms),
                    vote: None,
                    succeeded: true,
                },
                Some(candidate) => {
                    let usable = candidate.duration_secs > 0
                        && candidate.match_score >= self.settings.min_match_score;
                    ProviderOutcome {
                        vote: usable.then(|| {
                            Vote::new(name, candidate.duration_secs, candidate.confidence)
                        }),
                        source: NewDurationSource {
                            source_name: name.to_string(),
                            duration_value: candidate.duration_secs,
                            match_score: candidate.match_score,
                            confidence: candidate.confidence,
                            external_id: candidate.external_id,
                            external_url: candidate.external_url,
                            error_message: String::new(),
                            query_duration_ms: elapsed_ms,
                        },
                        succeeded: true,
                    }
                }
            },
        };
        Ok(outcome)
    }
}

/// Highest match score wins, then confidence.
fn best_candidate(candidates: Vec<DurationCandidate>) -> Option<DurationCandidate> {
    candidates.into_iter().max_by(|a, b| {
        a.match_score
            .total_cmp(&b.match_score)
            .then(a.confidence.total_cmp(&b.confidence))
    })
}
