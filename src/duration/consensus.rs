//! Agreement policy over provider votes.
//!
//! Votes are clustered with windows anchored at each vote: a cluster starting
//! at duration `d` holds every vote in `[d, d + tolerance]`. Every pair inside
//! a cluster is therefore within tolerance, and any two votes within tolerance
//! share at least one cluster. The winning cluster has the highest summed
//! confidence, then the most independent sources, then the smallest spread,
//! then the lowest duration.

use crate::config::DurationResolverSettings;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// One provider's best usable answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vote {
    pub source_name: String,
    pub duration: i32,
    pub confidence: f64,
}

impl Vote {
    pub fn new(source_name: &str, duration: i32, confidence: f64) -> Self {
        Self {
            source_name: source_name.to_string(),
            duration,
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    /// One vote per source, the most confident one.
    pub members: Vec<Vote>,
    pub total_confidence: f64,
    pub min_duration: i32,
    pub max_duration: i32,
}

impl Cluster {
    fn from_window(window: &[Vote]) -> Self {
        let mut by_source: HashMap<&str, &Vote> = HashMap::new();
        for vote in window {
            let entry = by_source.entry(vote.source_name.as_str()).or_insert(vote);
            if vote.confidence > entry.confidence {
                *entry = vote;
            }
        }
        let mut members: Vec<Vote> = by_source.into_values().cloned().collect();
        members.sort_by(|a, b| a.duration.cmp(&b.duration).then(a.source_name.cmp(&b.source_name)));

        let total_confidence = members.iter().map(|v| v.confidence).sum();
        let min_duration = members.iter().map(|v| v.duration).min().unwrap_or(0);
        let max_duration = members.iter().map(|v| v.duration).max().unwrap_or(0);
        Self {
            members,
            total_confidence,
            min_duration,
            max_duration,
        }
    }

    pub fn independent_sources(&self) -> usize {
        self.members.len()
    }

    pub fn spread(&self) -> i32 {
        self.max_duration - self.min_duration
    }

    pub fn average_confidence(&self) -> f64 {
        if self.members.is_empty() {
            0.0
        } else {
            self.total_confidence / self.members.len() as f64
        }
    }

    /// Confidence-weighted mean, rounded to the nearest second.
    pub fn duration(&self) -> i32 {
        if self.members.is_empty() {
            return 0;
        }
        let weighted: f64 = if self.total_confidence > 0.0 {
            self.members
                .iter()
                .map(|v| v.duration as f64 * v.confidence)
                .sum::<f64>()
                / self.total_confidence
        } else {
            self.members.iter().map(|v| v.duration as f64).sum::<f64>() / self.members.len() as f64
        };
        (weighted.round() as i32).clamp(self.min_duration, self.max_duration)
    }

    fn rank(&self, other: &Cluster) -> Ordering {
        self.total_confidence
            .total_cmp(&other.total_confidence)
            .then(self.independent_sources().cmp(&other.independent_sources()))
            .then(other.spread().cmp(&self.spread()))
            .then(other.min_duration.cmp(&self.min_duration))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    /// Enough confident sources agree.
    Resolved { duration: i32, consensus_count: i32 },
    /// Some usable answers, but not enough agreement.
    NeedsReview {
        suggested_duration: i32,
        consensus_count: i32,
    },
    /// No usable answer.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusPolicy {
    pub tolerance_secs: i32,
    pub min_agreeing_sources: usize,
    /// Average cluster confidence must be strictly greater than this.
    pub confidence_threshold: f64,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self::from(&DurationResolverSettings::default())
    }
}

impl From<&DurationResolverSettings> for ConsensusPolicy {
    fn from(settings: &DurationResolverSettings) -> Self {
        Self {
            tolerance_secs: settings.tolerance_secs,
            min_agreeing_sources: settings.min_agreeing_sources,
            confidence_threshold: settings.confidence_threshold,
        }
    }
}

impl ConsensusPolicy {
    pub fn best_cluster(&self, votes: &[Vote]) -> Option<Cluster> {
        let mut sorted: Vec<Vote> = votes.iter().filter(|v| v.duration > 0).cloned().collect();
        sorted.sort_by(|a, b| a.duration.cmp(&b.duration).then(a.source_name.cmp(&b.source_name)));

        let mut best: Option<Cluster> = None;
        for (start, anchor) in sorted.iter().enumerate() {
            let end = sorted[start..]
                .iter()
                .take_while(|v| v.duration - anchor.duration <= self.tolerance_secs)
                .count();
            let candidate = Cluster::from_window(&sorted[start..start + end]);
            best = match best {
                Some(current) if current.rank(&candidate) != Ordering::Less => Some(current),
                _ => Some(candidate),
            };
        }
        best
    }

    fn is_accepted(&self, cluster: &Cluster) -> bool {
        cluster.independent_sources() >= self.min_agreeing_sources
            && cluster.average_confidence() > self.confidence_threshold
    }

    /// True once the votes already satisfy the resolve rule.
    pub fn has_consensus(&self, votes: &[Vote]) -> bool {
        self.best_cluster(votes)
            .map(|cluster| self.is_accepted(&cluster))
            .unwrap_or(false)
    }

    pub fn decide(&self, votes: &[Vote]) -> Decision {
        let Some(cluster) = self.best_cluster(votes) else {
            return Decision::Failed;
        };
        let consensus_count = cluster.independent_sources() as i32;
        if self.is_accepted(&cluster) {
            Decision::Resolved {
                duration: cluster.duration(),
                consensus_count,
            }
        } else {
            Decision::NeedsReview {
                suggested_duration: cluster.duration(),
                consensus_count,
            }
        }
    }
}
