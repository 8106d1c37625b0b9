mod file_config;

pub use file_config::{BulkWorkerConfig, DurationResolverConfig, FileConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be overridden by the TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub resolver: DurationResolverSettings,
    pub bulk: BulkWorkerSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let defaults = DurationResolverSettings::default();
        let r = file.duration_resolver.unwrap_or_default();
        let resolver = DurationResolverSettings {
            tolerance_secs: r.tolerance_secs.unwrap_or(defaults.tolerance_secs),
            min_agreeing_sources: r
                .min_agreeing_sources
                .unwrap_or(defaults.min_agreeing_sources),
            confidence_threshold: r
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            min_match_score: r.min_match_score.unwrap_or(defaults.min_match_score),
            auto_apply_on_consensus: r
                .auto_apply_on_consensus
                .unwrap_or(defaults.auto_apply_on_consensus),
            skip_expensive_on_consensus: r
                .skip_expensive_on_consensus
                .unwrap_or(defaults.skip_expensive_on_consensus),
            track_timeout_secs: r.track_timeout_secs.unwrap_or(defaults.track_timeout_secs),
            album_timeout_secs: r.album_timeout_secs.unwrap_or(defaults.album_timeout_secs),
        };
        resolver.validate()?;

        let defaults = BulkWorkerSettings::default();
        let b = file.bulk_worker.unwrap_or_default();
        let bulk = BulkWorkerSettings {
            track_timeout_secs: b.track_timeout_secs.unwrap_or(defaults.track_timeout_secs),
            progress_save_every: b
                .progress_save_every
                .unwrap_or(defaults.progress_save_every)
                .max(1),
            progress_save_interval_secs: b
                .progress_save_interval_secs
                .unwrap_or(defaults.progress_save_interval_secs),
            inter_track_delay_ms: b
                .inter_track_delay_ms
                .unwrap_or(defaults.inter_track_delay_ms),
            resume_interrupted: b.resume_interrupted.unwrap_or(defaults.resume_interrupted),
            cancel_grace_secs: b.cancel_grace_secs.unwrap_or(defaults.cancel_grace_secs),
        };

        Ok(Self {
            db_dir,
            resolver,
            bulk,
        })
    }

    pub fn duration_db_path(&self) -> PathBuf {
        self.db_dir.join("duration.db")
    }
}

#[derive(Debug, Clone)]
pub struct DurationResolverSettings {
    /// Max distance in seconds between two agreeing votes.
    pub tolerance_secs: i32,
    pub min_agreeing_sources: usize,
    pub confidence_threshold: f64,
    /// Results below this match score are recorded but never vote.
    pub min_match_score: f64,
    pub auto_apply_on_consensus: bool,
    pub skip_expensive_on_consensus: bool,
    pub track_timeout_secs: u64,
    pub album_timeout_secs: u64,
}

impl Default for DurationResolverSettings {
    fn default() -> Self {
        Self {
            tolerance_secs: 3,
            min_agreeing_sources: 2,
            confidence_threshold: 0.5,
            min_match_score: 0.6,
            auto_apply_on_consensus: true,
            skip_expensive_on_consensus: true,
            track_timeout_secs: 60,
            album_timeout_secs: 300, // 5 minutes
        }
    }
}

impl DurationResolverSettings {
    pub fn validate(&self) -> Result<()> {
        if self.min_agreeing_sources < 2 {
            bail!(
                "min_agreeing_sources must be at least 2, got {}",
                self.min_agreeing_sources
            );
        }
        if self.tolerance_secs < 0 {
            bail!("tolerance_secs must not be negative, got {}", self.tolerance_secs);
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence_threshold must be within 0.0-1.0, got {}",
                self.confidence_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.min_match_score) {
            bail!(
                "min_match_score must be within 0.0-1.0, got {}",
                self.min_match_score
            );
        }
        Ok(())
    }

    pub fn track_timeout(&self) -> Duration {
        Duration::from_secs(self.track_timeout_secs)
    }

    pub fn album_timeout(&self) -> Duration {
        Duration::from_secs(self.album_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct BulkWorkerSettings {
    pub track_timeout_secs: u64,
    /// Persist a snapshot after this many processed tracks.
    pub progress_save_every: u64,
    /// Or when this much time passed since the last snapshot.
    pub progress_save_interval_secs: u64,
    pub inter_track_delay_ms: u64,
    pub resume_interrupted: bool,
    /// How long cancel waits for the worker before aborting it.
    pub cancel_grace_secs: u64,
}

impl Default for BulkWorkerSettings {
    fn default() -> Self {
        Self {
            track_timeout_secs: 30,
            progress_save_every: 10,
            progress_save_interval_secs: 30,
            inter_track_delay_ms: 100,
            resume_interrupted: true,
            cancel_grace_secs: 10,
        }
    }
}

impl BulkWorkerSettings {
    pub fn track_timeout(&self) -> Duration {
        Duration::from_secs(self.track_timeout_secs)
    }

    pub fn progress_save_interval(&self) -> Duration {
        Duration::from_secs(self.progress_save_interval_secs)
    }

    pub fn inter_track_delay(&self) -> Duration {
        Duration::from_millis(self.inter_track_delay_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}
