use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,

    // Feature configs
    pub duration_resolver: Option<DurationResolverConfig>,
    pub bulk_worker: Option<BulkWorkerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DurationResolverConfig {
    pub tolerance_secs: Option<i32>,
    pub min_agreeing_sources: Option<usize>,
    pub confidence_threshold: Option<f64>,
    pub min_match_score: Option<f64>,
    pub auto_apply_on_consensus: Option<bool>,
    pub skip_expensive_on_consensus: Option<bool>,
    pub track_timeout_secs: Option<u64>,
    pub album_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BulkWorkerConfig {
    pub track_timeout_secs: Option<u64>,
    pub progress_save_every: Option<u64>,
    pub progress_save_interval_secs: Option<u64>,
    pub inter_track_delay_ms: Option<u64>,
    pub resume_interrupted: Option<bool>,
    pub cancel_grace_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
