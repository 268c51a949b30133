//! Configuration loading for pipeline services
//!
//! Resolution follows CLI argument → environment variable → TOML config file
//! → compiled default. The CLI/env tier covers deployment paths (database,
//! scratch, bucket); stage tunables live in the TOML sections.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Full pipeline configuration shared by both stage services
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// SQLite database file (queue tables + status ledger)
    pub db_path: PathBuf,
    /// Local scratch space for in-flight downloads and decode output
    pub scratch_root: PathBuf,
    /// Root directory of the object store (bucket mount point)
    pub bucket_root: PathBuf,
    pub queue: QueueSettings,
    pub segmentation: SegmentationSettings,
    pub inference: InferenceSettings,
    pub http: HttpSettings,
}

/// Queue names and delivery tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Queue carrying `VideoReadyMessage` events
    pub video_ready: String,
    /// Queue carrying `AudioReadyMessage` events
    pub audio_ready: String,
    /// Idle poll interval for continuous consumers (milliseconds)
    pub poll_interval_ms: u64,
    /// In-flight messages older than this are returned to ready (seconds)
    pub visibility_timeout_s: u64,
    /// Delay before a requeued message becomes visible again (milliseconds)
    pub redelivery_delay_ms: u64,
    /// Fixed backoff after a storage error in the consumer loop (seconds)
    pub reconnect_backoff_s: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            video_ready: "video_ready".to_string(),
            audio_ready: "audio_ready".to_string(),
            poll_interval_ms: 500,
            visibility_timeout_s: 300,
            redelivery_delay_ms: 5_000,
            reconnect_backoff_s: 5,
        }
    }
}

/// Silence-detection policy for the segmentation stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// RMS level below which a window counts as silence (negative dBFS)
    pub silence_threshold_db: f32,
    /// Minimum silence gap that separates two spans (seconds)
    pub min_silence_s: f32,
    /// Spans shorter than this are discarded (seconds)
    pub min_segment_s: f32,
    /// Bucket prefix under which extracted audio is uploaded
    pub audio_root: String,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            silence_threshold_db: -40.0,
            min_silence_s: 2.0,
            min_segment_s: 10.0,
            audio_root: "extracted_audio".to_string(),
        }
    }
}

/// Scoring policy selector, see `inference.reading_fraction`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictPolicyKind {
    /// Any segment resolved as Reading flags the interview
    AnyReading,
    /// More than `reading_fraction` of segments resolved as Reading flags it
    ReadingFraction,
}

/// Inference-stage tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// Interview segments embedded per model pass (bounds peak memory)
    pub embed_batch_size: usize,
    /// Fewer numbered segments than this is a validation failure
    pub min_expected_segments: usize,
    pub verdict_policy: VerdictPolicyKind,
    /// Threshold for `ReadingFraction`; fraction of segments, exclusive
    pub reading_fraction: f64,
    /// Delete the extracted-audio prefix after a stored result
    pub delete_extracted_on_complete: bool,
    /// Total retry budget for bucket transfers (milliseconds)
    pub max_transfer_wait_ms: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            embed_batch_size: 3,
            min_expected_segments: 1,
            verdict_policy: VerdictPolicyKind::ReadingFraction,
            reading_fraction: crate::DEFAULT_READING_FRACTION,
            delete_extracted_on_complete: false,
            max_transfer_wait_ms: 10_000,
        }
    }
}

/// Listen ports for the per-service health/status servers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub sg_port: u16,
    pub mi_port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            sg_port: 5731,
            mi_port: 5732,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let root = default_data_root();
        Self {
            db_path: root.join("proctor.db"),
            scratch_root: root.join("scratch"),
            bucket_root: root.join("bucket"),
            queue: QueueSettings::default(),
            segmentation: SegmentationSettings::default(),
            inference: InferenceSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration.
    ///
    /// An explicitly passed path must exist and parse. Otherwise the default
    /// locations are tried in order (`./proctor.toml`, then the user config
    /// directory); if none exists, compiled defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for candidate in default_config_paths() {
            if candidate.exists() {
                return Self::from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {} failed: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("parse {} failed: {}", path.display(), e)))?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.segmentation.silence_threshold_db >= 0.0 {
            return Err(Error::Config(
                "segmentation.silence_threshold_db must be negative dBFS".to_string(),
            ));
        }
        if self.inference.embed_batch_size == 0 {
            return Err(Error::Config(
                "inference.embed_batch_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.inference.reading_fraction) {
            return Err(Error::Config(
                "inference.reading_fraction must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Candidate config file locations, highest priority first
fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("proctor.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("proctor").join("config.toml"));
    }
    paths
}

/// OS-dependent default data root
fn default_data_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("proctor"))
        .unwrap_or_else(|| PathBuf::from("./proctor_data"))
}
