//! # Pipeline Configuration
//!
//! Configuration structures and validation for the smart-crop pipeline. The
//! same structure backs the library API, the CLI and JSON config files.
//!
//! ## Sections
//!
//! | Section | Controls |
//! |---------|----------|
//! | `limits` | Axis and area ceilings for every planned surface |
//! | `pool` | Idle eviction timing of super-resolution model handles |
//! | `governor` | GPU memory threshold, poll interval, failure latch |
//! | `cascade` | Inference timeout, tiling threshold, sharpening guard |
//! | `detector` | Confidence floor and edge-density threshold |
//!
//! ## JSON Files
//!
//! Every field has a default, so a config file only needs the values it
//! overrides:
//!
//! ```json
//! { "governor": { "memory_threshold_mb": 512 }, "cascade": { "tile_size": 512 } }
//! ```
//!
//! ## Examples
//!
//! ```rust
//! use smart_crop::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json_str(r#"{ "pool": { "idle_timeout_ms": 1000 } }"#).unwrap();
//! assert_eq!(config.pool.idle_timeout_ms, 1000);
//! assert_eq!(config.governor.failure_threshold, 3);
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;
use std::time::Duration;

use crop_scale::presets::Limits;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Size ceilings applied by the dimension planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_texture_size: u32,
    pub max_safe_dimension: u32,
    pub max_total_pixels: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            max_texture_size: limits.max_texture_size,
            max_safe_dimension: limits.max_safe_dimension,
            max_total_pixels: limits.max_total_pixels,
        }
    }
}

impl LimitsConfig {
    pub fn to_limits(&self) -> Limits {
        Limits {
            max_texture_size: self.max_texture_size,
            max_safe_dimension: self.max_safe_dimension,
            max_total_pixels: self.max_total_pixels,
        }
    }
}

/// Model pool eviction timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Delay between a handle's usage count reaching zero and its eviction check.
    pub eviction_delay_ms: u64,
    /// Minimum idle time before an unused handle may be disposed.
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            eviction_delay_ms: 30_000,
            idle_timeout_ms: 30_000,
        }
    }
}

impl PoolConfig {
    pub fn eviction_delay(&self) -> Duration {
        Duration::from_millis(self.eviction_delay_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// GPU memory governor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Safe cleanup triggers above this many MB in use.
    pub memory_threshold_mb: u64,
    pub poll_interval_ms: u64,
    /// Consecutive AI failures that latch the AI path off.
    pub failure_threshold: u32,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            memory_threshold_mb: 1024,
            poll_interval_ms: 5_000,
            failure_threshold: 3,
        }
    }
}

impl GovernorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Upscale cascade settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub inference_timeout_ms: u64,
    /// Above this many target pixels only the tiled fallback is used.
    pub tiling_threshold_pixels: u64,
    pub tile_size: u32,
    /// Sharpening is skipped for single-pass fallbacks larger than this.
    pub sharpen_max_pixels: u64,
    /// Timed-out inferences still winding down; above this the model stage is skipped.
    pub max_orphaned_inferences: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            inference_timeout_ms: 30_000,
            tiling_threshold_pixels: 16_777_216, // 4096 * 4096
            tile_size: 1024,
            sharpen_max_pixels: 16_777_216,
            max_orphaned_inferences: 2,
        }
    }
}

impl CascadeConfig {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }
}

/// Subject detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_confidence: f32,
    /// Luminance step that counts as an edge in the focal-point heuristic.
    pub edge_threshold: f32,
    /// Classes never chosen as the photographic subject.
    pub denylist: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            edge_threshold: 30.0,
            denylist: ["book", "cell phone", "phone", "remote", "keyboard", "mouse"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub limits: LimitsConfig,
    pub pool: PoolConfig,
    pub governor: GovernorConfig,
    pub cascade: CascadeConfig,
    pub detector: DetectorConfig,
}

impl PipelineConfig {
    /// Parse a (possibly partial) JSON document.
    pub fn from_json_str(json: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::io("read config", e).with_path(path.display().to_string())
        })?;
        let config = Self::from_json_str(&text)?;
        config
            .validate()
            .map_err(|reason| PipelineError::config(path.display().to_string(), "<file>", reason))?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        let l = &self.limits;
        if l.max_texture_size == 0 || l.max_safe_dimension == 0 {
            return Err("Axis ceilings must be greater than 0".to_string());
        }
        if l.max_total_pixels == 0 {
            return Err("max_total_pixels must be greater than 0".to_string());
        }
        if self.governor.failure_threshold == 0 {
            return Err("failure_threshold must be at least 1".to_string());
        }
        if self.governor.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }
        if self.cascade.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.cascade.inference_timeout_ms == 0 {
            return Err("inference_timeout_ms must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err("min_confidence must be between 0 and 1".to_string());
        }
        if self.detector.edge_threshold < 0.0 {
            return Err("edge_threshold must not be negative".to_string());
        }
        Ok(())
    }
}
