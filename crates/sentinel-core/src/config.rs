//! Scoring configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Accelerator preference for the model runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Use an accelerator when one has enough free memory, else CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" | "mps" => Ok(Self::Metal),
            other => Err(Error::config(format!("unknown device '{}'", other))),
        }
    }
}

/// Configuration for the scoring pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Directory holding config.json, weights and tokenizer files
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    /// Accelerator preference
    #[serde(default)]
    pub device: DevicePreference,

    /// Window size cap in content tokens (special tokens excluded)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Fraction of `max_tokens` shared between adjacent windows
    #[serde(default = "default_overlap")]
    pub overlap: f32,

    /// Free accelerator memory below which the runtime falls back to CPU
    #[serde(default = "default_min_gpu_memory")]
    pub min_gpu_memory_bytes: u64,

    /// Starting batch size
    #[serde(default = "default_batch_size_initial")]
    pub batch_size_initial: usize,

    /// Smallest batch size the policy shrinks to
    #[serde(default = "default_batch_size_min")]
    pub batch_size_min: usize,

    /// Largest batch size the policy grows to
    #[serde(default = "default_batch_size_max")]
    pub batch_size_max: usize,

    /// Release the runtime after this many idle seconds (0 disables)
    #[serde(default = "default_idle_unload")]
    pub idle_unload_seconds: u64,

    /// Optional wall-clock budget per run
    #[serde(default)]
    pub time_budget_seconds: Option<u64>,

    /// Logit temperature applied before softmax
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Paragraphs shorter than this are left out of the document aggregate
    #[serde(default)]
    pub min_paragraph_tokens: usize,

    /// Treat every line break in plain text as a paragraph boundary
    #[serde(default = "default_true")]
    pub single_newline_breaks: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            device: DevicePreference::Auto,
            max_tokens: default_max_tokens(),
            overlap: default_overlap(),
            min_gpu_memory_bytes: default_min_gpu_memory(),
            batch_size_initial: default_batch_size_initial(),
            batch_size_min: default_batch_size_min(),
            batch_size_max: default_batch_size_max(),
            idle_unload_seconds: default_idle_unload(),
            time_budget_seconds: None,
            temperature: default_temperature(),
            min_paragraph_tokens: 0,
            single_newline_breaks: true,
        }
    }
}

impl ScoringConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "Read scoring configuration");
        Self::from_yaml(&content)
    }

    /// Reject inconsistent settings before any resource is touched
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::config("max_tokens must be greater than zero"));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(Error::config(format!(
                "overlap must be in [0, 1), got {}",
                self.overlap
            )));
        }
        if self.batch_size_min == 0 {
            return Err(Error::config("batch_size_min must be at least 1"));
        }
        if self.batch_size_min > self.batch_size_max {
            return Err(Error::config(format!(
                "batch_size_min ({}) exceeds batch_size_max ({})",
                self.batch_size_min, self.batch_size_max
            )));
        }
        if !(self.batch_size_min..=self.batch_size_max).contains(&self.batch_size_initial) {
            return Err(Error::config(format!(
                "batch_size_initial ({}) must lie within [{}, {}]",
                self.batch_size_initial, self.batch_size_min, self.batch_size_max
            )));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(Error::config(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// Idle period after which the runtime is released
    pub fn idle_unload(&self) -> Option<Duration> {
        (self.idle_unload_seconds > 0).then(|| Duration::from_secs(self.idle_unload_seconds))
    }

    /// Per-run wall-clock budget
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_seconds.map(Duration::from_secs)
    }
}

fn default_max_tokens() -> usize {
    510
}

fn default_overlap() -> f32 {
    0.125
}

fn default_min_gpu_memory() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_batch_size_initial() -> usize {
    8
}

fn default_batch_size_min() -> usize {
    1
}

fn default_batch_size_max() -> usize {
    32
}

fn default_idle_unload() -> u64 {
    300
}

fn default_temperature() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}
