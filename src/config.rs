//! Model configuration.
//!
//! A [`ModelConfig`] is created once per model and never changes afterwards.
//! It can be built in code with the `with_*` setters or deserialised from
//! JSON; missing fields take their defaults.

use crate::device::Device;
use crate::error::{MlError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serialized model artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
  /// Try the graph format first, then the layered format.
  #[default]
  Auto,
  /// Frozen computation graph.
  Graph,
  /// Layered/declarative model.
  Layers,
}

/// Configuration for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
  /// Artifact location, resolved by the backend's loader.
  pub model_path: String,
  /// Artifact format.
  pub format: ModelFormat,
  /// Requested compute device.
  pub device: Device,
  /// Worker threads for CPU kernels.
  pub num_threads: usize,
  /// Ask the backend for quantized kernels where it has them.
  pub enable_quantization: bool,
  /// Let the backend keep the parsed artifact cached.
  pub cache_model: bool,
  /// Dummy inferences run after loading.
  pub warmup_runs: usize,
}

impl Default for ModelConfig {
  fn default() -> Self {
    Self {
      model_path: String::new(),
      format: ModelFormat::Auto,
      device: Device::Auto,
      num_threads: default_threads(),
      enable_quantization: false,
      cache_model: true,
      warmup_runs: 1,
    }
  }
}

fn default_threads() -> usize {
  std::thread::available_parallelism()
    .map(|n| n.get())
    .unwrap_or(1)
}

impl ModelConfig {
  /// Default configuration for the artifact at `model_path`.
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      ..Self::default()
    }
  }

  /// Sets the artifact format.
  pub fn with_format(mut self, format: ModelFormat) -> Self {
    self.format = format;
    self
  }

  /// Sets the requested device.
  pub fn with_device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  /// Sets the CPU thread count.
  pub fn with_num_threads(mut self, num_threads: usize) -> Self {
    self.num_threads = num_threads;
    self
  }

  /// Enables or disables quantized kernels.
  pub fn with_quantization(mut self, enabled: bool) -> Self {
    self.enable_quantization = enabled;
    self
  }

  /// Enables or disables artifact caching.
  pub fn with_cache_model(mut self, cache: bool) -> Self {
    self.cache_model = cache;
    self
  }

  /// Sets the number of warm-up inferences.
  pub fn with_warmup_runs(mut self, runs: usize) -> Self {
    self.warmup_runs = runs;
    self
  }

  /// Checks the fields that have no meaningful default.
  pub fn validate(&self) -> Result<()> {
    if self.model_path.trim().is_empty() {
      return Err(MlError::config("model_path must not be empty"));
    }
    if self.num_threads == 0 {
      return Err(MlError::config("num_threads must be at least 1"));
    }
    Ok(())
  }

  /// Parses a JSON document; absent fields take their defaults.
  pub fn from_json_str(json: &str) -> Result<Self> {
    let config: Self = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads and parses a JSON file.
  pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
    let text = tokio::fs::read_to_string(path).await?;
    Self::from_json_str(&text)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = ModelConfig::new("models/detector.json");
    assert_eq!(config.device, Device::Auto);
    assert_eq!(config.warmup_runs, 1);
    assert!(config.num_threads >= 1);
    assert!(config.cache_model);
    assert!(!config.enable_quantization);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_from_json_fills_defaults() {
    let config =
      ModelConfig::from_json_str(r#"{"model_path": "hand.json", "device": "cpu"}"#).unwrap();
    assert_eq!(config.model_path, "hand.json");
    assert_eq!(config.device, Device::Cpu);
    assert_eq!(config.format, ModelFormat::Auto);
    assert_eq!(config.warmup_runs, 1);
  }

  #[test]
  fn test_validate_rejects_empty_path() {
    let err = ModelConfig::from_json_str("{}").unwrap_err();
    assert!(matches!(err, MlError::Config(_)));
  }

  #[test]
  fn test_validate_rejects_zero_threads() {
    let config = ModelConfig::new("m.json").with_num_threads(0);
    assert!(config.validate().is_err());
  }

  #[tokio::test]
  async fn test_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    tokio::fs::write(&path, r#"{"model_path": "pose.json", "warmup_runs": 3}"#)
      .await
      .unwrap();
    let config = ModelConfig::from_json_file(&path).await.unwrap();
    assert_eq!(config.warmup_runs, 3);
  }
}
