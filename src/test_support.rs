//! Test doubles shared by the unit test suites.

use crate::backend::{InferenceBackend, ModelMetadata, TensorSpec};
use crate::config::ModelConfig;
use crate::device::Device;
use crate::error::{MlError, Result};
use crate::model::Model;
use crate::tasks::{ModelTask, TensorTask};
use crate::tensor::{NamedTensors, Tensor};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Call counters observed by tests.
#[derive(Debug, Default)]
pub(crate) struct MockStats {
  pub loads: AtomicUsize,
  pub infers: AtomicUsize,
  pub disposes: AtomicUsize,
  pub fail_load: AtomicBool,
  pub fail_infer: AtomicBool,
}

impl MockStats {
  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }

  pub fn infers(&self) -> usize {
    self.infers.load(Ordering::SeqCst)
  }

  pub fn disposes(&self) -> usize {
    self.disposes.load(Ordering::SeqCst)
  }
}

/// A backend that echoes its inputs, or returns a fixed output map.
pub(crate) struct MockBackend {
  stats: Arc<MockStats>,
  metadata: ModelMetadata,
  output: Option<NamedTensors>,
  load_delay: Duration,
  loaded: bool,
}

impl MockBackend {
  pub fn new(stats: Arc<MockStats>) -> Self {
    Self {
      stats,
      metadata: ModelMetadata {
        name: "mock".to_string(),
        version: "1".to_string(),
        inputs: vec![TensorSpec::new("input", vec![None, Some(2)])],
        outputs: vec![TensorSpec::new("output", vec![None, Some(2)])],
        labels: None,
        device: Some(Device::Cpu),
      },
      output: None,
      load_delay: Duration::ZERO,
      loaded: false,
    }
  }

  pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
    self.metadata = metadata;
    self
  }

  /// Always answers `infer` with `tensor` under `name`.
  pub fn with_output(mut self, name: &str, tensor: Tensor) -> Self {
    let mut outputs = NamedTensors::new();
    outputs.insert(name.to_string(), tensor);
    self.output = Some(outputs);
    self
  }

  pub fn with_load_delay(mut self, delay: Duration) -> Self {
    self.load_delay = delay;
    self
  }
}

#[async_trait]
impl InferenceBackend for MockBackend {
  fn name(&self) -> &str {
    "mock"
  }

  async fn load(&mut self, _config: &ModelConfig) -> Result<ModelMetadata> {
    self.stats.loads.fetch_add(1, Ordering::SeqCst);
    if !self.load_delay.is_zero() {
      tokio::time::sleep(self.load_delay).await;
    }
    if self.stats.fail_load.load(Ordering::SeqCst) {
      return Err(MlError::load("mock load failure"));
    }
    self.loaded = true;
    Ok(self.metadata.clone())
  }

  async fn infer(&self, inputs: &NamedTensors) -> Result<NamedTensors> {
    self.stats.infers.fetch_add(1, Ordering::SeqCst);
    if self.stats.fail_infer.load(Ordering::SeqCst) {
      return Err(MlError::inference("mock inference failure"));
    }
    Ok(self.output.clone().unwrap_or_else(|| inputs.clone()))
  }

  async fn dispose(&mut self) {
    self.stats.disposes.fetch_add(1, Ordering::SeqCst);
    self.loaded = false;
  }

  fn memory_usage_mb(&self) -> f64 {
    if self.loaded { 1.5 } else { 0.0 }
  }

  fn is_loaded(&self) -> bool {
    self.loaded
  }
}

/// A config with warmup disabled so infer counts only reflect `predict`.
pub(crate) fn cold_config() -> ModelConfig {
  ModelConfig::new("mock://model").with_warmup_runs(0)
}

/// An unloaded tensor model over a fresh mock backend.
pub(crate) fn mock_model(name: &str) -> (Arc<Model>, Arc<MockStats>) {
  let stats = Arc::new(MockStats::default());
  let backend = MockBackend::new(stats.clone());
  (Arc::new(Model::tensor(name, cold_config(), backend)), stats)
}

/// An unloaded model with a custom backend and task.
pub(crate) fn model_with(
  name: &str,
  backend: MockBackend,
  task: impl ModelTask + 'static,
) -> Arc<Model> {
  Arc::new(Model::new(name, cold_config(), backend, task))
}

/// An unloaded tensor model with a custom backend.
pub(crate) fn tensor_model_with(name: &str, backend: MockBackend) -> Arc<Model> {
  model_with(name, backend, TensorTask)
}

/// A single-tensor input map under `input`.
pub(crate) fn tensor_input(values: Vec<f32>, dims: Vec<usize>) -> crate::value::VisionValue {
  let mut inputs = NamedTensors::new();
  inputs.insert(
    "input".to_string(),
    Tensor::from_f32(values, dims).expect("valid test tensor"),
  );
  crate::value::VisionValue::Tensors(inputs)
}
