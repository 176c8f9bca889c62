//! # Inference Backend
//!
//! The capability seam between the backend-agnostic [`crate::model::Model`]
//! lifecycle and whatever actually executes forward passes. A backend only
//! has to load an artifact, run inference on named tensors, report its memory
//! and release its resources; the model layer adds state tracking, timing,
//! events and pre/post-processing on top.
//!
//! [`crate::interpreter::Interpreter`] is the bundled implementation, generic
//! over a native [`crate::interpreter::TensorRuntime`]. Tests and hosts with an
//! exotic runtime (a remote inference service, a vendor SDK) can implement
//! this trait directly.

use crate::config::ModelConfig;
use crate::device::Device;
use crate::error::Result;
use crate::tensor::{DataType, NamedTensors};
use crate::tensor_utils::dummy_input;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Declared name, shape and type of a model input or output.
///
/// `None` dimensions are dynamic (e.g. the batch axis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
  /// Tensor name.
  pub name: String,
  /// Dimension sizes; `None` when unknown until runtime.
  pub dims: Vec<Option<usize>>,
  /// Element type.
  pub data_type: DataType,
}

impl TensorSpec {
  /// A `float32` spec.
  pub fn new(name: impl Into<String>, dims: Vec<Option<usize>>) -> Self {
    Self {
      name: name.into(),
      dims,
      data_type: DataType::Float32,
    }
  }

  /// Dimensions with dynamic axes replaced by 1.
  pub fn concrete_dims(&self) -> Vec<usize> {
    self.dims.iter().map(|d| d.unwrap_or(1)).collect()
  }
}

/// Facts about a loaded model, replaced wholesale on every load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
  /// Model name.
  pub name: String,
  /// Model version string.
  pub version: String,
  /// Declared inputs, in order.
  pub inputs: Vec<TensorSpec>,
  /// Declared outputs, in order.
  pub outputs: Vec<TensorSpec>,
  /// Class labels, when the artifact ships them.
  pub labels: Option<Vec<String>>,
  /// Device the backend resolved to.
  pub device: Option<Device>,
}

impl ModelMetadata {
  /// Name of the first declared input.
  pub fn primary_input(&self) -> Option<&TensorSpec> {
    self.inputs.first()
  }

  /// Name of the first declared output.
  pub fn primary_output(&self) -> Option<&TensorSpec> {
    self.outputs.first()
  }

  /// Input spec by name.
  pub fn input(&self, name: &str) -> Option<&TensorSpec> {
    self.inputs.iter().find(|s| s.name == name)
  }

  /// Label for class `index`, or `class_{index}` when none is known.
  pub fn label(&self, index: usize) -> String {
    self
      .labels
      .as_ref()
      .and_then(|labels| labels.get(index).cloned())
      .unwrap_or_else(|| format!("class_{index}"))
  }
}

/// A tensor-execution backend bound to one model.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
  /// Short backend identifier for logs.
  fn name(&self) -> &str;

  /// Loads the artifact described by `config` and reports its metadata.
  async fn load(&mut self, config: &ModelConfig) -> Result<ModelMetadata>;

  /// Runs one forward pass.
  ///
  /// Implementations must release every native allocation made for the call
  /// before returning, on success and on failure.
  async fn infer(&self, inputs: &NamedTensors) -> Result<NamedTensors>;

  /// Runs one dummy forward pass to let the backend compile kernels and
  /// allocate buffers. The default feeds zeros shaped like each declared
  /// input, with dynamic dimensions set to 1, and discards the result.
  async fn warmup(&self, metadata: &ModelMetadata) -> Result<()> {
    let inputs: NamedTensors = metadata
      .inputs
      .iter()
      .map(|spec| (spec.name.clone(), dummy_input(&spec.dims, spec.data_type)))
      .collect();
    self.infer(&inputs).await.map(|_| ())
  }

  /// Releases backend resources. Must tolerate being called more than once.
  async fn dispose(&mut self);

  /// Current backend memory usage in megabytes.
  fn memory_usage_mb(&self) -> f64;

  /// Whether an artifact is currently loaded.
  fn is_loaded(&self) -> bool;
}
