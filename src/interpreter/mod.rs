//! # Interpreter
//!
//! [`Interpreter`] binds the model lifecycle to a concrete tensor-execution
//! library through the narrow [`TensorRuntime`] interface.
//!
//! ## Load
//!
//! 1. Resolve the compute device with [`crate::device::resolve_device`].
//! 2. Initialise the runtime on that device.
//! 3. Fetch the artifact bytes through a [`ModelLoader`].
//! 4. Parse as a graph; with [`ModelFormat::Auto`], fall back to the layered
//!    format when graph parsing fails.
//!
//! ## Inference and resource discipline
//!
//! Every native tensor created for a call, inputs and outputs alike, is
//! released before `infer` returns, on success and on failure. The release
//! is tied to a scope guard rather than to the happy path.

mod reference;

pub use reference::{ReferenceGraph, ReferenceHandle, ReferenceRuntime};

use crate::backend::{InferenceBackend, ModelMetadata, TensorSpec};
use crate::config::{ModelConfig, ModelFormat};
use crate::device::{Device, resolve_device};
use crate::error::{MlError, Result};
use crate::tensor::{NamedTensors, Tensor};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Declared interface of a parsed graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSignature {
  /// Model name embedded in the artifact.
  pub name: Option<String>,
  /// Version embedded in the artifact.
  pub version: Option<String>,
  /// Inputs, in order.
  pub inputs: Vec<TensorSpec>,
  /// Outputs, in order.
  pub outputs: Vec<TensorSpec>,
  /// Class labels embedded in the artifact.
  pub labels: Option<Vec<String>>,
}

/// The native primitives an [`Interpreter`] needs from a tensor library.
///
/// Native tensors are referred to by opaque handles; every handle returned by
/// [`TensorRuntime::create_tensor`] or [`TensorRuntime::execute`] must
/// eventually be passed to [`TensorRuntime::release`].
#[async_trait]
pub trait TensorRuntime: Send + Sync + 'static {
  /// Handle to a native tensor.
  type Handle: Send + Sync;
  /// A parsed, executable model.
  type Graph: Send + Sync;

  /// Short runtime identifier for logs.
  fn name(&self) -> &str;

  /// Whether this runtime can execute on `device` here.
  fn is_device_available(&self, device: Device) -> bool;

  /// Prepares the runtime for `device`.
  async fn initialize(&self, device: Device, config: &ModelConfig) -> Result<()>;

  /// Parses a frozen computation graph.
  async fn load_graph(&self, bytes: &[u8]) -> Result<Self::Graph>;

  /// Parses a layered model.
  async fn load_layers(&self, bytes: &[u8]) -> Result<Self::Graph>;

  /// Declared inputs and outputs of `graph`.
  fn signature(&self, graph: &Self::Graph) -> GraphSignature;

  /// Copies `tensor` into native memory.
  fn create_tensor(&self, tensor: &Tensor) -> Result<Self::Handle>;

  /// Runs a forward pass. Returned handles are owned by the caller.
  async fn execute(
    &self,
    graph: &Self::Graph,
    inputs: &[(String, Self::Handle)],
  ) -> Result<Vec<(String, Self::Handle)>>;

  /// Copies a native tensor back into a [`Tensor`].
  fn read_tensor(&self, handle: &Self::Handle) -> Result<Tensor>;

  /// Frees a native tensor.
  fn release(&self, handle: Self::Handle);

  /// Frees a parsed graph.
  fn release_graph(&self, graph: Self::Graph);

  /// Bytes of native memory currently held.
  fn memory_bytes(&self) -> usize;
}

/// A runtime shared between several interpreters.
#[async_trait]
impl<R: TensorRuntime> TensorRuntime for Arc<R> {
  type Handle = R::Handle;
  type Graph = R::Graph;

  fn name(&self) -> &str {
    (**self).name()
  }

  fn is_device_available(&self, device: Device) -> bool {
    (**self).is_device_available(device)
  }

  async fn initialize(&self, device: Device, config: &ModelConfig) -> Result<()> {
    (**self).initialize(device, config).await
  }

  async fn load_graph(&self, bytes: &[u8]) -> Result<Self::Graph> {
    (**self).load_graph(bytes).await
  }

  async fn load_layers(&self, bytes: &[u8]) -> Result<Self::Graph> {
    (**self).load_layers(bytes).await
  }

  fn signature(&self, graph: &Self::Graph) -> GraphSignature {
    (**self).signature(graph)
  }

  fn create_tensor(&self, tensor: &Tensor) -> Result<Self::Handle> {
    (**self).create_tensor(tensor)
  }

  async fn execute(
    &self,
    graph: &Self::Graph,
    inputs: &[(String, Self::Handle)],
  ) -> Result<Vec<(String, Self::Handle)>> {
    (**self).execute(graph, inputs).await
  }

  fn read_tensor(&self, handle: &Self::Handle) -> Result<Tensor> {
    (**self).read_tensor(handle)
  }

  fn release(&self, handle: Self::Handle) {
    (**self).release(handle)
  }

  fn release_graph(&self, graph: Self::Graph) {
    (**self).release_graph(graph)
  }

  fn memory_bytes(&self) -> usize {
    (**self).memory_bytes()
  }
}

/// Resolves a model path to artifact bytes.
#[async_trait]
pub trait ModelLoader: Send + Sync {
  /// Reads the artifact at `path`.
  async fn load(&self, path: &str) -> Result<Vec<u8>>;
}

/// Reads artifacts from the filesystem, optionally relative to a root.
#[derive(Debug, Clone, Default)]
pub struct FsModelLoader {
  root: Option<PathBuf>,
}

impl FsModelLoader {
  /// Loader resolving paths as given.
  pub fn new() -> Self {
    Self::default()
  }

  /// Loader resolving relative paths against `root`.
  pub fn with_root(root: impl Into<PathBuf>) -> Self {
    Self {
      root: Some(root.into()),
    }
  }

  fn resolve(&self, path: &str) -> PathBuf {
    let path = Path::new(path);
    match &self.root {
      Some(root) if path.is_relative() => root.join(path),
      _ => path.to_path_buf(),
    }
  }
}

#[async_trait]
impl ModelLoader for FsModelLoader {
  async fn load(&self, path: &str) -> Result<Vec<u8>> {
    let resolved = self.resolve(path);
    debug!(path = %resolved.display(), "reading model artifact");
    tokio::fs::read(&resolved)
      .await
      .map_err(|e| MlError::load(format!("{}: {}", resolved.display(), e)))
  }
}

/// Serves artifacts bundled in memory, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct BundledModelLoader {
  artifacts: HashMap<String, Arc<[u8]>>,
}

impl BundledModelLoader {
  /// An empty bundle.
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds an artifact under `path`.
  pub fn with_artifact(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
    self.artifacts.insert(path.into(), bytes.into().into());
    self
  }
}

#[async_trait]
impl ModelLoader for BundledModelLoader {
  async fn load(&self, path: &str) -> Result<Vec<u8>> {
    self
      .artifacts
      .get(path)
      .map(|bytes| bytes.to_vec())
      .ok_or_else(|| MlError::load(format!("no bundled artifact at {}", path)))
  }
}

/// An [`InferenceBackend`] over a native [`TensorRuntime`].
pub struct Interpreter<R: TensorRuntime> {
  runtime: R,
  loader: Arc<dyn ModelLoader>,
  graph: Option<R::Graph>,
  device: Option<Device>,
}

impl<R: TensorRuntime> Interpreter<R> {
  /// An interpreter reading artifacts from the filesystem.
  pub fn new(runtime: R) -> Self {
    Self::with_loader(runtime, FsModelLoader::new())
  }

  /// An interpreter reading artifacts through `loader`.
  pub fn with_loader(runtime: R, loader: impl ModelLoader + 'static) -> Self {
    Self {
      runtime,
      loader: Arc::new(loader),
      graph: None,
      device: None,
    }
  }

  /// The wrapped runtime.
  pub fn runtime(&self) -> &R {
    &self.runtime
  }

  /// Device resolved by the last load.
  pub fn device(&self) -> Option<Device> {
    self.device
  }

  async fn parse(&self, bytes: &[u8], format: ModelFormat) -> Result<R::Graph> {
    match format {
      ModelFormat::Graph => self.runtime.load_graph(bytes).await,
      ModelFormat::Layers => self.runtime.load_layers(bytes).await,
      ModelFormat::Auto => match self.runtime.load_graph(bytes).await {
        Ok(graph) => Ok(graph),
        Err(graph_err) => {
          warn!(error = %graph_err, "graph format failed, trying layers format");
          self.runtime.load_layers(bytes).await.map_err(|layers_err| {
            MlError::load(format!(
              "not a graph model ({}) nor a layers model ({})",
              graph_err, layers_err
            ))
          })
        }
      },
    }
  }
}

fn as_load_error(err: MlError) -> MlError {
  match err {
    MlError::Load(_) => err,
    other => MlError::load(other.to_string()),
  }
}

#[async_trait]
impl<R: TensorRuntime> InferenceBackend for Interpreter<R> {
  fn name(&self) -> &str {
    self.runtime.name()
  }

  async fn load(&mut self, config: &ModelConfig) -> Result<ModelMetadata> {
    if let Some(previous) = self.graph.take() {
      self.runtime.release_graph(previous);
    }

    let device = resolve_device(config.device, |d| self.runtime.is_device_available(d));
    self
      .runtime
      .initialize(device, config)
      .await
      .map_err(as_load_error)?;

    let bytes = self.loader.load(&config.model_path).await.map_err(as_load_error)?;
    let graph = self.parse(&bytes, config.format).await.map_err(as_load_error)?;
    let signature = self.runtime.signature(&graph);

    let name = signature.name.unwrap_or_else(|| {
      Path::new(&config.model_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.model_path.clone())
    });
    info!(
      runtime = self.runtime.name(),
      %device,
      inputs = ?signature.inputs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
      outputs = ?signature.outputs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
      "interpreter loaded artifact"
    );

    self.graph = Some(graph);
    self.device = Some(device);
    Ok(ModelMetadata {
      name,
      version: signature.version.unwrap_or_else(|| "1".to_string()),
      inputs: signature.inputs,
      outputs: signature.outputs,
      labels: signature.labels,
      device: Some(device),
    })
  }

  async fn infer(&self, inputs: &NamedTensors) -> Result<NamedTensors> {
    let graph = self
      .graph
      .as_ref()
      .ok_or_else(|| MlError::inference("interpreter has no loaded model"))?;
    let runtime = &self.runtime;

    // Released on every exit path, including early returns and panics.
    let mut owned = scopeguard::guard(Vec::<(String, R::Handle)>::new(), |handles| {
      for (_, handle) in handles {
        runtime.release(handle);
      }
    });

    for (name, tensor) in inputs {
      let handle = runtime.create_tensor(tensor)?;
      owned.push((name.clone(), handle));
    }
    let native_outputs = runtime.execute(graph, owned.as_slice()).await?;
    let first_output = owned.len();
    owned.extend(native_outputs);

    let mut outputs = NamedTensors::new();
    for (name, handle) in &owned[first_output..] {
      let tensor = runtime.read_tensor(handle)?;
      outputs.insert(name.clone(), tensor.with_name(name.as_str()));
    }
    Ok(outputs)
  }

  async fn dispose(&mut self) {
    if let Some(graph) = self.graph.take() {
      self.runtime.release_graph(graph);
      debug!(runtime = self.runtime.name(), "interpreter released model");
    }
    self.device = None;
  }

  fn memory_usage_mb(&self) -> f64 {
    self.runtime.memory_bytes() as f64 / BYTES_PER_MB
  }

  fn is_loaded(&self) -> bool {
    self.graph.is_some()
  }
}
