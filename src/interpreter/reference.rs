//! A pure-Rust CPU [`TensorRuntime`] executing JSON model documents.
//!
//! Two document formats are understood.
//!
//! Graph documents name every node and wire nodes by name:
//!
//! ```json
//! {
//!   "format": "graph",
//!   "inputs": [{ "name": "x", "dims": [null, 2] }],
//!   "outputs": ["y"],
//!   "nodes": [
//!     { "name": "h", "op": "dense", "inputs": ["x"], "weights": [[1, 0], [0, 1]] },
//!     { "name": "y", "op": "softmax", "inputs": ["h"] }
//!   ]
//! }
//! ```
//!
//! Layers documents are a single sequential chain:
//!
//! ```json
//! {
//!   "format": "layers",
//!   "input": { "name": "x", "dims": [null, 2] },
//!   "output": "y",
//!   "layers": [{ "op": "dense", "weights": [[1, 0], [0, 1]] }, { "op": "relu" }]
//! }
//! ```
//!
//! Supported ops: `dense`, `relu`, `sigmoid`, `softmax` (last axis),
//! `reshape` (one `-1` allowed), `transpose`, `add`, `scale`, `identity`.
//!
//! Native tensors live in an internal store. The runtime counts them and
//! their bytes, which makes leaked handles observable in tests.

use super::{GraphSignature, TensorRuntime};
use crate::backend::TensorSpec;
use crate::config::ModelConfig;
use crate::device::Device;
use crate::error::{MlError, Result};
use crate::tensor::{DataType, Tensor};
use crate::tensor_utils::{reshape, softmax_slice, transpose};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Handle to a tensor held by a [`ReferenceRuntime`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ReferenceHandle(u64);

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Op {
  Dense {
    /// `[in][out]`
    weights: Vec<Vec<f32>>,
    #[serde(default)]
    bias: Vec<f32>,
  },
  Relu,
  Sigmoid,
  Softmax,
  Reshape {
    dims: Vec<i64>,
  },
  Transpose {
    perm: Vec<usize>,
  },
  Add {
    #[serde(default)]
    value: f32,
  },
  Scale {
    factor: f32,
  },
  Identity,
}

impl Op {
  fn weight_count(&self) -> usize {
    match self {
      Op::Dense { weights, bias } => weights.iter().map(Vec::len).sum::<usize>() + bias.len(),
      _ => 0,
    }
  }
}

#[derive(Debug, Deserialize)]
struct SpecDocument {
  name: String,
  dims: Vec<Option<usize>>,
  #[serde(default)]
  data_type: Option<DataType>,
}

impl From<SpecDocument> for TensorSpec {
  fn from(doc: SpecDocument) -> Self {
    TensorSpec {
      name: doc.name,
      dims: doc.dims,
      data_type: doc.data_type.unwrap_or(DataType::Float32),
    }
  }
}

#[derive(Debug, Deserialize)]
struct NodeDocument {
  name: String,
  #[serde(default)]
  inputs: Vec<String>,
  #[serde(flatten)]
  op: Op,
}

#[derive(Debug, Deserialize)]
struct GraphDocument {
  format: String,
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  version: Option<String>,
  #[serde(default)]
  labels: Option<Vec<String>>,
  inputs: Vec<SpecDocument>,
  outputs: Vec<String>,
  nodes: Vec<NodeDocument>,
}

#[derive(Debug, Deserialize)]
struct LayersDocument {
  format: String,
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  version: Option<String>,
  #[serde(default)]
  labels: Option<Vec<String>>,
  input: SpecDocument,
  #[serde(default = "default_output_name")]
  output: String,
  layers: Vec<Op>,
}

fn default_output_name() -> String {
  "output".to_string()
}

#[derive(Debug)]
struct Node {
  name: String,
  inputs: Vec<String>,
  op: Op,
}

/// A parsed model document, nodes in execution order.
#[derive(Debug)]
pub struct ReferenceGraph {
  signature: GraphSignature,
  nodes: Vec<Node>,
  bytes: usize,
}

impl ReferenceGraph {
  /// Number of executable nodes.
  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  fn new(signature: GraphSignature, nodes: Vec<Node>) -> Result<Self> {
    let mut known: Vec<&str> = signature.inputs.iter().map(|s| s.name.as_str()).collect();
    for node in &nodes {
      if let Some(missing) = node.inputs.iter().find(|i| !known.contains(&i.as_str())) {
        return Err(MlError::load(format!(
          "node '{}' reads '{}' before it is produced",
          node.name, missing
        )));
      }
      known.push(&node.name);
    }
    if let Some(missing) = signature
      .outputs
      .iter()
      .find(|o| !known.contains(&o.name.as_str()))
    {
      return Err(MlError::load(format!("output '{}' is never produced", missing.name)));
    }
    let bytes = nodes.iter().map(|n| n.op.weight_count()).sum::<usize>() * 4;
    Ok(Self {
      signature,
      nodes,
      bytes,
    })
  }
}

fn output_spec(name: String) -> TensorSpec {
  TensorSpec::new(name, Vec::new())
}

fn parse_graph(bytes: &[u8]) -> Result<ReferenceGraph> {
  let doc: GraphDocument =
    serde_json::from_slice(bytes).map_err(|e| MlError::load(format!("graph document: {}", e)))?;
  if doc.format != "graph" {
    return Err(MlError::load(format!("expected graph format, found '{}'", doc.format)));
  }
  let signature = GraphSignature {
    name: doc.name,
    version: doc.version,
    inputs: doc.inputs.into_iter().map(TensorSpec::from).collect(),
    outputs: doc.outputs.into_iter().map(output_spec).collect(),
    labels: doc.labels,
  };
  let nodes = doc
    .nodes
    .into_iter()
    .map(|n| Node {
      name: n.name,
      inputs: n.inputs,
      op: n.op,
    })
    .collect();
  ReferenceGraph::new(signature, nodes)
}

fn parse_layers(bytes: &[u8]) -> Result<ReferenceGraph> {
  let doc: LayersDocument =
    serde_json::from_slice(bytes).map_err(|e| MlError::load(format!("layers document: {}", e)))?;
  if doc.format != "layers" {
    return Err(MlError::load(format!("expected layers format, found '{}'", doc.format)));
  }
  let input: TensorSpec = doc.input.into();
  let mut previous = input.name.clone();
  let last = doc.layers.len().saturating_sub(1);
  let mut nodes = Vec::with_capacity(doc.layers.len());
  for (i, op) in doc.layers.into_iter().enumerate() {
    let name = if i == last {
      doc.output.clone()
    } else {
      format!("layer_{}", i)
    };
    nodes.push(Node {
      name: name.clone(),
      inputs: vec![previous],
      op,
    });
    previous = name;
  }
  if nodes.is_empty() {
    return Err(MlError::load("layers document has no layers"));
  }
  let signature = GraphSignature {
    name: doc.name,
    version: doc.version,
    inputs: vec![input],
    outputs: vec![output_spec(doc.output)],
    labels: doc.labels,
  };
  ReferenceGraph::new(signature, nodes)
}

fn single_input<'a>(node: &Node, args: &[&'a Tensor]) -> Result<&'a Tensor> {
  match args {
    [only] => Ok(*only),
    _ => Err(MlError::inference(format!(
      "op on node '{}' takes one input, got {}",
      node.name,
      args.len()
    ))),
  }
}

fn map_values(tensor: &Tensor, f: impl Fn(f32) -> f32) -> Result<Tensor> {
  let data: Vec<f32> = tensor.values().iter().map(|&v| f(v)).collect();
  Tensor::from_f32(data, tensor.dims().to_vec())
}

fn dense(tensor: &Tensor, weights: &[Vec<f32>], bias: &[f32]) -> Result<Tensor> {
  let in_features = weights.len();
  let out_features = weights.first().map_or(0, Vec::len);
  if weights.iter().any(|row| row.len() != out_features) {
    return Err(MlError::inference("dense weights are ragged"));
  }
  if !bias.is_empty() && bias.len() != out_features {
    return Err(MlError::inference(format!(
      "dense bias has {} values for {} outputs",
      bias.len(),
      out_features
    )));
  }
  let dims = tensor.dims();
  match dims.last() {
    Some(&last) if last == in_features => {}
    _ => {
      return Err(MlError::inference(format!(
        "dense expects last dimension {}, got shape {:?}",
        in_features, dims
      )));
    }
  }
  let values = tensor.values();
  let mut out = Vec::with_capacity(values.len() / in_features.max(1) * out_features);
  for row in values.chunks_exact(in_features.max(1)) {
    for j in 0..out_features {
      let mut acc = bias.get(j).copied().unwrap_or(0.0);
      for (i, x) in row.iter().enumerate() {
        acc += x * weights[i][j];
      }
      out.push(acc);
    }
  }
  let mut out_dims = dims.to_vec();
  if let Some(last) = out_dims.last_mut() {
    *last = out_features;
  }
  Tensor::from_f32(out, out_dims)
}

fn softmax_last_axis(tensor: &Tensor) -> Result<Tensor> {
  let width = tensor.dims().last().copied().unwrap_or(1).max(1);
  let values = tensor.values();
  let mut out = Vec::with_capacity(values.len());
  for row in values.chunks(width) {
    out.extend(softmax_slice(row));
  }
  Tensor::from_f32(out, tensor.dims().to_vec())
}

fn reshape_inferred(tensor: &Tensor, dims: &[i64]) -> Result<Tensor> {
  let known: usize = dims.iter().filter(|&&d| d >= 0).map(|&d| d as usize).product();
  let inferred = dims.iter().filter(|&&d| d < 0).count();
  let resolved: Vec<usize> = match inferred {
    0 => dims.iter().map(|&d| d as usize).collect(),
    1 if known > 0 && tensor.size() % known == 0 => dims
      .iter()
      .map(|&d| if d < 0 { tensor.size() / known } else { d as usize })
      .collect(),
    _ => {
      return Err(MlError::inference(format!(
        "cannot reshape {:?} to {:?}",
        tensor.dims(),
        dims
      )));
    }
  };
  reshape(tensor, &resolved)
}

fn add(node: &Node, args: &[&Tensor], value: f32) -> Result<Tensor> {
  let Some((first, rest)) = args.split_first() else {
    return Err(MlError::inference(format!("add on node '{}' has no inputs", node.name)));
  };
  let mut sum = first.to_f32_vec();
  for other in rest {
    if other.dims() != first.dims() {
      return Err(MlError::inference(format!(
        "add on node '{}' mixes shapes {:?} and {:?}",
        node.name,
        first.dims(),
        other.dims()
      )));
    }
    for (acc, v) in sum.iter_mut().zip(other.values().iter()) {
      *acc += v;
    }
  }
  for acc in &mut sum {
    *acc += value;
  }
  Tensor::from_f32(sum, first.dims().to_vec())
}

fn run_node(node: &Node, args: &[&Tensor]) -> Result<Tensor> {
  let x = || single_input(node, args);
  match &node.op {
    Op::Add { value } => add(node, args, *value),
    Op::Dense { weights, bias } => dense(x()?, weights, bias),
    Op::Relu => map_values(x()?, |v| v.max(0.0)),
    Op::Sigmoid => map_values(x()?, |v| 1.0 / (1.0 + (-v).exp())),
    Op::Softmax => softmax_last_axis(x()?),
    Op::Reshape { dims } => reshape_inferred(x()?, dims),
    Op::Transpose { perm } => transpose(x()?, perm),
    Op::Scale { factor } => map_values(x()?, |v| v * factor),
    Op::Identity => Ok(x()?.clone()),
  }
}

/// CPU-only reference implementation of [`TensorRuntime`].
#[derive(Debug, Default)]
pub struct ReferenceRuntime {
  store: Mutex<HashMap<u64, Tensor>>,
  next_id: AtomicU64,
  tensor_bytes: AtomicUsize,
  graph_bytes: AtomicUsize,
}

impl ReferenceRuntime {
  /// An empty runtime.
  pub fn new() -> Self {
    Self::default()
  }

  /// Native tensors currently allocated.
  pub fn live_tensors(&self) -> usize {
    self.store.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  /// Bytes held by live native tensors.
  pub fn live_tensor_bytes(&self) -> usize {
    self.tensor_bytes.load(Ordering::SeqCst)
  }

  fn insert(&self, tensor: Tensor) -> ReferenceHandle {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    self.tensor_bytes.fetch_add(tensor.byte_len(), Ordering::SeqCst);
    self
      .store
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(id, tensor);
    ReferenceHandle(id)
  }

  fn get(&self, handle: &ReferenceHandle) -> Result<Tensor> {
    self
      .store
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&handle.0)
      .cloned()
      .ok_or_else(|| MlError::backend(format!("tensor handle {} is not live", handle.0)))
  }
}

#[async_trait]
impl TensorRuntime for ReferenceRuntime {
  type Handle = ReferenceHandle;
  type Graph = ReferenceGraph;

  fn name(&self) -> &str {
    "reference"
  }

  fn is_device_available(&self, device: Device) -> bool {
    device == Device::Cpu
  }

  async fn initialize(&self, device: Device, config: &ModelConfig) -> Result<()> {
    if device != Device::Cpu {
      return Err(MlError::backend(format!("reference runtime cannot run on {}", device)));
    }
    debug!(threads = config.num_threads, "reference runtime initialised");
    Ok(())
  }

  async fn load_graph(&self, bytes: &[u8]) -> Result<ReferenceGraph> {
    let graph = parse_graph(bytes)?;
    self.graph_bytes.fetch_add(graph.bytes, Ordering::SeqCst);
    Ok(graph)
  }

  async fn load_layers(&self, bytes: &[u8]) -> Result<ReferenceGraph> {
    let graph = parse_layers(bytes)?;
    self.graph_bytes.fetch_add(graph.bytes, Ordering::SeqCst);
    Ok(graph)
  }

  fn signature(&self, graph: &ReferenceGraph) -> GraphSignature {
    graph.signature.clone()
  }

  fn create_tensor(&self, tensor: &Tensor) -> Result<ReferenceHandle> {
    Ok(self.insert(tensor.clone()))
  }

  async fn execute(
    &self,
    graph: &ReferenceGraph,
    inputs: &[(String, ReferenceHandle)],
  ) -> Result<Vec<(String, ReferenceHandle)>> {
    let mut values: HashMap<&str, Tensor> = HashMap::new();
    for spec in &graph.signature.inputs {
      let (_, handle) = inputs
        .iter()
        .find(|(name, _)| *name == spec.name)
        .ok_or_else(|| MlError::inference(format!("missing input '{}'", spec.name)))?;
      let tensor = self.get(handle)?;
      if spec.dims.len() != tensor.rank()
        || spec
          .dims
          .iter()
          .zip(tensor.dims())
          .any(|(want, got)| want.is_some_and(|w| w != *got))
      {
        return Err(MlError::shape(format!(
          "input '{}' has shape {:?}, model expects {:?}",
          spec.name,
          tensor.dims(),
          spec.dims
        )));
      }
      values.insert(spec.name.as_str(), tensor);
    }

    for node in &graph.nodes {
      let args: Vec<&Tensor> = node
        .inputs
        .iter()
        .map(|name| {
          values
            .get(name.as_str())
            .ok_or_else(|| MlError::inference(format!("value '{}' is not available", name)))
        })
        .collect::<Result<_>>()?;
      let out = run_node(node, &args)?;
      values.insert(node.name.as_str(), out);
    }

    // Results are only materialised once every node has succeeded.
    let mut produced = Vec::with_capacity(graph.signature.outputs.len());
    for spec in &graph.signature.outputs {
      let tensor = values
        .get(spec.name.as_str())
        .cloned()
        .ok_or_else(|| MlError::inference(format!("output '{}' was not produced", spec.name)))?;
      produced.push(tensor);
    }
    Ok(
      graph
        .signature
        .outputs
        .iter()
        .zip(produced)
        .map(|(spec, tensor)| (spec.name.clone(), self.insert(tensor)))
        .collect(),
    )
  }

  fn read_tensor(&self, handle: &ReferenceHandle) -> Result<Tensor> {
    self.get(handle)
  }

  fn release(&self, handle: ReferenceHandle) {
    let removed = self
      .store
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&handle.0);
    if let Some(tensor) = removed {
      self.tensor_bytes.fetch_sub(tensor.byte_len(), Ordering::SeqCst);
    }
  }

  fn release_graph(&self, graph: ReferenceGraph) {
    self.graph_bytes.fetch_sub(graph.bytes, Ordering::SeqCst);
  }

  fn memory_bytes(&self) -> usize {
    self.tensor_bytes.load(Ordering::SeqCst) + self.graph_bytes.load(Ordering::SeqCst)
  }
}
