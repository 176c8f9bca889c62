//! # mlcore
//!
//! Backend-agnostic on-device inference core: tensors and tensor utilities,
//! a model lifecycle state machine, a model registry, vision output parsers
//! and multi-stage model pipelines.
//!
//! ## Layers
//!
//! - **Tensor** ([`tensor`], [`tensor_utils`], [`pixels`]): typed buffers with
//!   explicit shapes plus pure transforms (normalise, reshape, transpose,
//!   softmax, top-K, NMS) and image conversion.
//! - **Model** ([`model`], [`backend`], [`tasks`]): `unloaded → loading →
//!   ready → disposed` lifecycle with timed `predict`, rolling metrics and
//!   typed events. Execution is delegated to an [`backend::InferenceBackend`].
//! - **Interpreter** ([`interpreter`]): an `InferenceBackend` over a native
//!   [`interpreter::TensorRuntime`], with guaranteed release of native tensors.
//! - **Registry** ([`registry`]): id-keyed catalog with single-flight loading
//!   and idle eviction.
//! - **Vision** ([`vision`]): detection, classification, landmark and
//!   segmentation parsers plus overlay drawing.
//! - **Pipeline** ([`pipeline`]): ordered, conditional model stages.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mlcore::config::ModelConfig;
//! use mlcore::interpreter::{Interpreter, ReferenceRuntime};
//! use mlcore::model::Model;
//! use mlcore::tensor::{NamedTensors, Tensor};
//! use mlcore::value::VisionValue;
//!
//! # async fn demo() -> mlcore::Result<()> {
//! let backend = Interpreter::new(ReferenceRuntime::new());
//! let model = Model::tensor("scorer", ModelConfig::new("scorer.json"), backend);
//! model.load().await?;
//!
//! let mut inputs = NamedTensors::new();
//! inputs.insert("x".to_string(), Tensor::from_f32(vec![0.5, 1.5], vec![1, 2])?);
//! let result = model.predict(&VisionValue::Tensors(inputs)).await?;
//! println!("{:?} in {:.2}ms", result.outputs, result.inference_time_ms);
//! model.dispose().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

/// Inference backend capability trait and model metadata.
pub mod backend;
/// Model configuration.
pub mod config;
/// Compute devices and device resolution.
pub mod device;
/// Error type shared by all layers.
pub mod error;
/// Typed model lifecycle events.
pub mod events;
/// Interpreter backend over a native tensor runtime.
pub mod interpreter;
/// Tracing subscriber setup.
pub mod logging;
/// Rolling performance metrics and `metrics` facade recorders.
pub mod metrics;
/// Model lifecycle state machine.
pub mod model;
/// Multi-stage model pipelines.
pub mod pipeline;
/// Pixel sources and image preprocessing.
pub mod pixels;
/// Model catalog with single-flight loading.
pub mod registry;
/// Task-specific preprocessing and postprocessing.
pub mod tasks;
/// Tensor type.
pub mod tensor;
/// Pure tensor transforms.
pub mod tensor_utils;
/// Tagged model inputs and outputs.
pub mod value;
/// Vision output parsers and overlay drawing.
pub mod vision;

pub use error::{MlError, Result};
pub use model::{InferenceResult, Model, ModelState, PredictOptions};
pub use registry::ModelRegistry;
pub use tensor::{DataType, NamedTensors, Tensor};
pub use value::{ValueKind, VisionValue};

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod registry_test;
