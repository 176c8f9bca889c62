//! # Model Lifecycle
//!
//! [`Model`] is the backend-agnostic state machine every inference engine in
//! this crate runs through:
//!
//! ```text
//! unloaded --load()--> loading --ok--> ready --dispose()--> disposed
//!                         |
//!                         +--err--> error --load()--> loading ...
//! ```
//!
//! A model pairs an [`InferenceBackend`] (how tensors are executed) with a
//! [`ModelTask`] (how domain inputs become tensors and outputs become
//! results). `predict` runs four timed phases: preprocess, inference,
//! postprocess and metrics update.
//!
//! ## Concurrency
//!
//! The backend sits behind a `tokio::sync::RwLock`: `load` and `dispose` take
//! it exclusively, while `predict` calls share it and may interleave if the
//! backend allows. Concurrent `load` calls on one model serialise on that lock
//! and later callers observe `ready`.
//!
//! ## Known limitation
//!
//! Nothing here is cancellation-aware. A caller racing `predict` against a
//! timeout drops only its own future; a backend call that was already
//! dispatched may still complete elsewhere and update metrics afterwards.

use crate::backend::{InferenceBackend, ModelMetadata};
use crate::config::ModelConfig;
use crate::device::Device;
use crate::error::{MlError, Result};
use crate::events::{EventEmitter, ModelEvent};
use crate::metrics::{self, MetricsWindow, PerformanceMetrics};
use crate::tasks::{ModelTask, TaskContext, TensorTask};
use crate::tensor::NamedTensors;
use crate::value::{ValueKind, VisionValue};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, error, info};

/// Lifecycle state of a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
  /// Constructed, nothing loaded.
  Unloaded,
  /// A load is in progress.
  Loading,
  /// Loaded and warmed up; `predict` is allowed.
  Ready,
  /// The last load failed; `load` may be retried.
  Error,
  /// Resources released. Terminal.
  Disposed,
}

impl fmt::Display for ModelState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ModelState::Unloaded => "unloaded",
      ModelState::Loading => "loading",
      ModelState::Ready => "ready",
      ModelState::Error => "error",
      ModelState::Disposed => "disposed",
    };
    f.write_str(s)
  }
}

/// Phase timings of one prediction, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceTiming {
  /// Input conversion.
  pub preprocess_ms: f64,
  /// Backend execution.
  pub inference_ms: f64,
  /// Output parsing.
  pub postprocess_ms: f64,
}

impl InferenceTiming {
  /// Sum of all phases.
  pub fn total_ms(&self) -> f64 {
    self.preprocess_ms + self.inference_ms + self.postprocess_ms
  }
}

/// Per-call overrides for a prediction. Unset fields keep the task defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictOptions {
  /// Minimum confidence (visibility for landmark tasks).
  pub score_threshold: Option<f32>,
  /// NMS overlap threshold.
  pub iou_threshold: Option<f32>,
  /// Number of classes for classification.
  pub top_k: Option<usize>,
  /// Cap on returned results.
  pub max_results: Option<usize>,
}

impl PredictOptions {
  /// Sets the score threshold.
  pub fn with_score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = Some(threshold);
    self
  }

  /// Sets the IoU threshold.
  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = Some(threshold);
    self
  }

  /// Sets top-K.
  pub fn with_top_k(mut self, k: usize) -> Self {
    self.top_k = Some(k);
    self
  }

  /// Caps the result count.
  pub fn with_max_results(mut self, max: usize) -> Self {
    self.max_results = Some(max);
    self
  }
}

/// Output of [`Model::predict`].
#[derive(Debug, Clone)]
pub struct InferenceResult {
  /// Raw backend outputs.
  pub outputs: NamedTensors,
  /// Task-parsed result.
  pub parsed: VisionValue,
  /// Backend execution time.
  pub inference_time_ms: f64,
  /// Input conversion time.
  pub preprocess_time_ms: f64,
  /// Output parsing time.
  pub postprocess_time_ms: f64,
}

impl InferenceResult {
  /// Phase timings as one value.
  pub fn timing(&self) -> InferenceTiming {
    InferenceTiming {
      preprocess_ms: self.preprocess_time_ms,
      inference_ms: self.inference_time_ms,
      postprocess_ms: self.postprocess_time_ms,
    }
  }

  /// Wall time of the whole call, excluding metrics bookkeeping.
  pub fn total_time_ms(&self) -> f64 {
    self.timing().total_ms()
  }
}

fn elapsed_ms(start: Instant) -> f64 {
  start.elapsed().as_secs_f64() * 1000.0
}

/// A named model: configuration, backend, task, state, metrics and events.
pub struct Model {
  name: String,
  config: ModelConfig,
  task: Arc<dyn ModelTask>,
  backend: tokio::sync::RwLock<Box<dyn InferenceBackend>>,
  state: RwLock<ModelState>,
  metadata: RwLock<Option<Arc<ModelMetadata>>>,
  metrics: Mutex<MetricsWindow>,
  events: EventEmitter,
}

impl fmt::Debug for Model {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Model")
      .field("name", &self.name)
      .field("state", &self.state())
      .field("task", &self.task.name())
      .field("model_path", &self.config.model_path)
      .finish()
  }
}

impl Model {
  /// Creates an unloaded model.
  pub fn new<B, T>(name: impl Into<String>, config: ModelConfig, backend: B, task: T) -> Self
  where
    B: InferenceBackend + 'static,
    T: ModelTask + 'static,
  {
    Self::from_parts(name, config, Box::new(backend), Arc::new(task))
  }

  /// Creates an unloaded model that takes and returns raw tensors.
  pub fn tensor<B>(name: impl Into<String>, config: ModelConfig, backend: B) -> Self
  where
    B: InferenceBackend + 'static,
  {
    Self::new(name, config, backend, TensorTask)
  }

  /// Creates an unloaded model from boxed parts.
  pub fn from_parts(
    name: impl Into<String>,
    config: ModelConfig,
    backend: Box<dyn InferenceBackend>,
    task: Arc<dyn ModelTask>,
  ) -> Self {
    Self {
      name: name.into(),
      config,
      task,
      backend: tokio::sync::RwLock::new(backend),
      state: RwLock::new(ModelState::Unloaded),
      metadata: RwLock::new(None),
      metrics: Mutex::new(MetricsWindow::default()),
      events: EventEmitter::new(),
    }
  }

  /// Model name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Configuration the model was created with.
  pub fn config(&self) -> &ModelConfig {
    &self.config
  }

  /// Current lifecycle state.
  pub fn state(&self) -> ModelState {
    *self.state.read().unwrap_or_else(PoisonError::into_inner)
  }

  /// Returns true when `predict` is allowed.
  pub fn is_ready(&self) -> bool {
    self.state() == ModelState::Ready
  }

  /// Metadata from the last successful load.
  pub fn metadata(&self) -> Option<Arc<ModelMetadata>> {
    self
      .metadata
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Device the backend resolved to on the last load.
  pub fn device(&self) -> Option<Device> {
    self.metadata().and_then(|m| m.device)
  }

  /// Rolling performance snapshot.
  pub fn metrics(&self) -> PerformanceMetrics {
    self
      .metrics
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .snapshot()
  }

  /// Kind of value `predict` returns in `parsed`.
  pub fn output_kind(&self) -> ValueKind {
    self.task.output_kind()
  }

  /// Event subscription surface.
  pub fn events(&self) -> &EventEmitter {
    &self.events
  }

  /// Current backend memory usage in megabytes.
  pub async fn memory_usage_mb(&self) -> f64 {
    self.backend.read().await.memory_usage_mb()
  }

  fn transition(&self, to: ModelState) {
    let from = {
      let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
      std::mem::replace(&mut *state, to)
    };
    if from == to {
      return;
    }
    info!(model = %self.name, %from, %to, "model state changed");
    self.events.emit(&ModelEvent::StateChange {
      model: self.name.clone(),
      from,
      to,
    });
  }

  fn report_error(&self, context: &str, error: &MlError) {
    metrics::record_model_error(&self.name, context);
    self.events.emit(&ModelEvent::Error {
      model: self.name.clone(),
      context: context.to_string(),
      error: error.clone(),
      timestamp: Utc::now(),
    });
  }

  /// Loads and warms up the model.
  ///
  /// A no-op when already `ready`. On failure the model moves to `error`, an
  /// error event with context `"load"` is emitted and the error is returned;
  /// a later `load` starts again from scratch.
  pub async fn load(&self) -> Result<()> {
    match self.state() {
      ModelState::Ready => return Ok(()),
      ModelState::Disposed => return Err(MlError::invalid_state("load", ModelState::Disposed)),
      _ => {}
    }

    let mut backend = self.backend.write().await;
    // Another caller may have finished loading while we waited for the lock.
    match self.state() {
      ModelState::Ready => return Ok(()),
      ModelState::Disposed => return Err(MlError::invalid_state("load", ModelState::Disposed)),
      _ => {}
    }

    self.transition(ModelState::Loading);
    let started = Instant::now();
    let outcome = async {
      let metadata = backend.load(&self.config).await?;
      for _ in 0..self.config.warmup_runs {
        backend.warmup(&metadata).await?;
      }
      Ok::<_, MlError>(metadata)
    }
    .await;

    match outcome {
      Ok(metadata) => {
        let device = metadata
          .device
          .map(|d| d.to_string())
          .unwrap_or_else(|| "unknown".to_string());
        let load_ms = elapsed_ms(started);
        *self.metadata.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(metadata));
        self
          .metrics
          .lock()
          .unwrap_or_else(PoisonError::into_inner)
          .set_memory(backend.memory_usage_mb());
        metrics::record_model_load(&self.name, &device, load_ms);
        info!(
          model = %self.name,
          backend = backend.name(),
          %device,
          load_ms,
          warmup_runs = self.config.warmup_runs,
          "model loaded"
        );
        drop(backend);
        self.transition(ModelState::Ready);
        Ok(())
      }
      Err(err) => {
        error!(model = %self.name, error = %err, "model load failed");
        // Drop whatever the backend managed to allocate before failing.
        backend.dispose().await;
        drop(backend);
        self.transition(ModelState::Error);
        self.report_error("load", &err);
        Err(err)
      }
    }
  }

  /// Runs one prediction with the task's default options.
  pub async fn predict(&self, input: &VisionValue) -> Result<InferenceResult> {
    self.predict_with(input, &PredictOptions::default()).await
  }

  /// Runs one prediction.
  ///
  /// Fails with [`MlError::InvalidState`] before touching the backend unless
  /// the model is `ready`. A successful call emits `InferenceStart`, then
  /// `MetricsUpdate`, then `InferenceEnd`.
  pub async fn predict_with(
    &self,
    input: &VisionValue,
    options: &PredictOptions,
  ) -> Result<InferenceResult> {
    let state = self.state();
    if state != ModelState::Ready {
      return Err(MlError::invalid_state("predict", state));
    }
    let metadata = self
      .metadata()
      .ok_or_else(|| MlError::invalid_state("predict", state))?;
    let ctx = TaskContext {
      model: &self.name,
      metadata: &metadata,
      options,
    };

    let started = Instant::now();
    let prepared = self.task.preprocess(input, &ctx)?;
    let preprocess_ms = elapsed_ms(started);

    let (outputs, inference_ms, memory_mb) = {
      let backend = self.backend.read().await;
      // dispose() may have run while we were waiting.
      let state = self.state();
      if state != ModelState::Ready {
        return Err(MlError::invalid_state("predict", state));
      }
      self.events.emit(&ModelEvent::InferenceStart {
        model: self.name.clone(),
      });
      let started = Instant::now();
      let outputs = match backend.infer(&prepared.tensors).await {
        Ok(outputs) => outputs,
        Err(err) => {
          debug!(model = %self.name, error = %err, "inference failed");
          self.report_error("predict", &err);
          return Err(err);
        }
      };
      (outputs, elapsed_ms(started), backend.memory_usage_mb())
    };

    let started = Instant::now();
    let parsed = self
      .task
      .postprocess(&outputs, &ctx, prepared.transform.as_ref())?;
    let postprocess_ms = elapsed_ms(started);

    let snapshot = self
      .metrics
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .record(inference_ms, memory_mb);
    metrics::record_inference(&self.name, inference_ms);
    debug!(
      model = %self.name,
      preprocess_ms,
      inference_ms,
      postprocess_ms,
      "prediction complete"
    );
    // MetricsUpdate precedes InferenceEnd: InferenceEnd is always the last
    // event of a successful call.
    self.events.emit(&ModelEvent::MetricsUpdate {
      model: self.name.clone(),
      metrics: snapshot,
    });

    let result = InferenceResult {
      outputs,
      parsed,
      inference_time_ms: inference_ms,
      preprocess_time_ms: preprocess_ms,
      postprocess_time_ms: postprocess_ms,
    };
    self.events.emit(&ModelEvent::InferenceEnd {
      model: self.name.clone(),
      timing: result.timing(),
    });
    Ok(result)
  }

  /// Predicts each input in turn, returning results in input order.
  ///
  /// Stops at the first failure.
  pub async fn predict_batch(&self, inputs: &[VisionValue]) -> Result<Vec<InferenceResult>> {
    let mut results = Vec::with_capacity(inputs.len());
    for input in inputs {
      results.push(self.predict(input).await?);
    }
    Ok(results)
  }

  /// Releases backend resources and clears all listeners. Idempotent.
  pub async fn dispose(&self) {
    if self.state() == ModelState::Disposed {
      return;
    }
    let mut backend = self.backend.write().await;
    if self.state() == ModelState::Disposed {
      return;
    }
    backend.dispose().await;
    drop(backend);
    *self.metadata.write().unwrap_or_else(PoisonError::into_inner) = None;
    self.transition(ModelState::Disposed);
    self.events.clear();
  }
}
