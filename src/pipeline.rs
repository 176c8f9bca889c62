//! # Pipeline
//!
//! Chains [`Model`]s into a multi-stage vision pipeline, e.g. a person
//! detector feeding a hand-landmark model.
//!
//! Stages run strictly in list order. Each stage may carry:
//!
//! - a **condition** evaluated on the current value; when it returns false the
//!   stage is skipped entirely (no timing, not listed in `stages_executed`),
//! - a **transform** turning the current value into the stage's actual input.
//!
//! The parsed output of every executed stage becomes the current value for the
//! next one.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use mlcore::model::Model;
//! # use mlcore::pipeline::Pipeline;
//! # fn demo(detector: Arc<Model>, hands: Arc<Model>) -> mlcore::Result<()> {
//! let pipeline = Pipeline::builder("hands")
//!   .detect(detector)
//!   .stage("landmarks", hands)
//!   .when(|value| value.as_detections().is_some_and(|d| !d.is_empty()))
//!   .build()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{MlError, Result};
use crate::model::{InferenceResult, Model, ModelState};
use crate::value::{ValueKind, VisionValue};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Maps the current value to a stage's input.
pub type StageTransform = Arc<dyn Fn(&VisionValue) -> Result<VisionValue> + Send + Sync>;

/// Decides whether a stage runs for the current value.
pub type StageCondition = Arc<dyn Fn(&VisionValue) -> bool + Send + Sync>;

/// One model invocation step.
#[derive(Clone)]
pub struct PipelineStage {
  name: String,
  model: Arc<Model>,
  transform: Option<StageTransform>,
  condition: Option<StageCondition>,
}

impl std::fmt::Debug for PipelineStage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PipelineStage")
      .field("name", &self.name)
      .field("model", &self.model.name())
      .field("transform", &self.transform.is_some())
      .field("condition", &self.condition.is_some())
      .finish()
  }
}

impl PipelineStage {
  /// An unconditional stage feeding the current value to `model` unchanged.
  pub fn new(name: impl Into<String>, model: Arc<Model>) -> Self {
    Self {
      name: name.into(),
      model,
      transform: None,
      condition: None,
    }
  }

  /// Sets the input transform.
  pub fn with_transform<F>(mut self, transform: F) -> Self
  where
    F: Fn(&VisionValue) -> Result<VisionValue> + Send + Sync + 'static,
  {
    self.transform = Some(Arc::new(transform));
    self
  }

  /// Sets the run condition.
  pub fn with_condition<F>(mut self, condition: F) -> Self
  where
    F: Fn(&VisionValue) -> bool + Send + Sync + 'static,
  {
    self.condition = Some(Arc::new(condition));
    self
  }

  /// Stage name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// The stage's model.
  pub fn model(&self) -> &Arc<Model> {
    &self.model
  }

  /// Kind of value this stage outputs.
  pub fn produces(&self) -> ValueKind {
    self.model.output_kind()
  }

  fn should_run(&self, value: &VisionValue) -> bool {
    self.condition.as_ref().is_none_or(|c| c(value))
  }
}

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct PipelineResult {
  /// Parsed output per executed stage.
  pub outputs: HashMap<String, VisionValue>,
  /// Full inference result per executed stage.
  pub stage_results: HashMap<String, InferenceResult>,
  /// Wall time of the whole run.
  pub total_time_ms: f64,
  /// Names of the stages that ran, in order.
  pub stages_executed: Vec<String>,
}

impl PipelineResult {
  /// Output of the last executed stage.
  pub fn final_output(&self) -> Option<&VisionValue> {
    self
      .stages_executed
      .last()
      .and_then(|name| self.outputs.get(name))
  }
}

/// An ordered list of stages.
#[derive(Debug)]
pub struct Pipeline {
  name: String,
  stages: Vec<PipelineStage>,
}

impl Pipeline {
  /// An empty pipeline.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      stages: Vec::new(),
    }
  }

  /// Fluent construction; see [`PipelineBuilder`].
  pub fn builder(name: impl Into<String>) -> PipelineBuilder {
    PipelineBuilder::new(name)
  }

  /// Pipeline name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Appends a stage. Stage names must be unique.
  pub fn add_stage(&mut self, stage: PipelineStage) -> Result<()> {
    if self.stages.iter().any(|s| s.name == stage.name) {
      return Err(MlError::DuplicateStage(stage.name));
    }
    self.stages.push(stage);
    Ok(())
  }

  /// Removes the stage called `name`; a no-op if absent.
  pub fn remove_stage(&mut self, name: &str) -> Option<PipelineStage> {
    let index = self.stages.iter().position(|s| s.name == name)?;
    Some(self.stages.remove(index))
  }

  /// Stage names in execution order.
  pub fn stage_names(&self) -> Vec<&str> {
    self.stages.iter().map(|s| s.name.as_str()).collect()
  }

  /// The stages in execution order.
  pub fn stages(&self) -> &[PipelineStage] {
    &self.stages
  }

  /// Number of stages.
  pub fn len(&self) -> usize {
    self.stages.len()
  }

  /// Returns true if there are no stages.
  pub fn is_empty(&self) -> bool {
    self.stages.is_empty()
  }

  /// Loads every stage's model in parallel, skipping ready ones.
  pub async fn load_all(&self) -> Result<()> {
    let pending = self
      .stages
      .iter()
      .filter(|s| s.model.state() != ModelState::Ready)
      .map(|s| async move { s.model.load().await.map_err(|e| e.in_stage(&s.name)) });
    join_all(pending).await.into_iter().collect::<Result<Vec<_>>>()?;
    info!(pipeline = %self.name, stages = self.stages.len(), "pipeline loaded");
    Ok(())
  }

  /// Runs every stage in order on `input`.
  pub async fn run(&self, input: VisionValue) -> Result<PipelineResult> {
    let started = Instant::now();
    let mut current = input;
    let mut outputs = HashMap::new();
    let mut stage_results = HashMap::new();
    let mut stages_executed = Vec::new();

    for stage in &self.stages {
      if !stage.should_run(&current) {
        debug!(pipeline = %self.name, stage = %stage.name, "stage skipped");
        continue;
      }
      let stage_input = match &stage.transform {
        Some(transform) => transform(&current).map_err(|e| e.in_stage(&stage.name))?,
        None => current.clone(),
      };
      let result = stage
        .model
        .predict(&stage_input)
        .await
        .map_err(|e| e.in_stage(&stage.name))?;
      debug!(
        pipeline = %self.name,
        stage = %stage.name,
        ms = result.total_time_ms(),
        "stage complete"
      );

      current = result.parsed.clone();
      outputs.insert(stage.name.clone(), result.parsed.clone());
      stage_results.insert(stage.name.clone(), result);
      stages_executed.push(stage.name.clone());
    }

    Ok(PipelineResult {
      outputs,
      stage_results,
      total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
      stages_executed,
    })
  }

  /// Runs each input independently and concurrently; results keep input order.
  pub async fn run_batch(&self, inputs: Vec<VisionValue>) -> Result<Vec<PipelineResult>> {
    join_all(inputs.into_iter().map(|input| self.run(input)))
      .await
      .into_iter()
      .collect()
  }

  /// Disposes every stage's model and removes all stages.
  pub async fn dispose(&mut self) {
    join_all(self.stages.iter().map(|s| s.model.dispose())).await;
    self.stages.clear();
  }
}

/// Fluent sugar over [`Pipeline::add_stage`].
///
/// `when` and `transform` apply to the most recently added stage.
#[derive(Debug)]
pub struct PipelineBuilder {
  name: String,
  stages: Vec<PipelineStage>,
}

impl PipelineBuilder {
  /// A builder for a pipeline called `name`.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      stages: Vec::new(),
    }
  }

  /// Appends a stage.
  pub fn stage(mut self, name: impl Into<String>, model: Arc<Model>) -> Self {
    self.stages.push(PipelineStage::new(name, model));
    self
  }

  /// Appends a stage named after the model.
  pub fn detect(self, model: Arc<Model>) -> Self {
    let name = model.name().to_string();
    self.stage(name, model)
  }

  /// Sets the condition of the last stage.
  pub fn when<F>(mut self, condition: F) -> Self
  where
    F: Fn(&VisionValue) -> bool + Send + Sync + 'static,
  {
    if let Some(stage) = self.stages.last_mut() {
      stage.condition = Some(Arc::new(condition));
    }
    self
  }

  /// Sets the input transform of the last stage.
  pub fn transform<F>(mut self, transform: F) -> Self
  where
    F: Fn(&VisionValue) -> Result<VisionValue> + Send + Sync + 'static,
  {
    if let Some(stage) = self.stages.last_mut() {
      stage.transform = Some(Arc::new(transform));
    }
    self
  }

  /// Builds the pipeline, rejecting duplicate stage names.
  pub fn build(self) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new(self.name);
    for stage in self.stages {
      pipeline.add_stage(stage)?;
    }
    Ok(pipeline)
  }
}
