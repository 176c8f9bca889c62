//! # Model Tasks
//!
//! A [`ModelTask`] supplies the domain half of a [`crate::model::Model`]: how a
//! [`VisionValue`] becomes named input tensors and how output tensors become a
//! parsed result. The backend half lives behind
//! [`crate::backend::InferenceBackend`].
//!
//! Every task also accepts [`VisionValue::Tensors`] as input and forwards it
//! unchanged, so callers can bypass image preprocessing.
//!
//! ## Built-in tasks
//!
//! | Task | Input | Output |
//! |------|-------|--------|
//! | [`TensorTask`] | tensors | tensors |
//! | [`DetectionTask`] | frame | detections, in source pixels |
//! | [`ClassificationTask`] | frame | classifications |
//! | [`PoseLandmarkTask`] | frame | landmarks |
//! | [`HandLandmarkTask`] | frame | landmarks |
//! | [`SegmentationTask`] | frame | segmentation |

use crate::backend::ModelMetadata;
use crate::error::{MlError, Result};
use crate::model::PredictOptions;
use crate::pixels::{ImagePreprocessConfig, ImageTransform};
use crate::tensor::{NamedTensors, Tensor};
use crate::tensor_utils::from_image_with_transform;
use crate::value::{ValueKind, VisionValue};
use crate::vision::{
  ClassificationOptions, DetectionOptions, LandmarkOptions, SegmentationOptions,
  parse_classification, parse_detections, parse_hand_landmarks, parse_pose_landmarks,
  parse_segmentation_mask,
};
use std::fmt::Debug;

/// Input name used when the backend declares none.
pub const DEFAULT_INPUT_NAME: &str = "input";

/// What a task sees about the model it runs for.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
  /// Model name.
  pub model: &'a str,
  /// Metadata from the last successful load.
  pub metadata: &'a ModelMetadata,
  /// Per-call overrides.
  pub options: &'a PredictOptions,
}

/// Output of [`ModelTask::preprocess`].
#[derive(Debug, Clone)]
pub struct Preprocessed {
  /// Backend inputs.
  pub tensors: NamedTensors,
  /// Tensor-to-source geometry when the input was an image.
  pub transform: Option<ImageTransform>,
}

impl Preprocessed {
  /// Tensors with no image geometry.
  pub fn tensors(tensors: NamedTensors) -> Self {
    Self {
      tensors,
      transform: None,
    }
  }
}

/// Domain-specific preprocessing and postprocessing for a model.
pub trait ModelTask: Debug + Send + Sync {
  /// Short identifier for logs.
  fn name(&self) -> &str;

  /// Variant of [`VisionValue`] that [`ModelTask::postprocess`] produces.
  fn output_kind(&self) -> ValueKind;

  /// Converts a domain input into backend input tensors.
  fn preprocess(&self, input: &VisionValue, ctx: &TaskContext<'_>) -> Result<Preprocessed>;

  /// Parses backend outputs into a domain result.
  fn postprocess(
    &self,
    outputs: &NamedTensors,
    ctx: &TaskContext<'_>,
    transform: Option<&ImageTransform>,
  ) -> Result<VisionValue>;
}

fn unsupported(expected: &str, input: &VisionValue) -> MlError {
  MlError::UnsupportedInput {
    expected: expected.to_string(),
    found: input.kind().to_string(),
  }
}

/// Resize target from the primary input's `[batch, H, W, C]` spec.
fn input_size(metadata: &ModelMetadata) -> Option<(u32, u32)> {
  let spec = metadata.primary_input()?;
  match spec.dims.as_slice() {
    [_, Some(h), Some(w), _] => Some((*w as u32, *h as u32)),
    _ => None,
  }
}

/// Shared frame handling of the image tasks.
fn preprocess_image(
  config: &ImagePreprocessConfig,
  input: &VisionValue,
  ctx: &TaskContext<'_>,
) -> Result<Preprocessed> {
  match input {
    VisionValue::Tensors(tensors) => Ok(Preprocessed::tensors(tensors.clone())),
    VisionValue::Frame(frame) => {
      let mut config = config.clone();
      if config.resize.is_none() {
        config.resize = input_size(ctx.metadata);
      }
      let (tensor, transform) = from_image_with_transform(&**frame, &config)?;
      let name = ctx
        .metadata
        .primary_input()
        .map(|s| s.name.clone())
        .unwrap_or_else(|| DEFAULT_INPUT_NAME.to_string());
      let mut tensors = NamedTensors::new();
      tensors.insert(name, tensor);
      Ok(Preprocessed {
        tensors,
        transform: Some(transform),
      })
    }
    other => Err(unsupported("frame or tensors", other)),
  }
}

/// The declared primary output, or the first output when none is declared.
fn primary_output<'a>(outputs: &'a NamedTensors, metadata: &ModelMetadata) -> Result<&'a Tensor> {
  let declared = metadata
    .primary_output()
    .and_then(|spec| outputs.get(&spec.name));
  declared
    .or_else(|| outputs.values().next())
    .ok_or_else(|| MlError::inference("backend returned no outputs"))
}

/// Forwards tensors in both directions.
#[derive(Debug, Clone, Default)]
pub struct TensorTask;

impl ModelTask for TensorTask {
  fn name(&self) -> &str {
    "tensor"
  }

  fn output_kind(&self) -> ValueKind {
    ValueKind::Tensors
  }

  fn preprocess(&self, input: &VisionValue, _ctx: &TaskContext<'_>) -> Result<Preprocessed> {
    match input {
      VisionValue::Tensors(tensors) => Ok(Preprocessed::tensors(tensors.clone())),
      other => Err(unsupported("tensors", other)),
    }
  }

  fn postprocess(
    &self,
    outputs: &NamedTensors,
    _ctx: &TaskContext<'_>,
    _transform: Option<&ImageTransform>,
  ) -> Result<VisionValue> {
    Ok(VisionValue::Tensors(outputs.clone()))
  }
}

/// Object detection with boxes mapped back onto the source frame.
#[derive(Debug, Clone, Default)]
pub struct DetectionTask {
  /// Frame-to-tensor conversion.
  pub preprocess: ImagePreprocessConfig,
  /// Parser defaults; per-call [`PredictOptions`] override them.
  pub options: DetectionOptions,
}

impl DetectionTask {
  /// A detector with the given parser defaults.
  pub fn new(options: DetectionOptions) -> Self {
    Self {
      preprocess: ImagePreprocessConfig::default(),
      options,
    }
  }

  /// Sets frame preprocessing.
  pub fn with_preprocess(mut self, config: ImagePreprocessConfig) -> Self {
    self.preprocess = config;
    self
  }
}

impl ModelTask for DetectionTask {
  fn name(&self) -> &str {
    "detection"
  }

  fn output_kind(&self) -> ValueKind {
    ValueKind::Detections
  }

  fn preprocess(&self, input: &VisionValue, ctx: &TaskContext<'_>) -> Result<Preprocessed> {
    preprocess_image(&self.preprocess, input, ctx)
  }

  fn postprocess(
    &self,
    outputs: &NamedTensors,
    ctx: &TaskContext<'_>,
    transform: Option<&ImageTransform>,
  ) -> Result<VisionValue> {
    let mut options = self.options.clone();
    if let Some(t) = ctx.options.score_threshold {
      options.score_threshold = t;
    }
    if let Some(t) = ctx.options.iou_threshold {
      options.iou_threshold = t;
    }
    if let Some(max) = ctx.options.max_results {
      options.max_detections = Some(max);
    }
    if options.labels.is_none() {
      options.labels = ctx.metadata.labels.clone();
    }
    if let Some(t) = transform {
      options.input_width = t.target_width();
      options.input_height = t.target_height();
    }

    let boxes = parse_detections(primary_output(outputs, ctx.metadata)?, &options)?;
    let boxes = match transform {
      Some(t) => boxes.iter().map(|b| b.to_source(t)).collect(),
      None => boxes,
    };
    Ok(VisionValue::Detections(boxes))
  }
}

/// Image classification.
#[derive(Debug, Clone, Default)]
pub struct ClassificationTask {
  /// Frame-to-tensor conversion.
  pub preprocess: ImagePreprocessConfig,
  /// Parser defaults; `top_k` is overridable per call.
  pub options: ClassificationOptions,
}

impl ClassificationTask {
  /// A classifier with the given parser defaults.
  pub fn new(options: ClassificationOptions) -> Self {
    Self {
      preprocess: ImagePreprocessConfig::default(),
      options,
    }
  }

  /// Sets frame preprocessing.
  pub fn with_preprocess(mut self, config: ImagePreprocessConfig) -> Self {
    self.preprocess = config;
    self
  }
}

impl ModelTask for ClassificationTask {
  fn name(&self) -> &str {
    "classification"
  }

  fn output_kind(&self) -> ValueKind {
    ValueKind::Classifications
  }

  fn preprocess(&self, input: &VisionValue, ctx: &TaskContext<'_>) -> Result<Preprocessed> {
    preprocess_image(&self.preprocess, input, ctx)
  }

  fn postprocess(
    &self,
    outputs: &NamedTensors,
    ctx: &TaskContext<'_>,
    _transform: Option<&ImageTransform>,
  ) -> Result<VisionValue> {
    let mut options = self.options.clone();
    if let Some(k) = ctx.options.top_k.or(ctx.options.max_results) {
      options.top_k = k;
    }
    if options.labels.is_none() {
      options.labels = ctx.metadata.labels.clone();
    }
    let classes = parse_classification(primary_output(outputs, ctx.metadata)?, &options)?;
    Ok(VisionValue::Classifications(classes))
  }
}

fn landmark_options(base: &LandmarkOptions, ctx: &TaskContext<'_>) -> LandmarkOptions {
  let mut options = base.clone();
  if let Some(t) = ctx.options.score_threshold {
    options.visibility_threshold = t;
  }
  options
}

/// Body pose keypoints.
#[derive(Debug, Clone)]
pub struct PoseLandmarkTask {
  /// Frame-to-tensor conversion.
  pub preprocess: ImagePreprocessConfig,
  /// Parser defaults; `score_threshold` overrides the visibility threshold.
  pub options: LandmarkOptions,
}

impl Default for PoseLandmarkTask {
  fn default() -> Self {
    Self {
      preprocess: ImagePreprocessConfig::default(),
      options: LandmarkOptions::pose(),
    }
  }
}

impl ModelTask for PoseLandmarkTask {
  fn name(&self) -> &str {
    "pose_landmarks"
  }

  fn output_kind(&self) -> ValueKind {
    ValueKind::Landmarks
  }

  fn preprocess(&self, input: &VisionValue, ctx: &TaskContext<'_>) -> Result<Preprocessed> {
    preprocess_image(&self.preprocess, input, ctx)
  }

  fn postprocess(
    &self,
    outputs: &NamedTensors,
    ctx: &TaskContext<'_>,
    _transform: Option<&ImageTransform>,
  ) -> Result<VisionValue> {
    let options = landmark_options(&self.options, ctx);
    let landmarks = parse_pose_landmarks(primary_output(outputs, ctx.metadata)?, &options)?;
    Ok(VisionValue::Landmarks(landmarks))
  }
}

/// The 21-point hand skeleton.
#[derive(Debug, Clone)]
pub struct HandLandmarkTask {
  /// Frame-to-tensor conversion.
  pub preprocess: ImagePreprocessConfig,
  /// Parser defaults; visibility is not filtered unless overridden.
  pub options: LandmarkOptions,
}

impl Default for HandLandmarkTask {
  fn default() -> Self {
    Self {
      preprocess: ImagePreprocessConfig::default(),
      options: LandmarkOptions::hand(),
    }
  }
}

impl ModelTask for HandLandmarkTask {
  fn name(&self) -> &str {
    "hand_landmarks"
  }

  fn output_kind(&self) -> ValueKind {
    ValueKind::Landmarks
  }

  fn preprocess(&self, input: &VisionValue, ctx: &TaskContext<'_>) -> Result<Preprocessed> {
    preprocess_image(&self.preprocess, input, ctx)
  }

  fn postprocess(
    &self,
    outputs: &NamedTensors,
    ctx: &TaskContext<'_>,
    _transform: Option<&ImageTransform>,
  ) -> Result<VisionValue> {
    let options = landmark_options(&self.options, ctx);
    let landmarks = parse_hand_landmarks(primary_output(outputs, ctx.metadata)?, &options)?;
    Ok(VisionValue::Landmarks(landmarks))
  }
}

/// Semantic segmentation.
#[derive(Debug, Clone, Default)]
pub struct SegmentationTask {
  /// Frame-to-tensor conversion.
  pub preprocess: ImagePreprocessConfig,
  /// Output layout.
  pub options: SegmentationOptions,
}

impl ModelTask for SegmentationTask {
  fn name(&self) -> &str {
    "segmentation"
  }

  fn output_kind(&self) -> ValueKind {
    ValueKind::Segmentation
  }

  fn preprocess(&self, input: &VisionValue, ctx: &TaskContext<'_>) -> Result<Preprocessed> {
    preprocess_image(&self.preprocess, input, ctx)
  }

  fn postprocess(
    &self,
    outputs: &NamedTensors,
    ctx: &TaskContext<'_>,
    _transform: Option<&ImageTransform>,
  ) -> Result<VisionValue> {
    let mask = parse_segmentation_mask(primary_output(outputs, ctx.metadata)?, &self.options)?;
    Ok(VisionValue::Segmentation(mask))
  }
}
