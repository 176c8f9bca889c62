use super::topology::{
  HAND_LANDMARK_COUNT, POSE_LANDMARK_COUNT, hand_landmark_name, pose_landmark_name,
};
use super::{BoundingBox, ClassificationResult, Landmark, SegmentationMask};
use crate::error::{MlError, Result};
use crate::tensor::Tensor;
use crate::tensor_utils::{Rect, argmax_slice, nms, softmax_slice, top_k_slice};
use serde::{Deserialize, Serialize};

/// Options for [`parse_detections`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionOptions {
  /// Minimum objectness and final confidence.
  pub score_threshold: f32,
  /// NMS overlap threshold; `>= 1.0` disables NMS.
  pub iou_threshold: f32,
  /// Width that normalised coordinates are scaled by.
  pub input_width: f32,
  /// Height that normalised coordinates are scaled by.
  pub input_height: f32,
  /// Class labels; `class_{index}` is used when absent.
  pub labels: Option<Vec<String>>,
  /// Cap on returned boxes, highest confidence first.
  pub max_detections: Option<usize>,
}

impl Default for DetectionOptions {
  fn default() -> Self {
    Self {
      score_threshold: 0.5,
      iou_threshold: 0.45,
      input_width: 640.0,
      input_height: 640.0,
      labels: None,
      max_detections: None,
    }
  }
}

impl DetectionOptions {
  /// Defaults scaled to a `width` x `height` input.
  pub fn new(input_width: f32, input_height: f32) -> Self {
    Self {
      input_width,
      input_height,
      ..Self::default()
    }
  }

  /// Sets the score threshold.
  pub fn with_score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  /// Sets the NMS IoU threshold.
  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  /// Sets class labels.
  pub fn with_labels(mut self, labels: Vec<String>) -> Self {
    self.labels = Some(labels);
    self
  }

  /// Caps the number of boxes.
  pub fn with_max_detections(mut self, max: usize) -> Self {
    self.max_detections = Some(max);
    self
  }
}

fn label_for(labels: Option<&[String]>, index: usize) -> String {
  labels
    .and_then(|l| l.get(index).cloned())
    .unwrap_or_else(|| format!("class_{index}"))
}

/// Parses `[batch, N, 5 + C]` (or `[N, 5 + C]`) detection rows of batch 0.
///
/// Each row is `[cx, cy, w, h, objectness, class_0..class_C]` with
/// coordinates normalised to `[0, 1]`.
pub fn parse_detections(tensor: &Tensor, options: &DetectionOptions) -> Result<Vec<BoundingBox>> {
  let (rows, stride) = match tensor.dims() {
    [_, n, s] | [n, s] => (*n, *s),
    other => {
      return Err(MlError::shape(format!(
        "detections must be [batch, N, 5 + classes] or [N, 5 + classes], got {:?}",
        other
      )));
    }
  };
  if stride < 6 {
    return Err(MlError::shape(format!(
      "detection rows need at least 6 values, got {}",
      stride
    )));
  }

  let values = tensor.values();
  let labels = options.labels.as_deref();
  let mut boxes = Vec::new();

  for row in values.chunks_exact(stride).take(rows) {
    let objectness = row[4];
    if objectness < options.score_threshold {
      continue;
    }
    let class_scores = &row[5..];
    let Some(best) = argmax_slice(class_scores) else {
      continue;
    };
    let confidence = objectness * class_scores[best];
    if confidence < options.score_threshold {
      continue;
    }
    let rect = Rect::from_center(
      row[0] * options.input_width,
      row[1] * options.input_height,
      row[2] * options.input_width,
      row[3] * options.input_height,
    );
    boxes.push(BoundingBox {
      x: rect.x,
      y: rect.y,
      width: rect.width,
      height: rect.height,
      label: label_for(labels, best),
      label_index: best,
      confidence,
    });
  }

  let mut boxes = if options.iou_threshold < 1.0 {
    let rects: Vec<Rect> = boxes.iter().map(BoundingBox::rect).collect();
    let scores: Vec<f32> = boxes.iter().map(|b| b.confidence).collect();
    let keep = nms(&rects, &scores, options.iou_threshold, options.score_threshold)?;
    keep.into_iter().map(|i| boxes[i].clone()).collect()
  } else {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    boxes
  };

  if let Some(max) = options.max_detections {
    boxes.truncate(max);
  }
  Ok(boxes)
}

/// Options for [`parse_classification`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationOptions {
  /// Number of classes returned.
  pub top_k: usize,
  /// Apply softmax to raw logits first.
  pub apply_softmax: bool,
  /// Class labels; `class_{index}` is used when absent.
  pub labels: Option<Vec<String>>,
}

impl Default for ClassificationOptions {
  fn default() -> Self {
    Self {
      top_k: 5,
      apply_softmax: true,
      labels: None,
    }
  }
}

impl ClassificationOptions {
  /// Sets K.
  pub fn with_top_k(mut self, k: usize) -> Self {
    self.top_k = k;
    self
  }

  /// Enables or disables softmax.
  pub fn with_softmax(mut self, apply: bool) -> Self {
    self.apply_softmax = apply;
    self
  }

  /// Sets class labels.
  pub fn with_labels(mut self, labels: Vec<String>) -> Self {
    self.labels = Some(labels);
    self
  }
}

/// Top-K classes of a score tensor, highest first.
pub fn parse_classification(
  tensor: &Tensor,
  options: &ClassificationOptions,
) -> Result<Vec<ClassificationResult>> {
  if tensor.size() == 0 {
    return Err(MlError::shape("classification output is empty"));
  }
  let values = tensor.values();
  let scores = if options.apply_softmax {
    softmax_slice(&values)
  } else {
    values.into_owned()
  };
  let top = top_k_slice(&scores, options.top_k);
  let labels = options.labels.as_deref();
  Ok(
    top
      .indices
      .iter()
      .zip(&top.values)
      .map(|(&index, &confidence)| ClassificationResult {
        label: label_for(labels, index),
        index,
        confidence,
      })
      .collect(),
  )
}

/// Options for the landmark parsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkOptions {
  /// Landmarks with visibility below this are dropped.
  pub visibility_threshold: f32,
  /// When set, `x` and `y` are divided by `(width, height)`.
  pub input_size: Option<(f32, f32)>,
}

impl Default for LandmarkOptions {
  fn default() -> Self {
    Self::pose()
  }
}

impl LandmarkOptions {
  /// Pose defaults: drop landmarks with visibility below 0.5.
  pub fn pose() -> Self {
    Self {
      visibility_threshold: 0.5,
      input_size: None,
    }
  }

  /// Hand defaults: keep every landmark.
  pub fn hand() -> Self {
    Self {
      visibility_threshold: 0.0,
      input_size: None,
    }
  }

  /// Sets the visibility threshold.
  pub fn with_visibility_threshold(mut self, threshold: f32) -> Self {
    self.visibility_threshold = threshold;
    self
  }

  /// Normalises coordinates by the model input size.
  pub fn with_input_size(mut self, width: f32, height: f32) -> Self {
    self.input_size = Some((width, height));
    self
  }
}

fn build_landmarks(
  values: &[f32],
  stride: usize,
  count: usize,
  options: &LandmarkOptions,
  name_of: fn(usize) -> Option<&'static str>,
) -> Vec<Landmark> {
  let (sx, sy) = options.input_size.unwrap_or((1.0, 1.0));
  values
    .chunks_exact(stride)
    .take(count)
    .enumerate()
    .filter_map(|(index, p)| {
      let visibility = if stride >= 4 { p[3] } else { 1.0 };
      if visibility < options.visibility_threshold {
        return None;
      }
      Some(Landmark {
        index,
        name: name_of(index).map(str::to_string),
        x: p[0] / sx,
        y: p[1] / sy,
        z: if stride >= 3 { p[2] } else { 0.0 },
        visibility,
      })
    })
    .collect()
}

/// Body landmarks laid out as `[x, y, z, visibility]` per point.
///
/// Names are attached when the model emits the 33-point body topology.
pub fn parse_pose_landmarks(tensor: &Tensor, options: &LandmarkOptions) -> Result<Vec<Landmark>> {
  let len = tensor.size();
  if len == 0 || len % 4 != 0 {
    return Err(MlError::shape(format!(
      "pose landmarks need a multiple of 4 values, got {}",
      len
    )));
  }
  let count = len / 4;
  let name_of: fn(usize) -> Option<&'static str> = if count == POSE_LANDMARK_COUNT {
    pose_landmark_name
  } else {
    |_| None
  };
  Ok(build_landmarks(&tensor.values(), 4, count, options, name_of))
}

/// The 21 hand landmarks, as `[x, y, z]` or `[x, y, z, visibility]` per point.
///
/// Without a visibility column every landmark has visibility 1.
pub fn parse_hand_landmarks(tensor: &Tensor, options: &LandmarkOptions) -> Result<Vec<Landmark>> {
  let len = tensor.size();
  let stride = match len {
    n if n == HAND_LANDMARK_COUNT * 3 => 3,
    n if n == HAND_LANDMARK_COUNT * 4 => 4,
    n => {
      return Err(MlError::shape(format!(
        "hand landmarks need {} or {} values, got {}",
        HAND_LANDMARK_COUNT * 3,
        HAND_LANDMARK_COUNT * 4,
        n
      )));
    }
  };
  Ok(build_landmarks(
    &tensor.values(),
    stride,
    HAND_LANDMARK_COUNT,
    options,
    hand_landmark_name,
  ))
}

/// Where the class axis sits in a segmentation output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
  /// `[1, H, W, C]` or `[H, W, C]`.
  #[default]
  Last,
  /// `[1, C, H, W]` or `[C, H, W]`.
  First,
}

/// Options for [`parse_segmentation_mask`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationOptions {
  /// Class axis position.
  pub layout: ChannelLayout,
}

/// Per-pixel argmax across the class axis.
///
/// A single-channel output is read as a foreground probability map and
/// thresholded at 0.5 into classes 0 and 1.
pub fn parse_segmentation_mask(
  tensor: &Tensor,
  options: &SegmentationOptions,
) -> Result<SegmentationMask> {
  let (h, w, c) = match (options.layout, tensor.dims()) {
    (ChannelLayout::Last, [1, h, w, c] | [h, w, c]) => (*h, *w, *c),
    (ChannelLayout::First, [1, c, h, w] | [c, h, w]) => (*h, *w, *c),
    (layout, other) => {
      return Err(MlError::shape(format!(
        "segmentation output {:?} does not match channel layout {:?}",
        other, layout
      )));
    }
  };
  if c == 0 || c > 256 {
    return Err(MlError::shape(format!(
      "segmentation needs 1..=256 classes, got {}",
      c
    )));
  }

  let values = tensor.values();
  let pixels = h * w;
  let mut data = Vec::with_capacity(pixels);
  let mut scores = vec![0.0f32; c];
  for p in 0..pixels {
    for (k, score) in scores.iter_mut().enumerate() {
      *score = match options.layout {
        ChannelLayout::Last => values[p * c + k],
        ChannelLayout::First => values[k * pixels + p],
      };
    }
    let class = if c == 1 {
      u8::from(scores[0] >= 0.5)
    } else {
      argmax_slice(&scores).unwrap_or(0) as u8
    };
    data.push(class);
  }

  Ok(SegmentationMask {
    width: w,
    height: h,
    data,
    num_classes: c.max(2),
  })
}
