//! Tagged values flowing into and out of models and pipeline stages.
//!
//! Each [`crate::tasks::ModelTask`] declares the [`ValueKind`] it produces, so
//! a pipeline can check stage-to-stage data flow without downcasting.

use crate::pixels::ImageData;
use crate::tensor::NamedTensors;
use crate::vision::{BoundingBox, ClassificationResult, Landmark, SegmentationMask};
use std::fmt;
use std::sync::Arc;

/// Discriminant of [`VisionValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
  /// An RGBA frame.
  Frame,
  /// Raw named tensors.
  Tensors,
  /// Detection boxes.
  Detections,
  /// Ranked classes.
  Classifications,
  /// Keypoints.
  Landmarks,
  /// A class-id mask.
  Segmentation,
}

impl fmt::Display for ValueKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ValueKind::Frame => "frame",
      ValueKind::Tensors => "tensors",
      ValueKind::Detections => "detections",
      ValueKind::Classifications => "classifications",
      ValueKind::Landmarks => "landmarks",
      ValueKind::Segmentation => "segmentation",
    };
    f.write_str(s)
  }
}

/// Input to, or parsed output of, a model.
#[derive(Debug, Clone)]
pub enum VisionValue {
  /// A frame, shared cheaply between stages.
  Frame(Arc<ImageData>),
  /// Tensors fed to or read from a backend unchanged.
  Tensors(NamedTensors),
  /// Detection boxes.
  Detections(Vec<BoundingBox>),
  /// Ranked classes.
  Classifications(Vec<ClassificationResult>),
  /// Keypoints.
  Landmarks(Vec<Landmark>),
  /// A class-id mask.
  Segmentation(SegmentationMask),
}

impl VisionValue {
  /// The variant of this value.
  pub fn kind(&self) -> ValueKind {
    match self {
      VisionValue::Frame(_) => ValueKind::Frame,
      VisionValue::Tensors(_) => ValueKind::Tensors,
      VisionValue::Detections(_) => ValueKind::Detections,
      VisionValue::Classifications(_) => ValueKind::Classifications,
      VisionValue::Landmarks(_) => ValueKind::Landmarks,
      VisionValue::Segmentation(_) => ValueKind::Segmentation,
    }
  }

  /// The frame, if this is one.
  pub fn as_frame(&self) -> Option<&ImageData> {
    match self {
      VisionValue::Frame(f) => Some(f),
      _ => None,
    }
  }

  /// The tensors, if this is a tensor map.
  pub fn as_tensors(&self) -> Option<&NamedTensors> {
    match self {
      VisionValue::Tensors(t) => Some(t),
      _ => None,
    }
  }

  /// The boxes, if these are detections.
  pub fn as_detections(&self) -> Option<&[BoundingBox]> {
    match self {
      VisionValue::Detections(d) => Some(d),
      _ => None,
    }
  }

  /// The classes, if this is a classification.
  pub fn as_classifications(&self) -> Option<&[ClassificationResult]> {
    match self {
      VisionValue::Classifications(c) => Some(c),
      _ => None,
    }
  }

  /// The keypoints, if these are landmarks.
  pub fn as_landmarks(&self) -> Option<&[Landmark]> {
    match self {
      VisionValue::Landmarks(l) => Some(l),
      _ => None,
    }
  }

  /// The mask, if this is a segmentation.
  pub fn as_segmentation(&self) -> Option<&SegmentationMask> {
    match self {
      VisionValue::Segmentation(m) => Some(m),
      _ => None,
    }
  }
}

impl From<ImageData> for VisionValue {
  fn from(frame: ImageData) -> Self {
    VisionValue::Frame(Arc::new(frame))
  }
}

impl From<Arc<ImageData>> for VisionValue {
  fn from(frame: Arc<ImageData>) -> Self {
    VisionValue::Frame(frame)
  }
}

impl From<NamedTensors> for VisionValue {
  fn from(tensors: NamedTensors) -> Self {
    VisionValue::Tensors(tensors)
  }
}

impl From<Vec<BoundingBox>> for VisionValue {
  fn from(boxes: Vec<BoundingBox>) -> Self {
    VisionValue::Detections(boxes)
  }
}

impl From<Vec<ClassificationResult>> for VisionValue {
  fn from(classes: Vec<ClassificationResult>) -> Self {
    VisionValue::Classifications(classes)
  }
}

impl From<Vec<Landmark>> for VisionValue {
  fn from(landmarks: Vec<Landmark>) -> Self {
    VisionValue::Landmarks(landmarks)
  }
}

impl From<SegmentationMask> for VisionValue {
  fn from(mask: SegmentationMask) -> Self {
    VisionValue::Segmentation(mask)
  }
}
