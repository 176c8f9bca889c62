//! # Vision Requests
//!
//! Stateless parsers that turn raw model output tensors into typed results,
//! plus overlay drawing helpers.
//!
//! - [`parse_detections`]: YOLO-style rows `[cx, cy, w, h, objectness, class_0..class_N]`
//!   with greedy NMS.
//! - [`parse_classification`]: optional softmax, then top-K with labels.
//! - [`parse_pose_landmarks`] / [`parse_hand_landmarks`]: keypoints with
//!   visibility filtering and named joints.
//! - [`parse_segmentation_mask`]: per-pixel argmax into a class-id mask.
//! - [`draw_detections`] / [`draw_landmarks`]: render onto any [`Canvas2d`].
//!
//! Result types are plain values recomputed for every frame.

mod draw;
mod parsers;
pub mod topology;

pub use draw::{Canvas2d, DrawStyle, LandmarkStyle, draw_detections, draw_landmarks};
pub use parsers::{
  ChannelLayout, ClassificationOptions, DetectionOptions, LandmarkOptions, SegmentationOptions,
  parse_classification, parse_detections, parse_hand_landmarks, parse_pose_landmarks,
  parse_segmentation_mask,
};

use crate::pixels::ImageTransform;
use crate::tensor_utils::Rect;
use serde::{Deserialize, Serialize};

/// A detected object in corner-plus-size pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  /// Left edge.
  pub x: f32,
  /// Top edge.
  pub y: f32,
  /// Box width.
  pub width: f32,
  /// Box height.
  pub height: f32,
  /// Class label.
  pub label: String,
  /// Class index.
  pub label_index: usize,
  /// `objectness * class score`.
  pub confidence: f32,
}

impl BoundingBox {
  /// Geometry of this box.
  pub fn rect(&self) -> Rect {
    Rect::new(self.x, self.y, self.width, self.height)
  }

  /// Centre point.
  pub fn center(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  /// The same detection in source-image pixels.
  pub fn to_source(&self, transform: &ImageTransform) -> BoundingBox {
    let (x, y, width, height) = transform.to_source_rect(self.x, self.y, self.width, self.height);
    BoundingBox {
      x,
      y,
      width,
      height,
      ..self.clone()
    }
  }
}

/// A labelled keypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
  /// Position in the model's landmark list.
  pub index: usize,
  /// Joint name when the topology is known.
  pub name: Option<String>,
  /// Horizontal position.
  pub x: f32,
  /// Vertical position.
  pub y: f32,
  /// Depth.
  pub z: f32,
  /// Visibility or presence score.
  pub visibility: f32,
}

/// One class of a classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
  /// Class label.
  pub label: String,
  /// Class index.
  pub index: usize,
  /// Score (probability when softmax was applied).
  pub confidence: f32,
}

/// Per-pixel class ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMask {
  /// Mask width.
  pub width: usize,
  /// Mask height.
  pub height: usize,
  /// Row-major class ids.
  pub data: Vec<u8>,
  /// Number of classes the model distinguishes.
  pub num_classes: usize,
}

impl SegmentationMask {
  /// Class id at `(x, y)`.
  pub fn class_at(&self, x: usize, y: usize) -> Option<u8> {
    if x >= self.width || y >= self.height {
      return None;
    }
    self.data.get(y * self.width + x).copied()
  }

  /// Fraction of pixels labelled `class_id`.
  pub fn coverage(&self, class_id: u8) -> f32 {
    if self.data.is_empty() {
      return 0.0;
    }
    let hits = self.data.iter().filter(|&&c| c == class_id).count();
    hits as f32 / self.data.len() as f32
  }
}
