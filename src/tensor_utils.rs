//! # Tensor Utilities
//!
//! Pure, stateless functions over [`Tensor`]: construction from pixel
//! sources, normalisation, reshaping, permutation, softmax, top-K, argmax and
//! the box geometry used by non-maximum suppression.
//!
//! None of these functions mutate their input. Each returns a freshly
//! allocated tensor or a plain value.
//!
//! ## Image tensors
//!
//! Images become `float32` tensors laid out as `[1, height, width, channels]`
//! with RGB channel order and values scaled to `[0, 1]` unless configured
//! otherwise through [`ImagePreprocessConfig`].

use crate::error::{MlError, Result};
use crate::pixels::{ColorSpace, ImageData, ImagePreprocessConfig, ImageTransform, PixelSource};
use crate::tensor::{DataType, Tensor, TensorData, element_count};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Creates a tensor from a typed buffer and dimensions.
pub fn create_tensor(data: impl Into<TensorData>, dims: Vec<usize>) -> Result<Tensor> {
  Tensor::new(data, dims)
}

/// Converts an RGBA frame into a `[1, H, W, 3]` RGB tensor.
///
/// With `normalize` set, byte values are divided by 255.
pub fn from_image_data(image: &ImageData, normalize: bool) -> Result<Tensor> {
  let config = ImagePreprocessConfig::new().with_scale_to_unit(normalize);
  from_image(image, &config)
}

/// Converts any pixel source into an image tensor according to `config`.
pub fn from_image<S: PixelSource + ?Sized>(
  source: &S,
  config: &ImagePreprocessConfig,
) -> Result<Tensor> {
  from_image_with_transform(source, config).map(|(tensor, _)| tensor)
}

/// Like [`from_image`], also returning the geometry needed to map
/// tensor-space coordinates back onto the source.
pub fn from_image_with_transform<S: PixelSource + ?Sized>(
  source: &S,
  config: &ImagePreprocessConfig,
) -> Result<(Tensor, ImageTransform)> {
  let (image, transform) = crate::pixels::prepare_image(source, config)?;
  let channels = config.color_space.channels();
  let scale = if config.scale_to_unit { 1.0 / 255.0 } else { 1.0 };
  let pixels = image.width() as usize * image.height() as usize;

  let mut data = Vec::with_capacity(pixels * channels);
  for px in image.data().chunks_exact(4) {
    let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
    match config.color_space {
      ColorSpace::Rgb => data.extend_from_slice(&[r * scale, g * scale, b * scale]),
      ColorSpace::Bgr => data.extend_from_slice(&[b * scale, g * scale, r * scale]),
      ColorSpace::Grayscale => data.push((0.299 * r + 0.587 * g + 0.114 * b) * scale),
    }
  }

  let dims = vec![1, image.height() as usize, image.width() as usize, channels];
  let tensor = Tensor::from_f32(data, dims)?;
  let tensor = match &config.normalize {
    Some(n) => normalize(&tensor, &n.mean, &n.std)?,
    None => tensor,
  };
  Ok((tensor, transform))
}

/// Converts a `[1, H, W, C]` or `[H, W, C]` tensor with values in `[0, 1]`
/// back to RGBA bytes. `C` must be 1 or 3.
pub fn to_image_data(tensor: &Tensor) -> Result<ImageData> {
  let dims = match tensor.dims() {
    [1, h, w, c] | [h, w, c] => [*h, *w, *c],
    other => {
      return Err(MlError::shape(format!(
        "expected [1, H, W, C] or [H, W, C], got {:?}",
        other
      )));
    }
  };
  let [h, w, c] = dims;
  if c != 1 && c != 3 {
    return Err(MlError::shape(format!("expected 1 or 3 channels, got {}", c)));
  }
  let values = tensor.values();
  let to_byte = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
  let mut rgba = Vec::with_capacity(h * w * 4);
  for px in values.chunks_exact(c) {
    if c == 1 {
      let v = to_byte(px[0]);
      rgba.extend_from_slice(&[v, v, v, 255]);
    } else {
      rgba.extend_from_slice(&[to_byte(px[0]), to_byte(px[1]), to_byte(px[2]), 255]);
    }
  }
  ImageData::new(w as u32, h as u32, rgba)
}

/// Per-channel `(x - mean[c]) / std[c]` where `c = i % mean.len()`.
pub fn normalize(tensor: &Tensor, mean: &[f32], std: &[f32]) -> Result<Tensor> {
  if mean.is_empty() || mean.len() != std.len() {
    return Err(MlError::invalid_argument(format!(
      "mean ({}) and std ({}) must be non-empty and of equal length",
      mean.len(),
      std.len()
    )));
  }
  if std.iter().any(|&s| s == 0.0) {
    return Err(MlError::invalid_argument("std must not contain zero"));
  }
  let stride = mean.len();
  if tensor.size() % stride != 0 {
    return Err(MlError::shape(format!(
      "{} elements are not divisible into {} channels",
      tensor.size(),
      stride
    )));
  }
  let data: Vec<f32> = tensor
    .values()
    .iter()
    .enumerate()
    .map(|(i, &x)| {
      let c = i % stride;
      (x - mean[c]) / std[c]
    })
    .collect();
  Tensor::from_f32(data, tensor.dims().to_vec())
}

/// Reinterprets the buffer under `dims`; the element count must match.
pub fn reshape(tensor: &Tensor, dims: &[usize]) -> Result<Tensor> {
  if element_count(dims) != tensor.size() {
    return Err(MlError::shape(format!(
      "cannot reshape {} elements {:?} into {:?}",
      tensor.size(),
      tensor.dims(),
      dims
    )));
  }
  tensor.with_dims(dims.to_vec())
}

/// Inserts a size-1 axis at `axis`.
pub fn expand_dims(tensor: &Tensor, axis: usize) -> Result<Tensor> {
  if axis > tensor.rank() {
    return Err(MlError::invalid_argument(format!(
      "axis {} out of range for rank {}",
      axis,
      tensor.rank()
    )));
  }
  let mut dims = tensor.dims().to_vec();
  dims.insert(axis, 1);
  tensor.with_dims(dims)
}

/// Removes size-1 axes: only `axis` when given, otherwise all of them.
pub fn squeeze(tensor: &Tensor, axis: Option<usize>) -> Result<Tensor> {
  let dims: Vec<usize> = match axis {
    Some(a) => {
      if tensor.dims().get(a) != Some(&1) {
        return Err(MlError::invalid_argument(format!(
          "axis {} of {:?} is not of size 1",
          a,
          tensor.dims()
        )));
      }
      let mut d = tensor.dims().to_vec();
      d.remove(a);
      d
    }
    None => tensor.dims().iter().copied().filter(|&d| d != 1).collect(),
  };
  tensor.with_dims(dims)
}

/// Inverse of a permutation: `inverse[perm[i]] = i`.
pub fn inverse_permutation(perm: &[usize]) -> Vec<usize> {
  let mut inverse = vec![0; perm.len()];
  for (i, &p) in perm.iter().enumerate() {
    if p < inverse.len() {
      inverse[p] = i;
    }
  }
  inverse
}

/// General N-dimensional transpose: output axis `i` is input axis `perm[i]`.
pub fn transpose(tensor: &Tensor, perm: &[usize]) -> Result<Tensor> {
  let dims = tensor.dims();
  let rank = dims.len();
  if perm.len() != rank {
    return Err(MlError::shape(format!(
      "permutation {:?} does not match rank {}",
      perm, rank
    )));
  }
  let mut seen = vec![false; rank];
  for &p in perm {
    if p >= rank || seen[p] {
      return Err(MlError::invalid_argument(format!(
        "{:?} is not a permutation of 0..{}",
        perm, rank
      )));
    }
    seen[p] = true;
  }

  let in_strides = strides(dims);
  let out_dims: Vec<usize> = perm.iter().map(|&p| dims[p]).collect();
  let out_strides_in: Vec<usize> = perm.iter().map(|&p| in_strides[p]).collect();
  let total = tensor.size();

  let mut indices = Vec::with_capacity(total);
  let mut coord = vec![0usize; rank];
  for _ in 0..total {
    let src: usize = coord
      .iter()
      .zip(&out_strides_in)
      .map(|(c, s)| c * s)
      .sum();
    indices.push(src);
    // Odometer increment over the output coordinate.
    for axis in (0..rank).rev() {
      coord[axis] += 1;
      if coord[axis] < out_dims[axis] {
        break;
      }
      coord[axis] = 0;
    }
  }

  let data = tensor.data().gather(&indices);
  let mut out = Tensor::new(data, out_dims)?;
  if let Some(name) = tensor.name() {
    out = out.with_name(name);
  }
  Ok(out)
}

fn strides(dims: &[usize]) -> Vec<usize> {
  let mut strides = vec![1; dims.len()];
  for i in (0..dims.len().saturating_sub(1)).rev() {
    strides[i] = strides[i + 1] * dims[i + 1];
  }
  strides
}

/// Numerically stable softmax over a slice.
pub fn softmax_slice(values: &[f32]) -> Vec<f32> {
  let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps: Vec<f32> = values.iter().map(|&v| (v - max).exp()).collect();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

/// Softmax over the whole buffer; the output is `float32` with the input's shape.
pub fn softmax(tensor: &Tensor) -> Result<Tensor> {
  if tensor.size() == 0 {
    return Err(MlError::invalid_argument("softmax of an empty tensor"));
  }
  Tensor::from_f32(softmax_slice(&tensor.values()), tensor.dims().to_vec())
}

/// Element-wise logistic function.
pub fn sigmoid(tensor: &Tensor) -> Result<Tensor> {
  let data = tensor
    .values()
    .iter()
    .map(|&x| 1.0 / (1.0 + (-x).exp()))
    .collect();
  Tensor::from_f32(data, tensor.dims().to_vec())
}

/// The `k` largest values of a tensor with their flat indices.
#[derive(Debug, Clone, PartialEq)]
pub struct TopK {
  /// Values in descending order.
  pub values: Vec<f32>,
  /// Flat indices matching `values`.
  pub indices: Vec<usize>,
}

/// Top-K over a slice, descending; equal values keep first-seen order.
pub fn top_k_slice(values: &[f32], k: usize) -> TopK {
  let mut order: Vec<usize> = (0..values.len()).collect();
  order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
  order.truncate(k.min(values.len()));
  TopK {
    values: order.iter().map(|&i| values[i]).collect(),
    indices: order,
  }
}

/// Top-K over the flat buffer of `tensor`.
pub fn top_k(tensor: &Tensor, k: usize) -> TopK {
  top_k_slice(&tensor.values(), k)
}

/// Index of the maximum of a slice; the first occurrence wins on ties.
pub fn argmax_slice(values: &[f32]) -> Option<usize> {
  let mut best: Option<(usize, f32)> = None;
  for (i, &v) in values.iter().enumerate() {
    match best {
      Some((_, b)) if v.partial_cmp(&b) != Some(Ordering::Greater) => {}
      _ => best = Some((i, v)),
    }
  }
  best.map(|(i, _)| i)
}

/// Index of the maximum of the flat buffer.
pub fn argmax(tensor: &Tensor) -> Result<usize> {
  argmax_slice(&tensor.values()).ok_or_else(|| MlError::invalid_argument("argmax of an empty tensor"))
}

/// Axis-aligned rectangle in corner-plus-size form.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
  /// Left edge.
  pub x: f32,
  /// Top edge.
  pub y: f32,
  /// Width.
  pub width: f32,
  /// Height.
  pub height: f32,
}

impl Rect {
  /// Creates a rectangle.
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// Builds a rectangle from a centre point and size.
  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
  }

  /// Area, zero for degenerate rectangles.
  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }
}

/// Intersection over union of two rectangles; 0 when the union is empty.
pub fn iou(a: &Rect, b: &Rect) -> f32 {
  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = (a.x + a.width).min(b.x + b.width);
  let y2 = (a.y + a.height).min(b.y + b.height);
  let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// Greedy non-maximum suppression.
///
/// Boxes scoring below `score_threshold` are dropped; the rest are visited in
/// descending score order and each selected box suppresses every later box
/// whose IoU with it exceeds `iou_threshold`. Returns indices into `boxes` in
/// selection order.
pub fn nms(
  boxes: &[Rect],
  scores: &[f32],
  iou_threshold: f32,
  score_threshold: f32,
) -> Result<Vec<usize>> {
  if boxes.len() != scores.len() {
    return Err(MlError::invalid_argument(format!(
      "{} boxes but {} scores",
      boxes.len(),
      scores.len()
    )));
  }
  let mut candidates: Vec<usize> = (0..boxes.len())
    .filter(|&i| scores[i] >= score_threshold)
    .collect();
  candidates.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

  let mut suppressed = vec![false; candidates.len()];
  let mut selected = Vec::new();
  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    let current = candidates[i];
    selected.push(current);
    for j in (i + 1)..candidates.len() {
      if !suppressed[j] && iou(&boxes[current], &boxes[candidates[j]]) > iou_threshold {
        suppressed[j] = true;
      }
    }
  }
  Ok(selected)
}

/// A zero-filled tensor matching `dims`, where `None` (dynamic) becomes 1.
pub fn dummy_input(dims: &[Option<usize>], data_type: DataType) -> Tensor {
  let dims = dims.iter().map(|d| d.unwrap_or(1)).collect();
  Tensor::zeros(dims, data_type)
}
