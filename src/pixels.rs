//! Pixel sources and image preprocessing geometry.
//!
//! A pixel source is anything with a width, a height and a way to hand out
//! raw RGBA bytes (a decoded video frame, a canvas snapshot, a still image).
//! Conversion to tensors lives in [`crate::tensor_utils`]; this module owns
//! the resize/pad steps and the [`ImageTransform`] that maps tensor-space
//! coordinates back to source pixels.

use crate::error::{MlError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// A source of RGBA pixels.
pub trait PixelSource {
  /// Width in pixels.
  fn width(&self) -> u32;
  /// Height in pixels.
  fn height(&self) -> u32;
  /// Row-major RGBA bytes, `width * height * 4` long.
  fn rgba(&self) -> Cow<'_, [u8]>;
}

/// An owned RGBA frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
  width: u32,
  height: u32,
  data: Vec<u8>,
}

impl ImageData {
  /// Wraps an RGBA buffer; the length must be `width * height * 4`.
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
    let expected = width as usize * height as usize * 4;
    if data.len() != expected {
      return Err(MlError::shape(format!(
        "RGBA buffer for {}x{} needs {} bytes, got {}",
        width,
        height,
        expected,
        data.len()
      )));
    }
    Ok(Self {
      width,
      height,
      data,
    })
  }

  /// A fully transparent black frame.
  pub fn blank(width: u32, height: u32) -> Self {
    Self {
      width,
      height,
      data: vec![0; width as usize * height as usize * 4],
    }
  }

  /// A frame filled with one opaque colour.
  pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for _ in 0..(width as usize * height as usize) {
      data.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
    }
    Self {
      width,
      height,
      data,
    }
  }

  /// Width in pixels.
  pub fn width(&self) -> u32 {
    self.width
  }

  /// Height in pixels.
  pub fn height(&self) -> u32 {
    self.height
  }

  /// Raw RGBA bytes.
  pub fn data(&self) -> &[u8] {
    &self.data
  }

  /// RGBA value at `(x, y)`.
  pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
    let i = (y as usize * self.width as usize + x as usize) * 4;
    [
      self.data[i],
      self.data[i + 1],
      self.data[i + 2],
      self.data[i + 3],
    ]
  }

  /// Overwrites the RGBA value at `(x, y)`.
  pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
    let i = (y as usize * self.width as usize + x as usize) * 4;
    self.data[i..i + 4].copy_from_slice(&rgba);
  }
}

impl PixelSource for ImageData {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn rgba(&self) -> Cow<'_, [u8]> {
    Cow::Borrowed(&self.data)
  }
}

/// Channel layout produced from an RGBA source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
  /// Red, green, blue.
  #[default]
  Rgb,
  /// Blue, green, red.
  Bgr,
  /// Single luma channel.
  Grayscale,
}

impl ColorSpace {
  /// Number of output channels.
  pub fn channels(&self) -> usize {
    match self {
      ColorSpace::Rgb | ColorSpace::Bgr => 3,
      ColorSpace::Grayscale => 1,
    }
  }
}

/// Per-channel mean/std normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeConfig {
  /// Per-channel mean.
  pub mean: Vec<f32>,
  /// Per-channel standard deviation.
  pub std: Vec<f32>,
}

impl NormalizeConfig {
  /// Creates a normalisation config.
  pub fn new(mean: Vec<f32>, std: Vec<f32>) -> Self {
    Self { mean, std }
  }

  /// ImageNet statistics for inputs already scaled to `[0, 1]`.
  pub fn imagenet() -> Self {
    Self {
      mean: vec![0.485, 0.456, 0.406],
      std: vec![0.229, 0.224, 0.225],
    }
  }
}

/// How a pixel source becomes a model input tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePreprocessConfig {
  /// Target `(width, height)`; `None` keeps the source size.
  pub resize: Option<(u32, u32)>,
  /// Optional per-channel normalisation applied after scaling.
  pub normalize: Option<NormalizeConfig>,
  /// Output channel layout.
  pub color_space: ColorSpace,
  /// Centre the source on a zero-filled square before resizing.
  pub pad_to_square: bool,
  /// Divide byte values by 255.
  pub scale_to_unit: bool,
}

impl Default for ImagePreprocessConfig {
  fn default() -> Self {
    Self {
      resize: None,
      normalize: None,
      color_space: ColorSpace::Rgb,
      pad_to_square: false,
      scale_to_unit: true,
    }
  }
}

impl ImagePreprocessConfig {
  /// Default config: RGB, scaled to `[0, 1]`, no resize.
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the target size.
  pub fn with_resize(mut self, width: u32, height: u32) -> Self {
    self.resize = Some((width, height));
    self
  }

  /// Sets per-channel normalisation.
  pub fn with_normalize(mut self, normalize: NormalizeConfig) -> Self {
    self.normalize = Some(normalize);
    self
  }

  /// Sets the output colour space.
  pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
    self.color_space = color_space;
    self
  }

  /// Enables or disables square padding.
  pub fn with_pad_to_square(mut self, pad: bool) -> Self {
    self.pad_to_square = pad;
    self
  }

  /// Enables or disables `/255` scaling.
  pub fn with_scale_to_unit(mut self, scale: bool) -> Self {
    self.scale_to_unit = scale;
    self
  }
}

/// Geometry linking tensor pixel coordinates to source pixel coordinates.
///
/// Padding is applied first (centring the source on a square), then the
/// padded canvas is resized to the tensor size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageTransform {
  /// Source width in pixels.
  pub source_width: u32,
  /// Source height in pixels.
  pub source_height: u32,
  /// Horizontal offset of the source inside the padded canvas.
  pub pad_x: f32,
  /// Vertical offset of the source inside the padded canvas.
  pub pad_y: f32,
  /// Tensor width divided by padded width.
  pub scale_x: f32,
  /// Tensor height divided by padded height.
  pub scale_y: f32,
  /// Width of the produced image, after padding and resizing.
  pub output_width: u32,
  /// Height of the produced image, after padding and resizing.
  pub output_height: u32,
}

impl ImageTransform {
  /// The transform of an untouched source.
  pub fn identity(width: u32, height: u32) -> Self {
    Self {
      source_width: width,
      source_height: height,
      pad_x: 0.0,
      pad_y: 0.0,
      scale_x: 1.0,
      scale_y: 1.0,
      output_width: width,
      output_height: height,
    }
  }

  /// Width of the tensor image.
  pub fn target_width(&self) -> f32 {
    self.output_width as f32
  }

  /// Height of the tensor image.
  pub fn target_height(&self) -> f32 {
    self.output_height as f32
  }

  /// Maps a point in tensor pixels to source pixels.
  pub fn to_source_point(&self, x: f32, y: f32) -> (f32, f32) {
    (x / self.scale_x - self.pad_x, y / self.scale_y - self.pad_y)
  }

  /// Maps an `(x, y, width, height)` rectangle in tensor pixels to source pixels.
  pub fn to_source_rect(&self, x: f32, y: f32, width: f32, height: f32) -> (f32, f32, f32, f32) {
    let (sx, sy) = self.to_source_point(x, y);
    (sx, sy, width / self.scale_x, height / self.scale_y)
  }
}

/// Centres `image` on a zero-filled square canvas.
///
/// Returns the padded image and the `(x, y)` offset of the original.
pub fn pad_to_square(image: &ImageData) -> (ImageData, u32, u32) {
  let side = image.width.max(image.height);
  let pad_x = (side - image.width) / 2;
  let pad_y = (side - image.height) / 2;
  if pad_x == 0 && pad_y == 0 {
    return (image.clone(), 0, 0);
  }
  let mut out = ImageData::blank(side, side);
  let row_bytes = image.width as usize * 4;
  for y in 0..image.height as usize {
    let src = y * row_bytes;
    let dst = ((y + pad_y as usize) * side as usize + pad_x as usize) * 4;
    out.data[dst..dst + row_bytes].copy_from_slice(&image.data[src..src + row_bytes]);
  }
  (out, pad_x, pad_y)
}

/// Bilinear resize with pixel-centre alignment.
pub fn resize_bilinear(image: &ImageData, width: u32, height: u32) -> Result<ImageData> {
  if width == 0 || height == 0 {
    return Err(MlError::invalid_argument(format!(
      "cannot resize to {}x{}",
      width, height
    )));
  }
  if image.width == 0 || image.height == 0 {
    return Err(MlError::invalid_argument("cannot resize an empty image"));
  }
  if image.width == width && image.height == height {
    return Ok(image.clone());
  }

  let sx = image.width as f32 / width as f32;
  let sy = image.height as f32 / height as f32;
  let max_x = (image.width - 1) as f32;
  let max_y = (image.height - 1) as f32;
  let mut out = ImageData::blank(width, height);

  for y in 0..height {
    let fy = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, max_y);
    let y0 = fy.floor() as u32;
    let y1 = (y0 + 1).min(image.height - 1);
    let wy = fy - y0 as f32;
    for x in 0..width {
      let fx = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, max_x);
      let x0 = fx.floor() as u32;
      let x1 = (x0 + 1).min(image.width - 1);
      let wx = fx - x0 as f32;

      let p00 = image.pixel(x0, y0);
      let p10 = image.pixel(x1, y0);
      let p01 = image.pixel(x0, y1);
      let p11 = image.pixel(x1, y1);
      let mut px = [0u8; 4];
      for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - wx) + p10[c] as f32 * wx;
        let bottom = p01[c] as f32 * (1.0 - wx) + p11[c] as f32 * wx;
        px[c] = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8;
      }
      out.set_pixel(x, y, px);
    }
  }
  Ok(out)
}

/// Applies the pad and resize steps of `config` to `source`.
pub fn prepare_image<S: PixelSource + ?Sized>(
  source: &S,
  config: &ImagePreprocessConfig,
) -> Result<(ImageData, ImageTransform)> {
  let image = ImageData::new(source.width(), source.height(), source.rgba().into_owned())?;
  let mut transform = ImageTransform::identity(image.width, image.height);

  let image = if config.pad_to_square {
    let (padded, pad_x, pad_y) = pad_to_square(&image);
    transform.pad_x = pad_x as f32;
    transform.pad_y = pad_y as f32;
    // An odd size difference leaves the extra pixel after the source.
    transform.output_width = padded.width;
    transform.output_height = padded.height;
    padded
  } else {
    image
  };

  let image = match config.resize {
    Some((w, h)) => {
      transform.scale_x = w as f32 / image.width as f32;
      transform.scale_y = h as f32 / image.height as f32;
      transform.output_width = w;
      transform.output_height = h;
      resize_bilinear(&image, w, h)?
    }
    None => image,
  };

  Ok((image, transform))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_image_data_rejects_bad_length() {
    assert!(ImageData::new(2, 2, vec![0; 15]).is_err());
  }

  #[test]
  fn test_pad_to_square_centres_source() {
    let img = ImageData::filled(4, 2, [255, 0, 0]);
    let (padded, px, py) = pad_to_square(&img);
    assert_eq!((padded.width(), padded.height()), (4, 4));
    assert_eq!((px, py), (0, 1));
    assert_eq!(padded.pixel(0, 0), [0, 0, 0, 0]);
    assert_eq!(padded.pixel(0, 1), [255, 0, 0, 255]);
    assert_eq!(padded.pixel(3, 2), [255, 0, 0, 255]);
    assert_eq!(padded.pixel(3, 3), [0, 0, 0, 0]);
  }

  #[test]
  fn test_resize_uniform_colour_is_preserved() {
    let img = ImageData::filled(8, 6, [10, 20, 30]);
    let out = resize_bilinear(&img, 3, 5).unwrap();
    assert_eq!((out.width(), out.height()), (3, 5));
    for y in 0..5 {
      for x in 0..3 {
        assert_eq!(out.pixel(x, y), [10, 20, 30, 255]);
      }
    }
  }

  #[test]
  fn test_resize_rejects_zero_target() {
    let img = ImageData::filled(2, 2, [0, 0, 0]);
    assert!(resize_bilinear(&img, 0, 2).is_err());
  }

  #[test]
  fn test_prepare_image_transform_round_trips_points() {
    let img = ImageData::filled(200, 100, [1, 2, 3]);
    let config = ImagePreprocessConfig::new()
      .with_pad_to_square(true)
      .with_resize(100, 100);
    let (out, t) = prepare_image(&img, &config).unwrap();
    assert_eq!((out.width(), out.height()), (100, 100));
    assert_eq!(t.pad_y, 50.0);
    assert_eq!(t.scale_x, 0.5);
    // Tensor point (50, 50) is the centre of the padded square, i.e. source (100, 50).
    assert_eq!(t.to_source_point(50.0, 50.0), (100.0, 50.0));
    assert_eq!(t.target_width(), 100.0);
  }

  #[test]
  fn test_prepare_image_odd_padding_keeps_full_canvas() {
    // 5x2 pads to 5x5 with one row above the source and two below.
    let img = ImageData::filled(5, 2, [1, 2, 3]);
    let config = ImagePreprocessConfig::new()
      .with_pad_to_square(true)
      .with_resize(100, 100);
    let (out, t) = prepare_image(&img, &config).unwrap();
    assert_eq!(t.pad_y, 1.0);
    assert_eq!(t.target_width(), out.width() as f32);
    assert_eq!(t.target_height(), out.height() as f32);
    assert_eq!(t.to_source_point(50.0, 50.0), (2.5, 1.5));

    let (padded, _) = prepare_image(&img, &ImagePreprocessConfig::new().with_pad_to_square(true)).unwrap();
    assert_eq!((padded.width(), padded.height()), (5, 5));
  }
}
