use super::{BoundingBox, Landmark};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// An immediate-mode 2D drawing surface.
///
/// Mirrors the small subset of a browser-style canvas context the overlay
/// helpers need. Hosts implement it over whatever they render with.
pub trait Canvas2d {
  /// Colour used by `stroke*` calls.
  fn set_stroke_style(&mut self, color: &str);
  /// Colour used by `fill*` calls.
  fn set_fill_style(&mut self, color: &str);
  /// Stroke width in pixels.
  fn set_line_width(&mut self, width: f32);
  /// CSS-style font string, e.g. `"16px sans-serif"`.
  fn set_font(&mut self, font: &str);
  /// Outlines a rectangle.
  fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32);
  /// Fills a rectangle.
  fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32);
  /// Draws text with its baseline at `y`.
  fn fill_text(&mut self, text: &str, x: f32, y: f32);
  /// Width of `text` in the current font.
  fn measure_text(&mut self, text: &str) -> f32;
  /// Starts a new path.
  fn begin_path(&mut self);
  /// Moves the pen.
  fn move_to(&mut self, x: f32, y: f32);
  /// Adds a line segment.
  fn line_to(&mut self, x: f32, y: f32);
  /// Adds a circular arc.
  fn arc(&mut self, x: f32, y: f32, radius: f32, start_angle: f32, end_angle: f32);
  /// Strokes the current path.
  fn stroke(&mut self);
  /// Fills the current path.
  fn fill(&mut self);
}

/// Appearance of detection overlays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawStyle {
  /// Box outline and label background colour.
  pub stroke_color: String,
  /// Box outline width.
  pub line_width: f32,
  /// Label font.
  pub font: String,
  /// Label font height in pixels, used to size the background.
  pub font_size: f32,
  /// Label text colour.
  pub text_color: String,
  /// Append the confidence percentage to the label.
  pub show_confidence: bool,
  /// Horizontal factor from box coordinates to canvas pixels.
  pub scale_x: f32,
  /// Vertical factor from box coordinates to canvas pixels.
  pub scale_y: f32,
}

impl Default for DrawStyle {
  fn default() -> Self {
    Self {
      stroke_color: "#00FF00".to_string(),
      line_width: 2.0,
      font: "16px sans-serif".to_string(),
      font_size: 16.0,
      text_color: "#000000".to_string(),
      show_confidence: true,
      scale_x: 1.0,
      scale_y: 1.0,
    }
  }
}

impl DrawStyle {
  /// Sets the box colour.
  pub fn with_color(mut self, color: impl Into<String>) -> Self {
    self.stroke_color = color.into();
    self
  }

  /// Sets the outline width.
  pub fn with_line_width(mut self, width: f32) -> Self {
    self.line_width = width;
    self
  }

  /// Sets the label font and its pixel height.
  pub fn with_font(mut self, font: impl Into<String>, size: f32) -> Self {
    self.font = font.into();
    self.font_size = size;
    self
  }

  /// Shows or hides the confidence suffix.
  pub fn with_confidence(mut self, show: bool) -> Self {
    self.show_confidence = show;
    self
  }

  /// Scales coordinates onto a canvas of a different size.
  pub fn with_scale(mut self, scale_x: f32, scale_y: f32) -> Self {
    self.scale_x = scale_x;
    self.scale_y = scale_y;
    self
  }
}

/// Appearance of landmark overlays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkStyle {
  /// Point fill colour.
  pub point_color: String,
  /// Point radius.
  pub point_radius: f32,
  /// Connection line colour.
  pub line_color: String,
  /// Connection line width.
  pub line_width: f32,
  /// Horizontal factor from landmark coordinates to canvas pixels.
  pub scale_x: f32,
  /// Vertical factor from landmark coordinates to canvas pixels.
  pub scale_y: f32,
}

impl Default for LandmarkStyle {
  fn default() -> Self {
    Self {
      point_color: "#FF0000".to_string(),
      point_radius: 3.0,
      line_color: "#00FF00".to_string(),
      line_width: 2.0,
      scale_x: 1.0,
      scale_y: 1.0,
    }
  }
}

impl LandmarkStyle {
  /// Sets the point colour and radius.
  pub fn with_points(mut self, color: impl Into<String>, radius: f32) -> Self {
    self.point_color = color.into();
    self.point_radius = radius;
    self
  }

  /// Sets the connection colour and width.
  pub fn with_lines(mut self, color: impl Into<String>, width: f32) -> Self {
    self.line_color = color.into();
    self.line_width = width;
    self
  }

  /// Scales normalised landmarks onto a canvas, typically its pixel size.
  pub fn with_scale(mut self, scale_x: f32, scale_y: f32) -> Self {
    self.scale_x = scale_x;
    self.scale_y = scale_y;
    self
  }
}

fn detection_label(detection: &BoundingBox, show_confidence: bool) -> String {
  if show_confidence {
    format!("{} {:.0}%", detection.label, detection.confidence * 100.0)
  } else {
    detection.label.clone()
  }
}

/// Draws each box outline with a filled label tab above its top-left corner.
pub fn draw_detections<C: Canvas2d + ?Sized>(ctx: &mut C, detections: &[BoundingBox], style: &DrawStyle) {
  ctx.set_line_width(style.line_width);
  ctx.set_font(&style.font);
  for detection in detections {
    let x = detection.x * style.scale_x;
    let y = detection.y * style.scale_y;
    let w = detection.width * style.scale_x;
    let h = detection.height * style.scale_y;

    ctx.set_stroke_style(&style.stroke_color);
    ctx.stroke_rect(x, y, w, h);

    let text = detection_label(detection, style.show_confidence);
    let text_width = ctx.measure_text(&text);
    let tab_height = style.font_size + 4.0;
    // Keep the tab on-canvas for boxes touching the top edge.
    let tab_y = if y >= tab_height { y - tab_height } else { y };

    ctx.set_fill_style(&style.stroke_color);
    ctx.fill_rect(x, tab_y, text_width + 4.0, tab_height);
    ctx.set_fill_style(&style.text_color);
    ctx.fill_text(&text, x + 2.0, tab_y + style.font_size);
  }
}

/// Draws skeleton connections first, then a dot per landmark.
///
/// Connections whose endpoints were filtered out are skipped.
pub fn draw_landmarks<C: Canvas2d + ?Sized>(
  ctx: &mut C,
  landmarks: &[Landmark],
  connections: &[(usize, usize)],
  style: &LandmarkStyle,
) {
  let find = |index: usize| landmarks.iter().find(|l| l.index == index);
  let px = |l: &Landmark| (l.x * style.scale_x, l.y * style.scale_y);

  if !connections.is_empty() {
    ctx.set_stroke_style(&style.line_color);
    ctx.set_line_width(style.line_width);
    for &(a, b) in connections {
      let (Some(a), Some(b)) = (find(a), find(b)) else {
        continue;
      };
      let (ax, ay) = px(a);
      let (bx, by) = px(b);
      ctx.begin_path();
      ctx.move_to(ax, ay);
      ctx.line_to(bx, by);
      ctx.stroke();
    }
  }

  ctx.set_fill_style(&style.point_color);
  for landmark in landmarks {
    let (x, y) = px(landmark);
    ctx.begin_path();
    ctx.arc(x, y, style.point_radius, 0.0, TAU);
    ctx.fill();
  }
}
