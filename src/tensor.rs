//! # Tensor
//!
//! The fundamental data unit of the inference core: a typed, flat numeric
//! buffer plus a shape descriptor.
//!
//! Tensors are immutable by convention. Every transform in
//! [`crate::tensor_utils`] returns a new tensor and never rewrites its input.
//! The invariant `data.len() == product(dims)` is checked at construction and
//! cannot be broken afterwards because the fields are private.

use crate::error::{MlError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Tensors keyed by input/output name.
pub type NamedTensors = BTreeMap<String, Tensor>;

/// Element type of a tensor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
  /// 32-bit IEEE float.
  Float32,
  /// 32-bit signed integer.
  Int32,
  /// 8-bit unsigned integer.
  Uint8,
  /// 8-bit signed integer.
  Int8,
}

impl DataType {
  /// Size of one element in bytes.
  pub fn byte_size(&self) -> usize {
    match self {
      DataType::Float32 | DataType::Int32 => 4,
      DataType::Uint8 | DataType::Int8 => 1,
    }
  }
}

impl fmt::Display for DataType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      DataType::Float32 => "float32",
      DataType::Int32 => "int32",
      DataType::Uint8 => "uint8",
      DataType::Int8 => "int8",
    };
    f.write_str(s)
  }
}

/// Typed backing buffer of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  /// `float32` elements.
  Float32(Vec<f32>),
  /// `int32` elements.
  Int32(Vec<i32>),
  /// `uint8` elements.
  Uint8(Vec<u8>),
  /// `int8` elements.
  Int8(Vec<i8>),
}

impl TensorData {
  /// A zero-filled buffer of `len` elements.
  pub fn zeros(data_type: DataType, len: usize) -> Self {
    match data_type {
      DataType::Float32 => TensorData::Float32(vec![0.0; len]),
      DataType::Int32 => TensorData::Int32(vec![0; len]),
      DataType::Uint8 => TensorData::Uint8(vec![0; len]),
      DataType::Int8 => TensorData::Int8(vec![0; len]),
    }
  }

  /// Number of elements.
  pub fn len(&self) -> usize {
    match self {
      TensorData::Float32(v) => v.len(),
      TensorData::Int32(v) => v.len(),
      TensorData::Uint8(v) => v.len(),
      TensorData::Int8(v) => v.len(),
    }
  }

  /// Returns true if the buffer holds no elements.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Element type of this buffer.
  pub fn data_type(&self) -> DataType {
    match self {
      TensorData::Float32(_) => DataType::Float32,
      TensorData::Int32(_) => DataType::Int32,
      TensorData::Uint8(_) => DataType::Uint8,
      TensorData::Int8(_) => DataType::Int8,
    }
  }

  /// Values as `f32`, borrowing when the buffer already is `float32`.
  pub fn as_f32(&self) -> Cow<'_, [f32]> {
    match self {
      TensorData::Float32(v) => Cow::Borrowed(v.as_slice()),
      TensorData::Int32(v) => Cow::Owned(v.iter().map(|&x| x as f32).collect()),
      TensorData::Uint8(v) => Cow::Owned(v.iter().map(|&x| x as f32).collect()),
      TensorData::Int8(v) => Cow::Owned(v.iter().map(|&x| x as f32).collect()),
    }
  }

  /// Builds a new buffer of the same type by picking elements at `indices`.
  ///
  /// Callers guarantee every index is in bounds.
  pub(crate) fn gather(&self, indices: &[usize]) -> TensorData {
    match self {
      TensorData::Float32(v) => TensorData::Float32(indices.iter().map(|&i| v[i]).collect()),
      TensorData::Int32(v) => TensorData::Int32(indices.iter().map(|&i| v[i]).collect()),
      TensorData::Uint8(v) => TensorData::Uint8(indices.iter().map(|&i| v[i]).collect()),
      TensorData::Int8(v) => TensorData::Int8(indices.iter().map(|&i| v[i]).collect()),
    }
  }
}

impl From<Vec<f32>> for TensorData {
  fn from(v: Vec<f32>) -> Self {
    TensorData::Float32(v)
  }
}

impl From<Vec<i32>> for TensorData {
  fn from(v: Vec<i32>) -> Self {
    TensorData::Int32(v)
  }
}

impl From<Vec<u8>> for TensorData {
  fn from(v: Vec<u8>) -> Self {
    TensorData::Uint8(v)
  }
}

impl From<Vec<i8>> for TensorData {
  fn from(v: Vec<i8>) -> Self {
    TensorData::Int8(v)
  }
}

/// Dimensions and element type of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape {
  /// Ordered dimension sizes.
  pub dims: Vec<usize>,
  /// Element type.
  pub data_type: DataType,
}

impl TensorShape {
  /// Total number of elements described by `dims`.
  pub fn size(&self) -> usize {
    element_count(&self.dims)
  }
}

/// Product of dimensions; the empty shape describes a scalar.
pub fn element_count(dims: &[usize]) -> usize {
  dims.iter().product()
}

/// A typed numeric buffer with an explicit shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  data: TensorData,
  shape: TensorShape,
  name: Option<String>,
}

impl Tensor {
  /// Creates a tensor, checking that the buffer length matches `dims`.
  pub fn new(data: impl Into<TensorData>, dims: Vec<usize>) -> Result<Self> {
    let data = data.into();
    let expected = element_count(&dims);
    if data.len() != expected {
      return Err(MlError::shape(format!(
        "buffer holds {} elements but shape {:?} needs {}",
        data.len(),
        dims,
        expected
      )));
    }
    let data_type = data.data_type();
    Ok(Self {
      data,
      shape: TensorShape { dims, data_type },
      name: None,
    })
  }

  /// Creates a `float32` tensor.
  pub fn from_f32(data: Vec<f32>, dims: Vec<usize>) -> Result<Self> {
    Self::new(data, dims)
  }

  /// A zero-filled tensor.
  pub fn zeros(dims: Vec<usize>, data_type: DataType) -> Self {
    let len = element_count(&dims);
    Self {
      data: TensorData::zeros(data_type, len),
      shape: TensorShape { dims, data_type },
      name: None,
    }
  }

  /// Returns a copy of this tensor carrying `name`.
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// The typed buffer.
  pub fn data(&self) -> &TensorData {
    &self.data
  }

  /// Consumes the tensor and returns its buffer.
  pub fn into_data(self) -> TensorData {
    self.data
  }

  /// Shape descriptor.
  pub fn shape(&self) -> &TensorShape {
    &self.shape
  }

  /// Dimension sizes.
  pub fn dims(&self) -> &[usize] {
    &self.shape.dims
  }

  /// Element type.
  pub fn data_type(&self) -> DataType {
    self.shape.data_type
  }

  /// Optional tensor name.
  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  /// Number of elements.
  pub fn size(&self) -> usize {
    self.data.len()
  }

  /// Number of dimensions.
  pub fn rank(&self) -> usize {
    self.shape.dims.len()
  }

  /// Buffer size in bytes.
  pub fn byte_len(&self) -> usize {
    self.size() * self.data_type().byte_size()
  }

  /// Values as `f32`, borrowing for `float32` tensors.
  pub fn values(&self) -> Cow<'_, [f32]> {
    self.data.as_f32()
  }

  /// Values as an owned `f32` vector.
  pub fn to_f32_vec(&self) -> Vec<f32> {
    self.data.as_f32().into_owned()
  }

  /// Same buffer under a different shape; length is re-checked.
  pub(crate) fn with_dims(&self, dims: Vec<usize>) -> Result<Self> {
    let mut t = Self::new(self.data.clone(), dims)?;
    t.name = self.name.clone();
    Ok(t)
  }
}
