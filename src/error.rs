//! # Error Handling
//!
//! A single error type, [`MlError`], is shared by every layer of the inference
//! core: tensor utilities, the model lifecycle, backends, the registry, vision
//! parsers and pipelines.
//!
//! ## Taxonomy
//!
//! - **State errors** ([`MlError::InvalidState`]): an operation was attempted
//!   outside its valid lifecycle state, e.g. `predict` before `load`.
//! - **Load errors** ([`MlError::Load`]): backend initialisation or artifact
//!   loading failed. The model moves to `error` and can be loaded again.
//! - **Inference errors** ([`MlError::Inference`], [`MlError::Backend`]):
//!   surface to the immediate caller of `predict`.
//! - **Registry errors** ([`MlError::NotRegistered`]): `get_or_load` for an id
//!   that was never registered.
//! - **Shape errors** ([`MlError::Shape`]): a tensor did not match the layout
//!   an operation or parser expects.
//!
//! `MlError` is `Clone` so that one failed load can be reported to every
//! caller that joined it.

use thiserror::Error;

/// Result type for inference-core operations.
pub type Result<T> = std::result::Result<T, MlError>;

/// Error type for the inference core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MlError {
  /// Operation attempted in a lifecycle state that does not permit it.
  #[error("invalid state for {operation}: model is {state}")]
  InvalidState {
    /// The operation that was rejected.
    operation: String,
    /// The state the model was in.
    state: String,
  },

  /// Model artifact or backend failed to load.
  #[error("load error: {0}")]
  Load(String),

  /// Forward pass failed.
  #[error("inference error: {0}")]
  Inference(String),

  /// Tensor shape or buffer length does not match the expected layout.
  #[error("shape error: {0}")]
  Shape(String),

  /// An argument was outside its valid domain.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  /// A task received an input variant it cannot preprocess.
  #[error("unsupported input: expected {expected}, found {found}")]
  UnsupportedInput {
    /// Accepted input kinds.
    expected: String,
    /// Kind that was supplied.
    found: String,
  },

  /// Native tensor runtime failure.
  #[error("backend error: {0}")]
  Backend(String),

  /// Artifact I/O failure.
  #[error("I/O error: {0}")]
  Io(String),

  /// Configuration could not be parsed or is invalid.
  #[error("configuration error: {0}")]
  Config(String),

  /// No model registered under the given id.
  #[error("model not registered: {0}")]
  NotRegistered(String),

  /// A pipeline already has a stage with this name.
  #[error("duplicate pipeline stage: {0}")]
  DuplicateStage(String),

  /// A pipeline stage failed.
  #[error("stage '{stage}' failed: {message}")]
  Stage {
    /// Name of the failing stage.
    stage: String,
    /// Description of the underlying failure.
    message: String,
  },
}

impl MlError {
  /// Creates an [`MlError::InvalidState`].
  pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
    Self::InvalidState {
      operation: operation.into(),
      state: state.to_string(),
    }
  }

  /// Creates an [`MlError::Load`].
  pub fn load(msg: impl Into<String>) -> Self {
    Self::Load(msg.into())
  }

  /// Creates an [`MlError::Inference`].
  pub fn inference(msg: impl Into<String>) -> Self {
    Self::Inference(msg.into())
  }

  /// Creates an [`MlError::Shape`].
  pub fn shape(msg: impl Into<String>) -> Self {
    Self::Shape(msg.into())
  }

  /// Creates an [`MlError::InvalidArgument`].
  pub fn invalid_argument(msg: impl Into<String>) -> Self {
    Self::InvalidArgument(msg.into())
  }

  /// Creates an [`MlError::Backend`].
  pub fn backend(msg: impl Into<String>) -> Self {
    Self::Backend(msg.into())
  }

  /// Creates an [`MlError::Config`].
  pub fn config(msg: impl Into<String>) -> Self {
    Self::Config(msg.into())
  }

  /// Wraps this error as the failure of a pipeline stage.
  pub fn in_stage(self, stage: impl Into<String>) -> Self {
    Self::Stage {
      stage: stage.into(),
      message: self.to_string(),
    }
  }

  /// Returns true for lifecycle state violations.
  pub fn is_state_error(&self) -> bool {
    matches!(self, Self::InvalidState { .. })
  }
}

impl From<std::io::Error> for MlError {
  fn from(err: std::io::Error) -> Self {
    Self::Io(err.to_string())
  }
}

impl From<serde_json::Error> for MlError {
  fn from(err: serde_json::Error) -> Self {
    Self::Config(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_invalid_state_display_carries_state() {
    let err = MlError::invalid_state("predict", "unloaded");
    assert_eq!(err.to_string(), "invalid state for predict: model is unloaded");
    assert!(err.is_state_error());
  }

  #[test]
  fn test_in_stage_wraps_message() {
    let err = MlError::inference("boom").in_stage("detector");
    match err {
      MlError::Stage { stage, message } => {
        assert_eq!(stage, "detector");
        assert!(message.contains("boom"));
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn test_io_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.json");
    let err: MlError = io.into();
    assert!(matches!(err, MlError::Io(ref m) if m.contains("missing.json")));
  }

  #[test]
  fn test_error_trait_object() {
    let err = MlError::load("x");
    let _: &dyn std::error::Error = &err;
  }
}
