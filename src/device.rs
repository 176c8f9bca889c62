//! Compute device selection.
//!
//! `Auto` probes the device hierarchy from newest/fastest to the portable
//! fallback: `Accelerated` (native GPU compute API), then `Gpu` (generic GPU
//! context), then `Cpu`. The first available device wins.

use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Compute device for model execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
  /// Portable CPU execution.
  Cpu,
  /// Generic GPU context.
  Gpu,
  /// Native accelerated GPU compute API.
  Accelerated,
  /// Pick the best available device.
  #[default]
  Auto,
}

impl Device {
  /// Probe order used when resolving [`Device::Auto`].
  pub const PREFERENCE: [Device; 3] = [Device::Accelerated, Device::Gpu, Device::Cpu];

  /// Returns true for hardware-accelerated devices.
  pub fn is_gpu(&self) -> bool {
    matches!(self, Device::Gpu | Device::Accelerated)
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Device::Cpu => "cpu",
      Device::Gpu => "gpu",
      Device::Accelerated => "accelerated",
      Device::Auto => "auto",
    };
    f.write_str(s)
  }
}

impl std::str::FromStr for Device {
  type Err = MlError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "cpu" | "wasm" => Ok(Device::Cpu),
      "gpu" | "webgl" => Ok(Device::Gpu),
      "accelerated" | "webgpu" => Ok(Device::Accelerated),
      "auto" => Ok(Device::Auto),
      _ => Err(MlError::config(format!("unsupported device: {s}"))),
    }
  }
}

/// Resolves `requested` to a concrete device.
///
/// An explicit device is used when `is_available` confirms it; otherwise the
/// request degrades to the `Auto` hierarchy. `Cpu` is returned when nothing
/// else answers, since every host can run portable kernels.
pub fn resolve_device<F>(requested: Device, mut is_available: F) -> Device
where
  F: FnMut(Device) -> bool,
{
  if requested != Device::Auto {
    if is_available(requested) {
      return requested;
    }
    warn!(device = %requested, "requested device unavailable, probing fallbacks");
  }
  for candidate in Device::PREFERENCE {
    if is_available(candidate) {
      debug!(device = %candidate, "resolved compute device");
      return candidate;
    }
  }
  Device::Cpu
}
