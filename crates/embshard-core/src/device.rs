//! Compute placement marker.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device on which construction-time buffers are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// Accelerator memory.
    Gpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Gpu => f.write_str("gpu"),
        }
    }
}

/// A value tagged with the device it was placed on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placed<T> {
    /// Where the value lives.
    pub device: Device,
    /// The placed value.
    pub value: T,
}

impl<T> Placed<T> {
    /// Places `value` on `device`.
    pub fn new(device: Device, value: T) -> Self {
        Self { device, value }
    }
}
