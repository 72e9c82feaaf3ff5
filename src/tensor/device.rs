//! # Device Placement
//!
//! Where a model's tensors live. Only the ndarray CPU backend is compiled in,
//! so accelerator devices can be named (e.g. in a saved configuration) but
//! never resolved to.

use serde::{Deserialize, Serialize};

/// Represents the device where the tensor data resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl Device {
    /// Whether an accelerator backend is available to this build.
    pub fn accelerator_available() -> bool {
        false
    }

    /// Whether tensors can actually be placed on this device.
    pub fn is_available(&self) -> bool {
        match self {
            Device::Cpu => true,
            Device::Cuda(_) => Self::accelerator_available(),
        }
    }

    /// Explicit device if given, else the first accelerator if one is
    /// available, else the CPU.
    pub fn resolve(explicit: Option<Device>, accelerator_available: bool) -> Device {
        match explicit {
            Some(device) => device,
            None if accelerator_available => Device::Cuda(0),
            None => Device::Cpu,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{}", id),
        }
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    /// Accepts `cpu`, `cuda` (device 0) and `cuda:N`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| format!("unknown device '{}'", s)),
        }
    }
}
