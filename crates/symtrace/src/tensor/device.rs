use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
    Cuda,
    /// Shape-only device used by placeholder tensors that never own storage.
    Meta,
}

/// Device a tensor lives on, optionally with an ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub index: Option<u32>,
}

impl Device {
    pub const fn cpu() -> Self {
        Device {
            kind: DeviceKind::Cpu,
            index: None,
        }
    }

    pub const fn cuda(index: u32) -> Self {
        Device {
            kind: DeviceKind::Cuda,
            index: Some(index),
        }
    }

    pub fn is_cuda(&self) -> bool {
        self.kind == DeviceKind::Cuda
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda => "cuda",
            DeviceKind::Meta => "meta",
        };
        match self.index {
            Some(index) => write!(f, "{kind}:{index}"),
            None => write!(f, "{kind}"),
        }
    }
}
