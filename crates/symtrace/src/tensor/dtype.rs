//! Enumerates the scalar element types a traced tensor can carry.

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between representative values and captured metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// Boolean mask element.
    Bool,
    U8,
    I8,
    I16,
    I32,
    /// 64-bit signed integer, the default integer dtype.
    I64,
    /// 16-bit floating point (fp16).
    F16,
    /// 16-bit bfloat16.
    BF16,
    /// 32-bit floating point, the default floating dtype.
    F32,
    F64,
}

impl DType {
    /// Returns `true` for every floating-point representation.
    pub fn is_floating_point(self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::U8 | DType::I8 => 1,
            DType::I16 | DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    /// Qualified name used in diagnostics, e.g. `torch.float32`.
    pub fn qualified_name(self) -> &'static str {
        match self {
            DType::Bool => "torch.bool",
            DType::U8 => "torch.uint8",
            DType::I8 => "torch.int8",
            DType::I16 => "torch.int16",
            DType::I32 => "torch.int32",
            DType::I64 => "torch.int64",
            DType::F16 => "torch.float16",
            DType::BF16 => "torch.bfloat16",
            DType::F32 => "torch.float32",
            DType::F64 => "torch.float64",
        }
    }
}
