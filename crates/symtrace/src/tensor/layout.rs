//! Layout helpers and the runtime class tags attached to traced values.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::DType;

/// Inline storage for sizes and strides; most traced tensors have rank six or less.
pub type Dims = SmallVec<[usize; 6]>;

/// Memory format accepted by `is_contiguous(memory_format=...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryFormat {
    Contiguous,
    ChannelsLast,
    Preserve,
}

/// Legacy typed tensor classes whose `isinstance` check is answered by dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegacyTensorType {
    FloatTensor,
    DoubleTensor,
    HalfTensor,
    BFloat16Tensor,
    ByteTensor,
    CharTensor,
    ShortTensor,
    IntTensor,
    LongTensor,
    BoolTensor,
}

impl LegacyTensorType {
    /// Dtypes accepted by the typed class.
    pub fn dtypes(self) -> &'static [DType] {
        match self {
            LegacyTensorType::FloatTensor => &[DType::F32],
            LegacyTensorType::DoubleTensor => &[DType::F64],
            LegacyTensorType::HalfTensor => &[DType::F16],
            LegacyTensorType::BFloat16Tensor => &[DType::BF16],
            LegacyTensorType::ByteTensor => &[DType::U8],
            LegacyTensorType::CharTensor => &[DType::I8],
            LegacyTensorType::ShortTensor => &[DType::I16],
            LegacyTensorType::IntTensor => &[DType::I32],
            LegacyTensorType::LongTensor => &[DType::I64],
            LegacyTensorType::BoolTensor => &[DType::Bool],
        }
    }
}

/// Runtime class of a traced value, as observed by `type(x)` in user code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PythonClass {
    Tensor,
    Parameter,
    /// A user-defined tensor subclass, identified by its qualified name.
    TensorSubclass(Arc<str>),
    Legacy(LegacyTensorType),
    Int,
    Bool,
    Float,
}

impl PythonClass {
    /// Mirrors `issubclass(self, other)` for the classes the engine knows about.
    pub fn is_subclass_of(&self, other: &PythonClass) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (PythonClass::Parameter, PythonClass::Tensor) => true,
            (PythonClass::TensorSubclass(_), PythonClass::Tensor) => true,
            (PythonClass::Bool, PythonClass::Int) => true,
            _ => false,
        }
    }

    pub fn is_tensor_class(&self) -> bool {
        self.is_subclass_of(&PythonClass::Tensor)
    }

    pub fn name(&self) -> &str {
        match self {
            PythonClass::Tensor => "torch.Tensor",
            PythonClass::Parameter => "torch.nn.Parameter",
            PythonClass::TensorSubclass(name) => name,
            PythonClass::Legacy(legacy) => match legacy {
                LegacyTensorType::FloatTensor => "torch.FloatTensor",
                LegacyTensorType::DoubleTensor => "torch.DoubleTensor",
                LegacyTensorType::HalfTensor => "torch.HalfTensor",
                LegacyTensorType::BFloat16Tensor => "torch.BFloat16Tensor",
                LegacyTensorType::ByteTensor => "torch.ByteTensor",
                LegacyTensorType::CharTensor => "torch.CharTensor",
                LegacyTensorType::ShortTensor => "torch.ShortTensor",
                LegacyTensorType::IntTensor => "torch.IntTensor",
                LegacyTensorType::LongTensor => "torch.LongTensor",
                LegacyTensorType::BoolTensor => "torch.BoolTensor",
            },
            PythonClass::Int => "int",
            PythonClass::Bool => "bool",
            PythonClass::Float => "float",
        }
    }
}

/// Row-major strides for `shape`.
pub fn contiguous_strides(shape: &[usize]) -> Dims {
    let mut strides: Dims = SmallVec::from_elem(1, shape.len());
    let mut running = 1usize;
    for idx in (0..shape.len()).rev() {
        strides[idx] = running;
        running = running.saturating_mul(shape[idx]);
    }
    strides
}

/// Returns `true` when `stride` describes a dense row-major layout of `shape`.
///
/// Extent-one axes may carry any stride.
pub fn is_contiguous(shape: &[usize], stride: &[usize]) -> bool {
    if shape.len() != stride.len() {
        return false;
    }
    let mut expected = 1usize;
    for (&size, &stride) in shape.iter().zip(stride.iter()).rev() {
        if size == 1 {
            continue;
        }
        if stride != expected {
            return false;
        }
        expected = expected.saturating_mul(size);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transposed_strides_are_not_contiguous() {
        let strides = contiguous_strides(&[3, 4]);
        assert_eq!(strides.as_slice(), &[4, 1]);
        assert!(is_contiguous(&[3, 4], &strides));
        assert!(!is_contiguous(&[4, 3], &[1, 4]));
        assert!(is_contiguous(&[1, 4], &[99, 1]));
    }

    #[test]
    fn parameter_is_a_tensor_but_not_the_reverse() {
        assert!(PythonClass::Parameter.is_subclass_of(&PythonClass::Tensor));
        assert!(!PythonClass::Tensor.is_subclass_of(&PythonClass::Parameter));
        assert!(PythonClass::Bool.is_subclass_of(&PythonClass::Int));
    }
}
