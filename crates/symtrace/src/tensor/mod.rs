//! Tensor-side vocabulary shared by the engine and tensor libraries.
//!
//! Dtypes, devices, layout helpers, class tags, and the [`ExampleValue`] tree a library returns
//! after running one operation. The [`TensorLike`](crate::library::TensorLike) trait is the only
//! view the engine has of a library's tensor type.

pub mod device;
pub mod dtype;
pub mod layout;
pub mod value;

pub use device::{Device, DeviceKind};
pub use dtype::DType;
pub use layout::{
    contiguous_strides, is_contiguous, Dims, LegacyTensorType, MemoryFormat, PythonClass,
};
pub use value::{ConstValue, ExampleValue, Kwargs, NamedTupleType, Number};
