//! Static metadata read off a representative tensor.

use crate::config::TraceConfig;
use crate::library::TensorLike;
use crate::tensor::Dims;
use crate::variables::{StaticLayout, TensorProperties};

/// Extracts the properties a [`TensorVariable`](crate::variables::TensorVariable) caches.
///
/// Size, stride, and contiguity are only captured when `dynamic_shapes` is off.
pub fn specialize<T: TensorLike>(value: &T, config: &TraceConfig) -> TensorProperties {
    let layout = (!config.dynamic_shapes).then(|| StaticLayout {
        size: Dims::from_slice(value.size()),
        stride: Dims::from_slice(value.stride()),
        is_contiguous: value.is_contiguous(),
    });
    TensorProperties {
        dtype: value.dtype(),
        device: value.device(),
        ndim: value.ndim(),
        requires_grad: value.requires_grad(),
        is_quantized: value.is_quantized(),
        is_sparse: value.is_sparse(),
        class_type: value.python_class(),
        layout,
    }
}
