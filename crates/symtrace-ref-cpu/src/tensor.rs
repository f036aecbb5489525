use std::sync::Arc;

use symtrace::tensor::{contiguous_strides, Dims};
use symtrace::{DType, Device, Number, PythonClass, TensorLike};

/// Backing store of a [`CpuTensor`].
///
/// Dense values are kept in logical row-major order; `stride` is reported metadata only.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Dense(Arc<[f64]>),
    /// Shape-only tensor produced in placeholder mode.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuTensor {
    dtype: DType,
    device: Device,
    size: Dims,
    stride: Dims,
    data: TensorData,
    requires_grad: bool,
    class: PythonClass,
}

impl CpuTensor {
    pub fn from_vec(size: &[usize], values: Vec<f64>, dtype: DType) -> Self {
        debug_assert_eq!(size.iter().product::<usize>(), values.len());
        CpuTensor {
            dtype,
            device: Device::cpu(),
            size: Dims::from_slice(size),
            stride: contiguous_strides(size),
            data: TensorData::Dense(values.into()),
            requires_grad: false,
            class: PythonClass::Tensor,
        }
    }

    pub fn zeros(size: &[usize], dtype: DType) -> Self {
        let numel = size.iter().product();
        CpuTensor::from_vec(size, vec![0.0; numel], dtype)
    }

    pub fn full(size: &[usize], value: f64, dtype: DType) -> Self {
        let numel = size.iter().product();
        CpuTensor::from_vec(size, vec![value; numel], dtype)
    }

    /// Zero-dimensional tensor holding `value`, typed the way `torch.tensor` types scalars.
    pub fn scalar(value: Number) -> Self {
        let dtype = match value {
            Number::Int(_) => DType::I64,
            Number::Bool(_) => DType::Bool,
            Number::Float(_) => DType::F32,
        };
        CpuTensor::from_vec(&[], vec![value.as_f64()], dtype)
    }

    pub fn placeholder(size: &[usize], dtype: DType) -> Self {
        CpuTensor {
            data: TensorData::Placeholder,
            ..CpuTensor::zeros(&[], dtype).with_size(size)
        }
    }

    /// Placeholder with this tensor's metadata.
    pub fn to_placeholder(&self) -> Self {
        CpuTensor {
            data: TensorData::Placeholder,
            ..self.clone()
        }
    }

    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    pub fn with_class(mut self, class: PythonClass) -> Self {
        self.class = class;
        self
    }

    /// Marks the tensor as a module parameter.
    pub fn into_parameter(self) -> Self {
        self.with_class(PythonClass::Parameter).with_requires_grad(true)
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_stride(mut self, stride: &[usize]) -> Self {
        self.stride = Dims::from_slice(stride);
        self
    }

    fn with_size(mut self, size: &[usize]) -> Self {
        self.size = Dims::from_slice(size);
        self.stride = contiguous_strides(size);
        self
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Dense values, or `None` for a placeholder.
    pub fn values(&self) -> Option<&[f64]> {
        match &self.data {
            TensorData::Dense(values) => Some(values),
            TensorData::Placeholder => None,
        }
    }

    pub fn numel(&self) -> usize {
        self.size.iter().product()
    }

    /// Tensor of `size` sharing this tensor's dtype, device, and grad flag.
    pub(crate) fn derive(&self, size: &[usize], data: TensorData) -> Self {
        CpuTensor {
            dtype: self.dtype,
            device: self.device,
            size: Dims::from_slice(size),
            stride: contiguous_strides(size),
            data,
            requires_grad: self.requires_grad,
            class: PythonClass::Tensor,
        }
    }

    pub(crate) fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }
}

impl TensorLike for CpuTensor {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn device(&self) -> Device {
        self.device
    }

    fn size(&self) -> &[usize] {
        &self.size
    }

    fn stride(&self) -> &[usize] {
        &self.stride
    }

    fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    fn python_class(&self) -> PythonClass {
        self.class.clone()
    }

    fn is_placeholder(&self) -> bool {
        matches!(self.data, TensorData::Placeholder)
    }

    fn clone_preserving_strides(&self) -> Self {
        let data = match &self.data {
            TensorData::Dense(values) => TensorData::Dense(values.iter().copied().collect()),
            TensorData::Placeholder => TensorData::Placeholder,
        };
        CpuTensor {
            data,
            ..self.clone()
        }
    }
}
