//! Seam between the engine and the tensor library it drives.
//!
//! The engine never computes anything itself. It hands resolved operands to a
//! [`TensorLibrary`], which runs the operation eagerly or, in placeholder mode, on shape-only
//! tensors, and reports failures through the closed [`ExecError`] set.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::Target;
use crate::tensor::{is_contiguous, DType, Device, ExampleValue, Kwargs, Number, PythonClass};

/// Failures a tensor library may report while running one operation.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// The library refuses the construct outright.
    #[error("unsupported: {reason}")]
    Unsupported { reason: String },
    /// Placeholder execution cannot handle the operation at all.
    #[error("placeholder execution unsupported: {reason}")]
    UnsupportedPlaceholder { reason: String },
    /// The output value depends on tensor data, which placeholders do not have.
    #[error("data dependent output from {func}")]
    DataDependentOutput { func: String },
    /// The output shape depends on tensor data, which placeholders do not have.
    #[error("dynamic output shape from {func}")]
    DynamicOutputShape { func: String },
    /// Any other runtime failure inside the operation.
    #[error("{message}")]
    Runtime { message: String },
}

impl ExecError {
    pub fn runtime(message: impl Into<String>) -> Self {
        ExecError::Runtime {
            message: message.into(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        ExecError::Unsupported {
            reason: reason.into(),
        }
    }
}

/// Convenience alias for results returned by library routines.
pub type ExecResult<T> = Result<T, ExecError>;

/// Read-only view of a library tensor.
pub trait TensorLike: Clone + fmt::Debug + Send + Sync + 'static {
    fn dtype(&self) -> DType;

    fn device(&self) -> Device;

    fn size(&self) -> &[usize];

    fn stride(&self) -> &[usize];

    fn ndim(&self) -> usize {
        self.size().len()
    }

    fn is_contiguous(&self) -> bool {
        is_contiguous(self.size(), self.stride())
    }

    fn requires_grad(&self) -> bool;

    fn is_quantized(&self) -> bool {
        false
    }

    fn is_sparse(&self) -> bool {
        false
    }

    /// Exact runtime class, e.g. `Parameter` for module weights.
    fn python_class(&self) -> PythonClass;

    /// True when the value is a shape-only placeholder whose data must never be read.
    fn is_placeholder(&self) -> bool;

    /// Copies the tensor, keeping its strides, so the engine does not alias library internals.
    fn clone_preserving_strides(&self) -> Self;
}

/// Shared handle to a module invoked by `call_module` nodes.
pub type ModuleHandle<T> = Arc<dyn TracedModule<T>>;

/// A stateful sub-module the traced program calls.
pub trait TracedModule<T: TensorLike>: Send + Sync {
    fn name(&self) -> &str;

    /// True while the module still has parameters waiting for their first call.
    fn is_lazy(&self) -> bool {
        false
    }

    fn forward(&self, args: &[ExampleValue<T>], kwargs: &Kwargs<T>) -> ExecResult<ExampleValue<T>>;

    /// Independent copy whose state the engine may perturb.
    fn deep_copy(&self) -> ModuleHandle<T>;

    /// Copy whose parameters are converted into placeholders.
    fn to_placeholder(&self) -> ModuleHandle<T>;
}

/// Black-box tensor library that executes one operation at a time.
pub trait TensorLibrary: Send + Sync {
    type Tensor: TensorLike;
    type RngState: Clone;

    /// Returns a human-readable identifier (e.g., `"cpu-ref"`).
    fn library_name(&self) -> &str;

    /// Runs a free function or builtin operator.
    fn call_function(
        &self,
        target: &Target,
        args: &[ExampleValue<Self::Tensor>],
        kwargs: &Kwargs<Self::Tensor>,
    ) -> ExecResult<ExampleValue<Self::Tensor>>;

    /// Runs `receiver.name(*args, **kwargs)`.
    fn call_method(
        &self,
        name: &str,
        receiver: &ExampleValue<Self::Tensor>,
        args: &[ExampleValue<Self::Tensor>],
        kwargs: &Kwargs<Self::Tensor>,
    ) -> ExecResult<ExampleValue<Self::Tensor>>;

    /// Converts a tensor into a placeholder with the same metadata and no data.
    fn to_placeholder(&self, tensor: &Self::Tensor) -> Self::Tensor;

    /// Equivalent of `torch.tensor(value)`.
    fn scalar_tensor(&self, value: Number) -> Self::Tensor;

    /// Equivalent of `torch.zeros((), dtype=dtype).item()`.
    fn zero_item(&self, dtype: DType) -> Number {
        Number::zero_of(dtype)
    }

    fn rng_state(&self) -> Self::RngState;

    fn set_rng_state(&self, state: Self::RngState);

    /// Routes subsequent factory calls to placeholder tensors until the matching exit.
    fn enter_placeholder_mode(&self);

    fn exit_placeholder_mode(&self);
}
