//! Eager reference [`TensorLibrary`](symtrace::TensorLibrary) for tests and examples.
//!
//! Values are dense `f64` buffers regardless of dtype. Placeholder mode produces shape-only
//! tensors so the engine can be exercised without reading data.

pub mod library;
pub mod module;
pub mod tensor;

pub use library::CpuLibrary;
pub use module::{LazyLinear, Linear};
pub use tensor::{CpuTensor, TensorData};
