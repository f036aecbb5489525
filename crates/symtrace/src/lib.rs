//! Symbolic tensor values for just-in-time graph capture.
//!
//! As a traced program runs, every tensor operation is recorded into an [`OutputGraph`] and
//! executed once against representative inputs to learn what it produces. The result is
//! classified into a [`VariableTracker`] that carries the metadata and guards later operations
//! rely on.

mod classify;
pub mod config;
pub mod context;
mod deopt;
pub mod engine;
pub mod error;
pub mod graph;
pub mod guards;
pub mod library;
pub mod logging;
pub mod source;
pub mod specialize;
pub mod tensor;
pub mod variables;

pub use config::TraceConfig;
pub use context::{CompileSession, TraceContext, UserCodeInliner};
pub use error::{TraceError, TraceResult};
pub use graph::{Argument, Builtin, NodeId, OutputGraph, Target};
pub use guards::{Guard, GuardKind, GuardSet};
pub use library::{ExecError, ExecResult, ModuleHandle, TensorLibrary, TensorLike, TracedModule};
pub use source::Source;
pub use tensor::{ConstValue, DType, Device, ExampleValue, Kwargs, Number, PythonClass};
pub use variables::{TensorKind, TensorVariable, VariableOptions, VariableTracker};
