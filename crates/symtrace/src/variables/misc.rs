//! Small interop variables the tensor engine hands to, or receives from, the wider tracer.

use std::sync::Arc;

use crate::library::TensorLike;
use crate::tensor::{DType, Device, PythonClass};

use super::{VariableOptions, VariableTracker};

/// A `torch` object that is not a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TorchObject {
    Dtype(DType),
    Device(Device),
    Class(PythonClass),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TorchVariable {
    pub value: TorchObject,
    pub options: VariableOptions,
}

impl TorchVariable {
    pub fn new(value: TorchObject, options: VariableOptions) -> Self {
        TorchVariable { value, options }
    }
}

/// `obj.name`, left unresolved.
#[derive(Debug, Clone)]
pub struct GetAttrVariable<T: TensorLike> {
    pub obj: Box<VariableTracker<T>>,
    pub name: String,
    pub options: VariableOptions,
}

impl<T: TensorLike> GetAttrVariable<T> {
    pub fn new(obj: VariableTracker<T>, name: impl Into<String>, options: VariableOptions) -> Self {
        GetAttrVariable {
            obj: Box::new(obj),
            name: name.into(),
            options,
        }
    }
}

/// A user-defined class object.
#[derive(Debug, Clone, PartialEq)]
pub struct UserDefinedClassVariable {
    pub class: PythonClass,
    pub options: VariableOptions,
}

/// Handle to a user function the front end can inline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserFunction {
    pub qualname: Arc<str>,
}

impl UserFunction {
    pub fn new(qualname: impl Into<Arc<str>>) -> Self {
        UserFunction {
            qualname: qualname.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserFunctionVariable {
    pub func: UserFunction,
    pub options: VariableOptions,
}

/// A `dict` with string keys, used for synthesized keyword arguments.
#[derive(Debug, Clone)]
pub struct ConstDictVariable<T: TensorLike> {
    pub items: Vec<(String, VariableTracker<T>)>,
    pub options: VariableOptions,
}
