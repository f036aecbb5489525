//! Symbolic values that stand in for runtime values while tracing.
//!
//! [`VariableTracker`] is a closed enum. The tensor family shares one [`TensorVariable`]
//! struct whose [`TensorKind`] picks the specialization (dynamic shape, unspecialized scalar,
//! opaque item). All members of the family answer metadata queries the same way.

mod base;
mod constant;
mod lists;
mod misc;
mod tensor;
mod tf_override;

pub use base::{MutableLocal, VariableOptions};
pub use constant::ConstantVariable;
pub use lists::{ContainerKind, ContainerVariable};
pub use misc::{
    ConstDictVariable, GetAttrVariable, TorchObject, TorchVariable, UserDefinedClassVariable,
    UserFunction, UserFunctionVariable,
};
pub use tensor::{StaticLayout, TensorKind, TensorProperties, TensorVariable};
pub use tf_override::TensorWithTfOverrideVariable;

use crate::error::{TraceError, TraceResult};
use crate::graph::Argument;
use crate::guards::{Guard, GuardSet};
use crate::library::TensorLike;
use crate::source::Source;
use crate::tensor::ConstValue;

#[derive(Debug, Clone)]
pub enum VariableTracker<T: TensorLike> {
    Tensor(TensorVariable<T>),
    Constant(ConstantVariable),
    Container(ContainerVariable<T>),
    Torch(TorchVariable),
    TensorWithTfOverride(TensorWithTfOverrideVariable<T>),
    GetAttr(GetAttrVariable<T>),
    UserDefinedClass(UserDefinedClassVariable),
    UserFunction(UserFunctionVariable),
    ConstDict(ConstDictVariable<T>),
}

impl<T: TensorLike> VariableTracker<T> {
    pub fn constant(value: ConstValue, options: VariableOptions) -> Self {
        VariableTracker::Constant(ConstantVariable::new(value, options))
    }

    pub fn options(&self) -> &VariableOptions {
        match self {
            VariableTracker::Tensor(v) => &v.options,
            VariableTracker::Constant(v) => &v.options,
            VariableTracker::Container(v) => &v.options,
            VariableTracker::Torch(v) => &v.options,
            VariableTracker::TensorWithTfOverride(v) => &v.options,
            VariableTracker::GetAttr(v) => &v.options,
            VariableTracker::UserDefinedClass(v) => &v.options,
            VariableTracker::UserFunction(v) => &v.options,
            VariableTracker::ConstDict(v) => &v.options,
        }
    }

    pub fn options_mut(&mut self) -> &mut VariableOptions {
        match self {
            VariableTracker::Tensor(v) => &mut v.options,
            VariableTracker::Constant(v) => &mut v.options,
            VariableTracker::Container(v) => &mut v.options,
            VariableTracker::Torch(v) => &mut v.options,
            VariableTracker::TensorWithTfOverride(v) => &mut v.options,
            VariableTracker::GetAttr(v) => &mut v.options,
            VariableTracker::UserDefinedClass(v) => &mut v.options,
            VariableTracker::UserFunction(v) => &mut v.options,
            VariableTracker::ConstDict(v) => &mut v.options,
        }
    }

    pub fn guards(&self) -> &GuardSet {
        &self.options().guards
    }

    pub fn source(&self) -> Option<&Source> {
        self.options().source.as_ref()
    }

    pub fn add_guard(mut self, guard: Guard) -> Self {
        self.options_mut().guards.insert(guard);
        self
    }

    pub fn add_guards(mut self, guards: &GuardSet) -> Self {
        self.options_mut().guards.extend(guards);
        self
    }

    pub fn as_tensor(&self) -> Option<&TensorVariable<T>> {
        match self {
            VariableTracker::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn into_tensor(self) -> Option<TensorVariable<T>> {
        match self {
            VariableTracker::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&ConstValue> {
        match self {
            VariableTracker::Constant(constant) => Some(&constant.value),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&ContainerVariable<T>> {
        match self {
            VariableTracker::Container(container) => Some(container),
            _ => None,
        }
    }

    pub fn is_python_constant(&self) -> bool {
        self.as_python_constant().is_ok()
    }

    pub fn as_python_constant(&self) -> TraceResult<ConstValue> {
        match self {
            VariableTracker::Constant(constant) => Ok(constant.value.clone()),
            VariableTracker::Container(container) => container.as_python_constant(),
            VariableTracker::Torch(torch) => match &torch.value {
                TorchObject::Dtype(dtype) => Ok(ConstValue::Dtype(*dtype)),
                TorchObject::Device(device) => Ok(ConstValue::Device(*device)),
                TorchObject::Class(_) => Err(TraceError::not_implemented(
                    "class object as python constant",
                )),
            },
            other => Err(TraceError::not_implemented(format!(
                "{} as python constant",
                other.kind_name()
            ))),
        }
    }

    /// `self[index]` for a constant index.
    pub fn getitem_const(&self, index: &VariableTracker<T>) -> TraceResult<VariableTracker<T>> {
        match self {
            VariableTracker::Constant(constant) => constant.getitem_const(index),
            VariableTracker::Container(container) => container.getitem_const(index),
            other => Err(TraceError::not_implemented(format!(
                "constant subscript of {}",
                other.kind_name()
            ))),
        }
    }

    /// Graph argument that reproduces this value at runtime.
    pub fn as_proxy(&self) -> TraceResult<Argument> {
        match self {
            VariableTracker::Tensor(tensor) => Ok(Argument::Node(tensor.proxy)),
            VariableTracker::Constant(constant) => Ok(Argument::Const(constant.value.clone())),
            VariableTracker::Container(container) => container.as_proxy(),
            VariableTracker::Torch(_) => self.as_python_constant().map(Argument::Const),
            VariableTracker::TensorWithTfOverride(wrapped) => wrapped.tensor_variable.as_proxy(),
            other => Err(TraceError::unsupported(format!(
                "cannot pass {} to a graph operation",
                other.kind_name()
            ))),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            VariableTracker::Tensor(tensor) => tensor.kind.name(),
            VariableTracker::Constant(_) => "ConstantVariable",
            VariableTracker::Container(_) => "ContainerVariable",
            VariableTracker::Torch(_) => "TorchVariable",
            VariableTracker::TensorWithTfOverride(_) => "TensorWithTFOverrideVariable",
            VariableTracker::GetAttr(_) => "GetAttrVariable",
            VariableTracker::UserDefinedClass(_) => "UserDefinedClassVariable",
            VariableTracker::UserFunction(_) => "UserFunctionVariable",
            VariableTracker::ConstDict(_) => "ConstDictVariable",
        }
    }
}

impl<T: TensorLike> From<TensorVariable<T>> for VariableTracker<T> {
    fn from(value: TensorVariable<T>) -> Self {
        VariableTracker::Tensor(value)
    }
}

impl<T: TensorLike> From<ConstantVariable> for VariableTracker<T> {
    fn from(value: ConstantVariable) -> Self {
        VariableTracker::Constant(value)
    }
}

impl<T: TensorLike> From<ContainerVariable<T>> for VariableTracker<T> {
    fn from(value: ContainerVariable<T>) -> Self {
        VariableTracker::Container(value)
    }
}
