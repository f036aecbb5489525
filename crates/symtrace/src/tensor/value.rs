//! Representative values produced by running one graph operation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{DType, Device, MemoryFormat, PythonClass};

/// A plain Python-level number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Number {
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl Number {
    /// Exact Python type of the number (`type(x)`).
    pub fn python_type(self) -> PythonClass {
        match self {
            Number::Int(_) => PythonClass::Int,
            Number::Bool(_) => PythonClass::Bool,
            Number::Float(_) => PythonClass::Float,
        }
    }

    /// Value of `torch.zeros((), dtype=dtype).item()`.
    pub fn zero_of(dtype: DType) -> Self {
        if dtype == DType::Bool {
            Number::Bool(false)
        } else if dtype.is_floating_point() {
            Number::Float(0.0)
        } else {
            Number::Int(0)
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(value) => value as f64,
            Number::Bool(value) => f64::from(u8::from(value)),
            Number::Float(value) => value,
        }
    }
}

impl From<Number> for ConstValue {
    fn from(value: Number) -> Self {
        match value {
            Number::Int(v) => ConstValue::Int(v),
            Number::Bool(v) => ConstValue::Bool(v),
            Number::Float(v) => ConstValue::Float(v),
        }
    }
}

/// The class of a named tuple output, e.g. `torch.return_types.max`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedTupleType {
    pub name: Arc<str>,
    pub fields: Arc<[String]>,
}

impl NamedTupleType {
    pub fn new(name: impl Into<Arc<str>>, fields: &[&str]) -> Self {
        NamedTupleType {
            name: name.into(),
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }

    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|candidate| candidate == field)
    }
}

/// Literal value that can be embedded directly in a graph argument or constant variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<ConstValue>),
    Dtype(DType),
    Device(Device),
    MemoryFormat(MemoryFormat),
}

impl ConstValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConstValue::Int(value) => Some(*value),
            ConstValue::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ConstValue::None => "NoneType",
            ConstValue::Bool(_) => "bool",
            ConstValue::Int(_) => "int",
            ConstValue::Float(_) => "float",
            ConstValue::Str(_) => "str",
            ConstValue::Tuple(_) => "tuple",
            ConstValue::Dtype(_) => "torch.dtype",
            ConstValue::Device(_) => "torch.device",
            ConstValue::MemoryFormat(_) => "torch.memory_format",
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::None => write!(f, "None"),
            ConstValue::Bool(value) => write!(f, "{}", if *value { "True" } else { "False" }),
            ConstValue::Int(value) => write!(f, "{value}"),
            ConstValue::Float(value) => write!(f, "{value:?}"),
            ConstValue::Str(value) => write!(f, "{value:?}"),
            ConstValue::Tuple(items) => {
                write!(f, "(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            ConstValue::Dtype(dtype) => write!(f, "{}", dtype.qualified_name()),
            ConstValue::Device(device) => write!(f, "device({device})"),
            ConstValue::MemoryFormat(format) => write!(f, "{format:?}"),
        }
    }
}

/// Keyword arguments resolved to representative values.
pub type Kwargs<T> = BTreeMap<String, ExampleValue<T>>;

/// Concrete or simulated result of running one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExampleValue<T> {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// `torch.Size`, a tuple of extents.
    Size(Vec<usize>),
    Tensor(T),
    Tuple(Vec<ExampleValue<T>>),
    List(Vec<ExampleValue<T>>),
    NamedTuple(NamedTupleType, Vec<ExampleValue<T>>),
    Dtype(DType),
    Device(Device),
    MemoryFormat(MemoryFormat),
}

impl<T> ExampleValue<T> {
    /// Returns the number when the value is exactly an int, a bool, or a float.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            ExampleValue::Int(value) => Some(Number::Int(*value)),
            ExampleValue::Bool(value) => Some(Number::Bool(*value)),
            ExampleValue::Float(value) => Some(Number::Float(*value)),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&T> {
        match self {
            ExampleValue::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn into_tensor(self) -> Option<T> {
        match self {
            ExampleValue::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ExampleValue::None)
    }

    pub fn type_name(&self) -> String {
        match self {
            ExampleValue::None => "NoneType".to_string(),
            ExampleValue::Bool(_) => "bool".to_string(),
            ExampleValue::Int(_) => "int".to_string(),
            ExampleValue::Float(_) => "float".to_string(),
            ExampleValue::Str(_) => "str".to_string(),
            ExampleValue::Size(_) => "torch.Size".to_string(),
            ExampleValue::Tensor(_) => "torch.Tensor".to_string(),
            ExampleValue::Tuple(_) => "tuple".to_string(),
            ExampleValue::List(_) => "list".to_string(),
            ExampleValue::NamedTuple(ty, _) => ty.name.to_string(),
            ExampleValue::Dtype(_) => "torch.dtype".to_string(),
            ExampleValue::Device(_) => "torch.device".to_string(),
            ExampleValue::MemoryFormat(_) => "torch.memory_format".to_string(),
        }
    }

    /// Applies `f` to every tensor leaf, preserving container structure.
    pub fn map_tensors<U, F>(self, f: &mut F) -> ExampleValue<U>
    where
        F: FnMut(T) -> U,
    {
        match self {
            ExampleValue::None => ExampleValue::None,
            ExampleValue::Bool(v) => ExampleValue::Bool(v),
            ExampleValue::Int(v) => ExampleValue::Int(v),
            ExampleValue::Float(v) => ExampleValue::Float(v),
            ExampleValue::Str(v) => ExampleValue::Str(v),
            ExampleValue::Size(v) => ExampleValue::Size(v),
            ExampleValue::Tensor(t) => ExampleValue::Tensor(f(t)),
            ExampleValue::Tuple(items) => {
                ExampleValue::Tuple(items.into_iter().map(|v| v.map_tensors(f)).collect())
            }
            ExampleValue::List(items) => {
                ExampleValue::List(items.into_iter().map(|v| v.map_tensors(f)).collect())
            }
            ExampleValue::NamedTuple(ty, items) => ExampleValue::NamedTuple(
                ty,
                items.into_iter().map(|v| v.map_tensors(f)).collect(),
            ),
            ExampleValue::Dtype(v) => ExampleValue::Dtype(v),
            ExampleValue::Device(v) => ExampleValue::Device(v),
            ExampleValue::MemoryFormat(v) => ExampleValue::MemoryFormat(v),
        }
    }
}

impl<T> From<Number> for ExampleValue<T> {
    fn from(value: Number) -> Self {
        match value {
            Number::Int(v) => ExampleValue::Int(v),
            Number::Bool(v) => ExampleValue::Bool(v),
            Number::Float(v) => ExampleValue::Float(v),
        }
    }
}

impl<T> From<&ConstValue> for ExampleValue<T> {
    fn from(value: &ConstValue) -> Self {
        match value {
            ConstValue::None => ExampleValue::None,
            ConstValue::Bool(v) => ExampleValue::Bool(*v),
            ConstValue::Int(v) => ExampleValue::Int(*v),
            ConstValue::Float(v) => ExampleValue::Float(*v),
            ConstValue::Str(v) => ExampleValue::Str(v.clone()),
            ConstValue::Tuple(items) => {
                ExampleValue::Tuple(items.iter().map(ExampleValue::from).collect())
            }
            ConstValue::Dtype(v) => ExampleValue::Dtype(*v),
            ConstValue::Device(v) => ExampleValue::Device(*v),
            ConstValue::MemoryFormat(v) => ExampleValue::MemoryFormat(*v),
        }
    }
}
