//! Operation nodes recorded into the captured graph.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::tensor::{ConstValue, ExampleValue};

/// Identifier of a node inside one [`OutputGraph`](super::OutputGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Builtin operators the engine recognises by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    GetItem,
    SetItem,
    Len,
    Mod,
    Seed,
    ManualSeed,
    GetRank,
    GetWorldSize,
    ElementSize,
    MathSqrt,
    MathPow,
}

impl Builtin {
    pub fn qualified_name(self) -> &'static str {
        match self {
            Builtin::GetItem => "operator.getitem",
            Builtin::SetItem => "operator.setitem",
            Builtin::Len => "builtins.len",
            Builtin::Mod => "operator.mod",
            Builtin::Seed => "torch.seed",
            Builtin::ManualSeed => "torch.manual_seed",
            Builtin::GetRank => "torch.distributed.get_rank",
            Builtin::GetWorldSize => "torch.distributed.get_world_size",
            Builtin::ElementSize => "torch._utils._element_size",
            Builtin::MathSqrt => "math.sqrt",
            Builtin::MathPow => "math.pow",
        }
    }

    /// Process-global sources whose integer result is never stable across runs.
    pub fn is_nondeterministic_source(self) -> bool {
        matches!(
            self,
            Builtin::Seed | Builtin::Mod | Builtin::GetRank | Builtin::GetWorldSize
        )
    }

    /// Scalar math functions whose results may be captured as unspecialized numbers.
    pub fn is_scalar_math(self) -> bool {
        matches!(self, Builtin::MathSqrt | Builtin::MathPow)
    }
}

/// Kind of invocation a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeOp {
    Placeholder,
    CallFunction,
    CallMethod,
    CallModule,
}

impl NodeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeOp::Placeholder => "placeholder",
            NodeOp::CallFunction => "call_function",
            NodeOp::CallMethod => "call_method",
            NodeOp::CallModule => "call_module",
        }
    }
}

/// What a node invokes. The variant fixes the node's [`NodeOp`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    Placeholder(String),
    Builtin(Builtin),
    /// A `torch.*` function, by name (e.g. `"add"`).
    Function(String),
    /// A tensor method, by name (e.g. `"item"`).
    Method(String),
    /// A sub-module, by qualified path.
    Module(String),
}

impl Target {
    pub fn function(name: impl Into<String>) -> Self {
        Target::Function(name.into())
    }

    pub fn method(name: impl Into<String>) -> Self {
        Target::Method(name.into())
    }

    pub fn module(path: impl Into<String>) -> Self {
        Target::Module(path.into())
    }

    pub fn op(&self) -> NodeOp {
        match self {
            Target::Placeholder(_) => NodeOp::Placeholder,
            Target::Builtin(_) | Target::Function(_) => NodeOp::CallFunction,
            Target::Method(_) => NodeOp::CallMethod,
            Target::Module(_) => NodeOp::CallModule,
        }
    }

    pub fn builtin(&self) -> Option<Builtin> {
        match self {
            Target::Builtin(builtin) => Some(*builtin),
            _ => None,
        }
    }

    pub fn is_method(&self, name: &str) -> bool {
        matches!(self, Target::Method(method) if method == name)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Placeholder(name) => write!(f, "{name}"),
            Target::Builtin(builtin) => write!(f, "{}", builtin.qualified_name()),
            Target::Function(name) => write!(f, "torch.{name}"),
            Target::Method(name) => write!(f, "{name}"),
            Target::Module(path) => write!(f, "{path}"),
        }
    }
}

/// Operand of a recorded node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    Node(NodeId),
    Const(ConstValue),
    Tuple(Vec<Argument>),
    List(Vec<Argument>),
}

impl Argument {
    /// Visits every node referenced by this argument.
    pub fn for_each_node(&self, f: &mut impl FnMut(NodeId)) {
        match self {
            Argument::Node(id) => f(*id),
            Argument::Const(_) => {}
            Argument::Tuple(items) | Argument::List(items) => {
                for item in items {
                    item.for_each_node(f);
                }
            }
        }
    }
}

impl From<ConstValue> for Argument {
    fn from(value: ConstValue) -> Self {
        Argument::Const(value)
    }
}

impl From<NodeId> for Argument {
    fn from(value: NodeId) -> Self {
        Argument::Node(value)
    }
}

/// Transient per-node metadata.
#[derive(Debug, Clone)]
pub struct NodeMeta<T> {
    example_value: Option<ExampleValue<T>>,
}

impl<T> Default for NodeMeta<T> {
    fn default() -> Self {
        NodeMeta {
            example_value: None,
        }
    }
}

impl<T> NodeMeta<T> {
    pub fn example_value(&self) -> Option<&ExampleValue<T>> {
        self.example_value.as_ref()
    }

    pub fn has_example_value(&self) -> bool {
        self.example_value.is_some()
    }
}

/// One recorded operation.
#[derive(Debug, Clone)]
pub struct Node<T> {
    pub id: NodeId,
    pub target: Target,
    pub args: Vec<Argument>,
    pub kwargs: BTreeMap<String, Argument>,
    pub meta: NodeMeta<T>,
}

impl<T> Node<T> {
    pub fn op(&self) -> NodeOp {
        self.target.op()
    }

    /// Attaches the representative value. A node accepts exactly one.
    pub(crate) fn set_example_value(&mut self, value: ExampleValue<T>) -> TraceResult<()> {
        if self.meta.example_value.is_some() {
            return Err(TraceError::internal(format!(
                "node {} already carries an example value",
                self.id
            )));
        }
        self.meta.example_value = Some(value);
        Ok(())
    }
}
