use crate::error::TraceResult;
use crate::graph::{Argument, NodeId};
use crate::library::TensorLike;
use crate::tensor::{ConstValue, NamedTupleType};

use super::constant::resolve_index;
use super::{ConstantVariable, VariableOptions, VariableTracker};

/// Concrete Python container a [`ContainerVariable`] round-trips to.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerKind {
    Tuple,
    List,
    NamedTuple(NamedTupleType),
    /// `torch.Size` returned by `size()`.
    Size,
    /// `torch.Size` read through the `shape` attribute.
    Shape,
}

impl ContainerKind {
    pub fn type_name(&self) -> &str {
        match self {
            ContainerKind::Tuple => "tuple",
            ContainerKind::List => "list",
            ContainerKind::NamedTuple(ty) => &ty.name,
            ContainerKind::Size | ContainerKind::Shape => "torch.Size",
        }
    }

    pub fn is_size(&self) -> bool {
        matches!(self, ContainerKind::Size | ContainerKind::Shape)
    }
}

/// Ordered sequence of symbolic values.
#[derive(Debug, Clone)]
pub struct ContainerVariable<T: TensorLike> {
    pub kind: ContainerKind,
    pub items: Vec<VariableTracker<T>>,
    /// Node that produced the container when it came out of the graph as a whole.
    pub proxy: Option<NodeId>,
    pub options: VariableOptions,
}

impl<T: TensorLike> ContainerVariable<T> {
    pub fn new(kind: ContainerKind, items: Vec<VariableTracker<T>>, options: VariableOptions) -> Self {
        ContainerVariable {
            kind,
            items,
            proxy: None,
            options,
        }
    }

    pub fn tuple(items: Vec<VariableTracker<T>>, options: VariableOptions) -> Self {
        ContainerVariable::new(ContainerKind::Tuple, items, options)
    }

    pub fn with_proxy(mut self, proxy: NodeId) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// `torch.Size` of literal extents.
    pub fn static_size(kind: ContainerKind, dims: &[usize], options: VariableOptions) -> Self {
        let items = dims
            .iter()
            .map(|&dim| {
                VariableTracker::Constant(ConstantVariable::new(
                    ConstValue::Int(dim as i64),
                    VariableOptions::new(),
                ))
            })
            .collect();
        ContainerVariable::new(kind, items, options)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `self[index]` for a constant index, carrying the container's guards.
    pub fn getitem_const(&self, index: &VariableTracker<T>) -> TraceResult<VariableTracker<T>> {
        let position = resolve_index(index, self.items.len())?;
        let mut guards = self.options.guards.clone();
        guards.extend(&index.options().guards);
        Ok(self.items[position].clone().add_guards(&guards))
    }

    pub fn as_python_constant(&self) -> TraceResult<ConstValue> {
        let items = self
            .items
            .iter()
            .map(VariableTracker::as_python_constant)
            .collect::<TraceResult<Vec<_>>>()?;
        Ok(ConstValue::Tuple(items))
    }

    pub fn as_proxy(&self) -> TraceResult<Argument> {
        if let Ok(value) = self.as_python_constant() {
            if self.kind.is_size() {
                return Ok(Argument::Const(value));
            }
        }
        let items = self
            .items
            .iter()
            .map(VariableTracker::as_proxy)
            .collect::<TraceResult<Vec<_>>>()?;
        Ok(match self.kind {
            ContainerKind::List => Argument::List(items),
            _ => Argument::Tuple(items),
        })
    }
}
