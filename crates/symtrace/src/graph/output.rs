//! Graph under construction plus the bookkeeping owned by the active trace.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::error::{TraceError, TraceResult};
use crate::guards::{Guard, GuardSet};
use crate::library::{ModuleHandle, TensorLike};
use crate::source::Source;
use crate::tensor::{ConstValue, ExampleValue};
use crate::variables::MutableLocal;

use super::node::{Argument, Builtin, Node, NodeId, NodeMeta, NodeOp, Target};

/// Graph input the compiled graph needs at call time.
#[derive(Debug, Clone)]
pub struct GraphArg {
    pub source: Source,
    pub node: NodeId,
    erased: bool,
}

impl GraphArg {
    pub fn is_erased(&self) -> bool {
        self.erased
    }
}

/// Captured graph, its required inputs, and its cumulative guards.
///
/// Exclusively owned by one trace; every mutation goes through `&mut self`.
pub struct OutputGraph<T: TensorLike> {
    nodes: Vec<Node<T>>,
    graphargs: Vec<GraphArg>,
    modules: HashMap<String, ModuleHandle<T>>,
    deoptimized: HashSet<NodeId>,
    next_mutable_local: u64,
    pub guards: GuardSet,
}

impl<T: TensorLike> Default for OutputGraph<T> {
    fn default() -> Self {
        OutputGraph::new()
    }
}

impl<T: TensorLike> OutputGraph<T> {
    pub fn new() -> Self {
        OutputGraph {
            nodes: Vec::new(),
            graphargs: Vec::new(),
            modules: HashMap::new(),
            deoptimized: HashSet::new(),
            next_mutable_local: 0,
            guards: GuardSet::new(),
        }
    }

    /// Records a new operation and returns its node id.
    ///
    /// Every node referenced by `args` or `kwargs` must already exist.
    pub fn create_proxy(
        &mut self,
        target: Target,
        args: Vec<Argument>,
        kwargs: BTreeMap<String, Argument>,
    ) -> TraceResult<NodeId> {
        let mut missing = None;
        let known = self.nodes.len();
        let mut check = |id: NodeId| {
            if id.0 as usize >= known {
                missing = Some(id);
            }
        };
        args.iter().for_each(|arg| arg.for_each_node(&mut check));
        kwargs.values().for_each(|arg| arg.for_each_node(&mut check));
        if let Some(id) = missing {
            return Err(TraceError::internal(format!(
                "operand {id} of {target} is not part of this graph"
            )));
        }

        let id = self.allocate_node();
        log::trace!(target: "symtrace::graph", "{id} = {} {target}", target.op().as_str());
        self.nodes.push(Node {
            id,
            target,
            args,
            kwargs,
            meta: NodeMeta::default(),
        });
        Ok(id)
    }

    /// Records `operator.getitem(node, index)`, the equivalent of `proxy[index]`.
    pub fn getitem_proxy(&mut self, node: NodeId, index: usize) -> TraceResult<NodeId> {
        let index = i64::try_from(index)
            .map_err(|_| TraceError::internal(format!("index {index} overflows i64")))?;
        self.create_proxy(
            Target::Builtin(Builtin::GetItem),
            vec![Argument::Node(node), Argument::Const(ConstValue::Int(index))],
            BTreeMap::new(),
        )
    }

    /// Identity for a container created while tracing this graph.
    pub fn new_mutable_local(&mut self) -> MutableLocal {
        let id = self.next_mutable_local;
        self.next_mutable_local += 1;
        MutableLocal::from_id(id)
    }

    /// Creates a placeholder node for a value the user program passes in.
    ///
    /// The caller classifies the returned node with its example value.
    pub fn add_graph_input(&mut self, name: impl Into<String>, source: Source) -> NodeId {
        let id = self.allocate_node();
        self.nodes.push(Node {
            id,
            target: Target::Placeholder(name.into()),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            meta: NodeMeta::default(),
        });
        self.graphargs.push(GraphArg {
            source,
            node: id,
            erased: false,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> TraceResult<&Node<T>> {
        self.nodes
            .get(id.0 as usize)
            .ok_or_else(|| TraceError::internal(format!("unknown node {id}")))
    }

    pub fn nodes(&self) -> &[Node<T>] {
        &self.nodes
    }

    pub fn example_value(&self, id: NodeId) -> TraceResult<Option<&ExampleValue<T>>> {
        Ok(self.node(id)?.meta.example_value())
    }

    pub(crate) fn set_example_value(
        &mut self,
        id: NodeId,
        value: ExampleValue<T>,
    ) -> TraceResult<()> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or_else(|| TraceError::internal(format!("unknown node {id}")))?
            .set_example_value(value)
    }

    /// Graph inputs still required by the captured graph.
    pub fn graphargs(&self) -> impl Iterator<Item = &GraphArg> {
        self.graphargs.iter().filter(|arg| !arg.erased)
    }

    /// Removes every live graph input read from `source`. Returns how many were erased.
    pub fn erase_graphargs_with_source(&mut self, source: &Source) -> usize {
        let mut erased = 0;
        for arg in self.graphargs.iter_mut() {
            if !arg.erased && &arg.source == source {
                arg.erased = true;
                erased += 1;
            }
        }
        erased
    }

    /// Records that `node` was deoptimized. Returns `false` if it already was.
    pub(crate) fn mark_deoptimized(&mut self, node: NodeId) -> bool {
        self.deoptimized.insert(node)
    }

    pub fn is_deoptimized(&self, node: NodeId) -> bool {
        self.deoptimized.contains(&node)
    }

    pub fn register_module(&mut self, path: impl Into<String>, module: ModuleHandle<T>) {
        self.modules.insert(path.into(), module);
    }

    pub fn module(&self, path: &str) -> Option<ModuleHandle<T>> {
        self.modules.get(path).cloned()
    }

    /// Downgrades matching guards of the cumulative set to constant matches.
    pub(crate) fn downgrade_guards(&mut self, targets: &[Guard]) -> usize {
        self.guards.downgrade_to_constant_match(targets)
    }

    /// Serializable snapshot of the graph structure for debug dumps.
    pub fn graph_summary(&self) -> GraphSummary {
        GraphSummary {
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeSummary {
                    id: node.id,
                    op: node.op(),
                    target: node.target.to_string(),
                    args: node.args.clone(),
                    kwargs: node.kwargs.clone(),
                    example: node.meta.example_value().map(ExampleValue::type_name),
                })
                .collect(),
            inputs: self
                .graphargs()
                .map(|arg| (arg.source.name(), arg.node))
                .collect(),
            guards: self.guards.ordered().into_iter().cloned().collect(),
        }
    }

    fn allocate_node(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub op: NodeOp,
    pub target: String,
    pub args: Vec<Argument>,
    pub kwargs: BTreeMap<String, Argument>,
    pub example: Option<String>,
}

/// Structure-only view of an [`OutputGraph`].
#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub nodes: Vec<NodeSummary>,
    pub inputs: Vec<(String, NodeId)>,
    pub guards: Vec<Guard>,
}

impl GraphSummary {
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
