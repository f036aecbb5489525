//! Captured dataflow graph.
//!
//! Nodes are appended in program order and never rewritten. Each node carries a single
//! write-once slot for its representative value, which later nodes read when their own
//! operands are resolved.
mod node;
mod output;

pub use node::{Argument, Builtin, Node, NodeId, NodeMeta, NodeOp, Target};
pub use output::{GraphArg, GraphSummary, NodeSummary, OutputGraph};
