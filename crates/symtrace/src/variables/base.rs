use crate::guards::{Guard, GuardKind, GuardSet};
use crate::library::TensorLike;
use crate::source::Source;

use super::VariableTracker;

/// Identity marker for containers created during tracing, so mutations can be tracked.
///
/// Ids are allocated by [`OutputGraph::new_mutable_local`](crate::graph::OutputGraph) and are
/// unique within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutableLocal(u64);

impl MutableLocal {
    pub(crate) fn from_id(id: u64) -> Self {
        MutableLocal(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// State every variable carries besides its payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableOptions {
    pub guards: GuardSet,
    pub source: Option<Source>,
    pub mutable_local: Option<MutableLocal>,
}

impl VariableOptions {
    pub fn new() -> Self {
        VariableOptions::default()
    }

    /// Union of the guards of `vars`. Sources are never propagated.
    pub fn propagate<'a, T, I>(vars: I) -> Self
    where
        T: TensorLike,
        I: IntoIterator<Item = &'a VariableTracker<T>>,
    {
        let mut guards = GuardSet::new();
        for var in vars {
            guards.extend(&var.options().guards);
        }
        VariableOptions {
            guards,
            source: None,
            mutable_local: None,
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_guard(mut self, guard: Guard) -> Self {
        self.guards.insert(guard);
        self
    }

    pub fn with_guards(mut self, guards: &GuardSet) -> Self {
        self.guards.extend(guards);
        self
    }

    /// Guard of `kind` on this value's source, if it has one.
    pub fn make_guard(&self, kind: GuardKind) -> Option<Guard> {
        self.source.as_ref().map(|source| Guard::new(source.clone(), kind))
    }
}
