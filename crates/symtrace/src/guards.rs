//! Guard predicates emitted while tracing.
//!
//! A guard pairs a [`Source`] with the check that must hold for a captured graph to be reused.
//! The engine only appends guards. The single exception is deoptimization, which downgrades
//! volatile guards to exact constant matches.

use serde::{Deserialize, Serialize};

use crate::source::Source;

/// Check performed against the value at `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardKind {
    /// `type(x) is T`
    TypeMatch,
    /// `id(x) == id(captured)`
    IdMatch,
    /// The function object is the one that was inlined.
    FunctionMatch,
    /// `x == captured`
    ConstantMatch,
    /// dtype, device, shape, stride, and requires-grad match the captured tensor.
    TensorMatch,
}

impl GuardKind {
    /// Evaluation rank; lower runs first.
    ///
    /// Type checks run before any guard that reads tensor metadata.
    fn priority(self) -> u8 {
        match self {
            GuardKind::TypeMatch => 0,
            GuardKind::IdMatch | GuardKind::FunctionMatch => 1,
            GuardKind::ConstantMatch => 2,
            GuardKind::TensorMatch => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Guard {
    pub source: Source,
    pub kind: GuardKind,
    /// Valid only for the current trace and must not be reused as-is.
    pub volatile: bool,
}

impl Guard {
    pub fn new(source: Source, kind: GuardKind) -> Self {
        Guard {
            source,
            kind,
            volatile: false,
        }
    }

    pub fn volatile(source: Source, kind: GuardKind) -> Self {
        Guard {
            source,
            kind,
            volatile: true,
        }
    }

    pub fn name(&self) -> String {
        self.source.name()
    }
}

/// Insertion-ordered set of guards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardSet {
    guards: Vec<Guard>,
}

impl GuardSet {
    pub fn new() -> Self {
        GuardSet::default()
    }

    /// Adds `guard` unless an identical guard is already present.
    pub fn insert(&mut self, guard: Guard) -> bool {
        if self.guards.contains(&guard) {
            return false;
        }
        self.guards.push(guard);
        true
    }

    pub fn extend(&mut self, other: &GuardSet) {
        for guard in &other.guards {
            self.insert(guard.clone());
        }
    }

    pub fn contains(&self, guard: &Guard) -> bool {
        self.guards.contains(guard)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Guard> {
        self.guards.iter()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Guards in evaluation order: type matches first, ties kept in insertion order.
    pub fn ordered(&self) -> Vec<&Guard> {
        let mut ordered: Vec<&Guard> = self.guards.iter().collect();
        ordered.sort_by_key(|guard| guard.kind.priority());
        ordered
    }

    /// Volatile members of the set.
    pub fn volatile_guards(&self) -> Vec<Guard> {
        self.guards.iter().filter(|g| g.volatile).cloned().collect()
    }

    /// Rewrites every guard equal to one of `targets` into a constant match.
    ///
    /// Returns how many guards were rewritten.
    pub fn downgrade_to_constant_match(&mut self, targets: &[Guard]) -> usize {
        let mut rewritten = 0;
        for guard in &mut self.guards {
            if targets.contains(guard) {
                guard.kind = GuardKind::ConstantMatch;
                rewritten += 1;
            }
        }
        self.dedup();
        rewritten
    }

    fn dedup(&mut self) {
        let mut unique: Vec<Guard> = Vec::with_capacity(self.guards.len());
        for guard in self.guards.drain(..) {
            if !unique.contains(&guard) {
                unique.push(guard);
            }
        }
        self.guards = unique;
    }
}

impl FromIterator<Guard> for GuardSet {
    fn from_iter<I: IntoIterator<Item = Guard>>(iter: I) -> Self {
        let mut set = GuardSet::new();
        for guard in iter {
            set.insert(guard);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_guards_are_ordered_before_tensor_guards() {
        let x = Source::local("x");
        let set: GuardSet = [
            Guard::new(x.clone(), GuardKind::TensorMatch),
            Guard::new(x.attr("shape"), GuardKind::ConstantMatch),
            Guard::new(x.clone(), GuardKind::TypeMatch),
        ]
        .into_iter()
        .collect();

        let kinds: Vec<GuardKind> = set.ordered().iter().map(|g| g.kind).collect();
        assert_eq!(
            kinds,
            vec![
                GuardKind::TypeMatch,
                GuardKind::ConstantMatch,
                GuardKind::TensorMatch
            ]
        );
    }

    #[test]
    fn downgrade_only_touches_matching_guards() {
        let x = Source::local("x");
        let y = Source::local("y");
        let mut set = GuardSet::new();
        set.insert(Guard::volatile(x.clone(), GuardKind::TensorMatch));
        set.insert(Guard::new(y.clone(), GuardKind::TensorMatch));

        let targets = set.volatile_guards();
        assert_eq!(set.downgrade_to_constant_match(&targets), 1);
        assert!(set.iter().any(|g| g.source == x && g.kind == GuardKind::ConstantMatch));
        assert!(set.iter().any(|g| g.source == y && g.kind == GuardKind::TensorMatch));
    }

    #[test]
    fn duplicate_inserts_are_ignored() {
        let mut set = GuardSet::new();
        assert!(set.insert(Guard::new(Source::local("x"), GuardKind::TypeMatch)));
        assert!(!set.insert(Guard::new(Source::local("x"), GuardKind::TypeMatch)));
        assert_eq!(set.len(), 1);
    }
}
