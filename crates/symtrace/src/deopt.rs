//! Turning a captured unspecialized scalar back into a literal.
//!
//! Once the tracer learns that a scalar input has to be a fixed value after all, the value is
//! removed from the graph inputs and its volatile guards become exact constant matches.

use crate::context::TraceContext;
use crate::error::{TraceError, TraceResult};
use crate::library::{TensorLibrary, TensorLike};
use crate::logging::GRAPH_TARGET;
use crate::variables::{ConstantVariable, TensorVariable, VariableOptions, VariableTracker};

impl<T: TensorLike> TensorVariable<T> {
    /// Specializes an unspecialized numpy or Python scalar to its raw value.
    ///
    /// Each node can be deoptimized once.
    pub fn as_specialized<B>(&self, tx: &mut TraceContext<B>) -> TraceResult<VariableTracker<T>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        if !self.kind.is_unspecialized() {
            return Err(TraceError::internal(format!(
                "{} cannot be specialized",
                self.kind.name()
            )));
        }
        let raw_value = self.raw_value().ok_or_else(|| {
            TraceError::internal(format!("{} has no raw value", self.proxy))
        })?;
        if !tx.output.mark_deoptimized(self.proxy) {
            return Err(TraceError::internal(format!(
                "{} was already deoptimized",
                self.proxy
            )));
        }

        let erased = match &self.options.source {
            Some(source) => tx.output.erase_graphargs_with_source(source),
            None => 0,
        };

        let volatile = self.options.guards.volatile_guards();
        let mut guards = self.options.guards.clone();
        guards.downgrade_to_constant_match(&volatile);
        tx.output.downgrade_guards(&volatile);

        log::debug!(
            target: GRAPH_TARGET,
            "deoptimized {} to {raw_value:?} ({erased} graph inputs erased, {} guards downgraded)",
            self.proxy,
            volatile.len()
        );
        Ok(VariableTracker::Constant(ConstantVariable::new(
            raw_value.into(),
            VariableOptions::new().with_guards(&guards),
        )))
    }
}
