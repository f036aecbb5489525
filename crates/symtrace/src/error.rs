//! Error taxonomy crossing the engine boundary.

use thiserror::Error;

use crate::library::ExecError;

/// Failure raised while capturing a traced operation.
#[derive(Debug, Error)]
pub enum TraceError {
    /// Deliberate refusal to capture a construct; the caller breaks the graph here.
    #[error("unsupported operator: {reason}")]
    Unsupported { reason: String },
    /// Member or method the symbolic value cannot answer.
    #[error("not implemented: {what}")]
    NotImplemented { what: String },
    /// The operation itself raised while producing its example value.
    #[error("runtime error while running {target}")]
    Runtime {
        target: String,
        #[source]
        source: ExecError,
    },
    /// The engine reached a state it has no mapping for. This is a defect, not a user error.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl TraceError {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        TraceError::Unsupported {
            reason: reason.into(),
        }
    }

    pub fn not_implemented(what: impl Into<String>) -> Self {
        TraceError::NotImplemented { what: what.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        TraceError::Internal(message.into())
    }

    /// True when the calling trace should abandon capture and run the region eagerly.
    pub fn is_graph_break(&self) -> bool {
        matches!(
            self,
            TraceError::Unsupported { .. } | TraceError::NotImplemented { .. }
        )
    }
}

/// Convenience alias for results produced by the engine.
pub type TraceResult<T> = Result<T, TraceError>;

/// Raises [`TraceError::Unsupported`] with `reason`.
pub fn unimplemented<T>(reason: impl Into<String>) -> TraceResult<T> {
    Err(TraceError::unsupported(reason))
}
