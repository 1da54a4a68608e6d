//! Engine error types.
//!
//! Failures fan out: one failed producer can fail many dependents, and the
//! same cause must be attached to each of them. Non-clonable sources are
//! therefore held behind `Arc` so the whole error type stays `Clone` while
//! `std::error::Error::source` chains remain intact.

use std::sync::Arc;

use thiserror::Error;

use crate::op::OpIndex;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while building or running an activation.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// An operation reads a binding no operation produces.
    ///
    /// Surfaces from the graph builder, before any execution begins.
    #[error("operation {index} reads undeclared binding `{name}`")]
    UndeclaredReference {
        /// The unresolved binding name.
        name: String,
        /// The reading operation.
        index: OpIndex,
    },

    /// Two operations declare the same output binding.
    #[error("binding `{name}` produced by both operation {first} and operation {second}")]
    DuplicateProducer {
        /// The doubly-produced binding name.
        name: String,
        /// The first producer.
        first: OpIndex,
        /// The second producer.
        second: OpIndex,
    },

    /// An operation reads a binding produced only later in source order.
    #[error("operation {reader} reads binding `{name}` before operation {producer} produces it")]
    ForwardReference {
        /// The binding name read too early.
        name: String,
        /// The producing operation.
        producer: OpIndex,
        /// The reading operation.
        reader: OpIndex,
    },

    /// A binding this operation depends on failed.
    #[error("binding `{binding}` failed")]
    BindingFailed {
        /// The failed binding name.
        binding: String,
        /// The originating failure.
        #[source]
        cause: Arc<EngineError>,
    },

    /// The activation was cancelled.
    #[error("activation cancelled")]
    Cancelled,

    /// The activation exceeded its deadline.
    #[error("activation timed out")]
    Timeout,

    /// Secondary-storage materialization for a barrier failed.
    #[error("spill failed: {message}")]
    Spill {
        /// What the spill machinery was doing.
        message: String,
        /// The underlying I/O failure.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Encoding or decoding a spill row failed.
    #[error("spill row codec failed")]
    SpillCodec(#[source] Arc<serde_json::Error>),

    /// A collaborator's asynchronous call failed.
    #[error("external call failed while producing `{operation}`")]
    External {
        /// The binding or label the call was producing.
        operation: String,
        /// The collaborator failure.
        #[source]
        source: Arc<lockstep_core::Error>,
    },

    /// An element source failed mid-stream.
    #[error("element source failed")]
    Source(#[source] Arc<lockstep_core::Error>),

    /// Invariant violation inside the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Wraps a spill I/O failure.
    pub fn spill(message: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Spill {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Wraps a collaborator failure onto the binding it was producing.
    pub fn external(operation: impl Into<String>, source: lockstep_core::Error) -> Self {
        EngineError::External {
            operation: operation.into(),
            source: Arc::new(source),
        }
    }

    /// Marks `binding` failed because of `cause`, preserving the chain.
    pub fn binding_failed(binding: impl Into<String>, cause: EngineError) -> Self {
        EngineError::BindingFailed {
            binding: binding.into(),
            cause: Arc::new(cause),
        }
    }

    /// Walks the cause chain to the originating failure.
    pub fn root_cause(&self) -> &EngineError {
        match self {
            EngineError::BindingFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Returns whether this is a pre-execution build failure.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            EngineError::UndeclaredReference { .. }
                | EngineError::DuplicateProducer { .. }
                | EngineError::ForwardReference { .. }
        )
    }
}

impl From<lockstep_core::Error> for EngineError {
    fn from(source: lockstep_core::Error) -> Self {
        EngineError::Source(Arc::new(source))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(source: serde_json::Error) -> Self {
        EngineError::SpillCodec(Arc::new(source))
    }
}
