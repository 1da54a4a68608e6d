//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types for ergonomic imports:
//!
//! ```rust
//! use lockstep_engine::prelude::*;
//! ```

pub use crate::binding::{BindingState, BindingStore};
pub use crate::config::{EngineConfig, EngineConfigBuilder};
pub use crate::context::ActivationContext;
pub use crate::engine::{ActivationOutcome, Engine};
pub use crate::error::{EngineError, EngineResult};
pub use crate::graph::DependencyGraph;
pub use crate::metrics::{ActivationSample, MetricsRegistry, OutcomeKind, ReportFormat};
pub use crate::op::{Body, OpIndex, OpInputs, OpOutput, Operation};
pub use crate::pipeline::{
    Barrier, Consumer, ConsumerStage, Drain, PipelinePlan, SortOrder, SourceSpec, StageKind,
    StreamingMode, Tee, TransformStage,
};
pub use crate::pool::WorkerPool;

pub use lockstep_core::prelude::*;
