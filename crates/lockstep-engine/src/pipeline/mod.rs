//! Collection pipelines: stage descriptors, classification, streaming
//! execution, and spill-backed barriers.
//!
//! A pipeline is a source, a shared prefix of transformation stages, and
//! one or more consumers (drains or barriers), each writing exactly one
//! binding. The stream executor compiles the transformation prefix into a
//! single element-at-a-time pass and decides per consumer set whether to
//! fuse, tee, or spill.

mod classify;
mod spill;
mod stream;

pub use classify::StageKind;
pub(crate) use stream::{PipelineEnv, execute};
pub use stream::{ElementStream, Tee};

use std::sync::Arc;

use lockstep_core::{Effect, ElementSource, Value};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

/// Predicate applied to each element by a filter stage.
pub type PredicateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
/// One-to-one element transform applied by a map stage.
pub type MapFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;
/// Key extractor for grouping barriers.
pub type KeyFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
/// Accumulator function for fold drains.
pub type FoldFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;
/// Per-element effect constructor for side-effecting drains.
pub type EachFn = Arc<dyn Fn(&Value) -> Effect + Send + Sync>;

/// An element-at-a-time, streamable stage.
#[derive(Clone, AsRefStr)]
pub enum TransformStage {
    /// Keeps elements matching the predicate.
    Filter(PredicateFn),
    /// Replaces each element with the function's result.
    Map(MapFn),
    /// Passes at most the first `n` elements.
    Take(usize),
    /// Discards the first `n` elements.
    Skip(usize),
}

impl TransformStage {
    /// Builds a filter stage from a plain closure.
    pub fn filter(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        TransformStage::Filter(Arc::new(predicate))
    }

    /// Builds a map stage from a plain closure.
    pub fn map(f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        TransformStage::Map(Arc::new(f))
    }
}

impl std::fmt::Debug for TransformStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformStage::Take(n) => write!(f, "Take({n})"),
            TransformStage::Skip(n) => write!(f, "Skip({n})"),
            other => f.write_str(other.as_ref()),
        }
    }
}

/// A stage consuming a stream into a scalar or an external effect.
#[derive(Clone, AsRefStr)]
pub enum Drain {
    /// Number of elements.
    Count,
    /// Numeric sum; integer as long as every element is an integer.
    Sum,
    /// Numeric average as a float; `Null` on an empty stream.
    Average,
    /// Smallest element by the value total order.
    Min,
    /// Largest element by the value total order.
    Max,
    /// First element; `Null` on an empty stream.
    First,
    /// Last element; `Null` on an empty stream.
    Last,
    /// General pure fold from an initial accumulator.
    Fold {
        /// Initial accumulator value.
        init: Value,
        /// Combining function.
        fold: FoldFn,
    },
    /// Side-effecting per-element drain; never fused.
    Each(EachFn),
}

impl Drain {
    /// Builds a fold drain from a plain closure.
    pub fn fold(init: Value, f: impl Fn(Value, Value) -> Value + Send + Sync + 'static) -> Self {
        Drain::Fold {
            init,
            fold: Arc::new(f),
        }
    }

    /// Builds a side-effecting drain from a plain closure.
    pub fn each(f: impl Fn(&Value) -> Effect + Send + Sync + 'static) -> Self {
        Drain::Each(Arc::new(f))
    }

    /// Static fusion-eligibility table.
    ///
    /// Only pure, side-effect-free aggregations may share a traversal;
    /// `Each` emits observable effects whose order must track the element
    /// order of its own consumer, so it is excluded.
    pub fn is_pure(&self) -> bool {
        !matches!(self, Drain::Each(_))
    }
}

impl std::fmt::Debug for Drain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Sort direction for the ordering barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// A stage requiring the complete input before producing output.
#[derive(Clone, AsRefStr)]
pub enum Barrier {
    /// Orders elements by the value total order.
    Sort(SortOrder),
    /// Removes duplicates, keeping first occurrences in input order.
    Distinct,
    /// Groups elements by key into a record of lists.
    GroupBy(KeyFn),
}

impl Barrier {
    /// Builds a grouping barrier from a plain closure.
    pub fn group_by(key: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Barrier::GroupBy(Arc::new(key))
    }
}

impl std::fmt::Debug for Barrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Barrier::Sort(order) => write!(f, "Sort({order})"),
            other => f.write_str(other.as_ref()),
        }
    }
}

/// Terminal stage of one consumer.
#[derive(Debug, Clone)]
pub enum ConsumerStage {
    /// A drain (scalar or side effect).
    Drain(Drain),
    /// A barrier (whole-collection operation).
    Barrier(Barrier),
}

/// One consumer attached to the shared upstream.
#[derive(Debug, Clone)]
pub struct Consumer {
    /// The terminal stage.
    pub stage: ConsumerStage,
    /// Binding this consumer writes.
    pub writes: String,
}

impl Consumer {
    /// Creates a drain consumer writing `binding`.
    pub fn drain(drain: Drain, binding: impl Into<String>) -> Self {
        Self {
            stage: ConsumerStage::Drain(drain),
            writes: binding.into(),
        }
    }

    /// Creates a barrier consumer writing `binding`.
    pub fn barrier(barrier: Barrier, binding: impl Into<String>) -> Self {
        Self {
            stage: ConsumerStage::Barrier(barrier),
            writes: binding.into(),
        }
    }
}

/// Per-source override of the streaming/eager heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum StreamingMode {
    /// Materialize small sources up front, stream everything else.
    #[default]
    Auto,
    /// Always stream, regardless of size.
    Streaming,
    /// Always materialize up front.
    Eager,
}

/// Where a pipeline's elements come from.
pub enum SourceSpec {
    /// A resolved `List` binding from this activation.
    Binding(String),
    /// An abstract chunked-pull element source supplied by a collaborator.
    Elements(Box<dyn ElementSource>),
}

impl std::fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSpec::Binding(name) => f.debug_tuple("Binding").field(name).finish(),
            SourceSpec::Elements(_) => f.write_str("Elements"),
        }
    }
}

/// A complete pipeline description for one operation.
#[derive(Debug)]
pub struct PipelinePlan {
    /// The element source.
    pub source: SourceSpec,
    /// Streaming/eager override for the source.
    pub mode: StreamingMode,
    /// Shared transformation prefix, applied in order.
    pub transforms: Vec<TransformStage>,
    /// Consumers attached to the transformed stream.
    pub consumers: Vec<Consumer>,
}

impl PipelinePlan {
    /// Creates a plan reading a `List` binding.
    pub fn from_binding(name: impl Into<String>, mode: StreamingMode) -> Self {
        Self {
            source: SourceSpec::Binding(name.into()),
            mode,
            transforms: Vec::new(),
            consumers: Vec::new(),
        }
    }

    /// Creates a plan over a collaborator element source.
    pub fn from_elements(source: impl ElementSource + 'static, mode: StreamingMode) -> Self {
        Self {
            source: SourceSpec::Elements(Box::new(source)),
            mode,
            transforms: Vec::new(),
            consumers: Vec::new(),
        }
    }

    /// Appends a transformation stage.
    pub fn with_transform(mut self, stage: TransformStage) -> Self {
        self.transforms.push(stage);
        self
    }

    /// Attaches a consumer.
    pub fn with_consumer(mut self, consumer: Consumer) -> Self {
        self.consumers.push(consumer);
        self
    }
}
