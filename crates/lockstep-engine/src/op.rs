//! The operation model: one statement instance per activation.
//!
//! Operations are immutable once constructed. The surrounding system (the
//! part that parsed and type-checked the surface program) supplies each
//! operation's effect closure; the engine only cares about the declared
//! read and write sets and the terminal flag.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use lockstep_core::{Effect, Value};

use crate::error::{EngineError, EngineResult};
use crate::pipeline::{PipelinePlan, SourceSpec};

/// Position of an operation in source order.
///
/// Stable for the lifetime of the activation; the result projector keys all
/// externally observable effects by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpIndex(pub usize);

impl std::fmt::Display for OpIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved input values handed to an effect closure.
#[derive(Debug, Clone, Default)]
pub struct OpInputs {
    values: HashMap<String, Arc<Value>>,
}

impl OpInputs {
    /// Creates inputs from resolved bindings.
    pub fn new(values: HashMap<String, Arc<Value>>) -> Self {
        Self { values }
    }

    /// Returns the value bound to `name`.
    pub fn get(&self, name: &str) -> EngineResult<&Value> {
        self.values
            .get(name)
            .map(Arc::as_ref)
            .ok_or_else(|| EngineError::Internal(format!("input `{name}` not resolved")))
    }

    /// Returns a cloned value bound to `name`.
    pub fn value(&self, name: &str) -> EngineResult<Value> {
        self.get(name).cloned()
    }

    /// Returns the shared handle bound to `name`.
    pub fn get_arc(&self, name: &str) -> EngineResult<Arc<Value>> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Internal(format!("input `{name}` not resolved")))
    }

    /// Returns the number of resolved inputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether there are no inputs.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Values and effects produced by one operation.
///
/// `values` match the operation's write set positionally.
#[derive(Debug, Clone, Default)]
pub struct OpOutput {
    /// Produced binding values, one per declared write.
    pub values: Vec<Value>,
    /// Externally observable effects, in the order they occurred.
    pub effects: Vec<Effect>,
}

impl OpOutput {
    /// An output with no values and no effects.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An output producing a single value.
    pub fn value(value: Value) -> Self {
        Self {
            values: vec![value],
            effects: Vec::new(),
        }
    }

    /// An output producing several values.
    pub fn values(values: Vec<Value>) -> Self {
        Self {
            values,
            effects: Vec::new(),
        }
    }

    /// Appends an effect to this output.
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Opaque effect closure supplied by the surrounding system.
pub type EffectFn = Box<dyn FnOnce(OpInputs) -> BoxFuture<'static, EngineResult<OpOutput>> + Send>;

/// What an operation does when started.
pub enum Body {
    /// An opaque async effect (HTTP call, file read, pure compute, ...).
    Effect(EffectFn),
    /// A collection pipeline executed by the stream executor.
    Pipeline(PipelinePlan),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Effect(_) => f.write_str("Effect"),
            Body::Pipeline(plan) => f.debug_tuple("Pipeline").field(plan).finish(),
        }
    }
}

/// One statement instance for the current activation.
#[derive(Debug)]
pub struct Operation {
    label: Option<String>,
    reads: Vec<String>,
    writes: Vec<String>,
    terminal: bool,
    body: Body,
}

impl Operation {
    /// Creates an operation around an opaque effect closure.
    pub fn effect<F, Fut>(f: F) -> Self
    where
        F: FnOnce(OpInputs) -> Fut + Send + 'static,
        Fut: Future<Output = EngineResult<OpOutput>> + Send + 'static,
    {
        Self {
            label: None,
            reads: Vec::new(),
            writes: Vec::new(),
            terminal: false,
            body: Body::Effect(Box::new(move |inputs| f(inputs).boxed())),
        }
    }

    /// Creates a pipeline operation.
    ///
    /// The read set (the source binding, if any) and write set (one binding
    /// per consumer) are derived from the plan.
    pub fn pipeline(plan: PipelinePlan) -> Self {
        let reads = match &plan.source {
            SourceSpec::Binding(name) => vec![name.clone()],
            SourceSpec::Elements(_) => Vec::new(),
        };
        let writes = plan
            .consumers
            .iter()
            .map(|consumer| consumer.writes.clone())
            .collect();
        Self {
            label: None,
            reads,
            writes,
            terminal: false,
            body: Body::Pipeline(plan),
        }
    }

    /// Adds binding names this operation reads.
    pub fn with_reads<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds binding names this operation writes.
    pub fn with_writes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes.extend(names.into_iter().map(Into::into));
        self
    }

    /// Marks this operation as the activation's terminal effect.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// Attaches a diagnostic label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns the diagnostic label, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Returns the binding names this operation reads.
    pub fn reads(&self) -> &[String] {
        &self.reads
    }

    /// Returns the binding names this operation writes.
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    /// Returns whether this is the activation's terminal operation.
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Consumes the operation, returning its body.
    pub(crate) fn into_body(self) -> Body {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Consumer, Drain, StreamingMode};

    #[test]
    fn test_effect_op_declares_sets() {
        let op = Operation::effect(|_| async { Ok(OpOutput::value(Value::Int(1))) })
            .with_reads(["a", "b"])
            .with_writes(["c"])
            .terminal();
        assert_eq!(op.reads(), ["a", "b"]);
        assert_eq!(op.writes(), ["c"]);
        assert!(op.is_terminal());
    }

    #[test]
    fn test_pipeline_op_derives_sets_from_plan() {
        let plan = PipelinePlan::from_binding("items", StreamingMode::Auto)
            .with_consumer(Consumer::drain(Drain::Count, "n"))
            .with_consumer(Consumer::drain(Drain::Sum, "total"));
        let op = Operation::pipeline(plan);
        assert_eq!(op.reads(), ["items"]);
        assert_eq!(op.writes(), ["n", "total"]);
        assert!(!op.is_terminal());
    }

    #[tokio::test]
    async fn test_inputs_lookup() {
        let mut values = HashMap::new();
        values.insert("x".to_owned(), Arc::new(Value::Int(41)));
        let inputs = OpInputs::new(values);
        assert_eq!(inputs.get("x").unwrap(), &Value::Int(41));
        assert!(inputs.get("missing").is_err());
    }
}
