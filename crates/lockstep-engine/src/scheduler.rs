//! Eager-start scheduling of one activation.
//!
//! Every operation is spawned immediately, in declaration order. A task
//! suspends only while awaiting its read bindings; once they resolve it
//! takes a worker-pool slot and runs its body. Latency of independent
//! operations therefore overlaps: two 100ms calls with no data dependency
//! finish in roughly 100ms, not 200ms.
//!
//! Failures travel only along dependency edges. When a producer fails, its
//! output bindings fail with the cause attached, each dependent fails in
//! turn with one more link in the chain, and unrelated branches keep
//! running to completion.

use std::collections::HashMap;
use std::sync::Arc;

use lockstep_core::{Effect, Value};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::binding::BindingStore;
use crate::config::EngineConfig;
use crate::context::ActivationContext;
use crate::error::{EngineError, EngineResult};
use crate::graph::DependencyGraph;
use crate::op::{Body, OpIndex, OpInputs, OpOutput, Operation};
use crate::pipeline::{self, PipelineEnv};
use crate::pool::WorkerPool;
use crate::projector::{ProjectorHandle, ResultProjector};

const TRACING_TARGET: &str = "lockstep_engine::scheduler";

/// What one finished activation amounted to.
#[derive(Debug)]
pub(crate) struct ActivationRun {
    /// The terminal operation's outcome, or `Null` when none is flagged.
    pub(crate) result: EngineResult<Value>,
    /// Effects delivered to the sink, in declaration order.
    pub(crate) effects_released: usize,
    /// Operations spawned for this activation.
    pub(crate) ops_executed: usize,
    /// Operations that ended in failure.
    pub(crate) ops_failed: usize,
}

/// Runs one activation to completion.
///
/// Build errors (undeclared reference, duplicate producer, forward
/// reference) surface before anything is spawned. After that point the
/// activation always runs to quiescence: every spawned task reports to the
/// projector exactly once, success or failure.
pub(crate) async fn run_activation(
    operations: Vec<Operation>,
    ctx: &ActivationContext,
) -> EngineResult<ActivationRun> {
    let graph = DependencyGraph::build(&operations)?;

    let mut bindings = BindingStore::new();
    for (i, op) in operations.iter().enumerate() {
        for name in op.writes() {
            bindings.declare(name.clone(), OpIndex(i))?;
        }
    }
    let bindings = Arc::new(bindings);

    tracing::debug!(
        target: TRACING_TARGET,
        activation = %ctx.id(),
        operations = graph.op_count(),
        ready = graph.initially_ready().len(),
        "activation starting"
    );

    let projector = ResultProjector::spawn(Arc::clone(&ctx.sink));
    let terminal = graph.terminal();
    let (terminal_tx, terminal_rx) = oneshot::channel();
    let mut terminal_tx = Some(terminal_tx);

    let mut tasks = JoinSet::new();
    for (i, op) in operations.into_iter().enumerate() {
        let index = OpIndex(i);
        let spec = TaskSpec {
            index,
            label: op.label().map(str::to_owned),
            reads: op.reads().to_vec(),
            writes: op.writes().to_vec(),
            terminal_tx: if Some(index) == terminal {
                terminal_tx.take()
            } else {
                None
            },
            body: op.into_body(),
            bindings: Arc::clone(&bindings),
            cancel: ctx.cancel.clone(),
            pool: ctx.pool.clone(),
            config: Arc::clone(&ctx.config),
            projector: projector.handle(),
        };
        tasks.spawn(run_op(spec));
    }

    let mut ops_failed = 0usize;
    let mut first_failure: Option<(OpIndex, EngineError)> = None;
    while let Some(joined) = tasks.join_next().await {
        let (index, failure) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                ops_failed += 1;
                if first_failure.is_none() {
                    first_failure =
                        Some((OpIndex(usize::MAX), EngineError::Internal(format!(
                            "operation task panicked: {e}"
                        ))));
                }
                continue;
            }
        };
        if let Some(error) = failure {
            ops_failed += 1;
            let earlier = first_failure
                .as_ref()
                .is_none_or(|(existing, _)| index < *existing);
            if earlier {
                first_failure = Some((index, error));
            }
        }
    }

    let effects_released = projector.finish().await?;

    let result = match terminal {
        Some(index) => terminal_rx.await.unwrap_or_else(|_| {
            Err(EngineError::Internal(format!(
                "terminal operation {index} never reported"
            )))
        }),
        None => match first_failure {
            Some((_, error)) => Err(error),
            None => Ok(Value::Null),
        },
    };

    tracing::debug!(
        target: TRACING_TARGET,
        activation = %ctx.id(),
        ops_failed,
        effects_released,
        succeeded = result.is_ok(),
        "activation finished"
    );

    Ok(ActivationRun {
        result,
        effects_released,
        ops_executed: graph.op_count(),
        ops_failed,
    })
}

struct TaskSpec {
    index: OpIndex,
    label: Option<String>,
    reads: Vec<String>,
    writes: Vec<String>,
    terminal_tx: Option<oneshot::Sender<EngineResult<Value>>>,
    body: Body,
    bindings: Arc<BindingStore>,
    cancel: CancellationToken,
    pool: WorkerPool,
    config: Arc<EngineConfig>,
    projector: ProjectorHandle,
}

/// One operation task: await reads, run the body, settle writes, report.
async fn run_op(spec: TaskSpec) -> (OpIndex, Option<EngineError>) {
    let TaskSpec {
        index,
        label,
        reads,
        writes,
        terminal_tx,
        body,
        bindings,
        cancel,
        pool,
        config,
        projector,
    } = spec;

    for name in &writes {
        if let Err(e) = bindings.mark_pending(name) {
            tracing::error!(target: TRACING_TARGET, op = %index, error = %e, "pending mark failed");
        }
    }

    let outcome = execute_body(body, &reads, &writes, &bindings, &cancel, &pool, &config).await;

    match outcome {
        Ok(output) => {
            for (name, value) in writes.iter().zip(output.values.iter()) {
                if let Err(e) = bindings.resolve(name, value.clone()) {
                    tracing::error!(target: TRACING_TARGET, op = %index, error = %e, "resolve failed");
                }
            }
            let response = terminal_response(&output);
            projector.submit(index, output.effects);
            if let Some(tx) = terminal_tx {
                let _ = tx.send(Ok(response));
            }
            (index, None)
        }
        Err(error) => {
            tracing::debug!(
                target: TRACING_TARGET,
                op = %index,
                label = label.as_deref().unwrap_or(""),
                error = %error,
                "operation failed"
            );
            let cause = Arc::new(error.clone());
            for name in &writes {
                if let Err(e) = bindings.fail(name, Arc::clone(&cause)) {
                    tracing::error!(target: TRACING_TARGET, op = %index, error = %e, "fail mark failed");
                }
            }
            // Failed operations still report so the ordering gate advances.
            projector.submit(index, Vec::new());
            if let Some(tx) = terminal_tx {
                let _ = tx.send(Err(error.clone()));
            }
            (index, Some(error))
        }
    }
}

/// Awaits the read set, then runs the body under a worker-pool slot.
///
/// The dependency wait happens before the slot is taken: a suspended
/// operation never blocks a runnable one out of the pool.
async fn execute_body(
    body: Body,
    reads: &[String],
    writes: &[String],
    bindings: &Arc<BindingStore>,
    cancel: &CancellationToken,
    pool: &WorkerPool,
    config: &Arc<EngineConfig>,
) -> EngineResult<OpOutput> {
    let mut inputs = HashMap::with_capacity(reads.len());
    for name in reads {
        let value = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            value = bindings.await_value(name) => value?,
        };
        inputs.insert(name.clone(), value);
    }

    let output = match body {
        Body::Effect(f) => {
            let work = f(OpInputs::new(inputs));
            tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                out = pool.run(work) => out.and_then(|inner| inner)?,
            }
        }
        Body::Pipeline(plan) => {
            let env = PipelineEnv {
                bindings: Arc::clone(bindings),
                cancel: cancel.clone(),
                config: Arc::clone(config),
            };
            let results = pool.run(pipeline::execute(plan, &env)).await??;
            let mut output = OpOutput::empty();
            for result in results {
                output.values.push(result.value);
                output.effects.extend(result.effects);
            }
            output
        }
    };

    if output.values.len() != writes.len() {
        return Err(EngineError::Internal(format!(
            "operation produced {} values for {} writes",
            output.values.len(),
            writes.len()
        )));
    }
    Ok(output)
}

/// The activation-level value a terminal operation settles on: its last
/// response effect if it emitted one, otherwise its first produced value.
fn terminal_response(output: &OpOutput) -> Value {
    output
        .effects
        .iter()
        .rev()
        .find_map(|effect| match effect {
            Effect::Response { value } => Some(value.clone()),
            _ => None,
        })
        .or_else(|| output.values.first().cloned())
        .unwrap_or(Value::Null)
}
