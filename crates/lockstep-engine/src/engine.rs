//! The engine facade.
//!
//! Owns the worker pool, the activation admission semaphore, and the
//! metrics registry. One engine serves many activations; each activation
//! gets its own context, binding namespace, and effect ordering gate.

use std::sync::Arc;
use std::time::Duration;

use lockstep_core::{EffectSink, Value};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::ActivationContext;
use crate::error::{EngineError, EngineResult};
use crate::metrics::{ActivationSample, MetricsRegistry, OutcomeKind};
use crate::op::Operation;
use crate::pool::WorkerPool;
use crate::scheduler;

const TRACING_TARGET: &str = "lockstep_engine::engine";

/// What one activation came to, as seen by the caller.
#[derive(Debug)]
pub struct ActivationOutcome {
    /// The activation id.
    pub activation_id: Uuid,
    /// The terminal operation's outcome.
    pub result: EngineResult<Value>,
    /// Effects delivered to the sink, in declaration order.
    pub effects_released: usize,
    /// Wall-clock duration of the activation.
    pub duration: Duration,
}

/// The execution engine.
pub struct Engine {
    config: Arc<EngineConfig>,
    pool: WorkerPool,
    admissions: Semaphore,
    sink: Arc<dyn EffectSink>,
    metrics: MetricsRegistry,
}

impl Engine {
    /// Creates an engine delivering effects to `sink`.
    pub fn new(config: EngineConfig, sink: Arc<dyn EffectSink>) -> Self {
        let pool = WorkerPool::new(config.worker_ceiling);
        let admissions = Semaphore::new(config.max_concurrent_activations);
        Self {
            config: Arc::new(config),
            pool,
            admissions,
            sink,
            metrics: MetricsRegistry::new(),
        }
    }

    /// Creates an engine with default configuration.
    pub fn with_defaults(sink: Arc<dyn EffectSink>) -> Self {
        Self::new(EngineConfig::default(), sink)
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Finished-activation metrics.
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Creates a context for one activation.
    ///
    /// Callers that need external cancellation keep a clone and cancel it;
    /// otherwise [`Engine::run`] creates one internally.
    pub fn begin_activation(&self) -> ActivationContext {
        ActivationContext::new(
            self.pool.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.config),
        )
    }

    /// Runs one activation to completion under a fresh context.
    pub async fn run(&self, operations: Vec<Operation>) -> EngineResult<ActivationOutcome> {
        let ctx = self.begin_activation();
        self.run_with(ctx, operations).await
    }

    /// Runs one activation under `ctx`.
    ///
    /// Admission waits for a free activation slot; the deadline starts
    /// counting only once admitted. On timeout the activation is cancelled
    /// and awaited to quiescence, so no task outlives the call.
    pub async fn run_with(
        &self,
        ctx: ActivationContext,
        operations: Vec<Operation>,
    ) -> EngineResult<ActivationOutcome> {
        let _admission = self
            .admissions
            .acquire()
            .await
            .map_err(|_| EngineError::Internal("engine shut down".into()))?;

        tracing::info!(
            target: TRACING_TARGET,
            activation = %ctx.id(),
            operations = operations.len(),
            "activation admitted"
        );

        let started = Instant::now();
        let externally_cancelled = ctx.is_cancelled();
        let mut timed_out = false;

        let mut activation = std::pin::pin!(scheduler::run_activation(operations, &ctx));
        let deadline = tokio::time::sleep(self.config.default_timeout);
        tokio::pin!(deadline);

        let run = tokio::select! {
            run = &mut activation => run?,
            _ = &mut deadline => {
                timed_out = true;
                ctx.cancel();
                activation.await?
            }
        };
        let duration = started.elapsed();

        let result = if timed_out {
            Err(EngineError::Timeout)
        } else {
            run.result
        };
        let outcome_kind = match &result {
            Ok(_) => OutcomeKind::Succeeded,
            Err(EngineError::Timeout) => OutcomeKind::TimedOut,
            Err(error)
                if externally_cancelled
                    || matches!(error.root_cause(), EngineError::Cancelled) =>
            {
                OutcomeKind::Cancelled
            }
            Err(_) => OutcomeKind::Failed,
        };

        self.metrics.record(ActivationSample {
            activation_id: ctx.id(),
            started: ctx.started(),
            duration_ms: duration.as_millis() as u64,
            outcome: outcome_kind,
            ops_executed: run.ops_executed,
            ops_failed: run.ops_failed,
            effects_released: run.effects_released,
        });

        Ok(ActivationOutcome {
            activation_id: ctx.id(),
            result,
            effects_released: run.effects_released,
            duration,
        })
    }
}
