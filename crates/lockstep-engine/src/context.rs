//! Per-activation identity and shared services.

use std::sync::Arc;

use jiff::Timestamp;
use lockstep_core::EffectSink;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::pool::WorkerPool;

/// Identity and shared services of one activation.
///
/// Cloned into every operation task; the cancellation token is the only
/// mutable channel between them.
#[derive(Clone)]
pub struct ActivationContext {
    id: Uuid,
    started: Timestamp,
    pub(crate) cancel: CancellationToken,
    pub(crate) pool: WorkerPool,
    pub(crate) sink: Arc<dyn EffectSink>,
    pub(crate) config: Arc<EngineConfig>,
}

impl ActivationContext {
    /// Creates a context for a new activation.
    pub fn new(pool: WorkerPool, sink: Arc<dyn EffectSink>, config: Arc<EngineConfig>) -> Self {
        Self {
            id: Uuid::now_v7(),
            started: Timestamp::now(),
            cancel: CancellationToken::new(),
            pool,
            sink,
            config,
        }
    }

    /// Unique, time-ordered activation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the activation was created.
    pub fn started(&self) -> Timestamp {
        self.started
    }

    /// Requests cancellation; running operations observe it at their next
    /// suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A token that resolves when the activation is cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for ActivationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationContext")
            .field("id", &self.id)
            .field("started", &self.started)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
