//! Ordered effect release.
//!
//! Operations finish in whatever order the scheduler lets them, but their
//! effects must reach the sink in declaration order. The projector is a
//! dedicated task holding back each operation's effect batch until every
//! earlier operation has submitted; within a batch, delivery is serialized
//! so the sink sees one totally ordered sequence.

use std::collections::BTreeMap;
use std::sync::Arc;

use lockstep_core::{Effect, EffectSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{EngineError, EngineResult};
use crate::op::OpIndex;

const TRACING_TARGET: &str = "lockstep_engine::projector";

struct Submission {
    index: OpIndex,
    effects: Vec<Effect>,
}

/// Cloneable submission side of the projector, one per operation task.
///
/// Every operation submits exactly once, even when its batch is empty or
/// the operation failed; the gate can only advance past index `k` once
/// index `k` has reported.
#[derive(Clone)]
pub(crate) struct ProjectorHandle {
    tx: mpsc::UnboundedSender<Submission>,
}

impl ProjectorHandle {
    pub(crate) fn submit(&self, index: OpIndex, effects: Vec<Effect>) {
        // A closed channel means the activation was torn down; the
        // submission is moot.
        let _ = self.tx.send(Submission { index, effects });
    }
}

/// The ordering gate between operation completion and the effect sink.
pub(crate) struct ResultProjector {
    tx: mpsc::UnboundedSender<Submission>,
    task: JoinHandle<EngineResult<usize>>,
}

impl ResultProjector {
    /// Spawns the projector task over `sink`.
    pub(crate) fn spawn(sink: Arc<dyn EffectSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::run(rx, sink));
        Self { tx, task }
    }

    pub(crate) fn handle(&self) -> ProjectorHandle {
        ProjectorHandle {
            tx: self.tx.clone(),
        }
    }

    /// Closes the submission side and waits for every releasable effect to
    /// be delivered, returning the number delivered.
    ///
    /// Effects of operations past a gap (an operation that never submitted,
    /// e.g. under cancellation) stay unreleased.
    pub(crate) async fn finish(self) -> EngineResult<usize> {
        drop(self.tx);
        self.task
            .await
            .map_err(|e| EngineError::Internal(format!("projector task panicked: {e}")))?
    }

    async fn run(
        mut rx: mpsc::UnboundedReceiver<Submission>,
        sink: Arc<dyn EffectSink>,
    ) -> EngineResult<usize> {
        let mut pending: BTreeMap<usize, Vec<Effect>> = BTreeMap::new();
        let mut next = 0usize;
        let mut released = 0usize;

        while let Some(submission) = rx.recv().await {
            pending.insert(submission.index.0, submission.effects);
            while let Some(effects) = pending.remove(&next) {
                for effect in effects {
                    sink.deliver(effect)
                        .await
                        .map_err(|e| EngineError::external("effect delivery", e))?;
                    released += 1;
                }
                next += 1;
            }
        }

        if !pending.is_empty() {
            tracing::debug!(
                target: TRACING_TARGET,
                gate = next,
                held_back = pending.len(),
                "discarding effects past the ordering gap"
            );
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use lockstep_core::{MemorySink, Value};

    use super::*;

    #[tokio::test]
    async fn test_effects_release_in_declaration_order() {
        let sink = Arc::new(MemorySink::new());
        let projector = ResultProjector::spawn(sink.clone());
        let handle = projector.handle();

        // Submissions arrive out of order.
        handle.submit(OpIndex(2), vec![Effect::console("third")]);
        handle.submit(OpIndex(0), vec![Effect::console("first")]);
        handle.submit(OpIndex(1), vec![Effect::console("second")]);
        drop(handle);

        let released = projector.finish().await.unwrap();
        assert_eq!(released, 3);
        assert_eq!(
            sink.collected(),
            vec![
                Effect::console("first"),
                Effect::console("second"),
                Effect::console("third"),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_submissions_advance_the_gate() {
        let sink = Arc::new(MemorySink::new());
        let projector = ResultProjector::spawn(sink.clone());
        let handle = projector.handle();

        handle.submit(OpIndex(1), vec![Effect::event("done", Value::Null)]);
        // Op 0 produced nothing but still reports.
        handle.submit(OpIndex(0), Vec::new());
        drop(handle);

        let released = projector.finish().await.unwrap();
        assert_eq!(released, 1);
        assert_eq!(sink.collected(), vec![Effect::event("done", Value::Null)]);
    }

    #[tokio::test]
    async fn test_gap_holds_back_later_effects() {
        let sink = Arc::new(MemorySink::new());
        let projector = ResultProjector::spawn(sink.clone());
        let handle = projector.handle();

        handle.submit(OpIndex(0), vec![Effect::console("released")]);
        // Op 1 never submits; op 2 stays behind the gap.
        handle.submit(OpIndex(2), vec![Effect::console("held")]);
        drop(handle);

        let released = projector.finish().await.unwrap();
        assert_eq!(released, 1);
        assert_eq!(sink.collected(), vec![Effect::console("released")]);
    }
}
