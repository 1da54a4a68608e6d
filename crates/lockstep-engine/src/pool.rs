//! The shared worker pool.
//!
//! One semaphore caps how many operation bodies run at once across an
//! activation. Tasks acquire a permit only when they are ready to do work;
//! awaiting a binding never holds a permit, so suspended operations cost
//! nothing against the ceiling.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use tokio::sync::Semaphore;

use crate::error::{EngineError, EngineResult};

/// A bounded pool of execution slots shared by operation bodies.
#[derive(Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    ceiling: usize,
}

impl WorkerPool {
    /// Creates a pool with `ceiling` concurrent slots.
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            slots: Arc::new(Semaphore::new(ceiling)),
            ceiling,
        }
    }

    /// Number of concurrent slots.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Runs `work` under one pool slot, waiting for a free slot first.
    pub async fn run<T>(&self, work: impl Future<Output = T>) -> EngineResult<T> {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| EngineError::Internal("worker pool closed".into()))?;
        Ok(work.await)
    }

    /// Applies `body` to every item with at most the pool ceiling in flight.
    pub async fn parallel_for_each<T, F, Fut>(&self, items: Vec<T>, body: F) -> EngineResult<()>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = EngineResult<()>>,
    {
        self.parallel_for_each_limit(items, self.ceiling, body).await
    }

    /// Applies `body` to every item with at most `limit` in flight.
    ///
    /// Concurrency is limited by the traversal itself rather than by pool
    /// permits: the caller already holds a slot, and taking more here could
    /// deadlock two pipelines each waiting on the other's permits. No
    /// ordering of side effects between distinct items is guaranteed. Every
    /// body runs to completion; the first error observed is returned after
    /// the last body finishes.
    pub async fn parallel_for_each_limit<T, F, Fut>(
        &self,
        items: Vec<T>,
        limit: usize,
        body: F,
    ) -> EngineResult<()>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = EngineResult<()>>,
    {
        let outcomes: Vec<EngineResult<()>> = stream::iter(items.into_iter().map(body))
            .buffer_unordered(limit.max(1))
            .collect()
            .await;
        outcomes.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_run_respects_ceiling() {
        let pool = WorkerPool::new(2);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                pool.run(async {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_parallel_for_each_runs_every_body() {
        let pool = WorkerPool::new(3);
        let ran = Arc::new(AtomicUsize::new(0));

        let result = pool
            .parallel_for_each((0..10).collect(), |n: i32| {
                let ran = Arc::clone(&ran);
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    if n == 4 {
                        Err(EngineError::Internal("boom".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(EngineError::Internal(_))));
        // The failing body does not abort its siblings.
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_parallel_for_each_limit_caps_concurrency() {
        let pool = WorkerPool::new(8);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        pool.parallel_for_each_limit((0..12).collect::<Vec<i32>>(), 3, |_| {
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
