//! The stream executor.
//!
//! Compiles a transformation prefix into a single element-at-a-time pass,
//! fans out to multiple consumers through a bounded tee, fuses pure
//! aggregation drains into one traversal, and hands barrier consumers to
//! the spill machinery.

use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::{StreamExt, TryStreamExt, stream};
use lockstep_core::{Effect, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::spill;
use super::{
    ConsumerStage, Drain, FoldFn, PipelinePlan, SourceSpec, StreamingMode, TransformStage,
};
use crate::binding::BindingStore;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Tracing target for stream execution.
const TRACING_TARGET: &str = "lockstep_engine::stream";

/// A boxed stream of pipeline elements.
pub type ElementStream = futures::stream::BoxStream<'static, EngineResult<Value>>;

/// Everything a pipeline needs from its activation.
pub(crate) struct PipelineEnv {
    pub(crate) bindings: Arc<BindingStore>,
    pub(crate) cancel: CancellationToken,
    pub(crate) config: Arc<EngineConfig>,
}

/// Result of one consumer: the binding it writes, the value, and any
/// per-element effects in element order.
#[derive(Debug)]
pub(crate) struct ConsumerResult {
    pub(crate) writes: String,
    pub(crate) value: Value,
    pub(crate) effects: Vec<Effect>,
}

/// Bounded-buffer fan-out point sharing one upstream between consumers.
///
/// Each element is produced to every consumer exactly once and held only
/// until the slowest consumer has taken it: the pump awaits every send, so
/// live memory is bounded by consumers × capacity regardless of stream
/// length.
pub struct Tee;

impl Tee {
    /// Splits `stream` into `consumers` independent streams with a bounded
    /// buffer of `capacity` elements per consumer.
    pub fn split(
        stream: ElementStream,
        consumers: usize,
        capacity: usize,
    ) -> Vec<ElementStream> {
        let capacity = capacity.max(1);
        let mut senders = Vec::with_capacity(consumers);
        let mut branches = Vec::with_capacity(consumers);
        for _ in 0..consumers {
            let (tx, rx) = mpsc::channel::<EngineResult<Value>>(capacity);
            senders.push(tx);
            branches.push(ReceiverStream::new(rx).boxed());
        }
        tokio::spawn(Self::pump(stream, senders));
        branches
    }

    async fn pump(mut stream: ElementStream, senders: Vec<mpsc::Sender<EngineResult<Value>>>) {
        let mut open = vec![true; senders.len()];
        while let Some(item) = stream.next().await {
            let stop = item.is_err();
            for (i, tx) in senders.iter().enumerate() {
                if !open[i] {
                    continue;
                }
                // A consumer that hung up (e.g. a saturated `first`) stops
                // receiving; the rest keep going.
                if tx.send(item.clone()).await.is_err() {
                    open[i] = false;
                }
            }
            if stop || open.iter().all(|o| !o) {
                break;
            }
        }
    }
}

/// Opens the pipeline source as an element stream.
///
/// Under `Auto`, in-memory bindings and small sources are materialized up
/// front; sources at or above the eager threshold always stream.
async fn open_source(
    source: SourceSpec,
    mode: StreamingMode,
    env: &PipelineEnv,
) -> EngineResult<ElementStream> {
    match source {
        SourceSpec::Binding(name) => {
            let value = env.bindings.await_value(&name).await?;
            let items = match value.as_ref() {
                Value::List(items) => items.clone(),
                other => {
                    return Err(EngineError::Internal(format!(
                        "pipeline source `{name}` is {}, expected list",
                        other.kind().as_ref()
                    )));
                }
            };
            Ok(stream::iter(items.into_iter().map(Ok)).boxed())
        }
        SourceSpec::Elements(mut source) => {
            let eager = match mode {
                StreamingMode::Eager => true,
                StreamingMode::Streaming => false,
                StreamingMode::Auto => source
                    .size_hint()
                    .is_some_and(|n| n < env.config.eager_threshold),
            };
            if eager {
                let mut items = Vec::new();
                while let Some(chunk) = source.next_chunk().await? {
                    items.extend(chunk);
                }
                Ok(stream::iter(items.into_iter().map(Ok)).boxed())
            } else {
                Ok(async_stream::try_stream! {
                    while let Some(chunk) = source.next_chunk().await? {
                        for element in chunk {
                            yield element;
                        }
                    }
                }
                .boxed())
            }
        }
    }
}

/// Fails the stream at the next pull once the activation is cancelled.
fn guard_cancellation(stream: ElementStream, cancel: CancellationToken) -> ElementStream {
    async_stream::try_stream! {
        let mut stream = stream;
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => Some(Err(EngineError::Cancelled)),
                item = stream.next() => item,
            };
            match item {
                Some(element) => yield element?,
                None => break,
            }
        }
    }
    .boxed()
}

/// Composes the transformation prefix into one lazy pass.
///
/// No stage materializes anything: each element pulled from the source
/// flows through every transformation before the next element is pulled.
pub(crate) fn apply_transforms(
    mut stream: ElementStream,
    transforms: &[TransformStage],
) -> ElementStream {
    for stage in transforms {
        stream = match stage {
            TransformStage::Filter(predicate) => {
                let predicate = Arc::clone(predicate);
                stream
                    .try_filter(move |element| future::ready(predicate(element)))
                    .boxed()
            }
            TransformStage::Map(f) => {
                let f = Arc::clone(f);
                stream.map_ok(move |element| f(element)).boxed()
            }
            // `StreamExt::take`/`skip` count `Err` items against the
            // window, so a source error inside the skipped prefix would
            // vanish. These adapters count only elements and pass every
            // error downstream.
            TransformStage::Take(n) => {
                let n = *n;
                async_stream::try_stream! {
                    let mut stream = stream;
                    let mut taken = 0usize;
                    while taken < n {
                        let Some(item) = stream.next().await else { break };
                        let element = item?;
                        taken += 1;
                        yield element;
                    }
                }
                .boxed()
            }
            TransformStage::Skip(n) => {
                let n = *n;
                async_stream::try_stream! {
                    let mut stream = stream;
                    let mut skipped = 0usize;
                    while let Some(item) = stream.next().await {
                        let element = item?;
                        if skipped < n {
                            skipped += 1;
                        } else {
                            yield element;
                        }
                    }
                }
                .boxed()
            }
        };
    }
    stream
}

/// Running state of one pure drain inside a shared traversal.
enum Accumulator {
    Count(i64),
    Sum {
        int: i64,
        float: f64,
        any_float: bool,
    },
    Average {
        sum: f64,
        count: u64,
    },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Option<Value>),
    Fold {
        acc: Value,
        fold: FoldFn,
    },
}

impl Accumulator {
    fn new(drain: &Drain) -> EngineResult<Self> {
        Ok(match drain {
            Drain::Count => Accumulator::Count(0),
            Drain::Sum => Accumulator::Sum {
                int: 0,
                float: 0.0,
                any_float: false,
            },
            Drain::Average => Accumulator::Average { sum: 0.0, count: 0 },
            Drain::Min => Accumulator::Min(None),
            Drain::Max => Accumulator::Max(None),
            Drain::First => Accumulator::First(None),
            Drain::Last => Accumulator::Last(None),
            Drain::Fold { init, fold } => Accumulator::Fold {
                acc: init.clone(),
                fold: Arc::clone(fold),
            },
            Drain::Each(_) => {
                return Err(EngineError::Internal(
                    "side-effecting drain in fused traversal".into(),
                ));
            }
        })
    }

    fn feed(&mut self, element: &Value) {
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum {
                int,
                float,
                any_float,
            } => match element {
                Value::Int(n) => *int += n,
                Value::Float(f) => {
                    *float += f;
                    *any_float = true;
                }
                _ => {}
            },
            Accumulator::Average { sum, count } => {
                if let Some(f) = element.as_f64() {
                    *sum += f;
                    *count += 1;
                }
            }
            Accumulator::Min(best) => {
                let better = best
                    .as_ref()
                    .is_none_or(|b| element.total_cmp(b) == std::cmp::Ordering::Less);
                if better {
                    *best = Some(element.clone());
                }
            }
            Accumulator::Max(best) => {
                let better = best
                    .as_ref()
                    .is_none_or(|b| element.total_cmp(b) == std::cmp::Ordering::Greater);
                if better {
                    *best = Some(element.clone());
                }
            }
            Accumulator::First(slot) => {
                if slot.is_none() {
                    *slot = Some(element.clone());
                }
            }
            Accumulator::Last(slot) => *slot = Some(element.clone()),
            Accumulator::Fold { acc, fold } => {
                *acc = fold(std::mem::take(acc), element.clone());
            }
        }
    }

    /// Whether further elements can no longer change the result.
    fn is_saturated(&self) -> bool {
        matches!(self, Accumulator::First(Some(_)))
    }

    fn finish(self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Int(n),
            Accumulator::Sum {
                int,
                float,
                any_float,
            } => {
                if any_float {
                    Value::Float(int as f64 + float)
                } else {
                    Value::Int(int)
                }
            }
            Accumulator::Average { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Float(sum / count as f64)
                }
            }
            Accumulator::Min(best) | Accumulator::Max(best) => best.unwrap_or(Value::Null),
            Accumulator::First(slot) | Accumulator::Last(slot) => slot.unwrap_or(Value::Null),
            Accumulator::Fold { acc, .. } => acc,
        }
    }
}

/// Computes every pure drain in one traversal of the upstream.
///
/// Equivalent, result for result, to running each drain over its own copy
/// of the stream; the traversal stops early only when every drain is
/// saturated.
async fn run_fused(mut stream: ElementStream, drains: Vec<Drain>) -> EngineResult<Vec<Value>> {
    let mut accumulators = drains
        .iter()
        .map(Accumulator::new)
        .collect::<EngineResult<Vec<_>>>()?;

    while let Some(element) = stream.next().await {
        let element = element?;
        for acc in &mut accumulators {
            acc.feed(&element);
        }
        if !accumulators.is_empty() && accumulators.iter().all(Accumulator::is_saturated) {
            break;
        }
    }

    Ok(accumulators.into_iter().map(Accumulator::finish).collect())
}

/// Runs a side-effecting drain, collecting effects in element order.
async fn run_each(
    mut stream: ElementStream,
    each: &super::EachFn,
) -> EngineResult<(Value, Vec<Effect>)> {
    let mut effects = Vec::new();
    while let Some(element) = stream.next().await {
        effects.push(each(&element?));
    }
    Ok((Value::Null, effects))
}

/// Runs one consumer over its own stream.
async fn run_consumer(
    stream: ElementStream,
    stage: ConsumerStage,
    spill_threshold: usize,
) -> EngineResult<(Value, Vec<Effect>)> {
    match stage {
        ConsumerStage::Drain(Drain::Each(each)) => run_each(stream, &each).await,
        ConsumerStage::Drain(drain) => {
            let mut values = run_fused(stream, vec![drain]).await?;
            Ok((values.pop().unwrap_or(Value::Null), Vec::new()))
        }
        ConsumerStage::Barrier(barrier) => {
            let value = spill::run_barrier(stream, &barrier, spill_threshold).await?;
            Ok((value, Vec::new()))
        }
    }
}

/// Executes a pipeline plan, returning one result per consumer in
/// declaration order.
pub(crate) async fn execute(
    plan: PipelinePlan,
    env: &PipelineEnv,
) -> EngineResult<Vec<ConsumerResult>> {
    let PipelinePlan {
        source,
        mode,
        transforms,
        consumers,
    } = plan;

    if consumers.is_empty() {
        return Err(EngineError::Internal("pipeline has no consumers".into()));
    }

    let stream = open_source(source, mode, env).await?;
    let stream = guard_cancellation(stream, env.cancel.clone());
    let stream = apply_transforms(stream, &transforms);

    let mut pure = Vec::new();
    let mut impure = Vec::new();
    for (i, consumer) in consumers.iter().enumerate() {
        match &consumer.stage {
            ConsumerStage::Drain(drain) if drain.is_pure() => pure.push(i),
            _ => impure.push(i),
        }
    }

    tracing::debug!(
        target: TRACING_TARGET,
        transforms = transforms.len(),
        fused = pure.len(),
        teed = impure.len(),
        "pipeline compiled"
    );

    let spill_threshold = env.config.spill_threshold;
    let mut outcomes: Vec<Option<(Value, Vec<Effect>)>> = Vec::new();
    outcomes.resize_with(consumers.len(), || None);

    if impure.is_empty() {
        // All consumers are pure drains: one fused traversal, no tee.
        let drains = pure
            .iter()
            .map(|&i| match &consumers[i].stage {
                ConsumerStage::Drain(drain) => drain.clone(),
                ConsumerStage::Barrier(_) => unreachable!("classified as pure drain"),
            })
            .collect();
        let values = run_fused(stream, drains).await?;
        for (&i, value) in pure.iter().zip(values) {
            outcomes[i] = Some((value, Vec::new()));
        }
    } else if consumers.len() == 1 {
        let stage = consumers[0].stage.clone();
        outcomes[0] = Some(run_consumer(stream, stage, spill_threshold).await?);
    } else {
        // Mixed consumers share the upstream through a bounded tee: one
        // branch per impure consumer plus one for the fused pure group.
        // Branches run concurrently so the slowest one paces the pump
        // instead of deadlocking it.
        let branch_count = impure.len() + usize::from(!pure.is_empty());
        let mut branches =
            Tee::split(stream, branch_count, env.config.tee_buffer_capacity).into_iter();

        type BranchResult = EngineResult<Vec<(usize, Value, Vec<Effect>)>>;
        let mut tasks: Vec<BoxFuture<'static, BranchResult>> = Vec::new();

        if !pure.is_empty() {
            let branch = branches.next().expect("tee produced pure branch");
            let drains: Vec<Drain> = pure
                .iter()
                .map(|&i| match &consumers[i].stage {
                    ConsumerStage::Drain(drain) => drain.clone(),
                    ConsumerStage::Barrier(_) => unreachable!("classified as pure drain"),
                })
                .collect();
            let indices = pure.clone();
            tasks.push(Box::pin(async move {
                let values = run_fused(branch, drains).await?;
                Ok(indices
                    .into_iter()
                    .zip(values)
                    .map(|(i, value)| (i, value, Vec::new()))
                    .collect())
            }));
        }

        for &i in &impure {
            let branch = branches.next().expect("tee produced consumer branch");
            let stage = consumers[i].stage.clone();
            tasks.push(Box::pin(async move {
                let (value, effects) = run_consumer(branch, stage, spill_threshold).await?;
                Ok(vec![(i, value, effects)])
            }));
        }

        for branch_outcomes in future::try_join_all(tasks).await? {
            for (i, value, effects) in branch_outcomes {
                outcomes[i] = Some((value, effects));
            }
        }
    }

    Ok(consumers
        .into_iter()
        .zip(outcomes)
        .map(|(consumer, outcome)| {
            let (value, effects) = outcome.unwrap_or((Value::Null, Vec::new()));
            ConsumerResult {
                writes: consumer.writes,
                value,
                effects,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use lockstep_core::VecSource;

    use super::*;
    use crate::op::OpIndex;
    use crate::pipeline::{Barrier, Consumer, SortOrder};

    fn env() -> PipelineEnv {
        PipelineEnv {
            bindings: Arc::new(BindingStore::new()),
            cancel: CancellationToken::new(),
            config: Arc::new(EngineConfig::default()),
        }
    }

    fn env_with(config: EngineConfig) -> PipelineEnv {
        PipelineEnv {
            bindings: Arc::new(BindingStore::new()),
            cancel: CancellationToken::new(),
            config: Arc::new(config),
        }
    }

    fn counted_ints(n: i64, pulls: Arc<AtomicUsize>) -> ElementStream {
        stream::iter((1..=n).map(Value::Int).map(Ok))
            .inspect(move |_| {
                pulls.fetch_add(1, Ordering::SeqCst);
            })
            .boxed()
    }

    #[tokio::test]
    async fn test_filter_map_sum_single_traversal() {
        // filter(even), map(*10), sum over 1..=10 is 300.
        let plan = PipelinePlan::from_elements(
            VecSource::new((1..=10).map(Value::Int).collect()),
            StreamingMode::Streaming,
        )
        .with_transform(TransformStage::filter(|v| {
            v.as_int().is_some_and(|n| n % 2 == 0)
        }))
        .with_transform(TransformStage::map(|v| {
            Value::Int(v.as_int().unwrap_or(0) * 10)
        }))
        .with_consumer(Consumer::drain(Drain::Sum, "total"));

        let results = execute(plan, &env()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].writes, "total");
        assert_eq!(results[0].value, Value::Int(300));
    }

    #[tokio::test]
    async fn test_fusion_single_traversal_matches_independent_runs() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let stream = counted_ints(100, Arc::clone(&pulls));
        let values = run_fused(
            stream,
            vec![Drain::Sum, Drain::Count, Drain::Average, Drain::Min, Drain::Max],
        )
        .await
        .unwrap();

        // Exactly one traversal of the 100-element source.
        assert_eq!(pulls.load(Ordering::SeqCst), 100);
        assert_eq!(values[0], Value::Int(5050));
        assert_eq!(values[1], Value::Int(100));
        assert_eq!(values[2], Value::Float(50.5));
        assert_eq!(values[3], Value::Int(1));
        assert_eq!(values[4], Value::Int(100));

        // Equivalence with independent runs over fresh copies.
        for (drain, expected) in [
            (Drain::Sum, Value::Int(5050)),
            (Drain::Count, Value::Int(100)),
            (Drain::Average, Value::Float(50.5)),
        ] {
            let fresh = counted_ints(100, Arc::new(AtomicUsize::new(0)));
            let mut alone = run_fused(fresh, vec![drain]).await.unwrap();
            assert_eq!(alone.pop().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_first_saturates_without_draining_source() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let stream = counted_ints(1_000_000, Arc::clone(&pulls));
        let values = run_fused(stream, vec![Drain::First]).await.unwrap();
        assert_eq!(values[0], Value::Int(1));
        assert!(pulls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_tee_is_bounded_and_exactly_once() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let stream = counted_ints(1_000, Arc::clone(&pulls));
        let mut branches = Tee::split(stream, 2, 2).into_iter();
        let a = branches.next().unwrap();
        let b = branches.next().unwrap();

        // Nobody consumes yet: the pump fills both buffers and stalls on
        // the full channel instead of running ahead.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pulls.load(Ordering::SeqCst) <= 3);

        let (left, right) = tokio::join!(
            a.try_collect::<Vec<Value>>(),
            b.try_collect::<Vec<Value>>()
        );
        let expected: Vec<Value> = (1..=1_000).map(Value::Int).collect();
        assert_eq!(left.unwrap(), expected);
        assert_eq!(right.unwrap(), expected);
        assert_eq!(pulls.load(Ordering::SeqCst), 1_000);
    }

    #[tokio::test]
    async fn test_mixed_consumers_share_one_upstream() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_drain = Arc::clone(&seen);

        let config = EngineConfig::builder()
            .tee_buffer_capacity(4usize)
            .build()
            .unwrap();
        let plan = PipelinePlan::from_elements(
            VecSource::new((1..=50).map(Value::Int).collect()),
            StreamingMode::Streaming,
        )
        .with_consumer(Consumer::drain(Drain::Sum, "total"))
        .with_consumer(Consumer::drain(Drain::Count, "n"))
        .with_consumer(Consumer::drain(
            Drain::each(move |v| {
                seen_in_drain.fetch_add(1, Ordering::SeqCst);
                Effect::event("seen", v.clone())
            }),
            "logged",
        ))
        .with_consumer(Consumer::barrier(Barrier::Sort(SortOrder::Descending), "sorted"));

        let results = execute(plan, &env_with(config)).await.unwrap();
        assert_eq!(results[0].value, Value::Int(1275));
        assert_eq!(results[1].value, Value::Int(50));
        assert_eq!(results[2].effects.len(), 50);
        assert_eq!(seen.load(Ordering::SeqCst), 50);
        let Value::List(sorted) = &results[3].value else {
            panic!("expected list");
        };
        assert_eq!(sorted.first(), Some(&Value::Int(50)));
        assert_eq!(sorted.last(), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn test_transform_chain_preserves_element_order() {
        let plan = PipelinePlan::from_elements(
            VecSource::new((1..=20).map(Value::Int).collect()),
            StreamingMode::Streaming,
        )
        .with_transform(TransformStage::filter(|v| {
            v.as_int().is_some_and(|n| n % 3 != 0)
        }))
        .with_transform(TransformStage::Skip(2))
        .with_transform(TransformStage::Take(4))
        .with_consumer(Consumer::drain(
            Drain::fold(Value::List(Vec::new()), |acc, v| {
                let Value::List(mut items) = acc else {
                    return Value::Null;
                };
                items.push(v);
                Value::List(items)
            }),
            "window",
        ));

        let results = execute(plan, &env()).await.unwrap();
        assert_eq!(
            results[0].value,
            Value::List(vec![
                Value::Int(4),
                Value::Int(5),
                Value::Int(7),
                Value::Int(8),
            ])
        );
    }

    fn broken_after_one() -> ElementStream {
        stream::iter(vec![
            Ok(Value::Int(1)),
            Err(EngineError::Internal("source broke".into())),
            Ok(Value::Int(2)),
        ])
        .boxed()
    }

    #[tokio::test]
    async fn test_skip_propagates_error_in_skipped_prefix() {
        // The error arrives while skip is still discarding; the pipeline
        // must fail rather than finish with a clean count.
        let stream = apply_transforms(broken_after_one(), &[TransformStage::Skip(5)]);
        let err = run_fused(stream, vec![Drain::Count]).await.unwrap_err();
        assert!(matches!(err, EngineError::Internal(message) if message == "source broke"));
    }

    #[tokio::test]
    async fn test_take_counts_elements_not_errors() {
        // The error sits inside the take window but is not an element; it
        // must surface instead of shrinking the window.
        let stream = apply_transforms(broken_after_one(), &[TransformStage::Take(3)]);
        let err = run_fused(stream, vec![Drain::Sum]).await.unwrap_err();
        assert!(matches!(err, EngineError::Internal(message) if message == "source broke"));
    }

    #[tokio::test]
    async fn test_binding_source_requires_list() {
        let mut bindings = BindingStore::new();
        bindings.declare("scalar", OpIndex(0)).unwrap();
        bindings.resolve("scalar", Value::Int(3)).unwrap();
        let env = PipelineEnv {
            bindings: Arc::new(bindings),
            cancel: CancellationToken::new(),
            config: Arc::new(EngineConfig::default()),
        };

        let plan = PipelinePlan::from_binding("scalar", StreamingMode::Auto)
            .with_consumer(Consumer::drain(Drain::Count, "n"));
        let err = execute(plan, &env).await.unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
    }

    #[tokio::test]
    async fn test_cancellation_fails_stream_at_next_pull() {
        let cancel = CancellationToken::new();
        let env = PipelineEnv {
            bindings: Arc::new(BindingStore::new()),
            cancel: cancel.clone(),
            config: Arc::new(EngineConfig::default()),
        };
        cancel.cancel();

        let plan = PipelinePlan::from_elements(
            VecSource::new((1..=10).map(Value::Int).collect()),
            StreamingMode::Streaming,
        )
        .with_consumer(Consumer::drain(Drain::Count, "n"));

        let err = execute(plan, &env).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_eager_override_materializes_small_source() {
        // Auto with a small size hint materializes; the result is the same
        // either way, which is the contract the override has to keep.
        for mode in [StreamingMode::Auto, StreamingMode::Eager, StreamingMode::Streaming] {
            let plan = PipelinePlan::from_elements(
                VecSource::new((1..=8).map(Value::Int).collect()),
                mode,
            )
            .with_consumer(Consumer::drain(Drain::Sum, "total"));
            let results = execute(plan, &env()).await.unwrap();
            assert_eq!(results[0].value, Value::Int(36), "mode {mode}");
        }
    }
}
