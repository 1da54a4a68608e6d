//! Spill-backed barrier materialization.
//!
//! Barriers accumulate elements up to an in-memory budget; past it, the
//! accumulated rows are sorted and written out as fixed-size partitions
//! (one tempfile of JSON-lines per run) and the barrier operation runs as
//! an external merge over the runs. Nothing here assumes the whole
//! collection fits in memory during the sort/group/dedup phase.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, Write};

use futures::StreamExt;
use lockstep_core::Value;
use serde::{Deserialize, Serialize};

use super::stream::ElementStream;
use super::{Barrier, SortOrder};
use crate::error::{EngineError, EngineResult};

/// Tracing target for spill operations.
const TRACING_TARGET: &str = "lockstep_engine::spill";

/// One barrier row: sort key, arrival sequence, payload.
///
/// The arrival sequence breaks key ties so merges are stable and lets
/// `Distinct` recover first-occurrence order after a key-ordered merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpillRow {
    k: Value,
    s: u64,
    v: Value,
}

fn row_cmp(a: &SpillRow, b: &SpillRow, order: SortOrder) -> Ordering {
    let by_key = a.k.total_cmp(&b.k);
    let by_key = match order {
        SortOrder::Ascending => by_key,
        SortOrder::Descending => by_key.reverse(),
    };
    by_key.then(a.s.cmp(&b.s))
}

/// Accumulates barrier input, spilling sorted runs past the budget.
struct BarrierBuffer {
    order: SortOrder,
    budget: usize,
    seq: u64,
    buffer: Vec<SpillRow>,
    runs: Vec<File>,
}

impl BarrierBuffer {
    fn new(order: SortOrder, budget: usize) -> Self {
        Self {
            order,
            budget: budget.max(1),
            seq: 0,
            buffer: Vec::new(),
            runs: Vec::new(),
        }
    }

    async fn push(&mut self, key: Value, value: Value) -> EngineResult<()> {
        self.buffer.push(SpillRow {
            k: key,
            s: self.seq,
            v: value,
        });
        self.seq += 1;
        if self.buffer.len() >= self.budget {
            self.spill_run().await?;
        }
        Ok(())
    }

    /// Sorts the in-memory rows and writes them out as one partition.
    ///
    /// The sort and the file IO run on the blocking pool; a spill never
    /// stalls an async worker thread.
    async fn spill_run(&mut self) -> EngineResult<()> {
        let order = self.order;
        let mut rows = std::mem::take(&mut self.buffer);
        let (file, count) = tokio::task::spawn_blocking(move || {
            rows.sort_by(|a, b| row_cmp(a, b, order));
            write_run(&rows).map(|file| (file, rows.len()))
        })
        .await
        .map_err(|e| EngineError::Internal(format!("spill task panicked: {e}")))??;

        tracing::debug!(
            target: TRACING_TARGET,
            rows = count,
            runs = self.runs.len() + 1,
            "spilled barrier partition"
        );
        self.runs.push(file);
        Ok(())
    }

    /// Only called from the blocking pool: the merge phase reads runs with
    /// plain buffered IO.
    fn finish(mut self) -> EngineResult<MergedRows> {
        if self.runs.is_empty() {
            let order = self.order;
            self.buffer.sort_by(|a, b| row_cmp(a, b, order));
            return Ok(MergedRows::Memory(self.buffer.into_iter()));
        }
        if !self.buffer.is_empty() {
            let order = self.order;
            self.buffer.sort_by(|a, b| row_cmp(a, b, order));
            let file = write_run(&self.buffer)?;
            self.runs.push(file);
            self.buffer = Vec::new();
        }
        let mut readers = Vec::with_capacity(self.runs.len());
        let mut heads = Vec::with_capacity(self.runs.len());
        for file in self.runs {
            let mut reader = RunReader {
                lines: BufReader::new(file).lines(),
            };
            heads.push(reader.next_row()?);
            readers.push(reader);
        }
        Ok(MergedRows::Merge {
            readers,
            heads,
            order: self.order,
        })
    }
}

/// Writes sorted rows as one JSON-lines partition, rewound for reading.
fn write_run(rows: &[SpillRow]) -> EngineResult<File> {
    let file = tempfile::tempfile()
        .map_err(|e| EngineError::spill("creating run partition", e))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        let line = serde_json::to_string(row)?;
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .map_err(|e| EngineError::spill("writing run partition", e))?;
    }
    let mut file = writer
        .into_inner()
        .map_err(|e| EngineError::spill("flushing run partition", e.into_error()))?;
    file.rewind()
        .map_err(|e| EngineError::spill("rewinding run partition", e))?;
    Ok(file)
}

struct RunReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl RunReader {
    fn next_row(&mut self) -> EngineResult<Option<SpillRow>> {
        match self.lines.next() {
            None => Ok(None),
            Some(Err(e)) => Err(EngineError::spill("reading run partition", e)),
            Some(Ok(line)) => Ok(Some(serde_json::from_str(&line)?)),
        }
    }
}

/// Key-ordered rows, either fully in memory or merged across partitions.
enum MergedRows {
    Memory(std::vec::IntoIter<SpillRow>),
    Merge {
        readers: Vec<RunReader>,
        heads: Vec<Option<SpillRow>>,
        order: SortOrder,
    },
}

impl MergedRows {
    /// Pulls the next row in merge order.
    ///
    /// The run count is input size over budget, so the linear scan over
    /// run heads stays cheap; partitions themselves are streamed.
    fn next_row(&mut self) -> EngineResult<Option<SpillRow>> {
        match self {
            MergedRows::Memory(rows) => Ok(rows.next()),
            MergedRows::Merge {
                readers,
                heads,
                order,
            } => {
                let mut smallest: Option<usize> = None;
                for (i, head) in heads.iter().enumerate() {
                    let Some(row) = head else { continue };
                    match smallest {
                        None => smallest = Some(i),
                        Some(j) => {
                            let current = heads[j].as_ref().expect("head present");
                            if row_cmp(row, current, *order) == Ordering::Less {
                                smallest = Some(i);
                            }
                        }
                    }
                }
                let Some(i) = smallest else { return Ok(None) };
                let row = heads[i].take().expect("head present");
                heads[i] = readers[i].next_row()?;
                Ok(Some(row))
            }
        }
    }
}

/// Runs a barrier stage over a transformed stream within a memory budget.
pub(crate) async fn run_barrier(
    mut stream: ElementStream,
    barrier: &Barrier,
    budget: usize,
) -> EngineResult<Value> {
    let order = match barrier {
        Barrier::Sort(order) => *order,
        Barrier::Distinct | Barrier::GroupBy(_) => SortOrder::Ascending,
    };
    let mut buffer = BarrierBuffer::new(order, budget);

    while let Some(element) = stream.next().await {
        let element = element?;
        let key = match barrier {
            Barrier::Sort(_) | Barrier::Distinct => element.clone(),
            Barrier::GroupBy(key_fn) => key_fn(&element),
        };
        buffer.push(key, element).await?;
    }

    // The merge reads every partition back with blocking IO; run it on the
    // blocking pool so a large barrier cannot stall concurrent activations.
    let barrier = barrier.clone();
    tokio::task::spawn_blocking(move || materialize(buffer, &barrier))
        .await
        .map_err(|e| EngineError::Internal(format!("barrier merge panicked: {e}")))?
}

/// Merges the accumulated rows and materializes the barrier's output.
fn materialize(buffer: BarrierBuffer, barrier: &Barrier) -> EngineResult<Value> {
    let mut rows = buffer.finish()?;
    match barrier {
        Barrier::Sort(_) => {
            let mut output = Vec::new();
            while let Some(row) = rows.next_row()? {
                output.push(row.v);
            }
            Ok(Value::List(output))
        }
        Barrier::Distinct => {
            // Equal keys arrive adjacent with ascending sequence numbers,
            // so the first row of each key group is the first occurrence.
            let mut firsts: Vec<(u64, Value)> = Vec::new();
            let mut current_key: Option<Value> = None;
            while let Some(row) = rows.next_row()? {
                let is_new = current_key
                    .as_ref()
                    .is_none_or(|key| key.total_cmp(&row.k) != Ordering::Equal);
                if is_new {
                    current_key = Some(row.k);
                    firsts.push((row.s, row.v));
                }
            }
            firsts.sort_by_key(|(seq, _)| *seq);
            Ok(Value::List(firsts.into_iter().map(|(_, v)| v).collect()))
        }
        Barrier::GroupBy(_) => {
            let mut groups: BTreeMap<String, Value> = BTreeMap::new();
            let mut current: Option<(Value, Vec<Value>)> = None;
            while let Some(row) = rows.next_row()? {
                match current.as_mut() {
                    Some((key, members))
                        if key.total_cmp(&row.k) == Ordering::Equal =>
                    {
                        members.push(row.v);
                    }
                    _ => {
                        if let Some((key, members)) = current.take() {
                            groups.insert(key.canonical_key(), Value::List(members));
                        }
                        current = Some((row.k, vec![row.v]));
                    }
                }
            }
            if let Some((key, members)) = current.take() {
                groups.insert(key.canonical_key(), Value::List(members));
            }
            Ok(Value::Record(groups))
        }
    }
}
