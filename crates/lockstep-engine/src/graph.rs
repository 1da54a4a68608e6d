//! Dependency graph construction for one activation.
//!
//! Built in a single O(n) pass over the operation list: each written name
//! maps to its producing operation, and every read set is resolved against
//! that map. All malformed-program conditions (undeclared reference,
//! duplicate producer, forward reference) surface here, before any
//! execution begins; nothing is deferred to a runtime race.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{EngineError, EngineResult};
use crate::op::{OpIndex, Operation};

/// Tracing target for graph building.
const TRACING_TARGET: &str = "lockstep_engine::graph";

/// A DAG over one activation's operations.
///
/// An edge A→B exists when B reads a binding A writes; the edge weight is
/// the binding name, kept for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<OpIndex, String>,
    nodes: Vec<NodeIndex>,
    producers: HashMap<String, OpIndex>,
    terminal: Option<OpIndex>,
}

impl DependencyGraph {
    /// Builds the dependency graph for an ordered operation list.
    pub fn build(operations: &[Operation]) -> EngineResult<Self> {
        let mut graph = DiGraph::with_capacity(operations.len(), operations.len());
        let mut nodes = Vec::with_capacity(operations.len());
        let mut producers: HashMap<String, OpIndex> = HashMap::new();

        for (i, op) in operations.iter().enumerate() {
            let index = OpIndex(i);
            nodes.push(graph.add_node(index));
            for name in op.writes() {
                if let Some(first) = producers.insert(name.clone(), index) {
                    return Err(EngineError::DuplicateProducer {
                        name: name.clone(),
                        first,
                        second: index,
                    });
                }
            }
        }

        for (i, op) in operations.iter().enumerate() {
            let reader = OpIndex(i);
            for name in op.reads() {
                let producer = *producers.get(name).ok_or_else(|| {
                    EngineError::UndeclaredReference {
                        name: name.clone(),
                        index: reader,
                    }
                })?;
                if producer >= reader {
                    return Err(EngineError::ForwardReference {
                        name: name.clone(),
                        producer,
                        reader,
                    });
                }
                graph.update_edge(nodes[producer.0], nodes[reader.0], name.clone());
            }
        }

        // Single assignment plus linear statement order make cycles
        // impossible; validate anyway so a builder bug cannot surface as a
        // scheduling deadlock.
        if is_cyclic_directed(&graph) {
            return Err(EngineError::Internal(
                "cycle detected in dependency graph".into(),
            ));
        }

        let terminal = operations
            .iter()
            .rposition(Operation::is_terminal)
            .map(OpIndex);

        tracing::debug!(
            target: TRACING_TARGET,
            operations = operations.len(),
            bindings = producers.len(),
            edges = graph.edge_count(),
            "dependency graph built"
        );

        Ok(Self {
            graph,
            nodes,
            producers,
            terminal,
        })
    }

    /// Returns the number of operations.
    pub fn op_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the producer of a binding, if declared.
    pub fn producer_of(&self, name: &str) -> Option<OpIndex> {
        self.producers.get(name).copied()
    }

    /// Returns the binding names and producers this operation depends on.
    pub fn dependencies(&self, index: OpIndex) -> Vec<(String, OpIndex)> {
        self.edges_of(index, Direction::Incoming)
    }

    /// Returns the operations reading any of this operation's outputs.
    pub fn dependents(&self, index: OpIndex) -> Vec<(String, OpIndex)> {
        self.edges_of(index, Direction::Outgoing)
    }

    /// Returns operations with no data dependencies, in source order.
    pub fn initially_ready(&self) -> Vec<OpIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| {
                self.graph
                    .edges_directed(**node, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|(i, _)| OpIndex(i))
            .collect()
    }

    /// Returns the activation's terminal operation, if one is flagged.
    pub fn terminal(&self) -> Option<OpIndex> {
        self.terminal
    }

    fn edges_of(&self, index: OpIndex, direction: Direction) -> Vec<(String, OpIndex)> {
        let Some(node) = self.nodes.get(index.0) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*node, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                (edge.weight().clone(), self.graph[other])
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OpOutput;
    use lockstep_core::Value;

    fn producing(writes: &[&str], reads: &[&str]) -> Operation {
        Operation::effect(|_| async { Ok(OpOutput::empty()) })
            .with_reads(reads.iter().copied())
            .with_writes(writes.iter().copied())
    }

    #[test]
    fn test_chain_edges() {
        let ops = vec![
            producing(&["a"], &[]),
            producing(&["b"], &["a"]),
            producing(&["c"], &["a", "b"]),
        ];
        let graph = DependencyGraph::build(&ops).unwrap();

        assert_eq!(graph.op_count(), 3);
        assert_eq!(graph.initially_ready(), vec![OpIndex(0)]);

        let mut deps = graph.dependencies(OpIndex(2));
        deps.sort();
        assert_eq!(
            deps,
            vec![("a".to_owned(), OpIndex(0)), ("b".to_owned(), OpIndex(1))]
        );

        let dependents: Vec<OpIndex> = graph
            .dependents(OpIndex(0))
            .into_iter()
            .map(|(_, i)| i)
            .collect();
        assert!(dependents.contains(&OpIndex(1)));
        assert!(dependents.contains(&OpIndex(2)));
    }

    #[test]
    fn test_undeclared_reference_fails_before_execution() {
        let ops = vec![producing(&["a"], &["ghost"])];
        let err = DependencyGraph::build(&ops).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UndeclaredReference { ref name, index: OpIndex(0) } if name == "ghost"
        ));
        assert!(err.is_build_error());
    }

    #[test]
    fn test_forward_reference_rejected() {
        let ops = vec![producing(&["a"], &["b"]), producing(&["b"], &[])];
        let err = DependencyGraph::build(&ops).unwrap_err();
        assert!(matches!(err, EngineError::ForwardReference { .. }));
    }

    #[test]
    fn test_duplicate_producer_rejected() {
        let ops = vec![producing(&["a"], &[]), producing(&["a"], &[])];
        let err = DependencyGraph::build(&ops).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateProducer { .. }));
    }

    #[test]
    fn test_terminal_is_last_flagged() {
        let ops = vec![
            producing(&["a"], &[]),
            Operation::effect(|_| async { Ok(OpOutput::value(Value::Null)) })
                .with_reads(["a"])
                .terminal(),
        ];
        let graph = DependencyGraph::build(&ops).unwrap();
        assert_eq!(graph.terminal(), Some(OpIndex(1)));
    }
}
