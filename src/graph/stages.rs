//! Stage scheduler
//!
//! Splits the graph into topological generations. Each stage resolves its
//! ready sequential nodes one at a time first (newly ready sequential nodes
//! join the same prefix), then takes every other ready node as one parallel
//! group.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::analyze::Graph;
use super::ops::NodeId;
use crate::error::{PolyError, PolyResult};

/// One topological generation of the graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stage {
    /// Resolved in this order, one at a time
    pub sequential: Vec<NodeId>,
    /// Resolved together after the sequential prefix
    pub parallel: Vec<NodeId>,
}

impl Stage {
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.sequential.iter().chain(self.parallel.iter()).copied()
    }

    pub fn len(&self) -> usize {
        self.sequential.len() + self.parallel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequential.is_empty() && self.parallel.is_empty()
    }
}

struct Readiness<'g> {
    graph: &'g Graph,
    waiting: BTreeMap<NodeId, usize>,
    sequential: BTreeSet<NodeId>,
    parallel: BTreeSet<NodeId>,
}

impl<'g> Readiness<'g> {
    fn new(graph: &'g Graph) -> Self {
        let mut readiness = Self {
            graph,
            waiting: BTreeMap::new(),
            sequential: BTreeSet::new(),
            parallel: BTreeSet::new(),
        };
        for id in graph.ids() {
            let unresolved = graph.references(id).len();
            readiness.waiting.insert(id, unresolved);
            if unresolved == 0 {
                readiness.enqueue(id);
            }
        }
        readiness
    }

    fn enqueue(&mut self, id: NodeId) {
        match self.graph.get(id) {
            Some(op) if op.kind.sequential() => self.sequential.insert(id),
            _ => self.parallel.insert(id),
        };
    }

    fn resolve(&mut self, id: NodeId) {
        self.waiting.remove(&id);
        for &dependent in self.graph.dependents(id) {
            let Some(count) = self.waiting.get_mut(&dependent) else { continue };
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.enqueue(dependent);
            }
        }
    }
}

/// Order the graph into stages.
///
/// A pass that finds no ready node while nodes remain means a cycle and is a
/// `StructuralFailure`.
pub fn schedule(graph: &Graph) -> PolyResult<Vec<Stage>> {
    let mut readiness = Readiness::new(graph);
    let mut stages = Vec::new();

    while !readiness.waiting.is_empty() {
        let mut stage = Stage::default();
        while let Some(id) = readiness.sequential.pop_first() {
            stage.sequential.push(id);
            readiness.resolve(id);
        }
        stage.parallel = std::mem::take(&mut readiness.parallel).into_iter().collect();
        for &id in &stage.parallel {
            readiness.resolve(id);
        }

        if stage.is_empty() {
            return Err(PolyError::structural(format!(
                "Circular reference among nodes {:?}",
                readiness.waiting.keys().collect::<Vec<_>>()
            )));
        }
        log::debug!(
            "stage {}: {} sequential, {} parallel",
            stages.len(),
            stage.sequential.len(),
            stage.parallel.len()
        );
        stages.push(stage);
    }
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ops::{Arg, NodeRef, Op, OpKind};

    fn op(kind: OpKind, refs: &[NodeId], id: NodeId) -> Op {
        Op::new(kind, refs.iter().map(|&i| Arg::Ref(NodeRef { id: i, bounds: None })).collect(), id)
    }

    #[test]
    fn test_sequential_prefix_absorbs_chains() {
        // create 0 -> join 1 -> union 2 -> return 3; union 4 reads 0
        let ops = vec![
            op(OpKind::Create, &[], 0),
            op(OpKind::Join, &[0], 1),
            op(OpKind::Union, &[1], 2),
            op(OpKind::Return, &[2], 3),
            op(OpKind::Union, &[0], 4),
        ];
        let graph = Graph::from_ops(ops, 3).unwrap();
        let stages = schedule(&graph).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].sequential, vec![0, 1]);
        assert_eq!(stages[0].parallel, vec![2, 4]);
        assert_eq!(stages[1].sequential, vec![3]);
        assert!(stages[1].parallel.is_empty());
    }

    #[test]
    fn test_cycle_is_structural() {
        let ops = vec![
            op(OpKind::Union, &[1], 0),
            op(OpKind::Union, &[0], 1),
            op(OpKind::Return, &[1], 2),
        ];
        let graph = Graph::from_ops(ops, 2).unwrap();
        let err = schedule(&graph).unwrap_err();
        assert!(matches!(err, PolyError::StructuralFailure(msg) if msg.contains("Circular")));
    }

    #[test]
    fn test_self_reference_is_structural() {
        let ops = vec![op(OpKind::Union, &[0], 0), op(OpKind::Return, &[0], 1)];
        let graph = Graph::from_ops(ops, 1).unwrap();
        assert!(schedule(&graph).is_err());
    }
}
