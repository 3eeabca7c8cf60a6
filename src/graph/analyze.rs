//! Arena graph, dependency maps, dead-code elimination and op fusion
//!
//! Node ids are arena indices; removed nodes leave a tombstone so ids stay
//! stable across passes.

use std::collections::BTreeSet;

use super::ops::{NodeId, Op, OpKind};
use crate::error::{PolyError, PolyResult};

/// Single-shot op graph with forward and reverse reference maps
#[derive(Debug, Clone)]
pub struct Graph {
    /// Ops by id; `None` marks a removed node
    nodes: Vec<Option<Op>>,
    /// Reverse map: ids of the nodes referencing each node
    dependents: Vec<BTreeSet<NodeId>>,
    /// Id of the return node
    ret: NodeId,
}

impl Graph {
    /// Build an arena from arbitrary ops.
    ///
    /// Cycles are accepted here and reported by the scheduler. Ids must index
    /// into `ops`; ids out of range, duplicate ids, dangling references and a
    /// missing return node are structural failures.
    pub fn from_ops(ops: Vec<Op>, ret: NodeId) -> PolyResult<Self> {
        let len = ops.len();
        if let Some(op) = ops.iter().find(|op| op.id() >= len) {
            return Err(PolyError::structural(format!(
                "node id {} out of range for {} ops",
                op.id(),
                len
            )));
        }
        let mut nodes: Vec<Option<Op>> = vec![None; len];
        for op in ops {
            let id = op.id();
            if nodes[id].is_some() {
                return Err(PolyError::structural(format!("duplicate node id {}", id)));
            }
            nodes[id] = Some(op);
        }

        match nodes.get(ret) {
            Some(Some(op)) if op.kind == OpKind::Return => {}
            _ => return Err(PolyError::structural(format!("return node {} missing", ret))),
        }

        let mut dependents = vec![BTreeSet::new(); len];
        for op in nodes.iter().flatten() {
            for reference in op.references() {
                match nodes.get(reference) {
                    Some(Some(_)) => {
                        dependents[reference].insert(op.id());
                    }
                    _ => {
                        return Err(PolyError::structural(format!(
                            "node {} references missing node {}",
                            op.id(),
                            reference
                        )))
                    }
                }
            }
        }

        Ok(Self { nodes, dependents, ret })
    }

    pub fn ret(&self) -> NodeId {
        self.ret
    }

    pub fn get(&self, id: NodeId) -> Option<&Op> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Live node ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, node)| node.as_ref().map(|_| id))
    }

    pub fn ops(&self) -> impl Iterator<Item = &Op> + '_ {
        self.nodes.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.ops().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distinct ids referenced by `id`'s arguments.
    pub fn references(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id).map(Op::references).unwrap_or_default()
    }

    pub fn dependents(&self, id: NodeId) -> &BTreeSet<NodeId> {
        static EMPTY: BTreeSet<NodeId> = BTreeSet::new();
        self.dependents.get(id).unwrap_or(&EMPTY)
    }

    /// Keep exactly the nodes reachable from the return node; returns the removed count.
    pub fn remove_unused(&mut self) -> usize {
        let mut reachable = vec![false; self.nodes.len()];
        let mut worklist = vec![self.ret];
        while let Some(id) = worklist.pop() {
            if std::mem::replace(&mut reachable[id], true) {
                continue;
            }
            worklist.extend(self.references(id));
        }

        let unused: Vec<NodeId> = self.ids().filter(|&id| !reachable[id]).collect();
        for &id in &unused {
            self.remove(id);
        }
        if !unused.is_empty() {
            log::debug!("removed {} unused nodes", unused.len());
        }
        unused.len()
    }

    /// Fuse single-dependent ops with `Op::merge`; returns the number of fusions.
    pub fn merge(&mut self) -> PolyResult<usize> {
        self.merge_with(Op::merge)
    }

    /// Fuse single-dependent ops with a custom rule.
    ///
    /// The fused op must keep the dependent's id; anything else is a
    /// `MergeContractViolation`.
    pub fn merge_with<F>(&mut self, rule: F) -> PolyResult<usize>
    where
        F: Fn(&Op, &Op) -> Option<Op>,
    {
        let mut fused = 0;
        loop {
            let mut changed = false;
            for id in 0..self.nodes.len() {
                let Some(op) = self.get(id) else { continue };
                if op.kind == OpKind::Return || self.dependents[id].len() != 1 {
                    continue;
                }
                let Some(&target) = self.dependents[id].iter().next() else { continue };
                let Some(other) = self.get(target) else { continue };
                let Some(merged) = rule(op, other) else { continue };
                if merged.id() != target {
                    return Err(PolyError::MergeContractViolation {
                        expected: target as u32,
                        actual: merged.id() as u32,
                    });
                }

                let inherited = std::mem::take(&mut self.dependents[target]);
                self.remove(target);
                self.remove(id);
                for reference in merged.references() {
                    if !self.contains(reference) {
                        return Err(PolyError::structural(format!(
                            "fused node {} references removed node {}",
                            target, reference
                        )));
                    }
                    self.dependents[reference].insert(target);
                }
                self.nodes[target] = Some(merged);
                self.dependents[target] = inherited;

                fused += 1;
                changed = true;
            }
            if !changed {
                break;
            }
        }
        if fused > 0 {
            log::debug!("fused {} operations", fused);
        }
        Ok(fused)
    }

    /// Tombstone a node and unlink it from the nodes it references.
    fn remove(&mut self, id: NodeId) -> Option<Op> {
        let op = self.nodes.get_mut(id)?.take()?;
        self.dependents[id].clear();
        for reference in op.references() {
            if let Some(set) = self.dependents.get_mut(reference) {
                set.remove(&id);
            }
        }
        Some(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ops::{Arg, NodeRef};

    fn r(id: NodeId) -> Arg {
        Arg::Ref(NodeRef { id, bounds: None })
    }

    fn op(kind: OpKind, refs: &[NodeId], id: NodeId) -> Op {
        Op::new(kind, refs.iter().map(|&i| r(i)).collect(), id)
    }

    #[test]
    fn test_from_ops_rejects_dangling() {
        let ops = vec![op(OpKind::Union, &[7], 0), op(OpKind::Return, &[0], 1)];
        assert!(Graph::from_ops(ops, 1).unwrap_err().is_structural());
    }

    #[test]
    fn test_from_ops_rejects_ids_past_the_arena() {
        let ops = vec![op(OpKind::Create, &[], 1000), op(OpKind::Return, &[1000], 1)];
        let err = Graph::from_ops(ops, 1).unwrap_err();
        assert!(matches!(err, PolyError::StructuralFailure(msg) if msg.contains("1000")));

        let ops = vec![op(OpKind::Create, &[], usize::MAX), op(OpKind::Return, &[usize::MAX], 1)];
        assert!(Graph::from_ops(ops, 1).unwrap_err().is_structural());
    }

    #[test]
    fn test_from_ops_requires_return() {
        let ops = vec![op(OpKind::Create, &[], 0)];
        assert!(Graph::from_ops(ops, 0).is_err());
    }

    #[test]
    fn test_remove_unused_cascades() {
        // 0 -> 1 -> 3(return); 2 hangs off 0, 4 hangs off 2
        let ops = vec![
            op(OpKind::Create, &[], 0),
            op(OpKind::Union, &[0], 1),
            op(OpKind::Union, &[0], 2),
            op(OpKind::Return, &[1], 3),
            op(OpKind::Join, &[2], 4),
        ];
        let mut graph = Graph::from_ops(ops, 3).unwrap();
        assert_eq!(graph.remove_unused(), 2);
        assert_eq!(graph.ids().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(graph.dependents(0).iter().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_merge_rewires_dependents() {
        let ops = vec![
            op(OpKind::Create, &[], 0),
            op(OpKind::Create, &[], 1),
            op(OpKind::Union, &[0, 1], 2),
            op(OpKind::Union, &[2, 1], 3),
            op(OpKind::Return, &[3], 4),
        ];
        let mut graph = Graph::from_ops(ops, 4).unwrap();
        assert_eq!(graph.merge().unwrap(), 1);
        assert!(!graph.contains(2));
        assert_eq!(graph.get(3).unwrap().args, vec![r(0), r(1)]);
        assert!(graph.dependents(0).contains(&3));
        assert!(!graph.dependents(1).contains(&2));
        assert!(graph.dependents(3).contains(&4));
    }

    #[test]
    fn test_merge_contract_violation() {
        let ops = vec![
            op(OpKind::Create, &[], 0),
            op(OpKind::Union, &[0], 1),
            op(OpKind::Union, &[1], 2),
            op(OpKind::Return, &[2], 3),
        ];
        let mut graph = Graph::from_ops(ops, 3).unwrap();
        let err = graph
            .merge_with(|a, b| a.merge(b).map(|fused| Op::new(fused.kind, fused.args, 9)))
            .unwrap_err();
        assert_eq!(err, PolyError::MergeContractViolation { expected: 2, actual: 9 });
    }
}
