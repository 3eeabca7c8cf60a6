//! Stage executor
//!
//! Runs scheduled stages against a backend, caching each node's result by id.

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;

use super::analyze::Graph;
use super::ops::{Arg, NodeId, Op, OpKind, Value};
use super::stages::Stage;
use crate::backend::Backend;
use crate::error::{PolyError, PolyResult};
use crate::geometry::{Geometry, Points};

/// Executes stages in order and tracks backend usage.
pub struct Executor<'b, B> {
    backend: &'b B,
    cache: HashMap<NodeId, Value>,
    backend_calls: usize,
}

impl<'b, B: Backend> Executor<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self {
            backend,
            cache: HashMap::new(),
            backend_calls: 0,
        }
    }

    /// Backend invocations so far; a batched group counts once.
    pub fn backend_calls(&self) -> usize {
        self.backend_calls
    }

    /// Execute every stage and return the value of the return node.
    pub async fn run(&mut self, graph: &Graph, stages: &[Stage]) -> PolyResult<Value> {
        for (index, stage) in stages.iter().enumerate() {
            log::debug!(
                "Executing stage {}/{} ({} sequential, {} parallel)",
                index + 1,
                stages.len(),
                stage.sequential.len(),
                stage.parallel.len()
            );
            for &id in &stage.sequential {
                let op = node(graph, id)?;
                let value = self.execute(op).await?;
                self.store(op, value);
            }
            self.run_parallel(graph, &stage.parallel).await?;
        }

        self.cache
            .remove(&graph.ret())
            .ok_or_else(|| PolyError::structural("return node was never executed"))
    }

    /// Kind groups of a parallel stage run concurrently; results are stored
    /// once every group has finished.
    async fn run_parallel(&mut self, graph: &Graph, ids: &[NodeId]) -> PolyResult<()> {
        let mut groups: BTreeMap<OpKind, Vec<&Op>> = BTreeMap::new();
        for &id in ids {
            let op = node(graph, id)?;
            groups.entry(op.kind).or_default().push(op);
        }

        let outcomes = join_all(groups.into_iter().map(|(kind, ops)| self.run_group(kind, ops))).await;
        for outcome in outcomes {
            let (values, calls) = outcome?;
            self.backend_calls += calls;
            self.cache.extend(values);
        }
        Ok(())
    }

    /// Results of one kind group and the backend calls it took.
    async fn run_group(&self, kind: OpKind, ops: Vec<&Op>) -> PolyResult<(Vec<(NodeId, Value)>, usize)> {
        if kind.batches() && ops.len() > 1 {
            let inputs = ops
                .iter()
                .map(|op| self.geometry_args(op))
                .collect::<PolyResult<Vec<_>>>()?;
            let results = self.backend.union_many(&inputs).await?;
            if results.len() != ops.len() {
                return Err(PolyError::buffer(format!(
                    "batched {} returned {} results for {} ops",
                    kind.name(),
                    results.len(),
                    ops.len()
                )));
            }
            let values = ops
                .iter()
                .zip(results)
                .map(|(op, geometry)| (op.id(), Value::Geometry(geometry)))
                .collect();
            return Ok((values, 1));
        }

        let results = join_all(ops.iter().map(|op| self.execute(op))).await;
        let mut values = Vec::with_capacity(ops.len());
        for (op, result) in ops.iter().zip(results) {
            values.push((op.id(), result?));
        }
        let calls = if kind.calls_backend() { ops.len() } else { 0 };
        Ok((values, calls))
    }

    async fn execute(&self, op: &Op) -> PolyResult<Value> {
        match op.kind {
            OpKind::Create => {
                let points = self.point_args(op)?;
                Ok(Value::Geometry(self.backend.create(&points).await?))
            }
            // split shares the union pipeline
            OpKind::Union | OpKind::Split => {
                let geometry = self.geometry_args(op)?;
                Ok(Value::Geometry(self.backend.union(&geometry).await?))
            }
            OpKind::Intersection => {
                let geometry = self.geometry_args(op)?;
                Ok(Value::Points(self.backend.intersection(&geometry).await?))
            }
            OpKind::Join => Ok(Value::Geometry(self.geometry_args(op)?)),
            OpKind::Return => match op.args.as_slice() {
                [arg] => self.resolve(arg).cloned(),
                args => Err(PolyError::structural(format!(
                    "return node takes one argument, found {}",
                    args.len()
                ))),
            },
        }
    }

    fn store(&mut self, op: &Op, value: Value) {
        if op.kind.calls_backend() {
            self.backend_calls += 1;
        }
        self.cache.insert(op.id(), value);
    }

    fn resolve<'a>(&'a self, arg: &'a Arg) -> PolyResult<&'a Value> {
        match arg {
            Arg::Value(value) => Ok(value),
            Arg::Ref(node) => self
                .cache
                .get(&node.id)
                .ok_or_else(|| PolyError::structural(format!("node {} used before it was resolved", node.id))),
        }
    }

    /// Concatenated geometry of all arguments.
    fn geometry_args(&self, op: &Op) -> PolyResult<Geometry> {
        let mut geometry = Geometry::new();
        for arg in &op.args {
            match self.resolve(arg)? {
                Value::Geometry(shapes) => geometry.extend(shapes.iter().cloned()),
                other => {
                    return Err(PolyError::TypeMismatch {
                        expected: "geometry",
                        found: other.kind(),
                    })
                }
            }
        }
        Ok(geometry)
    }

    fn point_args(&self, op: &Op) -> PolyResult<Points> {
        let mut points = Points::new();
        for arg in &op.args {
            match self.resolve(arg)? {
                Value::Points(more) => points.extend_from_slice(more),
                other => {
                    return Err(PolyError::TypeMismatch {
                        expected: "points",
                        found: other.kind(),
                    })
                }
            }
        }
        Ok(points)
    }
}

fn node(graph: &Graph, id: NodeId) -> PolyResult<&Op> {
    graph
        .get(id)
        .ok_or_else(|| PolyError::structural(format!("scheduled node {} is not in the graph", id)))
}
