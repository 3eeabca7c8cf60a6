//! Lazy graph builder
//!
//! Factories only record ops and hand back typed references. The builder is
//! an owned value consumed exactly once by evaluation.

use super::analyze::Graph;
use super::ops::{Arg, FromValue, Input, Op, OpKind, Ref};
use super::{evaluate_graph, Evaluation};
use crate::backend::Backend;
use crate::config::EvaluateOptions;
use crate::error::PolyResult;
use crate::geometry::{Geometry, Points};

/// Records geometry operations into a single-shot graph.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    ops: Vec<Op>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded ops
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Append an op and return a reference to its result.
    pub fn queue<T>(&mut self, kind: OpKind, args: Vec<Arg>) -> Ref<T> {
        let op = Op::new(kind, args, self.ops.len());
        let ret = Ref::new(op.ret);
        self.ops.push(op);
        ret
    }

    /// Shapes built from point sets by the backend.
    pub fn create<I>(&mut self, positions: impl IntoIterator<Item = I>) -> Ref<Geometry>
    where
        I: Into<Input<Points>>,
    {
        let args = positions.into_iter().map(|input| input.into().into_arg()).collect();
        self.queue(OpKind::Create, args)
    }

    pub fn union<I>(&mut self, geometries: impl IntoIterator<Item = I>) -> Ref<Geometry>
    where
        I: Into<Input<Geometry>>,
    {
        let args = geometry_args(geometries);
        self.queue(OpKind::Union, args)
    }

    pub fn split<I>(&mut self, geometries: impl IntoIterator<Item = I>) -> Ref<Geometry>
    where
        I: Into<Input<Geometry>>,
    {
        let args = geometry_args(geometries);
        self.queue(OpKind::Split, args)
    }

    /// Crossing points of the combined geometry.
    pub fn intersection<I>(&mut self, geometries: impl IntoIterator<Item = I>) -> Ref<Points>
    where
        I: Into<Input<Geometry>>,
    {
        let args = geometry_args(geometries);
        self.queue(OpKind::Intersection, args)
    }

    /// Plain concatenation, no boolean work.
    pub fn join<I>(&mut self, geometries: impl IntoIterator<Item = I>) -> Ref<Geometry>
    where
        I: Into<Input<Geometry>>,
    {
        let args = geometry_args(geometries);
        self.queue(OpKind::Join, args)
    }

    /// Close the graph with a return node referencing `ret`.
    pub fn finish<T>(mut self, ret: Ref<T>) -> PolyResult<Graph> {
        let id = self.ops.len();
        self.ops.push(Op::new(OpKind::Return, vec![Arg::Ref(ret.node())], id));
        Graph::from_ops(self.ops, id)
    }

    pub async fn evaluate<T, B>(self, ret: Ref<T>, options: &EvaluateOptions<B>) -> PolyResult<T>
    where
        T: FromValue,
        B: Backend,
    {
        Ok(self.evaluate_detailed(ret, options).await?.output)
    }

    /// Evaluate and report the executed stages and backend call count.
    pub async fn evaluate_detailed<T, B>(self, ret: Ref<T>, options: &EvaluateOptions<B>) -> PolyResult<Evaluation<T>>
    where
        T: FromValue,
        B: Backend,
    {
        let graph = self.finish(ret)?;
        evaluate_graph(graph, options).await
    }

    pub fn evaluate_blocking<T, B>(self, ret: Ref<T>, options: &EvaluateOptions<B>) -> PolyResult<T>
    where
        T: FromValue,
        B: Backend,
    {
        pollster::block_on(self.evaluate(ret, options))
    }
}

fn geometry_args<I>(geometries: impl IntoIterator<Item = I>) -> Vec<Arg>
where
    I: Into<Input<Geometry>>,
{
    geometries.into_iter().map(|input| input.into().into_arg()).collect()
}
