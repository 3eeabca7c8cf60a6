//! Operation graph node and argument definitions
//!
//! Ops are recorded lazily by the builder. Arguments are either literal
//! payloads or references to the result of another op; references carry a
//! bounding-box hint that is never needed for correctness.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;

use crate::error::{PolyError, PolyResult};
use crate::geometry::{Bounds, Geometry, Points, Shape};
use glam::Vec2;

/// Node identifier; also the node's arena index.
pub type NodeId = usize;

/// Untyped reference to the result of an op
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeRef {
    pub id: NodeId,
    /// Union of the argument bounds, when any are known
    pub bounds: Option<Bounds>,
}

/// Typed lazy reference returned by the graph builder.
pub struct Ref<T> {
    node: NodeRef,
    marker: PhantomData<fn() -> T>,
}

impl<T> Ref<T> {
    pub(crate) fn new(node: NodeRef) -> Self {
        Self {
            node,
            marker: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.node.bounds
    }

    pub fn node(&self) -> NodeRef {
        self.node
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ref<T> {}

impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("id", &self.node.id)
            .field("bounds", &self.node.bounds)
            .finish()
    }
}

/// Literal payload flowing between ops
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Points(Points),
    Geometry(Geometry),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Points(_) => "points",
            Value::Geometry(_) => "geometry",
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        match self {
            Value::Points(points) => Bounds::from_points(points.iter().copied()),
            Value::Geometry(geometry) => Bounds::of_geometry(geometry),
        }
    }

    pub fn into_points(self) -> PolyResult<Points> {
        match self {
            Value::Points(points) => Ok(points),
            other => Err(PolyError::TypeMismatch {
                expected: "points",
                found: other.kind(),
            }),
        }
    }

    pub fn into_geometry(self) -> PolyResult<Geometry> {
        match self {
            Value::Geometry(geometry) => Ok(geometry),
            other => Err(PolyError::TypeMismatch {
                expected: "geometry",
                found: other.kind(),
            }),
        }
    }
}

impl From<Points> for Value {
    fn from(points: Points) -> Self {
        Value::Points(points)
    }
}

impl From<Geometry> for Value {
    fn from(geometry: Geometry) -> Self {
        Value::Geometry(geometry)
    }
}

/// Conversion of an evaluated payload back into a typed result.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> PolyResult<Self>;
}

impl FromValue for Geometry {
    fn from_value(value: Value) -> PolyResult<Self> {
        value.into_geometry()
    }
}

impl FromValue for Points {
    fn from_value(value: Value) -> PolyResult<Self> {
        value.into_points()
    }
}

/// Argument of an op
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Arg {
    Value(Value),
    Ref(NodeRef),
}

impl Arg {
    pub fn ref_id(&self) -> Option<NodeId> {
        match self {
            Arg::Ref(node) => Some(node.id),
            Arg::Value(_) => None,
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        match self {
            Arg::Ref(node) => node.bounds,
            Arg::Value(value) => value.bounds(),
        }
    }

    /// Identity used for argument deduplication: same referenced id, or equal payload.
    pub fn same_as(&self, other: &Arg) -> bool {
        match (self, other) {
            (Arg::Ref(a), Arg::Ref(b)) => a.id == b.id,
            (Arg::Value(a), Arg::Value(b)) => a == b,
            _ => false,
        }
    }
}

/// Caller-facing input: a lazy reference or literal data.
#[derive(Debug, Clone, PartialEq)]
pub enum Input<T> {
    Ref(Ref<T>),
    Value(T),
}

impl<T: Into<Value>> Input<T> {
    pub(crate) fn into_arg(self) -> Arg {
        match self {
            Input::Ref(r) => Arg::Ref(r.node()),
            Input::Value(value) => Arg::Value(value.into()),
        }
    }
}

impl<T> From<Ref<T>> for Input<T> {
    fn from(r: Ref<T>) -> Self {
        Input::Ref(r)
    }
}

impl<T> From<&Ref<T>> for Input<T> {
    fn from(r: &Ref<T>) -> Self {
        Input::Ref(*r)
    }
}

impl From<Geometry> for Input<Geometry> {
    fn from(geometry: Geometry) -> Self {
        Input::Value(geometry)
    }
}

impl From<Shape> for Input<Geometry> {
    fn from(shape: Shape) -> Self {
        Input::Value(vec![shape])
    }
}

impl From<Points> for Input<Points> {
    fn from(points: Points) -> Self {
        Input::Value(points)
    }
}

impl From<Vec2> for Input<Points> {
    fn from(point: Vec2) -> Self {
        Input::Value(vec![point])
    }
}

/// The closed set of op kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum OpKind {
    Create,
    Union,
    Split,
    Intersection,
    Join,
    Return,
}

impl OpKind {
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Create => "create",
            OpKind::Union => "union",
            OpKind::Split => "split",
            OpKind::Intersection => "intersection",
            OpKind::Join => "join",
            OpKind::Return => "return",
        }
    }

    /// Resolved one at a time in the sequential prefix of a stage.
    pub fn sequential(self) -> bool {
        matches!(self, OpKind::Create | OpKind::Join | OpKind::Return)
    }

    /// Several ready instances run as one backend call.
    pub fn batches(self) -> bool {
        self == OpKind::Union
    }

    /// Has a fusion rule.
    pub fn merges(self) -> bool {
        self == OpKind::Union
    }

    /// Whether executing the op invokes the backend.
    pub fn calls_backend(self) -> bool {
        !matches!(self, OpKind::Join | OpKind::Return)
    }
}

/// One recorded operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Op {
    pub kind: OpKind,
    pub args: Vec<Arg>,
    pub ret: NodeRef,
}

impl Op {
    pub fn new(kind: OpKind, args: Vec<Arg>, id: NodeId) -> Self {
        let bounds = args.iter().fold(None, |acc, arg| Bounds::merge(acc, arg.bounds()));
        Self {
            kind,
            args,
            ret: NodeRef { id, bounds },
        }
    }

    pub fn id(&self) -> NodeId {
        self.ret.id
    }

    /// Distinct node ids referenced by the arguments, in first-use order.
    pub fn references(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        for id in self.args.iter().filter_map(Arg::ref_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Fuse `self` into its single dependent `other`.
    ///
    /// Defined for union into union only: the reference to `self` inside
    /// `other` is replaced by `self`'s arguments and duplicates are dropped.
    /// The fused op keeps `other`'s id.
    pub fn merge(&self, other: &Op) -> Option<Op> {
        if !(self.kind.merges() && self.kind == other.kind) {
            return None;
        }
        if !other.args.iter().any(|arg| arg.ref_id() == Some(self.id())) {
            return None;
        }

        let mut args: Vec<Arg> = Vec::with_capacity(self.args.len() + other.args.len());
        let mut push = |arg: &Arg| {
            if !args.iter().any(|kept| kept.same_as(arg)) {
                args.push(arg.clone());
            }
        };
        for arg in &other.args {
            if arg.ref_id() == Some(self.id()) {
                self.args.iter().for_each(&mut push);
            } else {
                push(arg);
            }
        }
        Some(Op::new(other.kind, args, other.id()))
    }
}
