//! Lazy boolean operations over 2D polygon sets.
//! Rust: wgpu 0.19 compute kernels with a rayon host fallback; graph evaluation on tokio primitives.

pub mod backend;
pub mod config;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod graph;
pub mod histopyramid;

pub use backend::{Backend, HistoPyramidBackend};
pub use config::{EngineConfig, EvaluateOptions};
pub use error::{PolyError, PolyResult};
pub use geometry::{Bounds, Geometry, Points, Shape, ShapePack};
pub use graph::{Evaluation, GraphBuilder, Input, Ref};
pub use histopyramid::{HistoPyramidEngine, HostDevice, PassMode, UnionStats};

#[cfg(feature = "gpu")]
pub use histopyramid::gpu::GpuDevice;
