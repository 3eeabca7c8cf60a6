//! Lazy geometry operation graph
//!
//! Builder factories record ops; evaluation prunes dead nodes, fuses chained
//! unions, orders the rest into stages and runs them against a backend.

pub mod analyze;
pub mod builder;
pub mod executor;
pub mod ops;
pub mod stages;

pub use analyze::Graph;
pub use builder::GraphBuilder;
pub use executor::Executor;
pub use ops::{Arg, FromValue, Input, NodeId, NodeRef, Op, OpKind, Ref, Value};
pub use stages::{schedule, Stage};

use serde::Serialize;

use crate::backend::Backend;
use crate::config::EvaluateOptions;
use crate::error::PolyResult;

/// Result of an evaluation together with how it was executed
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation<T> {
    pub output: T,
    /// Executed stages, in order
    pub stages: Vec<Stage>,
    /// Backend invocations; a batched group counts once
    pub backend_calls: usize,
}

/// Run the optimisation passes, schedule and execute a finished graph.
pub async fn evaluate_graph<T, B>(mut graph: Graph, options: &EvaluateOptions<B>) -> PolyResult<Evaluation<T>>
where
    T: FromValue,
    B: Backend,
{
    if options.remove_unused {
        graph.remove_unused();
    }
    if options.merge {
        graph.merge()?;
    }
    let stages = schedule(&graph)?;
    log::debug!("evaluating {} nodes in {} stages", graph.len(), stages.len());

    let mut executor = Executor::new(&options.backend);
    let output = executor.run(&graph, &stages).await?;
    Ok(Evaluation {
        output: T::from_value(output)?,
        stages,
        backend_calls: executor.backend_calls(),
    })
}
