use anyhow::Result as AnyResult;

use crate::{ExecContext, Graph, Result, Tensor, TensorMap};

/// Generic tensor-math backend for standard operators.
pub trait NodeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Executes a graph holding a single node.
    ///
    /// Returns one tensor per `graph.outputs` entry, in that order. That order
    /// is not the node's own output order; callers reconcile by name.
    fn run(&self, graph: &Graph, inputs: TensorMap) -> AnyResult<Vec<Tensor>>;
}

/// Whole-graph execution target (remote device or cycle-accurate simulator).
pub trait OffloadBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Executes all of `graph` and writes its outputs into `ctx` in place.
    ///
    /// Implementations wrap their own failures in [`crate::Error::Backend`].
    fn run(&self, graph: &Graph, ctx: &mut ExecContext) -> Result<()>;
}
