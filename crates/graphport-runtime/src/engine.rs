use std::sync::Arc;

use graphport_core::{
    Error, ExecContext, ExecMode, Graph, GraphLoader, NodeBackend, OffloadBackend,
    OnnxFileLoader, Result, Tensor, TensorMap,
};
use tracing::info;

use crate::custom::{CustomOp, CustomOpRegistry};

/// Executes graphs, node by node or through a whole-graph offload target.
///
/// The engine holds no per-execution state; every call builds and owns its
/// own [`ExecContext`].
pub struct Engine {
    pub(crate) backend: Arc<dyn NodeBackend>,
    pub(crate) custom_ops: CustomOpRegistry,
    pub(crate) loader: Arc<dyn GraphLoader>,
    remote: Option<Arc<dyn OffloadBackend>>,
    simulation: Option<Arc<dyn OffloadBackend>>,
}

impl Engine {
    pub fn builder(backend: impl NodeBackend + 'static) -> EngineBuilder {
        EngineBuilder::new(Arc::new(backend))
    }

    pub fn custom_ops(&self) -> &CustomOpRegistry {
        &self.custom_ops
    }

    /// Executes `graph` with the given inputs bound.
    ///
    /// Returns the declared graph outputs, or every tensor of the execution
    /// (inputs, constants, intermediates, outputs) when `full_context` is set.
    /// Inputs naming tensors the graph does not declare are ignored.
    pub fn execute(&self, graph: &Graph, inputs: TensorMap, full_context: bool) -> Result<TensorMap> {
        let ctx = self.execute_context(graph, inputs)?;
        if full_context {
            Ok(ctx.into_map())
        } else {
            ctx.project(graph.outputs.iter().map(|vi| vi.name.as_str()))
        }
    }

    /// Executes `graph` and returns the whole execution context.
    pub fn execute_context<I>(&self, graph: &Graph, inputs: I) -> Result<ExecContext>
    where
        I: IntoIterator<Item = (String, Tensor)>,
    {
        graph.check_all_shapes_specified()?;
        let mode = graph.exec_mode()?;

        let mut ctx = ExecContext::for_graph(graph)?;
        ctx.bind_all(inputs)?;

        info!(graph = %graph.name, mode = ?mode, nodes = graph.nodes.len(), "executing graph");
        match mode {
            ExecMode::NodeByNode => {
                // Node order is trusted to be topological.
                for node in &graph.nodes {
                    self.execute_node(node, &mut ctx, graph)?;
                }
            }
            ExecMode::Remote => {
                let remote = self.offload_target(&self.remote, mode, "remote")?;
                remote.run(graph, &mut ctx)?;
            }
            ExecMode::Simulation => {
                let sim = self.offload_target(&self.simulation, mode, "simulation")?;
                sim.run(graph, &mut ctx)?;
            }
        }
        Ok(ctx)
    }

    fn offload_target<'a>(
        &self,
        target: &'a Option<Arc<dyn OffloadBackend>>,
        mode: ExecMode,
        role: &'static str,
    ) -> Result<&'a Arc<dyn OffloadBackend>> {
        target.as_ref().ok_or_else(|| Error::MissingCollaborator {
            mode: mode.as_str().to_string(),
            role,
        })
    }
}

/// Assembles an [`Engine`] from its collaborators.
///
/// Defaults: the built-in custom ops, an [`OnnxFileLoader`] resolving
/// partition references relative to the working directory, and no offload
/// targets.
pub struct EngineBuilder {
    backend: Arc<dyn NodeBackend>,
    custom_ops: CustomOpRegistry,
    loader: Arc<dyn GraphLoader>,
    remote: Option<Arc<dyn OffloadBackend>>,
    simulation: Option<Arc<dyn OffloadBackend>>,
}

impl EngineBuilder {
    pub fn new(backend: Arc<dyn NodeBackend>) -> Self {
        Self {
            backend,
            custom_ops: CustomOpRegistry::with_builtin(),
            loader: Arc::new(OnnxFileLoader::new()),
            remote: None,
            simulation: None,
        }
    }

    pub fn custom_op(mut self, op_type: impl Into<String>, op: impl CustomOp + 'static) -> Self {
        self.custom_ops.register(op_type, op);
        self
    }

    pub fn custom_ops(mut self, registry: CustomOpRegistry) -> Self {
        self.custom_ops = registry;
        self
    }

    pub fn loader(mut self, loader: impl GraphLoader + 'static) -> Self {
        self.loader = Arc::new(loader);
        self
    }

    pub fn remote(mut self, target: Arc<dyn OffloadBackend>) -> Self {
        self.remote = Some(target);
        self
    }

    pub fn simulation(mut self, target: Arc<dyn OffloadBackend>) -> Self {
        self.simulation = Some(target);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            backend: self.backend,
            custom_ops: self.custom_ops,
            loader: self.loader,
            remote: self.remote,
            simulation: self.simulation,
        }
    }
}
