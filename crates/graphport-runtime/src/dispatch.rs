use std::sync::Arc;

use graphport_core::{
    Error, ExecContext, Graph, Node, Result, CUSTOM_DOMAIN, PARTITION_MODEL_ATTR,
    PARTITION_OP_TYPE,
};
use tracing::debug;

use crate::custom::CustomOp;
use crate::isolate::{gather_inputs, isolate_node, store_outputs};
use crate::Engine;

/// Where a node is executed, resolved once per node.
pub enum NodeRoute<'a> {
    /// Execute the nested graph named by the partition's `model` attribute.
    Partition { reference: &'a str },
    /// Hand the node to its registered custom-op handler.
    Custom(Arc<dyn CustomOp>),
    /// Isolate the node and run it on the generic backend.
    Generic,
}

impl std::fmt::Debug for NodeRoute<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRoute::Partition { reference } => f
                .debug_struct("Partition")
                .field("reference", reference)
                .finish(),
            NodeRoute::Custom(_) => f.write_str("Custom"),
            NodeRoute::Generic => f.write_str("Generic"),
        }
    }
}

impl Engine {
    /// Partition marker first, then the custom domain, then the generic backend.
    ///
    /// A custom-domain op type without a handler is an error; it never falls
    /// back to the generic backend.
    pub fn route<'a>(&self, node: &'a Node) -> Result<NodeRoute<'a>> {
        if node.op_type == PARTITION_OP_TYPE {
            return Ok(NodeRoute::Partition {
                reference: node.attr_str(PARTITION_MODEL_ATTR)?,
            });
        }
        if node.domain == CUSTOM_DOMAIN {
            return Ok(NodeRoute::Custom(self.custom_ops.lookup(node)?));
        }
        Ok(NodeRoute::Generic)
    }

    /// Executes one node of `graph`, reading from and writing to `ctx`.
    pub fn execute_node(&self, node: &Node, ctx: &mut ExecContext, graph: &Graph) -> Result<()> {
        let route = self.route(node)?;
        debug!(node = node.label(), op_type = %node.op_type, route = ?route, "dispatching node");
        match route {
            NodeRoute::Partition { reference } => self.execute_partition(reference, ctx),
            NodeRoute::Custom(op) => op.execute(node, ctx, graph),
            NodeRoute::Generic => {
                let subgraph = isolate_node(node, graph);
                let inputs = gather_inputs(node, ctx)?;
                let outputs = self
                    .backend
                    .run(&subgraph, inputs)
                    .map_err(|e| Error::backend(self.backend.name(), e))?;
                store_outputs(node, &subgraph, outputs, ctx, self.backend.name())
            }
        }
    }

    /// Runs a nested graph with `ctx` as its inputs and merges back what it produced.
    ///
    /// Only tensors written by nested nodes or declared as nested outputs are
    /// merged; names the parent does not know yet are added.
    fn execute_partition(&self, reference: &str, ctx: &mut ExecContext) -> Result<()> {
        let nested = self.loader.load(reference)?;
        debug!(partition = reference, nodes = nested.nodes.len(), "entering partition");

        let inputs = ctx.iter().map(|(name, t)| (name.clone(), t.clone()));
        let produced = self.execute_context(&nested, inputs)?;

        let names = nested
            .nodes
            .iter()
            .flat_map(|n| n.present_outputs())
            .chain(nested.outputs.iter().map(|vi| vi.name.as_str()));
        for name in names {
            ctx.merge(name, produced.get(name)?.clone())?;
        }
        Ok(())
    }
}
