use graphport_core::{Graph, Result, TensorMap};

use crate::Engine;

impl Engine {
    /// Executes `graph` and returns a copy in which every tensor of the run is
    /// an initializer and every value-info declaration is also an output.
    ///
    /// The copy replays without inputs and exposes all intermediate
    /// activations, which makes it useful for debugging.
    pub fn execute_and_make_graph(&self, graph: &Graph, inputs: TensorMap) -> Result<Graph> {
        let ctx = self.execute_context(graph, inputs)?;

        let mut traced = graph.clone();
        for (name, value) in ctx.into_map() {
            traced.set_initializer(name, value);
        }
        for vi in &graph.value_info {
            if !traced.outputs.iter().any(|o| o.name == vi.name) {
                traced.outputs.push(vi.clone());
            }
        }
        Ok(traced)
    }
}
