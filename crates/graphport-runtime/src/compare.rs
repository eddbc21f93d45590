use graphport_core::{Error, Graph, Result, Tensor, TensorMap};

use crate::Engine;

/// Absolute tolerance used by [`all_close`].
pub const DEFAULT_ATOL: f64 = 1e-3;

/// Same shape and every element pair within [`DEFAULT_ATOL`].
pub fn all_close(a: &Tensor, b: &Tensor) -> bool {
    a.shape() == b.shape()
        && a
            .to_f64_vec()
            .iter()
            .zip(b.to_f64_vec())
            .all(|(x, y)| approx::abs_diff_eq!(*x, y, epsilon = DEFAULT_ATOL))
}

impl Engine {
    /// Runs both graphs on `inputs` and compares their first declared outputs
    /// with [`all_close`].
    pub fn compare_execution(&self, a: &Graph, b: &Graph, inputs: &TensorMap) -> Result<bool> {
        self.compare_execution_with(a, b, inputs, all_close)
    }

    /// Like [`Engine::compare_execution`] with a caller-supplied predicate.
    /// Outputs after the first are not compared.
    pub fn compare_execution_with<F>(
        &self,
        a: &Graph,
        b: &Graph,
        inputs: &TensorMap,
        compare: F,
    ) -> Result<bool>
    where
        F: Fn(&Tensor, &Tensor) -> bool,
    {
        let res_a = self.first_output(a, inputs)?;
        let res_b = self.first_output(b, inputs)?;
        Ok(compare(&res_a, &res_b))
    }

    fn first_output(&self, graph: &Graph, inputs: &TensorMap) -> Result<Tensor> {
        let name = graph
            .outputs
            .first()
            .map(|vi| vi.name.clone())
            .ok_or_else(|| Error::InvalidModel(format!("graph `{}` has no outputs", graph.name)))?;
        let mut outputs = self.execute(graph, inputs.clone(), false)?;
        outputs
            .remove(&name)
            .ok_or(Error::UnknownTensor { tensor: name })
    }
}
