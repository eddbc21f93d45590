#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, ensure, Context as _};
use graphport_core::{
    DType, Error, ExecContext, Graph, GraphLoader, NodeBackend, OffloadBackend, Result, Tensor,
    TensorMap,
};

/// Tiny f32 reference for a handful of standard ops.
///
/// Checks that every input the node reads is declared as a sub-graph input,
/// and returns results in `graph.outputs` order.
#[derive(Default)]
pub struct RefBackend {
    pub calls: AtomicUsize,
}

impl NodeBackend for RefBackend {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn run(&self, graph: &Graph, inputs: TensorMap) -> anyhow::Result<Vec<Tensor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ensure!(graph.nodes.len() == 1, "expected a single-node graph");
        let node = &graph.nodes[0];
        for name in node.present_inputs() {
            ensure!(
                graph.inputs.iter().any(|vi| vi.name == name),
                "input `{name}` is not declared by the sub-graph"
            );
        }

        let arg = |i: usize| -> anyhow::Result<Vec<f32>> {
            let name = node.inputs.get(i).context("missing input")?;
            let t = inputs.get(name).with_context(|| format!("unbound `{name}`"))?;
            Ok(t.to_vec::<f32>()?)
        };
        let binary = |f: fn(f32, f32) -> f32| -> anyhow::Result<Vec<f32>> {
            let (a, b) = (arg(0)?, arg(1)?);
            Ok(if b.len() == 1 {
                a.iter().map(|x| f(*x, b[0])).collect()
            } else {
                ensure!(a.len() == b.len(), "broadcast not supported");
                a.iter().zip(&b).map(|(x, y)| f(*x, *y)).collect()
            })
        };

        let mut results: HashMap<&str, Vec<f32>> = HashMap::new();
        match node.op_type.as_str() {
            "Abs" => {
                results.insert(&node.outputs[0], arg(0)?.iter().map(|x| x.abs()).collect());
            }
            "Neg" => {
                results.insert(&node.outputs[0], arg(0)?.iter().map(|x| -x).collect());
            }
            "Relu" => {
                results.insert(&node.outputs[0], arg(0)?.iter().map(|x| x.max(0.0)).collect());
            }
            "Identity" => {
                results.insert(&node.outputs[0], arg(0)?);
            }
            "Add" => {
                results.insert(&node.outputs[0], binary(|a, b| a + b)?);
            }
            "Mul" => {
                results.insert(&node.outputs[0], binary(|a, b| a * b)?);
            }
            "Split" => {
                let x = arg(0)?;
                let half = x.len() / 2;
                results.insert(&node.outputs[0], x[..half].to_vec());
                results.insert(&node.outputs[1], x[half..].to_vec());
            }
            other => bail!("reference backend does not implement `{other}`"),
        }

        graph
            .outputs
            .iter()
            .map(|vi| {
                let values = results
                    .remove(vi.name.as_str())
                    .with_context(|| format!("no result for `{}`", vi.name))?;
                let shape = vi.shape().context("output shape unknown")?;
                Ok(Tensor::from_slice(shape, &values)?)
            })
            .collect()
    }
}

/// Backend that always fails, counting how often it was asked.
#[derive(Default)]
pub struct FailingBackend {
    pub calls: AtomicUsize,
}

impl NodeBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn run(&self, _graph: &Graph, _inputs: TensorMap) -> anyhow::Result<Vec<Tensor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("device lost")
    }
}

/// Offload target that fills every graph output with `value`.
pub struct FillOffload {
    pub value: f32,
    pub seen: Mutex<Vec<String>>,
}

impl FillOffload {
    pub fn new(value: f32) -> Arc<Self> {
        Arc::new(Self {
            value,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl OffloadBackend for FillOffload {
    fn name(&self) -> &'static str {
        "fill"
    }

    fn run(&self, graph: &Graph, ctx: &mut ExecContext) -> Result<()> {
        self.seen.lock().unwrap().push(graph.name.clone());
        for vi in &graph.outputs {
            let shape = ctx.get(&vi.name)?.shape().clone();
            let values = vec![self.value; shape.numel()];
            ctx.store(&vi.name, Tensor::from_slice(shape, &values)?)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLoader {
    graphs: HashMap<String, Graph>,
}

impl InMemoryLoader {
    pub fn with(mut self, reference: &str, graph: Graph) -> Self {
        self.graphs.insert(reference.to_string(), graph);
        self
    }
}

impl GraphLoader for InMemoryLoader {
    fn load(&self, reference: &str) -> Result<Graph> {
        self.graphs.get(reference).cloned().ok_or_else(|| Error::Load {
            reference: reference.to_string(),
            source: anyhow::anyhow!("not registered"),
        })
    }
}

pub fn f32_tensor(shape: &[usize], values: &[f32]) -> Tensor {
    Tensor::from_slice(shape, values).expect("valid fixture")
}

pub fn values(map: &TensorMap, name: &str) -> Vec<f32> {
    map.get(name)
        .unwrap_or_else(|| panic!("missing `{name}`"))
        .to_vec::<f32>()
        .expect("f32 tensor")
}

pub fn inputs<const N: usize>(pairs: [(&str, Tensor); N]) -> TensorMap {
    pairs
        .into_iter()
        .map(|(name, t)| (name.to_string(), t))
        .collect()
}

pub fn f32_zeros(shape: &[usize]) -> Tensor {
    Tensor::zeros(DType::F32, shape.into())
}
