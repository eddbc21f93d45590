use anyhow::{bail, ensure, Context, Result};
use graphport_core::{onnx, DType, Graph, NodeBackend, Shape, Tensor, TensorMap};
use ort::{
    session::{builder::GraphOptimizationLevel, Session, SessionInputValue},
    tensor::TensorElementType,
    value::{DynValue, ValueType},
};
use tracing::trace;

/// Runs single-node graphs through ONNX Runtime.
///
/// ONNX Runtime can only execute whole models, so every call serializes the
/// isolated graph and commits a fresh session for it.
pub struct OrtBackend {
    intra_threads: Option<usize>,
}

impl OrtBackend {
    pub fn new() -> Self {
        Self {
            intra_threads: None,
        }
    }

    /// Caps the threads ONNX Runtime uses inside a single operator.
    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = Some(threads);
        self
    }

    fn session(&self, graph: &Graph) -> Result<Session> {
        let model = onnx::encode_model(graph);
        let mut builder = Session::builder()
            .context("failed to create ORT session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to configure ORT session builder")?;
        if let Some(threads) = self.intra_threads {
            builder = builder
                .with_intra_threads(threads)
                .context("failed to set ORT intra-op threads")?;
        }
        builder
            .commit_from_memory(&model)
            .with_context(|| format!("failed to load single-node model `{}`", graph.name))
    }
}

impl Default for OrtBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBackend for OrtBackend {
    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn run(&self, graph: &Graph, inputs: TensorMap) -> Result<Vec<Tensor>> {
        let mut session = self.session(graph)?;

        let mut ort_inputs = Vec::with_capacity(graph.inputs.len());
        for vi in &graph.inputs {
            let tensor = inputs
                .get(&vi.name)
                .with_context(|| format!("input `{}` is not bound", vi.name))?;
            let value = tensor_to_ort_value(tensor)?;
            ort_inputs.push((vi.name.clone(), SessionInputValue::from(value)));
        }

        let outputs = session.run(ort_inputs)?;
        let mut out_tensors = Vec::with_capacity(graph.outputs.len());
        for (name, value) in outputs.iter() {
            trace!(output = name, "collected ORT output");
            out_tensors.push(ort_value_to_tensor(&value)?);
        }
        ensure!(
            out_tensors.len() == graph.outputs.len(),
            "ORT returned {} outputs for {} declared",
            out_tensors.len(),
            graph.outputs.len()
        );

        Ok(out_tensors)
    }
}

fn tensor_to_ort_value(tensor: &Tensor) -> Result<DynValue> {
    let shape: Vec<usize> = tensor.shape().dims().to_vec();
    let value = match tensor.dtype() {
        DType::F32 => ort::value::Tensor::from_array((shape, tensor.to_vec::<f32>()?))?.into_dyn(),
        DType::I64 => ort::value::Tensor::from_array((shape, tensor.to_vec::<i64>()?))?.into_dyn(),
        DType::I32 => ort::value::Tensor::from_array((shape, tensor.to_vec::<i32>()?))?.into_dyn(),
        DType::U8 => ort::value::Tensor::from_array((shape, tensor.to_vec::<u8>()?))?.into_dyn(),
        DType::F16 => bail!("f16 inputs are not supported yet"),
    };
    Ok(value)
}

fn ort_value_to_tensor(value: &ort::value::ValueRef<'_>) -> Result<Tensor> {
    let ValueType::Tensor { ty, shape, .. } = value.dtype() else {
        bail!("non-tensor outputs are not supported");
    };

    let dims: Vec<usize> = shape.iter().map(|d| *d as usize).collect();
    let shape = Shape::from_slice(&dims);

    let tensor = match *ty {
        TensorElementType::Float32 => {
            let array = value.try_extract_array::<f32>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            Tensor::from_slice(shape, slice)?
        }
        TensorElementType::Int64 => {
            let array = value.try_extract_array::<i64>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            Tensor::from_slice(shape, slice)?
        }
        TensorElementType::Int32 => {
            let array = value.try_extract_array::<i32>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            Tensor::from_slice(shape, slice)?
        }
        TensorElementType::Uint8 => {
            let array = value.try_extract_array::<u8>()?;
            let slice = array.as_slice().context("non-contiguous output tensor")?;
            Tensor::from_slice(shape, slice)?
        }
        TensorElementType::Float16 => bail!("f16 outputs are not supported yet"),
        _ => bail!("unsupported output tensor element type: {ty}"),
    };
    Ok(tensor)
}
