use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use bytes::Bytes;
use graphport_core::{
    onnx, DType, Error, ExecContext, Graph, OffloadBackend, Result, Shape, Tensor, EXEC_MODE_KEY,
};
use graphport_proto::graphport::v1 as pb;
use graphport_proto::graphport::v1::remote_executor_client::RemoteExecutorClient;
use tokio::runtime::{Handle, RuntimeFlavor};
use tonic::transport::Endpoint;
use tracing::{debug, info};

/// Graph metadata key holding the executor address, e.g. `http://10.0.0.2:50051`.
pub const REMOTE_ADDR_KEY: &str = "remote_addr";
/// Graph metadata key naming a model the executor already holds.
pub const REMOTE_MODEL_KEY: &str = "remote_model";

const BACKEND_NAME: &str = "remote";

/// Runs whole graphs on a remote executor over gRPC.
///
/// Blocks the calling thread until the executor answers. Inside a
/// multi-threaded tokio runtime the request runs on that runtime; otherwise
/// it is driven on a short-lived private runtime.
pub struct RemoteBackend {
    default_addr: Option<String>,
    timeout: Duration,
}

impl RemoteBackend {
    pub fn new() -> Self {
        Self {
            default_addr: None,
            timeout: Duration::from_secs(120),
        }
    }

    /// Address used when the graph carries no `remote_addr` property.
    pub fn with_default_addr(mut self, addr: impl Into<String>) -> Self {
        self.default_addr = Some(addr.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, graph: &Graph, ctx: &ExecContext) -> anyhow::Result<pb::ExecuteRequest> {
        let mut inputs = Vec::with_capacity(graph.inputs.len());
        for vi in &graph.inputs {
            let tensor = ctx.get(&vi.name)?;
            inputs.push(tensor_to_pb(&vi.name, tensor));
        }

        let (model, model_proto) = match graph.metadata_prop(REMOTE_MODEL_KEY) {
            Some(name) if !name.is_empty() => (name.to_string(), Vec::new()),
            _ => {
                // The executor must run the graph itself, not offload it again.
                let mut local = graph.clone();
                local.metadata.remove(EXEC_MODE_KEY);
                local.metadata.remove(REMOTE_ADDR_KEY);
                (String::new(), onnx::encode_model(&local))
            }
        };

        Ok(pb::ExecuteRequest {
            model_proto,
            model,
            inputs,
        })
    }
}

impl Default for RemoteBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OffloadBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn run(&self, graph: &Graph, ctx: &mut ExecContext) -> Result<()> {
        let addr = graph
            .metadata_prop(REMOTE_ADDR_KEY)
            .map(str::to_string)
            .or_else(|| self.default_addr.clone())
            .ok_or_else(|| Error::MissingCollaborator {
                mode: BACKEND_NAME.to_string(),
                role: "remote executor address",
            })?;

        let request = self
            .request(graph, ctx)
            .map_err(|e| Error::backend(BACKEND_NAME, e))?;
        debug!(%addr, graph = %graph.name, inputs = request.inputs.len(), "sending remote execution");

        let t0 = Instant::now();
        let response = block_on(execute(addr.clone(), request, self.timeout))
            .map_err(|e| Error::backend(BACKEND_NAME, e))?;
        info!(
            %addr,
            remote_us = response.exec_us,
            roundtrip_us = t0.elapsed().as_micros() as u64,
            "remote execution finished"
        );

        let mut returned = Vec::with_capacity(response.outputs.len());
        for output in response.outputs {
            let name = output.name.clone();
            let tensor = pb_to_tensor(output).map_err(|e| Error::backend(BACKEND_NAME, e))?;
            ctx.store(&name, tensor)?;
            returned.push(name);
        }
        for vi in &graph.outputs {
            if !returned.contains(&vi.name) {
                return Err(Error::backend(
                    BACKEND_NAME,
                    anyhow::anyhow!("executor did not return output `{}`", vi.name),
                ));
            }
        }
        Ok(())
    }
}

fn block_on<F, T>(fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>> + Send,
    T: Send,
{
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() != RuntimeFlavor::CurrentThread => {
            tokio::task::block_in_place(|| handle.block_on(fut))
        }
        // A current-thread runtime cannot lend its own thread out.
        Ok(_) => std::thread::scope(|scope| {
            scope
                .spawn(|| client_runtime()?.block_on(fut))
                .join()
                .map_err(|_| anyhow!("client thread panicked"))?
        }),
        Err(_) => client_runtime()?.block_on(fut),
    }
}

fn client_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start client runtime")
}

async fn execute(
    addr: String,
    request: pb::ExecuteRequest,
    timeout: Duration,
) -> anyhow::Result<pb::ExecuteResponse> {
    let channel = Endpoint::from_shared(addr)
        .context("invalid remote executor address")?
        .connect()
        .await
        .context("failed to connect to remote executor")?;
    let mut client = RemoteExecutorClient::new(channel);

    let mut request = tonic::Request::new(request);
    request.set_timeout(timeout);
    let response = client
        .execute(request)
        .await
        .context("remote execution request failed")?;
    Ok(response.into_inner())
}

pub fn tensor_to_pb(name: &str, tensor: &Tensor) -> pb::Tensor {
    pb::Tensor {
        name: name.to_string(),
        dtype: to_proto_dtype(tensor.dtype()) as i32,
        shape: tensor.shape().dims().iter().map(|d| *d as i64).collect(),
        data: tensor.data.to_vec(),
    }
}

pub fn pb_to_tensor(tensor: pb::Tensor) -> anyhow::Result<Tensor> {
    let dtype = parse_dtype(tensor.dtype)?;
    let mut shape = Vec::with_capacity(tensor.shape.len());
    for d in tensor.shape {
        let d = usize::try_from(d)
            .with_context(|| format!("negative dimension in `{}`", tensor.name))?;
        shape.push(d);
    }

    Ok(Tensor::from_cpu_bytes(
        dtype,
        Shape::from_slice(&shape),
        Bytes::from(tensor.data),
    )?)
}

fn parse_dtype(raw: i32) -> anyhow::Result<DType> {
    let dtype = pb::DType::try_from(raw).context("unknown dtype enum value")?;
    Ok(match dtype {
        pb::DType::F32 => DType::F32,
        pb::DType::F16 => DType::F16,
        pb::DType::I64 => DType::I64,
        pb::DType::I32 => DType::I32,
        pb::DType::U8 => DType::U8,
        pb::DType::DtypeUnspecified => bail!("dtype is unspecified"),
    })
}

fn to_proto_dtype(dtype: DType) -> pb::DType {
    match dtype {
        DType::F32 => pb::DType::F32,
        DType::F16 => pb::DType::F16,
        DType::I64 => pb::DType::I64,
        DType::I32 => pb::DType::I32,
        DType::U8 => pb::DType::U8,
    }
}
