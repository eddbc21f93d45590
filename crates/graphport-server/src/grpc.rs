use std::sync::Arc;
use std::time::Instant;

use graphport_backend_remote::{pb_to_tensor, tensor_to_pb};
use graphport_core::{onnx, Error, Graph, TensorMap};
use graphport_proto::graphport::v1 as pb;
use graphport_runtime::Engine;
use tonic::{Request, Response, Status};

use crate::registry::ModelRegistry;

/// gRPC front of the executor: decodes the request, runs the graph on the
/// engine and returns its declared outputs.
pub struct ExecutorSvc {
    engine: Arc<Engine>,
    registry: Arc<ModelRegistry>,
}

impl ExecutorSvc {
    pub fn new(engine: Arc<Engine>, registry: Arc<ModelRegistry>) -> Self {
        Self { engine, registry }
    }

    fn resolve(&self, req: &pb::ExecuteRequest) -> Result<Arc<Graph>, Status> {
        if !req.model_proto.is_empty() {
            let graph = onnx::decode_model(&req.model_proto).map_err(|e| status_from(&e))?;
            return Ok(Arc::new(graph));
        }
        if req.model.is_empty() {
            return Err(Status::invalid_argument(
                "request carries neither a model nor a model name",
            ));
        }
        self.registry
            .get(&req.model)
            .ok_or_else(|| Status::not_found(format!("unknown model `{}`", req.model)))
    }
}

#[tonic::async_trait]
impl pb::remote_executor_server::RemoteExecutor for ExecutorSvc {
    async fn execute(
        &self,
        req: Request<pb::ExecuteRequest>,
    ) -> std::result::Result<Response<pb::ExecuteResponse>, Status> {
        let req = req.into_inner();
        let graph = self.resolve(&req)?;

        let mut inputs = TensorMap::with_capacity(req.inputs.len());
        for t in req.inputs {
            let name = t.name.clone();
            let tensor = pb_to_tensor(t).map_err(|e| Status::invalid_argument(e.to_string()))?;
            inputs.insert(name, tensor);
        }

        let engine = self.engine.clone();
        let exec_graph = graph.clone();
        let t0 = Instant::now();
        let mut outputs = tokio::task::spawn_blocking(move || {
            engine.execute(&exec_graph, inputs, false)
        })
        .await
        .map_err(|e| Status::internal(format!("execution task failed: {e}")))?
        .map_err(|e| {
            tracing::warn!(graph = %graph.name, error = %e, "execution failed");
            status_from(&e)
        })?;
        let exec_us = t0.elapsed().as_micros() as u64;

        let mut pb_outs = Vec::with_capacity(graph.outputs.len());
        for vi in &graph.outputs {
            let t = outputs
                .remove(&vi.name)
                .ok_or_else(|| Status::internal(format!("output `{}` missing", vi.name)))?;
            pb_outs.push(tensor_to_pb(&vi.name, &t));
        }
        tracing::debug!(graph = %graph.name, exec_us, "executed graph");

        Ok(Response::new(pb::ExecuteResponse {
            outputs: pb_outs,
            exec_us,
        }))
    }
}

fn status_from(err: &Error) -> Status {
    let message = match std::error::Error::source(err) {
        Some(source) => format!("{err}: {source}"),
        None => err.to_string(),
    };
    match err {
        Error::UnresolvedOperator { .. } => Status::unimplemented(message),
        Error::MissingCollaborator { .. } => Status::failed_precondition(message),
        Error::Load { .. } => Status::not_found(message),
        Error::Backend { .. } => Status::internal(message),
        _ => Status::invalid_argument(message),
    }
}
