use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use graphport_backend_remote::{
    pb_to_tensor, tensor_to_pb, RemoteBackend, REMOTE_ADDR_KEY, REMOTE_MODEL_KEY,
};
use graphport_core::{
    onnx, DType, Error, Graph, Node, NodeBackend, Tensor, TensorMap, ValueInfo, EXEC_MODE_KEY,
};
use graphport_proto::graphport::v1 as pb;
use graphport_proto::graphport::v1::remote_executor_server::{RemoteExecutor, RemoteExecutorServer};
use graphport_runtime::Engine;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

/// Node backend for engines that must never execute a node locally.
struct NoLocalExecution;

impl NodeBackend for NoLocalExecution {
    fn name(&self) -> &'static str {
        "none"
    }

    fn run(&self, _graph: &Graph, _inputs: TensorMap) -> anyhow::Result<Vec<Tensor>> {
        anyhow::bail!("node executed locally")
    }
}

/// Executor that negates `x` into `y`, remembering what it was sent.
#[derive(Clone, Default)]
struct NegExecutor {
    seen: Arc<Mutex<Vec<pb::ExecuteRequest>>>,
}

#[tonic::async_trait]
impl RemoteExecutor for NegExecutor {
    async fn execute(
        &self,
        req: Request<pb::ExecuteRequest>,
    ) -> std::result::Result<Response<pb::ExecuteResponse>, Status> {
        let req = req.into_inner();
        self.seen.lock().unwrap().push(req.clone());
        match req.model.as_str() {
            "empty" => return Ok(Response::new(pb::ExecuteResponse::default())),
            "slow" => tokio::time::sleep(Duration::from_secs(5)).await,
            _ => {}
        }

        let x = req
            .inputs
            .into_iter()
            .find(|t| t.name == "x")
            .ok_or_else(|| Status::invalid_argument("missing x"))?;
        let x = pb_to_tensor(x).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let neg: Vec<f32> = x.to_vec::<f32>().unwrap().iter().map(|v| -v).collect();
        let y = Tensor::from_slice(x.shape().clone(), &neg).unwrap();

        Ok(Response::new(pb::ExecuteResponse {
            outputs: vec![tensor_to_pb("y", &y)],
            exec_us: 1,
        }))
    }
}

async fn spawn_executor(executor: NegExecutor) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(RemoteExecutorServer::new(executor))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    Ok(addr)
}

fn remote_graph(addr: Option<SocketAddr>) -> Graph {
    let mut g = Graph::new("neg");
    g.inputs.push(ValueInfo::new("x", DType::F32, &[3]));
    g.outputs.push(ValueInfo::new("y", DType::F32, &[3]));
    g.nodes.push(Node::new("Neg", ["x"], ["y"]));
    g.set_metadata_prop(EXEC_MODE_KEY, "remote");
    if let Some(addr) = addr {
        g.set_metadata_prop(REMOTE_ADDR_KEY, format!("http://{addr}"));
    }
    g
}

fn engine() -> Arc<Engine> {
    Arc::new(
        Engine::builder(NoLocalExecution)
            .remote(Arc::new(RemoteBackend::new()))
            .build(),
    )
}

fn x_inputs() -> TensorMap {
    let shape: &[usize] = &[3];
    let mut inputs = TensorMap::new();
    inputs.insert("x".into(), Tensor::from_slice(shape, &[1.0f32, -2.0, 3.0]).unwrap());
    inputs
}

async fn execute_blocking(engine: Arc<Engine>, graph: Graph) -> graphport_core::Result<TensorMap> {
    tokio::task::spawn_blocking(move || engine.execute(&graph, x_inputs(), false))
        .await
        .expect("engine thread panicked")
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_mode_executes_on_executor() -> Result<()> {
    let executor = NegExecutor::default();
    let addr = spawn_executor(executor.clone()).await?;

    let out = execute_blocking(engine(), remote_graph(Some(addr))).await?;
    assert_eq!(out["y"].to_vec::<f32>()?, [-1.0, 2.0, -3.0]);

    let seen = executor.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].model.is_empty());
    let shipped = onnx::decode_model(&seen[0].model_proto)?;
    assert_eq!(shipped.nodes.len(), 1);
    assert_eq!(shipped.metadata_prop(EXEC_MODE_KEY), None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn named_model_is_not_serialized() -> Result<()> {
    let executor = NegExecutor::default();
    let addr = spawn_executor(executor.clone()).await?;

    let mut graph = remote_graph(Some(addr));
    graph.set_metadata_prop(REMOTE_MODEL_KEY, "neg");
    execute_blocking(engine(), graph).await?;

    let seen = executor.seen.lock().unwrap();
    assert_eq!(seen[0].model, "neg");
    assert!(seen[0].model_proto.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_output_is_a_backend_failure() -> Result<()> {
    let addr = spawn_executor(NegExecutor::default()).await?;

    let mut graph = remote_graph(Some(addr));
    graph.set_metadata_prop(REMOTE_MODEL_KEY, "empty");
    let err = execute_blocking(engine(), graph).await.unwrap_err();
    match err {
        Error::Backend { backend, source } => {
            assert_eq!(backend, "remote");
            assert!(source.to_string().contains("`y`"));
        }
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_executor_hits_the_request_timeout() -> Result<()> {
    let addr = spawn_executor(NegExecutor::default()).await?;
    let engine = Arc::new(
        Engine::builder(NoLocalExecution)
            .remote(Arc::new(
                RemoteBackend::new().with_timeout(Duration::from_millis(200)),
            ))
            .build(),
    );

    let mut graph = remote_graph(Some(addr));
    graph.set_metadata_prop(REMOTE_MODEL_KEY, "slow");
    let err = execute_blocking(engine, graph).await.unwrap_err();
    assert!(matches!(err, Error::Backend { .. }), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn current_thread_runtime_fails_cleanly() {
    let engine = Engine::builder(NoLocalExecution)
        .remote(Arc::new(
            RemoteBackend::new().with_default_addr("http://127.0.0.1:1"),
        ))
        .build();
    let err = engine
        .execute(&remote_graph(None), x_inputs(), false)
        .unwrap_err();
    assert!(matches!(err, Error::Backend { ref backend, .. } if backend == "remote"), "{err:?}");
}

#[test]
fn overflowing_wire_shape_is_rejected() {
    let tensor = pb::Tensor {
        name: "x".into(),
        dtype: pb::DType::F32 as i32,
        shape: vec![1 << 62, 8],
        data: Vec::new(),
    };
    let err = pb_to_tensor(tensor).unwrap_err();
    assert!(
        matches!(err.downcast_ref::<Error>(), Some(Error::InvalidTensor(_))),
        "{err:?}"
    );
}

#[test]
fn missing_address_is_reported() {
    let err = engine()
        .execute(&remote_graph(None), x_inputs(), false)
        .unwrap_err();
    assert!(matches!(err, Error::MissingCollaborator { .. }), "{err:?}");
}

#[test]
fn unreachable_executor_fails_outside_a_runtime() {
    let engine = Arc::new(
        Engine::builder(NoLocalExecution)
            .remote(Arc::new(
                RemoteBackend::new().with_default_addr("http://127.0.0.1:1"),
            ))
            .build(),
    );
    let err = engine
        .execute(&remote_graph(None), x_inputs(), false)
        .unwrap_err();
    assert!(matches!(err, Error::Backend { ref backend, .. } if backend == "remote"), "{err:?}");
}
