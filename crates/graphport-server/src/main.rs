mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use graphport_backend_ort::OrtBackend;
use graphport_core::OnnxFileLoader;
use graphport_proto::graphport::v1::remote_executor_server::RemoteExecutorServer;
use graphport_runtime::Engine;
use graphport_server::{ExecutorSvc, ModelRegistry};
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            grpc_addr,
            log,
            base_dir,
            intra_threads,
            models,
        } => serve(grpc_addr, log, base_dir, intra_threads, models).await,
    }
}

async fn serve(
    grpc_addr: String,
    log: String,
    base_dir: Option<PathBuf>,
    intra_threads: Option<usize>,
    models: Vec<String>,
) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let loader = match base_dir {
        Some(dir) => OnnxFileLoader::with_base_dir(dir),
        None => OnnxFileLoader::new(),
    };

    let registry = Arc::new(ModelRegistry::new());
    for arg in &models {
        registry.load_arg(arg, &loader)?;
    }

    let mut backend = OrtBackend::new();
    if let Some(threads) = intra_threads {
        backend = backend.with_intra_threads(threads);
    }
    let engine = Arc::new(Engine::builder(backend).loader(loader).build());

    let addr = grpc_addr.parse()?;
    let svc = ExecutorSvc::new(engine, registry);

    tracing::info!(%addr, models = models.len(), "graphportd gRPC listening");
    let reflection = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(graphport_proto::FILE_DESCRIPTOR_SET)
        .build_v1()
        .map_err(|e| anyhow::anyhow!("reflection build failed: {e}"))?;

    tonic::transport::Server::builder()
        .add_service(RemoteExecutorServer::new(svc))
        .add_service(reflection)
        .serve(addr)
        .await?;

    Ok(())
}
