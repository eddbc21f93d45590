use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "graphportd", version, about = "graphport remote executor daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the remote executor
    Serve {
        /// Bind address for gRPC
        #[arg(long, default_value = "0.0.0.0:50051")]
        grpc_addr: String,

        /// Log level (RUST_LOG)
        #[arg(long, default_value = "info")]
        log: String,

        /// Directory partition references are resolved against
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Threads ONNX Runtime may use inside one operator
        #[arg(long)]
        intra_threads: Option<usize>,

        /// Preload a named model, as NAME=PATH (repeatable)
        #[arg(long = "model", value_name = "NAME=PATH")]
        models: Vec<String>,
    },
}
