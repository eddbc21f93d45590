//! Remote side of the graphport offload path.

pub mod grpc;
pub mod registry;

pub use grpc::ExecutorSvc;
pub use registry::ModelRegistry;
