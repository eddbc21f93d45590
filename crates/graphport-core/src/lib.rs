//! Graph IR, tensors and the execution context shared by every graphport
//! crate, plus the traits external collaborators implement.

pub mod artifact;
pub mod backend;
pub mod context;
pub mod error;
pub mod graph;
pub mod onnx;
pub mod tensor;

pub use artifact::*;
pub use backend::*;
pub use context::*;
pub use error::*;
pub use graph::*;
pub use tensor::*;
