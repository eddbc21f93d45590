//! Graph interpreter.
//!
//! [`Engine::execute`] selects the execution mode from the graph's
//! `exec_mode` metadata and either walks the nodes in order, dispatching each
//! to a partition, a custom op or the generic backend, or hands the whole
//! graph to an offload target.

pub mod compare;
pub mod custom;
pub mod dispatch;
pub mod engine;
pub mod isolate;
pub mod trace;

pub use compare::*;
pub use custom::{CustomOp, CustomOpRegistry, Im2Col};
pub use dispatch::NodeRoute;
pub use engine::*;
pub use isolate::*;
