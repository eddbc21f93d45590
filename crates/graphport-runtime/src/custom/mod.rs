//! Operators in the custom domain.
//!
//! Custom ops are side-effecting: they read their inputs from the execution
//! context and write their outputs back into it.

mod im2col;

use std::collections::HashMap;
use std::sync::Arc;

use graphport_core::{Error, ExecContext, Graph, Node, Result};

pub use im2col::Im2Col;

pub trait CustomOp: Send + Sync {
    fn execute(&self, node: &Node, ctx: &mut ExecContext, graph: &Graph) -> Result<()>;
}

/// Custom-op handlers keyed by op type.
#[derive(Clone)]
pub struct CustomOpRegistry {
    ops: HashMap<String, Arc<dyn CustomOp>>,
}

impl CustomOpRegistry {
    /// A registry with no handlers.
    pub fn empty() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// A registry holding the ops that ship with graphport.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("Im2Col", Im2Col);
        registry
    }

    pub fn register(&mut self, op_type: impl Into<String>, op: impl CustomOp + 'static) {
        self.ops.insert(op_type.into(), Arc::new(op));
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.ops.contains_key(op_type)
    }

    pub fn lookup(&self, node: &Node) -> Result<Arc<dyn CustomOp>> {
        self.ops
            .get(&node.op_type)
            .cloned()
            .ok_or_else(|| Error::UnresolvedOperator {
                domain: node.domain.clone(),
                op_type: node.op_type.clone(),
            })
    }
}

impl Default for CustomOpRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for CustomOpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.ops.keys().collect();
        names.sort();
        f.debug_struct("CustomOpRegistry")
            .field("ops", &names)
            .finish()
    }
}
