use crate::{DType, Shape};

/// Every way a graph execution can fail.
///
/// All variants are fatal to the top-level call that produced them; the
/// engine never retries and never rolls back context entries written by
/// nodes that ran before the failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A bound input or a computed output disagrees with the declared shape.
    #[error("shape mismatch for tensor `{tensor}`: found {found}, expected {expected}")]
    ShapeMismatch {
        tensor: String,
        found: Shape,
        expected: Shape,
    },

    /// A tensor was read as an element type it does not hold.
    #[error("dtype mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch { expected: DType, got: DType },

    /// The graph declares (or references) a tensor whose shape is not fully known.
    #[error("tensor `{tensor}` has no fully specified shape; run shape inference first")]
    IncompleteSpecification { tensor: String },

    /// The `exec_mode` metadata property holds an unrecognised value.
    #[error(
        "unknown execution mode `{mode}`: leave `exec_mode` unset, or use `remote` or `rtlsim`"
    )]
    UnknownExecutionMode { mode: String },

    /// A custom-domain node has no registered handler.
    #[error("no custom op registered for `{op_type}` in domain `{domain}`")]
    UnresolvedOperator { domain: String, op_type: String },

    /// An offload mode was selected but the engine has no collaborator for it.
    #[error("execution mode `{mode}` selected but no {role} collaborator is configured")]
    MissingCollaborator { mode: String, role: &'static str },

    /// Strict context access to a name the graph never declared.
    #[error("tensor `{tensor}` is not part of the execution context")]
    UnknownTensor { tensor: String },

    /// A node the engine interprets itself carries malformed attributes.
    #[error("invalid node `{node}`: {reason}")]
    InvalidNode { node: String, reason: String },

    /// Tensor bytes do not match the declared shape and element type.
    #[error("invalid tensor: {0}")]
    InvalidTensor(String),

    /// A serialized model could not be understood.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// A nested graph referenced by a partition node could not be loaded.
    #[error("failed to load graph `{reference}`")]
    Load {
        reference: String,
        #[source]
        source: anyhow::Error,
    },

    /// A collaborator (generic backend, custom op, offload target) failed internally.
    #[error("{backend} backend failed")]
    Backend {
        backend: String,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub fn backend(backend: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::Backend {
            backend: backend.into(),
            source: source.into(),
        }
    }

    pub fn invalid_node(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidNode {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
