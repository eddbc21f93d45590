use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::{onnx, Error, Graph, Result};

/// Resolves the graph reference carried by a partition node.
pub trait GraphLoader: Send + Sync {
    fn load(&self, reference: &str) -> Result<Graph>;
}

/// Loads ONNX files from disk. Relative references resolve against `base_dir`.
#[derive(Clone, Debug, Default)]
pub struct OnnxFileLoader {
    base_dir: Option<PathBuf>,
}

impl OnnxFileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl GraphLoader for OnnxFileLoader {
    fn load(&self, reference: &str) -> Result<Graph> {
        let path = self.resolve(reference);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))
            .map_err(|source| Error::Load {
                reference: reference.to_string(),
                source,
            })?;
        onnx::decode_model(&bytes).map_err(|err| Error::Load {
            reference: reference.to_string(),
            source: err.into(),
        })
    }
}
