use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};
use graphport_core::{Graph, GraphLoader};

/// Models held by the executor, addressable by name from `ExecuteRequest.model`.
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<Graph>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, graph: Graph) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        models.insert(name.into(), Arc::new(graph));
    }

    /// Loads `reference` through `loader` and registers it under `name`.
    pub fn load(&self, name: &str, reference: &str, loader: &dyn GraphLoader) -> Result<()> {
        let graph = loader
            .load(reference)
            .with_context(|| format!("failed to preload model `{name}`"))?;
        tracing::info!(model = name, reference, nodes = graph.nodes.len(), "registered model");
        self.register(name, graph);
        Ok(())
    }

    /// Parses a `NAME=PATH` argument and loads it.
    pub fn load_arg(&self, arg: &str, loader: &dyn GraphLoader) -> Result<()> {
        let (name, reference) = arg
            .split_once('=')
            .filter(|(name, path)| !name.is_empty() && !path.is_empty())
            .ok_or_else(|| anyhow!("expected NAME=PATH, got `{arg}`"))?;
        self.load(name, reference, loader)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Graph>> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.get(name).cloned()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
