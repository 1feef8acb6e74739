//! Discovery collaborator
//!
//! Turns a test file into a node tree. The engine never inspects test
//! declarations itself; it only asks a [`Discovery`] for the finished tree.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::models::{TestId, TestNode, TestNodeBuilder};

/// Supplies the test tree for a file
pub trait Discovery: Send + Sync {
    /// Whether this discovery knows the file
    fn can_discover(&self, path: &Path) -> bool;

    /// Build the tree, assigning ids from `id_seed`
    fn discover(&self, path: &Path, id_seed: TestId) -> EngineResult<Arc<TestNode>>;
}

/// Builds the assembly tree for a registered name
pub type SuiteProvider = Arc<dyn Fn(&str) -> TestNodeBuilder + Send + Sync>;

/// Discovery over suites registered in code, keyed by file stem
#[derive(Clone, Default)]
pub struct DiscoveryRegistry {
    providers: BTreeMap<String, SuiteProvider>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; it receives the assembly name to use for its root
    pub fn register<F>(&mut self, name: impl Into<String>, provider: F)
    where
        F: Fn(&str) -> TestNodeBuilder + Send + Sync + 'static,
    {
        self.providers.insert(name.into(), Arc::new(provider));
    }

    pub fn with<F>(mut self, name: impl Into<String>, provider: F) -> Self
    where
        F: Fn(&str) -> TestNodeBuilder + Send + Sync + 'static,
    {
        self.register(name, provider);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    fn lookup(&self, path: &Path) -> Option<&SuiteProvider> {
        let file_name = path.file_name()?.to_string_lossy();
        if let Some(provider) = self.providers.get(file_name.as_ref()) {
            return Some(provider);
        }
        let stem = path.file_stem()?.to_string_lossy();
        self.providers.get(stem.as_ref())
    }
}

impl Discovery for DiscoveryRegistry {
    fn can_discover(&self, path: &Path) -> bool {
        self.lookup(path).is_some()
    }

    fn discover(&self, path: &Path, id_seed: TestId) -> EngineResult<Arc<TestNode>> {
        let provider = self.lookup(path).ok_or_else(|| {
            EngineError::load(path.display().to_string(), "No tests registered for this file")
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        provider(&name).build_with_seed(id_seed)
    }
}
