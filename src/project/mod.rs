//! Project expansion
//!
//! A package may name a project manifest instead of a test file. Project
//! loaders turn such a package into one sub-package per listed file.

mod yaml;

pub use yaml::{YamlProjectLoader, PROJECT_EXTENSIONS};

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::EngineResult;
use crate::models::TestPackage;

/// Files and settings listed by a project
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Project {
    pub path: PathBuf,
    pub assemblies: Vec<PathBuf>,
    pub settings: BTreeMap<String, Value>,
}

/// Reads one kind of project file
pub trait ProjectLoader: Send + Sync {
    fn can_load(&self, path: &Path) -> bool;

    fn load(&self, path: &Path) -> EngineResult<Project>;
}

/// Expands packages naming project files
#[derive(Clone, Default)]
pub struct ProjectService {
    loaders: Vec<Arc<dyn ProjectLoader>>,
}

impl ProjectService {
    /// Service with no loaders; nothing is treated as a project
    pub fn empty() -> Self {
        Self::default()
    }

    /// Service with the built-in YAML manifest loader
    pub fn with_defaults() -> Self {
        Self::empty().with_loader(Arc::new(YamlProjectLoader))
    }

    pub fn with_loader(mut self, loader: Arc<dyn ProjectLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn can_load(&self, path: &Path) -> bool {
        self.loaders.iter().any(|l| l.can_load(path))
    }

    /// Whether the package itself names a project
    pub fn is_project(&self, package: &TestPackage) -> bool {
        package.path().is_some_and(|p| self.can_load(p))
    }

    /// Expand every project package in the tree, in place
    ///
    /// Project settings are added without overriding the package's own.
    pub fn expand(&self, package: &mut TestPackage) -> EngineResult<()> {
        if let Some(path) = package.path().map(Path::to_path_buf) {
            if let Some(loader) = self.loaders.iter().find(|l| l.can_load(&path)) {
                if package.sub_packages.is_empty() {
                    let project = loader.load(&path)?;
                    debug!(
                        "Expanded {} into {} assemblies",
                        path.display(),
                        project.assemblies.len()
                    );
                    for (key, value) in project.settings {
                        package.settings.entry(key).or_insert(value);
                    }
                    for assembly in project.assemblies {
                        package.add_sub_package(TestPackage::new(assembly));
                    }
                }
                return Ok(());
            }
        }

        for sub in &mut package.sub_packages {
            self.expand(sub)?;
        }
        Ok(())
    }
}
