//! Test drivers
//!
//! One driver per test file. Drivers are synchronous; runners move them onto
//! blocking threads when called from async code.

mod discovery;
mod framework;

pub use discovery::{Discovery, DiscoveryRegistry, SuiteProvider};
pub use framework::{FrameworkDriver, FrameworkDriverFactory};

use std::sync::Arc;

use crate::context::CancelToken;
use crate::error::{EngineError, EngineResult};
use crate::listener::TestListener;
use crate::models::{TestFilter, TestId, TestPackage};
use crate::results::{LoadSummary, ResultNode, TestDescription};

/// Loads and runs the tests of one file
pub trait TestDriver: Send + Sync {
    fn load(&self, package: &TestPackage) -> EngineResult<LoadSummary>;

    fn explore(&self, filter: &TestFilter) -> EngineResult<TestDescription>;

    fn count_test_cases(&self, filter: &TestFilter) -> EngineResult<usize>;

    fn run(&self, listener: Arc<dyn TestListener>, filter: &TestFilter) -> EngineResult<ResultNode> {
        self.run_within(listener, filter, &CancelToken::new())
    }

    /// Run under a caller's token; a request on `cancel` reaches the tree
    /// even when made before the driver started
    fn run_within(
        &self,
        listener: Arc<dyn TestListener>,
        filter: &TestFilter,
        cancel: &CancelToken,
    ) -> EngineResult<ResultNode>;

    /// Request the running tree to stop; `force` also aborts in-flight cases
    fn stop_run(&self, force: bool);

    fn unload(&self);
}

/// Creates drivers for the files it supports
pub trait DriverFactory: Send + Sync {
    fn is_supported(&self, package: &TestPackage) -> bool;

    fn create_driver(&self, id_seed: TestId) -> Arc<dyn TestDriver>;
}

/// Picks the first factory that supports a file
#[derive(Clone, Default)]
pub struct DriverService {
    factories: Vec<Arc<dyn DriverFactory>>,
}

impl DriverService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Driver set up for the framework discovery in `discovery`
    pub fn for_discovery(discovery: Arc<dyn Discovery>) -> Self {
        Self::new().with_factory(Arc::new(FrameworkDriverFactory::new(discovery)))
    }

    pub fn get_driver(&self, package: &TestPackage, id_seed: TestId) -> EngineResult<Arc<dyn TestDriver>> {
        self.factories
            .iter()
            .find(|f| f.is_supported(package))
            .map(|f| f.create_driver(id_seed))
            .ok_or_else(|| EngineError::NoDriver(package.display_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestNodeBuilder;

    #[test]
    fn test_no_driver_for_unknown_file() {
        let registry = DiscoveryRegistry::new().with("known", |name| TestNodeBuilder::assembly(name));
        let service = DriverService::for_discovery(Arc::new(registry));
        assert!(service.get_driver(&TestPackage::new("known.dll"), 1).is_ok());
        assert!(matches!(
            service.get_driver(&TestPackage::new("unknown.dll"), 1),
            Err(EngineError::NoDriver(_))
        ));
    }
}
