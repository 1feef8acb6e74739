//! In-process framework driver
//!
//! Loads one file through a discovery collaborator and runs it with the
//! command model on the calling thread.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use super::discovery::Discovery;
use super::{DriverFactory, TestDriver};
use crate::commands::CommandBuilder;
use crate::context::{CancelToken, ContextFrame, ExecutionContext};
use crate::error::{EngineError, EngineResult};
use crate::listener::TestListener;
use crate::models::{settings, Fixture, TestFilter, TestId, TestNode, TestPackage};
use crate::results::{LoadSummary, ResultNode, TestDescription};

struct Loaded {
    package: TestPackage,
    root: Arc<TestNode>,
}

/// Driver running discovered trees in the current process
pub struct FrameworkDriver {
    discovery: Arc<dyn Discovery>,
    id_seed: TestId,
    loaded: RwLock<Option<Loaded>>,
    cancel: Mutex<CancelToken>,
}

impl FrameworkDriver {
    pub fn new(discovery: Arc<dyn Discovery>, id_seed: TestId) -> Self {
        Self {
            discovery,
            id_seed,
            loaded: RwLock::new(None),
            cancel: Mutex::new(CancelToken::new()),
        }
    }

    fn root(&self) -> EngineResult<Arc<TestNode>> {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| Arc::clone(&l.root))
            .ok_or(EngineError::NotLoaded)
    }

    fn base_frame(
        &self,
        package: &TestPackage,
        listener: Arc<dyn TestListener>,
        parent: &CancelToken,
    ) -> ContextFrame {
        let token = parent.child();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();

        ContextFrame::new(listener, token)
            .with_culture(package.get_setting(settings::DEFAULT_CULTURE))
            .with_stop_on_error(package.get_setting_or(settings::STOP_ON_ERROR, false))
            .with_work_directory(package.get_setting::<PathBuf>(settings::WORK_DIRECTORY))
    }
}

impl TestDriver for FrameworkDriver {
    fn load(&self, package: &TestPackage) -> EngineResult<LoadSummary> {
        let path = package
            .path()
            .ok_or_else(|| EngineError::InvalidPackage("driver package has no file".into()))?;
        let root = self.discovery.discover(path, self.id_seed)?;
        let count = root.test_case_count(&TestFilter::Empty);
        info!("Loaded {} ({} test cases)", path.display(), count);

        let summary = LoadSummary::loaded(root.name(), Some(path.display().to_string()), count);
        *self.loaded.write().unwrap_or_else(PoisonError::into_inner) = Some(Loaded {
            package: package.clone(),
            root,
        });
        Ok(summary)
    }

    fn explore(&self, filter: &TestFilter) -> EngineResult<TestDescription> {
        Ok(TestDescription::from_node(&self.root()?, filter))
    }

    fn count_test_cases(&self, filter: &TestFilter) -> EngineResult<usize> {
        Ok(self.root()?.test_case_count(filter))
    }

    fn run_within(
        &self,
        listener: Arc<dyn TestListener>,
        filter: &TestFilter,
        cancel: &CancelToken,
    ) -> EngineResult<ResultNode> {
        let (package, root) = {
            let guard = self.loaded.read().unwrap_or_else(PoisonError::into_inner);
            let loaded = guard.as_ref().ok_or(EngineError::NotLoaded)?;
            (loaded.package.clone(), Arc::clone(&loaded.root))
        };

        let default_timeout = package
            .get_setting::<u64>(settings::DEFAULT_TIMEOUT)
            .map(Duration::from_millis);
        let command = CommandBuilder::new(filter.clone())
            .with_default_timeout(default_timeout)
            .build(&root);

        debug!("Running {}", root.full_name());
        let _guard = ExecutionContext::establish(self.base_frame(&package, listener, cancel));
        Ok(command.execute(&Fixture::none()))
    }

    fn stop_run(&self, force: bool) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel(force);
    }

    fn unload(&self) {
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Creates framework drivers for files its discovery knows
pub struct FrameworkDriverFactory {
    discovery: Arc<dyn Discovery>,
}

impl FrameworkDriverFactory {
    pub fn new(discovery: Arc<dyn Discovery>) -> Self {
        Self { discovery }
    }
}

impl DriverFactory for FrameworkDriverFactory {
    fn is_supported(&self, package: &TestPackage) -> bool {
        package
            .path()
            .is_some_and(|path| self.discovery.can_discover(path))
    }

    fn create_driver(&self, id_seed: TestId) -> Arc<dyn TestDriver> {
        Arc::new(FrameworkDriver::new(Arc::clone(&self.discovery), id_seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DiscoveryRegistry;
    use crate::listener::CollectingListener;
    use crate::models::{TestFault, TestNodeBuilder};
    use crate::results::ResultStatus;

    fn driver() -> FrameworkDriver {
        let registry = DiscoveryRegistry::new().with("calc", |name| {
            TestNodeBuilder::assembly(name).child(
                TestNodeBuilder::fixture("Math")
                    .child(TestNodeBuilder::case("Adds", |_| Ok(())))
                    .child(TestNodeBuilder::case("Divides", |_| {
                        Err(TestFault::assertion("division by zero"))
                    })),
            )
        });
        FrameworkDriver::new(Arc::new(registry), 1000)
    }

    #[test]
    fn test_load_explore_run() {
        let driver = driver();
        assert!(matches!(
            driver.count_test_cases(&TestFilter::Empty),
            Err(EngineError::NotLoaded)
        ));

        let summary = driver.load(&TestPackage::new("calc.dll")).unwrap();
        assert_eq!(summary.test_case_count, 2);

        let first = driver.explore(&TestFilter::Empty).unwrap();
        assert_eq!(first, driver.explore(&TestFilter::Empty).unwrap());

        let listener = Arc::new(CollectingListener::new());
        let result = driver.run(listener.clone(), &TestFilter::Empty).unwrap();
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.pass_count, 1);
        assert_eq!(result.fail_count, 1);
        assert_eq!(listener.names().first(), Some(&"suite_started"));

        driver.unload();
        assert!(driver.explore(&TestFilter::Empty).is_err());
    }

    #[test]
    fn test_stop_before_run_does_not_leak_into_next_run() {
        let driver = driver();
        driver.load(&TestPackage::new("calc.dll")).unwrap();
        driver.stop_run(false);
        let result = driver
            .run(Arc::new(CollectingListener::new()), &TestFilter::Empty)
            .unwrap();
        assert_eq!(result.total_count(), 2);
    }

    #[test]
    fn test_cancelled_parent_token_stops_before_first_case() {
        let driver = driver();
        driver.load(&TestPackage::new("calc.dll")).unwrap();
        let run = CancelToken::new();
        run.request_stop();

        let listener = Arc::new(CollectingListener::new());
        let result = driver
            .run_within(listener.clone(), &TestFilter::Empty, &run)
            .unwrap();
        assert_eq!(result.status, ResultStatus::Cancelled);
        assert_eq!(result.pass_count, 0);
        assert!(!listener.names().contains(&"test_started"));
    }
}
