//! Direct runner
//!
//! Runs every file of its package in the current process, one driver per
//! file.

use async_trait::async_trait;
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{blocking, TestEngineRunner};
use crate::context::CancelToken;
use crate::drivers::{DriverService, TestDriver};
use crate::error::{EngineError, EngineResult};
use crate::listener::TestListener;
use crate::models::{NodeKind, TestFilter, TestId, TestPackage, DEFAULT_ID_SEED};
use crate::results::{LoadSummary, ResultNode, TestDescription};

/// Id range reserved for each driver so ids stay unique across files
pub const ID_SEED_STRIDE: TestId = 100_000;

/// In-process runner over one or more drivers
pub struct DirectRunner {
    package: TestPackage,
    drivers: DriverService,
    loaded: Mutex<Option<Vec<Arc<dyn TestDriver>>>>,
    run_token: std::sync::Mutex<CancelToken>,
}

impl DirectRunner {
    pub fn new(package: TestPackage, drivers: DriverService) -> Self {
        Self {
            package,
            drivers,
            loaded: Mutex::new(None),
            run_token: std::sync::Mutex::new(CancelToken::new()),
        }
    }

    /// Fresh token for a starting run; earlier requests do not carry over
    fn begin_run(&self) -> CancelToken {
        let token = CancelToken::new();
        *self.run_token.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    pub fn package(&self) -> &TestPackage {
        &self.package
    }

    /// Create and load one driver per file; on failure the drivers already
    /// loaded are unloaded before the error is returned
    async fn load_drivers(&self) -> EngineResult<(Vec<Arc<dyn TestDriver>>, LoadSummary)> {
        let files = self.package.leaf_packages();
        if files.is_empty() {
            return Err(EngineError::InvalidPackage(format!(
                "{} contains no test files",
                self.package.display_name()
            )));
        }

        let mut drivers: Vec<Arc<dyn TestDriver>> = Vec::with_capacity(files.len());
        let mut summaries = Vec::with_capacity(files.len());

        for (index, file) in files.into_iter().enumerate() {
            let seed = DEFAULT_ID_SEED + index as TestId * ID_SEED_STRIDE;
            let loaded = match self.drivers.get_driver(file, seed) {
                Ok(driver) => {
                    let package = file.clone();
                    let worker = Arc::clone(&driver);
                    blocking(move || worker.load(&package))
                        .await
                        .map(|summary| (driver, summary))
                }
                Err(e) => Err(e),
            };

            match loaded {
                Ok((driver, summary)) => {
                    drivers.push(driver);
                    summaries.push(summary);
                }
                Err(e) => {
                    warn!("Failed to load {}: {}", file.display_name(), e);
                    unload_all(drivers).await;
                    return Err(e);
                }
            }
        }

        let summary = LoadSummary::merge(self.package.display_name(), summaries);
        Ok((drivers, summary))
    }

    async fn ensure_loaded(&self) -> EngineResult<Vec<Arc<dyn TestDriver>>> {
        let mut loaded = self.loaded.lock().await;
        if let Some(drivers) = loaded.as_ref() {
            return Ok(drivers.clone());
        }
        let (drivers, _) = self.load_drivers().await?;
        *loaded = Some(drivers.clone());
        Ok(drivers)
    }
}

async fn unload_all(drivers: Vec<Arc<dyn TestDriver>>) {
    for driver in drivers {
        if let Err(e) = blocking(move || {
            driver.unload();
            Ok(())
        })
        .await
        {
            warn!("Driver unload failed: {}", e);
        }
    }
}

#[async_trait]
impl TestEngineRunner for DirectRunner {
    async fn load(&self) -> EngineResult<LoadSummary> {
        let mut loaded = self.loaded.lock().await;
        if let Some(previous) = loaded.take() {
            unload_all(previous).await;
        }
        let (drivers, summary) = self.load_drivers().await?;
        info!(
            "Loaded {} ({} files, {} test cases)",
            self.package.display_name(),
            drivers.len(),
            summary.test_case_count
        );
        *loaded = Some(drivers);
        Ok(summary)
    }

    async fn explore(&self, filter: &TestFilter) -> EngineResult<TestDescription> {
        let mut descriptions = Vec::new();
        for driver in self.ensure_loaded().await? {
            let filter = filter.clone();
            descriptions.push(blocking(move || driver.explore(&filter)).await?);
        }
        Ok(TestDescription::merge(self.package.display_name(), descriptions))
    }

    async fn count_test_cases(&self, filter: &TestFilter) -> EngineResult<usize> {
        let mut count = 0;
        for driver in self.ensure_loaded().await? {
            let filter = filter.clone();
            count += blocking(move || driver.count_test_cases(&filter)).await?;
        }
        Ok(count)
    }

    async fn run(
        &self,
        listener: Arc<dyn TestListener>,
        filter: &TestFilter,
    ) -> EngineResult<ResultNode> {
        let cancel = self.begin_run();
        let drivers = self.ensure_loaded().await?;
        debug!("Running {} with {} drivers", self.package.display_name(), drivers.len());

        let mut results = Vec::with_capacity(drivers.len());
        let mut root = ResultNode::synthetic(self.package.display_name(), NodeKind::Suite);
        root.mark_started();

        let files = self.package.leaf_packages();
        for (index, driver) in drivers.into_iter().enumerate() {
            if cancel.is_cancel_requested() {
                let name = files
                    .get(index)
                    .map(|file| file.display_name())
                    .unwrap_or_default();
                info!("Run cancelled, {} not started", name);
                results.push(ResultNode::cancelled_assembly(name));
                continue;
            }
            let filter = filter.clone();
            let listener = Arc::clone(&listener);
            let cancel = cancel.clone();
            results.push(blocking(move || driver.run_within(listener, &filter, &cancel)).await?);
        }

        if results.len() == 1 {
            return Ok(results.remove(0));
        }
        for result in results {
            root.add_child(result);
        }
        root.mark_finished();
        Ok(root)
    }

    async fn unload(&self) -> EngineResult<()> {
        if let Some(drivers) = self.loaded.lock().await.take() {
            unload_all(drivers).await;
        }
        Ok(())
    }

    async fn cancel_run(&self, force: bool) {
        self.run_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel(force);
        if let Some(drivers) = self.loaded.lock().await.as_ref() {
            for driver in drivers {
                driver.stop_run(force);
            }
        }
    }
}
