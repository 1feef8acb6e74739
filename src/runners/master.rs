//! Master runner
//!
//! Entry point for callers. Validates and expands the requested package,
//! picks the runner strategy, and wraps the merged result of a run in a
//! [`TestRunReport`]. The report wrapper is produced here and nowhere below.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{
    AggregatingRunner, DefaultRunnerFactory, EngineServices, TestEngineRunner, TestRunnerFactory,
    DEFAULT_MAX_AGENTS,
};
use crate::agent::CURRENT_RUNTIME;
use crate::error::{EngineError, EngineResult};
use crate::listener::{notify, TestEvent, TestListener};
use crate::models::{settings, ProcessModel, TestFilter, TestPackage};
use crate::results::{LoadSummary, TestDescription, TestRunReport};
use crate::utils::Stopwatch;

/// Clears the in-progress flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Façade over the runner hierarchy for one requested package
pub struct MasterRunner {
    package: TestPackage,
    services: EngineServices,
    factory: Arc<dyn TestRunnerFactory>,
    runner: Mutex<Option<Arc<dyn TestEngineRunner>>>,
    running: AtomicBool,
}

impl MasterRunner {
    pub fn new(package: TestPackage, services: EngineServices) -> Self {
        let factory = Arc::new(DefaultRunnerFactory::new(services.clone()));
        Self {
            package,
            services,
            factory,
            runner: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn package(&self) -> &TestPackage {
        &self.package
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Reject settings that cannot be honoured anywhere in the package
    fn validate(&self) -> EngineResult<()> {
        if self.package.path().is_none() && self.package.sub_packages.is_empty() {
            return Err(EngineError::InvalidPackage(
                "no test files were specified".into(),
            ));
        }

        let mut packages = vec![&self.package];
        while let Some(package) = packages.pop() {
            if let Some(runtime) = package.get_setting::<String>(settings::RUNTIME_FRAMEWORK) {
                if !self.services.agency.is_available(&runtime) {
                    return Err(EngineError::InvalidPackage(format!(
                        "requested runtime '{runtime}' is not available"
                    )));
                }
                if package.process_model() == ProcessModel::InProcess
                    && !runtime.eq_ignore_ascii_case(CURRENT_RUNTIME)
                {
                    return Err(EngineError::InvalidPackage(format!(
                        "cannot run '{runtime}' tests in process; use a separate process"
                    )));
                }
            }
            packages.extend(package.sub_packages.iter());
        }
        Ok(())
    }

    /// Aggregate when projects are combined with anything else, otherwise
    /// expand the lone package and let the factory choose
    fn select_runner(&self) -> EngineResult<Arc<dyn TestEngineRunner>> {
        let constituents: Vec<&TestPackage> = if self.package.sub_packages.is_empty() {
            vec![&self.package]
        } else {
            self.package.sub_packages.iter().collect()
        };
        let projects = constituents
            .iter()
            .filter(|p| self.services.projects.is_project(p))
            .count();
        let assemblies = constituents.len() - projects;
        info!(
            "Package {} contains {} assemblies and {} projects",
            self.package.display_name(),
            assemblies,
            projects
        );

        if projects > 1 || (projects > 0 && assemblies > 0) {
            let max_agents = self
                .package
                .get_setting_or(settings::MAX_AGENTS, DEFAULT_MAX_AGENTS);
            return Ok(Arc::new(
                AggregatingRunner::new(
                    self.package.clone(),
                    Arc::clone(&self.factory),
                    self.services.projects.clone(),
                )
                .with_max_concurrent(max_agents),
            ));
        }

        let mut package = self.package.clone();
        self.services.projects.expand(&mut package)?;
        Ok(self.factory.make_runner(&package))
    }

    async fn ensure_runner(&self) -> EngineResult<Arc<dyn TestEngineRunner>> {
        let mut current = self.runner.lock().await;
        if let Some(runner) = current.as_ref() {
            return Ok(Arc::clone(runner));
        }
        self.validate()?;
        let runner = self.select_runner()?;
        runner.load().await?;
        *current = Some(Arc::clone(&runner));
        Ok(runner)
    }

    pub async fn load(&self) -> EngineResult<LoadSummary> {
        let mut current = self.runner.lock().await;
        if let Some(previous) = current.take() {
            previous.dispose().await?;
        }
        self.validate()?;
        let runner = self.select_runner()?;
        let summary = runner.load().await?;
        *current = Some(runner);
        Ok(summary)
    }

    pub async fn explore(&self, filter: &TestFilter) -> EngineResult<TestDescription> {
        self.ensure_runner().await?.explore(filter).await
    }

    pub async fn count_test_cases(&self, filter: &TestFilter) -> EngineResult<usize> {
        self.ensure_runner().await?.count_test_cases(filter).await
    }

    /// Run the package and wrap the merged result in a report
    pub async fn run(
        &self,
        listener: Arc<dyn TestListener>,
        filter: &TestFilter,
    ) -> EngineResult<TestRunReport> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(EngineError::RunInProgress);
        }
        let _guard = RunGuard(&self.running);

        let start_time = Utc::now();
        let mut stopwatch = Stopwatch::new();

        let runner = self.ensure_runner().await?;
        let test_count = runner.count_test_cases(filter).await?;
        stopwatch.lap("load");

        notify(
            listener.as_ref(),
            &TestEvent::RunStarted {
                name: self.package.display_name(),
                test_count,
            },
        );

        let result = runner.run(Arc::clone(&listener), filter).await?;
        stopwatch.lap("run");

        let report = TestRunReport::new(&self.package, result, start_time);
        notify(
            listener.as_ref(),
            &TestEvent::RunFinished {
                status: report.status(),
                total: report.total(),
                passed: report.passed(),
                failed: report.failed(),
                skipped: report.skipped(),
                duration_ms: report.duration_ms,
            },
        );

        debug!("Run phases\n{}", stopwatch.format());
        info!(
            "Run {} finished {}: {} passed, {} failed, {} skipped in {}ms",
            report.run_id,
            report.status(),
            report.passed(),
            report.failed(),
            report.skipped(),
            report.duration_ms
        );
        Ok(report)
    }

    /// Start a run in the background
    pub fn run_async(self: &Arc<Self>, listener: Arc<dyn TestListener>, filter: TestFilter) -> RunHandle {
        let master = Arc::clone(self);
        let task = tokio::spawn(async move { master.run(listener, &filter).await });
        RunHandle {
            master: Arc::clone(self),
            task,
        }
    }

    pub async fn unload(&self) -> EngineResult<()> {
        let runner = self.runner.lock().await.as_ref().map(Arc::clone);
        match runner {
            Some(runner) => runner.unload().await,
            None => Ok(()),
        }
    }

    pub async fn cancel_run(&self, force: bool) {
        let runner = self.runner.lock().await.as_ref().map(Arc::clone);
        if let Some(runner) = runner {
            info!("Cancelling run of {} (force: {})", self.package.display_name(), force);
            runner.cancel_run(force).await;
        }
    }

    pub async fn dispose(&self) -> EngineResult<()> {
        if let Some(runner) = self.runner.lock().await.take() {
            runner.dispose().await?;
        }
        Ok(())
    }
}

/// A run started with [`MasterRunner::run_async`]
pub struct RunHandle {
    master: Arc<MasterRunner>,
    task: JoinHandle<EngineResult<TestRunReport>>,
}

impl RunHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn cancel(&self, force: bool) {
        self.master.cancel_run(force).await;
    }

    pub async fn wait(self) -> EngineResult<TestRunReport> {
        self.task
            .await
            .map_err(|e| EngineError::TaskFailed(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{InProcessLauncher, TestAgency};
    use crate::listener::{ChannelListener, CollectingListener, NullListener};
    use crate::results::ResultStatus;
    use crate::runners::test_support;
    use std::fs;
    use tempfile::TempDir;

    fn master(package: TestPackage) -> MasterRunner {
        MasterRunner::new(package, test_support::services())
    }

    #[tokio::test]
    async fn test_two_assemblies_in_one_report() {
        let master = master(TestPackage::from_files(["calc.dll", "strings.dll"]));
        let listener = Arc::new(CollectingListener::new());
        let report = master.run(listener.clone(), &TestFilter::Empty).await.unwrap();

        assert_eq!(report.result.children.len(), 2);
        assert!(report.result.children.iter().all(|c| c.is_assembly()));
        assert_eq!(report.total(), 5);
        assert_eq!(report.passed(), 4);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.status(), ResultStatus::Failed);
        assert!(!report.is_success());

        let names = listener.names();
        assert_eq!(names.first(), Some(&"run_started"));
        assert_eq!(names.last(), Some(&"run_finished"));
        assert_eq!(names.iter().filter(|n| **n == "run_finished").count(), 1);
    }

    #[tokio::test]
    async fn test_run_started_carries_filtered_count() {
        let master = master(TestPackage::from_files(["calc.dll", "strings.dll"]));
        let listener = Arc::new(CollectingListener::new());
        master
            .run(listener.clone(), &TestFilter::Category("Fast".into()))
            .await
            .unwrap();
        assert!(matches!(
            listener.events().first(),
            Some(TestEvent::RunStarted { test_count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_project_mixed_with_assembly_is_aggregated() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("text.caseproj");
        fs::write(&manifest, "assemblies:\n  - strings.dll\n").unwrap();

        let master = master(TestPackage::from_files([
            manifest,
            std::path::PathBuf::from("calc.dll"),
        ]));
        let summary = master.load().await.unwrap();
        assert_eq!(summary.test_case_count, 5);

        let report = master.run(Arc::new(NullListener), &TestFilter::Empty).await.unwrap();
        assert_eq!(report.total(), 5);
        assert_eq!(report.result.children.len(), 2);
    }

    #[tokio::test]
    async fn test_lone_project_is_expanded() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("all.caseproj");
        fs::write(&manifest, "assemblies:\n  - calc.dll\n  - strings.dll\n").unwrap();

        let master = master(TestPackage::new(&manifest));
        assert_eq!(master.count_test_cases(&TestFilter::Empty).await.unwrap(), 5);
        let report = master.run(Arc::new(NullListener), &TestFilter::Empty).await.unwrap();
        assert_eq!(report.result.children.len(), 2);
        assert_eq!(report.package_path.as_deref(), Some(manifest.display().to_string().as_str()));
    }

    #[tokio::test]
    async fn test_separate_and_multiple_process_models() {
        for model in [ProcessModel::Separate, ProcessModel::Multiple] {
            let mut package = TestPackage::from_files(["calc.dll", "strings.dll"]);
            package.add_setting(settings::PROCESS_MODEL, model.to_string());
            let master = master(package);
            let report = master.run(Arc::new(NullListener), &TestFilter::Empty).await.unwrap();
            assert_eq!(report.total(), 5, "{model}");
            assert_eq!(report.result.children.len(), 2, "{model}");
            master.dispose().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_invalid_runtime_rejected() {
        let mut package = TestPackage::new("calc.dll");
        package.add_setting(settings::RUNTIME_FRAMEWORK, "v9.9");
        let err = master(package).load().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPackage(m) if m.contains("v9.9")));

        let services = test_support::services();
        let agency = TestAgency::new(Arc::new(InProcessLauncher::new(services.drivers.clone())))
            .with_runtimes(vec!["native".into(), "legacy".into()]);
        let services = EngineServices::new(services.drivers, services.projects, Arc::new(agency));
        let mut package = TestPackage::new("calc.dll");
        package.add_setting(settings::RUNTIME_FRAMEWORK, "legacy");
        let err = MasterRunner::new(package, services).load().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPackage(m) if m.contains("in process")));
    }

    #[tokio::test]
    async fn test_empty_package_rejected() {
        let err = master(TestPackage::default()).load().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPackage(_)));
    }

    #[tokio::test]
    async fn test_run_async_cancel() {
        let services = test_support::services_for(test_support::slow_registry());
        let master = Arc::new(MasterRunner::new(TestPackage::new("slow.dll"), services));
        master.load().await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = master.run_async(Arc::new(ChannelListener::new(tx)), TestFilter::Empty);
        while let Some(event) = rx.recv().await {
            if matches!(event, TestEvent::TestStarted { .. }) {
                break;
            }
        }

        assert!(matches!(
            master.run(Arc::new(NullListener), &TestFilter::Empty).await,
            Err(EngineError::RunInProgress)
        ));

        handle.cancel(false).await;
        let report = handle.wait().await.unwrap();
        assert_eq!(report.status(), ResultStatus::Cancelled);
        assert_eq!(report.total(), 1);
        assert!(!master.is_running());
    }

    #[tokio::test]
    async fn test_cancel_reaches_files_not_yet_started() {
        let services = test_support::services_for(test_support::slow_registry());
        let master = Arc::new(MasterRunner::new(
            TestPackage::from_files(["slow.dll", "later.dll"]),
            services,
        ));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = master.run_async(Arc::new(ChannelListener::new(tx)), TestFilter::Empty);
        while let Some(event) = rx.recv().await {
            if matches!(event, TestEvent::TestStarted { .. }) {
                break;
            }
        }
        handle.cancel(false).await;

        let report = handle.wait().await.unwrap();
        assert_eq!(report.status(), ResultStatus::Cancelled);
        let later = report.result.find("later.dll").unwrap();
        assert_eq!(later.total_count(), 0);
        assert_eq!(report.total(), 1);
    }

    #[tokio::test]
    async fn test_cancel_on_last_case_cancels_run() {
        let services = test_support::services_for(test_support::slow_registry());
        let master = Arc::new(MasterRunner::new(TestPackage::new("lone.dll"), services));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = master.run_async(Arc::new(ChannelListener::new(tx)), TestFilter::Empty);
        while let Some(event) = rx.recv().await {
            if matches!(event, TestEvent::TestStarted { .. }) {
                break;
            }
        }
        handle.cancel(false).await;

        let report = handle.wait().await.unwrap();
        assert_eq!(report.status(), ResultStatus::Cancelled);
        assert_eq!(report.total(), 1);
    }
}
