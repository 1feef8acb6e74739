//! Aggregating runner
//!
//! One sub-runner per sub-package, run concurrently up to a limit. A
//! sub-package that fails to load is reported as an errored assembly while
//! the others proceed.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use super::{TestEngineRunner, TestRunnerFactory};
use crate::context::{CancelToken, ExecutionStatus};
use crate::error::{EngineError, EngineResult};
use crate::listener::TestListener;
use crate::models::{NodeKind, TestFilter, TestPackage};
use crate::project::ProjectService;
use crate::results::{LoadSummary, ResultNode, TestDescription};

/// Default number of sub-runners working at once
pub const DEFAULT_MAX_AGENTS: usize = 4;

const CANCEL_POLL: Duration = Duration::from_millis(20);

struct SubRunner {
    package: TestPackage,
    runner: Option<Arc<dyn TestEngineRunner>>,
    load_error: Option<String>,
}

impl SubRunner {
    fn failed(package: TestPackage, error: &EngineError) -> Self {
        Self {
            package,
            runner: None,
            load_error: Some(error.to_string()),
        }
    }

    fn summary(&self, loaded: Option<LoadSummary>) -> LoadSummary {
        let path = self.package.path().map(|p| p.display().to_string());
        match (&self.load_error, loaded) {
            (Some(error), _) => LoadSummary::failed(self.package.display_name(), path, error),
            (None, Some(summary)) => summary,
            (None, None) => LoadSummary::loaded(self.package.display_name(), path, 0),
        }
    }
}

/// Runner fanning out over the sub-packages of its package
pub struct AggregatingRunner {
    package: TestPackage,
    factory: Arc<dyn TestRunnerFactory>,
    projects: ProjectService,
    max_concurrent: usize,
    runners: Mutex<Option<Arc<Vec<SubRunner>>>>,
    run_token: std::sync::Mutex<CancelToken>,
}

impl AggregatingRunner {
    pub fn new(
        package: TestPackage,
        factory: Arc<dyn TestRunnerFactory>,
        projects: ProjectService,
    ) -> Self {
        Self {
            package,
            factory,
            projects,
            max_concurrent: DEFAULT_MAX_AGENTS,
            runners: Mutex::new(None),
            run_token: std::sync::Mutex::new(CancelToken::new()),
        }
    }

    /// Fresh token for a starting run; earlier requests do not carry over
    fn begin_run(&self) -> CancelToken {
        let token = CancelToken::new();
        *self.run_token.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Expand and create one runner per sub-package, then load them all
    async fn create_and_load(&self) -> EngineResult<(Vec<SubRunner>, Vec<LoadSummary>)> {
        if self.package.sub_packages.is_empty() {
            return Err(EngineError::InvalidPackage(format!(
                "{} has no sub-packages to aggregate",
                self.package.display_name()
            )));
        }

        let mut pending = Vec::new();
        let mut created = Vec::new();
        for sub in &self.package.sub_packages {
            let mut sub = sub.clone();
            match self.projects.expand(&mut sub) {
                Ok(()) => {
                    let runner = self.factory.make_runner(&sub);
                    pending.push((created.len(), Arc::clone(&runner)));
                    created.push(SubRunner {
                        package: sub,
                        runner: Some(runner),
                        load_error: None,
                    });
                }
                Err(e) => {
                    warn!("Could not expand {}: {}", sub.display_name(), e);
                    created.push(SubRunner::failed(sub, &e));
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut indexes = Vec::with_capacity(pending.len());
        let mut handles = Vec::with_capacity(pending.len());
        for (index, runner) in pending {
            let semaphore = semaphore.clone();
            indexes.push(index);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| EngineError::TaskFailed(e.to_string()))?;
                runner.load().await
            }));
        }

        let mut loaded: Vec<Option<LoadSummary>> = vec![None; created.len()];
        for (index, outcome) in indexes.into_iter().zip(join_all(handles).await) {
            let outcome = outcome
                .map_err(|e| EngineError::TaskFailed(e.to_string()))
                .and_then(|r| r);
            match outcome {
                Ok(summary) => loaded[index] = Some(summary),
                Err(e) => {
                    warn!("Failed to load {}: {}", created[index].package.display_name(), e);
                    if let Some(runner) = created[index].runner.take() {
                        if let Err(e) = runner.dispose().await {
                            debug!("Cleanup after failed load: {}", e);
                        }
                    }
                    created[index].load_error = Some(e.to_string());
                }
            }
        }

        let summaries = created
            .iter()
            .zip(loaded)
            .map(|(sub, summary)| sub.summary(summary))
            .collect();
        Ok((created, summaries))
    }

    async fn ensure_loaded(&self) -> EngineResult<Arc<Vec<SubRunner>>> {
        let mut runners = self.runners.lock().await;
        if let Some(existing) = runners.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let (created, _) = self.create_and_load().await?;
        let created = Arc::new(created);
        *runners = Some(Arc::clone(&created));
        Ok(created)
    }

    async fn release(subs: &[SubRunner]) {
        for runner in subs.iter().filter_map(|s| s.runner.as_ref()) {
            if let Err(e) = runner.dispose().await {
                warn!("Failed to release sub-runner: {}", e);
            }
        }
    }
}

/// Run a sub-runner, passing a request on `cancel` down to it once seen
async fn run_forwarding_cancel(
    runner: &dyn TestEngineRunner,
    listener: Arc<dyn TestListener>,
    filter: &TestFilter,
    cancel: &CancelToken,
) -> EngineResult<ResultNode> {
    let run = runner.run(listener, filter);
    tokio::pin!(run);
    let mut sent = ExecutionStatus::Running;
    loop {
        tokio::select! {
            result = &mut run => return result,
            _ = tokio::time::sleep(CANCEL_POLL), if sent != ExecutionStatus::AbortRequested => {
                let status = cancel.status();
                if status > sent {
                    runner.cancel_run(status == ExecutionStatus::AbortRequested).await;
                    sent = status;
                }
            }
        }
    }
}

#[async_trait]
impl TestEngineRunner for AggregatingRunner {
    async fn load(&self) -> EngineResult<LoadSummary> {
        let mut runners = self.runners.lock().await;
        if let Some(previous) = runners.take() {
            Self::release(&previous).await;
        }
        let (created, summaries) = self.create_and_load().await?;
        info!(
            "Loaded {} sub-packages of {} ({} failed)",
            created.len(),
            self.package.display_name(),
            created.iter().filter(|s| s.load_error.is_some()).count()
        );
        *runners = Some(Arc::new(created));
        Ok(LoadSummary::merge(self.package.display_name(), summaries))
    }

    async fn explore(&self, filter: &TestFilter) -> EngineResult<TestDescription> {
        let subs = self.ensure_loaded().await?;
        let mut descriptions = Vec::new();
        for runner in subs.iter().filter_map(|s| s.runner.as_ref()) {
            descriptions.push(runner.explore(filter).await?);
        }
        Ok(TestDescription::merge(self.package.display_name(), descriptions))
    }

    async fn count_test_cases(&self, filter: &TestFilter) -> EngineResult<usize> {
        let subs = self.ensure_loaded().await?;
        let mut count = 0;
        for runner in subs.iter().filter_map(|s| s.runner.as_ref()) {
            count += runner.count_test_cases(filter).await?;
        }
        Ok(count)
    }

    async fn run(
        &self,
        listener: Arc<dyn TestListener>,
        filter: &TestFilter,
    ) -> EngineResult<ResultNode> {
        let cancel = self.begin_run();
        let subs = self.ensure_loaded().await?;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        debug!(
            "Running {} sub-packages, at most {} at a time",
            subs.len(),
            self.max_concurrent
        );

        let mut handles = Vec::new();
        for index in 0..subs.len() {
            let subs = Arc::clone(&subs);
            let semaphore = semaphore.clone();
            let listener = Arc::clone(&listener);
            let filter = filter.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let sub = &subs[index];
                let name = sub.package.display_name();
                let (Some(runner), None) = (&sub.runner, &sub.load_error) else {
                    let message = sub.load_error.clone().unwrap_or_default();
                    return ResultNode::load_failure(name, message);
                };
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return ResultNode::load_failure(name, e.to_string()),
                };
                if cancel.is_cancel_requested() {
                    info!("Run cancelled, {} not started", name);
                    return ResultNode::cancelled_assembly(name);
                }
                match run_forwarding_cancel(runner.as_ref(), listener, &filter, &cancel).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Run of {} failed: {}", name, e);
                        ResultNode::load_failure(name, e.to_string())
                    }
                }
            }));
        }

        let mut root = ResultNode::synthetic(self.package.display_name(), NodeKind::Suite);
        root.mark_started();
        for (sub, outcome) in subs.iter().zip(join_all(handles).await) {
            let result = outcome.unwrap_or_else(|e| {
                ResultNode::load_failure(sub.package.display_name(), e.to_string())
            });
            root.add_child(result);
        }
        root.mark_finished();
        Ok(root)
    }

    async fn unload(&self) -> EngineResult<()> {
        if let Some(subs) = self.runners.lock().await.as_ref() {
            for runner in subs.iter().filter_map(|s| s.runner.as_ref()) {
                runner.unload().await?;
            }
        }
        Ok(())
    }

    async fn cancel_run(&self, force: bool) {
        self.run_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel(force);
    }

    async fn dispose(&self) -> EngineResult<()> {
        if let Some(subs) = self.runners.lock().await.take() {
            Self::release(&subs).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ChannelListener, NullListener, TestEvent};
    use crate::models::names;
    use crate::results::ResultStatus;
    use crate::runners::{test_support, DefaultRunnerFactory};
    use std::fs;
    use tempfile::TempDir;

    fn runner(package: TestPackage) -> AggregatingRunner {
        let services = test_support::services();
        let projects = services.projects.clone();
        AggregatingRunner::new(package, Arc::new(DefaultRunnerFactory::new(services)), projects)
            .with_max_concurrent(2)
    }

    #[tokio::test]
    async fn test_two_assemblies_merge_in_order() {
        let runner = runner(TestPackage::from_files(["calc.dll", "strings.dll"]));
        let result = runner
            .run(Arc::new(NullListener), &TestFilter::Empty)
            .await
            .unwrap();

        assert_eq!(result.children.len(), 2);
        assert!(result.children.iter().all(|c| c.is_assembly()));
        assert_eq!(result.children[0].name, "calc.dll");
        assert_eq!(result.children[1].name, "strings.dll");
        assert_eq!(result.pass_count, 4);
        assert_eq!(result.fail_count, 1);
        assert_eq!(result.total_count(), 5);
    }

    #[tokio::test]
    async fn test_failed_load_does_not_abort_others() {
        let runner = runner(TestPackage::from_files(["calc.dll", "missing.dll"]));
        let summary = runner.load().await.unwrap();
        assert_eq!(summary.errors().len(), 1);
        assert_eq!(summary.test_case_count, 3);

        let result = runner
            .run(Arc::new(NullListener), &TestFilter::Empty)
            .await
            .unwrap();
        let missing = &result.children[1];
        assert_eq!(missing.status, ResultStatus::Error);
        assert_eq!(missing.properties.get(names::TYPE), Some("Assembly"));
        assert!(missing.message.as_deref().unwrap_or("").contains("missing.dll"));
        assert_eq!(result.children[0].total_count(), 3);
        assert_eq!(result.status, ResultStatus::Failed);
    }

    #[tokio::test]
    async fn test_project_sub_package_is_expanded() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("text.caseproj");
        fs::write(&manifest, "assemblies:\n  - strings.dll\n").unwrap();

        let runner = runner(TestPackage::from_files([
            manifest,
            std::path::PathBuf::from("calc.dll"),
        ]));
        assert_eq!(runner.count_test_cases(&TestFilter::Empty).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_broken_project_reported_as_load_failure() {
        let runner = runner(TestPackage::from_files(["broken.caseproj", "calc.dll"]));
        let summary = runner.load().await.unwrap();
        assert_eq!(summary.errors().len(), 1);
        assert!(summary.children[0].error.as_deref().unwrap_or("").contains("Project error"));
    }

    #[tokio::test]
    async fn test_cancel_skips_queued_sub_packages() {
        let services = test_support::services_for(test_support::slow_registry());
        let projects = services.projects.clone();
        let runner = Arc::new(
            AggregatingRunner::new(
                TestPackage::from_files(["slow.dll", "later.dll"]),
                Arc::new(DefaultRunnerFactory::new(services)),
                projects,
            )
            .with_max_concurrent(1),
        );
        runner.load().await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let running = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner
                    .run(Arc::new(ChannelListener::new(tx)), &TestFilter::Empty)
                    .await
            })
        };
        while let Some(event) = rx.recv().await {
            if matches!(event, TestEvent::TestStarted { .. }) {
                break;
            }
        }
        runner.cancel_run(false).await;

        let result = running.await.unwrap().unwrap();
        assert_eq!(result.status, ResultStatus::Cancelled);
        assert_eq!(result.children[0].status, ResultStatus::Cancelled);
        assert!(result.find("slow.dll.Waits.NeverStarted").is_none());
        assert_eq!(result.children[1].name, "later.dll");
        assert_eq!(result.children[1].status, ResultStatus::Cancelled);
        assert_eq!(result.total_count(), 1);
        runner.dispose().await.unwrap();
    }

    #[test]
    fn test_empty_package_is_invalid() {
        let runner = runner(TestPackage::default());
        let err = tokio_test::block_on(runner.load()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPackage(_)));
    }
}
