//! Process runner
//!
//! Runs its package inside an agent. A failed load tears down whatever was
//! created remotely before the error is returned.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::TestEngineRunner;
use crate::agent::{AgentHandle, AgentOptions, RemoteRunner, TestAgency};
use crate::error::EngineResult;
use crate::listener::TestListener;
use crate::models::{TestFilter, TestPackage};
use crate::results::{LoadSummary, ResultNode, TestDescription};

struct Remote {
    agent: AgentHandle,
    runner: Arc<RemoteRunner>,
}

/// Runner proxying every call to an agent
pub struct ProcessRunner {
    package: TestPackage,
    agency: Arc<TestAgency>,
    remote: Mutex<Option<Remote>>,
}

impl ProcessRunner {
    pub fn new(package: TestPackage, agency: Arc<TestAgency>) -> Self {
        Self {
            package,
            agency,
            remote: Mutex::new(None),
        }
    }

    async fn connect(&self) -> EngineResult<(Remote, LoadSummary)> {
        let options = AgentOptions::from_package(&self.package);
        let agent = self
            .agency
            .get_agent(
                Some(&options.runtime),
                options.timeout,
                options.debug,
                &options.extra_args,
            )
            .await?;

        let runner = match agent.create_runner(&self.package).await {
            Ok(runner) => Arc::new(runner),
            Err(e) => {
                agent.stop().await;
                return Err(e);
            }
        };

        match runner.load().await {
            Ok(summary) => Ok((Remote { agent, runner }, summary)),
            Err(e) => {
                warn!(
                    "Load of {} failed in {}: {}",
                    self.package.display_name(),
                    agent.id(),
                    e
                );
                if let Err(unload) = runner.unload().await {
                    debug!("Unload after failed load: {}", unload);
                }
                agent.stop().await;
                Err(e)
            }
        }
    }

    async fn ensure_loaded(&self) -> EngineResult<Arc<RemoteRunner>> {
        let mut remote = self.remote.lock().await;
        if let Some(existing) = remote.as_ref() {
            return Ok(Arc::clone(&existing.runner));
        }
        let (connected, _) = self.connect().await?;
        let runner = Arc::clone(&connected.runner);
        *remote = Some(connected);
        Ok(runner)
    }
}

#[async_trait]
impl TestEngineRunner for ProcessRunner {
    async fn load(&self) -> EngineResult<LoadSummary> {
        let mut remote = self.remote.lock().await;
        if let Some(previous) = remote.take() {
            previous.agent.stop().await;
        }
        let (connected, summary) = self.connect().await?;
        info!(
            "Loaded {} in {} ({} test cases)",
            self.package.display_name(),
            connected.agent.id(),
            summary.test_case_count
        );
        *remote = Some(connected);
        Ok(summary)
    }

    async fn explore(&self, filter: &TestFilter) -> EngineResult<TestDescription> {
        self.ensure_loaded().await?.explore(filter).await
    }

    async fn count_test_cases(&self, filter: &TestFilter) -> EngineResult<usize> {
        self.ensure_loaded().await?.count_test_cases(filter).await
    }

    async fn run(
        &self,
        listener: Arc<dyn TestListener>,
        filter: &TestFilter,
    ) -> EngineResult<ResultNode> {
        self.ensure_loaded().await?.run(listener, filter).await
    }

    async fn unload(&self) -> EngineResult<()> {
        let runner = self.remote.lock().await.as_ref().map(|r| Arc::clone(&r.runner));
        match runner {
            Some(runner) => runner.unload().await,
            None => Ok(()),
        }
    }

    async fn cancel_run(&self, force: bool) {
        let runner = self.remote.lock().await.as_ref().map(|r| Arc::clone(&r.runner));
        if let Some(runner) = runner {
            runner.cancel_run(force).await;
        }
    }

    async fn dispose(&self) -> EngineResult<()> {
        if let Some(remote) = self.remote.lock().await.take() {
            if let Err(e) = remote.runner.unload().await {
                debug!("Unload before stopping {}: {}", remote.agent.id(), e);
            }
            remote.agent.stop().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::listener::{ChannelListener, NullListener, TestEvent};
    use crate::results::ResultStatus;
    use crate::runners::test_support;

    fn runner(file: &str) -> ProcessRunner {
        let agency = test_support::services().agency;
        ProcessRunner::new(TestPackage::new(file), agency)
    }

    #[tokio::test]
    async fn test_run_through_agent() {
        let runner = runner("calc.dll");
        let result = runner
            .run(Arc::new(NullListener), &TestFilter::Empty)
            .await
            .unwrap();
        assert!(result.is_assembly());
        assert_eq!(result.pass_count, 2);
        assert_eq!(result.fail_count, 1);
        runner.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_failure_stops_agent() {
        let runner = runner("missing.dll");
        let err = runner.load().await.unwrap_err();
        assert!(matches!(err, EngineError::Remote(m) if m.contains("missing.dll")));
        assert!(runner.remote.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_reaches_running_agent() {
        let agency = test_support::services_for(test_support::slow_registry()).agency;
        let runner = Arc::new(ProcessRunner::new(TestPackage::new("slow.dll"), agency));
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
        assert!(result.find("slow.dll.Waits.NeverStarted").is_none());
        runner.dispose().await.unwrap();
    }
}
