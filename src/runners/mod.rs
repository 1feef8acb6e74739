//! Test engine runners
//!
//! Runners decide where a package executes. Every strategy implements
//! [`TestEngineRunner`]; [`DefaultRunnerFactory`] picks one from the
//! package's process model and [`MasterRunner`] is the entry point used by
//! callers.

mod aggregating;
mod direct;
mod factory;
mod master;
mod process;

pub use aggregating::{AggregatingRunner, DEFAULT_MAX_AGENTS};
pub use direct::{DirectRunner, ID_SEED_STRIDE};
pub use factory::{DefaultRunnerFactory, EngineServices, TestRunnerFactory};
pub use master::{MasterRunner, RunHandle};
pub use process::ProcessRunner;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::listener::TestListener;
use crate::models::TestFilter;
use crate::results::{LoadSummary, ResultNode, TestDescription};

/// Capability shared by every runner strategy
///
/// A runner is created for one package. Operations that need the package
/// loaded load it first.
#[async_trait]
pub trait TestEngineRunner: Send + Sync {
    /// Load (or reload) the package
    async fn load(&self) -> EngineResult<LoadSummary>;

    async fn explore(&self, filter: &TestFilter) -> EngineResult<TestDescription>;

    async fn count_test_cases(&self, filter: &TestFilter) -> EngineResult<usize>;

    async fn run(
        &self,
        listener: Arc<dyn TestListener>,
        filter: &TestFilter,
    ) -> EngineResult<ResultNode>;

    async fn unload(&self) -> EngineResult<()>;

    /// Best-effort cancellation of an in-flight run
    async fn cancel_run(&self, force: bool);

    /// Release everything the runner holds
    async fn dispose(&self) -> EngineResult<()> {
        self.unload().await
    }
}

/// Run synchronous driver work on the blocking pool
pub(crate) async fn blocking<T, F>(work: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EngineError::TaskFailed(e.to_string()))?
}
