//! Runner selection

use std::sync::Arc;
use tracing::debug;

use super::{AggregatingRunner, DirectRunner, ProcessRunner, TestEngineRunner, DEFAULT_MAX_AGENTS};
use crate::agent::TestAgency;
use crate::drivers::DriverService;
use crate::models::{settings, ProcessModel, TestPackage};
use crate::project::ProjectService;

/// Collaborators shared by every runner of one engine
#[derive(Clone)]
pub struct EngineServices {
    pub drivers: DriverService,
    pub projects: ProjectService,
    pub agency: Arc<TestAgency>,
}

impl EngineServices {
    pub fn new(drivers: DriverService, projects: ProjectService, agency: Arc<TestAgency>) -> Self {
        Self {
            drivers,
            projects,
            agency,
        }
    }
}

/// Chooses the runner strategy for a package
pub trait TestRunnerFactory: Send + Sync {
    fn make_runner(&self, package: &TestPackage) -> Arc<dyn TestEngineRunner>;
}

/// Selection by process model
///
/// | Process model | Files | Runner |
/// |---|---|---|
/// | InProcess | any | Direct |
/// | Separate | any | Process |
/// | Multiple | one | Process |
/// | Multiple | several | Aggregating over Process |
#[derive(Clone)]
pub struct DefaultRunnerFactory {
    services: EngineServices,
}

impl DefaultRunnerFactory {
    pub fn new(services: EngineServices) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }
}

impl TestRunnerFactory for DefaultRunnerFactory {
    fn make_runner(&self, package: &TestPackage) -> Arc<dyn TestEngineRunner> {
        let model = package.process_model();
        let files = package.leaf_packages().len();
        debug!(
            "Selecting runner for {} ({}, {} files)",
            package.display_name(),
            model,
            files
        );

        match model {
            ProcessModel::InProcess => Arc::new(DirectRunner::new(
                package.clone(),
                self.services.drivers.clone(),
            )),
            ProcessModel::Multiple if files > 1 || package.sub_packages.len() > 1 => {
                let max_agents = package.get_setting_or(settings::MAX_AGENTS, DEFAULT_MAX_AGENTS);
                Arc::new(
                    AggregatingRunner::new(
                        package.clone(),
                        Arc::new(self.clone()),
                        self.services.projects.clone(),
                    )
                    .with_max_concurrent(max_agents),
                )
            }
            ProcessModel::Separate | ProcessModel::Multiple => Arc::new(ProcessRunner::new(
                package.clone(),
                Arc::clone(&self.services.agency),
            )),
        }
    }
}
