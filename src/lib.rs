//! caserun - test execution engine
//!
//! Loads test files into node trees, turns each tree into a chain of
//! commands and runs it, folding leaf outcomes into suite results as they
//! complete. Runners decide where the tree executes: in the calling process,
//! in one agent process, or spread over several agents at once.
//!
//! ## Layers
//!
//! - `models`: test nodes, properties, packages and filters
//! - `commands` / `context`: the execution core, synchronous and per thread
//! - `drivers`: one loaded test file
//! - `runners`: Direct, Aggregating, Process and the Master façade
//! - `agent`: the wire protocol, transport, agency and agent host
//! - `project`, `config`, `output`, `cli`, `demo`: everything around them
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use caserun::{demo, DriverService, EngineServices, InProcessLauncher, MasterRunner,
//!     ProjectService, TestAgency, TestFilter, TestPackage, TracingListener};
//!
//! # async fn example() -> caserun::EngineResult<()> {
//! let drivers = DriverService::for_discovery(Arc::new(demo::registry()));
//! let agency = TestAgency::new(Arc::new(InProcessLauncher::new(drivers.clone())));
//! let services = EngineServices::new(drivers, ProjectService::with_defaults(), Arc::new(agency));
//!
//! let master = MasterRunner::new(TestPackage::new("mock-assembly.dll"), services);
//! let report = master.run(Arc::new(TracingListener), &TestFilter::Empty).await?;
//! println!("{}/{} passed", report.passed(), report.total());
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod demo;
pub mod drivers;
pub mod error;
pub mod listener;
pub mod models;
pub mod output;
pub mod project;
pub mod results;
pub mod runners;
pub mod utils;

pub use agent::{InProcessLauncher, ProcessLauncher, TestAgency, CURRENT_RUNTIME};
pub use config::{AppConfig, ConfigFile, EnvConfig};
pub use drivers::{DiscoveryRegistry, DriverService};
pub use error::{EngineError, EngineResult};
pub use listener::{TestEvent, TestListener, TracingListener};
pub use models::{ProcessModel, TestFilter, TestNodeBuilder, TestPackage};
pub use project::ProjectService;
pub use results::{ResultNode, ResultStatus, TestRunReport};
pub use runners::{EngineServices, MasterRunner, TestEngineRunner};
