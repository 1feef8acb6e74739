//! Agent launching and lifetime

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::host::serve;
use super::protocol::{AgentRequest, AgentResponse};
use super::remote::RemoteRunner;
use super::transport::{unexpected, StreamTransport};
use super::CURRENT_RUNTIME;
use crate::drivers::DriverService;
use crate::error::{EngineError, EngineResult};
use crate::models::{settings, TestPackage};

/// Seconds to wait for an agent when the package does not say
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 30;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// How to launch one agent
#[derive(Clone, Debug, PartialEq)]
pub struct AgentOptions {
    pub runtime: String,
    pub timeout: Duration,
    pub debug: bool,
    pub extra_args: Vec<String>,
}

impl AgentOptions {
    /// Agent settings read from a package
    pub fn from_package(package: &TestPackage) -> Self {
        Self {
            runtime: package
                .get_setting(settings::RUNTIME_FRAMEWORK)
                .unwrap_or_else(|| CURRENT_RUNTIME.to_string()),
            timeout: Duration::from_secs(
                package.get_setting_or(settings::AGENT_TIMEOUT, DEFAULT_AGENT_TIMEOUT_SECS),
            ),
            debug: package.get_setting_or(settings::DEBUG_AGENT, false),
            extra_args: package.get_setting_or(settings::AGENT_ARGS, Vec::new()),
        }
    }
}

/// A started agent, not yet known to be ready
pub struct LaunchedAgent {
    pub transport: StreamTransport,
    pub process: Option<Child>,
    pub host: Option<JoinHandle<EngineResult<()>>>,
}

/// Starts agents
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(&self, agent_id: &str, options: &AgentOptions) -> EngineResult<LaunchedAgent>;
}

/// Hosts the agent on an in-memory pipe inside this process
pub struct InProcessLauncher {
    drivers: DriverService,
}

impl InProcessLauncher {
    pub fn new(drivers: DriverService) -> Self {
        Self { drivers }
    }
}

#[async_trait]
impl AgentLauncher for InProcessLauncher {
    async fn launch(&self, agent_id: &str, _options: &AgentOptions) -> EngineResult<LaunchedAgent> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let host = tokio::spawn(serve(
            server_read,
            server_write,
            self.drivers.clone(),
            agent_id.to_string(),
        ));
        let (client_read, client_write) = tokio::io::split(client);
        Ok(LaunchedAgent {
            transport: StreamTransport::new(client_read, client_write),
            process: None,
            host: Some(host),
        })
    }
}

/// Spawns `<program> agent` and talks to it over stdio
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Launcher re-running the current executable
    pub fn current_exe() -> EngineResult<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    fn command(&self, agent_id: &str, options: &AgentOptions) -> Command {
        let mut command = Command::new(&self.program);
        command.arg("agent").arg("--id").arg(agent_id);
        if options.debug {
            command.arg("--debug");
        }
        if !options.extra_args.is_empty() {
            command.arg("--").args(&options.extra_args);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl AgentLauncher for ProcessLauncher {
    async fn launch(&self, agent_id: &str, options: &AgentOptions) -> EngineResult<LaunchedAgent> {
        let mut child = self.command(agent_id, options).spawn().map_err(|e| {
            EngineError::AgentUnavailable(format!("{}: {}", self.program.display(), e))
        })?;
        debug!("Spawned agent {} (pid {:?})", agent_id, child.id());

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::AgentUnavailable("agent stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::AgentUnavailable("agent stdout not captured".into()))?;

        Ok(LaunchedAgent {
            transport: StreamTransport::new(stdout, stdin),
            process: Some(child),
            host: None,
        })
    }
}

/// Hands out agents for the runtimes it knows
pub struct TestAgency {
    launcher: Arc<dyn AgentLauncher>,
    runtimes: Vec<String>,
    next_id: AtomicU64,
}

impl TestAgency {
    pub fn new(launcher: Arc<dyn AgentLauncher>) -> Self {
        Self {
            launcher,
            runtimes: vec![CURRENT_RUNTIME.to_string()],
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_runtimes(mut self, runtimes: Vec<String>) -> Self {
        if !runtimes.is_empty() {
            self.runtimes = runtimes;
        }
        self
    }

    pub fn runtimes(&self) -> &[String] {
        &self.runtimes
    }

    pub fn is_available(&self, runtime: &str) -> bool {
        self.runtimes.iter().any(|r| r.eq_ignore_ascii_case(runtime))
    }

    /// Launch an agent for `runtime` and wait up to `timeout` for it to
    /// report ready
    pub async fn get_agent(
        &self,
        runtime: Option<&str>,
        timeout: Duration,
        debug: bool,
        extra_args: &[String],
    ) -> EngineResult<AgentHandle> {
        let options = AgentOptions {
            runtime: runtime.unwrap_or(CURRENT_RUNTIME).to_string(),
            timeout,
            debug,
            extra_args: extra_args.to_vec(),
        };
        if !self.is_available(&options.runtime) {
            return Err(EngineError::AgentUnavailable(format!(
                "runtime '{}' is not available",
                options.runtime
            )));
        }

        let agent_id = format!("agent-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        info!("Launching {} for runtime {}", agent_id, options.runtime);

        let launched = self.launcher.launch(&agent_id, &options).await?;
        let handle = AgentHandle {
            id: agent_id,
            transport: Arc::new(launched.transport),
            process: Mutex::new(launched.process),
            host: Mutex::new(launched.host),
        };

        match tokio::time::timeout(timeout, handle.transport.wait_ready()).await {
            Ok(Ok((_, runtime))) => {
                debug!("{} ready ({})", handle.id, runtime);
                Ok(handle)
            }
            Ok(Err(e)) => {
                handle.kill().await;
                Err(EngineError::AgentUnavailable(e.to_string()))
            }
            Err(_) => {
                warn!("{} did not report ready within {:?}", handle.id, timeout);
                handle.kill().await;
                Err(EngineError::AgentTimeout(timeout))
            }
        }
    }
}

/// A running agent
pub struct AgentHandle {
    id: String,
    transport: Arc<StreamTransport>,
    process: Mutex<Option<Child>>,
    host: Mutex<Option<JoinHandle<EngineResult<()>>>>,
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

impl AgentHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Create the agent-side runner for `package`
    pub async fn create_runner(&self, package: &TestPackage) -> EngineResult<RemoteRunner> {
        let request = AgentRequest::CreateRunner {
            package: package.clone(),
        };
        match self.transport.call(request).await? {
            AgentResponse::Ack => Ok(RemoteRunner::new(Arc::clone(&self.transport))),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the agent to exit, then reap it
    pub async fn stop(&self) {
        if !self.transport.is_closed() {
            match tokio::time::timeout(STOP_GRACE, self.transport.call(AgentRequest::Stop)).await {
                Ok(Ok(_)) => debug!("{} acknowledged stop", self.id),
                Ok(Err(e)) => debug!("{} stop request failed: {}", self.id, e),
                Err(_) => warn!("{} did not acknowledge stop", self.id),
            }
        }

        if let Some(mut child) = self.process.lock().await.take() {
            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("{} exited with {}", self.id, status),
                _ => {
                    warn!("Killing {}", self.id);
                    let _ = child.kill().await;
                }
            }
        }
        if let Some(host) = self.host.lock().await.take() {
            match tokio::time::timeout(STOP_GRACE, host).await {
                Ok(Ok(Err(e))) => warn!("{} host ended with error: {}", self.id, e),
                Err(_) => warn!("{} host did not finish", self.id),
                _ => {}
            }
        }
        info!("{} stopped", self.id);
    }

    async fn kill(&self) {
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
        }
        if let Some(host) = self.host.lock().await.take() {
            host.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::NullListener;
    use crate::models::TestFilter;
    use crate::runners::{test_support, TestEngineRunner};

    /// Launcher whose agent never answers
    struct SilentLauncher;

    #[async_trait]
    impl AgentLauncher for SilentLauncher {
        async fn launch(&self, _: &str, _: &AgentOptions) -> EngineResult<LaunchedAgent> {
            let (client, server) = tokio::io::duplex(1024);
            let (read, write) = tokio::io::split(client);
            let host = tokio::spawn(async move {
                let _server = server;
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            });
            Ok(LaunchedAgent {
                transport: StreamTransport::new(read, write),
                process: None,
                host: Some(host),
            })
        }
    }

    fn agency() -> TestAgency {
        TestAgency::new(Arc::new(InProcessLauncher::new(test_support::drivers())))
    }

    #[tokio::test]
    async fn test_agent_runs_package() {
        let agent = agency()
            .get_agent(None, Duration::from_secs(5), false, &[])
            .await
            .unwrap();
        assert_eq!(agent.id(), "agent-1");

        let runner = agent
            .create_runner(&TestPackage::new("strings.dll"))
            .await
            .unwrap();
        assert_eq!(runner.load().await.unwrap().test_case_count, 2);
        let result = runner
            .run(Arc::new(NullListener), &TestFilter::Empty)
            .await
            .unwrap();
        assert_eq!(result.pass_count, 2);

        agent.stop().await;
        assert!(runner.load().await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_runtime_is_unavailable() {
        let err = agency()
            .get_agent(Some("v2.0"), Duration::from_secs(1), false, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AgentUnavailable(_)));
    }

    #[tokio::test]
    async fn test_silent_agent_times_out() {
        let agency = TestAgency::new(Arc::new(SilentLauncher));
        let err = agency
            .get_agent(None, Duration::from_millis(50), false, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AgentTimeout(_)));
    }

    #[tokio::test]
    async fn test_handle_debug_shows_id() {
        let agent = agency()
            .get_agent(None, Duration::from_secs(5), false, &[])
            .await
            .unwrap();
        let shown = format!("{agent:?}");
        assert!(shown.starts_with("AgentHandle"));
        assert!(shown.contains(agent.id()));
        agent.stop().await;
    }

    #[test]
    fn test_options_from_package_settings() {
        let mut package = TestPackage::new("calc.dll");
        package.add_setting(settings::AGENT_TIMEOUT, 5);
        package.add_setting(settings::DEBUG_AGENT, true);
        package.add_setting(settings::AGENT_ARGS, vec!["--trace"]);
        let options = AgentOptions::from_package(&package);
        assert_eq!(options.runtime, CURRENT_RUNTIME);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert!(options.debug);
        assert_eq!(options.extra_args, vec!["--trace".to_string()]);
    }
}
