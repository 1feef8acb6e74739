//! Configuration module
//!
//! Engine defaults loaded from a config file, overridden by `CASERUN_*`
//! environment variables, then copied into each test package.

mod env;
mod file;

pub use env::{print_env_help, EnvBuilder, EnvConfig, EnvGuard};
pub use file::{expand_path, ConfigFile, CONFIG_LOCATIONS};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::agent::{CURRENT_RUNTIME, DEFAULT_AGENT_TIMEOUT_SECS};
use crate::models::{settings, ProcessModel, TestPackage};
use crate::runners::DEFAULT_MAX_AGENTS;
use crate::utils::LogLevel;

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where tests execute unless a package says otherwise
    pub process_model: ProcessModel,

    /// Case timeout in milliseconds applied to cases without their own
    pub default_timeout_ms: Option<u64>,

    /// Seconds to wait for an agent to report ready
    pub agent_timeout_secs: u64,

    /// Maximum agents working at once
    pub max_agents: usize,

    /// Stop the run at the first failing case
    pub stop_on_error: bool,

    pub default_culture: Option<String>,

    pub log_level: LogLevel,

    /// Runtimes agents can be launched for
    pub runtimes: Vec<String>,

    pub work_directory: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            process_model: ProcessModel::InProcess,
            default_timeout_ms: None,
            agent_timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
            max_agents: DEFAULT_MAX_AGENTS,
            stop_on_error: false,
            default_culture: None,
            log_level: LogLevel::Info,
            runtimes: vec![CURRENT_RUNTIME.to_string()],
            work_directory: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if file::is_yaml_file(path) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if file::is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_agents == 0 {
            anyhow::bail!("max_agents must be at least 1");
        }
        if self.agent_timeout_secs == 0 {
            anyhow::bail!("agent_timeout_secs must be at least 1");
        }
        if self.runtimes.is_empty() {
            anyhow::bail!("at least one runtime must be available");
        }
        Ok(())
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(model) = env.process_model {
            self.process_model = model;
        }
        if let Some(timeout) = env.timeout_ms {
            self.default_timeout_ms = Some(timeout);
        }
        if let Some(agents) = env.max_agents {
            self.max_agents = agents.max(1);
        }
        if let Some(level) = env.log_level {
            self.log_level = level;
        }
        if let Some(culture) = &env.culture {
            self.default_culture = Some(culture.clone());
        }
        if let Some(stop) = env.stop_on_error {
            self.stop_on_error = stop;
        }
    }

    /// Copy defaults into package settings the package does not already set
    pub fn apply_to(&self, package: &mut TestPackage) {
        let mut set = |key: &str, value: serde_json::Value| {
            if !package.has_setting(key) {
                package.add_setting(key, value);
            }
        };

        set(settings::PROCESS_MODEL, self.process_model.to_string().into());
        if let Some(timeout) = self.default_timeout_ms {
            set(settings::DEFAULT_TIMEOUT, timeout.into());
        }
        set(settings::AGENT_TIMEOUT, self.agent_timeout_secs.into());
        set(settings::MAX_AGENTS, self.max_agents.into());
        set(settings::STOP_ON_ERROR, self.stop_on_error.into());
        if let Some(culture) = &self.default_culture {
            set(settings::DEFAULT_CULTURE, culture.clone().into());
        }
        if let Some(dir) = &self.work_directory {
            set(settings::WORK_DIRECTORY, dir.display().to_string().into());
        }
    }
}
