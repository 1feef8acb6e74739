//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use crate::models::ProcessModel;
use crate::utils::LogLevel;

/// Environment variable prefix
const ENV_PREFIX: &str = "CASERUN";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Process model from CASERUN_PROCESS
    pub process_model: Option<ProcessModel>,
    /// Default case timeout (ms) from CASERUN_TIMEOUT
    pub timeout_ms: Option<u64>,
    /// Maximum agents from CASERUN_AGENTS
    pub max_agents: Option<usize>,
    /// Log level from CASERUN_LOG
    pub log_level: Option<LogLevel>,
    /// Culture from CASERUN_CULTURE
    pub culture: Option<String>,
    /// Stop on first failure from CASERUN_STOP_ON_ERROR
    pub stop_on_error: Option<bool>,
    /// Config file from CASERUN_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            process_model: get_env_parse("PROCESS"),
            timeout_ms: get_env_parse("TIMEOUT"),
            max_agents: get_env_parse("AGENTS"),
            log_level: get_env_parse("LOG"),
            culture: get_env("CULTURE"),
            stop_on_error: get_env_bool("STOP_ON_ERROR"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.process_model.is_some()
            || self.timeout_ms.is_some()
            || self.max_agents.is_some()
            || self.log_level.is_some()
            || self.culture.is_some()
            || self.stop_on_error.is_some()
            || self.config_file.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_PROCESS:       {:?}", ENV_PREFIX, self.process_model);
        println!("  {}_TIMEOUT:       {:?}", ENV_PREFIX, self.timeout_ms);
        println!("  {}_AGENTS:        {:?}", ENV_PREFIX, self.max_agents);
        println!("  {}_LOG:           {:?}", ENV_PREFIX, self.log_level);
        println!("  {}_CULTURE:       {:?}", ENV_PREFIX, self.culture);
        println!("  {}_STOP_ON_ERROR: {:?}", ENV_PREFIX, self.stop_on_error);
        println!("  {}_CONFIG:        {:?}", ENV_PREFIX, self.config_file);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables in tests
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn process(mut self, model: ProcessModel) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_PROCESS"), model.to_string()));
        self
    }

    pub fn timeout(mut self, timeout_ms: u64) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_TIMEOUT"), timeout_ms.to_string()));
        self
    }

    pub fn agents(mut self, agents: usize) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_AGENTS"), agents.to_string()));
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_STOP_ON_ERROR"), stop.to_string()));
        self
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all CASERUN environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_PROCESS        Process model (InProcess, Separate, Multiple)");
    println!("  {ENV_PREFIX}_TIMEOUT        Default case timeout in milliseconds");
    println!("  {ENV_PREFIX}_AGENTS         Maximum agents running at once");
    println!("  {ENV_PREFIX}_LOG            Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_CULTURE        Default culture for test cases");
    println!("  {ENV_PREFIX}_STOP_ON_ERROR  Stop at the first failing case (true/false)");
    println!("  {ENV_PREFIX}_CONFIG         Path to configuration file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_PROCESS=Multiple");
    println!("  caserun run mock-assembly.dll");
}
