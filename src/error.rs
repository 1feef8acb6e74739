//! Engine error types
//!
//! Infrastructure failures only. Faults raised by test code are never
//! reported through this type; they become result nodes instead.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by runners, drivers, agents and project expansion
#[derive(Debug, Error)]
pub enum EngineError {
    /// An operation needed a loaded package
    #[error("No test package is loaded")]
    NotLoaded,

    /// No driver factory accepted the file
    #[error("No test driver is available for {0}")]
    NoDriver(String),

    /// A driver failed to load its file
    #[error("Failed to load {path}: {message}")]
    Load { path: String, message: String },

    /// Discovery produced an unusable tree
    #[error("Discovery failed for {path}: {message}")]
    Discovery { path: String, message: String },

    /// The package settings cannot be honoured
    #[error("Invalid test package: {0}")]
    InvalidPackage(String),

    /// A project file could not be expanded
    #[error("Project error in {}: {message}", path.display())]
    Project { path: PathBuf, message: String },

    /// No agent could be launched
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// The agent did not report ready in time
    #[error("Agent did not start within {0:?}")]
    AgentTimeout(Duration),

    /// The remote-call channel failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote side reported a failure
    #[error("Remote error: {0}")]
    Remote(String),

    /// A background worker ended without producing an outcome
    #[error("Worker task failed: {0}")]
    TaskFailed(String),

    /// A run was requested while another one is in flight
    #[error("A test run is already in progress")]
    RunInProgress,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    pub fn load(path: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn discovery(path: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Discovery {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for failures that make a package unusable rather than a single call
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Load { .. }
                | EngineError::Discovery { .. }
                | EngineError::NoDriver(_)
                | EngineError::AgentUnavailable(_)
                | EngineError::AgentTimeout(_)
        )
    }
}

/// Result alias used across the engine
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::load("a.dll", "bad image");
        assert_eq!(err.to_string(), "Failed to load a.dll: bad image");
        assert!(err.is_load_failure());
        assert!(!EngineError::NotLoaded.is_load_failure());
    }

    #[test]
    fn test_project_error_display() {
        let err = EngineError::Project {
            path: PathBuf::from("x.caseproj"),
            message: "missing assemblies".to_string(),
        };
        assert!(err.to_string().contains("x.caseproj"));
    }
}
