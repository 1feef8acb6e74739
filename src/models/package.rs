//! Test package
//!
//! A named bundle of test files plus a settings map. Packages nest: the root
//! of a multi-file run is an anonymous package holding one sub-package per
//! file or project.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Well-known package setting names
pub mod settings {
    pub const PROCESS_MODEL: &str = "ProcessModel";
    pub const RUNTIME_FRAMEWORK: &str = "RuntimeFramework";
    /// Default case timeout in milliseconds
    pub const DEFAULT_TIMEOUT: &str = "DefaultTimeout";
    pub const WORK_DIRECTORY: &str = "WorkDirectory";
    /// Seconds to wait for an agent to report ready
    pub const AGENT_TIMEOUT: &str = "AgentTimeout";
    pub const MAX_AGENTS: &str = "MaxAgents";
    pub const DEBUG_AGENT: &str = "DebugAgent";
    pub const AGENT_ARGS: &str = "AgentArgs";
    pub const STOP_ON_ERROR: &str = "StopOnError";
    pub const DEFAULT_CULTURE: &str = "DefaultCulture";
}

/// Where the tests of a package execute
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessModel {
    /// In the calling process
    #[default]
    InProcess,
    /// All files in one separate agent
    Separate,
    /// One agent per file
    Multiple,
}

impl fmt::Display for ProcessModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessModel::InProcess => write!(f, "InProcess"),
            ProcessModel::Separate => write!(f, "Separate"),
            ProcessModel::Multiple => write!(f, "Multiple"),
        }
    }
}

impl std::str::FromStr for ProcessModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inprocess" | "in-process" | "in_process" => Ok(ProcessModel::InProcess),
            "separate" => Ok(ProcessModel::Separate),
            "multiple" => Ok(ProcessModel::Multiple),
            _ => Err(format!("Unknown process model: {s}")),
        }
    }
}

/// A bundle of test files and settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPackage {
    pub name: String,
    /// File this package stands for; absent for the anonymous root
    pub full_name: Option<PathBuf>,
    #[serde(default)]
    pub sub_packages: Vec<TestPackage>,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl TestPackage {
    /// Package for a single file
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            full_name: Some(path.to_path_buf()),
            sub_packages: Vec::new(),
            settings: BTreeMap::new(),
        }
    }

    /// Anonymous root with one sub-package per file
    pub fn from_files<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut root = Self::default();
        for path in paths {
            root.add_sub_package(Self::new(path));
        }
        root
    }

    /// Add a sub-package; it inherits any setting it does not define
    pub fn add_sub_package(&mut self, mut package: TestPackage) {
        for (key, value) in &self.settings {
            package
                .settings
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self.sub_packages.push(package);
    }

    /// Set a value here and on every sub-package that lacks it
    pub fn add_setting(&mut self, key: impl Into<String>, value: impl Serialize) {
        let key = key.into();
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        for sub in &mut self.sub_packages {
            if !sub.settings.contains_key(&key) {
                sub.add_setting(key.clone(), &value);
            }
        }
        self.settings.insert(key, value);
    }

    /// Typed setting lookup; values of the wrong shape read as absent
    pub fn get_setting<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.settings
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_setting_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_setting(key).unwrap_or(default)
    }

    pub fn has_setting(&self, key: &str) -> bool {
        self.settings.contains_key(key)
    }

    pub fn process_model(&self) -> ProcessModel {
        self.get_setting::<String>(settings::PROCESS_MODEL)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.full_name.as_deref()
    }

    /// Display name: the file path when there is one
    pub fn display_name(&self) -> String {
        match &self.full_name {
            Some(path) => path.display().to_string(),
            None if !self.name.is_empty() => self.name.clone(),
            None => "<anonymous>".to_string(),
        }
    }

    /// Packages that stand for files, depth first
    pub fn leaf_packages(&self) -> Vec<&TestPackage> {
        if self.sub_packages.is_empty() {
            if self.full_name.is_some() {
                vec![self]
            } else {
                Vec::new()
            }
        } else {
            self.sub_packages
                .iter()
                .flat_map(|p| p.leaf_packages())
                .collect()
        }
    }
}
