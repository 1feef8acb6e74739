//! YAML project manifests
//!
//! ```yaml
//! assemblies:
//!   - bin/calc.dll
//!   - bin/strings.dll
//! settings:
//!   ProcessModel: Multiple
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Project, ProjectLoader};
use crate::error::{EngineError, EngineResult};

/// File name endings recognised as project manifests
pub const PROJECT_EXTENSIONS: &[&str] = &[".caseproj", ".caseproj.yaml", ".caseproj.yml"];

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    assemblies: Vec<PathBuf>,
    #[serde(default)]
    settings: BTreeMap<String, Value>,
}

/// Loader for `*.caseproj` manifests
#[derive(Clone, Copy, Debug, Default)]
pub struct YamlProjectLoader;

impl ProjectLoader for YamlProjectLoader {
    fn can_load(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        PROJECT_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
    }

    fn load(&self, path: &Path) -> EngineResult<Project> {
        let project_error = |message: String| EngineError::Project {
            path: path.to_path_buf(),
            message,
        };

        let content = fs::read_to_string(path).map_err(|e| project_error(e.to_string()))?;
        let manifest: Manifest =
            serde_yaml::from_str(&content).map_err(|e| project_error(e.to_string()))?;
        if manifest.assemblies.is_empty() {
            return Err(project_error("project lists no assemblies".to_string()));
        }

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let assemblies = manifest
            .assemblies
            .into_iter()
            .map(|a| if a.is_absolute() { a } else { base.join(a) })
            .collect();

        Ok(Project {
            path: path.to_path_buf(),
            assemblies,
            settings: manifest.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_can_load_by_extension() {
        let loader = YamlProjectLoader;
        assert!(loader.can_load(Path::new("tests/all.caseproj")));
        assert!(loader.can_load(Path::new("ALL.CASEPROJ.YAML")));
        assert!(!loader.can_load(Path::new("calc.dll")));
    }

    #[test]
    fn test_missing_file_and_empty_manifest() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("none.caseproj");
        assert!(matches!(
            YamlProjectLoader.load(&missing),
            Err(EngineError::Project { .. })
        ));

        let empty = dir.path().join("empty.caseproj");
        fs::write(&empty, "settings: {}\n").unwrap();
        let err = YamlProjectLoader.load(&empty).unwrap_err();
        assert!(err.to_string().contains("no assemblies"));
    }
}
