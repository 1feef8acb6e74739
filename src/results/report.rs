//! Run-level report
//!
//! Wraps the merged result tree of one run with package identity and timing.
//! Only the master runner produces this wrapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

use super::node::{ResultNode, ResultStatus};
use crate::error::EngineResult;
use crate::models::TestPackage;

/// Final outcome of one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestRunReport {
    /// Unique run ID
    pub run_id: String,

    /// Requested package name
    pub package_name: String,

    /// Requested package path, absent for multi-file runs
    pub package_path: Option<String>,

    pub engine_version: String,

    pub start_time: DateTime<Utc>,

    pub end_time: DateTime<Utc>,

    /// Total elapsed time in milliseconds
    pub duration_ms: u64,

    /// Merged result tree
    pub result: ResultNode,
}

impl TestRunReport {
    pub fn new(package: &TestPackage, result: ResultNode, start_time: DateTime<Utc>) -> Self {
        let end_time = Utc::now();
        Self {
            run_id: generate_run_id(),
            package_name: package.display_name(),
            package_path: package.path().map(|p| p.display().to_string()),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds().max(0) as u64,
            result,
        }
    }

    pub fn status(&self) -> ResultStatus {
        self.result.status
    }

    pub fn total(&self) -> usize {
        self.result.total_count()
    }

    pub fn passed(&self) -> usize {
        self.result.pass_count
    }

    pub fn failed(&self) -> usize {
        self.result.fail_count
    }

    pub fn skipped(&self) -> usize {
        self.result.skip_count
    }

    pub fn inconclusive(&self) -> usize {
        self.result.inconclusive_count
    }

    pub fn pass_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.passed() as f64 / total as f64) * 100.0
        }
    }

    /// True when nothing failed, errored or was cancelled
    pub fn is_success(&self) -> bool {
        !matches!(
            self.status(),
            ResultStatus::Failed | ResultStatus::Error | ResultStatus::Cancelled
        )
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        debug!("Saved run report to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// Generate unique run ID
fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeKind;
    use tempfile::TempDir;

    fn sample() -> TestRunReport {
        let mut root = ResultNode::synthetic("calc.dll", NodeKind::Suite);
        let mut case = ResultNode::synthetic("calc.dll.Adds", NodeKind::Case);
        case.status = ResultStatus::Passed;
        root.add_child(case);
        TestRunReport::new(&TestPackage::new("calc.dll"), root, Utc::now())
    }

    #[test]
    fn test_report_counts() {
        let report = sample();
        assert_eq!(report.package_name, "calc.dll");
        assert_eq!(report.total(), 1);
        assert_eq!(report.pass_rate(), 100.0);
        assert!(report.is_success());
        assert!(report.end_time >= report.start_time);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let report = sample();
        report.save(&path).unwrap();
        assert_eq!(TestRunReport::load(&path).unwrap(), report);
    }
}
