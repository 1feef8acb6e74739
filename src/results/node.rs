//! Result nodes and the aggregation fold
//!
//! A result mirrors the shape of the test node it was produced from. Suite
//! results fold their children's statuses and counts as children complete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{names, NodeKind, PropertyBag, TestFault, TestId, TestNode};

/// Outcome of running one node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    #[default]
    Inconclusive,
    Passed,
    Failed,
    Error,
    Skipped,
    Ignored,
    Cancelled,
}

impl ResultStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            ResultStatus::Passed => "✓",
            ResultStatus::Failed => "✗",
            ResultStatus::Error => "!",
            ResultStatus::Skipped | ResultStatus::Ignored => "○",
            ResultStatus::Inconclusive => "?",
            ResultStatus::Cancelled => "⊘",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultStatus::Passed)
    }

    /// Failed or Error
    pub fn is_failure(&self) -> bool {
        matches!(self, ResultStatus::Failed | ResultStatus::Error)
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, ResultStatus::Skipped | ResultStatus::Ignored)
    }

    /// Position in the suite status join; skip-like statuses never take part
    fn rank(&self) -> Option<u8> {
        match self {
            ResultStatus::Inconclusive => Some(0),
            ResultStatus::Passed => Some(1),
            ResultStatus::Failed => Some(2),
            ResultStatus::Error => Some(3),
            ResultStatus::Cancelled => Some(4),
            ResultStatus::Skipped | ResultStatus::Ignored => None,
        }
    }

    /// What a completed child contributes to its parent's status
    fn contribution(&self) -> Option<ResultStatus> {
        match self {
            ResultStatus::Passed => Some(ResultStatus::Passed),
            ResultStatus::Failed | ResultStatus::Error => Some(ResultStatus::Failed),
            ResultStatus::Cancelled => Some(ResultStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultStatus::Inconclusive => write!(f, "Inconclusive"),
            ResultStatus::Passed => write!(f, "Passed"),
            ResultStatus::Failed => write!(f, "Failed"),
            ResultStatus::Error => write!(f, "Error"),
            ResultStatus::Skipped => write!(f, "Skipped"),
            ResultStatus::Ignored => write!(f, "Ignored"),
            ResultStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Stage at which a non-passing status was recorded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureSite {
    #[default]
    Test,
    SetUp,
    TearDown,
    Parent,
    Child,
}

impl fmt::Display for FailureSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureSite::Test => write!(f, "Test"),
            FailureSite::SetUp => write!(f, "SetUp"),
            FailureSite::TearDown => write!(f, "TearDown"),
            FailureSite::Parent => write!(f, "Parent"),
            FailureSite::Child => write!(f, "Child"),
        }
    }
}

/// Outcome record for one executed node
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultNode {
    pub id: TestId,
    pub name: String,
    pub full_name: String,
    pub kind: NodeKind,
    pub status: ResultStatus,
    pub site: FailureSite,
    pub message: Option<String>,
    pub trace: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "PropertyBag::is_empty")]
    pub properties: PropertyBag,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub assert_count: u64,
    pub pass_count: usize,
    pub fail_count: usize,
    pub skip_count: usize,
    pub inconclusive_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ResultNode>,
}

impl ResultNode {
    /// Fresh result for a node, status Inconclusive
    pub fn new(node: &TestNode) -> Self {
        Self {
            id: node.id(),
            name: node.name().to_string(),
            full_name: node.full_name().to_string(),
            kind: node.kind(),
            properties: node.properties(),
            ..Default::default()
        }
    }

    /// Result not backed by a discovered node, such as a merged root
    pub fn synthetic(name: impl Into<String>, kind: NodeKind) -> Self {
        let name = name.into();
        Self {
            full_name: name.clone(),
            name,
            kind,
            ..Default::default()
        }
    }

    /// Assembly-level result for a package that could not be loaded
    pub fn load_failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::synthetic(name, NodeKind::Suite);
        result.properties.set(names::TYPE, "Assembly");
        result.set_status(ResultStatus::Error, Some(message.into()));
        result.site = FailureSite::SetUp;
        result
    }

    /// Assembly-level result for a package skipped because the run was cancelled
    pub fn cancelled_assembly(name: impl Into<String>) -> Self {
        let mut result = Self::synthetic(name, NodeKind::Suite);
        result.properties.set(names::TYPE, "Assembly");
        result.set_status(
            ResultStatus::Cancelled,
            Some("Test cancelled by user".to_string()),
        );
        result
    }

    pub fn is_suite(&self) -> bool {
        self.kind.is_suite()
    }

    pub fn set_status(&mut self, status: ResultStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
    }

    pub fn with_site(mut self, site: FailureSite) -> Self {
        self.site = site;
        self
    }

    pub fn mark_started(&mut self) {
        self.start_time = Some(Utc::now());
    }

    /// Close the result, filling end time and duration from the start time
    pub fn mark_finished(&mut self) {
        let end = Utc::now();
        if let Some(start) = self.start_time {
            self.duration_ms = (end - start).num_milliseconds().max(0) as u64;
        }
        self.end_time = Some(end);
    }

    /// Convert a fault raised by user code into this result's status
    pub fn record_fault(&mut self, fault: &TestFault, site: FailureSite) {
        let fault = match fault {
            TestFault::FixtureConstruction(inner) => inner.as_ref(),
            other => other,
        };
        let (status, message) = match fault {
            TestFault::Assertion { message, .. } => (ResultStatus::Failed, Some(message.clone())),
            TestFault::Ignore { reason } => (ResultStatus::Ignored, Some(reason.clone())),
            TestFault::Inconclusive { message } => {
                (ResultStatus::Inconclusive, non_empty(message))
            }
            TestFault::Success { message } => (ResultStatus::Passed, message.clone()),
            TestFault::Cancelled { message } => (ResultStatus::Cancelled, non_empty(message)),
            TestFault::Defect { .. } | TestFault::FixtureConstruction(_) => {
                (ResultStatus::Error, Some(fault.to_string()))
            }
        };
        self.set_status(status, message);
        self.trace = fault.trace().map(str::to_string);
        self.site = site;
    }

    /// Merge a teardown fault into whatever was already recorded
    pub fn record_teardown_fault(&mut self, fault: &TestFault) {
        if self.status != ResultStatus::Cancelled {
            self.status = ResultStatus::Error;
        }
        let text = format!("TearDown : {fault}");
        self.message = Some(match self.message.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{text}"),
            _ => text,
        });
        if let Some(trace) = fault.trace() {
            let text = format!("--TearDown\n{trace}");
            self.trace = Some(match self.trace.take() {
                Some(existing) => format!("{existing}\n{text}"),
                None => text,
            });
        }
        self.site = FailureSite::TearDown;
    }

    /// Fold a completed child into this result
    pub fn add_child(&mut self, child: ResultNode) {
        self.assert_count += child.assert_count;
        self.fold_counts(&child);
        self.fold_status(&child);
        self.children.push(child);
    }

    fn fold_counts(&mut self, child: &ResultNode) {
        if child.is_suite() {
            self.pass_count += child.pass_count;
            self.fail_count += child.fail_count;
            self.skip_count += child.skip_count;
            self.inconclusive_count += child.inconclusive_count;
        } else {
            match child.status {
                ResultStatus::Passed => self.pass_count += 1,
                ResultStatus::Failed | ResultStatus::Error | ResultStatus::Cancelled => {
                    self.fail_count += 1
                }
                ResultStatus::Skipped | ResultStatus::Ignored => self.skip_count += 1,
                ResultStatus::Inconclusive => self.inconclusive_count += 1,
            }
        }
    }

    fn fold_status(&mut self, child: &ResultNode) {
        let Some(contribution) = child.status.contribution() else {
            return;
        };
        let (Some(current), Some(incoming)) = (self.status.rank(), contribution.rank()) else {
            return;
        };
        if incoming > current {
            self.status = contribution;
            match contribution {
                ResultStatus::Failed => {
                    self.site = FailureSite::Child;
                    self.message = Some("One or more child tests had errors".to_string());
                }
                ResultStatus::Cancelled => {
                    self.site = FailureSite::Child;
                    self.message = child.message.clone();
                }
                _ => {}
            }
        }
    }

    /// Recompute rollup counts from the children
    pub fn recount(&mut self) {
        self.pass_count = 0;
        self.fail_count = 0;
        self.skip_count = 0;
        self.inconclusive_count = 0;
        let children = std::mem::take(&mut self.children);
        for child in &children {
            self.fold_counts(child);
        }
        self.children = children;
    }

    /// Leaf cases accounted for in the rollup
    pub fn total_count(&self) -> usize {
        if self.is_suite() {
            self.pass_count + self.fail_count + self.skip_count + self.inconclusive_count
        } else {
            1
        }
    }

    /// Leaf results in pre-order
    pub fn leaves(&self) -> Vec<&ResultNode> {
        if self.is_suite() {
            self.children.iter().flat_map(|c| c.leaves()).collect()
        } else {
            vec![self]
        }
    }

    /// Pre-order search by full name
    pub fn find(&self, full_name: &str) -> Option<&ResultNode> {
        if self.full_name == full_name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(full_name))
    }

    pub fn is_assembly(&self) -> bool {
        self.properties.get(names::TYPE) == Some("Assembly")
    }
}

impl fmt::Display for ResultNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.full_name,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
