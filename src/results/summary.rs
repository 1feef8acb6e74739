//! Load summaries and explored test descriptions

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{NodeKind, PropertyBag, RunState, TestFilter, TestId, TestNode};

/// Outcome of loading one package
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub name: String,
    pub path: Option<String>,
    pub test_case_count: usize,
    /// Set when this package failed to load
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LoadSummary>,
}

impl LoadSummary {
    pub fn loaded(name: impl Into<String>, path: Option<String>, test_case_count: usize) -> Self {
        Self {
            name: name.into(),
            path,
            test_case_count,
            ..Default::default()
        }
    }

    pub fn failed(name: impl Into<String>, path: Option<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Combine per-file summaries under one named parent
    pub fn merge(name: impl Into<String>, children: Vec<LoadSummary>) -> Self {
        if children.len() == 1 {
            let mut only = children;
            return only.remove(0);
        }
        Self {
            name: name.into(),
            path: None,
            test_case_count: children.iter().map(|c| c.test_case_count).sum(),
            error: None,
            children,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.error.is_none()
    }

    /// Errors reported anywhere in this summary
    pub fn errors(&self) -> Vec<String> {
        let mut errors: Vec<String> = self.error.iter().cloned().collect();
        for child in &self.children {
            errors.extend(child.errors());
        }
        errors
    }
}

/// Snapshot of a test node, as returned by explore
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestDescription {
    pub id: TestId,
    pub name: String,
    pub full_name: String,
    pub kind: NodeKind,
    pub run_state: Option<RunState>,
    #[serde(default, skip_serializing_if = "PropertyBag::is_empty")]
    pub properties: PropertyBag,
    pub test_case_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestDescription>,
}

impl TestDescription {
    /// Describe the part of the tree that passes the filter
    pub fn from_node(node: &Arc<TestNode>, filter: &TestFilter) -> Self {
        let children = node
            .children()
            .iter()
            .filter(|child| filter.pass(child))
            .map(|child| TestDescription::from_node(child, filter))
            .collect();

        Self {
            id: node.id(),
            name: node.name().to_string(),
            full_name: node.full_name().to_string(),
            kind: node.kind(),
            run_state: Some(node.run_state()),
            properties: node.properties(),
            test_case_count: node.test_case_count(filter),
            children,
        }
    }

    /// Join several trees under one synthetic root
    pub fn merge(name: impl Into<String>, children: Vec<TestDescription>) -> Self {
        if children.len() == 1 {
            let mut only = children;
            return only.remove(0);
        }
        let name = name.into();
        Self {
            id: 0,
            full_name: name.clone(),
            name,
            kind: NodeKind::Suite,
            run_state: None,
            properties: PropertyBag::new(),
            test_case_count: children.iter().map(|c| c.test_case_count).sum(),
            children,
        }
    }

    /// Full names of every case in the description
    pub fn case_names(&self) -> Vec<String> {
        if self.kind == NodeKind::Case {
            vec![self.full_name.clone()]
        } else {
            self.children.iter().flat_map(|c| c.case_names()).collect()
        }
    }
}
