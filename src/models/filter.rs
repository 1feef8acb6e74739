//! Test selection filters

use serde::{Deserialize, Serialize};

use super::test_node::{TestId, TestNode};

/// Predicate over test nodes
///
/// A node passes when it matches directly, when one of its ancestors
/// matches, or when one of its descendants matches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TestFilter {
    #[default]
    Empty,
    Id(TestId),
    FullName(String),
    Name(String),
    /// Full name starts with the given text
    Prefix(String),
    Category(String),
    And(Vec<TestFilter>),
    Or(Vec<TestFilter>),
    Not(Box<TestFilter>),
}

impl TestFilter {
    pub fn is_empty(&self) -> bool {
        matches!(self, TestFilter::Empty)
    }

    pub fn and(self, other: TestFilter) -> TestFilter {
        match (self, other) {
            (TestFilter::Empty, f) | (f, TestFilter::Empty) => f,
            (TestFilter::And(mut items), f) => {
                items.push(f);
                TestFilter::And(items)
            }
            (a, b) => TestFilter::And(vec![a, b]),
        }
    }

    pub fn or(self, other: TestFilter) -> TestFilter {
        match (self, other) {
            (TestFilter::Or(mut items), f) => {
                items.push(f);
                TestFilter::Or(items)
            }
            (a, b) => TestFilter::Or(vec![a, b]),
        }
    }

    pub fn negate(self) -> TestFilter {
        TestFilter::Not(Box::new(self))
    }

    /// Compose the filter used by the command line
    ///
    /// Names select by exact full name or prefix, included categories are
    /// or-ed, excluded categories are and-ed as negations.
    pub fn from_parts(tests: &[String], include: &[String], exclude: &[String]) -> TestFilter {
        let mut filter = TestFilter::Empty;

        if !tests.is_empty() {
            let names = tests
                .iter()
                .map(|t| TestFilter::Prefix(t.clone()))
                .collect::<Vec<_>>();
            filter = filter.and(collapse_or(names));
        }
        if !include.is_empty() {
            let cats = include
                .iter()
                .map(|c| TestFilter::Category(c.clone()))
                .collect::<Vec<_>>();
            filter = filter.and(collapse_or(cats));
        }
        for cat in exclude {
            filter = filter.and(TestFilter::Category(cat.clone()).negate());
        }
        filter
    }

    /// Direct match on the node itself
    pub fn matches(&self, node: &TestNode) -> bool {
        match self {
            TestFilter::Empty => true,
            TestFilter::Id(id) => node.id() == *id,
            TestFilter::FullName(name) => node.full_name() == name,
            TestFilter::Name(name) => node.name() == name,
            TestFilter::Prefix(prefix) => prefix_matches(node.full_name(), prefix),
            TestFilter::Category(cat) => node.categories().iter().any(|c| c == cat),
            TestFilter::And(items) => items.iter().all(|f| f.matches(node)),
            TestFilter::Or(items) => items.iter().any(|f| f.matches(node)),
            TestFilter::Not(inner) => !inner.matches(node),
        }
    }

    pub fn match_parent(&self, node: &TestNode) -> bool {
        node.ancestors().any(|parent| self.matches(&parent))
    }

    pub fn match_descendant(&self, node: &TestNode) -> bool {
        node.children()
            .iter()
            .any(|child| self.matches(child) || self.match_descendant(child))
    }

    /// Whether the node is selected for the run
    pub fn pass(&self, node: &TestNode) -> bool {
        match self {
            TestFilter::Empty => true,
            TestFilter::And(items) => items.iter().all(|f| f.pass(node)),
            TestFilter::Or(items) => items.iter().any(|f| f.pass(node)),
            TestFilter::Not(inner) => !inner.matches(node) && !inner.match_parent(node),
            other => other.matches(node) || other.match_parent(node) || other.match_descendant(node),
        }
    }

    /// Whether the node was selected by name rather than by inclusion
    ///
    /// Explicit nodes only run when this holds.
    pub fn is_explicit_match(&self, node: &TestNode) -> bool {
        match self {
            TestFilter::Empty | TestFilter::Not(_) => false,
            TestFilter::And(items) => {
                !items.is_empty() && items.iter().all(|f| f.is_explicit_match(node) || is_negation(f))
                    && items.iter().any(|f| f.is_explicit_match(node))
            }
            TestFilter::Or(items) => items.iter().any(|f| f.is_explicit_match(node)),
            other => other.matches(node) || other.match_descendant(node),
        }
    }
}

fn prefix_matches(full_name: &str, prefix: &str) -> bool {
    full_name == prefix
        || full_name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('('))
}

fn is_negation(filter: &TestFilter) -> bool {
    matches!(filter, TestFilter::Not(_))
}

fn collapse_or(mut items: Vec<TestFilter>) -> TestFilter {
    if items.len() == 1 {
        items.remove(0)
    } else {
        TestFilter::Or(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fault::TestOutcome;
    use crate::models::test_node::{Fixture, TestNodeBuilder};
    use std::sync::Arc;

    fn pass(_: &Fixture) -> TestOutcome {
        Ok(())
    }

    fn tree() -> Arc<TestNode> {
        TestNodeBuilder::assembly("lib")
            .child(
                TestNodeBuilder::fixture("Fast")
                    .category("Quick")
                    .child(TestNodeBuilder::case("One", pass))
                    .child(TestNodeBuilder::case("Two", pass).category("Db")),
            )
            .child(TestNodeBuilder::fixture("Slow").child(TestNodeBuilder::case("Three", pass)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_filter_passes_everything() {
        let root = tree();
        assert_eq!(root.test_case_count(&TestFilter::Empty), 3);
    }

    #[test]
    fn test_category_passes_through_parent_and_descendant() {
        let root = tree();
        let filter = TestFilter::Category("Db".into());
        assert_eq!(root.test_case_count(&filter), 1);
        assert!(filter.pass(&root));

        let quick = TestFilter::Category("Quick".into());
        assert_eq!(root.test_case_count(&quick), 2);
    }

    #[test]
    fn test_not_excludes_subtree() {
        let root = tree();
        let filter = TestFilter::Category("Quick".into()).negate();
        assert_eq!(root.test_case_count(&filter), 1);
    }

    #[test]
    fn test_prefix_respects_name_boundaries() {
        let root = tree();
        assert_eq!(root.test_case_count(&TestFilter::Prefix("lib.Fast".into())), 2);
        assert_eq!(root.test_case_count(&TestFilter::Prefix("lib.Fa".into())), 0);
    }

    #[test]
    fn test_explicit_match() {
        let root = tree();
        let slow = &root.children()[1];
        let filter = TestFilter::FullName("lib.Slow.Three".into());
        assert!(filter.is_explicit_match(slow));
        assert!(!TestFilter::Empty.is_explicit_match(slow));
        assert!(!TestFilter::Category("Quick".into()).is_explicit_match(slow));
    }

    #[test]
    fn test_from_parts() {
        let filter = TestFilter::from_parts(&["lib.Fast".into()], &[], &["Db".into()]);
        let root = tree();
        assert_eq!(root.test_case_count(&filter), 1);
        assert_eq!(TestFilter::from_parts(&[], &[], &[]), TestFilter::Empty);
    }

    #[test]
    fn test_serde_shape() {
        let filter = TestFilter::Category("Db".into()).negate();
        let json = serde_json::to_string(&filter).unwrap();
        let back: TestFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }
}
