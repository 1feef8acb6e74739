//! Test node model
//!
//! The static tree supplied by discovery: suites, fixtures, parameterized
//! groups and cases. Identity is fixed at build time; only run state and
//! properties may change while commands are composed.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use super::fault::{TestFault, TestOutcome};
use super::filter::TestFilter;
use super::properties::{names, PropertyBag};
use crate::error::{EngineError, EngineResult};

/// Stable node identifier, unique within one tree
pub type TestId = u64;

/// Default first id handed out by [`TestNodeBuilder::build`]
pub const DEFAULT_ID_SEED: TestId = 1000;

/// Shape of a node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Suite,
    Fixture,
    ParameterizedGroup,
    Case,
}

impl NodeKind {
    pub fn is_suite(&self) -> bool {
        !matches!(self, NodeKind::Case)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Suite => write!(f, "Suite"),
            NodeKind::Fixture => write!(f, "Fixture"),
            NodeKind::ParameterizedGroup => write!(f, "ParameterizedGroup"),
            NodeKind::Case => write!(f, "Case"),
        }
    }
}

/// Whether and how a node may run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Runnable,
    NotRunnable,
    Ignored,
    Explicit,
    Skipped,
}

impl RunState {
    pub fn is_runnable(&self) -> bool {
        matches!(self, RunState::Runnable | RunState::Explicit)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Runnable => write!(f, "Runnable"),
            RunState::NotRunnable => write!(f, "NotRunnable"),
            RunState::Ignored => write!(f, "Ignored"),
            RunState::Explicit => write!(f, "Explicit"),
            RunState::Skipped => write!(f, "Skipped"),
        }
    }
}

/// A fixture instance shared by the hooks and cases beneath it
#[derive(Clone, Default)]
pub struct Fixture {
    instance: Option<Arc<dyn Any + Send + Sync>>,
}

impl Fixture {
    /// No instance, used for static fixtures and plain suites
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            instance: Some(Arc::new(value)),
        }
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.instance.as_deref()?.downcast_ref::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.instance.is_none()
    }
}

impl fmt::Debug for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixture")
            .field("has_instance", &self.instance.is_some())
            .finish()
    }
}

/// User code invoked against a fixture: case bodies and hooks
pub type TestFn = Arc<dyn Fn(&Fixture) -> TestOutcome + Send + Sync>;

/// Produces a fresh fixture instance
pub type FixtureFactory = Arc<dyn Fn() -> Result<Fixture, TestFault> + Send + Sync>;

/// Setup and teardown declared at one inheritance level
#[derive(Clone, Default)]
pub struct HookLevel {
    pub setup: Option<TestFn>,
    pub teardown: Option<TestFn>,
}

impl HookLevel {
    pub fn new(setup: Option<TestFn>, teardown: Option<TestFn>) -> Self {
        Self { setup, teardown }
    }
}

impl fmt::Debug for HookLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookLevel")
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

/// How an expected fault message is compared
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageMatch {
    #[default]
    Exact,
    Contains,
    StartsWith,
}

/// Fault a case is declared to raise
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedFault {
    /// Fault kind (error type name), any kind when absent
    pub kind: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub match_kind: MessageMatch,
}

impl ExpectedFault {
    pub fn of_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Default::default()
        }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>, match_kind: MessageMatch) -> Self {
        self.message = Some(message.into());
        self.match_kind = match_kind;
        self
    }

    pub fn message_matches(&self, actual: &str) -> bool {
        match &self.message {
            None => true,
            Some(expected) => match self.match_kind {
                MessageMatch::Exact => actual == expected,
                MessageMatch::Contains => actual.contains(expected.as_str()),
                MessageMatch::StartsWith => actual.starts_with(expected.as_str()),
            },
        }
    }

    pub fn describe(&self) -> String {
        self.kind.clone().unwrap_or_else(|| "Any fault".to_string())
    }
}

/// One unit of testing in the discovered tree
pub struct TestNode {
    id: TestId,
    name: String,
    full_name: String,
    kind: NodeKind,
    run_state: RwLock<RunState>,
    properties: RwLock<PropertyBag>,
    body: Option<TestFn>,
    fixture_factory: Option<FixtureFactory>,
    case_hooks: Vec<HookLevel>,
    one_time_hooks: Vec<HookLevel>,
    expected_fault: Option<ExpectedFault>,
    parent: Weak<TestNode>,
    children: Vec<Arc<TestNode>>,
}

impl TestNode {
    pub fn id(&self) -> TestId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_suite(&self) -> bool {
        self.kind.is_suite()
    }

    pub fn run_state(&self) -> RunState {
        *self.run_state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the run state during composition, recording why
    pub fn set_run_state(&self, state: RunState, reason: Option<&str>) {
        *self.run_state.write().unwrap_or_else(PoisonError::into_inner) = state;
        if let Some(reason) = reason {
            self.set_property(names::SKIP_REASON, reason);
        }
    }

    /// Snapshot of the property bag
    pub fn properties(&self) -> PropertyBag {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(str::to_string)
    }

    pub fn property_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_parsed(key)
    }

    pub fn set_property(&self, key: &str, value: &str) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(key, value);
    }

    pub fn categories(&self) -> Vec<String> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_all(names::CATEGORY)
            .to_vec()
    }

    pub fn skip_reason(&self) -> Option<String> {
        self.property(names::SKIP_REASON)
    }

    pub fn body(&self) -> Option<&TestFn> {
        self.body.as_ref()
    }

    pub fn fixture_factory(&self) -> Option<&FixtureFactory> {
        self.fixture_factory.as_ref()
    }

    /// Per-case hook levels declared on this node, base level first
    pub fn case_hooks(&self) -> &[HookLevel] {
        &self.case_hooks
    }

    /// One-time hook levels declared on this node, base level first
    pub fn one_time_hooks(&self) -> &[HookLevel] {
        &self.one_time_hooks
    }

    pub fn expected_fault(&self) -> Option<&ExpectedFault> {
        self.expected_fault.as_ref()
    }

    pub fn parent(&self) -> Option<Arc<TestNode>> {
        self.parent.upgrade()
    }

    pub fn children(&self) -> &[Arc<TestNode>] {
        &self.children
    }

    /// Parents from the closest outward
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: self.parent(),
        }
    }

    /// Per-case hooks of the nearest enclosing fixture
    pub fn fixture_case_hooks(&self) -> Vec<HookLevel> {
        self.ancestors()
            .find(|node| node.kind == NodeKind::Fixture)
            .map(|fixture| fixture.case_hooks.clone())
            .unwrap_or_default()
    }

    /// First value of `key` on this node or its closest ancestor carrying it
    pub fn inherited_property<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.property_parsed(key)
            .or_else(|| self.ancestors().find_map(|node| node.property_parsed(key)))
    }

    /// Number of cases beneath this node that pass the filter
    pub fn test_case_count(&self, filter: &TestFilter) -> usize {
        if self.is_suite() {
            self.children
                .iter()
                .map(|child| child.test_case_count(filter))
                .sum()
        } else if filter.pass(self) {
            1
        } else {
            0
        }
    }

    /// Pre-order search by id
    pub fn find(self: &Arc<Self>, id: TestId) -> Option<Arc<TestNode>> {
        if self.id == id {
            return Some(Arc::clone(self));
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Visit this node and every descendant in pre-order
    pub fn walk(&self, visit: &mut dyn FnMut(&TestNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

impl fmt::Debug for TestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestNode")
            .field("id", &self.id)
            .field("full_name", &self.full_name)
            .field("kind", &self.kind)
            .field("run_state", &self.run_state())
            .field("children", &self.children.len())
            .finish()
    }
}

/// Iterator over a node's ancestors
pub struct Ancestors {
    next: Option<Arc<TestNode>>,
}

impl Iterator for Ancestors {
    type Item = Arc<TestNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

/// Builds a node tree with parent links and sequential ids
pub struct TestNodeBuilder {
    name: String,
    kind: NodeKind,
    run_state: RunState,
    properties: PropertyBag,
    body: Option<TestFn>,
    fixture_factory: Option<FixtureFactory>,
    case_hooks: Vec<HookLevel>,
    one_time_hooks: Vec<HookLevel>,
    expected_fault: Option<ExpectedFault>,
    children: Vec<TestNodeBuilder>,
}

impl TestNodeBuilder {
    fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            run_state: RunState::Runnable,
            properties: PropertyBag::new(),
            body: None,
            fixture_factory: None,
            case_hooks: Vec::new(),
            one_time_hooks: Vec::new(),
            expected_fault: None,
            children: Vec::new(),
        }
    }

    pub fn suite(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Suite)
    }

    /// Top-level suite representing one test file
    pub fn assembly(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Suite).property(names::TYPE, "Assembly")
    }

    pub fn fixture(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Fixture)
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::ParameterizedGroup)
    }

    pub fn case<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Fixture) -> TestOutcome + Send + Sync + 'static,
    {
        let mut builder = Self::new(name, NodeKind::Case);
        builder.body = Some(Arc::new(body));
        builder
    }

    pub fn child(mut self, child: TestNodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = TestNodeBuilder>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn run_state(mut self, state: RunState) -> Self {
        self.run_state = state;
        self
    }

    pub fn ignore(self, reason: impl Into<String>) -> Self {
        self.run_state(RunState::Ignored)
            .property(names::SKIP_REASON, reason)
    }

    pub fn skip(self, reason: impl Into<String>) -> Self {
        self.run_state(RunState::Skipped)
            .property(names::SKIP_REASON, reason)
    }

    pub fn not_runnable(self, reason: impl Into<String>) -> Self {
        self.run_state(RunState::NotRunnable)
            .property(names::SKIP_REASON, reason)
    }

    pub fn explicit(self) -> Self {
        self.run_state(RunState::Explicit)
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.add(key, value);
        self
    }

    pub fn category(self, category: impl Into<String>) -> Self {
        self.property(names::CATEGORY, category)
    }

    pub fn description(self, text: impl Into<String>) -> Self {
        self.property(names::DESCRIPTION, text)
    }

    pub fn timeout_ms(self, ms: u64) -> Self {
        self.property(names::TIMEOUT, ms.to_string())
    }

    pub fn max_time_ms(self, ms: u64) -> Self {
        self.property(names::MAX_TIME, ms.to_string())
    }

    pub fn repeat(self, count: u32) -> Self {
        self.property(names::REPEAT, count.to_string())
    }

    pub fn requires_thread(self) -> Self {
        self.property(names::REQUIRES_THREAD, "true")
    }

    pub fn order(self, order: i32) -> Self {
        self.property(names::ORDER, order.to_string())
    }

    pub fn culture(self, culture: impl Into<String>) -> Self {
        self.property(names::SET_CULTURE, culture)
    }

    /// Add a per-case hook level; levels are base-first
    pub fn level(mut self, setup: Option<TestFn>, teardown: Option<TestFn>) -> Self {
        self.case_hooks.push(HookLevel::new(setup, teardown));
        self
    }

    /// Per-case setup at the most derived level
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&Fixture) -> TestOutcome + Send + Sync + 'static,
    {
        place_hook(&mut self.case_hooks, Arc::new(f), true);
        self
    }

    /// Per-case teardown at the most derived level
    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&Fixture) -> TestOutcome + Send + Sync + 'static,
    {
        place_hook(&mut self.case_hooks, Arc::new(f), false);
        self
    }

    /// Add a one-time hook level; levels are base-first
    pub fn one_time_level(mut self, setup: Option<TestFn>, teardown: Option<TestFn>) -> Self {
        self.one_time_hooks.push(HookLevel::new(setup, teardown));
        self
    }

    pub fn one_time_setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&Fixture) -> TestOutcome + Send + Sync + 'static,
    {
        place_hook(&mut self.one_time_hooks, Arc::new(f), true);
        self
    }

    pub fn one_time_teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&Fixture) -> TestOutcome + Send + Sync + 'static,
    {
        place_hook(&mut self.one_time_hooks, Arc::new(f), false);
        self
    }

    /// Construct a fresh instance each time the fixture runs
    pub fn fixture_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Fixture, TestFault> + Send + Sync + 'static,
    {
        self.fixture_factory = Some(Arc::new(factory));
        self
    }

    pub fn expect_fault(mut self, expected: ExpectedFault) -> Self {
        self.expected_fault = Some(expected);
        self
    }

    /// Build with ids starting at [`DEFAULT_ID_SEED`]
    pub fn build(self) -> EngineResult<Arc<TestNode>> {
        self.build_with_seed(DEFAULT_ID_SEED)
    }

    /// Build, assigning ids in pre-order from `seed`
    pub fn build_with_seed(self, seed: TestId) -> EngineResult<Arc<TestNode>> {
        let mut next_id = seed;
        let root = self.into_node(Weak::new(), None, &mut next_id);

        let mut seen = HashSet::new();
        let mut duplicate = None;
        root.walk(&mut |node| {
            if !seen.insert(node.full_name().to_string()) && duplicate.is_none() {
                duplicate = Some(node.full_name().to_string());
            }
        });

        match duplicate {
            Some(name) => Err(EngineError::discovery(
                root.full_name(),
                format!("duplicate full name '{name}'"),
            )),
            None => Ok(root),
        }
    }

    fn into_node(
        self,
        parent: Weak<TestNode>,
        parent_info: Option<(&str, &str, NodeKind)>,
        next_id: &mut TestId,
    ) -> Arc<TestNode> {
        let id = *next_id;
        *next_id += 1;

        let full_name = match parent_info {
            // Cases of a parameterized group extend the group's own name
            Some((parent_full, parent_name, NodeKind::ParameterizedGroup))
                if self.name.starts_with(parent_name) =>
            {
                format!("{parent_full}{}", &self.name[parent_name.len()..])
            }
            Some((parent_full, _, _)) => format!("{parent_full}.{}", self.name),
            None => self.name.clone(),
        };

        let TestNodeBuilder {
            name,
            kind,
            run_state,
            properties,
            body,
            fixture_factory,
            case_hooks,
            one_time_hooks,
            expected_fault,
            children,
        } = self;

        Arc::new_cyclic(|me| {
            let children = children
                .into_iter()
                .map(|child| child.into_node(me.clone(), Some((&full_name, &name, kind)), next_id))
                .collect();

            TestNode {
                id,
                name,
                full_name,
                kind,
                run_state: RwLock::new(run_state),
                properties: RwLock::new(properties),
                body,
                fixture_factory,
                case_hooks,
                one_time_hooks,
                expected_fault,
                parent,
                children,
            }
        })
    }
}

fn place_hook(levels: &mut Vec<HookLevel>, hook: TestFn, is_setup: bool) {
    let slot_free = levels.last().map(|level| {
        if is_setup {
            level.setup.is_none()
        } else {
            level.teardown.is_none()
        }
    });
    if slot_free != Some(true) {
        levels.push(HookLevel::default());
    }
    if let Some(level) = levels.last_mut() {
        if is_setup {
            level.setup = Some(hook);
        } else {
            level.teardown = Some(hook);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(_: &Fixture) -> TestOutcome {
        Ok(())
    }

    fn sample() -> Arc<TestNode> {
        TestNodeBuilder::assembly("calc.dll")
            .child(
                TestNodeBuilder::fixture("CalcTests")
                    .category("Math")
                    .timeout_ms(250)
                    .setup(pass)
                    .teardown(pass)
                    .child(TestNodeBuilder::case("Adds", pass))
                    .child(
                        TestNodeBuilder::group("Divide")
                            .child(TestNodeBuilder::case("Divide(4,2)", pass))
                            .child(TestNodeBuilder::case("Divide(9,3)", pass)),
                    ),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_ids_and_full_names() {
        let root = sample();
        assert_eq!(root.id(), DEFAULT_ID_SEED);
        let fixture = &root.children()[0];
        assert_eq!(fixture.full_name(), "calc.dll.CalcTests");
        assert_eq!(fixture.children()[0].full_name(), "calc.dll.CalcTests.Adds");

        let group = &fixture.children()[1];
        assert_eq!(group.full_name(), "calc.dll.CalcTests.Divide");
        assert_eq!(group.children()[0].full_name(), "calc.dll.CalcTests.Divide(4,2)");

        let mut ids = Vec::new();
        root.walk(&mut |n| ids.push(n.id()));
        assert_eq!(ids, (1000..1006).collect::<Vec<_>>());
    }

    #[test]
    fn test_children_prefixed_by_parent() {
        let root = sample();
        root.walk(&mut |node| {
            for child in node.children() {
                assert!(child.full_name().starts_with(node.full_name()));
            }
        });
    }

    #[test]
    fn test_parent_lookup_and_inheritance() {
        let root = sample();
        let case = root.find(1004).unwrap();
        assert_eq!(case.name(), "Divide(4,2)");
        assert_eq!(case.parent().unwrap().kind(), NodeKind::ParameterizedGroup);
        assert_eq!(case.inherited_property::<u64>(names::TIMEOUT), Some(250));
        assert_eq!(case.fixture_case_hooks().len(), 1);
        assert_eq!(case.ancestors().count(), 3);
    }

    #[test]
    fn test_duplicate_full_names_rejected() {
        let result = TestNodeBuilder::fixture("F")
            .child(TestNodeBuilder::case("A", pass))
            .child(TestNodeBuilder::case("A", pass))
            .build();
        assert!(matches!(result, Err(EngineError::Discovery { .. })));
    }

    #[test]
    fn test_run_state_is_mutable_during_composition() {
        let root = sample();
        let case = root.find(1002).unwrap();
        case.set_run_state(RunState::NotRunnable, Some("bad arguments"));
        assert_eq!(case.run_state(), RunState::NotRunnable);
        assert_eq!(case.skip_reason().as_deref(), Some("bad arguments"));
    }

    #[test]
    fn test_hook_levels_pair_setup_and_teardown() {
        let node = TestNodeBuilder::fixture("F")
            .setup(pass)
            .teardown(pass)
            .setup(pass)
            .build()
            .unwrap();
        let levels = node.case_hooks();
        assert_eq!(levels.len(), 2);
        assert!(levels[0].setup.is_some() && levels[0].teardown.is_some());
        assert!(levels[1].setup.is_some() && levels[1].teardown.is_none());
    }

    #[test]
    fn test_expected_fault_matching() {
        let expected = ExpectedFault::of_kind("ParseIntError")
            .with_message("invalid digit", MessageMatch::Contains);
        assert!(expected.message_matches("invalid digit found in string"));
        assert!(!expected.message_matches("empty string"));
        assert!(ExpectedFault::any().message_matches("anything"));
    }
}
