//! Command chain construction
//!
//! Wrappers around a case, innermost first:
//!
//! 1. body invocation, with expected-fault checking when declared
//! 2. per-case setup/teardown from the enclosing fixture
//! 3. max-time or timeout guard
//! 4. dedicated thread, unless a timeout guard already provides one
//! 5. repetition
//! 6. execution context
//!
//! Suites get their child commands, one-time hooks, an optional dedicated
//! thread and the execution context. Nodes that may not run get a bare
//! [`SkipCommand`].

use std::sync::Arc;
use std::time::Duration;

use super::{
    CompositeCommand, ContextCommand, DedicatedThreadCommand, ExpectedFaultCommand,
    MaxTimeCommand, RepeatCommand, SetUpTearDownCommand, SkipCommand, TestCommand,
    TestMethodCommand, TimeoutCommand,
};
use crate::models::{names, NodeKind, RunState, TestFilter, TestNode};

/// Builds command chains for nodes selected by a filter
#[derive(Clone, Debug, Default)]
pub struct CommandBuilder {
    filter: TestFilter,
    default_timeout: Option<Duration>,
}

impl CommandBuilder {
    pub fn new(filter: TestFilter) -> Self {
        Self {
            filter,
            default_timeout: None,
        }
    }

    /// Timeout applied to cases that declare none
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn filter(&self) -> &TestFilter {
        &self.filter
    }

    pub fn build(&self, node: &Arc<TestNode>) -> Arc<dyn TestCommand> {
        if node.kind() == NodeKind::Case && node.body().is_none() {
            node.set_run_state(RunState::NotRunnable, Some("Case has no body to invoke"));
        }

        match node.run_state() {
            RunState::Runnable => {}
            RunState::Explicit if self.filter.is_explicit_match(node) => {}
            RunState::Explicit => {
                return Arc::new(SkipCommand::explicit(Arc::clone(node), self.filter.clone()))
            }
            _ => return Arc::new(SkipCommand::for_node(Arc::clone(node), self.filter.clone())),
        }

        if node.is_suite() {
            self.build_suite(node)
        } else {
            self.build_case(node)
        }
    }

    fn build_case(&self, node: &Arc<TestNode>) -> Arc<dyn TestCommand> {
        let test = Arc::clone(node);
        let mut command: Arc<dyn TestCommand> = match node.expected_fault() {
            Some(expected) => Arc::new(ExpectedFaultCommand::new(test, expected.clone())),
            None => Arc::new(TestMethodCommand::new(test)),
        };

        let levels = node.fixture_case_hooks();
        if !levels.is_empty() {
            command = Arc::new(SetUpTearDownCommand::new(command, levels));
        }

        if let Some(ms) = node.inherited_property::<u64>(names::MAX_TIME) {
            command = Arc::new(MaxTimeCommand::new(command, Duration::from_millis(ms)));
        }

        let timeout = node
            .inherited_property::<u64>(names::TIMEOUT)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .or(self.default_timeout);
        match timeout {
            Some(timeout) => command = Arc::new(TimeoutCommand::new(command, timeout)),
            None if requires_thread(node) => {
                command = Arc::new(DedicatedThreadCommand::new(command))
            }
            None => {}
        }

        if let Some(count) = node.property_parsed::<u32>(names::REPEAT) {
            if count > 1 {
                command = Arc::new(RepeatCommand::new(command, count));
            }
        }

        Arc::new(ContextCommand::new(command))
    }

    fn build_suite(&self, node: &Arc<TestNode>) -> Arc<dyn TestCommand> {
        let mut selected: Vec<&Arc<TestNode>> = node
            .children()
            .iter()
            .filter(|child| self.filter.pass(child))
            .collect();

        // Groups keep registration order; elsewhere ordered children go first
        if node.kind() != NodeKind::ParameterizedGroup {
            selected.sort_by_key(|child| match child.property_parsed::<i32>(names::ORDER) {
                Some(order) => (0, order),
                None => (1, 0),
            });
        }

        let children = selected.into_iter().map(|child| self.build(child)).collect();
        let mut command: Arc<dyn TestCommand> = Arc::new(CompositeCommand::new(
            Arc::clone(node),
            self.filter.clone(),
            children,
        ));

        if requires_thread(node) {
            command = Arc::new(DedicatedThreadCommand::new(command));
        }

        Arc::new(ContextCommand::new(command))
    }
}

fn requires_thread(node: &TestNode) -> bool {
    node.property_parsed::<bool>(names::REQUIRES_THREAD)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{base_frame, CallLog, Counter};
    use crate::context::{self, is_cancel_requested, ExecutionContext};
    use crate::models::{Fixture, TestFault, TestNodeBuilder};
    use crate::results::{FailureSite, ResultStatus};

    fn run(builder: TestNodeBuilder, filter: TestFilter) -> crate::results::ResultNode {
        let root = builder.build().unwrap();
        let command = CommandBuilder::new(filter).build(&root);
        command.execute(&Fixture::none())
    }

    fn pass_case(name: &str) -> TestNodeBuilder {
        TestNodeBuilder::case(name, |_| context::check(true, "always"))
    }

    #[test]
    fn test_three_pass_one_fail() {
        let (_guard, _listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("Calc")
                .child(pass_case("a"))
                .child(pass_case("b"))
                .child(pass_case("c"))
                .child(TestNodeBuilder::case("d", |_| Err(TestFault::assertion("2 != 3")))),
            TestFilter::Empty,
        );
        assert_eq!(result.pass_count, 3);
        assert_eq!(result.fail_count, 1);
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.assert_count, 3);
    }

    #[test]
    fn test_setup_defect_with_teardown() {
        let log = CallLog::default();
        let body_log = log.clone();
        let (_guard, _listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("Db")
                .setup(|_| Err(TestFault::defect("IoError", "no connection")))
                .teardown(log.hook("teardown"))
                .child(TestNodeBuilder::case("query", move |_| {
                    body_log.record("body");
                    Ok(())
                })),
            TestFilter::Empty,
        );
        let case = &result.children[0];
        assert_eq!(case.status, ResultStatus::Error);
        assert_eq!(case.site, FailureSite::SetUp);
        assert_eq!(log.entries(), vec!["teardown"]);
    }

    #[test]
    fn test_filter_excludes_cases() {
        let calls = Counter::default();
        let c = calls.clone();
        let (_guard, _listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("F")
                .child(pass_case("kept").category("Fast"))
                .child(TestNodeBuilder::case("dropped", move |_| {
                    c.bump();
                    Ok(())
                })),
            TestFilter::Category("Fast".into()),
        );
        assert_eq!(calls.get(), 0);
        assert_eq!(result.total_count(), 1);
        assert_eq!(result.children.len(), 1);
    }

    #[test]
    fn test_one_time_setup_failure_marks_descendants() {
        let log = CallLog::default();
        let (_guard, listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("F")
                .one_time_setup(|_| Err(TestFault::assertion("env missing")))
                .one_time_teardown(log.hook("one-time teardown"))
                .child(pass_case("a"))
                .child(TestNodeBuilder::group("G").child(pass_case("G(1)"))),
            TestFilter::Empty,
        );
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.site, FailureSite::SetUp);
        assert_eq!(result.fail_count, 2);
        let leaf = result.find("F.G(1)").unwrap();
        assert_eq!(leaf.site, FailureSite::Parent);
        assert_eq!(leaf.message.as_deref(), Some("OneTimeSetUp: env missing"));
        assert_eq!(log.entries(), vec!["one-time teardown"]);
        assert!(listener.names().contains(&"test_finished"));
    }

    #[test]
    fn test_one_time_hooks_bracket_children() {
        let log = CallLog::default();
        let (_guard, _listener) = base_frame();
        run(
            TestNodeBuilder::fixture("F")
                .one_time_level(
                    Some(Arc::new(log.hook("base setup"))),
                    Some(Arc::new(log.hook("base teardown"))),
                )
                .one_time_level(
                    Some(Arc::new(log.hook("derived setup"))),
                    Some(Arc::new(log.hook("derived teardown"))),
                )
                .child(TestNodeBuilder::case("a", {
                    let log = log.clone();
                    move |_| {
                        log.record("a");
                        Ok(())
                    }
                })),
            TestFilter::Empty,
        );
        assert_eq!(
            log.entries(),
            vec!["base setup", "derived setup", "a", "derived teardown", "base teardown"]
        );
    }

    #[test]
    fn test_one_time_teardown_fault_escalates_suite() {
        let (_guard, _listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("F")
                .one_time_teardown(|_| Err(TestFault::defect("panic", "leak")))
                .child(pass_case("a")),
            TestFilter::Empty,
        );
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.pass_count, 1);
    }

    #[test]
    fn test_cancelled_child_stops_siblings() {
        let later = Counter::default();
        let l = later.clone();
        let (_guard, _listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("F")
                .child(TestNodeBuilder::case("a", |_| Err(TestFault::assertion("x"))))
                .child(TestNodeBuilder::case("b", |_| Err(TestFault::cancelled("stop"))))
                .child(TestNodeBuilder::case("c", move |_| {
                    l.bump();
                    Ok(())
                })),
            TestFilter::Empty,
        );
        assert_eq!(later.get(), 0);
        assert_eq!(result.status, ResultStatus::Cancelled);
        assert_eq!(result.children.len(), 2);
        assert_eq!(result.fail_count, 2);
    }

    #[test]
    fn test_run_token_cancel_stops_remaining() {
        let (_guard, _listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("F")
                .child(TestNodeBuilder::case("a", |_| {
                    ExecutionContext::current().cancel.request_stop();
                    Ok(())
                }))
                .child(pass_case("b")),
            TestFilter::Empty,
        );
        assert_eq!(result.status, ResultStatus::Cancelled);
        assert_eq!(result.pass_count, 1);
        assert_eq!(result.children.len(), 1);
    }

    #[test]
    fn test_cancel_during_only_child_cancels_suite() {
        let (_guard, _listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("F").child(TestNodeBuilder::case("last", |_| {
                ExecutionContext::current().cancel.request_stop();
                Ok(())
            })),
            TestFilter::Empty,
        );
        assert_eq!(result.status, ResultStatus::Cancelled);
        assert_eq!(result.site, FailureSite::Child);
        assert_eq!(result.pass_count, 1);
    }

    #[test]
    fn test_timeout_abandons_loop_that_never_checks_cancel() {
        let (_guard, _listener) = base_frame();
        let started = std::time::Instant::now();
        let result = run(
            TestNodeBuilder::fixture("F")
                .child(
                    TestNodeBuilder::case("spins", |_| loop {
                        std::thread::sleep(Duration::from_millis(5));
                    })
                    .timeout_ms(50),
                )
                .child(pass_case("next")),
            TestFilter::Empty,
        );
        assert!(started.elapsed() < Duration::from_secs(1));
        let spins = &result.children[0];
        assert_eq!(spins.status, ResultStatus::Failed);
        assert!(spins.message.as_deref().unwrap().contains("Timeout value of 50ms"));
        assert_eq!(result.children[1].status, ResultStatus::Passed);
        assert_eq!(result.status, ResultStatus::Failed);
    }

    #[test]
    fn test_timeout_scenario_within_suite() {
        let (_guard, _listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("F")
                .child(
                    TestNodeBuilder::case("endless", |_| loop {
                        if is_cancel_requested() {
                            return Ok(());
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    })
                    .timeout_ms(50),
                )
                .child(pass_case("next")),
            TestFilter::Empty,
        );
        let endless = &result.children[0];
        assert_eq!(endless.status, ResultStatus::Failed);
        assert!(endless.message.as_deref().unwrap().contains("Timeout"));
        assert_eq!(result.children[1].status, ResultStatus::Passed);
    }

    #[test]
    fn test_order_property_and_group_order() {
        let log = CallLog::default();
        let case = |name: &'static str| {
            let log = log.clone();
            TestNodeBuilder::case(name, move |_| {
                log.record(name);
                Ok(())
            })
        };
        let (_guard, _listener) = base_frame();
        run(
            TestNodeBuilder::fixture("F")
                .child(case("plain"))
                .child(case("second").order(2))
                .child(case("first").order(1))
                .child(
                    TestNodeBuilder::group("G")
                        .child(case("G(b)").order(9))
                        .child(case("G(a)").order(1)),
                ),
            TestFilter::Empty,
        );
        assert_eq!(log.entries(), vec!["first", "second", "plain", "G(b)", "G(a)"]);
    }

    #[test]
    fn test_explicit_requires_explicit_selection() {
        let (_guard, _listener) = base_frame();
        let builder = || {
            TestNodeBuilder::fixture("F")
                .child(pass_case("normal"))
                .child(pass_case("manual").explicit())
        };

        let result = run(builder(), TestFilter::Empty);
        let manual = result.find("F.manual").unwrap();
        assert_eq!(manual.status, ResultStatus::Skipped);
        assert_eq!(manual.message.as_deref(), Some("Explicit"));

        let result = run(builder(), TestFilter::FullName("F.manual".into()));
        assert_eq!(result.find("F.manual").unwrap().status, ResultStatus::Passed);
    }

    #[test]
    fn test_repeat_and_fixture_instance() {
        struct Db {
            rows: Counter,
        }
        let (_guard, _listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("F")
                .fixture_factory(|| Ok(Fixture::new(Db { rows: Counter::default() })))
                .child(
                    TestNodeBuilder::case("insert", |fixture| {
                        let db = fixture.get::<Db>().ok_or_else(|| TestFault::defect("Fixture", "missing"))?;
                        db.rows.bump();
                        Ok(())
                    })
                    .repeat(3),
                )
                .child(TestNodeBuilder::case("count", |fixture| {
                    let db = fixture.get::<Db>().ok_or_else(|| TestFault::defect("Fixture", "missing"))?;
                    context::check_eq(3, db.rows.get())
                })),
            TestFilter::Empty,
        );
        assert_eq!(result.pass_count, 2);
    }

    #[test]
    fn test_fixture_construction_failure() {
        let (_guard, _listener) = base_frame();
        let result = run(
            TestNodeBuilder::fixture("F")
                .fixture_factory(|| Err(TestFault::defect("ConfigError", "no settings")))
                .child(pass_case("a")),
            TestFilter::Empty,
        );
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.message.as_deref(), Some("ConfigError: no settings"));
        assert_eq!(
            result.children[0].message.as_deref(),
            Some("OneTimeSetUp: ConfigError: no settings")
        );
    }

    #[test]
    fn test_not_runnable_case_counts_as_failure() {
        let (_guard, _listener) = base_frame();
        let case = TestNodeBuilder::case("args", |_| Ok(())).not_runnable("Missing parameters");
        let result = run(TestNodeBuilder::fixture("F").child(case), TestFilter::Empty);
        assert_eq!(result.children[0].status, ResultStatus::Failed);
        assert_eq!(result.fail_count, 1);
    }
}
