//! Commands for nodes that must not run

use std::sync::Arc;

use super::TestCommand;
use crate::context::ExecutionContext;
use crate::listener::{notify, TestEvent, TestListener};
use crate::models::{Fixture, RunState, TestFilter, TestNode};
use crate::results::{FailureSite, ResultNode, ResultStatus};

/// Produces a result without touching user code
pub struct SkipCommand {
    test: Arc<TestNode>,
    filter: TestFilter,
    status: ResultStatus,
    site: FailureSite,
    message: Option<String>,
}

impl SkipCommand {
    /// Status and message derived from the node's run state
    pub fn for_node(test: Arc<TestNode>, filter: TestFilter) -> Self {
        let reason = test.skip_reason();
        let (status, site) = match test.run_state() {
            RunState::NotRunnable => (ResultStatus::Failed, FailureSite::SetUp),
            RunState::Ignored => (ResultStatus::Ignored, FailureSite::Test),
            _ => (ResultStatus::Skipped, FailureSite::Test),
        };
        Self {
            test,
            filter,
            status,
            site,
            message: reason,
        }
    }

    /// Explicit node that the filter did not select
    pub fn explicit(test: Arc<TestNode>, filter: TestFilter) -> Self {
        Self {
            test,
            filter,
            status: ResultStatus::Skipped,
            site: FailureSite::Test,
            message: Some("Explicit".to_string()),
        }
    }
}

impl TestCommand for SkipCommand {
    fn test(&self) -> &Arc<TestNode> {
        &self.test
    }

    fn execute(&self, _fixture: &Fixture) -> ResultNode {
        let listener = ExecutionContext::current().listener;
        let mut result = ResultNode::new(&self.test);
        result.set_status(self.status, self.message.clone());
        result.site = self.site;
        result.mark_started();

        let inherited = Inherited {
            status: self.status,
            message: self.message.clone(),
        };
        for child in self.test.children().iter().filter(|c| self.filter.pass(c)) {
            result.add_child(inherited.apply(child, &self.filter, listener.as_ref()));
        }

        result.mark_finished();
        emit_finished(listener.as_ref(), &result);
        result
    }
}

/// Status handed down from a suite to descendants that never ran
pub(crate) struct Inherited {
    pub status: ResultStatus,
    pub message: Option<String>,
}

impl Inherited {
    /// Result for `node` and its selected descendants, site Parent
    pub fn apply(&self, node: &Arc<TestNode>, filter: &TestFilter, listener: &dyn TestListener) -> ResultNode {
        let mut result = ResultNode::new(node);
        result.set_status(self.status, self.message.clone());
        result.site = FailureSite::Parent;
        for child in node.children().iter().filter(|c| filter.pass(c)) {
            result.add_child(self.apply(child, filter, listener));
        }
        emit_finished(listener, &result);
        result
    }
}

pub(crate) fn emit_finished(listener: &dyn TestListener, result: &ResultNode) {
    let event = if result.is_suite() {
        TestEvent::suite_finished(result)
    } else {
        TestEvent::test_finished(result)
    };
    notify(listener, &event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{base_frame, Counter};
    use crate::models::TestNodeBuilder;

    #[test]
    fn test_ignored_fixture_skips_children() {
        let calls = Counter::default();
        let c = calls.clone();
        let node = TestNodeBuilder::fixture("Ignored")
            .ignore("flaky")
            .child(TestNodeBuilder::case("a", move |_| {
                c.bump();
                Ok(())
            }))
            .child(TestNodeBuilder::case("b", |_| Ok(())))
            .build()
            .unwrap();

        let (_guard, listener) = base_frame();
        let result = SkipCommand::for_node(node, TestFilter::Empty).execute(&Fixture::none());

        assert_eq!(calls.get(), 0);
        assert_eq!(result.status, ResultStatus::Ignored);
        assert_eq!(result.skip_count, 2);
        assert_eq!(result.children[0].site, FailureSite::Parent);
        assert_eq!(result.children[0].message.as_deref(), Some("flaky"));
        assert_eq!(
            listener.names(),
            vec!["test_finished", "test_finished", "suite_finished"]
        );
    }

    #[test]
    fn test_not_runnable_case_fails() {
        let node = TestNodeBuilder::case("bad", |_| Ok(()))
            .not_runnable("Wrong number of arguments")
            .build()
            .unwrap();
        let (_guard, _listener) = base_frame();
        let result = SkipCommand::for_node(node, TestFilter::Empty).execute(&Fixture::none());
        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.message.as_deref(), Some("Wrong number of arguments"));
    }
}
