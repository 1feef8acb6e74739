//! Suite, fixture and parameterized-group execution

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info};

use super::skip::Inherited;
use super::{invoke_hook, TestCommand};
use crate::context::ExecutionContext;
use crate::models::{Fixture, TestFault, TestFilter, TestNode};
use crate::results::{FailureSite, ResultNode, ResultStatus};

/// Runs one-time setup, the child commands in order, then one-time teardown
pub struct CompositeCommand {
    test: Arc<TestNode>,
    filter: TestFilter,
    children: Vec<Arc<dyn TestCommand>>,
}

impl CompositeCommand {
    pub fn new(test: Arc<TestNode>, filter: TestFilter, children: Vec<Arc<dyn TestCommand>>) -> Self {
        Self {
            test,
            filter,
            children,
        }
    }

    fn make_fixture(&self, parent: &Fixture) -> Result<Fixture, TestFault> {
        let Some(factory) = self.test.fixture_factory() else {
            return Ok(parent.clone());
        };
        match catch_unwind(AssertUnwindSafe(|| factory())) {
            Ok(Ok(fixture)) => Ok(fixture),
            Ok(Err(fault)) => Err(TestFault::construction(fault)),
            Err(payload) => Err(TestFault::construction(TestFault::from_panic(payload))),
        }
    }

    /// Children never ran: give each selected descendant this suite's status
    fn fail_children(&self, result: &mut ResultNode, prefix: &str) {
        let listener = ExecutionContext::current().listener;
        let inherited = Inherited {
            status: result.status,
            message: Some(format!(
                "{prefix}: {}",
                result.message.clone().unwrap_or_default()
            )),
        };
        for child in self.test.children().iter().filter(|c| self.filter.pass(c)) {
            result.add_child(inherited.apply(child, &self.filter, listener.as_ref()));
        }
    }

    fn mark_cancelled(&self, result: &mut ResultNode) {
        info!("Cancellation observed in {}", self.test.full_name());
        result.set_status(
            ResultStatus::Cancelled,
            Some("Test cancelled by user".to_string()),
        );
        result.site = FailureSite::Child;
    }

    fn run_children(&self, fixture: &Fixture, result: &mut ResultNode) {
        for child in &self.children {
            if ExecutionContext::current().cancel.is_cancel_requested() {
                self.mark_cancelled(result);
                return;
            }

            let child_result = child.execute(fixture);
            let cancelled = child_result.status == ResultStatus::Cancelled;
            result.add_child(child_result);
            if cancelled {
                debug!("Child of {} cancelled, remaining siblings skipped", self.test.full_name());
                return;
            }
        }

        // A cancel during the last child still ends this suite as cancelled
        if ExecutionContext::current().cancel.is_cancel_requested() {
            self.mark_cancelled(result);
        }
    }
}

impl TestCommand for CompositeCommand {
    fn test(&self) -> &Arc<TestNode> {
        &self.test
    }

    fn execute(&self, parent_fixture: &Fixture) -> ResultNode {
        let mut result = ResultNode::new(&self.test);

        let fixture = match self.make_fixture(parent_fixture) {
            Ok(fixture) => fixture,
            Err(fault) => {
                result.record_fault(&fault, FailureSite::SetUp);
                self.fail_children(&mut result, "OneTimeSetUp");
                return result;
            }
        };

        let levels = self.test.one_time_hooks();
        let mut started = 0;
        let mut setup_fault = None;
        for level in levels {
            started += 1;
            if let Some(setup) = &level.setup {
                if let Err(fault) = invoke_hook(setup, &fixture) {
                    setup_fault = Some(fault);
                    break;
                }
            }
        }

        match setup_fault {
            Some(fault) => {
                result.record_fault(&fault, FailureSite::SetUp);
                self.fail_children(&mut result, "OneTimeSetUp");
            }
            None => self.run_children(&fixture, &mut result),
        }

        for level in levels[..started].iter().rev() {
            if let Some(teardown) = &level.teardown {
                if let Err(fault) = invoke_hook(teardown, &fixture) {
                    result.record_teardown_fault(&fault);
                }
            }
        }

        result
    }
}
