//! Per-case setup and teardown

use std::sync::Arc;

use super::{invoke_hook, TestCommand};
use crate::models::{Fixture, HookLevel, TestNode};
use crate::results::{FailureSite, ResultNode};

/// Runs setup levels base-first, the inner command, then teardown
/// derived-first for every level whose setup was reached
pub struct SetUpTearDownCommand {
    inner: Arc<dyn TestCommand>,
    levels: Vec<HookLevel>,
}

impl SetUpTearDownCommand {
    pub fn new(inner: Arc<dyn TestCommand>, levels: Vec<HookLevel>) -> Self {
        Self { inner, levels }
    }
}

impl TestCommand for SetUpTearDownCommand {
    fn test(&self) -> &Arc<TestNode> {
        self.inner.test()
    }

    fn execute(&self, fixture: &Fixture) -> ResultNode {
        let mut started = 0;
        let mut setup_fault = None;

        for level in &self.levels {
            started += 1;
            if let Some(setup) = &level.setup {
                if let Err(fault) = invoke_hook(setup, fixture) {
                    setup_fault = Some(fault);
                    break;
                }
            }
        }

        let mut result = match setup_fault {
            Some(fault) => {
                let mut result = ResultNode::new(self.test());
                result.record_fault(&fault, FailureSite::SetUp);
                result
            }
            None => self.inner.execute(fixture),
        };

        for level in self.levels[..started].iter().rev() {
            if let Some(teardown) = &level.teardown {
                if let Err(fault) = invoke_hook(teardown, fixture) {
                    result.record_teardown_fault(&fault);
                }
            }
        }

        result
    }
}
