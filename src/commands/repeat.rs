//! Repetition

use std::sync::Arc;

use super::TestCommand;
use crate::models::{Fixture, TestNode};
use crate::results::{ResultNode, ResultStatus};

/// Runs the inner command up to `count` times, stopping at the first
/// result that is not a pass
pub struct RepeatCommand {
    inner: Arc<dyn TestCommand>,
    count: u32,
}

impl RepeatCommand {
    pub fn new(inner: Arc<dyn TestCommand>, count: u32) -> Self {
        Self {
            inner,
            count: count.max(1),
        }
    }
}

impl TestCommand for RepeatCommand {
    fn test(&self) -> &Arc<TestNode> {
        self.inner.test()
    }

    fn execute(&self, fixture: &Fixture) -> ResultNode {
        let mut result = self.inner.execute(fixture);
        for _ in 1..self.count {
            if result.status != ResultStatus::Passed {
                break;
            }
            result = self.inner.execute(fixture);
        }
        result
    }
}
