//! Time limits
//!
//! `TimeoutCommand` races the inner command against a deadline on its own
//! thread and abandons it when the deadline wins. `MaxTimeCommand` lets the
//! command finish and fails it afterwards when it ran too long.

use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::thread::{spawn_with_frame, thread_failure};
use super::TestCommand;
use crate::context::ExecutionContext;
use crate::models::{Fixture, TestNode};
use crate::results::{ResultNode, ResultStatus};
use crate::utils::Timer;

pub struct TimeoutCommand {
    inner: Arc<dyn TestCommand>,
    timeout: Duration,
}

impl TimeoutCommand {
    pub fn new(inner: Arc<dyn TestCommand>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl TestCommand for TimeoutCommand {
    fn test(&self) -> &Arc<TestNode> {
        self.inner.test()
    }

    fn execute(&self, fixture: &Fixture) -> ResultNode {
        let mut frame = ExecutionContext::current();
        let token = frame.cancel.child();
        frame.cancel = token.clone();

        let rx = match spawn_with_frame(&self.inner, fixture, frame) {
            Ok(rx) => rx,
            Err(e) => return thread_failure(self.test(), format!("Unable to start test thread: {e}")),
        };

        match rx.recv_timeout(self.timeout) {
            Ok((result, asserts)) => {
                ExecutionContext::update(|f| f.assert_count += asserts);
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                // Best effort: cooperative code sees the abort, the rest is abandoned
                token.request_abort();
                warn!(
                    "{} exceeded its timeout of {}ms",
                    self.test().full_name(),
                    self.timeout.as_millis()
                );
                let mut result = ResultNode::new(self.test());
                result.set_status(
                    ResultStatus::Failed,
                    Some(format!(
                        "Test exceeded Timeout value of {}ms",
                        self.timeout.as_millis()
                    )),
                );
                result
            }
            Err(RecvTimeoutError::Disconnected) => {
                thread_failure(self.test(), "Test thread ended without a result")
            }
        }
    }
}

pub struct MaxTimeCommand {
    inner: Arc<dyn TestCommand>,
    max_time: Duration,
}

impl MaxTimeCommand {
    pub fn new(inner: Arc<dyn TestCommand>, max_time: Duration) -> Self {
        Self { inner, max_time }
    }
}

impl TestCommand for MaxTimeCommand {
    fn test(&self) -> &Arc<TestNode> {
        self.inner.test()
    }

    fn execute(&self, fixture: &Fixture) -> ResultNode {
        let timer = Timer::start(self.test().full_name());
        let mut result = self.inner.execute(fixture);

        if result.status == ResultStatus::Passed && timer.exceeded(self.max_time) {
            result.set_status(
                ResultStatus::Failed,
                Some(format!(
                    "Elapsed time of {}ms exceeds maximum of {}ms",
                    timer.elapsed_ms(),
                    self.max_time.as_millis()
                )),
            );
        }
        timer.stop();
        result
    }
}
