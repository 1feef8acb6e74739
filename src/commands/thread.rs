//! Dedicated-thread execution

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use tracing::warn;

use super::TestCommand;
use crate::context::{ContextFrame, ExecutionContext};
use crate::listener::{notify, TestEvent, TestListener};
use crate::models::{Fixture, TestFault, TestNode};
use crate::results::{FailureSite, ResultNode};

/// What a delegated thread hands back: its result and assertion count
pub(crate) type ThreadOutcome = (ResultNode, u64);

/// Report a fault no test result will carry
pub(crate) fn report_unhandled(listener: &dyn TestListener, test: &TestNode, message: String) {
    warn!("Unhandled fault in {}: {}", test.full_name(), message);
    notify(
        listener,
        &TestEvent::UnhandledFault {
            test: Some(test.full_name().to_string()),
            message,
        },
    );
}

/// Run `inner` on a new thread seeded with a copy of `frame`
pub(crate) fn spawn_with_frame(
    inner: &Arc<dyn TestCommand>,
    fixture: &Fixture,
    mut frame: ContextFrame,
) -> std::io::Result<Receiver<ThreadOutcome>> {
    let (tx, rx) = mpsc::channel();
    let inner = Arc::clone(inner);
    let fixture = fixture.clone();
    let listener = Arc::clone(&frame.listener);
    frame.assert_count = 0;

    thread::Builder::new()
        .name(format!("caserun-{}", inner.test().name()))
        .spawn(move || {
            let _guard = ExecutionContext::establish(frame);
            let result = match catch_unwind(AssertUnwindSafe(|| inner.execute(&fixture))) {
                Ok(result) => result,
                Err(payload) => {
                    let fault = TestFault::from_panic(payload);
                    report_unhandled(listener.as_ref(), inner.test(), fault.message());
                    let mut result = ResultNode::new(inner.test());
                    result.record_fault(&fault, FailureSite::Test);
                    result
                }
            };
            let asserts = ExecutionContext::current().assert_count;
            // The caller stops waiting after a timeout; a late failure has nowhere else to go
            if let Err(mpsc::SendError((result, _))) = tx.send((result, asserts)) {
                if result.status.is_failure() {
                    report_unhandled(
                        listener.as_ref(),
                        inner.test(),
                        format!(
                            "Abandoned test failed after its timeout: {}",
                            result.message.unwrap_or_default()
                        ),
                    );
                }
            }
        })?;

    Ok(rx)
}

/// Result used when the worker thread could not produce one
pub(crate) fn thread_failure(test: &TestNode, message: impl Into<String>) -> ResultNode {
    let message = message.into();
    report_unhandled(
        ExecutionContext::current().listener.as_ref(),
        test,
        message.clone(),
    );
    let mut result = ResultNode::new(test);
    result.record_fault(&TestFault::defect("ThreadError", message), FailureSite::Test);
    result
}

/// Runs the inner command on its own thread and waits for it
pub struct DedicatedThreadCommand {
    inner: Arc<dyn TestCommand>,
}

impl DedicatedThreadCommand {
    pub fn new(inner: Arc<dyn TestCommand>) -> Self {
        Self { inner }
    }
}

impl TestCommand for DedicatedThreadCommand {
    fn test(&self) -> &Arc<TestNode> {
        self.inner.test()
    }

    fn execute(&self, fixture: &Fixture) -> ResultNode {
        let frame = ExecutionContext::current();
        let outcome = spawn_with_frame(&self.inner, fixture, frame)
            .map_err(|e| format!("Unable to start test thread: {e}"))
            .and_then(|rx| {
                rx.recv()
                    .map_err(|_| "Test thread ended without a result".to_string())
            });

        match outcome {
            Ok((result, asserts)) => {
                ExecutionContext::update(|f| f.assert_count += asserts);
                result
            }
            Err(message) => thread_failure(self.test(), message),
        }
    }
}
