//! Execution-context wrapper, the outermost command of every node

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::skip::emit_finished;
use super::TestCommand;
use crate::context::{ExecutionContext, OutputSink};
use crate::listener::{notify, TestEvent};
use crate::models::{names, Fixture, TestNode};
use crate::results::ResultNode;

/// Pushes a frame for the node, reports progress, and pops it on exit
pub struct ContextCommand {
    inner: Arc<dyn TestCommand>,
}

impl ContextCommand {
    pub fn new(inner: Arc<dyn TestCommand>) -> Self {
        Self { inner }
    }
}

impl TestCommand for ContextCommand {
    fn test(&self) -> &Arc<TestNode> {
        self.inner.test()
    }

    fn execute(&self, fixture: &Fixture) -> ResultNode {
        let test = Arc::clone(self.test());
        let _guard = ExecutionContext::save();
        let sink = OutputSink::new();
        let frame = ExecutionContext::update(|frame| {
            frame.current_test = Some(Arc::clone(&test));
            frame.output = Some(sink.clone());
            if let Some(culture) = test.property(names::SET_CULTURE) {
                frame.culture = Some(culture);
            }
            if let Some(ms) = test.property_parsed::<u64>(names::TIMEOUT) {
                frame.timeout = Some(Duration::from_millis(ms));
            }
            frame.clone()
        })
        .unwrap_or_default();

        let started = if test.is_suite() {
            TestEvent::SuiteStarted {
                id: test.id(),
                full_name: test.full_name().to_string(),
            }
        } else {
            TestEvent::TestStarted {
                id: test.id(),
                full_name: test.full_name().to_string(),
            }
        };
        notify(frame.listener.as_ref(), &started);
        debug!("Running {}", test.full_name());

        let start_time = Utc::now();
        let mut result = self.inner.execute(fixture);
        result.start_time = Some(start_time);
        result.mark_finished();

        let current = ExecutionContext::current();
        result.assert_count = result.assert_count.max(current.assert_count);
        result.output = sink.contents();

        if !result.output.is_empty() {
            notify(
                frame.listener.as_ref(),
                &TestEvent::TestOutput {
                    test: test.full_name().to_string(),
                    text: result.output.clone(),
                },
            );
        }

        if !test.is_suite() && frame.stop_on_error && result.status.is_failure() {
            debug!("Stopping run after failure of {}", test.full_name());
            frame.cancel.request_stop();
        }

        emit_finished(frame.listener.as_ref(), &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::base_frame;
    use crate::commands::TestMethodCommand;
    use crate::context::{self, current_test_name, write_output};
    use crate::models::{TestFault, TestNodeBuilder};
    use crate::results::ResultStatus;

    fn wrapped(builder: TestNodeBuilder) -> ContextCommand {
        ContextCommand::new(Arc::new(TestMethodCommand::new(builder.build().unwrap())))
    }

    #[test]
    fn test_frame_and_events() {
        let command = wrapped(
            TestNodeBuilder::case("talks", |_| {
                write_output("hi");
                context::check_eq(Some("talks".to_string()), current_test_name())?;
                context::check_eq(Some("de-DE".to_string()), context::culture())
            })
            .culture("de-DE"),
        );

        let (_guard, listener) = base_frame();
        let result = command.execute(&Fixture::none());

        assert_eq!(result.status, ResultStatus::Passed);
        assert_eq!(result.assert_count, 2);
        assert_eq!(result.output, "hi");
        assert!(result.start_time.is_some() && result.end_time.is_some());
        assert_eq!(
            listener.names(),
            vec!["test_started", "test_output", "test_finished"]
        );
        assert_eq!(ExecutionContext::current().assert_count, 2);
        assert_eq!(ExecutionContext::depth(), 1);
    }

    #[test]
    fn test_stop_on_error_requests_stop() {
        let command = wrapped(TestNodeBuilder::case("fails", |_| {
            Err(TestFault::assertion("nope"))
        }));
        let (_guard, _listener) = base_frame();
        ExecutionContext::update(|f| f.stop_on_error = true);
        command.execute(&Fixture::none());
        assert!(ExecutionContext::current().cancel.is_cancel_requested());
    }
}
