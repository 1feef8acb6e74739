//! Progress events and listeners
//!
//! Listeners are fire-and-forget: a listener that panics is logged and
//! otherwise ignored, so no listener can change the course of a run.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::results::{ResultNode, ResultStatus};

/// Progress event emitted during a run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TestEvent {
    RunStarted {
        name: String,
        test_count: usize,
    },
    SuiteStarted {
        id: u64,
        full_name: String,
    },
    TestStarted {
        id: u64,
        full_name: String,
    },
    /// Leaf result, without children
    TestFinished {
        result: ResultNode,
    },
    /// Suite result, children stripped
    SuiteFinished {
        result: ResultNode,
    },
    RunFinished {
        status: ResultStatus,
        total: usize,
        passed: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    },
    UnhandledFault {
        test: Option<String>,
        message: String,
    },
    TestOutput {
        test: String,
        text: String,
    },
}

impl TestEvent {
    pub fn test_finished(result: &ResultNode) -> Self {
        TestEvent::TestFinished {
            result: result.clone(),
        }
    }

    pub fn suite_finished(result: &ResultNode) -> Self {
        let mut summary = result.clone();
        summary.children = Vec::new();
        TestEvent::SuiteFinished { result: summary }
    }

    pub fn run_finished(result: &ResultNode) -> Self {
        TestEvent::RunFinished {
            status: result.status,
            total: result.total_count(),
            passed: result.pass_count,
            failed: result.fail_count,
            skipped: result.skip_count,
            duration_ms: result.duration_ms,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TestEvent::RunStarted { .. } => "run_started",
            TestEvent::SuiteStarted { .. } => "suite_started",
            TestEvent::TestStarted { .. } => "test_started",
            TestEvent::TestFinished { .. } => "test_finished",
            TestEvent::SuiteFinished { .. } => "suite_finished",
            TestEvent::RunFinished { .. } => "run_finished",
            TestEvent::UnhandledFault { .. } => "unhandled_fault",
            TestEvent::TestOutput { .. } => "test_output",
        }
    }
}

/// Receives progress events during a run
pub trait TestListener: Send + Sync {
    fn on_event(&self, event: &TestEvent);
}

impl<T: TestListener + ?Sized> TestListener for Arc<T> {
    fn on_event(&self, event: &TestEvent) {
        (**self).on_event(event)
    }
}

/// Deliver an event, containing any panic raised by the listener
pub fn notify(listener: &dyn TestListener, event: &TestEvent) {
    let delivered = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
    if delivered.is_err() {
        warn!("Listener panicked while handling {}", event.name());
    }
}

/// Discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NullListener;

impl TestListener for NullListener {
    fn on_event(&self, _event: &TestEvent) {}
}

/// Logs events through tracing
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingListener;

impl TestListener for TracingListener {
    fn on_event(&self, event: &TestEvent) {
        match event {
            TestEvent::RunStarted { name, test_count } => {
                info!("Run started: {} ({} tests)", name, test_count)
            }
            TestEvent::TestFinished { result } => debug!("{}", result),
            TestEvent::SuiteFinished { result } => debug!(
                "Suite {} {} (pass {}, fail {}, skip {})",
                result.full_name,
                result.status,
                result.pass_count,
                result.fail_count,
                result.skip_count
            ),
            TestEvent::RunFinished {
                status,
                total,
                passed,
                failed,
                ..
            } => info!(
                "Run finished: {} ({} total, {} passed, {} failed)",
                status, total, passed, failed
            ),
            TestEvent::UnhandledFault { test, message } => {
                warn!("Unhandled fault in {:?}: {}", test, message)
            }
            _ => {}
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingListener {
    events: Mutex<Vec<TestEvent>>,
}

impl CollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TestEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(TestEvent::name).collect()
    }
}

impl TestListener for CollectingListener {
    fn on_event(&self, event: &TestEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Forwards events into an async channel
#[derive(Clone, Debug)]
pub struct ChannelListener {
    sender: UnboundedSender<TestEvent>,
}

impl ChannelListener {
    pub fn new(sender: UnboundedSender<TestEvent>) -> Self {
        Self { sender }
    }
}

impl TestListener for ChannelListener {
    fn on_event(&self, event: &TestEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.sender.send(event.clone());
    }
}

/// Sends every event to several listeners in turn
#[derive(Clone, Default)]
pub struct FanoutListener {
    listeners: Vec<Arc<dyn TestListener>>,
}

impl FanoutListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn TestListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl TestListener for FanoutListener {
    fn on_event(&self, event: &TestEvent) {
        for listener in &self.listeners {
            notify(listener.as_ref(), event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingListener;

    impl TestListener for PanickingListener {
        fn on_event(&self, _event: &TestEvent) {
            panic!("listener bug");
        }
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let collector = Arc::new(CollectingListener::new());
        let fanout = FanoutListener::new()
            .with(Arc::new(PanickingListener))
            .with(collector.clone());
        notify(
            &fanout,
            &TestEvent::TestOutput {
                test: "a".into(),
                text: "hello".into(),
            },
        );
        assert_eq!(collector.names(), vec!["test_output"]);
    }

    #[test]
    fn test_suite_finished_strips_children() {
        let mut suite = ResultNode::synthetic("S", crate::models::NodeKind::Fixture);
        suite.add_child(ResultNode::synthetic("S.a", crate::models::NodeKind::Case));
        match TestEvent::suite_finished(&suite) {
            TestEvent::SuiteFinished { result } => {
                assert!(result.children.is_empty());
                assert_eq!(result.inconclusive_count, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_event_json_shape() {
        let event = TestEvent::TestStarted {
            id: 1001,
            full_name: "lib.A.One".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "test_started");
        let back: TestEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
