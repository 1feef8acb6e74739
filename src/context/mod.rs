//! Execution context
//!
//! Ambient, per-thread state for the node currently executing, kept as a
//! save/restore stack. User code reaches it through the helper functions
//! below instead of receiving it as a parameter.

mod cancel;
mod stack;

pub use cancel::{CancelToken, ExecutionStatus};
pub use stack::{ContextFrame, ContextGuard, ExecutionContext, OutputSink};

use crate::models::{TestFault, TestOutcome};

/// Count one assertion against the current test
pub fn increment_assert_count() {
    ExecutionContext::update(|frame| frame.assert_count += 1);
}

/// Counted assertion; fails the current test when `condition` is false
#[track_caller]
pub fn check(condition: bool, message: impl Into<String>) -> TestOutcome {
    increment_assert_count();
    if condition {
        Ok(())
    } else {
        Err(TestFault::assertion(message))
    }
}

/// Counted equality assertion
#[track_caller]
pub fn check_eq<T: PartialEq + std::fmt::Debug>(expected: T, actual: T) -> TestOutcome {
    check(
        expected == actual,
        format!("Expected: {expected:?}\n  But was:  {actual:?}"),
    )
}

/// Capture text in the current test's output
pub fn write_output(text: impl AsRef<str>) {
    ExecutionContext::update(|frame| {
        if let Some(sink) = &frame.output {
            sink.write(text.as_ref());
        }
    });
}

pub fn is_cancel_requested() -> bool {
    ExecutionContext::current().cancel.is_cancel_requested()
}

pub fn current_test_name() -> Option<String> {
    ExecutionContext::current()
        .current_test
        .map(|t| t.full_name().to_string())
}

pub fn culture() -> Option<String> {
    ExecutionContext::current().culture
}

pub fn work_directory() -> Option<std::path::PathBuf> {
    ExecutionContext::current().work_directory
}
