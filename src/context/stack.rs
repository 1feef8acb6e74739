//! Thread-local execution context stack

use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::cancel::CancelToken;
use crate::listener::{NullListener, TestListener};
use crate::models::TestNode;

thread_local! {
    static STACK: RefCell<Vec<ContextFrame>> = const { RefCell::new(Vec::new()) };
}

/// Captured text written by user code for the current result
#[derive(Clone, Debug, Default)]
pub struct OutputSink(Arc<Mutex<String>>);

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, text: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }

    pub fn contents(&self) -> String {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One level of ambient state
#[derive(Clone)]
pub struct ContextFrame {
    pub current_test: Option<Arc<TestNode>>,
    pub output: Option<OutputSink>,
    /// Assertions made by this frame and every frame restored into it
    pub assert_count: u64,
    pub culture: Option<String>,
    pub timeout: Option<Duration>,
    pub listener: Arc<dyn TestListener>,
    pub cancel: CancelToken,
    pub stop_on_error: bool,
    pub work_directory: Option<PathBuf>,
}

impl Default for ContextFrame {
    fn default() -> Self {
        Self {
            current_test: None,
            output: None,
            assert_count: 0,
            culture: None,
            timeout: None,
            listener: Arc::new(NullListener),
            cancel: CancelToken::new(),
            stop_on_error: false,
            work_directory: None,
        }
    }
}

impl ContextFrame {
    pub fn new(listener: Arc<dyn TestListener>, cancel: CancelToken) -> Self {
        Self {
            listener,
            cancel,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_culture(mut self, culture: Option<String>) -> Self {
        self.culture = culture;
        self
    }

    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    pub fn with_work_directory(mut self, dir: Option<PathBuf>) -> Self {
        self.work_directory = dir;
        self
    }

    /// Inherited settings with a fresh counter and no current test
    fn inherit(&self) -> Self {
        Self {
            current_test: None,
            output: None,
            assert_count: 0,
            culture: self.culture.clone(),
            timeout: self.timeout,
            listener: Arc::clone(&self.listener),
            cancel: self.cancel.clone(),
            stop_on_error: self.stop_on_error,
            work_directory: self.work_directory.clone(),
        }
    }
}

impl fmt::Debug for ContextFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextFrame")
            .field(
                "current_test",
                &self.current_test.as_ref().map(|t| t.full_name().to_string()),
            )
            .field("assert_count", &self.assert_count)
            .field("culture", &self.culture)
            .field("timeout", &self.timeout)
            .field("cancel", &self.cancel.status())
            .finish()
    }
}

/// Pops its frame when dropped
#[must_use = "the frame is restored as soon as the guard is dropped"]
pub struct ContextGuard {
    _private: (),
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        ExecutionContext::restore();
    }
}

/// Access to the calling thread's context stack
pub struct ExecutionContext;

impl ExecutionContext {
    /// Push `frame` as given; used at the base of a run or of a new thread
    pub fn establish(frame: ContextFrame) -> ContextGuard {
        STACK.with(|stack| stack.borrow_mut().push(frame));
        ContextGuard { _private: () }
    }

    /// Push a frame inheriting settings from the current top
    pub fn save() -> ContextGuard {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let frame = stack.last().map(ContextFrame::inherit).unwrap_or_default();
            stack.push(frame);
        });
        ContextGuard { _private: () }
    }

    /// Pop the top frame, adding its assertion count into the new top
    ///
    /// # Panics
    ///
    /// Panics when the stack is empty; a restore without a save is a
    /// defect in the engine.
    pub fn restore() {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(popped) = stack.pop() else {
                panic!("ExecutionContext::restore called without a matching save");
            };
            if let Some(top) = stack.last_mut() {
                top.assert_count += popped.assert_count;
            }
        });
    }

    /// Copy of the current frame, default when no frame is established
    pub fn current() -> ContextFrame {
        STACK.with(|stack| stack.borrow().last().cloned().unwrap_or_default())
    }

    /// Mutate the current frame; `None` when no frame is established
    pub fn update<R>(f: impl FnOnce(&mut ContextFrame) -> R) -> Option<R> {
        STACK.with(|stack| stack.borrow_mut().last_mut().map(f))
    }

    pub fn depth() -> usize {
        STACK.with(|stack| stack.borrow().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_inherits_and_restore_propagates() {
        let base = ContextFrame::default()
            .with_culture(Some("fr-FR".into()))
            .with_timeout(Some(Duration::from_millis(30)));
        let _base = ExecutionContext::establish(base);
        ExecutionContext::update(|f| f.assert_count = 1);

        {
            let _child = ExecutionContext::save();
            let frame = ExecutionContext::current();
            assert_eq!(frame.culture.as_deref(), Some("fr-FR"));
            assert_eq!(frame.assert_count, 0);
            assert!(frame.current_test.is_none());
            ExecutionContext::update(|f| f.assert_count += 3);
        }

        assert_eq!(ExecutionContext::current().assert_count, 4);
        assert_eq!(ExecutionContext::depth(), 1);
    }

    #[test]
    fn test_restore_on_empty_stack_panics() {
        let outcome = std::panic::catch_unwind(ExecutionContext::restore);
        assert!(outcome.is_err());
    }

    #[test]
    fn test_frames_are_thread_local() {
        let _guard = ExecutionContext::establish(ContextFrame::default());
        ExecutionContext::update(|f| f.assert_count = 7);
        let seen = std::thread::spawn(|| ExecutionContext::depth())
            .join()
            .unwrap();
        assert_eq!(seen, 0);
        assert_eq!(ExecutionContext::current().assert_count, 7);
    }

    #[test]
    fn test_frame_restored_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _guard = ExecutionContext::save();
            panic!("user code");
        });
        assert!(result.is_err());
        assert_eq!(ExecutionContext::depth(), 0);
    }
}
