//! Command model
//!
//! A test node is turned into a chain of commands by [`CommandBuilder`]:
//! wrappers for setup/teardown, time limits, thread affinity, repetition and
//! the execution context, around a leaf that invokes user code. Executing a
//! command always yields a [`ResultNode`]; faults never escape a command.

mod builder;
mod composite;
mod context;
mod hooks;
mod method;
mod repeat;
mod skip;
mod thread;
mod timing;

pub use builder::CommandBuilder;
pub use composite::CompositeCommand;
pub use context::ContextCommand;
pub use hooks::SetUpTearDownCommand;
pub use method::{ExpectedFaultCommand, TestMethodCommand};
pub use repeat::RepeatCommand;
pub use skip::SkipCommand;
pub use thread::DedicatedThreadCommand;
pub use timing::{MaxTimeCommand, TimeoutCommand};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::models::{Fixture, TestFault, TestFn, TestNode, TestOutcome};
use crate::results::ResultNode;

/// Executable unit built around one test node
pub trait TestCommand: Send + Sync {
    /// Node this command was built for
    fn test(&self) -> &Arc<TestNode>;

    /// Run against the enclosing fixture instance
    fn execute(&self, fixture: &Fixture) -> ResultNode;
}

/// Call user code, turning a panic into a fault
pub(crate) fn invoke(f: &TestFn, fixture: &Fixture) -> TestOutcome {
    catch_unwind(AssertUnwindSafe(|| f(fixture)))
        .unwrap_or_else(|payload| Err(TestFault::from_panic(payload)))
}

/// Run a hook; an explicit early pass from a hook does not stop the chain
pub(crate) fn invoke_hook(f: &TestFn, fixture: &Fixture) -> TestOutcome {
    match invoke(f, fixture) {
        Err(TestFault::Success { .. }) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared helpers for command tests

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::context::{ContextFrame, ContextGuard, ExecutionContext};
    use crate::listener::{CollectingListener, TestListener};
    use crate::models::{Fixture, TestOutcome};

    /// Ordered log of hook and body calls
    #[derive(Clone, Default)]
    pub struct CallLog(Arc<Mutex<Vec<String>>>);

    impl CallLog {
        pub fn record(&self, entry: &str) {
            self.0.lock().unwrap().push(entry.to_string());
        }

        pub fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }

        /// Hook that records `entry` and succeeds
        pub fn hook(&self, entry: &'static str) -> impl Fn(&Fixture) -> TestOutcome + Send + Sync {
            let log = self.clone();
            move |_| {
                log.record(entry);
                Ok(())
            }
        }
    }

    #[derive(Clone, Default)]
    pub struct Counter(Arc<AtomicUsize>);

    impl Counter {
        pub fn bump(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst) + 1
        }

        pub fn get(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Establish a base frame reporting into a fresh collecting listener
    pub fn base_frame() -> (ContextGuard, Arc<CollectingListener>) {
        let listener = Arc::new(CollectingListener::new());
        let frame = ContextFrame::new(
            listener.clone() as Arc<dyn TestListener>,
            Default::default(),
        );
        (ExecutionContext::establish(frame), listener)
    }
}
