//! Faults raised by test code
//!
//! Test bodies, hooks and fixture factories return `Result<(), TestFault>`.
//! A fault can also be raised from deep inside user code with
//! [`TestFault::raise`], which unwinds with the fault as panic payload.

use std::any::Any;
use std::fmt;
use std::panic::Location;

/// Outcome of invoking one piece of user code
pub type TestOutcome = Result<(), TestFault>;

/// A fault or cooperative signal raised while executing user code
#[derive(Clone, Debug, PartialEq)]
pub enum TestFault {
    /// An assertion did not hold
    Assertion {
        message: String,
        trace: Option<String>,
    },
    /// The test asked to be ignored
    Ignore { reason: String },
    /// The test could not reach a verdict
    Inconclusive { message: String },
    /// Explicit early pass
    Success { message: Option<String> },
    /// Cooperative cancellation
    Cancelled { message: String },
    /// Any unexpected failure in user or infrastructure code
    Defect {
        kind: String,
        message: String,
        trace: Option<String>,
    },
    /// Carries a failure raised while constructing a fixture instance
    FixtureConstruction(Box<TestFault>),
}

impl TestFault {
    /// Assertion failure, traced to the caller
    #[track_caller]
    pub fn assertion(message: impl Into<String>) -> Self {
        TestFault::Assertion {
            message: message.into(),
            trace: Some(format!("at {}", Location::caller())),
        }
    }

    pub fn ignore(reason: impl Into<String>) -> Self {
        TestFault::Ignore {
            reason: reason.into(),
        }
    }

    pub fn inconclusive(message: impl Into<String>) -> Self {
        TestFault::Inconclusive {
            message: message.into(),
        }
    }

    pub fn success() -> Self {
        TestFault::Success { message: None }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        TestFault::Cancelled {
            message: message.into(),
        }
    }

    /// Unexpected fault of the given kind, traced to the caller
    #[track_caller]
    pub fn defect(kind: impl Into<String>, message: impl Into<String>) -> Self {
        TestFault::Defect {
            kind: kind.into(),
            message: message.into(),
            trace: Some(format!("at {}", Location::caller())),
        }
    }

    /// Build a defect from a typed error, keeping its source chain in the message
    #[track_caller]
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(inner) = source {
            message.push_str(&format!("\n  caused by: {inner}"));
            source = inner.source();
        }
        Self::defect(short_type_name::<E>(), message)
    }

    /// Wrap a fixture construction failure
    pub fn construction(inner: TestFault) -> Self {
        TestFault::FixtureConstruction(Box::new(inner))
    }

    /// Convert a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<TestFault>() {
            Ok(fault) => return *fault,
            Err(other) => other,
        };
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        TestFault::Defect {
            kind: "panic".to_string(),
            message,
            trace: None,
        }
    }

    /// Unwind out of user code carrying this fault
    pub fn raise(self) -> ! {
        std::panic::panic_any(self)
    }

    /// Strip one level of the construction wrapper
    pub fn unwrap_construction(self) -> TestFault {
        match self {
            TestFault::FixtureConstruction(inner) => *inner,
            other => other,
        }
    }

    /// Kind used for expected-fault matching
    pub fn kind(&self) -> &str {
        match self {
            TestFault::Assertion { .. } => "assertion",
            TestFault::Ignore { .. } => "ignore",
            TestFault::Inconclusive { .. } => "inconclusive",
            TestFault::Success { .. } => "success",
            TestFault::Cancelled { .. } => "cancelled",
            TestFault::Defect { kind, .. } => kind,
            TestFault::FixtureConstruction(inner) => inner.kind(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            TestFault::Assertion { message, .. }
            | TestFault::Inconclusive { message }
            | TestFault::Cancelled { message }
            | TestFault::Defect { message, .. } => message.clone(),
            TestFault::Ignore { reason } => reason.clone(),
            TestFault::Success { message } => message.clone().unwrap_or_default(),
            TestFault::FixtureConstruction(inner) => inner.message(),
        }
    }

    pub fn trace(&self) -> Option<&str> {
        match self {
            TestFault::Assertion { trace, .. } | TestFault::Defect { trace, .. } => trace.as_deref(),
            TestFault::FixtureConstruction(inner) => inner.trace(),
            _ => None,
        }
    }
}

impl fmt::Display for TestFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestFault::Defect { kind, message, .. } => write!(f, "{kind}: {message}"),
            other => write!(f, "{}: {}", other.kind(), other.message()),
        }
    }
}

/// Lets test bodies use `?` on ordinary errors
impl<E> From<E> for TestFault
where
    E: std::error::Error + 'static,
{
    #[track_caller]
    fn from(err: E) -> Self {
        TestFault::from_error(&err)
    }
}

fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
