//! Leaf commands invoking a case body

use std::sync::Arc;

use super::{invoke, TestCommand};
use crate::models::{ExpectedFault, Fixture, TestFault, TestNode, TestOutcome};
use crate::results::{FailureSite, ResultNode, ResultStatus};

/// Invokes the body and maps its outcome onto a fresh result
pub struct TestMethodCommand {
    test: Arc<TestNode>,
}

impl TestMethodCommand {
    pub fn new(test: Arc<TestNode>) -> Self {
        Self { test }
    }
}

impl TestCommand for TestMethodCommand {
    fn test(&self) -> &Arc<TestNode> {
        &self.test
    }

    fn execute(&self, fixture: &Fixture) -> ResultNode {
        let outcome = match self.test.body() {
            Some(body) => invoke(body, fixture),
            None => Err(TestFault::defect("NoBody", "Case has no body to invoke")),
        };
        outcome_to_result(&self.test, outcome)
    }
}

/// Invokes the body and checks it raises the declared fault
pub struct ExpectedFaultCommand {
    test: Arc<TestNode>,
    expected: ExpectedFault,
}

impl ExpectedFaultCommand {
    pub fn new(test: Arc<TestNode>, expected: ExpectedFault) -> Self {
        Self { test, expected }
    }

    fn reclassify(&self, outcome: TestOutcome) -> TestOutcome {
        let expected = &self.expected;
        match outcome {
            Ok(()) => Err(TestFault::assertion(format!(
                "Expected: {} but no fault was raised",
                expected.describe()
            ))),
            // Signals and assertion failures keep their meaning unless asked for
            Err(fault @ (TestFault::Ignore { .. }
            | TestFault::Inconclusive { .. }
            | TestFault::Success { .. }
            | TestFault::Cancelled { .. })) => Err(fault),
            Err(fault @ TestFault::Assertion { .. })
                if expected.kind.as_deref() != Some("assertion") =>
            {
                Err(fault)
            }
            Err(fault) => {
                let fault = fault.unwrap_construction();
                if let Some(kind) = &expected.kind {
                    if fault.kind() != kind {
                        return Err(TestFault::assertion(format!(
                            "An unexpected fault kind was raised\n  Expected: {}\n  But was:  {}: {}",
                            kind,
                            fault.kind(),
                            fault.message()
                        )));
                    }
                }
                if !expected.message_matches(&fault.message()) {
                    return Err(TestFault::assertion(format!(
                        "The fault message text was incorrect\n  Expected: {}\n  But was:  {}",
                        expected.message.as_deref().unwrap_or_default(),
                        fault.message()
                    )));
                }
                Ok(())
            }
        }
    }
}

impl TestCommand for ExpectedFaultCommand {
    fn test(&self) -> &Arc<TestNode> {
        &self.test
    }

    fn execute(&self, fixture: &Fixture) -> ResultNode {
        let outcome = match self.test.body() {
            Some(body) => self.reclassify(invoke(body, fixture)),
            None => Err(TestFault::defect("NoBody", "Case has no body to invoke")),
        };
        outcome_to_result(&self.test, outcome)
    }
}

fn outcome_to_result(test: &TestNode, outcome: TestOutcome) -> ResultNode {
    let mut result = ResultNode::new(test);
    match outcome {
        Ok(()) => result.set_status(ResultStatus::Passed, None),
        Err(fault) => result.record_fault(&fault, FailureSite::Test),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageMatch, TestNodeBuilder};

    fn run(builder: TestNodeBuilder) -> ResultNode {
        let node = builder.build().unwrap();
        match node.expected_fault().cloned() {
            Some(expected) => ExpectedFaultCommand::new(node, expected).execute(&Fixture::none()),
            None => TestMethodCommand::new(node).execute(&Fixture::none()),
        }
    }

    #[test]
    fn test_passing_body() {
        let result = run(TestNodeBuilder::case("ok", |_| Ok(())));
        assert_eq!(result.status, ResultStatus::Passed);
        assert_eq!(result.full_name, "ok");
    }

    #[test]
    fn test_panic_maps_to_error() {
        let result = run(TestNodeBuilder::case("boom", |_| panic!("index out of range")));
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.message.as_deref(), Some("panic: index out of range"));
    }

    #[test]
    fn test_raised_fault_maps_like_returned() {
        let result = run(TestNodeBuilder::case("deep", |_| {
            TestFault::inconclusive("no data").raise()
        }));
        assert_eq!(result.status, ResultStatus::Inconclusive);
    }

    #[test]
    fn test_expected_fault_matches() {
        let result = run(
            TestNodeBuilder::case("parse", |_| {
                "x".parse::<i32>()?;
                Ok(())
            })
            .expect_fault(
                ExpectedFault::of_kind("ParseIntError")
                    .with_message("invalid digit", MessageMatch::StartsWith),
            ),
        );
        assert_eq!(result.status, ResultStatus::Passed);
    }

    #[test]
    fn test_expected_fault_missing() {
        let result = run(
            TestNodeBuilder::case("quiet", |_| Ok(())).expect_fault(ExpectedFault::any()),
        );
        assert_eq!(result.status, ResultStatus::Failed);
        assert!(result.message.unwrap().contains("no fault was raised"));
    }

    #[test]
    fn test_expected_fault_wrong_kind() {
        let result = run(
            TestNodeBuilder::case("wrong", |_| Err(TestFault::defect("IoError", "disk")))
                .expect_fault(ExpectedFault::of_kind("ParseIntError")),
        );
        assert_eq!(result.status, ResultStatus::Failed);
        assert!(result.message.unwrap().contains("unexpected fault kind"));
    }

    #[test]
    fn test_expected_fault_keeps_ignore() {
        let result = run(
            TestNodeBuilder::case("later", |_| Err(TestFault::ignore("not yet")))
                .expect_fault(ExpectedFault::any()),
        );
        assert_eq!(result.status, ResultStatus::Ignored);
    }
}
