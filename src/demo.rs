//! Built-in mock assembly
//!
//! The binary has no way to inspect compiled test files, so discovery is
//! served from suites registered here. `mock-assembly` covers every kind of
//! outcome the engine reports and doubles as an end-to-end fixture.

use std::time::{Duration, Instant};

use crate::context;
use crate::drivers::DiscoveryRegistry;
use crate::models::{Fixture, TestFault, TestNodeBuilder};

/// Name the mock assembly is registered under
pub const MOCK_ASSEMBLY: &str = "mock-assembly";

/// Expected totals for a full run of the mock assembly
pub mod expected {
    pub const TESTS: usize = 30;
    pub const PASSED: usize = 15;
    pub const FAILED: usize = 7;
    pub const SKIPPED: usize = 7;
    pub const INCONCLUSIVE: usize = 1;
}

/// Registry serving the mock assembly
pub fn registry() -> DiscoveryRegistry {
    DiscoveryRegistry::new().with(MOCK_ASSEMBLY, mock_assembly)
}

fn mock_assembly(name: &str) -> TestNodeBuilder {
    TestNodeBuilder::assembly(name)
        .child(TestNodeBuilder::suite("Assemblies").child(mock_fixture()))
        .child(
            TestNodeBuilder::suite("Singletons").child(
                TestNodeBuilder::fixture("OneTestCase")
                    .child(TestNodeBuilder::case("TestCase", |_| Ok(()))),
            ),
        )
        .child(
            TestNodeBuilder::suite("TestAssembly").child(
                TestNodeBuilder::fixture("MockTestFixture")
                    .child(TestNodeBuilder::case("MyTest", |_| Ok(()))),
            ),
        )
        .child(
            TestNodeBuilder::fixture("IgnoredFixture")
                .ignore("BECAUSE")
                .children(plain_cases(&["Test1", "Test2", "Test3"])),
        )
        .child(
            TestNodeBuilder::fixture("ExplicitFixture")
                .explicit()
                .children(plain_cases(&["Test1", "Test2"])),
        )
        .child(
            TestNodeBuilder::fixture("BadFixture")
                .fixture_factory(|| {
                    Err(TestFault::defect(
                        "MissingConstructor",
                        "No suitable constructor was found",
                    ))
                })
                .child(TestNodeBuilder::case("SomeTest", |_| Ok(()))),
        )
        .child(fixture_with_test_cases())
        .child(parameterized_fixture())
        .child(timing_fixture())
}

fn plain_cases(names: &[&str]) -> Vec<TestNodeBuilder> {
    names
        .iter()
        .map(|name| TestNodeBuilder::case(*name, |_| Ok(())))
        .collect()
}

fn mock_fixture() -> TestNodeBuilder {
    TestNodeBuilder::fixture("MockTestFixture")
        .description("Fake Test Fixture")
        .category("FixtureCategory")
        .child(TestNodeBuilder::case("MockTest1", |_| Ok(())).description("Mock Test #1"))
        .child(
            TestNodeBuilder::case("MockTest2", |_| Ok(()))
                .category("MockCategory")
                .property("Severity", "Critical"),
        )
        .child(
            TestNodeBuilder::case("MockTest3", |_| {
                Err(TestFault::Success {
                    message: Some("Succeeded!".to_string()),
                })
            })
            .category("MockCategory")
            .category("AnotherCategory"),
        )
        .child(
            TestNodeBuilder::case("MockTest4", |_| Ok(()))
                .ignore("ignoring this test method for now")
                .category("Foo"),
        )
        .child(TestNodeBuilder::case("MockTest5", |_| Ok(())).not_runnable("Method is not public"))
        .child(TestNodeBuilder::case("FailingTest", |_| {
            Err(TestFault::assertion("Intentional failure"))
        }))
        .child(
            TestNodeBuilder::case("TestWithManyProperties", |_| Ok(()))
                .property("TargetMethod", "SomeClassName")
                .property("Size", "5"),
        )
        .child(
            TestNodeBuilder::case("ExplicitlyRunTest", |_| Ok(()))
                .explicit()
                .category("Special"),
        )
        .child(
            TestNodeBuilder::case("NotRunnableTest", |_| Ok(()))
                .not_runnable("No arguments were provided"),
        )
        .child(TestNodeBuilder::case("InconclusiveTest", |_| {
            Err(TestFault::inconclusive("No valid data"))
        }))
        .child(TestNodeBuilder::case("TestWithException", |_| {
            Err(TestFault::defect("Exception", "Intentional Exception"))
        }))
}

fn fixture_with_test_cases() -> TestNodeBuilder {
    let sums = [(2, 2, 4), (9, 11, 20)].map(|(x, y, sum)| {
        TestNodeBuilder::case(format!("MethodWithParameters({x},{y})"), move |_| {
            context::check_eq(sum, x + y)
        })
    });
    let generic = ["GenericMethod(2,4)", "GenericMethod(9.2,11.7)"]
        .map(|name| TestNodeBuilder::case(name, |_| Ok(())));

    TestNodeBuilder::fixture("FixtureWithTestCases")
        .child(TestNodeBuilder::group("MethodWithParameters").children(sums))
        .child(TestNodeBuilder::group("GenericMethod").children(generic))
}

fn parameterized_fixture() -> TestNodeBuilder {
    let instance = |num: i32| {
        TestNodeBuilder::fixture(format!("ParameterizedFixture({num})"))
            .fixture_factory(move || Ok(Fixture::new(num)))
            .children(["Test1", "Test2"].map(|name| {
                TestNodeBuilder::case(name, |fixture: &Fixture| {
                    let num = fixture.get::<i32>().copied().unwrap_or_default();
                    context::check(num > 0, "fixture argument was not supplied")
                })
            }))
    };
    TestNodeBuilder::suite("ParameterizedFixture")
        .child(instance(5))
        .child(instance(42))
}

fn timing_fixture() -> TestNodeBuilder {
    TestNodeBuilder::fixture("TimingFixture")
        .child(
            TestNodeBuilder::case("SlowCase", |_| {
                let start = Instant::now();
                while !context::is_cancel_requested() && start.elapsed() < Duration::from_secs(1) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            })
            .timeout_ms(50),
        )
        .child(
            TestNodeBuilder::case("QuickCase", |_| {
                context::write_output("finished well inside the limit\n");
                Ok(())
            })
            .timeout_ms(5_000),
        )
        .child(
            TestNodeBuilder::case("OverMaxTime", |_| {
                std::thread::sleep(Duration::from_millis(30));
                Ok(())
            })
            .max_time_ms(5),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{FrameworkDriver, TestDriver};
    use crate::listener::NullListener;
    use crate::models::{TestFilter, TestPackage, DEFAULT_ID_SEED};
    use crate::results::ResultStatus;
    use std::sync::Arc;

    const FILE: &str = "mock-assembly.dll";

    fn driver() -> FrameworkDriver {
        let driver = FrameworkDriver::new(Arc::new(registry()), DEFAULT_ID_SEED);
        driver.load(&TestPackage::new(FILE)).unwrap();
        driver
    }

    fn name(path: &str) -> String {
        format!("{FILE}.{path}")
    }

    #[test]
    fn test_full_run_totals() {
        let result = driver()
            .run(Arc::new(NullListener), &TestFilter::Empty)
            .unwrap();

        assert_eq!(result.total_count(), expected::TESTS);
        assert_eq!(result.pass_count, expected::PASSED);
        assert_eq!(result.fail_count, expected::FAILED);
        assert_eq!(result.skip_count, expected::SKIPPED);
        assert_eq!(result.inconclusive_count, expected::INCONCLUSIVE);
        assert_eq!(result.status, ResultStatus::Failed);
    }

    #[test]
    fn test_outcome_kinds() {
        let result = driver()
            .run(Arc::new(NullListener), &TestFilter::Empty)
            .unwrap();
        let status = |path: &str| result.find(&name(path)).map(|r| r.status);

        assert_eq!(status("Assemblies.MockTestFixture.MockTest3"), Some(ResultStatus::Passed));
        assert_eq!(status("Assemblies.MockTestFixture.FailingTest"), Some(ResultStatus::Failed));
        assert_eq!(status("Assemblies.MockTestFixture.TestWithException"), Some(ResultStatus::Error));
        assert_eq!(status("Assemblies.MockTestFixture.MockTest4"), Some(ResultStatus::Ignored));
        assert_eq!(status("Assemblies.MockTestFixture.ExplicitlyRunTest"), Some(ResultStatus::Skipped));
        assert_eq!(status("Assemblies.MockTestFixture.NotRunnableTest"), Some(ResultStatus::Failed));
        assert_eq!(status("Assemblies.MockTestFixture.InconclusiveTest"), Some(ResultStatus::Inconclusive));
        assert_eq!(status("IgnoredFixture.Test2"), Some(ResultStatus::Ignored));
        assert_eq!(status("TimingFixture.SlowCase"), Some(ResultStatus::Failed));
        assert_eq!(status("TimingFixture.QuickCase"), Some(ResultStatus::Passed));
        assert_eq!(status("TimingFixture.OverMaxTime"), Some(ResultStatus::Failed));

        let bad = result.find(&name("BadFixture.SomeTest")).unwrap();
        assert!(bad.status.is_failure());
        assert!(bad.message.as_deref().unwrap_or("").starts_with("OneTimeSetUp:"));
    }

    #[test]
    fn test_explicit_case_runs_when_named() {
        let filter = TestFilter::from_parts(
            &[name("Assemblies.MockTestFixture.ExplicitlyRunTest")],
            &[],
            &[],
        );
        let result = driver().run(Arc::new(NullListener), &filter).unwrap();
        assert_eq!(result.total_count(), 1);
        assert_eq!(result.pass_count, 1);
    }

    #[test]
    fn test_category_counts() {
        let driver = driver();
        let mock = TestFilter::from_parts(&[], &["MockCategory".to_string()], &[]);
        assert_eq!(driver.count_test_cases(&mock).unwrap(), 2);

        let fixture = TestFilter::from_parts(&[], &["FixtureCategory".to_string()], &[]);
        assert_eq!(driver.count_test_cases(&fixture).unwrap(), 11);
    }

    #[test]
    fn test_parameterized_cases_pass() {
        let filter = TestFilter::from_parts(&[name("ParameterizedFixture")], &[], &[]);
        let result = driver().run(Arc::new(NullListener), &filter).unwrap();
        assert_eq!(result.pass_count, 4);
        assert_eq!(result.fail_count, 0);
    }
}
