//! Data models for test discovery and selection
//!
//! The static test tree, the faults user code raises, selection filters and
//! the package description handed to runners.

mod fault;
mod filter;
mod package;
mod properties;
mod test_node;

pub use fault::{TestFault, TestOutcome};
pub use filter::TestFilter;
pub use package::{settings, ProcessModel, TestPackage};
pub use properties::{names, PropertyBag};
pub use test_node::{
    Ancestors, ExpectedFault, Fixture, FixtureFactory, HookLevel, MessageMatch, NodeKind,
    RunState, TestFn, TestId, TestNode, TestNodeBuilder, DEFAULT_ID_SEED,
};
