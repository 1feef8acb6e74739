//! Results and aggregation
//!
//! Result nodes with their rollup fold, load summaries, explore descriptions
//! and the run-level report.

mod node;
mod report;
mod summary;

pub use node::{FailureSite, ResultNode, ResultStatus};
pub use report::TestRunReport;
pub use summary::{LoadSummary, TestDescription};
