//! Output formatting module
//!
//! Renders run reports, explore trees and load summaries for the console
//! or a results file.

mod formatter;

pub use formatter::{write_report_to_file, OutputFormat, ResultFormatter};
