//! Output formatters for run results
//!
//! Provides JSON, Table, CSV and summary output formats.

use anyhow::Context;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::Path;

use crate::models::NodeKind;
use crate::results::{LoadSummary, ResultNode, ResultStatus, TestDescription, TestRunReport};

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "csv" => Ok(OutputFormat::Csv),
            "summary" => Ok(OutputFormat::Summary),
            other => Err(format!(
                "unknown format '{other}' (expected table, json, json-pretty, csv or summary)"
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonPretty => write!(f, "json-pretty"),
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Summary => write!(f, "summary"),
        }
    }
}

/// One leaf row of the CSV output
#[derive(Serialize)]
struct CsvRow<'a> {
    full_name: &'a str,
    status: ResultStatus,
    site: String,
    duration_ms: u64,
    assert_count: u64,
    message: &'a str,
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Format a single result line
    pub fn format_result(&self, result: &ResultNode) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(result).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Csv => self.format_rows_csv(&[result]).unwrap_or_default(),
            OutputFormat::Table | OutputFormat::Summary => self.format_result_line(result),
        }
    }

    fn status_label(&self, status: ResultStatus) -> String {
        let label = format!("{} {:<12}", status.symbol(), status.to_string().to_uppercase());
        if !self.colorize {
            return label;
        }
        let color = match status {
            ResultStatus::Passed => "32",
            ResultStatus::Failed | ResultStatus::Error => "31",
            ResultStatus::Skipped | ResultStatus::Ignored | ResultStatus::Inconclusive => "33",
            ResultStatus::Cancelled => "35",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    fn format_result_line(&self, result: &ResultNode) -> String {
        let mut line = format!(
            "{} {} [{}ms]",
            self.status_label(result.status),
            result.full_name,
            result.duration_ms
        );
        if let Some(message) = result.message.as_deref().filter(|m| !m.is_empty()) {
            line.push_str(&format!(" - {}", first_line(message)));
        }
        line
    }

    /// Format the report of a finished run
    pub fn format_report(&self, report: &TestRunReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Csv => self
                .format_rows_csv(&report.result.leaves())
                .unwrap_or_default(),
            OutputFormat::Summary => self.format_report_brief(report),
        }
    }

    fn format_report_table(&self, report: &TestRunReport) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!("║  Run {:56} ║\n", report.run_id));
        output.push_str(&format!("║  {:60} ║\n", truncate(&report.package_name, 60)));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        self.push_result_tree(&mut output, &report.result, 0);

        let failures: Vec<_> = report
            .result
            .leaves()
            .into_iter()
            .filter(|r| r.status.is_failure())
            .collect();
        if !failures.is_empty() {
            output.push_str("\n Failures:\n");
            output.push_str(" ───────────────────────────────────────────────────────────\n");
            for (i, failure) in failures.iter().enumerate() {
                output.push_str(&format!(
                    " {:2}) {} ({})\n",
                    i + 1,
                    failure.full_name,
                    failure.site
                ));
                if let Some(message) = &failure.message {
                    for line in message.lines() {
                        output.push_str(&format!("     {line}\n"));
                    }
                }
            }
        }

        let fail_str = if self.colorize && report.failed() > 0 {
            format!("\x1b[31m{}\x1b[0m", report.failed())
        } else {
            report.failed().to_string()
        };
        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", report.passed())
        } else {
            report.passed().to_string()
        };

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            " Overall: {}\n",
            self.status_label(report.status()).trim_end()
        ));
        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Skip: {} | Inconclusive: {}\n",
            report.total(),
            pass_str,
            fail_str,
            report.skipped(),
            report.inconclusive()
        ));
        output.push_str(&format!(
            " Pass Rate: {:.1}% | Asserts: {} | Duration: {}ms\n",
            report.pass_rate(),
            report.result.assert_count,
            report.duration_ms
        ));
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        output
    }

    fn push_result_tree(&self, output: &mut String, node: &ResultNode, depth: usize) {
        let indent = "  ".repeat(depth);
        if node.is_suite() {
            output.push_str(&format!(
                "{indent}{} {} ({}/{} passed, {}ms)\n",
                self.status_label(node.status).trim_end(),
                node.name,
                node.pass_count,
                node.total_count(),
                node.duration_ms
            ));
            for child in &node.children {
                self.push_result_tree(output, child, depth + 1);
            }
        } else {
            output.push_str(&format!(
                "{indent}{} {} [{}ms]\n",
                self.status_label(node.status),
                node.name,
                node.duration_ms
            ));
        }
    }

    fn format_report_brief(&self, report: &TestRunReport) -> String {
        format!(
            "{} {}: {}/{} passed, {} failed, {} skipped ({:.1}%) in {}ms",
            report.status().symbol(),
            report.package_name,
            report.passed(),
            report.total(),
            report.failed(),
            report.skipped(),
            report.pass_rate(),
            report.duration_ms
        )
    }

    fn format_rows_csv(&self, leaves: &[&ResultNode]) -> anyhow::Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for leaf in leaves {
            writer.serialize(CsvRow {
                full_name: &leaf.full_name,
                status: leaf.status,
                site: leaf.site.to_string(),
                duration_ms: leaf.duration_ms,
                assert_count: leaf.assert_count,
                message: leaf.message.as_deref().unwrap_or(""),
            })?;
        }
        let bytes = writer.into_inner().context("Failed to flush CSV output")?;
        Ok(String::from_utf8(bytes)?)
    }

    /// Format the tree returned by explore
    pub fn format_description(&self, description: &TestDescription) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(description).unwrap_or_default(),
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(description).unwrap_or_default()
            }
            OutputFormat::Csv | OutputFormat::Summary => {
                let mut names = description.case_names();
                names.push(String::new());
                names.join("\n")
            }
            OutputFormat::Table => {
                let mut output = String::new();
                push_description_tree(&mut output, description, 0);
                output.push_str(&format!("\n{} test cases\n", description.test_case_count));
                output
            }
        }
    }

    /// Format the outcome of a load
    pub fn format_load(&self, summary: &LoadSummary) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            _ => {
                let mut output = String::new();
                push_load_tree(&mut output, summary, 0);
                output
            }
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn push_description_tree(output: &mut String, node: &TestDescription, depth: usize) {
    let indent = "  ".repeat(depth);
    let categories = node.properties.get_all(crate::models::names::CATEGORY);
    let tag = if categories.is_empty() {
        String::new()
    } else {
        format!(" [{}]", categories.join(", "))
    };
    match node.kind {
        NodeKind::Case => output.push_str(&format!("{indent}- {}{tag}\n", node.name)),
        _ => output.push_str(&format!(
            "{indent}{} ({}){tag}\n",
            node.name, node.test_case_count
        )),
    }
    for child in &node.children {
        push_description_tree(output, child, depth + 1);
    }
}

fn push_load_tree(output: &mut String, summary: &LoadSummary, depth: usize) {
    let indent = "  ".repeat(depth);
    match &summary.error {
        Some(error) => output.push_str(&format!("{indent}✗ {}: {error}\n", summary.name)),
        None => output.push_str(&format!(
            "{indent}✓ {} ({} test cases)\n",
            summary.name, summary.test_case_count
        )),
    }
    for child in &summary.children {
        push_load_tree(output, child, depth + 1);
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let kept: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

/// Write a run report to a file
pub fn write_report_to_file(
    path: impl AsRef<Path>,
    report: &TestRunReport,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_report(report);

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
