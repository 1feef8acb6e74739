//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::models::{ProcessModel, TestFilter};
use crate::output::OutputFormat;

/// Test execution engine
#[derive(Parser, Debug)]
#[command(name = "caserun")]
#[command(version)]
#[command(about = "Load, explore and run test assemblies in process or in agents")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the standard locations)
    #[arg(long = "config", global = true, value_name = "FILE")]
    pub config_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run tests
    Run(RunArgs),

    /// List the tests a run would include
    Explore(SelectArgs),

    /// Count the tests a run would include
    Count(SelectArgs),

    /// Host an agent over stdin/stdout
    #[command(hide = true)]
    Agent(AgentArgs),

    /// Show or create configuration
    Config(ConfigArgs),
}

/// Files, process model and filter shared by every test command
#[derive(ClapArgs, Debug, Clone)]
pub struct SelectArgs {
    /// Test files or project manifests
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Where tests execute (InProcess, Separate, Multiple)
    #[arg(short, long)]
    pub process: Option<ProcessModel>,

    /// Select tests by full name or name prefix
    #[arg(short, long = "test", value_name = "NAME")]
    pub tests: Vec<String>,

    /// Include tests in a category
    #[arg(short, long = "category", value_name = "CAT")]
    pub categories: Vec<String>,

    /// Exclude tests in a category
    #[arg(short = 'x', long = "exclude-category", value_name = "CAT")]
    pub exclude_categories: Vec<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

impl SelectArgs {
    pub fn filter(&self) -> TestFilter {
        TestFilter::from_parts(&self.tests, &self.categories, &self.exclude_categories)
    }
}

/// Arguments for run command
#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Default case timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Stop at the first failing case
    #[arg(long)]
    pub stop_on_error: bool,

    /// Maximum agents running at once
    #[arg(short, long)]
    pub agents: Option<usize>,

    /// Save the report to a file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Format of the saved report (defaults to json-pretty)
    #[arg(long)]
    pub output_format: Option<OutputFormat>,

    /// Print each result as it finishes
    #[arg(long)]
    pub progress: bool,
}

/// Arguments for the hidden agent command
#[derive(ClapArgs, Debug)]
pub struct AgentArgs {
    /// Identifier reported in the ready message
    #[arg(long, default_value = "agent")]
    pub id: String,

    /// Log at debug level
    #[arg(long)]
    pub debug: bool,

    /// Extra arguments passed through from the package, after `--`
    #[arg(last = true)]
    pub extra: Vec<String>,
}

/// Arguments for config command
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(default_value = "./caserun.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Show environment overrides instead
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file to check
        file: Option<PathBuf>,
    },
}
