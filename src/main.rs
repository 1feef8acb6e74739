//! caserun - test execution engine
//!
//! Command line front end over the engine library.
//!
//! ## Usage
//!
//! ```bash
//! # Run every test in the built-in mock assembly
//! caserun run mock-assembly.dll
//!
//! # Run one fixture in a separate agent process
//! caserun run mock-assembly.dll --process Separate --test mock-assembly.dll.Assemblies
//!
//! # Spread several files over agents, two at a time
//! caserun run a.dll b.dll c.dll --process Multiple --agents 2
//!
//! # List or count the tests a filter selects
//! caserun explore mock-assembly.dll --category MockCategory
//! caserun count mock-assembly.dll -x FixtureCategory
//!
//! # Write an example configuration
//! caserun config init ./caserun.yaml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use caserun::agent::{serve, ProcessLauncher, TestAgency};
use caserun::cli::{self, Args};
use caserun::config::{print_env_help, AppConfig, ConfigFile, EnvConfig};
use caserun::demo;
use caserun::drivers::DriverService;
use caserun::listener::{ChannelListener, FanoutListener, TestEvent, TestListener, TracingListener};
use caserun::models::TestPackage;
use caserun::output::{write_report_to_file, OutputFormat, ResultFormatter};
use caserun::project::ProjectService;
use caserun::runners::{EngineServices, MasterRunner};
use caserun::utils::{init_agent_logger, init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let Args {
        command,
        verbose,
        config_file,
    } = Args::parse();

    let setup = || -> Result<AppConfig> {
        let mut config = load_config(config_file.as_deref())?;
        if verbose {
            config.log_level = LogLevel::Debug;
        }
        init_logger(config.log_level);
        Ok(config)
    };

    match command {
        cli::Command::Run(run_args) => run_tests(run_args, setup()?).await,
        cli::Command::Explore(select) => {
            explore_tests(select, setup()?).await?;
            Ok(ExitCode::SUCCESS)
        }
        cli::Command::Count(select) => {
            count_tests(select, setup()?).await?;
            Ok(ExitCode::SUCCESS)
        }
        cli::Command::Config(config_args) => {
            init_logger(if verbose { LogLevel::Debug } else { LogLevel::Info });
            manage_config(config_args, config_file.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        // Agents skip configuration; everything they need arrives with the package
        cli::Command::Agent(agent_args) => run_agent(agent_args).await,
    }
}

/// File config, then `CASERUN_*` overrides
fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let env = EnvConfig::load();
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));

    let file = match path {
        Some(path) => ConfigFile::load(&path)?,
        None => ConfigFile::load_default()?,
    };

    let mut config = file.engine;
    config.apply_env(&env);
    config.validate()?;
    Ok(config)
}

fn drivers() -> DriverService {
    DriverService::for_discovery(Arc::new(demo::registry()))
}

fn build_services(config: &AppConfig) -> Result<EngineServices> {
    let launcher =
        ProcessLauncher::current_exe().context("Failed to locate the caserun executable")?;
    let agency = TestAgency::new(Arc::new(launcher)).with_runtimes(config.runtimes.clone());
    Ok(EngineServices::new(
        drivers(),
        ProjectService::with_defaults(),
        Arc::new(agency),
    ))
}

fn build_package(files: &[PathBuf], config: &AppConfig) -> TestPackage {
    let mut package = match files {
        [single] => TestPackage::new(single),
        many => TestPackage::from_files(many),
    };
    config.apply_to(&mut package);
    package
}

fn build_master(select: &cli::SelectArgs, mut config: AppConfig) -> Result<MasterRunner> {
    if let Some(model) = select.process {
        config.process_model = model;
    }
    let package = build_package(&select.files, &config);
    debug!("Package {} ({})", package.display_name(), package.process_model());
    Ok(MasterRunner::new(package, build_services(&config)?))
}

async fn run_tests(args: cli::RunArgs, mut config: AppConfig) -> Result<ExitCode> {
    if let Some(timeout) = args.timeout {
        config.default_timeout_ms = Some(timeout);
    }
    if let Some(agents) = args.agents {
        config.max_agents = agents.max(1);
    }
    config.stop_on_error |= args.stop_on_error;

    let master = Arc::new(build_master(&args.select, config)?);
    let filter = args.select.filter();
    let formatter = ResultFormatter::new(args.select.format);

    let mut listener = FanoutListener::new().with(Arc::new(TracingListener));
    let mut printer = None;
    if args.progress {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        listener = listener.with(Arc::new(ChannelListener::new(tx)));
        printer = Some(tokio::spawn(async move {
            let formatter = ResultFormatter::new(OutputFormat::Summary);
            while let Some(event) = rx.recv().await {
                if let TestEvent::TestFinished { result } = event {
                    println!("{}", formatter.format_result(&result));
                }
            }
        }));
    }
    let listener: Arc<dyn TestListener> = Arc::new(listener);

    info!("Running {}", master.package().display_name());
    let handle = master.run_async(listener, filter);

    let interrupt = {
        let master = Arc::clone(&master);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping the run");
                master.cancel_run(false).await;
            }
        })
    };

    let outcome = handle.wait().await;
    interrupt.abort();
    if let Err(e) = master.dispose().await {
        warn!("Failed to release runners: {}", e);
    }
    if let Some(printer) = printer {
        // Drains once the run task has dropped the last sender
        let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    }

    let report = outcome?;
    println!("{}", formatter.format_report(&report));

    if let Some(path) = &args.output {
        let format = args.output_format.unwrap_or(OutputFormat::JsonPretty);
        write_report_to_file(path, &report, format)?;
        println!("✓ Report saved to {}", path.display());
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn explore_tests(select: cli::SelectArgs, config: AppConfig) -> Result<()> {
    let master = build_master(&select, config)?;
    let formatter = ResultFormatter::new(select.format);

    let summary = master.load().await?;
    if !summary.errors().is_empty() {
        eprintln!("{}", formatter.format_load(&summary));
    }

    let description = master.explore(&select.filter()).await;
    master.dispose().await?;
    println!("{}", formatter.format_description(&description?));
    Ok(())
}

async fn count_tests(select: cli::SelectArgs, config: AppConfig) -> Result<()> {
    let master = build_master(&select, config)?;
    let count = master.count_test_cases(&select.filter()).await;
    master.dispose().await?;
    println!("{}", count?);
    Ok(())
}

async fn run_agent(args: cli::AgentArgs) -> Result<ExitCode> {
    let level = if args.debug {
        LogLevel::Debug
    } else {
        EnvConfig::load().log_level.unwrap_or(LogLevel::Warn)
    };
    init_agent_logger(level);
    if !args.extra.is_empty() {
        debug!("Agent {} extra arguments: {:?}", args.id, args.extra);
    }

    info!("Agent {} serving on stdio", args.id);
    serve(tokio::io::stdin(), tokio::io::stdout(), drivers(), args.id).await?;
    Ok(ExitCode::SUCCESS)
}

fn manage_config(args: cli::ConfigArgs, explicit: Option<&Path>) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            ConfigFile::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { env, format } => {
            if env {
                EnvConfig::load().print_summary();
                println!();
                print_env_help();
            } else {
                let config = ConfigFile {
                    engine: load_config(explicit)?,
                    ..Default::default()
                };
                let output = if format == "json" {
                    serde_json::to_string_pretty(&config)?
                } else {
                    serde_yaml::to_string(&config)?
                };
                println!("{output}");
            }
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(|| explicit.map(Path::to_path_buf))
                .or_else(ConfigFile::find)
                .unwrap_or_else(|| PathBuf::from("./caserun.yaml"));

            match ConfigFile::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}
