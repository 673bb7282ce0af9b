//! atacflow CLI Entry Point
//!
//! Plans and runs the ATAC-seq pipeline for a configuration file.
//!
//! # Usage
//!
//! ```bash
//! # Build every default output
//! atacflow atacflow.yaml
//!
//! # Preview commands without running anything
//! atacflow atacflow.yaml --dry-run
//!
//! # Build one file, eight jobs at a time
//! atacflow atacflow.yaml --target results/macs2/lib1_peaks.broadPeak.noblacklist --parallel 8
//!
//! # Stop at the first failure and write a JSON report
//! atacflow atacflow.yaml --abort-on-failure --report run.json
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use log::{error, info, warn};

use atacflow::config::{IdentityResolver, ReferenceTables};
use atacflow::execution::{FailurePolicy, RunReport};
use atacflow::workflow::{default_targets, validate_catalog};
use atacflow::{load_config, Catalog, Engine, Planner, APP_NAME, VERSION};

/// Default configuration file used when none is specified.
const DEFAULT_CONFIG: &str = "atacflow.yaml";

/// Command-line options parsed from arguments.
#[derive(Debug, Default)]
struct Options {
    config_path: Option<String>,
    targets: Vec<String>,
    dry_run: bool,
    max_parallel: Option<usize>,
    max_threads: Option<usize>,
    timeout: Option<Duration>,
    abort_on_failure: bool,
    force: bool,
    report_path: Option<PathBuf>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("ATAC-seq rule-graph pipeline");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: atacflow [OPTIONS] [CONFIG_FILE]");
    println!();
    println!("Arguments:");
    println!("  [CONFIG_FILE]         Pipeline configuration (default: {})", DEFAULT_CONFIG);
    println!();
    println!("Options:");
    println!("  --target PATH         Build this file (repeatable; default: all outputs)");
    println!("  --dry-run             Preview commands without execution");
    println!("  --parallel N          Maximum parallel jobs (default: CPU count)");
    println!("  --threads N           Thread ceiling per job (default: CPU count)");
    println!("  --timeout SECS        Fail any job running longer than SECS");
    println!("  --abort-on-failure    Stop starting jobs after the first failure");
    println!("  --force               Re-run jobs whose outputs are current");
    println!("  --report PATH         Write a JSON run report");
    println!("  --verbose             Enable debug logging");
    println!("  --help                Show this help message");
    println!("  --version             Show version information");
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", flag))
}

fn parse_number(value: &str, flag: &str) -> Result<usize, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", flag, value))
}

/// Parses command-line arguments into an Options struct.
fn parse_arguments(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" | "-n" => options.dry_run = true,
            "--verbose" | "-v" => options.verbose = true,
            "--abort-on-failure" => options.abort_on_failure = true,
            "--force" => options.force = true,
            "--target" => {
                let value = next_value(args, &mut i, arg)?;
                options.targets.push(value.to_string());
            }
            "--parallel" => {
                let value = next_value(args, &mut i, arg)?;
                options.max_parallel = Some(parse_number(value, arg)?);
            }
            "--threads" => {
                let value = next_value(args, &mut i, arg)?;
                options.max_threads = Some(parse_number(value, arg)?);
            }
            "--timeout" => {
                let value = next_value(args, &mut i, arg)?;
                let secs = parse_number(value, arg)?;
                options.timeout = Some(Duration::from_secs(secs as u64));
            }
            "--report" => {
                let value = next_value(args, &mut i, arg)?;
                options.report_path = Some(PathBuf::from(value));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if options.config_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                options.config_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    Ok(options)
}

/// Prints the colored per-status totals of a run.
fn print_summary(report: &RunReport) {
    println!();
    println!("{}", "Run Summary".bold());
    println!("  Completed:  {}", report.completed().to_string().green());
    println!("  Up to date: {}", report.up_to_date());
    if report.failed() > 0 {
        println!("  Failed:     {}", report.failed().to_string().red());
    }
    if report.skipped() > 0 {
        println!("  Skipped:    {}", report.skipped().to_string().yellow());
    }
    if report.cancelled() > 0 {
        println!("  Cancelled:  {}", report.cancelled().to_string().yellow());
    }

    for record in &report.jobs {
        if let atacflow::execution::JobStatus::Failed(reason) = &record.status {
            println!("  {} {}: {}", "x".red(), record.id, reason);
        }
    }

    if let Some(resources) = &report.resources {
        if resources.samples > 0 {
            println!();
            println!("Resource Usage:");
            println!("  Average CPU: {:.1}%", resources.average_cpu);
            println!(
                "  Peak Memory: {} MB of {} MB",
                resources.peak_memory_mb, resources.total_memory_mb
            );
        }
    }
}

/// Main application flow. Returns whether every job succeeded.
async fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let options = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(options.verbose);
    print_banner();

    if options.dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
        println!();
    }

    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    info!("Loading configuration: {}", config_path);
    let config = load_config(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let resolver = IdentityResolver::new(&config, ReferenceTables::builtin())?;
    info!(
        "Configuration loaded: {} libraries, results under {}",
        resolver.libraries().len(),
        resolver.results().display()
    );

    let catalog = Catalog::standard(resolver.results());
    validate_catalog(&catalog)?;

    let targets = if options.targets.is_empty() {
        default_targets(&catalog, &resolver)?
    } else {
        options.targets.clone()
    };

    let mut planner = Planner::new(&catalog, &resolver).with_leaf_check(!options.dry_run);
    if let Some(threads) = options.max_threads {
        planner = planner.with_max_threads(threads);
    }
    let plan = planner.plan(&targets)?;
    info!(
        "Planned {} jobs for {} targets",
        plan.len(),
        targets.len()
    );

    let mut engine = Engine::new(plan);
    for (class, &limit) in &config.resources {
        engine.set_resource_limit(class.clone(), limit);
    }
    if let Some(parallel) = options.max_parallel {
        engine.set_max_parallel(parallel);
    }
    engine.set_timeout(options.timeout);
    engine.set_dry_run(options.dry_run);
    engine.set_force(options.force);
    if options.abort_on_failure {
        engine.set_failure_policy(FailurePolicy::AbortOnFirst);
    }
    if let Some(path) = &options.report_path {
        engine.set_report_path(path);
    }

    let token = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, letting running jobs finish");
            token.cancel();
        }
    });

    let report = engine.run().await?;

    print_summary(&report);
    if !options.dry_run {
        println!("{}", engine.timeline().gantt_chart());
    }

    Ok(report.succeeded())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
