//! Subcommand handlers; each returns the process exit code

use super::commands::{ConfigArgs, DetectArgs, ModulesArgs, RunArgs};
use super::output::{format_build_failures, OutputFormat, OutputFormatter};
use crate::config::SuiteyConfig;
use crate::detection::ProjectScanner;
use crate::error::{SuiteyError, EXIT_INTERNAL, EXIT_SUCCESS};
use crate::modules::ModuleRegistry;
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::progress::LoggingHandler;
use crate::runtime::DockerRuntime;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Environment configuration with the `run` flags applied on top
pub fn config_from_args(args: &RunArgs, log_level: Option<&str>) -> SuiteyConfig {
    let mut config = SuiteyConfig::default();
    if let Some(level) = log_level {
        config.log_level = level.to_lowercase();
    }
    if let Some(max_parallel) = args.max_parallel {
        config.max_parallel = max_parallel;
    }
    if let Some(build_cpus) = args.build_cpus {
        config.build_cpus = build_cpus;
    }
    if let Some(grace) = args.grace_period {
        config.grace_period_secs = grace;
    }
    if let Some(temp_dir) = &args.temp_dir {
        config.temp_dir = Some(temp_dir.clone());
    }
    if args.keep_images {
        config.keep_images = true;
    }
    if args.sequential_detection {
        config.detect_concurrently = false;
    }
    config
}

pub async fn handle_run(args: &RunArgs, log_level: Option<&str>) -> i32 {
    let config = config_from_args(args, log_level);
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return SuiteyError::from(e).exit_code();
    }
    debug!("{}", config);

    let root = match project_root(args.project_path.as_deref()) {
        Ok(root) => root,
        Err(code) => return code,
    };

    let runtime = match DockerRuntime::connect() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Container runtime unavailable");
            eprintln!("Error: {}", e);
            return SuiteyError::from(e).exit_code();
        }
    };

    let orchestrator =
        Orchestrator::new(config, Arc::new(runtime)).with_progress(Arc::new(LoggingHandler));
    let (code, report) = execute_run(&orchestrator, &root).await;
    print!("{}", report);
    code
}

/// Runs the pipeline and renders its outcome. Returns the exit code and the text for
/// the user.
pub async fn execute_run(orchestrator: &Orchestrator, root: &Path) -> (i32, String) {
    report_run(orchestrator.run(root).await, root)
}

/// Renders a finished run; a graceful interrupt still shows the suites that completed
pub fn report_run(result: Result<RunSummary, SuiteyError>, root: &Path) -> (i32, String) {
    let formatter = OutputFormatter::new(OutputFormat::Human);
    match result {
        Ok(summary) if summary.no_tests() => {
            let err = SuiteyError::Detection(format!(
                "No test suites found in {}",
                root.display()
            ));
            eprintln!("Error: {}", err);
            let report = if summary.scan.platforms.is_empty() {
                String::new()
            } else {
                formatter.format_scan(&summary.scan).unwrap_or_default()
            };
            (err.exit_code(), report)
        }
        Ok(summary) => match formatter.format_summary(&summary) {
            Ok(report) => (summary.exit_code(), report),
            Err(e) => {
                eprintln!("Error: {:#}", e);
                (EXIT_INTERNAL, String::new())
            }
        },
        Err(err) => {
            eprintln!("Error: {}", err);
            let report = match &err {
                SuiteyError::Build(failures) => format_build_failures(failures),
                SuiteyError::Interrupted {
                    summary: Some(summary),
                    ..
                } => formatter.format_summary(summary).unwrap_or_default(),
                _ => String::new(),
            };
            (err.exit_code(), report)
        }
    }
}

pub async fn handle_detect(args: &DetectArgs) -> i32 {
    let root = match project_root(args.project_path.as_deref()) {
        Ok(root) => root,
        Err(code) => return code,
    };

    let (registry, warnings) = ModuleRegistry::with_project_modules(&root);
    let mut scan = ProjectScanner::new(Arc::new(registry))
        .with_concurrency(!args.sequential_detection)
        .scan(&root)
        .await;
    let mut all_warnings = warnings;
    all_warnings.append(&mut scan.warnings);
    scan.warnings = all_warnings;
    info!(
        platforms = scan.platforms.len(),
        suites = scan.suites.len(),
        "Detection complete"
    );

    match OutputFormatter::new(OutputFormat::from(args.format)).format_scan(&scan) {
        Ok(output) => {
            println!("{}", output);
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_INTERNAL
        }
    }
}

pub fn handle_modules(args: &ModulesArgs) -> i32 {
    let registry = match &args.project_path {
        Some(path) => {
            let (registry, warnings) = ModuleRegistry::with_project_modules(path);
            for warning in warnings {
                eprintln!("Warning: {}", warning);
            }
            registry
        }
        None => ModuleRegistry::with_builtins(),
    };

    match OutputFormatter::new(OutputFormat::from(args.format)).format_modules(&registry) {
        Ok(output) => {
            print!("{}", output);
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_INTERNAL
        }
    }
}

/// Prints the environment configuration; exits 2 when it does not validate
pub fn handle_config(args: &ConfigArgs) -> i32 {
    let config = SuiteyConfig::default();
    match OutputFormatter::new(OutputFormat::from(args.format)).format_config(&config) {
        Ok(output) => println!("{}", output.trim_end()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_INTERNAL;
        }
    }
    match config.validate() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            SuiteyError::from(e).exit_code()
        }
    }
}

fn project_root(path: Option<&Path>) -> Result<PathBuf, i32> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => env::current_dir().map_err(|e| {
            eprintln!("Error: cannot read the current directory: {}", e);
            EXIT_INTERNAL
        })?,
    };
    if !path.is_dir() {
        eprintln!("Error: {} is not a directory", path.display());
        return Err(EXIT_INTERNAL);
    }
    path.canonicalize().map_err(|e| {
        eprintln!("Error: cannot resolve {}: {}", path.display(), e);
        EXIT_INTERNAL
    })
}
