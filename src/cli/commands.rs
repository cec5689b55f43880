use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Containerized test-suite orchestrator
#[derive(Parser, Debug)]
#[command(
    name = "suitey",
    about = "Detect, build and run a project's test suites in containers",
    version,
    author,
    long_about = "suitey inspects a project, works out which languages and test frameworks it \
                  uses, builds whatever needs building inside containers and then runs every \
                  test suite in its own container. The project directory is never written to."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Detect, build and run every test suite",
        long_about = "Runs the full pipeline: platform detection, suite discovery, container \
                      builds in dependency order, then all suites in parallel.\n\n\
                      Exit codes: 0 all suites passed, 1 a suite or build failed, \
                      2 internal error, 130 forced termination.\n\n\
                      Examples:\n  \
                      suitey run\n  \
                      suitey run /path/to/project --max-parallel 4\n  \
                      suitey run --keep-images"
    )]
    Run(RunArgs),

    #[command(
        about = "Show detected platforms, suites and build requirements",
        long_about = "Runs detection only; no container is started.\n\n\
                      Examples:\n  \
                      suitey detect\n  \
                      suitey detect /path/to/project --format json"
    )]
    Detect(DetectArgs),

    #[command(about = "List registered modules")]
    Modules(ModulesArgs),

    #[command(
        about = "Show the effective configuration",
        long_about = "Prints the settings `run` would use, read from SUITEY_* environment \
                      variables, and reports any that are invalid.\n\n\
                      Examples:\n  \
                      suitey config\n  \
                      SUITEY_MAX_PARALLEL=2 suitey config --format json"
    )]
    Config(ConfigArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(value_name = "PATH", help = "Project directory (defaults to current directory)")]
    pub project_path: Option<PathBuf>,

    #[arg(long, value_name = "N", help = "Maximum number of suites running at once")]
    pub max_parallel: Option<usize>,

    #[arg(long, value_name = "N", help = "CPU cores given to each build container")]
    pub build_cpus: Option<usize>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Time containers get to stop after the first interrupt"
    )]
    pub grace_period: Option<u64>,

    #[arg(long, value_name = "DIR", help = "Parent directory for temporary files")]
    pub temp_dir: Option<PathBuf>,

    #[arg(long, help = "Keep test images after the run")]
    pub keep_images: bool,

    #[arg(long, help = "Probe modules one at a time during detection")]
    pub sequential_detection: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct DetectArgs {
    #[arg(value_name = "PATH", help = "Project directory (defaults to current directory)")]
    pub project_path: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(long, help = "Probe modules one at a time")]
    pub sequential_detection: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ModulesArgs {
    #[arg(
        value_name = "PATH",
        help = "Also list the project's own modules from this directory"
    )]
    pub project_path: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
    /// Line-oriented `key=value` text
    Record,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
            OutputFormatArg::Record => super::output::OutputFormat::Record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_default_run_args() {
        let args = CliArgs::parse_from(["suitey", "run"]);
        match args.command {
            Commands::Run(run_args) => {
                assert!(run_args.project_path.is_none());
                assert!(run_args.max_parallel.is_none());
                assert!(!run_args.keep_images);
                assert!(!run_args.sequential_detection);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_options() {
        let args = CliArgs::parse_from([
            "suitey",
            "run",
            "/tmp/project",
            "--max-parallel",
            "3",
            "--build-cpus",
            "2",
            "--grace-period",
            "5",
            "--keep-images",
        ]);
        match args.command {
            Commands::Run(run_args) => {
                assert_eq!(run_args.project_path, Some(PathBuf::from("/tmp/project")));
                assert_eq!(run_args.max_parallel, Some(3));
                assert_eq!(run_args.build_cpus, Some(2));
                assert_eq!(run_args.grace_period, Some(5));
                assert!(run_args.keep_images);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_detect_format() {
        let args = CliArgs::parse_from(["suitey", "detect", "--format", "json"]);
        match args.command {
            Commands::Detect(detect_args) => {
                assert_eq!(detect_args.format, OutputFormatArg::Json);
                assert!(detect_args.project_path.is_none());
            }
            _ => panic!("Expected Detect command"),
        }
    }

    #[test]
    fn test_modules_command() {
        let args = CliArgs::parse_from(["suitey", "modules"]);
        assert!(matches!(args.command, Commands::Modules(_)));
    }

    #[test]
    fn test_config_command() {
        let args = CliArgs::parse_from(["suitey", "config", "-f", "record"]);
        match args.command {
            Commands::Config(config_args) => {
                assert_eq!(config_args.format, OutputFormatArg::Record)
            }
            _ => panic!("Expected Config command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["suitey", "-v", "detect"]);
        assert!(args.verbose);
        assert!(!args.quiet);

        let args = CliArgs::parse_from(["suitey", "--log-level", "debug", "run"]);
        assert_eq!(args.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(CliArgs::try_parse_from(["suitey", "-v", "-q", "run"]).is_err());
    }
}
