use suitey::cli::commands::{CliArgs, Commands};
use suitey::cli::handlers::{handle_config, handle_detect, handle_modules, handle_run};
use suitey::util::logging::{self, LoggingConfig};
use suitey::VERSION;

use clap::Parser;
use std::env;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("suitey v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Run(run_args) => handle_run(run_args, args.log_level.as_deref()).await,
        Commands::Detect(detect_args) => handle_detect(detect_args).await,
        Commands::Modules(modules_args) => handle_modules(modules_args),
        Commands::Config(config_args) => handle_config(config_args),
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        logging::parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("SUITEY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        logging::parse_level(&level_str)
    };

    let json = env::var("SUITEY_LOG_JSON")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    let config = if json {
        LoggingConfig {
            level,
            ..LoggingConfig::production()
        }
    } else {
        LoggingConfig::with_level(level)
    };
    logging::init_logging(config);
}
