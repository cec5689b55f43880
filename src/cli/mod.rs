pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{
    CliArgs, Commands, ConfigArgs, DetectArgs, ModulesArgs, OutputFormatArg, RunArgs,
};
pub use output::{OutputFormat, OutputFormatter};
