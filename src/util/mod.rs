//! Process-level helpers: logging setup and host resource detection

pub mod hardware;
pub mod logging;

pub use hardware::{cpu_cores, HostResources};
pub use logging::{init_default, init_from_env, init_logging, LoggingConfig};
