//! suitey - containerized test-suite orchestrator
//!
//! suitey looks at a project directory, works out which languages and test frameworks
//! it uses, builds whatever has to be built inside containers and runs every test suite
//! in its own container. The project directory is only ever mounted read-only.
//!
//! # Core Concepts
//!
//! - **Records**: flat `key=value` documents exchanged with modules ([`record`])
//! - **Modules**: language, framework and project plugins behind one trait ([`modules`])
//! - **Detection**: platforms, suites and build requirements for a project ([`detection`])
//! - **Scheduler**: dependency-ordered container builds and test images ([`scheduler`])
//! - **Lifecycle**: container tracking and two-stage interrupt handling ([`lifecycle`])
//!
//! # Example Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use suitey::{DockerRuntime, Orchestrator, SuiteyConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let summary = Orchestrator::new(SuiteyConfig::default(), runtime)
//!     .run(Path::new("."))
//!     .await?;
//! println!("{} passed, {} failed", summary.passed(), summary.failed());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod execution;
pub mod grouping;
pub mod lifecycle;
pub mod modules;
pub mod orchestrator;
pub mod progress;
pub mod record;
pub mod runtime;
pub mod scheduler;
pub mod testing;
pub mod util;

pub use config::{ConfigError, SuiteyConfig};
pub use detection::{ProjectScanner, ScanResult};
pub use error::SuiteyError;
pub use execution::{RunStatus, StatusBoard};
pub use lifecycle::{LifecycleController, ShutdownState};
pub use modules::{Module, ModuleKind, ModuleMetadata, ModuleRegistry};
pub use orchestrator::{Orchestrator, RunSummary};
pub use progress::{LoggingHandler, NoOpHandler, ProgressEvent, ProgressHandler};
pub use record::{Record, RecordError};
pub use runtime::{ContainerRuntime, DockerRuntime, MockRuntime, RuntimeError};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
