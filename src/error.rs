//! Top-level error taxonomy and exit codes

use crate::config::ConfigError;
use crate::lifecycle::FORCED_EXIT_CODE;
use crate::orchestrator::RunSummary;
use crate::runtime::RuntimeError;
use crate::scheduler::{BuildFailure, SchedulerError};
use thiserror::Error;

/// All suites passed
pub const EXIT_SUCCESS: i32 = 0;
/// A suite failed, a build failed or the run was interrupted
pub const EXIT_FAILURE: i32 = 1;
/// The orchestrator itself could not do its job
pub const EXIT_INTERNAL: i32 = 2;

/// Errors that end a run.
///
/// Detection and suite-configuration problems for individual modules never reach this
/// type; they are absorbed as warnings by the pipeline.
#[derive(Debug, Error)]
pub enum SuiteyError {
    /// Nothing usable could be detected at all
    #[error("Detection failed: {0}")]
    Detection(String),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// One or more builds failed; tests were not run
    #[error("{} build(s) failed: {}", .0.len(), .0.iter().map(|f| f.framework.as_str()).collect::<Vec<_>>().join(", "))]
    Build(Vec<BuildFailure>),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A graceful interrupt keeps whatever finished before the drain
    #[error("Run interrupted (forced: {forced})")]
    Interrupted {
        forced: bool,
        summary: Option<Box<RunSummary>>,
    },
}

impl SuiteyError {
    pub fn forced() -> Self {
        SuiteyError::Interrupted {
            forced: true,
            summary: None,
        }
    }

    /// Partial results carried by a graceful interrupt
    pub fn partial_summary(&self) -> Option<&RunSummary> {
        match self {
            SuiteyError::Interrupted { summary, .. } => summary.as_deref(),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            SuiteyError::Build(_) => EXIT_FAILURE,
            SuiteyError::Interrupted { forced: true, .. } => FORCED_EXIT_CODE,
            SuiteyError::Interrupted { forced: false, .. } => EXIT_FAILURE,
            SuiteyError::Detection(_)
            | SuiteyError::Configuration(_)
            | SuiteyError::Scheduler(_)
            | SuiteyError::Runtime(_) => EXIT_INTERNAL,
        }
    }
}
