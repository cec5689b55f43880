//! Parallel test execution.
//!
//! Each suite runs in its own container, launched by the owning module's
//! `execute_test_suite` through the shared [`LifecycleController`]. Concurrency is
//! bounded by a semaphore; suites configured with `parallel = false` take every permit
//! and therefore run alone.

mod status;

pub use crate::lifecycle::ContainerRun;
pub use status::{EntryKind, RunStatus, StatusBoard, StatusBuffer, StatusSnapshot};

use crate::detection::Suite;
use crate::lifecycle::LifecycleController;
use crate::modules::ModuleRegistry;
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::record::Record;
use crate::runtime::ContainerSpec;
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// What a module needs to run one suite
pub struct SuiteContext {
    pub controller: LifecycleController,
    pub project_root: PathBuf,
    /// Built test image; when absent the project is mounted read-only instead
    pub test_image: Option<String>,
    pub timeout: Option<Duration>,
    pub buffer: Arc<StatusBuffer>,
}

impl SuiteContext {
    /// Runs one container for the suite and streams its output into the status buffer
    pub async fn run(&self, spec: ContainerSpec) -> Result<ContainerRun> {
        self.buffer.set_status(RunStatus::Running);
        let run = self.controller.run_container(spec, self.timeout).await?;
        self.buffer.append_output(&run.output);
        Ok(run)
    }
}

#[derive(Debug, Clone)]
pub struct SuiteOutcome {
    pub suite: String,
    pub framework: String,
    pub status: RunStatus,
    pub result: Record,
}

impl SuiteOutcome {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }
}

pub struct TestExecutor {
    controller: LifecycleController,
    registry: Arc<ModuleRegistry>,
    board: Arc<StatusBoard>,
    progress: Arc<dyn ProgressHandler>,
    max_parallel: usize,
}

impl TestExecutor {
    pub fn new(
        controller: LifecycleController,
        registry: Arc<ModuleRegistry>,
        board: Arc<StatusBoard>,
        progress: Arc<dyn ProgressHandler>,
        max_parallel: usize,
    ) -> Self {
        Self {
            controller,
            registry,
            board,
            progress,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Runs every suite and returns outcomes in suite order. `images` maps a framework
    /// to the test image built for it.
    pub async fn run_all(
        &self,
        project_root: PathBuf,
        suites: &[Suite],
        images: &HashMap<String, String>,
    ) -> Vec<SuiteOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut set = JoinSet::new();

        for (index, suite) in suites.iter().cloned().enumerate() {
            let buffer = self.board.register(&suite.name, EntryKind::Suite);
            let ctx = SuiteContext {
                controller: self.controller.clone(),
                project_root: project_root.clone(),
                test_image: images.get(&suite.framework).cloned(),
                timeout: suite.execution_config.timeout,
                buffer,
            };
            let registry = Arc::clone(&self.registry);
            let progress = Arc::clone(&self.progress);
            let semaphore = Arc::clone(&semaphore);
            let permits = if suite.execution_config.parallel {
                1
            } else {
                self.max_parallel as u32
            };

            set.spawn(async move {
                let _permit = semaphore.acquire_many_owned(permits).await.ok();
                (index, run_suite(suite, ctx, registry, progress).await)
            });
        }

        let mut outcomes: Vec<(usize, SuiteOutcome)> = Vec::with_capacity(suites.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Suite task panicked"),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

async fn run_suite(
    suite: Suite,
    ctx: SuiteContext,
    registry: Arc<ModuleRegistry>,
    progress: Arc<dyn ProgressHandler>,
) -> SuiteOutcome {
    let started = Instant::now();

    if !ctx.controller.is_running() {
        ctx.buffer
            .finish(RunStatus::Interrupted, Duration::ZERO, None);
        return SuiteOutcome {
            suite: suite.name,
            framework: suite.framework,
            status: RunStatus::Interrupted,
            result: Record::new().with("status", "interrupted"),
        };
    }

    progress.on_progress(&ProgressEvent::SuiteStarted {
        suite: suite.name.clone(),
        framework: suite.framework.clone(),
    });

    let result = match registry.get(&suite.module) {
        Some(module) => match module.execute_test_suite(&suite.record, &ctx).await {
            Ok(result) => result,
            Err(e) => Record::new()
                .with("status", "error")
                .with("error", format!("{:#}", e)),
        },
        None => Record::new()
            .with("status", "error")
            .with("error", format!("Module '{}' is not registered", suite.module)),
    };

    let status = RunStatus::from_result(result.get_or("status", "error"));
    if let Some(error) = result.get("error") {
        ctx.buffer.set_error(error);
    }
    let duration = started.elapsed();
    ctx.buffer
        .finish(status, duration, result.get_parsed::<i64>("exit_code"));
    debug!(suite = %suite.name, status = %status, "Suite complete");

    progress.on_progress(&ProgressEvent::SuiteFinished {
        suite: suite.name.clone(),
        status: status.as_str().to_string(),
        duration,
    });

    SuiteOutcome {
        suite: suite.name,
        framework: suite.framework,
        status,
        result,
    }
}
