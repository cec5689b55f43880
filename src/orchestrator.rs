//! End-to-end run: runtime check, detection, builds, tests and cleanup.
//!
//! Every exit path, including both interrupt paths, goes through
//! [`LifecycleController::finish`], which removes leftover containers and the temporary
//! root. Test images are removed afterwards unless the configuration keeps them.

use crate::config::SuiteyConfig;
use crate::detection::{ProjectScanner, ScanResult};
use crate::error::{SuiteyError, EXIT_FAILURE, EXIT_SUCCESS};
use crate::execution::{StatusBoard, SuiteOutcome, TestExecutor};
use crate::lifecycle::{LifecycleController, ShutdownState};
use crate::modules::ModuleRegistry;
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::runtime::ContainerRuntime;
use crate::scheduler::{BuildReport, BuildScheduler};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a completed run produced
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub scan: ScanResult,
    pub build: BuildReport,
    pub outcomes: Vec<SuiteOutcome>,
    pub warnings: Vec<String>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    /// True when no suite was discovered at all
    pub fn no_tests(&self) -> bool {
        self.scan.suites.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed() == 0 {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }
}

/// Images built during a run that still have to be removed
type ImageLedger = Arc<Mutex<HashMap<String, String>>>;

pub struct Orchestrator {
    config: SuiteyConfig,
    runtime: Arc<dyn ContainerRuntime>,
    registry: Option<Arc<ModuleRegistry>>,
    progress: Arc<dyn ProgressHandler>,
    board: Arc<StatusBoard>,
}

impl Orchestrator {
    pub fn new(config: SuiteyConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime,
            registry: None,
            progress: Arc::new(NoOpHandler),
            board: Arc::new(StatusBoard::new()),
        }
    }

    /// Uses `registry` instead of built-ins plus the project's declarative modules
    pub fn with_registry(mut self, registry: Arc<ModuleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// Status of every build step and suite, updated while the run progresses
    pub fn board(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.board)
    }

    /// Lifecycle controller configured for this orchestrator
    pub fn controller(&self) -> Result<LifecycleController, SuiteyError> {
        let controller = LifecycleController::new(
            Arc::clone(&self.runtime),
            self.config.grace_period(),
            self.config.temp_dir.as_deref(),
        )
        .map_err(|e| SuiteyError::Runtime(e.into()))?;
        Ok(controller.with_progress(Arc::clone(&self.progress)))
    }

    /// Runs the full pipeline with Ctrl-C wired to the two-stage shutdown
    pub async fn run(&self, project_root: &Path) -> Result<RunSummary, SuiteyError> {
        let controller = self.controller()?;
        let signals = controller.listen_for_signals();
        let result = self.run_with_controller(project_root, controller).await;
        signals.abort();
        result
    }

    /// Runs the full pipeline under an existing controller
    pub async fn run_with_controller(
        &self,
        project_root: &Path,
        controller: LifecycleController,
    ) -> Result<RunSummary, SuiteyError> {
        let images: ImageLedger = Arc::new(Mutex::new(HashMap::new()));

        let result = tokio::select! {
            result = self.execute(project_root, &controller, &images) => result,
            _ = controller.force_killed() => Err(SuiteyError::forced()),
        };

        controller.finish().await;
        self.remove_images(&images).await;

        let result = match (controller.state(), result) {
            (ShutdownState::ForceKilled, _) => Err(SuiteyError::forced()),
            (ShutdownState::GracefulShutdown, Ok(summary)) => {
                info!(
                    passed = summary.passed(),
                    completed = summary.outcomes.len(),
                    "Run interrupted; partial results kept"
                );
                Err(SuiteyError::Interrupted {
                    forced: false,
                    summary: Some(Box::new(summary)),
                })
            }
            (_, result) => result,
        };

        match &result {
            Ok(summary) => self.progress.on_progress(&ProgressEvent::Completed {
                suites_passed: summary.passed(),
                suites_failed: summary.failed(),
                total_time: summary.duration,
            }),
            Err(e) => self.progress.on_progress(&ProgressEvent::Failed {
                error: e.to_string(),
            }),
        }
        result
    }

    async fn execute(
        &self,
        project_root: &Path,
        controller: &LifecycleController,
        images: &ImageLedger,
    ) -> Result<RunSummary, SuiteyError> {
        let started = Instant::now();
        self.progress.on_progress(&ProgressEvent::Started {
            project_root: project_root.display().to_string(),
        });

        self.runtime.ping().await?;
        debug!("Container runtime reachable");

        let mut summary = RunSummary::default();
        let registry = match &self.registry {
            Some(registry) => Arc::clone(registry),
            None => {
                let (registry, warnings) = ModuleRegistry::with_project_modules(project_root);
                summary.warnings.extend(warnings);
                Arc::new(registry)
            }
        };

        summary.scan = ProjectScanner::new(Arc::clone(&registry))
            .with_progress(Arc::clone(&self.progress))
            .with_concurrency(self.config.detect_concurrently)
            .scan(project_root)
            .await;
        summary.warnings.extend(summary.scan.warnings.iter().cloned());
        for warning in &summary.warnings {
            warn!("{}", warning);
        }

        if summary.no_tests() {
            info!("No test suites found");
            summary.duration = started.elapsed();
            return Ok(summary);
        }

        if summary.scan.build.requires_build {
            let phase = Instant::now();
            self.phase_started("build");
            let scheduler = BuildScheduler::new(
                controller.clone(),
                Arc::clone(&registry),
                Arc::clone(&self.board),
            )
            .with_progress(Arc::clone(&self.progress))
            .with_build_cpus(self.config.build_cpus);

            summary.build = scheduler.build(project_root, &summary.scan).await?;
            self.phase_complete("build", phase);
            summary.warnings.extend(summary.build.warnings.iter().cloned());

            if let Ok(mut ledger) = images.lock() {
                ledger.extend(summary.build.images());
            }
            if summary.build.interrupted {
                summary.duration = started.elapsed();
                return Ok(summary);
            }
            if !summary.build.succeeded() {
                return Err(SuiteyError::Build(summary.build.failures()));
            }
        }

        let phase = Instant::now();
        self.phase_started("test");
        let executor = TestExecutor::new(
            controller.clone(),
            Arc::clone(&registry),
            Arc::clone(&self.board),
            Arc::clone(&self.progress),
            self.config.max_parallel,
        );
        let built = summary.build.images();
        summary.outcomes = executor
            .run_all(PathBuf::from(project_root), &summary.scan.suites, &built)
            .await;
        self.phase_complete("test", phase);

        summary.duration = started.elapsed();
        info!(
            passed = summary.passed(),
            failed = summary.failed(),
            duration_ms = summary.duration.as_millis() as u64,
            "Run complete"
        );
        Ok(summary)
    }

    async fn remove_images(&self, images: &ImageLedger) {
        let tags: Vec<(String, String)> = match images.lock() {
            Ok(mut ledger) => ledger.drain().collect(),
            Err(_) => return,
        };
        if self.config.keep_images {
            for (framework, tag) in tags {
                info!(framework = %framework, image = %tag, "Keeping test image");
            }
            return;
        }
        for (framework, tag) in tags {
            if let Err(e) = self.runtime.remove_image(&tag).await {
                warn!(framework = %framework, image = %tag, error = %e, "Failed to remove test image");
            }
        }
    }

    fn phase_started(&self, phase: &str) {
        info!("Phase: {}", phase);
        self.progress.on_progress(&ProgressEvent::PhaseStarted {
            phase: phase.to_string(),
        });
    }

    fn phase_complete(&self, phase: &str, started: Instant) {
        self.progress.on_progress(&ProgressEvent::PhaseComplete {
            phase: phase.to_string(),
            duration: started.elapsed(),
        });
    }
}
