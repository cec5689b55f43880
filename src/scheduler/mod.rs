//! Build scheduling.
//!
//! Required builds are levelled into dependency tiers. Every step in a tier runs in its
//! own container at the same time; the next tier starts only after the whole tier has
//! resolved. A failing step lets its running siblings finish so their output is kept,
//! then scheduling stops and no test runs. Successful steps are packaged into a test
//! image that is verified before the step counts as built.

mod image;
mod step;
mod tiers;

pub use image::{dockerfile, image_tag, ImageLayer, StagedImage};
pub use step::{BuildStep, ARTIFACTS_MOUNT, SOURCE_MOUNT};
pub use tiers::{compute_tiers, TierPlan};

use crate::detection::ScanResult;
use crate::execution::{EntryKind, RunStatus, StatusBoard, StatusBuffer};
use crate::lifecycle::LifecycleController;
use crate::modules::ModuleRegistry;
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::runtime::{ContainerSpec, RuntimeError};
use crate::util::hardware;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Build dependency cycle between: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("Invalid build step for '{framework}': {reason}")]
    InvalidStep { framework: String, reason: String },

    #[error("Module '{module}' could not produce build steps: {message}")]
    Steps { module: String, message: String },

    #[error("Staging the test image for '{framework}' failed: {message}")]
    Staging { framework: String, message: String },

    #[error("Test image for '{framework}' is missing {}", .missing.join(", "))]
    Verification {
        framework: String,
        missing: Vec<String>,
    },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// A build step that did not produce a verified test image
#[derive(Debug, Clone, Error)]
#[error("Build for '{framework}' failed (exit code {}): {command}", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
pub struct BuildFailure {
    pub framework: String,
    pub command: String,
    pub exit_code: Option<i64>,
    pub output: String,
    pub error: Option<String>,
}

/// Terminal state of one build step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub framework: String,
    pub tier: usize,
    pub status: RunStatus,
    pub command: String,
    pub exit_code: Option<i64>,
    pub output: String,
    pub error: Option<String>,
    /// Verified test image, absent when the platform has no suites to package
    pub image: Option<String>,
    pub duration: Duration,
}

impl StepResult {
    fn new(step: &BuildStep, tier: usize, status: RunStatus) -> Self {
        Self {
            framework: step.framework.clone(),
            tier,
            status,
            command: step.command_line(),
            exit_code: None,
            output: String::new(),
            error: None,
            image: None,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub steps: Vec<StepResult>,
    pub tiers: usize,
    pub warnings: Vec<String>,
    pub interrupted: bool,
}

impl BuildReport {
    /// True when every step was built and no interrupt cut the phase short
    pub fn succeeded(&self) -> bool {
        !self.interrupted && self.steps.iter().all(|s| s.status == RunStatus::Built)
    }

    /// Framework to test image tag
    pub fn images(&self) -> HashMap<String, String> {
        self.steps
            .iter()
            .filter_map(|s| s.image.clone().map(|i| (s.framework.clone(), i)))
            .collect()
    }

    pub fn failures(&self) -> Vec<BuildFailure> {
        self.steps
            .iter()
            .filter(|s| s.status == RunStatus::BuildFailed)
            .map(|s| BuildFailure {
                framework: s.framework.clone(),
                command: s.command.clone(),
                exit_code: s.exit_code,
                output: s.output.clone(),
                error: s.error.clone(),
            })
            .collect()
    }
}

pub struct BuildScheduler {
    controller: LifecycleController,
    registry: Arc<ModuleRegistry>,
    board: Arc<StatusBoard>,
    progress: Arc<dyn ProgressHandler>,
    build_cpus: usize,
}

impl BuildScheduler {
    pub fn new(
        controller: LifecycleController,
        registry: Arc<ModuleRegistry>,
        board: Arc<StatusBoard>,
    ) -> Self {
        Self {
            controller,
            registry,
            board,
            progress: Arc::new(NoOpHandler),
            build_cpus: hardware::cpu_cores(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// CPU cores for steps that do not request their own
    pub fn with_build_cpus(mut self, cpus: usize) -> Self {
        self.build_cpus = cpus.max(1);
        self
    }

    /// Asks each platform that requires a build for its steps
    pub fn plan(
        &self,
        project_root: &Path,
        scan: &ScanResult,
    ) -> Result<Vec<BuildStep>, SchedulerError> {
        let mut steps: Vec<BuildStep> = Vec::new();
        for build in scan.build.required() {
            let module = self
                .registry
                .get(&build.module)
                .ok_or_else(|| SchedulerError::Steps {
                    module: build.module.clone(),
                    message: "module is not registered".to_string(),
                })?;
            let record = module
                .get_build_steps(project_root, &build.record)
                .map_err(|e| SchedulerError::Steps {
                    module: build.module.clone(),
                    message: format!("{:#}", e),
                })?;

            let produced = record.scoped_array("build_steps");
            if produced.is_empty() {
                return Err(SchedulerError::Steps {
                    module: build.module.clone(),
                    message: "build required but no build steps returned".to_string(),
                });
            }
            for item in produced {
                let step = BuildStep::from_record(&build.module, &build.framework, &item)?
                    .with_depends_on(build.depends_on.clone());
                if steps.iter().any(|s| s.framework == step.framework) {
                    return Err(SchedulerError::InvalidStep {
                        framework: step.framework,
                        reason: "more than one build step for the framework".to_string(),
                    });
                }
                steps.push(step);
            }
        }
        Ok(steps)
    }

    /// Runs every required build tier by tier and packages the test images.
    ///
    /// Structural problems (bad steps, dependency cycles) are errors. Step failures are
    /// reported in the returned [`BuildReport`]; when the build did not succeed, images
    /// already built by sibling steps are removed before returning.
    pub async fn build(
        &self,
        project_root: &Path,
        scan: &ScanResult,
    ) -> Result<BuildReport, SchedulerError> {
        let steps = self.plan(project_root, scan)?;
        let mut report = BuildReport::default();
        if steps.is_empty() {
            debug!("No build required");
            return Ok(report);
        }

        let edges: Vec<(String, Vec<String>)> = steps
            .iter()
            .map(|s| (s.framework.clone(), s.depends_on.clone()))
            .collect();
        let plan = compute_tiers(&edges)?;
        report.tiers = plan.len();
        report.warnings.extend(plan.warnings.iter().cloned());
        info!(steps = steps.len(), tiers = plan.len(), "Build plan ready");

        let buffers: Vec<Arc<StatusBuffer>> = steps
            .iter()
            .map(|s| {
                let buffer = self.board.register(&s.framework, EntryKind::Build);
                buffer.set_status(RunStatus::Pending);
                buffer
            })
            .collect();

        let mut results: Vec<Option<StepResult>> = vec![None; steps.len()];
        let mut stopped = false;

        for (tier, members) in plan.tiers.iter().enumerate() {
            if stopped || !self.controller.is_running() {
                let status = if stopped {
                    RunStatus::Skipped
                } else {
                    report.interrupted = true;
                    RunStatus::Interrupted
                };
                for &i in members {
                    buffers[i].finish(status, Duration::ZERO, None);
                    results[i] = Some(StepResult::new(&steps[i], tier, status));
                }
                continue;
            }

            debug!(tier, steps = members.len(), "Starting build tier");
            let mut set = JoinSet::new();
            for &i in members {
                let job = StepJob {
                    step: steps[i].clone(),
                    tier,
                    controller: self.controller.clone(),
                    buffer: Arc::clone(&buffers[i]),
                    progress: Arc::clone(&self.progress),
                    project_root: project_root.to_path_buf(),
                    test_files: scan
                        .suites_for(&steps[i].framework)
                        .flat_map(|s| s.files.iter().cloned())
                        .collect(),
                    cpus: self.build_cpus,
                };
                set.spawn(async move { (i, job.run().await) });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((i, result)) => results[i] = Some(result),
                    Err(e) => error!(error = %e, "Build task panicked"),
                }
            }

            for &i in members {
                let result = results[i].get_or_insert_with(|| {
                    let mut lost = StepResult::new(&steps[i], tier, RunStatus::BuildFailed);
                    lost.error = Some("build task did not complete".to_string());
                    lost
                });
                match result.status {
                    RunStatus::Built => {}
                    RunStatus::Interrupted => report.interrupted = true,
                    _ => stopped = true,
                }
            }
            if report.interrupted {
                stopped = true;
            }
        }

        report.steps = results.into_iter().flatten().collect();
        if !report.succeeded() {
            for failure in report.failures() {
                error!(framework = %failure.framework, command = %failure.command, "Build failed");
            }
            self.remove_images(&report).await;
        }
        Ok(report)
    }

    /// Removes every test image in `report`
    pub async fn remove_images(&self, report: &BuildReport) {
        for (framework, tag) in report.images() {
            match self.controller.runtime().remove_image(&tag).await {
                Ok(()) => debug!(framework = %framework, image = %tag, "Removed test image"),
                Err(e) => {
                    warn!(framework = %framework, image = %tag, error = %e, "Failed to remove test image")
                }
            }
        }
    }
}

/// Everything one step task owns
struct StepJob {
    step: BuildStep,
    tier: usize,
    controller: LifecycleController,
    buffer: Arc<StatusBuffer>,
    progress: Arc<dyn ProgressHandler>,
    project_root: PathBuf,
    test_files: Vec<String>,
    cpus: usize,
}

impl StepJob {
    async fn run(self) -> StepResult {
        let started = Instant::now();
        let mut result = StepResult::new(&self.step, self.tier, RunStatus::Building);
        self.buffer.set_status(RunStatus::Building);
        self.progress.on_progress(&ProgressEvent::BuildStepStarted {
            framework: self.step.framework.clone(),
            tier: self.tier,
        });
        info!(framework = %self.step.framework, tier = self.tier, image = %self.step.image, "Building");

        let mut scratch = Vec::new();
        let outcome = self.execute(&mut result, &mut scratch).await;
        for dir in scratch {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                debug!(path = %dir.display(), error = %e, "Could not remove build scratch directory");
            }
        }

        result.status = match outcome {
            Ok(status) => status,
            Err(e) => {
                result.error = Some(e.to_string());
                self.buffer.set_error(e.to_string());
                RunStatus::BuildFailed
            }
        };
        if result.status != RunStatus::Built {
            result.image = None;
        }
        result.duration = started.elapsed();
        self.buffer.finish(result.status, result.duration, result.exit_code);
        self.progress.on_progress(&ProgressEvent::BuildStepFinished {
            framework: self.step.framework.clone(),
            status: result.status.as_str().to_string(),
            duration: result.duration,
        });
        debug!(
            framework = %self.step.framework,
            status = %result.status,
            duration_ms = result.duration.as_millis() as u64,
            "Build step finished"
        );
        result
    }

    async fn execute(
        &self,
        result: &mut StepResult,
        scratch: &mut Vec<PathBuf>,
    ) -> Result<RunStatus, SchedulerError> {
        let artifacts_dir = self.temp_dir("artifacts-", scratch)?;
        let spec = self
            .step
            .container_spec(&self.project_root, &artifacts_dir, self.cpus);
        let run = self.controller.run_container(spec, None).await?;
        self.buffer.append_output(&run.output);
        result.output = run.output.clone();
        if run.interrupted {
            return Ok(RunStatus::Interrupted);
        }
        result.exit_code = Some(run.exit_code);
        if !run.succeeded() {
            warn!(framework = %self.step.framework, exit_code = run.exit_code, "Build container failed");
            return Ok(RunStatus::BuildFailed);
        }

        if self.test_files.is_empty() {
            debug!(framework = %self.step.framework, "No suites to package; skipping test image");
            return Ok(RunStatus::Built);
        }

        let tag = image_tag(&self.step.framework, Utc::now());
        let context_dir = self.temp_dir("image-", scratch)?;
        let staged = image::stage(
            &context_dir,
            &self.step,
            &tag,
            &self.project_root,
            &artifacts_dir,
            &self.test_files,
        )?;

        let runtime = self.controller.runtime();
        let log = runtime.build_image(&staged.context_dir, &staged.tag).await?;
        debug!(framework = %self.step.framework, image = %staged.tag, "Test image built");
        self.buffer.append_output(&log);
        result.image = Some(staged.tag.clone());

        let verified = self.verify(&staged).await;
        if !matches!(verified, Ok(true)) {
            if let Err(e) = runtime.remove_image(&staged.tag).await {
                warn!(image = %staged.tag, error = %e, "Failed to remove unverified image");
            }
        }
        match verified {
            Ok(true) => {
                info!(framework = %self.step.framework, image = %staged.tag, "Build complete");
                Ok(RunStatus::Built)
            }
            Ok(false) => Ok(RunStatus::Interrupted),
            Err(e) => Err(e),
        }
    }

    /// Checks the expected paths inside the built image. `Ok(false)` means the check was
    /// interrupted.
    async fn verify(&self, staged: &StagedImage) -> Result<bool, SchedulerError> {
        let spec = ContainerSpec::new(&staged.tag, &format!("suitey-verify-{}", staged.framework))
            .with_shell(&image::verification_script(&staged.expected));
        let run = self.controller.run_container(spec, Some(VERIFY_TIMEOUT)).await?;
        if run.interrupted {
            return Ok(false);
        }
        if run.succeeded() {
            return Ok(true);
        }

        let mut missing = image::missing_paths(&run.output);
        if missing.is_empty() {
            missing.push(format!("expected paths (verification exited with {})", run.exit_code));
        }
        Err(SchedulerError::Verification {
            framework: staged.framework.clone(),
            missing,
        })
    }

    fn temp_dir(&self, prefix: &str, scratch: &mut Vec<PathBuf>) -> Result<PathBuf, SchedulerError> {
        let dir = self
            .controller
            .temp_dir(&format!("{}{}-", prefix, self.step.framework))
            .map_err(RuntimeError::from)?;
        scratch.push(dir.clone());
        Ok(dir)
    }
}
