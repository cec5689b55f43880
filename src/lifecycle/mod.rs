//! Container lifecycle and interrupt handling.
//!
//! Every container launched by the build or test phase goes through
//! [`LifecycleController::run_container`], which tracks it from creation to removal.
//! Interrupts drive a small state machine:
//!
//! ```text
//! Running --1st interrupt--> GracefulShutdown --2nd interrupt--> ForceKilled
//! ```
//!
//! On the first interrupt every tracked container is stopped with the grace period and
//! removed. The second interrupt aborts that drain and kills and removes everything at
//! once. Every in-flight wait observes the state change immediately.

mod temp;
mod tracker;

pub use temp::TempRoot;
pub use tracker::{ContainerHandle, ContainerStatus, ContainerTracker};

use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::runtime::{ContainerRuntime, ContainerSpec, RuntimeError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Exit code reported after a forced termination
pub const FORCED_EXIT_CODE: i32 = 130;

/// Exit code reported for a container killed on timeout
pub const TIMEOUT_EXIT_CODE: i64 = 124;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    GracefulShutdown,
    ForceKilled,
}

/// Outcome of one container launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRun {
    pub exit_code: i64,
    pub output: String,
    pub duration: Duration,
    pub timed_out: bool,
    pub interrupted: bool,
}

impl ContainerRun {
    fn interrupted(output: String, duration: Duration) -> Self {
        Self {
            exit_code: FORCED_EXIT_CODE as i64,
            output,
            duration,
            timed_out: false,
            interrupted: true,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.interrupted
    }
}

enum WaitOutcome {
    Exited(Result<i64, RuntimeError>),
    TimedOut,
    Interrupted,
}

struct Inner {
    runtime: Arc<dyn ContainerRuntime>,
    tracker: ContainerTracker,
    state: watch::Sender<ShutdownState>,
    grace: Duration,
    temp: TempRoot,
    progress: Arc<dyn ProgressHandler>,
    drain: Mutex<Option<AbortHandle>>,
    shutdown_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Cheap to clone; all clones share one tracker and one shutdown state
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    /// Creates the process-scoped temporary root under `temp_parent` (or the system
    /// temp dir)
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        grace: Duration,
        temp_parent: Option<&Path>,
    ) -> std::io::Result<Self> {
        let (state, _) = watch::channel(ShutdownState::Running);
        Ok(Self {
            inner: Arc::new(Inner {
                runtime,
                tracker: ContainerTracker::new(),
                state,
                grace,
                temp: TempRoot::create(temp_parent)?,
                progress: Arc::new(NoOpHandler),
                drain: Mutex::new(None),
                shutdown_tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Must be called before the controller is cloned
    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.progress = progress;
        }
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.inner.runtime
    }

    pub fn tracker(&self) -> &ContainerTracker {
        &self.inner.tracker
    }

    pub fn temp_root(&self) -> &Path {
        self.inner.temp.path()
    }

    /// Fresh directory under the temporary root
    pub fn temp_dir(&self, prefix: &str) -> std::io::Result<PathBuf> {
        self.inner.temp.subdir(prefix)
    }

    pub fn state(&self) -> ShutdownState {
        *self.inner.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.inner.state.subscribe()
    }

    /// Resolves once the second interrupt has been received
    pub async fn force_killed(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| *s == ShutdownState::ForceKilled).await;
    }

    /// Creates, starts and waits for one container, then collects its output and removes
    /// it. A run interrupted by shutdown leaves the container to the shutdown path.
    pub async fn run_container(
        &self,
        spec: ContainerSpec,
        timeout: Option<Duration>,
    ) -> Result<ContainerRun, RuntimeError> {
        let started = Instant::now();
        if !self.is_running() {
            return Ok(ContainerRun::interrupted(String::new(), Duration::ZERO));
        }

        let runtime = &self.inner.runtime;
        runtime.ensure_image(&spec.image).await?;
        let id = runtime.create_container(&spec).await?;
        self.inner.tracker.track(ContainerHandle::new(&id, &spec.name));

        // a shutdown that started before tracking took its snapshot without us
        if !self.is_running() {
            self.discard(&id).await;
            return Ok(ContainerRun::interrupted(String::new(), started.elapsed()));
        }

        if let Err(e) = runtime.start_container(&id).await {
            self.discard(&id).await;
            return Err(e);
        }
        self.inner.tracker.set_status(&id, ContainerStatus::Running);
        debug!(container = %spec.name, image = %spec.image, "Container running");

        let mut state = self.subscribe();
        let outcome = tokio::select! {
            code = runtime.wait_container(&id) => WaitOutcome::Exited(code),
            _ = state.wait_for(|s| *s != ShutdownState::Running) => WaitOutcome::Interrupted,
            _ = sleep_or_forever(timeout) => WaitOutcome::TimedOut,
        };

        match outcome {
            WaitOutcome::Exited(Ok(exit_code)) => {
                self.inner.tracker.set_status(&id, ContainerStatus::Exited);
                let output = self.logs(&id).await;
                self.release(&id).await;
                Ok(ContainerRun {
                    exit_code,
                    output,
                    duration: started.elapsed(),
                    timed_out: false,
                    interrupted: false,
                })
            }
            WaitOutcome::Exited(Err(e)) => {
                self.discard(&id).await;
                Err(e)
            }
            WaitOutcome::TimedOut => {
                warn!(container = %spec.name, "Container exceeded its timeout; killing");
                if let Err(e) = runtime.kill_container(&id).await {
                    warn!(container = %spec.name, error = %e, "Failed to kill container");
                }
                self.inner.tracker.set_status(&id, ContainerStatus::Killed);
                let output = self.logs(&id).await;
                self.release(&id).await;
                Ok(ContainerRun {
                    exit_code: TIMEOUT_EXIT_CODE,
                    output,
                    duration: started.elapsed(),
                    timed_out: true,
                    interrupted: false,
                })
            }
            WaitOutcome::Interrupted => {
                let output = self.logs(&id).await;
                Ok(ContainerRun::interrupted(output, started.elapsed()))
            }
        }
    }

    async fn logs(&self, id: &str) -> String {
        match self.inner.runtime.container_logs(id).await {
            Ok(output) => output,
            Err(e) => {
                debug!(container = id, error = %e, "Could not read container logs");
                String::new()
            }
        }
    }

    /// Removes a finished container and stops tracking it
    async fn release(&self, id: &str) {
        match self.inner.runtime.remove_container(id, true).await {
            Ok(()) => {
                self.inner.tracker.untrack(id);
            }
            Err(e) => warn!(container = id, error = %e, "Failed to remove container; cleanup will retry"),
        }
    }

    /// Force-removes a container that never produced a usable result
    async fn discard(&self, id: &str) {
        if let Err(e) = self.inner.runtime.kill_container(id).await {
            debug!(container = id, error = %e, "Kill before removal failed");
        }
        self.inner.tracker.set_status(id, ContainerStatus::Killed);
        self.release(id).await;
    }

    /// Advances the shutdown state machine by one interrupt and returns the new state
    pub fn interrupt(&self) -> ShutdownState {
        match self.state() {
            ShutdownState::Running => {
                self.inner.state.send_replace(ShutdownState::GracefulShutdown);
                self.inner
                    .progress
                    .on_progress(&ProgressEvent::ShutdownRequested { forced: false });

                let controller = self.clone();
                let task = tokio::spawn(async move { controller.drain().await });
                if let Ok(mut drain) = self.inner.drain.lock() {
                    *drain = Some(task.abort_handle());
                }
                self.push_task(task);
                ShutdownState::GracefulShutdown
            }
            ShutdownState::GracefulShutdown => {
                self.inner.state.send_replace(ShutdownState::ForceKilled);
                self.inner
                    .progress
                    .on_progress(&ProgressEvent::ShutdownRequested { forced: true });

                if let Some(drain) = self.inner.drain.lock().ok().and_then(|mut d| d.take()) {
                    drain.abort();
                }
                let controller = self.clone();
                self.push_task(tokio::spawn(async move { controller.force_kill_all().await }));
                ShutdownState::ForceKilled
            }
            ShutdownState::ForceKilled => ShutdownState::ForceKilled,
        }
    }

    fn push_task(&self, task: JoinHandle<()>) {
        match self.inner.shutdown_tasks.lock() {
            Ok(mut tasks) => tasks.push(task),
            Err(poisoned) => poisoned.into_inner().push(task),
        }
    }

    /// Stops every tracked container with the grace period, then removes it
    async fn drain(&self) {
        let handles = self.inner.tracker.snapshot();
        info!(
            containers = handles.len(),
            grace_secs = self.inner.grace.as_secs(),
            "Stopping containers"
        );

        let mut set = JoinSet::new();
        for handle in handles {
            let controller = self.clone();
            set.spawn(async move {
                let runtime = &controller.inner.runtime;
                let running = runtime
                    .inspect_container(&handle.id)
                    .await
                    .map(|i| i.running)
                    .unwrap_or(true);
                if running {
                    if let Err(e) = runtime.stop_container(&handle.id, controller.inner.grace).await {
                        warn!(container = %handle.name, error = %e, "Graceful stop failed");
                    }
                }
                controller.inner.tracker.set_status(&handle.id, ContainerStatus::Exited);
                controller.release(&handle.id).await;
            });
        }
        while set.join_next().await.is_some() {}
        self.inner.temp.cleanup();
    }

    /// Kills and removes every tracked container without waiting
    pub async fn force_kill_all(&self) {
        let handles = self.inner.tracker.snapshot();
        warn!(containers = handles.len(), "Force-killing containers");

        let mut set = JoinSet::new();
        for handle in handles {
            let controller = self.clone();
            set.spawn(async move {
                controller.discard(&handle.id).await;
            });
        }
        while set.join_next().await.is_some() {}
        self.inner.temp.cleanup();
    }

    /// Waits for any shutdown work, removes leftovers and deletes the temporary root.
    /// Safe to call on every exit path.
    pub async fn finish(&self) {
        loop {
            let task = match self.inner.shutdown_tasks.lock() {
                Ok(mut tasks) => tasks.pop(),
                Err(poisoned) => poisoned.into_inner().pop(),
            };
            let Some(task) = task else { break };
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Shutdown task failed");
                }
            }
        }

        let leftovers = self.inner.tracker.snapshot();
        if !leftovers.is_empty() {
            debug!(containers = leftovers.len(), "Removing leftover containers");
            for handle in leftovers {
                self.discard(&handle.id).await;
            }
        }
        self.inner.temp.cleanup();
    }

    /// Forwards Ctrl-C to [`LifecycleController::interrupt`] until forced termination
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for interrupts");
                    return;
                }
                if controller.interrupt() == ShutdownState::ForceKilled {
                    return;
                }
            }
        })
    }
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockBehavior, MockRuntime, RuntimeCall};

    fn controller(runtime: Arc<MockRuntime>, grace: Duration) -> LifecycleController {
        LifecycleController::new(runtime, grace, None).unwrap()
    }

    #[tokio::test]
    async fn test_run_container_removes_container() {
        let runtime = Arc::new(MockRuntime::new().with_default(MockBehavior::exit(3, "out")));
        let ctl = controller(runtime.clone(), Duration::from_secs(1));

        let run = ctl
            .run_container(ContainerSpec::new("alpine", "job"), None)
            .await
            .unwrap();

        assert_eq!(run.exit_code, 3);
        assert_eq!(run.output, "out");
        assert!(!run.succeeded());
        assert!(ctl.tracker().is_empty());
        assert!(runtime.live_containers().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_is_pulled_before_create() {
        let runtime = Arc::new(MockRuntime::new().with_local_image("alpine"));
        let ctl = controller(runtime.clone(), Duration::from_secs(1));

        ctl.run_container(ContainerSpec::new("rust:1.75", "build"), None)
            .await
            .unwrap();
        ctl.run_container(ContainerSpec::new("alpine", "job"), None)
            .await
            .unwrap();

        let calls = runtime.calls();
        let pulls: Vec<&RuntimeCall> = calls
            .iter()
            .filter(|c| matches!(c, RuntimeCall::PullImage(_)))
            .collect();
        assert_eq!(pulls, vec![&RuntimeCall::PullImage("rust:1.75".to_string())]);
        let create = calls
            .iter()
            .position(|c| matches!(c, RuntimeCall::Create { .. }))
            .unwrap();
        assert!(matches!(calls[0], RuntimeCall::PullImage(_)));
        assert!(create > 0);
    }

    #[tokio::test]
    async fn test_timeout_kills_container() {
        let runtime = Arc::new(MockRuntime::new().with_default(MockBehavior::hang()));
        let ctl = controller(runtime.clone(), Duration::from_secs(1));

        let run = ctl
            .run_container(
                ContainerSpec::new("alpine", "slow"),
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        assert!(run.timed_out);
        assert_eq!(run.exit_code, TIMEOUT_EXIT_CODE);
        assert!(runtime.calls().iter().any(|c| matches!(c, RuntimeCall::Kill(_))));
        assert!(ctl.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_launch_after_shutdown_is_refused() {
        let runtime = Arc::new(MockRuntime::new());
        let ctl = controller(runtime.clone(), Duration::from_secs(1));
        ctl.interrupt();

        let run = ctl
            .run_container(ContainerSpec::new("alpine", "late"), None)
            .await
            .unwrap();
        assert!(run.interrupted);
        assert!(runtime.created().is_empty());
        ctl.finish().await;
    }

    #[tokio::test]
    async fn test_state_machine_transitions() {
        let ctl = controller(Arc::new(MockRuntime::new()), Duration::from_secs(1));
        assert_eq!(ctl.state(), ShutdownState::Running);
        assert_eq!(ctl.interrupt(), ShutdownState::GracefulShutdown);
        assert_eq!(ctl.interrupt(), ShutdownState::ForceKilled);
        assert_eq!(ctl.interrupt(), ShutdownState::ForceKilled);
        ctl.finish().await;
        assert!(!ctl.temp_root().exists());
    }
}
