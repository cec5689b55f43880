use super::{ContainerInspection, ContainerRuntime, ContainerSpec, RuntimeError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Exit status docker reports for SIGTERM and SIGKILL
const STOPPED_EXIT: i64 = 143;
const KILLED_EXIT: i64 = 137;

/// Scripted behaviour of a mock container
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub exit_code: i64,
    pub output: String,
    pub delay: Duration,
    /// Runs until stopped or killed
    pub hang: bool,
    /// A graceful stop only ends the container once the grace period has elapsed
    pub ignore_stop: bool,
    /// Files written on start, as `(container mount path, relative file)`
    pub writes: Vec<(String, String)>,
}

impl MockBehavior {
    pub fn exit(exit_code: i64, output: &str) -> Self {
        Self {
            exit_code,
            output: output.to_string(),
            ..Default::default()
        }
    }

    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn ignoring_stop(mut self) -> Self {
        self.ignore_stop = true;
        self
    }

    /// Writes `relative` into whatever host directory is mounted at `mount` when the
    /// container starts
    pub fn writing(mut self, mount: &str, relative: &str) -> Self {
        self.writes.push((mount.to_string(), relative.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create { name: String, image: String },
    Start(String),
    Stop(String),
    Kill(String),
    Remove(String),
    BuildImage(String),
    RemoveImage(String),
    PullImage(String),
}

struct MockContainer {
    spec: ContainerSpec,
    behavior: MockBehavior,
    started: bool,
    exit: watch::Sender<Option<i64>>,
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    calls: Vec<RuntimeCall>,
    images: HashMap<String, Vec<String>>,
    pulled: HashSet<String>,
}

/// In-memory [`ContainerRuntime`] with scripted container outcomes
pub struct MockRuntime {
    state: Mutex<MockState>,
    rules: Vec<(String, MockBehavior)>,
    default_behavior: MockBehavior,
    available: bool,
    fail_image_builds: bool,
    next_id: AtomicUsize,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            rules: Vec::new(),
            default_behavior: MockBehavior::default(),
            available: true,
            fail_image_builds: false,
            next_id: AtomicUsize::new(1),
        }
    }

    /// Runtime whose `ping` fails
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Containers whose name contains `pattern` follow `behavior`; first match wins
    pub fn with_behavior(mut self, pattern: &str, behavior: MockBehavior) -> Self {
        self.rules.push((pattern.to_string(), behavior));
        self
    }

    pub fn with_default(mut self, behavior: MockBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Marks `image` as already present, so running it needs no pull
    pub fn with_local_image(self, image: &str) -> Self {
        self.lock().pulled.insert(image.to_string());
        self
    }

    pub fn failing_image_builds(mut self) -> Self {
        self.fail_image_builds = true;
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// Names of containers created and not yet removed
    pub fn live_containers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .containers
            .values()
            .map(|c| c.spec.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Specs of every container created so far, in creation order
    pub fn created(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Create { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Context files (relative paths) of each image built and not removed
    pub fn images(&self) -> HashMap<String, Vec<String>> {
        self.lock().images.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn behavior_for(&self, name: &str) -> MockBehavior {
        self.rules
            .iter()
            .find(|(pattern, _)| name.contains(pattern.as_str()))
            .map(|(_, b)| b.clone())
            .unwrap_or_else(|| self.default_behavior.clone())
    }

    fn missing(id: &str, operation: &'static str) -> RuntimeError {
        RuntimeError::Operation {
            id: id.to_string(),
            operation,
            message: "no such container".to_string(),
        }
    }

    fn finish(&self, id: &str, code: i64) {
        if let Some(container) = self.lock().containers.get(id) {
            container.exit.send_if_modified(|exit| {
                if exit.is_none() {
                    *exit = Some(code);
                    true
                } else {
                    false
                }
            });
        }
    }
}

fn list_context(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        if self.available {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable("mock runtime is offline".to_string()))
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let behavior = self.behavior_for(&spec.name);
        let (exit, _) = watch::channel(None);

        let mut state = self.lock();
        state.calls.push(RuntimeCall::Create {
            name: spec.name.clone(),
            image: spec.image.clone(),
        });
        state.containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                behavior,
                started: false,
                exit,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Start(id.to_string()));
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Self::missing(id, "start"))?;
        container.started = true;

        for (mount, relative) in &container.behavior.writes {
            let Some(volume) = container.spec.mounts.iter().find(|m| &m.container_path == mount)
            else {
                continue;
            };
            let target = volume.host_path.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, format!("written by {}\n", container.spec.name))?;
        }
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let (behavior, mut exit) = {
            let state = self.lock();
            let container = state
                .containers
                .get(id)
                .ok_or_else(|| Self::missing(id, "wait"))?;
            (container.behavior.clone(), container.exit.subscribe())
        };

        if behavior.hang {
            let code = exit
                .wait_for(Option::is_some)
                .await
                .map(|v| v.unwrap_or(KILLED_EXIT))
                .unwrap_or(KILLED_EXIT);
            return Ok(code);
        }

        tokio::select! {
            changed = exit.wait_for(Option::is_some) => {
                Ok(changed.map(|v| v.unwrap_or(KILLED_EXIT)).unwrap_or(KILLED_EXIT))
            }
            _ = tokio::time::sleep(behavior.delay) => {
                self.finish(id, behavior.exit_code);
                Ok(behavior.exit_code)
            }
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspection, RuntimeError> {
        let state = self.lock();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| Self::missing(id, "inspect"))?;
        let exit_code = *container.exit.borrow();
        Ok(ContainerInspection {
            running: container.started && exit_code.is_none(),
            exit_code,
        })
    }

    async fn container_logs(&self, id: &str) -> Result<String, RuntimeError> {
        let state = self.lock();
        state
            .containers
            .get(id)
            .map(|c| c.behavior.output.clone())
            .ok_or_else(|| Self::missing(id, "logs"))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let ignore_stop = {
            let mut state = self.lock();
            state.calls.push(RuntimeCall::Stop(id.to_string()));
            match state.containers.get(id) {
                Some(container) => container.behavior.ignore_stop,
                None => return Ok(()),
            }
        };

        if ignore_stop {
            tokio::time::sleep(grace).await;
            self.finish(id, KILLED_EXIT);
        } else {
            self.finish(id, STOPPED_EXIT);
        }
        Ok(())
    }

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.lock().calls.push(RuntimeCall::Kill(id.to_string()));
        self.finish(id, KILLED_EXIT);
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Remove(id.to_string()));
        if let Some(container) = state.containers.get(id) {
            let running = container.started && container.exit.borrow().is_none();
            if running && !force {
                return Err(RuntimeError::Operation {
                    id: id.to_string(),
                    operation: "remove",
                    message: "container is running".to_string(),
                });
            }
            container.exit.send_if_modified(|exit| {
                if exit.is_none() {
                    *exit = Some(KILLED_EXIT);
                    true
                } else {
                    false
                }
            });
        }
        state.containers.remove(id);
        Ok(())
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<String, RuntimeError> {
        let files = list_context(context_dir);
        let mut state = self.lock();
        state.calls.push(RuntimeCall::BuildImage(tag.to_string()));
        if self.fail_image_builds {
            return Err(RuntimeError::ImageBuild {
                tag: tag.to_string(),
                message: "mock image build failure".to_string(),
            });
        }
        state.images.insert(tag.to_string(), files);
        Ok(format!("Successfully tagged {}", tag))
    }

    async fn remove_image(&self, tag: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::RemoveImage(tag.to_string()));
        state.images.remove(tag);
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let state = self.lock();
        Ok(state.pulled.contains(image) || state.images.contains_key(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::PullImage(image.to_string()));
        state.pulled.insert(image.to_string());
        Ok(())
    }
}
