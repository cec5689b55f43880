//! Narrow container runtime surface used by the lifecycle controller and scheduler.
//!
//! [`DockerRuntime`] talks to a local daemon through bollard; [`MockRuntime`] scripts
//! container behaviour in memory so scheduling and shutdown paths can be exercised
//! without a daemon.

mod docker;
mod mock;

pub use docker::DockerRuntime;
pub use mock::{MockBehavior, MockRuntime, RuntimeCall};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container runtime is not available: {0}. Start the Docker daemon and check that the current user can access its socket")]
    Unavailable(String),

    #[error("Failed to create container '{name}': {message}")]
    Create { name: String, message: String },

    #[error("Container '{id}' operation '{operation}' failed: {message}")]
    Operation {
        id: String,
        operation: &'static str,
        message: String,
    },

    #[error("Failed to build image '{tag}': {message}")]
    ImageBuild { tag: String, message: String },

    #[error("Failed to pull image '{image}': {message}")]
    ImagePull { image: String, message: String },

    #[error("I/O error while preparing container input: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// Everything needed to launch one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    /// Overrides the image entrypoint when non-empty
    pub entrypoint: Vec<String>,
    pub command: Vec<String>,
    pub working_dir: Option<String>,
    pub env: Vec<String>,
    pub mounts: Vec<VolumeMount>,
    pub cpus: Option<usize>,
}

impl ContainerSpec {
    /// `name` is sanitised and suffixed so concurrent runs never collide
    pub fn new(image: &str, name: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            image: image.to_string(),
            name: format!("{}-{}", sanitize_name(name), &suffix[..8]),
            entrypoint: Vec::new(),
            command: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            mounts: Vec::new(),
            cpus: None,
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Runs `script` through `sh -c`, whatever the image entrypoint is
    pub fn with_shell(mut self, script: &str) -> Self {
        self.entrypoint = vec!["sh".to_string(), "-c".to_string()];
        self.command = vec![script.to_string()];
        self
    }

    pub fn with_working_dir(mut self, dir: &str) -> Self {
        self.working_dir = Some(dir.to_string());
        self
    }

    pub fn with_env<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(vars.into_iter().map(Into::into));
        self
    }

    pub fn with_mount(mut self, host_path: &Path, container_path: &str, read_only: bool) -> Self {
        self.mounts.push(VolumeMount {
            host_path: host_path.to_path_buf(),
            container_path: container_path.to_string(),
            read_only,
        });
        self
    }

    pub fn with_readonly_mount(self, host_path: &Path, container_path: &str) -> Self {
        self.with_mount(host_path, container_path, true)
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = Some(cpus.max(1));
        self
    }
}

/// Lowercase alphanumerics, `-`, `_` and `.`; anything else becomes `-`
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '.' || c == '_');
    if trimmed.is_empty() {
        "suitey".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerInspection {
    pub running: bool,
    pub exit_code: Option<i64>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fails with [`RuntimeError::Unavailable`] when the daemon cannot be reached
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Returns the container id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Blocks until the container exits and returns its exit code
    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspection, RuntimeError>;

    /// Combined stdout and stderr
    async fn container_logs(&self, id: &str) -> Result<String, RuntimeError>;

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    /// Builds `context_dir/Dockerfile` and tags the result; returns the build log
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<String, RuntimeError>;

    async fn remove_image(&self, tag: &str) -> Result<(), RuntimeError>;

    /// Whether `image` is present in the local image store
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Pulls `image` unless it is already present locally
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.image_exists(image).await? {
            return Ok(());
        }
        self.pull_image(image).await
    }
}
