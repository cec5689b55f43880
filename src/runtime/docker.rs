use super::{ContainerInspection, ContainerRuntime, ContainerSpec, RuntimeError};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// [`ContainerRuntime`] backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    fn operation_error(id: &str, operation: &'static str, e: BollardError) -> RuntimeError {
        RuntimeError::Operation {
            id: id.to_string(),
            operation,
            message: e.to_string(),
        }
    }

    fn is_not_found(e: &BollardError) -> bool {
        matches!(
            e,
            BollardError::DockerResponseServerError {
                status_code: 404,
                ..
            }
        )
    }
}

fn tar_context(dir: PathBuf) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", &dir)?;
    builder.into_inner()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mounts: Vec<Mount> = spec
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.container_path.clone()),
                source: Some(m.host_path.to_string_lossy().to_string()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: Some(mounts),
            nano_cpus: spec.cpus.map(|c| c as i64 * 1_000_000_000),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            entrypoint: (!spec.entrypoint.is_empty()).then(|| spec.entrypoint.clone()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            env: Some(spec.env.clone()),
            working_dir: spec.working_dir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| RuntimeError::Create {
                name: spec.name.clone(),
                message: e.to_string(),
            })?;

        for warning in &response.warnings {
            warn!(container = %spec.name, "{}", warning);
        }
        debug!(container = %spec.name, id = %response.id, image = %spec.image, "Created container");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Self::operation_error(id, "start", e))
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let mut stream = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(Self::operation_error(id, "wait", e)),
            None => {
                let inspection = self.inspect_container(id).await?;
                Ok(inspection.exit_code.unwrap_or(-1))
            }
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspection, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Self::operation_error(id, "inspect", e))?;
        let state = response.state.unwrap_or_default();
        Ok(ContainerInspection {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn container_logs(&self, id: &str) -> Result<String, RuntimeError> {
        let mut stream = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(log) => output.push_str(&log.to_string()),
                Err(e) => return Err(Self::operation_error(id, "logs", e)),
            }
        }
        Ok(output)
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: grace.as_secs() as i64,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if Self::is_not_found(&e) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(Self::operation_error(id, "stop", e)),
        }
    }

    async fn kill_container(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .kill_container(id, Some(KillContainerOptions { signal: "SIGKILL" }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if Self::is_not_found(&e) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 409, ..
            }) => Ok(()),
            Err(e) => Err(Self::operation_error(id, "kill", e)),
        }
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if Self::is_not_found(&e) => Ok(()),
            Err(e) => Err(Self::operation_error(id, "remove", e)),
        }
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<String, RuntimeError> {
        let dir = context_dir.to_path_buf();
        let body = tokio::task::spawn_blocking(move || tar_context(dir))
            .await
            .map_err(|e| RuntimeError::ImageBuild {
                tag: tag.to_string(),
                message: e.to_string(),
            })??;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(Bytes::from(body)));

        let mut log = String::new();
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| RuntimeError::ImageBuild {
                tag: tag.to_string(),
                message: e.to_string(),
            })?;
            if let Some(line) = info.stream {
                log.push_str(&line);
            }
            if let Some(error) = info.error {
                return Err(RuntimeError::ImageBuild {
                    tag: tag.to_string(),
                    message: format!("{}\n{}", error, log),
                });
            }
        }

        debug!(tag, "Built image");
        Ok(log)
    }

    async fn remove_image(&self, tag: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_image(
                tag,
                Some(RemoveImageOptions {
                    force: true,
                    ..Default::default()
                }),
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if Self::is_not_found(&e) => Ok(()),
            Err(e) => Err(Self::operation_error(tag, "remove-image", e)),
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let filters: HashMap<String, Vec<String>> =
            HashMap::from([("reference".to_string(), vec![image.to_string()])]);
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| Self::operation_error(image, "list-images", e))?;
        Ok(!images.is_empty())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image, "Pulling image");
        let (from_image, tag) = split_reference(image);
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: from_image.to_string(),
                tag: tag.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| RuntimeError::ImagePull {
                image: image.to_string(),
                message: e.to_string(),
            })?;
            if let Some(status) = info.status {
                debug!(image, "{}", status);
            }
            if let Some(error) = info.error {
                return Err(RuntimeError::ImagePull {
                    image: image.to_string(),
                    message: error,
                });
            }
        }
        Ok(())
    }
}

/// Splits `name[:tag]` into name and tag, defaulting the tag to `latest`. A `:` inside
/// a registry host (`host:5000/name`) is not a tag separator.
fn split_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    match image.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (image, "latest"),
    }
}
