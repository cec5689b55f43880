use super::SchedulerError;
use crate::modules::common::shell_quote;
use crate::record::Record;
use crate::runtime::ContainerSpec;
use std::path::Path;

/// Container path the project tree is mounted at, read-only
pub const SOURCE_MOUNT: &str = "/source";
/// Container path of the fresh host directory artifacts are copied into
pub const ARTIFACTS_MOUNT: &str = "/artifacts";

const DEFAULT_WORKDIR: &str = "/build";

/// One containerized build, read from an element of a module's `build_steps` array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub module: String,
    pub framework: String,
    pub image: String,
    pub install_command: String,
    pub build_command: String,
    pub working_directory: String,
    pub volume_mounts: Vec<String>,
    pub environment: Vec<String>,
    /// Paths relative to the working directory
    pub artifacts: Vec<String>,
    pub cpu_cores: Option<usize>,
    pub depends_on: Vec<String>,
}

impl BuildStep {
    pub fn from_record(
        module: &str,
        default_framework: &str,
        record: &Record,
    ) -> Result<Self, SchedulerError> {
        let framework = record
            .get("framework")
            .filter(|f| !f.is_empty())
            .unwrap_or(default_framework)
            .to_string();
        let invalid = |reason: &str| SchedulerError::InvalidStep {
            framework: framework.clone(),
            reason: reason.to_string(),
        };

        let image = record
            .get("docker_image")
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| invalid("missing docker_image"))?
            .to_string();
        let build_command = record.get_or("build_command", "").to_string();
        if build_command.trim().is_empty() {
            return Err(invalid("missing build_command"));
        }
        let working_directory = record
            .get("working_directory")
            .filter(|w| w.starts_with('/'))
            .unwrap_or(DEFAULT_WORKDIR)
            .trim_end_matches('/')
            .to_string();
        if working_directory.is_empty() || working_directory == SOURCE_MOUNT {
            return Err(invalid("working_directory must be a writable absolute path"));
        }

        Ok(Self {
            module: module.to_string(),
            framework,
            image,
            install_command: record.get_or("install_dependencies_command", "").to_string(),
            build_command,
            working_directory,
            volume_mounts: record.get_array("volume_mounts"),
            environment: record.get_array("environment"),
            artifacts: record.get_array("artifacts"),
            cpu_cores: record.get_parsed::<usize>("cpu_cores").filter(|n| *n > 0),
            depends_on: Vec::new(),
        })
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// Shell script run inside the build container: copy the read-only source into the
    /// working directory, install, build, then copy each artifact to the artifacts mount.
    /// Any failing command fails the step.
    pub fn script(&self) -> String {
        let workdir = shell_quote(&self.working_directory);
        let mut lines = vec![
            "set -e".to_string(),
            format!("mkdir -p {}", workdir),
            format!("cp -a {}/. {}/", SOURCE_MOUNT, workdir),
            format!("cd {}", workdir),
        ];
        if !self.install_command.trim().is_empty() {
            lines.push(self.install_command.clone());
        }
        lines.push(self.build_command.clone());

        for artifact in &self.artifacts {
            let artifact = artifact.trim_matches('/');
            if artifact.is_empty() {
                continue;
            }
            let parent = match artifact.rsplit_once('/') {
                Some((parent, _)) => format!("{}/{}", ARTIFACTS_MOUNT, parent),
                None => ARTIFACTS_MOUNT.to_string(),
            };
            lines.push(format!(
                "mkdir -p {dir} && cp -a {src} {dir}/",
                dir = shell_quote(&parent),
                src = shell_quote(artifact)
            ));
        }
        lines.join("\n")
    }

    /// Launch description for this step. `/source` binds the project read-only and
    /// `/artifacts` binds `artifacts_dir` read-write; other declared mounts are ignored.
    pub fn container_spec(
        &self,
        project_root: &Path,
        artifacts_dir: &Path,
        default_cpus: usize,
    ) -> ContainerSpec {
        let mut spec = ContainerSpec::new(&self.image, &format!("suitey-build-{}", self.framework))
            .with_shell(&self.script())
            .with_env(self.environment.iter().cloned())
            .with_cpus(self.cpu_cores.unwrap_or(default_cpus));

        let mut source = false;
        let mut artifacts = false;
        for mount in &self.volume_mounts {
            let path = mount.split(':').next().unwrap_or_default();
            match path {
                SOURCE_MOUNT if !source => {
                    spec = spec.with_readonly_mount(project_root, SOURCE_MOUNT);
                    source = true;
                }
                ARTIFACTS_MOUNT if !artifacts => {
                    spec = spec.with_mount(artifacts_dir, ARTIFACTS_MOUNT, false);
                    artifacts = true;
                }
                _ => {}
            }
        }
        if !source {
            spec = spec.with_readonly_mount(project_root, SOURCE_MOUNT);
        }
        if !artifacts {
            spec = spec.with_mount(artifacts_dir, ARTIFACTS_MOUNT, false);
        }
        spec
    }

    /// `install && build`, as reported on failure
    pub fn command_line(&self) -> String {
        if self.install_command.trim().is_empty() {
            self.build_command.clone()
        } else {
            format!("{} && {}", self.install_command, self.build_command)
        }
    }
}
