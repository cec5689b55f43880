//! Scriptable module for exercising the registry and the pipeline without real backends

use crate::execution::SuiteContext;
use crate::modules::common::run_suite_command;
use crate::modules::{Module, ModuleMetadata};
use crate::record::Record;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::Path;

/// A [`Module`] whose answers are fixed records.
///
/// Without configuration it detects nothing. `with_detection` makes it report a
/// platform, `with_suites` and `with_build` fill the later phases, and `failing_detect`
/// makes its probe error out.
#[derive(Clone)]
pub struct StubModule {
    metadata: ModuleMetadata,
    detection: Option<Record>,
    suites: Record,
    build: Record,
    steps: Record,
    image: String,
    detect_error: Option<String>,
}

impl StubModule {
    pub fn new(metadata: ModuleMetadata) -> Self {
        Self {
            metadata,
            detection: None,
            suites: Record::new().with("suites_count", "0"),
            build: Record::new().with("requires_build", "false"),
            steps: Record::new().with("build_steps_count", "0"),
            image: "alpine:3".to_string(),
            detect_error: None,
        }
    }

    /// Reports a high-confidence platform for the module's language and first framework
    pub fn detecting(mut self) -> Self {
        let mut record = Record::new()
            .with("detected", "true")
            .with("language", &self.metadata.language)
            .with("framework", self.metadata.primary_framework())
            .with("confidence", "high");
        record.replace_array("indicators", ["stub"]);
        self.detection = Some(record);
        self
    }

    pub fn with_detection(mut self, record: Record) -> Self {
        self.detection = Some(record);
        self
    }

    /// One suite per `(name, files)` pair
    pub fn with_suites(mut self, suites: &[(&str, &[&str])]) -> Self {
        let mut record = Record::new();
        for (name, files) in suites {
            let mut suite = Record::new()
                .with("name", *name)
                .with("language", &self.metadata.language)
                .with("framework", self.metadata.primary_framework())
                .with("test_count", files.len().to_string());
            suite.replace_array("files", files.iter().copied());
            record.push_scoped("suites", &suite);
        }
        if !record.has("suites_count") {
            record.set("suites_count", "0");
        }
        self.suites = record;
        self
    }

    /// Requires a build producing `artifacts`, depending on the given frameworks
    pub fn with_build(mut self, command: &str, artifacts: &[&str], depends_on: &[&str]) -> Self {
        let mut build = Record::new().with("requires_build", "true");
        build.replace_array("build_commands", [command]);
        build.replace_array("build_dependencies", Vec::<String>::new());
        build.replace_array("build_artifacts", artifacts.iter().copied());
        build.replace_array("depends_on", depends_on.iter().copied());

        let mut step = Record::new()
            .with("framework", self.metadata.primary_framework())
            .with("docker_image", &self.image)
            .with("install_dependencies_command", "")
            .with("build_command", command)
            .with("working_directory", "/build");
        step.replace_array("volume_mounts", ["/source:ro", "/artifacts:rw"]);
        step.replace_array("artifacts", artifacts.iter().copied());
        let mut steps = Record::new();
        steps.push_scoped("build_steps", &step);

        self.build = build;
        self.steps = steps;
        self
    }

    pub fn failing_detect(mut self, message: &str) -> Self {
        self.detect_error = Some(message.to_string());
        self
    }
}

#[async_trait]
impl Module for StubModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn detect(&self, _root: &Path) -> Result<Record> {
        if let Some(message) = &self.detect_error {
            return Err(anyhow!("{}", message));
        }
        Ok(self
            .detection
            .clone()
            .unwrap_or_else(|| Record::new().with("detected", "false")))
    }

    fn check_container_environment(&self, _root: &Path, _platform: &Record) -> Result<Record> {
        Ok(Record::new()
            .with("container_ready", "true")
            .with("image", &self.image))
    }

    fn discover_test_suites(&self, _root: &Path, _platform: &Record) -> Result<Record> {
        Ok(self.suites.clone())
    }

    fn detect_build_requirements(&self, _root: &Path, _platform: &Record) -> Result<Record> {
        Ok(self.build.clone())
    }

    fn get_build_steps(&self, _root: &Path, _requirements: &Record) -> Result<Record> {
        Ok(self.steps.clone())
    }

    async fn execute_test_suite(&self, suite: &Record, ctx: &SuiteContext) -> Result<Record> {
        let command = format!("run-tests {}", suite.get_array("files").join(" "));
        run_suite_command(suite, ctx, &self.image, command, |output, exit_code| {
            self.parse_test_results(output, exit_code)
        })
        .await
    }

    fn parse_test_results(&self, _output: &str, exit_code: i64) -> Result<Record> {
        Ok(Record::new()
            .with("status", if exit_code == 0 { "passed" } else { "failed" })
            .with("total_tests", "1")
            .with("passed_tests", if exit_code == 0 { "1" } else { "0" })
            .with("failed_tests", if exit_code == 0 { "0" } else { "1" }))
    }
}
