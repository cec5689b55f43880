use super::common::{
    count_markers, find_files, has_extension, path_string, run_suite_command, shell_quote,
};
use super::{Module, ModuleKind, ModuleMetadata};
use crate::execution::SuiteContext;
use crate::grouping::AdaptiveGrouper;
use crate::record::Record;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

const IMAGE: &str = "bats/bats:latest";

/// Bash Automated Testing System suites (`*.bats`), run straight from the source tree
pub struct BatsModule {
    metadata: ModuleMetadata,
}

impl BatsModule {
    pub fn new() -> Self {
        Self {
            metadata: ModuleMetadata::new("bats", ModuleKind::Framework, "bash")
                .with_name("BATS")
                .with_description("Bash test suites run with bats-core")
                .with_frameworks(&["bats"])
                .with_capabilities(&["testing"])
                .with_required_binaries(&["docker"]),
        }
    }

    fn bats_files(root: &Path) -> Vec<String> {
        find_files(root, |p| has_extension(p, "bats"))
            .iter()
            .map(|p| path_string(p))
            .collect()
    }
}

impl Default for BatsModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for BatsModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn detect(&self, root: &Path) -> Result<Record> {
        let files = Self::bats_files(root);
        if files.is_empty() {
            return Ok(Record::new().with("detected", "false"));
        }

        let in_test_dir = files
            .iter()
            .any(|f| f.starts_with("test/") || f.starts_with("tests/"));
        let mut record = Record::new()
            .with("detected", "true")
            .with("language", "bash")
            .with("framework", "bats")
            .with("confidence", if in_test_dir { "high" } else { "medium" });
        record.replace_array("indicators", [format!("{} .bats files", files.len())]);
        Ok(record)
    }

    fn check_container_environment(&self, _root: &Path, _platform: &Record) -> Result<Record> {
        Ok(Record::new()
            .with("container_ready", "true")
            .with("image", IMAGE))
    }

    fn discover_test_suites(&self, root: &Path, _platform: &Record) -> Result<Record> {
        let files = Self::bats_files(root);
        let outcome = AdaptiveGrouper::for_platform("bash", "bats").group(root, &files);

        let mut record = Record::new().with("metadata_strategy", outcome.strategy.as_str());
        record.replace_array("warnings", outcome.warnings);
        for mut suite in outcome.suites.scoped_array("suites") {
            let test_count: usize = suite
                .get_array("files")
                .iter()
                .map(|f| count_markers(root, f, "@test"))
                .sum();
            suite
                .set("language", "bash")
                .set("framework", "bats")
                .set("test_count", test_count.to_string());
            record.push_scoped("suites", &suite);
        }
        if !record.has("suites_count") {
            record.set("suites_count", "0");
        }
        Ok(record)
    }

    fn detect_build_requirements(&self, _root: &Path, _platform: &Record) -> Result<Record> {
        let mut record = Record::new().with("requires_build", "false");
        record.replace_array("build_commands", Vec::<String>::new());
        record.replace_array("build_dependencies", Vec::<String>::new());
        record.replace_array("build_artifacts", Vec::<String>::new());
        Ok(record)
    }

    fn get_build_steps(&self, _root: &Path, _requirements: &Record) -> Result<Record> {
        Ok(Record::new().with("build_steps_count", "0"))
    }

    async fn execute_test_suite(&self, suite: &Record, ctx: &SuiteContext) -> Result<Record> {
        let files: Vec<String> = suite
            .get_array("files")
            .iter()
            .map(|f| shell_quote(f))
            .collect();
        let command = format!("bats --tap {}", files.join(" "));
        run_suite_command(suite, ctx, IMAGE, command, |output, exit_code| {
            self.parse_test_results(output, exit_code)
        })
        .await
    }

    /// Reads TAP output: `1..N`, `ok N ...`, `not ok N ...`; `# skip` counts as skipped
    fn parse_test_results(&self, output: &str, exit_code: i64) -> Result<Record> {
        let mut planned: Option<usize> = None;
        let mut passed = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;

        for line in output.lines().map(str::trim) {
            if let Some(plan) = line.strip_prefix("1..") {
                planned = plan.trim().parse().ok();
            } else if line.starts_with("not ok") {
                failed += 1;
            } else if line.starts_with("ok") {
                if line.contains("# skip") {
                    skipped += 1;
                } else {
                    passed += 1;
                }
            }
        }

        let total = planned.unwrap_or(passed + failed + skipped);
        let status = if exit_code == 0 && failed == 0 {
            "passed"
        } else {
            "failed"
        };
        let mut record = Record::new()
            .with("status", status)
            .with("total_tests", total.to_string())
            .with("passed_tests", passed.to_string())
            .with("failed_tests", failed.to_string())
            .with("skipped_tests", skipped.to_string());
        if planned.is_none() && exit_code != 0 {
            record.set(
                "error",
                format!("bats exited with status {} without a TAP plan", exit_code),
            );
        }
        Ok(record)
    }
}
