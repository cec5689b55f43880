//! Declarative project modules read from `.suitey/modules/*.toml`.
//!
//! ```toml
//! identifier = "make-check"
//! language = "c"
//! framework = "make"
//! marker_files = ["Makefile"]
//! test_patterns = ["tests/**/*.sh"]
//! image = "gcc:13"
//! test_command = "make check TESTS='{files}'"
//!
//! [build]
//! install = "apt-get update && apt-get install -y bats"
//! command = "make"
//! artifacts = ["build"]
//!
//! [results]
//! passed = '(\d+) passed'
//! failed = '(\d+) failed'
//! ```

use super::common::{
    count_markers, find_files, path_string, run_suite_command, shell_quote, PatternMatcher,
};
use super::{Module, ModuleKind, ModuleMetadata};
use crate::execution::SuiteContext;
use crate::grouping::AdaptiveGrouper;
use crate::record::Record;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const PROJECT_MODULES_DIR: &str = ".suitey/modules";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestDefinition {
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    pub language: String,
    pub framework: String,
    #[serde(default)]
    pub priority: Option<u32>,
    /// Any of these files present in the project root means the platform is detected
    pub marker_files: Vec<String>,
    pub test_patterns: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Line prefix counted to estimate `test_count`
    #[serde(default)]
    pub test_marker: Option<String>,
    pub image: String,
    /// `{files}` expands to the suite's files, shell-quoted
    pub test_command: String,
    #[serde(default)]
    pub build: Option<BuildSection>,
    #[serde(default)]
    pub results: ResultPatterns,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    #[serde(default)]
    pub install: Option<String>,
    pub command: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Regexes whose first capture group is a count
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultPatterns {
    #[serde(default)]
    pub passed: Option<String>,
    #[serde(default)]
    pub failed: Option<String>,
}

impl ManifestDefinition {
    pub fn parse(content: &str) -> Result<Self> {
        let definition: ManifestDefinition = toml::from_str(content)?;
        if definition.marker_files.is_empty() {
            bail!("Module '{}' declares no marker_files", definition.identifier);
        }
        if definition.test_patterns.is_empty() {
            bail!("Module '{}' declares no test_patterns", definition.identifier);
        }
        Ok(definition)
    }
}

struct CompiledResults {
    passed: Option<Regex>,
    failed: Option<Regex>,
}

pub struct ManifestModule {
    metadata: ModuleMetadata,
    definition: ManifestDefinition,
    results: CompiledResults,
    source: PathBuf,
}

impl ManifestModule {
    pub fn new(definition: ManifestDefinition, source: PathBuf) -> Result<Self> {
        let compile = |pattern: &Option<String>| -> Result<Option<Regex>> {
            pattern
                .as_deref()
                .map(|p| Regex::new(p).with_context(|| format!("Invalid result pattern '{}'", p)))
                .transpose()
        };
        let results = CompiledResults {
            passed: compile(&definition.results.passed)?,
            failed: compile(&definition.results.failed)?,
        };

        let mut capabilities = vec!["testing"];
        if definition.build.is_some() {
            capabilities.push("compilation");
        }
        let mut metadata =
            ModuleMetadata::new(&definition.identifier, ModuleKind::Project, &definition.language)
                .with_name(definition.name.as_deref().unwrap_or(&definition.identifier))
                .with_description(&definition.description)
                .with_frameworks(&[definition.framework.as_str()])
                .with_capabilities(&capabilities)
                .with_required_binaries(&["docker"]);
        if let Some(priority) = definition.priority {
            metadata = metadata.with_priority(priority);
        }

        Ok(Self {
            metadata,
            definition,
            results,
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let definition = ManifestDefinition::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Self::new(definition, path.to_path_buf())
    }

    /// Loads every `*.toml` under the project's module directory, sorted by file name.
    /// Files that fail to load are skipped and reported.
    pub fn discover(root: &Path) -> (Vec<ManifestModule>, Vec<String>) {
        let dir = root.join(PROJECT_MODULES_DIR);
        let mut modules = Vec::new();
        let mut warnings = Vec::new();

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return (modules, warnings),
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "toml").unwrap_or(false))
            .collect();
        paths.sort();

        for path in paths {
            match Self::load(&path) {
                Ok(module) => {
                    debug!(module = %module.metadata.identifier, path = %path.display(), "Loaded project module");
                    modules.push(module);
                }
                Err(e) => {
                    let message = format!("Skipped project module {}: {:#}", path.display(), e);
                    warn!("{}", message);
                    warnings.push(message);
                }
            }
        }
        (modules, warnings)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn test_files(&self, root: &Path) -> Result<Vec<String>> {
        let matcher = PatternMatcher::new(
            root,
            &self.definition.test_patterns,
            &self.definition.exclude,
        )?;
        Ok(find_files(root, |p| matcher.matches(p))
            .iter()
            .map(|p| path_string(p))
            .collect())
    }

    fn count(pattern: &Option<Regex>, output: &str) -> Option<usize> {
        let regex = pattern.as_ref()?;
        let total = regex
            .captures_iter(output)
            .filter_map(|c| c.get(1)?.as_str().parse::<usize>().ok())
            .sum();
        Some(total)
    }
}

#[async_trait]
impl Module for ManifestModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn detect(&self, root: &Path) -> Result<Record> {
        let found: Vec<&String> = self
            .definition
            .marker_files
            .iter()
            .filter(|m| root.join(m).exists())
            .collect();
        if found.is_empty() {
            return Ok(Record::new().with("detected", "false"));
        }

        let mut record = Record::new()
            .with("detected", "true")
            .with("language", &self.definition.language)
            .with("framework", &self.definition.framework)
            .with("confidence", "high");
        record.replace_array("indicators", found);
        Ok(record)
    }

    fn check_container_environment(&self, _root: &Path, _platform: &Record) -> Result<Record> {
        Ok(Record::new()
            .with("container_ready", "true")
            .with("image", &self.definition.image))
    }

    fn discover_test_suites(&self, root: &Path, _platform: &Record) -> Result<Record> {
        let files = self.test_files(root)?;
        let outcome =
            AdaptiveGrouper::for_platform(&self.definition.language, &self.definition.framework)
                .group(root, &files);

        let mut record = Record::new().with("metadata_strategy", outcome.strategy.as_str());
        record.replace_array("warnings", outcome.warnings);
        for mut suite in outcome.suites.scoped_array("suites") {
            let test_count: usize = match &self.definition.test_marker {
                Some(marker) => suite
                    .get_array("files")
                    .iter()
                    .map(|f| count_markers(root, f, marker))
                    .sum(),
                None => suite.array_count("files"),
            };
            suite
                .set("language", &self.definition.language)
                .set("framework", &self.definition.framework)
                .set("test_count", test_count.to_string());
            record.push_scoped("suites", &suite);
        }
        if !record.has("suites_count") {
            record.set("suites_count", "0");
        }
        Ok(record)
    }

    fn detect_build_requirements(&self, _root: &Path, _platform: &Record) -> Result<Record> {
        let mut record = Record::new();
        match &self.definition.build {
            Some(build) => {
                record.set("requires_build", "true");
                record.replace_array("build_commands", [build.command.as_str()]);
                record.replace_array("build_dependencies", build.install.iter());
                record.replace_array("build_artifacts", &build.artifacts);
                record.replace_array("depends_on", &build.depends_on);
            }
            None => {
                record.set("requires_build", "false");
                record.replace_array("build_commands", Vec::<String>::new());
                record.replace_array("build_dependencies", Vec::<String>::new());
                record.replace_array("build_artifacts", Vec::<String>::new());
            }
        }
        Ok(record)
    }

    fn get_build_steps(&self, _root: &Path, requirements: &Record) -> Result<Record> {
        let mut record = Record::new();
        let build = self
            .definition
            .build
            .as_ref()
            .filter(|_| requirements.get_bool("requires_build"));
        let Some(build) = build else {
            record.set("build_steps_count", "0");
            return Ok(record);
        };

        let mut step = Record::new()
            .with("framework", &self.definition.framework)
            .with(
                "docker_image",
                build.image.as_deref().unwrap_or(&self.definition.image),
            )
            .with(
                "install_dependencies_command",
                requirements.get_array("build_dependencies").join(" && "),
            )
            .with("build_command", requirements.get_array("build_commands").join(" && "))
            .with("working_directory", "/build");
        step.replace_array("volume_mounts", ["/source:ro", "/artifacts:rw"]);
        step.replace_array("environment", Vec::<String>::new());
        step.replace_array("artifacts", requirements.get_array("build_artifacts"));
        record.push_scoped("build_steps", &step);
        Ok(record)
    }

    async fn execute_test_suite(&self, suite: &Record, ctx: &SuiteContext) -> Result<Record> {
        let files: Vec<String> = suite.get_array("files").iter().map(|f| shell_quote(f)).collect();
        let command = self.definition.test_command.replace("{files}", &files.join(" "));
        run_suite_command(suite, ctx, &self.definition.image, command, |output, exit_code| {
            self.parse_test_results(output, exit_code)
        })
        .await
    }

    fn parse_test_results(&self, output: &str, exit_code: i64) -> Result<Record> {
        let passed = Self::count(&self.results.passed, output);
        let failed = Self::count(&self.results.failed, output);
        let status = if exit_code == 0 && failed.unwrap_or(0) == 0 {
            "passed"
        } else {
            "failed"
        };

        let mut record = Record::new().with("status", status);
        if let (Some(p), Some(f)) = (passed, failed) {
            record.set("total_tests", (p + f).to_string());
        }
        if let Some(p) = passed {
            record.set("passed_tests", p.to_string());
        }
        if let Some(f) = failed {
            record.set("failed_tests", f.to_string());
        }
        Ok(record)
    }
}
