//! Module contract for language, framework and project backends.
//!
//! Every backend implements [`Module`]. Apart from [`Module::execute_test_suite`], each
//! method is a pure function of the project root and an upstream [`Record`], so the
//! scanner can call them from worker threads against the immutable [`ModuleRegistry`].

mod bats;
pub mod common;
mod manifest;
mod registry;
mod rust;

pub use bats::BatsModule;
pub use manifest::{ManifestDefinition, ManifestModule, PROJECT_MODULES_DIR};
pub use registry::{ModuleRegistry, RegistryError, Resolution};
pub use rust::RustModule;

use crate::execution::SuiteContext;
use crate::record::Record;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Language,
    Framework,
    Project,
}

impl ModuleKind {
    pub fn all() -> [ModuleKind; 3] {
        [ModuleKind::Language, ModuleKind::Framework, ModuleKind::Project]
    }

    pub fn default_priority(self) -> u32 {
        match self {
            ModuleKind::Language => 0,
            ModuleKind::Framework => 1,
            ModuleKind::Project => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Language => "language",
            ModuleKind::Framework => "framework",
            ModuleKind::Project => "project",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "language" => Ok(ModuleKind::Language),
            "framework" => Ok(ModuleKind::Framework),
            "project" => Ok(ModuleKind::Project),
            other => Err(format!(
                "Unknown module type '{}'. Valid options: language, framework, project",
                other
            )),
        }
    }
}

/// Static description of a module, fixed at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub identifier: String,
    pub kind: ModuleKind,
    pub priority: u32,
    pub name: String,
    pub version: String,
    pub description: String,
    pub language: String,
    pub frameworks: Vec<String>,
    pub capabilities: Vec<String>,
    pub required_binaries: Vec<String>,
}

impl ModuleMetadata {
    pub fn new(identifier: &str, kind: ModuleKind, language: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind,
            priority: kind.default_priority(),
            name: identifier.to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            language: language.to_string(),
            frameworks: Vec::new(),
            capabilities: Vec::new(),
            required_binaries: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_frameworks(mut self, frameworks: &[&str]) -> Self {
        self.frameworks = frameworks.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_required_binaries(mut self, binaries: &[&str]) -> Self {
        self.required_binaries = binaries.iter().map(|s| s.to_string()).collect();
        self
    }

    /// `{type}/{identifier}` lookup path
    pub fn path(&self) -> String {
        format!("{}/{}", self.kind, self.identifier)
    }

    /// Framework reported by the module's platforms; falls back to the language
    pub fn primary_framework(&self) -> &str {
        self.frameworks
            .first()
            .map(String::as_str)
            .unwrap_or(&self.language)
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("identifier", &self.identifier)
            .with("type", self.kind.as_str())
            .with("priority", self.priority.to_string())
            .with("name", &self.name)
            .with("version", &self.version)
            .with("description", &self.description)
            .with("language", &self.language);
        record.replace_array("frameworks", &self.frameworks);
        record.replace_array("capabilities", &self.capabilities);
        record.replace_array("required_binaries", &self.required_binaries);
        record
    }
}

/// Detection, discovery, build and execution contract shared by all backends
#[async_trait]
pub trait Module: Send + Sync {
    fn metadata(&self) -> &ModuleMetadata;

    /// Probes the project. Must return `detected=true|false`; positive results also carry
    /// `language`, `framework`, `confidence` and an `indicators` array.
    fn detect(&self, root: &Path) -> Result<Record>;

    /// Reports `container_ready` and the `image` the platform's tests need
    fn check_container_environment(&self, root: &Path, platform: &Record) -> Result<Record>;

    /// Returns a `suites` record array (`suites_0_name`, `suites_0_files_0`, ...)
    fn discover_test_suites(&self, root: &Path, platform: &Record) -> Result<Record>;

    /// Returns `requires_build` plus `build_commands`, `build_dependencies`,
    /// `build_artifacts` and `depends_on` arrays
    fn detect_build_requirements(&self, root: &Path, platform: &Record) -> Result<Record>;

    /// Returns a `build_steps` record array; one element launches one container
    fn get_build_steps(&self, root: &Path, requirements: &Record) -> Result<Record>;

    /// Runs one suite in a container and returns its result record
    async fn execute_test_suite(&self, suite: &Record, ctx: &SuiteContext) -> Result<Record>;

    /// Turns captured runner output into `status`, `total_tests`, `passed_tests`,
    /// `failed_tests`
    fn parse_test_results(&self, output: &str, exit_code: i64) -> Result<Record>;

    fn get_metadata(&self) -> Record {
        self.metadata().to_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priorities() {
        assert_eq!(ModuleKind::Language.default_priority(), 0);
        assert_eq!(ModuleKind::Framework.default_priority(), 1);
        assert_eq!(ModuleKind::Project.default_priority(), 2);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Project".parse::<ModuleKind>(), Ok(ModuleKind::Project));
        assert!("plugin".parse::<ModuleKind>().is_err());
    }

    #[test]
    fn test_metadata_record() {
        let meta = ModuleMetadata::new("rust", ModuleKind::Language, "rust")
            .with_frameworks(&["cargo"])
            .with_capabilities(&["testing", "compilation"]);
        let record = meta.to_record();

        assert_eq!(record.get("type"), Some("language"));
        assert_eq!(record.get("priority"), Some("0"));
        assert_eq!(record.get_array("capabilities"), vec!["testing", "compilation"]);
        assert_eq!(meta.path(), "language/rust");
        assert_eq!(meta.primary_framework(), "cargo");
    }
}
