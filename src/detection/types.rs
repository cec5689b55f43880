use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            other => Err(format!("Unknown confidence '{}'", other)),
        }
    }
}

/// A language/framework combination some module detected
#[derive(Debug, Clone, Serialize)]
pub struct Platform {
    /// Identifier of the owning module
    pub module: String,
    pub language: String,
    pub framework: String,
    pub confidence: Confidence,
    pub indicators: Vec<String>,
    pub container_ready: bool,
    pub image: Option<String>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub record: Record,
}

impl Platform {
    /// Reads a positive `detect` record. `default_framework` is used when the module
    /// does not report one.
    pub fn from_detection(
        module: &str,
        default_framework: &str,
        record: &Record,
    ) -> Result<Self, String> {
        let language = record
            .get("language")
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| format!("Module '{}' reported a platform without a language", module))?
            .to_string();
        let framework = record
            .get("framework")
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(default_framework)
            .to_string();
        let confidence = record
            .get("confidence")
            .map(Confidence::from_str)
            .transpose()
            .map_err(|e| format!("Module '{}': {}", module, e))?
            .unwrap_or(Confidence::Low);

        let mut record = record.clone();
        record.set("module", module);
        record.set("framework", &framework);
        record.set("confidence", confidence.as_str());

        Ok(Self {
            module: module.to_string(),
            language,
            framework,
            confidence,
            indicators: record.get_array("indicators"),
            container_ready: true,
            image: None,
            warnings: Vec::new(),
            record,
        })
    }

    /// Applies a `check_container_environment` record
    pub fn apply_environment(&mut self, environment: &Record) {
        self.container_ready = environment.get_bool("container_ready");
        self.image = environment.get("image").map(str::to_string);
        self.record.set("container_ready", self.container_ready.to_string());
        if let Some(image) = &self.image {
            self.record.set("image", image);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionConfig {
    pub parallel: bool,
    pub timeout: Option<Duration>,
    pub environment: Vec<String>,
}

/// A named set of test files run as one container
#[derive(Debug, Clone, Serialize)]
pub struct Suite {
    pub name: String,
    pub module: String,
    pub language: String,
    pub framework: String,
    pub files: Vec<String>,
    pub test_count: usize,
    pub strategy: String,
    pub execution_config: ExecutionConfig,
    #[serde(skip)]
    pub record: Record,
}

impl Suite {
    /// Reads one element of a `suites` record array
    pub fn from_record(record: &Record) -> Self {
        let execution_config = ExecutionConfig {
            parallel: record
                .get_parsed::<bool>("execution_config_parallel")
                .unwrap_or(true),
            timeout: record
                .get_parsed::<u64>("execution_config_timeout")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            environment: record.get_array("execution_config_environment"),
        };

        Self {
            name: record.get_or("name", "").to_string(),
            module: record.get_or("module", "").to_string(),
            language: record.get_or("language", "").to_string(),
            framework: record.get_or("framework", "").to_string(),
            files: record.get_array("files"),
            test_count: record.get_parsed("test_count").unwrap_or(0),
            strategy: record.get_or("metadata_strategy", "").to_string(),
            execution_config,
            record: record.clone(),
        }
    }
}

/// One platform's answer to `detect_build_requirements`
#[derive(Debug, Clone, Serialize)]
pub struct PlatformBuild {
    pub module: String,
    pub framework: String,
    pub requires_build: bool,
    pub build_commands: Vec<String>,
    pub build_dependencies: Vec<String>,
    pub build_artifacts: Vec<String>,
    /// Frameworks whose build must finish first
    pub depends_on: Vec<String>,
    #[serde(skip)]
    pub record: Record,
}

impl PlatformBuild {
    pub fn from_record(module: &str, framework: &str, record: &Record) -> Self {
        Self {
            module: module.to_string(),
            framework: framework.to_string(),
            requires_build: record.get_bool("requires_build"),
            build_commands: record.get_array("build_commands"),
            build_dependencies: record.get_array("build_dependencies"),
            build_artifacts: record.get_array("build_artifacts"),
            depends_on: record.get_array("depends_on"),
            record: record.clone(),
        }
    }
}

/// Aggregated build requirements of every detected platform
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildRequirements {
    pub requires_build: bool,
    pub build_commands: Vec<String>,
    pub build_dependencies: Vec<String>,
    pub build_artifacts: Vec<String>,
    pub platforms: Vec<PlatformBuild>,
}

impl BuildRequirements {
    /// Adds one platform; lists are concatenated, never deduplicated
    pub fn add(&mut self, platform: PlatformBuild) {
        self.requires_build |= platform.requires_build;
        self.build_commands.extend(platform.build_commands.iter().cloned());
        self.build_dependencies
            .extend(platform.build_dependencies.iter().cloned());
        self.build_artifacts.extend(platform.build_artifacts.iter().cloned());
        self.platforms.push(platform);
    }

    /// Platforms that need a build step
    pub fn required(&self) -> impl Iterator<Item = &PlatformBuild> {
        self.platforms.iter().filter(|p| p.requires_build)
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new().with("requires_build", self.requires_build.to_string());
        record.replace_array("build_commands", &self.build_commands);
        record.replace_array("build_dependencies", &self.build_dependencies);
        record.replace_array("build_artifacts", &self.build_artifacts);
        for platform in &self.platforms {
            let mut item = platform.record.clone();
            item.set("module", &platform.module);
            item.set("framework", &platform.framework);
            record.push_scoped("build_platforms", &item);
        }
        record
    }
}

/// Everything the detection pipeline learned about a project
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    pub platforms: Vec<Platform>,
    pub suites: Vec<Suite>,
    pub build: BuildRequirements,
    pub warnings: Vec<String>,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn platform(&self, framework: &str) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.framework == framework)
    }

    pub fn suites_for(&self, framework: &str) -> impl Iterator<Item = &Suite> {
        let framework = framework.to_string();
        self.suites.iter().filter(move |s| s.framework == framework)
    }

    /// Combined wire form: `platforms_*`, `suites_*`, build fields and `warnings_*`
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        for platform in &self.platforms {
            record.push_scoped("platforms", &platform.record);
        }
        for suite in &self.suites {
            record.push_scoped("suites", &suite.record);
        }
        record.merge(&self.build.to_record());
        record.replace_array("warnings", &self.warnings);
        if !record.has("platforms_count") {
            record.set("platforms_count", "0");
        }
        if !record.has("suites_count") {
            record.set("suites_count", "0");
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_detection() {
        let mut record = Record::new()
            .with("detected", "true")
            .with("language", "rust")
            .with("confidence", "HIGH");
        record.replace_array("indicators", ["Cargo.toml"]);

        let platform = Platform::from_detection("rust", "cargo", &record).unwrap();
        assert_eq!(platform.framework, "cargo");
        assert_eq!(platform.confidence, Confidence::High);
        assert_eq!(platform.indicators, vec!["Cargo.toml"]);
        assert_eq!(platform.record.get("module"), Some("rust"));
    }

    #[test]
    fn test_platform_requires_language() {
        let record = Record::new().with("detected", "true");
        assert!(Platform::from_detection("x", "x", &record).is_err());
    }

    #[test]
    fn test_suite_execution_config() {
        let mut record = Record::new()
            .with("name", "unit")
            .with("execution_config_parallel", "false")
            .with("execution_config_timeout", "30");
        record.replace_array("execution_config_environment", ["A=1"]);

        let suite = Suite::from_record(&record);
        assert!(!suite.execution_config.parallel);
        assert_eq!(suite.execution_config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(suite.execution_config.environment, vec!["A=1"]);
    }

    #[test]
    fn test_build_requirements_are_additive() {
        let mut first = Record::new().with("requires_build", "true");
        first.replace_array("build_commands", ["make"]);
        let mut second = Record::new().with("requires_build", "false");
        second.replace_array("build_commands", ["make"]);

        let mut build = BuildRequirements::default();
        build.add(PlatformBuild::from_record("a", "a", &first));
        build.add(PlatformBuild::from_record("b", "b", &second));

        assert!(build.requires_build);
        assert_eq!(build.build_commands, vec!["make", "make"]);
        assert_eq!(build.required().count(), 1);
        assert_eq!(build.to_record().get("build_platforms_count"), Some("2"));
    }
}
