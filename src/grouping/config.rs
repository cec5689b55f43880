//! Explicit suite declarations from `suitey.toml`
//!
//! ```toml
//! [[suite]]
//! name = "unit"
//! patterns = ["tests/unit/**/*.rs"]
//! framework = "cargo"
//! exclude = ["tests/unit/fixtures/**"]
//! parallel = true
//! timeout = 300
//!
//! [suite.environment]
//! RUST_BACKTRACE = "1"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "suitey.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfigFile {
    #[serde(default, rename = "suite")]
    pub suites: Vec<SuiteDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteDefinition {
    pub name: String,
    pub patterns: Vec<String>,
    /// Restricts the suite to one language
    #[serde(default)]
    pub platform: Option<String>,
    /// Restricts the suite to one framework
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub parallel: Option<bool>,
    /// Seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl SuiteDefinition {
    /// `true` when the suite has no restriction or the restriction names this platform
    pub fn applies_to(&self, language: &str, framework: &str) -> bool {
        let platform_ok = self
            .platform
            .as_deref()
            .map(|p| p.eq_ignore_ascii_case(language))
            .unwrap_or(true);
        let framework_ok = self
            .framework
            .as_deref()
            .map(|f| f.eq_ignore_ascii_case(framework))
            .unwrap_or(true);
        platform_ok && framework_ok
    }

    pub fn is_restricted(&self) -> bool {
        self.platform.is_some() || self.framework.is_some()
    }

    /// `KEY=VALUE` pairs in key order
    pub fn environment_pairs(&self) -> Vec<String> {
        self.environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

impl SuiteConfigFile {
    /// `Ok(None)` when the project has no configuration file
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
            .map(Some)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: SuiteConfigFile = toml::from_str(content)?;
        for suite in &config.suites {
            if suite.name.trim().is_empty() {
                anyhow::bail!("Suite names must not be empty");
            }
            if suite.patterns.is_empty() {
                anyhow::bail!("Suite '{}' declares no patterns", suite.name);
            }
        }
        Ok(config)
    }
}
