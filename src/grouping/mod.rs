//! Adaptive suite grouping.
//!
//! When a module has found its test files, the grouper decides how they are split into
//! suites. Strategies run in a fixed order and the first one whose own criterion is met
//! wins:
//!
//! 1. [`StrategyKind::Configuration`] - suites declared in `suitey.toml`
//! 2. [`StrategyKind::Convention`] - `unit`, `integration`, `e2e`, `performance` directories
//! 3. [`StrategyKind::Subdirectory`] - full relative directory path, for nested layouts
//! 4. [`StrategyKind::Directory`] - immediate parent directory
//! 5. [`StrategyKind::FileLevel`] - one suite per file, always succeeds
//!
//! Every strategy is a pure function of the project root and the file list.

mod config;
mod strategies;

pub use config::{SuiteConfigFile, SuiteDefinition, CONFIG_FILE_NAME};
pub use strategies::{
    ConfigurationStrategy, ConventionStrategy, DirectoryStrategy, FileLevelStrategy,
    SubdirectoryStrategy,
};

use crate::record::Record;
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Configuration,
    Convention,
    Subdirectory,
    Directory,
    FileLevel,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Configuration => "configuration",
            StrategyKind::Convention => "convention",
            StrategyKind::Subdirectory => "subdirectory",
            StrategyKind::Directory => "directory",
            StrategyKind::FileLevel => "file-level",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait GroupingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// `Ok(None)` when the strategy's criterion is not met. A `warnings` array in the
    /// returned record is reported and removed. Errors are configuration problems; the
    /// grouper reports them and moves on to the next strategy.
    fn group(&self, root: &Path, files: &[String]) -> Result<Option<Record>>;
}

#[derive(Debug, Clone)]
pub struct GroupingOutcome {
    pub strategy: StrategyKind,
    pub suites: Record,
    pub warnings: Vec<String>,
}

pub struct AdaptiveGrouper {
    strategies: Vec<Box<dyn GroupingStrategy>>,
}

impl AdaptiveGrouper {
    /// Grouper for files owned by the given platform
    pub fn for_platform(language: &str, framework: &str) -> Self {
        Self {
            strategies: vec![
                Box::new(ConfigurationStrategy::new(language, framework)),
                Box::new(ConventionStrategy),
                Box::new(SubdirectoryStrategy),
                Box::new(DirectoryStrategy),
                Box::new(FileLevelStrategy),
            ],
        }
    }

    /// Grouper without the configuration strategy
    pub fn adaptive_only() -> Self {
        Self {
            strategies: vec![
                Box::new(ConventionStrategy),
                Box::new(SubdirectoryStrategy),
                Box::new(DirectoryStrategy),
                Box::new(FileLevelStrategy),
            ],
        }
    }

    pub fn group(&self, root: &Path, files: &[String]) -> GroupingOutcome {
        let mut warnings = Vec::new();

        for strategy in &self.strategies {
            match strategy.group(root, files) {
                Ok(Some(mut suites)) => {
                    for message in suites.get_array("warnings") {
                        warn!("{}", message);
                        warnings.push(message);
                    }
                    suites.clear_array("warnings");
                    if suites.array_count("suites") == 0 {
                        continue;
                    }
                    debug!(
                        strategy = %strategy.kind(),
                        suites = suites.array_count("suites"),
                        "Grouped test files"
                    );
                    return GroupingOutcome {
                        strategy: strategy.kind(),
                        suites,
                        warnings,
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    let message = format!("{} grouping skipped: {:#}", strategy.kind(), e);
                    warn!("{}", message);
                    warnings.push(message);
                }
            }
        }

        GroupingOutcome {
            strategy: StrategyKind::FileLevel,
            suites: Record::new().with("suites_count", "0"),
            warnings,
        }
    }
}

/// Builds a `suites` record array from named buckets, skipping empty ones
pub(crate) fn suites_from_buckets(
    buckets: BTreeMap<String, Vec<String>>,
    strategy: StrategyKind,
) -> Record {
    let mut record = Record::new();
    for (name, files) in buckets {
        if files.is_empty() {
            continue;
        }
        let mut suite = Record::new()
            .with("name", name)
            .with("metadata_strategy", strategy.as_str());
        suite.replace_array("files", files);
        record.push_scoped("suites", &suite);
    }
    if !record.has("suites_count") {
        record.set("suites_count", "0");
    }
    record
}

/// Makes `name` unique against `taken` by appending `_2`, `_3`, ...
pub(crate) fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", name, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
