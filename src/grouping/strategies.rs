use super::{suites_from_buckets, unique_name, GroupingStrategy, StrategyKind, SuiteConfigFile};
use crate::modules::common::{find_files, path_string, PatternMatcher};
use crate::record::Record;
use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Bucket name for files that live directly in the project root
const ROOT_SUITE: &str = "root";

/// Conventional directory names and the suite each one maps to
const CONVENTIONS: &[(&str, &str)] = &[
    ("unit", "unit"),
    ("integration", "integration"),
    ("integrations", "integration"),
    ("e2e", "e2e"),
    ("end-to-end", "e2e"),
    ("performance", "performance"),
    ("perf", "performance"),
];

fn parent_components(file: &str) -> Vec<String> {
    Path::new(file)
        .parent()
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Splits `patterns` into the ones that compile and the ones that do not
fn compiling_patterns(root: &Path, patterns: &[String]) -> (Vec<String>, Vec<String>) {
    patterns
        .iter()
        .cloned()
        .partition(|p| PatternMatcher::new(root, std::slice::from_ref(p), &[]).is_ok())
}

fn file_stem(file: &str) -> String {
    Path::new(file)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file.to_string())
}

pub struct ConfigurationStrategy {
    language: String,
    framework: String,
}

impl ConfigurationStrategy {
    pub fn new(language: &str, framework: &str) -> Self {
        Self {
            language: language.to_string(),
            framework: framework.to_string(),
        }
    }
}

impl GroupingStrategy for ConfigurationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Configuration
    }

    fn group(&self, root: &Path, files: &[String]) -> Result<Option<Record>> {
        let Some(config) = SuiteConfigFile::load(root)? else {
            return Ok(None);
        };

        let mut record = Record::new();
        let mut taken = HashSet::new();
        let mut warnings = Vec::new();

        for definition in config
            .suites
            .iter()
            .filter(|d| d.applies_to(&self.language, &self.framework))
        {
            let (patterns, bad_patterns) = compiling_patterns(root, &definition.patterns);
            let (excludes, bad_excludes) = compiling_patterns(root, &definition.exclude);
            for pattern in bad_patterns.iter().chain(&bad_excludes) {
                warnings.push(format!(
                    "Suite '{}': invalid pattern '{}' skipped",
                    definition.name, pattern
                ));
            }
            let matcher = match PatternMatcher::new(root, &patterns, &excludes) {
                Ok(matcher) => matcher,
                Err(e) => {
                    warnings.push(format!("Suite '{}' skipped: {:#}", definition.name, e));
                    continue;
                }
            };

            // restricted suites are taken verbatim from the whole tree; unrestricted ones
            // only claim files this platform discovered
            let matched: Vec<String> = if definition.is_restricted() {
                find_files(root, |p| matcher.matches(p))
                    .iter()
                    .map(|p| path_string(p))
                    .collect()
            } else {
                files
                    .iter()
                    .filter(|f| matcher.matches(Path::new(f.as_str())))
                    .cloned()
                    .collect()
            };

            if matched.is_empty() {
                continue;
            }

            let mut suite = Record::new()
                .with("name", unique_name(&definition.name, &mut taken))
                .with("metadata_strategy", StrategyKind::Configuration.as_str());
            suite.replace_array("files", matched);
            if let Some(parallel) = definition.parallel {
                suite.set("execution_config_parallel", parallel.to_string());
            }
            if let Some(timeout) = definition.timeout {
                suite.set("execution_config_timeout", timeout.to_string());
            }
            suite.replace_array("execution_config_environment", definition.environment_pairs());
            record.push_scoped("suites", &suite);
        }

        if warnings.is_empty() && record.array_count("suites") == 0 {
            return Ok(None);
        }
        record.replace_array("warnings", warnings);
        Ok(Some(record))
    }
}

pub struct ConventionStrategy;

impl ConventionStrategy {
    fn convention_for(file: &str) -> Option<&'static str> {
        parent_components(file).iter().find_map(|segment| {
            let segment = segment.to_lowercase();
            CONVENTIONS
                .iter()
                .find(|(dir, _)| *dir == segment)
                .map(|(_, suite)| *suite)
        })
    }
}

impl GroupingStrategy for ConventionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Convention
    }

    fn group(&self, _root: &Path, files: &[String]) -> Result<Option<Record>> {
        let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut matched_any = false;

        for file in files {
            let name = match Self::convention_for(file) {
                Some(suite) => {
                    matched_any = true;
                    suite
                }
                None => "default",
            };
            buckets.entry(name.to_string()).or_default().push(file.clone());
        }

        if !matched_any {
            return Ok(None);
        }
        Ok(Some(suites_from_buckets(buckets, self.kind())))
    }
}

pub struct SubdirectoryStrategy;

impl GroupingStrategy for SubdirectoryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Subdirectory
    }

    fn group(&self, _root: &Path, files: &[String]) -> Result<Option<Record>> {
        let nested = files.iter().any(|f| parent_components(f).len() >= 2);
        if !nested {
            return Ok(None);
        }

        let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in files {
            let components = parent_components(file);
            let name = if components.is_empty() {
                ROOT_SUITE.to_string()
            } else {
                components.join("_")
            };
            buckets.entry(name).or_default().push(file.clone());
        }
        Ok(Some(suites_from_buckets(buckets, self.kind())))
    }
}

pub struct DirectoryStrategy;

impl GroupingStrategy for DirectoryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Directory
    }

    fn group(&self, _root: &Path, files: &[String]) -> Result<Option<Record>> {
        if files.iter().all(|f| parent_components(f).is_empty()) {
            return Ok(None);
        }

        let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in files {
            let name = parent_components(file)
                .pop()
                .unwrap_or_else(|| ROOT_SUITE.to_string());
            buckets.entry(name).or_default().push(file.clone());
        }
        Ok(Some(suites_from_buckets(buckets, self.kind())))
    }
}

pub struct FileLevelStrategy;

impl GroupingStrategy for FileLevelStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FileLevel
    }

    fn group(&self, _root: &Path, files: &[String]) -> Result<Option<Record>> {
        let mut record = Record::new();
        let mut taken = HashSet::new();
        for file in files {
            let mut suite = Record::new()
                .with("name", unique_name(&file_stem(file), &mut taken))
                .with("metadata_strategy", self.kind().as_str());
            suite.replace_array("files", [file.as_str()]);
            record.push_scoped("suites", &suite);
        }
        Ok((record.array_count("suites") > 0).then_some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn files(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_convention_requires_a_match() {
        let dir = TempDir::new().unwrap();
        let result = ConventionStrategy
            .group(dir.path(), &files(&["src/foo_test.x", "lib/bar_test.x"]))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_convention_aliases_and_default_bucket() {
        let dir = TempDir::new().unwrap();
        let record = ConventionStrategy
            .group(
                dir.path(),
                &files(&[
                    "tests/integrations/a.rs",
                    "tests/end-to-end/b.rs",
                    "tests/perf/c.rs",
                    "tests/helpers/d.rs",
                ]),
            )
            .unwrap()
            .unwrap();

        let names: Vec<String> = record
            .scoped_array("suites")
            .iter()
            .map(|s| s.get_or("name", "").to_string())
            .collect();
        assert_eq!(names, vec!["default", "e2e", "integration", "performance"]);
    }

    #[test]
    fn test_subdirectory_joins_path() {
        let dir = TempDir::new().unwrap();
        let record = SubdirectoryStrategy
            .group(dir.path(), &files(&["tests/api/v1/a.bats", "tests/cli/b.bats"]))
            .unwrap()
            .unwrap();

        let suites = record.scoped_array("suites");
        assert_eq!(suites[0].get("name"), Some("tests_api_v1"));
        assert_eq!(suites[1].get("name"), Some("tests_cli"));
    }

    #[test]
    fn test_subdirectory_needs_nesting() {
        let dir = TempDir::new().unwrap();
        assert!(SubdirectoryStrategy
            .group(dir.path(), &files(&["src/a.x", "b.x"]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_file_level_unique_names() {
        let dir = TempDir::new().unwrap();
        let record = FileLevelStrategy
            .group(dir.path(), &files(&["a/x.bats", "b/x.bats"]))
            .unwrap()
            .unwrap();
        let suites = record.scoped_array("suites");
        assert_eq!(suites[0].get("name"), Some("x"));
        assert_eq!(suites[1].get("name"), Some("x_2"));
    }

    #[test]
    fn test_configuration_restricted_and_unrestricted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("tests/unit")).unwrap();
        fs::write(dir.path().join("tests/unit/a.rs"), "").unwrap();
        fs::write(
            dir.path().join("suitey.toml"),
            r#"
[[suite]]
name = "fast"
patterns = ["tests/unit/*.rs"]
framework = "cargo"
timeout = 30

[[suite]]
name = "everything"
patterns = ["**/*.bats"]
"#,
        )
        .unwrap();

        let cargo = ConfigurationStrategy::new("rust", "cargo")
            .group(dir.path(), &[])
            .unwrap()
            .unwrap();
        let suites = cargo.scoped_array("suites");
        assert_eq!(suites.len(), 1);
        assert_eq!(suites[0].get("name"), Some("fast"));
        assert_eq!(suites[0].get_array("files"), vec!["tests/unit/a.rs"]);
        assert_eq!(suites[0].get("execution_config_timeout"), Some("30"));

        let bats = ConfigurationStrategy::new("bash", "bats")
            .group(dir.path(), &files(&["tests/x.bats"]))
            .unwrap()
            .unwrap();
        assert_eq!(bats.get("suites_0_name"), Some("everything"));
    }

    #[test]
    fn test_configuration_skips_only_the_invalid_pattern() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("suitey.toml"),
            r#"
[[suite]]
name = "broken"
patterns = ["tests/["]

[[suite]]
name = "unit"
patterns = ["tests/unit/*.rs", "tests/{"]
"#,
        )
        .unwrap();

        let record = ConfigurationStrategy::new("rust", "cargo")
            .group(dir.path(), &files(&["tests/unit/a.rs", "tests/b.rs"]))
            .unwrap()
            .unwrap();
        let suites = record.scoped_array("suites");
        assert_eq!(suites.len(), 1);
        assert_eq!(suites[0].get("name"), Some("unit"));
        assert_eq!(suites[0].get_array("files"), vec!["tests/unit/a.rs"]);

        let warnings = record.get_array("warnings");
        assert!(warnings.iter().any(|w| w.contains("'tests/['")));
        assert!(warnings.iter().any(|w| w.contains("Suite 'broken' skipped")));
        assert!(warnings.iter().any(|w| w.contains("'tests/{'")));
        assert!(!warnings.iter().any(|w| w.contains("Suite 'unit' skipped")));
    }
}
