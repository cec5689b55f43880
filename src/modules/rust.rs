use super::common::{
    count_markers, file_contains, find_files, has_extension, path_string, run_suite_command,
    shell_quote,
};
use super::{Module, ModuleKind, ModuleMetadata};
use crate::execution::SuiteContext;
use crate::grouping::AdaptiveGrouper;
use crate::record::Record;
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

const IMAGE: &str = "rust:latest";
const TEST_MARKERS: &[&str] = &["#[test]", "#[tokio::test]"];

fn result_line() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"test result: (\w+)\. (\d+) passed; (\d+) failed(?:; (\d+) ignored)?")
        })
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Invalid cargo result pattern: {}", e))
}

/// Cargo projects, built with `cargo test --no-run`. Loose `.rs` files without a
/// `Cargo.toml` are not a platform: cargo has nothing to build.
pub struct RustModule {
    metadata: ModuleMetadata,
}

impl RustModule {
    pub fn new() -> Self {
        Self {
            metadata: ModuleMetadata::new("rust", ModuleKind::Language, "rust")
                .with_name("Rust")
                .with_description("Rust crates tested with cargo")
                .with_frameworks(&["cargo"])
                .with_capabilities(&["testing", "compilation"])
                .with_required_binaries(&["docker"]),
        }
    }

    fn is_test_file(root: &Path, relative: &Path) -> bool {
        if !has_extension(relative, "rs") {
            return false;
        }
        let under_tests = relative
            .components()
            .next()
            .map(|c| c.as_os_str() == "tests")
            .unwrap_or(false);
        under_tests || TEST_MARKERS.iter().any(|m| file_contains(root, relative, m))
    }

    /// `cargo test` restricted to the targets the suite owns: `--test` for each
    /// integration file, `--lib --bins` for unit tests in the crate sources. Nested
    /// files under `tests/` are modules of some target, so they run with every target.
    fn test_command(files: &[String]) -> String {
        let mut targets = Vec::new();
        let mut crate_sources = false;
        let mut nested = false;
        for file in files {
            match file.strip_prefix("tests/") {
                Some(rest) if !rest.contains('/') => {
                    if let Some(target) = rest.strip_suffix(".rs") {
                        targets.push(format!("--test {}", shell_quote(target)));
                    }
                }
                Some(_) => nested = true,
                None => crate_sources = true,
            }
        }

        if nested || (targets.is_empty() && !crate_sources) {
            return "cargo test --color never".to_string();
        }
        if crate_sources {
            targets.insert(0, "--lib --bins".to_string());
        }
        format!("cargo test --color never {}", targets.join(" "))
    }
}

impl Default for RustModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for RustModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn detect(&self, root: &Path) -> Result<Record> {
        let mut record = Record::new();
        if !root.join("Cargo.toml").is_file() {
            record.set("detected", "false");
            return Ok(record);
        }

        let sources = find_files(root, |p| has_extension(p, "rs"));
        let mut indicators = vec!["Cargo.toml".to_string()];
        if root.join("Cargo.lock").is_file() {
            indicators.push("Cargo.lock".to_string());
        }
        if !sources.is_empty() {
            indicators.push(format!("{} .rs files", sources.len()));
        }

        record
            .set("detected", "true")
            .set("language", "rust")
            .set("framework", "cargo")
            .set("confidence", if sources.is_empty() { "medium" } else { "high" });
        record.replace_array("indicators", indicators);
        Ok(record)
    }

    fn check_container_environment(&self, root: &Path, _platform: &Record) -> Result<Record> {
        let mut record = Record::new()
            .with("container_ready", root.join("Cargo.toml").is_file().to_string())
            .with("image", IMAGE);
        if !root.join("Cargo.toml").is_file() {
            record.set("reason", "Cargo.toml is missing");
        }
        Ok(record)
    }

    fn discover_test_suites(&self, root: &Path, _platform: &Record) -> Result<Record> {
        let files: Vec<String> = find_files(root, |p| Self::is_test_file(root, p))
            .iter()
            .map(|p| path_string(p))
            .collect();

        let outcome = AdaptiveGrouper::for_platform("rust", "cargo").group(root, &files);
        let mut record = Record::new().with("metadata_strategy", outcome.strategy.as_str());
        record.replace_array("warnings", outcome.warnings);

        for mut suite in outcome.suites.scoped_array("suites") {
            let test_count: usize = suite
                .get_array("files")
                .iter()
                .map(|f| {
                    TEST_MARKERS
                        .iter()
                        .map(|m| count_markers(root, f, m))
                        .sum::<usize>()
                })
                .sum();
            suite
                .set("language", "rust")
                .set("framework", "cargo")
                .set("test_count", test_count.to_string());
            record.push_scoped("suites", &suite);
        }
        if !record.has("suites_count") {
            record.set("suites_count", "0");
        }
        Ok(record)
    }

    fn detect_build_requirements(&self, root: &Path, _platform: &Record) -> Result<Record> {
        if !root.join("Cargo.toml").is_file() {
            return Ok(Record::new().with("requires_build", "false"));
        }
        let mut record = Record::new().with("requires_build", "true");
        record.replace_array("build_dependencies", ["cargo fetch"]);
        record.replace_array("build_commands", ["cargo test --no-run --color never"]);
        record.replace_array("build_artifacts", ["target"]);
        record.replace_array("depends_on", Vec::<String>::new());
        Ok(record)
    }

    fn get_build_steps(&self, _root: &Path, requirements: &Record) -> Result<Record> {
        let mut record = Record::new();
        if !requirements.get_bool("requires_build") {
            record.set("build_steps_count", "0");
            return Ok(record);
        }

        let mut step = Record::new()
            .with("framework", "cargo")
            .with("docker_image", IMAGE)
            .with(
                "install_dependencies_command",
                requirements.get_array("build_dependencies").join(" && "),
            )
            .with(
                "build_command",
                requirements.get_array("build_commands").join(" && "),
            )
            .with("working_directory", "/build");
        step.replace_array("volume_mounts", ["/source:ro", "/artifacts:rw"]);
        step.replace_array("environment", ["CARGO_TERM_COLOR=never", "CARGO_INCREMENTAL=0"]);
        step.replace_array("artifacts", requirements.get_array("build_artifacts"));
        record.push_scoped("build_steps", &step);
        Ok(record)
    }

    async fn execute_test_suite(&self, suite: &Record, ctx: &SuiteContext) -> Result<Record> {
        let mut command = Self::test_command(&suite.get_array("files"));
        if ctx.test_image.is_none() {
            // the project mount is read-only
            command = format!("CARGO_TARGET_DIR=/tmp/target {}", command);
        }
        run_suite_command(suite, ctx, IMAGE, command, |output, exit_code| {
            self.parse_test_results(output, exit_code)
        })
        .await
    }

    fn parse_test_results(&self, output: &str, exit_code: i64) -> Result<Record> {
        let mut passed = 0usize;
        let mut failed = 0usize;
        let mut ignored = 0usize;
        let mut seen = false;

        for caps in result_line()?.captures_iter(output) {
            seen = true;
            passed += caps[2].parse::<usize>().unwrap_or(0);
            failed += caps[3].parse::<usize>().unwrap_or(0);
            ignored += caps
                .get(4)
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .unwrap_or(0);
        }

        let status = if exit_code == 0 && failed == 0 {
            "passed"
        } else {
            "failed"
        };
        let mut record = Record::new()
            .with("status", status)
            .with("total_tests", (passed + failed).to_string())
            .with("passed_tests", passed.to_string())
            .with("failed_tests", failed.to_string())
            .with("skipped_tests", ignored.to_string());
        if !seen && exit_code != 0 {
            record.set(
                "error",
                format!("cargo exited with status {} before reporting results", exit_code),
            );
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_detect_manifest() {
        let dir = project(&[("Cargo.toml", "[package]\nname = \"x\"\n"), ("src/lib.rs", "")]);
        let record = RustModule::new().detect(dir.path()).unwrap();

        assert!(record.get_bool("detected"));
        assert_eq!(record.get("confidence"), Some("high"));
        assert_eq!(record.get("indicators_0"), Some("Cargo.toml"));
    }

    #[test]
    fn test_loose_sources_are_not_a_cargo_project() {
        let dir = project(&[("docs/example.rs", "fn main() {}")]);
        let module = RustModule::new();

        assert!(!module.detect(dir.path()).unwrap().get_bool("detected"));
        let requirements = module
            .detect_build_requirements(dir.path(), &Record::new())
            .unwrap();
        assert!(!requirements.get_bool("requires_build"));
        assert!(!requirements.has("build_commands_count"));
    }

    #[test]
    fn test_detect_nothing() {
        let dir = project(&[("README.md", "")]);
        assert!(!RustModule::new().detect(dir.path()).unwrap().get_bool("detected"));
    }

    #[test]
    fn test_discover_counts_tests() {
        let dir = project(&[
            ("Cargo.toml", ""),
            ("src/lib.rs", "#[cfg(test)]\nmod tests {\n    #[test]\n    fn a() {}\n}\n"),
            ("src/util.rs", "pub fn x() {}"),
            ("tests/api.rs", "#[test]\nfn b() {}\n#[tokio::test]\nasync fn c() {}\n"),
        ]);
        let record = RustModule::new()
            .discover_test_suites(dir.path(), &Record::new())
            .unwrap();

        let suites = record.scoped_array("suites");
        assert_eq!(suites.len(), 2);
        let total: usize = suites
            .iter()
            .map(|s| s.get_parsed::<usize>("test_count").unwrap())
            .sum();
        assert_eq!(total, 3);
        assert!(suites.iter().all(|s| s.get("framework") == Some("cargo")));
    }

    #[test]
    fn test_build_steps_follow_requirements() {
        let dir = project(&[("Cargo.toml", "[package]\nname = \"x\"\n")]);
        let module = RustModule::new();
        let requirements = module
            .detect_build_requirements(dir.path(), &Record::new())
            .unwrap();
        let steps = module
            .get_build_steps(dir.path(), &requirements)
            .unwrap()
            .scoped_array("build_steps");

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].get("docker_image"), Some(IMAGE));
        assert_eq!(steps[0].get("install_dependencies_command"), Some("cargo fetch"));
        assert_eq!(steps[0].get_array("artifacts"), vec!["target"]);
    }

    #[test]
    fn test_parse_results_sums_targets() {
        let output = "\
running 2 tests
test result: ok. 2 passed; 0 failed; 1 ignored; 0 measured; 0 filtered out
running 3 tests
test result: FAILED. 2 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out
";
        let record = RustModule::new().parse_test_results(output, 101).unwrap();
        assert_eq!(record.get("status"), Some("failed"));
        assert_eq!(record.get("total_tests"), Some("5"));
        assert_eq!(record.get("passed_tests"), Some("4"));
        assert_eq!(record.get("failed_tests"), Some("1"));
        assert_eq!(record.get("skipped_tests"), Some("1"));
    }

    #[test]
    fn test_parse_compile_error() {
        let record = RustModule::new()
            .parse_test_results("error[E0425]: cannot find value", 101)
            .unwrap();
        assert_eq!(record.get("status"), Some("failed"));
        assert!(record.has("error"));
    }

    #[test]
    fn test_command_targets() {
        assert_eq!(
            RustModule::test_command(&["tests/api.rs".to_string(), "tests/cli.rs".to_string()]),
            "cargo test --color never --test api --test cli"
        );
        assert_eq!(
            RustModule::test_command(&["tests/unit/a_test.rs".to_string()]),
            "cargo test --color never"
        );
    }

    #[test]
    fn test_source_and_integration_suites_do_not_overlap() {
        let dir = project(&[
            ("Cargo.toml", "[package]\nname = \"x\"\n"),
            ("src/lib.rs", "#[cfg(test)]\nmod tests {\n    #[test]\n    fn a() {}\n}\n"),
            ("tests/integration_test.rs", "#[test]\nfn b() {}\n"),
        ]);
        let record = RustModule::new()
            .discover_test_suites(dir.path(), &Record::new())
            .unwrap();
        let suites = record.scoped_array("suites");
        let command_for = |name: &str| {
            let suite = suites.iter().find(|s| s.get("name") == Some(name)).unwrap();
            RustModule::test_command(&suite.get_array("files"))
        };

        assert_eq!(command_for("src"), "cargo test --color never --lib --bins");
        assert_eq!(
            command_for("tests"),
            "cargo test --color never --test integration_test"
        );
    }
}
