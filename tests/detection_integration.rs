//! Detection pipeline against real project trees
//!
//! Uses the built-in modules; no container runtime is involved.

mod support;

use std::sync::Arc;
use suitey::grouping::{AdaptiveGrouper, StrategyKind};
use suitey::modules::ModuleRegistry;
use suitey::ProjectScanner;
use support::{rust_bats_project, TestProject};
use yare::parameterized;

fn scanner() -> ProjectScanner {
    ProjectScanner::new(Arc::new(ModuleRegistry::with_builtins()))
}

#[tokio::test]
async fn test_rust_and_bats_yield_one_suite_per_platform() {
    let project = rust_bats_project();
    let scan = scanner().scan(project.path()).await;

    let platforms: Vec<(&str, &str)> = scan
        .platforms
        .iter()
        .map(|p| (p.language.as_str(), p.framework.as_str()))
        .collect();
    assert_eq!(platforms, vec![("rust", "cargo"), ("bash", "bats")]);

    assert_eq!(scan.suites.len(), 2);
    let cargo: Vec<_> = scan.suites_for("cargo").collect();
    let bats: Vec<_> = scan.suites_for("bats").collect();
    assert_eq!(cargo.len(), 1);
    assert_eq!(bats.len(), 1);
    assert_eq!(cargo[0].files, vec!["tests/unit/a_test.rs"]);
    assert_eq!(cargo[0].module, "rust");
    assert_eq!(bats[0].files, vec!["tests/bats/b.bats"]);
    assert_eq!(bats[0].test_count, 1);
}

#[tokio::test]
async fn test_only_compiled_platforms_need_a_build() {
    let project = rust_bats_project();
    let scan = scanner().scan(project.path()).await;

    assert!(scan.build.requires_build);
    let required: Vec<&str> = scan.build.required().map(|p| p.framework.as_str()).collect();
    assert_eq!(required, vec!["cargo"]);
    assert_eq!(scan.build.platforms.len(), 2);
}

#[tokio::test]
async fn test_stray_rust_file_does_not_force_a_cargo_build() {
    let project = TestProject::new()
        .file("tests/x.bats", "@test \"x\" {\n  true\n}\n")
        .file("docs/example.rs", "fn main() {}\n");
    let scan = scanner().scan(project.path()).await;

    let frameworks: Vec<&str> = scan.platforms.iter().map(|p| p.framework.as_str()).collect();
    assert_eq!(frameworks, vec!["bats"]);
    assert!(!scan.build.requires_build);
    assert_eq!(scan.build.required().count(), 0);
    assert_eq!(scan.suites.len(), 1);
}

#[tokio::test]
async fn test_sequential_detection_matches_concurrent() {
    let project = rust_bats_project();
    let concurrent = scanner().scan(project.path()).await;
    let sequential = scanner().with_concurrency(false).scan(project.path()).await;

    let names = |scan: &suitey::ScanResult| -> Vec<String> {
        scan.suites.iter().map(|s| s.name.clone()).collect()
    };
    assert_eq!(names(&concurrent), names(&sequential));
}

#[tokio::test]
async fn test_empty_project_detects_nothing() {
    let project = TestProject::new().file("README.md", "# nothing here\n");
    let scan = scanner().scan(project.path()).await;

    assert!(scan.is_empty());
    assert!(scan.suites.is_empty());
    assert!(!scan.build.requires_build);
}

#[tokio::test]
async fn test_suite_names_unique_across_platforms() {
    let project = TestProject::new()
        .file("Cargo.toml", "[package]\nname = \"x\"\n")
        .file("tests/unit/a_test.rs", "#[test]\nfn a() {}\n")
        .file("tests/unit/b.bats", "@test \"b\" {\n}\n");
    let scan = scanner().scan(project.path()).await;

    let mut names: Vec<&str> = scan.suites.iter().map(|s| s.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["unit", "unit_2"]);
}

#[tokio::test]
async fn test_suite_configuration_drives_grouping() {
    let project = rust_bats_project().file(
        "suitey.toml",
        r#"
[[suite]]
name = "shell"
patterns = ["tests/bats/*.bats"]
framework = "bats"
timeout = 30

[suite.environment]
TERM = "dumb"
"#,
    );
    let scan = scanner().scan(project.path()).await;

    let shell = scan.suites.iter().find(|s| s.name == "shell").unwrap();
    assert_eq!(shell.framework, "bats");
    assert_eq!(shell.strategy, "configuration");
    assert_eq!(shell.execution_config.timeout, Some(std::time::Duration::from_secs(30)));
    assert_eq!(shell.execution_config.environment, vec!["TERM=dumb"]);

    // restricted to bats, so cargo falls back to the adaptive strategies
    let cargo: Vec<_> = scan.suites_for("cargo").collect();
    assert_eq!(cargo[0].strategy, "convention");
}

#[tokio::test]
async fn test_malformed_configuration_falls_back() {
    let project = rust_bats_project().file("suitey.toml", "[[suite]\nname = ");
    let scan = scanner().scan(project.path()).await;

    assert_eq!(scan.suites.len(), 2);
    assert!(scan.suites.iter().all(|s| s.strategy != "configuration"));
    assert!(scan
        .warnings
        .iter()
        .any(|w| w.contains("configuration grouping skipped")));
}

#[parameterized(
    directory = { &["src/foo_test.x", "src/bar_test.x"], StrategyKind::Directory, &["src"] },
    convention = { &["tests/unit/a.x", "tests/integration/b.x"], StrategyKind::Convention, &["integration", "unit"] },
    subdirectory = { &["tests/api/v1/a.x", "tests/api/v2/b.x"], StrategyKind::Subdirectory, &["tests_api_v1", "tests_api_v2"] },
    file_level = { &["a_test.x", "b_test.x"], StrategyKind::FileLevel, &["a_test", "b_test"] },
)]
fn test_grouping_strategy_chain(files: &[&str], expected: StrategyKind, names: &[&str]) {
    let project = TestProject::new();
    let files: Vec<String> = files.iter().map(|f| f.to_string()).collect();
    let outcome = AdaptiveGrouper::for_platform("x", "x").group(project.path(), &files);

    assert_eq!(outcome.strategy, expected);
    let actual: Vec<String> = outcome
        .suites
        .scoped_array("suites")
        .iter()
        .map(|s| s.get_or("name", "").to_string())
        .collect();
    assert_eq!(actual, names);
}
