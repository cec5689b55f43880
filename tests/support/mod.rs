//! Shared helpers for integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use suitey::modules::ModuleRegistry;
use suitey::testing::StubModule;
use suitey::{ModuleKind, ModuleMetadata, SuiteyConfig};
use tempfile::TempDir;

/// Throwaway project tree
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn file(self, relative: &str, content: &str) -> Self {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&path, content).expect("Failed to write fixture file");
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Cargo crate with one integration-style unit test and one bats suite
pub fn rust_bats_project() -> TestProject {
    TestProject::new()
        .file(
            "Cargo.toml",
            "[package]\nname = \"combined\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
        )
        .file("src/lib.rs", "pub fn combined_add(a: i32, b: i32) -> i32 {\n    a + b\n}\n")
        .file(
            "tests/unit/a_test.rs",
            "#[test]\nfn adds() {\n    assert_eq!(combined::combined_add(1, 2), 3);\n}\n",
        )
        .file(
            "tests/bats/b.bats",
            "#!/usr/bin/env bats\n\n@test \"shell works\" {\n  true\n}\n",
        )
}

/// Settings that keep integration runs fast and independent of the environment
pub fn test_config() -> SuiteyConfig {
    SuiteyConfig {
        log_level: "info".to_string(),
        grace_period_secs: 1,
        max_parallel: 4,
        build_cpus: 1,
        temp_dir: None,
        detect_concurrently: true,
        keep_images: false,
    }
}

/// Stub language module that detects itself and owns one suite, `tests/{identifier}.t`
pub fn stub(identifier: &str) -> StubModule {
    let suite_file = format!("tests/{}.t", identifier);
    StubModule::new(
        ModuleMetadata::new(identifier, ModuleKind::Language, identifier)
            .with_frameworks(&[identifier]),
    )
    .detecting()
    .with_suites(&[(identifier, &[suite_file.as_str()])])
}

/// [`stub`] that also needs a build producing `out`
pub fn stub_building(identifier: &str, command: &str, depends_on: &[&str]) -> StubModule {
    stub(identifier).with_build(command, &["out"], depends_on)
}

pub fn registry(modules: Vec<StubModule>) -> Arc<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    for module in modules {
        registry
            .register(Arc::new(module))
            .expect("Failed to register stub module");
    }
    Arc::new(registry)
}

/// Project containing the suite files the `stub` modules claim
pub fn stub_project(identifiers: &[&str]) -> TestProject {
    identifiers.iter().fold(TestProject::new(), |project, id| {
        project.file(&format!("tests/{}.t", id), "test\n")
    })
}

/// Path of the compiled `suitey` binary
pub fn suitey_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_suitey"))
}
