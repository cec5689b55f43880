//! Test image assembly: staging directory, Dockerfile and post-build verification

use super::{BuildStep, SchedulerError};
use crate::modules::common::{find_files, path_string, shell_quote, CONTAINER_WORKSPACE};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Layers every test image carries, in Dockerfile order after the base image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayer {
    Source,
    Artifacts,
    Tests,
}

impl ImageLayer {
    pub fn all() -> [ImageLayer; 3] {
        [ImageLayer::Source, ImageLayer::Artifacts, ImageLayer::Tests]
    }

    /// Staging subdirectory and category name
    pub fn as_str(self) -> &'static str {
        match self {
            ImageLayer::Source => "source",
            ImageLayer::Artifacts => "artifacts",
            ImageLayer::Tests => "tests",
        }
    }
}

/// A staged build context ready for `build_image`
#[derive(Debug, Clone)]
pub struct StagedImage {
    pub framework: String,
    pub base_image: String,
    pub tag: String,
    pub context_dir: PathBuf,
    /// Absolute paths that must exist inside the built image
    pub expected: Vec<String>,
}

/// `<framework>-<build timestamp>`, lowercase and safe as an image reference
pub fn image_tag(framework: &str, built_at: DateTime<Utc>) -> String {
    let name: String = framework
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{}-{}", name.trim_matches('-'), built_at.format("%Y%m%d%H%M%S"))
}

pub fn dockerfile(base_image: &str) -> String {
    let mut lines = vec![
        format!("FROM {}", base_image),
        format!("WORKDIR {}", CONTAINER_WORKSPACE),
    ];
    for layer in ImageLayer::all() {
        lines.push(format!("COPY {}/ {}/", layer.as_str(), CONTAINER_WORKSPACE));
    }
    lines.join("\n") + "\n"
}

/// Lays out `context_dir` as `source/`, `artifacts/`, `tests/` plus a Dockerfile.
///
/// Fails verification when any layer would be empty.
pub fn stage(
    context_dir: &Path,
    step: &BuildStep,
    tag: &str,
    project_root: &Path,
    artifacts_dir: &Path,
    test_files: &[String],
) -> Result<StagedImage, SchedulerError> {
    let io_error = |e: io::Error| SchedulerError::Staging {
        framework: step.framework.clone(),
        message: e.to_string(),
    };

    let source_files = find_files(project_root, |_| true);
    let source_dir = context_dir.join(ImageLayer::Source.as_str());
    fs::create_dir_all(&source_dir).map_err(io_error)?;
    for relative in &source_files {
        copy_file(&project_root.join(relative), &source_dir.join(relative)).map_err(io_error)?;
    }

    let staged_artifacts = context_dir.join(ImageLayer::Artifacts.as_str());
    fs::create_dir_all(&staged_artifacts).map_err(io_error)?;
    copy_tree(artifacts_dir, &staged_artifacts).map_err(io_error)?;

    let tests_dir = context_dir.join(ImageLayer::Tests.as_str());
    fs::create_dir_all(&tests_dir).map_err(io_error)?;
    for file in test_files {
        let from = project_root.join(file);
        if from.is_file() {
            copy_file(&from, &tests_dir.join(file)).map_err(io_error)?;
        }
    }

    let missing: Vec<String> = ImageLayer::all()
        .into_iter()
        .filter(|layer| is_empty_dir(&context_dir.join(layer.as_str())))
        .map(|layer| layer.as_str().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SchedulerError::Verification {
            framework: step.framework.clone(),
            missing,
        });
    }

    fs::write(context_dir.join("Dockerfile"), dockerfile(&step.image)).map_err(io_error)?;

    let mut expected: Vec<String> = step
        .artifacts
        .iter()
        .map(|a| a.trim_matches('/'))
        .filter(|a| !a.is_empty())
        .map(|a| format!("{}/{}", CONTAINER_WORKSPACE, a))
        .collect();
    if let Some(first) = source_files.first() {
        expected.push(format!("{}/{}", CONTAINER_WORKSPACE, path_string(first)));
    }
    expected.extend(
        test_files
            .iter()
            .map(|f| format!("{}/{}", CONTAINER_WORKSPACE, f.trim_start_matches("./"))),
    );
    let mut seen = HashSet::new();
    expected.retain(|path| seen.insert(path.clone()));

    Ok(StagedImage {
        framework: step.framework.clone(),
        base_image: step.image.clone(),
        tag: tag.to_string(),
        context_dir: context_dir.to_path_buf(),
        expected,
    })
}

/// Prints `MISSING <path>` for each absent path and exits 1 if any was absent
pub fn verification_script(expected: &[String]) -> String {
    let mut lines = vec!["status=0".to_string()];
    for path in expected {
        let quoted = shell_quote(path);
        lines.push(format!(
            "[ -e {p} ] || {{ echo \"MISSING {raw}\"; status=1; }}",
            p = quoted,
            raw = path.replace('"', "\\\"")
        ));
    }
    lines.push("exit $status".to_string());
    lines.join("\n")
}

pub fn missing_paths(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("MISSING "))
        .map(str::to_string)
        .collect()
}

fn copy_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to).map(|_| ())
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            copy_file(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn is_empty_dir(dir: &Path) -> bool {
    !WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .any(|e| e.file_type().is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn step() -> BuildStep {
        let mut record = Record::new()
            .with("docker_image", "rust:latest")
            .with("build_command", "cargo build");
        record.replace_array("artifacts", ["target"]);
        BuildStep::from_record("rust", "cargo", &record).unwrap()
    }

    fn write(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_image_tag() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(image_tag("cargo", at), "cargo-20260301123005");
        assert_eq!(image_tag("My Framework", at), "my-framework-20260301123005");
    }

    #[test]
    fn test_dockerfile_layers() {
        assert_eq!(
            dockerfile("rust:latest"),
            "FROM rust:latest\nWORKDIR /workspace\nCOPY source/ /workspace/\nCOPY artifacts/ /workspace/\nCOPY tests/ /workspace/\n"
        );
    }

    #[test]
    fn test_stage_layout_and_expectations() {
        let project = TempDir::new().unwrap();
        write(project.path(), "Cargo.toml");
        write(project.path(), "tests/api.rs");
        let artifacts = TempDir::new().unwrap();
        write(artifacts.path(), "target/debug/app");
        let context = TempDir::new().unwrap();

        let staged = stage(
            context.path(),
            &step(),
            "cargo-1",
            project.path(),
            artifacts.path(),
            &["tests/api.rs".to_string()],
        )
        .unwrap();

        assert!(context.path().join("Dockerfile").is_file());
        assert!(context.path().join("artifacts/target/debug/app").is_file());
        assert!(context.path().join("source/Cargo.toml").is_file());
        assert!(context.path().join("tests/tests/api.rs").is_file());
        assert_eq!(
            staged.expected,
            vec!["/workspace/target", "/workspace/Cargo.toml", "/workspace/tests/api.rs"]
        );
    }

    #[test]
    fn test_expected_paths_are_unique() {
        let project = TempDir::new().unwrap();
        write(project.path(), "tests/a.rs");
        write(project.path(), "tests/b.rs");
        let artifacts = TempDir::new().unwrap();
        write(artifacts.path(), "target/debug/app");
        let context = TempDir::new().unwrap();

        let staged = stage(
            context.path(),
            &step(),
            "cargo-2",
            project.path(),
            artifacts.path(),
            &["tests/b.rs".to_string(), "tests/a.rs".to_string()],
        )
        .unwrap();

        assert_eq!(
            staged.expected,
            vec!["/workspace/target", "/workspace/tests/a.rs", "/workspace/tests/b.rs"]
        );
    }

    #[test]
    fn test_stage_fails_without_artifacts() {
        let project = TempDir::new().unwrap();
        write(project.path(), "tests/api.rs");
        let artifacts = TempDir::new().unwrap();
        let context = TempDir::new().unwrap();

        let err = stage(
            context.path(),
            &step(),
            "t",
            project.path(),
            artifacts.path(),
            &["tests/api.rs".to_string()],
        )
        .unwrap_err();
        match err {
            SchedulerError::Verification { missing, .. } => assert_eq!(missing, vec!["artifacts"]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_verification_script_and_parse() {
        let script = verification_script(&["/workspace/target".to_string()]);
        assert!(script.contains("[ -e /workspace/target ] || { echo \"MISSING /workspace/target\"; status=1; }"));
        assert!(script.ends_with("exit $status"));
        assert_eq!(
            missing_paths("MISSING /workspace/target\nother\n"),
            vec!["/workspace/target"]
        );
    }
}
