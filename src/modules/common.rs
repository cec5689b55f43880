//! Helpers shared by the built-in and declarative modules

use crate::execution::SuiteContext;
use crate::record::Record;
use crate::runtime::ContainerSpec;
use anyhow::{anyhow, Context, Result};
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directories never searched for tests
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".suitey",
    "target",
    "node_modules",
    "vendor",
    ".idea",
    ".vscode",
];

const MAX_DEPTH: usize = 12;

/// Mount point of the project inside test and build containers
pub const CONTAINER_WORKSPACE: &str = "/workspace";

/// Walks `root` (honouring `.gitignore`) and returns project-relative paths of files
/// accepted by `filter`, sorted.
pub fn find_files<F>(root: &Path, filter: F) -> Vec<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    let mut files = Vec::new();

    let walker = WalkBuilder::new(root)
        .max_depth(Some(MAX_DEPTH))
        .hidden(false)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(|entry| {
            entry.depth() == 0
                || entry
                    .file_name()
                    .to_str()
                    .map(|name| !EXCLUDED_DIRS.contains(&name))
                    .unwrap_or(true)
        })
        .build();

    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "Failed to read directory entry");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if filter(relative) {
            files.push(relative.to_path_buf());
        }
    }

    files.sort();
    files
}

pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Forward-slash string form of a relative path, as stored in records
pub fn path_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Number of lines in `root/relative` whose trimmed form starts with `marker`
pub fn count_markers(root: &Path, relative: &str, marker: &str) -> usize {
    match std::fs::read_to_string(root.join(relative)) {
        Ok(content) => content
            .lines()
            .filter(|line| line.trim_start().starts_with(marker))
            .count(),
        Err(e) => {
            debug!(file = relative, error = %e, "Could not read test file");
            0
        }
    }
}

pub fn file_contains(root: &Path, relative: &Path, needle: &str) -> bool {
    std::fs::read_to_string(root.join(relative))
        .map(|content| content.contains(needle))
        .unwrap_or(false)
}

/// Glob matcher rooted at the project, with gitignore-style patterns
pub struct PatternMatcher {
    include: Override,
    exclude: Option<Override>,
}

impl PatternMatcher {
    pub fn new(root: &Path, patterns: &[String], excludes: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            return Err(anyhow!("At least one pattern is required"));
        }
        let include = build_override(root, patterns)?;
        let exclude = if excludes.is_empty() {
            None
        } else {
            Some(build_override(root, excludes)?)
        };
        Ok(Self { include, exclude })
    }

    pub fn matches(&self, relative: &Path) -> bool {
        if !self.include.matched(relative, false).is_whitelist() {
            return false;
        }
        match &self.exclude {
            Some(exclude) => !exclude.matched(relative, false).is_whitelist(),
            None => true,
        }
    }
}

fn build_override(root: &Path, patterns: &[String]) -> Result<Override> {
    let mut builder = OverrideBuilder::new(root);
    for pattern in patterns {
        builder
            .add(pattern)
            .with_context(|| format!("Invalid glob pattern '{}'", pattern))?;
    }
    builder.build().context("Failed to compile glob patterns")
}

/// Looks a binary up on the host `PATH`
pub fn binary_on_path(binary: &str) -> bool {
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false)
}

/// Host binaries from `required` that are missing
pub fn missing_binaries(required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|b| !binary_on_path(b))
        .cloned()
        .collect()
}

/// Runs a suite's shell command through the lifecycle controller and attaches the raw
/// `exit_code`, `output` and `duration_ms` to the parsed result.
pub async fn run_suite_command<P>(
    suite: &Record,
    ctx: &SuiteContext,
    image: &str,
    command: String,
    parse: P,
) -> Result<Record>
where
    P: Fn(&str, i64) -> Result<Record>,
{
    let suite_name = suite.get_or("name", "suite");
    let image = ctx.test_image.as_deref().unwrap_or(image);

    let mut spec = ContainerSpec::new(image, &format!("suitey-test-{}", suite_name))
        .with_shell(&command)
        .with_working_dir(CONTAINER_WORKSPACE)
        .with_env(suite.get_array("execution_config_environment"));
    if ctx.test_image.is_none() {
        spec = spec.with_readonly_mount(&ctx.project_root, CONTAINER_WORKSPACE);
    }

    let run = ctx.run(spec).await?;

    let mut result = if run.timed_out {
        Record::new()
            .with("status", "timeout")
            .with("error", "Test suite exceeded its timeout")
    } else if run.interrupted {
        Record::new()
            .with("status", "interrupted")
            .with("error", "Test run was interrupted")
    } else {
        parse(&run.output, run.exit_code)?
    };
    result.set("exit_code", run.exit_code.to_string());
    result.set("duration_ms", run.duration.as_millis().to_string());
    result.set_multiline("output", sanitize_output(&run.output))?;
    Ok(result)
}

/// Output lines equal to the heredoc sentinel would end the block early
pub fn sanitize_output(output: &str) -> String {
    output
        .lines()
        .map(|line| {
            if line == crate::record::HEREDOC_SENTINEL {
                " EOF"
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Shell-quotes a single argument
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:=@".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
