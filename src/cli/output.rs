//! Output formatting for detection results, run summaries and module listings
//!
//! Every formatter supports three formats: JSON for tooling, the line-oriented record
//! text used between modules, and human-readable text.
//!
//! # Example
//!
//! ```ignore
//! use suitey::cli::output::{OutputFormat, OutputFormatter};
//!
//! let formatter = OutputFormatter::new(OutputFormat::Json);
//! println!("{}", formatter.format_scan(&scan)?);
//! ```

use anyhow::{Context, Result};
use serde_json::json;

use crate::config::SuiteyConfig;
use crate::detection::ScanResult;
use crate::execution::RunStatus;
use crate::modules::ModuleRegistry;
use crate::orchestrator::RunSummary;
use crate::record::Record;
use crate::scheduler::BuildFailure;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// Human-readable formatted text
    Human,
    /// `key=value` record text
    Record,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the outcome of the detection pipeline
    pub fn format_scan(&self, scan: &ScanResult) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(scan)
                .context("Failed to serialize scan result to JSON"),
            OutputFormat::Record => Ok(scan.to_record().to_string()),
            OutputFormat::Human => Ok(self.format_scan_human(scan)),
        }
    }

    /// Formats the per-suite results of a completed run
    pub fn format_summary(&self, summary: &RunSummary) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let suites: Vec<_> = summary
                    .outcomes
                    .iter()
                    .map(|o| {
                        json!({
                            "suite": o.suite,
                            "framework": o.framework,
                            "status": o.status,
                            "total_tests": o.result.get_parsed::<u64>("total_tests"),
                            "passed_tests": o.result.get_parsed::<u64>("passed_tests"),
                            "failed_tests": o.result.get_parsed::<u64>("failed_tests"),
                            "exit_code": o.result.get_parsed::<i64>("exit_code"),
                            "error": o.result.get("error"),
                        })
                    })
                    .collect();
                let output = json!({
                    "passed": summary.passed(),
                    "failed": summary.failed(),
                    "duration_ms": summary.duration.as_millis() as u64,
                    "suites": suites,
                    "warnings": summary.warnings,
                });
                serde_json::to_string_pretty(&output)
                    .context("Failed to serialize run summary to JSON")
            }
            OutputFormat::Record => {
                let mut record = Record::new()
                    .with("suites_passed", summary.passed().to_string())
                    .with("suites_failed", summary.failed().to_string());
                for outcome in &summary.outcomes {
                    let mut item = outcome.result.clone();
                    item.set("name", &outcome.suite);
                    item.set("framework", &outcome.framework);
                    item.set("status", outcome.status.as_str());
                    record.push_scoped("results", &item);
                }
                Ok(record.to_string())
            }
            OutputFormat::Human => Ok(self.format_summary_human(summary)),
        }
    }

    /// Lists registered modules in registration order
    pub fn format_modules(&self, registry: &ModuleRegistry) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                let modules: Vec<_> = registry.all().iter().map(|m| m.metadata()).collect();
                serde_json::to_string_pretty(&modules)
                    .context("Failed to serialize modules to JSON")
            }
            OutputFormat::Record => {
                let mut record = Record::new();
                for module in registry.all() {
                    record.push_scoped("modules", &module.get_metadata());
                }
                if !record.has("modules_count") {
                    record.set("modules_count", "0");
                }
                Ok(record.to_string())
            }
            OutputFormat::Human => {
                let mut output = String::new();
                output.push_str("Registered Modules\n");
                output.push_str(RULE);
                output.push_str("\n\n");
                for module in registry.all() {
                    let meta = module.metadata();
                    output.push_str(&format!("{}  ({})\n", meta.path(), meta.name));
                    output.push_str(&format!(
                        "\u{251C}\u{2500} Language:     {}\n",
                        meta.language
                    ));
                    output.push_str(&format!(
                        "\u{251C}\u{2500} Frameworks:   {}\n",
                        meta.frameworks.join(", ")
                    ));
                    output.push_str(&format!(
                        "\u{251C}\u{2500} Priority:     {}\n",
                        meta.priority
                    ));
                    output.push_str(&format!(
                        "\u{2514}\u{2500} Capabilities: {}\n\n",
                        if meta.capabilities.is_empty() {
                            "(none)".to_string()
                        } else {
                            meta.capabilities.join(", ")
                        }
                    ));
                }
                Ok(output)
            }
        }
    }

    pub fn format_config(&self, config: &SuiteyConfig) -> Result<String> {
        let map = config.to_display_map();
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&map).context("Failed to serialize config to JSON")
            }
            OutputFormat::Record => {
                let mut record = Record::new();
                for (key, value) in map {
                    record.set(key, value);
                }
                Ok(record.to_string())
            }
            OutputFormat::Human => Ok(config.to_string()),
        }
    }

    fn format_scan_human(&self, scan: &ScanResult) -> String {
        let mut output = String::new();
        output.push_str("Project Detection Result\n");
        output.push_str(RULE);
        output.push_str("\n\n");

        if scan.platforms.is_empty() {
            output.push_str("No platforms detected\n");
        } else {
            output.push_str("Platforms:\n");
            for platform in &scan.platforms {
                let marker = if platform.container_ready {
                    "\u{2713}"
                } else {
                    "\u{26A0}"
                };
                output.push_str(&format!(
                    "{} {} / {}  [{}, confidence {}]\n",
                    marker,
                    platform.language,
                    platform.framework,
                    platform.module,
                    platform.confidence.as_str()
                ));
                if let Some(image) = &platform.image {
                    output.push_str(&format!("  Image: {}\n", image));
                }
                if !platform.indicators.is_empty() {
                    output.push_str(&format!(
                        "  Indicators: {}\n",
                        platform.indicators.join(", ")
                    ));
                }
            }
        }

        output.push('\n');
        if scan.suites.is_empty() {
            output.push_str("No test suites found\n");
        } else {
            output.push_str(&format!("Test Suites ({}):\n", scan.suites.len()));
            for (i, suite) in scan.suites.iter().enumerate() {
                let connector = if i == scan.suites.len() - 1 {
                    "\u{2514}"
                } else {
                    "\u{251C}"
                };
                output.push_str(&format!(
                    "{}\u{2500} {}  [{}] {} file(s), {} test(s), {}\n",
                    connector,
                    suite.name,
                    suite.framework,
                    suite.files.len(),
                    suite.test_count,
                    suite.strategy
                ));
            }
        }

        output.push('\n');
        output.push_str("Build Requirements:\n");
        let required: Vec<_> = scan.build.required().collect();
        if required.is_empty() {
            output.push_str("\u{2514}\u{2500} (no build needed)\n");
        }
        for (i, platform) in required.iter().enumerate() {
            let connector = if i == required.len() - 1 {
                "\u{2514}"
            } else {
                "\u{251C}"
            };
            output.push_str(&format!(
                "{}\u{2500} {}: {}\n",
                connector,
                platform.framework,
                platform.build_commands.join(" && ")
            ));
            if !platform.depends_on.is_empty() {
                output.push_str(&format!(
                    "   after: {}\n",
                    platform.depends_on.join(", ")
                ));
            }
        }

        push_warnings(&mut output, &scan.warnings);
        output
    }

    fn format_summary_human(&self, summary: &RunSummary) -> String {
        let mut output = String::new();
        output.push_str("Test Results\n");
        output.push_str(RULE);
        output.push_str("\n\n");

        for outcome in &summary.outcomes {
            let symbol = match outcome.status {
                RunStatus::Passed => "\u{2713}",
                RunStatus::Skipped => "-",
                _ => "\u{2717}",
            };
            let counts = match (
                outcome.result.get_parsed::<u64>("passed_tests"),
                outcome.result.get_parsed::<u64>("total_tests"),
            ) {
                (Some(passed), Some(total)) => format!("{}/{} passed", passed, total),
                _ => String::new(),
            };
            output.push_str(&format!(
                "{} {:<28} {:<12} {}\n",
                symbol, outcome.suite, outcome.status, counts
            ));
            if let Some(error) = outcome.result.get("error") {
                output.push_str(&format!("  Error: {}\n", error));
            }
            if !outcome.passed() {
                if let Some(out) = outcome.result.get("output").filter(|o| !o.is_empty()) {
                    output.push_str(&indent(tail(out, 40)));
                }
            }
        }

        output.push_str(&format!(
            "\n{} passed, {} failed in {:.1}s\n",
            summary.passed(),
            summary.failed(),
            summary.duration.as_secs_f64()
        ));
        push_warnings(&mut output, &summary.warnings);
        output
    }
}

/// Renders failed builds with their raw container output
pub fn format_build_failures(failures: &[BuildFailure]) -> String {
    let mut output = String::new();
    output.push_str("Build Failed\n");
    output.push_str(RULE);
    output.push_str("\n\n");
    for failure in failures {
        output.push_str(&format!("\u{2717} {}\n", failure.framework));
        output.push_str(&format!("  Command:   {}\n", failure.command));
        match failure.exit_code {
            Some(code) => output.push_str(&format!("  Exit code: {}\n", code)),
            None => output.push_str("  Exit code: (none)\n"),
        }
        if let Some(error) = &failure.error {
            output.push_str(&format!("  Error:     {}\n", error));
        }
        if !failure.output.is_empty() {
            output.push_str("  Output:\n");
            output.push_str(&indent(&failure.output));
        }
        output.push('\n');
    }
    output.push_str("Tests were not run.\n");
    output
}

fn push_warnings(output: &mut String, warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    output.push_str("\n\u{26A0} Warnings:\n");
    for warning in warnings {
        output.push_str(&format!("  - {}\n", warning));
    }
}

fn indent(text: &str) -> String {
    text.lines().map(|line| format!("    {}\n", line)).collect()
}

/// Last `lines` lines of `text`
fn tail(text: &str, lines: usize) -> &str {
    let mut seen = 0;
    for (pos, ch) in text.char_indices().rev() {
        if ch == '\n' && pos + 1 < text.len() {
            seen += 1;
            if seen == lines {
                return &text[pos + 1..];
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Platform, Suite};
    use crate::execution::SuiteOutcome;
    use crate::modules::{BatsModule, RustModule};
    use std::sync::Arc;

    fn scan() -> ScanResult {
        let mut detection = Record::new()
            .with("language", "rust")
            .with("framework", "cargo")
            .with("confidence", "high");
        detection.replace_array("indicators", ["Cargo.toml"]);
        let platform = Platform::from_detection("rust", "cargo", &detection).unwrap();

        let mut suite = Record::new()
            .with("name", "integration")
            .with("module", "rust")
            .with("framework", "cargo")
            .with("test_count", "2");
        suite.replace_array("files", ["tests/integration_test.rs"]);

        ScanResult {
            platforms: vec![platform],
            suites: vec![Suite::from_record(&suite)],
            warnings: vec!["bats: probe failed".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_human_scan_lists_everything() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_scan(&scan())
            .unwrap();
        assert!(output.contains("rust / cargo"));
        assert!(output.contains("integration"));
        assert!(output.contains("(no build needed)"));
        assert!(output.contains("bats: probe failed"));
    }

    #[test]
    fn test_json_scan() {
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_scan(&scan())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["platforms"][0]["framework"], "cargo");
        assert_eq!(value["suites"][0]["name"], "integration");
    }

    #[test]
    fn test_record_scan_parses_back() {
        let output = OutputFormatter::new(OutputFormat::Record)
            .format_scan(&scan())
            .unwrap();
        let record = Record::parse(&output).unwrap();
        assert_eq!(record.get("platforms_count"), Some("1"));
        assert_eq!(record.get("suites_0_name"), Some("integration"));
    }

    #[test]
    fn test_summary_shows_failure_output() {
        let summary = RunSummary {
            outcomes: vec![
                SuiteOutcome {
                    suite: "unit".to_string(),
                    framework: "cargo".to_string(),
                    status: RunStatus::Passed,
                    result: Record::new()
                        .with("total_tests", "3")
                        .with("passed_tests", "3"),
                },
                SuiteOutcome {
                    suite: "cli".to_string(),
                    framework: "bats".to_string(),
                    status: RunStatus::Failed,
                    result: Record::new().with("output", "not ok 1 prints help"),
                },
            ],
            ..Default::default()
        };

        let output = OutputFormatter::new(OutputFormat::Human)
            .format_summary(&summary)
            .unwrap();
        assert!(output.contains("3/3 passed"));
        assert!(output.contains("not ok 1 prints help"));
        assert!(output.contains("1 passed, 1 failed"));
    }

    #[test]
    fn test_modules_listing() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(RustModule::new())).unwrap();
        registry.register(Arc::new(BatsModule::new())).unwrap();

        let output = OutputFormatter::new(OutputFormat::Human)
            .format_modules(&registry)
            .unwrap();
        assert!(output.contains("language/rust"));
        assert!(output.contains("framework/bats"));

        let record = OutputFormatter::new(OutputFormat::Record)
            .format_modules(&registry)
            .unwrap();
        assert!(record.contains("modules_count=2"));
    }

    #[test]
    fn test_build_failures_include_output() {
        let output = format_build_failures(&[BuildFailure {
            framework: "cargo".to_string(),
            command: "cargo build".to_string(),
            exit_code: Some(101),
            output: "error[E0308]: mismatched types".to_string(),
            error: None,
        }]);
        assert!(output.contains("Exit code: 101"));
        assert!(output.contains("    error[E0308]: mismatched types"));
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }
}
