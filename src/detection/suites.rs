use super::{run_blocking, Platform, Suite};
use crate::grouping::unique_name;
use crate::modules::{Module, ModuleRegistry};
use crate::record::Record;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Asks every detected platform's module for its suites and merges them into one
/// contiguous `suites` array.
pub struct TestSuiteDetector {
    registry: Arc<ModuleRegistry>,
}

#[derive(Debug, Default)]
pub struct SuiteReport {
    pub suites: Vec<Suite>,
    /// Merged `suites_*` array covering every platform
    pub record: Record,
    pub warnings: Vec<String>,
}

impl TestSuiteDetector {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    pub async fn discover(&self, root: &Path, platforms: &[Platform]) -> SuiteReport {
        let mut report = SuiteReport::default();

        let mut items: Vec<(Arc<dyn Module>, Platform)> = Vec::new();
        for platform in platforms {
            match self.registry.get(&platform.module) {
                Some(module) => items.push((module, platform.clone())),
                None => report
                    .warnings
                    .push(format!("Module '{}' is not registered", platform.module)),
            }
        }

        let results = run_blocking(root, items, |module, root, platform: &Platform| {
            module.discover_test_suites(root, &platform.record)
        })
        .await;

        let mut taken = HashSet::new();
        report.record.set("suites_count", "0");
        for (_, platform, result) in results {
            let discovered = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(module = %platform.module, error = %e, "Suite discovery failed");
                    report.warnings.push(format!(
                        "Suite discovery for '{}' failed: {:#}",
                        platform.framework, e
                    ));
                    continue;
                }
            };
            report.warnings.extend(discovered.get_array("warnings"));

            let suites = discovered.scoped_array("suites");
            debug!(module = %platform.module, suites = suites.len(), "Discovered suites");
            for mut suite in suites {
                let name = unique_name(suite.get_or("name", &platform.framework), &mut taken);
                suite
                    .set("name", name)
                    .set("module", &platform.module)
                    .set("platform", &platform.framework);
                if !suite.has("language") {
                    suite.set("language", &platform.language);
                }
                if !suite.has("framework") {
                    suite.set("framework", &platform.framework);
                }
                if !suite.has("metadata_strategy") {
                    if let Some(strategy) = discovered.get("metadata_strategy") {
                        suite.set("metadata_strategy", strategy);
                    }
                }
                report.record.push_scoped("suites", &suite);
                report.suites.push(Suite::from_record(&suite));
            }
        }
        report
    }
}
