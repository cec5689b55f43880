use super::{run_blocking, Platform};
use crate::modules::common::missing_binaries;
use crate::modules::{Module, ModuleKind, ModuleRegistry};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs every module's `detect` probe and settles conflicts between modules that claim
/// the same language.
pub struct PlatformDetector {
    registry: Arc<ModuleRegistry>,
    concurrent: bool,
}

#[derive(Debug, Default)]
pub struct PlatformReport {
    pub platforms: Vec<Platform>,
    pub warnings: Vec<String>,
}

impl PlatformDetector {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            registry,
            concurrent: true,
        }
    }

    /// Probes modules one at a time instead of on the blocking pool
    pub fn sequential(mut self) -> Self {
        self.concurrent = false;
        self
    }

    /// Language modules are probed first, then framework and project modules, each group
    /// in registration order.
    fn probe_order(&self) -> Vec<Arc<dyn Module>> {
        ModuleKind::all()
            .into_iter()
            .flat_map(|kind| self.registry.by_kind(kind))
            .collect()
    }

    pub async fn detect(&self, root: &Path) -> PlatformReport {
        let modules = self.probe_order();
        let mut report = PlatformReport::default();

        let probes: Vec<_> = if self.concurrent {
            let items = modules.into_iter().map(|m| (m, ())).collect();
            run_blocking(root, items, |module, root, _| module.detect(root))
                .await
                .into_iter()
                .map(|(module, _, result)| (module, result))
                .collect()
        } else {
            modules
                .into_iter()
                .map(|module| {
                    let result = module.detect(root);
                    (module, result)
                })
                .collect()
        };

        let mut candidates = Vec::new();
        for (module, result) in probes {
            let id = module.metadata().identifier.clone();
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    let message = format!("Module '{}' detection failed: {:#}", id, e);
                    warn!(module = %id, error = %e, "Detection probe failed");
                    report.warnings.push(message);
                    continue;
                }
            };
            if !record.get_bool("detected") {
                debug!(module = %id, "Not detected");
                continue;
            }
            match Platform::from_detection(&id, module.metadata().primary_framework(), &record) {
                Ok(platform) => candidates.push((module, platform)),
                Err(message) => {
                    warn!(module = %id, "{}", message);
                    report.warnings.push(message);
                }
            }
        }

        for (module, mut platform) in self.settle_conflicts(candidates, &mut report.warnings) {
            self.check_environment(root, module.as_ref(), &mut platform);
            report.warnings.extend(platform.warnings.iter().cloned());
            info!(
                module = %platform.module,
                language = %platform.language,
                framework = %platform.framework,
                confidence = %platform.confidence.as_str(),
                "Platform detected"
            );
            report.platforms.push(platform);
        }
        report
    }

    /// Keeps one platform per language, chosen by [`ModuleRegistry::resolve`]. Output
    /// preserves probe order.
    fn settle_conflicts(
        &self,
        candidates: Vec<(Arc<dyn Module>, Platform)>,
        warnings: &mut Vec<String>,
    ) -> Vec<(Arc<dyn Module>, Platform)> {
        let mut by_language: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (_, platform) in &candidates {
            by_language
                .entry(platform.language.to_lowercase())
                .or_default()
                .push(platform.module.clone());
        }

        let mut winners = Vec::new();
        for (language, contenders) in &by_language {
            if contenders.len() == 1 {
                winners.push(contenders[0].clone());
                continue;
            }
            let Some(resolution) = self.registry.resolve(contenders) else {
                continue;
            };
            if !resolution.tied.is_empty() {
                let message = format!(
                    "Modules {} and {} both detected language '{}' with equal precedence; using '{}'",
                    resolution.winner,
                    resolution.tied.join(", "),
                    language,
                    resolution.winner
                );
                warn!(language = %language, winner = %resolution.winner, "Detection tie");
                warnings.push(message);
            }
            debug!(language = %language, winner = %resolution.winner, "Resolved detection conflict");
            winners.push(resolution.winner);
        }

        candidates
            .into_iter()
            .filter(|(_, platform)| winners.contains(&platform.module))
            .collect()
    }

    fn check_environment(&self, root: &Path, module: &dyn Module, platform: &mut Platform) {
        match module.check_container_environment(root, &platform.record) {
            Ok(environment) => {
                platform.apply_environment(&environment);
                if !platform.container_ready {
                    let reason = environment
                        .get("reason")
                        .unwrap_or("module reported the container environment is not ready");
                    platform.warnings.push(format!(
                        "Platform '{}' is not container-ready: {}",
                        platform.framework, reason
                    ));
                }
            }
            Err(e) => {
                platform.container_ready = false;
                platform.record.set("container_ready", "false");
                platform.warnings.push(format!(
                    "Container environment check for '{}' failed: {:#}",
                    platform.framework, e
                ));
            }
        }

        let missing = missing_binaries(&module.metadata().required_binaries);
        if !missing.is_empty() {
            platform.warnings.push(format!(
                "Platform '{}' needs binaries not found on PATH: {}",
                platform.framework,
                missing.join(", ")
            ));
        }
    }
}
