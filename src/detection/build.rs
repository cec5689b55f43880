use super::{run_blocking, BuildRequirements, Platform, PlatformBuild};
use crate::modules::{Module, ModuleRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Collects `detect_build_requirements` from every platform into one additive
/// [`BuildRequirements`]
pub struct BuildRequirementResolver {
    registry: Arc<ModuleRegistry>,
}

impl BuildRequirementResolver {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    pub async fn resolve(
        &self,
        root: &Path,
        platforms: &[Platform],
    ) -> (BuildRequirements, Vec<String>) {
        let mut requirements = BuildRequirements::default();
        let mut warnings = Vec::new();

        let items: Vec<(Arc<dyn Module>, Platform)> = platforms
            .iter()
            .filter_map(|p| self.registry.get(&p.module).map(|m| (m, p.clone())))
            .collect();

        let results = run_blocking(root, items, |module, root, platform: &Platform| {
            module.detect_build_requirements(root, &platform.record)
        })
        .await;

        for (_, platform, result) in results {
            match result {
                Ok(record) => {
                    let build = PlatformBuild::from_record(&platform.module, &platform.framework, &record);
                    debug!(
                        framework = %build.framework,
                        requires_build = build.requires_build,
                        depends_on = ?build.depends_on,
                        "Build requirements"
                    );
                    requirements.add(build);
                }
                Err(e) => {
                    warn!(module = %platform.module, error = %e, "Build requirement probe failed");
                    warnings.push(format!(
                        "Build requirement detection for '{}' failed: {:#}",
                        platform.framework, e
                    ));
                }
            }
        }
        (requirements, warnings)
    }
}
