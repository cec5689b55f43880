use super::{BuildRequirementResolver, PlatformDetector, ScanResult, TestSuiteDetector};
use crate::modules::ModuleRegistry;
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const PLATFORM_PHASE: &str = "platforms";
const SUITE_PHASE: &str = "suites";
const BUILD_PHASE: &str = "build-requirements";

/// Sequences platform detection, suite discovery and build requirement resolution.
///
/// Phases run once each, in order. Zero detected platforms ends the scan early with an
/// empty result; that is not an error.
pub struct ProjectScanner {
    registry: Arc<ModuleRegistry>,
    progress: Arc<dyn ProgressHandler>,
    concurrent: bool,
}

impl ProjectScanner {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            registry,
            progress: Arc::new(NoOpHandler),
            concurrent: true,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_concurrency(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub async fn scan(&self, root: &Path) -> ScanResult {
        let mut result = ScanResult::default();
        info!("Scanning project: {}", root.display());

        let started = self.begin(PLATFORM_PHASE);
        let mut detector = PlatformDetector::new(Arc::clone(&self.registry));
        if !self.concurrent {
            detector = detector.sequential();
        }
        let platforms = detector.detect(root).await;
        for platform in &platforms.platforms {
            self.progress.on_progress(&ProgressEvent::PlatformDetected {
                module: platform.module.clone(),
                language: platform.language.clone(),
                framework: platform.framework.clone(),
                confidence: platform.confidence.as_str().to_string(),
            });
        }
        result.platforms = platforms.platforms;
        result.warnings.extend(platforms.warnings);
        self.end(PLATFORM_PHASE, started);

        if result.platforms.is_empty() {
            info!("No platforms detected");
            return result;
        }

        let started = self.begin(SUITE_PHASE);
        let suites = TestSuiteDetector::new(Arc::clone(&self.registry))
            .discover(root, &result.platforms)
            .await;
        result.suites = suites.suites;
        result.warnings.extend(suites.warnings);
        self.end(SUITE_PHASE, started);

        let started = self.begin(BUILD_PHASE);
        let (build, warnings) = BuildRequirementResolver::new(Arc::clone(&self.registry))
            .resolve(root, &result.platforms)
            .await;
        result.build = build;
        result.warnings.extend(warnings);
        self.end(BUILD_PHASE, started);

        info!(
            platforms = result.platforms.len(),
            suites = result.suites.len(),
            requires_build = result.build.requires_build,
            warnings = result.warnings.len(),
            "Scan complete"
        );
        result
    }

    fn begin(&self, phase: &str) -> Instant {
        info!("Phase: {}", phase);
        self.progress.on_progress(&ProgressEvent::PhaseStarted {
            phase: phase.to_string(),
        });
        Instant::now()
    }

    fn end(&self, phase: &str, started: Instant) {
        self.progress.on_progress(&ProgressEvent::PhaseComplete {
            phase: phase.to_string(),
            duration: started.elapsed(),
        });
        debug!("Phase {} complete", phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{ModuleKind, ModuleMetadata};
    use crate::testing::StubModule;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ProgressHandler for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            if let ProgressEvent::PhaseStarted { phase } = event {
                self.0.lock().unwrap().push(phase.clone());
            }
        }
    }

    #[tokio::test]
    async fn test_empty_project_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let result = ProjectScanner::new(Arc::new(ModuleRegistry::with_builtins()))
            .with_progress(recorder.clone())
            .scan(dir.path())
            .await;

        assert!(result.is_empty());
        assert!(result.suites.is_empty());
        assert!(!result.build.requires_build);
        assert_eq!(*recorder.0.lock().unwrap(), vec![PLATFORM_PHASE]);
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let dir = TempDir::new().unwrap();
        let mut registry = ModuleRegistry::new();
        registry
            .register(Arc::new(
                StubModule::new(
                    ModuleMetadata::new("alpha", ModuleKind::Language, "a").with_frameworks(&["alpha"]),
                )
                .detecting()
                .with_suites(&[("unit", &["t.a"])])
                .with_build("make", &["out"], &[]),
            ))
            .unwrap();

        let recorder = Arc::new(Recorder::default());
        let result = ProjectScanner::new(Arc::new(registry))
            .with_progress(recorder.clone())
            .with_concurrency(false)
            .scan(dir.path())
            .await;

        assert_eq!(result.platforms.len(), 1);
        assert_eq!(result.suites.len(), 1);
        assert!(result.build.requires_build);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![PLATFORM_PHASE, SUITE_PHASE, BUILD_PHASE]
        );
    }
}
