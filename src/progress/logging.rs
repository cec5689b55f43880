//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { project_root } => {
                info!(project = %project_root, "Starting run");
            }
            ProgressEvent::PhaseStarted { phase } => {
                debug!(phase = %phase, "Starting phase");
            }
            ProgressEvent::PhaseComplete { phase, duration } => {
                info!(
                    phase = %phase,
                    duration_ms = duration.as_millis(),
                    "Phase complete"
                );
            }
            ProgressEvent::PlatformDetected {
                module,
                language,
                framework,
                confidence,
            } => {
                info!(
                    module = %module,
                    language = %language,
                    framework = %framework,
                    confidence = %confidence,
                    "Detected platform"
                );
            }
            ProgressEvent::BuildStepStarted { framework, tier } => {
                info!(framework = %framework, tier, "Building");
            }
            ProgressEvent::BuildStepFinished {
                framework,
                status,
                duration,
            } => {
                if status == "built" {
                    info!(
                        framework = %framework,
                        duration_ms = duration.as_millis(),
                        "Build finished"
                    );
                } else {
                    warn!(
                        framework = %framework,
                        status = %status,
                        duration_ms = duration.as_millis(),
                        "Build did not succeed"
                    );
                }
            }
            ProgressEvent::SuiteStarted { suite, framework } => {
                debug!(suite = %suite, framework = %framework, "Running suite");
            }
            ProgressEvent::SuiteFinished {
                suite,
                status,
                duration,
            } => {
                info!(
                    suite = %suite,
                    status = %status,
                    duration_ms = duration.as_millis(),
                    "Suite finished"
                );
            }
            ProgressEvent::ShutdownRequested { forced } => {
                if *forced {
                    warn!("Forceful termination: killing all containers");
                } else {
                    warn!("Graceful shutdown in progress; interrupt again to force");
                }
            }
            ProgressEvent::Completed {
                suites_passed,
                suites_failed,
                total_time,
            } => {
                info!(
                    passed = suites_passed,
                    failed = suites_failed,
                    total_time_ms = total_time.as_millis(),
                    "Run complete"
                );
            }
            ProgressEvent::Failed { error } => {
                error!(error = %error, "Run failed");
            }
        }
    }
}
