//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while a project is scanned, built and tested
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Run started
    Started { project_root: String },

    /// A pipeline phase started (`platforms`, `suites`, `build-requirements`, `build`, `test`)
    PhaseStarted { phase: String },

    /// A pipeline phase completed
    PhaseComplete { phase: String, duration: Duration },

    /// A module reported a platform
    PlatformDetected {
        module: String,
        language: String,
        framework: String,
        confidence: String,
    },

    /// A build step container is about to launch
    BuildStepStarted { framework: String, tier: usize },

    /// A build step reached a terminal status
    BuildStepFinished {
        framework: String,
        status: String,
        duration: Duration,
    },

    /// A suite container is about to launch
    SuiteStarted { suite: String, framework: String },

    /// A suite finished
    SuiteFinished {
        suite: String,
        status: String,
        duration: Duration,
    },

    /// An interrupt was received; `forced` is set on the second one
    ShutdownRequested { forced: bool },

    /// Run finished
    Completed {
        suites_passed: usize,
        suites_failed: usize,
        total_time: Duration,
    },

    /// Run failed
    Failed { error: String },
}

/// Trait for handling progress events during a run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_handler() {
        let handler = NoOpHandler;
        handler.on_progress(&ProgressEvent::Started {
            project_root: "/test".to_string(),
        });
    }

    #[test]
    fn test_progress_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.on_progress(&ProgressEvent::Started {
            project_root: "/test".to_string(),
        });
        handler.on_progress(&ProgressEvent::PhaseComplete {
            phase: "platforms".to_string(),
            duration: Duration::from_millis(50),
        });
        handler.on_progress(&ProgressEvent::Completed {
            suites_passed: 3,
            suites_failed: 0,
            total_time: Duration::from_secs(5),
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_debug() {
        let event = ProgressEvent::ShutdownRequested { forced: true };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("ShutdownRequested"));
        assert!(debug_str.contains("forced: true"));
    }
}
