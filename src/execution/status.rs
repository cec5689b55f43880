//! Per-suite and per-build-step status buffers polled by the presentation layer

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Pending,
    Building,
    Built,
    BuildFailed,
    Running,
    Passed,
    Failed,
    Timeout,
    Interrupted,
    Error,
    Skipped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Building => "building",
            RunStatus::Built => "built",
            RunStatus::BuildFailed => "build-failed",
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Error => "error",
            RunStatus::Skipped => "skipped",
        }
    }

    /// Parses the `status` field of a suite result record
    pub fn from_result(status: &str) -> Self {
        match status {
            "passed" => RunStatus::Passed,
            "failed" => RunStatus::Failed,
            "timeout" => RunStatus::Timeout,
            "interrupted" => RunStatus::Interrupted,
            "skipped" => RunStatus::Skipped,
            _ => RunStatus::Error,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            RunStatus::Pending | RunStatus::Building | RunStatus::Running
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Build,
    Suite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub name: String,
    pub kind: EntryKind,
    pub status: RunStatus,
    pub duration_ms: Option<u128>,
    pub exit_code: Option<i64>,
    pub output: String,
    pub error: Option<String>,
}

/// Incrementally updated status of one suite or build step
#[derive(Debug)]
pub struct StatusBuffer {
    state: Mutex<StatusSnapshot>,
}

impl StatusBuffer {
    pub fn new(name: &str, kind: EntryKind) -> Self {
        Self {
            state: Mutex::new(StatusSnapshot {
                name: name.to_string(),
                kind,
                status: RunStatus::Pending,
                duration_ms: None,
                exit_code: None,
                output: String::new(),
                error: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_status(&self, status: RunStatus) {
        self.lock().status = status;
    }

    pub fn append_output(&self, output: &str) {
        let mut state = self.lock();
        if !state.output.is_empty() && !output.is_empty() && !state.output.ends_with('\n') {
            state.output.push('\n');
        }
        state.output.push_str(output);
    }

    pub fn set_error(&self, error: impl Into<String>) {
        self.lock().error = Some(error.into());
    }

    pub fn finish(&self, status: RunStatus, duration: Duration, exit_code: Option<i64>) {
        let mut state = self.lock();
        state.status = status;
        state.duration_ms = Some(duration.as_millis());
        state.exit_code = exit_code;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().clone()
    }
}

/// Every status buffer of one run, in registration order
#[derive(Debug, Default)]
pub struct StatusBoard {
    buffers: Mutex<Vec<Arc<StatusBuffer>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, kind: EntryKind) -> Arc<StatusBuffer> {
        let buffer = Arc::new(StatusBuffer::new(name, kind));
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::clone(&buffer));
        buffer
    }

    pub fn snapshot(&self) -> Vec<StatusSnapshot> {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|b| b.snapshot())
            .collect()
    }

    pub fn get(&self, kind: EntryKind, name: &str) -> Option<StatusSnapshot> {
        self.snapshot()
            .into_iter()
            .find(|s| s.kind == kind && s.name == name)
    }
}
