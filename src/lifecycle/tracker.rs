use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Pending,
    Running,
    Exited,
    Killed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub start_time: DateTime<Utc>,
}

impl ContainerHandle {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: ContainerStatus::Pending,
            start_time: Utc::now(),
        }
    }
}

/// Process-wide table of live containers, shared by build, test and shutdown paths
#[derive(Debug, Default)]
pub struct ContainerTracker {
    handles: Mutex<HashMap<String, ContainerHandle>>,
}

impl ContainerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ContainerHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn track(&self, handle: ContainerHandle) {
        self.lock().insert(handle.id.clone(), handle);
    }

    pub fn set_status(&self, id: &str, status: ContainerStatus) {
        if let Some(handle) = self.lock().get_mut(id) {
            handle.status = status;
        }
    }

    /// Only called once the container has been removed from the runtime
    pub fn untrack(&self, id: &str) -> Option<ContainerHandle> {
        self.lock().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<ContainerHandle> {
        self.lock().get(id).cloned()
    }

    /// Handles ordered by start time
    pub fn snapshot(&self) -> Vec<ContainerHandle> {
        let mut handles: Vec<ContainerHandle> = self.lock().values().cloned().collect();
        handles.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.name.cmp(&b.name)));
        handles
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
