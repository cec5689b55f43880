//! Three-phase detection pipeline: platforms, then test suites, then build requirements.
//!
//! Every phase absorbs per-module failures as warnings; only the caller decides whether
//! an empty result is fatal.

mod build;
mod platform;
mod scanner;
mod suites;
mod types;

pub use build::BuildRequirementResolver;
pub use platform::PlatformDetector;
pub use scanner::ProjectScanner;
pub use suites::TestSuiteDetector;
pub use types::{
    BuildRequirements, Confidence, ExecutionConfig, Platform, PlatformBuild, ScanResult, Suite,
};

use crate::modules::Module;
use crate::record::Record;
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Runs a synchronous module call for each item on the blocking pool and returns the
/// results in input order. A call that panics yields an error for its item, so every
/// phase reports it the same way as a failed call.
pub(crate) async fn run_blocking<T, F>(
    root: &Path,
    items: Vec<(Arc<dyn Module>, T)>,
    call: F,
) -> Vec<(Arc<dyn Module>, T, Result<Record>)>
where
    T: Clone + Send + 'static,
    F: Fn(&dyn Module, &Path, &T) -> Result<Record> + Send + Sync + Copy + 'static,
{
    let mut set = JoinSet::new();
    let mut slots: Vec<Option<(Arc<dyn Module>, T, Result<Record>)>> = Vec::new();
    let mut inputs = Vec::new();
    for (index, (module, item)) in items.into_iter().enumerate() {
        let root: PathBuf = root.to_path_buf();
        inputs.push((Arc::clone(&module), item.clone()));
        slots.push(None);
        set.spawn_blocking(move || {
            let result = call(module.as_ref(), &root, &item);
            (index, module, item, result)
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, module, item, result)) => slots[index] = Some((module, item, result)),
            Err(e) => tracing::warn!(error = %e, "Module call panicked"),
        }
    }

    slots
        .into_iter()
        .zip(inputs)
        .map(|(slot, (module, item))| {
            slot.unwrap_or_else(|| {
                let error = anyhow!(
                    "Module '{}' panicked or was aborted",
                    module.metadata().identifier
                );
                (module, item, Err(error))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{ModuleKind, ModuleMetadata};
    use crate::testing::StubModule;

    #[tokio::test]
    async fn test_panicking_call_becomes_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let items: Vec<(Arc<dyn Module>, usize)> = (0..3)
            .map(|i| {
                let module: Arc<dyn Module> = Arc::new(StubModule::new(ModuleMetadata::new(
                    &format!("stub-{}", i),
                    ModuleKind::Language,
                    "x",
                )));
                (module, i)
            })
            .collect();

        let results = run_blocking(dir.path(), items, |_, _, i: &usize| {
            if *i == 1 {
                panic!("probe exploded");
            }
            Ok(Record::new().with("index", i.to_string()))
        })
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].2.as_ref().unwrap().get("index"), Some("0"));
        let error = results[1].2.as_ref().unwrap_err().to_string();
        assert!(error.contains("stub-1"));
        assert_eq!(results[2].2.as_ref().unwrap().get("index"), Some("2"));
    }
}
