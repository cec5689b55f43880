use super::{BatsModule, ManifestModule, Module, ModuleKind, RustModule};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Module '{0}' is already registered")]
    DuplicateIdentifier(String),

    #[error("Invalid module identifier '{0}': expected lowercase words separated by hyphens")]
    InvalidIdentifier(String),

    #[error("Module '{identifier}' is missing required metadata field '{field}'")]
    MissingMetadata {
        identifier: String,
        field: &'static str,
    },

    #[error("Identifier pattern failed to compile: {0}")]
    Pattern(String),
}

/// Outcome of choosing between modules that detected the same platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub winner: String,
    /// Contenders with the same type and priority as the winner
    pub tied: Vec<String>,
}

fn identifier_pattern() -> Result<&'static Regex, RegistryError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]+)*$"))
        .as_ref()
        .map_err(|e| RegistryError::Pattern(e.to_string()))
}

/// Immutable table of modules, indexed at registration time
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn Module>>,
    by_identifier: HashMap<String, usize>,
    by_kind: HashMap<ModuleKind, Vec<usize>>,
    by_capability: HashMap<String, Vec<usize>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: Vec<Arc<dyn Module>> =
            vec![Arc::new(RustModule::new()), Arc::new(BatsModule::new())];
        for module in builtins {
            if let Err(e) = registry.register(module) {
                warn!(error = %e, "Rejected built-in module");
            }
        }
        registry
    }

    /// Built-ins followed by every declarative module under `.suitey/modules/`.
    /// Returns the warnings produced by files that could not be loaded or registered.
    pub fn with_project_modules(root: &Path) -> (Self, Vec<String>) {
        let mut registry = Self::with_builtins();
        let (modules, mut warnings) = ManifestModule::discover(root);
        for module in modules {
            if let Err(e) = registry.register(Arc::new(module)) {
                warn!(error = %e, "Rejected project module");
                warnings.push(e.to_string());
            }
        }
        (registry, warnings)
    }

    pub fn register(&mut self, module: Arc<dyn Module>) -> Result<(), RegistryError> {
        let meta = module.metadata();
        let identifier = meta.identifier.clone();

        if !identifier_pattern()?.is_match(&identifier) {
            return Err(RegistryError::InvalidIdentifier(identifier));
        }
        if self.by_identifier.contains_key(&identifier) {
            return Err(RegistryError::DuplicateIdentifier(identifier));
        }
        if meta.language.trim().is_empty() {
            return Err(RegistryError::MissingMetadata {
                identifier,
                field: "language",
            });
        }
        if meta.name.trim().is_empty() {
            return Err(RegistryError::MissingMetadata {
                identifier,
                field: "name",
            });
        }

        let position = self.modules.len();
        self.by_kind.entry(meta.kind).or_default().push(position);
        for capability in &meta.capabilities {
            self.by_capability
                .entry(capability.clone())
                .or_default()
                .push(position);
        }
        self.by_identifier.insert(identifier.clone(), position);

        debug!(module = %identifier, kind = %meta.kind, "Registered module");
        self.modules.push(module);
        Ok(())
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn Module>> {
        self.by_identifier
            .get(identifier)
            .map(|&pos| Arc::clone(&self.modules[pos]))
    }

    /// Looks up a module by its `{type}/{identifier}` path
    pub fn get_by_path(&self, path: &str) -> Option<Arc<dyn Module>> {
        let (kind, identifier) = path.split_once('/')?;
        let kind: ModuleKind = kind.parse().ok()?;
        self.get(identifier)
            .filter(|module| module.metadata().kind == kind)
    }

    pub fn by_kind(&self, kind: ModuleKind) -> Vec<Arc<dyn Module>> {
        self.collect(self.by_kind.get(&kind))
    }

    pub fn by_capability(&self, capability: &str) -> Vec<Arc<dyn Module>> {
        self.collect(self.by_capability.get(capability))
    }

    /// All modules in registration order
    pub fn all(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.modules
            .iter()
            .map(|m| m.metadata().identifier.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn registration_order(&self, identifier: &str) -> Option<usize> {
        self.by_identifier.get(identifier).copied()
    }

    /// Picks the module that owns a platform several modules detected.
    ///
    /// Project beats framework beats language, then the higher priority wins. Remaining
    /// ties go to the module registered first and are reported in [`Resolution::tied`].
    pub fn resolve(&self, contenders: &[String]) -> Option<Resolution> {
        let mut ranked: Vec<(usize, ModuleKind, u32, &String)> = contenders
            .iter()
            .filter_map(|id| {
                let pos = self.registration_order(id)?;
                let meta = self.modules[pos].metadata();
                Some((pos, meta.kind, meta.priority, id))
            })
            .collect();

        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)).then(a.0.cmp(&b.0)));

        let (_, kind, priority, winner) = ranked.first().copied()?;
        let tied = ranked
            .iter()
            .skip(1)
            .filter(|(_, k, p, _)| *k == kind && *p == priority)
            .map(|(_, _, _, id)| (*id).clone())
            .collect();

        Some(Resolution {
            winner: winner.clone(),
            tied,
        })
    }

    fn collect(&self, positions: Option<&Vec<usize>>) -> Vec<Arc<dyn Module>> {
        positions
            .map(|ps| ps.iter().map(|&p| Arc::clone(&self.modules[p])).collect())
            .unwrap_or_default()
    }
}
