//! Dataset handlers and the store of served datasets.
//!
//! A handler produces the full [Dataset] for one source. Handlers for files are created by
//! factories registered per file extension in a [HandlerRegistry]; the registry is built once
//! at startup and used to populate the [DatasetStore].

pub mod dods_file;
pub mod memory;

pub use dods_file::DodsFileHandler;
pub use memory::MemoryHandler;

use crate::error::DapError;
use crate::model::Dataset;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Trait for sources of datasets.
///
/// Each call returns a fresh tree, which the caller may constrain without affecting later calls.
pub trait DatasetHandler: Send + Sync + fmt::Debug {
    /// Build the dataset, with data or proxies attached.
    fn dataset(&self) -> Result<Dataset, DapError>;
}

/// Create a handler for a file.
pub type HandlerFactory = fn(&Path) -> Result<Arc<dyn DatasetHandler>, DapError>;

/// Map from file extension to handler factory.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl HandlerRegistry {
    /// Return a new, empty HandlerRegistry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a registry with the handlers shipped with this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("dods", DodsFileHandler::factory);
        registry
    }

    /// Register a factory for files with `extension`, replacing any previous one.
    pub fn register(&mut self, extension: &str, factory: HandlerFactory) {
        self.factories.insert(extension.to_string(), factory);
    }

    /// Create a handler for `path`, or `None` if its extension has no registered factory.
    pub fn handler_for(&self, path: &Path) -> Option<Result<Arc<dyn DatasetHandler>, DapError>> {
        let extension = path.extension()?.to_str()?;
        self.factories.get(extension).map(|factory| factory(path))
    }
}

/// Datasets served, by name.
#[derive(Clone, Debug, Default)]
pub struct DatasetStore {
    datasets: BTreeMap<String, Arc<dyn DatasetHandler>>,
}

impl DatasetStore {
    /// Return a new, empty DatasetStore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a dataset under `name`, replacing any previous one.
    pub fn insert(&mut self, name: &str, handler: Arc<dyn DatasetHandler>) {
        self.datasets.insert(name.to_string(), handler);
    }

    /// Builder form of [DatasetStore::insert].
    pub fn with(mut self, name: &str, handler: impl DatasetHandler + 'static) -> Self {
        self.insert(name, Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DatasetHandler>> {
        self.datasets.get(name).cloned()
    }

    /// Names of the served datasets, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Build a store from the files under `dir`.
    ///
    /// Each file with a registered extension is served under its path relative to `dir`,
    /// without the extension. Other files, such as attribute sidecars, are skipped.
    ///
    /// # Arguments
    ///
    /// * `dir`: Directory to scan recursively
    /// * `registry`: Handler factories by extension
    #[tracing::instrument(level = "DEBUG", skip(registry))]
    pub fn scan(dir: &Path, registry: &HandlerRegistry) -> Result<Self, DapError> {
        let mut store = Self::new();
        store.scan_dir(dir, dir, registry)?;
        tracing::info!("serving {} datasets from {}", store.len(), dir.display());
        Ok(store)
    }

    fn scan_dir(
        &mut self,
        root: &Path,
        dir: &Path,
        registry: &HandlerRegistry,
    ) -> Result<(), DapError> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.scan_dir(root, &path, registry)?;
                continue;
            }
            let Some(handler) = registry.handler_for(&path) else {
                continue;
            };
            let relative = path.strip_prefix(root).unwrap_or(&path).with_extension("");
            let name = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            tracing::debug!("found dataset {} at {}", name, path.display());
            self.insert(&name, handler?);
        }
        Ok(())
    }
}
