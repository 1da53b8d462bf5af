use crate::cli::CommandLineArgs;
use crate::error::DapError;
use crate::functions::FunctionRegistry;
use crate::handlers::{DatasetStore, HandlerRegistry};

use expanduser::expanduser;
use std::sync::Arc;

/// Shared application state passed to each request handler.
#[derive(Debug)]
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Datasets served, by name.
    pub store: DatasetStore,

    /// Functions available to constraint expressions.
    pub functions: FunctionRegistry,
}

impl AppState {
    /// Create and return an [AppState], serving the datasets found in the data directory.
    pub fn new(args: &CommandLineArgs) -> Result<Self, DapError> {
        let data_dir = expanduser(&args.data_dir)?;
        let store = DatasetStore::scan(&data_dir, &HandlerRegistry::with_builtins())?;
        Ok(Self::with_store(args, store))
    }

    /// Create and return an [AppState] serving the datasets of `store`.
    pub fn with_store(args: &CommandLineArgs, store: DatasetStore) -> Self {
        Self {
            args: args.clone(),
            store,
            functions: FunctionRegistry::with_builtins(),
        }
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
