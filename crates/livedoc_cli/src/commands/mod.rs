//! CLI command implementations.

pub mod models;
pub mod serve;

use livedoc_core::{CoreError, MemoryStore, ModelDefinition, ModelRegistry};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors reading a model file.
#[derive(Debug, Error)]
pub enum ModelFileError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not a JSON array of model definitions.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File path.
        path: String,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A definition was rejected by the registry.
    #[error("invalid model: {0}")]
    Model(#[from] CoreError),
}

/// Reads model definitions from a JSON file.
pub fn load_definitions(path: &Path) -> Result<Vec<ModelDefinition>, ModelFileError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| ModelFileError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ModelFileError::Parse {
        path: display,
        source,
    })
}

/// Registers every definition in a file over an in-memory store.
pub fn load_registry(path: &Path) -> Result<Arc<ModelRegistry>, ModelFileError> {
    let registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
    for definition in load_definitions(path)? {
        registry.register_definition(definition)?;
    }
    Ok(Arc::new(registry))
}
