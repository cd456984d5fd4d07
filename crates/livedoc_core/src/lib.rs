//! # LiveDoc Core
//!
//! Core building blocks for LiveDoc live queries.
//!
//! This crate provides:
//! - Models with field declarations and per-field permission tables
//! - A change notifier per model, fed by every sanctioned mutation path
//! - Query shapes (filter, sort, projection, skip, limit) and their evaluation
//! - The document store seam plus an in-memory store
//! - The process-wide model registry
//!
//! # Example
//!
//! ```rust
//! use livedoc_core::{FieldDecl, FieldType, MemoryStore, ModelOptions, ModelRegistry};
//! use std::sync::Arc;
//!
//! let registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
//! let fighter = registry
//!     .register(
//!         "fighter",
//!         vec![
//!             FieldDecl::new("name", FieldType::String),
//!             FieldDecl::new("health", FieldType::Number),
//!         ],
//!         ModelOptions::default(),
//!     )
//!     .unwrap();
//! assert_eq!(fighter.notifier().subscriber_count(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod model;
mod notifier;
mod permission;
mod query;
mod registry;
mod schema;
mod store;

pub use document::{Document, DocumentId, Fields, ID_FIELD, OWNER_FIELD};
pub use error::{CoreError, CoreResult, StoreError, StoreResult};
pub use model::{Model, ModelMetadata, ModelOptions};
pub use notifier::{
    ChangeEvent, ChangeHandler, ChangeKind, ChangeNotifier, HandlerError, SubscriptionId,
};
pub use permission::{Level, Operation, PermissionLevels, PermissionTable, Posture, DEFAULT_POSTURE};
pub use query::{
    compare_documents, sort_order, CompareOp, Condition, Filter, FindQuery, QueryMode, QueryResult,
    QueryShape, SortDirection, SortKey,
};
pub use registry::{ModelRegistry, ModelsSnapshot, Timestamp};
pub use schema::{FieldDecl, FieldType, ModelDefinition, RESERVED_FIELDS};
pub use store::{DocumentStore, MemoryStore, SaveOutcome};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
