//! Process-wide model registry.
//!
//! The registry is created once at startup and handed to whatever serves
//! model metadata. It records the time of the last structural change
//! (model registration) so reconnecting clients can skip re-fetching
//! metadata they already hold.

use crate::error::{CoreError, CoreResult};
use crate::model::{Model, ModelMetadata, ModelOptions};
use crate::schema::{prepare_fields, FieldDecl, ModelDefinition};
use crate::store::DocumentStore;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

/// Answer to a metadata request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ModelsSnapshot {
    /// Nothing changed after the client's cached timestamp.
    Unchanged,
    /// Full metadata, with the timestamp the client should cache.
    Changed {
        /// Last structural change.
        last_change: Timestamp,
        /// Every registered model, in registration order.
        models: Vec<ModelMetadata>,
    },
}

/// Maps model names to models.
pub struct ModelRegistry {
    store: Arc<dyn DocumentStore>,
    models: RwLock<IndexMap<String, Arc<Model>>>,
    last_change: RwLock<Timestamp>,
}

impl ModelRegistry {
    /// Creates an empty registry over a store.
    ///
    /// The creation time counts as a structural change, so a client
    /// holding metadata from an earlier process always refetches.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            models: RwLock::new(IndexMap::new()),
            last_change: RwLock::new(Timestamp::now()),
        }
    }

    /// Registers a model.
    ///
    /// Registering the same name twice is a usage error.
    pub fn register(
        &self,
        name: &str,
        fields: Vec<FieldDecl>,
        options: ModelOptions,
    ) -> CoreResult<Arc<Model>> {
        let fields = prepare_fields(name, fields)?;

        let mut models = self.models.write();
        if models.contains_key(name) {
            return Err(CoreError::DuplicateModel {
                name: name.to_string(),
            });
        }

        let model = Arc::new(Model::new(
            name.to_string(),
            fields,
            options,
            Arc::clone(&self.store),
        ));
        models.insert(name.to_string(), Arc::clone(&model));

        // Strictly increasing, even for registrations within one millisecond.
        let mut last_change = self.last_change.write();
        *last_change = Timestamp(Timestamp::now().0.max(last_change.0 + 1));
        debug!(model = name, last_change = last_change.0, "model registered");

        Ok(model)
    }

    /// Registers a model from a definition.
    pub fn register_definition(&self, definition: ModelDefinition) -> CoreResult<Arc<Model>> {
        self.register(&definition.name, definition.fields, definition.options)
    }

    /// Looks up a model by name.
    pub fn get(&self, name: &str) -> CoreResult<Arc<Model>> {
        self.models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownModel {
                name: name.to_string(),
            })
    }

    /// Returns the registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }

    /// Returns the number of registered models.
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Returns true if no model is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the time of the last structural change.
    pub fn last_change(&self) -> Timestamp {
        *self.last_change.read()
    }

    /// Returns metadata if anything changed after `cached`.
    pub fn get_models(&self, cached: Timestamp) -> ModelsSnapshot {
        // Hold the model map while reading the timestamp so the pair is consistent.
        let models = self.models.read();
        let last_change = *self.last_change.read();
        if last_change > cached {
            ModelsSnapshot::Changed {
                last_change,
                models: models.values().map(|m| m.metadata()).collect(),
            }
        } else {
            ModelsSnapshot::Unchanged
        }
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.names())
            .field("last_change", &self.last_change())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use crate::store::MemoryStore;

    fn registry() -> ModelRegistry {
        ModelRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn register_and_lookup() {
        let registry = registry();
        let model = registry
            .register("fighter", vec![FieldDecl::new("name", FieldType::String)], ModelOptions::default())
            .unwrap();
        assert_eq!(model.name(), "fighter");
        assert!(model.declares("owner"));
        assert_eq!(registry.get("fighter").unwrap().name(), "fighter");
        assert!(matches!(registry.get("castle"), Err(CoreError::UnknownModel { .. })));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let registry = registry();
        registry.register("fighter", vec![], ModelOptions::default()).unwrap();
        let err = registry.register("fighter", vec![], ModelOptions::default()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateModel { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registration_bumps_last_change() {
        let registry = registry();
        let before = registry.last_change();
        registry.register("a", vec![], ModelOptions::default()).unwrap();
        let after_a = registry.last_change();
        registry.register("b", vec![], ModelOptions::default()).unwrap();
        assert!(after_a > before);
        assert!(registry.last_change() > after_a);
    }

    #[test]
    fn get_models_honours_cached_timestamp() {
        let registry = registry();
        registry.register("fighter", vec![], ModelOptions::default()).unwrap();
        let last = registry.last_change();

        assert_eq!(registry.get_models(last), ModelsSnapshot::Unchanged);
        assert_eq!(registry.get_models(Timestamp(last.0 + 1000)), ModelsSnapshot::Unchanged);

        match registry.get_models(Timestamp(last.0 - 1)) {
            ModelsSnapshot::Changed { last_change, models } => {
                assert_eq!(last_change, last);
                assert_eq!(models.len(), 1);
                assert_eq!(models[0].name, "fighter");
            }
            ModelsSnapshot::Unchanged => panic!("expected metadata"),
        }

        registry.register("castle", vec![], ModelOptions::default()).unwrap();
        assert!(matches!(registry.get_models(last), ModelsSnapshot::Changed { .. }));
    }

    #[test]
    fn failed_registration_does_not_bump() {
        let registry = registry();
        let before = registry.last_change();
        assert!(registry
            .register("bad", vec![FieldDecl::new("_id", FieldType::String)], ModelOptions::default())
            .is_err());
        assert_eq!(registry.last_change(), before);
    }
}
