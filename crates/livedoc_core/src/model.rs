//! Models: a named collection with its schema, permissions and notifier.
//!
//! A [`Model`] is the only sanctioned way to mutate documents. Its
//! `save`, `find_by_id_and_update` and `find_by_id_and_remove` paths hold a
//! per-model commit lock across the store call and the change
//! notification, so subscribers observe events in commit order and every
//! successful mutation produces exactly one event.

use crate::document::{Document, DocumentId, Fields, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::notifier::{ChangeEvent, ChangeNotifier};
use crate::permission::{Level, Operation, PermissionLevels, PermissionTable, Posture};
use crate::query::{FindQuery, QueryMode, QueryResult, QueryShape};
use crate::schema::FieldDecl;
use crate::store::{DocumentStore, SaveOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Options chosen when a model is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Strip undeclared fields on create and reject them in queries.
    /// When false the model has open-field semantics.
    pub strict: bool,

    /// Expose only queries; create, update and remove are denied.
    pub read_only: bool,

    /// Model-level levels, checked before per-field levels.
    pub permissions: PermissionLevels,

    /// What undeclared field permissions resolve to.
    pub posture: Posture,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            strict: true,
            read_only: false,
            permissions: PermissionLevels::new(),
            posture: crate::permission::DEFAULT_POSTURE,
        }
    }
}

impl ModelOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets strict field handling.
    #[must_use]
    pub fn strict(mut self, value: bool) -> Self {
        self.strict = value;
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets model-level permission levels.
    #[must_use]
    pub fn permissions(mut self, levels: PermissionLevels) -> Self {
        self.permissions = levels;
        self
    }

    /// Sets the permission posture for undeclared fields.
    #[must_use]
    pub fn posture(mut self, posture: Posture) -> Self {
        self.posture = posture;
        self
    }
}

/// Schema metadata sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model name.
    pub name: String,
    /// Declared fields, owner reference included.
    pub fields: Vec<FieldDecl>,
    /// Options the model was registered with.
    pub options: ModelOptions,
}

/// A registered model.
pub struct Model {
    name: String,
    fields: Vec<FieldDecl>,
    options: ModelOptions,
    permissions: PermissionTable,
    notifier: ChangeNotifier,
    store: Arc<dyn DocumentStore>,
    commit: Mutex<()>,
}

impl Model {
    /// Creates a model over already validated field declarations.
    pub(crate) fn new(
        name: String,
        fields: Vec<FieldDecl>,
        options: ModelOptions,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        let permissions = PermissionTable::from_fields(&fields, options.permissions, options.posture);
        Self {
            name,
            fields,
            options,
            permissions,
            notifier: ChangeNotifier::new(),
            store,
            commit: Mutex::new(()),
        }
    }

    /// Returns the model name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared fields.
    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    /// Returns a field declaration by name.
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true if the field is declared (or is the identity).
    pub fn declares(&self, name: &str) -> bool {
        name == ID_FIELD || self.field(name).is_some()
    }

    /// Returns the registration options.
    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    /// Returns the permission table.
    pub fn permissions(&self) -> &PermissionTable {
        &self.permissions
    }

    /// Returns the change notifier.
    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Returns the metadata sent to clients.
    pub fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            name: self.name.clone(),
            fields: self.fields.clone(),
            options: self.options.clone(),
        }
    }

    /// Saves a document and publishes created or updated.
    pub fn save(&self, doc: Document) -> CoreResult<SaveOutcome> {
        let _commit = self.commit.lock();
        let outcome = self.store.save(&self.name, doc)?;
        let event = match &outcome {
            SaveOutcome::Created(doc) => ChangeEvent::created(doc.clone()),
            SaveOutcome::Updated(doc) => ChangeEvent::updated(doc.clone()),
        };
        let sequence = self.notifier.publish(event);
        debug!(model = %self.name, id = %outcome.document().id, sequence, "document saved");
        Ok(outcome)
    }

    /// Patches a document by id and publishes updated.
    ///
    /// Returns `None`, and publishes nothing, if the document does not exist.
    pub fn find_by_id_and_update(&self, id: DocumentId, patch: Fields) -> CoreResult<Option<Document>> {
        let _commit = self.commit.lock();
        let updated = self.store.find_by_id_and_update(&self.name, id, patch)?;
        if let Some(doc) = &updated {
            let sequence = self.notifier.publish(ChangeEvent::updated(doc.clone()));
            debug!(model = %self.name, %id, sequence, "document updated");
        }
        Ok(updated)
    }

    /// Removes a document by id and publishes removed.
    ///
    /// Returns `None`, and publishes nothing, if the document does not exist.
    pub fn find_by_id_and_remove(&self, id: DocumentId) -> CoreResult<Option<Document>> {
        let _commit = self.commit.lock();
        let removed = self.store.find_by_id_and_remove(&self.name, id)?;
        if removed.is_some() {
            let sequence = self.notifier.publish(ChangeEvent::removed(id));
            debug!(model = %self.name, %id, sequence, "document removed");
        }
        Ok(removed)
    }

    /// Reads one document by id.
    pub fn find_by_id(&self, id: DocumentId) -> CoreResult<Option<Document>> {
        Ok(self.store.find_by_id(&self.name, id)?)
    }

    /// Checks that every declared field in `fields` holds a value of its type.
    pub fn check_types(&self, fields: &Fields) -> CoreResult<()> {
        for (name, value) in fields {
            if let Some(decl) = self.field(name) {
                if !decl.field_type.accepts(value) {
                    return Err(CoreError::validation(format!(
                        "{}.{name} expects {:?}, got {value}",
                        self.name, decl.field_type
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validates a client query shape for a caller and turns it into a store query.
    ///
    /// Every referenced field must exist (unless the model is not strict)
    /// and be readable by the caller. Negative limits and skips are
    /// rejected. `max_limit` caps the number of documents returned.
    pub fn validate_shape(
        &self,
        shape: &QueryShape,
        level: Level,
        max_limit: Option<u64>,
    ) -> CoreResult<FindQuery> {
        if !self.permissions.allows_model(Operation::Read, level) {
            return Err(CoreError::permission_denied(&self.name, "*", Operation::Read));
        }

        for field in shape.referenced_fields() {
            if self.options.strict && !self.declares(field) {
                return Err(CoreError::validation(format!(
                    "unknown field {}.{field}",
                    self.name
                )));
            }
            if !self.permissions.allows(field, Operation::Read, level) {
                return Err(CoreError::permission_denied(&self.name, field, Operation::Read));
            }
        }

        let limit = non_negative("limit", shape.limit)?;
        let skip = non_negative("skip", shape.skip)?.unwrap_or(0);
        let limit = match (limit, max_limit) {
            (Some(limit), Some(max)) => Some(limit.min(max)),
            (limit, max) => limit.or(max),
        };

        Ok(FindQuery {
            filter: shape.filter.clone(),
            sort: shape.sort.clone(),
            skip,
            limit,
            projection: shape.projection.clone(),
        })
    }

    /// Runs a validated query and renders the result for a caller.
    ///
    /// Rendered documents carry `_id`, the projected fields, and nothing
    /// the caller may not read.
    pub fn evaluate(&self, query: &FindQuery, mode: QueryMode, level: Level) -> CoreResult<QueryResult> {
        let result = match mode {
            QueryMode::List => QueryResult::List(
                self.store
                    .find(&self.name, query)?
                    .iter()
                    .map(|doc| self.render(query, doc, level))
                    .collect(),
            ),
            QueryMode::Single => QueryResult::Single(
                self.store
                    .find_one(&self.name, query)?
                    .map(|doc| self.render(query, &doc, level)),
            ),
            QueryMode::Count => QueryResult::Count(self.store.count(&self.name, &query.filter)?),
        };
        Ok(result)
    }

    /// Renders a single document for a caller, without projection.
    pub fn render_document(&self, doc: &Document, level: Level) -> Value {
        self.render(&FindQuery::default(), doc, level)
    }

    fn render(&self, query: &FindQuery, doc: &Document, level: Level) -> Value {
        let mut fields = query.project(doc);
        self.permissions.strip_unreadable(&mut fields, level);
        Value::Object(fields)
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .field("options", &self.options)
            .field("notifier", &self.notifier)
            .finish()
    }
}

fn non_negative(name: &str, value: Option<i64>) -> CoreResult<Option<u64>> {
    match value {
        None => Ok(None),
        Some(v) => u64::try_from(v)
            .map(Some)
            .map_err(|_| CoreError::validation(format!("{name} must not be negative, got {v}"))),
    }
}
