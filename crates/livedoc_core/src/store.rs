//! The document store seam and an in-memory implementation.
//!
//! LiveDoc treats the document store as an external collaborator. Anything
//! implementing [`DocumentStore`] can back a model registry; the store owns
//! all consistency guarantees for concurrent writes.
//!
//! Stores are never called directly by request handling code. Every
//! mutation goes through [`Model`](crate::model::Model), which publishes the
//! matching change event.

use crate::document::{Document, DocumentId, Fields};
use crate::error::StoreResult;
use crate::query::{Filter, FindQuery};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Outcome of a successful save.
///
/// The store decides this with an atomic check-and-insert on the document
/// identity, so two concurrent saves of the same new document cannot both
/// report `Created`.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// First save of this identity.
    Created(Document),
    /// The identity already existed and was overwritten.
    Updated(Document),
}

impl SaveOutcome {
    /// Returns the saved document.
    pub fn document(&self) -> &Document {
        match self {
            SaveOutcome::Created(doc) | SaveOutcome::Updated(doc) => doc,
        }
    }

    /// Returns the saved document, consuming the outcome.
    pub fn into_document(self) -> Document {
        match self {
            SaveOutcome::Created(doc) | SaveOutcome::Updated(doc) => doc,
        }
    }
}

/// Operations a document store must provide, per named collection.
pub trait DocumentStore: Send + Sync {
    /// Inserts or overwrites a document.
    fn save(&self, collection: &str, doc: Document) -> StoreResult<SaveOutcome>;

    /// Merges `patch` into an existing document and returns the result.
    ///
    /// Returns `None` if the document does not exist.
    fn find_by_id_and_update(
        &self,
        collection: &str,
        id: DocumentId,
        patch: Fields,
    ) -> StoreResult<Option<Document>>;

    /// Removes a document and returns it.
    ///
    /// Returns `None` if the document does not exist.
    fn find_by_id_and_remove(&self, collection: &str, id: DocumentId) -> StoreResult<Option<Document>>;

    /// Reads one document by identity.
    fn find_by_id(&self, collection: &str, id: DocumentId) -> StoreResult<Option<Document>>;

    /// Runs a query: filter, sort, skip, limit.
    fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>>;

    /// Returns the first document the query yields.
    fn find_one(&self, collection: &str, query: &FindQuery) -> StoreResult<Option<Document>> {
        let query = FindQuery {
            limit: Some(1),
            ..query.clone()
        };
        Ok(self.find(collection, &query)?.into_iter().next())
    }

    /// Counts documents matching a filter.
    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;
}

/// An in-memory document store.
///
/// Collections keep insertion order, which is the natural order of
/// unsorted queries.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, IndexMap<DocumentId, Document>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, IndexMap::len)
    }

    /// Returns true if a collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl DocumentStore for MemoryStore {
    fn save(&self, collection: &str, doc: Document) -> StoreResult<SaveOutcome> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.insert(doc.id, doc.clone()) {
            None => Ok(SaveOutcome::Created(doc)),
            Some(_) => Ok(SaveOutcome::Updated(doc)),
        }
    }

    fn find_by_id_and_update(
        &self,
        collection: &str,
        id: DocumentId,
        patch: Fields,
    ) -> StoreResult<Option<Document>> {
        let mut collections = self.collections.write();
        let Some(doc) = collections.get_mut(collection).and_then(|docs| docs.get_mut(&id)) else {
            return Ok(None);
        };
        for (field, value) in patch {
            doc.fields.insert(field, value);
        }
        Ok(Some(doc.clone()))
    }

    fn find_by_id_and_remove(&self, collection: &str, id: DocumentId) -> StoreResult<Option<Document>> {
        let mut collections = self.collections.write();
        Ok(collections
            .get_mut(collection)
            .and_then(|docs| docs.shift_remove(&id)))
    }

    fn find_by_id(&self, collection: &str, id: DocumentId) -> StoreResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(&id))
            .cloned())
    }

    fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| query.apply(docs.values()))
            .unwrap_or_default())
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let collections = self.collections.read();
        let count = collections
            .get(collection)
            .map_or(0, |docs| docs.values().filter(|d| filter.matches(d)).count());
        Ok(count as u64)
    }
}
