//! Fault injection for the document store seam.
//!
//! [`FlakyStore`] fails on demand; [`GateStore`] holds reads until released.

use livedoc_core::{
    Document, DocumentId, DocumentStore, Fields, Filter, FindQuery, MemoryStore, SaveOutcome, StoreError,
    StoreResult,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A [`MemoryStore`] whose reads and writes can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    failures: AtomicUsize,
}

impl FlakyStore {
    /// Creates a store that does not fail yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every find, find-by-id and count fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every save, update and remove fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of injected failures so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.inner.len(collection)
    }

    /// Returns true if a collection holds no document.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.inner.is_empty(collection)
    }

    fn check(&self, flag: &AtomicBool, what: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable(format!("injected {what} failure")));
        }
        Ok(())
    }
}

impl DocumentStore for FlakyStore {
    fn save(&self, collection: &str, doc: Document) -> StoreResult<SaveOutcome> {
        self.check(&self.fail_writes, "write")?;
        self.inner.save(collection, doc)
    }

    fn find_by_id_and_update(
        &self,
        collection: &str,
        id: DocumentId,
        patch: Fields,
    ) -> StoreResult<Option<Document>> {
        self.check(&self.fail_writes, "write")?;
        self.inner.find_by_id_and_update(collection, id, patch)
    }

    fn find_by_id_and_remove(&self, collection: &str, id: DocumentId) -> StoreResult<Option<Document>> {
        self.check(&self.fail_writes, "write")?;
        self.inner.find_by_id_and_remove(collection, id)
    }

    fn find_by_id(&self, collection: &str, id: DocumentId) -> StoreResult<Option<Document>> {
        self.check(&self.fail_reads, "read")?;
        self.inner.find_by_id(collection, id)
    }

    fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        self.check(&self.fail_reads, "read")?;
        self.inner.find(collection, query)
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.check(&self.fail_reads, "read")?;
        self.inner.count(collection, filter)
    }
}

#[derive(Debug, Default)]
struct Gate {
    closed: bool,
    waiting: usize,
}

/// A [`MemoryStore`] whose reads block while its gate is closed.
#[derive(Debug, Default)]
pub struct GateStore {
    inner: MemoryStore,
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl GateStore {
    /// Creates a store with an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following read wait for [`open`](Self::open).
    pub fn close(&self) {
        self.gate.lock().closed = true;
    }

    /// Releases every waiting read.
    pub fn open(&self) {
        self.gate.lock().closed = false;
        self.changed.notify_all();
    }

    /// Blocks until at least one read waits at the gate.
    pub fn wait_for_reader(&self) {
        let mut gate = self.gate.lock();
        while gate.waiting == 0 {
            self.changed.wait(&mut gate);
        }
    }

    fn pass(&self) {
        let mut gate = self.gate.lock();
        if !gate.closed {
            return;
        }
        gate.waiting += 1;
        self.changed.notify_all();
        while gate.closed {
            self.changed.wait(&mut gate);
        }
        gate.waiting -= 1;
    }
}

impl DocumentStore for GateStore {
    fn save(&self, collection: &str, doc: Document) -> StoreResult<SaveOutcome> {
        self.inner.save(collection, doc)
    }

    fn find_by_id_and_update(
        &self,
        collection: &str,
        id: DocumentId,
        patch: Fields,
    ) -> StoreResult<Option<Document>> {
        self.inner.find_by_id_and_update(collection, id, patch)
    }

    fn find_by_id_and_remove(&self, collection: &str, id: DocumentId) -> StoreResult<Option<Document>> {
        self.inner.find_by_id_and_remove(collection, id)
    }

    fn find_by_id(&self, collection: &str, id: DocumentId) -> StoreResult<Option<Document>> {
        self.pass();
        self.inner.find_by_id(collection, id)
    }

    fn find(&self, collection: &str, query: &FindQuery) -> StoreResult<Vec<Document>> {
        self.pass();
        self.inner.find(collection, query)
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.pass();
        self.inner.count(collection, filter)
    }
}
