//! Connections and their live query registries.

use crate::error::{ServerError, ServerResult};
use crate::live::{LiveQuery, PushSender};
use crate::messages::QueryHandle;
use livedoc_core::Level;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Server-assigned connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Identity attached to a connection by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Authenticated user, used as the owner of created documents.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Permission level.
    #[serde(default)]
    pub level: Level,
}

impl Identity {
    /// Creates an identity for a user.
    pub fn new(user_id: impl Into<String>, level: Level) -> Self {
        Self {
            user_id: Some(user_id.into()),
            level,
        }
    }

    /// Creates an anonymous identity at `level`.
    pub fn anonymous(level: Level) -> Self {
        Self { user_id: None, level }
    }
}

#[derive(Default)]
struct RegistryInner {
    closed: bool,
    next_handle: u64,
    queries: HashMap<QueryHandle, Arc<LiveQuery>>,
}

/// The open live queries of one connection.
///
/// Once torn down the registry refuses new queries. Opening holds the
/// registry lock, so a query opened concurrently with disconnect cannot
/// outlive its connection.
#[derive(Default)]
pub struct LiveQueryRegistry {
    inner: Mutex<RegistryInner>,
}

impl LiveQueryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a query under a fresh handle and registers it.
    ///
    /// The registry stays locked while `open` runs, so a concurrent
    /// teardown waits for it and then closes the new query along with the
    /// rest. Fails if the registry was torn down or already holds `max`
    /// queries; on failure no handle is consumed.
    pub fn open_with<F>(&self, max: usize, open: F) -> ServerResult<Arc<LiveQuery>>
    where
        F: FnOnce(QueryHandle) -> ServerResult<Arc<LiveQuery>>,
    {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(ServerError::ConnectionClosed);
        }
        if inner.queries.len() >= max {
            return Err(ServerError::LimitExceeded(format!(
                "at most {max} live queries per connection"
            )));
        }
        let handle = QueryHandle(inner.next_handle + 1);
        let query = open(handle)?;
        inner.next_handle = handle.0;
        inner.queries.insert(handle, Arc::clone(&query));
        Ok(query)
    }

    /// Looks up a query.
    pub fn get(&self, handle: QueryHandle) -> Option<Arc<LiveQuery>> {
        self.inner.lock().queries.get(&handle).cloned()
    }

    /// Removes a query.
    pub fn remove(&self, handle: QueryHandle) -> Option<Arc<LiveQuery>> {
        self.inner.lock().queries.remove(&handle)
    }

    /// Returns the number of open queries.
    pub fn len(&self) -> usize {
        self.inner.lock().queries.len()
    }

    /// Returns true if no query is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once torn down.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Marks the registry closed and returns every query it held.
    pub fn teardown(&self) -> Vec<Arc<LiveQuery>> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.queries.drain().map(|(_, q)| q).collect()
    }
}

/// A client connection.
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    pushes: PushSender,
    queries: LiveQueryRegistry,
}

impl Connection {
    /// Creates a connection.
    pub fn new(id: ConnectionId, identity: Identity, pushes: PushSender) -> Self {
        Self {
            id,
            identity,
            pushes,
            queries: LiveQueryRegistry::new(),
        }
    }

    /// Returns the connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the attached identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Returns the push channel.
    pub fn pushes(&self) -> &PushSender {
        &self.pushes
    }

    /// Returns the live query registry.
    pub fn queries(&self) -> &LiveQueryRegistry {
        &self.queries
    }

    /// Returns true once closed.
    pub fn is_closed(&self) -> bool {
        self.queries.is_closed()
    }

    /// Closes every live query and refuses new ones.
    ///
    /// Returns the number of queries closed.
    pub fn close(&self) -> usize {
        let queries = self.queries.teardown();
        for query in &queries {
            query.close();
        }
        debug!(connection = %self.id, closed = queries.len(), "connection closed");
        queries.len()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("queries", &self.queries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedoc_core::{MemoryStore, Model, ModelOptions, ModelRegistry, QueryMode, QueryShape};
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn identity_from_hello() {
        let identity: Identity = serde_json::from_str(r#"{"user_id": "u1", "level": 5}"#).unwrap();
        assert_eq!(identity, Identity::new("u1", 5));
        let identity: Identity = serde_json::from_str("{}").unwrap();
        assert_eq!(identity, Identity::anonymous(0));
    }

    fn open_count(model: &Arc<Model>, tx: &PushSender) -> impl FnOnce(QueryHandle) -> ServerResult<Arc<LiveQuery>> {
        let model = Arc::clone(model);
        let tx = tx.clone();
        move |handle| LiveQuery::open(handle, model, QueryShape::new(), QueryMode::Count, 0, None, tx)
    }

    #[test]
    fn open_with_respects_limit_and_close() {
        let registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
        let model = registry.register("fighter", vec![], ModelOptions::default()).unwrap();
        let (tx, _rx) = unbounded_channel();
        let queries = LiveQueryRegistry::new();

        let first = queries.open_with(1, open_count(&model, &tx)).unwrap();
        assert_eq!(first.handle(), QueryHandle(1));
        let err = queries.open_with(1, open_count(&model, &tx)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::LimitExceeded);
        assert_eq!(model.notifier().subscriber_count(), 1);

        assert_eq!(queries.teardown().len(), 1);
        let err = queries.open_with(1, open_count(&model, &tx)).unwrap_err();
        assert!(matches!(err, ServerError::ConnectionClosed));
    }

    #[test]
    fn failed_open_consumes_no_handle() {
        let registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
        let model = registry.register("fighter", vec![], ModelOptions::default()).unwrap();
        let (tx, _rx) = unbounded_channel();
        let queries = LiveQueryRegistry::new();

        let err = queries
            .open_with(4, |_| Err(ServerError::InvalidRequest("bad shape".into())))
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
        assert!(queries.is_empty());
        assert_eq!(queries.open_with(4, open_count(&model, &tx)).unwrap().handle(), QueryHandle(1));
    }

    #[test]
    fn close_tears_down_queries() {
        let registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
        let model = registry.register("fighter", vec![], ModelOptions::default()).unwrap();
        let (tx, _rx) = unbounded_channel();
        let connection = Connection::new(ConnectionId(1), Identity::anonymous(0), tx.clone());

        for _ in 0..2 {
            connection.queries().open_with(10, open_count(&model, &tx)).unwrap();
        }
        assert_eq!(model.notifier().subscriber_count(), 2);

        assert_eq!(connection.close(), 2);
        assert!(connection.is_closed());
        assert_eq!(model.notifier().subscriber_count(), 0);
        assert!(connection.queries().open_with(10, open_count(&model, &tx)).is_err());
        assert_eq!(model.notifier().subscriber_count(), 0);
    }
}
