//! Test fixtures: models, servers and clients.
//!
//! The `fighter` model is the standard fixture: `name` and `health` are
//! open to everyone, `secret` needs level 10 to read and `title` needs
//! level 5 to create or update.

use livedoc_core::{
    DocumentId, DocumentStore, FieldDecl, FieldType, Fields, MemoryStore, ModelOptions, ModelRegistry,
    Operation, PermissionLevels, QueryMode, QueryResult, QueryShape,
};
use livedoc_server::{
    ConnectionId, Identity, LiveServer, Push, QueryHandle, RpcCall, RpcReply, ServerConfig, ServerResult,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Read level needed for `fighter.secret`.
pub const SECRET_LEVEL: u32 = 10;

/// Create/update level needed for `fighter.title`.
pub const TITLE_LEVEL: u32 = 5;

/// Field declarations of the `fighter` model.
pub fn fighter_fields() -> Vec<FieldDecl> {
    vec![
        FieldDecl::new("name", FieldType::String),
        FieldDecl::new("health", FieldType::Number),
        FieldDecl::new("secret", FieldType::String)
            .with_permissions(PermissionLevels::new().with(Operation::Read, SECRET_LEVEL)),
        FieldDecl::new("title", FieldType::String).with_permissions(
            PermissionLevels::new()
                .with(Operation::Create, TITLE_LEVEL)
                .with(Operation::Update, TITLE_LEVEL),
        ),
    ]
}

/// Creates a registry with the `fighter` model over `store`.
pub fn fighter_registry(store: Arc<dyn DocumentStore>) -> Arc<ModelRegistry> {
    let registry = ModelRegistry::new(store);
    registry
        .register("fighter", fighter_fields(), ModelOptions::default())
        .expect("Failed to register fighter");
    Arc::new(registry)
}

/// Converts a JSON object into document fields.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Names of the documents in a list or single result, in order.
pub fn names(result: &QueryResult) -> Vec<String> {
    let name = |doc: &Value| doc["name"].as_str().unwrap_or_default().to_string();
    match result {
        QueryResult::List(docs) => docs.iter().map(name).collect(),
        QueryResult::Single(doc) => doc.iter().map(name).collect(),
        QueryResult::Count(_) => Vec::new(),
    }
}

/// A server with the `fighter` model.
pub struct TestServer {
    /// The server.
    pub server: Arc<LiveServer>,
}

impl TestServer {
    /// Creates a server over an in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Creates a server over `store`.
    pub fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, ServerConfig::default())
    }

    /// Creates a server over `store` with a configuration.
    pub fn with_config(store: Arc<dyn DocumentStore>, config: ServerConfig) -> Self {
        Self {
            server: Arc::new(LiveServer::new(config, fighter_registry(store))),
        }
    }

    /// Connects a client.
    pub fn client(&self, identity: Identity) -> TestClient {
        let handle = self
            .server
            .connect(identity)
            .expect("Failed to connect test client");
        TestClient {
            server: Arc::clone(&self.server),
            id: handle.id,
            pushes: handle.pushes,
        }
    }

    /// Number of handlers subscribed to a model's notifier.
    pub fn subscribers(&self, model: &str) -> usize {
        self.server
            .registry()
            .get(model)
            .map_or(0, |m| m.notifier().subscriber_count())
    }
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

/// A connected client with typed call helpers.
pub struct TestClient {
    server: Arc<LiveServer>,
    /// Connection id.
    pub id: ConnectionId,
    /// Pushes received so far.
    pub pushes: UnboundedReceiver<Push>,
}

impl TestClient {
    /// Sends a raw call.
    pub fn call(&self, call: RpcCall) -> ServerResult<RpcReply> {
        self.server.handle_call(self.id, call)
    }

    /// Creates a document and returns it as the caller sees it.
    pub fn create(&self, model: &str, payload: Value) -> ServerResult<Value> {
        match self.call(RpcCall::Create {
            model: model.to_string(),
            payload: fields(payload),
        })? {
            RpcReply::Document(doc) => Ok(doc),
            other => panic!("unexpected reply to create: {other:?}"),
        }
    }

    /// Updates a document and returns it as the caller sees it.
    pub fn update(&self, model: &str, doc: Value) -> ServerResult<Value> {
        match self.call(RpcCall::Update {
            model: model.to_string(),
            doc: fields(doc),
        })? {
            RpcReply::Document(doc) => Ok(doc),
            other => panic!("unexpected reply to update: {other:?}"),
        }
    }

    /// Removes a document.
    pub fn remove(&self, model: &str, id: DocumentId) -> ServerResult<()> {
        self.call(RpcCall::Remove {
            model: model.to_string(),
            id,
        })
        .map(|_| ())
    }

    /// Evaluates a query once.
    pub fn query(&self, model: &str, shape: QueryShape, mode: QueryMode) -> ServerResult<QueryResult> {
        match self.call(RpcCall::Query {
            model: model.to_string(),
            shape,
            mode,
        })? {
            RpcReply::Result(result) => Ok(result),
            other => panic!("unexpected reply to query: {other:?}"),
        }
    }

    /// Opens a live query.
    pub fn open(&self, model: &str, shape: QueryShape, mode: QueryMode) -> ServerResult<QueryHandle> {
        match self.call(RpcCall::OpenLiveQuery {
            model: model.to_string(),
            shape,
            mode,
        })? {
            RpcReply::Handle(handle) => Ok(handle),
            other => panic!("unexpected reply to openLiveQuery: {other:?}"),
        }
    }

    /// Closes a live query.
    pub fn close(&self, handle: QueryHandle) -> ServerResult<()> {
        self.call(RpcCall::CloseLiveQuery { handle }).map(|_| ())
    }

    /// Takes every push received so far.
    pub fn drain(&mut self) -> Vec<Push> {
        let mut pushes = Vec::new();
        while let Ok(push) = self.pushes.try_recv() {
            pushes.push(push);
        }
        pushes
    }

    /// Takes every pending push and returns the results for `handle`, in order.
    pub fn results(&mut self, handle: QueryHandle) -> Vec<QueryResult> {
        self.drain()
            .into_iter()
            .filter_map(|push| match push {
                Push::Result { handle: h, payload } if h == handle => Some(payload),
                _ => None,
            })
            .collect()
    }

    /// Takes every pending push and returns the newest result for `handle`.
    pub fn latest(&mut self, handle: QueryHandle) -> Option<QueryResult> {
        self.results(handle).pop()
    }

    /// Disconnects the client.
    pub fn disconnect(&self) -> bool {
        self.server.disconnect(self.id)
    }
}
