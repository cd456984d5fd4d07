//! Live query server.

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId, Identity};
use crate::dispatch::{HandlerContext, RequestHandler};
use crate::error::{ServerError, ServerResult};
use crate::messages::{Push, Request, Response, RpcCall, RpcReply};
use livedoc_core::ModelRegistry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, info, warn};

/// What a transport holds for one accepted connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Connection id for subsequent calls.
    pub id: ConnectionId,
    /// Pushes for the connection's live queries, in delivery order.
    pub pushes: UnboundedReceiver<Push>,
}

/// Live query server.
///
/// Transport-agnostic: a transport calls [`connect`](Self::connect) when a
/// client arrives, feeds its calls to [`handle_call`](Self::handle_call)
/// and forwards the pushes it receives. [`disconnect`](Self::disconnect)
/// closes every live query of the connection.
pub struct LiveServer {
    context: Arc<HandlerContext>,
    handler: RequestHandler,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl LiveServer {
    /// Creates a new server over a model registry.
    pub fn new(config: ServerConfig, registry: Arc<ModelRegistry>) -> Self {
        let context = Arc::new(HandlerContext::new(config, registry));
        Self {
            handler: RequestHandler::new(Arc::clone(&context)),
            context,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the model registry.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.context.registry
    }

    /// Accepts a connection with an identity attached by the transport.
    pub fn connect(&self, identity: Identity) -> ServerResult<ConnectionHandle> {
        let mut connections = self.connections.write();
        if connections.len() >= self.context.config.max_connections {
            return Err(ServerError::LimitExceeded(format!(
                "at most {} connections",
                self.context.config.max_connections
            )));
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = unbounded_channel();
        info!(connection = %id, user = ?identity.user_id, level = identity.level, "connection accepted");
        connections.insert(id, Arc::new(Connection::new(id, identity, tx)));
        Ok(ConnectionHandle { id, pushes: rx })
    }

    /// Disconnects a connection, closing all of its live queries.
    ///
    /// When this returns no push for the connection's queries follows.
    /// Returns false if the connection was unknown.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let Some(connection) = self.connections.write().remove(&id) else {
            return false;
        };
        let closed = connection.close();
        debug!(connection = %id, closed, "connection disconnected");
        true
    }

    /// Handles a call on a connection.
    pub fn handle_call(&self, id: ConnectionId, call: RpcCall) -> ServerResult<RpcReply> {
        let connection = self
            .connections
            .read()
            .get(&id)
            .cloned()
            .ok_or(ServerError::ConnectionClosed)?;
        self.handler.handle(&connection, call)
    }

    /// Handles a numbered request and builds its response.
    pub fn handle_request(&self, id: ConnectionId, request: Request) -> Response {
        let method = request.call.method();
        match self.handle_call(id, request.call) {
            Ok(reply) => Response::ok(request.id, reply),
            Err(err) => {
                if err.is_client_error() {
                    debug!(connection = %id, method, error = %err, "call rejected");
                } else {
                    warn!(connection = %id, method, error = %err, "call failed");
                }
                Response::error(request.id, err.to_wire())
            }
        }
    }

    /// Returns the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns the number of open live queries of a connection.
    pub fn live_query_count(&self, id: ConnectionId) -> usize {
        self.connections
            .read()
            .get(&id)
            .map_or(0, |c| c.queries().len())
    }
}

impl std::fmt::Debug for LiveServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveServer")
            .field("config", &self.context.config)
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use livedoc_core::{MemoryStore, ModelOptions, ModelsSnapshot, QueryMode, QueryShape, Timestamp};

    fn server(config: ServerConfig) -> LiveServer {
        let registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
        registry.register("fighter", vec![], ModelOptions::default()).unwrap();
        LiveServer::new(config, Arc::new(registry))
    }

    #[test]
    fn server_lifecycle() {
        let server = server(ServerConfig::default());
        let conn = server.connect(Identity::anonymous(0)).unwrap();
        assert_eq!(server.connection_count(), 1);

        assert!(server.disconnect(conn.id));
        assert!(!server.disconnect(conn.id));
        assert_eq!(server.connection_count(), 0);

        let err = server
            .handle_call(conn.id, RpcCall::GetModels { cached: Timestamp(0) })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
    }

    #[test]
    fn connection_limit() {
        let server = server(ServerConfig::default().with_max_connections(1));
        let _first = server.connect(Identity::anonymous(0)).unwrap();
        let err = server.connect(Identity::anonymous(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LimitExceeded);
    }

    #[test]
    fn message_dispatch() {
        let server = server(ServerConfig::default());
        let conn = server.connect(Identity::anonymous(0)).unwrap();

        let response = server.handle_request(
            conn.id,
            Request {
                id: 1,
                call: RpcCall::GetModels { cached: Timestamp(0) },
            },
        );
        assert_eq!(response.id, 1);
        assert!(matches!(response.ok, Some(RpcReply::Models(ModelsSnapshot::Changed { .. }))));

        let response = server.handle_request(
            conn.id,
            Request {
                id: 2,
                call: RpcCall::Query {
                    model: "castle".into(),
                    shape: QueryShape::new(),
                    mode: QueryMode::List,
                },
            },
        );
        assert_eq!(response.error.unwrap().kind, ErrorKind::UnknownModel);
    }

    #[test]
    fn disconnect_closes_live_queries() {
        let server = server(ServerConfig::default());
        let mut conn = server.connect(Identity::anonymous(0)).unwrap();
        for _ in 0..2 {
            server
                .handle_call(
                    conn.id,
                    RpcCall::OpenLiveQuery {
                        model: "fighter".into(),
                        shape: QueryShape::new(),
                        mode: QueryMode::List,
                    },
                )
                .unwrap();
        }
        assert_eq!(server.live_query_count(conn.id), 2);
        let model = server.registry().get("fighter").unwrap();
        assert_eq!(model.notifier().subscriber_count(), 2);

        server.disconnect(conn.id);
        assert_eq!(model.notifier().subscriber_count(), 0);

        // The two initial results, then the channel closes.
        assert!(conn.pushes.try_recv().is_ok());
        assert!(conn.pushes.try_recv().is_ok());
        assert!(conn.pushes.try_recv().is_err());
    }
}
