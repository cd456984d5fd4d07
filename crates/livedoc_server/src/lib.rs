//! # LiveDoc Server
//!
//! Live queries and permission-gated RPC over LiveDoc models.
//!
//! This crate provides:
//! - Live queries that push re-evaluated results on every relevant change
//! - RPC dispatch for create, update, remove, query and live query calls
//! - Per-connection live query registries, torn down on disconnect
//! - A newline-delimited JSON transport over TCP
//!
//! # Architecture
//!
//! [`LiveServer`] is transport-agnostic. A transport attaches an
//! [`Identity`] on connect, receives a push channel, and feeds calls to
//! [`LiveServer::handle_call`]. Mutations go through the model's commit
//! path, which publishes to the model's change notifier; every live query
//! subscribed there re-evaluates and pushes to its own connection.
//!
//! ```rust
//! use livedoc_core::{MemoryStore, ModelOptions, ModelRegistry, QueryMode, QueryShape};
//! use livedoc_server::{Identity, LiveServer, RpcCall, ServerConfig};
//! use std::sync::Arc;
//!
//! let registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
//! registry.register("fighter", vec![], ModelOptions::default()).unwrap();
//! let server = LiveServer::new(ServerConfig::default(), Arc::new(registry));
//!
//! let mut conn = server.connect(Identity::anonymous(0)).unwrap();
//! server
//!     .handle_call(
//!         conn.id,
//!         RpcCall::OpenLiveQuery {
//!             model: "fighter".into(),
//!             shape: QueryShape::new(),
//!             mode: QueryMode::Count,
//!         },
//!     )
//!     .unwrap();
//! assert!(conn.pushes.try_recv().is_ok());
//! server.disconnect(conn.id);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Request handling must not panic; errors travel back to the client.
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod connection;
mod dispatch;
mod error;
mod live;
mod messages;
mod server;
pub mod tcp;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionId, Identity, LiveQueryRegistry};
pub use dispatch::{HandlerContext, RequestHandler};
pub use error::{ErrorKind, ServerError, ServerResult, WireError};
pub use live::{LiveQuery, Phase, PushSender};
pub use messages::{
    Hello, Push, PushFrame, QueryHandle, Request, Response, RpcCall, RpcReply, ServerMessage,
};
pub use server::{ConnectionHandle, LiveServer};
