//! RPC calls, replies, pushes and their wire envelopes.

use crate::connection::Identity;
use crate::error::WireError;
use livedoc_core::{DocumentId, Fields, ModelsSnapshot, QueryMode, QueryResult, QueryShape, SortKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection-scoped live query identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryHandle(pub u64);

impl fmt::Display for QueryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// A call from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum RpcCall {
    /// Model metadata, if changed after `cached`.
    GetModels {
        /// Timestamp of the metadata the client holds.
        #[serde(default)]
        cached: Timestamp,
    },
    /// Creates a document.
    Create {
        /// Model name.
        model: String,
        /// Field values.
        payload: Fields,
    },
    /// Updates a document. `doc` must carry `_id`.
    Update {
        /// Model name.
        model: String,
        /// Document with its new field values.
        doc: Fields,
    },
    /// Removes a document.
    Remove {
        /// Model name.
        model: String,
        /// Document id.
        id: DocumentId,
    },
    /// Evaluates a query once.
    Query {
        /// Model name.
        model: String,
        /// Query shape.
        #[serde(default)]
        shape: QueryShape,
        /// Result mode.
        #[serde(default)]
        mode: QueryMode,
    },
    /// Opens a live query.
    OpenLiveQuery {
        /// Model name.
        model: String,
        /// Query shape.
        #[serde(default)]
        shape: QueryShape,
        /// Result mode.
        #[serde(default)]
        mode: QueryMode,
    },
    /// Changes sort, limit or skip of an open live query.
    Reshape {
        /// Live query handle.
        handle: QueryHandle,
        /// New sort keys.
        #[serde(default)]
        sort: Option<Vec<SortKey>>,
        /// New limit.
        #[serde(default)]
        limit: Option<i64>,
        /// New skip.
        #[serde(default)]
        skip: Option<i64>,
    },
    /// Closes a live query.
    CloseLiveQuery {
        /// Live query handle.
        handle: QueryHandle,
    },
}

impl RpcCall {
    /// Returns the wire method name.
    pub fn method(&self) -> &'static str {
        match self {
            RpcCall::GetModels { .. } => "getModels",
            RpcCall::Create { .. } => "create",
            RpcCall::Update { .. } => "update",
            RpcCall::Remove { .. } => "remove",
            RpcCall::Query { .. } => "query",
            RpcCall::OpenLiveQuery { .. } => "openLiveQuery",
            RpcCall::Reshape { .. } => "reshape",
            RpcCall::CloseLiveQuery { .. } => "closeLiveQuery",
        }
    }
}

/// A successful reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcReply {
    /// Model metadata.
    Models(ModelsSnapshot),
    /// The created or updated document, as the caller may see it.
    Document(serde_json::Value),
    /// The call succeeded with nothing to return.
    Ack,
    /// A one-shot query result.
    Result(QueryResult),
    /// Handle of a newly opened live query.
    Handle(QueryHandle),
}

/// A server-initiated message for one live query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Push {
    /// A new result.
    Result {
        /// Live query handle.
        handle: QueryHandle,
        /// Evaluated result.
        payload: QueryResult,
    },
    /// Re-evaluation failed. The query stays open.
    Error {
        /// Live query handle.
        handle: QueryHandle,
        /// What went wrong.
        reason: WireError,
    },
}

impl Push {
    /// Returns the handle the push belongs to.
    pub fn handle(&self) -> QueryHandle {
        match self {
            Push::Result { handle, .. } | Push::Error { handle, .. } => *handle,
        }
    }
}

/// First line sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    /// Identity attached to the connection.
    pub hello: Identity,
}

/// A numbered request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Client-chosen id echoed in the response.
    pub id: u64,
    /// The call.
    pub call: RpcCall,
}

/// Reply to a numbered request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Request id, or 0 if the request could not be parsed.
    pub id: u64,
    /// Reply on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<RpcReply>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    /// Creates a success response.
    pub fn ok(id: u64, reply: RpcReply) -> Self {
        Self {
            id,
            ok: Some(reply),
            error: None,
        }
    }

    /// Creates an error response.
    pub fn error(id: u64, error: WireError) -> Self {
        Self {
            id,
            ok: None,
            error: Some(error),
        }
    }
}

/// A push as framed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    /// The push.
    pub push: Push,
}

/// Any line the server writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Reply to a request.
    Response(Response),
    /// Live query push.
    Push(PushFrame),
}
