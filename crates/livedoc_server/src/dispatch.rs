//! Permission-gated RPC handlers.
//!
//! Every mutation goes through the model's sanctioned paths, so each
//! successful call produces exactly one change event and reaches every
//! live query on every connection.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::live::LiveQuery;
use crate::messages::{QueryHandle, RpcCall, RpcReply};
use livedoc_core::{
    CoreError, Document, DocumentId, Fields, Model, ModelRegistry, Operation, QueryMode, QueryShape,
    SortKey, Timestamp, ID_FIELD, OWNER_FIELD,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Registered models.
    pub registry: Arc<ModelRegistry>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, registry: Arc<ModelRegistry>) -> Self {
        Self { config, registry }
    }
}

/// Handler for RPC calls.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Dispatches a call for a connection.
    pub fn handle(&self, conn: &Connection, call: RpcCall) -> ServerResult<RpcReply> {
        if conn.is_closed() {
            return Err(ServerError::ConnectionClosed);
        }
        debug!(connection = %conn.id(), method = call.method(), "dispatching call");

        match call {
            RpcCall::GetModels { cached } => Ok(self.handle_get_models(cached)),
            RpcCall::Create { model, payload } => self.handle_create(conn, &model, payload),
            RpcCall::Update { model, doc } => self.handle_update(conn, &model, doc),
            RpcCall::Remove { model, id } => self.handle_remove(conn, &model, id),
            RpcCall::Query { model, shape, mode } => self.handle_query(conn, &model, &shape, mode),
            RpcCall::OpenLiveQuery { model, shape, mode } => {
                self.handle_open_live_query(conn, &model, shape, mode)
            }
            RpcCall::Reshape {
                handle,
                sort,
                limit,
                skip,
            } => self.handle_reshape(conn, handle, sort, limit, skip),
            RpcCall::CloseLiveQuery { handle } => self.handle_close_live_query(conn, handle),
        }
    }

    /// Returns model metadata if it changed after `cached`.
    pub fn handle_get_models(&self, cached: Timestamp) -> RpcReply {
        RpcReply::Models(self.context.registry.get_models(cached))
    }

    /// Creates a document owned by the caller.
    pub fn handle_create(&self, conn: &Connection, model: &str, payload: Fields) -> ServerResult<RpcReply> {
        let model = self.context.registry.get(model)?;
        let identity = conn.identity();
        check_writable(&model, Operation::Create, identity.level)?;

        let strict = model.options().strict;
        let mut fields: Fields = payload
            .into_iter()
            .filter(|(name, _)| name != ID_FIELD && name != OWNER_FIELD)
            .filter(|(name, _)| !strict || model.declares(name))
            .collect();

        if let Some(field) =
            model
                .permissions()
                .first_denied(fields.keys().map(String::as_str), Operation::Create, identity.level)
        {
            return Err(CoreError::permission_denied(model.name(), field, Operation::Create).into());
        }
        model.check_types(&fields)?;

        if let Some(user_id) = &identity.user_id {
            fields.insert(OWNER_FIELD.to_string(), Value::String(user_id.clone()));
        }

        let outcome = model.save(Document::new(fields))?;
        Ok(RpcReply::Document(
            model.render_document(outcome.document(), identity.level),
        ))
    }

    /// Updates the fields of `doc` that differ from the stored document.
    pub fn handle_update(&self, conn: &Connection, model: &str, doc: Fields) -> ServerResult<RpcReply> {
        let model = self.context.registry.get(model)?;
        let level = conn.identity().level;
        check_writable(&model, Operation::Update, level)?;

        let id = doc
            .get(ID_FIELD)
            .and_then(DocumentId::from_value)
            .ok_or_else(|| CoreError::validation("update requires a valid _id"))?;
        let current = model
            .find_by_id(id)?
            .ok_or_else(|| CoreError::not_found(model.name(), id))?;

        let null = Value::Null;
        let strict = model.options().strict;
        let mut patch = Fields::new();
        for (name, value) in doc {
            if name == ID_FIELD || (strict && !model.declares(&name)) {
                continue;
            }
            if current.fields.get(&name).unwrap_or(&null) == &value {
                continue;
            }
            if name == OWNER_FIELD {
                return Err(CoreError::permission_denied(model.name(), OWNER_FIELD, Operation::Update).into());
            }
            patch.insert(name, value);
        }

        if let Some(field) =
            model
                .permissions()
                .first_denied(patch.keys().map(String::as_str), Operation::Update, level)
        {
            return Err(CoreError::permission_denied(model.name(), field, Operation::Update).into());
        }
        model.check_types(&patch)?;

        let updated = model
            .find_by_id_and_update(id, patch)?
            .ok_or_else(|| CoreError::not_found(model.name(), id))?;
        Ok(RpcReply::Document(model.render_document(&updated, level)))
    }

    /// Removes a document.
    pub fn handle_remove(&self, conn: &Connection, model: &str, id: DocumentId) -> ServerResult<RpcReply> {
        let model = self.context.registry.get(model)?;
        let level = conn.identity().level;
        check_writable(&model, Operation::Delete, level)?;

        // The owner is managed by the server and never carries a delete level.
        let fields = model
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| *name != OWNER_FIELD);
        if let Some(field) = model.permissions().first_denied(fields, Operation::Delete, level) {
            return Err(CoreError::permission_denied(model.name(), field, Operation::Delete).into());
        }

        model
            .find_by_id_and_remove(id)?
            .ok_or_else(|| CoreError::not_found(model.name(), id))?;
        Ok(RpcReply::Ack)
    }

    /// Evaluates a query once.
    pub fn handle_query(
        &self,
        conn: &Connection,
        model: &str,
        shape: &QueryShape,
        mode: QueryMode,
    ) -> ServerResult<RpcReply> {
        let model = self.context.registry.get(model)?;
        let level = conn.identity().level;
        let query = model.validate_shape(shape, level, self.context.config.max_limit)?;
        Ok(RpcReply::Result(model.evaluate(&query, mode, level)?))
    }

    /// Opens a live query scoped to the connection.
    pub fn handle_open_live_query(
        &self,
        conn: &Connection,
        model: &str,
        shape: QueryShape,
        mode: QueryMode,
    ) -> ServerResult<RpcReply> {
        let model = self.context.registry.get(model)?;
        let level = conn.identity().level;
        let max_limit = self.context.config.max_limit;
        let query = conn.queries().open_with(
            self.context.config.max_live_queries_per_connection,
            |handle| LiveQuery::open(handle, model, shape, mode, level, max_limit, conn.pushes().clone()),
        )?;
        Ok(RpcReply::Handle(query.handle()))
    }

    /// Changes sort, limit or skip of a live query.
    pub fn handle_reshape(
        &self,
        conn: &Connection,
        handle: QueryHandle,
        sort: Option<Vec<SortKey>>,
        limit: Option<i64>,
        skip: Option<i64>,
    ) -> ServerResult<RpcReply> {
        let query = conn
            .queries()
            .get(handle)
            .ok_or(ServerError::UnknownQuery(handle))?;
        query.reshape(sort, limit, skip)?;
        Ok(RpcReply::Ack)
    }

    /// Closes a live query.
    pub fn handle_close_live_query(&self, conn: &Connection, handle: QueryHandle) -> ServerResult<RpcReply> {
        let query = conn
            .queries()
            .remove(handle)
            .ok_or(ServerError::UnknownQuery(handle))?;
        query.close();
        Ok(RpcReply::Ack)
    }
}

/// Rejects mutations of read-only models and failed model-level checks.
fn check_writable(model: &Model, operation: Operation, level: livedoc_core::Level) -> ServerResult<()> {
    if model.options().read_only || !model.permissions().allows_model(operation, level) {
        return Err(CoreError::permission_denied(model.name(), "*", operation).into());
    }
    Ok(())
}
