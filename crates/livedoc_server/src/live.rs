//! Live queries.
//!
//! A [`LiveQuery`] is a standing query bound to one model and one
//! connection. It subscribes to the model's change notifier, re-evaluates
//! on every relevant event and pushes a result whenever it differs from the
//! last one delivered.
//!
//! All state lives behind one mutex. Event handling, reshape and close all
//! take it, so once [`LiveQuery::close`] returns no further push can be
//! sent for the query.

use crate::error::{ServerError, ServerResult};
use crate::messages::{Push, QueryHandle};
use livedoc_core::{
    ChangeEvent, ChangeKind, FindQuery, HandlerError, Level, Model, QueryMode, QueryResult, QueryShape,
    SortKey, SubscriptionId,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

/// Channel carrying pushes to one connection.
pub type PushSender = UnboundedSender<Push>;

/// Lifecycle phase of a live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, first evaluation not finished.
    Open,
    /// Re-evaluating.
    Evaluating,
    /// Waiting for events.
    Idle,
    /// Closed. Terminal.
    Closed,
}

struct QueryState {
    phase: Phase,
    subscription: Option<SubscriptionId>,
    shape: QueryShape,
    query: FindQuery,
    last: Option<QueryResult>,
}

impl QueryState {
    /// Whether an event provably leaves a list result unchanged.
    ///
    /// Only list mode without skip qualifies: with a skip, a document
    /// entering or leaving before the window shifts it.
    fn can_skip(&self, mode: QueryMode, event: &ChangeEvent) -> bool {
        if mode != QueryMode::List || self.query.skip != 0 {
            return false;
        }
        let Some(last) = &self.last else {
            return false;
        };
        if last.contains_id(&event.id.to_value()) {
            return false;
        }
        match event.kind {
            ChangeKind::Removed => true,
            ChangeKind::Created | ChangeKind::Updated => event
                .document
                .as_ref()
                .is_some_and(|doc| !self.query.filter.matches(doc)),
        }
    }
}

/// A standing query that pushes results to its connection.
pub struct LiveQuery {
    handle: QueryHandle,
    model: Arc<Model>,
    mode: QueryMode,
    level: Level,
    max_limit: Option<u64>,
    pushes: PushSender,
    state: Mutex<QueryState>,
}

impl LiveQuery {
    /// Validates the shape, subscribes and delivers the first result.
    ///
    /// On failure nothing stays subscribed and the error is returned.
    pub fn open(
        handle: QueryHandle,
        model: Arc<Model>,
        shape: QueryShape,
        mode: QueryMode,
        level: Level,
        max_limit: Option<u64>,
        pushes: PushSender,
    ) -> ServerResult<Arc<Self>> {
        let query = model.validate_shape(&shape, level, max_limit)?;
        let live = Arc::new(Self {
            handle,
            model,
            mode,
            level,
            max_limit,
            pushes,
            state: Mutex::new(QueryState {
                phase: Phase::Open,
                subscription: None,
                shape,
                query,
                last: None,
            }),
        });

        {
            // Events published between subscribe and the first evaluation
            // wait on the state lock and re-evaluate afterwards.
            let mut state = live.state.lock();
            let weak: Weak<Self> = Arc::downgrade(&live);
            let subscription = live.model.notifier().subscribe(Arc::new(
                move |event: &ChangeEvent| -> Result<(), HandlerError> {
                    if let Some(live) = weak.upgrade() {
                        live.on_change(event);
                    }
                    Ok(())
                },
            ));
            state.subscription = Some(subscription);

            match live.model.evaluate(&state.query, live.mode, live.level) {
                Ok(result) => {
                    live.deliver(&mut state, result);
                    if state.phase != Phase::Closed {
                        state.phase = Phase::Idle;
                    }
                }
                Err(err) => {
                    live.shut(&mut state);
                    return Err(err.into());
                }
            }
        }

        debug!(handle = %handle, model = %live.model.name(), mode = ?live.mode, "live query opened");
        Ok(live)
    }

    /// Returns the handle.
    pub fn handle(&self) -> QueryHandle {
        self.handle
    }

    /// Returns the model name.
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Returns the result mode.
    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Returns true once closed.
    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Returns the current shape.
    pub fn shape(&self) -> QueryShape {
        self.state.lock().shape.clone()
    }

    /// Returns the last delivered result.
    pub fn last_result(&self) -> Option<QueryResult> {
        self.state.lock().last.clone()
    }

    /// Replaces sort, limit or skip and pushes the new result.
    ///
    /// The push is sent even if the result did not change. An invalid new
    /// shape or a failed evaluation leaves the query as it was.
    pub fn reshape(
        &self,
        sort: Option<Vec<SortKey>>,
        limit: Option<i64>,
        skip: Option<i64>,
    ) -> ServerResult<()> {
        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            return Err(ServerError::UnknownQuery(self.handle));
        }

        let shape = state.shape.reshaped(sort, limit, skip);
        let query = self.model.validate_shape(&shape, self.level, self.max_limit)?;

        state.phase = Phase::Evaluating;
        let result = self.model.evaluate(&query, self.mode, self.level);
        state.phase = Phase::Idle;
        let result = result?;
        state.shape = shape;
        state.query = query;
        state.last = None;
        self.deliver(&mut state, result);
        debug!(handle = %self.handle, "live query reshaped");
        Ok(())
    }

    /// Closes the query. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            return false;
        }
        self.shut(&mut state);
        debug!(handle = %self.handle, model = %self.model.name(), "live query closed");
        true
    }

    fn on_change(&self, event: &ChangeEvent) {
        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            trace!(handle = %self.handle, sequence = event.sequence, "dropping event for closed query");
            return;
        }
        if state.can_skip(self.mode, event) {
            trace!(handle = %self.handle, sequence = event.sequence, "event cannot affect result");
            return;
        }

        state.phase = Phase::Evaluating;
        match self.model.evaluate(&state.query, self.mode, self.level) {
            Ok(result) => self.deliver(&mut state, result),
            Err(err) => {
                warn!(handle = %self.handle, model = %self.model.name(), error = %err, "re-evaluation failed");
                let reason = ServerError::from(err).to_wire();
                self.send(
                    &mut state,
                    Push::Error {
                        handle: self.handle,
                        reason,
                    },
                );
            }
        }
        if state.phase == Phase::Evaluating {
            state.phase = Phase::Idle;
        }
    }

    /// Pushes `result` if it differs from the last one delivered.
    fn deliver(&self, state: &mut QueryState, result: QueryResult) {
        if state.last.as_ref() == Some(&result) {
            return;
        }
        state.last = Some(result.clone());
        self.send(
            state,
            Push::Result {
                handle: self.handle,
                payload: result,
            },
        );
    }

    fn send(&self, state: &mut QueryState, push: Push) {
        if self.pushes.send(push).is_err() {
            trace!(handle = %self.handle, "connection gone, closing live query");
            self.shut(state);
        }
    }

    fn shut(&self, state: &mut QueryState) {
        state.phase = Phase::Closed;
        if let Some(subscription) = state.subscription.take() {
            self.model.notifier().unsubscribe(subscription);
        }
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        if let Some(subscription) = self.state.get_mut().subscription.take() {
            self.model.notifier().unsubscribe(subscription);
        }
    }
}

impl std::fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("handle", &self.handle)
            .field("model", &self.model.name())
            .field("mode", &self.mode)
            .field("level", &self.level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedoc_core::{
        Document, FieldDecl, FieldType, Fields, Filter, MemoryStore, ModelOptions, ModelRegistry,
        Operation, PermissionLevels,
    };
    use serde_json::{json, Value};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn fighter() -> Arc<Model> {
        let registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
        registry
            .register(
                "fighter",
                vec![
                    FieldDecl::new("name", FieldType::String),
                    FieldDecl::new("health", FieldType::Number),
                    FieldDecl::new("secret", FieldType::String)
                        .with_permissions(PermissionLevels::new().with(Operation::Read, 10)),
                ],
                ModelOptions::default(),
            )
            .unwrap()
    }

    fn save(model: &Model, value: Value) -> Document {
        let fields: Fields = serde_json::from_value(value).unwrap();
        model.save(Document::new(fields)).unwrap().into_document()
    }

    fn names(push: Push) -> Vec<String> {
        let Push::Result {
            payload: QueryResult::List(docs),
            ..
        } = push
        else {
            panic!("expected a list result");
        };
        docs.iter()
            .map(|d| d["name"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn open(model: &Arc<Model>, shape: QueryShape, mode: QueryMode) -> (Arc<LiveQuery>, UnboundedReceiver<Push>) {
        let (tx, rx) = unbounded_channel();
        let live = LiveQuery::open(QueryHandle(1), Arc::clone(model), shape, mode, 0, None, tx).unwrap();
        (live, rx)
    }

    #[test]
    fn pushes_initial_and_changed_results() {
        let model = fighter();
        let jon = save(&model, json!({"name": "Jon Snow", "health": 70}));
        save(&model, json!({"name": "Roose Bolton", "health": 35}));

        let shape = QueryShape::new()
            .filter(Filter::from_json(&json!({"health": {"$gt": 10}})).unwrap())
            .sort(SortKey::asc("health"));
        let (live, mut rx) = open(&model, shape, QueryMode::List);
        assert_eq!(live.phase(), Phase::Idle);
        assert_eq!(names(rx.try_recv().unwrap()), ["Roose Bolton", "Jon Snow"]);

        model
            .find_by_id_and_update(jon.id, serde_json::from_value(json!({"health": 34})).unwrap())
            .unwrap();
        assert_eq!(names(rx.try_recv().unwrap()), ["Jon Snow", "Roose Bolton"]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unchanged_results_are_not_pushed() {
        let model = fighter();
        let (_live, mut rx) = open(&model, QueryShape::new(), QueryMode::Count);
        assert_eq!(
            rx.try_recv().unwrap(),
            Push::Result {
                handle: QueryHandle(1),
                payload: QueryResult::Count(0)
            }
        );

        let doc = save(&model, json!({"name": "Arya"}));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Push::Result {
                payload: QueryResult::Count(1),
                ..
            }
        ));

        // Count is unchanged by an update.
        model
            .find_by_id_and_update(doc.id, serde_json::from_value(json!({"health": 1})).unwrap())
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn skips_events_outside_the_filter() {
        let model = fighter();
        let shape = QueryShape::new().filter(Filter::all().eq("name", json!("Jon Snow")));
        let (live, mut rx) = open(&model, shape, QueryMode::List);
        rx.try_recv().unwrap();

        let doc = Document::new(serde_json::from_value(json!({"name": "Hodor"})).unwrap());
        let mut state = live.state.lock();
        assert!(state.can_skip(QueryMode::List, &ChangeEvent::created(doc.clone())));
        assert!(state.can_skip(QueryMode::List, &ChangeEvent::removed(doc.id)));
        assert!(!state.can_skip(QueryMode::Count, &ChangeEvent::removed(doc.id)));

        let jon = Document::new(serde_json::from_value(json!({"name": "Jon Snow"})).unwrap());
        assert!(!state.can_skip(QueryMode::List, &ChangeEvent::created(jon)));

        state.query.skip = 1;
        assert!(!state.can_skip(QueryMode::List, &ChangeEvent::created(doc)));
    }

    #[test]
    fn close_stops_pushes_and_unsubscribes() {
        let model = fighter();
        let (live, mut rx) = open(&model, QueryShape::new(), QueryMode::List);
        rx.try_recv().unwrap();
        assert_eq!(model.notifier().subscriber_count(), 1);

        assert!(live.close());
        assert!(!live.close());
        assert_eq!(model.notifier().subscriber_count(), 0);

        save(&model, json!({"name": "Bran"}));
        assert!(rx.try_recv().is_err());
        assert!(matches!(live.reshape(None, Some(1), None), Err(ServerError::UnknownQuery(_))));
    }

    #[test]
    fn drop_unsubscribes() {
        let model = fighter();
        let (live, _rx) = open(&model, QueryShape::new(), QueryMode::List);
        assert_eq!(model.notifier().subscriber_count(), 1);
        drop(live);
        assert_eq!(model.notifier().subscriber_count(), 0);
    }

    #[test]
    fn reshape_forces_a_push() {
        let model = fighter();
        save(&model, json!({"name": "Sansa", "health": 50}));
        let (live, mut rx) = open(&model, QueryShape::new(), QueryMode::List);
        rx.try_recv().unwrap();

        live.reshape(Some(vec![SortKey::desc("health")]), None, None).unwrap();
        assert_eq!(names(rx.try_recv().unwrap()), ["Sansa"]);
        assert_eq!(live.shape().sort, vec![SortKey::desc("health")]);

        assert!(live.reshape(None, Some(-1), None).is_err());
        assert_eq!(live.shape().limit, None);
        assert_eq!(live.phase(), Phase::Idle);
    }

    #[test]
    fn unreadable_fields_are_stripped_and_queries_on_them_rejected() {
        let model = fighter();
        save(&model, json!({"name": "Varys", "secret": "birds"}));
        let (_live, mut rx) = open(&model, QueryShape::new(), QueryMode::Single);
        let Push::Result {
            payload: QueryResult::Single(Some(doc)),
            ..
        } = rx.try_recv().unwrap()
        else {
            panic!("expected a document");
        };
        assert!(doc.get("secret").is_none());

        let (tx, _rx) = unbounded_channel();
        let err = LiveQuery::open(
            QueryHandle(2),
            Arc::clone(&model),
            QueryShape::new().sort(SortKey::asc("secret")),
            QueryMode::List,
            0,
            None,
            tx,
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PermissionDenied);
        assert_eq!(model.notifier().subscriber_count(), 1);
    }

    #[test]
    fn dropped_receiver_closes_the_query() {
        let model = fighter();
        let (live, rx) = open(&model, QueryShape::new(), QueryMode::List);
        drop(rx);
        save(&model, json!({"name": "Rickon"}));
        assert!(live.is_closed());
        assert_eq!(model.notifier().subscriber_count(), 0);
    }
}
