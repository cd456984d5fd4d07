//! Property tests: a live query always ends where a fresh query would.

use livedoc_core::{DocumentId, QueryResult};
use livedoc_server::{Identity, Push};
use livedoc_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn live_result_matches_fresh_query(
        shape in shape_strategy(),
        mode in mode_strategy(),
        script in mutations_strategy(24),
    ) {
        let server = TestServer::new();
        let mut watcher = server.client(Identity::anonymous(0));
        let writer = server.client(Identity::anonymous(0));
        let handle = watcher.open("fighter", shape.clone(), mode).unwrap();

        let mut ids: Vec<DocumentId> = Vec::new();
        for mutation in script {
            match mutation {
                Mutation::Create(payload) => {
                    let doc = writer.create("fighter", serde_json::Value::Object(payload)).unwrap();
                    ids.push(DocumentId::from_value(&doc["_id"]).unwrap());
                }
                Mutation::Update { target, health } if !ids.is_empty() => {
                    let id = ids[target % ids.len()];
                    writer
                        .update("fighter", json!({"_id": id.to_value(), "health": health}))
                        .unwrap();
                }
                Mutation::Remove { target } if !ids.is_empty() => {
                    let id = ids.remove(target % ids.len());
                    writer.remove("fighter", id).unwrap();
                }
                _ => {}
            }
        }

        let pushes = watcher.drain();
        prop_assert!(pushes.iter().all(|p| matches!(p, Push::Result { .. }) && p.handle() == handle), "all pushes must be Result for the subscribed handle");

        let results: Vec<QueryResult> = pushes
            .into_iter()
            .filter_map(|p| match p {
                Push::Result { payload, .. } => Some(payload),
                Push::Error { .. } => None,
            })
            .collect();
        // Consecutive pushes always differ.
        prop_assert!(results.windows(2).all(|w| w[0] != w[1]));

        let fresh = writer.query("fighter", shape, mode).unwrap();
        prop_assert_eq!(results.last(), Some(&fresh));

        prop_assert!(watcher.disconnect());
        prop_assert_eq!(server.subscribers("fighter"), 0);
    }

    #[test]
    fn level_zero_never_sees_secrets(
        payloads in prop::collection::vec(fighter_strategy(), 1..8),
        mode in mode_strategy(),
    ) {
        let server = TestServer::new();
        let writer = server.client(Identity::anonymous(SECRET_LEVEL));
        let mut watcher = server.client(Identity::anonymous(0));
        let handle = watcher.open("fighter", Default::default(), mode).unwrap();

        for mut payload in payloads {
            payload.insert("secret".into(), json!("hidden"));
            writer.create("fighter", serde_json::Value::Object(payload)).unwrap();
        }

        for result in watcher.results(handle) {
            let docs = match result {
                QueryResult::List(docs) => docs,
                QueryResult::Single(doc) => doc.into_iter().collect(),
                QueryResult::Count(_) => Vec::new(),
            };
            for doc in docs {
                prop_assert!(doc.get("secret").is_none());
                prop_assert!(doc.get("_id").is_some());
            }
        }
    }
}
