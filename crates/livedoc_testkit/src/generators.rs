//! Property-based test generators using proptest.
//!
//! Strategies produce `fighter` documents, query shapes over them and
//! mutation scripts to run against a server.

use livedoc_core::{CompareOp, Fields, Filter, QueryMode, QueryShape, SortKey};
use proptest::prelude::*;
use serde_json::json;

/// Strategy for fighter names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "Jon Snow",
        "Roose Bolton",
        "Arya Stark",
        "Brienne",
        "Sandor Clegane",
        "Jaime Lannister",
    ])
    .prop_map(str::to_string)
}

/// Strategy for health values.
pub fn health_strategy() -> impl Strategy<Value = i64> {
    0i64..100
}

/// Strategy for fighter payloads readable and creatable at level 0.
pub fn fighter_strategy() -> impl Strategy<Value = Fields> {
    (name_strategy(), health_strategy()).prop_map(|(name, health)| {
        let mut fields = Fields::new();
        fields.insert("name".into(), json!(name));
        fields.insert("health".into(), json!(health));
        fields
    })
}

/// Strategy for filters over `name` and `health`.
pub fn filter_strategy() -> impl Strategy<Value = Filter> {
    prop_oneof![
        Just(Filter::all()),
        health_strategy().prop_map(|h| Filter::all().and("health", CompareOp::Gt, json!(h))),
        health_strategy().prop_map(|h| Filter::all().and("health", CompareOp::Lte, json!(h))),
        name_strategy().prop_map(|n| Filter::all().eq("name", json!(n))),
        (health_strategy(), name_strategy()).prop_map(|(h, n)| {
            Filter::all()
                .and("health", CompareOp::Gte, json!(h))
                .and("name", CompareOp::Ne, json!(n))
        }),
    ]
}

/// Strategy for sort keys.
pub fn sort_strategy() -> impl Strategy<Value = Vec<SortKey>> {
    prop_oneof![
        Just(vec![]),
        Just(vec![SortKey::asc("health")]),
        Just(vec![SortKey::desc("health")]),
        Just(vec![SortKey::asc("name"), SortKey::desc("health")]),
    ]
}

/// Strategy for valid query shapes.
pub fn shape_strategy() -> impl Strategy<Value = QueryShape> {
    (
        filter_strategy(),
        sort_strategy(),
        prop::option::of(0i64..5),
        prop::option::of(0i64..3),
    )
        .prop_map(|(filter, sort, limit, skip)| QueryShape {
            filter,
            sort,
            projection: None,
            limit,
            skip,
        })
}

/// Strategy for result modes.
pub fn mode_strategy() -> impl Strategy<Value = QueryMode> {
    prop_oneof![
        Just(QueryMode::List),
        Just(QueryMode::Single),
        Just(QueryMode::Count),
    ]
}

/// One step of a mutation script.
///
/// `target` picks among the documents created so far, modulo their count.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Create a fighter.
    Create(Fields),
    /// Set the health of an existing fighter.
    Update {
        /// Which fighter.
        target: usize,
        /// New health.
        health: i64,
    },
    /// Remove an existing fighter.
    Remove {
        /// Which fighter.
        target: usize,
    },
}

/// Strategy for a single mutation.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        3 => fighter_strategy().prop_map(Mutation::Create),
        2 => (any::<usize>(), health_strategy()).prop_map(|(target, health)| Mutation::Update { target, health }),
        1 => any::<usize>().prop_map(|target| Mutation::Remove { target }),
    ]
}

/// Strategy for a script of up to `max` mutations.
pub fn mutations_strategy(max: usize) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(), 1..max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn generated_shapes_are_valid() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let shape = shape_strategy().new_tree(&mut runner).unwrap().current();
            assert!(shape.limit.map_or(true, |l| l >= 0));
            assert!(shape.skip.map_or(true, |s| s >= 0));
            for field in shape.referenced_fields() {
                assert!(field == "name" || field == "health");
            }
        }
    }
}
