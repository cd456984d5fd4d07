//! Benchmark utilities.

use livedoc_core::{Document, Fields};
use rand::Rng;
use serde_json::json;

const NAMES: &[&str] = &["Jon Snow", "Roose Bolton", "Arya Stark", "Brienne", "Sandor Clegane"];

/// Generate a random fighter payload.
pub fn random_fighter() -> Fields {
    let mut rng = rand::thread_rng();
    let mut fields = Fields::new();
    fields.insert("name".into(), json!(NAMES[rng.gen_range(0..NAMES.len())]));
    fields.insert("health".into(), json!(rng.gen_range(0..100)));
    fields
}

/// Generate a batch of fighter documents with fresh ids.
pub fn generate_fighters(count: usize) -> Vec<Document> {
    (0..count).map(|_| Document::new(random_fighter())).collect()
}
