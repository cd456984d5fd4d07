//! Documents and document identity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Field values of a document, keyed by field name.
pub type Fields = Map<String, Value>;

/// Name of the identity field on the wire.
pub const ID_FIELD: &str = "_id";

/// Name of the owner reference field implicitly added to every model.
pub const OWNER_FIELD: &str = "owner";

/// Unique identifier for a document.
///
/// Document IDs are UUIDs that are:
/// - Assigned by the server on creation
/// - Immutable once assigned
/// - Serialized as hyphenated strings
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Creates a new random document ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a document ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the ID as a JSON string value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::String(self.0.to_string())
    }

    /// Parses an ID out of a JSON value, if it is a valid UUID string.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_str().and_then(|s| s.parse().ok())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for DocumentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A stored document: identity plus field values.
///
/// The owner reference lives in `fields` under [`OWNER_FIELD`] like any
/// other value; the identity never does.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Identity of the document.
    pub id: DocumentId,
    /// Field values, identity excluded.
    pub fields: Fields,
}

impl Document {
    /// Creates a document with a fresh identity.
    pub fn new(fields: Fields) -> Self {
        Self::with_id(DocumentId::new(), fields)
    }

    /// Creates a document with the given identity.
    pub fn with_id(id: DocumentId, mut fields: Fields) -> Self {
        fields.remove(ID_FIELD);
        Self { id, fields }
    }

    /// Returns a field value, treating `_id` as a virtual field.
    pub fn get(&self, field: &str) -> Option<Value> {
        if field == ID_FIELD {
            Some(self.id.to_value())
        } else {
            self.fields.get(field).cloned()
        }
    }

    /// Returns the owner reference, if set.
    pub fn owner(&self) -> Option<&str> {
        self.fields.get(OWNER_FIELD).and_then(Value::as_str)
    }

    /// Renders the document as a JSON object including `_id`.
    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        map.insert(ID_FIELD.to_string(), self.id.to_value());
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_is_unique() {
        assert_ne!(DocumentId::new(), DocumentId::new());
    }

    #[test]
    fn parse_and_display() {
        let id = DocumentId::new();
        let parsed: DocumentId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<DocumentId>().is_err());
    }

    #[test]
    fn identity_is_not_a_stored_field() {
        let mut fields = Fields::new();
        fields.insert(ID_FIELD.into(), json!("spoofed"));
        fields.insert("name".into(), json!("Jon Snow"));
        let doc = Document::new(fields);
        assert!(!doc.fields.contains_key(ID_FIELD));
        assert_eq!(doc.get(ID_FIELD), Some(doc.id.to_value()));
    }

    #[test]
    fn to_json_includes_id() {
        let id = DocumentId::from_bytes([7; 16]);
        let mut fields = Fields::new();
        fields.insert("health".into(), json!(70));
        let json = Document::with_id(id, fields).to_json();
        assert_eq!(json["_id"], id.to_value());
        assert_eq!(json["health"], 70);
    }
}
