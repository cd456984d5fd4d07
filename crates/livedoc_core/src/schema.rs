//! Field declarations and model definitions.

use crate::document::{ID_FIELD, OWNER_FIELD};
use crate::error::{CoreError, CoreResult};
use crate::model::ModelOptions;
use crate::permission::PermissionLevels;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Field names that may not be declared on a model.
pub const RESERVED_FIELDS: &[&str] = &[ID_FIELD, "__v", "$$hashKey"];

/// Storage type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// UTF-8 text.
    String,
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// RFC 3339 timestamp stored as text.
    Date,
    /// Reference to another document (a document ID string).
    ObjectId,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
    /// Anything.
    Mixed,
}

impl FieldType {
    /// Returns true if `value` can be stored in a field of this type.
    ///
    /// `null` is accepted for every type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (FieldType::Mixed, _) => true,
            (FieldType::String | FieldType::Date | FieldType::ObjectId, Value::String(_)) => true,
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

/// A declared field: name, storage type and optional permission levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Field name.
    pub name: String,
    /// Storage type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Declared permission levels.
    #[serde(default, skip_serializing_if = "PermissionLevels::is_empty")]
    pub permissions: PermissionLevels,
}

impl FieldDecl {
    /// Declares a field with no permission levels.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            permissions: PermissionLevels::new(),
        }
    }

    /// Sets the permission levels.
    #[must_use]
    pub fn with_permissions(mut self, permissions: PermissionLevels) -> Self {
        self.permissions = permissions;
        self
    }

    /// The owner reference added to every model.
    pub fn owner() -> Self {
        Self::new(OWNER_FIELD, FieldType::ObjectId)
    }
}

/// A complete model definition, as read from a model file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Model name.
    pub name: String,
    /// Declared fields.
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    /// Model options.
    #[serde(default)]
    pub options: ModelOptions,
}

/// Validates a model name and its field declarations.
///
/// Returns the declarations with the owner reference appended.
pub(crate) fn prepare_fields(name: &str, fields: Vec<FieldDecl>) -> CoreResult<Vec<FieldDecl>> {
    if name.trim().is_empty() {
        return Err(CoreError::invalid_model("model name must not be empty"));
    }

    let mut seen = HashSet::new();
    for field in &fields {
        if field.name.is_empty() {
            return Err(CoreError::invalid_model(format!(
                "{name}: field name must not be empty"
            )));
        }
        if RESERVED_FIELDS.contains(&field.name.as_str()) {
            return Err(CoreError::invalid_model(format!(
                "{name}: field name '{}' is reserved",
                field.name
            )));
        }
        if field.name == OWNER_FIELD {
            return Err(CoreError::invalid_model(format!(
                "{name}: '{OWNER_FIELD}' is added implicitly"
            )));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(CoreError::invalid_model(format!(
                "{name}: field '{}' declared twice",
                field.name
            )));
        }
    }

    let mut fields = fields;
    fields.push(FieldDecl::owner());
    Ok(fields)
}
