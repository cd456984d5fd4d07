//! Per-field create/read/update/delete permission levels.
//!
//! A [`PermissionTable`] is derived once from a model's field declarations.
//! Levels are ordered integers: a caller is allowed an operation on a field
//! when its level is at least the level the field requires for that
//! operation.
//!
//! Fields that declare no level for an operation fall back to the table's
//! [`Posture`]. The default posture is [`Posture::Open`]: undeclared means
//! unrestricted.

use crate::document::ID_FIELD;
use crate::schema::FieldDecl;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A permission level. Higher levels are more privileged.
pub type Level = u32;

/// The four operations a permission level can be declared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Supplying a field when creating a document.
    #[serde(rename = "C")]
    Create,
    /// Seeing a field, filtering or sorting on it.
    #[serde(rename = "R")]
    Read,
    /// Changing a field on an existing document.
    #[serde(rename = "U")]
    Update,
    /// Removing a document carrying the field.
    #[serde(rename = "D")]
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Required levels for each operation. `None` means nothing was declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevels {
    /// Level required to create.
    #[serde(rename = "C", default, skip_serializing_if = "Option::is_none")]
    pub create: Option<Level>,
    /// Level required to read.
    #[serde(rename = "R", default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Level>,
    /// Level required to update.
    #[serde(rename = "U", default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Level>,
    /// Level required to delete.
    #[serde(rename = "D", default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<Level>,
}

impl PermissionLevels {
    /// Creates an empty set of levels.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            create: None,
            read: None,
            update: None,
            delete: None,
        }
    }

    /// Sets the level required for one operation.
    #[must_use]
    pub const fn with(mut self, operation: Operation, level: Level) -> Self {
        match operation {
            Operation::Create => self.create = Some(level),
            Operation::Read => self.read = Some(level),
            Operation::Update => self.update = Some(level),
            Operation::Delete => self.delete = Some(level),
        }
        self
    }

    /// Returns the declared level for an operation.
    pub const fn required(&self, operation: Operation) -> Option<Level> {
        match operation {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }

    /// Returns true if no level is declared for any operation.
    pub const fn is_empty(&self) -> bool {
        self.create.is_none()
            && self.read.is_none()
            && self.update.is_none()
            && self.delete.is_none()
    }
}

/// What an undeclared field/operation pair resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    /// Undeclared means unrestricted.
    #[default]
    Open,
    /// Undeclared means denied for every caller.
    Closed,
}

/// Posture used when a model does not choose one.
pub const DEFAULT_POSTURE: Posture = Posture::Open;

/// Per-field permission levels for one model.
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    model: PermissionLevels,
    fields: HashMap<String, PermissionLevels>,
    posture: Posture,
}

impl PermissionTable {
    /// Builds a table from field declarations and model-level levels.
    pub fn from_fields(fields: &[FieldDecl], model: PermissionLevels, posture: Posture) -> Self {
        let fields = fields
            .iter()
            .filter(|f| !f.permissions.is_empty())
            .map(|f| (f.name.clone(), f.permissions))
            .collect();
        Self {
            model,
            fields,
            posture,
        }
    }

    /// Returns the posture for undeclared fields.
    pub fn posture(&self) -> Posture {
        self.posture
    }

    /// Returns the model-level levels.
    pub fn model_levels(&self) -> PermissionLevels {
        self.model
    }

    /// Returns true if a caller at `level` may perform `operation` on `field`.
    pub fn allows(&self, field: &str, operation: Operation, level: Level) -> bool {
        if field == ID_FIELD && operation == Operation::Read {
            return true;
        }
        match self.fields.get(field).and_then(|p| p.required(operation)) {
            Some(required) => level >= required,
            None => self.posture == Posture::Open,
        }
    }

    /// Returns true if the model-level check for `operation` passes.
    ///
    /// Model-level levels are independent of the posture: an undeclared
    /// model level never denies.
    pub fn allows_model(&self, operation: Operation, level: Level) -> bool {
        self.model
            .required(operation)
            .map_or(true, |required| level >= required)
    }

    /// Checks every field and returns the first one that is denied.
    pub fn first_denied<'a, I>(&self, fields: I, operation: Operation, level: Level) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        fields
            .into_iter()
            .find(|field| !self.allows(field, operation, level))
    }

    /// Removes every field the caller may not read.
    pub fn strip_unreadable(&self, fields: &mut serde_json::Map<String, serde_json::Value>, level: Level) {
        fields.retain(|name, _| self.allows(name, Operation::Read, level));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use proptest::prelude::*;
    use serde_json::json;

    fn table(posture: Posture) -> PermissionTable {
        let fields = vec![
            FieldDecl::new("name", FieldType::String),
            FieldDecl::new("health", FieldType::Number)
                .with_permissions(PermissionLevels::new().with(Operation::Update, 0)),
            FieldDecl::new("secret", FieldType::String)
                .with_permissions(PermissionLevels::new().with(Operation::Read, 10)),
        ];
        PermissionTable::from_fields(&fields, PermissionLevels::new(), posture)
    }

    #[test]
    fn default_posture_is_open() {
        assert_eq!(DEFAULT_POSTURE, Posture::Open);
        assert_eq!(Posture::default(), DEFAULT_POSTURE);
        let t = table(DEFAULT_POSTURE);
        assert!(t.allows("name", Operation::Create, 0));
        assert!(t.allows("name", Operation::Delete, 0));
        assert!(t.allows("undeclared", Operation::Update, 0));
    }

    #[test]
    fn closed_posture_denies_undeclared() {
        let t = table(Posture::Closed);
        assert!(!t.allows("name", Operation::Read, 100));
        assert!(t.allows("secret", Operation::Read, 10));
        assert!(t.allows("_id", Operation::Read, 0));
    }

    #[test]
    fn declared_level_is_a_lower_bound() {
        let t = table(Posture::Open);
        assert!(!t.allows("secret", Operation::Read, 9));
        assert!(t.allows("secret", Operation::Read, 10));
        assert!(t.allows("secret", Operation::Read, 11));
        // Only Read was declared on `secret`.
        assert!(t.allows("secret", Operation::Update, 0));
    }

    #[test]
    fn first_denied_reports_field() {
        let t = table(Posture::Open);
        let denied = t.first_denied(["name", "secret"], Operation::Read, 0);
        assert_eq!(denied, Some("secret"));
        assert_eq!(t.first_denied(["name"], Operation::Read, 0), None);
    }

    #[test]
    fn model_levels_apply_regardless_of_posture() {
        let t = PermissionTable::from_fields(
            &[],
            PermissionLevels::new().with(Operation::Delete, 5),
            Posture::Closed,
        );
        assert!(!t.allows_model(Operation::Delete, 4));
        assert!(t.allows_model(Operation::Delete, 5));
        assert!(t.allows_model(Operation::Create, 0));
    }

    #[test]
    fn strip_unreadable_keeps_open_fields() {
        let t = table(Posture::Open);
        let mut fields = serde_json::Map::new();
        fields.insert("name".into(), json!("Jon"));
        fields.insert("secret".into(), json!("hidden"));
        t.strip_unreadable(&mut fields, 0);
        assert!(fields.contains_key("name"));
        assert!(!fields.contains_key("secret"));
    }

    #[test]
    fn levels_serialize_with_letters() {
        let levels = PermissionLevels::new()
            .with(Operation::Create, 1)
            .with(Operation::Delete, 5);
        let value = serde_json::to_value(levels).unwrap();
        assert_eq!(value, json!({"C": 1, "D": 5}));
    }

    proptest! {
        #[test]
        fn allows_matches_level_order(required in 0u32..50, caller in 0u32..50) {
            let fields = vec![FieldDecl::new("f", FieldType::Number)
                .with_permissions(PermissionLevels::new().with(Operation::Create, required))];
            let t = PermissionTable::from_fields(&fields, PermissionLevels::new(), Posture::Open);
            prop_assert_eq!(t.allows("f", Operation::Create, caller), caller >= required);
        }
    }
}
