//! Query shapes: filter, sort, projection, skip and limit.
//!
//! Filters use a small Mongo-style JSON dialect:
//!
//! ```json
//! { "name": "Jon Snow", "health": { "$gte": 30, "$lt": 80 } }
//! ```
//!
//! Supported operators are `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`,
//! `$in`, `$nin` and `$exists`. A bare value means `$eq`. Sort keys are
//! field names, optionally prefixed with `-` for descending order.

use crate::document::{Document, ID_FIELD};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Comparison operator of a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (a missing field equals `null`).
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Equal to one of an array of values.
    In,
    /// Equal to none of an array of values.
    Nin,
    /// Field presence.
    Exists,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "$eq" => CompareOp::Eq,
            "$ne" => CompareOp::Ne,
            "$gt" => CompareOp::Gt,
            "$gte" => CompareOp::Gte,
            "$lt" => CompareOp::Lt,
            "$lte" => CompareOp::Lte,
            "$in" => CompareOp::In,
            "$nin" => CompareOp::Nin,
            "$exists" => CompareOp::Exists,
            _ => return None,
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Ne => "$ne",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
            CompareOp::In => "$in",
            CompareOp::Nin => "$nin",
            CompareOp::Exists => "$exists",
        }
    }
}

/// One `field op value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Field the condition reads.
    pub field: String,
    /// Operator.
    pub op: CompareOp,
    /// Operand.
    pub value: Value,
}

impl Condition {
    /// Evaluates the condition against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        let actual = doc.get(&self.field);
        let null = Value::Null;
        match self.op {
            CompareOp::Eq => values_equal(actual.as_ref().unwrap_or(&null), &self.value),
            CompareOp::Ne => !values_equal(actual.as_ref().unwrap_or(&null), &self.value),
            CompareOp::Gt => compare(actual.as_ref(), &self.value) == Some(Ordering::Greater),
            CompareOp::Gte => matches!(
                compare(actual.as_ref(), &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            CompareOp::Lt => compare(actual.as_ref(), &self.value) == Some(Ordering::Less),
            CompareOp::Lte => matches!(
                compare(actual.as_ref(), &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            CompareOp::In => in_list(actual.as_ref(), &self.value),
            CompareOp::Nin => !in_list(actual.as_ref(), &self.value),
            CompareOp::Exists => actual.is_some() == self.value.as_bool().unwrap_or(true),
        }
    }
}

/// A conjunction of conditions. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// The filter that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a condition.
    #[must_use]
    pub fn and(mut self, field: impl Into<String>, op: CompareOp, value: Value) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op,
            value,
        });
        self
    }

    /// Shorthand for an equality condition.
    #[must_use]
    pub fn eq(self, field: impl Into<String>, value: Value) -> Self {
        self.and(field, CompareOp::Eq, value)
    }

    /// Returns the conditions.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Returns the distinct fields the filter reads.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.conditions.iter().map(|c| c.field.as_str()).collect();
        fields.dedup();
        fields
    }

    /// Returns true if the document satisfies every condition.
    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(doc))
    }

    /// Parses a filter from its JSON form.
    pub fn from_json(value: &Value) -> CoreResult<Self> {
        let object = match value {
            Value::Null => return Ok(Self::all()),
            Value::Object(object) => object,
            other => {
                return Err(CoreError::validation(format!(
                    "filter must be an object, got {other}"
                )))
            }
        };

        let mut filter = Self::all();
        for (field, criterion) in object {
            if field.starts_with('$') {
                return Err(CoreError::validation(format!(
                    "unsupported top-level operator {field}"
                )));
            }
            match criterion {
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    for (op, operand) in ops {
                        let parsed = CompareOp::parse(op).ok_or_else(|| {
                            CoreError::validation(format!("unsupported operator {op} on {field}"))
                        })?;
                        if matches!(parsed, CompareOp::In | CompareOp::Nin) && !operand.is_array() {
                            return Err(CoreError::validation(format!(
                                "{op} on {field} needs an array"
                            )));
                        }
                        filter = filter.and(field.clone(), parsed, operand.clone());
                    }
                }
                other => filter = filter.eq(field.clone(), other.clone()),
            }
        }
        Ok(filter)
    }

    /// Renders the filter back into its JSON form.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for condition in &self.conditions {
            let entry = object
                .entry(condition.field.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(ops) = entry {
                ops.insert(condition.op.as_str().to_string(), condition.value.clone());
            }
        }
        Value::Object(object)
    }
}

impl Serialize for Filter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Filter::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// One sort key, written `field` or `-field` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SortKey {
    /// Field to sort by.
    pub field: String,
    /// Direction.
    pub direction: SortDirection,
}

impl SortKey {
    /// Ascending key.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    /// Descending key.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

impl TryFrom<String> for SortKey {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (field, direction) = match raw.strip_prefix('-') {
            Some(field) => (field, SortDirection::Descending),
            None => (raw.strip_prefix('+').unwrap_or(&raw), SortDirection::Ascending),
        };
        if field.is_empty() {
            return Err(format!("invalid sort key '{raw}'"));
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }
}

impl From<SortKey> for String {
    fn from(key: SortKey) -> Self {
        match key.direction {
            SortDirection::Ascending => key.field,
            SortDirection::Descending => format!("-{}", key.field),
        }
    }
}

/// How a query's result is shaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Sorted documents, sliced by skip and limit.
    #[default]
    List,
    /// First matching document, or none.
    Single,
    /// Number of matching documents.
    Count,
}

/// A query shape as submitted by a client, before validation.
///
/// `limit` and `skip` are signed so that negative values reach
/// validation and are reported instead of failing to parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryShape {
    /// Filter conditions.
    #[serde(default)]
    pub filter: Filter,
    /// Sort keys, most significant first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    /// Fields to return (plus `_id`). `None` returns every readable field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Vec<String>>,
    /// Maximum number of documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Number of documents to skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<i64>,
}

impl QueryShape {
    /// Shape matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    /// Sets the projection.
    #[must_use]
    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the limit.
    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the skip.
    #[must_use]
    pub fn skip(mut self, skip: i64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Returns a copy with sort, limit and skip replaced where given.
    #[must_use]
    pub fn reshaped(&self, sort: Option<Vec<SortKey>>, limit: Option<i64>, skip: Option<i64>) -> Self {
        let mut shape = self.clone();
        if let Some(sort) = sort {
            shape.sort = sort;
        }
        if limit.is_some() {
            shape.limit = limit;
        }
        if skip.is_some() {
            shape.skip = skip;
        }
        shape
    }

    /// Every field the shape reads, for permission and existence checks.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields = self.filter.fields();
        fields.extend(self.sort.iter().map(|k| k.field.as_str()));
        if let Some(projection) = &self.projection {
            fields.extend(projection.iter().map(String::as_str));
        }
        fields.sort_unstable();
        fields.dedup();
        fields
    }
}

/// A validated query, as handed to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Filter conditions.
    pub filter: Filter,
    /// Sort keys.
    pub sort: Vec<SortKey>,
    /// Documents to skip.
    pub skip: u64,
    /// Maximum documents to return.
    pub limit: Option<u64>,
    /// Fields to return (plus `_id`).
    pub projection: Option<Vec<String>>,
}

impl FindQuery {
    /// Filters, sorts and slices a set of documents.
    ///
    /// Sorting is stable, so ties keep the input (insertion) order.
    pub fn apply<'a, I>(&self, docs: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut matched: Vec<&Document> = docs.into_iter().filter(|d| self.filter.matches(d)).collect();
        if !self.sort.is_empty() {
            matched.sort_by(|a, b| compare_documents(a, b, &self.sort));
        }
        let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
        let limit = self
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        matched.into_iter().skip(skip).take(limit).cloned().collect()
    }

    /// Renders a document as JSON, keeping only projected fields and `_id`.
    pub fn project(&self, doc: &Document) -> Map<String, Value> {
        let mut out = Map::new();
        match &self.projection {
            Some(fields) => {
                for field in fields {
                    if let Some(value) = doc.fields.get(field) {
                        out.insert(field.clone(), value.clone());
                    }
                }
            }
            None => out.extend(doc.fields.iter().map(|(k, v)| (k.clone(), v.clone()))),
        }
        out.insert(ID_FIELD.to_string(), doc.id.to_value());
        out
    }
}

/// The evaluated result of a query in one of the three modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum QueryResult {
    /// Documents in order.
    List(Vec<Value>),
    /// First match.
    Single(Option<Value>),
    /// Match count.
    Count(u64),
}

impl QueryResult {
    /// Returns true if a document with this `_id` is part of the result.
    pub fn contains_id(&self, id: &Value) -> bool {
        let has = |doc: &Value| doc.get(ID_FIELD) == Some(id);
        match self {
            QueryResult::List(docs) => docs.iter().any(has),
            QueryResult::Single(doc) => doc.as_ref().is_some_and(has),
            QueryResult::Count(_) => false,
        }
    }
}

/// Compares two documents by a list of sort keys.
pub fn compare_documents(a: &Document, b: &Document, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ord = sort_order(a.get(&key.field).as_ref(), b.get(&key.field).as_ref());
        let ord = match key.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Total order across JSON values used for sorting.
///
/// Types rank missing/null < numbers < strings < objects < arrays < booleans.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Object(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Bool(_)) => 5,
        }
    }

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => {}
        ord => return ord,
    }
    match (a, b) {
        (Some(x), Some(y)) => compare(Some(x), y).unwrap_or_else(|| x.to_string().cmp(&y.to_string())),
        _ => Ordering::Equal,
    }
}

/// Compares two values of the same scalar kind.
fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(Some(a), b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn in_list(actual: Option<&Value>, list: &Value) -> bool {
    let null = Value::Null;
    let actual = actual.unwrap_or(&null);
    list.as_array()
        .is_some_and(|items| items.iter().any(|item| values_equal(actual, item)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Fields;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        let fields: Fields = serde_json::from_value(value).unwrap();
        Document::new(fields)
    }

    #[test]
    fn parse_filter_operators() {
        let filter = Filter::from_json(&json!({"name": "Jon", "health": {"$gte": 30, "$lt": 80}})).unwrap();
        assert_eq!(filter.conditions().len(), 3);
        assert!(filter.matches(&doc(json!({"name": "Jon", "health": 70}))));
        assert!(!filter.matches(&doc(json!({"name": "Jon", "health": 80}))));
        assert!(!filter.matches(&doc(json!({"name": "Roose", "health": 35}))));
    }

    #[test]
    fn reject_bad_filters() {
        assert!(Filter::from_json(&json!([1, 2])).is_err());
        assert!(Filter::from_json(&json!({"health": {"$near": 3}})).is_err());
        assert!(Filter::from_json(&json!({"$or": []})).is_err());
        assert!(Filter::from_json(&json!({"health": {"$in": 3}})).is_err());
    }

    #[test]
    fn null_filter_matches_missing_field() {
        let filter = Filter::all().eq("title", Value::Null);
        assert!(filter.matches(&doc(json!({"name": "Jon"}))));
        let exists = Filter::all().and("title", CompareOp::Exists, json!(true));
        assert!(!exists.matches(&doc(json!({"name": "Jon"}))));
    }

    #[test]
    fn numbers_compare_across_representations() {
        let filter = Filter::all().eq("health", json!(35.0));
        assert!(filter.matches(&doc(json!({"health": 35}))));
        let within = Filter::all().and("health", CompareOp::In, json!([1, 35]));
        assert!(within.matches(&doc(json!({"health": 35}))));
    }

    #[test]
    fn filter_json_roundtrip() {
        let filter = Filter::all()
            .and("health", CompareOp::Gt, json!(10))
            .eq("name", json!("Jon"));
        let parsed = Filter::from_json(&filter.to_json()).unwrap();
        assert_eq!(parsed.conditions().len(), 2);
    }

    #[test]
    fn sort_key_parsing() {
        let key: SortKey = serde_json::from_value(json!("-health")).unwrap();
        assert_eq!(key, SortKey::desc("health"));
        let key: SortKey = serde_json::from_value(json!("health")).unwrap();
        assert_eq!(key, SortKey::asc("health"));
        assert!(serde_json::from_value::<SortKey>(json!("-")).is_err());
        assert_eq!(serde_json::to_value(SortKey::desc("a")).unwrap(), json!("-a"));
    }

    #[test]
    fn apply_sorts_skips_and_limits() {
        let docs = vec![
            doc(json!({"name": "Jon Snow", "health": 70})),
            doc(json!({"name": "Roose Bolton", "health": 35})),
            doc(json!({"name": "Arya", "health": 50})),
        ];
        let query = FindQuery {
            sort: vec![SortKey::asc("health")],
            limit: Some(2),
            ..FindQuery::default()
        };
        let names: Vec<_> = query.apply(&docs).iter().map(|d| d.fields["name"].clone()).collect();
        assert_eq!(names, vec![json!("Roose Bolton"), json!("Arya")]);

        let query = FindQuery {
            sort: vec![SortKey::desc("health")],
            skip: 1,
            ..FindQuery::default()
        };
        let names: Vec<_> = query.apply(&docs).iter().map(|d| d.fields["name"].clone()).collect();
        assert_eq!(names, vec![json!("Arya"), json!("Roose Bolton")]);
    }

    #[test]
    fn missing_values_sort_first() {
        assert_eq!(sort_order(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(sort_order(Some(&json!("a")), Some(&json!(1))), Ordering::Greater);
        assert_eq!(sort_order(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
    }

    #[test]
    fn projection_keeps_id() {
        let d = doc(json!({"name": "Jon", "health": 70}));
        let query = FindQuery {
            projection: Some(vec!["name".into()]),
            ..FindQuery::default()
        };
        let projected = query.project(&d);
        assert_eq!(projected.len(), 2);
        assert!(projected.contains_key("_id"));
        assert!(!projected.contains_key("health"));
    }

    #[test]
    fn shape_reshape_and_fields() {
        let shape = QueryShape::new()
            .filter(Filter::all().eq("name", json!("Jon")))
            .sort(SortKey::asc("health"))
            .limit(2);
        let reshaped = shape.reshaped(None, Some(3), Some(1));
        assert_eq!(reshaped.limit, Some(3));
        assert_eq!(reshaped.skip, Some(1));
        assert_eq!(reshaped.sort, shape.sort);
        assert_eq!(shape.referenced_fields(), vec!["health", "name"]);
    }

    #[test]
    fn shape_from_json() {
        let shape: QueryShape = serde_json::from_value(json!({
            "filter": {"health": {"$lt": 50}},
            "sort": ["health"],
            "limit": 2
        }))
        .unwrap();
        assert_eq!(shape.sort, vec![SortKey::asc("health")]);
        assert_eq!(shape.limit, Some(2));
        assert_eq!(shape.filter.conditions().len(), 1);
    }
}
