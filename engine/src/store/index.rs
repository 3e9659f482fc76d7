//! Secondary index filters.

use super::StorageResult;
use crate::error::StorageError;
use crate::Schema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Query against a declared secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFilter {
    /// Index name as declared in the collection schema
    pub index: String,
    pub query: IndexQuery,
}

/// Match condition on the indexed value.
///
/// Records lacking the indexed field (or holding `null` there) never match,
/// mirroring SQL comparison semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum IndexQuery {
    /// Indexed value equals `value`
    Eq { value: Value },
    /// Indexed value within the inclusive bounds; a missing bound is open
    Range {
        lower: Option<Value>,
        upper: Option<Value>,
    },
}

impl IndexFilter {
    /// Match records whose indexed value equals `value`.
    pub fn eq(index: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            index: index.into(),
            query: IndexQuery::Eq {
                value: value.into(),
            },
        }
    }

    /// Match records whose indexed value lies within `[lower, upper]`.
    pub fn range(index: impl Into<String>, lower: Option<Value>, upper: Option<Value>) -> Self {
        Self {
            index: index.into(),
            query: IndexQuery::Range { lower, upper },
        }
    }

    /// Whether an indexed value satisfies the filter.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let value = match value {
            None | Some(Value::Null) => return false,
            Some(v) => v,
        };
        match &self.query {
            IndexQuery::Eq { value: expected } => {
                !expected.is_null() && compare_values(value, expected) == Ordering::Equal
            }
            IndexQuery::Range { lower, upper } => {
                let above = lower
                    .as_ref()
                    .map_or(true, |l| compare_values(value, l) != Ordering::Less);
                let below = upper
                    .as_ref()
                    .map_or(true, |u| compare_values(value, u) != Ordering::Greater);
                above && below
            }
        }
    }
}

/// Field path of the index a filter names, if the collection declares it.
pub(crate) fn resolve_field<'a>(
    schema: &'a Schema,
    collection: &str,
    filter: &IndexFilter,
) -> StorageResult<&'a str> {
    schema
        .get_collection(collection)
        .and_then(|c| c.index(&filter.index))
        .map(|index| index.field.as_str())
        .ok_or_else(|| StorageError::UnknownIndex {
            collection: collection.to_string(),
            index: filter.index.clone(),
        })
}

/// Total order over JSON values, aligned with SQLite's ordering of
/// `json_extract` results: null, then numbers (booleans as 0/1), then text,
/// then arrays and objects compared by their JSON text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) | Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) | Value::Object(_) => 3,
        }
    }

    fn numeric(value: &Value) -> f64 {
        match value {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Array(_) | Value::Object(_), _) => a.to_string().cmp(&b.to_string()),
            _ => numeric(a).total_cmp(&numeric(b)),
        },
        other => other,
    }
}
