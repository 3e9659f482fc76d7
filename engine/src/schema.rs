//! Schema definition and validation.
//!
//! A schema declares the collections the engine syncs, the payload fields it
//! validates on write, the secondary indexes each collection supports, and
//! per-collection policy (eviction priority, merge strategy override).

use crate::error::{ConfigError, ValidationError};
use crate::{CollectionName, MergeStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<(), ValidationError> {
        match value {
            None | Some(serde_json::Value::Null) if self.required => {
                Err(ValidationError::MissingRequiredField(self.name.clone()))
            }
            None | Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<(), ValidationError> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(ValidationError::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// A secondary index over a payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    /// Index name used in filters (e.g. `"byOwner"`)
    pub name: String,
    /// Dotted path of the indexed payload field (e.g. `"owner.id"`)
    pub field: String,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
        }
    }
}

/// Schema for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    /// Collection name
    pub name: CollectionName,
    /// Field definitions
    pub fields: Vec<FieldDef>,
    /// Secondary indexes
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Eviction order under storage pressure; lower goes first, `None` never
    #[serde(default)]
    pub eviction_priority: Option<u32>,
    /// Overrides the engine-wide merge strategy for this collection
    #[serde(default)]
    pub merge_strategy: Option<MergeStrategy>,
}

impl CollectionSchema {
    /// Create a new collection schema.
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            indexes: Vec::new(),
            eviction_priority: None,
            merge_strategy: None,
        }
    }

    /// Declare a secondary index.
    pub fn with_index(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.indexes.push(IndexDef::new(name, field));
        self
    }

    /// Make the collection eligible for quota eviction.
    pub fn evictable(mut self, priority: u32) -> Self {
        self.eviction_priority = Some(priority);
        self
    }

    /// Use a specific merge strategy for this collection.
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }

    /// Look up an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Validate a payload against this schema.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), ValidationError> {
        let obj = payload
            .as_object()
            .ok_or_else(|| ValidationError::InvalidPayload("payload must be an object".into()))?;

        for field in &self.fields {
            field.validate(obj.get(&field.name))?;
        }

        Ok(())
    }
}

/// Schema for the entire store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Collection schemas by name, ordered so sync passes are deterministic
    pub collections: BTreeMap<CollectionName, CollectionSchema>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection to the schema.
    pub fn add_collection(&mut self, collection: CollectionSchema) -> &mut Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.add_collection(collection);
        self
    }

    /// Get a collection schema by name.
    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    /// Get a collection schema or fail with a validation error.
    pub fn require_collection(&self, name: &str) -> Result<&CollectionSchema, ValidationError> {
        self.collections
            .get(name)
            .ok_or_else(|| ValidationError::UnknownCollection(name.to_string()))
    }

    /// Collection names in sync order.
    pub fn collection_names(&self) -> impl Iterator<Item = &CollectionName> {
        self.collections.keys()
    }

    /// Collections eligible for eviction, lowest priority value first.
    pub fn eviction_order(&self) -> Vec<&CollectionSchema> {
        let mut eligible: Vec<_> = self
            .collections
            .values()
            .filter(|c| c.eviction_priority.is_some())
            .collect();
        eligible.sort_by_key(|c| (c.eviction_priority, c.name.clone()));
        eligible
    }

    /// Check that every name that ends up inside SQL is a plain identifier.
    ///
    /// Collection names and index fields are embedded in index DDL, which
    /// cannot take bound parameters.
    pub fn check(&self) -> Result<(), ConfigError> {
        for collection in self.collections.values() {
            if !is_identifier(&collection.name) {
                return Err(ConfigError::InvalidSchema(format!(
                    "collection name '{}' must be alphanumeric or '_'",
                    collection.name
                )));
            }
            for index in &collection.indexes {
                if !is_identifier(&index.name)
                    || !index.field.split('.').all(is_identifier)
                {
                    return Err(ConfigError::InvalidSchema(format!(
                        "index '{}' on '{}' has an invalid name or field path",
                        index.name, collection.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
