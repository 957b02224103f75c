//! Artifact registry - named records of data produced along a branch.
//!
//! Task inputs reference artifacts with `@name` strings. Resolution replaces
//! every reference with a deep copy of the stored `value`, so consumers can
//! never reach back into the registry.

use crate::error::ArtifactError;
use crate::Time;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Prefix marking an artifact reference inside task inputs.
pub const REFERENCE_PREFIX: char = '@';

/// A stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    /// Artifact type
    #[serde(rename = "type")]
    pub artifact_type: String,

    /// Stored value
    pub value: Value,

    /// Description
    pub description: String,

    /// Why the artifact exists
    pub purpose: String,

    /// When it was stored
    pub timestamp: Time,

    /// Provenance
    pub metadata: ArtifactMetadata,
}

/// Provenance of an artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    /// Tool that produced it
    pub tool_name: Option<String>,

    /// Whether the producing step succeeded
    pub success: bool,

    /// Artifacts referenced by the producing step
    pub input_artifacts: Vec<String>,
}

impl ArtifactRecord {
    /// Create a record, inferring its type from the value.
    pub fn new(value: Value) -> Self {
        Self {
            artifact_type: value_type(&value).to_string(),
            value,
            description: String::new(),
            purpose: String::new(),
            timestamp: chrono::Utc::now(),
            metadata: ArtifactMetadata {
                success: true,
                ..Default::default()
            },
        }
    }

    /// Set the type.
    pub fn with_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = artifact_type.into();
        self
    }

    /// Set description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set purpose.
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    /// Set provenance.
    pub fn with_metadata(mut self, metadata: ArtifactMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// JSON type name of a value.
pub fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Inputs after reference resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInputs {
    /// Input tree with references replaced by copies
    pub value: Value,

    /// Names of the artifacts that were referenced, in first-seen order
    pub referenced: Vec<String>,
}

/// Name → record store.
///
/// Records are shared behind `Arc` so that snapshotting a registry for a
/// child branch is cheap; records themselves are never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRegistry {
    records: HashMap<String, Arc<ArtifactRecord>>,
}

impl ArtifactRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, replacing any record with the same name.
    pub fn insert(&mut self, name: impl Into<String>, record: ArtifactRecord) {
        self.records.insert(name.into(), Arc::new(record));
    }

    pub(crate) fn insert_shared(&mut self, name: String, record: Arc<ArtifactRecord>) {
        self.records.insert(name, record);
    }

    pub(crate) fn get_shared(&self, name: &str) -> Option<Arc<ArtifactRecord>> {
        self.records.get(name).cloned()
    }

    /// Borrow a record.
    pub fn get(&self, name: &str) -> Option<&ArtifactRecord> {
        self.records.get(name).map(Arc::as_ref)
    }

    /// Independent copy of a record's value.
    pub fn value(&self, name: &str) -> Option<Value> {
        self.records.get(name).map(|r| r.value.clone())
    }

    /// Remove a record.
    pub fn remove(&mut self, name: &str) -> Option<ArtifactRecord> {
        self.records
            .remove(name)
            .map(|r| Arc::try_unwrap(r).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Whether a record exists.
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Sorted artifact names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace every `@name` string in `input` with a copy of the named value.
    pub fn resolve(&self, input: &Value) -> Result<ResolvedInputs, ArtifactError> {
        let mut referenced = Vec::new();
        let value = self.resolve_value(input, &mut referenced)?;
        Ok(ResolvedInputs { value, referenced })
    }

    fn resolve_value(&self, input: &Value, referenced: &mut Vec<String>) -> Result<Value, ArtifactError> {
        match input {
            Value::String(s) => match reference_name(s) {
                Some(name) => {
                    let value = self
                        .value(name)
                        .ok_or_else(|| ArtifactError::NotFound(name.to_string()))?;
                    if !referenced.iter().any(|r| r == name) {
                        referenced.push(name.to_string());
                    }
                    Ok(value)
                }
                None => Ok(input.clone()),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item, referenced))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    out.insert(key.clone(), self.resolve_value(item, referenced)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// One line per artifact, for prompt construction.
    pub fn summary(&self) -> String {
        self.names()
            .iter()
            .filter_map(|name| self.get(name).map(|r| (name, r)))
            .map(|(name, r)| {
                if r.description.is_empty() {
                    format!("@{} ({})", name, r.artifact_type)
                } else {
                    format!("@{} ({}): {}", name, r.artifact_type, r.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Name referenced by a `@name` string, if it is a reference.
pub fn reference_name(s: &str) -> Option<&str> {
    let name = s.strip_prefix(REFERENCE_PREFIX)?;
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        None
    } else {
        Some(name)
    }
}
