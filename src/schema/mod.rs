use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tracing::info;

/// Inferred JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array { items: Box<FieldType> },
    Object { properties: BTreeMap<String, FieldType> },
    /// Values of incompatible types were seen at the same location
    Mixed { variants: BTreeSet<String> },
}

impl FieldType {
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => FieldType::Null,
            Value::Bool(_) => FieldType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Integer,
            Value::Number(_) => FieldType::Number,
            Value::String(_) => FieldType::String,
            Value::Array(items) => FieldType::Array {
                items: Box::new(
                    items
                        .iter()
                        .map(FieldType::infer)
                        .reduce(FieldType::merge)
                        .unwrap_or(FieldType::Null),
                ),
            },
            Value::Object(map) => FieldType::Object {
                properties: map
                    .iter()
                    .map(|(k, v)| (k.clone(), FieldType::infer(v)))
                    .collect(),
            },
        }
    }

    /// Widen two shapes into one that describes both
    pub fn merge(self, other: FieldType) -> FieldType {
        use FieldType::*;

        match (self, other) {
            (a, b) if a == b => a,
            (Null, b) => b,
            (a, Null) => a,
            (Integer, Number) | (Number, Integer) => Number,
            (Array { items: a }, Array { items: b }) => Array {
                items: Box::new(a.merge(*b)),
            },
            (Object { properties: mut a }, Object { properties: b }) => {
                for (key, b_type) in b {
                    let merged = match a.remove(&key) {
                        Some(a_type) => a_type.merge(b_type),
                        None => b_type,
                    };
                    a.insert(key, merged);
                }
                Object { properties: a }
            }
            (a, b) => {
                let mut variants = a.variant_names();
                variants.extend(b.variant_names());
                Mixed { variants }
            }
        }
    }

    fn variant_names(&self) -> BTreeSet<String> {
        match self {
            FieldType::Mixed { variants } => variants.clone(),
            other => BTreeSet::from([other.name().to_string()]),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Null => "null",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Array { .. } => "array",
            FieldType::Object { .. } => "object",
            FieldType::Mixed { .. } => "mixed",
        }
    }

    /// Hex sha256 of the canonical JSON form
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(&canonical))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredSchema {
    pub source: String,
    pub detail_type: String,
    /// Starts at 1, bumped whenever the merged shape changes
    pub version: u32,
    pub fingerprint: String,
    pub schema: FieldType,
    pub event_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Schema discovery for event details, keyed by `(source, detail-type)`
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: Mutex<BTreeMap<(String, String), DiscoveredSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event detail into the registry. Returns the new version when
    /// the shape changed (including the first sighting).
    pub fn observe(
        &self,
        source: &str,
        detail_type: &str,
        detail: &Value,
        seen_at: DateTime<Utc>,
    ) -> Option<u32> {
        if source.is_empty() || detail_type.is_empty() {
            return None;
        }

        let inferred = FieldType::infer(detail);
        let mut schemas = self.schemas.lock().unwrap_or_else(|e| e.into_inner());
        let key = (source.to_string(), detail_type.to_string());

        let Some(existing) = schemas.get_mut(&key) else {
            let fingerprint = inferred.fingerprint();
            info!(
                source = source,
                detail_type = detail_type,
                fingerprint = %fingerprint,
                "Discovered new event schema"
            );
            schemas.insert(
                key,
                DiscoveredSchema {
                    source: source.to_string(),
                    detail_type: detail_type.to_string(),
                    version: 1,
                    fingerprint,
                    schema: inferred,
                    event_count: 1,
                    first_seen: seen_at,
                    last_seen: seen_at,
                },
            );
            return Some(1);
        };

        existing.event_count += 1;
        existing.last_seen = seen_at;

        let merged = existing.schema.clone().merge(inferred);
        if merged == existing.schema {
            return None;
        }

        existing.version += 1;
        existing.fingerprint = merged.fingerprint();
        existing.schema = merged;
        info!(
            source = source,
            detail_type = detail_type,
            version = existing.version,
            fingerprint = %existing.fingerprint,
            "Event schema changed"
        );
        Some(existing.version)
    }

    pub fn get(&self, source: &str, detail_type: &str) -> Option<DiscoveredSchema> {
        self.schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(source.to_string(), detail_type.to_string()))
            .cloned()
    }

    pub fn list(&self) -> Vec<DiscoveredSchema> {
        self.schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}
