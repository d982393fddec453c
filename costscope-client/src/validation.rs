//! Runtime schema contracts, dispatched by request-path prefix.
//!
//! Contracts are cheap shape checks over the parsed JSON, not full JSON
//! Schema: they exist to catch backend contract drift early in development.
//! A failed contract surfaces as `VALIDATION_ERROR`, which UI layers treat as
//! a non-fatal advisory rather than a hard failure.

use crate::envelope::unwrap_envelope;
use serde_json::Value;
use sha2::{Digest, Sha256};

type CheckFn = Box<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// One registered contract: a path prefix, a human-readable name, a stable
/// hash identifying the contract version, and the check itself.
pub struct SchemaContract {
    prefix: String,
    name: String,
    hash: String,
    check: CheckFn,
}

impl SchemaContract {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Outcome of running one contract against one response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaOutcome {
    pub ok: bool,
    pub schema_hash: String,
    pub message: Option<String>,
}

/// Contract registry with longest-prefix dispatch.
pub struct SchemaRegistry {
    contracts: Vec<SchemaContract>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_default_contracts()
    }
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self {
            contracts: Vec::new(),
        }
    }

    /// Registry covering the known cost-API endpoints.
    pub fn with_default_contracts() -> Self {
        let mut registry = Self::empty();
        registry.register("/costs/daily", "cost-series@v1", |value| {
            check_object_array(value, Some("series"), &[("date", Shape::String), ("amount", Shape::Number)])
        });
        registry.register("/costs/summary", "cost-summary@v1", |value| {
            let payload = unwrap_envelope(value.clone(), Some("summary"));
            check_field(&payload, "total", Shape::Number)
        });
        registry.register("/breakdown", "breakdown@v1", |value| {
            check_object_array(value, Some("rows"), &[("key", Shape::String), ("amount", Shape::Number)])
        });
        registry.register("/alerts", "alerts@v1", |value| {
            check_object_array(value, Some("alerts"), &[("id", Shape::String)])
        });
        registry.register("/providers", "providers@v1", |value| {
            check_object_array(value, Some("providers"), &[("id", Shape::String)])
        });
        registry.register("/datasets", "datasets@v1", |value| {
            check_object_array(value, Some("datasets"), &[("id", Shape::String)])
        });
        registry.register("/datasets/search", "dataset-search@v1", |value| {
            check_object_array(value, Some("datasets"), &[("id", Shape::String)])
        });
        registry.register("/healthz", "health@v1", |value| {
            let payload = unwrap_envelope(value.clone(), None);
            check_field(&payload, "status", Shape::String)
        });
        registry.register("/health", "health@v1", |value| {
            let payload = unwrap_envelope(value.clone(), None);
            check_field(&payload, "status", Shape::String)
        });
        registry
    }

    pub fn register(
        &mut self,
        prefix: impl Into<String>,
        name: impl Into<String>,
        check: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) {
        let prefix = prefix.into();
        let name = name.into();
        let hash = contract_hash(&name, &prefix);
        self.contracts.push(SchemaContract {
            prefix,
            name,
            hash,
            check: Box::new(check),
        });
    }

    /// Resolve the contract for a request path, longest prefix wins. Query
    /// strings are ignored for dispatch.
    pub fn resolve(&self, path: &str) -> Option<&SchemaContract> {
        let bare = path.split('?').next().unwrap_or(path);
        self.contracts
            .iter()
            .filter(|c| bare.starts_with(c.prefix.as_str()))
            .max_by_key(|c| c.prefix.len())
    }

    /// Run the matching contract, if any.
    pub fn validate(&self, path: &str, value: &Value) -> Option<SchemaOutcome> {
        let contract = self.resolve(path)?;
        let result = (contract.check)(value);
        Some(SchemaOutcome {
            ok: result.is_ok(),
            schema_hash: contract.hash.clone(),
            message: result.err(),
        })
    }
}

fn contract_hash(name: &str, prefix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(prefix.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    String,
    Number,
}

fn shape_matches(value: &Value, shape: Shape) -> bool {
    match shape {
        Shape::String => value.is_string(),
        Shape::Number => value.is_number(),
    }
}

fn check_field(value: &Value, field: &str, shape: Shape) -> Result<(), String> {
    match value.get(field) {
        Some(v) if shape_matches(v, shape) => Ok(()),
        Some(_) => Err(format!("field '{}' has the wrong type", field)),
        None => Err(format!("missing field '{}'", field)),
    }
}

fn check_object_array(
    value: &Value,
    field: Option<&str>,
    required: &[(&str, Shape)],
) -> Result<(), String> {
    let payload = unwrap_envelope(value.clone(), field);
    let items = payload
        .as_array()
        .ok_or_else(|| "expected an array payload".to_string())?;
    for (index, item) in items.iter().enumerate() {
        if !item.is_object() {
            return Err(format!("item {} is not an object", index));
        }
        for (name, shape) in required {
            check_field(item, name, *shape).map_err(|e| format!("item {}: {}", index, e))?;
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
