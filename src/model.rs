//! Model contract and registry. A model implementation emits its record
//! definition up front; registration compiles it once, eagerly surfacing
//! every schema error, and caches the compiled schema for the lifetime of
//! the process. Registered schemas feed the migrators.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::schema::compiler::CompiledSchema;
use crate::schema::fields::RecordDef;

/// A typed record mapped to a single server-side key.
///
/// Implementations declare their shape through [`Model::record_def`]; the
/// serde contract carries the values. Validation of scalar values is
/// serde's business, surfaced as `Error::Validation`.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The declared record type: fields, index options, and meta.
    fn record_def() -> RecordDef;

    /// Default model key prefix: the module-qualified type name.
    fn model_prefix() -> String {
        std::any::type_name::<Self>().replace("::", ".")
    }
}

static REGISTRY: Lazy<RwLock<HashMap<TypeId, &'static CompiledSchema>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Compile and cache the schema for a model type. The first call for each
/// type performs the compilation (and raises eager schema errors); later
/// calls return the cached schema.
pub fn schema_of<M: Model>() -> Result<&'static CompiledSchema> {
    if let Some(schema) = REGISTRY.read().unwrap().get(&TypeId::of::<M>()) {
        return Ok(schema);
    }
    let compiled = CompiledSchema::compile(M::record_def(), &M::model_prefix())?;
    let mut registry = REGISTRY.write().unwrap();
    // Another thread may have won the race; keep the first entry.
    let entry: &'static CompiledSchema = *registry
        .entry(TypeId::of::<M>())
        .or_insert_with(|| Box::leak(Box::new(compiled)));
    tracing::debug!(model = %entry.model, "registered model schema");
    Ok(entry)
}

/// Explicit registration, for call sites that want schema errors at startup
/// rather than on first use.
pub fn register<M: Model>() -> Result<&'static CompiledSchema> {
    schema_of::<M>()
}

/// Every schema registered so far, in no particular order. The migrators
/// iterate this to diff definitions against the server.
pub fn registered_schemas() -> Vec<&'static CompiledSchema> {
    REGISTRY.read().unwrap().values().copied().collect()
}
