//! Typed CRUD over the wire client: save/get/delete, TTLs, conditional
//! writes, pipelined bulk saves, index lifecycle, and the entry point into
//! the query runtime.

use std::marker::PhantomData;

use serde_json::Value;

use crate::client::RedisClient;
use crate::error::{Error, Result};
use crate::index::{IndexManager, IndexOutcome};
use crate::model::{schema_of, Model};
use crate::query::expr::Expr;
use crate::query::runtime::Query;
use crate::schema::compiler::CompiledSchema;
use crate::schema::fields::StorageLayout;
use crate::value::{decode_hash, decode_json, encode_hash, encode_json};

/// Repository for one model type. Construction compiles (or fetches the
/// cached) schema, so schema errors surface here, never mid-request.
pub struct Repository<M: Model> {
    client: RedisClient,
    schema: &'static CompiledSchema,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for Repository<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            schema: self.schema,
            _marker: PhantomData,
        }
    }
}

impl<M: Model> Repository<M> {
    pub fn new(client: RedisClient) -> Result<Self> {
        let schema = schema_of::<M>()?;
        Ok(Self { client, schema, _marker: PhantomData })
    }

    pub fn schema(&self) -> &'static CompiledSchema {
        self.schema
    }

    pub fn client(&self) -> &RedisClient {
        &self.client
    }

    /// Storage key for a primary key.
    pub fn key(&self, pk: &str) -> String {
        self.schema.key_space.key(pk)
    }

    // ── Index lifecycle ─────────────────────────────────────────────────

    pub async fn ensure_index(&self) -> Result<IndexOutcome> {
        IndexManager::new(&self.client, self.schema).ensure_index().await
    }

    pub async fn drop_index(&self) -> Result<()> {
        IndexManager::new(&self.client, self.schema).drop_index().await
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Save a record, allocating a primary key when the pk field is unset.
    /// The model is updated in place with the allocated key; the pk is also
    /// returned. Saving twice with the same pk overwrites.
    pub async fn save(&self, model: &mut M) -> Result<String> {
        let (pk, tree) = self.prepare(model)?;
        let key = self.key(&pk);
        match self.schema.layout {
            StorageLayout::Hash => {
                let pairs = encode_hash(&self.schema.def, &tree)?;
                self.client.hset(&key, &pairs).await?;
                // Fields that went null were elided from the encoding; an
                // overwrite must not leave their previous values behind.
                let elided = self.elided_fields(&pairs);
                self.client.hdel(&key, &elided).await?;
            }
            StorageLayout::Json => {
                let doc = encode_json(&self.schema.def, tree.clone())?;
                self.client.json_set(&key, &doc).await?;
            }
        }
        self.write_back(model, tree)?;
        tracing::debug!(key = %key, "record saved");
        Ok(pk)
    }

    pub(crate) fn elided_fields(&self, pairs: &[(String, Vec<u8>)]) -> Vec<String> {
        self.schema
            .def
            .fields
            .iter()
            .filter(|f| !pairs.iter().any(|(name, _)| *name == f.name))
            .map(|f| f.name.clone())
            .collect()
    }

    /// Save only when no record exists under the key. `None` means a record
    /// was already present. Documents use the server's `JSON.SET NX`; for
    /// hashes the primary-key field doubles as the creation sentinel.
    pub async fn save_if_absent(&self, model: &mut M) -> Result<Option<String>> {
        let (pk, tree) = self.prepare(model)?;
        let key = self.key(&pk);
        let created = match self.schema.layout {
            StorageLayout::Json => {
                let doc = encode_json(&self.schema.def, tree.clone())?;
                self.client.json_set_cond(&key, &doc, true).await?
            }
            StorageLayout::Hash => {
                let pairs = encode_hash(&self.schema.def, &tree)?;
                let sentinel = pairs
                    .iter()
                    .find(|(name, _)| *name == self.schema.pk_field)
                    .cloned()
                    .ok_or_else(|| Error::Validation("primary key missing from record".into()))?;
                if self.client.hsetnx(&key, &sentinel.0, &sentinel.1).await? {
                    self.client.hset(&key, &pairs).await?;
                    true
                } else {
                    false
                }
            }
        };
        if created {
            self.write_back(model, tree)?;
            Ok(Some(pk))
        } else {
            Ok(None)
        }
    }

    /// Save only when a record already exists under the key.
    pub async fn save_if_present(&self, model: &mut M) -> Result<Option<String>> {
        let (pk, tree) = self.prepare(model)?;
        let key = self.key(&pk);
        let written = match self.schema.layout {
            StorageLayout::Json => {
                let doc = encode_json(&self.schema.def, tree.clone())?;
                self.client.json_set_cond(&key, &doc, false).await?
            }
            StorageLayout::Hash => {
                if self.client.exists(&key).await? {
                    let pairs = encode_hash(&self.schema.def, &tree)?;
                    self.client.hset(&key, &pairs).await?;
                    true
                } else {
                    false
                }
            }
        };
        if written {
            self.write_back(model, tree)?;
            Ok(Some(pk))
        } else {
            Ok(None)
        }
    }

    /// Stage a save onto a caller-provided pipeline; no round trip happens
    /// here. Returns the (possibly allocated) primary key.
    pub fn save_to_pipeline(&self, model: &mut M, pipe: &mut redis::Pipeline) -> Result<String> {
        let (pk, tree) = self.prepare(model)?;
        let key = self.key(&pk);
        match self.schema.layout {
            StorageLayout::Hash => {
                let pairs = encode_hash(&self.schema.def, &tree)?;
                let mut cmd = redis::cmd("HSET");
                cmd.arg(&key);
                for (field, value) in &pairs {
                    cmd.arg(field).arg(&value[..]);
                }
                pipe.add_command(cmd).ignore();
                let elided = self.elided_fields(&pairs);
                if !elided.is_empty() {
                    let mut del = redis::cmd("HDEL");
                    del.arg(&key);
                    for field in &elided {
                        del.arg(field);
                    }
                    pipe.add_command(del).ignore();
                }
            }
            StorageLayout::Json => {
                let doc = encode_json(&self.schema.def, tree.clone())?;
                pipe.cmd("JSON.SET")
                    .arg(&key)
                    .arg("$")
                    .arg(serde_json::to_string(&doc)?)
                    .ignore();
            }
        }
        self.write_back(model, tree)?;
        Ok(pk)
    }

    /// Save a batch of records in a single round trip.
    pub async fn save_many(&self, models: &mut [M]) -> Result<Vec<String>> {
        let mut pipe = redis::pipe();
        let mut pks = Vec::with_capacity(models.len());
        for model in models.iter_mut() {
            pks.push(self.save_to_pipeline(model, &mut pipe)?);
        }
        self.client.run_pipeline(&pipe).await?;
        tracing::debug!(count = pks.len(), "bulk save committed");
        Ok(pks)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub async fn get(&self, pk: &str) -> Result<M> {
        let key = self.key(pk);
        let tree = match self.schema.layout {
            StorageLayout::Hash => {
                let raw = self.client.hgetall(&key).await?;
                if raw.is_empty() {
                    return Err(Error::NotFound { key });
                }
                decode_hash(&self.schema.def, &raw)?
            }
            StorageLayout::Json => match self.client.json_get(&key).await? {
                None => return Err(Error::NotFound { key }),
                Some(doc) => decode_json(&self.schema.def, doc)?,
            },
        };
        serde_json::from_value(tree).map_err(|e| Error::Validation(e.to_string()))
    }

    pub async fn exists(&self, pk: &str) -> Result<bool> {
        self.client.exists(&self.key(pk)).await
    }

    // ── Deletes & TTLs ──────────────────────────────────────────────────

    /// Delete by primary key; returns whether a record was removed.
    pub async fn delete(&self, pk: &str) -> Result<bool> {
        let key = self.key(pk);
        let removed = match self.schema.layout {
            StorageLayout::Hash => self.client.del(&key).await?,
            StorageLayout::Json => self.client.json_del(&key).await?,
        };
        Ok(removed > 0)
    }

    /// Stage a delete onto a caller-provided pipeline.
    pub fn delete_to_pipeline(&self, pk: &str, pipe: &mut redis::Pipeline) {
        let key = self.key(pk);
        match self.schema.layout {
            StorageLayout::Hash => pipe.cmd("DEL").arg(&key).ignore(),
            StorageLayout::Json => pipe.cmd("JSON.DEL").arg(&key).ignore(),
        };
    }

    pub async fn expire(&self, pk: &str, seconds: i64) -> Result<bool> {
        self.client.expire(&self.key(pk), seconds).await
    }

    /// Field-level TTL for hash records; no-op (false) on servers without
    /// HEXPIRE.
    pub async fn expire_field(&self, pk: &str, field: &str, seconds: i64) -> Result<bool> {
        self.client.hexpire(&self.key(pk), field, seconds).await
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Start a query from any number of expressions; they conjoin.
    pub fn find(&self, exprs: impl IntoIterator<Item = Expr>) -> Query<'_, M> {
        Query::new(self, Expr::and_all(exprs))
    }

    /// Query matching every record of the model.
    pub fn find_all(&self) -> Query<'_, M> {
        Query::new(self, Expr::All)
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Serialize the model, allocating a primary key when the pk field is
    /// missing or empty. Returns the pk and the serialized tree (with the
    /// pk filled in).
    fn prepare(&self, model: &M) -> Result<(String, Value)> {
        let mut tree = serde_json::to_value(model)?;
        let map = tree
            .as_object_mut()
            .ok_or_else(|| Error::Validation("record did not serialize to an object".into()))?;
        let pk = match map.get(&self.schema.pk_field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => {
                let pk = self.schema.key_space.allocate_pk();
                map.insert(self.schema.pk_field.clone(), Value::String(pk.clone()));
                pk
            }
        };
        Ok((pk, tree))
    }

    /// Push the (possibly pk-amended) tree back into the caller's model.
    fn write_back(&self, model: &mut M, tree: Value) -> Result<()> {
        *model = serde_json::from_value(tree).map_err(|e| Error::Validation(e.to_string()))?;
        Ok(())
    }
}
