//! File-based schema migrations: snapshot the compiled index definition of
//! every registered model, diff it against the file series and the
//! server-recorded fingerprint, and apply or roll back index rebuilds.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::client::RedisClient;
use crate::error::{Error, Result};
use crate::index::{create_index_args_from_parts, fingerprint};
use crate::model::registered_schemas;
use crate::schema::compiler::{CompiledSchema, IndexedField};
use crate::schema::fields::StorageLayout;

/// One schema migration snapshot, serialized as JSON on disk. Both
/// directions are captured so rollback can rebuild the previous index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMigrationFile {
    pub id: String,
    pub model: String,
    pub index_name: String,
    pub key_prefix: String,
    pub layout: StorageLayout,
    pub previous_fingerprint: Option<String>,
    pub new_fingerprint: String,
    pub previous_fields: Option<Vec<IndexedField>>,
    pub new_fields: Vec<IndexedField>,
    pub created_at: DateTime<Utc>,
}

/// Per-model drift state reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaState {
    UpToDate,
    /// No index recorded on the server yet.
    PendingCreate,
    /// Server fingerprint differs from the in-memory definition.
    PendingDrift,
    /// A migration file exists for a model that is no longer registered.
    OrphanOnServer,
}

#[derive(Debug, Clone)]
pub struct SchemaStatus {
    pub model: String,
    pub state: SchemaState,
    pub current_fingerprint: Option<String>,
    pub file_fingerprint: Option<String>,
    pub server_fingerprint: Option<String>,
}

#[derive(Debug, Default)]
pub struct SchemaRunReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

static SLUG_CLEANER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]+").unwrap());

fn slugify(raw: &str) -> String {
    SLUG_CLEANER
        .replace_all(&raw.trim().to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

/// The on-disk file series under `<migrations_dir>/schema-migrations/`.
/// Pure filesystem concerns; the migrator composes this with the client.
pub struct SchemaFileStore {
    dir: PathBuf,
}

impl SchemaFileStore {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self { dir: migrations_dir.into() }
    }

    fn schema_dir(&self) -> PathBuf {
        self.dir.join("schema-migrations")
    }

    /// Load every migration file in application order. File ids carry a
    /// second-resolution timestamp, so ties are broken by the precise
    /// creation time recorded inside the file.
    pub fn load(&self) -> Result<Vec<SchemaMigrationFile>> {
        let dir = self.schema_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json") != Some(true) {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let file: SchemaMigrationFile = serde_json::from_str(&text).map_err(|e| {
                Error::Migration(format!("unreadable migration file {}: {e}", path.display()))
            })?;
            files.push(file);
        }
        files.sort_by(|a, b| (&a.created_at, &a.id).cmp(&(&b.created_at, &b.id)));
        Ok(files)
    }

    /// Latest snapshot per model, in file order.
    pub fn heads(&self) -> Result<Vec<SchemaMigrationFile>> {
        let mut heads: Vec<SchemaMigrationFile> = Vec::new();
        for file in self.load()? {
            if let Some(existing) = heads.iter_mut().find(|h| h.model == file.model) {
                *existing = file;
            } else {
                heads.push(file);
            }
        }
        Ok(heads)
    }

    /// Write one snapshot file per schema whose definition differs from the
    /// head of its series. Returns the created paths.
    pub fn write_snapshots(
        &self,
        slug: &str,
        schemas: &[&CompiledSchema],
    ) -> Result<Vec<PathBuf>> {
        let slug = slugify(slug);
        if slug.is_empty() {
            return Err(Error::Migration("migration name produced an empty slug".into()));
        }
        let heads = self.heads()?;
        let dir = self.schema_dir();
        fs::create_dir_all(&dir)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let mut created = Vec::new();
        for schema in schemas {
            let current = fingerprint(schema);
            let head = heads.iter().find(|h| h.model == schema.model);
            if head.map(|h| h.new_fingerprint.as_str()) == Some(current.as_str()) {
                continue;
            }
            let file = snapshot(schema, head, &current, format!("{stamp}_{slug}"));
            let path = dir.join(format!("{}_{}.json", file.id, slugify(&schema.model)));
            fs::write(&path, serde_json::to_string_pretty(&file)?)?;
            tracing::info!(model = %schema.model, path = %path.display(), "schema migration written");
            created.push(path);
        }
        Ok(created)
    }
}

/// Schema migrator over one migrations directory.
pub struct SchemaMigrator {
    client: RedisClient,
    store: SchemaFileStore,
}

impl SchemaMigrator {
    pub fn new(client: RedisClient) -> Self {
        let store = SchemaFileStore::new(client.config().migrations_dir.clone());
        Self { client, store }
    }

    pub fn with_dir(client: RedisClient, dir: impl Into<PathBuf>) -> Self {
        Self { client, store: SchemaFileStore::new(dir) }
    }

    pub fn load_files(&self) -> Result<Vec<SchemaMigrationFile>> {
        self.store.load()
    }

    fn file_heads(&self) -> Result<Vec<SchemaMigrationFile>> {
        self.store.heads()
    }

    /// Compare every registered model against the file series and the
    /// server-recorded fingerprint.
    pub async fn status(&self) -> Result<Vec<SchemaStatus>> {
        let heads = self.file_heads()?;
        let schemas = registered_schemas();
        let mut statuses = Vec::with_capacity(schemas.len());
        for schema in &schemas {
            let current = fingerprint(schema);
            let server = self
                .client
                .get_string(&schema.key_space.schema_hash_key())
                .await?;
            let file = heads
                .iter()
                .find(|h| h.model == schema.model)
                .map(|h| h.new_fingerprint.clone());
            let state = match server.as_deref() {
                None => SchemaState::PendingCreate,
                Some(fp) if fp == current => SchemaState::UpToDate,
                Some(_) => SchemaState::PendingDrift,
            };
            statuses.push(SchemaStatus {
                model: schema.model.clone(),
                state,
                current_fingerprint: Some(current),
                file_fingerprint: file,
                server_fingerprint: server,
            });
        }
        // Snapshots for models no longer registered: index data likely still
        // lives on the server with nothing owning it.
        for head in heads {
            if !schemas.iter().any(|s| s.model == head.model) {
                statuses.push(SchemaStatus {
                    model: head.model.clone(),
                    state: SchemaState::OrphanOnServer,
                    current_fingerprint: None,
                    file_fingerprint: Some(head.new_fingerprint.clone()),
                    server_fingerprint: None,
                });
            }
        }
        Ok(statuses)
    }

    /// Write one snapshot file per registered model whose definition
    /// differs from the head of its file series. Returns the created paths.
    pub fn create(&self, slug: &str) -> Result<Vec<PathBuf>> {
        self.store.write_snapshots(slug, &registered_schemas())
    }

    /// Per-model set of applied schema-migration ids.
    fn applied_key(key_prefix: &str) -> String {
        format!(
            "{}:migrations:schema-applied:{}",
            crate::migrate::RESERVED_PREFIX,
            key_prefix.trim_end_matches(':')
        )
    }

    /// Apply un-applied migration files in id order: drop the prior index,
    /// create the new one, record the fingerprint, and mark the file
    /// applied. A file whose target fingerprint already sits on the server
    /// is marked applied without a rebuild, so a crash between FT.CREATE
    /// and the record step heals on rerun.
    pub async fn run(&self) -> Result<SchemaRunReport> {
        self.client.config().check_database_number()?;
        let mut report = SchemaRunReport::default();
        for file in self.load_files()? {
            let applied_key = Self::applied_key(&file.key_prefix);
            if self.client.sismember(&applied_key, &file.id).await? {
                report.skipped.push(file.id.clone());
                continue;
            }
            let hash_key = format!("{}hash", file.key_prefix);
            let server = self.client.get_string(&hash_key).await?;
            if server.as_deref() != Some(file.new_fingerprint.as_str()) {
                self.apply(
                    &file.index_name,
                    file.layout,
                    &file.key_prefix,
                    &file.new_fields,
                    &hash_key,
                    &file.new_fingerprint,
                )
                .await
                .map_err(|e| Error::Migration(format!("migration {} failed: {e}", file.id)))?;
            }
            self.client.sadd(&applied_key, &file.id).await?;
            tracing::info!(id = %file.id, model = %file.model, "schema migration applied");
            report.applied.push(file.id);
        }
        Ok(report)
    }

    /// Rebuild the previous definition recorded in a migration file.
    pub async fn rollback(&self, id: &str) -> Result<()> {
        let file = self
            .load_files()?
            .into_iter()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::Migration(format!("no schema migration with id '{id}'")))?;
        let hash_key = format!("{}hash", file.key_prefix);
        match (&file.previous_fields, &file.previous_fingerprint) {
            (Some(fields), Some(fp)) => {
                self.apply(&file.index_name, file.layout, &file.key_prefix, fields, &hash_key, fp)
                    .await?;
            }
            // First migration for the model: rolling back means removing.
            _ => {
                self.client.ft_dropindex(&file.index_name).await?;
                self.client.del(&hash_key).await?;
            }
        }
        self.client
            .srem(&Self::applied_key(&file.key_prefix), &file.id)
            .await?;
        tracing::info!(id = %file.id, "schema migration rolled back");
        Ok(())
    }

    async fn apply(
        &self,
        index_name: &str,
        layout: StorageLayout,
        key_prefix: &str,
        fields: &[IndexedField],
        hash_key: &str,
        new_fingerprint: &str,
    ) -> Result<()> {
        self.client.ft_dropindex(index_name).await?;
        let args = create_index_args_from_parts(index_name, layout, key_prefix, fields);
        self.client.ft_create(&args).await?;
        self.client.set_string(hash_key, new_fingerprint).await?;
        Ok(())
    }
}

fn snapshot(
    schema: &CompiledSchema,
    head: Option<&SchemaMigrationFile>,
    current_fingerprint: &str,
    id: String,
) -> SchemaMigrationFile {
    SchemaMigrationFile {
        id,
        model: schema.model.clone(),
        index_name: schema.key_space.index_name(),
        key_prefix: schema.key_space.index_prefix(),
        layout: schema.layout,
        previous_fingerprint: head.map(|h| h.new_fingerprint.clone()),
        new_fingerprint: current_fingerprint.to_string(),
        previous_fields: head.map(|h| h.new_fields.clone()),
        new_fields: schema.fields.clone(),
        created_at: Utc::now(),
    }
}
