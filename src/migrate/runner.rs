//! Data-migration execution engine: dependency-ordered runs over SCAN
//! batches with progress checkpointing, resume, bounded error tolerance,
//! and dry-run support.

use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::client::RedisClient;
use crate::error::{Error, Result};
use crate::migrate::data::DataMigrationRegistry;
use crate::migrate::RESERVED_PREFIX;
use crate::model::registered_schemas;
use crate::schema::compiler::CompiledSchema;

/// What to do when transforming one key fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the migration immediately.
    Fail,
    /// Skip the key silently.
    Skip,
    /// Skip the key, log it, and count it as errored.
    LogAndSkip,
    /// Let the transform substitute its designated default value; keys that
    /// still fail are treated like `LogAndSkip`.
    UseDefault,
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail" => Ok(FailurePolicy::Fail),
            "skip" => Ok(FailurePolicy::Skip),
            "log_and_skip" | "log-and-skip" => Ok(FailurePolicy::LogAndSkip),
            "default" => Ok(FailurePolicy::UseDefault),
            other => Err(Error::Config(format!("unknown failure mode '{other}'"))),
        }
    }
}

/// Per-run knobs; defaults come from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct DataMigrationOptions {
    pub dry_run: bool,
    pub batch_size: usize,
    pub progress_save_interval: usize,
    pub failure_policy: FailurePolicy,
    /// Abort once this many keys have errored; `None` means unlimited.
    pub max_errors: Option<u64>,
    /// Process at most this many keys per migration.
    pub limit: Option<u64>,
}

impl DataMigrationOptions {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            dry_run: false,
            batch_size: config.migration_batch_size,
            progress_save_interval: config.progress_save_interval,
            failure_policy: FailurePolicy::Fail,
            max_errors: None,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationCounts {
    pub seen: u64,
    pub ok: u64,
    pub skipped: u64,
    pub errored: u64,
}

/// Persistent cursor enabling resume after interruption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressCheckpoint {
    pub migration_id: String,
    pub cursor: u64,
    pub last_key: Option<String>,
    pub counts: MigrationCounts,
}

/// Whether a transform changed the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Changed,
    Unchanged,
}

pub(crate) fn applied_set_key() -> String {
    format!("{RESERVED_PREFIX}:migrations:applied")
}

pub(crate) fn progress_key(migration_id: &str) -> String {
    format!("{RESERVED_PREFIX}:migrations:progress:{migration_id}")
}

/// Everything a running migration sees: the client, the run options, the
/// registered schemas, and the shared counters.
pub struct MigrationContext {
    client: RedisClient,
    options: DataMigrationOptions,
    schemas: Vec<&'static CompiledSchema>,
    counts: Mutex<MigrationCounts>,
}

impl MigrationContext {
    pub fn new(client: RedisClient, options: DataMigrationOptions) -> Self {
        Self {
            client,
            options,
            schemas: registered_schemas(),
            counts: Mutex::new(MigrationCounts::default()),
        }
    }

    pub fn client(&self) -> &RedisClient {
        &self.client
    }

    pub fn options(&self) -> &DataMigrationOptions {
        &self.options
    }

    pub fn dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Registered model schemas, for migrations that walk every model.
    pub fn schemas(&self) -> &[&'static CompiledSchema] {
        &self.schemas
    }

    pub fn counts(&self) -> MigrationCounts {
        self.counts.lock().unwrap().clone()
    }

    /// Iterate a key space in SCAN batches, applying `transform` to each
    /// key. Progress is checkpointed every `progress_save_interval` keys
    /// (after the batch holding them commits), so an interrupted run
    /// resumes from the stored cursor instead of the beginning.
    pub async fn for_each_key<F, Fut>(
        &self,
        migration_id: &str,
        pattern: &str,
        mut transform: F,
    ) -> Result<()>
    where
        F: FnMut(String) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<KeyAction>>,
    {
        let mut cursor = 0u64;
        if let Some(checkpoint) = self.load_progress(migration_id).await? {
            cursor = checkpoint.cursor;
            *self.counts.lock().unwrap() = checkpoint.counts.clone();
            tracing::info!(
                migration = migration_id,
                cursor,
                seen = checkpoint.counts.seen,
                "resuming from checkpoint"
            );
        }

        let mut since_save = 0usize;
        let mut last_key: Option<String> = None;
        loop {
            let (next, keys) = self
                .client
                .scan_page(cursor, pattern, self.options.batch_size)
                .await?;
            for key in keys {
                if let Some(limit) = self.options.limit {
                    if self.counts.lock().unwrap().seen >= limit {
                        tracing::info!(migration = migration_id, limit, "key limit reached");
                        self.save_checkpoint(migration_id, cursor, last_key.as_deref()).await?;
                        return Ok(());
                    }
                }
                self.counts.lock().unwrap().seen += 1;
                match transform(key.clone()).await {
                    Ok(KeyAction::Changed) => self.counts.lock().unwrap().ok += 1,
                    Ok(KeyAction::Unchanged) => self.counts.lock().unwrap().skipped += 1,
                    Err(e) => self.record_failure(migration_id, &key, e)?,
                }
                last_key = Some(key);
                since_save += 1;
            }
            // The batch is committed; a checkpoint here is safe to resume.
            if since_save >= self.options.progress_save_interval {
                self.save_checkpoint(migration_id, next, last_key.as_deref()).await?;
                since_save = 0;
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        self.save_checkpoint(migration_id, 0, last_key.as_deref()).await?;
        Ok(())
    }

    fn record_failure(&self, migration_id: &str, key: &str, err: anyhow::Error) -> Result<()> {
        match self.options.failure_policy {
            FailurePolicy::Fail => {
                return Err(Error::Migration(format!(
                    "migration '{migration_id}' failed on key '{key}': {err}"
                )))
            }
            FailurePolicy::Skip => {
                self.counts.lock().unwrap().skipped += 1;
            }
            FailurePolicy::LogAndSkip | FailurePolicy::UseDefault => {
                tracing::warn!(migration = migration_id, key, error = %err, "key skipped");
                self.counts.lock().unwrap().errored += 1;
            }
        }
        let errored = self.counts.lock().unwrap().errored;
        if let Some(max) = self.options.max_errors {
            if errored > max {
                return Err(Error::Migration(format!(
                    "migration '{migration_id}' exceeded max_errors ({max})"
                )));
            }
        }
        Ok(())
    }

    async fn save_checkpoint(
        &self,
        migration_id: &str,
        cursor: u64,
        last_key: Option<&str>,
    ) -> Result<()> {
        if self.options.dry_run {
            return Ok(());
        }
        let checkpoint = ProgressCheckpoint {
            migration_id: migration_id.to_string(),
            cursor,
            last_key: last_key.map(|k| k.to_string()),
            counts: self.counts(),
        };
        self.client
            .set_string(&progress_key(migration_id), &serde_json::to_string(&checkpoint)?)
            .await
    }

    pub async fn load_progress(&self, migration_id: &str) -> Result<Option<ProgressCheckpoint>> {
        match self.client.get_string(&progress_key(migration_id)).await? {
            None => Ok(None),
            Some(text) => Ok(Some(serde_json::from_str(&text).map_err(|e| {
                Error::Migration(format!("corrupt progress checkpoint for '{migration_id}': {e}"))
            })?)),
        }
    }
}

/// Status row for one data migration.
#[derive(Debug, Clone)]
pub struct DataMigrationStatus {
    pub id: String,
    pub description: String,
    pub applied: bool,
    pub reversible: bool,
    pub depends_on: Vec<String>,
}

/// Result of one applied migration.
#[derive(Debug, Clone)]
pub struct DataMigrationResult {
    pub id: String,
    pub counts: MigrationCounts,
}

/// Drives registered data migrations against the server.
pub struct DataMigrationRunner {
    client: RedisClient,
    registry: DataMigrationRegistry,
    options: DataMigrationOptions,
}

impl DataMigrationRunner {
    pub fn new(client: RedisClient, registry: DataMigrationRegistry) -> Self {
        let options = DataMigrationOptions::from_config(client.config());
        Self { client, registry, options }
    }

    pub fn with_options(mut self, options: DataMigrationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &DataMigrationRegistry {
        &self.registry
    }

    pub async fn applied_ids(&self) -> Result<Vec<String>> {
        self.client.smembers(&applied_set_key()).await
    }

    pub async fn is_applied(&self, id: &str) -> Result<bool> {
        self.client.sismember(&applied_set_key(), id).await
    }

    pub async fn status(&self) -> Result<Vec<DataMigrationStatus>> {
        let applied = self.applied_ids().await?;
        let mut statuses = Vec::with_capacity(self.registry.count());
        for migration in self.registry.topo_order()? {
            statuses.push(DataMigrationStatus {
                id: migration.id().to_string(),
                description: migration.description().to_string(),
                applied: applied.iter().any(|a| a == migration.id()),
                reversible: migration.reversible(),
                depends_on: migration.depends_on().iter().map(|d| d.to_string()).collect(),
            });
        }
        Ok(statuses)
    }

    /// Apply every pending migration in dependency order. Migrations that
    /// completed in an earlier run stay applied even when a later one
    /// fails; rerunning resumes from checkpoints.
    pub async fn run(&self) -> Result<Vec<DataMigrationResult>> {
        let applied = self.applied_ids().await?;
        let mut results = Vec::new();
        for migration in self.registry.topo_order()? {
            let id = migration.id().to_string();
            if applied.iter().any(|a| a == &id) {
                tracing::debug!(migration = %id, "already applied");
                continue;
            }
            tracing::info!(migration = %id, dry_run = self.options.dry_run, "applying data migration");
            let ctx = MigrationContext::new(self.client.clone(), self.options.clone());
            migration
                .up(&ctx)
                .await
                .map_err(|e| Error::Migration(format!("migration '{id}' failed: {e}")))?;
            let counts = ctx.counts();
            tracing::info!(
                migration = %id,
                seen = counts.seen,
                ok = counts.ok,
                skipped = counts.skipped,
                errored = counts.errored,
                "data migration finished"
            );
            if !self.options.dry_run {
                self.client.sadd(&applied_set_key(), &id).await?;
                self.clear_progress(&id).await?;
            }
            results.push(DataMigrationResult { id, counts });
        }
        Ok(results)
    }

    /// Roll one migration back. Refuses when the migration is not applied,
    /// not reversible, or still depended on by another applied migration.
    pub async fn rollback(&self, id: &str) -> Result<()> {
        let migration = self
            .registry
            .get(id)
            .ok_or_else(|| Error::Migration(format!("no data migration with id '{id}'")))?;
        if !self.is_applied(id).await? {
            return Err(Error::Migration(format!("migration '{id}' is not applied")));
        }
        if !migration.reversible() {
            return Err(Error::Migration(format!("migration '{id}' is not reversible")));
        }
        let applied = self.applied_ids().await?;
        for other in self.registry.topo_order()? {
            if applied.iter().any(|a| a == other.id())
                && other.depends_on().contains(&id)
            {
                return Err(Error::Migration(format!(
                    "cannot roll back '{id}': applied migration '{}' depends on it",
                    other.id()
                )));
            }
        }
        let ctx = MigrationContext::new(self.client.clone(), self.options.clone());
        migration
            .down(&ctx)
            .await
            .map_err(|e| Error::Migration(format!("rollback of '{id}' failed: {e}")))?;
        self.client.srem(&applied_set_key(), id).await?;
        tracing::info!(migration = id, "data migration rolled back");
        Ok(())
    }

    pub async fn progress(&self, id: &str) -> Result<Option<ProgressCheckpoint>> {
        let ctx = MigrationContext::new(self.client.clone(), self.options.clone());
        ctx.load_progress(id).await
    }

    pub async fn clear_progress(&self, id: &str) -> Result<()> {
        self.client.del(&progress_key(id)).await?;
        Ok(())
    }

    /// Consistency check between the applied set and the registry: applied
    /// ids no code knows about usually mean a missing registration.
    pub async fn verify(&self) -> Result<Vec<String>> {
        let known = self.registry.ids();
        let unknown: Vec<String> = self
            .applied_ids()
            .await?
            .into_iter()
            .filter(|id| !known.contains(&id.as_str()))
            .collect();
        Ok(unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parses() {
        assert_eq!("fail".parse::<FailurePolicy>().unwrap(), FailurePolicy::Fail);
        assert_eq!("skip".parse::<FailurePolicy>().unwrap(), FailurePolicy::Skip);
        assert_eq!(
            "log_and_skip".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::LogAndSkip
        );
        assert_eq!("default".parse::<FailurePolicy>().unwrap(), FailurePolicy::UseDefault);
        assert!("explode".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn reserved_keys_are_shaped() {
        assert_eq!(applied_set_key(), "redis_om:migrations:applied");
        assert_eq!(
            progress_key("datetime_to_epoch"),
            "redis_om:migrations:progress:datetime_to_epoch"
        );
    }

    #[test]
    fn checkpoint_round_trips() {
        let checkpoint = ProgressCheckpoint {
            migration_id: "m1".into(),
            cursor: 42,
            last_key: Some("app.Customer:01A".into()),
            counts: MigrationCounts { seen: 100, ok: 90, skipped: 8, errored: 2 },
        };
        let text = serde_json::to_string(&checkpoint).unwrap();
        let back: ProgressCheckpoint = serde_json::from_str(&text).unwrap();
        assert_eq!(back.cursor, 42);
        assert_eq!(back.counts, checkpoint.counts);
    }
}
