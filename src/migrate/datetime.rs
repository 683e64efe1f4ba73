//! Built-in datetime transition: rewrites datetime fields stored as
//! ISO-8601 strings into their numeric seconds-since-epoch encoding, plus
//! the FT.INFO diagnostic that detects indexes still carrying the
//! pre-transition TAG kind for datetime fields.

use async_trait::async_trait;
use redis::Value as RedisValue;
use serde_json::Value;

use crate::client::RedisClient;
use crate::error::{Error, Result};
use crate::migrate::data::DataMigration;
use crate::migrate::runner::{FailurePolicy, KeyAction, MigrationContext};
use crate::model::registered_schemas;
use crate::schema::compiler::{CompiledSchema, DeclaredType, FieldKind};
use crate::schema::fields::{FieldType, RecordDef, StorageLayout};
use crate::value::{datetime_to_epoch, format_float, parse_datetime_string};

/// Substituted for unparseable values under the `default` failure policy.
const DEFAULT_EPOCH: f64 = 0.0;

/// Dotted paths of every datetime/date field in a definition, embedded
/// records included.
fn datetime_paths(def: &RecordDef) -> Vec<String> {
    fn walk(def: &RecordDef, prefix: &str, out: &mut Vec<String>) {
        for field in &def.fields {
            let path = if prefix.is_empty() {
                field.name.clone()
            } else {
                format!("{prefix}.{}", field.name)
            };
            match field.field_type.unwrap_optional() {
                FieldType::DateTime | FieldType::Date => out.push(path),
                FieldType::Embedded(sub) => walk(sub, &path, out),
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(def, "", &mut out);
    out
}

/// Convert one stored datetime value to its numeric encoding.
/// `None` means the value is already numeric (nothing to do).
fn to_epoch(raw: &str, policy: FailurePolicy) -> anyhow::Result<Option<f64>> {
    if raw.parse::<f64>().is_ok() {
        return Ok(None);
    }
    match parse_datetime_string(raw) {
        Ok(dt) => Ok(Some(datetime_to_epoch(&dt))),
        Err(_) if policy == FailurePolicy::UseDefault => Ok(Some(DEFAULT_EPOCH)),
        Err(e) => Err(anyhow::anyhow!("unparseable datetime {raw:?}: {e}")),
    }
}

/// The datetime encoding transition. Idempotent: numeric values are left
/// untouched, so rerunning (or resuming) converges.
pub struct DatetimeTransition;

#[async_trait]
impl DataMigration for DatetimeTransition {
    fn id(&self) -> &str {
        "datetime_to_epoch"
    }

    fn description(&self) -> &str {
        "rewrite ISO-8601 datetime fields as numeric seconds since epoch"
    }

    async fn up(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        for schema in ctx.schemas() {
            let paths = datetime_paths(&schema.def);
            if paths.is_empty() {
                continue;
            }
            let pattern = schema.key_space.all_keys_pattern();
            let hash_key = schema.key_space.schema_hash_key();
            tracing::info!(model = %schema.model, pattern = %pattern, "converting datetime fields");
            let client = ctx.client().clone();
            let policy = ctx.options().failure_policy;
            let dry_run = ctx.dry_run();
            let layout = schema.layout;
            let paths = &paths;
            let hash_key = &hash_key;
            ctx.for_each_key(self.id(), &pattern, |key| {
                let client = client.clone();
                async move {
                    // The fingerprint key lives under the model prefix too.
                    if &key == hash_key {
                        return Ok(KeyAction::Unchanged);
                    }
                    match layout {
                        StorageLayout::Hash => {
                            convert_hash_record(&client, &key, paths, policy, dry_run).await
                        }
                        StorageLayout::Json => {
                            convert_json_record(&client, &key, paths, policy, dry_run).await
                        }
                    }
                }
            })
            .await?;
        }
        Ok(())
    }
}

async fn convert_hash_record(
    client: &RedisClient,
    key: &str,
    paths: &[String],
    policy: FailurePolicy,
    dry_run: bool,
) -> anyhow::Result<KeyAction> {
    let raw = client.hgetall(key).await?;
    let mut updates: Vec<(String, Vec<u8>)> = Vec::new();
    for path in paths {
        // Hash layouts are flat; nested paths cannot occur.
        let Some(bytes) = raw.get(path) else { continue };
        let text = String::from_utf8_lossy(bytes);
        if let Some(epoch) = to_epoch(&text, policy)? {
            updates.push((path.clone(), format_float(epoch).into_bytes()));
        }
    }
    if updates.is_empty() {
        return Ok(KeyAction::Unchanged);
    }
    if !dry_run {
        client.hset(key, &updates).await?;
    }
    Ok(KeyAction::Changed)
}

async fn convert_json_record(
    client: &RedisClient,
    key: &str,
    paths: &[String],
    policy: FailurePolicy,
    dry_run: bool,
) -> anyhow::Result<KeyAction> {
    let Some(mut doc) = client.json_get(key).await? else {
        return Ok(KeyAction::Unchanged);
    };
    let mut changed = false;
    for path in paths {
        changed |= convert_json_path(&mut doc, path, policy)?;
    }
    if !changed {
        return Ok(KeyAction::Unchanged);
    }
    if !dry_run {
        client.json_set(key, &doc).await?;
    }
    Ok(KeyAction::Changed)
}

fn convert_json_path(doc: &mut Value, path: &str, policy: FailurePolicy) -> anyhow::Result<bool> {
    let mut cursor = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some(map) = cursor.as_object_mut() else { return Ok(false) };
        let Some(next) = map.get_mut(segment) else { return Ok(false) };
        if segments.peek().is_none() {
            if let Value::String(raw) = next {
                if let Some(epoch) = to_epoch(raw, policy)? {
                    if let Some(n) = serde_json::Number::from_f64(epoch) {
                        *next = Value::Number(n);
                        return Ok(true);
                    }
                }
            }
            return Ok(false);
        }
        cursor = next;
    }
    Ok(false)
}

// ── Schema drift diagnostic ─────────────────────────────────────────────

/// One datetime field whose server-side index kind disagrees with the
/// compiled schema.
#[derive(Debug, Clone)]
pub struct SchemaDrift {
    pub model: String,
    pub field: String,
    pub server_kind: String,
    pub expected_kind: FieldKind,
    pub index: String,
}

/// Query FT.INFO for every registered model and report datetime fields the
/// server still indexes as TAG (or anything other than NUMERIC). Indexes
/// that do not exist yet are skipped; `migrate run` owns their creation.
pub async fn check_datetime_schema(client: &RedisClient) -> Result<Vec<SchemaDrift>> {
    let mut drift = Vec::new();
    for schema in registered_schemas() {
        drift.extend(check_model(client, schema).await?);
    }
    Ok(drift)
}

async fn check_model(client: &RedisClient, schema: &CompiledSchema) -> Result<Vec<SchemaDrift>> {
    let datetime_fields: Vec<_> = schema
        .fields
        .iter()
        .filter(|f| matches!(f.declared, DeclaredType::DateTime | DeclaredType::Date))
        .collect();
    if datetime_fields.is_empty() {
        return Ok(Vec::new());
    }
    let index = schema.key_space.index_name();
    let info = match client.ft_info(&index).await {
        Ok(info) => info,
        Err(Error::Redis(e)) if e.to_string().contains("Unknown Index") => return Ok(Vec::new()),
        Err(Error::Redis(e)) if e.to_string().contains("no such index") => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let server_kinds = attribute_kinds(&info);
    let mut drift = Vec::new();
    for field in datetime_fields {
        let Some(server_kind) = server_kinds
            .iter()
            .find(|(alias, _)| alias == &field.name)
            .map(|(_, kind)| kind.clone())
        else {
            continue;
        };
        if server_kind != "NUMERIC" {
            drift.push(SchemaDrift {
                model: schema.model.clone(),
                field: field.name.clone(),
                server_kind,
                expected_kind: FieldKind::Numeric,
                index: index.clone(),
            });
        }
    }
    Ok(drift)
}

/// Active startup guard: fail fast when any datetime field drifted. Never
/// runs the transition itself.
pub async fn guard_datetime_schema(client: &RedisClient) -> Result<()> {
    let drift = check_datetime_schema(client).await?;
    if drift.is_empty() {
        return Ok(());
    }
    let summary: Vec<String> = drift
        .iter()
        .map(|d| format!("{}.{} indexed as {} (expected NUMERIC)", d.model, d.field, d.server_kind))
        .collect();
    Err(Error::Migration(format!(
        "datetime index drift detected: {}; run `migrate run` and `migrate-data run`",
        summary.join(", ")
    )))
}

fn redis_text(value: &RedisValue) -> Option<String> {
    match value {
        RedisValue::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        RedisValue::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// Extract `(alias, type)` pairs from an FT.INFO reply's attributes block.
fn attribute_kinds(info: &RedisValue) -> Vec<(String, String)> {
    let RedisValue::Bulk(items) = info else { return Vec::new() };
    let mut iter = items.iter();
    while let Some(entry) = iter.next() {
        if redis_text(entry).as_deref() == Some("attributes") {
            let Some(RedisValue::Bulk(attrs)) = iter.next() else { return Vec::new() };
            let mut out = Vec::new();
            for attr in attrs {
                let RedisValue::Bulk(parts) = attr else { continue };
                let mut alias = None;
                let mut kind = None;
                let mut parts_iter = parts.iter();
                while let (Some(name), Some(value)) = (parts_iter.next(), parts_iter.next()) {
                    match redis_text(name).as_deref() {
                        Some("attribute") => alias = redis_text(value),
                        Some("type") => kind = redis_text(value),
                        _ => {}
                    }
                }
                if let (Some(alias), Some(kind)) = (alias, kind) {
                    out.push((alias, kind));
                }
            }
            return out;
        }
    }
    Vec::new()
}
