//! Index manager: synthesizes the server-side index-create command from a
//! compiled schema, fingerprints the definition, and reconciles the server
//! state against it (create / drop / skip-when-unchanged).

use crate::client::{CmdArg, RedisClient};
use crate::error::Result;
use crate::schema::compiler::{CompiledSchema, FieldKind, IndexedField};
use crate::schema::fields::{StorageLayout, VectorAlgorithm};

/// What `ensure_index` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Server fingerprint matched the in-memory schema; nothing issued.
    UpToDate,
    /// Index was (re)created and the fingerprint recorded.
    Created,
}

/// Build the full FT.CREATE argument vector for a compiled schema.
pub fn create_index_args(schema: &CompiledSchema) -> Vec<CmdArg> {
    create_index_args_from_parts(
        &schema.key_space.index_name(),
        schema.layout,
        &schema.key_space.index_prefix(),
        &schema.fields,
    )
}

/// Same synthesis from stored parts; the schema migrator replays snapshot
/// files through this without recompiling a definition.
pub fn create_index_args_from_parts(
    index_name: &str,
    layout: StorageLayout,
    key_prefix: &str,
    fields: &[IndexedField],
) -> Vec<CmdArg> {
    let mut args: Vec<CmdArg> = vec![
        index_name.into(),
        "ON".into(),
        match layout {
            StorageLayout::Hash => "HASH".into(),
            StorageLayout::Json => "JSON".into(),
        },
        "PREFIX".into(),
        "1".into(),
        key_prefix.into(),
        "SCORE".into(),
        "1.0".into(),
        "SCHEMA".into(),
    ];
    for field in fields {
        push_field_args(field, &mut args);
    }
    args
}

fn push_field_args(field: &IndexedField, args: &mut Vec<CmdArg>) {
    args.push(field.path.clone().into());
    args.push("AS".into());
    args.push(field.name.clone().into());
    match field.kind {
        FieldKind::Tag => {
            args.push("TAG".into());
            args.push("SEPARATOR".into());
            args.push(field.separator.unwrap_or('|').to_string().into());
            if field.case_sensitive {
                args.push("CASESENSITIVE".into());
            }
        }
        FieldKind::Text => {
            args.push("TEXT".into());
        }
        FieldKind::Numeric => {
            args.push("NUMERIC".into());
        }
        FieldKind::Geo => {
            args.push("GEO".into());
        }
        FieldKind::Vector => {
            args.push("VECTOR".into());
            if let Some(vector) = &field.vector {
                let mut params: Vec<CmdArg> = vec![
                    "TYPE".into(),
                    vector.dtype.wire_name().into(),
                    "DIM".into(),
                    vector.dimension.to_string().into(),
                    "DISTANCE_METRIC".into(),
                    vector.metric.wire_name().into(),
                ];
                match &vector.algorithm {
                    VectorAlgorithm::Flat { initial_cap, block_size } => {
                        args.push("FLAT".into());
                        if let Some(cap) = initial_cap {
                            params.push("INITIAL_CAP".into());
                            params.push(cap.to_string().into());
                        }
                        if let Some(size) = block_size {
                            params.push("BLOCK_SIZE".into());
                            params.push(size.to_string().into());
                        }
                    }
                    VectorAlgorithm::Hnsw { m, ef_construction, ef_runtime, epsilon } => {
                        args.push("HNSW".into());
                        if let Some(m) = m {
                            params.push("M".into());
                            params.push(m.to_string().into());
                        }
                        if let Some(ef) = ef_construction {
                            params.push("EF_CONSTRUCTION".into());
                            params.push(ef.to_string().into());
                        }
                        if let Some(ef) = ef_runtime {
                            params.push("EF_RUNTIME".into());
                            params.push(ef.to_string().into());
                        }
                        if let Some(eps) = epsilon {
                            params.push("EPSILON".into());
                            params.push(eps.to_string().into());
                        }
                    }
                }
                args.push(params.len().to_string().into());
                args.extend(params);
            }
        }
    }
    if field.sortable {
        args.push("SORTABLE".into());
    }
}

/// Stable fingerprint of a compiled schema: a hash of the canonicalized,
/// name-sorted field specifications plus the layout and key prefix. Used to
/// detect drift between the in-memory schema and what the server holds.
pub fn fingerprint(schema: &CompiledSchema) -> String {
    fingerprint_from_parts(schema.layout, &schema.key_space.index_prefix(), &schema.fields)
}

/// Fingerprint from stored parts (see [`fingerprint`]).
pub fn fingerprint_from_parts(
    layout: StorageLayout,
    key_prefix: &str,
    fields: &[IndexedField],
) -> String {
    let mut lines: Vec<String> = fields
        .iter()
        .map(|f| {
            let mut line = format!(
                "{}|{}|{}|sortable={}|case={}|list={}",
                f.name,
                f.kind.wire_name(),
                f.path,
                f.sortable,
                f.case_sensitive,
                f.is_list,
            );
            if let Some(sep) = f.separator {
                line.push_str(&format!("|sep={sep}"));
            }
            if let Some(vector) = &f.vector {
                line.push_str(&format!(
                    "|vec={}",
                    serde_json::to_string(vector).unwrap_or_default()
                ));
            }
            line
        })
        .collect();
    lines.sort();
    lines.push(format!("layout={layout:?}|prefix={key_prefix}"));
    format!("{:x}", md5::compute(lines.join("\n")))
}

/// Server-side index lifecycle for one model.
pub struct IndexManager<'a> {
    client: &'a RedisClient,
    schema: &'a CompiledSchema,
}

impl<'a> IndexManager<'a> {
    pub fn new(client: &'a RedisClient, schema: &'a CompiledSchema) -> Self {
        Self { client, schema }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.schema)
    }

    pub async fn stored_fingerprint(&self) -> Result<Option<String>> {
        self.client
            .get_string(&self.schema.key_space.schema_hash_key())
            .await
    }

    /// Create the index when the recorded fingerprint differs from the
    /// in-memory one. Tolerates a crash between FT.CREATE and the
    /// fingerprint write: rerunning drops and recreates, then records.
    pub async fn ensure_index(&self) -> Result<IndexOutcome> {
        self.client.config().check_database_number()?;
        let current = self.fingerprint();
        if self.stored_fingerprint().await?.as_deref() == Some(current.as_str()) {
            tracing::debug!(index = %self.schema.key_space.index_name(), "index up to date");
            return Ok(IndexOutcome::UpToDate);
        }
        self.drop_index().await?;
        self.client.ft_create(&create_index_args(self.schema)).await?;
        self.client
            .set_string(&self.schema.key_space.schema_hash_key(), &current)
            .await?;
        tracing::info!(
            index = %self.schema.key_space.index_name(),
            fingerprint = %current,
            "index created"
        );
        Ok(IndexOutcome::Created)
    }

    /// Drop the index; missing indexes are not an error.
    pub async fn drop_index(&self) -> Result<()> {
        self.client
            .ft_dropindex(&self.schema.key_space.index_name())
            .await
    }

    /// Drop the index and forget the recorded fingerprint.
    pub async fn teardown(&self) -> Result<()> {
        self.drop_index().await?;
        self.client
            .del(&self.schema.key_space.schema_hash_key())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compiler::CompiledSchema;
    use crate::schema::fields::{
        DistanceMetric, FieldDef, FieldType, RecordDef, VectorOptions, VectorType,
    };

    fn args_text(args: &[CmdArg]) -> String {
        args.iter()
            .map(|a| match a {
                CmdArg::Str(s) => s.clone(),
                CmdArg::Bin(_) => "<bin>".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn customer() -> CompiledSchema {
        let def = RecordDef::hash("Customer")
            .field(FieldDef::new("pk", FieldType::String).primary_key())
            .field(FieldDef::new("last_name", FieldType::String).indexed())
            .field(FieldDef::new("bio", FieldType::String).indexed().full_text_search())
            .field(FieldDef::new("age", FieldType::Integer).indexed().sortable());
        CompiledSchema::compile(def, "app.Customer").unwrap()
    }

    #[test]
    fn create_args_shape() {
        let schema = customer();
        let text = args_text(&create_index_args(&schema));
        assert!(text.starts_with("app.Customer:index ON HASH PREFIX 1 app.Customer: SCORE 1.0 SCHEMA"));
        assert!(text.contains("last_name AS last_name TAG SEPARATOR |"));
        assert!(text.contains("bio AS bio TEXT"));
        assert!(text.contains("age AS age NUMERIC SORTABLE"));
    }

    #[test]
    fn json_paths_and_aliases_are_emitted() {
        let address = RecordDef::embedded("Address")
            .field(FieldDef::new("city", FieldType::String).indexed());
        let def = RecordDef::json("Customer")
            .field(FieldDef::new("pk", FieldType::String).primary_key())
            .field(FieldDef::new("address", FieldType::Embedded(Box::new(address))));
        let schema = CompiledSchema::compile(def, "app.Customer").unwrap();
        let text = args_text(&create_index_args(&schema));
        assert!(text.contains("ON JSON"));
        assert!(text.contains("$.address.city AS address_city TAG"));
    }

    #[test]
    fn vector_args_carry_param_count() {
        let opts = VectorOptions::flat(512, VectorType::Float32, DistanceMetric::Cosine);
        let def = RecordDef::hash("Doc")
            .field(FieldDef::new("pk", FieldType::String).primary_key())
            .field(FieldDef::new("embedding", FieldType::Vector).indexed().vector(opts));
        let schema = CompiledSchema::compile(def, "app.Doc").unwrap();
        let text = args_text(&create_index_args(&schema));
        assert!(text.contains(
            "embedding AS embedding VECTOR FLAT 6 TYPE FLOAT32 DIM 512 DISTANCE_METRIC COSINE"
        ));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint(&customer());
        let b = fingerprint(&customer());
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn fingerprint_tracks_definition_changes() {
        let base = fingerprint(&customer());
        let def = RecordDef::hash("Customer")
            .field(FieldDef::new("pk", FieldType::String).primary_key())
            .field(FieldDef::new("last_name", FieldType::String).indexed())
            .field(FieldDef::new("bio", FieldType::String).indexed().full_text_search())
            .field(FieldDef::new("age", FieldType::Integer).indexed()); // sortable dropped
        let changed = fingerprint(&CompiledSchema::compile(def, "app.Customer").unwrap());
        assert_ne!(base, changed);
    }

    #[test]
    fn fingerprint_ignores_declaration_order() {
        let def_a = RecordDef::hash("T")
            .field(FieldDef::new("pk", FieldType::String).primary_key())
            .field(FieldDef::new("a", FieldType::String).indexed())
            .field(FieldDef::new("b", FieldType::Integer).indexed());
        let def_b = RecordDef::hash("T")
            .field(FieldDef::new("pk", FieldType::String).primary_key())
            .field(FieldDef::new("b", FieldType::Integer).indexed())
            .field(FieldDef::new("a", FieldType::String).indexed());
        assert_eq!(
            fingerprint(&CompiledSchema::compile(def_a, "t.T").unwrap()),
            fingerprint(&CompiledSchema::compile(def_b, "t.T").unwrap())
        );
    }
}
