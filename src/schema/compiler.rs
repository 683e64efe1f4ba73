//! Schema compiler: walks a declared record type and derives the ordered
//! list of index-field specifications consumed by the index manager and the
//! query compiler. Embedded records unfold into the parent schema with
//! dotted JSON paths and flattened query-time aliases.

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::keys::KeySpace;
use crate::schema::fields::{
    FieldDef, FieldType, RecordDef, StorageLayout, VectorOptions,
};

/// Index field kind on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldKind {
    Tag,
    Text,
    Numeric,
    Geo,
    Vector,
}

impl FieldKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            FieldKind::Tag => "TAG",
            FieldKind::Text => "TEXT",
            FieldKind::Numeric => "NUMERIC",
            FieldKind::Geo => "GEO",
            FieldKind::Vector => "VECTOR",
        }
    }
}

/// Declared scalar type of an indexed field, kept on the compiled spec so
/// the query runtime can type projected values without the full definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    Geo,
    Vector,
    StringList,
    Enum,
}

/// One compiled index-field specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedField {
    /// Flattened query-time alias (`address_city` for `$.address.city`).
    pub name: String,
    /// Dotted record path (`address.city`); equals `name` for flat fields.
    pub record_path: String,
    /// Server-side identifier: the hash field name, or a JSON path.
    pub path: String,
    pub kind: FieldKind,
    pub declared: DeclaredType,
    pub sortable: bool,
    pub case_sensitive: bool,
    pub full_text: bool,
    pub is_list: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<char>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<VectorOptions>,
}

/// Output of schema compilation for one model: the storage layout, the
/// ordered index fields, and the key space every component shares.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub model: String,
    pub layout: StorageLayout,
    pub fields: Vec<IndexedField>,
    pub key_space: KeySpace,
    pub pk_field: String,
    pub def: RecordDef,
}

impl CompiledSchema {
    /// Compile a record definition. Errors are eager: every invalid field
    /// configuration surfaces here, at registration, never at query time.
    pub fn compile(def: RecordDef, default_model_prefix: &str) -> Result<Self, SchemaError> {
        if def.meta.embedded && def.index {
            return Err(SchemaError::EmbeddedIndexed { model: def.name.clone() });
        }

        let pk_field = resolve_primary_key(&def)?;
        let mut fields = Vec::new();
        for field in &def.fields {
            lower_field(&def, field, None, &mut fields)?;
        }

        let key_space = def.meta.key_space(default_model_prefix);
        Ok(Self {
            model: def.name.clone(),
            layout: def.layout,
            fields,
            key_space,
            pk_field,
            def,
        })
    }

    /// Look up an index field by flattened alias or dotted record path.
    pub fn field(&self, name: &str) -> Option<&IndexedField> {
        self.fields
            .iter()
            .find(|f| f.name == name || f.record_path == name)
    }
}

fn resolve_primary_key(def: &RecordDef) -> Result<String, SchemaError> {
    let mut pks = def.fields.iter().filter(|f| f.options.primary_key);
    match (pks.next(), pks.next()) {
        (Some(f), None) => Ok(f.name.clone()),
        (None, _) => Err(SchemaError::MissingPrimaryKey { model: def.name.clone() }),
        (Some(_), Some(_)) => Err(SchemaError::DuplicatePrimaryKey { model: def.name.clone() }),
    }
}

/// Path context while unfolding embedded records: the JSON path prefix and
/// the alias prefix accumulated so far.
struct Nesting<'a> {
    json_path: &'a str,
    alias: &'a str,
    record_path: &'a str,
}

fn lower_field(
    def: &RecordDef,
    field: &FieldDef,
    nesting: Option<&Nesting<'_>>,
    out: &mut Vec<IndexedField>,
) -> Result<(), SchemaError> {
    let opts = &field.options;
    let declared = field.field_type.unwrap_optional();

    // Option conflicts are invalid regardless of the index flag.
    if opts.full_text_search && opts.case_sensitive {
        return Err(SchemaError::FullTextCaseSensitive { field: field.name.clone() });
    }
    if opts.full_text_search && matches!(declared, FieldType::List(_)) {
        return Err(SchemaError::FullTextOnList { field: field.name.clone() });
    }
    if def.layout == StorageLayout::Hash && declared.is_container() {
        // Plain string lists are the one container hashes can hold.
        match declared {
            FieldType::List(inner) if inner.unwrap_optional() == &FieldType::String => {}
            FieldType::List(_) => {
                return Err(SchemaError::NonStringListElement { field: field.name.clone() })
            }
            _ => return Err(SchemaError::ContainerInHashModel { field: field.name.clone() }),
        }
    }

    // Embedded fields resolve index state per-field; there is no meaningful
    // record-level default inside a record that is never indexed itself.
    let indexed = if nesting.is_some() {
        opts.index.unwrap_or(false)
    } else {
        opts.index.unwrap_or(def.index)
    };
    if opts.sortable && !indexed {
        return Err(SchemaError::SortableNotIndexed { field: field.name.clone() });
    }
    if !indexed {
        // Embedded subtrees still need their declarations checked.
        if let FieldType::Embedded(sub) = declared {
            validate_unindexed_subtree(sub)?;
        }
        return Ok(());
    }

    let (json_path, alias, record_path) = match nesting {
        Some(n) => (
            format!("{}.{}", n.json_path, field.name),
            format!("{}_{}", n.alias, field.name),
            format!("{}.{}", n.record_path, field.name),
        ),
        None => (
            format!("$.{}", field.name),
            field.name.clone(),
            field.name.clone(),
        ),
    };
    let path = match def.layout {
        StorageLayout::Hash => field.name.clone(),
        StorageLayout::Json => json_path.clone(),
    };

    let spec = |kind: FieldKind, declared: DeclaredType, is_list: bool| IndexedField {
        name: alias.clone(),
        record_path: record_path.clone(),
        path: path.clone(),
        kind,
        declared,
        sortable: opts.sortable,
        case_sensitive: opts.case_sensitive,
        full_text: opts.full_text_search,
        is_list,
        separator: match kind {
            FieldKind::Tag => Some(opts.separator),
            _ => None,
        },
        vector: None,
    };

    match declared {
        FieldType::String => {
            if opts.full_text_search {
                out.push(spec(FieldKind::Text, DeclaredType::String, false));
            } else {
                out.push(spec(FieldKind::Tag, DeclaredType::String, false));
            }
        }
        FieldType::Enum(_) => out.push(spec(FieldKind::Tag, DeclaredType::Enum, false)),
        FieldType::Integer => out.push(spec(FieldKind::Numeric, DeclaredType::Integer, false)),
        FieldType::Float => out.push(spec(FieldKind::Numeric, DeclaredType::Float, false)),
        FieldType::DateTime => out.push(spec(FieldKind::Numeric, DeclaredType::DateTime, false)),
        FieldType::Date => out.push(spec(FieldKind::Numeric, DeclaredType::Date, false)),
        FieldType::Boolean => match def.layout {
            // Hash booleans are "0"/"1" tags; JSON stores 0/1 numerics.
            StorageLayout::Hash => out.push(spec(FieldKind::Tag, DeclaredType::Boolean, false)),
            StorageLayout::Json => out.push(spec(FieldKind::Numeric, DeclaredType::Boolean, false)),
        },
        FieldType::Geo => out.push(spec(FieldKind::Geo, DeclaredType::Geo, false)),
        FieldType::Vector => {
            let vector = opts
                .vector
                .clone()
                .ok_or_else(|| SchemaError::MissingVectorOptions { field: field.name.clone() })?;
            if vector.dimension == 0 {
                return Err(SchemaError::InvalidVectorOptions {
                    field: field.name.clone(),
                    message: "dimension must be at least 1".into(),
                });
            }
            let mut f = spec(FieldKind::Vector, DeclaredType::Vector, false);
            f.vector = Some(vector);
            out.push(f);
        }
        FieldType::List(element) => {
            if element.unwrap_optional() != &FieldType::String {
                return Err(SchemaError::NonStringListElement { field: field.name.clone() });
            }
            let mut f = spec(FieldKind::Tag, DeclaredType::StringList, true);
            if def.layout == StorageLayout::Json {
                // Tag arrays index each element; the path selects them all.
                f.path = format!("{json_path}[*]");
            }
            out.push(f);
        }
        FieldType::Embedded(sub) => {
            if def.layout == StorageLayout::Hash {
                return Err(SchemaError::ContainerInHashModel { field: field.name.clone() });
            }
            let next = Nesting {
                json_path: &json_path,
                alias: &alias,
                record_path: &record_path,
            };
            for sub_field in &sub.fields {
                lower_field(def, sub_field, Some(&next), out)?;
            }
        }
        FieldType::Json => {
            // Opaque payloads cannot be indexed; an inherited record-level
            // flag skips them, only an explicit request is an error.
            if opts.index == Some(true) {
                return Err(SchemaError::UnindexableType { field: field.name.clone() });
            }
        }
        FieldType::Optional(_) => unreachable!("unwrap_optional strips Optional"),
    }
    Ok(())
}

/// Even when an embedded field is not unfolded, its declaration must be
/// well-formed; drift would otherwise surface at write time instead.
fn validate_unindexed_subtree(def: &RecordDef) -> Result<(), SchemaError> {
    for field in &def.fields {
        let opts = &field.options;
        if opts.full_text_search && opts.case_sensitive {
            return Err(SchemaError::FullTextCaseSensitive { field: field.name.clone() });
        }
        if let FieldType::Embedded(sub) = field.field_type.unwrap_optional() {
            validate_unindexed_subtree(sub)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fields::{DistanceMetric, VectorType};

    fn pk() -> FieldDef {
        FieldDef::new("pk", FieldType::String).primary_key()
    }

    fn compile(def: RecordDef) -> Result<CompiledSchema, SchemaError> {
        CompiledSchema::compile(def, "test.Model")
    }

    #[test]
    fn hash_fields_use_plain_names() {
        let schema = compile(
            RecordDef::hash("Customer")
                .field(pk())
                .field(FieldDef::new("last_name", FieldType::String).indexed())
                .field(FieldDef::new("age", FieldType::Integer).indexed().sortable()),
        )
        .unwrap();
        assert_eq!(schema.layout, StorageLayout::Hash);
        let age = schema.field("age").unwrap();
        assert_eq!(age.kind, FieldKind::Numeric);
        assert_eq!(age.path, "age");
        assert!(age.sortable);
    }

    #[test]
    fn record_level_flag_is_inherited() {
        let schema = compile(
            RecordDef::hash("T")
                .field(pk())
                .field(FieldDef::new("a", FieldType::String)),
        )
        .unwrap();
        // record-level index=true, field inherits
        assert!(schema.field("a").is_some());

        let schema = compile(
            RecordDef::hash("T")
                .unindexed_record()
                .field(pk())
                .field(FieldDef::new("a", FieldType::String)),
        )
        .unwrap();
        assert!(schema.field("a").is_none());
    }

    #[test]
    fn full_text_string_becomes_text() {
        let schema = compile(
            RecordDef::hash("T")
                .field(pk())
                .field(FieldDef::new("bio", FieldType::String).indexed().full_text_search()),
        )
        .unwrap();
        let bio = schema.field("bio").unwrap();
        assert_eq!(bio.kind, FieldKind::Text);
        assert!(bio.full_text);
        assert!(bio.separator.is_none());
    }

    #[test]
    fn boolean_kind_depends_on_layout() {
        let hash = compile(
            RecordDef::hash("T").field(pk()).field(FieldDef::new("b", FieldType::Boolean).indexed()),
        )
        .unwrap();
        assert_eq!(hash.field("b").unwrap().kind, FieldKind::Tag);

        let json = compile(
            RecordDef::json("T").field(pk()).field(FieldDef::new("b", FieldType::Boolean).indexed()),
        )
        .unwrap();
        assert_eq!(json.field("b").unwrap().kind, FieldKind::Numeric);
    }

    #[test]
    fn embedded_fields_unfold_with_dotted_paths() {
        let address = RecordDef::embedded("Address")
            .field(FieldDef::new("city", FieldType::String).indexed())
            .field(FieldDef::new("state", FieldType::String).indexed())
            .field(FieldDef::new("note", FieldType::String));
        let schema = compile(
            RecordDef::json("Customer")
                .field(pk())
                .field(FieldDef::new("address", FieldType::Embedded(Box::new(address)))),
        )
        .unwrap();
        let city = schema.field("address_city").unwrap();
        assert_eq!(city.path, "$.address.city");
        assert_eq!(city.record_path, "address.city");
        // dotted lookup resolves to the same spec
        assert_eq!(schema.field("address.city"), Some(city));
        // unindexed embedded field does not unfold
        assert!(schema.field("address_note").is_none());
    }

    #[test]
    fn deep_nesting_composes_left_to_right() {
        let geo = RecordDef::embedded("GeoPoint")
            .field(FieldDef::new("lat", FieldType::Float).indexed());
        let address = RecordDef::embedded("Address")
            .field(FieldDef::new("point", FieldType::Embedded(Box::new(geo))));
        let schema = compile(
            RecordDef::json("Customer")
                .field(pk())
                .field(FieldDef::new("address", FieldType::Embedded(Box::new(address)))),
        )
        .unwrap();
        let lat = schema.field("address_point_lat").unwrap();
        assert_eq!(lat.path, "$.address.point.lat");
    }

    #[test]
    fn json_string_list_indexes_elements() {
        let schema = compile(
            RecordDef::json("T")
                .field(pk())
                .field(FieldDef::new("skills", FieldType::List(Box::new(FieldType::String))).indexed()),
        )
        .unwrap();
        let skills = schema.field("skills").unwrap();
        assert_eq!(skills.path, "$.skills[*]");
        assert!(skills.is_list);
        assert_eq!(skills.kind, FieldKind::Tag);
    }

    #[test]
    fn non_string_list_is_rejected() {
        let err = compile(
            RecordDef::json("T")
                .field(pk())
                .field(FieldDef::new("nums", FieldType::List(Box::new(FieldType::Integer))).indexed()),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::NonStringListElement { .. }));
    }

    #[test]
    fn full_text_list_is_rejected() {
        let err = compile(
            RecordDef::json("T").field(pk()).field(
                FieldDef::new("tags", FieldType::List(Box::new(FieldType::String)))
                    .indexed()
                    .full_text_search(),
            ),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::FullTextOnList { .. }));
    }

    #[test]
    fn hash_rejects_embedded_and_json_types() {
        let sub = RecordDef::embedded("Sub");
        let err = compile(
            RecordDef::hash("T")
                .field(pk())
                .field(FieldDef::new("sub", FieldType::Embedded(Box::new(sub)))),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::ContainerInHashModel { .. }));
    }

    #[test]
    fn sortable_requires_indexed() {
        let err = compile(
            RecordDef::hash("T")
                .field(pk())
                .field(FieldDef::new("a", FieldType::Integer).unindexed().sortable()),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::SortableNotIndexed { .. }));
    }

    #[test]
    fn full_text_case_sensitive_conflict() {
        let err = compile(
            RecordDef::hash("T").field(pk()).field(
                FieldDef::new("a", FieldType::String)
                    .indexed()
                    .full_text_search()
                    .case_sensitive(),
            ),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::FullTextCaseSensitive { .. }));
    }

    #[test]
    fn vector_requires_options_and_dimension() {
        let err = compile(
            RecordDef::hash("T")
                .field(pk())
                .field(FieldDef::new("v", FieldType::Vector).indexed()),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::MissingVectorOptions { .. }));

        let opts = VectorOptions::flat(0, VectorType::Float32, DistanceMetric::L2);
        let err = compile(
            RecordDef::hash("T")
                .field(pk())
                .field(FieldDef::new("v", FieldType::Vector).indexed().vector(opts)),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidVectorOptions { .. }));
    }

    #[test]
    fn primary_key_is_mandatory_and_unique() {
        let err = compile(RecordDef::hash("T").field(FieldDef::new("a", FieldType::String)))
            .unwrap_err();
        assert!(matches!(err, SchemaError::MissingPrimaryKey { .. }));

        let err = compile(
            RecordDef::hash("T")
                .field(FieldDef::new("a", FieldType::String).primary_key())
                .field(FieldDef::new("b", FieldType::String).primary_key()),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicatePrimaryKey { .. }));
    }

    #[test]
    fn opaque_json_fields_skip_inherited_indexing() {
        let schema = compile(
            RecordDef::json("T")
                .field(pk())
                .field(FieldDef::new("payload", FieldType::Json)),
        )
        .unwrap();
        assert!(schema.field("payload").is_none());

        let err = compile(
            RecordDef::json("T")
                .field(pk())
                .field(FieldDef::new("payload", FieldType::Json).indexed()),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnindexableType { .. }));
    }

    #[test]
    fn compilation_is_deterministic() {
        let def = || {
            RecordDef::json("Customer")
                .field(pk())
                .field(FieldDef::new("name", FieldType::String).indexed())
                .field(FieldDef::new("age", FieldType::Integer).indexed().sortable())
        };
        let a = compile(def()).unwrap();
        let b = compile(def()).unwrap();
        assert_eq!(a.fields, b.fields);
    }
}
