use serde::{Deserialize, Serialize};

use crate::schema::meta::Meta;

/// Storage layout of a record: a flat Hash or a JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageLayout {
    Hash,
    Json,
}

/// Declared type of a record field.
///
/// Hash models only accept the scalar variants; containers, embedded
/// records and free-form JSON are document-only and rejected by the schema
/// compiler otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Date,
    /// Geographic point, stored as a "lon,lat" string.
    Geo,
    /// Fixed-shape float vector; indexing requires vector options.
    Vector,
    /// Enumeration over a closed set of member value strings.
    Enum(Vec<String>),
    /// Homogeneous list (tuples of strings declare the same shape).
    List(Box<FieldType>),
    /// Nested embedded record (document layout only).
    Embedded(Box<RecordDef>),
    /// Nullable wrapper; absent values are elided from storage.
    Optional(Box<FieldType>),
    /// Opaque JSON payload, stored verbatim and never indexed.
    Json,
}

impl FieldType {
    /// Strip Optional wrappers down to the underlying declared type.
    pub fn unwrap_optional(&self) -> &FieldType {
        match self {
            FieldType::Optional(inner) => inner.unwrap_optional(),
            other => other,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self.unwrap_optional(),
            FieldType::List(_) | FieldType::Embedded(_) | FieldType::Json
        )
    }
}

/// Vector index algorithm with its tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "UPPERCASE")]
pub enum VectorAlgorithm {
    Flat {
        #[serde(skip_serializing_if = "Option::is_none")]
        initial_cap: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        block_size: Option<usize>,
    },
    Hnsw {
        #[serde(skip_serializing_if = "Option::is_none")]
        m: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ef_construction: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ef_runtime: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        epsilon: Option<f64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VectorType {
    Float32,
    Float64,
}

impl VectorType {
    pub fn wire_name(&self) -> &'static str {
        match self {
            VectorType::Float32 => "FLOAT32",
            VectorType::Float64 => "FLOAT64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DistanceMetric {
    Cosine,
    L2,
    Ip,
}

impl DistanceMetric {
    pub fn wire_name(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "COSINE",
            DistanceMetric::L2 => "L2",
            DistanceMetric::Ip => "IP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorOptions {
    #[serde(flatten)]
    pub algorithm: VectorAlgorithm,
    pub dtype: VectorType,
    pub dimension: usize,
    pub metric: DistanceMetric,
}

impl VectorOptions {
    pub fn flat(dimension: usize, dtype: VectorType, metric: DistanceMetric) -> Self {
        Self {
            algorithm: VectorAlgorithm::Flat { initial_cap: None, block_size: None },
            dtype,
            dimension,
            metric,
        }
    }

    pub fn hnsw(dimension: usize, dtype: VectorType, metric: DistanceMetric) -> Self {
        Self {
            algorithm: VectorAlgorithm::Hnsw {
                m: None,
                ef_construction: None,
                ef_runtime: None,
                epsilon: None,
            },
            dtype,
            dimension,
            metric,
        }
    }
}

/// Default separator splitting tag values.
pub const DEFAULT_SEPARATOR: char = '|';

/// Per-field indexing options. `index: None` inherits the record-level flag.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    pub index: Option<bool>,
    pub sortable: bool,
    pub full_text_search: bool,
    pub case_sensitive: bool,
    pub separator: char,
    pub vector: Option<VectorOptions>,
    pub primary_key: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            index: None,
            sortable: false,
            full_text_search: false,
            case_sensitive: false,
            separator: DEFAULT_SEPARATOR,
            vector: None,
            primary_key: false,
        }
    }
}

/// One declared field: name, type, and index options.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub options: IndexOptions,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, options: IndexOptions::default() }
    }

    pub fn indexed(mut self) -> Self {
        self.options.index = Some(true);
        self
    }

    pub fn unindexed(mut self) -> Self {
        self.options.index = Some(false);
        self
    }

    pub fn sortable(mut self) -> Self {
        self.options.sortable = true;
        self
    }

    pub fn full_text_search(mut self) -> Self {
        self.options.full_text_search = true;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.options.case_sensitive = true;
        self
    }

    pub fn separator(mut self, sep: char) -> Self {
        self.options.separator = sep;
        self
    }

    pub fn vector(mut self, options: VectorOptions) -> Self {
        self.options.vector = Some(options);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.options.primary_key = true;
        self.options.index = Some(true);
        self
    }
}

/// A declared record type: name, storage layout, fields, and meta.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDef {
    pub name: String,
    pub layout: StorageLayout,
    /// Record-level index flag; fields without an explicit override inherit it.
    pub index: bool,
    pub fields: Vec<FieldDef>,
    pub meta: Meta,
}

impl RecordDef {
    pub fn hash(name: impl Into<String>) -> Self {
        Self::with_layout(name, StorageLayout::Hash)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::with_layout(name, StorageLayout::Json)
    }

    fn with_layout(name: impl Into<String>, layout: StorageLayout) -> Self {
        Self {
            name: name.into(),
            layout,
            index: true,
            fields: Vec::new(),
            meta: Meta::default(),
        }
    }

    /// An embedded record definition: document layout, no independent index.
    pub fn embedded(name: impl Into<String>) -> Self {
        let mut def = Self::with_layout(name, StorageLayout::Json);
        def.index = false;
        def.meta.embedded = true;
        def
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn unindexed_record(mut self) -> Self {
        self.index = false;
        self
    }

    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The declared primary-key field name, when exactly one is marked.
    pub fn primary_key_field(&self) -> Option<&str> {
        let mut it = self.fields.iter().filter(|f| f.options.primary_key);
        match (it.next(), it.next()) {
            (Some(f), None) => Some(f.name.as_str()),
            _ => None,
        }
    }
}
