pub mod compiler;
pub mod fields;
pub mod meta;

pub use compiler::{CompiledSchema, DeclaredType, FieldKind, IndexedField};
pub use fields::{
    DistanceMetric, FieldDef, FieldType, IndexOptions, RecordDef, StorageLayout, VectorAlgorithm,
    VectorOptions, VectorType, DEFAULT_SEPARATOR,
};
pub use meta::Meta;
