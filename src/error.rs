use thiserror::Error;

/// Errors raised while compiling a record definition into an index schema.
///
/// All of these fire eagerly, at model registration, never at query time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchemaError {
    #[error("field '{field}': list and tuple fields must have string elements")]
    NonStringListElement { field: String },

    #[error("field '{field}': full_text_search is not supported on list fields")]
    FullTextOnList { field: String },

    #[error("field '{field}': full_text_search and case_sensitive cannot be combined")]
    FullTextCaseSensitive { field: String },

    #[error("field '{field}': sortable requires the field to be indexed")]
    SortableNotIndexed { field: String },

    #[error("field '{field}': hash models cannot store container or embedded values")]
    ContainerInHashModel { field: String },

    #[error("field '{field}': vector fields require vector_options")]
    MissingVectorOptions { field: String },

    #[error("vector field '{field}': {message}")]
    InvalidVectorOptions { field: String, message: String },

    #[error("model '{model}' declares no primary key field")]
    MissingPrimaryKey { model: String },

    #[error("model '{model}' declares more than one primary key field")]
    DuplicatePrimaryKey { model: String },

    #[error("embedded model '{model}' cannot carry its own index")]
    EmbeddedIndexed { model: String },

    #[error("field '{field}': value contains the tag separator '{separator}'")]
    SeparatorInValue { field: String, separator: char },

    #[error("field '{field}': values of this type cannot be indexed")]
    UnindexableType { field: String },
}

/// Errors raised while building or compiling a query expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error("field '{field}' is not indexed on model '{model}'")]
    FieldNotIndexed { model: String, field: String },

    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField { model: String, field: String },

    #[error("sort field '{field}' is not sortable")]
    UnsortableField { field: String },

    #[error("field '{field}' does not support full-text matching; declare it with full_text_search")]
    NotFullText { field: String },

    #[error("field '{field}' does not support containment; it is not a list field")]
    NotAList { field: String },

    #[error("field '{field}' ({kind}) does not support the {op} operator")]
    UnsupportedOperator {
        field: String,
        kind: &'static str,
        op: &'static str,
    },

    #[error("malformed query expression: {message}")]
    MalformedExpression { message: String },

    #[error("vector field '{field}' only accepts KNN expressions")]
    VectorFieldComparison { field: String },

    #[error("unknown projection path '{path}' on model '{model}'")]
    UnknownProjectionPath { model: String, path: String },

    #[error("page() requires an explicit sort_by for stable ordering")]
    UnsortedPage,

    #[error("field '{field}' was not loaded by this projection")]
    FieldNotLoaded { field: String },
}

/// Top-level error type for the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("not found: {key}")]
    NotFound { key: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("server is missing the {module} module; {hint}")]
    Capability { module: &'static str, hint: String },

    #[error("indexing requires database 0, the connection URL selects database {db}")]
    DatabaseNumber { db: i64 },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Detect the "unknown command" reply RediSearch-less servers give and
    /// upgrade it to a capability error with an actionable hint.
    pub fn from_redis_for(command: &'static str, err: redis::RedisError) -> Self {
        let msg = err.to_string();
        if msg.contains("unknown command") {
            let module = if command.starts_with("JSON.") { "RedisJSON" } else { "RediSearch" };
            return Error::Capability {
                module,
                hint: format!(
                    "command {} was rejected; run against redis-stack or load the module",
                    command
                ),
            };
        }
        Error::Redis(err)
    }

    /// True for errors a caller can reasonably retry (wire-level failures).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Redis(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_render_field_names() {
        let err = SchemaError::FullTextOnList { field: "tags".into() };
        assert!(err.to_string().contains("tags"));
        let err = SchemaError::SeparatorInValue { field: "skills".into(), separator: '|' };
        assert!(err.to_string().contains('|'));
    }

    #[test]
    fn query_error_wraps_into_error() {
        let err: Error = QueryError::UnsortedPage.into();
        assert!(matches!(err, Error::Query(QueryError::UnsortedPage)));
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).is_transient());
        assert!(!Error::NotFound { key: "k".into() }.is_transient());
    }
}
