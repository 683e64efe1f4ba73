//! # redis-om
//!
//! Object mapping for a Redis server with search and JSON capabilities:
//! declare typed record schemas, and the library handles serialization to
//! Hash or JSON values, secondary-index lifecycle, a fluent query DSL
//! compiled to the server's search grammar, and versioned migrations of
//! both indexes and stored data.
//!
//! ## Features
//!
//! - **Typed records**: a [`Model`] emits its record definition up front;
//!   registration compiles it once and surfaces schema errors eagerly
//! - **Two storage layouts**: flat Hash records and JSON documents with
//!   embedded records unfolded into the parent's index
//! - **Query DSL**: operator-overloadable expressions (`&`, `|`, `!`),
//!   ranges, full-text, containment, geo, and KNN vector search
//! - **Schema migrations**: fingerprinted index definitions snapshotted to
//!   files, with drift detection and rollback
//! - **Data migrations**: inventory-discovered transformations with a
//!   dependency DAG, batched scans, checkpointed resume, and a built-in
//!   datetime encoding transition
//!
//! ## Quick Start
//!
//! ```no_run
//! use redis_om::{field, FieldDef, FieldType, Model, RecordDef, Repository, RedisClient};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Customer {
//!     pk: String,
//!     last_name: String,
//!     age: i64,
//! }
//!
//! impl Model for Customer {
//!     fn record_def() -> RecordDef {
//!         RecordDef::hash("Customer")
//!             .field(FieldDef::new("pk", FieldType::String).primary_key())
//!             .field(FieldDef::new("last_name", FieldType::String).indexed())
//!             .field(FieldDef::new("age", FieldType::Integer).indexed().sortable())
//!     }
//! }
//!
//! # async fn demo() -> redis_om::Result<()> {
//! let client = RedisClient::from_env().await?;
//! let repo = Repository::<Customer>::new(client)?;
//! repo.ensure_index().await?;
//!
//! let mut customer = Customer { pk: String::new(), last_name: "Brookins".into(), age: 38 };
//! let pk = repo.save(&mut customer).await?;
//!
//! let found = repo
//!     .find([field("last_name").eq("Brookins") & field("age").gt(30)])
//!     .sort_by("-age")
//!     .first()
//!     .await?;
//! assert_eq!(found.age, 38);
//! repo.delete(&pk).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod index;
pub mod keys;
pub mod migrate;
pub mod model;
pub mod query;
pub mod repository;
pub mod schema;
pub mod value;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export main types for easy access
pub use client::{CmdArg, RedisClient, ServerCapabilities};
pub use config::Config;
pub use error::{Error, QueryError, Result, SchemaError};
pub use index::{IndexManager, IndexOutcome};
pub use keys::{KeySpace, PrimaryKeyCreator, UlidCreator};
pub use migrate::{
    check_datetime_schema, guard_datetime_schema, DataMigration, DataMigrationOptions,
    DataMigrationRegistry, DataMigrationRunner, DatetimeTransition, FailurePolicy, KeyAction,
    MigrationContext, MigrationCounts, ProgressCheckpoint, SchemaMigrator,
};
pub use model::{register, registered_schemas, schema_of, Model};
pub use query::{field, Expr, Field, GeoUnit, Partial, Query, QueryValue};
pub use repository::Repository;
pub use schema::{
    CompiledSchema, DistanceMetric, FieldDef, FieldKind, FieldType, IndexedField, Meta, RecordDef,
    StorageLayout, VectorAlgorithm, VectorOptions, VectorType,
};

#[cfg(feature = "cli")]
pub use cli::{run_from_args, OmCli};

// Re-export inventory for the macro
pub use inventory;

/// Register a data migration for automatic discovery. The migration type
/// must implement `Default` and [`DataMigration`].
///
/// # Example
///
/// ```ignore
/// use redis_om::{register_data_migration, DataMigration};
///
/// #[derive(Default)]
/// pub struct BackfillTags;
///
/// register_data_migration!(BackfillTags);
/// ```
#[macro_export]
macro_rules! register_data_migration {
    ($migration_type:ty) => {
        $crate::inventory::submit! {
            $crate::migrate::DataMigrationRegistration::new(
                stringify!($migration_type),
                || Box::new(<$migration_type>::default())
            )
        }
    };
}
