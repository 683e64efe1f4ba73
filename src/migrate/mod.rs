//! Migrations: schema snapshots (index rebuilds) and versioned data
//! transformations, plus the built-in datetime encoding transition.

pub mod data;
pub mod datetime;
pub mod runner;
pub mod schema;

/// Prefix of every server-side key the migration machinery owns.
pub const RESERVED_PREFIX: &str = "redis_om";

pub use data::{DataMigration, DataMigrationRegistration, DataMigrationRegistry};
pub use datetime::{check_datetime_schema, guard_datetime_schema, DatetimeTransition, SchemaDrift};
pub use runner::{
    DataMigrationOptions, DataMigrationResult, DataMigrationRunner, DataMigrationStatus,
    FailurePolicy, KeyAction, MigrationContext, MigrationCounts, ProgressCheckpoint,
};
pub use schema::{
    SchemaFileStore, SchemaMigrationFile, SchemaMigrator, SchemaRunReport, SchemaState,
    SchemaStatus,
};
