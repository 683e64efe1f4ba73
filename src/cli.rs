//! CLI utilities for migration management.
//!
//! Services embed these commands in their own binaries; the library keeps
//! the logic thin and delegates to the migrators. Exit codes: 0 success,
//! 1 transient failure (retry is reasonable), 2 fatal (configuration or
//! schema drift), 3 partial (applied with errors).

use std::fs;
use std::str::FromStr;

use clap::{Parser, Subcommand};

use crate::client::RedisClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::migrate::{
    check_datetime_schema, DataMigrationOptions, DataMigrationRegistry, DataMigrationRunner,
    FailurePolicy, SchemaMigrator, SchemaState,
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_TRANSIENT: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_PARTIAL: i32 = 3;

#[derive(Parser)]
#[command(name = "redis-om")]
#[command(about = "Schema and data migration management for redis-om models")]
pub struct OmCli {
    #[command(subcommand)]
    pub command: OmCommand,
}

#[derive(Subcommand)]
pub enum OmCommand {
    /// Manage secondary-index (schema) migrations
    Migrate {
        #[command(subcommand)]
        command: SchemaCommand,
    },
    /// Manage data migrations
    MigrateData {
        #[command(subcommand)]
        command: DataCommand,
    },
}

#[derive(Subcommand)]
pub enum SchemaCommand {
    /// Report drift between code, migration files, and the server
    Status,
    /// Snapshot changed model definitions into migration files
    Create {
        /// Short name embedded in the file names
        slug: String,
    },
    /// Apply pending schema migrations in order
    Run,
    /// Rebuild the previous definition recorded in a migration file
    Rollback {
        /// Migration id (timestamp_slug)
        id: String,
    },
}

#[derive(Subcommand)]
pub enum DataCommand {
    /// List data migrations and whether they are applied
    Status,
    /// Write a skeleton data-migration source file
    Create {
        /// Short name for the migration
        slug: String,
    },
    /// Apply pending data migrations in dependency order
    Run {
        /// Read and transform, but write nothing
        #[arg(long)]
        dry_run: bool,
        /// Keys per SCAN batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// fail | skip | log_and_skip | default
        #[arg(long)]
        failure_mode: Option<String>,
        /// Abort after this many errored keys
        #[arg(long)]
        max_errors: Option<u64>,
        /// Process at most this many keys per migration
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Check the applied set against the registry
    Verify {
        /// Also run the datetime schema drift check
        #[arg(long)]
        check_data: bool,
    },
    /// Roll back one applied, reversible migration
    Rollback { id: String },
    /// Show the saved progress checkpoint of a migration
    Progress { id: String },
    /// Drop the saved progress checkpoint of a migration
    ClearProgress { id: String },
    /// Compare server-side index kinds of datetime fields to the schema
    CheckSchema,
    /// Summarize applied migrations and checkpoint counters
    Stats,
}

/// Parse argv and execute; returns the process exit code.
pub async fn run_from_args() -> i32 {
    let cli = OmCli::parse();
    run(cli).await
}

pub async fn run(cli: OmCli) -> i32 {
    let config = Config::from_env();
    let client = match RedisClient::new(config).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("connection failed: {e}");
            return EXIT_TRANSIENT;
        }
    };
    let outcome = match cli.command {
        OmCommand::Migrate { command } => run_schema_command(&client, command).await,
        OmCommand::MigrateData { command } => run_data_command(&client, command).await,
    };
    match outcome {
        Ok(code) => code,
        Err(e) if e.is_transient() => {
            eprintln!("error: {e}");
            EXIT_TRANSIENT
        }
        Err(e) => {
            eprintln!("error: {e}");
            EXIT_FATAL
        }
    }
}

async fn run_schema_command(client: &RedisClient, command: SchemaCommand) -> Result<i32> {
    let migrator = SchemaMigrator::new(client.clone());
    match command {
        SchemaCommand::Status => {
            let statuses = migrator.status().await?;
            if statuses.is_empty() {
                println!("no registered models");
                return Ok(EXIT_OK);
            }
            let mut drifted = false;
            for status in statuses {
                let label = match status.state {
                    SchemaState::UpToDate => "up-to-date",
                    SchemaState::PendingCreate => "pending-create",
                    SchemaState::PendingDrift => "pending-drift",
                    SchemaState::OrphanOnServer => "orphan-on-server",
                };
                drifted |= status.state != SchemaState::UpToDate;
                println!("{:<40} {}", status.model, label);
            }
            Ok(if drifted { EXIT_FATAL } else { EXIT_OK })
        }
        SchemaCommand::Create { slug } => {
            let paths = migrator.create(&slug)?;
            if paths.is_empty() {
                println!("all model definitions match their latest snapshots");
            }
            for path in paths {
                println!("wrote {}", path.display());
            }
            Ok(EXIT_OK)
        }
        SchemaCommand::Run => {
            let report = migrator.run().await?;
            println!("applied {} migration(s), skipped {}", report.applied.len(), report.skipped.len());
            Ok(EXIT_OK)
        }
        SchemaCommand::Rollback { id } => {
            migrator.rollback(&id).await?;
            println!("rolled back {id}");
            Ok(EXIT_OK)
        }
    }
}

async fn run_data_command(client: &RedisClient, command: DataCommand) -> Result<i32> {
    let registry = DataMigrationRegistry::discover()?;
    let runner = DataMigrationRunner::new(client.clone(), registry);
    match command {
        DataCommand::Status => {
            for status in runner.status().await? {
                println!(
                    "{:<40} {:<12} {}",
                    status.id,
                    if status.applied { "applied" } else { "pending" },
                    status.description
                );
            }
            Ok(EXIT_OK)
        }
        DataCommand::Create { slug } => {
            let path = write_data_migration_skeleton(client.config(), &slug)?;
            println!("wrote {}", path.display());
            Ok(EXIT_OK)
        }
        DataCommand::Run { dry_run, batch_size, failure_mode, max_errors, limit } => {
            let mut options = DataMigrationOptions::from_config(client.config());
            options.dry_run = dry_run;
            if let Some(size) = batch_size {
                options.batch_size = size;
            }
            if let Some(mode) = failure_mode {
                options.failure_policy = FailurePolicy::from_str(&mode)?;
            }
            options.max_errors = max_errors;
            options.limit = limit;
            let results = runner.with_options(options).run().await?;
            let mut errored = false;
            for result in &results {
                errored |= result.counts.errored > 0;
                println!(
                    "{}: seen={} ok={} skipped={} errored={}",
                    result.id,
                    result.counts.seen,
                    result.counts.ok,
                    result.counts.skipped,
                    result.counts.errored
                );
            }
            if results.is_empty() {
                println!("no pending data migrations");
            }
            Ok(if errored { EXIT_PARTIAL } else { EXIT_OK })
        }
        DataCommand::Verify { check_data } => {
            let unknown = runner.verify().await?;
            for id in &unknown {
                println!("applied migration '{id}' is not in the registry");
            }
            let mut drifted = false;
            if check_data {
                for drift in check_datetime_schema(client).await? {
                    drifted = true;
                    println!(
                        "{}.{}: indexed as {} (expected NUMERIC) on {}",
                        drift.model, drift.field, drift.server_kind, drift.index
                    );
                }
            }
            Ok(if unknown.is_empty() && !drifted { EXIT_OK } else { EXIT_FATAL })
        }
        DataCommand::Rollback { id } => {
            runner.rollback(&id).await?;
            println!("rolled back {id}");
            Ok(EXIT_OK)
        }
        DataCommand::Progress { id } => {
            match runner.progress(&id).await? {
                None => println!("no checkpoint for {id}"),
                Some(checkpoint) => println!(
                    "{}: cursor={} last_key={:?} seen={} ok={} skipped={} errored={}",
                    checkpoint.migration_id,
                    checkpoint.cursor,
                    checkpoint.last_key,
                    checkpoint.counts.seen,
                    checkpoint.counts.ok,
                    checkpoint.counts.skipped,
                    checkpoint.counts.errored
                ),
            }
            Ok(EXIT_OK)
        }
        DataCommand::ClearProgress { id } => {
            runner.clear_progress(&id).await?;
            println!("cleared progress for {id}");
            Ok(EXIT_OK)
        }
        DataCommand::CheckSchema => {
            let drift = check_datetime_schema(client).await?;
            if drift.is_empty() {
                println!("no datetime index drift detected");
                return Ok(EXIT_OK);
            }
            for d in drift {
                println!(
                    "{}.{}: indexed as {} (expected NUMERIC) on {}",
                    d.model, d.field, d.server_kind, d.index
                );
            }
            Ok(EXIT_FATAL)
        }
        DataCommand::Stats => {
            let applied = runner.applied_ids().await?;
            println!("{} migration(s) applied", applied.len());
            for id in applied {
                if let Some(checkpoint) = runner.progress(&id).await? {
                    println!(
                        "{id}: seen={} ok={} skipped={} errored={}",
                        checkpoint.counts.seen,
                        checkpoint.counts.ok,
                        checkpoint.counts.skipped,
                        checkpoint.counts.errored
                    );
                } else {
                    println!("{id}");
                }
            }
            Ok(EXIT_OK)
        }
    }
}

fn write_data_migration_skeleton(config: &Config, slug: &str) -> Result<std::path::PathBuf> {
    let dir = config.migrations_dir.join("data-migrations");
    fs::create_dir_all(&dir)?;
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let id = format!("{stamp}_{slug}");
    let path = dir.join(format!("{id}.rs"));
    if path.exists() {
        return Err(Error::Migration(format!("{} already exists", path.display())));
    }
    let type_name: String = slug
        .split(['_', '-'])
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    let skeleton = format!(
        r#"use async_trait::async_trait;
use redis_om::{{register_data_migration, DataMigration, MigrationContext}};

#[derive(Default)]
pub struct {type_name};

register_data_migration!({type_name});

#[async_trait]
impl DataMigration for {type_name} {{
    fn id(&self) -> &str {{
        "{id}"
    }}

    fn description(&self) -> &str {{
        "describe what this migration does"
    }}

    async fn up(&self, ctx: &MigrationContext) -> anyhow::Result<()> {{
        let _ = ctx;
        Ok(())
    }}
}}
"#
    );
    fs::write(&path, skeleton)?;
    Ok(path)
}
