//! Data migrations: versioned transformations of stored records with a
//! dependency DAG, discovered through inventory or registered explicitly.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::migrate::runner::MigrationContext;

/// A named, idempotent data transformation. `down` is optional; the default
/// marks the migration as non-reversible.
#[async_trait]
pub trait DataMigration: Send + Sync {
    /// Stable identifier, referenced by other migrations' dependencies.
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Ids that must be applied before this migration runs.
    fn depends_on(&self) -> Vec<&str> {
        Vec::new()
    }

    async fn up(&self, ctx: &MigrationContext) -> anyhow::Result<()>;

    fn reversible(&self) -> bool {
        false
    }

    async fn down(&self, _ctx: &MigrationContext) -> anyhow::Result<()> {
        anyhow::bail!("migration '{}' is not reversible", self.id())
    }
}

/// Inventory registration for auto-discovered data migrations.
pub struct DataMigrationRegistration {
    pub name: &'static str,
    pub constructor: fn() -> Box<dyn DataMigration>,
}

impl DataMigrationRegistration {
    pub const fn new(name: &'static str, constructor: fn() -> Box<dyn DataMigration>) -> Self {
        Self { name, constructor }
    }
}

inventory::collect!(DataMigrationRegistration);

impl<'a> std::fmt::Debug for dyn DataMigration + 'a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMigration").field("id", &self.id()).finish()
    }
}

/// Registry of data migrations, ordered by the dependency DAG.
pub struct DataMigrationRegistry {
    migrations: Vec<Box<dyn DataMigration>>,
}

impl DataMigrationRegistry {
    pub fn new() -> Self {
        Self { migrations: Vec::new() }
    }

    /// Discover every migration registered through
    /// [`register_data_migration!`](crate::register_data_migration), plus
    /// the built-in datetime transition.
    pub fn discover() -> Result<Self> {
        let mut registry = Self::new();
        registry = registry.register(crate::migrate::datetime::DatetimeTransition)?;
        for registration in inventory::iter::<DataMigrationRegistration>() {
            let migration = (registration.constructor)();
            tracing::info!(name = registration.name, id = migration.id(), "auto-registered data migration");
            registry = registry.register_boxed(migration)?;
        }
        Ok(registry)
    }

    pub fn register<M: DataMigration + 'static>(self, migration: M) -> Result<Self> {
        self.register_boxed(Box::new(migration))
    }

    pub fn register_boxed(mut self, migration: Box<dyn DataMigration>) -> Result<Self> {
        if self.get(migration.id()).is_some() {
            return Err(Error::Migration(format!(
                "data migration id '{}' is registered twice",
                migration.id()
            )));
        }
        self.migrations.push(migration);
        Ok(self)
    }

    pub fn get(&self, id: &str) -> Option<&dyn DataMigration> {
        self.migrations.iter().find(|m| m.id() == id).map(|m| m.as_ref())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.id()).collect()
    }

    pub fn count(&self) -> usize {
        self.migrations.len()
    }

    /// Topological order over the dependency DAG. Unknown dependencies and
    /// cycles are fatal configuration errors.
    pub fn topo_order(&self) -> Result<Vec<&dyn DataMigration>> {
        let index: HashMap<&str, usize> = self
            .migrations
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id(), i))
            .collect();

        let mut in_degree = vec![0usize; self.migrations.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.migrations.len()];
        for (i, migration) in self.migrations.iter().enumerate() {
            for dep in migration.depends_on() {
                let dep_idx = *index.get(dep).ok_or_else(|| {
                    Error::Migration(format!(
                        "migration '{}' depends on unknown migration '{dep}'",
                        migration.id()
                    ))
                })?;
                dependents[dep_idx].push(i);
                in_degree[i] += 1;
            }
        }

        // Kahn's algorithm; ready set kept in registration order so runs are
        // deterministic across processes.
        let mut ready: VecDeque<usize> = (0..self.migrations.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut ordered = Vec::with_capacity(self.migrations.len());
        while let Some(i) = ready.pop_front() {
            ordered.push(self.migrations[i].as_ref());
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }
        if ordered.len() != self.migrations.len() {
            let stuck: HashSet<&str> = self
                .migrations
                .iter()
                .map(|m| m.id())
                .filter(|id| !ordered.iter().any(|m| &m.id() == id))
                .collect();
            return Err(Error::Migration(format!(
                "cyclic data-migration dependencies among: {stuck:?}"
            )));
        }
        Ok(ordered)
    }
}

impl Default for DataMigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub {
        id: &'static str,
        deps: Vec<&'static str>,
    }

    impl Stub {
        fn new(id: &'static str, deps: Vec<&'static str>) -> Self {
            Self { id, deps }
        }
    }

    #[async_trait]
    impl DataMigration for Stub {
        fn id(&self) -> &str {
            self.id
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn depends_on(&self) -> Vec<&str> {
            self.deps.clone()
        }

        async fn up(&self, _ctx: &MigrationContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn topo_order_respects_dependencies() {
        let registry = DataMigrationRegistry::new()
            .register(Stub::new("c", vec!["b"]))
            .unwrap()
            .register(Stub::new("a", vec![]))
            .unwrap()
            .register(Stub::new("b", vec!["a"]))
            .unwrap();
        let order: Vec<&str> = registry.topo_order().unwrap().iter().map(|m| m.id()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn cycles_are_fatal() {
        let registry = DataMigrationRegistry::new()
            .register(Stub::new("a", vec!["b"]))
            .unwrap()
            .register(Stub::new("b", vec!["a"]))
            .unwrap();
        let err = registry.topo_order().unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn unknown_dependency_is_fatal() {
        let registry = DataMigrationRegistry::new()
            .register(Stub::new("a", vec!["ghost"]))
            .unwrap();
        let err = registry.topo_order().unwrap_err();
        assert!(err.to_string().contains("unknown migration"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = DataMigrationRegistry::new()
            .register(Stub::new("a", vec![]))
            .unwrap()
            .register(Stub::new("a", vec![]));
        assert!(result.is_err());
    }

    #[test]
    fn default_down_is_not_reversible() {
        let stub = Stub::new("a", vec![]);
        assert!(!stub.reversible());
    }
}
