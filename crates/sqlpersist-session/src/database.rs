//! Data access model and per-category database contexts.

use crate::command_cache::CommandCaches;
use crate::config::{DatabaseConfig, ModelConfig};
use crate::transaction::TransactionContext;
use sqlpersist_core::{
    ConnectionFactory, Error, Result, TransactionError, TransactionErrorKind, TypeRegistry,
};
use sqlpersist_query::{SqlDialect, SqlFormatter};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One database: its dialect, how to connect, and its template caches.
pub struct DatabaseContext<F> {
    config: DatabaseConfig,
    dialect: Box<dyn SqlDialect>,
    factory: F,
    caches: CommandCaches,
}

impl<F> DatabaseContext<F> {
    pub fn new(config: DatabaseConfig, dialect: Box<dyn SqlDialect>, factory: F) -> Self {
        Self {
            config,
            dialect,
            factory,
            caches: CommandCaches::default(),
        }
    }

    pub fn category(&self) -> &str {
        &self.config.category
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Insert and update templates, shared by every transaction on this
    /// database.
    pub fn caches(&self) -> &CommandCaches {
        &self.caches
    }

    pub fn table_prefix(&self) -> &str {
        &self.config.table_name_prefix
    }

    pub fn formatter(&self) -> SqlFormatter<'_> {
        SqlFormatter::new(self.dialect.as_ref(), self.config.format_options)
    }
}

impl<F> fmt::Debug for DatabaseContext<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseContext")
            .field("category", &self.config.category)
            .field("dialect", &self.dialect.name())
            .field("insert_templates", &self.caches.insert.len())
            .field("update_templates", &self.caches.update.len())
            .finish_non_exhaustive()
    }
}

/// Registered types plus the databases they persist to.
pub struct DataAccessModel<F> {
    registry: Arc<TypeRegistry>,
    config: ModelConfig,
    databases: HashMap<String, DatabaseContext<F>>,
}

impl<F> DataAccessModel<F> {
    pub fn new(registry: Arc<TypeRegistry>, config: ModelConfig) -> Self {
        Self {
            registry,
            config,
            databases: HashMap::new(),
        }
    }

    /// Add a database under `config.category`, replacing any database with
    /// the same category.
    pub fn with_database(
        mut self,
        config: DatabaseConfig,
        dialect: Box<dyn SqlDialect>,
        factory: F,
    ) -> Self {
        let key = config.category.to_lowercase();
        tracing::debug!(category = %config.category, dialect = dialect.name(), "Registered database");
        self.databases
            .insert(key, DatabaseContext::new(config, dialect, factory));
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Database for `category`, matched case-insensitively.
    pub fn database(&self, category: &str) -> Result<&DatabaseContext<F>> {
        self.databases
            .get(&category.to_lowercase())
            .ok_or_else(|| {
                Error::Transaction(TransactionError {
                    kind: TransactionErrorKind::UnknownCategory,
                    message: format!("no database registered for category '{}'", category),
                })
            })
    }

    pub fn default_database(&self) -> Result<&DatabaseContext<F>> {
        self.database(&self.config.default_category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.databases.values().map(DatabaseContext::category)
    }
}

impl<F: ConnectionFactory> DataAccessModel<F> {
    /// Start a transaction on the default category.
    pub fn begin(&self) -> TransactionContext<'_, F> {
        TransactionContext::new(self)
    }
}

impl<F> fmt::Debug for DataAccessModel<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataAccessModel")
            .field("types", &self.registry.len())
            .field("config", &self.config)
            .field("databases", &self.databases.values().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFactory, MockState, registry};
    use sqlpersist_query::{PostgresDialect, SqliteDialect};

    fn model() -> DataAccessModel<MockFactory> {
        let state = MockState::shared();
        DataAccessModel::new(registry(), ModelConfig::default())
            .with_database(
                DatabaseConfig::new("Default"),
                Box::new(SqliteDialect),
                MockFactory {
                    state: Arc::clone(&state),
                },
            )
            .with_database(
                DatabaseConfig::new("Reports").table_name_prefix("rpt_"),
                Box::new(PostgresDialect),
                MockFactory { state },
            )
    }

    #[test]
    fn test_categories_are_case_insensitive() {
        let model = model();
        assert_eq!(model.database("REPORTS").unwrap().dialect().name(), "postgres");
        assert_eq!(model.database("reports").unwrap().table_prefix(), "rpt_");
        assert_eq!(model.default_database().unwrap().dialect().name(), "sqlite");

        let mut categories: Vec<_> = model.categories().collect();
        categories.sort_unstable();
        assert_eq!(categories, vec!["Default", "Reports"]);
    }

    #[test]
    fn test_unknown_category() {
        let err = model().database("archive").unwrap_err();
        assert!(matches!(
            err,
            Error::Transaction(ref e) if e.kind == TransactionErrorKind::UnknownCategory
        ));
    }

    #[test]
    fn test_each_database_has_its_own_caches() {
        let model = model();
        let a = model.database("default").unwrap().caches();
        let b = model.database("reports").unwrap().caches();
        assert!(!std::ptr::eq(a, b));
        assert!(a.insert.is_empty() && b.update.is_empty());
    }
}
