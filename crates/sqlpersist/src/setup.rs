//! Building a [`DataAccessModel`] from configuration.
//!
//! A [`PersistenceConfig`] names the model settings and one entry per
//! database category, each with the dialect it speaks:
//!
//! ```json
//! {
//!   "model": { "log_query_text": true },
//!   "databases": [
//!     { "category": "default", "dialect": "postgres", "table_name_prefix": "app_" }
//!   ]
//! }
//! ```
//!
//! [`ModelBuilder`] pairs each entry with a connection factory supplied by
//! the application.

use serde::{Deserialize, Serialize};
use sqlpersist_core::{ConfigError, Error, Result, TypeRegistry};
use sqlpersist_query::dialect_for_name;
use sqlpersist_schema::SchemaManager;
use sqlpersist_session::{DataAccessModel, DatabaseConfig, ModelConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// One database entry: its settings plus a dialect name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    #[serde(flatten)]
    pub config: DatabaseConfig,
    /// `sqlite`, `postgres`, `mysql`, `sqlserver` or `ansi`
    pub dialect: String,
}

impl DatabaseEntry {
    pub fn new(config: DatabaseConfig, dialect: impl Into<String>) -> Self {
        Self {
            config,
            dialect: dialect.into(),
        }
    }
}

/// Complete configuration of a data access model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub model: ModelConfig,
    pub databases: Vec<DatabaseEntry>,
}

impl PersistenceConfig {
    /// Parse a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid persistence configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }
}

fn config_error(message: String) -> Error {
    Error::Config(ConfigError {
        message,
        source: None,
    })
}

/// Builder for [`DataAccessModel`].
#[derive(Debug)]
pub struct ModelBuilder<F> {
    registry: Arc<TypeRegistry>,
    config: PersistenceConfig,
    factories: HashMap<String, F>,
}

impl<F> ModelBuilder<F> {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            config: PersistenceConfig::default(),
            factories: HashMap::new(),
        }
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PersistenceConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn model_config(mut self, model: ModelConfig) -> Self {
        self.config.model = model;
        self
    }

    /// Add a database entry.
    #[must_use]
    pub fn database(mut self, config: DatabaseConfig, dialect: impl Into<String>) -> Self {
        self.config
            .databases
            .push(DatabaseEntry::new(config, dialect));
        self
    }

    /// Connection factory for `category`, matched case-insensitively.
    #[must_use]
    pub fn factory(mut self, category: &str, factory: F) -> Self {
        self.factories.insert(category.to_lowercase(), factory);
        self
    }

    /// Build the model.
    ///
    /// Fails when a dialect name is unknown, a category appears twice or
    /// has no factory, a factory has no database, or the default category
    /// has no database.
    pub fn build(self) -> Result<DataAccessModel<F>> {
        let Self {
            registry,
            config,
            mut factories,
        } = self;

        let mut model = DataAccessModel::new(registry, config.model.clone());
        let mut seen = Vec::with_capacity(config.databases.len());
        for entry in config.databases {
            let key = entry.config.category.to_lowercase();
            if seen.contains(&key) {
                return Err(config_error(format!(
                    "category '{}' is configured twice",
                    entry.config.category
                )));
            }
            let dialect = dialect_for_name(&entry.dialect).ok_or_else(|| {
                config_error(format!(
                    "unknown dialect '{}' for category '{}'",
                    entry.dialect, entry.config.category
                ))
            })?;
            let factory = factories.remove(&key).ok_or_else(|| {
                config_error(format!(
                    "no connection factory for category '{}'",
                    entry.config.category
                ))
            })?;
            model = model.with_database(entry.config, dialect, factory);
            seen.push(key);
        }

        if let Some(category) = factories.keys().next() {
            return Err(config_error(format!(
                "connection factory for category '{}' has no database",
                category
            )));
        }
        if let Err(e) = model.default_database() {
            return Err(config_error(format!(
                "default category '{}' has no database: {}",
                config.model.default_category, e
            )));
        }

        tracing::info!(
            databases = seen.len(),
            types = model.registry().len(),
            "Built data access model"
        );
        Ok(model)
    }
}

/// Schema manager for the database registered under `category`, using its
/// dialect and table prefix.
pub fn schema_manager<'a, F>(
    model: &'a DataAccessModel<F>,
    category: &str,
) -> Result<SchemaManager<'a>> {
    let database = model.database(category)?;
    Ok(
        SchemaManager::new(model.registry().as_ref(), database.dialect())
            .table_prefix(database.table_prefix()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlpersist_core::{PropertyDescriptor, SqlType, TypeDescriptor};
    use sqlpersist_query::FormatOptions;

    #[derive(Debug, PartialEq)]
    struct Factory(&'static str);

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(
            TypeRegistry::builder()
                .register(
                    TypeDescriptor::new("School").property(
                        PropertyDescriptor::scalar("Id", SqlType::BigInt)
                            .primary_key()
                            .auto_increment(),
                    ),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_config_from_json() {
        let config = PersistenceConfig::from_json(
            r#"{
                "model": { "log_query_text": true, "max_insert_passes": 4 },
                "databases": [
                    { "category": "default", "dialect": "postgres", "table_name_prefix": "app_" },
                    { "category": "Reports", "dialect": "sqlite",
                      "format_options": { "optimize_out_null_literals": true } }
                ]
            }"#,
        )
        .unwrap();

        assert!(config.model.log_query_text);
        assert_eq!(config.model.max_insert_passes, Some(4));
        assert!(config.model.validate_server_generated_ids);
        assert_eq!(config.databases.len(), 2);
        assert_eq!(config.databases[0].config.table_name_prefix, "app_");
        assert_eq!(config.databases[1].dialect, "sqlite");
        assert_eq!(
            config.databases[1].config.format_options,
            FormatOptions {
                evaluate_constant_placeholders: true,
                optimize_out_null_literals: true,
            }
        );
    }

    #[test]
    fn test_invalid_json_is_a_config_error() {
        let err = PersistenceConfig::from_json("{ \"databases\": 3 }").unwrap_err();
        match err {
            Error::Config(e) => {
                assert!(e.message.starts_with("invalid persistence configuration"));
                assert!(e.source.is_some());
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_build_registers_each_category() {
        let model = ModelBuilder::new(registry())
            .database(DatabaseConfig::default().table_name_prefix("app_"), "postgres")
            .database(DatabaseConfig::new("Reports"), "mysql")
            .factory("default", Factory("primary"))
            .factory("reports", Factory("reports"))
            .build()
            .unwrap();

        let primary = model.default_database().unwrap();
        assert_eq!(primary.dialect().name(), "postgres");
        assert_eq!(primary.factory(), &Factory("primary"));
        assert_eq!(primary.table_prefix(), "app_");

        let reports = model.database("REPORTS").unwrap();
        assert_eq!(reports.dialect().name(), "mysql");
        assert_eq!(reports.factory(), &Factory("reports"));
    }

    #[test]
    fn test_build_rejects_bad_configuration() {
        let unknown = ModelBuilder::new(registry())
            .database(DatabaseConfig::default(), "oracle")
            .factory("default", Factory("x"))
            .build();
        assert!(matches!(unknown, Err(Error::Config(_))));

        let no_factory = ModelBuilder::<Factory>::new(registry())
            .database(DatabaseConfig::default(), "sqlite")
            .build();
        assert!(matches!(no_factory, Err(Error::Config(_))));

        let orphan = ModelBuilder::new(registry())
            .database(DatabaseConfig::default(), "sqlite")
            .factory("default", Factory("x"))
            .factory("archive", Factory("y"))
            .build();
        assert!(matches!(orphan, Err(Error::Config(_))));

        let duplicate = ModelBuilder::new(registry())
            .database(DatabaseConfig::default(), "sqlite")
            .database(DatabaseConfig::new("DEFAULT"), "mysql")
            .factory("default", Factory("x"))
            .build();
        assert!(matches!(duplicate, Err(Error::Config(_))));

        let no_default = ModelBuilder::new(registry())
            .database(DatabaseConfig::new("reports"), "sqlite")
            .factory("reports", Factory("x"))
            .build();
        assert!(matches!(no_default, Err(Error::Config(_))));
    }

    #[test]
    fn test_schema_manager_uses_database_settings() {
        let model = ModelBuilder::new(registry())
            .database(DatabaseConfig::default().table_name_prefix("app_"), "sqlite")
            .factory("default", Factory("x"))
            .build()
            .unwrap();

        let statements = schema_manager(&model, "default")
            .unwrap()
            .statements()
            .unwrap();
        assert_eq!(
            statements,
            vec!["CREATE TABLE \"app_School\" (\"Id\" INTEGER PRIMARY KEY AUTOINCREMENT);".to_string()]
        );
        assert!(matches!(
            schema_manager(&model, "missing"),
            Err(Error::Transaction(_))
        ));
    }
}
