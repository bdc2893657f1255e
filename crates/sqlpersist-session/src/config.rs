//! Model and database configuration.
//!
//! Both structs deserialize with every field optional, so a partial JSON or
//! TOML document only overrides what it names. Reading the document is up
//! to the application.

use serde::{Deserialize, Serialize};
use sqlpersist_query::FormatOptions;

/// Category used when a transaction does not name one.
pub const DEFAULT_CATEGORY: &str = "default";

/// Settings shared by every database of a data access model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Category transactions use unless told otherwise
    pub default_category: String,
    /// Cap on insert passes per flush; defaults to the number of new objects
    pub max_insert_passes: Option<usize>,
    /// Reject zero or sentinel server-generated keys
    pub validate_server_generated_ids: bool,
    /// Log each statement with its values inlined
    pub log_query_text: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_category: DEFAULT_CATEGORY.to_string(),
            max_insert_passes: None,
            validate_server_generated_ids: true,
            log_query_text: false,
        }
    }
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_category(mut self, category: impl Into<String>) -> Self {
        self.default_category = category.into();
        self
    }

    pub fn max_insert_passes(mut self, passes: usize) -> Self {
        self.max_insert_passes = Some(passes);
        self
    }

    pub fn validate_server_generated_ids(mut self, value: bool) -> Self {
        self.validate_server_generated_ids = value;
        self
    }

    pub fn log_query_text(mut self, value: bool) -> Self {
        self.log_query_text = value;
        self
    }
}

/// Settings for one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Category name, matched case-insensitively
    pub category: String,
    /// Prepended to every table name
    pub table_name_prefix: String,
    pub format_options: FormatOptions,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            table_name_prefix: String::new(),
            format_options: FormatOptions::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ..Self::default()
        }
    }

    pub fn table_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_name_prefix = prefix.into();
        self
    }

    pub fn format_options(mut self, options: FormatOptions) -> Self {
        self.format_options = options;
        self
    }
}
