use super::{SqlCapability, SqlDialect, SyntaxSymbol, ansi_symbol};
use crate::ast::SqlExpr;
use regex::Regex;
use sqlpersist_core::{Error, ObjectExistsError, SqlType};
use std::sync::OnceLock;

/// Columns named by a `UNIQUE constraint failed: t.a, t.b` message.
fn failed_unique_columns(message: &str) -> Option<String> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^UNIQUE constraint failed: (.+)$").ok())
        .as_ref()?;
    pattern
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// SQLite dialect.
///
/// Integer keys are declared `INTEGER` so that `AUTOINCREMENT` is accepted,
/// and foreign key enforcement is switched with a pragma.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_capability(&self, capability: SqlCapability) -> bool {
        matches!(
            capability,
            SqlCapability::Deferrability
                | SqlCapability::CascadeAction
                | SqlCapability::DeleteAction
                | SqlCapability::SetNullAction
                | SqlCapability::SetDefaultAction
                | SqlCapability::UpdateAutoIncrementColumns
                | SqlCapability::InlineBooleans
        )
    }

    fn syntax_symbol(&self, symbol: SyntaxSymbol) -> &'static str {
        match symbol {
            SyntaxSymbol::ParameterPrefix => "?",
            SyntaxSymbol::True => "1",
            SyntaxSymbol::False => "0",
            SyntaxSymbol::LastInsertIdentity => "last_insert_rowid()",
            other => ansi_symbol(other),
        }
    }

    fn parameter_marker(&self, index: usize) -> String {
        format!("?{}", index + 1)
    }

    fn data_type(&self, sql_type: &SqlType) -> String {
        match sql_type {
            t if t.is_integer() => "INTEGER".to_string(),
            SqlType::Boolean => "INTEGER".to_string(),
            SqlType::Uuid => "BLOB".to_string(),
            SqlType::Json => "TEXT".to_string(),
            other => other.sql_name(),
        }
    }

    fn decorate_error(&self, error: Error, type_name: Option<&str>, related_sql: &str) -> Error {
        match error {
            // SQLITE_CONSTRAINT_UNIQUE / SQLITE_CONSTRAINT_PRIMARYKEY
            Error::Query(q)
                if q.is_unique_violation()
                    || matches!(q.sqlstate.as_deref(), Some("2067" | "1555"))
                    || q.message.starts_with("UNIQUE constraint failed") =>
            {
                Error::ObjectAlreadyExists(ObjectExistsError {
                    type_name: type_name.map(str::to_string),
                    constraint: q
                        .constraint
                        .clone()
                        .or_else(|| failed_unique_columns(&q.message)),
                    sql: Some(related_sql.to_string()),
                    source: q,
                })
            }
            other => other,
        }
    }

    fn foreign_key_checks(&self, enabled: bool) -> Option<SqlExpr> {
        Some(SqlExpr::Pragma(format!(
            "foreign_keys = {}",
            if enabled { "ON" } else { "OFF" }
        )))
    }
}
