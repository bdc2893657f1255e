use super::{SqlCapability, SqlDialect, SyntaxSymbol, ansi_symbol};
use crate::ast::SqlExpr;
use sqlpersist_core::{Error, ObjectExistsError, SqlType};

/// MySQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn supports_capability(&self, capability: SqlCapability) -> bool {
        matches!(
            capability,
            SqlCapability::SelectForUpdate
                | SqlCapability::AlterTableAddConstraints
                | SqlCapability::CascadeAction
                | SqlCapability::DeleteAction
                | SqlCapability::SetNullAction
                | SqlCapability::UpdateAutoIncrementColumns
                | SqlCapability::ConcatFunction
                | SqlCapability::InlineBooleans
                | SqlCapability::InformationSchema
        )
    }

    fn syntax_symbol(&self, symbol: SyntaxSymbol) -> &'static str {
        match symbol {
            SyntaxSymbol::IdentifierQuote => "`",
            SyntaxSymbol::ParameterPrefix => "?",
            SyntaxSymbol::AutoIncrement => "AUTO_INCREMENT",
            SyntaxSymbol::LastInsertIdentity => "LAST_INSERT_ID()",
            other => ansi_symbol(other),
        }
    }

    fn parameter_marker(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn data_type(&self, sql_type: &SqlType) -> String {
        match sql_type {
            SqlType::Double => "DOUBLE".to_string(),
            SqlType::Uuid => "CHAR(36)".to_string(),
            SqlType::Timestamp => "DATETIME(6)".to_string(),
            other => other.sql_name(),
        }
    }

    fn decorate_error(&self, error: Error, type_name: Option<&str>, related_sql: &str) -> Error {
        match error {
            // ER_DUP_ENTRY reports sqlstate 23000 with a "Duplicate entry" message
            Error::Query(q)
                if q.is_unique_violation()
                    || (q.sqlstate.as_deref() == Some("23000")
                        && q.message.starts_with("Duplicate entry")) =>
            {
                Error::ObjectAlreadyExists(ObjectExistsError {
                    type_name: type_name.map(str::to_string),
                    constraint: q.constraint.clone(),
                    sql: Some(related_sql.to_string()),
                    source: q,
                })
            }
            other => other,
        }
    }

    fn foreign_key_checks(&self, enabled: bool) -> Option<SqlExpr> {
        Some(SqlExpr::SetCommand {
            name: "FOREIGN_KEY_CHECKS".to_string(),
            target: None,
            value: if enabled { "= 1" } else { "= 0" }.to_string(),
        })
    }
}
