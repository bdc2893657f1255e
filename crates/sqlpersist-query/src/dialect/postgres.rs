use super::{SqlCapability, SqlDialect, SyntaxSymbol, ansi_symbol};
use sqlpersist_core::SqlType;

/// PostgreSQL dialect.
///
/// Server-generated values are read back with `RETURNING`; foreign keys are
/// created deferrable so no enforcement switch is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn supports_capability(&self, capability: SqlCapability) -> bool {
        matches!(
            capability,
            SqlCapability::Deferrability
                | SqlCapability::InsertReturning
                | SqlCapability::SelectForUpdate
                | SqlCapability::AlterTableAddConstraints
                | SqlCapability::CascadeAction
                | SqlCapability::DeleteAction
                | SqlCapability::SetNullAction
                | SqlCapability::SetDefaultAction
                | SqlCapability::UpdateAutoIncrementColumns
                | SqlCapability::InlineBooleans
                | SqlCapability::InformationSchema
        )
    }

    fn syntax_symbol(&self, symbol: SyntaxSymbol) -> &'static str {
        match symbol {
            SyntaxSymbol::ParameterPrefix => "$",
            SyntaxSymbol::AutoIncrement => "GENERATED BY DEFAULT AS IDENTITY",
            SyntaxSymbol::LastInsertIdentity => "lastval()",
            other => ansi_symbol(other),
        }
    }

    fn parameter_marker(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    fn limit_style(&self) -> super::LimitStyle {
        super::LimitStyle::LimitOffset
    }

    fn data_type(&self, sql_type: &SqlType) -> String {
        match sql_type {
            SqlType::Blob => "BYTEA".to_string(),
            SqlType::Json => "JSONB".to_string(),
            other => other.sql_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types() {
        assert_eq!(PostgresDialect.data_type(&SqlType::Blob), "BYTEA");
        assert_eq!(PostgresDialect.data_type(&SqlType::Json), "JSONB");
        assert_eq!(PostgresDialect.data_type(&SqlType::Integer), "INTEGER");
    }

    #[test]
    fn test_returning_supported() {
        assert!(PostgresDialect.supports_capability(SqlCapability::InsertReturning));
        assert!(!PostgresDialect.supports_capability(SqlCapability::InsertOutput));
    }
}
