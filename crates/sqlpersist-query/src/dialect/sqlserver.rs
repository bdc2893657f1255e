use super::{LimitStyle, SqlCapability, SqlDialect, SyntaxSymbol, ansi_symbol};
use sqlpersist_core::SqlType;

/// SQL Server dialect.
///
/// Generated values are read back through `OUTPUT INSERTED`, and explicit
/// identity values need `SET IDENTITY_INSERT`. Referential actions other than
/// no-action are not emitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn supports_capability(&self, capability: SqlCapability) -> bool {
        match capability {
            SqlCapability::InsertOutput | SqlCapability::PragmaIdentityInsert => true,
            SqlCapability::Deferrability
            | SqlCapability::CascadeAction
            | SqlCapability::DeleteAction
            | SqlCapability::SetNullAction
            | SqlCapability::SetDefaultAction
            | SqlCapability::UpdateAutoIncrementColumns => false,
            SqlCapability::AlterTableAddConstraints | SqlCapability::InformationSchema => true,
            SqlCapability::InsertReturning
            | SqlCapability::SelectForUpdate
            | SqlCapability::InlineBooleans
            | SqlCapability::ConcatFunction => false,
        }
    }

    fn syntax_symbol(&self, symbol: SyntaxSymbol) -> &'static str {
        match symbol {
            SyntaxSymbol::AutoIncrement => "IDENTITY(1,1)",
            SyntaxSymbol::ConcatOperator => "+",
            SyntaxSymbol::LastInsertIdentity => "SCOPE_IDENTITY()",
            other => ansi_symbol(other),
        }
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::OffsetFetch
    }

    fn data_type(&self, sql_type: &SqlType) -> String {
        match sql_type {
            SqlType::Text => "NVARCHAR(MAX)".to_string(),
            SqlType::VarChar(n) => format!("NVARCHAR({n})"),
            SqlType::Boolean => "BIT".to_string(),
            SqlType::Timestamp => "DATETIME2".to_string(),
            SqlType::Blob => "VARBINARY(MAX)".to_string(),
            SqlType::Uuid => "UNIQUEIDENTIFIER".to_string(),
            SqlType::Double => "FLOAT".to_string(),
            SqlType::Json => "NVARCHAR(MAX)".to_string(),
            other => other.sql_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types() {
        assert_eq!(SqlServerDialect.data_type(&SqlType::Text), "NVARCHAR(MAX)");
        assert_eq!(SqlServerDialect.data_type(&SqlType::Boolean), "BIT");
        assert_eq!(SqlServerDialect.data_type(&SqlType::BigInt), "BIGINT");
    }

    #[test]
    fn test_offset_fetch() {
        assert_eq!(SqlServerDialect.limit_style(), LimitStyle::OffsetFetch);
    }
}
