//! SQL dialects.
//!
//! A dialect answers three kinds of question for the formatter and the
//! command layer: which optional features the database supports
//! ([`SqlCapability`]), how fixed pieces of syntax are spelled
//! ([`SyntaxSymbol`]), and how types, parameters and identifiers are written.
//! [`AnsiDialect`] carries the SQL-92 defaults every other dialect starts from.

mod mysql;
mod postgres;
mod sqlite;
mod sqlserver;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;
pub use sqlserver::SqlServerDialect;

use crate::ast::SqlExpr;
use sqlpersist_core::{Error, ObjectExistsError, SqlType};
use std::fmt;

/// Optional database features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlCapability {
    /// `DEFERRABLE INITIALLY DEFERRED` foreign keys
    Deferrability,
    /// `OUTPUT INSERTED.col` before `VALUES`
    InsertOutput,
    /// `RETURNING col` after `VALUES`
    InsertReturning,
    /// `SET IDENTITY_INSERT t ON|OFF` around explicit identity values
    PragmaIdentityInsert,
    SelectForUpdate,
    /// Foreign keys may be added after table creation
    AlterTableAddConstraints,
    CascadeAction,
    DeleteAction,
    SetNullAction,
    SetDefaultAction,
    /// Auto-increment columns may appear in an UPDATE
    UpdateAutoIncrementColumns,
    /// Booleans are written inline instead of bound
    InlineBooleans,
    /// Concatenation uses `CONCAT(a, b)` instead of an operator
    ConcatFunction,
    InformationSchema,
}

impl SqlCapability {
    pub const fn name(self) -> &'static str {
        match self {
            SqlCapability::Deferrability => "Deferrability",
            SqlCapability::InsertOutput => "InsertOutput",
            SqlCapability::InsertReturning => "InsertReturning",
            SqlCapability::PragmaIdentityInsert => "PragmaIdentityInsert",
            SqlCapability::SelectForUpdate => "SelectForUpdate",
            SqlCapability::AlterTableAddConstraints => "AlterTableAddConstraints",
            SqlCapability::CascadeAction => "CascadeAction",
            SqlCapability::DeleteAction => "DeleteAction",
            SqlCapability::SetNullAction => "SetNullAction",
            SqlCapability::SetDefaultAction => "SetDefaultAction",
            SqlCapability::UpdateAutoIncrementColumns => "UpdateAutoIncrementColumns",
            SqlCapability::InlineBooleans => "InlineBooleans",
            SqlCapability::ConcatFunction => "ConcatFunction",
            SqlCapability::InformationSchema => "InformationSchema",
        }
    }
}

impl fmt::Display for SqlCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed pieces of syntax a dialect may spell differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxSymbol {
    IdentifierQuote,
    StringQuote,
    /// Replacement for an embedded string quote
    StringEscape,
    ParameterPrefix,
    AutoIncrement,
    Null,
    Like,
    ConcatOperator,
    True,
    False,
    /// Expression selecting the identity generated by the last insert;
    /// empty when the dialect has none
    LastInsertIdentity,
}

/// How `skip`/`take` are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitStyle {
    /// `LIMIT skip, take`
    #[default]
    LimitSkipTake,
    /// `LIMIT take OFFSET skip`
    LimitOffset,
    /// `OFFSET skip ROWS FETCH NEXT take ROWS ONLY`
    OffsetFetch,
}

/// Symbols shared by the ANSI defaults.
pub const fn ansi_symbol(symbol: SyntaxSymbol) -> &'static str {
    match symbol {
        SyntaxSymbol::IdentifierQuote => "\"",
        SyntaxSymbol::StringQuote => "'",
        SyntaxSymbol::StringEscape => "''",
        SyntaxSymbol::ParameterPrefix => "@",
        SyntaxSymbol::AutoIncrement => "AUTOINCREMENT",
        SyntaxSymbol::Null => "NULL",
        SyntaxSymbol::Like => "LIKE",
        SyntaxSymbol::ConcatOperator => "||",
        SyntaxSymbol::True => "TRUE",
        SyntaxSymbol::False => "FALSE",
        SyntaxSymbol::LastInsertIdentity => "",
    }
}

/// A SQL dialect.
///
/// Every method except [`name`](SqlDialect::name) and
/// [`supports_capability`](SqlDialect::supports_capability) has an ANSI
/// default.
pub trait SqlDialect: Send + Sync + fmt::Debug {
    /// Dialect name used in logs and errors.
    fn name(&self) -> &'static str;

    fn supports_capability(&self, capability: SqlCapability) -> bool;

    fn syntax_symbol(&self, symbol: SyntaxSymbol) -> &'static str {
        ansi_symbol(symbol)
    }

    /// Marker for the parameter at `index` (0-based, in text order).
    fn parameter_marker(&self, index: usize) -> String {
        format!("{}p{}", self.syntax_symbol(SyntaxSymbol::ParameterPrefix), index)
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::LimitSkipTake
    }

    /// Column type as written in DDL.
    fn data_type(&self, sql_type: &SqlType) -> String {
        sql_type.sql_name()
    }

    /// Quote an identifier, doubling embedded quote characters.
    fn quote_identifier(&self, name: &str) -> String {
        let quote = self.syntax_symbol(SyntaxSymbol::IdentifierQuote);
        let doubled = format!("{quote}{quote}");
        format!("{quote}{}{quote}", name.replace(quote, &doubled))
    }

    /// Turn a driver error into a typed error where the dialect recognizes it.
    ///
    /// `related_sql` is the statement (or its literal text) that failed.
    /// Errors the dialect does not recognize are returned unchanged.
    fn decorate_error(&self, error: Error, type_name: Option<&str>, related_sql: &str) -> Error {
        match error {
            Error::Query(q) if q.is_unique_violation() => {
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

    /// Statement switching foreign key enforcement, if the dialect has one.
    fn foreign_key_checks(&self, _enabled: bool) -> Option<SqlExpr> {
        None
    }

    /// Statement wrapping an insert that writes explicit identity values.
    fn identity_insert(&self, table: &str, enabled: bool) -> Option<SqlExpr> {
        if !self.supports_capability(SqlCapability::PragmaIdentityInsert) {
            return None;
        }
        Some(SqlExpr::SetCommand {
            name: "IDENTITY_INSERT".to_string(),
            target: Some(Box::new(SqlExpr::table(table, None))),
            value: if enabled { "ON" } else { "OFF" }.to_string(),
        })
    }
}

/// Generic SQL-92 dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiDialect;

impl SqlDialect for AnsiDialect {
    fn name(&self) -> &'static str {
        "ansi"
    }

    fn supports_capability(&self, capability: SqlCapability) -> bool {
        matches!(
            capability,
            SqlCapability::SelectForUpdate
                | SqlCapability::AlterTableAddConstraints
                | SqlCapability::CascadeAction
                | SqlCapability::DeleteAction
                | SqlCapability::SetNullAction
                | SqlCapability::SetDefaultAction
                | SqlCapability::UpdateAutoIncrementColumns
                | SqlCapability::InformationSchema
        )
    }
}

/// Look up a shipped dialect by name (case-insensitive).
pub fn dialect_for_name(name: &str) -> Option<Box<dyn SqlDialect>> {
    match name.to_ascii_lowercase().as_str() {
        "ansi" | "sql92" => Some(Box::new(AnsiDialect)),
        "sqlite" => Some(Box::new(SqliteDialect)),
        "postgres" | "postgresql" => Some(Box::new(PostgresDialect)),
        "mysql" => Some(Box::new(MySqlDialect)),
        "sqlserver" | "mssql" => Some(Box::new(SqlServerDialect)),
        _ => None,
    }
}
