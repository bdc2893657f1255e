//! SQL compilation for sqlpersist.
//!
//! `sqlpersist-query` turns object queries and writes into dialect-specific
//! SQL text plus bound parameters.
//!
//! # Pipeline
//!
//! - **Bind**: [`Binder`] lowers a [`Query`] over a registered type into a
//!   [`SqlExpr`] tree (a projection over `"table" AS "T0"`).
//! - **Optimize**: [`optimize`] expands object operands into per-key
//!   comparisons, flattens updates and deletes over projections and removes
//!   redundant function calls.
//! - **Format**: [`SqlFormatter`] renders the tree for one [`SqlDialect`],
//!   producing a [`FormatResult`] that records where each parameter sits and
//!   whether the text can be cached and re-bound.
//!
//! [`query_text`] rebuilds a literal statement from a result for logs.

pub mod ast;
pub mod bind;
pub mod dialect;
pub mod format;
pub mod optimize;
pub mod query_text;
pub mod visit;

pub use ast::{
    AlterTableExpr, Assignment, BinaryOp, ColumnDefinition, Constraint, CreateIndexExpr,
    CreateTableExpr, DeleteExpr, ForeignKeyConstraint, IndexedColumn, InsertExpr, JoinKind,
    OrderBy, ProjectionExpr, SelectExpr, SqlExpr, SqlFunction, SqlNodeType, UnaryOp, UpdateExpr,
};
pub use bind::{Binder, Query, QueryExpr, QueryOrder, ROOT_ALIAS, table_name};
pub use dialect::{
    AnsiDialect, LimitStyle, MySqlDialect, PostgresDialect, SqlCapability, SqlDialect,
    SqlServerDialect, SqliteDialect, SyntaxSymbol, dialect_for_name,
};
pub use format::{FormatOptions, FormatResult, LocatedValue, SqlFormatter};
pub use optimize::{
    ForeignKeyConstraintAmender, ObjectOperandComparisonExpander, RedundantFunctionCallRemover,
    UpdateDeleteNormalizer, optimize,
};
pub use query_text::{literal, query_text};
pub use visit::{SqlRewriter, find_all};
