//! Schema support for sqlpersist.
//!
//! This crate provides:
//! - DDL generation from a type registry ([`SchemaBuilder`])
//! - Loading existing table definitions ([`SchemaLoader`])
//! - Schema creation on a live connection ([`SchemaManager`])

pub mod create;
pub mod introspect;
pub mod manager;

#[cfg(test)]
mod testing;

pub use create::{SchemaBuilder, SchemaOptions};
pub use introspect::{SchemaLoader, parse_sql_type};
pub use manager::SchemaManager;
