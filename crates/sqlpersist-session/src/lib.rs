//! Unit-of-work layer for sqlpersist.
//!
//! `sqlpersist-session` turns tracked object changes into SQL:
//!
//! - [`DataAccessModel`] holds the type registry and one
//!   [`DatabaseContext`] per category.
//! - [`TransactionContext`] tracks objects, opens a connection lazily and
//!   flushes pending changes in dependency order.
//! - [`SqlTransactionalCommands`] issues the inserts, updates and deletes,
//!   reusing statement templates from a copy-on-write [`CommandCache`].
//!
//! Every async operation takes `&Cx` and returns `Outcome`; the `*_blocking`
//! variants run the same code over a [`Blocking`](sqlpersist_core::Blocking)
//! driver.

pub mod command_cache;
pub mod commands;
pub mod config;
pub mod database;
pub mod object_cache;
pub mod transaction;

#[cfg(test)]
mod testing;

pub use command_cache::{CachedCommand, CommandCache, CommandCaches, CommandKey};
pub use commands::{DELETE_BATCH_SIZE, InsertResults, SqlTransactionalCommands};
pub use config::{DEFAULT_CATEGORY, DatabaseConfig, ModelConfig};
pub use database::{DataAccessModel, DatabaseContext};
pub use object_cache::ObjectCache;
pub use transaction::{FlushSummary, TransactionContext};
