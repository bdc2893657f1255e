//! sqlpersist - object persistence over SQL with cached, dialect-aware commands.
//!
//! sqlpersist maps registered object types to tables and provides:
//!
//! - A SQL expression tree with a binder, optimizers and per-dialect formatting
//! - Change-tracked data objects with identity preserved per transaction
//! - Transactional insert, update and delete with ordered, retried flushes
//! - Per-shape command caches that skip the formatter on repeat writes
//! - Deterministic DDL generation and schema creation
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlpersist::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = TypeRegistry::builder()
//!     .register(
//!         TypeDescriptor::new("School")
//!             .property(PropertyDescriptor::scalar("Id", SqlType::BigInt).primary_key().auto_increment())
//!             .property(PropertyDescriptor::scalar("Name", SqlType::Text)),
//!     )
//!     .build()?;
//!
//! let model = ModelBuilder::new(Arc::new(registry))
//!     .config(PersistenceConfig::from_json(&std::fs::read_to_string("persistence.json")?)?)
//!     .factory("default", my_factory)
//!     .build()?;
//!
//! async fn enroll(cx: &Cx, model: &DataAccessModel<MyFactory>) -> Outcome<(), Error> {
//!     let mut tx = model.begin();
//!     let school = match tx.create("School") {
//!         Ok(school) => school,
//!         Err(e) => return Outcome::Err(e),
//!     };
//!     if let Err(e) = school.write().set("Name", Value::Text("Hogwarts".into())) {
//!         return Outcome::Err(e);
//!     }
//!     tx.commit(cx).await
//! }
//! ```
//!
//! Blocking drivers implement [`SyncConnection`] and are wrapped in
//! [`Blocking`]; every async operation has a `_blocking` counterpart.

pub use sqlpersist_core::{
    // asupersync re-exports
    Budget,
    Cx,
    Outcome,
    RegionId,
    TaskId,
    // Connections
    Blocking,
    Connection,
    ConnectionFactory,
    IsolationLevel,
    SyncConnection,
    SyncConnectionFactory,
    run_blocking,
    // Errors
    Error,
    ObjectErrorKind,
    QueryErrorKind,
    Result,
    TransactionErrorKind,
    // Model
    DataObject,
    DeflatedPredicate,
    IndexDescriptor,
    ObjectHandle,
    ObjectKey,
    ObjectState,
    PropertyDescriptor,
    ReferentialAction,
    Row,
    SqlType,
    TypeDescriptor,
    TypeModel,
    TypeRegistry,
    Value,
};

pub use sqlpersist_query::{
    Binder, FormatOptions, FormatResult, Query, QueryExpr, QueryOrder, SqlCapability, SqlDialect,
    SqlExpr, SqlFormatter, dialect_for_name, optimize, query_text,
};

pub use sqlpersist_schema::{SchemaBuilder, SchemaLoader, SchemaManager, SchemaOptions};

pub use sqlpersist_session::{
    CommandCache, DEFAULT_CATEGORY, DataAccessModel, DatabaseConfig, DatabaseContext, FlushSummary,
    ModelConfig, ObjectCache, TransactionContext,
};

pub mod setup;
pub use setup::{DatabaseEntry, ModelBuilder, PersistenceConfig, schema_manager};

/// Everything an application usually needs.
pub mod prelude {
    pub use crate::{
        Blocking, Connection, ConnectionFactory, Cx, DataAccessModel, DatabaseConfig,
        DeflatedPredicate, Error, IsolationLevel, ModelBuilder, ModelConfig, ObjectHandle,
        ObjectKey, ObjectState, Outcome, PersistenceConfig, PropertyDescriptor, Query, Result,
        SqlType, SyncConnection, SyncConnectionFactory, TransactionContext, TypeDescriptor,
        TypeRegistry, Value,
    };
}
