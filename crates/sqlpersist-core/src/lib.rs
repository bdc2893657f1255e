//! Core types and traits for sqlpersist.
//!
//! This crate provides the foundations the rest of the workspace builds on:
//!
//! - `Value`, `Row` and `SqlType` for data crossing the driver boundary
//! - `Connection` / `SyncConnection` traits and the `Blocking` adapter
//! - `TypeDescriptor` schema declarations and the `TypeRegistry` that
//!   resolves them into per-type layouts
//! - `DataObject` and its change-tracking state machine
//! - `Outcome` re-export from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod blocking;
pub mod connection;
pub mod error;
pub mod model;
pub mod object;
pub mod registry;
pub mod row;
pub mod types;
pub mod value;

pub use blocking::{block_on_ready, outcome_into_result, run_blocking};
pub use connection::{
    Blocking, Connection, ConnectionFactory, IsolationLevel, SyncConnection,
    SyncConnectionFactory,
};
pub use error::{
    CapabilityError, ConfigError, ConnectionError, ConnectionErrorKind, DependencyCycleError,
    Error, MissingObjectError, ObjectError, ObjectErrorKind, ObjectExistsError, QueryError,
    QueryErrorKind, Result, SchemaError, SchemaErrorKind, ShapeError, TransactionError,
    TransactionErrorKind, TypeError,
};
pub use model::{
    IndexColumn, IndexDescriptor, PropertyDescriptor, PropertyKind, ReferentialAction,
    TypeDescriptor,
};
pub use object::{
    DataObject, DeflatedPredicate, ObjectHandle, ObjectKey, ObjectPropertyValue, ObjectState,
    PropertyValue,
};
pub use registry::{
    ColumnModel, ColumnSource, PropertyModel, TemplatePart, TypeModel, TypeRegistry,
    TypeRegistryBuilder, hash_name,
};
pub use row::{ColumnInfo, Row};
pub use types::SqlType;
pub use value::Value;
