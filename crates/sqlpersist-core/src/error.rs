//! Error types for sqlpersist operations.

use crate::value::Value;
use std::fmt;

/// The primary error type for all sqlpersist operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, disconnect, timeout)
    Connection(ConnectionError),
    /// Query execution errors reported by the driver
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction lifecycle errors
    Transaction(TransactionError),
    /// The dialect lacks a feature the statement requires
    Capability(CapabilityError),
    /// A statement does not have the structure an operation expects
    Shape(ShapeError),
    /// An object expected in the store was not found
    MissingObject(MissingObjectError),
    /// An insert collided with an existing row
    ObjectAlreadyExists(ObjectExistsError),
    /// Insert ordering among new objects could not be resolved
    DependencyCycle(DependencyCycleError),
    /// Misuse of a tracked object
    Object(ObjectError),
    /// Schema declaration or DDL errors
    Schema(SchemaError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Operation timed out
    Timeout,
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during operation
    Disconnected,
    /// Connection refused
    Refused,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    /// Constraint named by the driver, when it reports one
    pub constraint: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Deadlock detected
    Deadlock,
    /// Serialization failure (retry may succeed)
    Serialization,
    /// Statement timeout
    Timeout,
    /// Other database error
    Database,
}

impl QueryError {
    /// Build a query error of the given kind with only a message.
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            sql: None,
            sqlstate: None,
            message: message.into(),
            detail: None,
            constraint: None,
            source: None,
        }
    }

    /// Attach the SQLSTATE reported by the driver.
    pub fn with_sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    /// Attach the statement that failed.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Is this a unique constraint violation?
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23505")
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        self.sqlstate.as_deref() == Some("23503")
    }
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// The transaction was already committed or rolled back
    AlreadyCompleted,
    /// The database category cannot change once a command has been issued
    CategoryLocked,
    /// No database context is registered for the requested category
    UnknownCategory,
}

/// A dialect does not support what a statement asks for.
#[derive(Debug)]
pub struct CapabilityError {
    /// Name of the missing capability, if the failure is tied to one
    pub capability: Option<String>,
    pub message: String,
}

/// A statement or expression has an unexpected structure.
#[derive(Debug)]
pub struct ShapeError {
    pub message: String,
}

/// A row expected to exist was not found.
#[derive(Debug)]
pub struct MissingObjectError {
    pub type_name: String,
    /// Key columns and values identifying the object
    pub key: Vec<(String, Value)>,
    pub sql: Option<String>,
}

/// An insert collided with an existing row.
#[derive(Debug)]
pub struct ObjectExistsError {
    pub type_name: Option<String>,
    pub constraint: Option<String>,
    pub sql: Option<String>,
    pub source: QueryError,
}

/// New objects referenced each other in a way no insert order could satisfy.
#[derive(Debug)]
pub struct DependencyCycleError {
    /// Types of the objects still waiting to be inserted
    pub type_names: Vec<String>,
    pub passes: usize,
}

#[derive(Debug)]
pub struct ObjectError {
    pub kind: ObjectErrorKind,
    pub type_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectErrorKind {
    /// The operation is not valid in the object's current state
    InvalidState,
    /// A non-key property was read on an object that has not been inflated
    Deflated,
    /// A server-generated value failed validation after the retry
    InvalidGeneratedValue,
    /// The type declares no such property
    UnknownProperty,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// The type is not registered
    UnknownType,
    /// A type was registered twice
    DuplicateType,
    /// Invalid schema definition
    Invalid,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this a retryable error (deadlock, serialization, timeouts)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query(q) => matches!(
                q.kind,
                QueryErrorKind::Deadlock | QueryErrorKind::Serialization | QueryErrorKind::Timeout
            ),
            Error::Timeout => true,
            _ => false,
        }
    }

    /// Is this the distinct "row not found" error?
    pub fn is_missing_object(&self) -> bool {
        matches!(self, Error::MissingObject(_))
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            Error::ObjectAlreadyExists(e) => e.source.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::MissingObject(e) => e.sql.as_deref(),
            Error::ObjectAlreadyExists(e) => e.sql.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for an object misuse error.
    pub fn object(
        kind: ObjectErrorKind,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Object(ObjectError {
            kind,
            type_name: type_name.into(),
            message: message.into(),
        })
    }

    /// Shorthand for a capability error tied to a named capability.
    pub fn capability(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Capability(CapabilityError {
            capability: Some(capability.into()),
            message: message.into(),
        })
    }

    /// Shorthand for an unsupported construct with no specific capability.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Error::Capability(CapabilityError {
            capability: None,
            message: message.into(),
        })
    }

    /// Shorthand for a shape error.
    pub fn shape(message: impl Into<String>) -> Self {
        Error::Shape(ShapeError {
            message: message.into(),
        })
    }

    /// Shorthand for a schema error.
    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }
}

fn write_key(f: &mut fmt::Formatter<'_>, key: &[(String, Value)]) -> fmt::Result {
    for (i, (column, value)) in key.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}={}", column, value)?;
    }
    Ok(())
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Query error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Query error: {}", e.message)
                }
            }
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Capability(e) => write!(f, "Not supported: {}", e),
            Error::Shape(e) => write!(f, "Unexpected statement shape: {}", e.message),
            Error::MissingObject(e) => write!(f, "{}", e),
            Error::ObjectAlreadyExists(e) => write!(f, "{}", e),
            Error::DependencyCycle(e) => write!(f, "{}", e),
            Error::Object(e) => write!(f, "Object error ({}): {}", e.type_name, e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::ObjectAlreadyExists(e) => Some(&e.source),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.capability {
            Some(cap) => write!(f, "{} (dialect lacks {})", self.message, cap),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for MissingObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Missing {} object with key (", self.type_name)?;
        write_key(f, &self.key)?;
        write!(f, ")")
    }
}

impl fmt::Display for ObjectExistsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = self.type_name.as_deref().unwrap_or("object");
        match &self.constraint {
            Some(constraint) => write!(
                f,
                "{} already exists (constraint {})",
                type_name, constraint
            ),
            None => write!(f, "{} already exists: {}", type_name, self.source.message),
        }
    }
}

impl fmt::Display for DependencyCycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Insert order did not converge after {} passes; waiting: {}",
            self.passes,
            self.type_names.join(", ")
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<CapabilityError> for Error {
    fn from(err: CapabilityError) -> Self {
        Error::Capability(err)
    }
}

impl From<ShapeError> for Error {
    fn from(err: ShapeError) -> Self {
        Error::Shape(err)
    }
}

impl From<MissingObjectError> for Error {
    fn from(err: MissingObjectError) -> Self {
        Error::MissingObject(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqlpersist operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_helpers() {
        let query = QueryError::new(QueryErrorKind::Constraint, "unique violation")
            .with_sqlstate("23505")
            .with_sql("INSERT INTO t VALUES (1)");

        assert!(query.is_unique_violation());
        assert!(!query.is_foreign_key_violation());

        let err = Error::Query(query);
        assert_eq!(err.sqlstate(), Some("23505"));
        assert_eq!(err.sql(), Some("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn retryable_flags() {
        let deadlock = Error::Query(QueryError::new(QueryErrorKind::Deadlock, "deadlock"));
        assert!(deadlock.is_retryable());
        assert!(Error::Timeout.is_retryable());
        assert!(!Error::shape("bad").is_retryable());
    }

    #[test]
    fn missing_object_display_lists_key() {
        let err = Error::MissingObject(MissingObjectError {
            type_name: "Student".to_string(),
            key: vec![
                ("Id".to_string(), Value::BigInt(7)),
                ("Tag".to_string(), Value::Text("x".to_string())),
            ],
            sql: Some("UPDATE ...".to_string()),
        });
        assert!(err.is_missing_object());
        assert_eq!(err.sql(), Some("UPDATE ..."));
        assert_eq!(err.to_string(), "Missing Student object with key (Id=7, Tag='x')");
    }

    #[test]
    fn object_exists_keeps_driver_error_as_source() {
        use std::error::Error as _;

        let err = Error::ObjectAlreadyExists(ObjectExistsError {
            type_name: Some("School".to_string()),
            constraint: Some("pk_school".to_string()),
            sql: None,
            source: QueryError::new(QueryErrorKind::Constraint, "duplicate key")
                .with_sqlstate("23505"),
        });
        assert_eq!(err.sqlstate(), Some("23505"));
        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "School already exists (constraint pk_school)"
        );
    }

    #[test]
    fn capability_display_names_capability() {
        let err = Error::capability("SelectForUpdate", "FOR UPDATE requested");
        assert_eq!(
            err.to_string(),
            "Not supported: FOR UPDATE requested (dialect lacks SelectForUpdate)"
        );
    }
}
