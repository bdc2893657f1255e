//! Database connection traits.
//!
//! This module defines the narrow driver surface the persistence engine
//! consumes:
//!
//! - [`Connection`] - async statement execution and transaction control
//! - [`ConnectionFactory`] - lazy acquisition of a connection per transaction
//! - [`SyncConnection`] / [`SyncConnectionFactory`] - the blocking equivalents
//! - [`Blocking`] - adapts a blocking driver to [`Connection`]
//!
//! All async operations take a `Cx` context for cancellation and report
//! results as asupersync `Outcome`s.

use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;
use asupersync::{Cx, Outcome};
use std::future::Future;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Dirty reads, non-repeatable reads and phantoms possible.
    ReadUncommitted,
    /// Only committed changes from others are visible.
    #[default]
    ReadCommitted,
    /// A consistent snapshot for the whole transaction.
    RepeatableRead,
    /// Transactions appear to execute sequentially.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A database connection capable of executing statements.
///
/// Implementations must be `Send + Sync` for use across async boundaries.
/// Transaction control is expressed on the connection itself because a
/// transaction context owns exactly one connection at a time.
pub trait Connection: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_one(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        async move {
            match self.query(cx, sql, params).await {
                Outcome::Ok(rows) => Outcome::Ok(rows.into_iter().next()),
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            }
        }
    }

    /// Execute a statement (INSERT, UPDATE, DELETE, DDL) and return rows affected.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Begin a transaction with the given isolation level.
    fn begin(
        &self,
        cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Commit the current transaction.
    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Roll back the current transaction.
    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}

/// Opens connections on demand.
///
/// A transaction context calls [`connect`](ConnectionFactory::connect) when
/// it issues its first command and drops the connection when it completes.
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection;

    /// Open a new connection.
    fn connect(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send;
}

/// Blocking driver surface.
pub trait SyncConnection: Send + Sync {
    fn query_sync(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<u64>;

    fn begin_sync(&self, isolation: IsolationLevel) -> Result<()>;

    fn commit_sync(&self) -> Result<()>;

    fn rollback_sync(&self) -> Result<()>;
}

/// Blocking connection factory.
pub trait SyncConnectionFactory: Send + Sync {
    type Connection: SyncConnection;

    fn connect_sync(&self) -> Result<Self::Connection>;
}

/// Adapter exposing a blocking driver through the async traits.
///
/// Every future it returns is immediately ready, which lets the blocking
/// entry points drive the exact same async control flow to completion with
/// [`block_on_ready`](crate::blocking::block_on_ready).
#[derive(Debug, Clone)]
pub struct Blocking<C>(pub C);

impl<C> Blocking<C> {
    /// Borrow the wrapped driver.
    pub fn inner(&self) -> &C {
        &self.0
    }

    /// Unwrap the driver.
    pub fn into_inner(self) -> C {
        self.0
    }
}

fn ready<T>(result: Result<T>) -> std::future::Ready<Outcome<T, Error>> {
    std::future::ready(match result {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    })
}

impl<C: SyncConnection> Connection for Blocking<C> {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        ready(self.0.query_sync(sql, params))
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        ready(self.0.execute_sync(sql, params))
    }

    fn begin(
        &self,
        _cx: &Cx,
        isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        ready(self.0.begin_sync(isolation))
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        ready(self.0.commit_sync())
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        ready(self.0.rollback_sync())
    }
}

impl<F: SyncConnectionFactory> ConnectionFactory for Blocking<F> {
    type Connection = Blocking<F::Connection>;

    fn connect(&self, _cx: &Cx) -> impl Future<Output = Outcome<Self::Connection, Error>> + Send {
        ready(self.0.connect_sync().map(Blocking))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::block_on_ready;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDriver {
        log: Mutex<Vec<String>>,
    }

    impl SyncConnection for RecordingDriver {
        fn query_sync(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
            self.log.lock().unwrap().push(sql.to_string());
            Ok(vec![
                Row::new(vec!["n".to_string()], vec![Value::BigInt(1)]),
                Row::new(vec!["n".to_string()], vec![Value::BigInt(2)]),
            ])
        }

        fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<u64> {
            self.log.lock().unwrap().push(sql.to_string());
            Ok(params.len() as u64)
        }

        fn begin_sync(&self, isolation: IsolationLevel) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("BEGIN {}", isolation.as_sql()));
            Ok(())
        }

        fn commit_sync(&self) -> Result<()> {
            self.log.lock().unwrap().push("COMMIT".to_string());
            Ok(())
        }

        fn rollback_sync(&self) -> Result<()> {
            Err(Error::Custom("rollback failed".to_string()))
        }
    }

    #[test]
    fn test_isolation_level_as_sql() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }

    #[test]
    fn test_blocking_adapter_completes_immediately() {
        let cx = Cx::for_testing();
        let conn = Blocking(RecordingDriver::default());

        let affected = block_on_ready(conn.execute(&cx, "DELETE", &[Value::Int(1)])).unwrap();
        assert!(matches!(affected, Outcome::Ok(1)));

        let first = block_on_ready(conn.query_one(&cx, "SELECT", &[])).unwrap();
        match first {
            Outcome::Ok(Some(row)) => assert_eq!(row.get(0), Some(&Value::BigInt(1))),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let rollback = block_on_ready(conn.rollback(&cx)).unwrap();
        assert!(matches!(rollback, Outcome::Err(Error::Custom(_))));

        let log = conn.inner().log.lock().unwrap().clone();
        assert_eq!(log, vec!["DELETE".to_string(), "SELECT".to_string()]);
    }
}
