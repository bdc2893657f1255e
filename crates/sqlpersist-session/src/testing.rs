//! Mock connections and type fixtures shared by the unit tests.

#![allow(clippy::manual_async_fn)] // Mock trait impls must match trait signatures

use sqlpersist_core::{
    Connection, ConnectionFactory, Cx, Error, IsolationLevel, Outcome, PropertyDescriptor,
    QueryError, Result, Row, SqlType, SyncConnection, SyncConnectionFactory, TypeDescriptor,
    TypeRegistry, Value,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct MockState {
    /// Every statement sent, queries included, in order
    pub statements: Vec<(String, Vec<Value>)>,
    /// Keys handed out by read-back queries; falls back to a counter
    pub generated_ids: VecDeque<i64>,
    pub next_id: i64,
    /// Rows affected reported for each execute; `None` reports 1
    pub affected: VecDeque<u64>,
    /// Rows returned by plain SELECTs, one entry per query
    pub select_rows: VecDeque<Vec<Row>>,
    /// Fail the first statement containing the pattern
    pub fail_on: Option<(String, QueryError)>,
    pub connects: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

impl MockState {
    pub fn shared() -> Arc<Mutex<MockState>> {
        Arc::new(Mutex::new(MockState::default()))
    }

    pub fn sql(&self) -> Vec<&str> {
        self.statements.iter().map(|(s, _)| s.as_str()).collect()
    }

    fn record(&mut self, sql: &str, params: &[Value]) -> Result<()> {
        self.statements.push((sql.to_string(), params.to_vec()));
        if let Some((pattern, _)) = &self.fail_on
            && sql.contains(pattern.as_str())
            && let Some((_, error)) = self.fail_on.take()
        {
            return Err(Error::Query(error));
        }
        Ok(())
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, params)?;
        let reads_back = ["RETURNING", "OUTPUT", "last_insert_rowid()", "LAST_INSERT_ID()"]
            .iter()
            .any(|marker| sql.contains(marker));
        if reads_back {
            let id = self.generated_ids.pop_front().unwrap_or_else(|| {
                self.next_id += 1;
                self.next_id
            });
            return Ok(vec![Row::new(vec!["Id".into()], vec![Value::BigInt(id)])]);
        }
        Ok(self.select_rows.pop_front().unwrap_or_default())
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.record(sql, params)?;
        Ok(self.affected.pop_front().unwrap_or(1))
    }
}

fn lock(state: &Mutex<MockState>) -> std::sync::MutexGuard<'_, MockState> {
    state.lock().expect("lock poisoned")
}

fn outcome<T>(result: Result<T>) -> Outcome<T, Error> {
    match result {
        Ok(v) => Outcome::Ok(v),
        Err(e) => Outcome::Err(e),
    }
}

#[derive(Debug, Clone)]
pub struct MockConnection {
    pub state: Arc<Mutex<MockState>>,
}

impl Connection for MockConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = lock(&self.state).query(sql, params);
        async move { outcome(result) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = lock(&self.state).execute(sql, params);
        async move { outcome(result) }
    }

    fn begin(
        &self,
        _cx: &Cx,
        _isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        lock(&self.state).begins += 1;
        async { Outcome::Ok(()) }
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        lock(&self.state).commits += 1;
        async { Outcome::Ok(()) }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        lock(&self.state).rollbacks += 1;
        async { Outcome::Ok(()) }
    }
}

#[derive(Debug, Clone)]
pub struct MockFactory {
    pub state: Arc<Mutex<MockState>>,
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn connect(&self, _cx: &Cx) -> impl Future<Output = Outcome<MockConnection, Error>> + Send {
        lock(&self.state).connects += 1;
        let connection = MockConnection {
            state: Arc::clone(&self.state),
        };
        async move { Outcome::Ok(connection) }
    }
}

/// Blocking driver over the same recorded state.
#[derive(Debug, Clone)]
pub struct MockSyncConnection {
    pub state: Arc<Mutex<MockState>>,
}

impl SyncConnection for MockSyncConnection {
    fn query_sync(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        lock(&self.state).query(sql, params)
    }

    fn execute_sync(&self, sql: &str, params: &[Value]) -> Result<u64> {
        lock(&self.state).execute(sql, params)
    }

    fn begin_sync(&self, _isolation: IsolationLevel) -> Result<()> {
        lock(&self.state).begins += 1;
        Ok(())
    }

    fn commit_sync(&self) -> Result<()> {
        lock(&self.state).commits += 1;
        Ok(())
    }

    fn rollback_sync(&self) -> Result<()> {
        lock(&self.state).rollbacks += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MockSyncFactory {
    pub state: Arc<Mutex<MockState>>,
}

impl SyncConnectionFactory for MockSyncFactory {
    type Connection = MockSyncConnection;

    fn connect_sync(&self) -> Result<MockSyncConnection> {
        lock(&self.state).connects += 1;
        Ok(MockSyncConnection {
            state: Arc::clone(&self.state),
        })
    }
}

/// `School`, `Student` (referencing `School`), `Tag` with a client key,
/// and `Ticket` whose `Code` is computed from its server-generated `Id`.
pub fn registry() -> Arc<TypeRegistry> {
    let registry = TypeRegistry::builder()
        .register(
            TypeDescriptor::new("School")
                .property(
                    PropertyDescriptor::scalar("Id", SqlType::BigInt)
                        .primary_key()
                        .auto_increment(),
                )
                .property(PropertyDescriptor::scalar("Name", SqlType::Text)),
        )
        .register(
            TypeDescriptor::new("Student")
                .property(
                    PropertyDescriptor::scalar("Id", SqlType::BigInt)
                        .primary_key()
                        .auto_increment(),
                )
                .property(PropertyDescriptor::scalar("Name", SqlType::Text))
                .property(PropertyDescriptor::reference("School", "School")),
        )
        .register(
            TypeDescriptor::new("Tag")
                .property(PropertyDescriptor::scalar("Code", SqlType::Text).primary_key())
                .property(PropertyDescriptor::scalar("Label", SqlType::Text).nullable(true)),
        )
        .register(
            TypeDescriptor::new("Ticket")
                .property(
                    PropertyDescriptor::scalar("Id", SqlType::BigInt)
                        .primary_key()
                        .auto_increment(),
                )
                .property(PropertyDescriptor::computed_text("Code", "T-{Id}")),
        )
        .build()
        .expect("fixture registry");
    Arc::new(registry)
}
