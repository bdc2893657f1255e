//! Recording connections for the schema tests.

#![allow(clippy::manual_async_fn)] // Mock trait impls must match trait signatures

use sqlpersist_core::{
    Connection, Cx, Error, IsolationLevel, Outcome, QueryError, Result, Row, SyncConnection, Value,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct MockState {
    pub statements: Vec<String>,
    /// Rows for successive queries
    pub results: VecDeque<Vec<Row>>,
    /// Fail the first statement containing the pattern
    pub fail_on: Option<(String, QueryError)>,
}

impl MockState {
    pub fn shared() -> Arc<Mutex<MockState>> {
        Arc::new(Mutex::new(MockState::default()))
    }

    fn record(&mut self, sql: &str) -> Result<()> {
        self.statements.push(sql.to_string());
        if let Some((pattern, _)) = &self.fail_on
            && sql.contains(pattern.as_str())
            && let Some((_, error)) = self.fail_on.take()
        {
            return Err(Error::Query(error));
        }
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.record(sql)?;
        Ok(self.results.pop_front().unwrap_or_default())
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        self.record(sql)?;
        Ok(0)
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
        _params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = lock(&self.state).query(sql);
        async move { outcome(result) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        _params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = lock(&self.state).execute(sql);
        async move { outcome(result) }
    }

    fn begin(
        &self,
        _cx: &Cx,
        _isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn commit(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }

    fn rollback(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async { Outcome::Ok(()) }
    }
}

#[derive(Debug, Clone)]
pub struct MockSyncConnection {
    pub state: Arc<Mutex<MockState>>,
}

impl SyncConnection for MockSyncConnection {
    fn query_sync(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        lock(&self.state).query(sql)
    }

    fn execute_sync(&self, sql: &str, _params: &[Value]) -> Result<u64> {
        lock(&self.state).execute(sql)
    }

    fn begin_sync(&self, _isolation: IsolationLevel) -> Result<()> {
        Ok(())
    }

    fn commit_sync(&self) -> Result<()> {
        Ok(())
    }

    fn rollback_sync(&self) -> Result<()> {
        Ok(())
    }
}
