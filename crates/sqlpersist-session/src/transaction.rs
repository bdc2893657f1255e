//! Transaction contexts.
//!
//! A [`TransactionContext`] owns the objects touched in one unit of work and
//! at most one connection. The connection is opened, and the transaction
//! begun, only when the first statement is about to run; from then on the
//! context is bound to its database category.
//!
//! # Example
//!
//! ```ignore
//! let mut tx = model.begin();
//! let school = tx.create("School")?;
//! school.write().set("Name", "Hill")?;
//! let student = tx.create("Student")?;
//! student.write().set_reference("School", Some(school.clone()))?;
//! tx.commit(&cx).await?;
//! ```

use crate::commands::{SqlTransactionalCommands, object_filter, try_outcome, try_result};
use crate::database::{DataAccessModel, DatabaseContext};
use crate::object_cache::ObjectCache;
use asupersync::{Cx, Outcome};
use sqlpersist_core::{
    Blocking, Connection, ConnectionFactory, DataObject, DeflatedPredicate, DependencyCycleError,
    Error, IsolationLevel, ObjectHandle, ObjectKey, Result, Row, SyncConnectionFactory,
    TransactionError, TransactionErrorKind, TypeModel, TypeRegistry, Value, run_blocking,
};
use sqlpersist_query::{Binder, Query, optimize};
use std::sync::Arc;
use std::time::Instant;

/// Counts reported by [`TransactionContext::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: u64,
    /// Insert passes needed to order the new objects
    pub passes: usize,
}

/// One unit of work against one database category.
pub struct TransactionContext<'m, F: ConnectionFactory> {
    model: &'m DataAccessModel<F>,
    category: String,
    isolation: IsolationLevel,
    connection: Option<F::Connection>,
    cache: ObjectCache,
    commands_issued: bool,
    completed: bool,
}

fn transaction_error(kind: TransactionErrorKind, message: impl Into<String>) -> Error {
    Error::Transaction(TransactionError {
        kind,
        message: message.into(),
    })
}

/// Find or create the object of `type_name` with flattened key `key`.
fn reference_in(
    registry: &TypeRegistry,
    cache: &mut ObjectCache,
    type_name: &str,
    key: Vec<Value>,
) -> Result<ObjectHandle> {
    let model = registry.model(type_name)?;
    let object_key = ObjectKey::new(Arc::clone(model.name_arc()), key);
    if let Some(existing) = cache.get(&object_key) {
        return Ok(existing.clone());
    }
    let object = DataObject::new_deflated(
        Arc::clone(model),
        object_key.values(),
        &mut |target, values| reference_in(registry, cache, target, values),
    )?;
    Ok(cache.track(ObjectHandle::new(object)))
}

/// Object for `row`, reusing (and inflating) the cached instance if any.
fn materialize(
    registry: &TypeRegistry,
    cache: &mut ObjectCache,
    model: &Arc<TypeModel>,
    row: &Row,
) -> Result<ObjectHandle> {
    let mut key = Vec::with_capacity(model.key_columns().len());
    for column in model.key_column_models() {
        let value = row.get_by_name(&column.name).ok_or_else(|| {
            Error::shape(format!(
                "row for {} has no key column '{}'",
                model.name(),
                column.name
            ))
        })?;
        key.push(value.clone());
    }

    let object_key = ObjectKey::new(Arc::clone(model.name_arc()), key);
    if let Some(existing) = cache.get(&object_key).cloned() {
        if existing.read().is_deflated() {
            existing
                .write()
                .inflate(row, &mut |t, v| reference_in(registry, cache, t, v))?;
        }
        return Ok(existing);
    }

    let object = DataObject::from_row(Arc::clone(model), row, &mut |t, v| {
        reference_in(registry, cache, t, v)
    })?;
    Ok(cache.track(ObjectHandle::new(object)))
}

impl<'m, F: ConnectionFactory> TransactionContext<'m, F> {
    pub(crate) fn new(model: &'m DataAccessModel<F>) -> Self {
        Self {
            model,
            category: model.config().default_category.clone(),
            isolation: IsolationLevel::default(),
            connection: None,
            cache: ObjectCache::new(),
            commands_issued: false,
            completed: false,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Switch database category. Fails once a statement has been issued.
    pub fn set_category(&mut self, category: impl Into<String>) -> Result<()> {
        let category = category.into();
        if self.commands_issued && !category.eq_ignore_ascii_case(&self.category) {
            return Err(transaction_error(
                TransactionErrorKind::CategoryLocked,
                format!(
                    "transaction already issued commands on '{}'; cannot switch to '{}'",
                    self.category, category
                ),
            ));
        }
        self.model.database(&category)?;
        self.category = category;
        Ok(())
    }

    pub fn set_isolation(&mut self, isolation: IsolationLevel) {
        self.isolation = isolation;
    }

    /// Has a connection been opened for this transaction?
    pub fn commands_issued(&self) -> bool {
        self.commands_issued
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn object_cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn database(&self) -> Result<&'m DatabaseContext<F>> {
        self.model.database(&self.category)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.completed {
            return Err(transaction_error(
                TransactionErrorKind::AlreadyCompleted,
                "transaction was already committed or rolled back",
            ));
        }
        Ok(())
    }

    // ==================== Objects ====================

    /// A new object of `type_name`, inserted on the next flush.
    pub fn create(&mut self, type_name: &str) -> Result<ObjectHandle> {
        self.ensure_active()?;
        let model = self.model.registry().model(type_name)?;
        Ok(self
            .cache
            .track(ObjectHandle::new(DataObject::new(Arc::clone(model)))))
    }

    /// The object with flattened key `key`, deflated unless already loaded.
    pub fn reference(&mut self, type_name: &str, key: &[Value]) -> Result<ObjectHandle> {
        self.ensure_active()?;
        reference_in(self.model.registry(), &mut self.cache, type_name, key.to_vec())
    }

    /// A deflated object identified by `predicate` instead of its key.
    pub fn reference_by_predicate(
        &mut self,
        type_name: &str,
        predicate: DeflatedPredicate,
    ) -> Result<ObjectHandle> {
        self.ensure_active()?;
        let model = self.model.registry().model(type_name)?;
        let object = DataObject::new_deflated_by_predicate(Arc::clone(model), predicate);
        Ok(self.cache.track(ObjectHandle::new(object)))
    }

    /// Track an object created elsewhere. Returns the cached instance if one
    /// with the same key is already tracked.
    pub fn attach(&mut self, handle: ObjectHandle) -> Result<ObjectHandle> {
        self.ensure_active()?;
        Ok(self.cache.track(handle))
    }

    /// Mark `handle` for deletion. New objects are simply forgotten.
    pub fn delete(&mut self, handle: &ObjectHandle) -> Result<()> {
        self.ensure_active()?;
        let was_new = handle.state().is_new();
        handle.write().mark_deleted();
        if was_new {
            self.cache.remove(handle);
        } else {
            self.cache.track(handle.clone());
        }
        Ok(())
    }

    // ==================== Statements ====================

    async fn ensure_connection(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.connection.is_some() {
            return Outcome::Ok(());
        }
        let database = try_result!(self.model.database(&self.category));
        let connection = try_outcome!(database.factory().connect(cx).await);
        try_outcome!(connection.begin(cx, self.isolation).await);
        tracing::debug!(
            category = %self.category,
            isolation = self.isolation.as_sql(),
            "Transaction started"
        );
        self.connection = Some(connection);
        self.commands_issued = true;
        Outcome::Ok(())
    }

    fn connected(&self) -> Result<&F::Connection> {
        self.connection.as_ref().ok_or_else(|| {
            transaction_error(
                TransactionErrorKind::AlreadyCompleted,
                "transaction has no open connection",
            )
        })
    }

    async fn select(&mut self, cx: &Cx, query: &Query) -> Outcome<Vec<Row>, Error> {
        try_outcome!(self.ensure_connection(cx).await);
        let database = try_result!(self.database());
        let expr = try_result!(
            Binder::new(self.model.registry())
                .with_table_prefix(database.table_prefix())
                .bind(query)
                .and_then(optimize)
        );
        let format = try_result!(database.formatter().format(&expr));
        let connection = try_result!(self.connected());
        tracing::debug!(sql = %format.command_text, params = format.parameter_values.len(), "Executing query");
        connection
            .query(cx, &format.command_text, &format.params())
            .await
    }

    /// Run `query` and return its objects, reusing tracked instances.
    #[tracing::instrument(level = "debug", skip(self, cx, query), fields(type_name = %query.type_name))]
    pub async fn load(&mut self, cx: &Cx, query: &Query) -> Outcome<Vec<ObjectHandle>, Error> {
        try_result!(self.ensure_active());
        let model = try_result!(self.model.registry().model(&query.type_name));
        let rows = try_outcome!(self.select(cx, query).await);

        let registry = self.model.registry();
        let mut objects = Vec::with_capacity(rows.len());
        for row in &rows {
            objects.push(try_result!(materialize(registry, &mut self.cache, model, row)));
        }
        Outcome::Ok(objects)
    }

    /// Load every property of a deflated object.
    #[tracing::instrument(level = "debug", skip(self, cx, handle))]
    pub async fn inflate(&mut self, cx: &Cx, handle: &ObjectHandle) -> Outcome<(), Error> {
        try_result!(self.ensure_active());
        if !handle.read().is_deflated() {
            return Outcome::Ok(());
        }

        let model = handle.model();
        let filter = try_result!(object_filter(&model, handle));
        let query = Query::new(model.name()).filter(filter);
        let rows = try_outcome!(self.select(cx, &query).await);
        let Some(row) = rows.first() else {
            return Outcome::Err(handle.read().missing(None));
        };

        let registry = self.model.registry();
        let cache = &mut self.cache;
        try_result!(
            handle
                .write()
                .inflate(row, &mut |t, v| reference_in(registry, cache, t, v))
        );
        self.cache.register(handle);
        Outcome::Ok(())
    }

    /// Write every pending change: inserts (in as many passes as
    /// references require), then fixups, then updates, then deletes
    /// grouped by type.
    #[tracing::instrument(level = "info", skip(self, cx), fields(category = %self.category))]
    pub async fn flush(&mut self, cx: &Cx) -> Outcome<FlushSummary, Error> {
        try_result!(self.ensure_active());
        let start = Instant::now();
        let new_objects = self.cache.new_objects();
        let changed = self.cache.changed_objects();
        let deleted = self.cache.deleted_objects();
        if new_objects.is_empty() && changed.is_empty() && deleted.is_empty() {
            return Outcome::Ok(FlushSummary::default());
        }

        try_outcome!(self.ensure_connection(cx).await);
        let database = try_result!(self.database());
        let model = self.model;
        let config = model.config();
        let Some(connection) = self.connection.as_ref() else {
            return Outcome::Err(transaction_error(
                TransactionErrorKind::AlreadyCompleted,
                "transaction has no open connection",
            ));
        };
        let cache = &mut self.cache;
        let commands = SqlTransactionalCommands::new(
            connection,
            database.dialect(),
            model.registry(),
            database.caches(),
        )
        .table_prefix(database.table_prefix())
        .format_options(database.config().format_options)
        .validate_server_generated_ids(config.validate_server_generated_ids)
        .log_query_text(config.log_query_text);

        let max_passes = config
            .max_insert_passes
            .unwrap_or(new_objects.len())
            .max(1);
        let mut summary = FlushSummary::default();
        let mut pending = new_objects;
        let mut fixups = Vec::new();
        while !pending.is_empty() {
            if summary.passes == max_passes {
                return Outcome::Err(dependency_cycle(&pending, summary.passes));
            }
            summary.passes += 1;
            let results = try_outcome!(commands.insert(cx, cache, &pending).await);
            summary.inserted += results.inserted;
            fixups.extend(results.fixup);
            if results.inserted == 0 && !results.retry.is_empty() {
                return Outcome::Err(dependency_cycle(&results.retry, summary.passes));
            }
            pending = results.retry;
        }

        summary.updated += try_outcome!(commands.update(cx, &fixups).await);
        summary.updated += try_outcome!(commands.update(cx, &changed).await);

        let mut groups: Vec<(String, Vec<ObjectHandle>)> = Vec::new();
        for handle in deleted {
            let type_name = handle.model().name().to_string();
            match groups.iter_mut().find(|(name, _)| *name == type_name) {
                Some((_, group)) => group.push(handle),
                None => groups.push((type_name, vec![handle])),
            }
        }
        for (type_name, group) in &groups {
            summary.deleted += try_outcome!(commands.delete(cx, type_name, group).await);
            for handle in group {
                cache.remove(handle);
            }
        }

        tracing::info!(
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            passes = summary.passes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Flushed transaction"
        );
        Outcome::Ok(summary)
    }

    /// Flush, commit, and release the connection.
    #[tracing::instrument(level = "info", skip(self, cx), fields(category = %self.category))]
    pub async fn commit(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_outcome!(self.flush(cx).await);
        self.completed = true;
        self.cache.clear();
        if let Some(connection) = self.connection.take() {
            try_outcome!(connection.commit(cx).await);
            tracing::debug!(category = %self.category, "Transaction committed");
        }
        Outcome::Ok(())
    }

    /// Discard pending changes, roll back, and release the connection.
    #[tracing::instrument(level = "info", skip(self, cx), fields(category = %self.category))]
    pub async fn rollback(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_result!(self.ensure_active());
        self.completed = true;
        self.cache.clear();
        if let Some(connection) = self.connection.take() {
            try_outcome!(connection.rollback(cx).await);
            tracing::debug!(category = %self.category, "Transaction rolled back");
        }
        Outcome::Ok(())
    }
}

fn dependency_cycle(pending: &[ObjectHandle], passes: usize) -> Error {
    let mut type_names: Vec<String> = pending
        .iter()
        .map(|h| h.model().name().to_string())
        .collect();
    type_names.sort();
    type_names.dedup();
    tracing::error!(types = ?type_names, passes, "Insert order did not converge");
    Error::DependencyCycle(DependencyCycleError { type_names, passes })
}

// ==================== Blocking ====================

/// Blocking entry points. They drive the async operations above over a
/// [`Blocking`] connection, so both follow the same control flow.
impl<S: SyncConnectionFactory> TransactionContext<'_, Blocking<S>> {
    pub fn load_blocking(&mut self, cx: &Cx, query: &Query) -> Result<Vec<ObjectHandle>> {
        run_blocking(self.load(cx, query))
    }

    pub fn inflate_blocking(&mut self, cx: &Cx, handle: &ObjectHandle) -> Result<()> {
        run_blocking(self.inflate(cx, handle))
    }

    pub fn flush_blocking(&mut self, cx: &Cx) -> Result<FlushSummary> {
        run_blocking(self.flush(cx))
    }

    pub fn commit_blocking(&mut self, cx: &Cx) -> Result<()> {
        run_blocking(self.commit(cx))
    }

    pub fn rollback_blocking(&mut self, cx: &Cx) -> Result<()> {
        run_blocking(self.rollback(cx))
    }
}

impl<F: ConnectionFactory> Drop for TransactionContext<'_, F> {
    fn drop(&mut self) {
        if !self.completed && self.connection.is_some() {
            tracing::warn!(
                category = %self.category,
                tracked = self.cache.len(),
                "Transaction dropped without commit or rollback; releasing its connection"
            );
        }
    }
}
