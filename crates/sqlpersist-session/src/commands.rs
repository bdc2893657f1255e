//! Transactional insert, update and delete over one connection.
//!
//! [`SqlTransactionalCommands`] turns tracked objects into statements.
//! Inserts and updates reuse templates from the database's
//! [`CommandCaches`], keyed by the set of columns being written; deletes of
//! one type are batched, [`DELETE_BATCH_SIZE`] objects per statement. Every
//! driver error goes through the dialect's error decoration before it is
//! returned.

use crate::command_cache::{CachedCommand, CommandCache, CommandCaches, CommandKey};
use crate::object_cache::ObjectCache;
use asupersync::{Cx, Outcome};
use sqlpersist_core::{
    Connection, DeflatedPredicate, Error, ObjectErrorKind, ObjectHandle, ObjectPropertyValue,
    ObjectState, Result, Row, TypeModel, TypeRegistry, Value,
};
use sqlpersist_query::{
    Assignment, Binder, BinaryOp, DeleteExpr, FormatOptions, FormatResult, InsertExpr, Query, QueryExpr,
    SqlCapability, SqlDialect, SqlExpr, SqlFormatter, SyntaxSymbol, UpdateExpr, optimize,
    query_text, table_name,
};
use std::sync::Arc;

/// Objects deleted per statement.
pub const DELETE_BATCH_SIZE: usize = 256;

/// What an insert pass left for later.
#[derive(Debug, Default)]
pub struct InsertResults {
    /// Inserted, but still referencing objects whose keys the server has
    /// not assigned yet; they need an update once those are inserted
    pub fixup: Vec<ObjectHandle>,
    /// Not ready to insert in this pass
    pub retry: Vec<ObjectHandle>,
    /// Number of rows inserted
    pub inserted: usize,
}

/// Writes objects through one connection.
pub struct SqlTransactionalCommands<'a, C> {
    connection: &'a C,
    dialect: &'a dyn SqlDialect,
    registry: &'a TypeRegistry,
    caches: &'a CommandCaches,
    table_prefix: &'a str,
    format_options: FormatOptions,
    validate_generated_ids: bool,
    log_query_text: bool,
}

macro_rules! try_outcome {
    ($e:expr) => {
        match $e {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

macro_rules! try_result {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Outcome::Err(e),
        }
    };
}

pub(crate) use try_outcome;
pub(crate) use try_result;

impl<'a, C: Connection> SqlTransactionalCommands<'a, C> {
    pub fn new(
        connection: &'a C,
        dialect: &'a dyn SqlDialect,
        registry: &'a TypeRegistry,
        caches: &'a CommandCaches,
    ) -> Self {
        Self {
            connection,
            dialect,
            registry,
            caches,
            table_prefix: "",
            format_options: FormatOptions::default(),
            validate_generated_ids: true,
            log_query_text: false,
        }
    }

    pub fn table_prefix(mut self, prefix: &'a str) -> Self {
        self.table_prefix = prefix;
        self
    }

    pub fn format_options(mut self, options: FormatOptions) -> Self {
        self.format_options = options;
        self
    }

    pub fn validate_server_generated_ids(mut self, value: bool) -> Self {
        self.validate_generated_ids = value;
        self
    }

    pub fn log_query_text(mut self, value: bool) -> Self {
        self.log_query_text = value;
        self
    }

    /// Writes always bind their placeholders; `$$n` slots are never sent.
    fn formatter(&self) -> SqlFormatter<'a> {
        SqlFormatter::new(
            self.dialect,
            FormatOptions {
                evaluate_constant_placeholders: true,
                ..self.format_options
            },
        )
    }

    fn table(&self, model: &TypeModel) -> String {
        table_name(model, self.table_prefix)
    }

    // ==================== Insert ====================

    /// Insert every new object that is ready.
    ///
    /// Unchanged and deleted objects are skipped. An object is ready when
    /// its key does not wait on a server-generated key and, unless foreign
    /// keys are deferrable, it references no object still to be inserted.
    #[tracing::instrument(level = "debug", skip(self, cx, cache, objects), fields(count = objects.len()))]
    pub async fn insert(
        &self,
        cx: &Cx,
        cache: &mut ObjectCache,
        objects: &[ObjectHandle],
    ) -> Outcome<InsertResults, Error> {
        let deferrable = self.dialect.supports_capability(SqlCapability::Deferrability);
        let mut results = InsertResults::default();

        for handle in objects {
            if let Some(reason) = cx.cancel_reason() {
                return Outcome::Cancelled(reason);
            }

            let state = handle.state();
            if state.is_deleted() {
                continue;
            }
            if !state.is_new() {
                if state.is_changed() {
                    return Outcome::Err(Error::object(
                        ObjectErrorKind::InvalidState,
                        handle.model().name(),
                        "object already exists and must be updated, not inserted",
                    ));
                }
                continue;
            }

            let ready = {
                let object = handle.read();
                !object.primary_key_references_new_object_with_server_side_properties()
                    && (deferrable || !object.references_new_object())
            };
            if !ready {
                tracing::trace!(type_name = handle.model().name(), "Insert deferred to a later pass");
                results.retry.push(handle.clone());
                continue;
            }

            try_outcome!(self.insert_object(cx, handle).await);
            results.inserted += 1;
            cache.register(handle);

            let needs_fixup = handle
                .read()
                .references_new_object_with_server_side_properties();
            let mut object = handle.write();
            if needs_fixup {
                object.mark_inserted();
                results.fixup.push(handle.clone());
            } else {
                object.reset_modified();
            }
        }

        Outcome::Ok(results)
    }

    async fn insert_object(&self, cx: &Cx, handle: &ObjectHandle) -> Outcome<(), Error> {
        let model = handle.model();
        handle.write().compute_computed_text_properties();

        let mut reinserted = false;
        let read_back = loop {
            let read_back = try_outcome!(self.insert_row(cx, &model, handle).await);
            if !read_back
                || !self.validate_generated_ids
                || handle.read().validate_server_side_generated_ids()
            {
                break read_back;
            }

            let key = handle.read().key_description();
            if reinserted {
                return Outcome::Err(Error::object(
                    ObjectErrorKind::InvalidGeneratedValue,
                    model.name(),
                    format!("server generated an invalid key twice: {:?}", key),
                ));
            }
            tracing::warn!(
                type_name = model.name(),
                key = ?key,
                "Server generated an invalid key; deleting the row and inserting again"
            );
            try_outcome!(self.delete_row(cx, &model, handle).await);
            reinserted = true;
        };

        if !read_back {
            return Outcome::Ok(());
        }
        handle.write().mark_server_side_properties_applied();

        let recomputed = handle
            .write()
            .compute_server_generated_id_dependent_computed_text_properties();
        if recomputed {
            let columns: Vec<ObjectPropertyValue> = handle
                .read()
                .changed_properties_flattened()
                .into_iter()
                .filter(|c| {
                    model
                        .property_index(&c.property_name)
                        .and_then(|i| model.property(i))
                        .is_some_and(|p| p.depends_on_server_generated)
                })
                .collect();
            if !columns.is_empty() {
                try_outcome!(self.update_columns(cx, &model, handle, &columns).await);
            }
        }
        Outcome::Ok(())
    }

    /// Insert one row; returns whether server values were read back.
    async fn insert_row(
        &self,
        cx: &Cx,
        model: &Arc<TypeModel>,
        handle: &ObjectHandle,
    ) -> Outcome<bool, Error> {
        let (columns, identity_insert, read_back) = {
            let object = handle.read();
            (
                object.changed_properties_flattened(),
                object.has_any_changed_primary_key_server_side_properties(),
                object.defines_any_direct_properties_generated_on_the_server_side(),
            )
        };
        let returning = read_back
            && (self.dialect.supports_capability(SqlCapability::InsertOutput)
                || self.dialect.supports_capability(SqlCapability::InsertReturning));
        let pending = pending_server_columns(model, &columns);

        let key = CommandKey::new(model, &columns, identity_insert);
        let command = match self.caches.insert.try_get(&key) {
            Some(command) => command,
            None => {
                let expr = SqlExpr::Insert(Box::new(InsertExpr {
                    table: self.table(model),
                    columns: columns.iter().map(|c| c.column_name.to_string()).collect(),
                    values: columns
                        .iter()
                        .enumerate()
                        .map(|(i, c)| SqlExpr::placeholder(i, c.value.clone()))
                        .collect(),
                    returning: if returning { pending.clone() } else { Vec::new() },
                    requires_identity_insert: identity_insert,
                }));
                try_result!(self.build(&self.caches.insert, key, &expr, columns.len(), 0))
            }
        };

        let values: Vec<Value> = columns.iter().map(|c| c.value.clone()).collect();
        let params = try_result!(command.bind(&values, &[]));

        if returning {
            let rows = try_outcome!(self.query(cx, &command.format, &params, model.name()).await);
            let Some(row) = rows.first() else {
                return Outcome::Err(Error::shape(format!(
                    "insert into {} returned no row",
                    model.table_name()
                )));
            };
            try_result!(handle.write().apply_server_values(row));
        } else {
            try_outcome!(self.execute(cx, &command.format, &params, model.name()).await);
            if read_back {
                let row = try_outcome!(self.read_back_identity(cx, model, &pending).await);
                try_result!(handle.write().apply_server_values(&row));
            }
        }
        Outcome::Ok(read_back)
    }

    /// Read server-generated values of the row just inserted, through the
    /// dialect's last-insert-identity function.
    async fn read_back_identity(
        &self,
        cx: &Cx,
        model: &TypeModel,
        pending: &[String],
    ) -> Outcome<Row, Error> {
        let function = self.dialect.syntax_symbol(SyntaxSymbol::LastInsertIdentity);
        let identity = model.columns().iter().find(|c| c.auto_increment);
        let Some(identity) = identity.filter(|_| !function.is_empty()) else {
            return Outcome::Err(Error::capability(
                SqlCapability::InsertReturning.name(),
                format!(
                    "{} cannot read back server-generated values of {}",
                    self.dialect.name(),
                    model.name()
                ),
            ));
        };

        let columns: Vec<String> = pending
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {};",
            columns.join(", "),
            self.dialect.quote_identifier(&self.table(model)),
            self.dialect.quote_identifier(&identity.name),
            function
        );
        tracing::debug!(sql = %sql, "Reading back inserted identity");

        let rows = match self.connection.query(cx, &sql, &[]).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => {
                return Outcome::Err(self.decorate(e, Some(model.name()), || sql.clone()));
            }
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        match rows.into_iter().next() {
            Some(row) => Outcome::Ok(row),
            None => Outcome::Err(Error::shape(format!(
                "no row of {} matches the last inserted identity",
                model.table_name()
            ))),
        }
    }

    async fn delete_row(
        &self,
        cx: &Cx,
        model: &TypeModel,
        handle: &ObjectHandle,
    ) -> Outcome<(), Error> {
        let key = handle.read().key_properties();
        let predicate = SqlExpr::fold(
            BinaryOp::And,
            key.iter().map(|k| {
                SqlExpr::eq(
                    SqlExpr::column(None, &*k.column_name),
                    SqlExpr::constant(k.value.clone()),
                )
            }),
        );
        let expr = SqlExpr::Delete(Box::new(DeleteExpr {
            source: SqlExpr::table(self.table(model), None),
            where_clause: predicate,
        }));
        let format = try_result!(self.formatter().format(&expr));
        try_outcome!(self.execute(cx, &format, &format.params(), model.name()).await);
        Outcome::Ok(())
    }

    // ==================== Update ====================

    /// Write pending changes of persisted objects.
    ///
    /// Returns the number of objects updated. An update that matches no
    /// row fails with [`Error::MissingObject`].
    #[tracing::instrument(level = "debug", skip(self, cx, objects), fields(count = objects.len()))]
    pub async fn update(&self, cx: &Cx, objects: &[ObjectHandle]) -> Outcome<usize, Error> {
        let update_identity = self
            .dialect
            .supports_capability(SqlCapability::UpdateAutoIncrementColumns);
        let mut updated = 0;

        for handle in objects {
            if let Some(reason) = cx.cancel_reason() {
                return Outcome::Cancelled(reason);
            }

            let state = handle.state();
            if state.is_new() || state.is_deleted() {
                continue;
            }
            if !state.is_changed()
                && !state.contains(ObjectState::SERVER_SIDE_PROPERTIES_HYDRATED)
            {
                continue;
            }

            let model = handle.model();
            let (columns, predicate) = {
                let object = handle.read();
                let predicate = object
                    .predicate()
                    .filter(|_| object.is_deflated())
                    .cloned();
                (object.changed_properties_flattened(), predicate)
            };
            let columns: Vec<ObjectPropertyValue> = columns
                .into_iter()
                .filter(|c| {
                    update_identity
                        || !model
                            .property_index(&c.property_name)
                            .and_then(|i| model.property(i))
                            .is_some_and(|p| p.descriptor.auto_increment)
                })
                .collect();

            if !columns.is_empty() {
                match predicate {
                    Some(predicate) => {
                        try_outcome!(
                            self.update_by_predicate(cx, &model, handle, &columns, &predicate)
                                .await
                        );
                    }
                    None => try_outcome!(self.update_columns(cx, &model, handle, &columns).await),
                }
                updated += 1;
            }
            handle.write().reset_modified();
        }

        Outcome::Ok(updated)
    }

    /// Update `columns` of the row identified by the object's key, through
    /// a cached template.
    async fn update_columns(
        &self,
        cx: &Cx,
        model: &Arc<TypeModel>,
        handle: &ObjectHandle,
        columns: &[ObjectPropertyValue],
    ) -> Outcome<(), Error> {
        let key_values = handle.read().key_values();
        let key = CommandKey::new(model, columns, false);

        let command = match self.caches.update.try_get(&key) {
            Some(command) => command,
            None => {
                let predicate = SqlExpr::fold(
                    BinaryOp::And,
                    model
                        .key_column_models()
                        .zip(&key_values)
                        .enumerate()
                        .map(|(j, (column, value))| {
                            SqlExpr::eq(
                                SqlExpr::column(None, &*column.name),
                                SqlExpr::placeholder(columns.len() + j, value.clone()),
                            )
                        }),
                );
                let expr = SqlExpr::Update(Box::new(UpdateExpr {
                    source: SqlExpr::table(self.table(model), None),
                    assignments: columns
                        .iter()
                        .enumerate()
                        .map(|(i, c)| Assignment {
                            column: c.column_name.to_string(),
                            value: SqlExpr::placeholder(i, c.value.clone()),
                        })
                        .collect(),
                    where_clause: predicate,
                }));
                try_result!(self.build(
                    &self.caches.update,
                    key,
                    &expr,
                    columns.len(),
                    key_values.len()
                ))
            }
        };

        let values: Vec<Value> = columns.iter().map(|c| c.value.clone()).collect();
        let params = try_result!(command.bind(&values, &key_values));
        let affected = try_outcome!(self.execute(cx, &command.format, &params, model.name()).await);
        if affected == 0 {
            let sql = self.literal_text(&command.format, &params);
            return Outcome::Err(handle.read().missing(Some(sql)));
        }
        Outcome::Ok(())
    }

    /// Update a deflated object identified by a predicate. Never cached.
    async fn update_by_predicate(
        &self,
        cx: &Cx,
        model: &TypeModel,
        handle: &ObjectHandle,
        columns: &[ObjectPropertyValue],
        predicate: &DeflatedPredicate,
    ) -> Outcome<(), Error> {
        let mut conditions = Vec::with_capacity(predicate.conditions.len());
        for (property, value) in &predicate.conditions {
            let column = model
                .property_index(property)
                .and_then(|i| model.property(i))
                .and_then(|p| model.columns()[p.columns.clone()].first());
            let Some(column) = column else {
                return Outcome::Err(Error::object(
                    ObjectErrorKind::UnknownProperty,
                    model.name(),
                    format!("predicate names unknown property '{}'", property),
                ));
            };
            conditions.push(SqlExpr::eq(
                SqlExpr::column(None, &*column.name),
                SqlExpr::constant(value.clone()),
            ));
        }
        if conditions.is_empty() {
            return Outcome::Err(Error::object(
                ObjectErrorKind::Deflated,
                model.name(),
                "deflated object has an empty predicate",
            ));
        }

        let expr = SqlExpr::Update(Box::new(UpdateExpr {
            source: SqlExpr::table(self.table(model), None),
            assignments: columns
                .iter()
                .map(|c| Assignment {
                    column: c.column_name.to_string(),
                    value: SqlExpr::constant(c.value.clone()),
                })
                .collect(),
            where_clause: SqlExpr::fold(BinaryOp::And, conditions),
        }));
        let format = try_result!(self.formatter().format(&expr));
        let params = format.params();
        let affected = try_outcome!(self.execute(cx, &format, &params, model.name()).await);
        if affected == 0 {
            return Outcome::Err(handle.read().missing(Some(format.command_text.clone())));
        }
        Outcome::Ok(())
    }

    // ==================== Delete ====================

    /// Delete `objects` of one type, one statement per
    /// [`DELETE_BATCH_SIZE`] objects.
    ///
    /// Returns the number of rows deleted; a statement deleting zero rows
    /// fails with [`Error::MissingObject`].
    #[tracing::instrument(level = "debug", skip(self, cx, objects), fields(count = objects.len()))]
    pub async fn delete(
        &self,
        cx: &Cx,
        type_name: &str,
        objects: &[ObjectHandle],
    ) -> Outcome<u64, Error> {
        let model = try_result!(self.registry.model(type_name));
        let mut affected = 0;
        for batch in objects.chunks(DELETE_BATCH_SIZE) {
            if let Some(reason) = cx.cancel_reason() {
                return Outcome::Cancelled(reason);
            }
            affected += try_outcome!(self.delete_batch(cx, model, batch).await);
        }
        if !objects.is_empty() {
            tracing::debug!(type_name, requested = objects.len(), affected, "Deleted objects");
        }
        Outcome::Ok(affected)
    }

    async fn delete_batch(
        &self,
        cx: &Cx,
        model: &TypeModel,
        batch: &[ObjectHandle],
    ) -> Outcome<u64, Error> {
        let Some(first) = batch.first() else {
            return Outcome::Ok(0);
        };
        let filters = try_result!(
            batch
                .iter()
                .map(|h| object_filter(model, h))
                .collect::<Result<Vec<_>>>()
        );
        let mut query = Query::new(model.name());
        if let Some(filter) = QueryExpr::any(filters) {
            query = query.filter(filter);
        }

        let expr = try_result!(
            Binder::new(self.registry)
                .with_table_prefix(self.table_prefix)
                .bind_delete(&query)
                .and_then(optimize)
        );
        let format = try_result!(self.formatter().format(&expr));
        let params = format.params();
        let affected = try_outcome!(self.execute(cx, &format, &params, model.name()).await);
        if affected == 0 {
            return Outcome::Err(first.read().missing(Some(format.command_text.clone())));
        }
        Outcome::Ok(affected)
    }

    // ==================== Execution ====================

    fn build(
        &self,
        cache: &CommandCache,
        key: CommandKey,
        expr: &SqlExpr,
        value_count: usize,
        key_count: usize,
    ) -> Result<Arc<CachedCommand>> {
        let format = self.formatter().format(expr)?;
        let command = CachedCommand::new(format, value_count, key_count);
        if command.format.cacheable {
            Ok(cache.publish(key, command))
        } else {
            tracing::trace!(type_name = key.type_name(), "Template not cacheable; using it once");
            Ok(Arc::new(command))
        }
    }

    /// Statement text with `params` inlined as literals.
    fn literal_text(&self, format: &FormatResult, params: &[Value]) -> String {
        let mut bound = format.clone();
        for (located, value) in bound.parameter_values.iter_mut().zip(params) {
            located.value = value.clone();
        }
        query_text(self.dialect, &bound)
    }

    fn log_statement(&self, format: &FormatResult, params: &[Value]) {
        tracing::debug!(sql = %format.command_text, params = params.len(), "Executing statement");
        if self.log_query_text {
            tracing::debug!(query = %self.literal_text(format, params), "Query text");
        }
    }

    /// Give the dialect a chance to type a driver error, then log it.
    fn decorate(
        &self,
        error: Error,
        type_name: Option<&str>,
        related_sql: impl FnOnce() -> String,
    ) -> Error {
        let related_sql = error.sql().map_or_else(related_sql, str::to_string);
        let decorated = self.dialect.decorate_error(error, type_name, &related_sql);
        tracing::error!(error = %decorated, sql = %related_sql, type_name, "Statement failed");
        decorated
    }

    async fn execute(
        &self,
        cx: &Cx,
        format: &FormatResult,
        params: &[Value],
        type_name: &str,
    ) -> Outcome<u64, Error> {
        self.log_statement(format, params);
        match self.connection.execute(cx, &format.command_text, params).await {
            Outcome::Ok(n) => Outcome::Ok(n),
            Outcome::Err(e) => Outcome::Err(self.decorate(e, Some(type_name), || {
                self.literal_text(format, params)
            })),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn query(
        &self,
        cx: &Cx,
        format: &FormatResult,
        params: &[Value],
        type_name: &str,
    ) -> Outcome<Vec<Row>, Error> {
        self.log_statement(format, params);
        match self.connection.query(cx, &format.command_text, params).await {
            Outcome::Ok(rows) => Outcome::Ok(rows),
            Outcome::Err(e) => Outcome::Err(self.decorate(e, Some(type_name), || {
                self.literal_text(format, params)
            })),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

/// Server-generated columns the insert does not write.
fn pending_server_columns(model: &TypeModel, written: &[ObjectPropertyValue]) -> Vec<String> {
    model
        .server_generated_columns()
        .iter()
        .map(|&i| &model.columns()[i])
        .filter(|c| !written.iter().any(|w| w.column_name == c.name))
        .map(|c| c.name.to_string())
        .collect()
}

/// Equality filter selecting the row behind `handle`.
pub(crate) fn object_filter(model: &TypeModel, handle: &ObjectHandle) -> Result<QueryExpr> {
    let object = handle.read();
    if let Some(predicate) = object.predicate().filter(|_| object.is_deflated()) {
        return predicate
            .conditions
            .iter()
            .map(|(property, value)| {
                QueryExpr::property(property.as_str()).eq(QueryExpr::value(value.clone()))
            })
            .reduce(QueryExpr::and)
            .ok_or_else(|| {
                Error::object(
                    ObjectErrorKind::Deflated,
                    model.name(),
                    "deflated object has an empty predicate",
                )
            });
    }

    let mut filter: Option<QueryExpr> = None;
    for &index in model.key_properties() {
        let Some(property) = model.property(index) else {
            continue;
        };
        let name = property.name();
        let value = if property.is_reference() {
            match object.get_reference(name)? {
                Some(target) => QueryExpr::object_of(target),
                None => QueryExpr::value(Value::Null),
            }
        } else {
            QueryExpr::value(object.get_value(name)?.clone())
        };
        let condition = QueryExpr::property(name).eq(value);
        filter = Some(match filter {
            Some(existing) => existing.and(condition),
            None => condition,
        });
    }
    filter.ok_or_else(|| Error::shape(format!("{} has no key", model.name())))
}
