//! Schema creation.

use crate::create::{SchemaBuilder, SchemaOptions};
use asupersync::{Cx, Outcome};
use sqlpersist_core::{
    Blocking, Connection, Error, Result, SyncConnection, TypeRegistry, run_blocking,
};
use sqlpersist_query::{AlterTableExpr, FormatOptions, SqlDialect, SqlExpr, SqlFormatter};

/// Creates the tables and indexes of a registry on a live connection.
///
/// Statements run one at a time between a statement disabling foreign key
/// checks and one enabling them again, for dialects that have such
/// statements.
#[derive(Clone, Copy)]
pub struct SchemaManager<'a> {
    registry: &'a TypeRegistry,
    dialect: &'a dyn SqlDialect,
    table_prefix: &'a str,
    options: SchemaOptions,
}

impl<'a> SchemaManager<'a> {
    pub fn new(registry: &'a TypeRegistry, dialect: &'a dyn SqlDialect) -> Self {
        Self {
            registry,
            dialect,
            table_prefix: "",
            options: SchemaOptions::default(),
        }
    }

    pub fn table_prefix(mut self, prefix: &'a str) -> Self {
        self.table_prefix = prefix;
        self
    }

    pub fn options(mut self, options: SchemaOptions) -> Self {
        self.options = options;
        self
    }

    /// Formatted statements in execution order, excluding the foreign key
    /// check toggles.
    pub fn statements(&self) -> Result<Vec<String>> {
        let list = SchemaBuilder::new(self.registry, self.dialect)
            .table_prefix(self.table_prefix)
            .options(self.options)
            .build()?;
        let SqlExpr::StatementList(statements) = list else {
            return Err(Error::shape("schema builder did not return a statement list"));
        };

        let formatter = SqlFormatter::new(self.dialect, FormatOptions::default());
        let mut texts = Vec::with_capacity(statements.len());
        for statement in split_alters(statements) {
            texts.push(formatter.format(&statement)?.command_text);
        }
        Ok(texts)
    }

    fn toggle(&self, enabled: bool) -> Result<Option<String>> {
        match self.dialect.foreign_key_checks(enabled) {
            Some(statement) => Ok(Some(
                SqlFormatter::new(self.dialect, FormatOptions::default())
                    .format(&statement)?
                    .command_text,
            )),
            None => Ok(None),
        }
    }

    fn prepare(&self) -> Result<(Vec<String>, Option<String>, Option<String>)> {
        Ok((self.statements()?, self.toggle(false)?, self.toggle(true)?))
    }

    /// Create the schema. Returns the number of DDL statements executed.
    #[tracing::instrument(level = "info", skip(self, cx, conn), fields(dialect = self.dialect.name()))]
    pub async fn create_schema<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<usize, Error> {
        let (statements, disable, enable) = match self.prepare() {
            Ok(parts) => parts,
            Err(e) => return Outcome::Err(e),
        };

        if let Some(sql) = &disable {
            tracing::debug!(sql = %sql, "Disabling foreign key checks");
            match conn.execute(cx, sql, &[]).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let mut executed = 0;
        let mut result = Outcome::Ok(());
        for sql in &statements {
            if let Some(reason) = cx.cancel_reason() {
                result = Outcome::Cancelled(reason);
                break;
            }
            tracing::debug!(sql = %sql, "Executing DDL");
            match conn.execute(cx, sql, &[]).await {
                Outcome::Ok(_) => executed += 1,
                Outcome::Err(e) => {
                    tracing::error!(sql = %sql, error = %e, "DDL statement failed");
                    result = Outcome::Err(e);
                    break;
                }
                Outcome::Cancelled(r) => {
                    result = Outcome::Cancelled(r);
                    break;
                }
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        // Checks come back on even when a statement failed
        if let Some(sql) = &enable {
            tracing::debug!(sql = %sql, "Enabling foreign key checks");
            match conn.execute(cx, sql, &[]).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) if matches!(result, Outcome::Ok(())) => return Outcome::Err(e),
                Outcome::Err(e) => {
                    tracing::warn!(error = %e, "Could not re-enable foreign key checks");
                }
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        match result {
            Outcome::Ok(()) => {
                tracing::info!(statements = executed, "Schema created");
                Outcome::Ok(executed)
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Blocking form of [`create_schema`](Self::create_schema).
    pub fn create_schema_blocking<S: SyncConnection>(
        &self,
        cx: &Cx,
        conn: &Blocking<S>,
    ) -> Result<usize> {
        run_blocking(self.create_schema(cx, conn))
    }
}

/// One `ALTER TABLE` per constraint, so every statement is sent alone.
fn split_alters(statements: Vec<SqlExpr>) -> Vec<SqlExpr> {
    let mut split = Vec::with_capacity(statements.len());
    for statement in statements {
        match statement {
            SqlExpr::AlterTable(alter) if alter.add_constraints.len() > 1 => {
                let AlterTableExpr {
                    table,
                    add_constraints,
                } = *alter;
                split.extend(add_constraints.into_iter().map(|constraint| {
                    SqlExpr::AlterTable(Box::new(AlterTableExpr {
                        table: table.clone(),
                        add_constraints: vec![constraint],
                    }))
                }));
            }
            other => split.push(other),
        }
    }
    split
}
