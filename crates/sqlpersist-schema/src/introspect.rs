//! Loading existing table definitions.
//!
//! [`SchemaLoader`] reads `information_schema.tables` and
//! `information_schema.columns` and rebuilds them as `CREATE TABLE IF NOT
//! EXISTS` statements. Only names, types and nullability are recovered;
//! keys, foreign keys and indexes are not.

use asupersync::{Cx, Outcome};
use sqlpersist_core::{Connection, Error, Result, Row, SqlType, Value};
use sqlpersist_query::{
    ColumnDefinition, Constraint, CreateTableExpr, SqlCapability, SqlDialect, SqlExpr, literal,
};

/// Parse a server type name such as `VARCHAR(255)` or `numeric(10, 2)`.
///
/// Names this crate does not model are kept verbatim as
/// [`SqlType::Custom`].
pub fn parse_sql_type(type_name: &str) -> SqlType {
    let trimmed = type_name.trim();
    let upper = trimmed.to_uppercase();
    let (base, params) = match upper.find('(') {
        Some(open) => (
            upper[..open].trim(),
            upper[open + 1..].trim_end_matches(')').trim(),
        ),
        None => (upper.as_str(), ""),
    };
    let numbers: Vec<u32> = params
        .split(',')
        .filter_map(|p| p.trim().parse().ok())
        .collect();

    match base {
        "SMALLINT" | "INT2" => SqlType::SmallInt,
        "INT" | "INTEGER" | "INT4" | "MEDIUMINT" => SqlType::Integer,
        "BIGINT" | "INT8" => SqlType::BigInt,
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "FLOAT8" | "REAL" => SqlType::Double,
        "DECIMAL" | "NUMERIC" => match numbers.as_slice() {
            [precision, scale] => SqlType::Decimal {
                precision: u8::try_from(*precision).unwrap_or(u8::MAX),
                scale: u8::try_from(*scale).unwrap_or(u8::MAX),
            },
            _ => SqlType::Custom(trimmed.to_string()),
        },
        "BOOLEAN" | "BOOL" | "BIT" => SqlType::Boolean,
        "VARCHAR" | "CHARACTER VARYING" | "NVARCHAR" => match numbers.as_slice() {
            [length] => SqlType::VarChar(*length),
            _ => SqlType::Text,
        },
        "TEXT" | "CLOB" | "NTEXT" | "LONGTEXT" | "MEDIUMTEXT" => SqlType::Text,
        "BLOB" | "BYTEA" | "VARBINARY" | "LONGBLOB" => SqlType::Blob,
        "DATE" => SqlType::Date,
        "TIMESTAMP" | "DATETIME" | "DATETIME2" | "TIMESTAMP WITHOUT TIME ZONE" => {
            SqlType::Timestamp
        }
        "UUID" | "UNIQUEIDENTIFIER" => SqlType::Uuid,
        "JSON" | "JSONB" => SqlType::Json,
        _ => SqlType::Custom(trimmed.to_string()),
    }
}

fn text(row: &Row, column: &str) -> Result<String> {
    row.get_named::<String>(column)
}

/// Reads existing tables back into a statement list.
#[derive(Clone, Copy)]
pub struct SchemaLoader<'a> {
    dialect: &'a dyn SqlDialect,
    schema: Option<&'a str>,
}

impl<'a> SchemaLoader<'a> {
    pub fn new(dialect: &'a dyn SqlDialect) -> Self {
        Self {
            dialect,
            schema: None,
        }
    }

    /// Restrict loading to one schema (e.g. `public`).
    pub fn schema(mut self, schema: &'a str) -> Self {
        self.schema = Some(schema);
        self
    }

    fn schema_filter(&self, prefix: &str) -> String {
        match self.schema {
            Some(schema) => format!(
                " {} table_schema = {}",
                prefix,
                literal(self.dialect, &Value::Text(schema.to_string()))
            ),
            None => String::new(),
        }
    }

    /// Query listing base tables.
    pub fn tables_sql(&self) -> String {
        format!(
            "SELECT table_name FROM information_schema.tables WHERE table_type = 'BASE TABLE'{} ORDER BY table_name",
            self.schema_filter("AND")
        )
    }

    /// Query listing columns in ordinal order.
    pub fn columns_sql(&self) -> String {
        format!(
            "SELECT table_name, column_name, is_nullable, data_type FROM information_schema.columns{} \
             ORDER BY table_name, ordinal_position",
            self.schema_filter("WHERE")
        )
    }

    /// Rebuild tables from `information_schema` rows.
    ///
    /// `tables` rows carry `table_name`; `columns` rows carry `table_name`,
    /// `column_name`, `is_nullable` (`YES`/`NO`) and `data_type`. Tables keep
    /// the order of `tables`, columns the order of `columns`.
    pub fn from_rows(tables: &[Row], columns: &[Row]) -> Result<SqlExpr> {
        let mut statements = Vec::with_capacity(tables.len());
        for row in tables {
            let table = text(row, "table_name")?;
            let mut definitions = Vec::new();
            for column in columns {
                if text(column, "table_name")? != table {
                    continue;
                }
                let nullable = text(column, "is_nullable")?.eq_ignore_ascii_case("yes");
                definitions.push(ColumnDefinition {
                    name: text(column, "column_name")?,
                    sql_type: parse_sql_type(&text(column, "data_type")?),
                    constraints: if nullable {
                        Vec::new()
                    } else {
                        vec![Constraint::NotNull]
                    },
                });
            }
            statements.push(SqlExpr::CreateTable(Box::new(CreateTableExpr {
                table,
                if_not_exists: true,
                columns: definitions,
                constraints: Vec::new(),
            })));
        }
        Ok(SqlExpr::StatementList(statements))
    }

    /// Load every table visible to `conn`.
    #[tracing::instrument(level = "debug", skip(self, cx, conn), fields(dialect = self.dialect.name()))]
    pub async fn load<C: Connection>(&self, cx: &Cx, conn: &C) -> Outcome<SqlExpr, Error> {
        if !self
            .dialect
            .supports_capability(SqlCapability::InformationSchema)
        {
            return Outcome::Err(Error::capability(
                SqlCapability::InformationSchema.name(),
                format!("{} has no information schema to load from", self.dialect.name()),
            ));
        }

        let tables = match conn.query(cx, &self.tables_sql(), &[]).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        if let Some(reason) = cx.cancel_reason() {
            return Outcome::Cancelled(reason);
        }
        let columns = match conn.query(cx, &self.columns_sql(), &[]).await {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        tracing::debug!(
            tables = tables.len(),
            columns = columns.len(),
            "Loaded schema rows"
        );
        match Self::from_rows(&tables, &columns) {
            Ok(list) => Outcome::Ok(list),
            Err(e) => Outcome::Err(e),
        }
    }
}
