//! DDL statement-list builder.
//!
//! [`SchemaBuilder`] lowers every registered type into `CREATE TABLE`
//! statements, foreign key constraints and `CREATE INDEX` statements. The
//! output order is fixed: tables in declaration order, then the constraints
//! the dialect adds with `ALTER TABLE`, then indexes. Dialects that cannot
//! add constraints afterwards keep their foreign keys inline.

use serde::{Deserialize, Serialize};
use sqlpersist_core::{
    Error, PropertyKind, ReferentialAction, Result, SchemaErrorKind, TypeModel, TypeRegistry,
};
use sqlpersist_query::{
    ColumnDefinition, Constraint, CreateIndexExpr, CreateTableExpr, ForeignKeyConstraint,
    ForeignKeyConstraintAmender, IndexedColumn, SqlDialect, SqlExpr, table_name,
};

/// What [`SchemaBuilder::build`] emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaOptions {
    pub build_tables: bool,
    pub build_indexes: bool,
    /// Add `IF NOT EXISTS` to tables and indexes
    pub if_not_exists: bool,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            build_tables: true,
            build_indexes: true,
            if_not_exists: false,
        }
    }
}

impl SchemaOptions {
    pub fn build_tables(mut self, value: bool) -> Self {
        self.build_tables = value;
        self
    }

    pub fn build_indexes(mut self, value: bool) -> Self {
        self.build_indexes = value;
        self
    }

    pub fn if_not_exists(mut self, value: bool) -> Self {
        self.if_not_exists = value;
        self
    }
}

/// Builds the DDL for a [`TypeRegistry`].
#[derive(Clone, Copy)]
pub struct SchemaBuilder<'a> {
    registry: &'a TypeRegistry,
    dialect: &'a dyn SqlDialect,
    table_prefix: &'a str,
    options: SchemaOptions,
}

impl<'a> SchemaBuilder<'a> {
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

    /// Build the statement list. The same registry always yields the same
    /// list.
    #[tracing::instrument(level = "debug", skip(self), fields(dialect = self.dialect.name()))]
    pub fn build(&self) -> Result<SqlExpr> {
        let mut statements = Vec::new();

        if self.options.build_tables {
            for model in self.registry.iter() {
                statements.push(SqlExpr::CreateTable(Box::new(self.create_table(model)?)));
            }
        }
        if self.options.build_indexes {
            for model in self.registry.iter() {
                for index in self.indexes(model)? {
                    statements.push(SqlExpr::CreateIndex(Box::new(index)));
                }
            }
        }

        let list = ForeignKeyConstraintAmender::amend(SqlExpr::StatementList(statements), self.dialect);
        if let SqlExpr::StatementList(statements) = &list {
            tracing::debug!(statements = statements.len(), "Built schema");
        }
        Ok(list)
    }

    fn create_table(&self, model: &TypeModel) -> Result<CreateTableExpr> {
        let key_columns = model.key_columns();
        let composite_key = key_columns.len() > 1;

        let mut columns = Vec::with_capacity(model.columns().len());
        for column in model.columns() {
            let mut constraints = Vec::new();
            if column.primary_key && !composite_key {
                constraints.push(Constraint::PrimaryKey {
                    name: None,
                    columns: Vec::new(),
                });
            } else if !column.nullable {
                constraints.push(Constraint::NotNull);
            }
            if column.auto_increment {
                constraints.push(Constraint::AutoIncrement);
            }
            if let Some(default) = &column.default {
                constraints.push(Constraint::Default(SqlExpr::constant(default.clone())));
            }
            if column.unique && !column.primary_key {
                constraints.push(Constraint::Unique {
                    name: None,
                    columns: Vec::new(),
                });
            }
            columns.push(ColumnDefinition {
                name: column.name.to_string(),
                sql_type: column.sql_type.clone(),
                constraints,
            });
        }

        let mut constraints = Vec::new();
        if composite_key {
            constraints.push(Constraint::PrimaryKey {
                name: None,
                columns: key_columns
                    .iter()
                    .map(|&i| model.columns()[i].name.to_string())
                    .collect(),
            });
        }
        for property in model.properties() {
            let PropertyKind::Reference {
                on_delete,
                on_update,
                ..
            } = property.descriptor.kind
            else {
                continue;
            };
            let Some(target) = property.target.as_deref() else {
                continue;
            };
            let target = self.registry.model(target)?;
            constraints.push(Constraint::ForeignKey(self.foreign_key(
                model,
                property.name(),
                property.columns.clone().map(|i| model.columns()[i].name.to_string()),
                target,
                on_delete,
                on_update,
            )));
        }

        Ok(CreateTableExpr {
            table: table_name(model, self.table_prefix),
            if_not_exists: self.options.if_not_exists,
            columns,
            constraints,
        })
    }

    fn foreign_key(
        &self,
        model: &TypeModel,
        property: &str,
        columns: impl Iterator<Item = String>,
        target: &TypeModel,
        on_delete: ReferentialAction,
        on_update: ReferentialAction,
    ) -> ForeignKeyConstraint {
        ForeignKeyConstraint {
            name: Some(format!("fk_{}_{}", table_name(model, self.table_prefix), property)),
            columns: columns.collect(),
            referenced_table: table_name(target, self.table_prefix),
            referenced_columns: target
                .key_column_models()
                .map(|c| c.name.to_string())
                .collect(),
            on_delete,
            on_update,
            // Lets a row reference one inserted later in the same transaction
            deferrable: true,
        }
    }

    fn indexes(&self, model: &TypeModel) -> Result<Vec<CreateIndexExpr>> {
        let mut indexes = Vec::with_capacity(model.descriptor().indexes.len());
        for index in &model.descriptor().indexes {
            let mut columns = Vec::new();
            for entry in &index.columns {
                let property = model
                    .property_index(&entry.property)
                    .and_then(|i| model.property(i))
                    .ok_or_else(|| {
                        Error::schema(
                            SchemaErrorKind::Invalid,
                            format!(
                                "index '{}' names unknown property '{}.{}'",
                                index.name,
                                model.name(),
                                entry.property
                            ),
                        )
                    })?;
                columns.extend(model.columns()[property.columns.clone()].iter().map(|c| {
                    IndexedColumn {
                        column: c.name.to_string(),
                        descending: Some(entry.descending),
                    }
                }));
            }
            indexes.push(CreateIndexExpr {
                name: index.name.clone(),
                table: table_name(model, self.table_prefix),
                unique: index.unique,
                if_not_exists: self.options.if_not_exists,
                columns,
            });
        }
        Ok(indexes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlpersist_core::{IndexDescriptor, PropertyDescriptor, SqlType, TypeDescriptor};
    use sqlpersist_query::{
        FormatOptions, PostgresDialect, SqlFormatter, SqlNodeType, SqliteDialect,
    };

    fn registry() -> TypeRegistry {
        TypeRegistry::builder()
            .register(
                TypeDescriptor::new("School")
                    .property(
                        PropertyDescriptor::scalar("Id", SqlType::BigInt)
                            .primary_key()
                            .auto_increment(),
                    )
                    .property(PropertyDescriptor::scalar("Name", SqlType::Text).unique()),
            )
            .register(
                TypeDescriptor::new("Student")
                    .property(
                        PropertyDescriptor::scalar("Id", SqlType::BigInt)
                            .primary_key()
                            .auto_increment(),
                    )
                    .property(PropertyDescriptor::scalar("Name", SqlType::Text))
                    .property(
                        PropertyDescriptor::scalar("Active", SqlType::Boolean).default_value(true),
                    )
                    .property(
                        PropertyDescriptor::reference("School", "School")
                            .on_delete(ReferentialAction::Cascade),
                    )
                    .index(IndexDescriptor::new("ix_Student_Name").on("Name").on_desc("Id")),
            )
            .build()
            .unwrap()
    }

    fn node_types(list: &SqlExpr) -> Vec<SqlNodeType> {
        match list {
            SqlExpr::StatementList(statements) => {
                statements.iter().map(SqlExpr::node_type).collect()
            }
            other => panic!("expected a statement list, got {other:?}"),
        }
    }

    #[test]
    fn test_sqlite_keeps_foreign_keys_inline() {
        let registry = registry();
        let list = SchemaBuilder::new(&registry, &SqliteDialect).build().unwrap();
        assert_eq!(
            node_types(&list),
            vec![
                SqlNodeType::CreateTable,
                SqlNodeType::CreateTable,
                SqlNodeType::CreateIndex
            ]
        );

        let text = SqlFormatter::new(&SqliteDialect, FormatOptions::default())
            .format(&list)
            .unwrap()
            .command_text;
        assert_eq!(
            text,
            "CREATE TABLE \"School\" (\"Id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"Name\" TEXT NOT NULL UNIQUE);\n\
             CREATE TABLE \"Student\" (\"Id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"Name\" TEXT NOT NULL, \
             \"Active\" INTEGER NOT NULL DEFAULT 1, \"SchoolId\" INTEGER, \
             CONSTRAINT \"fk_Student_School\" FOREIGN KEY(\"SchoolId\") REFERENCES \"School\"(\"Id\") \
             ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED);\n\
             CREATE INDEX \"ix_Student_Name\" ON \"Student\"(\"Name\" ASC, \"Id\" DESC);"
        );
    }

    #[test]
    fn test_tables_then_constraints_then_indexes() {
        let registry = registry();
        let list = SchemaBuilder::new(&registry, &PostgresDialect)
            .build()
            .unwrap();
        assert_eq!(
            node_types(&list),
            vec![
                SqlNodeType::CreateTable,
                SqlNodeType::CreateTable,
                SqlNodeType::AlterTable,
                SqlNodeType::CreateIndex
            ]
        );
        // Building twice gives the same tree
        assert_eq!(
            list,
            SchemaBuilder::new(&registry, &PostgresDialect)
                .build()
                .unwrap()
        );
    }

    #[test]
    fn test_prefix_and_options() {
        let registry = registry();
        let list = SchemaBuilder::new(&registry, &PostgresDialect)
            .table_prefix("app_")
            .options(SchemaOptions::default().build_indexes(false).if_not_exists(true))
            .build()
            .unwrap();
        let SqlExpr::StatementList(statements) = &list else {
            panic!("expected a statement list");
        };
        assert_eq!(statements.len(), 3);

        let SqlExpr::CreateTable(school) = &statements[0] else {
            panic!("expected CREATE TABLE first");
        };
        assert_eq!(school.table, "app_School");
        assert!(school.if_not_exists);

        let SqlExpr::AlterTable(alter) = &statements[2] else {
            panic!("expected ALTER TABLE last");
        };
        assert_eq!(alter.table, "app_Student");
        let Constraint::ForeignKey(fk) = &alter.add_constraints[0] else {
            panic!("expected a foreign key");
        };
        assert_eq!(fk.name.as_deref(), Some("fk_app_Student_School"));
        assert_eq!(fk.referenced_table, "app_School");
        assert_eq!(fk.columns, vec!["SchoolId".to_string()]);
    }

    #[test]
    fn test_composite_key_is_a_table_constraint() {
        let registry = TypeRegistry::builder()
            .register(
                TypeDescriptor::new("Enrollment")
                    .property(PropertyDescriptor::scalar("Year", SqlType::Integer).primary_key())
                    .property(PropertyDescriptor::scalar("Code", SqlType::VarChar(16)).primary_key()),
            )
            .build()
            .unwrap();
        let list = SchemaBuilder::new(&registry, &SqliteDialect)
            .options(SchemaOptions::default().build_indexes(false))
            .build()
            .unwrap();
        let text = SqlFormatter::new(&SqliteDialect, FormatOptions::default())
            .format(&list)
            .unwrap()
            .command_text;
        assert_eq!(
            text,
            "CREATE TABLE \"Enrollment\" (\"Year\" INTEGER NOT NULL, \"Code\" VARCHAR(16) NOT NULL, \
             PRIMARY KEY(\"Year\", \"Code\"));"
        );
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: SchemaOptions = serde_json::from_str(r#"{"if_not_exists": true}"#).unwrap();
        assert!(options.build_tables && options.build_indexes && options.if_not_exists);
    }
}
