//! Foreign key constraint amendment.

use crate::ast::{AlterTableExpr, Constraint, CreateTableExpr, SqlExpr};
use crate::dialect::{SqlCapability, SqlDialect};

/// Moves foreign keys out of `CREATE TABLE` into `ALTER TABLE` statements.
///
/// Tables can then be created in any order regardless of the references
/// between them. The resulting statement list holds every table first, then
/// one `ALTER TABLE` per table that had foreign keys (in table order), then
/// the remaining statements in their original order. Dialects without
/// [`SqlCapability::AlterTableAddConstraints`] keep their constraints inline.
pub struct ForeignKeyConstraintAmender;

impl ForeignKeyConstraintAmender {
    pub fn amend(expr: SqlExpr, dialect: &dyn SqlDialect) -> SqlExpr {
        if !dialect.supports_capability(SqlCapability::AlterTableAddConstraints) {
            return expr;
        }

        let statements = match expr {
            SqlExpr::StatementList(statements) => statements,
            create @ SqlExpr::CreateTable(_) => vec![create],
            other => return other,
        };

        let mut tables = Vec::new();
        let mut alters = Vec::new();
        let mut rest = Vec::new();

        for statement in statements {
            match statement {
                SqlExpr::CreateTable(create) => {
                    let (create, foreign_keys) = split_foreign_keys(*create);
                    if !foreign_keys.is_empty() {
                        alters.push(SqlExpr::AlterTable(Box::new(AlterTableExpr {
                            table: create.table.clone(),
                            add_constraints: foreign_keys,
                        })));
                    }
                    tables.push(SqlExpr::CreateTable(Box::new(create)));
                }
                other => rest.push(other),
            }
        }

        tables.extend(alters);
        tables.extend(rest);
        SqlExpr::StatementList(tables)
    }
}

fn split_foreign_keys(mut create: CreateTableExpr) -> (CreateTableExpr, Vec<Constraint>) {
    let mut foreign_keys = Vec::new();

    for column in &mut create.columns {
        let constraints = std::mem::take(&mut column.constraints);
        for constraint in constraints {
            match constraint {
                Constraint::ForeignKey(mut fk) => {
                    if fk.columns.is_empty() {
                        fk.columns.push(column.name.clone());
                    }
                    foreign_keys.push(Constraint::ForeignKey(fk));
                }
                other => column.constraints.push(other),
            }
        }
    }

    let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut create.constraints)
        .into_iter()
        .partition(|c| matches!(c, Constraint::ForeignKey(_)));
    create.constraints = kept;
    foreign_keys.extend(moved);

    (create, foreign_keys)
}
