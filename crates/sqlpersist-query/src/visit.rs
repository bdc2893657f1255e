//! Tree rewriting.
//!
//! [`SqlRewriter`] is a fold over [`SqlExpr`]: `rewrite` dispatches on the
//! node type to a `rewrite_*` hook, and each hook defaults to the matching
//! `walk_*` function, which rewrites the node's children and rebuilds the
//! node around them. Passes override only the hooks they care about.

use crate::ast::{
    AlterTableExpr, Assignment, BinaryOp, ColumnDefinition, Constraint, CreateTableExpr,
    DeleteExpr, InsertExpr, OrderBy, ProjectionExpr, SelectExpr, SqlExpr, SqlFunction,
    UpdateExpr,
};
use sqlpersist_core::Result;

pub trait SqlRewriter {
    fn rewrite(&mut self, expr: SqlExpr) -> Result<SqlExpr> {
        match expr {
            SqlExpr::Column { table, name } => self.rewrite_column(table, name),
            SqlExpr::Binary { op, left, right } => self.rewrite_binary(op, *left, *right),
            SqlExpr::Function { function, args } => self.rewrite_function(function, args),
            SqlExpr::Select(select) => Ok(SqlExpr::Select(Box::new(self.rewrite_select(*select)?))),
            SqlExpr::Update(update) => self.rewrite_update(*update),
            SqlExpr::Delete(delete) => self.rewrite_delete(*delete),
            SqlExpr::CreateTable(create) => self.rewrite_create_table(*create),
            SqlExpr::StatementList(statements) => self.rewrite_statement_list(statements),
            other => walk_children(self, other),
        }
    }

    fn rewrite_column(&mut self, table: Option<String>, name: String) -> Result<SqlExpr> {
        Ok(SqlExpr::Column { table, name })
    }

    fn rewrite_binary(&mut self, op: BinaryOp, left: SqlExpr, right: SqlExpr) -> Result<SqlExpr> {
        walk_binary(self, op, left, right)
    }

    fn rewrite_function(&mut self, function: SqlFunction, args: Vec<SqlExpr>) -> Result<SqlExpr> {
        walk_function(self, function, args)
    }

    fn rewrite_select(&mut self, select: SelectExpr) -> Result<SelectExpr> {
        walk_select(self, select)
    }

    fn rewrite_update(&mut self, update: UpdateExpr) -> Result<SqlExpr> {
        Ok(SqlExpr::Update(Box::new(walk_update(self, update)?)))
    }

    fn rewrite_delete(&mut self, delete: DeleteExpr) -> Result<SqlExpr> {
        Ok(SqlExpr::Delete(Box::new(walk_delete(self, delete)?)))
    }

    fn rewrite_create_table(&mut self, create: CreateTableExpr) -> Result<SqlExpr> {
        Ok(SqlExpr::CreateTable(Box::new(walk_create_table(self, create)?)))
    }

    fn rewrite_statement_list(&mut self, statements: Vec<SqlExpr>) -> Result<SqlExpr> {
        Ok(SqlExpr::StatementList(rewrite_all(self, statements)?))
    }
}

fn rewrite_all<R: SqlRewriter + ?Sized>(r: &mut R, items: Vec<SqlExpr>) -> Result<Vec<SqlExpr>> {
    items.into_iter().map(|item| r.rewrite(item)).collect()
}

fn rewrite_boxed<R: SqlRewriter + ?Sized>(r: &mut R, item: Box<SqlExpr>) -> Result<Box<SqlExpr>> {
    Ok(Box::new(r.rewrite(*item)?))
}

fn rewrite_option<R: SqlRewriter + ?Sized>(
    r: &mut R,
    item: Option<SqlExpr>,
) -> Result<Option<SqlExpr>> {
    item.map(|e| r.rewrite(e)).transpose()
}

pub fn walk_binary<R: SqlRewriter + ?Sized>(
    r: &mut R,
    op: BinaryOp,
    left: SqlExpr,
    right: SqlExpr,
) -> Result<SqlExpr> {
    let left = r.rewrite(left)?;
    let right = r.rewrite(right)?;
    Ok(SqlExpr::binary(op, left, right))
}

pub fn walk_function<R: SqlRewriter + ?Sized>(
    r: &mut R,
    function: SqlFunction,
    args: Vec<SqlExpr>,
) -> Result<SqlExpr> {
    Ok(SqlExpr::Function {
        function,
        args: rewrite_all(r, args)?,
    })
}

pub fn walk_select<R: SqlRewriter + ?Sized>(r: &mut R, select: SelectExpr) -> Result<SelectExpr> {
    let order_by = select
        .order_by
        .into_iter()
        .map(|o| {
            Ok(OrderBy {
                expr: r.rewrite(o.expr)?,
                descending: o.descending,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SelectExpr {
        distinct: select.distinct,
        columns: rewrite_all(r, select.columns)?,
        from: rewrite_option(r, select.from)?,
        where_clause: rewrite_option(r, select.where_clause)?,
        group_by: rewrite_all(r, select.group_by)?,
        order_by,
        skip: rewrite_option(r, select.skip)?,
        take: rewrite_option(r, select.take)?,
        for_update: select.for_update,
    })
}

pub fn walk_update<R: SqlRewriter + ?Sized>(r: &mut R, update: UpdateExpr) -> Result<UpdateExpr> {
    let assignments = update
        .assignments
        .into_iter()
        .map(|a| {
            Ok(Assignment {
                column: a.column,
                value: r.rewrite(a.value)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(UpdateExpr {
        source: r.rewrite(update.source)?,
        assignments,
        where_clause: rewrite_option(r, update.where_clause)?,
    })
}

pub fn walk_delete<R: SqlRewriter + ?Sized>(r: &mut R, delete: DeleteExpr) -> Result<DeleteExpr> {
    Ok(DeleteExpr {
        source: r.rewrite(delete.source)?,
        where_clause: rewrite_option(r, delete.where_clause)?,
    })
}

fn walk_constraint<R: SqlRewriter + ?Sized>(r: &mut R, constraint: Constraint) -> Result<Constraint> {
    Ok(match constraint {
        Constraint::Default(expr) => Constraint::Default(r.rewrite(expr)?),
        other => other,
    })
}

fn walk_constraints<R: SqlRewriter + ?Sized>(
    r: &mut R,
    constraints: Vec<Constraint>,
) -> Result<Vec<Constraint>> {
    constraints
        .into_iter()
        .map(|c| walk_constraint(r, c))
        .collect()
}

pub fn walk_create_table<R: SqlRewriter + ?Sized>(
    r: &mut R,
    create: CreateTableExpr,
) -> Result<CreateTableExpr> {
    let columns = create
        .columns
        .into_iter()
        .map(|c| {
            Ok(ColumnDefinition {
                name: c.name,
                sql_type: c.sql_type,
                constraints: walk_constraints(r, c.constraints)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CreateTableExpr {
        table: create.table,
        if_not_exists: create.if_not_exists,
        columns,
        constraints: walk_constraints(r, create.constraints)?,
    })
}

/// Rebuild `expr` around rewritten children, without dispatching to hooks
/// for `expr` itself.
pub fn walk_children<R: SqlRewriter + ?Sized>(r: &mut R, expr: SqlExpr) -> Result<SqlExpr> {
    Ok(match expr {
        SqlExpr::Column { .. }
        | SqlExpr::Constant(_)
        | SqlExpr::ConstantPlaceholder { .. }
        | SqlExpr::Table { .. }
        | SqlExpr::CreateIndex(_)
        | SqlExpr::Pragma(_) => expr,
        SqlExpr::Binary { op, left, right } => walk_binary(r, op, *left, *right)?,
        SqlExpr::Unary { op, operand } => SqlExpr::Unary {
            op,
            operand: rewrite_boxed(r, operand)?,
        },
        SqlExpr::Function { function, args } => walk_function(r, function, args)?,
        SqlExpr::Tuple(items) => SqlExpr::Tuple(rewrite_all(r, items)?),
        SqlExpr::ObjectOperand { type_name, parts } => SqlExpr::ObjectOperand {
            type_name,
            parts: rewrite_all(r, parts)?,
        },
        SqlExpr::Join {
            kind,
            left,
            right,
            on,
        } => SqlExpr::Join {
            kind,
            left: rewrite_boxed(r, left)?,
            right: rewrite_boxed(r, right)?,
            on: on.map(|e| rewrite_boxed(r, e)).transpose()?,
        },
        SqlExpr::Select(select) => SqlExpr::Select(Box::new(r.rewrite_select(*select)?)),
        SqlExpr::Projection(projection) => SqlExpr::Projection(Box::new(ProjectionExpr {
            select: r.rewrite_select(projection.select)?,
        })),
        SqlExpr::Insert(insert) => SqlExpr::Insert(Box::new(InsertExpr {
            values: rewrite_all(r, insert.values)?,
            ..*insert
        })),
        SqlExpr::Update(update) => SqlExpr::Update(Box::new(walk_update(r, *update)?)),
        SqlExpr::Delete(delete) => SqlExpr::Delete(Box::new(walk_delete(r, *delete)?)),
        SqlExpr::CreateTable(create) => {
            SqlExpr::CreateTable(Box::new(walk_create_table(r, *create)?))
        }
        SqlExpr::AlterTable(alter) => SqlExpr::AlterTable(Box::new(AlterTableExpr {
            table: alter.table,
            add_constraints: walk_constraints(r, alter.add_constraints)?,
        })),
        SqlExpr::StatementList(statements) => SqlExpr::StatementList(rewrite_all(r, statements)?),
        SqlExpr::SetCommand {
            name,
            target,
            value,
        } => SqlExpr::SetCommand {
            name,
            target: target.map(|t| rewrite_boxed(r, t)).transpose()?,
            value,
        },
    })
}

/// Collect every node of `expr` for which `predicate` holds, in pre-order.
pub fn find_all<'a>(expr: &'a SqlExpr, predicate: &dyn Fn(&SqlExpr) -> bool) -> Vec<&'a SqlExpr> {
    fn visit<'a>(
        expr: &'a SqlExpr,
        predicate: &dyn Fn(&SqlExpr) -> bool,
        found: &mut Vec<&'a SqlExpr>,
    ) {
        if predicate(expr) {
            found.push(expr);
        }
        let mut each = |e: &'a SqlExpr| visit(e, predicate, found);
        match expr {
            SqlExpr::Binary { left, right, .. } => {
                each(left.as_ref());
                each(right.as_ref());
            }
            SqlExpr::Unary { operand, .. } => each(operand.as_ref()),
            SqlExpr::Function { args: items, .. }
            | SqlExpr::Tuple(items)
            | SqlExpr::ObjectOperand { parts: items, .. }
            | SqlExpr::StatementList(items) => items.iter().for_each(each),
            SqlExpr::Join {
                left, right, on, ..
            } => {
                each(left.as_ref());
                each(right.as_ref());
                if let Some(on) = on.as_deref() {
                    each(on);
                }
            }
            SqlExpr::Select(select) => visit_select(select, predicate, found),
            SqlExpr::Projection(projection) => visit_select(&projection.select, predicate, found),
            SqlExpr::Insert(insert) => insert.values.iter().for_each(each),
            SqlExpr::Update(update) => {
                each(&update.source);
                update.assignments.iter().for_each(|a| each(&a.value));
                if let Some(w) = &update.where_clause {
                    each(w);
                }
            }
            SqlExpr::Delete(delete) => {
                each(&delete.source);
                if let Some(w) = &delete.where_clause {
                    each(w);
                }
            }
            SqlExpr::SetCommand {
                target: Some(target),
                ..
            } => each(target.as_ref()),
            _ => {}
        }
    }

    fn visit_select<'a>(
        select: &'a SelectExpr,
        predicate: &dyn Fn(&SqlExpr) -> bool,
        found: &mut Vec<&'a SqlExpr>,
    ) {
        let parts = select
            .columns
            .iter()
            .chain(select.from.iter())
            .chain(select.where_clause.iter())
            .chain(select.group_by.iter())
            .chain(select.order_by.iter().map(|o| &o.expr))
            .chain(select.skip.iter())
            .chain(select.take.iter());
        for part in parts {
            visit(part, predicate, found);
        }
    }

    let mut found = Vec::new();
    visit(expr, predicate, &mut found);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SqlNodeType;

    /// Renames every column qualifier.
    struct Requalify(&'static str);

    impl SqlRewriter for Requalify {
        fn rewrite_column(&mut self, _table: Option<String>, name: String) -> Result<SqlExpr> {
            Ok(SqlExpr::Column {
                table: Some(self.0.to_string()),
                name,
            })
        }
    }

    #[test]
    fn test_default_walk_reaches_nested_columns() {
        let expr = SqlExpr::Select(Box::new(
            SelectExpr::from(SqlExpr::table("Student", Some("T0"))).filter(SqlExpr::and(
                SqlExpr::eq(SqlExpr::column(Some("T0"), "Id"), SqlExpr::constant(1)),
                SqlExpr::not(SqlExpr::call(
                    SqlFunction::IsNull,
                    vec![SqlExpr::column(Some("T0"), "Name")],
                )),
            )),
        ));

        let rewritten = Requalify("Student").rewrite(expr).unwrap();
        let columns = find_all(&rewritten, &|e| e.node_type() == SqlNodeType::Column);
        assert_eq!(columns.len(), 2);
        for column in columns {
            assert!(matches!(column, SqlExpr::Column { table: Some(t), .. } if t == "Student"));
        }
    }

    #[test]
    fn test_identity_rewrite_preserves_tree() {
        struct Identity;
        impl SqlRewriter for Identity {}

        let expr = SqlExpr::Delete(Box::new(DeleteExpr {
            source: SqlExpr::table("School", None),
            where_clause: Some(SqlExpr::eq(
                SqlExpr::column(None, "Id"),
                SqlExpr::placeholder(0, 5_i64),
            )),
        }));
        assert_eq!(Identity.rewrite(expr.clone()).unwrap(), expr);
    }
}
