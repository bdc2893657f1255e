//! Update/delete normalization.

use crate::ast::{Assignment, DeleteExpr, SqlExpr, UpdateExpr};
use crate::visit::{SqlRewriter, walk_delete, walk_update};
use sqlpersist_core::{Error, Result};

/// Flattens updates and deletes built over a projection.
///
/// The binder produces statements whose source is `SELECT * FROM "t" AS "T0"
/// WHERE ...`; the formatter needs `DELETE FROM "t" WHERE ...`. References to
/// the alias are requalified with the physical table name. Statements already
/// over a table pass through unchanged, so the pass is idempotent.
#[derive(Debug, Default)]
pub struct UpdateDeleteNormalizer;

impl UpdateDeleteNormalizer {
    pub fn normalize(expr: SqlExpr) -> Result<SqlExpr> {
        Self.rewrite(expr)
    }
}

/// Replaces a table alias in column qualifiers.
struct AliasReferenceReplacer<'a> {
    alias: Option<&'a str>,
    table: &'a str,
}

impl AliasReferenceReplacer<'_> {
    fn replace(&mut self, expr: SqlExpr) -> Result<SqlExpr> {
        if self.alias.is_none() {
            return Ok(expr);
        }
        self.rewrite(expr)
    }
}

impl SqlRewriter for AliasReferenceReplacer<'_> {
    fn rewrite_column(&mut self, table: Option<String>, name: String) -> Result<SqlExpr> {
        let table = match table {
            Some(t) if Some(t.as_str()) == self.alias => Some(self.table.to_string()),
            other => other,
        };
        Ok(SqlExpr::Column { table, name })
    }
}

enum Source {
    Flat(SqlExpr),
    Projected {
        table: String,
        alias: Option<String>,
        filter: Option<SqlExpr>,
    },
}

fn classify(source: SqlExpr) -> Result<Source> {
    let select = match source {
        SqlExpr::Projection(projection) => projection.select,
        SqlExpr::Select(select) => *select,
        other => return Ok(Source::Flat(other)),
    };
    match select.from {
        Some(SqlExpr::Table { name, alias }) => Ok(Source::Projected {
            table: name,
            alias,
            filter: select.where_clause,
        }),
        _ => Err(Error::shape(
            "update or delete over a projection requires a single table source",
        )),
    }
}

fn conjoin(a: Option<SqlExpr>, b: Option<SqlExpr>) -> Option<SqlExpr> {
    match (a, b) {
        (Some(a), Some(b)) => Some(SqlExpr::and(a, b)),
        (a, b) => a.or(b),
    }
}

impl SqlRewriter for UpdateDeleteNormalizer {
    fn rewrite_update(&mut self, update: UpdateExpr) -> Result<SqlExpr> {
        let update = walk_update(self, update)?;
        let (table, alias, filter) = match classify(update.source)? {
            Source::Flat(source) => {
                return Ok(SqlExpr::Update(Box::new(UpdateExpr {
                    source,
                    assignments: update.assignments,
                    where_clause: update.where_clause,
                })));
            }
            Source::Projected {
                table,
                alias,
                filter,
            } => (table, alias, filter),
        };

        let mut replacer = AliasReferenceReplacer {
            alias: alias.as_deref(),
            table: &table,
        };
        let assignments = update
            .assignments
            .into_iter()
            .map(|a| {
                Ok(Assignment {
                    column: a.column,
                    value: replacer.replace(a.value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let filter = filter.map(|f| replacer.replace(f)).transpose()?;
        let own = update
            .where_clause
            .map(|w| replacer.replace(w))
            .transpose()?;

        Ok(SqlExpr::Update(Box::new(UpdateExpr {
            source: SqlExpr::table(table.clone(), None),
            assignments,
            where_clause: conjoin(filter, own),
        })))
    }

    fn rewrite_delete(&mut self, delete: DeleteExpr) -> Result<SqlExpr> {
        let delete = walk_delete(self, delete)?;
        let (table, alias, filter) = match classify(delete.source)? {
            Source::Flat(source) => {
                return Ok(SqlExpr::Delete(Box::new(DeleteExpr {
                    source,
                    where_clause: delete.where_clause,
                })));
            }
            Source::Projected {
                table,
                alias,
                filter,
            } => (table, alias, filter),
        };

        let mut replacer = AliasReferenceReplacer {
            alias: alias.as_deref(),
            table: &table,
        };
        let filter = filter.map(|f| replacer.replace(f)).transpose()?;
        let own = delete
            .where_clause
            .map(|w| replacer.replace(w))
            .transpose()?;

        Ok(SqlExpr::Delete(Box::new(DeleteExpr {
            source: SqlExpr::table(table.clone(), None),
            where_clause: conjoin(filter, own),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ProjectionExpr, SelectExpr};

    fn projection(table: &str, filter: SqlExpr) -> SqlExpr {
        SqlExpr::Projection(Box::new(ProjectionExpr {
            select: SelectExpr::from(SqlExpr::table(table, Some("T0"))).filter(filter),
        }))
    }

    fn id_eq(qualifier: &str, id: i64) -> SqlExpr {
        SqlExpr::eq(SqlExpr::column(Some(qualifier), "Id"), SqlExpr::constant(id))
    }

    #[test]
    fn test_delete_over_projection_flattens() {
        let expr = SqlExpr::Delete(Box::new(DeleteExpr {
            source: projection("Student", id_eq("T0", 7)),
            where_clause: None,
        }));
        let out = UpdateDeleteNormalizer::normalize(expr).unwrap();
        let expected = SqlExpr::Delete(Box::new(DeleteExpr {
            source: SqlExpr::table("Student", None),
            where_clause: Some(id_eq("Student", 7)),
        }));
        assert_eq!(out, expected);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let expr = SqlExpr::Update(Box::new(UpdateExpr {
            source: projection("Student", id_eq("T0", 7)),
            assignments: vec![Assignment {
                column: "Name".into(),
                value: SqlExpr::column(Some("T0"), "Nickname"),
            }],
            where_clause: None,
        }));
        let once = UpdateDeleteNormalizer::normalize(expr).unwrap();
        let twice = UpdateDeleteNormalizer::normalize(once.clone()).unwrap();
        assert_eq!(once, twice);

        let SqlExpr::Update(update) = once else {
            panic!("expected update");
        };
        assert_eq!(update.source, SqlExpr::table("Student", None));
        assert_eq!(
            update.assignments[0].value,
            SqlExpr::column(Some("Student"), "Nickname")
        );
    }

    #[test]
    fn test_own_predicate_is_conjoined() {
        let expr = SqlExpr::Delete(Box::new(DeleteExpr {
            source: projection("Student", id_eq("T0", 1)),
            where_clause: Some(id_eq("T0", 2)),
        }));
        let SqlExpr::Delete(delete) = UpdateDeleteNormalizer::normalize(expr).unwrap() else {
            panic!("expected delete");
        };
        assert_eq!(
            delete.where_clause,
            Some(SqlExpr::and(id_eq("Student", 1), id_eq("Student", 2)))
        );
    }

    #[test]
    fn test_projection_over_join_is_a_shape_error() {
        let join = SqlExpr::Join {
            kind: crate::ast::JoinKind::Inner,
            left: Box::new(SqlExpr::table("A", Some("T0"))),
            right: Box::new(SqlExpr::table("B", Some("T1"))),
            on: None,
        };
        let expr = SqlExpr::Delete(Box::new(DeleteExpr {
            source: SqlExpr::Projection(Box::new(ProjectionExpr {
                select: SelectExpr::from(join),
            })),
            where_clause: None,
        }));
        assert!(matches!(
            UpdateDeleteNormalizer::normalize(expr),
            Err(Error::Shape(_))
        ));
    }
}
