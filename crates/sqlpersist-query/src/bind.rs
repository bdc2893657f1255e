//! Binding object queries to the SQL tree.
//!
//! A [`Query`] names a registered type and filters it with a [`QueryExpr`]
//! over property names. [`Binder`] resolves property names through the
//! [`TypeRegistry`] and produces a [`ProjectionExpr`] over
//! `SELECT ... FROM "table" AS "T0"`:
//!
//! - scalar properties become `"T0"."column"`;
//! - reference properties and object constants become
//!   [`SqlExpr::ObjectOperand`]s whose parts are the flattened key columns
//!   (or key values) in key order;
//! - comparisons with null become `IS NULL` / `IS NOT NULL` calls.
//!
//! The result still contains object operands and projections; run it
//! through [`optimize`](crate::optimize::optimize) before formatting.

use crate::ast::{
    Assignment, BinaryOp, DeleteExpr, OrderBy, ProjectionExpr, SelectExpr, SqlExpr, SqlFunction,
    UpdateExpr,
};
use sqlpersist_core::{Error, ObjectHandle, Result, TypeModel, TypeRegistry, Value};
use std::sync::Arc;

/// Alias of the queried table.
pub const ROOT_ALIAS: &str = "T0";

/// Filter expression over the properties of a queried type.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    /// Property of the queried type. `"School.Id"` navigates into the key
    /// of a referenced type without a join.
    Property(String),
    Value(Value),
    /// Re-bindable value slot
    Placeholder { index: usize, value: Value },
    /// An object identified by its flattened key values
    Object { type_name: String, key: Vec<Value> },
    Binary {
        op: BinaryOp,
        left: Box<QueryExpr>,
        right: Box<QueryExpr>,
    },
    Not(Box<QueryExpr>),
    Call {
        function: SqlFunction,
        args: Vec<QueryExpr>,
    },
    List(Vec<QueryExpr>),
}

impl QueryExpr {
    pub fn property(path: impl Into<String>) -> Self {
        QueryExpr::Property(path.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        QueryExpr::Value(value.into())
    }

    pub fn placeholder(index: usize, value: impl Into<Value>) -> Self {
        QueryExpr::Placeholder {
            index,
            value: value.into(),
        }
    }

    pub fn object(type_name: impl Into<String>, key: Vec<Value>) -> Self {
        QueryExpr::Object {
            type_name: type_name.into(),
            key,
        }
    }

    /// The object behind `handle`, by its current key.
    pub fn object_of(handle: &ObjectHandle) -> Self {
        let object = handle.read();
        QueryExpr::Object {
            type_name: object.model().name().to_string(),
            key: object.key_values(),
        }
    }

    pub fn binary(op: BinaryOp, left: QueryExpr, right: QueryExpr) -> Self {
        QueryExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(self, other: QueryExpr) -> Self {
        Self::binary(BinaryOp::Eq, self, other)
    }

    pub fn ne(self, other: QueryExpr) -> Self {
        Self::binary(BinaryOp::NotEqual, self, other)
    }

    pub fn lt(self, other: QueryExpr) -> Self {
        Self::binary(BinaryOp::Lt, self, other)
    }

    pub fn gt(self, other: QueryExpr) -> Self {
        Self::binary(BinaryOp::Gt, self, other)
    }

    pub fn and(self, other: QueryExpr) -> Self {
        Self::binary(BinaryOp::And, self, other)
    }

    pub fn or(self, other: QueryExpr) -> Self {
        Self::binary(BinaryOp::Or, self, other)
    }

    /// Disjunction of `items` as a balanced tree, so nesting grows with the
    /// logarithm of the count. Three items or fewer nest to the left.
    pub fn any(mut items: Vec<QueryExpr>) -> Option<Self> {
        match items.len() {
            0 | 1 => items.pop(),
            n => {
                let right = items.split_off(n.div_ceil(2));
                Some(Self::any(items)?.or(Self::any(right)?))
            }
        }
    }

    /// Nesting depth of binary operators.
    pub fn depth(&self) -> usize {
        match self {
            QueryExpr::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            QueryExpr::Not(inner) => 1 + inner.depth(),
            QueryExpr::Call { args: items, .. } | QueryExpr::List(items) => {
                1 + items.iter().map(Self::depth).max().unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn not(self) -> Self {
        QueryExpr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Self {
        QueryExpr::Call {
            function: SqlFunction::IsNull,
            args: vec![self],
        }
    }

    pub fn starts_with(self, prefix: QueryExpr) -> Self {
        QueryExpr::Call {
            function: SqlFunction::StartsWith,
            args: vec![self, prefix],
        }
    }

    pub fn in_list(self, items: Vec<QueryExpr>) -> Self {
        QueryExpr::Call {
            function: SqlFunction::In,
            args: vec![self, QueryExpr::List(items)],
        }
    }

    fn is_null_value(&self) -> bool {
        match self {
            QueryExpr::Value(v) | QueryExpr::Placeholder { value: v, .. } => v.is_null(),
            _ => false,
        }
    }
}

/// One ORDER BY entry, by property name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOrder {
    pub property: String,
    pub descending: bool,
}

/// A query over one registered type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub type_name: String,
    pub filter: Option<QueryExpr>,
    pub order: Vec<QueryOrder>,
    pub skip: Option<i64>,
    pub take: Option<i64>,
    pub for_update: bool,
}

impl Query {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    /// Add a filter; repeated filters are conjoined.
    pub fn filter(mut self, predicate: QueryExpr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, property: impl Into<String>) -> Self {
        self.order.push(QueryOrder {
            property: property.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, property: impl Into<String>) -> Self {
        self.order.push(QueryOrder {
            property: property.into(),
            descending: true,
        });
        self
    }

    pub fn skip(mut self, n: i64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn take(mut self, n: i64) -> Self {
        self.take = Some(n);
        self
    }

    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }
}

/// Physical table of `model` under `prefix`.
pub fn table_name(model: &TypeModel, prefix: &str) -> String {
    if prefix.is_empty() {
        model.table_name().to_string()
    } else {
        format!("{}{}", prefix, model.table_name())
    }
}

/// Lowers [`Query`]s against a registry.
#[derive(Debug, Clone, Copy)]
pub struct Binder<'r> {
    registry: &'r TypeRegistry,
    table_prefix: &'r str,
}

impl<'r> Binder<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            table_prefix: "",
        }
    }

    pub fn with_table_prefix(mut self, prefix: &'r str) -> Self {
        self.table_prefix = prefix;
        self
    }

    /// Bind `query` to a projection selecting every column of its type.
    #[tracing::instrument(level = "trace", skip(self, query), fields(type_name = %query.type_name))]
    pub fn bind(&self, query: &Query) -> Result<SqlExpr> {
        let model = self.registry.model(&query.type_name)?;
        let columns = model
            .columns()
            .iter()
            .map(|c| SqlExpr::column(Some(ROOT_ALIAS), &*c.name))
            .collect();

        let where_clause = query
            .filter
            .as_ref()
            .map(|f| self.bind_expr(model, f))
            .transpose()?;

        let mut order_by = Vec::new();
        for order in &query.order {
            let parts = match self.resolve_property(model, &order.property)? {
                SqlExpr::ObjectOperand { parts, .. } => parts,
                column => vec![column],
            };
            order_by.extend(parts.into_iter().map(|expr| OrderBy {
                expr,
                descending: order.descending,
            }));
        }

        Ok(SqlExpr::Projection(Box::new(ProjectionExpr {
            select: SelectExpr {
                columns,
                from: Some(SqlExpr::table(
                    table_name(model, self.table_prefix),
                    Some(ROOT_ALIAS),
                )),
                where_clause,
                order_by,
                skip: query.skip.map(SqlExpr::constant),
                take: query.take.map(SqlExpr::constant),
                for_update: query.for_update,
                ..SelectExpr::default()
            },
        })))
    }

    /// `DELETE` over the rows `query` selects.
    pub fn bind_delete(&self, query: &Query) -> Result<SqlExpr> {
        Ok(SqlExpr::Delete(Box::new(DeleteExpr {
            source: self.bind(query)?,
            where_clause: None,
        })))
    }

    /// `UPDATE` of the rows `query` selects. Reference properties take an
    /// object (or null) and assign every flattened key column.
    pub fn bind_update(&self, query: &Query, assignments: &[(&str, QueryExpr)]) -> Result<SqlExpr> {
        let model = self.registry.model(&query.type_name)?;
        let mut bound = Vec::new();
        for (property, value) in assignments {
            let index = model.property_index(property).ok_or_else(|| {
                Error::shape(format!("{} has no property '{}'", model.name(), property))
            })?;
            let columns = &model.columns()[model.properties()[index].columns.clone()];
            let values = match self.bind_expr(model, value)? {
                SqlExpr::ObjectOperand { parts, .. } => parts,
                SqlExpr::Constant(Value::Null) if columns.len() > 1 => {
                    vec![SqlExpr::Constant(Value::Null); columns.len()]
                }
                single => vec![single],
            };
            if values.len() != columns.len() {
                return Err(Error::not_supported(format!(
                    "property '{}.{}' spans {} columns, got {} values",
                    model.name(),
                    property,
                    columns.len(),
                    values.len()
                )));
            }
            bound.extend(columns.iter().zip(values).map(|(c, value)| Assignment {
                column: c.name.to_string(),
                value,
            }));
        }

        Ok(SqlExpr::Update(Box::new(UpdateExpr {
            source: self.bind(query)?,
            assignments: bound,
            where_clause: None,
        })))
    }

    fn bind_expr(&self, model: &Arc<TypeModel>, expr: &QueryExpr) -> Result<SqlExpr> {
        Ok(match expr {
            QueryExpr::Property(path) => self.resolve_property(model, path)?,
            QueryExpr::Value(v) => SqlExpr::Constant(v.clone()),
            QueryExpr::Placeholder { index, value } => SqlExpr::ConstantPlaceholder {
                index: *index,
                value: value.clone(),
            },
            QueryExpr::Object { type_name, key } => {
                let target = self.registry.model(type_name)?;
                if key.len() != target.key_columns().len() {
                    return Err(Error::not_supported(format!(
                        "{} has {} key columns, got {} values",
                        type_name,
                        target.key_columns().len(),
                        key.len()
                    )));
                }
                SqlExpr::ObjectOperand {
                    type_name: type_name.clone(),
                    parts: key.iter().cloned().map(SqlExpr::Constant).collect(),
                }
            }
            QueryExpr::Binary { op, left, right } => {
                if matches!(op, BinaryOp::Eq | BinaryOp::NotEqual) {
                    let function = if *op == BinaryOp::Eq {
                        SqlFunction::IsNull
                    } else {
                        SqlFunction::IsNotNull
                    };
                    if right.is_null_value() {
                        return Ok(SqlExpr::call(function, vec![self.bind_expr(model, left)?]));
                    }
                    if left.is_null_value() {
                        return Ok(SqlExpr::call(function, vec![self.bind_expr(model, right)?]));
                    }
                }
                SqlExpr::binary(
                    *op,
                    self.bind_expr(model, left)?,
                    self.bind_expr(model, right)?,
                )
            }
            QueryExpr::Not(inner) => SqlExpr::not(self.bind_expr(model, inner)?),
            QueryExpr::Call { function, args } => SqlExpr::call(
                *function,
                args.iter()
                    .map(|a| self.bind_expr(model, a))
                    .collect::<Result<_>>()?,
            ),
            QueryExpr::List(items) => SqlExpr::Tuple(
                items
                    .iter()
                    .map(|a| self.bind_expr(model, a))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Resolve a property path to a column or an object operand.
    fn resolve_property(&self, model: &Arc<TypeModel>, path: &str) -> Result<SqlExpr> {
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or_default();
        let index = model.property_index(head).ok_or_else(|| {
            Error::shape(format!("{} has no property '{}'", model.name(), head))
        })?;
        let property = &model.properties()[index];
        let mut columns: Vec<SqlExpr> = model.columns()[property.columns.clone()]
            .iter()
            .map(|c| SqlExpr::column(Some(ROOT_ALIAS), &*c.name))
            .collect();

        let Some(mut target) = property.target.clone() else {
            if segments.next().is_some() {
                return Err(Error::shape(format!(
                    "'{}.{}' is not a reference and cannot be navigated",
                    model.name(),
                    head
                )));
            }
            return columns.pop().ok_or_else(|| {
                Error::shape(format!("property '{}.{}' has no column", model.name(), head))
            });
        };

        // Navigate through key properties only: their values are already
        // present in the flattened reference columns.
        for segment in segments {
            let target_model = self.registry.model(&target)?;
            let (range, next) = key_component(target_model, segment)?;
            columns = columns.drain(range).collect();
            match next {
                Some(next) => target = next,
                None => {
                    return columns.pop().ok_or_else(|| {
                        Error::shape(format!("'{}' resolves to no column", path))
                    });
                }
            }
        }

        Ok(SqlExpr::ObjectOperand {
            type_name: target.to_string(),
            parts: columns,
        })
    }
}

/// Position of key property `name` within `model`'s flattened key, and its
/// target type when it is itself a reference.
fn key_component(
    model: &TypeModel,
    name: &str,
) -> Result<(std::ops::Range<usize>, Option<Arc<str>>)> {
    let mut offset = 0;
    for &index in model.key_properties() {
        let property = &model.properties()[index];
        let width = property.columns.len();
        if property.name() == name {
            return Ok((offset..offset + width, property.target.clone()));
        }
        offset += width;
    }
    Err(Error::not_supported(format!(
        "'{}.{}' is not a key property; navigating to it requires a join",
        model.name(),
        name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::format::{FormatOptions, SqlFormatter};
    use crate::optimize::optimize;
    use sqlpersist_core::{PropertyDescriptor, SqlType, TypeDescriptor};

    fn registry() -> TypeRegistry {
        TypeRegistry::builder()
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
                TypeDescriptor::new("Enrollment")
                    .property(PropertyDescriptor::reference("Student", "Student").primary_key())
                    .property(PropertyDescriptor::scalar("Term", SqlType::Integer).primary_key())
                    .property(PropertyDescriptor::scalar("Grade", SqlType::Text)),
            )
            .register(
                TypeDescriptor::new("Review")
                    .property(PropertyDescriptor::scalar("Id", SqlType::BigInt).primary_key())
                    .property(PropertyDescriptor::reference("Enrollment", "Enrollment")),
            )
            .build()
            .unwrap()
    }

    fn sql(expr: SqlExpr) -> String {
        let expr = optimize(expr).unwrap();
        SqlFormatter::new(&SqliteDialect, FormatOptions::default())
            .format(&expr)
            .unwrap()
            .command_text
    }

    #[test]
    fn test_scalar_filter_and_order() {
        let registry = registry();
        let query = Query::new("Student")
            .filter(QueryExpr::property("Name").eq(QueryExpr::value("Ann")))
            .order_by_desc("Id")
            .take(5);
        let expr = Binder::new(&registry).bind(&query).unwrap();
        assert_eq!(
            sql(expr),
            "SELECT \"T0\".\"Id\", \"T0\".\"Name\", \"T0\".\"SchoolId\" FROM \"Student\" AS \"T0\" \
             WHERE (\"T0\".\"Name\" = ?1) ORDER BY \"T0\".\"Id\" DESC LIMIT 0, ?2"
        );
    }

    #[test]
    fn test_reference_compares_against_object_key() {
        let registry = registry();
        let query = Query::new("Student")
            .filter(QueryExpr::property("School").eq(QueryExpr::object("School", vec![4_i64.into()])));
        let expr = Binder::new(&registry).bind(&query).unwrap();
        let SqlExpr::Projection(projection) = &expr else {
            panic!("expected projection");
        };
        assert_eq!(
            projection.select.where_clause,
            Some(SqlExpr::eq(
                SqlExpr::ObjectOperand {
                    type_name: "School".into(),
                    parts: vec![SqlExpr::column(Some("T0"), "SchoolId")],
                },
                SqlExpr::ObjectOperand {
                    type_name: "School".into(),
                    parts: vec![SqlExpr::constant(4_i64)],
                },
            ))
        );
        assert!(sql(expr).ends_with("WHERE (\"T0\".\"SchoolId\" = ?1)"));
    }

    #[test]
    fn test_composite_reference_expands_in_key_order() {
        let registry = registry();
        let query = Query::new("Review").filter(
            QueryExpr::property("Enrollment")
                .eq(QueryExpr::object("Enrollment", vec![7_i64.into(), 2024_i32.into()])),
        );
        let expr = Binder::new(&registry).bind(&query).unwrap();
        assert!(sql(expr).ends_with(
            "WHERE ((\"T0\".\"EnrollmentStudentId\" = ?1) AND (\"T0\".\"EnrollmentTerm\" = ?2))"
        ));
    }

    #[test]
    fn test_null_comparisons_become_null_checks() {
        let registry = registry();
        let query = Query::new("Student")
            .filter(QueryExpr::property("School").eq(QueryExpr::value(Value::Null)))
            .filter(QueryExpr::value(Value::Null).ne(QueryExpr::property("Name")));
        let expr = Binder::new(&registry).bind(&query).unwrap();
        assert!(sql(expr).ends_with(
            "WHERE ((\"T0\".\"SchoolId\" IS NULL) AND (\"T0\".\"Name\" IS NOT NULL))"
        ));
    }

    #[test]
    fn test_navigation_into_referenced_key() {
        let registry = registry();
        let query = Query::new("Review").filter(
            QueryExpr::property("Enrollment.Term").eq(QueryExpr::value(2024_i32)),
        );
        let expr = Binder::new(&registry).bind(&query).unwrap();
        assert!(sql(expr).ends_with("WHERE (\"T0\".\"EnrollmentTerm\" = ?1)"));

        let student = Query::new("Review").filter(
            QueryExpr::property("Enrollment.Student.Id").eq(QueryExpr::value(1_i64)),
        );
        let expr = Binder::new(&registry).bind(&student).unwrap();
        assert!(sql(expr).ends_with("WHERE (\"T0\".\"EnrollmentStudentId\" = ?1)"));

        let non_key = Query::new("Student")
            .filter(QueryExpr::property("School.Name").eq(QueryExpr::value("x")));
        assert!(matches!(
            Binder::new(&registry).bind(&non_key),
            Err(Error::Capability(_))
        ));
    }

    #[test]
    fn test_delete_binds_and_flattens() {
        let registry = registry();
        let query = Query::new("Student").filter(
            QueryExpr::property("Id")
                .eq(QueryExpr::value(2_i64))
                .or(QueryExpr::property("Id").eq(QueryExpr::value(5_i64))),
        );
        let expr = Binder::new(&registry)
            .with_table_prefix("app_")
            .bind_delete(&query)
            .unwrap();
        assert_eq!(
            sql(expr),
            "DELETE FROM \"app_Student\" WHERE ((\"app_Student\".\"Id\" = ?1) OR (\"app_Student\".\"Id\" = ?2));"
        );
    }

    #[test]
    fn test_any_builds_a_shallow_disjunction() {
        let id = |n: i64| QueryExpr::property("Id").eq(QueryExpr::value(n));
        assert_eq!(QueryExpr::any(Vec::new()), None);
        assert_eq!(QueryExpr::any(vec![id(1)]), Some(id(1)));
        assert_eq!(
            QueryExpr::any(vec![id(1), id(2), id(3)]),
            Some(id(1).or(id(2)).or(id(3)))
        );

        let wide = QueryExpr::any((0..4096).map(id).collect()).unwrap();
        assert_eq!(wide.depth(), 13);

        let registry = registry();
        let expr = Binder::new(&registry)
            .bind_delete(&Query::new("Student").filter(wide))
            .and_then(optimize)
            .unwrap();
        let result = SqlFormatter::new(&SqliteDialect, FormatOptions::default())
            .format(&expr)
            .unwrap();
        assert_eq!(result.parameter_values.len(), 4096);
    }

    #[test]
    fn test_update_assigns_reference_columns() {
        let registry = registry();
        let query = Query::new("Student").filter(QueryExpr::property("Id").eq(QueryExpr::value(3_i64)));
        let expr = Binder::new(&registry)
            .bind_update(
                &query,
                &[
                    ("Name", QueryExpr::value("Bo")),
                    ("School", QueryExpr::object("School", vec![9_i64.into()])),
                ],
            )
            .unwrap();
        assert_eq!(
            sql(expr),
            "UPDATE \"Student\" SET \"Name\" = ?1, \"SchoolId\" = ?2 WHERE (\"Student\".\"Id\" = ?3);"
        );
    }

    #[test]
    fn test_unknown_names_are_errors() {
        let registry = registry();
        assert!(Binder::new(&registry).bind(&Query::new("Nope")).is_err());
        let query = Query::new("Student").filter(QueryExpr::property("Age").eq(QueryExpr::value(1)));
        assert!(matches!(
            Binder::new(&registry).bind(&query),
            Err(Error::Shape(_))
        ));
    }
}
