//! SQL abstract syntax tree.
//!
//! [`SqlExpr`] is a closed set of nodes describing queries, writes and DDL
//! independently of any dialect. Nodes are plain values: rewriting produces
//! new trees through [`SqlRewriter`](crate::visit::SqlRewriter), and
//! structural equality is `PartialEq`.

use sqlpersist_core::{ReferentialAction, SqlType, Value};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    NotEqual,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEqual => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }

    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEqual
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// Built-in functions the formatter knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFunction {
    IsNull,
    IsNotNull,
    Like,
    NotLike,
    StartsWith,
    EndsWith,
    Contains,
    Concat,
    Coalesce,
    Lower,
    Upper,
    Trim,
    Length,
    In,
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl SqlFunction {
    /// Name used when rendered as a plain call.
    pub const fn name(self) -> &'static str {
        match self {
            SqlFunction::IsNull => "ISNULL",
            SqlFunction::IsNotNull => "ISNOTNULL",
            SqlFunction::Like => "LIKE",
            SqlFunction::NotLike => "NOTLIKE",
            SqlFunction::StartsWith => "STARTSWITH",
            SqlFunction::EndsWith => "ENDSWITH",
            SqlFunction::Contains => "CONTAINS",
            SqlFunction::Concat => "CONCAT",
            SqlFunction::Coalesce => "COALESCE",
            SqlFunction::Lower => "LOWER",
            SqlFunction::Upper => "UPPER",
            SqlFunction::Trim => "TRIM",
            SqlFunction::Length => "LENGTH",
            SqlFunction::In => "IN",
            SqlFunction::Count => "COUNT",
            SqlFunction::Sum => "SUM",
            SqlFunction::Min => "MIN",
            SqlFunction::Max => "MAX",
            SqlFunction::Avg => "AVG",
        }
    }

    pub const fn is_aggregate(self) -> bool {
        matches!(
            self,
            SqlFunction::Count
                | SqlFunction::Sum
                | SqlFunction::Min
                | SqlFunction::Max
                | SqlFunction::Avg
        )
    }
}

/// Join kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
}

impl JoinKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Cross => "CROSS JOIN",
        }
    }
}

/// Static tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNodeType {
    Column,
    Constant,
    ConstantPlaceholder,
    Binary,
    Unary,
    Function,
    Tuple,
    ObjectOperand,
    Table,
    Join,
    Select,
    Projection,
    Insert,
    Update,
    Delete,
    CreateTable,
    CreateIndex,
    AlterTable,
    StatementList,
    Pragma,
    SetCommand,
}

/// ORDER BY item.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: SqlExpr,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(expr: SqlExpr) -> Self {
        Self {
            expr,
            descending: false,
        }
    }

    pub fn desc(expr: SqlExpr) -> Self {
        Self {
            expr,
            descending: true,
        }
    }
}

/// `SELECT` statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectExpr {
    pub distinct: bool,
    /// Empty means `*`
    pub columns: Vec<SqlExpr>,
    pub from: Option<SqlExpr>,
    pub where_clause: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderBy>,
    pub skip: Option<SqlExpr>,
    pub take: Option<SqlExpr>,
    pub for_update: bool,
}

impl SelectExpr {
    /// `SELECT * FROM source`.
    pub fn from(source: SqlExpr) -> Self {
        Self {
            from: Some(source),
            ..Self::default()
        }
    }

    pub fn filter(mut self, predicate: SqlExpr) -> Self {
        self.where_clause = Some(predicate);
        self
    }
}

/// Result-shaping wrapper around a select.
///
/// Updates and deletes built from queries start out over a projection and
/// are flattened by the normalizer before formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionExpr {
    pub select: SelectExpr,
}

/// `INSERT INTO` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertExpr {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<SqlExpr>,
    /// Columns read back after the insert
    pub returning: Vec<String>,
    /// Explicit values for server-generated key columns
    pub requires_identity_insert: bool,
}

/// `column = value` in an UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: SqlExpr,
}

/// `UPDATE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpr {
    /// A table, or a projection before normalization
    pub source: SqlExpr,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<SqlExpr>,
}

/// `DELETE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteExpr {
    /// A table, or a projection before normalization
    pub source: SqlExpr,
    pub where_clause: Option<SqlExpr>,
}

/// `FOREIGN KEY ... REFERENCES ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyConstraint {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    /// `DEFERRABLE INITIALLY DEFERRED` where supported
    pub deferrable: bool,
}

/// Column or table constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    NotNull,
    AutoIncrement,
    Default(SqlExpr),
    /// Empty `columns` means a column-level constraint
    PrimaryKey {
        name: Option<String>,
        columns: Vec<String>,
    },
    Unique {
        name: Option<String>,
        columns: Vec<String>,
    },
    ForeignKey(ForeignKeyConstraint),
}

/// One column in a CREATE TABLE.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub sql_type: SqlType,
    pub constraints: Vec<Constraint>,
}

/// `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableExpr {
    pub table: String,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDefinition>,
    pub constraints: Vec<Constraint>,
}

/// One column of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedColumn {
    pub column: String,
    /// `None` leaves the order unspecified
    pub descending: Option<bool>,
}

/// `CREATE INDEX` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexExpr {
    pub name: String,
    pub table: String,
    pub unique: bool,
    pub if_not_exists: bool,
    pub columns: Vec<IndexedColumn>,
}

/// `ALTER TABLE ... ADD CONSTRAINT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct AlterTableExpr {
    pub table: String,
    pub add_constraints: Vec<Constraint>,
}

/// A node of the SQL tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    /// Column reference with optional table qualifier
    Column { table: Option<String>, name: String },
    /// Literal value, bound as a parameter
    Constant(Value),
    /// Re-bindable parameter slot; `index` names the slot, `value` is its
    /// value when the tree was built
    ConstantPlaceholder { index: usize, value: Value },
    Binary {
        op: BinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Unary { op: UnaryOp, operand: Box<SqlExpr> },
    Function {
        function: SqlFunction,
        args: Vec<SqlExpr>,
    },
    Tuple(Vec<SqlExpr>),
    /// An object-typed operand: one part per flattened key column
    ObjectOperand { type_name: String, parts: Vec<SqlExpr> },
    Table { name: String, alias: Option<String> },
    Join {
        kind: JoinKind,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
        on: Option<Box<SqlExpr>>,
    },
    Select(Box<SelectExpr>),
    Projection(Box<ProjectionExpr>),
    Insert(Box<InsertExpr>),
    Update(Box<UpdateExpr>),
    Delete(Box<DeleteExpr>),
    CreateTable(Box<CreateTableExpr>),
    CreateIndex(Box<CreateIndexExpr>),
    AlterTable(Box<AlterTableExpr>),
    StatementList(Vec<SqlExpr>),
    /// `PRAGMA directive;`
    Pragma(String),
    /// `SET name [target] value;`
    SetCommand {
        name: String,
        target: Option<Box<SqlExpr>>,
        value: String,
    },
}

impl SqlExpr {
    /// Static tag of this node.
    pub const fn node_type(&self) -> SqlNodeType {
        match self {
            SqlExpr::Column { .. } => SqlNodeType::Column,
            SqlExpr::Constant(_) => SqlNodeType::Constant,
            SqlExpr::ConstantPlaceholder { .. } => SqlNodeType::ConstantPlaceholder,
            SqlExpr::Binary { .. } => SqlNodeType::Binary,
            SqlExpr::Unary { .. } => SqlNodeType::Unary,
            SqlExpr::Function { .. } => SqlNodeType::Function,
            SqlExpr::Tuple(_) => SqlNodeType::Tuple,
            SqlExpr::ObjectOperand { .. } => SqlNodeType::ObjectOperand,
            SqlExpr::Table { .. } => SqlNodeType::Table,
            SqlExpr::Join { .. } => SqlNodeType::Join,
            SqlExpr::Select(_) => SqlNodeType::Select,
            SqlExpr::Projection(_) => SqlNodeType::Projection,
            SqlExpr::Insert(_) => SqlNodeType::Insert,
            SqlExpr::Update(_) => SqlNodeType::Update,
            SqlExpr::Delete(_) => SqlNodeType::Delete,
            SqlExpr::CreateTable(_) => SqlNodeType::CreateTable,
            SqlExpr::CreateIndex(_) => SqlNodeType::CreateIndex,
            SqlExpr::AlterTable(_) => SqlNodeType::AlterTable,
            SqlExpr::StatementList(_) => SqlNodeType::StatementList,
            SqlExpr::Pragma(_) => SqlNodeType::Pragma,
            SqlExpr::SetCommand { .. } => SqlNodeType::SetCommand,
        }
    }

    // ==================== Constructors ====================

    pub fn column(table: Option<&str>, name: impl Into<String>) -> Self {
        SqlExpr::Column {
            table: table.map(str::to_string),
            name: name.into(),
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        SqlExpr::Constant(value.into())
    }

    pub fn placeholder(index: usize, value: impl Into<Value>) -> Self {
        SqlExpr::ConstantPlaceholder {
            index,
            value: value.into(),
        }
    }

    pub fn table(name: impl Into<String>, alias: Option<&str>) -> Self {
        SqlExpr::Table {
            name: name.into(),
            alias: alias.map(str::to_string),
        }
    }

    pub fn binary(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    pub fn and(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(BinaryOp::Or, left, right)
    }

    pub fn not(operand: SqlExpr) -> Self {
        SqlExpr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    pub fn call(function: SqlFunction, args: Vec<SqlExpr>) -> Self {
        SqlExpr::Function { function, args }
    }

    /// Join `items` left to right with `op`; `None` when empty.
    pub fn fold(op: BinaryOp, items: impl IntoIterator<Item = SqlExpr>) -> Option<Self> {
        items
            .into_iter()
            .reduce(|acc, item| Self::binary(op, acc, item))
    }

    pub fn is_constant_like(&self) -> bool {
        matches!(
            self,
            SqlExpr::Constant(_) | SqlExpr::ConstantPlaceholder { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_types() {
        assert_eq!(
            SqlExpr::column(Some("T0"), "Id").node_type(),
            SqlNodeType::Column
        );
        assert_eq!(
            SqlExpr::Pragma("foreign_keys = OFF".into()).node_type(),
            SqlNodeType::Pragma
        );
        assert_eq!(
            SqlExpr::Select(Box::new(SelectExpr::default())).node_type(),
            SqlNodeType::Select
        );
    }

    #[test]
    fn test_structural_equality() {
        let a = SqlExpr::eq(SqlExpr::column(None, "Id"), SqlExpr::constant(1_i64));
        let b = SqlExpr::eq(SqlExpr::column(None, "Id"), SqlExpr::constant(1_i64));
        let c = SqlExpr::eq(SqlExpr::column(None, "Id"), SqlExpr::constant(2_i64));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fold_is_left_associative() {
        let folded = SqlExpr::fold(
            BinaryOp::Or,
            vec![
                SqlExpr::constant(1),
                SqlExpr::constant(2),
                SqlExpr::constant(3),
            ],
        )
        .unwrap();
        let expected = SqlExpr::or(
            SqlExpr::or(SqlExpr::constant(1), SqlExpr::constant(2)),
            SqlExpr::constant(3),
        );
        assert_eq!(folded, expected);
        assert!(SqlExpr::fold(BinaryOp::And, Vec::new()).is_none());
    }
}
