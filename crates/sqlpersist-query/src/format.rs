//! SQL text generation.
//!
//! [`SqlFormatter`] renders a [`SqlExpr`] for one dialect into command text
//! plus the values to bind. Constants become parameters; constant
//! placeholders become parameters that remember their slot, so a cached
//! [`FormatResult`] can be re-bound with new values via
//! [`FormatResult::rebind`].

use crate::ast::{
    AlterTableExpr, BinaryOp, ColumnDefinition, Constraint, CreateIndexExpr, CreateTableExpr,
    DeleteExpr, ForeignKeyConstraint, InsertExpr, SelectExpr, SqlExpr, SqlFunction, UnaryOp,
    UpdateExpr,
};
use crate::dialect::{LimitStyle, SqlCapability, SqlDialect, SyntaxSymbol};
use crate::optimize::ForeignKeyConstraintAmender;
use crate::query_text::literal;
use serde::{Deserialize, Serialize};
use sqlpersist_core::{Error, ReferentialAction, Result, Value};
use std::collections::HashMap;

/// Formatter switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    /// Bind constant placeholders as parameters; otherwise write `$$n`
    pub evaluate_constant_placeholders: bool,
    /// Write null constants inline instead of binding them
    pub optimize_out_null_literals: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            evaluate_constant_placeholders: true,
            optimize_out_null_literals: false,
        }
    }
}

impl FormatOptions {
    pub fn evaluate_constant_placeholders(mut self, value: bool) -> Self {
        self.evaluate_constant_placeholders = value;
        self
    }

    pub fn optimize_out_null_literals(mut self, value: bool) -> Self {
        self.optimize_out_null_literals = value;
        self
    }
}

/// A bound value and the location of its marker in the command text.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedValue {
    pub offset: usize,
    pub length: usize,
    pub value: Value,
}

/// Output of the formatter.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatResult {
    pub command_text: String,
    /// Parameters in text order
    pub parameter_values: Vec<LocatedValue>,
    /// Placeholder slot each parameter came from, if any
    pub parameter_to_placeholder: Vec<Option<usize>>,
    /// First parameter bound for each placeholder slot
    pub placeholder_to_parameter: HashMap<usize, usize>,
    /// False when the text embeds values that cannot be re-bound, or has no
    /// placeholder to re-bind at all
    pub cacheable: bool,
}

impl FormatResult {
    /// Parameter values as formatted.
    pub fn params(&self) -> Vec<Value> {
        self.parameter_values.iter().map(|p| p.value.clone()).collect()
    }

    /// Parameter values with every placeholder-backed parameter taken from
    /// `values`, indexed by placeholder slot.
    pub fn rebind(&self, values: &[Value]) -> Result<Vec<Value>> {
        self.parameter_values
            .iter()
            .zip(&self.parameter_to_placeholder)
            .map(|(located, placeholder)| match placeholder {
                Some(slot) => values.get(*slot).cloned().ok_or_else(|| {
                    Error::shape(format!(
                        "placeholder {} has no value ({} supplied)",
                        slot,
                        values.len()
                    ))
                }),
                None => Ok(located.value.clone()),
            })
            .collect()
    }
}

/// Renders SQL trees for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlFormatter<'d> {
    dialect: &'d dyn SqlDialect,
    options: FormatOptions,
}

impl<'d> SqlFormatter<'d> {
    pub fn new(dialect: &'d dyn SqlDialect, options: FormatOptions) -> Self {
        Self { dialect, options }
    }

    pub fn dialect(&self) -> &'d dyn SqlDialect {
        self.dialect
    }

    pub fn options(&self) -> FormatOptions {
        self.options
    }

    /// Format `expr`.
    ///
    /// Object operands must have been expanded (see
    /// [`optimize`](crate::optimize::optimize)); updates and deletes must be
    /// over a table. Foreign keys are moved into `ALTER TABLE` statements
    /// when the dialect supports it.
    #[tracing::instrument(level = "trace", skip_all, fields(dialect = self.dialect.name()))]
    pub fn format(&self, expr: &SqlExpr) -> Result<FormatResult> {
        let amended;
        let expr = if matches!(expr, SqlExpr::StatementList(_) | SqlExpr::CreateTable(_))
            && self
                .dialect
                .supports_capability(SqlCapability::AlterTableAddConstraints)
        {
            amended = ForeignKeyConstraintAmender::amend(expr.clone(), self.dialect);
            &amended
        } else {
            expr
        };

        let mut writer = Writer {
            dialect: self.dialect,
            options: self.options,
            text: String::with_capacity(128),
            parameters: Vec::new(),
            parameter_to_placeholder: Vec::new(),
            placeholder_to_parameter: HashMap::new(),
            cacheable: true,
        };
        writer.statement(expr)?;
        // Nothing to re-bind
        if writer.placeholder_to_parameter.is_empty() {
            writer.cacheable = false;
        }

        tracing::trace!(
            sql = %writer.text,
            params = writer.parameters.len(),
            cacheable = writer.cacheable,
            "Formatted statement"
        );

        Ok(FormatResult {
            command_text: writer.text,
            parameter_values: writer.parameters,
            parameter_to_placeholder: writer.parameter_to_placeholder,
            placeholder_to_parameter: writer.placeholder_to_parameter,
            cacheable: writer.cacheable,
        })
    }
}

struct Writer<'d> {
    dialect: &'d dyn SqlDialect,
    options: FormatOptions,
    text: String,
    parameters: Vec<LocatedValue>,
    parameter_to_placeholder: Vec<Option<usize>>,
    placeholder_to_parameter: HashMap<usize, usize>,
    cacheable: bool,
}

fn expect_args(function: SqlFunction, args: &[SqlExpr], count: usize) -> Result<&[SqlExpr]> {
    if args.len() == count {
        Ok(args)
    } else {
        Err(Error::shape(format!(
            "{} takes {} argument(s), got {}",
            function.name(),
            count,
            args.len()
        )))
    }
}

const fn action_capability(action: ReferentialAction) -> Option<SqlCapability> {
    match action {
        ReferentialAction::Cascade => Some(SqlCapability::CascadeAction),
        ReferentialAction::SetNull => Some(SqlCapability::SetNullAction),
        ReferentialAction::SetDefault => Some(SqlCapability::SetDefaultAction),
        ReferentialAction::NoAction | ReferentialAction::Restrict => None,
    }
}

impl Writer<'_> {
    fn push(&mut self, s: &str) {
        self.text.push_str(s);
    }

    fn quote(&mut self, name: &str) {
        let quoted = self.dialect.quote_identifier(name);
        self.text.push_str(&quoted);
    }

    fn symbol(&mut self, symbol: SyntaxSymbol) {
        self.text.push_str(self.dialect.syntax_symbol(symbol));
    }

    fn supports(&self, capability: SqlCapability) -> bool {
        self.dialect.supports_capability(capability)
    }

    fn require(&self, capability: SqlCapability, what: &str) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(Error::capability(
                capability.name(),
                format!("{} is not supported by the {} dialect", what, self.dialect.name()),
            ))
        }
    }

    fn quoted_list(&mut self, names: &[String]) {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.quote(name);
        }
    }

    fn expr_list(&mut self, items: &[SqlExpr]) -> Result<()> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(item)?;
        }
        Ok(())
    }

    // ==================== Values ====================

    fn parameter(&mut self, value: Value, placeholder: Option<usize>) {
        let index = self.parameters.len();
        let marker = self.dialect.parameter_marker(index);
        self.parameters.push(LocatedValue {
            offset: self.text.len(),
            length: marker.len(),
            value,
        });
        self.text.push_str(&marker);
        self.parameter_to_placeholder.push(placeholder);
        if let Some(slot) = placeholder {
            self.placeholder_to_parameter.entry(slot).or_insert(index);
        }
    }

    fn constant(&mut self, value: &Value) {
        self.cacheable = false;
        match value {
            Value::Bool(b) if self.supports(SqlCapability::InlineBooleans) => {
                self.symbol(if *b { SyntaxSymbol::True } else { SyntaxSymbol::False });
            }
            Value::Null if self.options.optimize_out_null_literals => {
                self.symbol(SyntaxSymbol::Null);
            }
            other => self.parameter(other.clone(), None),
        }
    }

    fn placeholder(&mut self, index: usize, value: &Value) {
        if !self.options.evaluate_constant_placeholders {
            // Slots written as text bind nothing, so the result is not a template
            self.cacheable = false;
            self.push(&format!("$${index}"));
        } else if value.is_null() && self.options.optimize_out_null_literals {
            self.cacheable = false;
            self.symbol(SyntaxSymbol::Null);
        } else {
            self.parameter(value.clone(), Some(index));
        }
    }

    /// `needle` wrapped in `%` wildcards written as literal text, so a
    /// placeholder needle keeps the template re-bindable.
    fn wildcard_pattern(&mut self, needle: &SqlExpr, leading: bool, trailing: bool) -> Result<()> {
        let wildcard = literal(self.dialect, &Value::Text("%".to_string()));
        let function = self.supports(SqlCapability::ConcatFunction);
        let separator = if function {
            ", ".to_string()
        } else {
            format!(" {} ", self.dialect.syntax_symbol(SyntaxSymbol::ConcatOperator))
        };
        self.push(if function { "CONCAT(" } else { "(" });
        if leading {
            self.push(&wildcard);
            self.push(&separator);
        }
        self.expr(needle)?;
        if trailing {
            self.push(&separator);
            self.push(&wildcard);
        }
        self.push(")");
        Ok(())
    }

    // ==================== Expressions ====================

    fn expr(&mut self, expr: &SqlExpr) -> Result<()> {
        match expr {
            SqlExpr::Column { table, name } => {
                if let Some(table) = table {
                    self.quote(table);
                    self.push(".");
                }
                self.quote(name);
            }
            SqlExpr::Constant(value) => self.constant(value),
            SqlExpr::ConstantPlaceholder { index, value } => self.placeholder(*index, value),
            SqlExpr::Binary { op, left, right } => self.binary(*op, left, right)?,
            SqlExpr::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    self.push("NOT (");
                    self.expr(operand)?;
                    self.push(")");
                }
                UnaryOp::Negate => {
                    self.push("(-(");
                    self.expr(operand)?;
                    self.push("))");
                }
            },
            SqlExpr::Function { function, args } => self.function(*function, args)?,
            SqlExpr::Tuple(items) => {
                self.push("(");
                self.expr_list(items)?;
                self.push(")");
            }
            SqlExpr::ObjectOperand { type_name, .. } => {
                return Err(Error::shape(format!(
                    "object operand of type {} must be expanded before formatting",
                    type_name
                )));
            }
            SqlExpr::Table { .. } | SqlExpr::Join { .. } => self.source(expr)?,
            SqlExpr::Select(select) => {
                self.push("(");
                self.select(select)?;
                self.push(")");
            }
            SqlExpr::Projection(projection) => {
                self.push("(");
                self.select(&projection.select)?;
                self.push(")");
            }
            other => {
                return Err(Error::shape(format!(
                    "{:?} cannot appear inside an expression",
                    other.node_type()
                )));
            }
        }
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp, left: &SqlExpr, right: &SqlExpr) -> Result<()> {
        self.push("(");
        self.expr(left)?;
        self.push(" ");
        self.push(op.as_str());
        self.push(" ");
        self.expr(right)?;
        self.push(")");
        Ok(())
    }

    fn function(&mut self, function: SqlFunction, args: &[SqlExpr]) -> Result<()> {
        match function {
            SqlFunction::IsNull | SqlFunction::IsNotNull => {
                let args = expect_args(function, args, 1)?;
                self.push("(");
                self.expr(&args[0])?;
                self.push(if function == SqlFunction::IsNull {
                    " IS NULL)"
                } else {
                    " IS NOT NULL)"
                });
            }
            SqlFunction::Like | SqlFunction::NotLike => {
                let args = expect_args(function, args, 2)?;
                self.push("(");
                self.expr(&args[0])?;
                self.push(if function == SqlFunction::NotLike { " NOT " } else { " " });
                self.symbol(SyntaxSymbol::Like);
                self.push(" ");
                self.expr(&args[1])?;
                self.push(")");
            }
            SqlFunction::StartsWith | SqlFunction::EndsWith | SqlFunction::Contains => {
                let args = expect_args(function, args, 2)?;
                let leading = function != SqlFunction::StartsWith;
                let trailing = function != SqlFunction::EndsWith;
                self.push("(");
                self.expr(&args[0])?;
                self.push(" ");
                self.symbol(SyntaxSymbol::Like);
                self.push(" ");
                match &args[1] {
                    SqlExpr::Constant(Value::Text(needle)) => {
                        let pattern = format!(
                            "{}{}{}",
                            if leading { "%" } else { "" },
                            needle,
                            if trailing { "%" } else { "" }
                        );
                        self.constant(&Value::Text(pattern));
                    }
                    needle => self.wildcard_pattern(needle, leading, trailing)?,
                }
                self.push(")");
            }
            SqlFunction::Concat => match args {
                [] => self.constant(&Value::Text(String::new())),
                [single] => self.expr(single)?,
                _ if self.supports(SqlCapability::ConcatFunction) => {
                    self.push("CONCAT(");
                    self.expr_list(args)?;
                    self.push(")");
                }
                _ => {
                    let operator = self.dialect.syntax_symbol(SyntaxSymbol::ConcatOperator);
                    self.push("(");
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            self.push(" ");
                            self.push(operator);
                            self.push(" ");
                        }
                        self.expr(arg)?;
                    }
                    self.push(")");
                }
            },
            SqlFunction::In => {
                let args = expect_args(function, args, 2)?;
                self.push("(");
                self.expr(&args[0])?;
                self.push(" IN ");
                match &args[1] {
                    list @ (SqlExpr::Tuple(_) | SqlExpr::Select(_) | SqlExpr::Projection(_)) => {
                        self.expr(list)?;
                    }
                    other => {
                        self.push("(");
                        self.expr(other)?;
                        self.push(")");
                    }
                }
                self.push(")");
            }
            SqlFunction::Count if args.is_empty() => self.push("COUNT(*)"),
            _ => {
                self.push(function.name());
                self.push("(");
                self.expr_list(args)?;
                self.push(")");
            }
        }
        Ok(())
    }

    fn source(&mut self, source: &SqlExpr) -> Result<()> {
        match source {
            SqlExpr::Table { name, alias } => {
                self.quote(name);
                if let Some(alias) = alias {
                    self.push(" AS ");
                    self.quote(alias);
                }
            }
            SqlExpr::Join {
                kind,
                left,
                right,
                on,
            } => {
                self.source(left)?;
                self.push(" ");
                self.push(kind.as_str());
                self.push(" ");
                self.source(right)?;
                if let Some(on) = on {
                    self.push(" ON ");
                    self.expr(on)?;
                }
            }
            other => self.expr(other)?,
        }
        Ok(())
    }

    // ==================== Statements ====================

    fn statement(&mut self, expr: &SqlExpr) -> Result<()> {
        match expr {
            SqlExpr::Select(select) => self.select(select),
            SqlExpr::Projection(projection) => self.select(&projection.select),
            SqlExpr::Insert(insert) => self.insert(insert),
            SqlExpr::Update(update) => self.update(update),
            SqlExpr::Delete(delete) => self.delete(delete),
            SqlExpr::CreateTable(create) => self.create_table(create),
            SqlExpr::CreateIndex(index) => self.create_index(index),
            SqlExpr::AlterTable(alter) => self.alter_table(alter),
            SqlExpr::StatementList(statements) => {
                for (i, statement) in statements.iter().enumerate() {
                    if i > 0 {
                        self.push("\n");
                    }
                    self.statement(statement)?;
                }
                Ok(())
            }
            SqlExpr::Pragma(directive) => {
                self.push("PRAGMA ");
                self.push(directive);
                self.push(";");
                Ok(())
            }
            SqlExpr::SetCommand {
                name,
                target,
                value,
            } => {
                self.push("SET ");
                self.push(name);
                if let Some(target) = target {
                    self.push(" ");
                    match target.as_ref() {
                        SqlExpr::Table { name, .. } => self.quote(name),
                        other => self.expr(other)?,
                    }
                }
                self.push(" ");
                self.push(value);
                self.push(";");
                Ok(())
            }
            other => self.expr(other),
        }
    }

    fn select(&mut self, select: &SelectExpr) -> Result<()> {
        self.push("SELECT ");
        if select.distinct {
            self.push("DISTINCT ");
        }
        if select.columns.is_empty() {
            self.push("*");
        } else {
            self.expr_list(&select.columns)?;
        }
        if let Some(from) = &select.from {
            self.push(" FROM ");
            self.source(from)?;
        }
        if let Some(predicate) = &select.where_clause {
            self.push(" WHERE ");
            self.expr(predicate)?;
        }
        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            self.expr_list(&select.group_by)?;
        }
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, item) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(&item.expr)?;
                if item.descending {
                    self.push(" DESC");
                }
            }
        }
        self.limit(select.skip.as_ref(), select.take.as_ref())?;
        if select.for_update {
            self.require(SqlCapability::SelectForUpdate, "SELECT ... FOR UPDATE")?;
            self.push(" FOR UPDATE");
        }
        Ok(())
    }

    fn limit(&mut self, skip: Option<&SqlExpr>, take: Option<&SqlExpr>) -> Result<()> {
        if skip.is_none() && take.is_none() {
            return Ok(());
        }
        match self.dialect.limit_style() {
            LimitStyle::LimitSkipTake => {
                self.push(" LIMIT ");
                match skip {
                    Some(skip) => self.expr(skip)?,
                    None => self.push("0"),
                }
                self.push(", ");
                match take {
                    Some(take) => self.expr(take)?,
                    None => self.push(&i64::MAX.to_string()),
                }
            }
            LimitStyle::LimitOffset => {
                if let Some(take) = take {
                    self.push(" LIMIT ");
                    self.expr(take)?;
                }
                if let Some(skip) = skip {
                    self.push(" OFFSET ");
                    self.expr(skip)?;
                }
            }
            LimitStyle::OffsetFetch => {
                self.push(" OFFSET ");
                match skip {
                    Some(skip) => self.expr(skip)?,
                    None => self.push("0"),
                }
                self.push(" ROWS");
                if let Some(take) = take {
                    self.push(" FETCH NEXT ");
                    self.expr(take)?;
                    self.push(" ROWS ONLY");
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, insert: &InsertExpr) -> Result<()> {
        if insert.columns.len() != insert.values.len() {
            return Err(Error::shape(format!(
                "insert into {} has {} columns and {} values",
                insert.table,
                insert.columns.len(),
                insert.values.len()
            )));
        }

        let identity_insert = if insert.requires_identity_insert {
            self.dialect
                .identity_insert(&insert.table, true)
                .zip(self.dialect.identity_insert(&insert.table, false))
        } else {
            None
        };
        if let Some((on, _)) = &identity_insert {
            self.statement(on)?;
            self.push("\n");
        }

        let output = !insert.returning.is_empty() && self.supports(SqlCapability::InsertOutput);
        if !insert.returning.is_empty() && !output {
            self.require(SqlCapability::InsertReturning, "reading back inserted values")?;
        }

        self.push("INSERT INTO ");
        self.quote(&insert.table);
        if !insert.columns.is_empty() {
            self.push("(");
            self.quoted_list(&insert.columns);
            self.push(")");
        }
        if output {
            self.push(" OUTPUT ");
            for (i, column) in insert.returning.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.push("INSERTED.");
                self.quote(column);
            }
        }
        if insert.columns.is_empty() {
            self.push(" DEFAULT VALUES");
        } else {
            self.push(" VALUES (");
            self.expr_list(&insert.values)?;
            self.push(")");
        }
        if !insert.returning.is_empty() && !output {
            self.push(" RETURNING ");
            self.quoted_list(&insert.returning);
        }
        self.push(";");

        if let Some((_, off)) = &identity_insert {
            self.push("\n");
            self.statement(off)?;
        }
        Ok(())
    }

    fn target_table<'e>(&self, source: &'e SqlExpr, statement: &str) -> Result<&'e str> {
        match source {
            SqlExpr::Table { name, .. } => Ok(name),
            other => Err(Error::shape(format!(
                "{} source must be a table after normalization, found {:?}",
                statement,
                other.node_type()
            ))),
        }
    }

    fn update(&mut self, update: &UpdateExpr) -> Result<()> {
        let table = self.target_table(&update.source, "UPDATE")?;
        if update.assignments.is_empty() {
            return Err(Error::shape(format!("update of {} assigns nothing", table)));
        }
        self.push("UPDATE ");
        self.quote(table);
        self.push(" SET ");
        for (i, assignment) in update.assignments.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.quote(&assignment.column);
            self.push(" = ");
            self.expr(&assignment.value)?;
        }
        if let Some(predicate) = &update.where_clause {
            self.push(" WHERE ");
            self.expr(predicate)?;
        }
        self.push(";");
        Ok(())
    }

    fn delete(&mut self, delete: &DeleteExpr) -> Result<()> {
        let table = self.target_table(&delete.source, "DELETE")?;
        self.push("DELETE FROM ");
        self.quote(table);
        if let Some(predicate) = &delete.where_clause {
            self.push(" WHERE ");
            self.expr(predicate)?;
        }
        self.push(";");
        Ok(())
    }

    // ==================== DDL ====================

    fn create_table(&mut self, create: &CreateTableExpr) -> Result<()> {
        self.push("CREATE TABLE ");
        if create.if_not_exists {
            self.push("IF NOT EXISTS ");
        }
        self.quote(&create.table);
        self.push(" (");
        for (i, column) in create.columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.column_definition(column)?;
        }
        for constraint in &create.constraints {
            self.push(", ");
            self.constraint(constraint)?;
        }
        self.push(");");
        Ok(())
    }

    fn column_definition(&mut self, column: &ColumnDefinition) -> Result<()> {
        self.quote(&column.name);
        self.push(" ");
        let data_type = self.dialect.data_type(&column.sql_type);
        self.push(&data_type);
        for constraint in &column.constraints {
            self.push(" ");
            self.constraint(constraint)?;
        }
        Ok(())
    }

    fn constraint_name(&mut self, name: Option<&String>) {
        if let Some(name) = name {
            self.push("CONSTRAINT ");
            self.quote(name);
            self.push(" ");
        }
    }

    fn constraint(&mut self, constraint: &Constraint) -> Result<()> {
        match constraint {
            Constraint::NotNull => self.push("NOT NULL"),
            Constraint::AutoIncrement => self.symbol(SyntaxSymbol::AutoIncrement),
            Constraint::Default(value) => {
                self.push("DEFAULT ");
                match value {
                    SqlExpr::Constant(v) | SqlExpr::ConstantPlaceholder { value: v, .. } => {
                        let text = literal(self.dialect, v);
                        self.push(&text);
                    }
                    other => self.expr(other)?,
                }
            }
            Constraint::PrimaryKey { name, columns } => {
                self.constraint_name(name.as_ref());
                self.push("PRIMARY KEY");
                if !columns.is_empty() {
                    self.push("(");
                    self.quoted_list(columns);
                    self.push(")");
                }
            }
            Constraint::Unique { name, columns } => {
                self.constraint_name(name.as_ref());
                self.push("UNIQUE");
                if !columns.is_empty() {
                    self.push("(");
                    self.quoted_list(columns);
                    self.push(")");
                }
            }
            Constraint::ForeignKey(fk) => self.foreign_key(fk),
        }
        Ok(())
    }

    fn action_supported(&self, action: ReferentialAction) -> bool {
        action != ReferentialAction::NoAction
            && action_capability(action).is_none_or(|c| self.supports(c))
    }

    fn foreign_key(&mut self, fk: &ForeignKeyConstraint) {
        self.constraint_name(fk.name.as_ref());
        if !fk.columns.is_empty() {
            self.push("FOREIGN KEY(");
            self.quoted_list(&fk.columns);
            self.push(") ");
        }
        self.push("REFERENCES ");
        self.quote(&fk.referenced_table);
        self.push("(");
        self.quoted_list(&fk.referenced_columns);
        self.push(")");
        if self.supports(SqlCapability::DeleteAction) && self.action_supported(fk.on_delete) {
            self.push(" ON DELETE ");
            self.push(fk.on_delete.as_sql());
        }
        if self.action_supported(fk.on_update) {
            self.push(" ON UPDATE ");
            self.push(fk.on_update.as_sql());
        }
        if fk.deferrable && self.supports(SqlCapability::Deferrability) {
            self.push(" DEFERRABLE INITIALLY DEFERRED");
        }
    }

    fn alter_table(&mut self, alter: &AlterTableExpr) -> Result<()> {
        for (i, constraint) in alter.add_constraints.iter().enumerate() {
            if i > 0 {
                self.push("\n");
            }
            self.push("ALTER TABLE ");
            self.quote(&alter.table);
            self.push(" ADD ");
            self.constraint(constraint)?;
            self.push(";");
        }
        Ok(())
    }

    fn create_index(&mut self, index: &CreateIndexExpr) -> Result<()> {
        self.push("CREATE ");
        if index.unique {
            self.push("UNIQUE ");
        }
        self.push("INDEX ");
        if index.if_not_exists {
            self.push("IF NOT EXISTS ");
        }
        self.quote(&index.name);
        self.push(" ON ");
        self.quote(&index.table);
        self.push("(");
        for (i, column) in index.columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.quote(&column.column);
            match column.descending {
                Some(true) => self.push(" DESC"),
                Some(false) => self.push(" ASC"),
                None => {}
            }
        }
        self.push(");");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Assignment, IndexedColumn, JoinKind, OrderBy};
    use crate::dialect::{
        AnsiDialect, MySqlDialect, PostgresDialect, SqlServerDialect, SqliteDialect,
    };
    use sqlpersist_core::SqlType;

    fn format(dialect: &dyn SqlDialect, expr: &SqlExpr) -> FormatResult {
        SqlFormatter::new(dialect, FormatOptions::default())
            .format(expr)
            .unwrap()
    }

    fn student_select(filter: SqlExpr) -> SqlExpr {
        SqlExpr::Select(Box::new(
            SelectExpr::from(SqlExpr::table("Student", Some("T0"))).filter(filter),
        ))
    }

    #[test]
    fn test_select_with_parameters() {
        let expr = student_select(SqlExpr::and(
            SqlExpr::eq(SqlExpr::column(Some("T0"), "Id"), SqlExpr::constant(7_i64)),
            SqlExpr::binary(
                BinaryOp::NotEqual,
                SqlExpr::column(Some("T0"), "Name"),
                SqlExpr::constant("x"),
            ),
        ));
        let result = format(&PostgresDialect, &expr);
        assert_eq!(
            result.command_text,
            "SELECT * FROM \"Student\" AS \"T0\" WHERE ((\"T0\".\"Id\" = $1) AND (\"T0\".\"Name\" <> $2))"
        );
        assert_eq!(
            result.params(),
            vec![Value::BigInt(7), Value::Text("x".into())]
        );
        assert!(!result.cacheable);
    }

    #[test]
    fn test_placeholders_are_cacheable_and_rebind() {
        let expr = student_select(SqlExpr::eq(
            SqlExpr::column(Some("T0"), "Id"),
            SqlExpr::placeholder(0, 7_i64),
        ));
        let result = format(&SqliteDialect, &expr);
        assert!(result.cacheable);
        assert_eq!(result.parameter_to_placeholder, vec![Some(0)]);
        assert_eq!(result.placeholder_to_parameter.get(&0), Some(&0));
        assert_eq!(
            result.rebind(&[Value::BigInt(9)]).unwrap(),
            vec![Value::BigInt(9)]
        );
        assert!(result.rebind(&[]).is_err());
    }

    #[test]
    fn test_unevaluated_placeholders_are_written_as_slots() {
        let expr = SqlExpr::eq(SqlExpr::column(None, "Id"), SqlExpr::placeholder(3, 1_i64));
        let options = FormatOptions::default().evaluate_constant_placeholders(false);
        let result = SqlFormatter::new(&AnsiDialect, options).format(&expr).unwrap();
        assert_eq!(result.command_text, "(\"Id\" = $$3)");
        assert!(result.parameter_values.is_empty());
        assert!(!result.cacheable);

        let update = SqlExpr::Update(Box::new(UpdateExpr {
            source: SqlExpr::table("School", None),
            assignments: vec![Assignment {
                column: "Name".into(),
                value: SqlExpr::placeholder(0, "North"),
            }],
            where_clause: Some(SqlExpr::eq(
                SqlExpr::column(None, "Id"),
                SqlExpr::placeholder(1, 3_i64),
            )),
        }));
        let result = SqlFormatter::new(&SqliteDialect, options).format(&update).unwrap();
        assert_eq!(
            result.command_text,
            "UPDATE \"School\" SET \"Name\" = $$0 WHERE (\"Id\" = $$1);"
        );
        assert!(!result.cacheable);
    }

    #[test]
    fn test_statement_without_placeholders_is_not_cacheable() {
        let insert = SqlExpr::Insert(Box::new(InsertExpr {
            table: "Student".into(),
            columns: Vec::new(),
            values: Vec::new(),
            returning: Vec::new(),
            requires_identity_insert: false,
        }));
        let result = format(&SqliteDialect, &insert);
        assert!(result.parameter_values.is_empty());
        assert!(!result.cacheable);
    }

    #[test]
    fn test_null_optimization_inlines_and_disables_caching() {
        let expr = SqlExpr::eq(SqlExpr::column(None, "Id"), SqlExpr::placeholder(0, Value::Null));
        let options = FormatOptions::default().optimize_out_null_literals(true);
        let result = SqlFormatter::new(&AnsiDialect, options).format(&expr).unwrap();
        assert_eq!(result.command_text, "(\"Id\" = NULL)");
        assert!(!result.cacheable);
    }

    #[test]
    fn test_inline_booleans() {
        let expr = SqlExpr::eq(SqlExpr::column(None, "Active"), SqlExpr::constant(true));
        assert_eq!(format(&SqliteDialect, &expr).command_text, "(\"Active\" = 1)");
        assert_eq!(format(&AnsiDialect, &expr).command_text, "(\"Active\" = @p0)");
    }

    #[test]
    fn test_functions() {
        let name = || SqlExpr::column(None, "Name");
        let is_null = SqlExpr::call(SqlFunction::IsNull, vec![name()]);
        assert_eq!(format(&AnsiDialect, &is_null).command_text, "(\"Name\" IS NULL)");

        let not = SqlExpr::not(SqlExpr::call(SqlFunction::IsNotNull, vec![name()]));
        assert_eq!(
            format(&AnsiDialect, &not).command_text,
            "NOT ((\"Name\" IS NOT NULL))"
        );

        let within = SqlExpr::call(
            SqlFunction::In,
            vec![
                SqlExpr::column(None, "Id"),
                SqlExpr::Tuple(vec![SqlExpr::constant(1), SqlExpr::constant(2)]),
            ],
        );
        assert_eq!(
            format(&AnsiDialect, &within).command_text,
            "(\"Id\" IN (@p0, @p1))"
        );

        let count = SqlExpr::call(SqlFunction::Count, Vec::new());
        assert_eq!(format(&AnsiDialect, &count).command_text, "COUNT(*)");
    }

    #[test]
    fn test_starts_with_lowers_to_like() {
        let expr = SqlExpr::call(
            SqlFunction::StartsWith,
            vec![SqlExpr::column(None, "Name"), SqlExpr::placeholder(0, "Jo")],
        );
        let result = format(&PostgresDialect, &expr);
        assert_eq!(result.command_text, "(\"Name\" LIKE ($1 || '%'))");
        assert_eq!(result.params(), vec![Value::Text("Jo".into())]);
        assert!(result.cacheable);
        assert_eq!(
            result.rebind(&[Value::Text("Al".into())]).unwrap(),
            vec![Value::Text("Al".into())]
        );

        let mysql = format(&MySqlDialect, &expr);
        assert_eq!(mysql.command_text, "(`Name` LIKE CONCAT(?, '%'))");
        assert!(mysql.cacheable);

        let contains = SqlExpr::call(
            SqlFunction::Contains,
            vec![SqlExpr::column(None, "Name"), SqlExpr::placeholder(0, "an")],
        );
        assert_eq!(
            format(&SqliteDialect, &contains).command_text,
            "(\"Name\" LIKE ('%' || ?1 || '%'))"
        );

        let folded = SqlExpr::call(
            SqlFunction::Contains,
            vec![SqlExpr::column(None, "Name"), SqlExpr::constant("an")],
        );
        let result = format(&AnsiDialect, &folded);
        assert_eq!(result.command_text, "(\"Name\" LIKE @p0)");
        assert_eq!(result.params(), vec![Value::Text("%an%".into())]);
    }

    #[test]
    fn test_limit_styles() {
        let mut select = SelectExpr::from(SqlExpr::table("Student", None));
        select.order_by.push(OrderBy::desc(SqlExpr::column(None, "Id")));
        select.take = Some(SqlExpr::constant(10_i64));
        let expr = SqlExpr::Select(Box::new(select.clone()));

        assert_eq!(
            format(&SqliteDialect, &expr).command_text,
            "SELECT * FROM \"Student\" ORDER BY \"Id\" DESC LIMIT 0, ?1"
        );
        assert_eq!(
            format(&PostgresDialect, &expr).command_text,
            "SELECT * FROM \"Student\" ORDER BY \"Id\" DESC LIMIT $1"
        );
        assert_eq!(
            format(&SqlServerDialect, &expr).command_text,
            "SELECT * FROM \"Student\" ORDER BY \"Id\" DESC OFFSET 0 ROWS FETCH NEXT @p0 ROWS ONLY"
        );

        select.take = None;
        select.skip = Some(SqlExpr::constant(5_i64));
        let expr = SqlExpr::Select(Box::new(select));
        assert_eq!(
            format(&SqliteDialect, &expr).command_text,
            format!(
                "SELECT * FROM \"Student\" ORDER BY \"Id\" DESC LIMIT ?1, {}",
                i64::MAX
            )
        );
    }

    #[test]
    fn test_for_update_requires_capability() {
        let mut select = SelectExpr::from(SqlExpr::table("Student", None));
        select.for_update = true;
        let expr = SqlExpr::Select(Box::new(select));
        assert_eq!(
            format(&PostgresDialect, &expr).command_text,
            "SELECT * FROM \"Student\" FOR UPDATE"
        );
        let err = SqlFormatter::new(&SqliteDialect, FormatOptions::default())
            .format(&expr)
            .unwrap_err();
        assert!(matches!(err, Error::Capability(_)));
    }

    #[test]
    fn test_join_and_nested_select() {
        let join = SqlExpr::Join {
            kind: JoinKind::Inner,
            left: Box::new(SqlExpr::table("Student", Some("T0"))),
            right: Box::new(SqlExpr::table("School", Some("T1"))),
            on: Some(Box::new(SqlExpr::eq(
                SqlExpr::column(Some("T0"), "SchoolId"),
                SqlExpr::column(Some("T1"), "Id"),
            ))),
        };
        let inner = SqlExpr::Select(Box::new(SelectExpr {
            columns: vec![SqlExpr::column(None, "Id")],
            from: Some(SqlExpr::table("School", None)),
            ..SelectExpr::default()
        }));
        let select = SelectExpr {
            distinct: true,
            columns: vec![SqlExpr::column(Some("T0"), "Name")],
            from: Some(join),
            where_clause: Some(SqlExpr::call(
                SqlFunction::In,
                vec![SqlExpr::column(Some("T1"), "Id"), inner],
            )),
            ..SelectExpr::default()
        };
        assert_eq!(
            format(&AnsiDialect, &SqlExpr::Select(Box::new(select))).command_text,
            "SELECT DISTINCT \"T0\".\"Name\" FROM \"Student\" AS \"T0\" INNER JOIN \"School\" AS \"T1\" \
             ON (\"T0\".\"SchoolId\" = \"T1\".\"Id\") WHERE (\"T1\".\"Id\" IN (SELECT \"Id\" FROM \"School\"))"
        );
    }

    fn insert(returning: Vec<&str>, identity: bool) -> SqlExpr {
        SqlExpr::Insert(Box::new(InsertExpr {
            table: "Student".into(),
            columns: vec!["Name".into(), "SchoolId".into()],
            values: vec![SqlExpr::placeholder(0, "Ann"), SqlExpr::placeholder(1, 3_i64)],
            returning: returning.into_iter().map(str::to_string).collect(),
            requires_identity_insert: identity,
        }))
    }

    #[test]
    fn test_insert_variants() {
        assert_eq!(
            format(&SqliteDialect, &insert(Vec::new(), false)).command_text,
            "INSERT INTO \"Student\"(\"Name\", \"SchoolId\") VALUES (?1, ?2);"
        );
        assert_eq!(
            format(&PostgresDialect, &insert(vec!["Id"], false)).command_text,
            "INSERT INTO \"Student\"(\"Name\", \"SchoolId\") VALUES ($1, $2) RETURNING \"Id\";"
        );
        assert_eq!(
            format(&SqlServerDialect, &insert(vec!["Id"], false)).command_text,
            "INSERT INTO \"Student\"(\"Name\", \"SchoolId\") OUTPUT INSERTED.\"Id\" VALUES (@p0, @p1);"
        );
        assert!(matches!(
            SqlFormatter::new(&SqliteDialect, FormatOptions::default())
                .format(&insert(vec!["Id"], false)),
            Err(Error::Capability(_))
        ));
    }

    #[test]
    fn test_identity_insert_is_wrapped() {
        let result = format(&SqlServerDialect, &insert(Vec::new(), true));
        assert_eq!(
            result.command_text,
            "SET IDENTITY_INSERT \"Student\" ON;\n\
             INSERT INTO \"Student\"(\"Name\", \"SchoolId\") VALUES (@p0, @p1);\n\
             SET IDENTITY_INSERT \"Student\" OFF;"
        );
        assert!(result.cacheable);
        // Other dialects accept explicit identity values as-is
        assert!(!format(&SqliteDialect, &insert(Vec::new(), true))
            .command_text
            .contains("IDENTITY_INSERT"));
    }

    #[test]
    fn test_default_values_insert() {
        let expr = SqlExpr::Insert(Box::new(InsertExpr {
            table: "Counter".into(),
            columns: Vec::new(),
            values: Vec::new(),
            returning: Vec::new(),
            requires_identity_insert: false,
        }));
        assert_eq!(
            format(&AnsiDialect, &expr).command_text,
            "INSERT INTO \"Counter\" DEFAULT VALUES;"
        );
    }

    #[test]
    fn test_update_and_delete() {
        let update = SqlExpr::Update(Box::new(UpdateExpr {
            source: SqlExpr::table("Student", None),
            assignments: vec![Assignment {
                column: "Name".into(),
                value: SqlExpr::placeholder(0, "Bo"),
            }],
            where_clause: Some(SqlExpr::eq(
                SqlExpr::column(None, "Id"),
                SqlExpr::placeholder(1, 4_i64),
            )),
        }));
        assert_eq!(
            format(&PostgresDialect, &update).command_text,
            "UPDATE \"Student\" SET \"Name\" = $1 WHERE (\"Id\" = $2);"
        );

        let delete = SqlExpr::Delete(Box::new(DeleteExpr {
            source: SqlExpr::table("Student", None),
            where_clause: Some(SqlExpr::eq(
                SqlExpr::column(None, "Id"),
                SqlExpr::constant(4_i64),
            )),
        }));
        assert_eq!(
            format(&SqliteDialect, &delete).command_text,
            "DELETE FROM \"Student\" WHERE (\"Id\" = ?1);"
        );
    }

    #[test]
    fn test_unnormalized_delete_is_a_shape_error() {
        let delete = SqlExpr::Delete(Box::new(DeleteExpr {
            source: SqlExpr::Select(Box::new(SelectExpr::from(SqlExpr::table("Student", None)))),
            where_clause: None,
        }));
        assert!(matches!(
            SqlFormatter::new(&AnsiDialect, FormatOptions::default()).format(&delete),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn test_object_operand_is_a_shape_error() {
        let expr = SqlExpr::eq(
            SqlExpr::ObjectOperand {
                type_name: "School".into(),
                parts: vec![SqlExpr::column(None, "SchoolId")],
            },
            SqlExpr::constant(1),
        );
        assert!(matches!(
            SqlFormatter::new(&AnsiDialect, FormatOptions::default()).format(&expr),
            Err(Error::Shape(_))
        ));
    }

    fn student_table() -> SqlExpr {
        SqlExpr::CreateTable(Box::new(CreateTableExpr {
            table: "Student".into(),
            if_not_exists: false,
            columns: vec![
                ColumnDefinition {
                    name: "Id".into(),
                    sql_type: SqlType::BigInt,
                    constraints: vec![
                        Constraint::PrimaryKey {
                            name: None,
                            columns: Vec::new(),
                        },
                        Constraint::AutoIncrement,
                    ],
                },
                ColumnDefinition {
                    name: "Active".into(),
                    sql_type: SqlType::Boolean,
                    constraints: vec![
                        Constraint::NotNull,
                        Constraint::Default(SqlExpr::constant(true)),
                    ],
                },
                ColumnDefinition {
                    name: "SchoolId".into(),
                    sql_type: SqlType::BigInt,
                    constraints: Vec::new(),
                },
            ],
            constraints: vec![Constraint::ForeignKey(ForeignKeyConstraint {
                name: Some("fk_Student_School".into()),
                columns: vec!["SchoolId".into()],
                referenced_table: "School".into(),
                referenced_columns: vec!["Id".into()],
                on_delete: ReferentialAction::Cascade,
                on_update: ReferentialAction::NoAction,
                deferrable: true,
            })],
        }))
    }

    #[test]
    fn test_create_table_inline_foreign_key() {
        assert_eq!(
            format(&SqliteDialect, &student_table()).command_text,
            "CREATE TABLE \"Student\" (\"Id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"Active\" INTEGER NOT NULL DEFAULT 1, \"SchoolId\" INTEGER, \
             CONSTRAINT \"fk_Student_School\" FOREIGN KEY(\"SchoolId\") REFERENCES \"School\"(\"Id\") \
             ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED);"
        );
    }

    #[test]
    fn test_create_table_moves_foreign_key_to_alter() {
        assert_eq!(
            format(&PostgresDialect, &student_table()).command_text,
            "CREATE TABLE \"Student\" (\"Id\" BIGINT PRIMARY KEY GENERATED BY DEFAULT AS IDENTITY, \
             \"Active\" BOOLEAN NOT NULL DEFAULT TRUE, \"SchoolId\" BIGINT);\n\
             ALTER TABLE \"Student\" ADD CONSTRAINT \"fk_Student_School\" FOREIGN KEY(\"SchoolId\") \
             REFERENCES \"School\"(\"Id\") ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED;"
        );
    }

    #[test]
    fn test_unsupported_actions_are_skipped() {
        let text = format(&SqlServerDialect, &student_table()).command_text;
        assert!(text.contains("REFERENCES \"School\"(\"Id\");"));
        assert!(!text.contains("ON DELETE"));
        assert!(!text.contains("DEFERRABLE"));
        assert!(text.contains("\"Id\" BIGINT PRIMARY KEY IDENTITY(1,1)"));
    }

    #[test]
    fn test_create_index_pragma_and_set() {
        let index = SqlExpr::CreateIndex(Box::new(CreateIndexExpr {
            name: "ix_Student_Name".into(),
            table: "Student".into(),
            unique: true,
            if_not_exists: true,
            columns: vec![
                IndexedColumn {
                    column: "Name".into(),
                    descending: Some(false),
                },
                IndexedColumn {
                    column: "Id".into(),
                    descending: Some(true),
                },
            ],
        }));
        let list = SqlExpr::StatementList(vec![
            SqlExpr::Pragma("foreign_keys = OFF".into()),
            index,
            SqlExpr::SetCommand {
                name: "FOREIGN_KEY_CHECKS".into(),
                target: None,
                value: "= 1".into(),
            },
        ]);
        assert_eq!(
            format(&SqliteDialect, &list).command_text,
            "PRAGMA foreign_keys = OFF;\n\
             CREATE UNIQUE INDEX IF NOT EXISTS \"ix_Student_Name\" ON \"Student\"(\"Name\" ASC, \"Id\" DESC);\n\
             SET FOREIGN_KEY_CHECKS = 1;"
        );
    }

    #[test]
    fn test_negate_and_arithmetic() {
        let expr = SqlExpr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(SqlExpr::binary(
                BinaryOp::Add,
                SqlExpr::column(None, "A"),
                SqlExpr::column(None, "B"),
            )),
        };
        assert_eq!(format(&AnsiDialect, &expr).command_text, "(-((\"A\" + \"B\")))");
    }
}
