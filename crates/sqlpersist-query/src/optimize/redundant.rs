//! Redundant function call removal.

use crate::ast::{SqlExpr, SqlFunction};
use crate::visit::SqlRewriter;
use sqlpersist_core::{Result, Value};

/// Simplifies function calls that do not change their result.
///
/// - single-argument `CONCAT` and `COALESCE` unwrap to the argument
/// - nested concatenations flatten into one
/// - empty text constants drop out of a concatenation
/// - adjacent text constants in a concatenation fold together
/// - `LOWER(LOWER(x))`, `UPPER(UPPER(x))` and `TRIM(TRIM(x))` collapse
///
/// Placeholders are never folded: their values may be rebound later.
#[derive(Debug, Default)]
pub struct RedundantFunctionCallRemover;

impl RedundantFunctionCallRemover {
    pub fn remove(expr: SqlExpr) -> Result<SqlExpr> {
        Self.rewrite(expr)
    }
}

fn text_constant(expr: &SqlExpr) -> Option<&str> {
    match expr {
        SqlExpr::Constant(Value::Text(s)) => Some(s),
        _ => None,
    }
}

fn simplify_concat(args: Vec<SqlExpr>) -> SqlExpr {
    let mut flat: Vec<SqlExpr> = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            SqlExpr::Function {
                function: SqlFunction::Concat,
                args: inner,
            } => flat.extend(inner),
            other => flat.push(other),
        }
    }

    let mut out: Vec<SqlExpr> = Vec::with_capacity(flat.len());
    for arg in flat {
        if text_constant(&arg).is_some_and(str::is_empty) {
            continue;
        }
        if let (Some(SqlExpr::Constant(Value::Text(prev))), Some(next)) =
            (out.last_mut(), text_constant(&arg))
        {
            prev.push_str(next);
            continue;
        }
        out.push(arg);
    }

    match out.len() {
        0 => SqlExpr::Constant(Value::Text(String::new())),
        1 => out.pop().unwrap_or(SqlExpr::Constant(Value::Text(String::new()))),
        _ => SqlExpr::call(SqlFunction::Concat, out),
    }
}

impl SqlRewriter for RedundantFunctionCallRemover {
    fn rewrite_function(&mut self, function: SqlFunction, args: Vec<SqlExpr>) -> Result<SqlExpr> {
        let mut args = args
            .into_iter()
            .map(|arg| self.rewrite(arg))
            .collect::<Result<Vec<_>>>()?;

        Ok(match function {
            SqlFunction::Concat => simplify_concat(args),
            SqlFunction::Coalesce if args.len() == 1 => args.remove(0),
            SqlFunction::Lower | SqlFunction::Upper | SqlFunction::Trim
                if matches!(
                    args.as_slice(),
                    [SqlExpr::Function { function: inner, .. }] if *inner == function
                ) =>
            {
                args.remove(0)
            }
            _ => SqlExpr::Function { function, args },
        })
    }
}
