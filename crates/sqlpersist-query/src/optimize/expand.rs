//! Object operand expansion.

use crate::ast::{BinaryOp, SqlExpr, SqlFunction};
use crate::visit::SqlRewriter;
use sqlpersist_core::{Error, Result};

/// Expands comparisons between object operands into per-key comparisons.
///
/// `a = b` over two objects becomes `a.k0 = b.k0 AND a.k1 = b.k1 ...` in key
/// order. `a <> b` becomes the per-key inequalities, also joined with `AND`.
/// A function called on a single object operand becomes one call per key
/// part joined with `AND`.
#[derive(Debug, Default)]
pub struct ObjectOperandComparisonExpander;

impl ObjectOperandComparisonExpander {
    pub fn expand(expr: SqlExpr) -> Result<SqlExpr> {
        Self.rewrite(expr)
    }
}

fn arity_error(left: &str, left_len: usize, right: &str, right_len: usize) -> Error {
    Error::not_supported(format!(
        "cannot compare {} ({} key parts) with {} ({} key parts)",
        left, left_len, right, right_len
    ))
}

impl SqlRewriter for ObjectOperandComparisonExpander {
    fn rewrite_binary(&mut self, op: BinaryOp, left: SqlExpr, right: SqlExpr) -> Result<SqlExpr> {
        let left = self.rewrite(left)?;
        let right = self.rewrite(right)?;

        match (left, right) {
            (
                SqlExpr::ObjectOperand {
                    type_name: left_type,
                    parts: left_parts,
                },
                SqlExpr::ObjectOperand {
                    type_name: right_type,
                    parts: right_parts,
                },
            ) => {
                match op {
                    BinaryOp::Eq | BinaryOp::NotEqual => {}
                    other => {
                        return Err(Error::not_supported(format!(
                            "operator {} is not supported between {} and {} objects",
                            other.as_str(),
                            left_type,
                            right_type
                        )));
                    }
                }
                if left_parts.len() != right_parts.len() || left_parts.is_empty() {
                    return Err(arity_error(
                        &left_type,
                        left_parts.len(),
                        &right_type,
                        right_parts.len(),
                    ));
                }
                let comparisons = left_parts
                    .into_iter()
                    .zip(right_parts)
                    .map(|(l, r)| SqlExpr::binary(op, l, r));
                SqlExpr::fold(BinaryOp::And, comparisons)
                    .ok_or_else(|| arity_error(&left_type, 0, &right_type, 0))
            }
            // A single-part object compares like its key column.
            (SqlExpr::ObjectOperand { type_name, parts }, _)
            | (_, SqlExpr::ObjectOperand { type_name, parts })
                if parts.len() != 1 =>
            {
                Err(arity_error(&type_name, parts.len(), "a scalar", 1))
            }
            (SqlExpr::ObjectOperand { mut parts, .. }, right) => {
                Ok(SqlExpr::binary(op, parts.remove(0), right))
            }
            (left, SqlExpr::ObjectOperand { mut parts, .. }) => {
                Ok(SqlExpr::binary(op, left, parts.remove(0)))
            }
            (left, right) => Ok(SqlExpr::binary(op, left, right)),
        }
    }

    fn rewrite_function(&mut self, function: SqlFunction, args: Vec<SqlExpr>) -> Result<SqlExpr> {
        let mut args = args
            .into_iter()
            .map(|arg| self.rewrite(arg))
            .collect::<Result<Vec<_>>>()?;

        if let [SqlExpr::ObjectOperand { .. }] = args.as_slice() {
            let Some(SqlExpr::ObjectOperand { type_name, parts }) = args.pop() else {
                return Err(Error::shape("object operand vanished during expansion"));
            };
            let calls = parts
                .into_iter()
                .map(|part| SqlExpr::call(function, vec![part]));
            return SqlExpr::fold(BinaryOp::And, calls).ok_or_else(|| {
                Error::not_supported(format!("{} object has no key parts", type_name))
            });
        }

        if args
            .iter()
            .any(|a| matches!(a, SqlExpr::ObjectOperand { .. }))
        {
            return Err(Error::not_supported(format!(
                "{} over object operands with other arguments is not supported",
                function.name()
            )));
        }

        Ok(SqlExpr::Function { function, args })
    }
}
