//! Optimizer passes run between binding and formatting.

mod amend;
mod expand;
mod normalize;
mod redundant;

pub use amend::ForeignKeyConstraintAmender;
pub use expand::ObjectOperandComparisonExpander;
pub use normalize::UpdateDeleteNormalizer;
pub use redundant::RedundantFunctionCallRemover;

use crate::ast::SqlExpr;
use sqlpersist_core::Result;

/// Run object operand expansion, update/delete normalization and redundant
/// call removal, in that order.
#[tracing::instrument(level = "trace", skip(expr))]
pub fn optimize(expr: SqlExpr) -> Result<SqlExpr> {
    let expr = ObjectOperandComparisonExpander::expand(expr)?;
    let expr = UpdateDeleteNormalizer::normalize(expr)?;
    RedundantFunctionCallRemover::remove(expr)
}
