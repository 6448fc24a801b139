//! Approximate-fraction sampling
//!
//! Sampling is pushed into the store: attach a uniform-random column, freeze
//! it behind a collapse boundary, keep rows whose draw falls under the
//! fraction, and drop the helper column. The row count is a binomial random
//! variable around `fraction × total`, not an exact count; over-sample and
//! `MaterializedTable::truncate` when an exact count is needed.

use crate::compile::RANDOM_UNIFORM;
use crate::parser::{CompareOp, Expr, Predicate};
use crate::query::{DeferredQuery, SelectItem};
use crate::{Error, Result};

/// Helper column carrying the per-row uniform draw
const SAMPLE_COLUMN: &str = "_sample_u";

/// Reduce `query` to an approximate `fraction` of its rows, evaluated
/// remotely. Determinism comes from `Connection::set_sample_seed`.
pub fn approximate_sample(query: &DeferredQuery, fraction: f64) -> Result<DeferredQuery> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(Error::Plan(format!(
            "sampling fraction must be in (0, 1], got {fraction}"
        )));
    }
    if query.columns().iter().any(|c| c == SAMPLE_COLUMN) {
        return Err(Error::Plan(format!(
            "query already has a '{SAMPLE_COLUMN}' column"
        )));
    }

    // Collapse before filtering so each row's draw is evaluated exactly once
    let with_draw = query
        .mutate_expr(SAMPLE_COLUMN, Expr::call(RANDOM_UNIFORM, Vec::new()))?
        .collapse();
    let kept = with_draw.filter_pred(Predicate::compare(
        Expr::column(SAMPLE_COLUMN),
        CompareOp::LessThanOrEqual,
        Expr::real(fraction),
    ))?;
    kept.select(&[SelectItem::exclude(SAMPLE_COLUMN)])
}
