//! Remote scoring
//!
//! Applies a fitted model back to unsampled data without pulling rows
//! locally: upload the coefficient lookup table, left-join it onto the
//! scoring partition, evaluate the prediction arithmetic in the store, and
//! aggregate per label. Only the small aggregated result is ever
//! materialized. Rows whose category was never seen in training join to
//! NULL coefficients and produce a NULL prediction, never an error.

use crate::model::FittedModel;
use crate::query::{Agg, DeferredQuery};
use crate::table::MaterializedTable;
use crate::Result;

/// Name of the derived prediction column
pub const PREDICTED_COLUMN: &str = "predicted";

/// Build the deferred scoring query over `base` (already filtered to the
/// scoring partition): left-join `coefficients` on `(data_key, lookup_key)`,
/// derive the prediction, then group by `label` and average the observed
/// response and the prediction alongside a row count.
pub fn score_remote(
    base: &DeferredQuery,
    model: &FittedModel,
    coefficients: &MaterializedTable,
    on: (&str, &str),
    label: &str,
) -> Result<DeferredQuery> {
    let joined = base.left_join_local(coefficients, &[on])?;
    let scored = joined.mutate_expr(PREDICTED_COLUMN, model.prediction_expr())?;
    scored.group_by(&[label])?.aggregate(&[
        Agg::mean(model.response(), format!("avg_{}", model.response())),
        Agg::mean(PREDICTED_COLUMN, "avg_predicted"),
        Agg::count("n"),
    ])
}
