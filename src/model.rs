//! Local model fitting
//!
//! Ordinary least squares of a response on an intercept, continuous
//! predictors, and a dummy-coded categorical predictor. The reference
//! category is the lexicographically first category in the fitting sample
//! and its coefficient is fixed at 0; every other category gets one
//! indicator coefficient. This is the single supported coding scheme.
//!
//! Fitting happens on a locally materialized sample. Scoring goes back to
//! the store through `coefficient_table` + `prediction_expr`: the lookup
//! table carries one row per category with the shared coefficients broadcast
//! to every row, and the prediction formula references those columns.

use std::collections::BTreeSet;

use crate::parser::Expr;
use crate::table::{Column, ColumnType, MaterializedTable, Value};
use crate::{Error, Result};

/// Relative pivot threshold for declaring the normal equations singular
const SINGULARITY_EPS: f64 = 1e-9;

/// An immutable fitted linear model
#[derive(Debug, Clone)]
pub struct FittedModel {
    response: String,
    categorical: String,
    reference: String,
    intercept: f64,
    continuous: Vec<(String, f64)>,
    /// Sorted by category name; the reference category carries 0.0
    categories: Vec<(String, f64)>,
}

/// Fit `response ~ intercept + continuous... + categorical` by ordinary
/// least squares on a materialized sample.
///
/// Rows with NULL (or non-numeric) values in any used column are dropped
/// before fitting. Fails with `RankDeficiency` when the design matrix has
/// more parameters than usable rows or is singular (e.g. a collinear
/// predictor, or a category indistinguishable from the intercept).
pub fn fit(
    table: &MaterializedTable,
    response: &str,
    continuous: &[&str],
    categorical: &str,
) -> Result<FittedModel> {
    let response_idx = table
        .column_index(response)
        .ok_or_else(|| Error::ColumnNotFound(response.to_string()))?;
    let continuous_idx: Vec<usize> = continuous
        .iter()
        .map(|&c| {
            table
                .column_index(c)
                .ok_or_else(|| Error::ColumnNotFound(c.to_string()))
        })
        .collect::<Result<_>>()?;
    let categorical_idx = table
        .column_index(categorical)
        .ok_or_else(|| Error::ColumnNotFound(categorical.to_string()))?;
    if table.columns()[categorical_idx].ty != ColumnType::Text {
        return Err(Error::Plan(format!(
            "categorical predictor '{categorical}' must be a text column"
        )));
    }

    // Complete cases only
    let mut observations: Vec<(f64, Vec<f64>, String)> = Vec::new();
    for row in table.rows() {
        let y = match row[response_idx].as_f64() {
            Some(v) => v,
            None => continue,
        };
        let mut xs = Vec::with_capacity(continuous_idx.len());
        let mut complete = true;
        for &idx in &continuous_idx {
            match row[idx].as_f64() {
                Some(v) => xs.push(v),
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            continue;
        }
        let category = match &row[categorical_idx] {
            Value::Text(s) => s.clone(),
            _ => continue,
        };
        observations.push((y, xs, category));
    }

    let category_names: Vec<String> = observations
        .iter()
        .map(|(_, _, c)| c.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let n = observations.len();
    let k = category_names.len();
    if n == 0 || k == 0 {
        return Err(Error::RankDeficiency(
            "no usable rows in the fitting sample".to_string(),
        ));
    }
    let p = 1 + continuous.len() + (k - 1);
    if n < p {
        return Err(Error::RankDeficiency(format!(
            "{n} usable rows cannot identify {p} parameters"
        )));
    }

    // Normal equations over the dummy-coded design matrix
    let mut xtx = vec![vec![0.0f64; p]; p];
    let mut xty = vec![0.0f64; p];
    let mut design_row = vec![0.0f64; p];
    for (y, xs, category) in &observations {
        design_row[0] = 1.0;
        for (i, x) in xs.iter().enumerate() {
            design_row[1 + i] = *x;
        }
        for (j, name) in category_names.iter().enumerate().skip(1) {
            design_row[continuous.len() + j] = if name == category { 1.0 } else { 0.0 };
        }
        for i in 0..p {
            for j in i..p {
                xtx[i][j] += design_row[i] * design_row[j];
            }
            xty[i] += design_row[i] * y;
        }
    }
    for i in 0..p {
        for j in 0..i {
            xtx[i][j] = xtx[j][i];
        }
    }

    let beta = solve_normal_equations(xtx, xty)?;

    let continuous_coefs = continuous
        .iter()
        .enumerate()
        .map(|(i, name)| ((*name).to_string(), beta[1 + i]))
        .collect();
    let categories = category_names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let coef = if j == 0 {
                0.0
            } else {
                beta[continuous.len() + j]
            };
            (name.clone(), coef)
        })
        .collect();

    Ok(FittedModel {
        response: response.to_string(),
        categorical: categorical.to_string(),
        reference: category_names[0].clone(),
        intercept: beta[0],
        continuous: continuous_coefs,
        categories,
    })
}

impl FittedModel {
    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn categorical(&self) -> &str {
        &self.categorical
    }

    /// The category folded into the intercept baseline
    pub fn reference_category(&self) -> &str {
        &self.reference
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn continuous_coefficients(&self) -> &[(String, f64)] {
        &self.continuous
    }

    pub fn category_coefficients(&self) -> &[(String, f64)] {
        &self.categories
    }

    /// Score one observation locally. `None` when the category was absent
    /// from the fit, mirroring the NULL a remote left join would produce.
    pub fn predict(&self, continuous_values: &[f64], category: &str) -> Option<f64> {
        if continuous_values.len() != self.continuous.len() {
            return None;
        }
        let cat_coef = self
            .categories
            .iter()
            .find(|(name, _)| name == category)?
            .1;
        let mut prediction = self.intercept + cat_coef;
        for ((_, coef), x) in self.continuous.iter().zip(continuous_values) {
            prediction += coef * x;
        }
        Some(prediction)
    }

    /// The coefficient lookup table: exactly one row per category seen at
    /// fit time, each carrying that category's score plus the shared
    /// intercept and continuous coefficients. Joins as the right side of a
    /// row-preserving left join (keys are unique by construction).
    pub fn coefficient_table(&self) -> Result<MaterializedTable> {
        let mut columns = vec![
            Column::new(self.categorical.clone(), ColumnType::Text),
            Column::new(format!("{}_score", self.categorical), ColumnType::Real),
            Column::new("intercept", ColumnType::Real),
        ];
        for (name, _) in &self.continuous {
            columns.push(Column::new(format!("{name}_score"), ColumnType::Real));
        }

        let mut table = MaterializedTable::new(columns);
        for (category, coef) in &self.categories {
            let mut row = vec![
                Value::Text(category.clone()),
                Value::Real(*coef),
                Value::Real(self.intercept),
            ];
            row.extend(self.continuous.iter().map(|(_, c)| Value::Real(*c)));
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// The fitted formula as an expression over the lookup-table columns:
    /// `intercept + {categorical}_score + Σ {c}_score * c`
    pub fn prediction_expr(&self) -> Expr {
        let mut expr = Expr::column("intercept").add(Expr::column(format!(
            "{}_score",
            self.categorical
        )));
        for (name, _) in &self.continuous {
            expr = expr.add(Expr::column(format!("{name}_score")).mul(Expr::column(name.clone())));
        }
        expr
    }
}

// Gaussian elimination with partial pivoting on [A | b]
fn solve_normal_equations(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let p = b.len();
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()))
        .max(1.0);
    let threshold = SINGULARITY_EPS * scale;

    for col in 0..p {
        let mut pivot = col;
        for row in (col + 1)..p {
            if a[row][col].abs() > a[pivot][col].abs() {
                pivot = row;
            }
        }
        if a[pivot][col].abs() < threshold {
            return Err(Error::RankDeficiency(
                "design matrix is singular; a predictor is collinear or a category is \
                 indistinguishable from the baseline"
                    .to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let pivot_row = a[col].clone();
        let pivot_b = b[col];
        for row in (col + 1)..p {
            let factor = a[row][col] / pivot_row[col];
            for c in col..p {
                a[row][c] -= factor * pivot_row[c];
            }
            b[row] -= factor * pivot_b;
        }
    }

    let mut x = vec![0.0f64; p];
    for i in (0..p).rev() {
        let mut sum = b[i];
        for j in (i + 1)..p {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
    }
    Ok(x)
}
