//! Locally materialized tables
//!
//! A `MaterializedTable` is the only row-bearing type in the crate: a finite,
//! ordered sequence of fixed-schema rows produced by executing a deferred
//! query (or built by hand, e.g. the coefficient lookup table). The schema is
//! fixed at creation and never changes.

use std::fmt;

use crate::{Error, Result};

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

impl Value {
    /// Numeric view of the value; integers widen to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Null => write!(f, "NULL"),
        }
    }
}

/// Column value kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    pub fn new<S: Into<String>>(name: S, ty: ColumnType) -> Self {
        Column {
            name: name.into(),
            ty,
        }
    }
}

/// Number of rows shown by the `Display` preview
pub const PREVIEW_ROWS: usize = 10;

/// A fully materialized, fixed-schema table resident in local memory
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedTable {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl MaterializedTable {
    pub fn new(columns: Vec<Column>) -> Self {
        MaterializedTable {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row; the arity must match the schema
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::SchemaMismatch(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value at (row, column name), if both exist
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Keep only the first `n` rows. Combined with over-sampling this gives
    /// an exact-count sample, which `approximate_sample` alone does not.
    pub fn truncate(&mut self, n: usize) {
        self.rows.truncate(n);
    }
}

impl fmt::Display for MaterializedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Column widths over header + previewed rows, capped at 20 chars
        let preview = &self.rows[..self.rows.len().min(PREVIEW_ROWS)];
        let mut col_widths: Vec<usize> = self.columns.iter().map(|c| c.name.len()).collect();
        for row in preview {
            for (i, cell) in row.iter().enumerate() {
                col_widths[i] = col_widths[i].max(cell.to_string().len()).min(20);
            }
        }

        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, "|")?;
            }
            write!(f, " {:width$} ", col.name, width = col_widths[i])?;
        }
        writeln!(f)?;

        for (i, &width) in col_widths.iter().enumerate() {
            if i > 0 {
                write!(f, "+")?;
            }
            write!(f, "-{}-", "-".repeat(width))?;
        }
        writeln!(f)?;

        for row in preview {
            for (i, cell) in row.iter().enumerate() {
                if i > 0 {
                    write!(f, "|")?;
                }
                let cell_str = cell.to_string();
                let truncated = if cell_str.len() > col_widths[i] {
                    format!("{}...", &cell_str[..col_widths[i].saturating_sub(3)])
                } else {
                    cell_str
                };
                write!(f, " {:width$} ", truncated, width = col_widths[i])?;
            }
            writeln!(f)?;
        }

        if self.rows.len() > PREVIEW_ROWS {
            writeln!(f, "... ({} rows total)", self.rows.len())
        } else {
            writeln!(f, "({} rows)", self.rows.len())
        }
    }
}
