//! Deferred query builder
//!
//! A `DeferredQuery` is an immutable description of a relational
//! transformation: a source plus an ordered chain of filter / project /
//! mutate / join / aggregate operations. Composing never mutates and never
//! executes; every method takes `&self` and returns a fresh value. The
//! builder tracks the exact output column list through each operation, so
//! unknown names fail at composition time rather than inside the store.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::compile::{render_query, Dialect, InlineResolver};
use crate::parser::{parse_expression, parse_predicate, Expr, Predicate};
use crate::table::MaterializedTable;
use crate::{Error, Result};

/// Named pointer into the remote store, with the column list captured when
/// the reference was created. Immutable.
#[derive(Debug, Clone)]
pub struct TableRef {
    name: String,
    columns: Vec<String>,
}

impl TableRef {
    pub(crate) fn new(name: String, columns: Vec<String>) -> Self {
        TableRef { name, columns }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The identity deferred query over this table
    pub fn query(&self) -> DeferredQuery {
        DeferredQuery {
            source: Source::Table(self.clone()),
            ops: Vec::new(),
            columns: self.columns.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Source {
    Table(TableRef),
    Collapsed(Box<DeferredQuery>),
}

#[derive(Debug, Clone)]
pub(crate) enum JoinRight {
    Deferred(Box<DeferredQuery>),
    Local {
        name: String,
        table: MaterializedTable,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum Op {
    Filter(Predicate),
    /// Explicit projection: output name plus `None` for a passthrough column
    /// or `Some(expr)` for a derived one
    Project(Vec<(String, Option<Expr>)>),
    Mutate {
        name: String,
        expr: Expr,
    },
    LeftJoin {
        right: JoinRight,
        on: Vec<(String, String)>,
        /// Right-side columns appended to the output (keys excluded)
        right_cols: Vec<String>,
    },
    Aggregate {
        keys: Vec<String>,
        aggs: Vec<Agg>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Mean,
    Sum,
    Count,
    Min,
    Max,
}

/// One aggregate output column
#[derive(Debug, Clone)]
pub struct Agg {
    pub(crate) func: AggFunc,
    pub(crate) column: Option<String>,
    pub(crate) alias: String,
}

impl Agg {
    pub fn mean<S: Into<String>, A: Into<String>>(column: S, alias: A) -> Self {
        Agg {
            func: AggFunc::Mean,
            column: Some(column.into()),
            alias: alias.into(),
        }
    }

    pub fn sum<S: Into<String>, A: Into<String>>(column: S, alias: A) -> Self {
        Agg {
            func: AggFunc::Sum,
            column: Some(column.into()),
            alias: alias.into(),
        }
    }

    pub fn min<S: Into<String>, A: Into<String>>(column: S, alias: A) -> Self {
        Agg {
            func: AggFunc::Min,
            column: Some(column.into()),
            alias: alias.into(),
        }
    }

    pub fn max<S: Into<String>, A: Into<String>>(column: S, alias: A) -> Self {
        Agg {
            func: AggFunc::Max,
            column: Some(column.into()),
            alias: alias.into(),
        }
    }

    /// Row count per group
    pub fn count<A: Into<String>>(alias: A) -> Self {
        Agg {
            func: AggFunc::Count,
            column: None,
            alias: alias.into(),
        }
    }
}

/// One entry of a `select` projection
#[derive(Debug, Clone)]
pub enum SelectItem {
    Keep(String),
    Exclude(String),
    Derive { name: String, expression: String },
}

impl SelectItem {
    pub fn keep<S: Into<String>>(name: S) -> Self {
        SelectItem::Keep(name.into())
    }

    pub fn exclude<S: Into<String>>(name: S) -> Self {
        SelectItem::Exclude(name.into())
    }

    pub fn derive<S: Into<String>, E: Into<String>>(name: S, expression: E) -> Self {
        SelectItem::Derive {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

static LOCAL_JOIN_SEQ: AtomicUsize = AtomicUsize::new(0);

/// An immutable, composable, unevaluated relational transformation
#[derive(Debug, Clone)]
pub struct DeferredQuery {
    source: Source,
    ops: Vec<Op>,
    columns: Vec<String>,
}

impl DeferredQuery {
    pub(crate) fn source(&self) -> &Source {
        &self.source
    }

    pub(crate) fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Output column names of the full chain, in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn with_op(&self, op: Op, columns: Vec<String>) -> DeferredQuery {
        let mut ops = self.ops.clone();
        ops.push(op);
        DeferredQuery {
            source: self.source.clone(),
            ops,
            columns,
        }
    }

    fn check_columns(&self, referenced: &BTreeSet<String>) -> Result<()> {
        for name in referenced {
            if !self.columns.iter().any(|c| c == name) {
                return Err(Error::ColumnNotFound(name.clone()));
            }
        }
        Ok(())
    }

    /// Append a conjunctive row condition
    pub fn filter(&self, predicate: &str) -> Result<DeferredQuery> {
        self.filter_pred(parse_predicate(predicate)?)
    }

    pub(crate) fn filter_pred(&self, predicate: Predicate) -> Result<DeferredQuery> {
        let mut referenced = BTreeSet::new();
        predicate.referenced_columns(&mut referenced);
        self.check_columns(&referenced)?;
        Ok(self.with_op(Op::Filter(predicate), self.columns.clone()))
    }

    /// Add a derived column, or replace an existing one
    pub fn mutate(&self, name: &str, expression: &str) -> Result<DeferredQuery> {
        self.mutate_expr(name, parse_expression(expression)?)
    }

    pub(crate) fn mutate_expr(&self, name: &str, expr: Expr) -> Result<DeferredQuery> {
        let mut referenced = BTreeSet::new();
        expr.referenced_columns(&mut referenced);
        self.check_columns(&referenced)?;

        if self.columns.iter().any(|c| c == name) {
            // Replacement compiles to an explicit projection
            let items: Vec<(String, Option<Expr>)> = self
                .columns
                .iter()
                .map(|c| {
                    if c == name {
                        (c.clone(), Some(expr.clone()))
                    } else {
                        (c.clone(), None)
                    }
                })
                .collect();
            return Ok(self.with_op(Op::Project(items), self.columns.clone()));
        }

        let mut columns = self.columns.clone();
        columns.push(name.to_string());
        Ok(self.with_op(
            Op::Mutate {
                name: name.to_string(),
                expr,
            },
            columns,
        ))
    }

    /// Project to the given items. All-exclusion keeps the remaining columns
    /// in their current order; keep/derive lists the output in the given
    /// order. Mixing exclusions with keep/derive is rejected.
    pub fn select(&self, items: &[SelectItem]) -> Result<DeferredQuery> {
        if items.is_empty() {
            return Err(Error::Plan("select requires at least one item".to_string()));
        }
        let has_exclude = items.iter().any(|i| matches!(i, SelectItem::Exclude(_)));
        let has_positive = items.iter().any(|i| !matches!(i, SelectItem::Exclude(_)));
        if has_exclude && has_positive {
            return Err(Error::Plan(
                "cannot mix excluded columns with kept or derived columns".to_string(),
            ));
        }

        let projection: Vec<(String, Option<Expr>)> = if has_exclude {
            let mut excluded = BTreeSet::new();
            for item in items {
                if let SelectItem::Exclude(name) = item {
                    if !self.columns.iter().any(|c| c == name) {
                        return Err(Error::ColumnNotFound(name.clone()));
                    }
                    excluded.insert(name.clone());
                }
            }
            self.columns
                .iter()
                .filter(|c| !excluded.contains(*c))
                .map(|c| (c.clone(), None))
                .collect()
        } else {
            let mut projection = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    SelectItem::Keep(name) => {
                        if !self.columns.iter().any(|c| c == name) {
                            return Err(Error::ColumnNotFound(name.clone()));
                        }
                        projection.push((name.clone(), None));
                    }
                    SelectItem::Derive { name, expression } => {
                        let expr = parse_expression(expression)?;
                        let mut referenced = BTreeSet::new();
                        expr.referenced_columns(&mut referenced);
                        self.check_columns(&referenced)?;
                        projection.push((name.clone(), Some(expr)));
                    }
                    SelectItem::Exclude(_) => unreachable!(),
                }
            }
            projection
        };

        if projection.is_empty() {
            return Err(Error::Plan("projection would drop every column".to_string()));
        }
        let mut seen = BTreeSet::new();
        for (name, _) in &projection {
            if !seen.insert(name.clone()) {
                return Err(Error::Plan(format!("duplicate output column '{name}'")));
            }
        }

        let columns: Vec<String> = projection.iter().map(|(n, _)| n.clone()).collect();
        Ok(self.with_op(Op::Project(projection), columns))
    }

    /// Partition rows by equal key values; finish with `aggregate`
    pub fn group_by(&self, keys: &[&str]) -> Result<GroupedQuery> {
        for key in keys {
            if !self.columns.iter().any(|c| c == key) {
                return Err(Error::ColumnNotFound((*key).to_string()));
            }
        }
        Ok(GroupedQuery {
            base: self.clone(),
            keys: keys.iter().map(|k| (*k).to_string()).collect(),
        })
    }

    /// Row-preserving left join against another deferred query
    pub fn left_join(&self, right: &DeferredQuery, on: &[(&str, &str)]) -> Result<DeferredQuery> {
        self.join_with(JoinRight::Deferred(Box::new(right.clone())), right.columns(), on)
    }

    /// Row-preserving left join against a locally materialized table. The
    /// table is uploaded into the store's execution context as a temp table
    /// before the join is compiled.
    pub fn left_join_local(
        &self,
        right: &MaterializedTable,
        on: &[(&str, &str)],
    ) -> Result<DeferredQuery> {
        let right_cols: Vec<String> = right
            .column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        let name = format!(
            "pf_lookup_{}",
            LOCAL_JOIN_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        self.join_with(
            JoinRight::Local {
                name,
                table: right.clone(),
            },
            &right_cols,
            on,
        )
    }

    fn join_with(
        &self,
        right: JoinRight,
        right_columns: &[String],
        on: &[(&str, &str)],
    ) -> Result<DeferredQuery> {
        if on.is_empty() {
            return Err(Error::Plan("join requires at least one key pair".to_string()));
        }
        for (left_key, right_key) in on {
            if !self.columns.iter().any(|c| c == left_key) {
                return Err(Error::SchemaMismatch(format!(
                    "join key '{left_key}' is not a column of the left side"
                )));
            }
            if !right_columns.iter().any(|c| c == right_key) {
                return Err(Error::SchemaMismatch(format!(
                    "join key '{right_key}' is not a column of the right side"
                )));
            }
        }

        let right_keys: BTreeSet<&str> = on.iter().map(|(_, r)| *r).collect();
        let right_cols: Vec<String> = right_columns
            .iter()
            .filter(|c| !right_keys.contains(c.as_str()))
            .cloned()
            .collect();
        for col in &right_cols {
            if self.columns.iter().any(|c| c == col) {
                return Err(Error::SchemaMismatch(format!(
                    "join would duplicate column '{col}'"
                )));
            }
        }

        let mut columns = self.columns.clone();
        columns.extend(right_cols.iter().cloned());
        Ok(self.with_op(
            Op::LeftJoin {
                right,
                on: on
                    .iter()
                    .map(|(l, r)| ((*l).to_string(), (*r).to_string()))
                    .collect(),
                right_cols,
            },
            columns,
        ))
    }

    /// Freeze the current chain as an opaque new base. Materialization
    /// stages the inner query inside the store; no data is transferred
    /// locally.
    pub fn collapse(&self) -> DeferredQuery {
        DeferredQuery {
            source: Source::Collapsed(Box::new(self.clone())),
            ops: Vec::new(),
            columns: self.columns.clone(),
        }
    }

    /// Render the generated SQL for inspection. Never executes.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        render_query(self, dialect, &mut InlineResolver)
            .expect("inline SQL rendering is infallible")
    }
}

/// A deferred query with grouping keys attached, awaiting its aggregates
#[derive(Debug, Clone)]
pub struct GroupedQuery {
    base: DeferredQuery,
    keys: Vec<String>,
}

impl GroupedQuery {
    /// One output row per distinct key combination. Aggregation ignores
    /// NULLs in the aggregated column (store default, not overridable).
    pub fn aggregate(&self, aggs: &[Agg]) -> Result<DeferredQuery> {
        if aggs.is_empty() {
            return Err(Error::Plan(
                "aggregate requires at least one output column".to_string(),
            ));
        }
        let mut columns = self.keys.clone();
        for agg in aggs {
            if let Some(col) = &agg.column {
                if !self.base.columns.iter().any(|c| c == col) {
                    return Err(Error::ColumnNotFound(col.clone()));
                }
            }
            if columns.iter().any(|c| c == &agg.alias) {
                return Err(Error::Plan(format!(
                    "duplicate aggregate output column '{}'",
                    agg.alias
                )));
            }
            columns.push(agg.alias.clone());
        }

        Ok(self.base.with_op(
            Op::Aggregate {
                keys: self.keys.clone(),
                aggs: aggs.to_vec(),
            },
            columns,
        ))
    }
}
