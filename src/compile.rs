//! SQL generation
//!
//! Pure rendering of expressions and deferred query chains to dialect SQL
//! text. Rendering never executes anything; the `SourceResolver` seam lets
//! the connection substitute staged temp tables for collapse boundaries and
//! locally supplied join sides while reusing the same renderer.

use std::fmt;
use std::str::FromStr;

use crate::parser::{ArithOp, CompareOp, Expr, Literal, Predicate};
use crate::query::{Agg, AggFunc, DeferredQuery, JoinRight, Op, Source};
use crate::table::MaterializedTable;
use crate::{Error, Result};

/// Name of the uniform-random function in the expression language
pub const RANDOM_UNIFORM: &str = "random_uniform";

/// Target query-language dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
            _ => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Rendering of a uniform draw in [0, 1). SQLite has no built-in real
    /// random, so the connection registers `rand_uniform()` as a function.
    fn random_uniform_sql(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "rand_uniform()",
            Dialect::Postgres => "random()",
            Dialect::MySql => "rand()",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "sqlite"),
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::MySql => write!(f, "mysql"),
        }
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            other => Err(Error::Connection(format!("unknown dialect '{other}'"))),
        }
    }
}

pub fn render_expr(expr: &Expr, dialect: Dialect) -> String {
    match expr {
        Expr::Literal(lit) => render_literal(lit),
        Expr::Column(name) => dialect.quote_ident(name),
        Expr::BinaryOp { left, op, right } => {
            let op_str = match op {
                ArithOp::Add => "+",
                ArithOp::Subtract => "-",
                ArithOp::Multiply => "*",
                ArithOp::Divide => "/",
                ArithOp::Modulo => "%",
            };
            format!(
                "({} {} {})",
                render_expr(left, dialect),
                op_str,
                render_expr(right, dialect)
            )
        }
        Expr::FunctionCall { name, args } => {
            if name == RANDOM_UNIFORM && args.is_empty() {
                return dialect.random_uniform_sql().to_string();
            }
            let rendered: Vec<String> = args.iter().map(|a| render_expr(a, dialect)).collect();
            format!("{}({})", name, rendered.join(", "))
        }
    }
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Integer(i) => i.to_string(),
        // Debug formatting keeps the decimal point on round reals
        Literal::Real(f) => format!("{f:?}"),
        Literal::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Literal::Null => "NULL".to_string(),
    }
}

pub fn render_predicate(pred: &Predicate, dialect: Dialect) -> String {
    match pred {
        Predicate::Compare { left, op, right } => {
            let op_str = match op {
                CompareOp::Equal => "=",
                CompareOp::NotEqual => "<>",
                CompareOp::LessThan => "<",
                CompareOp::LessThanOrEqual => "<=",
                CompareOp::GreaterThan => ">",
                CompareOp::GreaterThanOrEqual => ">=",
            };
            format!(
                "({} {} {})",
                render_expr(left, dialect),
                op_str,
                render_expr(right, dialect)
            )
        }
        Predicate::IsNull(expr) => format!("({} IS NULL)", render_expr(expr, dialect)),
        Predicate::IsNotNull(expr) => format!("({} IS NOT NULL)", render_expr(expr, dialect)),
        Predicate::And(a, b) => format!(
            "({} AND {})",
            render_predicate(a, dialect),
            render_predicate(b, dialect)
        ),
        Predicate::Or(a, b) => format!(
            "({} OR {})",
            render_predicate(a, dialect),
            render_predicate(b, dialect)
        ),
        Predicate::Not(inner) => format!("(NOT {})", render_predicate(inner, dialect)),
    }
}

/// How collapse boundaries and local join sides become FROM targets.
///
/// The inline resolver nests subqueries and never touches a store; the
/// connection's staging resolver creates temp tables instead.
pub(crate) trait SourceResolver {
    fn collapsed(&mut self, inner: &DeferredQuery, dialect: Dialect) -> Result<String>;
    fn local_table(&mut self, name: &str, table: &MaterializedTable, dialect: Dialect)
        -> Result<String>;
}

pub(crate) struct InlineResolver;

impl SourceResolver for InlineResolver {
    fn collapsed(&mut self, inner: &DeferredQuery, dialect: Dialect) -> Result<String> {
        Ok(format!("({})", render_query(inner, dialect, self)?))
    }

    fn local_table(
        &mut self,
        name: &str,
        _table: &MaterializedTable,
        dialect: Dialect,
    ) -> Result<String> {
        // The name the upload step will use when the query is materialized
        Ok(dialect.quote_ident(name))
    }
}

/// Render a full deferred query chain to a SELECT statement
pub(crate) fn render_query(
    query: &DeferredQuery,
    dialect: Dialect,
    resolver: &mut dyn SourceResolver,
) -> Result<String> {
    let mut target = match query.source() {
        Source::Table(table_ref) => dialect.quote_ident(table_ref.name()),
        Source::Collapsed(inner) => resolver.collapsed(inner, dialect)?,
    };

    let ops = merge_filters(query.ops());
    let mut sql = format!("SELECT * FROM {target}");
    for (depth, op) in ops.iter().enumerate() {
        sql = render_op(op, &target, depth, dialect, resolver)?;
        target = format!("({sql})");
    }
    Ok(sql)
}

// Adjacent filters share one WHERE clause, conjoined in call order
fn merge_filters(ops: &[Op]) -> Vec<Op> {
    let mut merged: Vec<Op> = Vec::with_capacity(ops.len());
    for op in ops {
        if let (Some(Op::Filter(prev)), Op::Filter(next)) = (merged.last_mut(), op) {
            *prev = prev.clone().and(next.clone());
            continue;
        }
        merged.push(op.clone());
    }
    merged
}

fn render_op(
    op: &Op,
    target: &str,
    depth: usize,
    dialect: Dialect,
    resolver: &mut dyn SourceResolver,
) -> Result<String> {
    match op {
        Op::Filter(pred) => Ok(format!(
            "SELECT * FROM {target} AS t{depth} WHERE {}",
            render_predicate(pred, dialect)
        )),
        Op::Project(items) => {
            let list: Vec<String> = items
                .iter()
                .map(|(name, expr)| match expr {
                    Some(e) => format!("{} AS {}", render_expr(e, dialect), dialect.quote_ident(name)),
                    None => dialect.quote_ident(name),
                })
                .collect();
            Ok(format!(
                "SELECT {} FROM {target} AS t{depth}",
                list.join(", ")
            ))
        }
        Op::Mutate { name, expr } => Ok(format!(
            "SELECT *, {} AS {} FROM {target} AS t{depth}",
            render_expr(expr, dialect),
            dialect.quote_ident(name)
        )),
        Op::LeftJoin {
            right,
            on,
            right_cols,
        } => {
            let right_target = match right {
                JoinRight::Deferred(inner) => format!("({})", render_query(inner, dialect, resolver)?),
                JoinRight::Local { name, table } => resolver.local_table(name, table, dialect)?,
            };
            let mut projection = vec![format!("l{depth}.*")];
            projection.extend(
                right_cols
                    .iter()
                    .map(|c| format!("r{depth}.{}", dialect.quote_ident(c))),
            );
            let on_clause: Vec<String> = on
                .iter()
                .map(|(left, right)| {
                    format!(
                        "l{depth}.{} = r{depth}.{}",
                        dialect.quote_ident(left),
                        dialect.quote_ident(right)
                    )
                })
                .collect();
            Ok(format!(
                "SELECT {} FROM {target} AS l{depth} LEFT JOIN {right_target} AS r{depth} ON {}",
                projection.join(", "),
                on_clause.join(" AND ")
            ))
        }
        Op::Aggregate { keys, aggs } => {
            let key_list: Vec<String> = keys.iter().map(|k| dialect.quote_ident(k)).collect();
            let mut projection = key_list.clone();
            projection.extend(aggs.iter().map(|agg| render_agg(agg, dialect)));
            Ok(format!(
                "SELECT {} FROM {target} AS t{depth} GROUP BY {}",
                projection.join(", "),
                key_list.join(", ")
            ))
        }
    }
}

fn render_agg(agg: &Agg, dialect: Dialect) -> String {
    let func = match agg.func {
        AggFunc::Mean => "AVG",
        AggFunc::Sum => "SUM",
        AggFunc::Count => "COUNT",
        AggFunc::Min => "MIN",
        AggFunc::Max => "MAX",
    };
    let arg = match &agg.column {
        Some(col) => dialect.quote_ident(col),
        None => "*".to_string(),
    };
    format!("{}({}) AS {}", func, arg, dialect.quote_ident(&agg.alias))
}
