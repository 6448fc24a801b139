//! Expression language parser implemented with nom
//!
//! This module provides the parser for the predicate and derived-column
//! expressions accepted by `filter`, `mutate`, and `select`: arithmetic over
//! columns and literals, comparisons, null checks, and boolean combinators.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, multispace1},
    combinator::{map, map_res, not, opt, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};
use std::collections::BTreeSet;

use crate::{Error, Result};

/// A literal value in the expression language
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// Arithmetic expression over columns and literals
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Column(String),
    BinaryOp {
        left: Box<Expr>,
        op: ArithOp,
        right: Box<Expr>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
    },
}

/// Boolean row condition
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    IsNull(Expr),
    IsNotNull(Expr),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Expr {
    pub fn column<S: Into<String>>(name: S) -> Self {
        Expr::Column(name.into())
    }

    pub fn integer(value: i64) -> Self {
        Expr::Literal(Literal::Integer(value))
    }

    pub fn real(value: f64) -> Self {
        Expr::Literal(Literal::Real(value))
    }

    pub fn call<S: Into<String>>(name: S, args: Vec<Expr>) -> Self {
        Expr::FunctionCall {
            name: name.into(),
            args,
        }
    }

    pub fn binary(left: Expr, op: ArithOp, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn add(self, rhs: Expr) -> Self {
        Expr::binary(self, ArithOp::Add, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Self {
        Expr::binary(self, ArithOp::Multiply, rhs)
    }

    /// Collect every column name the expression references
    pub fn referenced_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column(name) => {
                out.insert(name.clone());
            }
            Expr::BinaryOp { left, right, .. } => {
                left.referenced_columns(out);
                right.referenced_columns(out);
            }
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.referenced_columns(out);
                }
            }
        }
    }
}

impl Predicate {
    pub fn compare(left: Expr, op: CompareOp, right: Expr) -> Self {
        Predicate::Compare { left, op, right }
    }

    pub fn and(self, rhs: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(rhs))
    }

    pub fn referenced_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Predicate::Compare { left, right, .. } => {
                left.referenced_columns(out);
                right.referenced_columns(out);
            }
            Predicate::IsNull(expr) | Predicate::IsNotNull(expr) => expr.referenced_columns(out),
            Predicate::And(a, b) | Predicate::Or(a, b) => {
                a.referenced_columns(out);
                b.referenced_columns(out);
            }
            Predicate::Not(inner) => inner.referenced_columns(out),
        }
    }
}

/// Parse a complete arithmetic expression, rejecting trailing input
pub fn parse_expression(input: &str) -> Result<Expr> {
    match terminated(expression, multispace0).parse(input) {
        Ok(("", expr)) => Ok(expr),
        Ok((rest, _)) => Err(Error::Parse(format!(
            "unexpected trailing input in expression: '{rest}'"
        ))),
        Err(err) => Err(Error::Parse(format!("invalid expression '{input}': {err}"))),
    }
}

/// Parse a complete boolean predicate, rejecting trailing input
pub fn parse_predicate(input: &str) -> Result<Predicate> {
    match terminated(predicate, multispace0).parse(input) {
        Ok(("", pred)) => Ok(pred),
        Ok((rest, _)) => Err(Error::Parse(format!(
            "unexpected trailing input in predicate: '{rest}'"
        ))),
        Err(err) => Err(Error::Parse(format!("invalid predicate '{input}': {err}"))),
    }
}

// Keyword match that refuses to eat a prefix of a longer identifier
fn keyword<'a>(kw: &'static str, input: &'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(alt((alphanumeric1, tag("_"))))).parse(input)
}

const RESERVED: &[&str] = &["AND", "OR", "NOT", "IS", "NULL"];

fn identifier(input: &str) -> IResult<&str, &str> {
    let (rest, ident) = recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)?;
    if RESERVED.contains(&ident.to_ascii_uppercase().as_str()) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, ident))
}

// Parse predicate (OR has the lowest precedence)
fn predicate(input: &str) -> IResult<&str, Predicate> {
    let (input, left) = and_predicate(input)?;
    let (input, rights) = many0((
        delimited(multispace0, |i| keyword("OR", i), multispace0),
        and_predicate,
    ))
    .parse(input)?;

    Ok((
        input,
        rights.into_iter().fold(left, |acc, (_, right)| {
            Predicate::Or(Box::new(acc), Box::new(right))
        }),
    ))
}

fn and_predicate(input: &str) -> IResult<&str, Predicate> {
    let (input, left) = primary_predicate(input)?;
    let (input, rights) = many0((
        delimited(multispace0, |i| keyword("AND", i), multispace0),
        primary_predicate,
    ))
    .parse(input)?;

    Ok((
        input,
        rights.into_iter().fold(left, |acc, (_, right)| {
            Predicate::And(Box::new(acc), Box::new(right))
        }),
    ))
}

fn primary_predicate(input: &str) -> IResult<&str, Predicate> {
    preceded(
        multispace0,
        alt((not_predicate, null_check, paren_predicate, comparison)),
    )
    .parse(input)
}

fn not_predicate(input: &str) -> IResult<&str, Predicate> {
    let (input, _) = (|i| keyword("NOT", i)).parse(input)?;
    let (input, inner) = preceded(multispace1, primary_predicate).parse(input)?;
    Ok((input, Predicate::Not(Box::new(inner))))
}

fn paren_predicate(input: &str) -> IResult<&str, Predicate> {
    delimited(
        char('('),
        delimited(multispace0, predicate, multispace0),
        char(')'),
    )
    .parse(input)
}

// <expr> IS [NOT] NULL
fn null_check(input: &str) -> IResult<&str, Predicate> {
    let (input, expr) = expression(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = (|i| keyword("IS", i)).parse(input)?;
    let (input, negated) = opt(preceded(multispace1, |i| keyword("NOT", i))).parse(input)?;
    let (input, _) = multispace1(input)?;
    let (input, _) = (|i| keyword("NULL", i)).parse(input)?;

    Ok((
        input,
        if negated.is_some() {
            Predicate::IsNotNull(expr)
        } else {
            Predicate::IsNull(expr)
        },
    ))
}

fn comparison(input: &str) -> IResult<&str, Predicate> {
    let (input, left) = expression(input)?;
    let (input, op) = delimited(multispace0, compare_operator, multispace0).parse(input)?;
    let (input, right) = expression(input)?;

    Ok((input, Predicate::Compare { left, op, right }))
}

fn compare_operator(input: &str) -> IResult<&str, CompareOp> {
    alt((
        map(tag(">="), |_| CompareOp::GreaterThanOrEqual),
        map(tag("<="), |_| CompareOp::LessThanOrEqual),
        map(tag("!="), |_| CompareOp::NotEqual),
        map(tag("<>"), |_| CompareOp::NotEqual),
        map(tag("=="), |_| CompareOp::Equal),
        map(tag("="), |_| CompareOp::Equal),
        map(tag("<"), |_| CompareOp::LessThan),
        map(tag(">"), |_| CompareOp::GreaterThan),
    ))
    .parse(input)
}

// Parse expression (supports arithmetic operations)
fn expression(input: &str) -> IResult<&str, Expr> {
    additive_expression(input)
}

fn additive_expression(input: &str) -> IResult<&str, Expr> {
    let (input, left) = multiplicative_expression(input)?;
    let (input, rights) = many0((
        delimited(multispace0, additive_operator, multispace0),
        multiplicative_expression,
    ))
    .parse(input)?;

    Ok((
        input,
        rights
            .into_iter()
            .fold(left, |acc, (op, right)| Expr::BinaryOp {
                left: Box::new(acc),
                op,
                right: Box::new(right),
            }),
    ))
}

fn multiplicative_expression(input: &str) -> IResult<&str, Expr> {
    let (input, left) = primary_expression(input)?;
    let (input, rights) = many0((
        delimited(multispace0, multiplicative_operator, multispace0),
        primary_expression,
    ))
    .parse(input)?;

    Ok((
        input,
        rights
            .into_iter()
            .fold(left, |acc, (op, right)| Expr::BinaryOp {
                left: Box::new(acc),
                op,
                right: Box::new(right),
            }),
    ))
}

fn primary_expression(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            function_call,
            delimited(
                char('('),
                delimited(multispace0, expression, multispace0),
                char(')'),
            ),
            literal_value,
            map(identifier, |name| Expr::Column(name.to_string())),
        )),
    )
    .parse(input)
}

// name(arg, ...)
fn function_call(input: &str) -> IResult<&str, Expr> {
    let (input, name) = identifier(input)?;
    let (input, args) = delimited(
        preceded(multispace0, char('(')),
        nom::multi::separated_list0(delimited(multispace0, char(','), multispace0), expression),
        preceded(multispace0, char(')')),
    )
    .parse(input)?;

    Ok((
        input,
        Expr::FunctionCall {
            name: name.to_string(),
            args,
        },
    ))
}

fn additive_operator(input: &str) -> IResult<&str, ArithOp> {
    alt((
        map(char('+'), |_| ArithOp::Add),
        map(char('-'), |_| ArithOp::Subtract),
    ))
    .parse(input)
}

fn multiplicative_operator(input: &str) -> IResult<&str, ArithOp> {
    alt((
        map(char('*'), |_| ArithOp::Multiply),
        map(char('/'), |_| ArithOp::Divide),
        map(char('%'), |_| ArithOp::Modulo),
    ))
    .parse(input)
}

fn literal_value(input: &str) -> IResult<&str, Expr> {
    alt((
        map(|i| keyword("NULL", i), |_| Expr::Literal(Literal::Null)),
        map(text_literal, |s| Expr::Literal(Literal::Text(s))),
        map(real_literal, |f| Expr::Literal(Literal::Real(f))),
        map(integer_literal, |i| Expr::Literal(Literal::Integer(i))),
    ))
    .parse(input)
}

// Single-quoted text; embedded quotes are not supported
fn text_literal(input: &str) -> IResult<&str, String> {
    map(
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

fn real_literal(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize((opt(char('-')), digit1, char('.'), digit1)),
        |s: &str| s.parse::<f64>(),
    )
    .parse(input)
}

fn integer_literal(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
        s.parse::<i64>()
    })
    .parse(input)
}
