use std::fmt;
use std::io;

/// Custom error type for pushframe operations
#[derive(Debug)]
pub enum Error {
    /// Store unreachable, credentials rejected, unknown database, or a
    /// dialect with no wired driver. Fatal to the run, never retried.
    Connection(String),
    /// Table not found in the connected catalog
    TableNotFound(String),
    /// Column not found in the query's current output schema
    ColumnNotFound(String),
    /// The store rejected a generated statement; carries the SQL text
    Execution { message: String, sql: String },
    /// Degenerate design matrix at model-fit time
    RankDeficiency(String),
    /// Join or upload over incompatible column sets
    SchemaMismatch(String),
    /// Error while parsing an expression string
    Parse(String),
    /// Invalid composition (bad projection mix, bad sampling fraction, ...)
    Plan(String),
    /// I/O error from underlying file operations
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(msg) => write!(f, "Connection error: {msg}"),
            Error::TableNotFound(table) => write!(f, "Table '{table}' not found"),
            Error::ColumnNotFound(column) => write!(f, "Column '{column}' not found"),
            Error::Execution { message, sql } => {
                write!(f, "Execution error: {message}\nGenerated SQL: {sql}")
            }
            Error::RankDeficiency(msg) => write!(f, "Rank-deficient model fit: {msg}"),
            Error::SchemaMismatch(msg) => write!(f, "Schema mismatch: {msg}"),
            Error::Parse(msg) => write!(f, "Expression parse error: {msg}"),
            Error::Plan(msg) => write!(f, "Query planning error: {msg}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// Result type for pushframe operations
pub type Result<T> = std::result::Result<T, Error>;
