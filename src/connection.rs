//! Connection handle and catalog
//!
//! This module provides the SQLite-like handle over the store: open a
//! connection from parameters, list tables, create table references, and
//! materialize deferred queries. Materialization is where the deferred world
//! meets the store: collapse boundaries become `CREATE TEMP TABLE ... AS`
//! stages and locally supplied join sides are uploaded as temp tables before
//! the final statement runs.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{ToSqlOutput, ValueRef};

use crate::compile::{render_query, Dialect, SourceResolver};
use crate::query::{DeferredQuery, TableRef};
use crate::table::{Column, ColumnType, MaterializedTable, Value};
use crate::{Error, Result};

/// Connection parameters. Credentials are write-only: `Debug` redacts them.
#[derive(Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub dialect: Dialect,
}

impl ConnectParams {
    /// Parameters for the embedded SQLite driver; `database` is a file path
    /// or `:memory:`
    pub fn sqlite<S: Into<String>>(database: S) -> Self {
        ConnectParams {
            host: "localhost".to_string(),
            port: 0,
            database: database.into(),
            user: String::new(),
            password: String::new(),
            dialect: Dialect::Sqlite,
        }
    }

    pub fn in_memory() -> Self {
        Self::sqlite(":memory:")
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("dialect", &self.dialect)
            .finish()
    }
}

static STAGE_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Handle to an open store session. Not shared across threads; issue
/// parallel queries over independent connections.
pub struct Connection {
    conn: rusqlite::Connection,
    dialect: Dialect,
    /// Local tables already uploaded on this connection, by temp name
    uploaded: RefCell<HashSet<String>>,
}

impl Connection {
    /// Open a store session. Only the SQLite dialect has a wired driver;
    /// open failures are fatal to the run, with no retry.
    pub fn open(params: &ConnectParams) -> Result<Self> {
        if params.dialect != Dialect::Sqlite {
            return Err(Error::Connection(format!(
                "no driver wired for dialect '{}'; only sqlite connections are supported",
                params.dialect
            )));
        }
        let conn = if params.database == ":memory:" {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&params.database)
        }
        .map_err(|e| Error::Connection(e.to_string()))?;

        register_rand_uniform(&conn, fastrand::Rng::new())?;
        info!("connected to {} ({})", params.database, params.dialect);
        Ok(Connection {
            conn,
            dialect: params.dialect,
            uploaded: RefCell::new(HashSet::new()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&ConnectParams::in_memory())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Reseed the `rand_uniform()` SQL function. Sampling built on it
    /// becomes deterministic for a fixed seed and row order.
    pub fn set_sample_seed(&self, seed: u64) -> Result<()> {
        register_rand_uniform(&self.conn, fastrand::Rng::with_seed(seed))
    }

    /// Every table visible to this session, in store-defined order
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let sql = "SELECT name FROM sqlite_schema WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
                   UNION ALL SELECT name FROM sqlite_temp_schema WHERE type = 'table'";
        let exec_err = |e: rusqlite::Error| Error::Execution {
            message: e.to_string(),
            sql: sql.to_string(),
        };
        let mut stmt = self.conn.prepare(sql).map_err(exec_err)?;
        let mut rows = stmt.query([]).map_err(exec_err)?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().map_err(exec_err)? {
            names.push(row.get::<_, String>(0).map_err(exec_err)?);
        }
        Ok(names)
    }

    /// Create a reference to a named table, capturing its column list
    pub fn table(&self, name: &str) -> Result<TableRef> {
        if !self.list_tables()?.iter().any(|t| t == name) {
            return Err(Error::TableNotFound(name.to_string()));
        }
        let sql = format!("PRAGMA table_info({})", self.dialect.quote_ident(name));
        let exec_err = |e: rusqlite::Error| Error::Execution {
            message: e.to_string(),
            sql: sql.clone(),
        };
        let mut stmt = self.conn.prepare(&sql).map_err(exec_err)?;
        let mut rows = stmt.query([]).map_err(exec_err)?;
        let mut columns = Vec::new();
        while let Some(row) = rows.next().map_err(exec_err)? {
            columns.push(row.get::<_, String>(1).map_err(exec_err)?);
        }
        Ok(TableRef::new(name.to_string(), columns))
    }

    /// Execute a raw statement (DDL/DML escape hatch); returns affected rows
    pub fn execute_raw(&self, sql: &str) -> Result<usize> {
        debug!("executing: {sql}");
        self.conn.execute(sql, []).map_err(|e| Error::Execution {
            message: e.to_string(),
            sql: sql.to_string(),
        })
    }

    /// Execute a batch of semicolon-separated raw statements
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(|e| Error::Execution {
            message: e.to_string(),
            sql: sql.to_string(),
        })
    }

    /// Run a raw SELECT and materialize its result
    pub fn query_raw(&self, sql: &str) -> Result<MaterializedTable> {
        self.run_select(sql)
    }

    /// Upload a locally materialized table into the store as a temp table
    /// and return a reference to it, starting a fresh deferred lineage.
    pub fn register_local(&self, name: &str, table: &MaterializedTable) -> Result<TableRef> {
        if self.uploaded.borrow().contains(name) {
            return Err(Error::Plan(format!(
                "local table '{name}' is already registered on this connection"
            )));
        }
        self.upload_temp_table(name, table)?;
        Ok(TableRef::new(
            name.to_string(),
            table
                .column_names()
                .into_iter()
                .map(|s| s.to_string())
                .collect(),
        ))
    }

    /// Execute a deferred query and transfer every resulting row into local
    /// memory. No row-count limit is enforced here; bound the result with
    /// filters or sampling first.
    pub fn materialize(&self, query: &DeferredQuery) -> Result<MaterializedTable> {
        let mut resolver = StagingResolver {
            conn: self,
            staged: Vec::new(),
        };
        let sql = render_query(query, self.dialect, &mut resolver)?;
        let staged = resolver.staged;
        let result = self.run_select(&sql);
        for name in staged {
            let drop_sql = format!("DROP TABLE IF EXISTS {}", self.dialect.quote_ident(&name));
            let _ = self.conn.execute(&drop_sql, []);
        }
        result
    }

    fn run_select(&self, sql: &str) -> Result<MaterializedTable> {
        debug!("materializing: {sql}");
        let exec_err = |e: rusqlite::Error| Error::Execution {
            message: e.to_string(),
            sql: sql.to_string(),
        };
        let mut stmt = self.conn.prepare(sql).map_err(exec_err)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        let mut raw_rows: Vec<Vec<Value>> = Vec::new();
        let mut rows = stmt.query([]).map_err(exec_err)?;
        while let Some(row) = rows.next().map_err(exec_err)? {
            let mut out = Vec::with_capacity(column_names.len());
            for i in 0..column_names.len() {
                let value = match row.get_ref(i).map_err(exec_err)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(v) => Value::Integer(v),
                    ValueRef::Real(v) => Value::Real(v),
                    ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(_) => {
                        return Err(Error::Execution {
                            message: "BLOB values are not supported".to_string(),
                            sql: sql.to_string(),
                        })
                    }
                };
                out.push(value);
            }
            raw_rows.push(out);
        }
        drop(rows);

        let columns = infer_columns(&column_names, &raw_rows);
        let mut table = MaterializedTable::new(columns);
        for row in raw_rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    fn upload_temp_table(&self, name: &str, table: &MaterializedTable) -> Result<()> {
        if self.uploaded.borrow().contains(name) {
            return Ok(());
        }
        let quoted = self.dialect.quote_ident(name);
        let col_defs: Vec<String> = table
            .columns()
            .iter()
            .map(|c| format!("{} {}", self.dialect.quote_ident(&c.name), sql_type(c.ty)))
            .collect();
        let create = format!("CREATE TEMP TABLE {} ({})", quoted, col_defs.join(", "));
        self.conn.execute(&create, []).map_err(|e| Error::Execution {
            message: e.to_string(),
            sql: create.clone(),
        })?;

        let placeholders = vec!["?"; table.columns().len()].join(", ");
        let insert = format!("INSERT INTO {quoted} VALUES ({placeholders})");
        let mut stmt = self.conn.prepare(&insert).map_err(|e| Error::Execution {
            message: e.to_string(),
            sql: insert.clone(),
        })?;
        for row in table.rows() {
            stmt.execute(rusqlite::params_from_iter(row.iter()))
                .map_err(|e| Error::Execution {
                    message: e.to_string(),
                    sql: insert.clone(),
                })?;
        }

        debug!("uploaded local table '{}' ({} rows)", name, table.len());
        self.uploaded.borrow_mut().insert(name.to_string());
        Ok(())
    }
}

struct StagingResolver<'a> {
    conn: &'a Connection,
    /// Collapse stages created for this materialization, dropped afterwards
    staged: Vec<String>,
}

impl SourceResolver for StagingResolver<'_> {
    fn collapsed(&mut self, inner: &DeferredQuery, dialect: Dialect) -> Result<String> {
        let inner_sql = render_query(inner, dialect, self)?;
        let name = format!("pf_stage_{}", STAGE_SEQ.fetch_add(1, Ordering::Relaxed));
        let create = format!(
            "CREATE TEMP TABLE {} AS {}",
            dialect.quote_ident(&name),
            inner_sql
        );
        debug!("staging collapse: {create}");
        self.conn
            .conn
            .execute(&create, [])
            .map_err(|e| Error::Execution {
                message: e.to_string(),
                sql: create.clone(),
            })?;
        self.staged.push(name.clone());
        Ok(dialect.quote_ident(&name))
    }

    fn local_table(
        &mut self,
        name: &str,
        table: &MaterializedTable,
        dialect: Dialect,
    ) -> Result<String> {
        self.conn.upload_temp_table(name, table)?;
        Ok(dialect.quote_ident(name))
    }
}

fn register_rand_uniform(conn: &rusqlite::Connection, rng: fastrand::Rng) -> Result<()> {
    let rng = std::cell::RefCell::new(rng);
    conn.create_scalar_function("rand_uniform", 0, FunctionFlags::SQLITE_UTF8, move |_ctx| {
        Ok(rng.borrow_mut().f64())
    })
    .map_err(|e| Error::Connection(format!("failed to register rand_uniform: {e}")))
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Integer => "INTEGER",
        ColumnType::Real => "REAL",
        ColumnType::Text => "TEXT",
    }
}

// Value kinds come from the data: first non-null value decides, text wins
// for all-null columns
fn infer_columns(names: &[String], rows: &[Vec<Value>]) -> Vec<Column> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let ty = rows
                .iter()
                .find_map(|row| match &row[i] {
                    Value::Integer(_) => Some(ColumnType::Integer),
                    Value::Real(_) => Some(ColumnType::Real),
                    Value::Text(_) => Some(ColumnType::Text),
                    Value::Null => None,
                })
                .unwrap_or(ColumnType::Text);
            Column::new(name.clone(), ty)
        })
        .collect()
}

impl rusqlite::types::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
        })
    }
}
