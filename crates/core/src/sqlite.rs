//! SQLite connection adapter (feature `sqlite`)
//!
//! Adapts `rusqlite` to the [`Connection`] / [`ConnectionFactory`] traits.
//! Parameters are bound by name, and only those a statement actually
//! references are bound to it, so one parameter list can serve a
//! multi-statement batch. `execute` runs every statement of a batch and
//! sums the affected rows.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::OpenFlags;
use tracing::debug;

use crate::error::DbError;
use crate::row::{Params, ResultSet, Row, Value};
use crate::traits::{Connection, ConnectionFactory, DbResult};

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    SharedMemory(String),
}

impl Target {
    fn connect(&self) -> rusqlite::Result<rusqlite::Connection> {
        match self {
            Target::File(path) => rusqlite::Connection::open(path),
            Target::SharedMemory(name) => rusqlite::Connection::open_with_flags(
                format!("file:{}?mode=memory&cache=shared", name),
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            ),
        }
    }
}

/// Creates [`SqliteConnection`]s against one database
pub struct SqliteConnectionFactory {
    target: Target,
    // Keeps a shared in-memory database alive between connections
    _keeper: Option<Mutex<rusqlite::Connection>>,
}

impl SqliteConnectionFactory {
    /// Factory for a database file
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            target: Target::File(path.as_ref().to_path_buf()),
            _keeper: None,
        }
    }

    /// Factory for a named in-memory database shared by all its connections
    pub fn memory(name: &str) -> DbResult<Self> {
        let target = Target::SharedMemory(name.to_string());
        let keeper = target.connect().map_err(DbError::new)?;
        Ok(Self {
            target,
            _keeper: Some(Mutex::new(keeper)),
        })
    }

    /// Shareable handle
    pub fn into_shared(self) -> Arc<dyn ConnectionFactory> {
        Arc::new(self)
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn create(&self) -> DbResult<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnection {
            target: self.target.clone(),
            conn: None,
        }))
    }
}

/// A lazily opened SQLite connection
pub struct SqliteConnection {
    target: Target,
    conn: Option<rusqlite::Connection>,
}

impl SqliteConnection {
    fn handle(&self, timeout: Option<Duration>) -> DbResult<&rusqlite::Connection> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| DbError::new(rusqlite::Error::InvalidQuery))?;
        if let Some(timeout) = timeout {
            conn.busy_timeout(timeout).map_err(DbError::new)?;
        }
        Ok(conn)
    }
}

impl Connection for SqliteConnection {
    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn open(&mut self) -> DbResult<()> {
        if self.conn.is_none() {
            self.conn = Some(self.target.connect().map_err(DbError::new)?);
            debug!(target: "quill::sql", target_db = ?self.target, "SQLite connection opened");
        }
        Ok(())
    }

    fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| DbError::new(e))?;
        }
        Ok(())
    }

    fn query(&mut self, sql: &str, params: &Params, timeout: Option<Duration>) -> DbResult<ResultSet> {
        let conn = self.handle(timeout)?;
        let mut stmt = conn.prepare(sql).map_err(DbError::new)?;
        read_statement(&mut stmt, params).map_err(DbError::new)
    }

    fn query_multiple(
        &mut self,
        sql: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> DbResult<Vec<ResultSet>> {
        let conn = self.handle(timeout)?;
        let mut batch = rusqlite::Batch::new(conn, sql);
        let mut sets = Vec::new();
        while let Some(mut stmt) = batch.next().map_err(DbError::new)? {
            sets.push(read_statement(&mut stmt, params).map_err(DbError::new)?);
        }
        Ok(sets)
    }

    fn execute(&mut self, sql: &str, params: &Params, timeout: Option<Duration>) -> DbResult<u64> {
        let conn = self.handle(timeout)?;
        let mut batch = rusqlite::Batch::new(conn, sql);
        let mut affected = 0u64;
        while let Some(mut stmt) = batch.next().map_err(DbError::new)? {
            bind(&mut stmt, params).map_err(DbError::new)?;
            affected += stmt.raw_execute().map_err(DbError::new)? as u64;
        }
        Ok(affected)
    }
}

fn bind(stmt: &mut rusqlite::Statement<'_>, params: &Params) -> rusqlite::Result<()> {
    for (name, value) in params.iter() {
        for sigil in [':', '@', '$'] {
            if let Some(index) = stmt.parameter_index(&format!("{}{}", sigil, name))? {
                stmt.raw_bind_parameter(index, to_sql(value))?;
            }
        }
    }
    Ok(())
}

fn read_statement(stmt: &mut rusqlite::Statement<'_>, params: &Params) -> rusqlite::Result<ResultSet> {
    bind(stmt, params)?;
    let columns: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(from_sql(row.get_ref(i)?));
        }
        out.push(Row::new(Arc::clone(&columns), values));
    }
    Ok(ResultSet::new(out))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}
