//! Scripted in-memory connection for executor tests
//!
//! Each data-access call consumes the next scripted reply. Calls, opens and
//! closes are recorded so tests can check connection lifecycle and the
//! parameters a request sent.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quill_executor::{
    Connection, ConnectionFactory, DbError, DbResult, Params, ResultSet, Value,
};

#[derive(Debug, thiserror::Error)]
#[error("duplicate key {0}")]
pub struct DuplicateKey(pub i64);

#[derive(Debug, thiserror::Error)]
#[error("deadlock victim")]
pub struct Deadlock;

#[derive(Debug, thiserror::Error)]
#[error("script exhausted or mismatched: {0}")]
pub struct ScriptError(pub String);

type ErrorFn = Box<dyn Fn() -> DbError + Send + Sync>;

/// One scripted reply
pub enum Reply {
    /// Result of `query`
    Rows(ResultSet),
    /// Result of `query_multiple`
    Sets(Vec<ResultSet>),
    /// Result of `execute`
    Affected(u64),
    /// Any call fails with this error
    Fail(ErrorFn),
}

impl Reply {
    pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Reply::Rows(ResultSet::from_values(columns, rows))
    }

    pub fn fail<E, F>(make: F) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn() -> E + Send + Sync + 'static,
    {
        Reply::Fail(Box::new(move || DbError::new(make())))
    }
}

/// A recorded call
#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub sql: String,
    pub params: Params,
    pub timeout: Option<Duration>,
}

#[derive(Default)]
pub struct Shared {
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Call>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Factory handing out scripted connections over one shared script
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    shared: Arc<Shared>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Reply) -> &Self {
        self.shared.script.lock().push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.shared.calls.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.shared.script.lock().len()
    }

    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for ScriptedFactory {
    fn create(&self) -> DbResult<Box<dyn Connection>> {
        Ok(Box::new(ScriptedConnection {
            shared: Arc::clone(&self.shared),
            open: false,
        }))
    }
}

pub struct ScriptedConnection {
    shared: Arc<Shared>,
    open: bool,
}

impl ScriptedConnection {
    fn next(
        &mut self,
        method: &'static str,
        sql: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> DbResult<Reply> {
        if !self.open {
            return Err(DbError::new(ScriptError(format!("{} on a closed connection", method))));
        }
        self.shared.calls.lock().push(Call {
            method,
            sql: sql.to_string(),
            params: params.clone(),
            timeout,
        });
        let reply = self
            .shared
            .script
            .lock()
            .pop_front()
            .ok_or_else(|| DbError::new(ScriptError(format!("no reply for {}", sql))))?;
        match reply {
            Reply::Fail(make) => Err(make()),
            other => Ok(other),
        }
    }
}

impl Connection for ScriptedConnection {
    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> DbResult<()> {
        self.open = true;
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> DbResult<()> {
        if self.open {
            self.open = false;
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn query(&mut self, sql: &str, params: &Params, timeout: Option<Duration>) -> DbResult<ResultSet> {
        match self.next("query", sql, params, timeout)? {
            Reply::Rows(set) => Ok(set),
            _ => Err(DbError::new(ScriptError(format!("query expected rows: {}", sql)))),
        }
    }

    fn query_multiple(
        &mut self,
        sql: &str,
        params: &Params,
        timeout: Option<Duration>,
    ) -> DbResult<Vec<ResultSet>> {
        match self.next("query_multiple", sql, params, timeout)? {
            Reply::Sets(sets) => Ok(sets),
            Reply::Rows(set) => Ok(vec![set]),
            _ => Err(DbError::new(ScriptError(format!("query_multiple expected sets: {}", sql)))),
        }
    }

    fn execute(&mut self, sql: &str, params: &Params, timeout: Option<Duration>) -> DbResult<u64> {
        match self.next("execute", sql, params, timeout)? {
            Reply::Affected(n) => Ok(n),
            _ => Err(DbError::new(ScriptError(format!("execute expected a count: {}", sql)))),
        }
    }
}
