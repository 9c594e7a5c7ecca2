//! Scripted in-memory session for testing.
//!
//! Serves a fixed list of rows and records every call so tests can assert the
//! order of cursor, fallback and release steps.

use super::{ColumnInfo, QuerySession, Row, RowSet};
use crate::error::{Result, RunnerError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// A call observed by a [`MockSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ReadCursor { limit: usize },
    CloseCursor,
    ExecuteDirect,
    Close,
}

/// Shared handle to the calls recorded by a [`MockSession`].
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<SessionEvent>>>);

impl EventLog {
    fn push(&self, event: SessionEvent) {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    /// Returns the events recorded so far.
    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// A session that returns predefined rows.
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    columns: Vec<ColumnInfo>,
    rows: Vec<Row>,
    fail_cursor: bool,
    fail_direct: bool,
    fail_close_cursor: bool,
    fail_release: bool,
    events: EventLog,
}

impl MockSession {
    /// Creates a session whose server holds `rows` under a single `value` column.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self {
            columns: vec![ColumnInfo::new("value", "text")],
            rows,
            ..Default::default()
        }
    }

    /// Makes `read_cursor` fail as it does for multi-statement text.
    pub fn failing_cursor(mut self) -> Self {
        self.fail_cursor = true;
        self
    }

    pub fn failing_direct(mut self) -> Self {
        self.fail_direct = true;
        self
    }

    pub fn failing_close_cursor(mut self) -> Self {
        self.fail_close_cursor = true;
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    /// Returns a handle that keeps observing calls after the session is consumed.
    pub fn events(&self) -> EventLog {
        self.events.clone()
    }
}

#[async_trait]
impl QuerySession for MockSession {
    async fn read_cursor(&mut self, _sql: &str, limit: usize) -> Result<RowSet> {
        self.events.push(SessionEvent::ReadCursor { limit });
        if self.fail_cursor {
            return Err(RunnerError::query(
                "cannot insert multiple commands into a prepared statement",
            ));
        }
        let rows = self.rows.iter().take(limit).cloned().collect();
        Ok(RowSet::new(self.columns.clone(), rows))
    }

    async fn close_cursor(&mut self) -> Result<()> {
        self.events.push(SessionEvent::CloseCursor);
        if self.fail_close_cursor {
            return Err(RunnerError::query("cursor \"pg_runner_cursor\" does not exist"));
        }
        Ok(())
    }

    async fn execute_direct(&mut self, _sql: &str) -> Result<RowSet> {
        self.events.push(SessionEvent::ExecuteDirect);
        if self.fail_direct {
            return Err(RunnerError::query("syntax error at or near \"selec\""));
        }
        Ok(RowSet::new(self.columns.clone(), self.rows.clone()))
    }

    async fn close(self) -> Result<()> {
        self.events.push(SessionEvent::Close);
        if self.fail_release {
            return Err(RunnerError::connection("connection reset by peer"));
        }
        Ok(())
    }
}
