//! Database layer for pg-runner.
//!
//! `run_query` is the single entry point: it builds connection settings from a
//! descriptor, opens a PostgreSQL session and hands it to the [`QueryRunner`],
//! which owns the cursor/fallback policy. The policy is written against the
//! [`QuerySession`] trait so it can be exercised without a server.

mod mock;
mod postgres;
mod runner;
mod schema;
pub mod transport;
mod types;

pub use mock::{EventLog, MockSession, SessionEvent};
pub use postgres::PostgresSession;
pub use runner::{run_query, QueryRunner};
pub use schema::{Column, Namespace, Schema, Table, SCHEMA_SQL};
pub use types::{ColumnInfo, QueryResult, Row, RowSet, Value};

use crate::error::Result;
use async_trait::async_trait;

/// One open database connection, as seen by the query runner.
///
/// All operations are async and return Results with RunnerError.
#[async_trait]
pub trait QuerySession: Send {
    /// Executes `sql` through a server-side cursor and reads at most `limit` rows.
    ///
    /// On failure the session must be left usable for `execute_direct`.
    async fn read_cursor(&mut self, sql: &str, limit: usize) -> Result<RowSet>;

    /// Closes the cursor opened by the last successful `read_cursor`.
    async fn close_cursor(&mut self) -> Result<()>;

    /// Executes `sql` without a cursor and returns every row it produces.
    async fn execute_direct(&mut self, sql: &str) -> Result<RowSet>;

    /// Releases the connection.
    async fn close(self) -> Result<()>
    where
        Self: Sized;
}
