//! Cursor-bounded query execution.

use super::transport::ConnectSettings;
use super::{PostgresSession, QueryResult, QuerySession};
use crate::config::ConnectionConfig;
use crate::error::Result;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs one query against the connection described by `connection`.
///
/// TLS material is read before any network I/O, so an unreadable key file fails
/// without contacting the server. The connection is released on every path
/// before this returns.
pub async fn run_query(
    sql: &str,
    connection: &ConnectionConfig,
    result: QueryResult,
) -> Result<QueryResult> {
    let settings = ConnectSettings::from_config(connection)?;
    let session = PostgresSession::connect(&settings).await?;
    info!(connection = %connection.display_string(), "connected");

    QueryRunner::new(connection.max_rows)
        .run(session, sql, result)
        .await
}

/// Applies the row cap and the cursor-to-direct fallback to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryRunner {
    max_rows: usize,
}

impl QueryRunner {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Executes `sql` on `session`, then closes the session.
    ///
    /// The session is closed before the outcome is returned, whether it is a
    /// result or an error. A failure to close is logged, not surfaced.
    pub async fn run<S>(
        &self,
        mut session: S,
        sql: &str,
        result: QueryResult,
    ) -> Result<QueryResult>
    where
        S: QuerySession,
    {
        let start = Instant::now();
        let outcome = self.execute(&mut session, sql, result).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "error releasing connection");
        }

        outcome.map(|result| {
            let elapsed = start.elapsed();
            debug!(
                rows = result.row_count,
                incomplete = result.incomplete,
                ?elapsed,
                "query finished"
            );
            result.with_execution_time(elapsed)
        })
    }

    async fn execute<S>(
        &self,
        session: &mut S,
        sql: &str,
        mut result: QueryResult,
    ) -> Result<QueryResult>
    where
        S: QuerySession,
    {
        // One row past the cap tells us whether more data existed.
        let probe = self.max_rows.saturating_add(1);

        match session.read_cursor(sql, probe).await {
            Ok(mut set) => {
                if set.len() > self.max_rows {
                    set.rows.truncate(self.max_rows);
                    result.incomplete = true;
                }
                result.add_rows(set);

                if let Err(e) = session.close_cursor().await {
                    warn!(error = %e, "error closing cursor");
                }
                Ok(result)
            }
            Err(e) => {
                // Cursors cannot wrap multi-statement text; run it directly, uncapped.
                debug!(error = %e, "cursor query failed, retrying without cursor");
                let set = session.execute_direct(sql).await?;
                result.add_rows(set);
                Ok(result)
            }
        }
    }
}
