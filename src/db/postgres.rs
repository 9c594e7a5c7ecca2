//! PostgreSQL session implementation.
//!
//! Provides `PostgresSession`, which implements `QuerySession` on top of
//! tokio-postgres. The byte stream is opened by us (directly or through a SOCKS5
//! proxy) and handed to `connect_raw`, so the same handshake path serves both
//! transports.

use super::transport::{ConnectSettings, TlsMode, Transport};
use super::{ColumnInfo, QuerySession, Row, RowSet, Value};
use crate::error::{Result, RunnerError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, Connection, NoTls, SimpleQueryMessage, Transaction};
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, warn};

/// A single connection to a PostgreSQL server.
pub struct PostgresSession {
    client: Client,
    driver: JoinHandle<()>,
    /// Upper bound on waiting for the connection task after the client is dropped.
    shutdown_timeout: Duration,
    /// Outcome of closing the portal read by the last `read_cursor`.
    cursor_closed: Option<Result<()>>,
}

impl PostgresSession {
    fn new(client: Client, driver: JoinHandle<()>, shutdown_timeout: Duration) -> Self {
        Self {
            client,
            driver,
            shutdown_timeout,
            cursor_closed: None,
        }
    }

    /// Opens the stream and completes the Postgres handshake.
    ///
    /// The whole sequence is bounded by the configured connect timeout. On
    /// failure any partially opened stream is dropped before the error returns.
    pub async fn connect(settings: &ConnectSettings) -> Result<Self> {
        let attempt = async {
            match &settings.transport {
                Transport::Direct { host, port } => {
                    debug!(%host, port, "opening direct connection");
                    let stream = TcpStream::connect((host.as_str(), *port))
                        .await
                        .map_err(|e| map_io_error(e, settings))?;
                    handshake(settings, stream).await
                }
                Transport::SocksTunnel {
                    target_host,
                    target_port,
                    proxy,
                } => {
                    debug!(
                        proxy_host = %proxy.host,
                        proxy_port = proxy.port,
                        %target_host,
                        target_port,
                        "opening socks tunnel"
                    );
                    let proxy_addr = (proxy.host.as_str(), proxy.port);
                    let target = (target_host.as_str(), *target_port);
                    let stream = match &proxy.credentials {
                        Some(creds) => {
                            Socks5Stream::connect_with_password(
                                proxy_addr,
                                target,
                                &creds.username,
                                &creds.password,
                            )
                            .await
                        }
                        None => Socks5Stream::connect(proxy_addr, target).await,
                    }
                    .map_err(|e| {
                        RunnerError::connection(format!(
                            "SOCKS proxy {}:{} could not reach {target_host}:{target_port}: {e}",
                            proxy.host, proxy.port
                        ))
                    })?;
                    handshake(settings, stream).await
                }
            }
        };

        match tokio::time::timeout(settings.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(RunnerError::connection(format!(
                "Connection to {}:{} timed out after {:?}.",
                settings.transport.target_host(),
                settings.transport.target_port(),
                settings.connect_timeout
            ))),
        }
    }
}

/// Reads at most `limit` rows through an unnamed-statement portal.
///
/// Preparing the statement rejects multi-statement text, which the caller
/// treats as the signal to run it directly.
async fn read_portal(tx: &Transaction<'_>, sql: &str, limit: usize) -> Result<RowSet> {
    let statement = tx
        .prepare(sql)
        .await
        .map_err(|e| RunnerError::query(format_query_error(&e)))?;

    let columns: Vec<ColumnInfo> = statement
        .columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_().name()))
        .collect();

    let portal = tx
        .bind(&statement, &[])
        .await
        .map_err(|e| RunnerError::query(format_query_error(&e)))?;

    // A zero row limit means "all rows" on the wire, so it never goes out.
    if limit == 0 {
        return Ok(RowSet::new(columns, Vec::new()));
    }

    let rows = tx
        .query_portal(&portal, portal_limit(limit))
        .await
        .map_err(|e| RunnerError::query(format_query_error(&e)))?;

    Ok(RowSet::new(columns, rows.iter().map(convert_row).collect()))
}

#[async_trait]
impl QuerySession for PostgresSession {
    /// Binds `sql` to a portal inside a transaction and executes it with a row
    /// limit.
    ///
    /// The portal is closed and the transaction committed before this returns,
    /// since the transaction borrows the client. Whether that succeeded is
    /// reported by the following `close_cursor`.
    async fn read_cursor(&mut self, sql: &str, limit: usize) -> Result<RowSet> {
        self.cursor_closed = None;
        let tx = self
            .client
            .transaction()
            .await
            .map_err(|e| RunnerError::query(format_query_error(&e)))?;

        match read_portal(&tx, sql, limit).await {
            Ok(set) => {
                let committed = tx
                    .commit()
                    .await
                    .map_err(|e| RunnerError::query(format_query_error(&e)));
                self.cursor_closed = Some(committed);
                Ok(set)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    debug!(error = %rollback, "rollback after cursor failure did not succeed");
                }
                Err(e)
            }
        }
    }

    async fn close_cursor(&mut self) -> Result<()> {
        self.cursor_closed
            .take()
            .unwrap_or_else(|| Err(RunnerError::internal("no cursor is open")))
    }

    async fn execute_direct(&mut self, sql: &str) -> Result<RowSet> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| RunnerError::query(format_query_error(&e)))?;

        let mut set = RowSet::default();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                if set.columns.is_empty() {
                    set.columns = row
                        .columns()
                        .iter()
                        .map(|col| ColumnInfo::new(col.name(), "text"))
                        .collect();
                }
                set.rows.push(
                    (0..row.len())
                        .map(|i| Value::from(row.get(i)))
                        .collect(),
                );
            }
        }
        Ok(set)
    }

    async fn close(self) -> Result<()> {
        let Self {
            client,
            driver,
            shutdown_timeout,
            ..
        } = self;
        // Dropping the client ends the connection task once pending requests drain.
        drop(client);
        join_driver(driver, shutdown_timeout).await
    }
}

/// Runs the startup handshake over an already-open stream and spawns the
/// connection driver.
async fn handshake<S>(settings: &ConnectSettings, stream: S) -> Result<PostgresSession>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let pg = settings.pg_config();
    match &settings.tls {
        TlsMode::Disabled => {
            let (client, connection) = pg
                .connect_raw(stream, NoTls)
                .await
                .map_err(|e| map_connection_error(&e, settings))?;
            Ok(PostgresSession::new(
                client,
                spawn_driver(connection),
                settings.connect_timeout,
            ))
        }
        tls => {
            let connector = postgres_native_tls::TlsConnector::new(
                build_tls_connector(tls)?,
                settings.transport.target_host(),
            );
            let (client, connection) = pg
                .connect_raw(stream, connector)
                .await
                .map_err(|e| map_connection_error(&e, settings))?;
            Ok(PostgresSession::new(
                client,
                spawn_driver(connection),
                settings.connect_timeout,
            ))
        }
    }
}

fn spawn_driver<S, T>(connection: Connection<S, T>) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(error = %e, "PostgreSQL connection error");
        }
    })
}

/// Waits for the connection task to finish, giving up after `timeout`.
///
/// A peer that never closes its side must not hold up a finished query.
async fn join_driver(driver: JoinHandle<()>, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, driver).await {
        Ok(joined) => {
            joined.map_err(|e| RunnerError::internal(format!("connection task failed: {e}")))
        }
        Err(_) => {
            warn!(?timeout, "connection task did not finish, abandoning it");
            Ok(())
        }
    }
}

fn build_tls_connector(tls: &TlsMode) -> Result<native_tls::TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();
    if let TlsMode::MutualTls(identity) = tls {
        let client_identity = native_tls::Identity::from_pkcs8(&identity.cert, &identity.key)
            .map_err(|e| RunnerError::config(format!("Invalid client key or certificate: {e}")))?;
        builder.identity(client_identity);

        if let Some(ca) = &identity.ca {
            let root = native_tls::Certificate::from_pem(ca)
                .map_err(|e| RunnerError::config(format!("Invalid CA certificate: {e}")))?;
            builder.disable_built_in_roots(true);
            builder.add_root_certificate(root);
        }
    }
    builder
        .build()
        .map_err(|e| RunnerError::connection(format!("Failed to build TLS connector: {e}")))
}

/// Row limit for an Execute message. Limits past `i32::MAX` become 0, which
/// the server reads as unlimited.
fn portal_limit(limit: usize) -> i32 {
    i32::try_from(limit).unwrap_or(0)
}

/// Converts a tokio-postgres row to our Row type.
fn convert_row(row: &tokio_postgres::Row) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_()))
        .collect()
}

/// Converts a single column value, decoding by the column's wire type.
fn convert_value(row: &tokio_postgres::Row, index: usize, ty: &Type) -> Value {
    fn get<'a, T>(row: &'a tokio_postgres::Row, index: usize) -> Option<T>
    where
        T: tokio_postgres::types::FromSql<'a>,
    {
        row.try_get::<_, Option<T>>(index).ok().flatten()
    }

    let value = match *ty {
        Type::BOOL => get::<bool>(row, index).map(Value::Bool),
        Type::INT2 => get::<i16>(row, index).map(|v| Value::Int(v as i64)),
        Type::INT4 => get::<i32>(row, index).map(|v| Value::Int(v as i64)),
        Type::INT8 => get::<i64>(row, index).map(Value::Int),
        Type::OID => get::<u32>(row, index).map(|v| Value::Int(v as i64)),
        Type::FLOAT4 => get::<f32>(row, index).map(|v| Value::Float(v as f64)),
        Type::FLOAT8 => get::<f64>(row, index).map(Value::Float),
        Type::BYTEA => get::<Vec<u8>>(row, index).map(Value::Bytes),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, index).map(Value::Json),
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, index)
            .map(|v| Value::String(v.to_string())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, index)
            .map(|v| Value::String(v.to_rfc3339())),
        Type::DATE => {
            get::<chrono::NaiveDate>(row, index).map(|v| Value::String(v.to_string()))
        }
        Type::TIME => {
            get::<chrono::NaiveTime>(row, index).map(|v| Value::String(v.to_string()))
        }
        _ => match row.try_get::<_, Option<String>>(index) {
            Ok(v) => v.map(Value::String),
            Err(e) => {
                debug!(
                    column = index,
                    type_name = ty.name(),
                    error = %e,
                    "unsupported column type"
                );
                None
            }
        },
    };
    value.unwrap_or(Value::Null)
}

fn map_io_error(error: std::io::Error, settings: &ConnectSettings) -> RunnerError {
    let host = settings.transport.target_host();
    let port = settings.transport.target_port();
    match error.kind() {
        std::io::ErrorKind::ConnectionRefused => RunnerError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        )),
        std::io::ErrorKind::TimedOut => RunnerError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        )),
        _ => RunnerError::connection(format!("Cannot connect to {host}:{port}: {error}")),
    }
}

/// Maps handshake errors to user-friendly messages.
fn map_connection_error(error: &tokio_postgres::Error, settings: &ConnectSettings) -> RunnerError {
    let host = settings.transport.target_host();
    let port = settings.transport.target_port();
    let user = settings.user.as_deref().unwrap_or("unknown");
    let database = settings.database.as_deref().unwrap_or("unknown");

    let error_str = match error.as_db_error() {
        Some(db) => db.message().to_lowercase(),
        None => error.to_string().to_lowercase(),
    };

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        RunnerError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        RunnerError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        RunnerError::connection(format!(
            "TLS negotiation with {host}:{port} failed: {error}"
        ))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        RunnerError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        RunnerError::connection(error.to_string())
    }
}

/// Formats a query error with the server's detail and hint if available.
fn format_query_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    let fields = [
        ("DETAIL", db_error.detail()),
        ("HINT", db_error.hint()),
        ("TABLE", db_error.table()),
        ("COLUMN", db_error.column()),
        ("CONSTRAINT", db_error.constraint()),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            result.push_str(&format!("\n  {label}: {value}"));
        }
    }

    result
}
