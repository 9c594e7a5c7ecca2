//! Connection settings assembled from a [`ConnectionConfig`].
//!
//! The stream is either a direct TCP connection or a SOCKS5 tunnel, and is
//! independently combined with a TLS mode. TLS material is read from disk
//! here, before any network I/O is attempted.

use crate::config::ConnectionConfig;
use crate::error::{Result, RunnerError};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Reported to the server as `application_name`.
pub const APPLICATION_NAME: &str = "pg-runner";

/// How the raw byte stream to the server is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Direct {
        host: String,
        port: u16,
    },
    SocksTunnel {
        target_host: String,
        target_port: u16,
        proxy: SocksProxy,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksProxy {
    pub host: String,
    pub port: u16,
    pub credentials: Option<SocksCredentials>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SocksCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SocksCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocksCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Transport {
    /// Builds the transport for a connection descriptor.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        let host = config.host_or_default().to_string();

        if !config.use_socks {
            return Ok(Self::Direct {
                host,
                port: config.port,
            });
        }

        let proxy_host = config
            .socks_host
            .clone()
            .ok_or_else(|| RunnerError::config("socks_host is required when use_socks is set"))?;

        let credentials = config.socks_username.as_ref().map(|username| SocksCredentials {
            username: username.clone(),
            password: config.socks_password.clone().unwrap_or_default(),
        });

        Ok(Self::SocksTunnel {
            target_host: host,
            target_port: config.port,
            proxy: SocksProxy {
                host: proxy_host,
                port: config.socks_port,
                credentials,
            },
        })
    }

    /// The database host, which is also the TLS verification domain.
    pub fn target_host(&self) -> &str {
        match self {
            Self::Direct { host, .. } => host,
            Self::SocksTunnel { target_host, .. } => target_host,
        }
    }

    pub fn target_port(&self) -> u16 {
        match self {
            Self::Direct { port, .. } => *port,
            Self::SocksTunnel { target_port, .. } => *target_port,
        }
    }
}

/// Client identity and trust roots for mutual TLS, as raw PEM bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
    pub ca: Option<Vec<u8>>,
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("cert", &format_args!("<{} bytes>", self.cert.len()))
            .field("ca", &self.ca.as_ref().map(|ca| ca.len()))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    Disabled,
    /// TLS with server certificate and hostname verification.
    Verify,
    MutualTls(ClientIdentity),
}

impl TlsMode {
    /// Resolves the TLS mode, reading key material from disk.
    ///
    /// A key and certificate pair takes precedence over the boolean `ssl` flag.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        match (&config.ssl_key, &config.ssl_cert) {
            (Some(key), Some(cert)) => {
                let ca = config.ssl_ca.as_deref().map(read_pem).transpose()?;
                Ok(Self::MutualTls(ClientIdentity {
                    key: read_pem(key)?,
                    cert: read_pem(cert)?,
                    ca,
                }))
            }
            _ if config.ssl => Ok(Self::Verify),
            _ => Ok(Self::Disabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| RunnerError::file_read(format!("{}: {e}", path.display())))
}

/// Everything needed to open one session.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub transport: Transport,
    pub tls: TlsMode,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub connect_timeout: Duration,
}

impl ConnectSettings {
    pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self {
            transport: Transport::from_config(config)?,
            tls: TlsMode::from_config(config)?,
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    /// Startup parameters for the Postgres handshake.
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(self.transport.target_host())
            .port(self.transport.target_port())
            .application_name(APPLICATION_NAME)
            .ssl_mode(if self.tls.is_enabled() {
                tokio_postgres::config::SslMode::Require
            } else {
                tokio_postgres::config::SslMode::Disable
            });
        if let Some(user) = &self.user {
            pg.user(user);
        }
        if let Some(password) = &self.password {
            pg.password(password);
        }
        if let Some(database) = &self.database {
            pg.dbname(database);
        }
        pg
    }
}
