//! pgrun - run a SQL query against PostgreSQL with a bounded result set.

mod cli;

use cli::Cli;
use pg_runner::config::{Config, ConnectionConfig};
use pg_runner::db::{self, QueryResult, Schema, SCHEMA_SQL};
use pg_runner::error::{Result, RunnerError};
use pg_runner::{logging, output};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    logging::init(if cli.log_file {
        logging::LogTarget::File
    } else {
        logging::LogTarget::Stderr
    });

    if let Err(e) = run(&cli).await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    let connection = resolve_connection(cli, &config)?
        .ok_or_else(|| {
            RunnerError::config(
                "No database connection configured. Use --help for usage information.",
            )
        })?;
    info!("Connection: {}", connection.display_string());

    let sql = if cli.schema {
        SCHEMA_SQL.to_string()
    } else {
        cli.read_sql()?
    };

    let result = db::run_query(&sql, &connection, QueryResult::new()).await?;

    let rendered = if cli.schema && cli.format == output::OutputFormat::Text {
        if let Some(warning) = result.truncation_warning() {
            tracing::warn!("{warning}");
        }
        Schema::from_result(&result).format_tree()
    } else {
        output::render(&result, cli.format)?
    };
    print!("{rendered}");

    Ok(())
}

/// Resolves the final connection configuration from CLI args, config file, and environment.
///
/// Precedence: CLI arguments, then the named connection, then the default
/// connection, then environment variables.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<Option<ConnectionConfig>> {
    let mut connection = cli.to_connection_config()?;

    if connection.is_none() {
        if let Some(name) = cli.connection_name() {
            connection = config.get_connection(Some(name)).cloned();
            if connection.is_none() {
                return Err(RunnerError::config(format!(
                    "Connection '{}' not found in config file",
                    name
                )));
            }
        }
    }

    if connection.is_none() {
        connection = config.get_connection(None).cloned();
    }

    if let Some(ref mut conn) = connection {
        conn.apply_overrides(&cli.overrides());
        conn.apply_env_defaults();
    }

    Ok(connection)
}
