//! Tracing subscriber setup for pgrun.
//!
//! Stdout carries query output, so log lines go to stderr unless a file target
//! is chosen. `RUST_LOG` sets the filter and the default level is `info`.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogTarget {
    #[default]
    Stderr,
    /// `pg-runner.log` under the platform state directory, see [`log_path`].
    File,
}

/// Installs the global subscriber. A log file that cannot be opened falls back
/// to stderr with a one-line notice.
pub fn init(target: LogTarget) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());
    match target {
        LogTarget::Stderr => builder.with_writer(io::stderr).init(),
        LogTarget::File => {
            let path = log_path();
            match open_log_file(&path) {
                Ok(file) => builder.with_writer(file).with_ansi(false).init(),
                Err(e) => {
                    eprintln!("pgrun: cannot log to {}: {e}", path.display());
                    builder.with_writer(io::stderr).init()
                }
            }
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Creates the file and its parent directories, truncating an old log.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    File::create(path)
}

/// State directory, else config directory, else the temp directory.
pub fn log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::config_dir)
        .map(|dir| dir.join("pg-runner"))
        .unwrap_or_else(std::env::temp_dir)
        .join("pg-runner.log")
}
