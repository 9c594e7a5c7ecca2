//! pg-runner - PostgreSQL query runner with cursor-bounded results.
//!
//! This library exposes the core modules for use by the `pgrun` binary and
//! integration tests.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod output;
