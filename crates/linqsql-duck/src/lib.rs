//! DuckDB data store for linqsql query models
//!
//! Compiles query models into SQL plus a client residue, caches the compiled
//! plan by query shape, runs commands synchronously or on a blocking worker
//! that can be interrupted on cancellation, and materializes rows into typed results.

use thiserror::Error;

mod cache;
mod command;
mod compiled;
mod connection;
mod materializer;
mod provider;
mod results;
mod store;

pub use cache::{CacheStats, QueryCache};
pub use command::{execute_non_query, execute_reader};
pub use compiled::CompiledQuery;
pub use connection::{ConnectionState, OpenConnection, RelationalConnection};
pub use materializer::Materializer;
pub use provider::QueryProvider;
pub use results::QueryResults;
pub use store::{DataStore, DuckStore};

pub use linqsql_ir::sql::{EntityEntry, EntityState, SqlCommand};
pub use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Query compilation failed: {0}")]
    Compile(#[from] linqsql_ir::sql::BindError),

    #[error("SQL generation failed: {0}")]
    Generate(#[from] linqsql_ir::sql::GenerateError),

    #[error("Client evaluation failed: {0}")]
    Evaluation(#[from] linqsql_ir::EvalError),

    #[error("Result materialization failed: {0}")]
    Materialize(#[from] serde_json::Error),

    #[error("Invalid modification: {0}")]
    Modification(#[from] linqsql_ir::sql::ModificationError),

    #[error("Unsupported parameter value: {0}")]
    UnsupportedValue(String),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Lock poisoned")]
    Poisoned,
}
