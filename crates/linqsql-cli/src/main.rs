//! linqsql command line
//!
//! Runs a JSON-serialized query model against a DuckDB database described by
//! linqsql.yaml, printing the generated SQL and the result rows as JSON.
//!
//! Usage: linqsql [--config <linqsql.yaml>] [--explain] <query.json>

use clap::Parser;
use linqsql_duck::{CancellationToken, DuckStore, QueryProvider};
use linqsql_ir::{ParameterValues, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

mod config;
mod logging;

use config::{read_query, Config};

#[derive(Debug, Parser)]
#[command(
    name = "linqsql",
    about = "Translate a query model to SQL and run it against DuckDB"
)]
struct Args {
    /// linqsql.yaml with the store, logging and entity model sections.
    #[arg(long, short = 'c', value_name = "FILE", env = "LINQSQL_CONFIG")]
    config: Option<PathBuf>,
    /// Print the generated SQL and parameters without running the query.
    #[arg(long)]
    explain: bool,
    /// JSON-serialized query model.
    #[arg(value_name = "QUERY")]
    query: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };
    config.apply_logging_env();
    logging::init();

    let model = config.model.build();
    for entity in model.entities() {
        debug!(entity = %entity.name, table = %entity.table, "Registered entity");
    }
    let store = match &config.store.database {
        Some(path) => {
            info!(database = %path, "Opening DuckDB database");
            DuckStore::open(path, model)?
        }
        None => DuckStore::in_memory(model)?,
    };
    if let Some(script) = &config.store.init_sql {
        info!(script = %script, "Running init script");
        store.connection().execute_batch(&std::fs::read_to_string(script)?)?;
    }

    let provider = QueryProvider::new(Arc::new(store)).with_plan_cache(config.query.plan_cache);
    let query = read_query(&args.query)?;

    let command = provider.to_command(&query)?;
    let parameters: Vec<serde_json::Value> = command.parameters.into_iter().map(Value::into_json).collect();
    println!("{}", command.sql);
    if !parameters.is_empty() {
        println!("-- parameters: {}", serde_json::to_string(&parameters)?);
    }
    if args.explain {
        return Ok(());
    }

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling query");
                token.cancel();
            }
        });
    }

    let rows = provider
        .execute_async::<serde_json::Value>(&query, ParameterValues::new(), token)
        .await?
        .collect::<Result<Vec<_>, _>>()?;
    info!(rows = rows.len(), "Query complete");
    println!("{}", serde_json::to_string_pretty(&rows)?);

    Ok(())
}
