//! Data store contract and its DuckDB implementation

use async_trait::async_trait;
use duckdb::{Connection, InterruptHandle};
use linqsql_ir::sql::{
    modification_command, CompositeMethodTranslator, EntityEntry, MethodCallTranslator,
};
use linqsql_ir::{FunctionRegistry, Model, ParameterValues, QueryModel, Value};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{cancelled_or, execute_non_query};
use crate::compiled::CompiledQuery;
use crate::connection::{OpenConnection, RelationalConnection};
use crate::ExecutionError;

/// What a query provider needs from a relational store.
#[async_trait]
pub trait DataStore: Send + Sync {
    fn model(&self) -> &Model;

    fn compile_query(&self, query: &QueryModel) -> Result<CompiledQuery, ExecutionError>;

    fn execute_query(
        &self,
        compiled: &CompiledQuery,
        parameters: &ParameterValues,
        functions: &FunctionRegistry,
    ) -> Result<Vec<Value>, ExecutionError>;

    /// Runs on a blocking worker. Cancelling the token interrupts the running
    /// command, and the connection is released before the cancellation is
    /// reported. Dropping the future interrupts the command as well.
    async fn execute_query_async(
        &self,
        compiled: Arc<CompiledQuery>,
        parameters: ParameterValues,
        functions: FunctionRegistry,
        token: CancellationToken,
    ) -> Result<Vec<Value>, ExecutionError>;

    /// Applies all entries in one transaction; returns the affected row count.
    fn save_changes(&self, entries: &[EntityEntry]) -> Result<usize, ExecutionError>;

    /// Like [`DataStore::save_changes`]; cancelling interrupts the current
    /// statement and rolls the transaction back.
    async fn save_changes_async(
        &self,
        entries: Vec<EntityEntry>,
        token: CancellationToken,
    ) -> Result<usize, ExecutionError>;
}

pub struct DuckStore {
    model: Arc<Model>,
    connection: RelationalConnection,
    translator: Arc<dyn MethodCallTranslator>,
}

impl DuckStore {
    pub fn new(connection: RelationalConnection, model: Model) -> Self {
        Self {
            model: Arc::new(model),
            connection,
            translator: Arc::new(CompositeMethodTranslator::new()),
        }
    }

    pub fn open(path: impl AsRef<Path>, model: Model) -> Result<Self, ExecutionError> {
        Ok(Self::new(RelationalConnection::open_path(path)?, model))
    }

    pub fn in_memory(model: Model) -> Result<Self, ExecutionError> {
        Ok(Self::new(RelationalConnection::in_memory()?, model))
    }

    pub fn with_translator(mut self, translator: impl MethodCallTranslator + 'static) -> Self {
        self.translator = Arc::new(translator);
        self
    }

    pub fn connection(&self) -> &RelationalConnection {
        &self.connection
    }
}

#[async_trait]
impl DataStore for DuckStore {
    fn model(&self) -> &Model {
        &self.model
    }

    fn compile_query(&self, query: &QueryModel) -> Result<CompiledQuery, ExecutionError> {
        CompiledQuery::compile(&self.model, self.translator.as_ref(), query)
    }

    fn execute_query(
        &self,
        compiled: &CompiledQuery,
        parameters: &ParameterValues,
        functions: &FunctionRegistry,
    ) -> Result<Vec<Value>, ExecutionError> {
        let connection = self.connection.open()?;
        compiled.execute(&connection, parameters, functions, &CancellationToken::new())
    }

    async fn execute_query_async(
        &self,
        compiled: Arc<CompiledQuery>,
        parameters: ParameterValues,
        functions: FunctionRegistry,
        token: CancellationToken,
    ) -> Result<Vec<Value>, ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        let open = self.connection.open()?;
        let result = run_interruptible(open, &token, move |connection, token| {
            compiled.execute(connection, &parameters, &functions, token)
        })
        .await;
        if matches!(result, Err(ExecutionError::Cancelled)) {
            debug!(state = ?self.connection.state(), "Query execution cancelled");
        }
        result
    }

    fn save_changes(&self, entries: &[EntityEntry]) -> Result<usize, ExecutionError> {
        let open = self.connection.open()?;
        apply_changes(&open, &self.model, entries, &CancellationToken::new())
    }

    async fn save_changes_async(
        &self,
        entries: Vec<EntityEntry>,
        token: CancellationToken,
    ) -> Result<usize, ExecutionError> {
        if token.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        let open = self.connection.open()?;
        let model = Arc::clone(&self.model);
        run_interruptible(open, &token, move |connection, token| {
            apply_changes(connection, &model, &entries, token)
        })
        .await
    }
}

/// How often a cancelled command is interrupted again until its worker returns.
const INTERRUPT_RETRY: Duration = Duration::from_millis(25);

/// Interrupts the command on drop unless disarmed, so a caller that stops
/// polling does not leave the command running on the blocking pool.
struct InterruptGuard {
    handle: Option<Arc<InterruptHandle>>,
    token: CancellationToken,
    /// Alive while the worker closure still holds the connection.
    worker: Weak<()>,
}

impl InterruptGuard {
    fn interrupt(&self) {
        if let Some(handle) = &self.handle {
            handle.interrupt();
        }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.token.cancel();
        handle.interrupt();
        debug!("Execution abandoned, interrupting command");

        // An interrupt that lands before the statement starts is lost; keep
        // interrupting until the worker has released its connection.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let worker = self.worker.clone();
            runtime.spawn(async move {
                while worker.upgrade().is_some() {
                    handle.interrupt();
                    tokio::time::sleep(INTERRUPT_RETRY).await;
                }
            });
        }
    }
}

/// Runs `work` on a blocking worker that owns `open`.
///
/// Cancellation interrupts the command and waits for the worker, so the
/// connection is closed by the time this returns.
async fn run_interruptible<T, F>(
    open: OpenConnection,
    token: &CancellationToken,
    work: F,
) -> Result<T, ExecutionError>
where
    T: Send + 'static,
    F: FnOnce(&Connection, &CancellationToken) -> Result<T, ExecutionError> + Send + 'static,
{
    let token = token.child_token();
    let alive = Arc::new(());
    let guard = InterruptGuard {
        handle: Some(open.interrupt_handle()),
        token: token.clone(),
        worker: Arc::downgrade(&alive),
    };

    let worker_token = token.clone();
    let mut worker = tokio::task::spawn_blocking(move || {
        let result = work(&*open, &worker_token);
        drop(open);
        drop(alive);
        result
    });

    let joined = tokio::select! {
        joined = &mut worker => joined,
        _ = token.cancelled() => loop {
            guard.interrupt();
            if let Ok(joined) = tokio::time::timeout(INTERRUPT_RETRY, &mut worker).await {
                break joined;
            }
        },
    };
    guard.disarm();

    joined.map_err(|e| ExecutionError::Worker(e.to_string()))?
}

fn apply_changes(
    open: &Connection,
    model: &Model,
    entries: &[EntityEntry],
    token: &CancellationToken,
) -> Result<usize, ExecutionError> {
    if entries.is_empty() {
        return Ok(0);
    }
    let commands = entries
        .iter()
        .map(|entry| modification_command(model, entry))
        .collect::<Result<Vec<_>, _>>()?;

    open.execute_batch("BEGIN TRANSACTION")?;

    let result = commands.iter().try_fold(0, |affected, command| {
        if token.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        match execute_non_query(open, command) {
            Ok(rows) => Ok(affected + rows),
            Err(ExecutionError::Database(e)) => Err(cancelled_or(e, token)),
            Err(e) => Err(e),
        }
    });

    match result {
        Ok(affected) => {
            open.execute_batch("COMMIT")?;
            info!(entries = entries.len(), affected, "Saved changes");
            Ok(affected)
        }
        Err(e) => {
            if let Err(rollback) = open.execute_batch("ROLLBACK") {
                warn!(error = %rollback, "Rollback failed");
            }
            warn!(error = %e, "Save changes rolled back");
            Err(e)
        }
    }
}
