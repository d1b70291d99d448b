//! Query provider: parameterize, look up or compile the plan, execute

use linqsql_ir::sql::{EntityEntry, SqlCommand};
use linqsql_ir::{extract_parameters, FunctionRegistry, ParameterValues, QueryModel};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cache::QueryCache;
use crate::compiled::CompiledQuery;
use crate::results::QueryResults;
use crate::store::DataStore;
use crate::ExecutionError;

/// Entry point for running query models against a [`DataStore`].
///
/// The plan cache is owned by the provider; share the provider (for example
/// behind an `Arc`) to share compiled plans.
pub struct QueryProvider {
    store: Arc<dyn DataStore>,
    cache: QueryCache<CompiledQuery>,
    functions: FunctionRegistry,
    plan_cache: bool,
}

impl QueryProvider {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            cache: QueryCache::new(),
            functions: FunctionRegistry::new(),
            plan_cache: true,
        }
    }

    /// Client methods available to residual predicates and selectors.
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// With the plan cache off, every execution compiles its own plan.
    pub fn with_plan_cache(mut self, enabled: bool) -> Self {
        self.plan_cache = enabled;
        self
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn cache(&self) -> &QueryCache<CompiledQuery> {
        &self.cache
    }

    /// Lifts literals out of `query`, then returns the plan for its shape
    /// and the values to bind. Caller-supplied `parameters` are merged in.
    pub fn prepare(
        &self,
        query: &QueryModel,
        parameters: &ParameterValues,
    ) -> Result<(Arc<CompiledQuery>, ParameterValues), ExecutionError> {
        let parameterized = extract_parameters(query);
        let mut values = parameters.clone();
        values.extend(parameterized.parameters);

        if !self.plan_cache {
            let compiled = self.store.compile_query(&parameterized.model)?;
            return Ok((Arc::new(compiled), values));
        }

        let key = parameterized.model.fingerprint();
        trace!(key = %key, parameters = values.len(), "Preparing query");
        let compiled = self
            .cache
            .get_or_compile(&key, || self.store.compile_query(&parameterized.model))?;
        Ok((compiled, values))
    }

    /// The SQL and ordered arguments `query` would run, without running it.
    pub fn to_command(&self, query: &QueryModel) -> Result<SqlCommand, ExecutionError> {
        let (compiled, parameters) = self.prepare(query, &ParameterValues::new())?;
        compiled.command(&parameters)
    }

    pub fn execute<T: DeserializeOwned>(&self, query: &QueryModel) -> QueryResults<'_, T> {
        self.execute_with(query, ParameterValues::new())
    }

    /// Lazy: nothing is compiled or sent to the store until the results are
    /// first iterated.
    pub fn execute_with<T: DeserializeOwned>(
        &self,
        query: &QueryModel,
        parameters: ParameterValues,
    ) -> QueryResults<'_, T> {
        let query = query.clone();
        QueryResults::pending(Box::new(move || {
            let (compiled, values) = self.prepare(&query, &parameters)?;
            self.store.execute_query(&compiled, &values, &self.functions)
        }))
    }

    pub async fn execute_async<T: DeserializeOwned>(
        &self,
        query: &QueryModel,
        parameters: ParameterValues,
        token: CancellationToken,
    ) -> Result<QueryResults<'static, T>, ExecutionError> {
        let (compiled, values) = self.prepare(query, &parameters)?;
        let rows = self
            .store
            .execute_query_async(compiled, values, self.functions.clone(), token)
            .await?;
        debug!(rows = rows.len(), "Async query complete");
        Ok(QueryResults::ready(rows))
    }

    pub fn save_changes(&self, entries: &[EntityEntry]) -> Result<usize, ExecutionError> {
        self.store.save_changes(entries)
    }

    pub async fn save_changes_async(
        &self,
        entries: Vec<EntityEntry>,
        token: CancellationToken,
    ) -> Result<usize, ExecutionError> {
        self.store.save_changes_async(entries, token).await
    }
}
