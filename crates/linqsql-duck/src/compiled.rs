//! Compiled query plan: the bound SELECT, its client residue and materializer

use duckdb::Connection;
use linqsql_ir::eval::{apply_result_operators, evaluate, evaluate_predicate};
use linqsql_ir::sql::{generate, MethodCallTranslator, QueryBinder, SqlCommand, TranslatedQuery};
use linqsql_ir::{compare, EvalScope, FunctionRegistry, Model, ParameterValues, QueryModel, SortKey, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::execute_reader;
use crate::materializer::Materializer;
use crate::ExecutionError;

type SourceRow = BTreeMap<String, Value>;

#[derive(Debug)]
pub struct CompiledQuery {
    translated: TranslatedQuery,
    materializer: Materializer,
}

impl CompiledQuery {
    pub fn compile(
        model: &Model,
        translator: &dyn MethodCallTranslator,
        query: &QueryModel,
    ) -> Result<Self, ExecutionError> {
        let translated = QueryBinder::new(model, translator).bind(query)?;
        info!(
            columns = translated.select.projection().len(),
            client_eval = translated.requires_client_eval(),
            client_filters = translated.client_filters.len(),
            "Compiled query"
        );
        let materializer = Materializer::new(translated.sources.clone());
        Ok(Self {
            translated,
            materializer,
        })
    }

    pub fn translated(&self) -> &TranslatedQuery {
        &self.translated
    }

    /// SQL and positional arguments for one execution.
    pub fn command(&self, parameters: &ParameterValues) -> Result<SqlCommand, ExecutionError> {
        Ok(generate(&self.translated.select, parameters)?)
    }

    fn column_count(&self) -> usize {
        let projected = self.translated.select.projection().len();
        if self.translated.is_server_count() || projected == 0 {
            1
        } else {
            projected
        }
    }

    /// Runs the command and the client pipeline: residual filters, client
    /// ordering, the selector, then the remaining result operators.
    pub fn execute(
        &self,
        connection: &Connection,
        parameters: &ParameterValues,
        functions: &FunctionRegistry,
        token: &CancellationToken,
    ) -> Result<Vec<Value>, ExecutionError> {
        let command = self.command(parameters)?;

        if self.translated.is_server_count() {
            let mut count = Value::Int(0);
            execute_reader(connection, &command, 1, token, |row| {
                if let Some(value) = row.into_iter().next() {
                    count = value;
                }
                Ok(())
            })?;
            return Ok(vec![count]);
        }

        let filters = &self.translated.client_filters;
        let mut rows: Vec<SourceRow> = Vec::new();
        execute_reader(connection, &command, self.column_count(), token, |row| {
            let sources = self.materializer.shape(&row);
            let scope = EvalScope::new(&sources, parameters, functions);
            for filter in filters {
                if !evaluate_predicate(filter, &scope)? {
                    return Ok(());
                }
            }
            rows.push(sources);
            Ok(())
        })?;

        if !self.translated.client_ordering.is_empty() {
            rows = order_rows(rows, &self.translated.client_ordering, parameters, functions)?;
        }

        let mut projected = Vec::with_capacity(rows.len());
        for sources in &rows {
            if token.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            let scope = EvalScope::new(sources, parameters, functions);
            projected.push(evaluate(&self.translated.selector, &scope)?);
        }

        if self.translated.client_operators.is_empty() {
            return Ok(projected);
        }
        let no_sources = BTreeMap::new();
        let scope = EvalScope::new(&no_sources, parameters, functions);
        let results = apply_result_operators(projected, &self.translated.client_operators, &scope)?;
        debug!(results = results.len(), "Applied client result operators");
        Ok(results)
    }
}

/// Stable sort by the ordering keys; nulls first ascending.
fn order_rows(
    rows: Vec<SourceRow>,
    ordering: &[SortKey],
    parameters: &ParameterValues,
    functions: &FunctionRegistry,
) -> Result<Vec<SourceRow>, ExecutionError> {
    let mut keyed = rows
        .into_iter()
        .map(|sources| {
            let scope = EvalScope::new(&sources, parameters, functions);
            let keys = ordering
                .iter()
                .map(|key| evaluate(&key.expr, &scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((keys, sources))
        })
        .collect::<Result<Vec<_>, ExecutionError>>()?;

    keyed.sort_by(|(a, _), (b, _)| {
        for ((left, right), key) in a.iter().zip(b).zip(ordering) {
            let ordering = compare(left, right).unwrap_or(Ordering::Equal);
            let ordering = if key.desc { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    Ok(keyed.into_iter().map(|(_, sources)| sources).collect())
}
