//! Command execution and value conversion between DuckDB and linqsql

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::{params_from_iter, Connection, Row};
use linqsql_ir::sql::SqlCommand;
use linqsql_ir::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ExecutionError;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Runs a query, handing each row's first `columns` values to `on_row`.
///
/// The token is checked before the command runs and before every row; a
/// cancelled token stops reading and returns [`ExecutionError::Cancelled`].
/// A command interrupted through the connection's interrupt handle after the
/// token was cancelled also reports [`ExecutionError::Cancelled`].
pub fn execute_reader<F>(
    connection: &Connection,
    command: &SqlCommand,
    columns: usize,
    token: &CancellationToken,
    mut on_row: F,
) -> Result<usize, ExecutionError>
where
    F: FnMut(Vec<Value>) -> Result<(), ExecutionError>,
{
    if token.is_cancelled() {
        return Err(ExecutionError::Cancelled);
    }
    debug!(sql = %command.sql, parameters = command.parameters.len(), "Executing query");

    let parameters = bind_parameters(&command.parameters)?;
    let mut statement = connection.prepare(&command.sql).map_err(|e| cancelled_or(e, token))?;
    let mut rows = statement
        .query(params_from_iter(parameters.iter()))
        .map_err(|e| cancelled_or(e, token))?;

    let mut row_count = 0;
    while let Some(row) = rows.next().map_err(|e| cancelled_or(e, token))? {
        if token.is_cancelled() {
            debug!(row_count, "Query cancelled while reading");
            return Err(ExecutionError::Cancelled);
        }
        let mut values = Vec::with_capacity(columns);
        for i in 0..columns {
            values.push(read_value(row, i)?);
        }
        on_row(values)?;
        row_count += 1;
    }

    debug!(row_count, "Query complete");
    Ok(row_count)
}

/// Runs a statement and returns the number of affected rows.
pub fn execute_non_query(connection: &Connection, command: &SqlCommand) -> Result<usize, ExecutionError> {
    debug!(sql = %command.sql, parameters = command.parameters.len(), "Executing command");
    let parameters = bind_parameters(&command.parameters)?;
    Ok(connection.execute(&command.sql, params_from_iter(parameters.iter()))?)
}

/// An interrupted command fails with a database error; once the token is
/// cancelled that error is the cancellation.
pub(crate) fn cancelled_or(error: duckdb::Error, token: &CancellationToken) -> ExecutionError {
    if token.is_cancelled() {
        ExecutionError::Cancelled
    } else {
        ExecutionError::Database(error)
    }
}

fn bind_parameters(values: &[Value]) -> Result<Vec<DuckValue>, ExecutionError> {
    values.iter().map(to_duck_value).collect()
}

pub(crate) fn to_duck_value(value: &Value) -> Result<DuckValue, ExecutionError> {
    Ok(match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Float(f) => DuckValue::Double(*f),
        Value::String(s) => DuckValue::Text(s.clone()),
        Value::Bytes(bytes) => DuckValue::Blob(bytes.clone()),
        Value::DateTime(dt) => DuckValue::Timestamp(TimeUnit::Microsecond, dt.and_utc().timestamp_micros()),
        Value::DateTimeOffset(dt) => DuckValue::Timestamp(TimeUnit::Microsecond, dt.timestamp_micros()),
        Value::Guid(id) => DuckValue::Text(id.to_string()),
        Value::List(_) | Value::Object(_) => {
            return Err(ExecutionError::UnsupportedValue(format!("{:?}", value)));
        }
    })
}

fn read_value(row: &Row<'_>, index: usize) -> Result<Value, ExecutionError> {
    let value: DuckValue = row.get(index)?;
    from_duck_value(value)
}

pub(crate) fn from_duck_value(value: DuckValue) -> Result<Value, ExecutionError> {
    Ok(match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::Int(i64::from(i)),
        DuckValue::SmallInt(i) => Value::Int(i64::from(i)),
        DuckValue::Int(i) => Value::Int(i64::from(i)),
        DuckValue::BigInt(i) => Value::Int(i),
        DuckValue::UTinyInt(i) => Value::Int(i64::from(i)),
        DuckValue::USmallInt(i) => Value::Int(i64::from(i)),
        DuckValue::UInt(i) => Value::Int(i64::from(i)),
        DuckValue::UBigInt(i) => i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64)),
        DuckValue::HugeInt(i) => i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64)),
        DuckValue::Float(f) => Value::Float(f64::from(f)),
        DuckValue::Double(f) => Value::Float(f),
        DuckValue::Decimal(d) => {
            let text = d.to_string();
            text.parse::<f64>().map(Value::Float).unwrap_or(Value::String(text))
        }
        DuckValue::Timestamp(unit, value) => Value::DateTime(timestamp(unit, value)?),
        DuckValue::Date32(days) => {
            let date = NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .ok_or_else(|| ExecutionError::UnsupportedValue(format!("date out of range: {}", days)))?;
            Value::DateTime(date)
        }
        DuckValue::Text(s) => Value::String(s),
        DuckValue::Enum(s) => Value::String(s),
        DuckValue::Blob(bytes) => Value::Bytes(bytes),
        DuckValue::List(items) => Value::List(
            items
                .into_iter()
                .map(from_duck_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => Value::String(format!("{:?}", other)),
    })
}

fn timestamp(unit: TimeUnit, value: i64) -> Result<NaiveDateTime, ExecutionError> {
    let micros = match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    };
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| ExecutionError::UnsupportedValue(format!("timestamp out of range: {}", micros)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RelationalConnection;

    fn seeded() -> Result<RelationalConnection, ExecutionError> {
        let connection = RelationalConnection::in_memory()?;
        connection.execute_batch(
            "CREATE TABLE t (id INTEGER, name VARCHAR, score DOUBLE, seen TIMESTAMP, born DATE, flag BOOLEAN);
             INSERT INTO t VALUES
                (1, 'Alice', 9.5, TIMESTAMP '2024-03-01 10:30:00', DATE '1990-05-17', true),
                (2, NULL, NULL, NULL, NULL, NULL);",
        )?;
        Ok(connection)
    }

    fn command(sql: &str, parameters: Vec<Value>) -> SqlCommand {
        SqlCommand {
            sql: sql.to_string(),
            parameters,
        }
    }

    #[test]
    fn test_reads_typed_values() -> Result<(), ExecutionError> {
        let connection = seeded()?;
        let open = connection.open()?;
        let mut rows = Vec::new();
        execute_reader(
            &open,
            &command("SELECT id, name, score, seen, born, flag FROM t ORDER BY id", vec![]),
            6,
            &CancellationToken::new(),
            |row| {
                rows.push(row);
                Ok(())
            },
        )?;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::Int(1));
        assert_eq!(rows[0][1], Value::from("Alice"));
        assert_eq!(rows[0][2], Value::Float(9.5));
        let seen = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(10, 30, 0).unwrap();
        assert_eq!(rows[0][3], Value::DateTime(seen));
        let born = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(rows[0][4], Value::DateTime(born));
        assert_eq!(rows[0][5], Value::Bool(true));
        assert!(rows[1][1..].iter().all(Value::is_null));
        Ok(())
    }

    #[test]
    fn test_binds_parameters_in_order() -> Result<(), ExecutionError> {
        let connection = seeded()?;
        let open = connection.open()?;
        let mut names = Vec::new();
        execute_reader(
            &open,
            &command("SELECT name FROM t WHERE id = ? AND score > ?", vec![Value::Int(1), Value::Float(1.0)]),
            1,
            &CancellationToken::new(),
            |row| {
                names.extend(row);
                Ok(())
            },
        )?;
        assert_eq!(names, vec![Value::from("Alice")]);
        Ok(())
    }

    #[test]
    fn test_cancelled_token_stops_before_running() -> Result<(), ExecutionError> {
        let connection = seeded()?;
        let open = connection.open()?;
        let token = CancellationToken::new();
        token.cancel();

        let result = execute_reader(&open, &command("SELECT id FROM t", vec![]), 1, &token, |_| Ok(()));
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
        Ok(())
    }

    #[test]
    fn test_interrupted_command_reports_cancelled() -> Result<(), ExecutionError> {
        let connection = seeded()?;
        let open = connection.open()?;
        let interrupt = open.interrupt_handle();
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(100));
                token.cancel();
                interrupt.interrupt();
            })
        };

        let started = std::time::Instant::now();
        let result = execute_reader(
            &open,
            &command("SELECT count(*) FROM range(100000000) a, range(1000000) b", vec![]),
            1,
            &token,
            |_| Ok(()),
        );
        canceller.join().unwrap();

        assert!(matches!(result, Err(ExecutionError::Cancelled)), "{:?}", result);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn test_database_errors_pass_through_without_cancellation() -> Result<(), ExecutionError> {
        let connection = seeded()?;
        let open = connection.open()?;
        let result = execute_reader(&open, &command("SELEC 1", vec![]), 1, &CancellationToken::new(), |_| Ok(()));
        assert!(matches!(result, Err(ExecutionError::Database(_))));
        Ok(())
    }

    #[test]
    fn test_non_query_reports_affected_rows() -> Result<(), ExecutionError> {
        let connection = seeded()?;
        let open = connection.open()?;
        let affected = execute_non_query(
            &open,
            &command("UPDATE t SET name = ? WHERE name IS NULL", vec![Value::from("Bob")]),
        )?;
        assert_eq!(affected, 1);
        Ok(())
    }

    #[test]
    fn test_nested_values_cannot_bind() {
        let result = to_duck_value(&Value::List(vec![Value::Int(1)]));
        assert!(matches!(result, Err(ExecutionError::UnsupportedValue(_))));
    }
}
