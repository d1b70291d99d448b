//! Relational connection with open/closed tracking
//!
//! The database handle stays resident; each command runs on its own cloned
//! connection, which counts as open until the guard is dropped.

use duckdb::Connection;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

use crate::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

#[derive(Clone)]
pub struct RelationalConnection {
    database: Arc<Mutex<Connection>>,
    open: Arc<AtomicUsize>,
}

impl RelationalConnection {
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn in_memory() -> Result<Self, ExecutionError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self {
            database: Arc::new(Mutex::new(connection)),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Opens a connection to the same database for one command.
    pub fn open(&self) -> Result<OpenConnection, ExecutionError> {
        let connection = self
            .database
            .lock()
            .map_err(|_| ExecutionError::Poisoned)?
            .try_clone()?;
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(open, "Opened connection");
        Ok(OpenConnection {
            connection,
            open: Arc::clone(&self.open),
        })
    }

    /// `Open` while any command still holds a connection.
    pub fn state(&self) -> ConnectionState {
        if self.open.load(Ordering::SeqCst) == 0 {
            ConnectionState::Closed
        } else {
            ConnectionState::Open
        }
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), ExecutionError> {
        let connection = self.open()?;
        connection.execute_batch(sql)?;
        Ok(())
    }
}

/// A connection in use; closes (and stops counting as open) on drop.
pub struct OpenConnection {
    connection: Connection,
    open: Arc<AtomicUsize>,
}

impl Deref for OpenConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        let open = self.open.fetch_sub(1, Ordering::SeqCst) - 1;
        trace!(open, "Closed connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_follows_open_guards() -> Result<(), ExecutionError> {
        let connection = RelationalConnection::in_memory()?;
        assert_eq!(connection.state(), ConnectionState::Closed);

        let first = connection.open()?;
        let second = connection.open()?;
        assert_eq!(connection.state(), ConnectionState::Open);

        drop(first);
        assert_eq!(connection.state(), ConnectionState::Open);
        drop(second);
        assert_eq!(connection.state(), ConnectionState::Closed);
        Ok(())
    }

    #[test]
    fn test_clones_share_the_database() -> Result<(), ExecutionError> {
        let connection = RelationalConnection::in_memory()?;
        connection.execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2);")?;

        let open = connection.clone().open()?;
        let count: i64 = open.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?;
        assert_eq!(count, 2);
        Ok(())
    }
}
