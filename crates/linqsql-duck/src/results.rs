//! Lazy typed result sequence

use linqsql_ir::Value;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::ExecutionError;

type Execution<'p> = Box<dyn FnOnce() -> Result<Vec<Value>, ExecutionError> + Send + 'p>;

enum State<'p> {
    Pending(Execution<'p>),
    Ready(std::vec::IntoIter<Value>),
    Done,
}

/// Results of one query execution. Nothing runs until the first call to
/// `next`; an execution failure is yielded once, then the sequence ends.
pub struct QueryResults<'p, T> {
    state: State<'p>,
    _marker: PhantomData<fn() -> T>,
}

impl<'p, T: DeserializeOwned> QueryResults<'p, T> {
    pub(crate) fn pending(execution: Execution<'p>) -> Self {
        Self {
            state: State::Pending(execution),
            _marker: PhantomData,
        }
    }

    pub(crate) fn ready(values: Vec<Value>) -> Self {
        Self {
            state: State::Ready(values.into_iter()),
            _marker: PhantomData,
        }
    }

    /// Whether the query has run.
    pub fn is_executed(&self) -> bool {
        !matches!(self.state, State::Pending(_))
    }
}

impl<T: DeserializeOwned> Iterator for QueryResults<'_, T> {
    type Item = Result<T, ExecutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let State::Pending(_) = self.state {
            let State::Pending(execution) = std::mem::replace(&mut self.state, State::Done) else {
                return None;
            };
            match execution() {
                Ok(values) => self.state = State::Ready(values.into_iter()),
                Err(e) => return Some(Err(e)),
            }
        }

        match &mut self.state {
            State::Ready(values) => values
                .next()
                .map(|value| serde_json::from_value(value.into_json()).map_err(ExecutionError::from)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_executes_on_first_next_only() {
        let runs = AtomicUsize::new(0);
        let mut results: QueryResults<'_, i64> = QueryResults::pending(Box::new(|| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Value::Int(1), Value::Int(2)])
        }));

        assert!(!results.is_executed());
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert_eq!(results.next().unwrap().unwrap(), 1);
        assert_eq!(results.next().unwrap().unwrap(), 2);
        assert!(results.next().is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_yielded_once() {
        let mut results: QueryResults<'_, i64> = QueryResults::pending(Box::new(|| Err(ExecutionError::Cancelled)));
        assert!(matches!(results.next(), Some(Err(ExecutionError::Cancelled))));
        assert!(results.next().is_none());
    }

    #[test]
    fn test_shape_mismatch_is_a_materialize_error() {
        let mut results: QueryResults<'_, i64> = QueryResults::ready(vec![Value::from("not a number")]);
        assert!(matches!(results.next(), Some(Err(ExecutionError::Materialize(_)))));
    }
}
