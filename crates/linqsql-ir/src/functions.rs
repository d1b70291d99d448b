//! Client-side method registry
//!
//! Methods the evaluator can run in-process over materialized rows. A method
//! being registered here says nothing about SQL translation: anything the
//! method translators do not recognise is evaluated through this registry.
//!
//! Built-in methods:
//! - Contains / StartsWith / EndsWith / Equals - string matching
//! - ToUpper / ToLower / Trim - string shaping

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::eval::EvalError;
use crate::Value;

/// `(receiver, arguments) -> result`; static methods get no receiver.
pub type ClientMethod = Arc<dyn Fn(Option<&Value>, &[Value]) -> Result<Value, EvalError> + Send + Sync>;

#[derive(Clone)]
pub struct FunctionRegistry {
    methods: HashMap<String, ClientMethod>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            methods: HashMap::new(),
        };
        registry.register_builtins();
        registry
    }

    /// Registry with no methods at all.
    pub fn empty() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    fn register_builtins(&mut self) {
        self.register("Contains", |receiver, args| {
            string_predicate(receiver, args, |s, pattern| s.contains(pattern))
        });
        self.register("StartsWith", |receiver, args| {
            string_predicate(receiver, args, |s, pattern| s.starts_with(pattern))
        });
        self.register("EndsWith", |receiver, args| {
            string_predicate(receiver, args, |s, pattern| s.ends_with(pattern))
        });
        self.register("Equals", |receiver, args| match (receiver, args) {
            (Some(receiver), [other]) => Ok(Value::Bool(receiver.loose_eq(other))),
            _ => Err(EvalError::Arity("Equals".to_string())),
        });
        self.register("ToUpper", |receiver, _| {
            string_map(receiver, "ToUpper", |s| s.to_uppercase())
        });
        self.register("ToLower", |receiver, _| {
            string_map(receiver, "ToLower", |s| s.to_lowercase())
        });
        self.register("Trim", |receiver, _| {
            string_map(receiver, "Trim", |s| s.trim().to_string())
        });
    }

    pub fn register<F>(&mut self, name: impl Into<String>, method: F)
    where
        F: Fn(Option<&Value>, &[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
    }

    pub fn get(&self, name: &str) -> Option<&ClientMethod> {
        self.methods.get(name)
    }

    pub fn invoke(&self, name: &str, receiver: Option<&Value>, args: &[Value]) -> Result<Value, EvalError> {
        let method = self
            .get(name)
            .ok_or_else(|| EvalError::MethodNotFound(name.to_string()))?;
        method(receiver, args)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("methods", &names).finish()
    }
}

fn string_predicate(
    receiver: Option<&Value>,
    args: &[Value],
    test: impl Fn(&str, &str) -> bool,
) -> Result<Value, EvalError> {
    match (receiver, args) {
        (Some(Value::Null), _) => Ok(Value::Null),
        (Some(Value::String(s)), [Value::String(pattern)]) => Ok(Value::Bool(test(s, pattern))),
        (Some(_), [Value::Null]) => Ok(Value::Null),
        (Some(other), _) => Err(EvalError::TypeMismatch(format!(
            "expected string receiver and argument, got {:?}",
            other
        ))),
        (None, _) => Err(EvalError::Arity("string method without receiver".to_string())),
    }
}

fn string_map(receiver: Option<&Value>, name: &str, map: impl Fn(&str) -> String) -> Result<Value, EvalError> {
    match receiver {
        Some(Value::String(s)) => Ok(Value::String(map(s))),
        Some(Value::Null) => Ok(Value::Null),
        Some(other) => Err(EvalError::TypeMismatch(format!("{} on {:?}", name, other))),
        None => Err(EvalError::Arity(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = FunctionRegistry::new();
        assert!(registry.get("Contains").is_some());
        assert!(registry.get("ToUpper").is_some());
        assert!(registry.get("Frobnicate").is_none());
    }

    #[test]
    fn test_invoke_contains() {
        let registry = FunctionRegistry::new();
        let result = registry
            .invoke("Contains", Some(&Value::from("Zbyszko")), &[Value::from("z")])
            .unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn test_custom_static_method() {
        let mut registry = FunctionRegistry::empty();
        registry.register("IsVip", |_, args| Ok(Value::Bool(args.first() == Some(&Value::from("ALFKI")))));

        assert_eq!(
            registry.invoke("IsVip", None, &[Value::from("ALFKI")]).unwrap(),
            Value::Bool(true)
        );
        assert!(matches!(
            registry.invoke("Contains", None, &[]),
            Err(EvalError::MethodNotFound(_))
        ));
    }
}
