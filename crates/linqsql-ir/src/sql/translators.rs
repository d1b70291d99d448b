//! Method and member translators
//!
//! Turn an already classified receiver and arguments into a SQL node. A
//! translator returning `None` sends the call to client evaluation.

use crate::sql::expressions::{SqlBinaryOp, SqlExpr};
use crate::Value;

pub trait MethodCallTranslator: Send + Sync {
    fn translate_method(&self, method: &str, receiver: &SqlExpr, args: &[SqlExpr]) -> Option<SqlExpr>;

    fn translate_member(&self, _member: &str, _receiver: &SqlExpr) -> Option<SqlExpr> {
        None
    }
}

/// Escape character of every LIKE the translators build.
pub const LIKE_ESCAPE: char = '\\';

/// Escapes `%`, `_` and the escape character so `value` matches literally.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_') || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// String methods: `Contains`/`StartsWith`/`EndsWith` become LIKE,
/// `ToUpper`/`ToLower`/`Trim` and `Length` become functions.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringMethodTranslator;

impl StringMethodTranslator {
    fn like(receiver: &SqlExpr, pattern: SqlExpr) -> SqlExpr {
        SqlExpr::Like {
            operand: Box::new(receiver.clone()),
            pattern: Box::new(pattern),
        }
    }

    /// The argument as a literal pattern fragment. Parameters are escaped
    /// server-side with nested `replace` calls.
    fn literal(arg: &SqlExpr) -> SqlExpr {
        if let SqlExpr::Constant(Value::String(s)) = arg {
            return SqlExpr::Constant(Value::String(escape_like(s)));
        }
        let escape = LIKE_ESCAPE.to_string();
        [escape.clone(), "%".to_string(), "_".to_string()]
            .into_iter()
            .fold(arg.clone(), |expr, special| SqlExpr::Function {
                name: "replace".to_string(),
                args: vec![
                    expr,
                    SqlExpr::Constant(Value::String(special.clone())),
                    SqlExpr::Constant(Value::String(format!("{}{}", escape, special))),
                ],
            })
    }

    fn wildcard() -> SqlExpr {
        SqlExpr::Constant(Value::String("%".to_string()))
    }

    fn concat(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::binary(SqlBinaryOp::Concat, left, right)
    }

    fn function(name: &str, receiver: &SqlExpr) -> SqlExpr {
        SqlExpr::Function {
            name: name.to_string(),
            args: vec![receiver.clone()],
        }
    }
}

impl MethodCallTranslator for StringMethodTranslator {
    fn translate_method(&self, method: &str, receiver: &SqlExpr, args: &[SqlExpr]) -> Option<SqlExpr> {
        match (method, args) {
            ("Contains", [arg]) => Some(Self::like(
                receiver,
                Self::concat(Self::concat(Self::wildcard(), Self::literal(arg)), Self::wildcard()),
            )),
            ("StartsWith", [arg]) => Some(Self::like(receiver, Self::concat(Self::literal(arg), Self::wildcard()))),
            ("EndsWith", [arg]) => Some(Self::like(receiver, Self::concat(Self::wildcard(), Self::literal(arg)))),
            ("Equals", [arg]) => Some(SqlExpr::binary(SqlBinaryOp::Equal, receiver.clone(), arg.clone())),
            ("ToUpper", []) => Some(Self::function("UPPER", receiver)),
            ("ToLower", []) => Some(Self::function("LOWER", receiver)),
            ("Trim", []) => Some(Self::function("TRIM", receiver)),
            _ => None,
        }
    }

    fn translate_member(&self, member: &str, receiver: &SqlExpr) -> Option<SqlExpr> {
        match member {
            "Length" => Some(Self::function("LENGTH", receiver)),
            _ => None,
        }
    }
}

/// Tries each translator in registration order.
pub struct CompositeMethodTranslator {
    translators: Vec<Box<dyn MethodCallTranslator>>,
}

impl CompositeMethodTranslator {
    pub fn new() -> Self {
        Self {
            translators: vec![Box::new(StringMethodTranslator)],
        }
    }

    pub fn empty() -> Self {
        Self {
            translators: Vec::new(),
        }
    }

    pub fn with(mut self, translator: impl MethodCallTranslator + 'static) -> Self {
        self.translators.push(Box::new(translator));
        self
    }
}

impl Default for CompositeMethodTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodCallTranslator for CompositeMethodTranslator {
    fn translate_method(&self, method: &str, receiver: &SqlExpr, args: &[SqlExpr]) -> Option<SqlExpr> {
        self.translators
            .iter()
            .find_map(|t| t.translate_method(method, receiver, args))
    }

    fn translate_member(&self, member: &str, receiver: &SqlExpr) -> Option<SqlExpr> {
        self.translators
            .iter()
            .find_map(|t| t.translate_member(member, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver() -> SqlExpr {
        SqlExpr::Parameter("name".to_string())
    }

    #[test]
    fn test_contains_becomes_like() {
        let translated = StringMethodTranslator
            .translate_method("Contains", &receiver(), &[SqlExpr::Constant(Value::from("z"))])
            .unwrap();
        assert!(matches!(translated, SqlExpr::Like { .. }));
    }

    #[test]
    fn test_like_wildcards_in_arguments_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");

        let constant = StringMethodTranslator
            .translate_method("StartsWith", &receiver(), &[SqlExpr::Constant(Value::from("a_b"))])
            .unwrap();
        let SqlExpr::Like { pattern, .. } = constant else {
            panic!("expected LIKE, got {:?}", constant);
        };
        assert_eq!(
            *pattern,
            SqlExpr::binary(
                SqlBinaryOp::Concat,
                SqlExpr::Constant(Value::from("a\\_b")),
                SqlExpr::Constant(Value::from("%")),
            )
        );

        let parameter = StringMethodTranslator
            .translate_method("EndsWith", &receiver(), &[SqlExpr::Parameter("suffix".to_string())])
            .unwrap();
        let SqlExpr::Like { pattern, .. } = parameter else {
            panic!("expected LIKE, got {:?}", parameter);
        };
        let SqlExpr::Binary { right, .. } = *pattern else {
            panic!("expected concatenation");
        };
        assert!(matches!(*right, SqlExpr::Function { ref name, .. } if name == "replace"));
    }

    #[test]
    fn test_unknown_method_is_not_translated() {
        let translator = CompositeMethodTranslator::new();
        assert!(translator.translate_method("Frobnicate", &receiver(), &[]).is_none());
        assert!(translator.translate_method("Contains", &receiver(), &[]).is_none());
    }

    #[test]
    fn test_length_member() {
        let translator = CompositeMethodTranslator::new();
        assert_eq!(
            translator.translate_member("Length", &receiver()),
            Some(SqlExpr::Function {
                name: "LENGTH".to_string(),
                args: vec![receiver()],
            })
        );
    }

    struct Soundex;

    impl MethodCallTranslator for Soundex {
        fn translate_method(&self, method: &str, receiver: &SqlExpr, _args: &[SqlExpr]) -> Option<SqlExpr> {
            (method == "Soundex").then(|| SqlExpr::Function {
                name: "SOUNDEX".to_string(),
                args: vec![receiver.clone()],
            })
        }
    }

    #[test]
    fn test_custom_translator_is_consulted() {
        let translator = CompositeMethodTranslator::new().with(Soundex);
        assert!(translator.translate_method("Soundex", &receiver(), &[]).is_some());
        assert!(CompositeMethodTranslator::new()
            .translate_method("Soundex", &receiver(), &[])
            .is_none());
    }
}
