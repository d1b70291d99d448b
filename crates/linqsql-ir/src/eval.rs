//! In-process evaluation of expression trees
//!
//! Runs whatever part of a query could not be pushed to the server: residual
//! predicates, client-side orderings, the selector and result operators, all
//! over rows that have already been materialized.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::{
    compare, BinaryOp, BodyClause, Expr, FromSource, FunctionRegistry, ParameterValues, QueryModel,
    ResultOperator, ScalarType, UnaryOp, Value, PROPERTY_METHOD,
};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Unknown query source: {0}")]
    UnknownSource(String),

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    #[error("Missing value for parameter: {0}")]
    MissingParameter(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Wrong arguments for {0}")]
    Arity(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Division by zero")]
    DivideByZero,

    #[error("Sequence contains no elements")]
    EmptySequence,

    #[error("Sequence contains more than one element")]
    MoreThanOneElement,

    #[error("Unsupported in-process expression: {0}")]
    Unsupported(String),
}

/// Bindings visible to an expression: one value per query source plus the
/// parameter values and client methods of the current execution.
#[derive(Clone, Copy)]
pub struct EvalScope<'a> {
    sources: &'a BTreeMap<String, Value>,
    parameters: &'a ParameterValues,
    functions: &'a FunctionRegistry,
}

impl<'a> EvalScope<'a> {
    pub fn new(
        sources: &'a BTreeMap<String, Value>,
        parameters: &'a ParameterValues,
        functions: &'a FunctionRegistry,
    ) -> Self {
        Self {
            sources,
            parameters,
            functions,
        }
    }

    fn with_sources<'b>(&self, sources: &'b BTreeMap<String, Value>) -> EvalScope<'b>
    where
        'a: 'b,
    {
        EvalScope {
            sources,
            parameters: self.parameters,
            functions: self.functions,
        }
    }
}

pub fn evaluate(expr: &Expr, scope: &EvalScope<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Constant { value, .. } | Expr::Captured { value, .. } => Ok(value.clone()),
        Expr::Parameter { name, .. } => scope
            .parameters
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::MissingParameter(name.clone())),
        Expr::QuerySource { source } => scope
            .sources
            .get(source)
            .cloned()
            .ok_or_else(|| EvalError::UnknownSource(source.clone())),
        Expr::Member { expr, member } => {
            let target = evaluate(expr, scope)?;
            read_member(target, member)
        }
        Expr::MethodCall {
            receiver: None,
            method,
            args,
        } if method == PROPERTY_METHOD => match &args[..] {
            [source, Expr::Constant {
                value: Value::String(name),
                ..
            }] => read_member(evaluate(source, scope)?, name),
            _ => Err(EvalError::Arity(PROPERTY_METHOD.to_string())),
        },
        Expr::MethodCall {
            receiver,
            method,
            args,
        } => {
            let receiver = receiver.as_deref().map(|r| evaluate(r, scope)).transpose()?;
            let args = args
                .iter()
                .map(|a| evaluate(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            scope.functions.invoke(method, receiver.as_ref(), &args)
        }
        Expr::Binary { op, left, right } => evaluate_binary(*op, left, right, scope),
        Expr::Unary { op, operand } => evaluate_unary(op, evaluate(operand, scope)?),
        Expr::New { members, args } => {
            let mut fields = BTreeMap::new();
            for (member, arg) in members.iter().zip(args) {
                fields.insert(member.clone(), evaluate(arg, scope)?);
            }
            Ok(Value::Object(fields))
        }
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            if evaluate_predicate(test, scope)? {
                evaluate(if_true, scope)
            } else {
                evaluate(if_false, scope)
            }
        }
        Expr::SubQuery { query } => evaluate_subquery(query, scope),
    }
}

/// Evaluates a boolean expression; `null` counts as false.
pub fn evaluate_predicate(expr: &Expr, scope: &EvalScope<'_>) -> Result<bool, EvalError> {
    let value = evaluate(expr, scope)?;
    if value.is_null() {
        return Ok(false);
    }
    value
        .as_bool()
        .ok_or_else(|| EvalError::TypeMismatch(format!("expected boolean, got {:?}", value)))
}

/// Applies result operators, in order, to an already projected sequence.
/// Terminal operators leave a single-element sequence behind.
pub fn apply_result_operators(
    mut sequence: Vec<Value>,
    operators: &[ResultOperator],
    scope: &EvalScope<'_>,
) -> Result<Vec<Value>, EvalError> {
    for op in operators {
        sequence = match op {
            ResultOperator::Take { count } => {
                sequence.truncate(clamp_count(*count));
                sequence
            }
            ResultOperator::Skip { count } => {
                let skip = clamp_count(*count).min(sequence.len());
                sequence.split_off(skip)
            }
            ResultOperator::Distinct => distinct(sequence)?,
            ResultOperator::Count => vec![Value::Int(sequence.len() as i64)],
            ResultOperator::Any => vec![Value::Bool(!sequence.is_empty())],
            ResultOperator::First => {
                vec![sequence.into_iter().next().ok_or(EvalError::EmptySequence)?]
            }
            ResultOperator::FirstOrDefault => {
                vec![sequence.into_iter().next().unwrap_or(Value::Null)]
            }
            ResultOperator::Single => match sequence.len() {
                0 => return Err(EvalError::EmptySequence),
                1 => sequence,
                _ => return Err(EvalError::MoreThanOneElement),
            },
            ResultOperator::Contains { item } => {
                let item = evaluate(item, scope)?;
                vec![Value::Bool(sequence.iter().any(|v| v.loose_eq(&item)))]
            }
        };
    }
    Ok(sequence)
}

fn clamp_count(count: i64) -> usize {
    usize::try_from(count.max(0)).unwrap_or(usize::MAX)
}

fn distinct(sequence: Vec<Value>) -> Result<Vec<Value>, EvalError> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(sequence.len());
    for value in sequence {
        let key = serde_json::to_string(&value)
            .map_err(|e| EvalError::TypeMismatch(format!("unhashable value: {}", e)))?;
        if seen.insert(key) {
            unique.push(value);
        }
    }
    Ok(unique)
}

fn read_member(target: Value, member: &str) -> Result<Value, EvalError> {
    match target {
        Value::Null => Ok(Value::Null),
        Value::Object(mut fields) => fields
            .remove(member)
            .ok_or_else(|| EvalError::MemberNotFound(member.to_string())),
        Value::String(s) if member == "Length" => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) if member == "Count" || member == "Length" => Ok(Value::Int(items.len() as i64)),
        other => Err(EvalError::MemberNotFound(format!("{} on {:?}", member, other))),
    }
}

fn evaluate_binary(op: BinaryOp, left: &Expr, right: &Expr, scope: &EvalScope<'_>) -> Result<Value, EvalError> {
    match op {
        BinaryOp::AndAlso => {
            if !evaluate_predicate(left, scope)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(evaluate_predicate(right, scope)?))
        }
        BinaryOp::OrElse => {
            if evaluate_predicate(left, scope)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(evaluate_predicate(right, scope)?))
        }
        BinaryOp::Coalesce => match evaluate(left, scope)? {
            Value::Null => evaluate(right, scope),
            value => Ok(value),
        },
        _ => {
            let left = evaluate(left, scope)?;
            let right = evaluate(right, scope)?;
            if op.is_comparison() {
                compare_values(op, &left, &right)
            } else {
                arithmetic(op, left, right)
            }
        }
    }
}

fn compare_values(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Equal => return Ok(Value::Bool(left.loose_eq(right))),
        BinaryOp::NotEqual => return Ok(Value::Bool(!left.loose_eq(right))),
        _ => {}
    }
    if left.is_null() || right.is_null() {
        return Ok(Value::Bool(false));
    }
    let ordering = compare(left, right).ok_or_else(|| {
        EvalError::TypeMismatch(format!("cannot compare {:?} with {:?}", left, right))
    })?;
    let result = match op {
        BinaryOp::LessThan => ordering == Ordering::Less,
        BinaryOp::LessThanOrEqual => ordering != Ordering::Greater,
        BinaryOp::GreaterThan => ordering == Ordering::Greater,
        BinaryOp::GreaterThanOrEqual => ordering != Ordering::Less,
        _ => unreachable!("non-comparison operator {:?}", op),
    };
    Ok(Value::Bool(result))
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    let overflow = || EvalError::TypeMismatch(format!("integer overflow in {:?}", op));
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::String(a), b) if op == BinaryOp::Add => Ok(Value::String(a + &display(&b))),
        (a, Value::String(b)) if op == BinaryOp::Add => Ok(Value::String(display(&a) + &b)),
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
                BinaryOp::Subtract => a.checked_sub(b).ok_or_else(overflow)?,
                BinaryOp::Multiply => a.checked_mul(b).ok_or_else(overflow)?,
                BinaryOp::Divide if b == 0 => return Err(EvalError::DivideByZero),
                BinaryOp::Divide => a.checked_div(b).ok_or_else(overflow)?,
                BinaryOp::Modulo if b == 0 => return Err(EvalError::DivideByZero),
                BinaryOp::Modulo => a.checked_rem(b).ok_or_else(overflow)?,
                _ => return Err(EvalError::Unsupported(format!("{:?}", op))),
            };
            Ok(Value::Int(result))
        }
        (a, b) => {
            let (a, b) = match (as_float(&a), as_float(&b)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(EvalError::TypeMismatch(format!(
                        "{:?} on {:?} and {:?}",
                        op, a, b
                    )))
                }
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => a / b,
                BinaryOp::Modulo => a % b,
                _ => return Err(EvalError::Unsupported(format!("{:?}", op))),
            };
            Ok(Value::Float(result))
        }
    }
}

fn evaluate_unary(op: &UnaryOp, operand: Value) -> Result<Value, EvalError> {
    match (op, operand) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Negate, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| EvalError::TypeMismatch("integer overflow in negation".to_string())),
        (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Convert { ty }, value) => Ok(convert(value, ty.underlying_scalar())),
        (op, value) => Err(EvalError::TypeMismatch(format!("{:?} on {:?}", op, value))),
    }
}

fn convert(value: Value, target: Option<ScalarType>) -> Value {
    match (target, value) {
        (Some(ScalarType::Float32 | ScalarType::Float64 | ScalarType::Decimal), Value::Int(i)) => {
            Value::Float(i as f64)
        }
        (
            Some(
                ScalarType::Int8
                | ScalarType::Int16
                | ScalarType::Int32
                | ScalarType::Int64
                | ScalarType::UInt8
                | ScalarType::UInt16
                | ScalarType::UInt32
                | ScalarType::UInt64,
            ),
            Value::Float(f),
        ) => Value::Int(f.trunc() as i64),
        (_, value) => value,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Guid(id) => id.to_string(),
        Value::DateTime(dt) => dt.to_string(),
        other => format!("{:?}", other),
    }
}

fn evaluate_subquery(query: &QueryModel, scope: &EvalScope<'_>) -> Result<Value, EvalError> {
    let collection = match &query.main_from.source {
        FromSource::Expression { expr } => evaluate(expr, scope)?,
        FromSource::Entity { entity, .. } => {
            return Err(EvalError::Unsupported(format!("subquery over entity set {}", entity)))
        }
    };
    let items = match collection {
        Value::List(items) => items,
        Value::Null => Vec::new(),
        other => {
            return Err(EvalError::TypeMismatch(format!(
                "subquery source is not a collection: {:?}",
                other
            )))
        }
    };

    let mut projected = Vec::with_capacity(items.len());
    'items: for item in items {
        let mut sources = scope.sources.clone();
        sources.insert(query.main_from.item_name.clone(), item);
        let inner = scope.with_sources(&sources);

        for clause in &query.body_clauses {
            match clause {
                BodyClause::Where { predicate } => {
                    if !evaluate_predicate(predicate, &inner)? {
                        continue 'items;
                    }
                }
                other => {
                    return Err(EvalError::Unsupported(format!(
                        "in-process subquery clause {:?}",
                        other
                    )))
                }
            }
        }
        projected.push(evaluate(&query.select, &inner)?);
    }

    let mut result = apply_result_operators(projected, &query.result_operators, scope)?;
    match query.result_operators.last() {
        Some(op) if op.is_terminal() => Ok(result.pop().unwrap_or(Value::Null)),
        _ => Ok(Value::List(result)),
    }
}
