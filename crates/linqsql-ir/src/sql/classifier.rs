//! Expression classifier
//!
//! Walks one predicate, ordering key or join key and decides node by node
//! whether it can be rendered as SQL. Every visit returns a [`Classification`];
//! the client-evaluation flag is sticky upward. Failing to classify is never an
//! error, it just leaves more work for the client evaluator.

use crate::sql::binder::bind_property;
use crate::sql::expressions::{InExpression, InValues, SqlBinaryOp, SqlExpr};
use crate::sql::translators::MethodCallTranslator;
use crate::sql::SelectExpression;
use crate::{
    BinaryOp, DataType, Expr, FromSource, Model, QueryModel, ResultOperator, UnaryOp, Value,
    PROPERTY_METHOD,
};

/// Result of classifying one node.
///
/// `expression` is the SQL that can be pushed for the node. With
/// `requires_client_eval` set it is at most a pre-filter: rows it keeps
/// still have to pass the original expression in-process.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub expression: Option<SqlExpr>,
    pub requires_client_eval: bool,
}

impl Classification {
    pub fn server(expression: SqlExpr) -> Self {
        Self {
            expression: Some(expression),
            requires_client_eval: false,
        }
    }

    pub fn client() -> Self {
        Self {
            expression: None,
            requires_client_eval: true,
        }
    }

    /// Fully translated, nothing left for the client.
    pub fn is_complete(&self) -> bool {
        self.expression.is_some() && !self.requires_client_eval
    }

    fn into_complete(self) -> Option<SqlExpr> {
        if self.requires_client_eval {
            None
        } else {
            self.expression
        }
    }
}

pub struct ExpressionClassifier<'a> {
    model: &'a Model,
    select: &'a SelectExpression,
    translator: &'a dyn MethodCallTranslator,
}

impl<'a> ExpressionClassifier<'a> {
    pub fn new(model: &'a Model, select: &'a SelectExpression, translator: &'a dyn MethodCallTranslator) -> Self {
        Self {
            model,
            select,
            translator,
        }
    }

    pub fn classify(&self, expr: &Expr) -> Classification {
        match expr {
            Expr::Binary { op, left, right } => match op {
                BinaryOp::AndAlso => self.classify_and(left, right),
                BinaryOp::OrElse => self.classify_or(left, right),
                op if op.is_comparison() => self.classify_comparison(*op, left, right),
                _ => Classification::client(),
            },
            Expr::Constant { value, ty } | Expr::Captured { value, ty, .. } => classify_constant(value, ty),
            Expr::Parameter { name, ty } => {
                if ty.is_sql_representable() {
                    Classification::server(SqlExpr::Parameter(name.clone()))
                } else {
                    Classification::client()
                }
            }
            Expr::Member { expr, member } => self.classify_member(expr, member),
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => self.classify_method_call(receiver.as_deref(), method, args),
            Expr::Unary { op, operand } => self.classify_unary(op, operand),
            Expr::New { members, args } => self.classify_new(members, args),
            Expr::SubQuery { query } => self.classify_subquery(query),
            Expr::QuerySource { .. } | Expr::Conditional { .. } => Classification::client(),
        }
    }

    /// Either side may be pushed on its own; the other is deferred.
    fn classify_and(&self, left: &Expr, right: &Expr) -> Classification {
        let left = self.classify(left);
        let right = self.classify(right);
        let requires_client_eval = left.requires_client_eval || right.requires_client_eval;
        let expression = match (left.expression, right.expression) {
            (Some(l), Some(r)) => Some(SqlExpr::and(l, r)),
            (Some(side), None) | (None, Some(side)) => Some(side),
            (None, None) => None,
        };
        Classification {
            expression,
            requires_client_eval,
        }
    }

    /// Pushed only when both sides produced SQL.
    fn classify_or(&self, left: &Expr, right: &Expr) -> Classification {
        let left = self.classify(left);
        let right = self.classify(right);
        let requires_client_eval = left.requires_client_eval || right.requires_client_eval;
        match (left.expression, right.expression) {
            (Some(l), Some(r)) => Classification {
                expression: Some(SqlExpr::or(l, r)),
                requires_client_eval,
            },
            _ => Classification::client(),
        }
    }

    fn classify_comparison(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Classification {
        let left = self.classify(left).into_complete();
        let right = self.classify(right).into_complete();
        let (Some(left), Some(right)) = (left, right) else {
            return Classification::client();
        };
        let Some(op) = SqlBinaryOp::from_comparison(op) else {
            return Classification::client();
        };

        let expression = match op {
            SqlBinaryOp::Equal | SqlBinaryOp::NotEqual => equality(op, left, right),
            _ if matches!(left, SqlExpr::Composite(_)) || matches!(right, SqlExpr::Composite(_)) => None,
            _ => Some(SqlExpr::binary(op, left, right)),
        };
        expression.map_or_else(Classification::client, Classification::server)
    }

    fn classify_member(&self, target: &Expr, member: &str) -> Classification {
        if let Expr::QuerySource { source } = target {
            return self.bind(source, member);
        }
        match self.classify(target).into_complete() {
            Some(receiver) => self
                .translator
                .translate_member(member, &receiver)
                .map_or_else(Classification::client, Classification::server),
            None => Classification::client(),
        }
    }

    fn classify_method_call(&self, receiver: Option<&Expr>, method: &str, args: &[Expr]) -> Classification {
        let Some(receiver) = receiver else {
            return match (method, args) {
                (
                    PROPERTY_METHOD,
                    [Expr::QuerySource { source }, Expr::Constant {
                        value: Value::String(property),
                        ..
                    }],
                ) => self.bind(source, property),
                _ => Classification::client(),
            };
        };

        let Some(receiver) = self.classify(receiver).into_complete() else {
            return Classification::client();
        };
        let mut translated_args = Vec::with_capacity(args.len());
        for arg in args {
            match self.classify(arg).into_complete() {
                Some(SqlExpr::Composite(_)) | None => return Classification::client(),
                Some(arg) => translated_args.push(arg),
            }
        }
        if matches!(receiver, SqlExpr::Composite(_)) {
            return Classification::client();
        }

        self.translator
            .translate_method(method, &receiver, &translated_args)
            .map_or_else(Classification::client, Classification::server)
    }

    fn classify_unary(&self, op: &UnaryOp, operand: &Expr) -> Classification {
        match op {
            UnaryOp::Convert { .. } => self.classify(operand),
            UnaryOp::Not => match self.classify(operand).into_complete() {
                Some(SqlExpr::In(expr)) => Classification::server(SqlExpr::NotIn(expr)),
                Some(SqlExpr::NotIn(expr)) => Classification::server(SqlExpr::In(expr)),
                Some(SqlExpr::Composite(_)) | None => Classification::client(),
                Some(expr) => Classification::server(SqlExpr::Not(Box::new(expr))),
            },
            UnaryOp::Negate => Classification::client(),
        }
    }

    fn classify_new(&self, members: &[String], args: &[Expr]) -> Classification {
        if args.is_empty() || members.len() != args.len() {
            return Classification::client();
        }
        let mut elements = Vec::with_capacity(args.len());
        for arg in args {
            match self.classify(arg).into_complete() {
                Some(element) => elements.push(element),
                None => return Classification::client(),
            }
        }
        Classification::server(SqlExpr::Composite(elements))
    }

    /// `collection.Contains(column)` as `column IN (...)`. Whatever tainted the
    /// item does not leak out: the IN either forms or the node goes to the client.
    fn classify_subquery(&self, query: &QueryModel) -> Classification {
        if !query.is_identity_query() {
            return Classification::client();
        }
        let [ResultOperator::Contains { item }] = &query.result_operators[..] else {
            return Classification::client();
        };
        let FromSource::Expression { expr: collection } = &query.main_from.source else {
            return Classification::client();
        };
        let Some(SqlExpr::Column(column)) = self.classify(item).into_complete() else {
            return Classification::client();
        };

        let values = match collection {
            Expr::Parameter { name, ty } => match ty.element_type() {
                Some(element) if element.is_sql_representable() => InValues::Parameter(name.clone()),
                _ => return Classification::client(),
            },
            Expr::Constant {
                value: Value::List(items),
                ..
            }
            | Expr::Captured {
                value: Value::List(items),
                ..
            } => {
                if items
                    .iter()
                    .any(|v| matches!(v, Value::List(_) | Value::Object(_)))
                {
                    return Classification::client();
                }
                InValues::List(items.iter().cloned().map(SqlExpr::Constant).collect())
            }
            _ => return Classification::client(),
        };

        Classification::server(SqlExpr::In(InExpression { column, values }))
    }

    fn bind(&self, source: &str, property: &str) -> Classification {
        bind_property(self.model, self.select, source, property)
            .map(SqlExpr::Column)
            .map_or_else(Classification::client, Classification::server)
    }
}

fn classify_constant(value: &Value, ty: &DataType) -> Classification {
    if value.is_null() || ty.is_sql_representable() {
        Classification::server(SqlExpr::Constant(value.clone()))
    } else {
        Classification::client()
    }
}

/// `=` / `!=` with the null rewrite and element-wise unfolding of composites.
fn equality(op: SqlBinaryOp, left: SqlExpr, right: SqlExpr) -> Option<SqlExpr> {
    let equal = op == SqlBinaryOp::Equal;
    match (left, right) {
        (SqlExpr::Composite(left), SqlExpr::Composite(right)) => {
            if left.len() != right.len() {
                return None;
            }
            let combine = if equal { SqlExpr::and } else { SqlExpr::or };
            let mut chain: Option<SqlExpr> = None;
            for (l, r) in left.into_iter().zip(right) {
                let element = equality(op, l, r)?;
                chain = Some(match chain {
                    Some(chain) => combine(chain, element),
                    None => element,
                });
            }
            chain
        }
        (SqlExpr::Composite(_), _) | (_, SqlExpr::Composite(_)) => None,
        (l, r) if l.is_null_constant() && r.is_null_constant() => Some(SqlExpr::Constant(Value::Bool(equal))),
        (operand, null) | (null, operand) if null.is_null_constant() => Some(if equal {
            SqlExpr::IsNull(Box::new(operand))
        } else {
            SqlExpr::IsNotNull(Box::new(operand))
        }),
        (l, r) => Some(SqlExpr::binary(op, l, r)),
    }
}
