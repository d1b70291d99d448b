//! Fluent construction of query models and expression trees

use crate::{
    BinaryOp, BodyClause, DataType, Expr, FromClause, FromSource, QueryModel, ResultOperator,
    SortKey, UnaryOp, Value, PROPERTY_METHOD,
};

/// Builds a [`QueryModel`] clause by clause, in the order a composed query
/// applies them.
#[derive(Debug, Clone)]
pub struct Query {
    model: QueryModel,
}

impl Query {
    /// `from {item} in Set<{entity}>()`
    pub fn from_entity(item: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::from_source(
            item.into(),
            FromSource::Entity {
                entity: entity.into(),
                sql: None,
            },
        )
    }

    /// `from {item} in Set<{entity}>().FromSql({sql})`
    pub fn from_sql(
        item: impl Into<String>,
        entity: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self::from_source(
            item.into(),
            FromSource::Entity {
                entity: entity.into(),
                sql: Some(sql.into()),
            },
        )
    }

    /// `from {item} in {collection}` over an in-process collection.
    pub fn from_collection(item: impl Into<String>, collection: Expr) -> Self {
        Self::from_source(item.into(), FromSource::Expression { expr: collection })
    }

    fn from_source(item: String, source: FromSource) -> Self {
        Self {
            model: QueryModel {
                select: Expr::source(item.clone()),
                main_from: FromClause {
                    item_name: item,
                    source,
                },
                body_clauses: Vec::new(),
                result_operators: Vec::new(),
            },
        }
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.model.body_clauses.push(BodyClause::Where { predicate });
        self
    }

    pub fn from_also(mut self, item: impl Into<String>, entity: impl Into<String>) -> Self {
        self.model.body_clauses.push(BodyClause::AdditionalFrom {
            from: FromClause {
                item_name: item.into(),
                source: FromSource::Entity {
                    entity: entity.into(),
                    sql: None,
                },
            },
        });
        self
    }

    pub fn join(
        mut self,
        item: impl Into<String>,
        entity: impl Into<String>,
        outer_key: Expr,
        inner_key: Expr,
    ) -> Self {
        self.model.body_clauses.push(BodyClause::Join {
            item_name: item.into(),
            entity: entity.into(),
            outer_key,
            inner_key,
        });
        self
    }

    /// Starts a new ordering; replaces any earlier one.
    pub fn order_by(mut self, expr: Expr, desc: bool) -> Self {
        self.model.body_clauses.push(BodyClause::OrderBy {
            keys: vec![SortKey { expr, desc }],
        });
        self
    }

    /// Appends a key to the most recent ordering.
    pub fn then_by(mut self, expr: Expr, desc: bool) -> Self {
        match self.model.body_clauses.last_mut() {
            Some(BodyClause::OrderBy { keys }) => keys.push(SortKey { expr, desc }),
            _ => return self.order_by(expr, desc),
        }
        self
    }

    pub fn select(mut self, selector: Expr) -> Self {
        self.model.select = selector;
        self
    }

    pub fn take(self, count: i64) -> Self {
        self.result(ResultOperator::Take { count })
    }

    pub fn skip(self, count: i64) -> Self {
        self.result(ResultOperator::Skip { count })
    }

    pub fn result(mut self, op: ResultOperator) -> Self {
        self.model.result_operators.push(op);
        self
    }

    pub fn build(self) -> QueryModel {
        self.model
    }
}

impl From<Query> for QueryModel {
    fn from(query: Query) -> Self {
        query.build()
    }
}

impl Expr {
    pub fn source(name: impl Into<String>) -> Self {
        Expr::QuerySource {
            source: name.into(),
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = value.data_type();
        Expr::Constant { value, ty }
    }

    pub fn typed_constant(value: impl Into<Value>, ty: DataType) -> Self {
        Expr::Constant {
            value: value.into(),
            ty,
        }
    }

    pub fn null() -> Self {
        Expr::Constant {
            value: Value::Null,
            ty: DataType::Object("null".to_string()),
        }
    }

    pub fn parameter(name: impl Into<String>, ty: DataType) -> Self {
        Expr::Parameter {
            name: name.into(),
            ty,
        }
    }

    /// A closure variable with its current value.
    pub fn captured(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = value.data_type();
        Expr::Captured {
            name: name.into(),
            value,
            ty,
        }
    }

    pub fn typed_captured(name: impl Into<String>, value: impl Into<Value>, ty: DataType) -> Self {
        Expr::Captured {
            name: name.into(),
            value: value.into(),
            ty,
        }
    }

    /// `Property(source, "name")`
    pub fn property(source: impl Into<String>, name: impl Into<String>) -> Self {
        let name: String = name.into();
        Expr::MethodCall {
            receiver: None,
            method: PROPERTY_METHOD.to_string(),
            args: vec![Expr::source(source), Expr::constant(name)],
        }
    }

    pub fn static_call(method: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::MethodCall {
            receiver: None,
            method: method.into(),
            args,
        }
    }

    pub fn member(self, member: impl Into<String>) -> Self {
        Expr::Member {
            expr: Box::new(self),
            member: member.into(),
        }
    }

    pub fn call(self, method: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::MethodCall {
            receiver: Some(Box::new(self)),
            method: method.into(),
            args,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equal(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::Equal, self, other)
    }

    pub fn not_equal(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::NotEqual, self, other)
    }

    pub fn less_than(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::LessThan, self, other)
    }

    pub fn less_than_or_equal(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::LessThanOrEqual, self, other)
    }

    pub fn greater_than(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::GreaterThan, self, other)
    }

    pub fn greater_than_or_equal(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::GreaterThanOrEqual, self, other)
    }

    pub fn and_also(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::AndAlso, self, other)
    }

    pub fn or_else(self, other: Expr) -> Self {
        Expr::binary(BinaryOp::OrElse, self, other)
    }

    /// Wrap an expression in a logical NOT.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn convert(self, ty: DataType) -> Self {
        Expr::Unary {
            op: UnaryOp::Convert { ty },
            operand: Box::new(self),
        }
    }

    /// Anonymous object construction: `new { a = .., b = .. }`.
    pub fn new_object(fields: Vec<(&str, Expr)>) -> Self {
        let (members, args) = fields
            .into_iter()
            .map(|(name, expr)| (name.to_string(), expr))
            .unzip();
        Expr::New { members, args }
    }

    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Self {
        Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    /// `collection.Contains(item)`, shaped as the identity subquery a query
    /// parser produces for it.
    pub fn contains(collection: Expr, item: Expr) -> Self {
        Expr::SubQuery {
            query: Box::new(
                Query::from_collection("__item", collection)
                    .result(ResultOperator::Contains { item })
                    .build(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_then_by_extends_last_ordering() {
        let model = Query::from_entity("c", "Customer")
            .order_by(Expr::source("c").member("City"), false)
            .then_by(Expr::source("c").member("ContactName"), true)
            .build();

        match &model.body_clauses[..] {
            [BodyClause::OrderBy { keys }] => {
                assert_eq!(keys.len(), 2);
                assert!(keys[1].desc);
            }
            other => panic!("expected a single ordering clause, got {:?}", other),
        }
    }

    #[test]
    fn test_contains_builds_identity_subquery() {
        let expr = Expr::contains(
            Expr::parameter("ids", DataType::sequence_of(DataType::scalar(crate::ScalarType::Int32))),
            Expr::source("c").member("Id"),
        );

        let Expr::SubQuery { query } = expr else {
            panic!("expected subquery");
        };
        assert!(query.is_identity_query());
        assert_eq!(query.result_operators.len(), 1);
    }
}
