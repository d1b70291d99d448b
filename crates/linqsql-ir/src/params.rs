//! Parameter extraction
//!
//! Lifts captured closure values and non-null literals out of a query model
//! into named parameters so that two queries differing only in those values
//! share one shape (and one cached plan).

use std::collections::BTreeMap;

use crate::{BodyClause, Expr, FromClause, FromSource, QueryModel, ResultOperator, SortKey, Value};
use crate::{DataType, PROPERTY_METHOD};

/// Runtime values bound to parameter names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterValues {
    values: BTreeMap<String, Value>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn extend(&mut self, other: ParameterValues) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// A query model with its literals replaced by parameters, plus the values
/// those parameters had.
#[derive(Debug, Clone)]
pub struct ParameterizedQuery {
    pub model: QueryModel,
    pub parameters: ParameterValues,
}

pub fn extract_parameters(model: &QueryModel) -> ParameterizedQuery {
    let mut extractor = ParameterExtractor::default();
    let model = extractor.query(model.clone());
    ParameterizedQuery {
        model,
        parameters: extractor.values,
    }
}

#[derive(Default)]
struct ParameterExtractor {
    values: ParameterValues,
    next: usize,
}

impl ParameterExtractor {
    fn query(&mut self, mut query: QueryModel) -> QueryModel {
        query.main_from = self.from_clause(query.main_from);
        query.body_clauses = query
            .body_clauses
            .into_iter()
            .map(|clause| self.body_clause(clause))
            .collect();
        query.select = self.expr(query.select);
        query.result_operators = query
            .result_operators
            .into_iter()
            .map(|op| match op {
                ResultOperator::Contains { item } => ResultOperator::Contains {
                    item: self.expr(item),
                },
                other => other,
            })
            .collect();
        query
    }

    fn from_clause(&mut self, from: FromClause) -> FromClause {
        let source = match from.source {
            FromSource::Expression { expr } => FromSource::Expression {
                expr: self.expr(expr),
            },
            entity => entity,
        };
        FromClause {
            item_name: from.item_name,
            source,
        }
    }

    fn body_clause(&mut self, clause: BodyClause) -> BodyClause {
        match clause {
            BodyClause::AdditionalFrom { from } => BodyClause::AdditionalFrom {
                from: self.from_clause(from),
            },
            BodyClause::Join {
                item_name,
                entity,
                outer_key,
                inner_key,
            } => BodyClause::Join {
                item_name,
                entity,
                outer_key: self.expr(outer_key),
                inner_key: self.expr(inner_key),
            },
            BodyClause::Where { predicate } => BodyClause::Where {
                predicate: self.expr(predicate),
            },
            BodyClause::OrderBy { keys } => BodyClause::OrderBy {
                keys: keys
                    .into_iter()
                    .map(|key| SortKey {
                        expr: self.expr(key.expr),
                        desc: key.desc,
                    })
                    .collect(),
            },
        }
    }

    fn expr(&mut self, expr: Expr) -> Expr {
        match expr {
            // Null stays inline: it changes the SQL shape (IS NULL vs `=`).
            Expr::Constant { value: Value::Null, ty } | Expr::Captured { value: Value::Null, ty, .. } => {
                Expr::Constant {
                    value: Value::Null,
                    ty,
                }
            }
            Expr::Constant { value, ty } => self.lift("__p", value, ty),
            Expr::Captured { name, value, ty } => self.lift(&format!("__{}", name), value, ty),
            // The property name is part of the shape, not a value.
            Expr::MethodCall {
                receiver: None,
                method,
                args,
            } if method == PROPERTY_METHOD => Expr::MethodCall {
                receiver: None,
                method,
                args,
            },
            Expr::Member { expr, member } => Expr::Member {
                expr: Box::new(self.expr(*expr)),
                member,
            },
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => Expr::MethodCall {
                receiver: receiver.map(|r| Box::new(self.expr(*r))),
                method,
                args: args.into_iter().map(|a| self.expr(a)).collect(),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(self.expr(*left)),
                right: Box::new(self.expr(*right)),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(self.expr(*operand)),
            },
            Expr::New { members, args } => Expr::New {
                members,
                args: args.into_iter().map(|a| self.expr(a)).collect(),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => Expr::Conditional {
                test: Box::new(self.expr(*test)),
                if_true: Box::new(self.expr(*if_true)),
                if_false: Box::new(self.expr(*if_false)),
            },
            Expr::SubQuery { query } => Expr::SubQuery {
                query: Box::new(self.query(*query)),
            },
            leaf @ (Expr::Parameter { .. } | Expr::QuerySource { .. }) => leaf,
        }
    }

    fn lift(&mut self, prefix: &str, value: Value, ty: DataType) -> Expr {
        let name = format!("{}_{}", prefix, self.next);
        self.next += 1;
        self.values.insert(name.clone(), value);
        Expr::Parameter { name, ty }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Query;

    fn by_title(title: &str) -> QueryModel {
        Query::from_sql("c", "Customer", "SELECT * FROM Customers WHERE ContactName LIKE '%o%'")
            .filter(Expr::source("c").member("ContactTitle").equal(Expr::captured("title", title)))
            .build()
    }

    #[test]
    fn test_captured_values_share_a_shape() {
        let first = extract_parameters(&by_title("Sales Associate"));
        let second = extract_parameters(&by_title("Sales Manager"));

        assert_eq!(first.model.fingerprint(), second.model.fingerprint());
        assert_eq!(
            first.parameters.get("__title_0"),
            Some(&Value::from("Sales Associate"))
        );
        assert_eq!(
            second.parameters.get("__title_0"),
            Some(&Value::from("Sales Manager"))
        );
    }

    #[test]
    fn test_literals_are_lifted() {
        let london = Query::from_entity("c", "Customer")
            .filter(Expr::source("c").member("City").equal(Expr::constant("London")))
            .build();
        let seattle = Query::from_entity("c", "Customer")
            .filter(Expr::source("c").member("City").equal(Expr::constant("Seattle")))
            .build();

        let london = extract_parameters(&london);
        let seattle = extract_parameters(&seattle);
        assert_eq!(london.model.fingerprint(), seattle.model.fingerprint());
        assert_eq!(london.parameters.len(), 1);
    }

    #[test]
    fn test_null_stays_in_shape() {
        let with_null = Query::from_entity("c", "Customer")
            .filter(Expr::source("c").member("Region").equal(Expr::captured("region", Value::Null)))
            .build();
        let with_value = Query::from_entity("c", "Customer")
            .filter(Expr::source("c").member("Region").equal(Expr::captured("region", "WA")))
            .build();

        let with_null = extract_parameters(&with_null);
        let with_value = extract_parameters(&with_value);
        assert!(with_null.parameters.is_empty());
        assert_ne!(with_null.model.fingerprint(), with_value.model.fingerprint());
    }

    #[test]
    fn test_property_name_is_not_lifted() {
        let model = Query::from_entity("c", "Customer")
            .filter(Expr::property("c", "City").equal(Expr::constant("London")))
            .build();

        let extracted = extract_parameters(&model);
        assert_eq!(extracted.parameters.len(), 1);

        let BodyClause::Where { predicate } = &extracted.model.body_clauses[0] else {
            panic!("expected where clause");
        };
        let Expr::Binary { left, .. } = predicate else {
            panic!("expected comparison");
        };
        assert_eq!(**left, Expr::property("c", "City"));
    }

    #[test]
    fn test_subquery_collections_are_lifted() {
        let model = Query::from_entity("c", "Customer")
            .filter(Expr::contains(
                Expr::captured("ids", vec!["ALFKI", "ANATR"]),
                Expr::source("c").member("CustomerID"),
            ))
            .build();

        let extracted = extract_parameters(&model);
        assert_eq!(
            extracted.parameters.get("__ids_0"),
            Some(&Value::from(vec!["ALFKI", "ANATR"]))
        );
    }
}
