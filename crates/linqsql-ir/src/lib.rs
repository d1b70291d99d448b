//! linqsql query model
//!
//! Normalized representation of a composed query (from clauses, filters,
//! orderings, projection, result operators) plus the translation core that
//! turns it into SQL with a client-evaluation fallback.
//! All nodes are serializable so that the shape of a query can be fingerprinted
//! for plan caching.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod builder;
pub mod eval;
pub mod functions;
pub mod model;
pub mod params;
pub mod sql;
mod types;
mod value;

pub use builder::Query;
pub use eval::{evaluate, EvalError, EvalScope};
pub use functions::FunctionRegistry;
pub use model::{EntityType, Model, ModelError, Property};
pub use params::{extract_parameters, ParameterValues, ParameterizedQuery};
pub use types::*;
pub use value::{compare, Value};

/// A query: one main source, body clauses, a selector and result operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryModel {
    pub main_from: FromClause,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_clauses: Vec<BodyClause>,

    pub select: Expr,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_operators: Vec<ResultOperator>,
}

impl QueryModel {
    /// Calculate fingerprint (SHA-256) of the query shape.
    ///
    /// Run [`extract_parameters`] first: captured values and literals still
    /// embedded in the tree are part of the fingerprint.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("query model should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// `from x in source select x` with no body clauses.
    pub fn is_identity_query(&self) -> bool {
        self.body_clauses.is_empty()
            && matches!(&self.select, Expr::QuerySource { source } if *source == self.main_from.item_name)
    }
}

/// Introduces a named query source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FromClause {
    pub item_name: String,
    pub source: FromSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FromSource {
    /// A mapped entity set, optionally replaced by a raw SQL query.
    Entity {
        entity: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
    },
    /// An in-process collection (parameter, captured value or constant list).
    Expression { expr: Expr },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clause")]
pub enum BodyClause {
    AdditionalFrom {
        from: FromClause,
    },
    Join {
        item_name: String,
        entity: String,
        outer_key: Expr,
        inner_key: Expr,
    },
    Where {
        predicate: Expr,
    },
    OrderBy {
        keys: Vec<SortKey>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    #[serde(default)]
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum ResultOperator {
    Take { count: i64 },
    Skip { count: i64 },
    Distinct,
    Count,
    Any,
    First,
    FirstOrDefault,
    Single,
    Contains { item: Expr },
}

impl ResultOperator {
    /// Operators that collapse the sequence to a single value.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResultOperator::Count
                | ResultOperator::Any
                | ResultOperator::First
                | ResultOperator::FirstOrDefault
                | ResultOperator::Single
                | ResultOperator::Contains { .. }
        )
    }
}

/// Expression tree nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node")]
pub enum Expr {
    Constant {
        value: Value,
        ty: DataType,
    },
    Parameter {
        name: String,
        ty: DataType,
    },
    /// A value captured from the calling scope (closure variable).
    Captured {
        name: String,
        value: Value,
        ty: DataType,
    },
    QuerySource {
        source: String,
    },
    Member {
        expr: Box<Expr>,
        member: String,
    },
    MethodCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver: Option<Box<Expr>>,
        method: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    New {
        members: Vec<String>,
        args: Vec<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    SubQuery {
        query: Box<QueryModel>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    // Logical
    AndAlso,
    OrElse,
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Coalesce,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    Convert { ty: DataType },
}

/// Name of the receiver-less method that reads a mapped property by name:
/// `Property(source, "Name")`.
pub const PROPERTY_METHOD: &str = "Property";

#[cfg(test)]
mod tests {
    use super::*;

    fn customers_in(city: &str) -> QueryModel {
        Query::from_entity("c", "Customer")
            .filter(Expr::source("c").member("City").equal(Expr::constant(city)))
            .build()
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let model = customers_in("London");
        assert_eq!(model.fingerprint(), model.clone().fingerprint());
    }

    #[test]
    fn test_fingerprint_sees_embedded_literals() {
        assert_ne!(
            customers_in("London").fingerprint(),
            customers_in("Seattle").fingerprint()
        );
    }

    #[test]
    fn test_json_round_trip() {
        let model = Query::from_sql("c", "Customer", "SELECT * FROM Customers")
            .filter(Expr::source("c").member("ContactName").call("Contains", vec![Expr::constant("z")]))
            .order_by(Expr::source("c").member("City"), true)
            .take(5)
            .build();

        let json = serde_json::to_string(&model).unwrap();
        let parsed: QueryModel = serde_json::from_str(&json).unwrap();

        assert_eq!(model, parsed);
        assert_eq!(model.fingerprint(), parsed.fingerprint());
    }

    #[test]
    fn test_identity_query() {
        let identity = Query::from_entity("c", "Customer").build();
        assert!(identity.is_identity_query());

        let filtered = customers_in("London");
        assert!(!filtered.is_identity_query());
    }
}
