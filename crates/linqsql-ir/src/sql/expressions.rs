//! SQL expression model
//!
//! The closed set of nodes that will become SQL text. Columns refer to their
//! table by alias only; the owning [`SelectExpression`] holds the tables.

use crate::sql::visitor::{ColumnCollector, SqlExpressionVisitor};
use crate::{BinaryOp, DataType, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnExpression {
    /// Store column name.
    pub name: String,
    /// Mapped property the column backs.
    pub property: String,
    pub table_alias: String,
    pub ty: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InValues {
    List(Vec<SqlExpr>),
    /// A collection parameter, expanded when the command is generated.
    Parameter(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InExpression {
    pub column: ColumnExpression,
    pub values: InValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlBinaryOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Concat,
}

impl SqlBinaryOp {
    pub fn from_comparison(op: BinaryOp) -> Option<Self> {
        match op {
            BinaryOp::Equal => Some(SqlBinaryOp::Equal),
            BinaryOp::NotEqual => Some(SqlBinaryOp::NotEqual),
            BinaryOp::LessThan => Some(SqlBinaryOp::LessThan),
            BinaryOp::LessThanOrEqual => Some(SqlBinaryOp::LessThanOrEqual),
            BinaryOp::GreaterThan => Some(SqlBinaryOp::GreaterThan),
            BinaryOp::GreaterThanOrEqual => Some(SqlBinaryOp::GreaterThanOrEqual),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SqlBinaryOp::Equal => "=",
            SqlBinaryOp::NotEqual => "<>",
            SqlBinaryOp::LessThan => "<",
            SqlBinaryOp::LessThanOrEqual => "<=",
            SqlBinaryOp::GreaterThan => ">",
            SqlBinaryOp::GreaterThanOrEqual => ">=",
            SqlBinaryOp::And => "AND",
            SqlBinaryOp::Or => "OR",
            SqlBinaryOp::Concat => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column(ColumnExpression),
    IsNull(Box<SqlExpr>),
    IsNotNull(Box<SqlExpr>),
    In(InExpression),
    NotIn(InExpression),
    Constant(Value),
    Parameter(String),
    Binary {
        op: SqlBinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Not(Box<SqlExpr>),
    /// Rendered with `ESCAPE` [`LIKE_ESCAPE`](crate::sql::LIKE_ESCAPE).
    Like {
        operand: Box<SqlExpr>,
        pattern: Box<SqlExpr>,
    },
    Function {
        name: String,
        args: Vec<SqlExpr>,
    },
    /// Element-wise tuple from object construction. Only ever consumed by
    /// equality unfolding; the generator refuses it.
    Composite(Vec<SqlExpr>),
}

impl SqlExpr {
    pub fn binary(op: SqlBinaryOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::binary(SqlBinaryOp::And, left, right)
    }

    pub fn or(left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::binary(SqlBinaryOp::Or, left, right)
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, SqlExpr::Constant(Value::Null))
    }

    pub fn accept<V: SqlExpressionVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            SqlExpr::Column(column) => visitor.visit_column(column),
            SqlExpr::IsNull(operand) => visitor.visit_is_null(operand),
            SqlExpr::IsNotNull(operand) => visitor.visit_is_not_null(operand),
            SqlExpr::In(expr) => visitor.visit_in(expr),
            SqlExpr::NotIn(expr) => visitor.visit_not_in(expr),
            SqlExpr::Constant(value) => visitor.visit_constant(value),
            SqlExpr::Parameter(name) => visitor.visit_parameter(name),
            SqlExpr::Binary { op, left, right } => visitor.visit_binary(*op, left, right),
            SqlExpr::Not(operand) => visitor.visit_not(operand),
            SqlExpr::Like { operand, pattern } => visitor.visit_like(operand, pattern),
            SqlExpr::Function { name, args } => visitor.visit_function(name, args),
            SqlExpr::Composite(elements) => visitor.visit_composite(elements),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomTableExpression {
    pub table: String,
    pub schema: Option<String>,
    pub alias: String,
    pub query_source: String,
    pub entity: String,
}

/// A raw SQL query used as an opaque derived table.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSqlDerivedTableExpression {
    pub sql: String,
    pub alias: String,
    pub query_source: String,
    pub entity: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableExpression {
    Custom(CustomTableExpression),
    RawSqlDerived(RawSqlDerivedTableExpression),
}

impl TableExpression {
    pub fn alias(&self) -> &str {
        match self {
            TableExpression::Custom(table) => &table.alias,
            TableExpression::RawSqlDerived(table) => &table.alias,
        }
    }

    pub fn query_source(&self) -> &str {
        match self {
            TableExpression::Custom(table) => &table.query_source,
            TableExpression::RawSqlDerived(table) => &table.query_source,
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            TableExpression::Custom(table) => &table.entity,
            TableExpression::RawSqlDerived(table) => &table.entity,
        }
    }

    pub fn accept<V: SqlExpressionVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            TableExpression::Custom(table) => visitor.visit_custom_table(table),
            TableExpression::RawSqlDerived(table) => visitor.visit_raw_sql_table(table),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinKind {
    Cross,
    Inner(SqlExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSource {
    pub table: TableExpression,
    /// `None` for the first table.
    pub join: Option<JoinKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlOrdering {
    pub expr: SqlExpr,
    pub desc: bool,
}

/// One SELECT statement under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectExpression {
    tables: Vec<TableSource>,
    projection: Vec<ColumnExpression>,
    predicates: Vec<SqlExpr>,
    order_by: Vec<SqlOrdering>,
    limit: Option<i64>,
    offset: Option<i64>,
    count: bool,
}

impl SelectExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a table; insertion order is join order.
    pub fn add_table(&mut self, table: TableExpression) {
        let join = if self.tables.is_empty() {
            None
        } else {
            Some(JoinKind::Cross)
        };
        self.tables.push(TableSource { table, join });
    }

    /// Turns the cross join of `query_source` into an inner join.
    pub fn set_inner_join(&mut self, query_source: &str, on: SqlExpr) -> bool {
        match self
            .tables
            .iter_mut()
            .skip(1)
            .find(|t| t.table.query_source() == query_source)
        {
            Some(source) => {
                source.join = Some(JoinKind::Inner(on));
                true
            }
            None => false,
        }
    }

    pub fn tables(&self) -> &[TableSource] {
        &self.tables
    }

    pub fn find_table_for_query_source(&self, query_source: &str) -> Option<&TableExpression> {
        self.tables
            .iter()
            .map(|t| &t.table)
            .find(|t| t.query_source() == query_source)
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.tables.iter().any(|t| t.table.alias() == alias)
    }

    /// Adds a column to the projection and returns its ordinal. A column
    /// already projected keeps its ordinal.
    pub fn add_to_projection(&mut self, column: ColumnExpression) -> usize {
        if let Some(ordinal) = self
            .projection
            .iter()
            .position(|c| c.table_alias == column.table_alias && c.name == column.name)
        {
            return ordinal;
        }
        self.projection.push(column);
        self.projection.len() - 1
    }

    pub fn projection(&self) -> &[ColumnExpression] {
        &self.projection
    }

    pub fn add_predicate(&mut self, predicate: SqlExpr) {
        self.predicates.push(predicate);
    }

    pub fn predicates(&self) -> &[SqlExpr] {
        &self.predicates
    }

    /// All predicates combined by AND.
    pub fn predicate(&self) -> Option<SqlExpr> {
        self.predicates
            .iter()
            .cloned()
            .reduce(SqlExpr::and)
    }

    pub fn set_order_by(&mut self, order_by: Vec<SqlOrdering>) {
        self.order_by = order_by;
    }

    pub fn order_by(&self) -> &[SqlOrdering] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// `Take(count)` over the current window.
    pub fn apply_take(&mut self, count: i64) {
        let count = count.max(0);
        self.limit = Some(self.limit.map_or(count, |limit| limit.min(count)));
    }

    /// `Skip(count)` over the current window.
    pub fn apply_skip(&mut self, count: i64) {
        let count = count.max(0);
        self.offset = Some(self.offset.unwrap_or(0).saturating_add(count));
        if let Some(limit) = self.limit {
            self.limit = Some((limit - count).max(0));
        }
    }

    pub fn set_count(&mut self) {
        self.count = true;
    }

    pub fn is_count(&self) -> bool {
        self.count
    }

    /// Whether `expr` can be emitted against this SELECT: every column it
    /// references belongs to one of its tables and no composite remains.
    pub fn can_render(&self, expr: &SqlExpr) -> bool {
        let mut collector = ColumnCollector::default();
        expr.accept(&mut collector);
        !collector.has_composite
            && collector
                .columns
                .iter()
                .all(|column| self.has_alias(&column.table_alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScalarType;

    fn customers() -> TableExpression {
        TableExpression::Custom(CustomTableExpression {
            table: "Customers".to_string(),
            schema: None,
            alias: "c".to_string(),
            query_source: "c".to_string(),
            entity: "Customer".to_string(),
        })
    }

    fn column(alias: &str, name: &str) -> ColumnExpression {
        ColumnExpression {
            name: name.to_string(),
            property: name.to_string(),
            table_alias: alias.to_string(),
            ty: DataType::scalar(ScalarType::String),
        }
    }

    #[test]
    fn test_projection_deduplicates() {
        let mut select = SelectExpression::new();
        select.add_table(customers());

        assert_eq!(select.add_to_projection(column("c", "City")), 0);
        assert_eq!(select.add_to_projection(column("c", "Country")), 1);
        assert_eq!(select.add_to_projection(column("c", "City")), 0);
        assert_eq!(select.projection().len(), 2);
    }

    #[test]
    fn test_can_render_requires_known_alias() {
        let mut select = SelectExpression::new();
        select.add_table(customers());

        let known = SqlExpr::IsNull(Box::new(SqlExpr::Column(column("c", "City"))));
        let foreign = SqlExpr::IsNull(Box::new(SqlExpr::Column(column("o", "City"))));
        let composite = SqlExpr::Composite(vec![SqlExpr::Column(column("c", "City"))]);

        assert!(select.can_render(&known));
        assert!(!select.can_render(&foreign));
        assert!(!select.can_render(&composite));
    }

    #[test]
    fn test_take_and_skip_compose() {
        let mut select = SelectExpression::new();
        select.apply_take(10);
        select.apply_skip(3);
        assert_eq!((select.limit(), select.offset()), (Some(7), Some(3)));

        select.apply_take(20);
        assert_eq!(select.limit(), Some(7));
    }

    #[test]
    fn test_skip_offsets_saturate() {
        let mut select = SelectExpression::new();
        select.apply_skip(i64::MAX);
        select.apply_skip(1);
        assert_eq!(select.offset(), Some(i64::MAX));

        select.apply_take(5);
        select.apply_skip(i64::MAX);
        assert_eq!((select.limit(), select.offset()), (Some(0), Some(i64::MAX)));
    }

    #[test]
    fn test_predicates_combine_with_and() {
        let mut select = SelectExpression::new();
        assert!(select.predicate().is_none());

        select.add_predicate(SqlExpr::IsNull(Box::new(SqlExpr::Column(column("c", "City")))));
        select.add_predicate(SqlExpr::IsNotNull(Box::new(SqlExpr::Column(column("c", "Region")))));

        assert!(matches!(
            select.predicate(),
            Some(SqlExpr::Binary { op: SqlBinaryOp::And, .. })
        ));
    }

    #[test]
    fn test_first_table_has_no_join() {
        let mut select = SelectExpression::new();
        select.add_table(customers());
        select.add_table(TableExpression::RawSqlDerived(RawSqlDerivedTableExpression {
            sql: "SELECT * FROM Orders".to_string(),
            alias: "o".to_string(),
            query_source: "o".to_string(),
            entity: "Order".to_string(),
        }));

        assert!(select.tables()[0].join.is_none());
        assert_eq!(select.tables()[1].join, Some(JoinKind::Cross));
        assert!(!select.set_inner_join("c", SqlExpr::Constant(Value::Bool(true))));
        assert!(select.set_inner_join("o", SqlExpr::Constant(Value::Bool(true))));
    }
}
