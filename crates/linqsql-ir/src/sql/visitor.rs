//! Visitor over the SQL expression model, one method per node variant

use crate::sql::expressions::{
    ColumnExpression, CustomTableExpression, InExpression, InValues, RawSqlDerivedTableExpression,
    SqlBinaryOp, SqlExpr,
};
use crate::Value;

pub trait SqlExpressionVisitor {
    type Output;

    fn visit_column(&mut self, column: &ColumnExpression) -> Self::Output;
    fn visit_is_null(&mut self, operand: &SqlExpr) -> Self::Output;
    fn visit_is_not_null(&mut self, operand: &SqlExpr) -> Self::Output;
    fn visit_in(&mut self, expr: &InExpression) -> Self::Output;
    fn visit_not_in(&mut self, expr: &InExpression) -> Self::Output;
    fn visit_constant(&mut self, value: &Value) -> Self::Output;
    fn visit_parameter(&mut self, name: &str) -> Self::Output;
    fn visit_binary(&mut self, op: SqlBinaryOp, left: &SqlExpr, right: &SqlExpr) -> Self::Output;
    fn visit_not(&mut self, operand: &SqlExpr) -> Self::Output;
    fn visit_like(&mut self, operand: &SqlExpr, pattern: &SqlExpr) -> Self::Output;
    fn visit_function(&mut self, name: &str, args: &[SqlExpr]) -> Self::Output;
    fn visit_composite(&mut self, elements: &[SqlExpr]) -> Self::Output;
    fn visit_custom_table(&mut self, table: &CustomTableExpression) -> Self::Output;
    fn visit_raw_sql_table(&mut self, table: &RawSqlDerivedTableExpression) -> Self::Output;
}

/// Collects every column an expression references.
#[derive(Debug, Default)]
pub struct ColumnCollector {
    pub columns: Vec<ColumnExpression>,
    pub has_composite: bool,
}

impl ColumnCollector {
    fn visit_in_values(&mut self, expr: &InExpression) {
        self.columns.push(expr.column.clone());
        if let InValues::List(values) = &expr.values {
            for value in values {
                value.accept(self);
            }
        }
    }
}

impl SqlExpressionVisitor for ColumnCollector {
    type Output = ();

    fn visit_column(&mut self, column: &ColumnExpression) {
        self.columns.push(column.clone());
    }

    fn visit_is_null(&mut self, operand: &SqlExpr) {
        operand.accept(self);
    }

    fn visit_is_not_null(&mut self, operand: &SqlExpr) {
        operand.accept(self);
    }

    fn visit_in(&mut self, expr: &InExpression) {
        self.visit_in_values(expr);
    }

    fn visit_not_in(&mut self, expr: &InExpression) {
        self.visit_in_values(expr);
    }

    fn visit_constant(&mut self, _value: &Value) {}

    fn visit_parameter(&mut self, _name: &str) {}

    fn visit_binary(&mut self, _op: SqlBinaryOp, left: &SqlExpr, right: &SqlExpr) {
        left.accept(self);
        right.accept(self);
    }

    fn visit_not(&mut self, operand: &SqlExpr) {
        operand.accept(self);
    }

    fn visit_like(&mut self, operand: &SqlExpr, pattern: &SqlExpr) {
        operand.accept(self);
        pattern.accept(self);
    }

    fn visit_function(&mut self, _name: &str, args: &[SqlExpr]) {
        for arg in args {
            arg.accept(self);
        }
    }

    fn visit_composite(&mut self, elements: &[SqlExpr]) {
        self.has_composite = true;
        for element in elements {
            element.accept(self);
        }
    }

    fn visit_custom_table(&mut self, _table: &CustomTableExpression) {}

    fn visit_raw_sql_table(&mut self, _table: &RawSqlDerivedTableExpression) {}
}
