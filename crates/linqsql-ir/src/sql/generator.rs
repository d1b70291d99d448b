//! SQL text generation
//!
//! Renders a [`SelectExpression`] as a parameterized command: positional `?`
//! placeholders, double-quoted identifiers. Simple literals are inlined;
//! parameter values are bound in placeholder order.

use thiserror::Error;

use crate::sql::expressions::{
    ColumnExpression, CustomTableExpression, InExpression, InValues, JoinKind,
    RawSqlDerivedTableExpression, SqlBinaryOp, SqlExpr,
};
use crate::sql::translators::LIKE_ESCAPE;
use crate::sql::visitor::SqlExpressionVisitor;
use crate::sql::SelectExpression;
use crate::{ParameterValues, Value};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Missing value for parameter: {0}")]
    MissingParameter(String),

    #[error("Composite expression cannot be rendered as SQL")]
    Composite,

    #[error("Parameter {name} cannot be bound: {reason}")]
    UnsupportedParameter { name: String, reason: String },
}

/// Executable SQL plus its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    pub sql: String,
    pub parameters: Vec<Value>,
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"schema"."table"`, or just `"table"` without a schema.
pub fn qualified_table(table: &str, schema: Option<&str>) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(table)),
        None => quote_identifier(table),
    }
}

pub fn generate(select: &SelectExpression, parameters: &ParameterValues) -> Result<SqlCommand, GenerateError> {
    let mut generator = SqlGenerator::new(parameters);
    let sql = generator.select(select)?;
    Ok(SqlCommand {
        sql,
        parameters: generator.arguments,
    })
}

pub struct SqlGenerator<'a> {
    parameters: &'a ParameterValues,
    arguments: Vec<Value>,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(parameters: &'a ParameterValues) -> Self {
        Self {
            parameters,
            arguments: Vec::new(),
        }
    }

    fn select(&mut self, select: &SelectExpression) -> Result<String, GenerateError> {
        let mut sql = String::from("SELECT ");

        if select.is_count() {
            sql.push_str("COUNT(*)");
        } else if select.projection().is_empty() {
            sql.push('1');
        } else {
            let columns = select
                .projection()
                .iter()
                .map(|c| self.visit_column(c))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(&columns.join(", "));
        }

        for (i, source) in select.tables().iter().enumerate() {
            let table = source.table.accept(self)?;
            match &source.join {
                None if i == 0 => {
                    sql.push_str(" FROM ");
                    sql.push_str(&table);
                }
                None | Some(JoinKind::Cross) => {
                    sql.push_str(" CROSS JOIN ");
                    sql.push_str(&table);
                }
                Some(JoinKind::Inner(on)) => {
                    let on = on.accept(self)?;
                    sql.push_str(&format!(" INNER JOIN {} ON {}", table, on));
                }
            }
        }

        if !select.predicates().is_empty() {
            let predicates = select
                .predicates()
                .iter()
                .map(|p| p.accept(self))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        if !select.is_count() && !select.order_by().is_empty() {
            let mut keys = Vec::with_capacity(select.order_by().len());
            for ordering in select.order_by() {
                let expr = ordering.expr.accept(self)?;
                // Nulls sort first ascending, last descending.
                keys.push(if ordering.desc {
                    format!("{} DESC NULLS LAST", expr)
                } else {
                    format!("{} ASC NULLS FIRST", expr)
                });
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        if let Some(limit) = select.limit() {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = select.offset() {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        Ok(sql)
    }

    fn bind(&mut self, value: Value) -> String {
        self.arguments.push(value);
        "?".to_string()
    }

    fn parameter_value(&self, name: &str) -> Result<&'a Value, GenerateError> {
        self.parameters
            .get(name)
            .ok_or_else(|| GenerateError::MissingParameter(name.to_string()))
    }

    /// Null constants and parameters currently bound to null.
    fn is_null(&self, expr: &SqlExpr) -> bool {
        match expr {
            SqlExpr::Constant(value) => value.is_null(),
            SqlExpr::Parameter(name) => self.parameters.get(name).is_some_and(Value::is_null),
            _ => false,
        }
    }

    fn in_list(&mut self, expr: &InExpression, negated: bool) -> Result<String, GenerateError> {
        let column = self.visit_column(&expr.column)?;

        let mut has_null = false;
        let mut items = Vec::new();
        match &expr.values {
            InValues::List(values) => {
                for value in values {
                    if value.is_null_constant() {
                        has_null = true;
                    } else {
                        items.push(value.accept(self)?);
                    }
                }
            }
            InValues::Parameter(name) => match self.parameter_value(name)? {
                Value::List(values) => {
                    for value in values {
                        if value.is_null() {
                            has_null = true;
                        } else {
                            items.push(self.bind(value.clone()));
                        }
                    }
                }
                other => {
                    return Err(GenerateError::UnsupportedParameter {
                        name: name.clone(),
                        reason: format!("expected a list, got {:?}", other),
                    })
                }
            },
        }

        let list = format!("{} {}IN ({})", column, if negated { "NOT " } else { "" }, items.join(", "));
        Ok(match (negated, items.is_empty(), has_null) {
            (false, true, false) => "1 = 0".to_string(),
            (true, true, false) => "1 = 1".to_string(),
            (false, true, true) => format!("{} IS NULL", column),
            (true, true, true) => format!("{} IS NOT NULL", column),
            (false, false, true) => format!("({} OR {} IS NULL)", list, column),
            (true, false, true) => format!("({} AND {} IS NOT NULL)", list, column),
            (_, false, false) => list,
        })
    }
}

impl SqlExpressionVisitor for SqlGenerator<'_> {
    type Output = Result<String, GenerateError>;

    fn visit_column(&mut self, column: &ColumnExpression) -> Self::Output {
        Ok(format!(
            "{}.{}",
            quote_identifier(&column.table_alias),
            quote_identifier(&column.name)
        ))
    }

    fn visit_is_null(&mut self, operand: &SqlExpr) -> Self::Output {
        Ok(format!("{} IS NULL", operand.accept(self)?))
    }

    fn visit_is_not_null(&mut self, operand: &SqlExpr) -> Self::Output {
        Ok(format!("{} IS NOT NULL", operand.accept(self)?))
    }

    fn visit_in(&mut self, expr: &InExpression) -> Self::Output {
        self.in_list(expr, false)
    }

    fn visit_not_in(&mut self, expr: &InExpression) -> Self::Output {
        self.in_list(expr, true)
    }

    fn visit_constant(&mut self, value: &Value) -> Self::Output {
        Ok(match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) if f.is_finite() => format!("{:?}", f),
            Value::String(s) => quote_literal(s),
            other => self.bind(other.clone()),
        })
    }

    fn visit_parameter(&mut self, name: &str) -> Self::Output {
        match self.parameter_value(name)? {
            Value::List(_) | Value::Object(_) => Err(GenerateError::UnsupportedParameter {
                name: name.to_string(),
                reason: "not a scalar".to_string(),
            }),
            value => Ok(self.bind(value.clone())),
        }
    }

    fn visit_binary(&mut self, op: SqlBinaryOp, left: &SqlExpr, right: &SqlExpr) -> Self::Output {
        if matches!(op, SqlBinaryOp::Equal | SqlBinaryOp::NotEqual) {
            let suffix = if op == SqlBinaryOp::Equal { "IS NULL" } else { "IS NOT NULL" };
            match (self.is_null(left), self.is_null(right)) {
                (true, true) => return Ok(if op == SqlBinaryOp::Equal { "1 = 1" } else { "1 = 0" }.to_string()),
                (false, true) => return Ok(format!("{} {}", left.accept(self)?, suffix)),
                (true, false) => return Ok(format!("{} {}", right.accept(self)?, suffix)),
                (false, false) => {}
            }
        }

        let left = left.accept(self)?;
        let right = right.accept(self)?;
        Ok(match op {
            SqlBinaryOp::And | SqlBinaryOp::Or | SqlBinaryOp::Concat => {
                format!("({} {} {})", left, op.as_sql(), right)
            }
            _ => format!("{} {} {}", left, op.as_sql(), right),
        })
    }

    fn visit_not(&mut self, operand: &SqlExpr) -> Self::Output {
        Ok(format!("NOT ({})", operand.accept(self)?))
    }

    fn visit_like(&mut self, operand: &SqlExpr, pattern: &SqlExpr) -> Self::Output {
        Ok(format!(
            "{} LIKE {} ESCAPE '{}'",
            operand.accept(self)?,
            pattern.accept(self)?,
            LIKE_ESCAPE
        ))
    }

    fn visit_function(&mut self, name: &str, args: &[SqlExpr]) -> Self::Output {
        let args = args
            .iter()
            .map(|a| a.accept(self))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("{}({})", name, args.join(", ")))
    }

    fn visit_composite(&mut self, _elements: &[SqlExpr]) -> Self::Output {
        Err(GenerateError::Composite)
    }

    fn visit_custom_table(&mut self, table: &CustomTableExpression) -> Self::Output {
        Ok(format!(
            "{} AS {}",
            qualified_table(&table.table, table.schema.as_deref()),
            quote_identifier(&table.alias)
        ))
    }

    fn visit_raw_sql_table(&mut self, table: &RawSqlDerivedTableExpression) -> Self::Output {
        Ok(format!("({}) AS {}", table.sql, quote_identifier(&table.alias)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{CustomTableExpression, SqlOrdering, TableExpression};
    use crate::{DataType, ScalarType};

    fn select() -> SelectExpression {
        let mut select = SelectExpression::new();
        select.add_table(TableExpression::Custom(CustomTableExpression {
            table: "Customers".to_string(),
            schema: Some("main".to_string()),
            alias: "c".to_string(),
            query_source: "c".to_string(),
            entity: "Customer".to_string(),
        }));
        select
    }

    fn city() -> ColumnExpression {
        ColumnExpression {
            name: "City".to_string(),
            property: "City".to_string(),
            table_alias: "c".to_string(),
            ty: DataType::scalar(ScalarType::String),
        }
    }

    #[test]
    fn test_empty_projection_selects_one() {
        let command = generate(&select(), &ParameterValues::new()).unwrap();
        assert_eq!(command.sql, "SELECT 1 FROM \"main\".\"Customers\" AS \"c\"");
    }

    #[test]
    fn test_literals_inline_and_parameters_bind() {
        let mut select = select();
        select.add_to_projection(city());
        select.add_predicate(SqlExpr::binary(
            SqlBinaryOp::Equal,
            SqlExpr::Column(city()),
            SqlExpr::Constant(Value::from("O'Brien")),
        ));
        select.add_predicate(SqlExpr::binary(
            SqlBinaryOp::NotEqual,
            SqlExpr::Column(city()),
            SqlExpr::Parameter("__p_0".to_string()),
        ));
        let params = ParameterValues::new().with("__p_0", "Paris");

        let command = generate(&select, &params).unwrap();
        assert_eq!(
            command.sql,
            "SELECT \"c\".\"City\" FROM \"main\".\"Customers\" AS \"c\" \
             WHERE \"c\".\"City\" = 'O''Brien' AND \"c\".\"City\" <> ?"
        );
        assert_eq!(command.parameters, vec![Value::from("Paris")]);
    }

    #[test]
    fn test_null_parameter_renders_is_null() {
        let mut select = select();
        select.add_predicate(SqlExpr::binary(
            SqlBinaryOp::Equal,
            SqlExpr::Column(city()),
            SqlExpr::Parameter("region".to_string()),
        ));
        let params = ParameterValues::new().with("region", Value::Null);

        let command = generate(&select, &params).unwrap();
        assert!(command.sql.ends_with("WHERE \"c\".\"City\" IS NULL"));
        assert!(command.parameters.is_empty());
    }

    #[test]
    fn test_in_parameter_expands() {
        let mut select = select();
        select.add_predicate(SqlExpr::In(InExpression {
            column: city(),
            values: InValues::Parameter("cities".to_string()),
        }));
        let params = ParameterValues::new().with("cities", vec!["London", "Paris"]);

        let command = generate(&select, &params).unwrap();
        assert!(command.sql.ends_with("WHERE \"c\".\"City\" IN (?, ?)"));
        assert_eq!(command.parameters.len(), 2);
    }

    #[test]
    fn test_empty_in_lists() {
        let empty = |negated| {
            let expr = InExpression {
                column: city(),
                values: InValues::List(Vec::new()),
            };
            let mut select = select();
            select.add_predicate(if negated { SqlExpr::NotIn(expr) } else { SqlExpr::In(expr) });
            generate(&select, &ParameterValues::new()).unwrap().sql
        };

        assert!(empty(false).ends_with("WHERE 1 = 0"));
        assert!(empty(true).ends_with("WHERE 1 = 1"));
    }

    #[test]
    fn test_missing_parameter() {
        let mut select = select();
        select.add_predicate(SqlExpr::binary(
            SqlBinaryOp::Equal,
            SqlExpr::Column(city()),
            SqlExpr::Parameter("missing".to_string()),
        ));

        let result = generate(&select, &ParameterValues::new());
        assert!(matches!(result, Err(GenerateError::MissingParameter(name)) if name == "missing"));
    }

    #[test]
    fn test_composite_is_refused() {
        let mut select = select();
        select.add_predicate(SqlExpr::Composite(vec![SqlExpr::Column(city())]));
        assert!(matches!(
            generate(&select, &ParameterValues::new()),
            Err(GenerateError::Composite)
        ));
    }

    #[test]
    fn test_order_limit_offset() {
        let mut select = select();
        select.add_to_projection(city());
        select.set_order_by(vec![SqlOrdering {
            expr: SqlExpr::Column(city()),
            desc: true,
        }]);
        select.apply_skip(2);
        select.apply_take(5);

        let command = generate(&select, &ParameterValues::new()).unwrap();
        assert!(command
            .sql
            .ends_with("ORDER BY \"c\".\"City\" DESC NULLS LAST LIMIT 5 OFFSET 2"));
    }

    #[test]
    fn test_raw_sql_table() {
        let mut select = SelectExpression::new();
        select.add_table(TableExpression::RawSqlDerived(RawSqlDerivedTableExpression {
            sql: "SELECT * FROM Customers".to_string(),
            alias: "c".to_string(),
            query_source: "c".to_string(),
            entity: "Customer".to_string(),
        }));
        select.set_count();

        let command = generate(&select, &ParameterValues::new()).unwrap();
        assert_eq!(command.sql, "SELECT COUNT(*) FROM (SELECT * FROM Customers) AS \"c\"");
    }
}
