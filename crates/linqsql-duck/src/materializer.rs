//! Row shaping: flat result rows into one object per query source

use linqsql_ir::sql::SourceSlots;
use linqsql_ir::{ScalarType, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Built once per compiled query from the binder's column ordinals.
#[derive(Debug, Clone)]
pub struct Materializer {
    sources: Vec<SourceSlots>,
}

impl Materializer {
    pub fn new(sources: Vec<SourceSlots>) -> Self {
        Self { sources }
    }

    /// Query source name → entity object holding the projected properties.
    pub fn shape(&self, row: &[Value]) -> BTreeMap<String, Value> {
        self.sources
            .iter()
            .map(|source| {
                let fields = source
                    .slots
                    .iter()
                    .map(|(property, ordinal, column)| {
                        let value = row.get(*ordinal).cloned().unwrap_or(Value::Null);
                        (property.clone(), coerce(value, column.ty.underlying_scalar()))
                    })
                    .collect();
                (source.query_source.clone(), Value::Object(fields))
            })
            .collect()
    }
}

/// Reads back values the store hands over in a looser type.
fn coerce(value: Value, ty: Option<ScalarType>) -> Value {
    match (ty, value) {
        (Some(ScalarType::Guid), Value::String(s)) => match Uuid::parse_str(&s) {
            Ok(id) => Value::Guid(id),
            Err(_) => Value::String(s),
        },
        (Some(ScalarType::Bool), Value::Int(i)) => Value::Bool(i != 0),
        (Some(ScalarType::Float32 | ScalarType::Float64 | ScalarType::Decimal), Value::Int(i)) => {
            Value::Float(i as f64)
        }
        (_, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linqsql_ir::sql::ColumnExpression;
    use linqsql_ir::DataType;

    fn slot(property: &str, ordinal: usize, ty: ScalarType) -> (String, usize, ColumnExpression) {
        (
            property.to_string(),
            ordinal,
            ColumnExpression {
                name: property.to_string(),
                property: property.to_string(),
                table_alias: "c".to_string(),
                ty: DataType::scalar(ty),
            },
        )
    }

    #[test]
    fn test_shapes_rows_per_source() {
        let materializer = Materializer::new(vec![
            SourceSlots {
                query_source: "c".to_string(),
                entity: "Customer".to_string(),
                slots: vec![slot("City", 1, ScalarType::String), slot("Id", 0, ScalarType::Guid)],
            },
            SourceSlots {
                query_source: "o".to_string(),
                entity: "Order".to_string(),
                slots: vec![slot("Total", 2, ScalarType::Float64)],
            },
        ]);

        let id = Uuid::new_v4();
        let row = vec![Value::from(id.to_string()), Value::from("London"), Value::Int(3)];
        let shaped = materializer.shape(&row);

        let Value::Object(customer) = &shaped["c"] else {
            panic!("expected object");
        };
        assert_eq!(customer["Id"], Value::Guid(id));
        assert_eq!(customer["City"], Value::from("London"));

        let Value::Object(order) = &shaped["o"] else {
            panic!("expected object");
        };
        assert_eq!(order["Total"], Value::Float(3.0));
    }
}
