//! Type system for query expressions

use serde::{Deserialize, Serialize};

/// Primitive value types an expression can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    UInt8,
    Int8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Decimal,
    Char,
    String,
    Bytes,
    DateTime,
    DateTimeOffset,
    Guid,
    TimeSpan,
}

impl ScalarType {
    /// Types a constant or parameter may have and still be rendered as SQL.
    pub fn is_sql_representable(self) -> bool {
        matches!(
            self,
            ScalarType::Bool
                | ScalarType::UInt8
                | ScalarType::Bytes
                | ScalarType::Char
                | ScalarType::DateTime
                | ScalarType::DateTimeOffset
                | ScalarType::Float64
                | ScalarType::Float32
                | ScalarType::Guid
                | ScalarType::Int32
                | ScalarType::Int64
                | ScalarType::Int8
                | ScalarType::Int16
                | ScalarType::String
                | ScalarType::UInt32
                | ScalarType::UInt64
                | ScalarType::UInt16
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Scalar(ScalarType),
    Nullable(Box<DataType>),
    Enum { name: String, underlying: ScalarType },

    // Complex
    Sequence(Box<DataType>),
    Entity(String),
    Anonymous,

    /// Any in-process type with no SQL counterpart.
    Object(String),
}

impl DataType {
    pub fn scalar(scalar: ScalarType) -> Self {
        DataType::Scalar(scalar)
    }

    pub fn nullable(inner: DataType) -> Self {
        match inner {
            DataType::Nullable(_) => inner,
            other => DataType::Nullable(Box::new(other)),
        }
    }

    pub fn sequence_of(element: DataType) -> Self {
        DataType::Sequence(Box::new(element))
    }

    pub fn unwrap_nullable(&self) -> &DataType {
        match self {
            DataType::Nullable(inner) => inner.unwrap_nullable(),
            other => other,
        }
    }

    /// Strips `Nullable` and maps enums onto their underlying scalar.
    pub fn underlying_scalar(&self) -> Option<ScalarType> {
        match self.unwrap_nullable() {
            DataType::Scalar(scalar) => Some(*scalar),
            DataType::Enum { underlying, .. } => Some(*underlying),
            _ => None,
        }
    }

    pub fn is_sql_representable(&self) -> bool {
        self.underlying_scalar()
            .map(ScalarType::is_sql_representable)
            .unwrap_or(false)
    }

    pub fn element_type(&self) -> Option<&DataType> {
        match self.unwrap_nullable() {
            DataType::Sequence(element) => Some(element),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullable_enum_unwraps_to_underlying() {
        let ty = DataType::nullable(DataType::Enum {
            name: "Status".to_string(),
            underlying: ScalarType::Int32,
        });

        assert_eq!(ty.underlying_scalar(), Some(ScalarType::Int32));
        assert!(ty.is_sql_representable());
    }

    #[test]
    fn test_decimal_and_objects_are_not_representable() {
        assert!(!DataType::scalar(ScalarType::Decimal).is_sql_representable());
        assert!(!DataType::scalar(ScalarType::TimeSpan).is_sql_representable());
        assert!(!DataType::Object("Customer".to_string()).is_sql_representable());
        assert!(!DataType::sequence_of(DataType::scalar(ScalarType::Int32)).is_sql_representable());
    }

    #[test]
    fn test_nullable_does_not_double_wrap() {
        let once = DataType::nullable(DataType::scalar(ScalarType::String));
        let twice = DataType::nullable(once.clone());
        assert_eq!(once, twice);
    }
}
