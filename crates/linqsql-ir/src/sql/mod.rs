//! Relational translation core
//!
//! Query model → [`SelectExpression`] (binder + classifier) → SQL text
//! (generator). Anything the classifier cannot push is carried on the
//! [`TranslatedQuery`] for in-process evaluation.

mod binder;
mod classifier;
mod expressions;
mod generator;
mod modification;
mod translators;
mod visitor;

pub use binder::{bind_property, BindError, QueryBinder, SourceSlots, TranslatedQuery};
pub use classifier::{Classification, ExpressionClassifier};
pub use expressions::{
    ColumnExpression, CustomTableExpression, InExpression, InValues, JoinKind,
    RawSqlDerivedTableExpression, SelectExpression, SqlBinaryOp, SqlExpr, SqlOrdering,
    TableExpression, TableSource,
};
pub use generator::{generate, qualified_table, quote_identifier, GenerateError, SqlCommand, SqlGenerator};
pub use modification::{modification_command, EntityEntry, EntityState, ModificationError};
pub use translators::{
    escape_like, CompositeMethodTranslator, MethodCallTranslator, StringMethodTranslator, LIKE_ESCAPE,
};
pub use visitor::{ColumnCollector, SqlExpressionVisitor};
