//! Query-model-to-SQL binder
//!
//! Builds one [`SelectExpression`] per query: every entity source becomes a
//! table, classified predicates and orderings are merged in, and whatever
//! cannot be pushed is kept as client residue on the [`TranslatedQuery`].

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sql::classifier::ExpressionClassifier;
use crate::sql::expressions::{
    ColumnExpression, CustomTableExpression, RawSqlDerivedTableExpression, SqlOrdering,
    TableExpression,
};
use crate::sql::translators::MethodCallTranslator;
use crate::sql::SelectExpression;
use crate::{
    BodyClause, Expr, FromClause, FromSource, Model, ModelError, QueryModel, ResultOperator,
    SortKey, PROPERTY_METHOD,
};

#[derive(Debug, Error)]
pub enum BindError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Unsupported query source: {0}")]
    UnsupportedSource(String),
}

/// Resolves `source.property` to a column of the table `source` is bound to
/// in `select`. `None` when the source is not part of the SELECT or the
/// property is not mapped.
pub fn bind_property(
    model: &Model,
    select: &SelectExpression,
    source: &str,
    property: &str,
) -> Option<ColumnExpression> {
    let table = select.find_table_for_query_source(source)?;
    let entity = model.find_entity(table.entity())?;
    let mapped = entity.find_property(property)?;
    Some(ColumnExpression {
        name: mapped.column_name().to_string(),
        property: mapped.name.clone(),
        table_alias: table.alias().to_string(),
        ty: mapped.ty.clone(),
    })
}

/// Where each property of a query source lands in the result row.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSlots {
    pub query_source: String,
    pub entity: String,
    /// `(property, ordinal, column)`
    pub slots: Vec<(String, usize, ColumnExpression)>,
}

/// A bound query: the server part plus everything left for the client.
#[derive(Debug, Clone)]
pub struct TranslatedQuery {
    pub select: SelectExpression,
    pub sources: Vec<SourceSlots>,
    /// Original predicates re-checked over materialized rows.
    pub client_filters: Vec<Expr>,
    /// Applied after filtering when the ordering could not be pushed.
    pub client_ordering: Vec<SortKey>,
    pub selector: Expr,
    pub client_operators: Vec<ResultOperator>,
}

impl TranslatedQuery {
    pub fn requires_client_eval(&self) -> bool {
        !self.client_filters.is_empty() || !self.client_ordering.is_empty()
    }

    /// The server returns a single `COUNT(*)` value.
    pub fn is_server_count(&self) -> bool {
        self.select.is_count()
    }
}

pub struct QueryBinder<'a> {
    model: &'a Model,
    translator: &'a dyn MethodCallTranslator,
}

impl<'a> QueryBinder<'a> {
    pub fn new(model: &'a Model, translator: &'a dyn MethodCallTranslator) -> Self {
        Self { model, translator }
    }

    pub fn bind(&self, query: &QueryModel) -> Result<TranslatedQuery, BindError> {
        let mut select = SelectExpression::new();
        let mut client_filters = Vec::new();
        let mut client_ordering = Vec::new();

        let main = self.table_for(&query.main_from, &select)?;
        select.add_table(main);

        for clause in &query.body_clauses {
            match clause {
                BodyClause::AdditionalFrom { from } => {
                    let table = self.table_for(from, &select)?;
                    select.add_table(table);
                }
                BodyClause::Join {
                    item_name,
                    entity,
                    outer_key,
                    inner_key,
                } => {
                    let from = FromClause {
                        item_name: item_name.clone(),
                        source: FromSource::Entity {
                            entity: entity.clone(),
                            sql: None,
                        },
                    };
                    let table = self.table_for(&from, &select)?;
                    select.add_table(table);

                    let condition = outer_key.clone().equal(inner_key.clone());
                    let classification = self.classifier(&select).classify(&condition);
                    match classification.expression {
                        Some(on) if !classification.requires_client_eval && select.can_render(&on) => {
                            select.set_inner_join(item_name, on);
                        }
                        _ => {
                            warn!(join = %item_name, "Join keys require client evaluation, falling back to a cross join");
                            client_filters.push(condition);
                        }
                    }
                }
                BodyClause::Where { predicate } => {
                    let classification = self.classifier(&select).classify(predicate);
                    let mut pushed = false;
                    if let Some(expr) = classification.expression {
                        if select.can_render(&expr) {
                            select.add_predicate(expr);
                            pushed = true;
                        }
                    }
                    if classification.requires_client_eval || !pushed {
                        warn!(pre_filtered = pushed, "Predicate requires client evaluation");
                        client_filters.push(predicate.clone());
                    }
                }
                BodyClause::OrderBy { keys } => {
                    select.set_order_by(Vec::new());
                    client_ordering.clear();

                    match self.server_ordering(&select, keys) {
                        Some(ordering) => select.set_order_by(ordering),
                        None => {
                            warn!(keys = keys.len(), "Ordering requires client evaluation");
                            client_ordering = keys.clone();
                        }
                    }
                }
            }
        }

        let selector = query.select.clone();
        let sources = self.project(&mut select, &selector, &client_filters, &client_ordering);

        let mut client_operators = Vec::new();
        let mut server_eligible = client_filters.is_empty() && client_ordering.is_empty();
        for op in &query.result_operators {
            if server_eligible {
                match op {
                    ResultOperator::Take { count } => {
                        select.apply_take(*count);
                        continue;
                    }
                    ResultOperator::Skip { count } => {
                        select.apply_skip(*count);
                        continue;
                    }
                    ResultOperator::First | ResultOperator::FirstOrDefault | ResultOperator::Any => {
                        select.apply_take(1);
                    }
                    ResultOperator::Single => select.apply_take(2),
                    ResultOperator::Count if select.limit().is_none() && select.offset().is_none() => {
                        select.set_count();
                        continue;
                    }
                    _ => {}
                }
            }
            server_eligible = false;
            client_operators.push(op.clone());
        }

        debug!(
            tables = select.tables().len(),
            predicates = select.predicates().len(),
            client_filters = client_filters.len(),
            client_operators = client_operators.len(),
            "Bound query model"
        );

        Ok(TranslatedQuery {
            select,
            sources,
            client_filters,
            client_ordering,
            selector,
            client_operators,
        })
    }

    fn classifier<'s>(&'s self, select: &'s SelectExpression) -> ExpressionClassifier<'s> {
        ExpressionClassifier::new(self.model, select, self.translator)
    }

    fn table_for(&self, from: &FromClause, select: &SelectExpression) -> Result<TableExpression, BindError> {
        let FromSource::Entity { entity, sql } = &from.source else {
            return Err(BindError::UnsupportedSource(from.item_name.clone()));
        };
        let entity_type = self.model.get_entity(entity)?;
        let alias = unique_alias(select, &from.item_name);

        Ok(match sql {
            Some(sql) => TableExpression::RawSqlDerived(RawSqlDerivedTableExpression {
                sql: sql.clone(),
                alias,
                query_source: from.item_name.clone(),
                entity: entity_type.name.clone(),
            }),
            None => TableExpression::Custom(CustomTableExpression {
                table: entity_type.table.clone(),
                schema: entity_type.schema.clone(),
                alias,
                query_source: from.item_name.clone(),
                entity: entity_type.name.clone(),
            }),
        })
    }

    fn server_ordering(&self, select: &SelectExpression, keys: &[SortKey]) -> Option<Vec<SqlOrdering>> {
        let classifier = self.classifier(select);
        keys.iter()
            .map(|key| {
                let classification = classifier.classify(&key.expr);
                if !classification.is_complete() {
                    return None;
                }
                let expr = classification.expression?;
                select.can_render(&expr).then_some(SqlOrdering { expr, desc: key.desc })
            })
            .collect()
    }

    /// Projects the columns anything evaluated in-process reads and records
    /// where each lands.
    fn project(
        &self,
        select: &mut SelectExpression,
        selector: &Expr,
        client_filters: &[Expr],
        client_ordering: &[SortKey],
    ) -> Vec<SourceSlots> {
        let mut references = References::default();
        references.visit(selector);
        for filter in client_filters {
            references.visit(filter);
        }
        for key in client_ordering {
            references.visit(&key.expr);
        }

        let tables: Vec<TableExpression> = select.tables().iter().map(|t| t.table.clone()).collect();
        let mut sources = Vec::with_capacity(tables.len());
        for table in tables {
            let Some(entity) = self.model.find_entity(table.entity()) else {
                continue;
            };
            let properties: Vec<&str> = match references.sources.get(table.query_source()) {
                Some(Referenced::All) => entity.properties.iter().map(|p| p.name.as_str()).collect(),
                Some(Referenced::Properties(names)) => entity
                    .properties
                    .iter()
                    .map(|p| p.name.as_str())
                    .filter(|name| names.contains(*name))
                    .collect(),
                None => Vec::new(),
            };

            let mut slots = Vec::with_capacity(properties.len());
            for property in properties {
                if let Some(column) = bind_property(self.model, select, table.query_source(), property) {
                    let ordinal = select.add_to_projection(column.clone());
                    slots.push((property.to_string(), ordinal, column));
                }
            }
            sources.push(SourceSlots {
                query_source: table.query_source().to_string(),
                entity: entity.name.clone(),
                slots,
            });
        }
        sources
    }
}

fn unique_alias(select: &SelectExpression, item_name: &str) -> String {
    if !select.has_alias(item_name) {
        return item_name.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", item_name, n))
        .find(|alias| !select.has_alias(alias))
        .unwrap_or_else(|| item_name.to_string())
}

#[derive(Debug)]
enum Referenced {
    All,
    Properties(BTreeSet<String>),
}

/// Which properties of which query sources an expression reads.
#[derive(Debug, Default)]
struct References {
    sources: BTreeMap<String, Referenced>,
}

impl References {
    fn property(&mut self, source: &str, property: &str) {
        match self
            .sources
            .entry(source.to_string())
            .or_insert_with(|| Referenced::Properties(BTreeSet::new()))
        {
            Referenced::All => {}
            Referenced::Properties(names) => {
                names.insert(property.to_string());
            }
        }
    }

    fn visit(&mut self, expr: &Expr) {
        match expr {
            Expr::QuerySource { source } => {
                self.sources.insert(source.clone(), Referenced::All);
            }
            Expr::Member { expr, member } => match expr.as_ref() {
                Expr::QuerySource { source } => self.property(source, member),
                inner => self.visit(inner),
            },
            Expr::MethodCall {
                receiver: None,
                method,
                args,
            } if method == PROPERTY_METHOD => match &args[..] {
                [Expr::QuerySource { source }, Expr::Constant { value, .. }] => {
                    if let Some(name) = value.as_str() {
                        self.property(source, name);
                    }
                }
                _ => args.iter().for_each(|a| self.visit(a)),
            },
            Expr::MethodCall { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    self.visit(receiver);
                }
                args.iter().for_each(|a| self.visit(a));
            }
            Expr::Binary { left, right, .. } => {
                self.visit(left);
                self.visit(right);
            }
            Expr::Unary { operand, .. } => self.visit(operand),
            Expr::New { args, .. } => args.iter().for_each(|a| self.visit(a)),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                self.visit(test);
                self.visit(if_true);
                self.visit(if_false);
            }
            Expr::SubQuery { query } => {
                if let FromSource::Expression { expr } = &query.main_from.source {
                    self.visit(expr);
                }
                for clause in &query.body_clauses {
                    if let BodyClause::Where { predicate } = clause {
                        self.visit(predicate);
                    }
                }
                self.visit(&query.select);
                for op in &query.result_operators {
                    if let ResultOperator::Contains { item } = op {
                        self.visit(item);
                    }
                }
            }
            Expr::Constant { .. } | Expr::Parameter { .. } | Expr::Captured { .. } => {}
        }
    }
}
