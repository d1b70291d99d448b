//! End-to-end translation tests: query model → classification → SQL text
//!
//! These run the binder and generator together against a small Northwind-like
//! metadata model and check both the SQL that reaches the server and the
//! residue left for client evaluation.

use linqsql_ir::sql::{
    generate, Classification, CompositeMethodTranslator, ExpressionClassifier, InValues,
    QueryBinder, SqlCommand, SqlExpr, TableExpression, TranslatedQuery,
};
use linqsql_ir::{
    extract_parameters, DataType, EntityType, Expr, Model, ParameterValues, Property, Query,
    QueryModel, ScalarType, Value,
};

fn northwind() -> Model {
    let string = || DataType::scalar(ScalarType::String);
    Model::new().with_entity(
        EntityType::new("Customer", "Customers")
            .with_property(Property::new("CustomerID", string()))
            .with_property(Property::new("ContactName", string()))
            .with_property(Property::new("ContactTitle", string()))
            .with_property(Property::new("City", DataType::nullable(string())))
            .with_property(Property::new("Country", string()))
            .with_key(&["CustomerID"]),
    )
}

fn translate(query: QueryModel, parameters: &ParameterValues) -> (TranslatedQuery, SqlCommand) {
    let model = northwind();
    let translator = CompositeMethodTranslator::new();
    let translated = QueryBinder::new(&model, &translator).bind(&query).unwrap();
    let command = generate(&translated.select, parameters).unwrap();
    (translated, command)
}

fn classify(predicate: &Expr) -> Classification {
    let model = northwind();
    let translator = CompositeMethodTranslator::new();
    let query = Query::from_entity("c", "Customer").build();
    let translated = QueryBinder::new(&model, &translator).bind(&query).unwrap();
    ExpressionClassifier::new(&model, &translated.select, &translator).classify(predicate)
}

fn member(name: &str) -> Expr {
    Expr::source("c").member(name)
}

fn unsupported() -> Expr {
    Expr::static_call("IsPreferred", vec![Expr::source("c")])
}

#[test]
fn test_allow_listed_predicate_is_fully_translated() {
    let predicate = member("City")
        .equal(Expr::constant("London"))
        .and_also(member("Country").not_equal(Expr::parameter("country", DataType::scalar(ScalarType::String))))
        .or_else(member("ContactName").greater_than_or_equal(Expr::typed_constant(
            "M",
            DataType::scalar(ScalarType::Char),
        )));

    let classification = classify(&predicate);
    assert!(classification.is_complete());
    assert!(!classification.requires_client_eval);
}

#[test]
fn test_or_with_unsupported_side_is_discarded() {
    let predicate = member("ContactName")
        .call("Contains", vec![Expr::constant("z")])
        .or_else(unsupported());

    let classification = classify(&predicate);
    assert!(classification.expression.is_none());
    assert!(classification.requires_client_eval);

    let (translated, command) = translate(
        Query::from_entity("c", "Customer").filter(predicate.clone()).build(),
        &ParameterValues::new(),
    );
    assert!(!command.sql.contains("WHERE"));
    assert_eq!(translated.client_filters, vec![predicate]);
}

#[test]
fn test_and_with_unsupported_side_pushes_the_rest() {
    let predicate = member("City").equal(Expr::constant("London")).and_also(unsupported());

    let (translated, command) = translate(
        Query::from_entity("c", "Customer").filter(predicate.clone()).build(),
        &ParameterValues::new(),
    );

    assert!(command.sql.ends_with("WHERE \"c\".\"City\" = 'London'"));
    assert_eq!(translated.client_filters, vec![predicate]);
}

#[test]
fn test_null_comparisons_render_is_null() {
    let (_, equal) = translate(
        Query::from_entity("c", "Customer")
            .filter(member("City").equal(Expr::null()))
            .build(),
        &ParameterValues::new(),
    );
    assert!(equal.sql.ends_with("WHERE \"c\".\"City\" IS NULL"));

    let (_, not_equal) = translate(
        Query::from_entity("c", "Customer")
            .filter(member("City").not_equal(Expr::null()))
            .build(),
        &ParameterValues::new(),
    );
    assert!(not_equal.sql.ends_with("WHERE \"c\".\"City\" IS NOT NULL"));
    assert!(!not_equal.sql.contains("= NULL"));
}

#[test]
fn test_not_over_contains_becomes_not_in() {
    let cities = Expr::parameter(
        "cities",
        DataType::sequence_of(DataType::scalar(ScalarType::String)),
    );
    let contains = Expr::contains(cities, member("City"));

    let Some(SqlExpr::In(positive)) = classify(&contains).expression else {
        panic!("expected IN");
    };
    let negated = classify(&contains.not());
    assert!(!negated.requires_client_eval);
    let Some(SqlExpr::NotIn(negative)) = negated.expression else {
        panic!("expected NOT IN");
    };
    assert_eq!(positive, negative);
    assert_eq!(negative.values, InValues::Parameter("cities".to_string()));
}

#[test]
fn test_not_in_renders_against_parameter_values() {
    let query = Query::from_entity("c", "Customer")
        .filter(Expr::contains(Expr::captured("cities", vec!["London", "Berlin"]), member("City")).not())
        .select(member("ContactName"))
        .build();
    let extracted = extract_parameters(&query);

    let (translated, command) = translate(extracted.model, &extracted.parameters);
    assert!(translated.client_filters.is_empty());
    assert_eq!(
        command.sql,
        "SELECT \"c\".\"ContactName\" FROM \"Customers\" AS \"c\" WHERE \"c\".\"City\" NOT IN (?, ?)"
    );
    assert_eq!(command.parameters.len(), 2);
}

#[test]
fn test_raw_sql_source_composes_with_where() {
    let query = Query::from_sql("c", "Customer", "SELECT * FROM \"Customers\" WHERE \"Country\" = 'UK'")
        .filter(member("ContactTitle").equal(Expr::captured("title", "Sales Representative")))
        .build();
    let extracted = extract_parameters(&query);

    let (translated, command) = translate(extracted.model, &extracted.parameters);
    assert!(matches!(
        translated.select.tables()[0].table,
        TableExpression::RawSqlDerived(_)
    ));
    assert!(command.sql.starts_with("SELECT \"c\".\"CustomerID\""));
    assert!(command.sql.contains(
        "FROM (SELECT * FROM \"Customers\" WHERE \"Country\" = 'UK') AS \"c\" WHERE \"c\".\"ContactTitle\" = ?"
    ));
    assert_eq!(command.parameters, vec![Value::from("Sales Representative")]);
}

#[test]
fn test_closures_over_different_values_share_a_shape() {
    let by_city = |city: &str| {
        extract_parameters(
            &Query::from_entity("c", "Customer")
                .filter(member("City").equal(Expr::captured("city", city)))
                .build(),
        )
    };

    let london = by_city("London");
    let seattle = by_city("Seattle");
    assert_eq!(london.model.fingerprint(), seattle.model.fingerprint());

    let (_, london_command) = translate(london.model, &london.parameters);
    let (_, seattle_command) = translate(seattle.model, &seattle.parameters);
    assert_eq!(london_command.sql, seattle_command.sql);
    assert_ne!(london_command.parameters, seattle_command.parameters);
}

#[test]
fn test_structural_equality_unfolds_in_sql() {
    let query = Query::from_entity("c", "Customer")
        .filter(
            Expr::new_object(vec![("City", member("City")), ("Country", member("Country"))]).equal(
                Expr::new_object(vec![("City", Expr::null()), ("Country", Expr::constant("UK"))]),
            ),
        )
        .build();

    let (_, command) = translate(query, &ParameterValues::new());
    assert!(command
        .sql
        .ends_with("WHERE (\"c\".\"City\" IS NULL AND \"c\".\"Country\" = 'UK')"));
}

#[test]
fn test_string_methods_render_like() {
    let query = Query::from_entity("c", "Customer")
        .filter(member("ContactName").call("StartsWith", vec![Expr::constant("Ma")]))
        .build();

    let (_, command) = translate(query, &ParameterValues::new());
    assert!(command.sql.ends_with("WHERE \"c\".\"ContactName\" LIKE ('Ma' || '%') ESCAPE '\\'"));
}
