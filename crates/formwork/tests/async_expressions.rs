//! Query-language expressions through the async dispatch path.

use formwork::evals::QueryRequest;
use formwork::model::control::Validator;
use formwork::model::schema::{FieldType, SchemaField};
use formwork::model::{ControlDefinition, DynamicPropertyType, EntityExpression, Value};
use formwork::testing::{FnQueryEvaluator, TestForm};
use formwork::{FormOptions, FormTree, SchemaTree};
use std::sync::Arc;

fn schema() -> SchemaTree {
    SchemaTree::new(SchemaField::compound(
        "",
        vec![SchemaField::scalar("name", FieldType::String)],
    ))
}

/// Just enough of a query evaluator for these scenarios: a string
/// concatenation and an emptiness-driven message rule.
fn evaluator() -> FnQueryEvaluator<impl Fn(&QueryRequest) -> Option<Value>> {
    FnQueryEvaluator(|request: &QueryRequest| match request.expression.as_str() {
        "\"Hello \" & name" => {
            let name = request
                .data
                .get("name")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            Some(Value::string(format!("Hello {name}")))
        }
        "$not(name) ? \"Name is required\" : \"\"" => {
            let missing = request
                .data
                .get("name")
                .map(|v| !v.truthy())
                .unwrap_or(true);
            Some(if missing {
                Value::string("Name is required")
            } else {
                Value::string("")
            })
        }
        _ => None,
    })
}

fn options() -> FormOptions {
    FormOptions {
        query: Arc::new(evaluator()),
        ..FormOptions::default()
    }
}

#[test]
fn aggregate_expression_resolves_dynamic_label() {
    let form_tree = FormTree::new(ControlDefinition::group(vec![ControlDefinition::data(
        "name",
    )
    .with_dynamic(
        DynamicPropertyType::Label,
        EntityExpression::jsonata("\"Hello \" & name"),
    )]));
    let mut form = TestForm::with_options(
        schema(),
        form_tree,
        serde_json::json!({ "name": "World" }),
        options(),
    );
    let node = form.node_at(&[0]);
    assert_eq!(form.state().title(node).as_deref(), Some("Hello World"));

    // Data changes re-dispatch and supersede the previous result.
    form.set("name", "Rust");
    assert_eq!(form.state().title(node).as_deref(), Some("Hello Rust"));
}

#[test]
fn expression_validator_is_the_message_or_empty_rule() {
    let form_tree = FormTree::new(ControlDefinition::group(vec![ControlDefinition::data(
        "name",
    )
    .with_validator(Validator::Jsonata {
        expression: "$not(name) ? \"Name is required\" : \"\"".into(),
    })]));
    let mut form = TestForm::with_options(
        schema(),
        form_tree,
        serde_json::json!({ "name": "" }),
        options(),
    );
    let node = form.node_at(&[0]);

    let errors = form.state().errors(node);
    assert_eq!(
        errors,
        vec![("jsonata".to_string(), "Name is required".to_string())],
        "truthy result is the message, on its own slot"
    );
    assert!(!form.state().valid(form.root()));

    form.set("name", "Ada");
    assert!(form.state().errors(node).is_empty(), "empty result passes");
    assert!(form.state().valid(form.root()));
}

#[test]
fn unknown_expressions_leave_the_target_alone() {
    let form_tree = FormTree::new(ControlDefinition::group(vec![ControlDefinition::data(
        "name",
    )
    .with_title("Static")
    .with_dynamic(
        DynamicPropertyType::Label,
        EntityExpression::jsonata("something the evaluator does not know"),
    )]));
    let mut form = TestForm::with_options(
        schema(),
        form_tree,
        serde_json::json!({ "name": "x" }),
        options(),
    );
    let node = form.node_at(&[0]);
    // No response ever arrives: the override cell keeps its "never
    // assigned" sentinel and the static title shows through.
    assert_eq!(form.state().title(node).as_deref(), Some("Static"));
}
