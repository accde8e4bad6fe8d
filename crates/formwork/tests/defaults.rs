//! Default-value application and its interaction with visibility.

use formwork::model::schema::{FieldType, SchemaField};
use formwork::model::{ControlDefinition, DynamicPropertyType, EntityExpression, Value};
use formwork::testing::TestForm;
use formwork::{FormTree, SchemaTree};

fn schema() -> SchemaTree {
    SchemaTree::new(SchemaField::compound(
        "",
        vec![
            SchemaField::scalar("vis", FieldType::Bool),
            SchemaField::scalar("f", FieldType::String),
        ],
    ))
}

fn gated_default_form() -> FormTree {
    FormTree::new(ControlDefinition::group(vec![ControlDefinition::data("f")
        .with_default(Value::string("fallback"))
        .with_dynamic(
            DynamicPropertyType::Visible,
            EntityExpression::data_match("vis", true),
        )]))
}

#[test]
fn default_waits_for_visibility() {
    let mut form = TestForm::new(
        schema(),
        gated_default_form(),
        serde_json::json!({ "vis": false }),
    );
    form.assert_eq("f", Value::Undefined);

    form.set("vis", true);
    form.assert_eq("f", Value::string("fallback"));
}

#[test]
fn default_never_overwrites_user_value() {
    let mut form = TestForm::new(
        schema(),
        gated_default_form(),
        serde_json::json!({ "vis": false }),
    );
    form.set("f", Value::string("user"));
    form.set("vis", true);
    form.assert_eq("f", Value::string("user"));
}

#[test]
fn visible_control_gets_default_immediately() {
    let form_tree = FormTree::new(ControlDefinition::group(vec![
        ControlDefinition::data("f").with_default(Value::string("d")),
    ]));
    let mut form = TestForm::new(schema(), form_tree, serde_json::json!({}));
    form.assert_eq("f", Value::string("d"));
}

#[test]
fn schema_default_applies_when_control_has_none() {
    let schema = SchemaTree::new(SchemaField::compound(
        "",
        vec![SchemaField::scalar("f", FieldType::String).with_default(Value::string("from-schema"))],
    ));
    let form_tree = FormTree::new(ControlDefinition::group(vec![ControlDefinition::data("f")]));
    let mut form = TestForm::new(schema, form_tree, serde_json::json!({}));
    form.assert_eq("f", Value::string("from-schema"));
}
