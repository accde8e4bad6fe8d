//! Option fan-out for choice-like controls: one child scope per
//! selectable option, with `option` / `optionSelected` variables
//! driving per-option content.

use formwork::model::schema::{FieldOption, FieldType, SchemaField};
use formwork::model::{ControlDefinition, DynamicPropertyType, EntityExpression, RenderType, Value};
use formwork::testing::TestForm;
use formwork::{FormTree, SchemaTree};

fn schema() -> SchemaTree {
    SchemaTree::new(SchemaField::compound(
        "",
        vec![SchemaField::scalar("color", FieldType::String).with_options([
            FieldOption::new("Red", Value::string("r")),
            FieldOption::new("Green", Value::string("g")),
        ])],
    ))
}

/// A radio control whose nested panel is shown only for the selected
/// option.
fn form_tree() -> FormTree {
    FormTree::new(ControlDefinition::group(vec![ControlDefinition::data(
        "color",
    )
    .with_render(RenderType::Radio)
    .with_children(vec![ControlDefinition::display_text("panel").with_dynamic(
        DynamicPropertyType::Visible,
        EntityExpression::data("optionSelected"),
    )])]))
}

#[test]
fn one_child_scope_per_option() {
    let form = TestForm::new(schema(), form_tree(), serde_json::json!({ "color": "g" }));
    let color = form.node_at(&[0]);
    let wrappers = form.state().children(color);
    assert_eq!(wrappers.len(), 2, "one wrapper per option");

    // Each wrapper carries the same nested content.
    for wrapper in &wrappers {
        assert_eq!(form.state().children(*wrapper).len(), 1);
    }

    let red_panel = form.node_at(&[0, 0, 0]);
    let green_panel = form.node_at(&[0, 1, 0]);
    form.assert_visible(red_panel, false);
    form.assert_visible(green_panel, true);
}

#[test]
fn selection_change_flips_option_scopes() {
    let mut form = TestForm::new(schema(), form_tree(), serde_json::json!({ "color": "g" }));
    let red_panel = form.node_at(&[0, 0, 0]);
    let green_panel = form.node_at(&[0, 1, 0]);

    form.set("color", "r");
    form.assert_visible(red_panel, true);
    form.assert_visible(green_panel, false);
}

#[test]
fn multi_valued_selection_uses_membership() {
    let schema = SchemaTree::new(SchemaField::compound(
        "",
        vec![SchemaField::scalar("colors", FieldType::String)
            .with_collection()
            .with_options([
                FieldOption::new("Red", Value::string("r")),
                FieldOption::new("Green", Value::string("g")),
            ])],
    ));
    let form_tree = FormTree::new(ControlDefinition::group(vec![ControlDefinition::data(
        "colors",
    )
    .with_render(RenderType::CheckList)
    .with_children(vec![ControlDefinition::display_text("panel").with_dynamic(
        DynamicPropertyType::Visible,
        EntityExpression::data("optionSelected"),
    )])]));
    let mut form = TestForm::new(schema, form_tree, serde_json::json!({ "colors": ["r", "g"] }));

    form.assert_visible(form.node_at(&[0, 0, 0]), true);
    form.assert_visible(form.node_at(&[0, 1, 0]), true);

    form.set("colors", Value::array([Value::string("g")]));
    form.assert_visible(form.node_at(&[0, 0, 0]), false);
    form.assert_visible(form.node_at(&[0, 1, 0]), true);
}

#[test]
fn allowed_options_filter_the_fan_out() {
    let form_tree = FormTree::new(ControlDefinition::group(vec![ControlDefinition::data(
        "color",
    )
    .with_render(RenderType::Radio)
    .with_script(
        "allowedOptions",
        EntityExpression::data("allowed"),
    )
    .with_children(vec![ControlDefinition::display_text("panel")])]));
    let schema = SchemaTree::new(SchemaField::compound(
        "",
        vec![
            SchemaField::scalar("color", FieldType::String).with_options([
                FieldOption::new("Red", Value::string("r")),
                FieldOption::new("Green", Value::string("g")),
            ]),
            SchemaField::scalar("allowed", FieldType::String).with_collection(),
        ],
    ));
    let form = TestForm::new(
        schema,
        form_tree,
        serde_json::json!({ "color": "r", "allowed": ["g", "zz"] }),
    );
    let color = form.node_at(&[0]);

    let options = form.state().field_options(color);
    assert_eq!(options.len(), 2);
    assert_eq!(options[0].name, "Green");
    assert_eq!(options[1].name, "zz", "unknown allowed value synthesized");
    assert_eq!(form.state().children(color).len(), 2);
}
