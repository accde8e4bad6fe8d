//! The validator pipeline for bound data nodes.
//!
//! Synchronous checks (required, length, date) share the "default"
//! error slot: required runs first, then declared validators in
//! order, first failure wins. Expression validators run through the
//! async dispatcher into the independent "jsonata" slot. A node is
//! invalid while either slot holds a message.
//!
//! The length validator repairs short collections by padding them to
//! the minimum instead of reporting — a data write from inside
//! validation, kept because form flows depend on it.

use crate::data_node::SchemaDataNode;
use crate::interface::{MessageKind, SchemaInterface};
use crate::overrides::ResolvedDefinition;
use chrono::{Duration, Utc};
use formwork_model::control::{ControlKind, DateComparison, Validator};
use formwork_model::schema::SchemaField;
use formwork_model::Value;
use formwork_reactive::{DataGraph, Reactor};

/// Error-slot names surfaced on data nodes.
pub const DEFAULT_SLOT: &str = "default";
pub const JSONATA_SLOT: &str = "jsonata";

/// Run the synchronous pipeline for one bound node; returns the first
/// failure, if any. May write to the data graph (length repair).
pub fn run_sync_validation(
    interface: &dyn SchemaInterface,
    resolved: &ResolvedDefinition,
    node: &SchemaDataNode,
    graph: &mut DataGraph,
    reactor: &mut Reactor,
) -> Option<String> {
    let field = node.schema().field().clone();
    let value = node.value(graph, reactor);

    if (resolved.required() || field.required) && interface.is_empty(&field, &value) {
        return Some(interface.validation_message(MessageKind::Required, "", ""));
    }

    let validators = match &resolved.base().kind {
        ControlKind::Data { validators, .. } => validators.clone(),
        _ => return None,
    };
    for validator in &validators {
        let error = match validator {
            Validator::Length { min, max } => {
                check_length(interface, &field, node, graph, reactor, *min, *max)
            }
            Validator::Date {
                comparison,
                fixed_date,
                days_from_today,
            } => check_date(
                interface,
                &field,
                &node.value(graph, reactor),
                *comparison,
                fixed_date.as_deref(),
                *days_from_today,
            ),
            // Expression validators feed the jsonata slot through the
            // async dispatcher, not this pass.
            Validator::Jsonata { .. } => None,
        };
        if error.is_some() {
            return error;
        }
    }
    None
}

fn check_length(
    interface: &dyn SchemaInterface,
    field: &SchemaField,
    node: &SchemaDataNode,
    graph: &mut DataGraph,
    reactor: &mut Reactor,
    min: Option<usize>,
    max: Option<usize>,
) -> Option<String> {
    let value = node.value(graph, reactor);
    let length = interface.value_length(field, &value);
    if let Some(min) = min {
        if length < min {
            if field.collection {
                // Repair: pad to the minimum with empty elements.
                let mut items = value.as_array().cloned().unwrap_or_default();
                while items.len() < min {
                    items.push(empty_element(field));
                }
                node.set_value(graph, reactor, Value::array(items));
                return None;
            }
            return Some(interface.validation_message(
                MessageKind::LengthBelow,
                &length.to_string(),
                &min.to_string(),
            ));
        }
    }
    if let Some(max) = max {
        if length > max {
            return Some(interface.validation_message(
                MessageKind::LengthAbove,
                &length.to_string(),
                &max.to_string(),
            ));
        }
    }
    None
}

/// The element a padded collection grows with.
fn empty_element(field: &SchemaField) -> Value {
    if field.is_compound() {
        Value::empty_object()
    } else {
        Value::Null
    }
}

fn check_date(
    interface: &dyn SchemaInterface,
    field: &SchemaField,
    value: &Value,
    comparison: DateComparison,
    fixed_date: Option<&str>,
    days_from_today: Option<i64>,
) -> Option<String> {
    if value.is_unset() {
        return None;
    }
    let actual = interface.parse_date(field, value)?;
    let (bound, bound_text) = match fixed_date {
        Some(date) => (
            interface.parse_date(field, &Value::string(date))?,
            date.to_string(),
        ),
        None => {
            let days = days_from_today.unwrap_or(0);
            let date = Utc::now().date_naive() + Duration::days(days);
            let text = date.format("%Y-%m-%d").to_string();
            (interface.parse_date(field, &Value::string(&text))?, text)
        }
    };
    let violated = match comparison {
        DateComparison::NotBefore => actual < bound,
        DateComparison::NotAfter => actual > bound,
    };
    if violated {
        let kind = match comparison {
            DateComparison::NotBefore => MessageKind::NotBeforeDate,
            DateComparison::NotAfter => MessageKind::NotAfterDate,
        };
        Some(interface.validation_message(kind, &actual.to_string(), &bound_text))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::DefaultSchemaInterface;
    use crate::schema_node::SchemaTree;
    use formwork_model::schema::FieldType;
    use formwork_model::ControlDefinition;
    use std::sync::Arc;

    fn setup(
        field: SchemaField,
        data: serde_json::Value,
    ) -> (Reactor, DataGraph, SchemaDataNode) {
        let name = field.field.clone();
        let tree = SchemaTree::new(SchemaField::compound("", vec![field]));
        let mut reactor = Reactor::new();
        let mut graph = DataGraph::new(&mut reactor, data.into());
        let root = SchemaDataNode::root(tree.root_node(), &graph);
        let node = root.child_field(&mut graph, &mut reactor, &name);
        (reactor, graph, node)
    }

    fn resolved(def: ControlDefinition) -> ResolvedDefinition {
        ResolvedDefinition::new(Arc::new(def))
    }

    #[test]
    fn required_fails_on_empty_string() {
        let (mut reactor, mut graph, node) = setup(
            SchemaField::scalar("f", FieldType::String),
            serde_json::json!({ "f": "" }),
        );
        let def = resolved(ControlDefinition::data("f").with_required());
        let error = run_sync_validation(
            &DefaultSchemaInterface,
            &def,
            &node,
            &mut graph,
            &mut reactor,
        );
        assert!(error.is_some());

        node.set_value(&mut graph, &mut reactor, Value::string("x"));
        let error = run_sync_validation(
            &DefaultSchemaInterface,
            &def,
            &node,
            &mut graph,
            &mut reactor,
        );
        assert!(error.is_none());
    }

    #[test]
    fn required_accepts_numeric_zero() {
        let (mut reactor, mut graph, node) = setup(
            SchemaField::scalar("n", FieldType::Int),
            serde_json::json!({ "n": 0 }),
        );
        let def = resolved(ControlDefinition::data("n").with_required());
        assert!(run_sync_validation(
            &DefaultSchemaInterface,
            &def,
            &node,
            &mut graph,
            &mut reactor
        )
        .is_none());
    }

    #[test]
    fn length_pads_short_collections() {
        let (mut reactor, mut graph, node) = setup(
            SchemaField::scalar("pr", FieldType::String).with_collection(),
            serde_json::json!({ "pr": [] }),
        );
        let def = resolved(ControlDefinition::data("pr").with_validator(Validator::Length {
            min: Some(1),
            max: Some(51),
        }));
        let error = run_sync_validation(
            &DefaultSchemaInterface,
            &def,
            &node,
            &mut graph,
            &mut reactor,
        );
        assert!(error.is_none(), "padding repairs instead of failing");
        assert_eq!(node.value(&graph, &reactor).as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn length_reports_on_scalars_and_overflow() {
        let (mut reactor, mut graph, node) = setup(
            SchemaField::scalar("s", FieldType::String),
            serde_json::json!({ "s": "ab" }),
        );
        let def = resolved(ControlDefinition::data("s").with_validator(Validator::Length {
            min: Some(3),
            max: None,
        }));
        let error = run_sync_validation(
            &DefaultSchemaInterface,
            &def,
            &node,
            &mut graph,
            &mut reactor,
        )
        .expect("too short");
        assert!(error.contains('3'), "message cites the bound: {error}");

        let def = resolved(ControlDefinition::data("s").with_validator(Validator::Length {
            min: None,
            max: Some(1),
        }));
        assert!(run_sync_validation(
            &DefaultSchemaInterface,
            &def,
            &node,
            &mut graph,
            &mut reactor
        )
        .is_some());
    }

    #[test]
    fn date_not_before_fixed() {
        let (mut reactor, mut graph, node) = setup(
            SchemaField::scalar("d", FieldType::Date),
            serde_json::json!({ "d": "2024-01-01" }),
        );
        let def = resolved(ControlDefinition::data("d").with_validator(Validator::Date {
            comparison: DateComparison::NotBefore,
            fixed_date: Some("2024-06-01".into()),
            days_from_today: None,
        }));
        let error = run_sync_validation(
            &DefaultSchemaInterface,
            &def,
            &node,
            &mut graph,
            &mut reactor,
        )
        .expect("violates not-before");
        assert!(error.contains("2024-06-01"), "cites the bound date: {error}");

        node.set_value(&mut graph, &mut reactor, Value::string("2024-07-01"));
        assert!(run_sync_validation(
            &DefaultSchemaInterface,
            &def,
            &node,
            &mut graph,
            &mut reactor
        )
        .is_none());
    }

    #[test]
    fn declared_order_first_error_wins() {
        let (mut reactor, mut graph, node) = setup(
            SchemaField::scalar("s", FieldType::String),
            serde_json::json!({ "s": "abcdef" }),
        );
        let def = resolved(
            ControlDefinition::data("s")
                .with_validator(Validator::Length {
                    min: None,
                    max: Some(2),
                })
                .with_validator(Validator::Length {
                    min: Some(10),
                    max: None,
                }),
        );
        let error = run_sync_validation(
            &DefaultSchemaInterface,
            &def,
            &node,
            &mut graph,
            &mut reactor,
        )
        .expect("first validator fails");
        assert!(error.contains('2'), "first declared validator wins: {error}");
    }
}
