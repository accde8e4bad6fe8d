//! Child resolution: which child nodes a form-state node materializes.
//!
//! Priority order: option fan-out for choice-like bound controls,
//! element fan-out for un-indexed collections, literal children
//! otherwise. Each produced spec carries a stable key so the state
//! layer can diff and reuse live children instead of recreating them.

use crate::data_node::SchemaDataNode;
use crate::form_tree::{ControlNode, FormNode};
use crate::interface::SchemaInterface;
use crate::overrides::{resolved_field_options, ResolvedDefinition};
use formwork_model::ControlDefinition;
use formwork_model::Value;
use formwork_reactive::{DataGraph, Reactor};
use rustc_hash::FxHashMap;

/// Stable identity for one child slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKey {
    /// Literal/resolved child at this definition index.
    Definition(usize),
    /// One collection element, keyed by element identity.
    Element(u64),
    /// One selectable option, keyed by position in the option set.
    OptionIndex(usize),
}

/// Everything needed to materialize one child node.
pub struct ChildSpec {
    pub key: ChildKey,
    pub form: FormNode,
    /// The data context the child's field references resolve against.
    pub context: SchemaDataNode,
    /// Injected variable scope (option fan-out).
    pub variables: FxHashMap<String, Value>,
}

pub struct ChildResolveArgs<'a> {
    pub form: &'a FormNode,
    pub resolved: &'a ResolvedDefinition,
    pub parent_context: &'a SchemaDataNode,
    pub data: Option<&'a SchemaDataNode>,
    pub interface: &'a dyn SchemaInterface,
    pub graph: &'a mut DataGraph,
    pub reactor: &'a mut Reactor,
    /// Cache for the synthetic wrapper this node may need; owned by
    /// the state node so the wrapper identity is stable across passes.
    pub synthetic: &'a mut Option<ControlNode>,
}

/// Produce the ordered child specifications for a node.
pub fn resolve_child_specs(args: ChildResolveArgs<'_>) -> Vec<ChildSpec> {
    let ChildResolveArgs {
        form,
        resolved,
        parent_context,
        data,
        interface,
        graph,
        reactor,
        synthetic,
    } = args;

    // 1. Choice-like bound control with options: one child per option,
    //    each wrapping the same nested content with its own variables.
    if let Some(data) = data {
        if resolved.render().is_choice_like() {
            let field = data.schema().field().clone();
            let options = resolved_field_options(&field, resolved);
            if !options.is_empty() {
                let wrapper = synthetic_wrapper(form, synthetic);
                let current = data.value_tracked(graph, reactor);
                return options
                    .iter()
                    .enumerate()
                    .map(|(index, option)| {
                        let selected = interface.value_selected(&field, &current, &option.value);
                        let mut variables = FxHashMap::default();
                        variables.insert(
                            "option".to_string(),
                            Value::object([
                                ("name", Value::string(option.name.clone())),
                                ("value", option.value.clone()),
                            ]),
                        );
                        variables.insert("optionSelected".to_string(), Value::Bool(selected));
                        ChildSpec {
                            key: ChildKey::OptionIndex(index),
                            form: wrapper.clone(),
                            context: parent_context.clone(),
                            variables,
                        }
                    })
                    .collect();
            }
        }

        // 2. Un-indexed collection: one child per element.
        if data.is_collection() {
            let count = data.element_count(graph, reactor);
            // Track the collection value so growth/shrink re-resolves.
            let _ = data.value_tracked(graph, reactor);
            let mut specs = Vec::with_capacity(count);
            for index in 0..count {
                let Some(element) = data.child_element(graph, reactor, index) else {
                    continue;
                };
                let key = element
                    .element_key()
                    .map(|k| ChildKey::Element(k.0))
                    .unwrap_or(ChildKey::Definition(index));
                specs.push(ChildSpec {
                    key,
                    form: element_form(form, synthetic),
                    context: element,
                    variables: FxHashMap::default(),
                });
            }
            return specs;
        }
    }

    // 3. Literal/resolved children, re-scoped through the control's
    //    own data node when it has one.
    let context = match data {
        Some(data) if !data.is_collection() => data.clone(),
        _ => parent_context.clone(),
    };
    form.children()
        .into_iter()
        .enumerate()
        .map(|(index, child)| ChildSpec {
            key: ChildKey::Definition(index),
            form: child,
            context: context.clone(),
            variables: FxHashMap::default(),
        })
        .collect()
}

/// The form node each collection element renders: the single template
/// directly, a synthetic group around several templates, or a
/// synthetic whole-element binding when there are none.
fn element_form(form: &FormNode, synthetic: &mut Option<ControlNode>) -> FormNode {
    let mut templates = form.children();
    if templates.len() == 1 {
        if let Some(template) = templates.pop() {
            return template;
        }
    }
    let node = synthetic.get_or_insert_with(|| {
        if templates.is_empty() {
            // Bind the element itself.
            ControlNode::synthetic(ControlDefinition::data("."))
        } else {
            let children = templates
                .iter()
                .map(|t| (**t.definition()).clone())
                .collect();
            ControlNode::synthetic(ControlDefinition::group(children))
        }
    });
    form.synthetic_child(node.clone(), "element")
}

/// The shared wrapper option children render.
fn synthetic_wrapper(form: &FormNode, synthetic: &mut Option<ControlNode>) -> FormNode {
    let node = synthetic.get_or_insert_with(|| {
        let children = form
            .children()
            .iter()
            .map(|t| (**t.definition()).clone())
            .collect();
        ControlNode::synthetic(ControlDefinition::group(children))
    });
    form.synthetic_child(node.clone(), "option")
}
