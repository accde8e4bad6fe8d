//! Schema data nodes: a schema position bound to a live location in
//! the mutable data graph.

use crate::schema_node::SchemaNode;
use formwork_model::Value;
use formwork_reactive::{DataGraph, DataId, ElementKey, Reactor};
use std::sync::Arc;

/// A live binding of a schema node to a data-graph position, plus an
/// optional element index when the node denotes one element of a
/// collection. Cheap to clone.
#[derive(Clone)]
pub struct SchemaDataNode(Arc<Inner>);

struct Inner {
    schema: SchemaNode,
    id: DataId,
    element_index: Option<usize>,
    element_key: Option<ElementKey>,
    parent: Option<SchemaDataNode>,
}

impl SchemaDataNode {
    pub fn root(schema: SchemaNode, graph: &DataGraph) -> Self {
        Self(Arc::new(Inner {
            schema,
            id: graph.root(),
            element_index: None,
            element_key: None,
            parent: None,
        }))
    }

    pub fn schema(&self) -> &SchemaNode {
        &self.0.schema
    }

    pub fn data_id(&self) -> DataId {
        self.0.id
    }

    pub fn element_index(&self) -> Option<usize> {
        self.0.element_index
    }

    pub fn element_key(&self) -> Option<ElementKey> {
        self.0.element_key
    }

    pub fn parent(&self) -> Option<&SchemaDataNode> {
        self.0.parent.as_ref()
    }

    /// True when this node denotes one element of a collection rather
    /// than the collection itself.
    pub fn is_element(&self) -> bool {
        self.0.element_index.is_some()
    }

    /// True when this denotes an un-indexed collection field.
    pub fn is_collection(&self) -> bool {
        self.0.schema.field().collection && !self.is_element()
    }

    pub fn value(&self, graph: &DataGraph, reactor: &Reactor) -> Value {
        graph.value(reactor, self.0.id)
    }

    pub fn value_tracked(&self, graph: &DataGraph, reactor: &mut Reactor) -> Value {
        graph.value_tracked(reactor, self.0.id)
    }

    pub fn set_value(&self, graph: &mut DataGraph, reactor: &mut Reactor, value: Value) -> bool {
        graph.set_value(reactor, self.0.id, value)
    }

    /// Whether the underlying graph position is still alive (an
    /// element node dies when its element is removed).
    pub fn is_alive(&self, graph: &DataGraph) -> bool {
        graph.is_alive(self.0.id)
    }

    pub fn child_field(
        &self,
        graph: &mut DataGraph,
        reactor: &mut Reactor,
        name: &str,
    ) -> SchemaDataNode {
        let id = graph.child_field(reactor, self.0.id, name);
        SchemaDataNode(Arc::new(Inner {
            schema: self.0.schema.child_node(name),
            id,
            element_index: None,
            element_key: None,
            parent: Some(self.clone()),
        }))
    }

    pub fn element_count(&self, graph: &DataGraph, reactor: &Reactor) -> usize {
        graph.element_count(reactor, self.0.id)
    }

    /// Data-path segments from the root down to this node: field
    /// names, with element positions rendered as indexes.
    pub fn path_segments(&self) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = Some(self);
        while let Some(node) = current {
            if node.0.parent.is_some() {
                match node.0.element_index {
                    Some(index) => segments.push(index.to_string()),
                    None => segments.push(node.schema().field().field.clone()),
                }
            }
            current = node.parent();
        }
        segments.reverse();
        segments
    }

    /// Navigate to one element of a collection node. The element keeps
    /// this node's schema (same field, elementhood flagged).
    pub fn child_element(
        &self,
        graph: &mut DataGraph,
        reactor: &mut Reactor,
        index: usize,
    ) -> Option<SchemaDataNode> {
        let id = graph.child_element(reactor, self.0.id, index)?;
        let key = graph.element_key(reactor, self.0.id, index);
        Some(SchemaDataNode(Arc::new(Inner {
            schema: self.0.schema.clone(),
            id,
            element_index: Some(index),
            element_key: key,
            parent: Some(self.clone()),
        })))
    }
}

impl std::fmt::Debug for SchemaDataNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaDataNode")
            .field("field", &self.schema().field().field)
            .field("element_index", &self.0.element_index)
            .finish()
    }
}

/// Walk a `/`-separated field path from a data node. `.` stays, `..`
/// steps out of elementhood first (an element's parent is its
/// collection) and to the schema parent otherwise. Returns `None`
/// only when an element index no longer resolves; unknown field names
/// still produce (placeholder-schema) nodes.
pub fn resolve_data_path(
    start: &SchemaDataNode,
    graph: &mut DataGraph,
    reactor: &mut Reactor,
    path: &str,
) -> Option<SchemaDataNode> {
    let mut current = start.clone();
    for segment in path.split('/') {
        current = match segment {
            "" | "." => current,
            ".." => current.parent().cloned().unwrap_or(current),
            name => current.child_field(graph, reactor, name),
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_node::SchemaTree;
    use formwork_model::schema::{FieldType, SchemaField};

    fn setup() -> (Reactor, DataGraph, SchemaDataNode) {
        let tree = SchemaTree::new(SchemaField::compound(
            "",
            vec![
                SchemaField::scalar("name", FieldType::String),
                SchemaField::scalar("items", FieldType::String).with_collection(),
            ],
        ));
        let mut reactor = Reactor::new();
        let graph = DataGraph::new(&mut reactor, serde_json::json!({}).into());
        let root = SchemaDataNode::root(tree.root_node(), &graph);
        (reactor, graph, root)
    }

    #[test]
    fn field_navigation_binds_schema_and_data() {
        let (mut reactor, mut graph, root) = setup();
        let name = root.child_field(&mut graph, &mut reactor, "name");
        assert_eq!(name.schema().field().field, "name");
        assert_eq!(name.value(&graph, &reactor), Value::Undefined);

        name.set_value(&mut graph, &mut reactor, Value::string("x"));
        assert_eq!(
            root.value(&graph, &reactor).get("name"),
            Some(&Value::string("x"))
        );
    }

    #[test]
    fn element_navigation() {
        let (mut reactor, mut graph, root) = setup();
        let items = root.child_field(&mut graph, &mut reactor, "items");
        items.set_value(
            &mut graph,
            &mut reactor,
            Value::array([Value::string("a"), Value::string("b")]),
        );
        assert!(items.is_collection());

        let first = items.child_element(&mut graph, &mut reactor, 0).unwrap();
        assert!(first.is_element());
        assert_eq!(first.value(&graph, &reactor), Value::string("a"));
        assert!(items.child_element(&mut graph, &mut reactor, 5).is_none());
    }

    #[test]
    fn dotdot_steps_out_of_elementhood() {
        let (mut reactor, mut graph, root) = setup();
        let items = root.child_field(&mut graph, &mut reactor, "items");
        items.set_value(&mut graph, &mut reactor, Value::array([Value::string("a")]));
        let element = items.child_element(&mut graph, &mut reactor, 0).unwrap();

        let back = resolve_data_path(&element, &mut graph, &mut reactor, "..").unwrap();
        assert!(back.is_collection());
        assert_eq!(back.schema().field().field, "items");
    }
}
