//! Form trees: realized positions in a control-definition tree.
//!
//! The tree is Arc-wrapped once at load so navigation is O(1) clones,
//! and controls carrying an id are indexed so `child_ref_id` resolves
//! shared sub-trees by substitution instead of duplication. Reference
//! resolution is what makes recursive form shapes (a control nesting
//! "itself") representable without an infinite tree.

use formwork_model::ControlDefinition;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// One Arc-wrapped control with Arc-wrapped children, built once.
#[derive(Clone)]
pub struct ControlNode(Arc<ControlNodeInner>);

struct ControlNodeInner {
    definition: Arc<ControlDefinition>,
    children: Vec<ControlNode>,
}

impl ControlNode {
    fn build(definition: &ControlDefinition) -> ControlNode {
        let children = definition.children.iter().map(Self::build).collect();
        ControlNode(Arc::new(ControlNodeInner {
            definition: Arc::new(definition.clone()),
            children,
        }))
    }

    /// Wrap a definition created at runtime (synthetic wrappers for
    /// collection elements).
    pub fn synthetic(definition: ControlDefinition) -> ControlNode {
        Self::build(&definition)
    }

    pub fn definition(&self) -> &Arc<ControlDefinition> {
        &self.0.definition
    }

    pub fn children(&self) -> &[ControlNode] {
        &self.0.children
    }

    /// Pointer identity: same realized control, not just equal shape.
    pub fn same(&self, other: &ControlNode) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// An indexed control-definition tree.
#[derive(Clone)]
pub struct FormTree(Arc<FormTreeInner>);

struct FormTreeInner {
    root: ControlNode,
    by_id: FxHashMap<String, ControlNode>,
}

impl FormTree {
    pub fn new(root: ControlDefinition) -> Self {
        let root = ControlNode::build(&root);
        let mut by_id = FxHashMap::default();
        index_ids(&root, &mut by_id);
        Self(Arc::new(FormTreeInner { root, by_id }))
    }

    /// Parse from JSON (a serialized [`ControlDefinition`]).
    pub fn from_json(json: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_value(json)?))
    }

    pub fn root_node(&self) -> FormNode {
        FormNode {
            tree: self.clone(),
            control: self.0.root.clone(),
            id: String::from("0"),
        }
    }

    fn by_id(&self, id: &str) -> Option<&ControlNode> {
        self.0.by_id.get(id)
    }
}

fn index_ids(node: &ControlNode, by_id: &mut FxHashMap<String, ControlNode>) {
    if let Some(id) = &node.definition().id {
        by_id.insert(id.clone(), node.clone());
    }
    for child in node.children() {
        index_ids(child, by_id);
    }
}

/// A realized position in a form tree. The id is path-based and
/// stable across re-renders.
#[derive(Clone)]
pub struct FormNode {
    tree: FormTree,
    control: ControlNode,
    id: String,
}

impl FormNode {
    pub fn definition(&self) -> &Arc<ControlDefinition> {
        self.control.definition()
    }

    pub fn control(&self) -> &ControlNode {
        &self.control
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tree(&self) -> &FormTree {
        &self.tree
    }

    /// Children: literal, or the referenced control's children when
    /// `child_ref_id` is set (substitution, not duplication). An
    /// unresolvable reference yields no children.
    pub fn children(&self) -> Vec<FormNode> {
        let source = match &self.definition().child_ref_id {
            Some(ref_id) => match self.tree.by_id(ref_id) {
                Some(target) => target.clone(),
                None => {
                    tracing::debug!(ref_id, "unresolved child reference");
                    return Vec::new();
                }
            },
            None => self.control.clone(),
        };
        source
            .children()
            .iter()
            .enumerate()
            .map(|(index, child)| FormNode {
                tree: self.tree.clone(),
                control: child.clone(),
                id: format!("{}/{}", self.id, child_id_segment(child, index)),
            })
            .collect()
    }

    /// A child node for a synthetic control created at runtime.
    pub fn synthetic_child(&self, control: ControlNode, label: &str) -> FormNode {
        FormNode {
            tree: self.tree.clone(),
            control,
            id: format!("{}/{}", self.id, label),
        }
    }
}

fn child_id_segment(child: &ControlNode, index: usize) -> String {
    match &child.definition().id {
        Some(id) => id.clone(),
        None => index.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formwork_model::ControlDefinition;

    #[test]
    fn literal_children_get_path_ids() {
        let tree = FormTree::new(ControlDefinition::group(vec![
            ControlDefinition::data("a"),
            ControlDefinition::data("b").with_id("bee"),
        ]));
        let root = tree.root_node();
        let children = root.children();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].id(), "0/0");
        assert_eq!(children[1].id(), "0/bee");
    }

    #[test]
    fn child_ref_substitutes_shared_children() {
        let shared = ControlDefinition::group(vec![ControlDefinition::data("x")]).with_id("shared");
        let tree = FormTree::new(ControlDefinition::group(vec![
            shared,
            ControlDefinition::group(vec![]).with_child_ref("shared"),
        ]));
        let root = tree.root_node();
        let children = root.children();
        let direct = &children[0].children()[0];
        let via_ref = &children[1].children()[0];
        assert!(direct.control().same(via_ref.control()), "same control, not a clone");
        assert_ne!(direct.id(), via_ref.id(), "distinct positions");
    }

    #[test]
    fn recursive_reference_resolves_lazily() {
        // A group that nests itself through child_ref_id; resolving one
        // level at a time must not recurse infinitely.
        let tree = FormTree::new(
            ControlDefinition::group(vec![ControlDefinition::group(vec![])
                .with_child_ref("rec")
                .with_id("inner")])
            .with_id("rec"),
        );
        let root = tree.root_node();
        let level1 = root.children();
        assert_eq!(level1.len(), 1);
        let level2 = level1[0].children();
        assert_eq!(level2.len(), 1);
        assert_eq!(level2[0].definition().id.as_deref(), Some("inner"));
    }

    #[test]
    fn unresolved_reference_is_empty() {
        let tree = FormTree::new(ControlDefinition::group(vec![]).with_child_ref("nope"));
        assert!(tree.root_node().children().is_empty());
    }
}
