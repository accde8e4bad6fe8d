//! Schema trees and navigation.
//!
//! `SchemaNode` is a realized position in a schema tree: the field
//! plus a parent chain, cheap to clone and created on demand while
//! walking paths. Lookups never fail; unknown names come back as a
//! synthesized missing-field placeholder so callers can render a
//! "field not found" affordance instead of crashing.

use formwork_model::schema::{FieldType, SchemaField};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A schema tree: the root field plus named schemas that
/// `schema_ref` fields resolve through.
#[derive(Clone)]
pub struct SchemaTree(Arc<SchemaTreeInner>);

struct SchemaTreeInner {
    root: Arc<SchemaField>,
    schemas: FxHashMap<String, Arc<SchemaField>>,
}

impl SchemaTree {
    pub fn new(root: SchemaField) -> Self {
        Self::with_schemas(root, std::iter::empty::<(String, SchemaField)>())
    }

    pub fn with_schemas(
        root: SchemaField,
        schemas: impl IntoIterator<Item = (String, SchemaField)>,
    ) -> Self {
        Self(Arc::new(SchemaTreeInner {
            root: Arc::new(root),
            schemas: schemas
                .into_iter()
                .map(|(name, field)| (name, Arc::new(field)))
                .collect(),
        }))
    }

    /// Parse the root schema from JSON (a serialized [`SchemaField`]).
    pub fn from_json(json: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_value(json)?))
    }

    pub fn root_node(&self) -> SchemaNode {
        SchemaNode(Arc::new(SchemaNodeInner {
            tree: self.clone(),
            field: self.0.root.clone(),
            parent: None,
            missing: false,
        }))
    }

    fn lookup_schema(&self, name: &str) -> Option<Arc<SchemaField>> {
        self.0.schemas.get(name).cloned()
    }
}

/// A realized position in a schema tree. Value object: cheap clone,
/// no separate destruction.
#[derive(Clone)]
pub struct SchemaNode(Arc<SchemaNodeInner>);

struct SchemaNodeInner {
    tree: SchemaTree,
    field: Arc<SchemaField>,
    parent: Option<SchemaNode>,
    missing: bool,
}

impl SchemaNode {
    pub fn field(&self) -> &SchemaField {
        &self.0.field
    }

    pub fn parent(&self) -> Option<&SchemaNode> {
        self.0.parent.as_ref()
    }

    pub fn tree(&self) -> &SchemaTree {
        &self.0.tree
    }

    /// True for placeholder nodes synthesized for unknown names.
    pub fn is_missing(&self) -> bool {
        self.0.missing
    }

    /// The effective children of this field: inline children, the
    /// referenced schema's children, or (for `tree_children`) the
    /// children of the nearest ancestor that resolves its own.
    pub fn resolved_children(&self) -> Vec<Arc<SchemaField>> {
        let field = &self.0.field;
        if !field.children.is_empty() {
            return field
                .children
                .iter()
                .map(|c| Arc::new(c.clone()))
                .collect();
        }
        if let Some(schema) = &field.schema_ref {
            return match self.0.tree.lookup_schema(schema) {
                Some(root) => root.children.iter().map(|c| Arc::new(c.clone())).collect(),
                None => Vec::new(),
            };
        }
        if field.tree_children {
            let mut ancestor = self.parent();
            while let Some(node) = ancestor {
                if !node.field().tree_children {
                    return node.resolved_children();
                }
                ancestor = node.parent();
            }
        }
        Vec::new()
    }

    /// Child lookup. Never fails: unknown names produce a placeholder
    /// node with the name preserved as display name.
    pub fn child_node(&self, name: &str) -> SchemaNode {
        let found = self
            .resolved_children()
            .into_iter()
            .find(|c| c.field == name);
        match found {
            Some(field) => SchemaNode(Arc::new(SchemaNodeInner {
                tree: self.0.tree.clone(),
                field,
                parent: Some(self.clone()),
                missing: false,
            })),
            None => {
                let placeholder =
                    SchemaField::scalar(name, FieldType::Any).with_display_name(name);
                SchemaNode(Arc::new(SchemaNodeInner {
                    tree: self.0.tree.clone(),
                    field: Arc::new(placeholder),
                    parent: Some(self.clone()),
                    missing: true,
                }))
            }
        }
    }

    /// Field names from the root down to this node (root excluded).
    pub fn path(&self) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current = Some(self);
        while let Some(node) = current {
            if node.parent().is_some() {
                segments.push(node.field().field.clone());
            }
            current = node.parent();
        }
        segments.reverse();
        segments
    }
}

impl std::fmt::Debug for SchemaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaNode")
            .field("field", &self.field().field)
            .field("missing", &self.is_missing())
            .finish()
    }
}

/// Walk a `/`-separated field path (`.` = self, `..` = parent,
/// names = child). Unresolvable steps keep returning placeholder
/// nodes rather than failing.
pub fn schema_for_field_path(node: &SchemaNode, path: &str) -> SchemaNode {
    let mut current = node.clone();
    for segment in path.split('/') {
        current = match segment {
            "" | "." => current,
            ".." => current.parent().cloned().unwrap_or(current),
            name => current.child_node(name),
        };
    }
    current
}

/// Shortest `../`-prefixed dotted path from one node to another,
/// computed from the longest common path prefix. Used to generate
/// portable field references that survive relocating a sub-tree.
pub fn relative_path(from: &SchemaNode, to: &SchemaNode) -> String {
    let from_path = from.path();
    let to_path = to.path();
    let common = from_path
        .iter()
        .zip(to_path.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let ups = "../".repeat(from_path.len() - common);
    let down = to_path[common..].join(".");
    format!("{ups}{down}")
}
