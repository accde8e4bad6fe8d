//! Schema field descriptors.
//!
//! A schema describes the shape of the data a form binds to: typed
//! scalar and compound fields, collections, enumerable options and
//! reference-based reuse of other schemas. Descriptors are plain data;
//! navigation and resolution live in the engine crate.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// The primitive type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FieldType {
    #[default]
    String,
    Bool,
    Int,
    Double,
    Date,
    DateTime,
    Time,
    /// Nested-object field: children come from `children`,
    /// `schema_ref` or `tree_children`.
    Compound,
    /// Placeholder type for synthesized missing fields.
    Any,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Int | FieldType::Double)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, FieldType::Date | FieldType::DateTime | FieldType::Time)
    }
}

/// One enumerable choice for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOption {
    pub name: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl FieldOption {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            description: None,
            group: None,
            disabled: false,
        }
    }
}

/// A typed data attribute, scalar or compound.
///
/// For compounds, exactly one of `children` (inline), `schema_ref`
/// (children of another named schema) or `tree_children` (children of
/// the nearest ancestor that does not itself set `tree_children`)
/// determines the resolved children. `tree_children` enables
/// self-referential recursive schemas; resolution walks ancestors and
/// always terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub collection: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not_nullable: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
    /// Arbitrary string markers, e.g. discriminator or applicability tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SchemaField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_ref: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tree_children: bool,
}

impl SchemaField {
    /// A scalar field of the given type.
    pub fn scalar(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            field: name.into(),
            display_name: None,
            field_type,
            collection: false,
            not_nullable: false,
            required: false,
            default_value: None,
            options: Vec::new(),
            tags: Vec::new(),
            children: Vec::new(),
            schema_ref: None,
            tree_children: false,
        }
    }

    /// A compound field with inline children.
    pub fn compound(name: impl Into<String>, children: Vec<SchemaField>) -> Self {
        let mut field = Self::scalar(name, FieldType::Compound);
        field.children = children;
        field
    }

    /// A compound field whose children come from a named schema.
    pub fn compound_ref(name: impl Into<String>, schema: impl Into<String>) -> Self {
        let mut field = Self::scalar(name, FieldType::Compound);
        field.schema_ref = Some(schema.into());
        field
    }

    /// A compound field whose children come from the nearest ancestor.
    pub fn compound_tree(name: impl Into<String>) -> Self {
        let mut field = Self::scalar(name, FieldType::Compound);
        field.tree_children = true;
        field
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_collection(mut self) -> Self {
        self.collection = true;
        self
    }

    pub fn with_required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_not_nullable(mut self) -> Self {
        self.not_nullable = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_options(mut self, options: impl IntoIterator<Item = FieldOption>) -> Self {
        self.options = options.into_iter().collect();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Display name, falling back to the field name.
    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.field)
    }

    pub fn is_compound(&self) -> bool {
        self.field_type == FieldType::Compound
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
