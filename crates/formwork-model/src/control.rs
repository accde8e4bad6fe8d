//! Control-definition tree.
//!
//! A control describes how a field (or group of fields) is rendered,
//! gated and validated. Common attributes live on [`ControlDefinition`];
//! the `kind` variant carries what is specific to Data / Group /
//! Display / Action controls. Dynamic behavior is declared either
//! through the legacy `dynamic` list or the modern path-keyed
//! `$scripts` map; the engine unifies both at load time.

use crate::expr::EntityExpression;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How a data control is rendered. Only the aspects the engine cares
/// about are modeled: choice-like kinds fan children out per option,
/// and the null-toggle affordance suppresses default-value writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RenderType {
    #[default]
    Standard,
    Textfield,
    Radio,
    Checkbox,
    CheckList,
    Dropdown,
    /// Renders with an explicit "no value" toggle.
    NullToggle,
}

impl RenderType {
    /// Choice-like renderers get one child scope per selectable option.
    pub fn is_choice_like(self) -> bool {
        matches!(self, RenderType::Radio | RenderType::CheckList)
    }
}

/// Layout options for grouped children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hide_title: bool,
    /// Display-only groups suppress edit affordances on descendants.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub display_only: bool,
}

/// Static content of a display control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DisplayData {
    Text { text: String },
    Html { html: String },
}

/// Date-comparison direction for the date validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateComparison {
    NotBefore,
    NotAfter,
}

/// A validator attached to a data control. Checks run in declared
/// order after the required check; the first failure wins the
/// synchronous error slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Validator {
    /// Collection/string length must fall within [min, max]. A
    /// collection below `min` is repaired by padding with empty
    /// elements instead of reporting an error.
    #[serde(rename_all = "camelCase")]
    Length {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<usize>,
    },
    /// Field value must not fall before/after a fixed date or
    /// today ± `days_from_today`.
    #[serde(rename_all = "camelCase")]
    Date {
        comparison: DateComparison,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fixed_date: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days_from_today: Option<i64>,
    },
    /// Query-language expression: an empty/falsy result passes, any
    /// truthy string result IS the error message.
    #[serde(rename_all = "camelCase")]
    Jsonata { expression: String },
}

/// Legacy single-purpose dynamic-property kinds. Each translates to a
/// path-keyed script; explicit `$scripts` entries win for the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamicPropertyType {
    Visible,
    Readonly,
    Disabled,
    Label,
    DefaultValue,
    ActionData,
    Style,
    LayoutStyle,
    AllowedOptions,
    Display,
    GridColumns,
}

/// One legacy dynamic-property declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicProperty {
    #[serde(rename = "type")]
    pub property: DynamicPropertyType,
    pub expr: EntityExpression,
}

/// What is specific to each control variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlKind {
    #[serde(rename_all = "camelCase")]
    Data {
        /// Schema field path this control binds to (`.` = current
        /// context, `..` = parent).
        field: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        required: bool,
        #[serde(default, skip_serializing_if = "is_default_render")]
        render: RenderType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<Value>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        validators: Vec<Validator>,
        /// Opt out of the global clear-on-hide policy.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        dont_clear_hidden: bool,
        /// Explicitly optional controls never receive default values.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        optional: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_options: Option<GroupOptions>,
    },
    #[serde(rename_all = "camelCase")]
    Group {
        /// Re-scope the data context to this compound field.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compound_field: Option<String>,
        #[serde(default, skip_serializing_if = "is_default_group_options")]
        group_options: GroupOptions,
    },
    #[serde(rename_all = "camelCase")]
    Display { data: DisplayData },
    #[serde(rename_all = "camelCase")]
    Action {
        action_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_data: Option<Value>,
    },
}

fn is_default_render(r: &RenderType) -> bool {
    *r == RenderType::Standard
}

fn is_default_group_options(o: &GroupOptions) -> bool {
    *o == GroupOptions::default()
}

/// A node of the control-definition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tri-state: `None` means "no opinion" (visible by default),
    /// which is distinguishable from an explicit `Some(false)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_class: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic: Vec<DynamicProperty>,
    /// Modern path-keyed dynamic properties, e.g.
    /// `"groupOptions.columns"` → expression.
    #[serde(
        rename = "$scripts",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub scripts: IndexMap<String, EntityExpression>,
    /// Reuse the children of the control with this id instead of
    /// carrying literal children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_ref_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ControlDefinition>,
    #[serde(flatten)]
    pub kind: ControlKind,
}

impl ControlDefinition {
    pub fn data(field: impl Into<String>) -> Self {
        Self::with_kind(ControlKind::Data {
            field: field.into(),
            required: false,
            render: RenderType::Standard,
            default_value: None,
            validators: Vec::new(),
            dont_clear_hidden: false,
            optional: false,
            group_options: None,
        })
    }

    pub fn group(children: Vec<ControlDefinition>) -> Self {
        let mut def = Self::with_kind(ControlKind::Group {
            compound_field: None,
            group_options: GroupOptions::default(),
        });
        def.children = children;
        def
    }

    pub fn display_text(text: impl Into<String>) -> Self {
        Self::with_kind(ControlKind::Display {
            data: DisplayData::Text { text: text.into() },
        })
    }

    pub fn display_html(html: impl Into<String>) -> Self {
        Self::with_kind(ControlKind::Display {
            data: DisplayData::Html { html: html.into() },
        })
    }

    pub fn action(action_id: impl Into<String>) -> Self {
        Self::with_kind(ControlKind::Action {
            action_id: action_id.into(),
            action_data: None,
        })
    }

    fn with_kind(kind: ControlKind) -> Self {
        Self {
            id: None,
            title: None,
            hidden: None,
            readonly: None,
            disabled: None,
            style_class: None,
            layout_class: None,
            dynamic: Vec::new(),
            scripts: IndexMap::new(),
            child_ref_id: None,
            children: Vec::new(),
            kind,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = Some(readonly);
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    pub fn with_children(mut self, children: Vec<ControlDefinition>) -> Self {
        self.children = children;
        self
    }

    pub fn with_child_ref(mut self, id: impl Into<String>) -> Self {
        self.child_ref_id = Some(id.into());
        self
    }

    pub fn with_dynamic(mut self, property: DynamicPropertyType, expr: EntityExpression) -> Self {
        self.dynamic.push(DynamicProperty { property, expr });
        self
    }

    pub fn with_script(mut self, path: impl Into<String>, expr: EntityExpression) -> Self {
        self.scripts.insert(path.into(), expr);
        self
    }

    /// Data-control builders; no-ops on other kinds.
    pub fn with_required(mut self) -> Self {
        if let ControlKind::Data { required, .. } = &mut self.kind {
            *required = true;
        }
        self
    }

    pub fn with_render(mut self, render_type: RenderType) -> Self {
        if let ControlKind::Data { render, .. } = &mut self.kind {
            *render = render_type;
        }
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        if let ControlKind::Data { default_value, .. } = &mut self.kind {
            *default_value = Some(value);
        }
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        if let ControlKind::Data { validators, .. } = &mut self.kind {
            validators.push(validator);
        }
        self
    }

    pub fn with_dont_clear_hidden(mut self) -> Self {
        if let ControlKind::Data {
            dont_clear_hidden, ..
        } = &mut self.kind
        {
            *dont_clear_hidden = true;
        }
        self
    }

    pub fn with_compound_field(mut self, field: impl Into<String>) -> Self {
        if let ControlKind::Group { compound_field, .. } = &mut self.kind {
            *compound_field = Some(field.into());
        }
        self
    }

    /// The bound field path, for data controls.
    pub fn field(&self) -> Option<&str> {
        match &self.kind {
            ControlKind::Data { field, .. } => Some(field),
            _ => None,
        }
    }

    /// The re-scoping field, for data controls and compound groups.
    pub fn data_scope_field(&self) -> Option<&str> {
        match &self.kind {
            ControlKind::Data { field, .. } => Some(field),
            ControlKind::Group { compound_field, .. } => compound_field.as_deref(),
            _ => None,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self.kind, ControlKind::Data { .. })
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ControlKind::Group { .. })
    }
}
