//! Script resolution: one path-keyed representation for dynamic
//! properties.
//!
//! Legacy single-purpose `dynamic` declarations and modern `$scripts`
//! entries are unified here in a single translation pass, so the rest
//! of the engine only ever deals with path-keyed scripts. Explicit
//! `$scripts` entries win over legacy-derived ones for the same path.

use formwork_model::control::{
    ControlDefinition, ControlKind, DisplayData, DynamicProperty, DynamicPropertyType,
};
use formwork_model::EntityExpression;
use indexmap::IndexMap;
use formwork_model::Value;

/// Script target paths (the ones with dedicated accessors).
pub mod paths {
    pub const HIDDEN: &str = "hidden";
    pub const READONLY: &str = "readonly";
    pub const DISABLED: &str = "disabled";
    pub const TITLE: &str = "title";
    pub const DEFAULT_VALUE: &str = "defaultValue";
    pub const ACTION_DATA: &str = "actionData";
    pub const STYLE: &str = "style";
    pub const LAYOUT_STYLE: &str = "layoutStyle";
    pub const ALLOWED_OPTIONS: &str = "allowedOptions";
    pub const DISPLAY_TEXT: &str = "displayData.text";
    pub const DISPLAY_HTML: &str = "displayData.html";
    pub const GROUP_COLUMNS: &str = "groupOptions.columns";
    pub const RENDER_GROUP_COLUMNS: &str = "renderOptions.groupOptions.columns";
}

/// How an evaluated script result is shaped before landing in its
/// override cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Truthiness.
    Bool,
    /// Numbers pass, everything else becomes undefined.
    Number,
    /// Strings pass, unset stays unset, other values stringify
    /// through structural serialization.
    Text,
    /// Arrays pass, everything else becomes undefined.
    ValueList,
    /// Pass-through.
    Raw,
}

impl Coercion {
    pub fn apply(self, value: Value) -> Value {
        match self {
            Coercion::Bool => Value::Bool(value.truthy()),
            Coercion::Number => match value {
                v @ (Value::Int(_) | Value::Float(_)) => v,
                _ => Value::Undefined,
            },
            Coercion::Text => match value {
                v @ Value::String(_) => v,
                Value::Undefined | Value::Null => Value::Undefined,
                other => Value::string(other.to_json().to_string()),
            },
            Coercion::ValueList => match value {
                v @ Value::Array(_) => v,
                _ => Value::Undefined,
            },
            Coercion::Raw => value,
        }
    }
}

/// The coercion for a script target path. Unknown paths pass raw; the
/// resolved view simply never reads them, which keeps unknown targets
/// a silent no-op.
pub fn coercion_for_path(path: &str) -> Coercion {
    match path {
        paths::HIDDEN | paths::READONLY | paths::DISABLED => Coercion::Bool,
        paths::GROUP_COLUMNS | paths::RENDER_GROUP_COLUMNS => Coercion::Number,
        paths::TITLE
        | paths::STYLE
        | paths::LAYOUT_STYLE
        | paths::DISPLAY_TEXT
        | paths::DISPLAY_HTML => Coercion::Text,
        paths::ALLOWED_OPTIONS => Coercion::ValueList,
        _ => Coercion::Raw,
    }
}

/// Whether a path's override cell starts from the raw static value
/// instead of a coerced one, so "unset" stays distinguishable from
/// "explicitly false". Only `hidden` needs this.
pub fn null_initializes(path: &str) -> bool {
    path == paths::HIDDEN
}

/// A node's active dynamic-property set: the union of legacy
/// declarations (translated to paths) and explicit `$scripts`,
/// explicit entries winning per path.
pub fn effective_scripts(definition: &ControlDefinition) -> IndexMap<String, EntityExpression> {
    let mut scripts = IndexMap::new();
    for dynamic in &definition.dynamic {
        if let Some((path, expr)) = translate_dynamic(definition, dynamic) {
            scripts.insert(path.to_string(), expr);
        }
    }
    for (path, expr) in &definition.scripts {
        scripts.insert(path.clone(), expr.clone());
    }
    scripts
}

/// One legacy declaration to its path-keyed form. Declarations that
/// make no sense for the control's kind translate to nothing.
fn translate_dynamic(
    definition: &ControlDefinition,
    dynamic: &DynamicProperty,
) -> Option<(&'static str, EntityExpression)> {
    let expr = dynamic.expr.clone();
    Some(match dynamic.property {
        // Visible is stored inverted: the script target is `hidden`.
        DynamicPropertyType::Visible => (paths::HIDDEN, EntityExpression::not(expr)),
        DynamicPropertyType::Readonly => (paths::READONLY, expr),
        DynamicPropertyType::Disabled => (paths::DISABLED, expr),
        DynamicPropertyType::Label => (paths::TITLE, expr),
        DynamicPropertyType::DefaultValue => (paths::DEFAULT_VALUE, expr),
        DynamicPropertyType::ActionData => (paths::ACTION_DATA, expr),
        DynamicPropertyType::Style => (paths::STYLE, expr),
        DynamicPropertyType::LayoutStyle => (paths::LAYOUT_STYLE, expr),
        DynamicPropertyType::AllowedOptions => (paths::ALLOWED_OPTIONS, expr),
        DynamicPropertyType::Display => match &definition.kind {
            ControlKind::Display {
                data: DisplayData::Html { .. },
            } => (paths::DISPLAY_HTML, expr),
            ControlKind::Display {
                data: DisplayData::Text { .. },
            } => (paths::DISPLAY_TEXT, expr),
            _ => return None,
        },
        DynamicPropertyType::GridColumns => match &definition.kind {
            ControlKind::Group { .. } => (paths::GROUP_COLUMNS, expr),
            ControlKind::Data { .. } => (paths::RENDER_GROUP_COLUMNS, expr),
            _ => return None,
        },
    })
}
