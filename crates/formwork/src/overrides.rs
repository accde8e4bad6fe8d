//! Resolved definition views.
//!
//! Instead of proxying the static definition, evaluation produces a
//! sparse path→value override map per node and this view answers
//! property reads: override first, static fall-through otherwise.
//! Which paths are overridable is explicit in the accessors, and
//! nested targets (display data, group options) resolve through the
//! same map — no bespoke plumbing per nesting level. Collection
//! elements each get their own view; there is never a shared override
//! tree across elements.

use crate::scripts::paths;
use formwork_model::control::{ControlDefinition, ControlKind, DisplayData, RenderType};
use formwork_model::schema::{FieldOption, SchemaField};
use formwork_model::Value;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// The evaluated (override-applied) view of one control definition.
#[derive(Clone)]
pub struct ResolvedDefinition {
    base: Arc<ControlDefinition>,
    overrides: FxHashMap<String, Value>,
}

impl ResolvedDefinition {
    pub fn new(base: Arc<ControlDefinition>) -> Self {
        Self {
            base,
            overrides: FxHashMap::default(),
        }
    }

    pub fn with_overrides(
        base: Arc<ControlDefinition>,
        overrides: FxHashMap<String, Value>,
    ) -> Self {
        Self { base, overrides }
    }

    pub fn base(&self) -> &Arc<ControlDefinition> {
        &self.base
    }

    /// The raw override for a path, if any evaluation produced one.
    pub fn override_value(&self, path: &str) -> Option<&Value> {
        self.overrides.get(path)
    }

    /// Tri-state hidden: `None` means no opinion (defaults to
    /// visible). An override of `Null`/`Undefined` keeps the
    /// distinction alive rather than collapsing to `false`.
    pub fn hidden(&self) -> Option<bool> {
        match self.overrides.get(paths::HIDDEN) {
            Some(Value::Undefined) | Some(Value::Null) => None,
            Some(v) => Some(v.truthy()),
            None => self.base.hidden,
        }
    }

    pub fn readonly(&self) -> bool {
        match self.overrides.get(paths::READONLY) {
            Some(v) => v.truthy(),
            None => self.base.readonly.unwrap_or(false),
        }
    }

    pub fn disabled(&self) -> bool {
        match self.overrides.get(paths::DISABLED) {
            Some(v) => v.truthy(),
            None => self.base.disabled.unwrap_or(false),
        }
    }

    pub fn title(&self) -> Option<String> {
        match self.overrides.get(paths::TITLE) {
            Some(Value::String(s)) => Some(s.to_string()),
            Some(_) => None,
            None => self.base.title.clone(),
        }
    }

    pub fn style_class(&self) -> Option<String> {
        self.text_override(paths::STYLE)
            .or_else(|| self.base.style_class.clone())
    }

    pub fn layout_class(&self) -> Option<String> {
        self.text_override(paths::LAYOUT_STYLE)
            .or_else(|| self.base.layout_class.clone())
    }

    pub fn default_value(&self) -> Option<Value> {
        match self.overrides.get(paths::DEFAULT_VALUE) {
            Some(Value::Undefined) => None,
            Some(v) => Some(v.clone()),
            None => match &self.base.kind {
                ControlKind::Data { default_value, .. } => default_value.clone(),
                _ => None,
            },
        }
    }

    pub fn action_data(&self) -> Option<Value> {
        match self.overrides.get(paths::ACTION_DATA) {
            Some(Value::Undefined) => None,
            Some(v) => Some(v.clone()),
            None => match &self.base.kind {
                ControlKind::Action { action_data, .. } => action_data.clone(),
                _ => None,
            },
        }
    }

    /// Display content with dynamic text/html applied.
    pub fn display_data(&self) -> Option<DisplayData> {
        let base = match &self.base.kind {
            ControlKind::Display { data } => data.clone(),
            _ => return None,
        };
        Some(match base {
            DisplayData::Text { text } => DisplayData::Text {
                text: self.text_override(paths::DISPLAY_TEXT).unwrap_or(text),
            },
            DisplayData::Html { html } => DisplayData::Html {
                html: self.text_override(paths::DISPLAY_HTML).unwrap_or(html),
            },
        })
    }

    /// Grid columns, from whichever nesting the control kind uses.
    pub fn columns(&self) -> Option<u32> {
        let path = match &self.base.kind {
            ControlKind::Group { .. } => paths::GROUP_COLUMNS,
            _ => paths::RENDER_GROUP_COLUMNS,
        };
        match self.overrides.get(path) {
            Some(v) => v.as_int().map(|n| n as u32),
            None => match &self.base.kind {
                ControlKind::Group { group_options, .. } => group_options.columns,
                ControlKind::Data {
                    group_options: Some(options),
                    ..
                } => options.columns,
                _ => None,
            },
        }
    }

    /// The evaluated allowed-options filter, if present.
    pub fn allowed_options(&self) -> Option<&[Value]> {
        match self.overrides.get(paths::ALLOWED_OPTIONS) {
            Some(Value::Array(items)) => Some(items.as_slice()),
            _ => None,
        }
    }

    fn text_override(&self, path: &str) -> Option<String> {
        match self.overrides.get(path) {
            Some(Value::String(s)) => Some(s.to_string()),
            _ => None,
        }
    }

    // Static pass-throughs the engine reads often.

    pub fn field(&self) -> Option<&str> {
        self.base.field()
    }

    pub fn data_scope_field(&self) -> Option<&str> {
        self.base.data_scope_field()
    }

    pub fn render(&self) -> RenderType {
        match &self.base.kind {
            ControlKind::Data { render, .. } => *render,
            _ => RenderType::Standard,
        }
    }

    pub fn required(&self) -> bool {
        matches!(&self.base.kind, ControlKind::Data { required: true, .. })
    }

    pub fn optional(&self) -> bool {
        matches!(&self.base.kind, ControlKind::Data { optional: true, .. })
    }

    pub fn dont_clear_hidden(&self) -> bool {
        matches!(
            &self.base.kind,
            ControlKind::Data {
                dont_clear_hidden: true,
                ..
            }
        )
    }
}

/// The option set a bound node exposes: schema options, optionally
/// filtered and reordered by the evaluated allowed-options list.
/// Allowed values missing from the base set are synthesized as
/// options (raw value as display text), never dropped silently.
pub fn resolved_field_options(
    field: &SchemaField,
    resolved: &ResolvedDefinition,
) -> Vec<FieldOption> {
    let base = &field.options;
    match resolved.allowed_options() {
        None => base.clone(),
        Some(allowed) => allowed
            .iter()
            .map(|value| {
                base.iter()
                    .find(|option| option.value == *value)
                    .cloned()
                    .unwrap_or_else(|| FieldOption::new(value.to_string(), value.clone()))
            })
            .collect(),
    }
}
