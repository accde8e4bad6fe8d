//! Data model for the Formwork form engine.
//!
//! Pure, serde-friendly descriptions shared by every other crate:
//! the runtime [`Value`] type, schema field descriptors, the
//! control-definition tree and expression descriptors. Nothing in
//! here is reactive; the engine crates give these types behavior.

pub mod control;
pub mod expr;
pub mod schema;
pub mod value;

pub use control::{
    ControlDefinition, ControlKind, DateComparison, DisplayData, DynamicProperty,
    DynamicPropertyType, GroupOptions, RenderType, Validator,
};
pub use expr::EntityExpression;
pub use schema::{FieldOption, FieldType, SchemaField};
pub use value::Value;
