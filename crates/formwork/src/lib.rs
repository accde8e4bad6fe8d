//! Formwork: a schema-driven, reactive form-state engine.
//!
//! Given a data schema (typed fields and their relationships), a
//! control-definition tree (how fields are grouped, rendered and
//! conditionally gated) and a live mutable data graph, the engine
//! produces a form-state tree that mirrors the control tree and keeps
//! derived properties — visibility, readonly/disabled state, default
//! values, validation errors, dynamic titles/styles/options — in sync
//! with the data as it changes.
//!
//! The presentation layer, the query-expression language runtime and
//! the host scheduler are collaborators behind narrow interfaces
//! ([`evals::QueryEvaluator`], [`evals::AsyncRunner`],
//! [`state::UiAttachment`]); nothing in here renders, parses or
//! persists.

pub mod children;
pub mod data_node;
pub mod evals;
pub mod form_tree;
pub mod interface;
pub mod overrides;
pub mod schema_node;
pub mod scripts;
pub mod state;
pub mod testing;
pub mod validation;

pub use data_node::{resolve_data_path, SchemaDataNode};
pub use form_tree::{ControlNode, FormNode, FormTree};
pub use interface::{DefaultSchemaInterface, MessageKind, SchemaInterface};
pub use overrides::{resolved_field_options, ResolvedDefinition};
pub use schema_node::{relative_path, schema_for_field_path, SchemaNode, SchemaTree};
pub use state::{FormOptions, FormState, NodeId, UiAttachment};

pub use formwork_model as model;
pub use formwork_reactive as reactive;
