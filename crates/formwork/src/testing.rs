//! Test harness: drive a form without a presentation layer.
//!
//! Provides event-free set/read access to the data graph, node
//! navigation by child indexes, assertion helpers, and a scripted
//! query evaluator so the asynchronous expression path runs
//! deterministically in tests.

use crate::evals::{QueryEvaluator, QueryRequest, ResultSink};
use crate::form_tree::FormTree;
use crate::schema_node::SchemaTree;
use crate::state::{FormOptions, FormState, NodeId};
use formwork_model::Value;

/// A query evaluator backed by a closure; responds synchronously with
/// whatever the closure produces.
pub struct FnQueryEvaluator<F>(pub F);

impl<F> QueryEvaluator for FnQueryEvaluator<F>
where
    F: Fn(&QueryRequest) -> Option<Value>,
{
    fn evaluate(&self, request: QueryRequest, respond: ResultSink) {
        if let Some(value) = (self.0)(&request) {
            respond.send(value);
        }
    }
}

/// Test wrapper around a [`FormState`].
pub struct TestForm {
    state: FormState,
}

impl TestForm {
    pub fn new(schema: SchemaTree, form: FormTree, data: serde_json::Value) -> Self {
        Self::with_options(schema, form, data, FormOptions::default())
    }

    pub fn with_options(
        schema: SchemaTree,
        form: FormTree,
        data: serde_json::Value,
        options: FormOptions,
    ) -> Self {
        Self {
            state: FormState::new(schema, form, data.into(), options),
        }
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut FormState {
        &mut self.state
    }

    pub fn root(&self) -> NodeId {
        self.state.root()
    }

    /// Navigate by child indexes from the root: `node_at(&[1, 0])` is
    /// the first child of the root's second child.
    pub fn node_at(&self, indexes: &[usize]) -> NodeId {
        let mut current = self.state.root();
        for &index in indexes {
            let children = self.state.children(current);
            match children.get(index) {
                Some(child) => current = *child,
                None => panic!(
                    "no child at index {index}; node has {} children",
                    children.len()
                ),
            }
        }
        current
    }

    /// Write a data value and re-stabilize.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        self.state.set_data(path, value.into());
    }

    pub fn read(&mut self, path: &str) -> Value {
        self.state.data(path)
    }

    pub fn assert_eq(&mut self, path: &str, expected: Value) {
        let actual = self.read(path);
        assert_eq!(
            actual, expected,
            "path '{path}' expected {expected:?} but got {actual:?}"
        );
    }

    pub fn assert_visible(&self, id: NodeId, expected: bool) {
        assert_eq!(
            self.state.visible(id),
            expected,
            "node visibility mismatch (expected {expected})"
        );
    }

    /// Visibility of every child of a node, in order.
    pub fn child_visibility(&self, id: NodeId) -> Vec<bool> {
        self.state
            .children(id)
            .iter()
            .map(|c| self.state.visible(*c))
            .collect()
    }

    pub fn validate(&mut self) -> bool {
        self.state.validate()
    }
}
