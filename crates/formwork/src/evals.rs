//! Expression evaluation dispatch.
//!
//! One uniform invocation contract for every dynamic property and
//! validator expression: an [`Evaluation`] owns a target (an override
//! cell or a data node's error slot), re-runs its expression whenever
//! a recorded dependency changes, and releases everything with its
//! owning node. Dispatch is a table keyed by expression-kind string;
//! the query-language kind is asynchronous, delivered through a
//! channel and guarded by an epoch so a superseded in-flight
//! evaluation can never write into a newer state (last-write-wins,
//! not queued).

use crate::data_node::{resolve_data_path, SchemaDataNode};
use crate::interface::SchemaInterface;
use crate::scripts::Coercion;
use formwork_model::{EntityExpression, Value};
use formwork_reactive::{CellId, DataGraph, DataId, DepRecord, Reactor};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use rustc_hash::FxHashMap;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Where an evaluation result lands.
#[derive(Debug, Clone)]
pub enum EvalTarget {
    /// An override cell; the coerced result is written directly.
    Cell(CellId),
    /// A named error slot on a data node; a truthy result is the
    /// message, anything else clears the slot.
    ErrorSlot(DataId, &'static str),
}

/// A delivered asynchronous result.
pub struct AsyncOutcome {
    pub target: EvalTarget,
    pub value: Value,
}

/// Scheduler for asynchronous evaluation work. The default runs the
/// task immediately; hosts with an event loop inject their own.
pub type AsyncRunner = Box<dyn Fn(Box<dyn FnOnce()>)>;

pub fn immediate_runner() -> AsyncRunner {
    Box::new(|task| task())
}

/// Everything the query-language evaluator gets to see.
pub struct QueryRequest {
    pub expression: String,
    /// Snapshot of the data root.
    pub data: Value,
    /// Path of the current node within the data root.
    pub path: Vec<String>,
    pub variables: FxHashMap<String, Value>,
}

/// The pluggable query-language evaluator. `respond.send` may be
/// called any number of times; each call supersedes the previous.
///
/// Domain errors are the evaluator's to catch: a panicking evaluator
/// is an evaluator bug. The engine still guards each dispatch so the
/// failure is logged, the target keeps its last value and nothing
/// else is corrupted.
pub trait QueryEvaluator {
    fn evaluate(&self, request: QueryRequest, respond: ResultSink);
}

/// A query evaluator that never responds; targets keep their initial
/// values.
pub struct NoopQueryEvaluator;

impl QueryEvaluator for NoopQueryEvaluator {
    fn evaluate(&self, _request: QueryRequest, _respond: ResultSink) {}
}

/// Liveness + epoch marker shared with in-flight async work. Cleanup
/// flips `alive`; re-evaluation bumps `epoch`. Either invalidates
/// every sink minted before.
pub struct EvalToken {
    alive: Cell<bool>,
    epoch: Cell<u64>,
}

impl EvalToken {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            alive: Cell::new(true),
            epoch: Cell::new(0),
        })
    }
}

/// The callback handed to asynchronous evaluators.
pub struct ResultSink {
    target: EvalTarget,
    coerce: Coercion,
    negate: bool,
    token: Arc<EvalToken>,
    epoch: u64,
    tx: UnboundedSender<AsyncOutcome>,
}

impl ResultSink {
    /// Deliver a result. Stale sinks (superseded epoch or released
    /// owner) drop the value.
    pub fn send(&self, value: Value) {
        if !self.token.alive.get() || self.token.epoch.get() != self.epoch {
            tracing::debug!("stale async evaluation result discarded");
            return;
        }
        let value = if self.negate {
            Value::Bool(!value.truthy())
        } else {
            value
        };
        let outcome = AsyncOutcome {
            target: self.target.clone(),
            value: self.coerce.apply(value),
        };
        let _ = self.tx.unbounded_send(outcome);
    }
}

/// Create the channel async results flow through.
pub fn outcome_channel() -> (UnboundedSender<AsyncOutcome>, UnboundedReceiver<AsyncOutcome>) {
    unbounded()
}

/// Borrowed evaluation environment for one dispatch.
pub struct EvalSession<'a> {
    pub reactor: &'a mut Reactor,
    pub graph: &'a mut DataGraph,
    pub interface: &'a dyn SchemaInterface,
    /// Data root, for query expressions.
    pub root: &'a SchemaDataNode,
    /// Data context field references resolve against.
    pub context: Option<&'a SchemaDataNode>,
    pub variables: &'a FxHashMap<String, Value>,
    pub query: &'a Arc<dyn QueryEvaluator>,
    pub run_async: &'a AsyncRunner,
    pub async_tx: &'a UnboundedSender<AsyncOutcome>,
}

/// Per-dispatch mutable state threaded through evaluator functions.
pub struct EvalFrame<'a> {
    pub sink: SinkSpec,
    /// Cache so the uuid kind stays stable across re-runs.
    pub uuid: &'a mut Option<Value>,
}

/// Template for minting [`ResultSink`]s during one dispatch.
#[derive(Clone)]
pub struct SinkSpec {
    pub target: EvalTarget,
    pub coerce: Coercion,
    pub negate: bool,
    pub token: Arc<EvalToken>,
    pub epoch: u64,
}

impl SinkSpec {
    fn sink(&self, tx: &UnboundedSender<AsyncOutcome>) -> ResultSink {
        ResultSink {
            target: self.target.clone(),
            coerce: self.coerce,
            negate: self.negate,
            token: self.token.clone(),
            epoch: self.epoch,
            tx: tx.clone(),
        }
    }
}

/// An evaluator table entry. Synchronous kinds return the value;
/// asynchronous kinds schedule work against the frame's sink and
/// return nothing.
pub type EvalFn =
    fn(&EntityExpression, &EvalTable, &mut EvalSession<'_>, &mut EvalFrame<'_>) -> Option<Value>;

/// Dispatch table keyed by expression-kind string.
pub struct EvalTable {
    entries: FxHashMap<&'static str, EvalFn>,
}

impl EvalTable {
    /// The built-in kinds.
    pub fn standard() -> Self {
        let mut table = Self {
            entries: FxHashMap::default(),
        };
        table.register("data", eval_data);
        table.register("dataMatch", eval_data_match);
        table.register("notEmpty", eval_not_empty);
        table.register("uuid", eval_uuid);
        table.register("notExpr", eval_not);
        table.register("jsonata", eval_jsonata);
        table
    }

    pub fn register(&mut self, kind: &'static str, f: EvalFn) {
        self.entries.insert(kind, f);
    }

    pub fn dispatch(
        &self,
        expr: &EntityExpression,
        session: &mut EvalSession<'_>,
        frame: &mut EvalFrame<'_>,
    ) -> Option<Value> {
        match self.entries.get(expr.kind()) {
            Some(f) => f(expr, self, session, frame),
            None => {
                tracing::debug!(kind = expr.kind(), "no evaluator registered");
                None
            }
        }
    }
}

/// One registered expression evaluation: target, expression and the
/// dependency/epoch state that drives re-runs.
pub struct Evaluation {
    expr: Option<EntityExpression>,
    target: EvalTarget,
    initial: Value,
    coerce: Coercion,
    deps: Option<DepRecord>,
    token: Arc<EvalToken>,
    uuid: Option<Value>,
}

impl Evaluation {
    pub fn new(
        expr: Option<EntityExpression>,
        target: EvalTarget,
        initial: Value,
        coerce: Coercion,
    ) -> Self {
        Self {
            expr,
            target,
            initial,
            coerce,
            deps: None,
            token: EvalToken::new(),
            uuid: None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.expr.is_some()
    }

    /// Force a re-run on the next pass (used when non-cell inputs,
    /// e.g. injected variables, changed).
    pub fn invalidate(&mut self) {
        self.deps = None;
    }

    /// Invalidate in-flight async work; called when the owning node
    /// is torn down.
    pub fn release(&self) {
        self.token.alive.set(false);
    }

    /// Run (or skip) this evaluation. With no expression the target
    /// is assigned the initial value once and the evaluation reports
    /// "not dynamic". Returns whether the evaluation is dynamic.
    pub fn run(&mut self, table: &EvalTable, session: &mut EvalSession<'_>) -> bool {
        let Some(expr) = self.expr.clone() else {
            if self.deps.is_none() {
                self.deps = Some(DepRecord::default());
                let value = self.coerce.apply(self.initial.clone());
                apply_outcome(session.reactor, session.graph, &self.target, value);
            }
            return false;
        };

        if let Some(deps) = &self.deps {
            if !session.reactor.deps_changed(deps) {
                return true;
            }
        }

        // Supersede any in-flight async work from the previous run.
        let epoch = self.token.epoch.get() + 1;
        self.token.epoch.set(epoch);

        let mut frame = EvalFrame {
            sink: SinkSpec {
                target: self.target.clone(),
                coerce: self.coerce,
                negate: false,
                token: self.token.clone(),
                epoch,
            },
            uuid: &mut self.uuid,
        };

        session.reactor.push_tracking();
        let outcome = table.dispatch(&expr, session, &mut frame);
        let reads = session.reactor.pop_tracking();
        self.deps = Some(session.reactor.record_deps(&reads));

        if let Some(value) = outcome {
            let value = self.coerce.apply(value);
            apply_outcome(session.reactor, session.graph, &self.target, value);
        }
        true
    }
}

/// Write a result into its target.
pub fn apply_outcome(reactor: &mut Reactor, graph: &mut DataGraph, target: &EvalTarget, value: Value) {
    match target {
        EvalTarget::Cell(cell) => {
            reactor.set(*cell, value);
        }
        EvalTarget::ErrorSlot(data, slot) => {
            let message = if value.truthy() {
                Some(match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                })
            } else {
                None
            };
            graph.set_error(reactor, *data, slot, message);
        }
    }
}

// --- built-in evaluator functions ---

/// Resolve a field reference: injected variables shadow data fields.
fn field_value(session: &mut EvalSession<'_>, field: &str) -> Value {
    if let Some(value) = session.variables.get(field) {
        return value.clone();
    }
    match field_node(session, field) {
        Some(node) => node.value_tracked(session.graph, session.reactor),
        None => Value::Undefined,
    }
}

fn field_node(session: &mut EvalSession<'_>, field: &str) -> Option<SchemaDataNode> {
    let context = session.context?;
    resolve_data_path(context, session.graph, session.reactor, field)
}

fn eval_data(
    expr: &EntityExpression,
    _table: &EvalTable,
    session: &mut EvalSession<'_>,
    _frame: &mut EvalFrame<'_>,
) -> Option<Value> {
    let EntityExpression::Data { field } = expr else {
        return None;
    };
    Some(field_value(session, field))
}

fn eval_data_match(
    expr: &EntityExpression,
    _table: &EvalTable,
    session: &mut EvalSession<'_>,
    _frame: &mut EvalFrame<'_>,
) -> Option<Value> {
    let EntityExpression::DataMatch { field, value } = expr else {
        return None;
    };
    if let Some(var) = session.variables.get(field) {
        let var = var.clone();
        let schema = session.context?.schema().field().clone();
        return Some(Value::Bool(session.interface.value_eq(&schema, &var, value)));
    }
    let node = field_node(session, field)?;
    let current = node.value_tracked(session.graph, session.reactor);
    Some(Value::Bool(session.interface.value_selected(
        node.schema().field(),
        &current,
        value,
    )))
}

fn eval_not_empty(
    expr: &EntityExpression,
    _table: &EvalTable,
    session: &mut EvalSession<'_>,
    _frame: &mut EvalFrame<'_>,
) -> Option<Value> {
    let EntityExpression::NotEmpty { field, empty } = expr else {
        return None;
    };
    let node = field_node(session, field)?;
    let current = node.value_tracked(session.graph, session.reactor);
    let is_empty = session.interface.is_empty(node.schema().field(), &current);
    Some(Value::Bool(is_empty == *empty))
}

fn eval_uuid(
    expr: &EntityExpression,
    _table: &EvalTable,
    _session: &mut EvalSession<'_>,
    frame: &mut EvalFrame<'_>,
) -> Option<Value> {
    let EntityExpression::Uuid = expr else {
        return None;
    };
    if frame.uuid.is_none() {
        *frame.uuid = Some(Value::string(ulid::Ulid::new().to_string()));
    }
    frame.uuid.clone()
}

fn eval_not(
    expr: &EntityExpression,
    table: &EvalTable,
    session: &mut EvalSession<'_>,
    frame: &mut EvalFrame<'_>,
) -> Option<Value> {
    let EntityExpression::Not { expr: inner } = expr else {
        return None;
    };
    // Async inner expressions deliver through the sink, so the sink
    // carries the negation; sync results are negated right here.
    frame.sink.negate = !frame.sink.negate;
    let result = table.dispatch(inner, session, frame);
    frame.sink.negate = !frame.sink.negate;
    result.map(|v| Value::Bool(!v.truthy()))
}

fn eval_jsonata(
    expr: &EntityExpression,
    _table: &EvalTable,
    session: &mut EvalSession<'_>,
    frame: &mut EvalFrame<'_>,
) -> Option<Value> {
    let EntityExpression::Jsonata {
        expression,
        variables,
    } = expr
    else {
        return None;
    };
    // The whole data root is the expression's world; reading it
    // tracked makes any data change re-dispatch.
    let data = session.root.value_tracked(session.graph, session.reactor);
    let mut merged: FxHashMap<String, Value> = session.variables.clone();
    for (name, value) in variables {
        merged.insert(name.clone(), value.clone());
    }
    let request = QueryRequest {
        expression: expression.clone(),
        data,
        path: session
            .context
            .map(|c| c.path_segments())
            .unwrap_or_default(),
        variables: merged,
    };
    let sink = frame.sink.sink(session.async_tx);
    let query = session.query.clone();
    (session.run_async)(Box::new(move || {
        if catch_unwind(AssertUnwindSafe(|| query.evaluate(request, sink))).is_err() {
            tracing::warn!("query evaluator panicked; treating as no result");
        }
    }));
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::DefaultSchemaInterface;
    use crate::schema_node::SchemaTree;
    use formwork_model::schema::{FieldType, SchemaField};

    struct Fixture {
        reactor: Reactor,
        graph: DataGraph,
        root: SchemaDataNode,
        query: Arc<dyn QueryEvaluator>,
        run_async: AsyncRunner,
        tx: UnboundedSender<AsyncOutcome>,
        rx: UnboundedReceiver<AsyncOutcome>,
        variables: FxHashMap<String, Value>,
    }

    fn fixture(data: serde_json::Value) -> Fixture {
        let tree = SchemaTree::new(SchemaField::compound(
            "",
            vec![
                SchemaField::scalar("name", FieldType::String),
                SchemaField::scalar("tags", FieldType::String).with_collection(),
            ],
        ));
        let mut reactor = Reactor::new();
        let graph = DataGraph::new(&mut reactor, data.into());
        let root = SchemaDataNode::root(tree.root_node(), &graph);
        let (tx, rx) = outcome_channel();
        Fixture {
            reactor,
            graph,
            root,
            query: Arc::new(NoopQueryEvaluator),
            run_async: immediate_runner(),
            tx,
            rx,
            variables: FxHashMap::default(),
        }
    }

    fn run(fixture: &mut Fixture, evaluation: &mut Evaluation) {
        let table = EvalTable::standard();
        let root = fixture.root.clone();
        let mut session = EvalSession {
            reactor: &mut fixture.reactor,
            graph: &mut fixture.graph,
            interface: &DefaultSchemaInterface,
            root: &root,
            context: Some(&root),
            variables: &fixture.variables,
            query: &fixture.query,
            run_async: &fixture.run_async,
            async_tx: &fixture.tx,
        };
        evaluation.run(&table, &mut session);
    }

    #[test]
    fn no_expression_assigns_initial_and_reports_static() {
        let mut fixture = fixture(serde_json::json!({}));
        let scope = fixture.reactor.root_scope();
        let cell = fixture.reactor.alloc_cell(scope, Value::Undefined);
        let mut evaluation = Evaluation::new(
            None,
            EvalTarget::Cell(cell),
            Value::string("static"),
            Coercion::Raw,
        );
        assert!(!evaluation.is_dynamic());
        run(&mut fixture, &mut evaluation);
        assert_eq!(fixture.reactor.peek(cell), Value::string("static"));
    }

    #[test]
    fn data_expression_tracks_and_rereads() {
        let mut fixture = fixture(serde_json::json!({ "name": "a" }));
        let scope = fixture.reactor.root_scope();
        let cell = fixture.reactor.alloc_cell(scope, Value::Undefined);
        let mut evaluation = Evaluation::new(
            Some(EntityExpression::data("name")),
            EvalTarget::Cell(cell),
            Value::Undefined,
            Coercion::Raw,
        );
        run(&mut fixture, &mut evaluation);
        assert_eq!(fixture.reactor.peek(cell), Value::string("a"));

        // Unchanged deps: run is a no-op.
        run(&mut fixture, &mut evaluation);
        assert_eq!(fixture.reactor.peek(cell), Value::string("a"));

        // Change the field, re-run picks it up.
        let root_id = fixture.graph.root();
        let name = fixture.graph.child_field(&mut fixture.reactor, root_id, "name");
        fixture
            .graph
            .set_value(&mut fixture.reactor, name, Value::string("b"));
        run(&mut fixture, &mut evaluation);
        assert_eq!(fixture.reactor.peek(cell), Value::string("b"));
    }

    #[test]
    fn data_match_uses_membership_for_collections() {
        let mut fixture = fixture(serde_json::json!({ "tags": ["x", "y"] }));
        let scope = fixture.reactor.root_scope();
        let cell = fixture.reactor.alloc_cell(scope, Value::Undefined);
        let mut evaluation = Evaluation::new(
            Some(EntityExpression::data_match("tags", "x")),
            EvalTarget::Cell(cell),
            Value::Undefined,
            Coercion::Bool,
        );
        run(&mut fixture, &mut evaluation);
        assert_eq!(fixture.reactor.peek(cell), Value::Bool(true));
    }

    #[test]
    fn not_negates_sync_results() {
        let mut fixture = fixture(serde_json::json!({ "name": "a" }));
        let scope = fixture.reactor.root_scope();
        let cell = fixture.reactor.alloc_cell(scope, Value::Undefined);
        let mut evaluation = Evaluation::new(
            Some(EntityExpression::not(EntityExpression::data_match(
                "name", "a",
            ))),
            EvalTarget::Cell(cell),
            Value::Undefined,
            Coercion::Bool,
        );
        run(&mut fixture, &mut evaluation);
        assert_eq!(fixture.reactor.peek(cell), Value::Bool(false));
    }

    #[test]
    fn uuid_is_stable_across_reruns() {
        let mut fixture = fixture(serde_json::json!({}));
        let scope = fixture.reactor.root_scope();
        let cell = fixture.reactor.alloc_cell(scope, Value::Undefined);
        let mut evaluation = Evaluation::new(
            Some(EntityExpression::Uuid),
            EvalTarget::Cell(cell),
            Value::Undefined,
            Coercion::Raw,
        );
        run(&mut fixture, &mut evaluation);
        let first = fixture.reactor.peek(cell);
        assert!(first.as_str().is_some());

        evaluation.invalidate();
        run(&mut fixture, &mut evaluation);
        assert_eq!(fixture.reactor.peek(cell), first);
    }

    #[test]
    fn stale_async_results_are_discarded() {
        struct Recorder(std::rc::Rc<std::cell::RefCell<Vec<ResultSink>>>);
        impl QueryEvaluator for Recorder {
            fn evaluate(&self, _request: QueryRequest, respond: ResultSink) {
                self.0.borrow_mut().push(respond);
            }
        }

        let mut fixture = fixture(serde_json::json!({ "name": "a" }));
        let sinks = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        fixture.query = Arc::new(Recorder(sinks.clone()));

        let scope = fixture.reactor.root_scope();
        let cell = fixture.reactor.alloc_cell(scope, Value::Undefined);
        let mut evaluation = Evaluation::new(
            Some(EntityExpression::jsonata("name")),
            EvalTarget::Cell(cell),
            Value::Undefined,
            Coercion::Raw,
        );
        run(&mut fixture, &mut evaluation);
        evaluation.invalidate();
        run(&mut fixture, &mut evaluation);
        assert_eq!(sinks.borrow().len(), 2);

        // First dispatch's sink is superseded; second one wins.
        sinks.borrow()[0].send(Value::string("stale"));
        sinks.borrow()[1].send(Value::string("fresh"));
        let mut delivered = Vec::new();
        while let Ok(Some(outcome)) = fixture.rx.try_next() {
            delivered.push(outcome.value);
        }
        assert_eq!(delivered, vec![Value::string("fresh")]);
    }

    #[test]
    fn released_evaluation_drops_results() {
        struct Holder(std::rc::Rc<std::cell::RefCell<Option<ResultSink>>>);
        impl QueryEvaluator for Holder {
            fn evaluate(&self, _request: QueryRequest, respond: ResultSink) {
                *self.0.borrow_mut() = Some(respond);
            }
        }

        let mut fixture = fixture(serde_json::json!({}));
        let held = std::rc::Rc::new(std::cell::RefCell::new(None));
        fixture.query = Arc::new(Holder(held.clone()));

        let scope = fixture.reactor.root_scope();
        let cell = fixture.reactor.alloc_cell(scope, Value::Undefined);
        let mut evaluation = Evaluation::new(
            Some(EntityExpression::jsonata("x")),
            EvalTarget::Cell(cell),
            Value::Undefined,
            Coercion::Raw,
        );
        run(&mut fixture, &mut evaluation);
        evaluation.release();

        held.borrow().as_ref().unwrap().send(Value::string("late"));
        assert!(matches!(fixture.rx.try_next(), Err(_)), "nothing delivered");
    }
}
