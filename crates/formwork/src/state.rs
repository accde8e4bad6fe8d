//! Form state: the live, incrementally-updated node tree.
//!
//! One state node per (form node × data context × element/option
//! key). Every stabilization pass re-derives, in order: the evaluated
//! definition (scripted overrides), the bound data node, visibility /
//! readonly / disabled, side effects on the data graph (mirroring,
//! clear-on-hide, default values), validation, and the child list —
//! children diffed by stable key so unrelated sibling state survives
//! data mutations. Passes repeat until no cell changes; equality-
//! short-circuited writes are what make the write-during-read
//! feedback (defaults, clearing, length repair) converge.
//!
//! Children are resolved only while a node is visible, which is what
//! lets self-referential definitions (`child_ref_id`, `tree_children`
//! schemas) terminate: expansion is driven by finite data, not by the
//! infinite definition graph.

use crate::children::{resolve_child_specs, ChildKey, ChildResolveArgs, ChildSpec};
use crate::data_node::{resolve_data_path, SchemaDataNode};
use crate::evals::{
    immediate_runner, outcome_channel, apply_outcome, AsyncOutcome, AsyncRunner, EvalSession,
    EvalTable, EvalTarget, Evaluation, NoopQueryEvaluator, QueryEvaluator,
};
use crate::form_tree::{ControlNode, FormNode, FormTree};
use crate::interface::{DefaultSchemaInterface, SchemaInterface};
use crate::overrides::{resolved_field_options, ResolvedDefinition};
use crate::schema_node::SchemaTree;
use crate::scripts::{coercion_for_path, effective_scripts, null_initializes};
use crate::validation::{run_sync_validation, DEFAULT_SLOT, JSONATA_SLOT};
use formwork_model::control::{ControlKind, RenderType, Validator};
use formwork_model::schema::FieldOption;
use formwork_model::{EntityExpression, Value};
use formwork_reactive::{CellId, DataGraph, DataId, Reactor, ScopeId};
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Handle for one form-state node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// Imperative affordances a presentation layer can hang on a node.
pub trait UiAttachment {
    fn ensure_visible(&mut self) {}
}

/// Engine-wide policy and collaborators.
pub struct FormOptions {
    /// Clear a data control's value when it becomes hidden (unless
    /// the control opts out).
    pub clear_hidden: bool,
    pub interface: Arc<dyn SchemaInterface>,
    pub query: Arc<dyn QueryEvaluator>,
    pub run_async: AsyncRunner,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            clear_hidden: false,
            interface: Arc::new(DefaultSchemaInterface),
            query: Arc::new(NoopQueryEvaluator),
            run_async: immediate_runner(),
        }
    }
}

/// State inherited from the ancestor chain during a pass.
#[derive(Debug, Clone, Copy)]
struct Inherited {
    visible: bool,
    readonly: bool,
    disabled: bool,
    display_only: bool,
    depth: usize,
}

impl Default for Inherited {
    fn default() -> Self {
        Self {
            visible: true,
            readonly: false,
            disabled: false,
            display_only: false,
            depth: 0,
        }
    }
}

struct StateNode {
    form: FormNode,
    parent: Option<NodeId>,
    scope: ScopeId,
    /// Data context this node's field references resolve against.
    context: SchemaDataNode,
    /// The node's own bound data, when the definition binds one.
    data: Option<SchemaDataNode>,
    variables: FxHashMap<String, Value>,
    /// Scripted definition overrides, parallel arrays.
    evaluations: Vec<Evaluation>,
    override_paths: Vec<String>,
    override_cells: Vec<CellId>,
    /// Expression validators, bound to the current data identity.
    validator_evals: Vec<Evaluation>,
    visible_cell: CellId,
    readonly_cell: CellId,
    disabled_cell: CellId,
    prev_visible: Option<bool>,
    /// Last values this node mirrored onto its data cell. Mirrors are
    /// only re-written when the node's own derivation changes, so two
    /// nodes sharing one data cell settle on last-write-wins instead
    /// of toggling forever.
    last_disabled: Option<bool>,
    last_error: Option<Option<String>>,
    touched: bool,
    /// Host-driven "work in flight" marker (e.g. an upload); carried
    /// on the node, not derived.
    busy: bool,
    force_hidden: bool,
    force_readonly: bool,
    force_disabled: bool,
    disable_locks: FxHashMap<String, u32>,
    /// Lazily resolved; `None` until first visible pass.
    children: Option<Vec<NodeId>>,
    child_lookup: FxHashMap<ChildKey, NodeId>,
    /// Cached synthetic wrapper (element/option fan-out).
    synthetic: Option<ControlNode>,
    /// Context identity the child cache was built against.
    children_context: Option<DataId>,
    meta: FxHashMap<String, Value>,
    ui: Option<Box<dyn UiAttachment>>,
}

const MAX_PASSES: usize = 64;
const MAX_DEPTH: usize = 128;

/// The live form: reactor, data graph and the state-node tree.
pub struct FormState {
    reactor: Reactor,
    graph: DataGraph,
    root_data: SchemaDataNode,
    options: FormOptions,
    table: EvalTable,
    nodes: Vec<Option<StateNode>>,
    free: Vec<u32>,
    root: NodeId,
    async_tx: UnboundedSender<AsyncOutcome>,
    async_rx: UnboundedReceiver<AsyncOutcome>,
}

impl FormState {
    /// Build the tree and run it to quiescence.
    pub fn new(schema: SchemaTree, form: FormTree, data: Value, options: FormOptions) -> Self {
        let mut reactor = Reactor::new();
        let graph = DataGraph::new(&mut reactor, data);
        let root_data = SchemaDataNode::root(schema.root_node(), &graph);
        let (async_tx, async_rx) = outcome_channel();
        let mut state = Self {
            reactor,
            graph,
            root_data: root_data.clone(),
            options,
            table: EvalTable::standard(),
            nodes: Vec::new(),
            free: Vec::new(),
            root: NodeId(0),
            async_tx,
            async_rx,
        };
        let root_scope = state.reactor.root_scope();
        state.root = state.create_node(form.root_node(), None, root_scope, root_data, FxHashMap::default());
        state.stabilize();
        state
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// Register a custom expression evaluator kind.
    pub fn register_evaluator(&mut self, kind: &'static str, f: crate::evals::EvalFn) {
        self.table.register(kind, f);
    }

    // --- node construction / teardown ---

    fn create_node(
        &mut self,
        form: FormNode,
        parent: Option<NodeId>,
        parent_scope: ScopeId,
        context: SchemaDataNode,
        variables: FxHashMap<String, Value>,
    ) -> NodeId {
        let scope = self.reactor.create_scope(parent_scope);
        let definition = form.definition().clone();

        let mut evaluations = Vec::new();
        let mut override_paths = Vec::new();
        let mut override_cells = Vec::new();
        for (path, expr) in effective_scripts(&definition) {
            let initial = if null_initializes(&path) {
                match definition.hidden {
                    Some(b) => Value::Bool(b),
                    None => Value::Null,
                }
            } else {
                Value::Undefined
            };
            let cell = self.reactor.alloc_cell(scope, initial.clone());
            evaluations.push(Evaluation::new(
                Some(expr),
                EvalTarget::Cell(cell),
                initial,
                coercion_for_path(&path),
            ));
            override_paths.push(path);
            override_cells.push(cell);
        }

        let visible_cell = self.reactor.alloc_cell(scope, Value::Null);
        let readonly_cell = self.reactor.alloc_cell(scope, Value::Bool(false));
        let disabled_cell = self.reactor.alloc_cell(scope, Value::Bool(false));

        let node = StateNode {
            form,
            parent,
            scope,
            context,
            data: None,
            variables,
            evaluations,
            override_paths,
            override_cells,
            validator_evals: Vec::new(),
            visible_cell,
            readonly_cell,
            disabled_cell,
            prev_visible: None,
            last_disabled: None,
            last_error: None,
            touched: false,
            busy: false,
            force_hidden: false,
            force_readonly: false,
            force_disabled: false,
            disable_locks: FxHashMap::default(),
            children: None,
            child_lookup: FxHashMap::default(),
            synthetic: None,
            children_context: None,
            meta: FxHashMap::default(),
            ui: None,
        };

        let id = if let Some(index) = self.free.pop() {
            self.nodes[index as usize] = Some(node);
            NodeId(index)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() as u32 - 1)
        };
        id
    }

    /// Tear a node down: children first, then every registered
    /// evaluation, then the scope (which releases the cells).
    fn remove_node(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        for child in node.child_lookup.values() {
            self.remove_node(*child);
        }
        for evaluation in node.evaluations.iter().chain(&node.validator_evals) {
            evaluation.release();
        }
        // A torn-down node withdraws its error slots so siblings bound
        // to the same data are not left reporting its messages.
        if let Some(data) = &node.data {
            if self.graph.is_alive(data.data_id()) {
                self.graph
                    .set_error(&mut self.reactor, data.data_id(), DEFAULT_SLOT, None);
                self.graph
                    .set_error(&mut self.reactor, data.data_id(), JSONATA_SLOT, None);
            }
        }
        self.reactor.dispose_scope(node.scope);
        self.free.push(id.0);
    }

    fn node(&self, id: NodeId) -> Option<&StateNode> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut StateNode> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    // --- stabilization ---

    /// Run passes until quiescent. Also the pump for asynchronous
    /// evaluation results delivered while idle.
    pub fn stabilize(&mut self) {
        for _ in 0..MAX_PASSES {
            self.reactor.begin_pass();
            let drained = self.drain_async();
            self.update_node(self.root, Inherited::default());
            if self.reactor.writes_this_pass() == 0 && drained == 0 {
                return;
            }
        }
        tracing::warn!("form state did not stabilize within {MAX_PASSES} passes");
    }

    fn drain_async(&mut self) -> usize {
        let mut count = 0;
        while let Ok(Some(outcome)) = self.async_rx.try_next() {
            apply_outcome(&mut self.reactor, &mut self.graph, &outcome.target, outcome.value);
            count += 1;
        }
        count
    }

    fn update_node(&mut self, id: NodeId, inherited: Inherited) {
        let Some(node) = self.node(id) else { return };
        let form = node.form.clone();
        let context = node.context.clone();
        let variables = node.variables.clone();
        let force_hidden = node.force_hidden;
        let force_readonly = node.force_readonly;
        let force_disabled = node.force_disabled;
        let has_locks = !node.disable_locks.is_empty();
        let old_data_id = node.data.as_ref().map(|d| d.data_id());
        let override_paths = node.override_paths.clone();
        let override_cells = node.override_cells.clone();
        let definition = form.definition().clone();

        // 1. Scripted definition overrides.
        let mut evaluations = self
            .node_mut(id)
            .map(|n| std::mem::take(&mut n.evaluations))
            .unwrap_or_default();
        self.run_evaluations(&mut evaluations, &context, &variables);
        if let Some(node) = self.node_mut(id) {
            node.evaluations = evaluations;
        }

        // 2. The resolved (override-applied) definition. An override
        //    cell still holding `Undefined` was never assigned; that
        //    is the "no override" sentinel and falls through to the
        //    static definition.
        let mut overrides = FxHashMap::default();
        for (path, cell) in override_paths.iter().zip(&override_cells) {
            let value = self.reactor.peek(*cell);
            if !value.is_undefined() {
                overrides.insert(path.clone(), value);
            }
        }
        let resolved = ResolvedDefinition::with_overrides(definition.clone(), overrides);

        // 3. The bound data node.
        let data = match resolved.data_scope_field() {
            Some(field) if self.graph.is_alive(context.data_id()) => {
                let FormState { reactor, graph, .. } = self;
                resolve_data_path(&context, graph, reactor, field)
                    .filter(|d| graph.is_alive(d.data_id()))
            }
            _ => None,
        };
        let data_id = data.as_ref().map(|d| d.data_id());
        if let Some(node) = self.node_mut(id) {
            node.data = data.clone();
        }

        // Rebind expression validators when the data identity moves.
        if data_id != old_data_id {
            self.rebind_validators(id, &definition, data_id);
        }

        // 4. Visibility (tri-state hidden, ancestors, data validity).
        let is_data_control = definition.is_data();
        let data_missing = is_data_control && data.is_none();
        let suppressed =
            inherited.display_only && matches!(definition.kind, ControlKind::Action { .. });
        let visible = !force_hidden
            && inherited.visible
            && !data_missing
            && !suppressed
            && resolved.hidden() != Some(true);

        // 5. Readonly / disabled: ancestor OR forced OR own.
        let readonly = inherited.readonly || force_readonly || resolved.readonly();
        let disabled = inherited.disabled || force_disabled || has_locks || resolved.disabled();

        let (visible_cell, readonly_cell, disabled_cell, prev_visible) = match self.node(id) {
            Some(n) => (n.visible_cell, n.readonly_cell, n.disabled_cell, n.prev_visible),
            None => return,
        };
        self.reactor.set(visible_cell, Value::Bool(visible));
        self.reactor.set(readonly_cell, Value::Bool(readonly));
        self.reactor.set(disabled_cell, Value::Bool(disabled));

        // 6. Side effects on the bound data node.
        if let (true, Some(data)) = (is_data_control, &data) {
            let data_id = data.data_id();

            // Mirror disabled onto the data cell.
            if self.node(id).map(|n| n.last_disabled) != Some(Some(disabled)) {
                self.graph.set_disabled(&mut self.reactor, data_id, disabled);
                if let Some(node) = self.node_mut(id) {
                    node.last_disabled = Some(disabled);
                }
            }

            // Touched mirrors both ways.
            let node_touched = self.node(id).map(|n| n.touched).unwrap_or(false);
            let data_touched = self.graph.touched(&self.reactor, data_id);
            if data_touched && !node_touched {
                if let Some(node) = self.node_mut(id) {
                    node.touched = true;
                }
            } else if node_touched && !data_touched {
                self.graph.set_touched(&mut self.reactor, data_id, true);
            }

            // Clear-on-hide, policy-gated with per-control opt-out.
            if prev_visible == Some(true)
                && !visible
                && self.options.clear_hidden
                && !resolved.dont_clear_hidden()
            {
                let FormState { reactor, graph, .. } = self;
                data.set_value(graph, reactor, Value::Undefined);
            }

            // Default value: visible, still unset, not opted out.
            if visible && !resolved.optional() && resolved.render() != RenderType::NullToggle {
                let default = resolved
                    .default_value()
                    .or_else(|| data.schema().field().default_value.clone());
                if let Some(default) = default {
                    let current = data.value(&self.graph, &self.reactor);
                    if current.is_undefined() {
                        let FormState { reactor, graph, .. } = self;
                        data.set_value(graph, reactor, default);
                    }
                }
            }
        }
        if let Some(node) = self.node_mut(id) {
            node.prev_visible = Some(visible);
        }

        // 7. Validation, gated on visibility.
        if let (true, Some(data)) = (is_data_control, &data) {
            let data_id = data.data_id();
            if visible {
                let error = {
                    let FormState {
                        reactor,
                        graph,
                        options,
                        ..
                    } = self;
                    run_sync_validation(options.interface.as_ref(), &resolved, data, graph, reactor)
                };
                if self.node(id).map(|n| n.last_error.clone()) != Some(Some(error.clone())) {
                    self.graph
                        .set_error(&mut self.reactor, data_id, DEFAULT_SLOT, error.clone());
                    if let Some(node) = self.node_mut(id) {
                        node.last_error = Some(error);
                    }
                }

                let mut validator_evals = self
                    .node_mut(id)
                    .map(|n| std::mem::take(&mut n.validator_evals))
                    .unwrap_or_default();
                // Validation was parked while hidden; a reveal must
                // recompute even if no dependency moved meanwhile.
                if prev_visible == Some(false) {
                    for evaluation in &mut validator_evals {
                        evaluation.invalidate();
                    }
                }
                self.run_evaluations(&mut validator_evals, &context, &variables);
                if let Some(node) = self.node_mut(id) {
                    node.validator_evals = validator_evals;
                }
            } else if self.node(id).map(|n| n.last_error.clone()) != Some(Some(None)) {
                self.graph
                    .set_error(&mut self.reactor, data_id, DEFAULT_SLOT, None);
                self.graph
                    .set_error(&mut self.reactor, data_id, JSONATA_SLOT, None);
                if let Some(node) = self.node_mut(id) {
                    node.last_error = Some(None);
                }
            }
        }

        // 8. Children: resolve while visible, keep (but do not grow)
        //    while hidden. Recursive definitions normally terminate on
        //    finite data; the depth cap is the backstop for ones that
        //    stay visible without data.
        if visible {
            if inherited.depth < MAX_DEPTH {
                self.reconcile_children(id, &form, &resolved, &context, data.as_ref());
            } else {
                tracing::warn!(
                    node = form.id(),
                    "recursion depth cap reached; not expanding children"
                );
            }
        }

        let children = self
            .node(id)
            .and_then(|n| n.children.clone())
            .unwrap_or_default();
        let child_inherited = Inherited {
            visible,
            readonly,
            disabled,
            display_only: inherited.display_only || is_display_only(&definition.kind),
            depth: inherited.depth + 1,
        };
        for child in children {
            self.update_node(child, child_inherited);
        }
    }

    fn run_evaluations(
        &mut self,
        evaluations: &mut [Evaluation],
        context: &SchemaDataNode,
        variables: &FxHashMap<String, Value>,
    ) {
        let root_data = self.root_data.clone();
        let FormState {
            reactor,
            graph,
            options,
            table,
            async_tx,
            ..
        } = self;
        let mut session = EvalSession {
            reactor,
            graph,
            interface: options.interface.as_ref(),
            root: &root_data,
            context: Some(context),
            variables,
            query: &options.query,
            run_async: &options.run_async,
            async_tx,
        };
        for evaluation in evaluations {
            evaluation.run(table, &mut session);
        }
    }

    fn rebind_validators(
        &mut self,
        id: NodeId,
        definition: &formwork_model::ControlDefinition,
        data_id: Option<DataId>,
    ) {
        let Some(node) = self.node_mut(id) else { return };
        for evaluation in &node.validator_evals {
            evaluation.release();
        }
        node.validator_evals.clear();
        let Some(data_id) = data_id else { return };
        if let ControlKind::Data { validators, .. } = &definition.kind {
            for validator in validators {
                if let Validator::Jsonata { expression } = validator {
                    node.validator_evals.push(Evaluation::new(
                        Some(EntityExpression::jsonata(expression.clone())),
                        EvalTarget::ErrorSlot(data_id, JSONATA_SLOT),
                        Value::Undefined,
                        crate::scripts::Coercion::Raw,
                    ));
                }
            }
        }
    }

    fn reconcile_children(
        &mut self,
        id: NodeId,
        form: &FormNode,
        resolved: &ResolvedDefinition,
        context: &SchemaDataNode,
        data: Option<&SchemaDataNode>,
    ) {
        // A wholesale context identity change invalidates the cache:
        // cached children would keep stale parent bindings.
        let context_identity = data.map(|d| d.data_id()).unwrap_or(context.data_id());
        let stale = self
            .node(id)
            .map(|n| {
                n.children_context
                    .map(|c| c != context_identity)
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        if stale {
            let old: Vec<NodeId> = self
                .node_mut(id)
                .map(|n| {
                    n.children = Some(Vec::new());
                    n.synthetic = None;
                    n.child_lookup.drain().map(|(_, v)| v).collect()
                })
                .unwrap_or_default();
            for child in old {
                self.remove_node(child);
            }
        }

        let mut synthetic = self
            .node_mut(id)
            .map(|n| std::mem::take(&mut n.synthetic))
            .unwrap_or_default();
        let specs = {
            let FormState {
                reactor,
                graph,
                options,
                ..
            } = self;
            resolve_child_specs(ChildResolveArgs {
                form,
                resolved,
                parent_context: context,
                data,
                interface: options.interface.as_ref(),
                graph,
                reactor,
                synthetic: &mut synthetic,
            })
        };
        if let Some(node) = self.node_mut(id) {
            node.synthetic = synthetic;
            node.children_context = Some(context_identity);
        }

        let parent_scope = match self.node(id) {
            Some(n) => n.scope,
            None => return,
        };
        let parent_variables = self
            .node(id)
            .map(|n| n.variables.clone())
            .unwrap_or_default();

        let mut ordered = Vec::with_capacity(specs.len());
        let mut seen: FxHashSet<ChildKey> = FxHashSet::default();
        for spec in specs {
            let ChildSpec {
                key,
                form,
                context,
                variables,
            } = spec;
            seen.insert(key);
            let merged = merge_variables(&parent_variables, variables);
            let existing = self.node(id).and_then(|n| n.child_lookup.get(&key).copied());
            let child_id = match existing {
                Some(child_id) => {
                    self.refresh_child(child_id, context, merged);
                    child_id
                }
                None => {
                    let child_id = self.create_node(form, Some(id), parent_scope, context, merged);
                    if let Some(node) = self.node_mut(id) {
                        node.child_lookup.insert(key, child_id);
                    }
                    child_id
                }
            };
            ordered.push(child_id);
        }

        // Detach children whose keys vanished.
        let removed: Vec<NodeId> = self
            .node_mut(id)
            .map(|n| {
                let gone: Vec<ChildKey> = n
                    .child_lookup
                    .keys()
                    .filter(|k| !seen.contains(k))
                    .copied()
                    .collect();
                gone.iter()
                    .filter_map(|k| n.child_lookup.remove(k))
                    .collect()
            })
            .unwrap_or_default();
        for child in removed {
            self.remove_node(child);
        }

        if let Some(node) = self.node_mut(id) {
            node.children = Some(ordered);
        }
    }

    /// Re-point a reused child at (possibly) new context/variables;
    /// changed inputs force its evaluations to re-run.
    fn refresh_child(
        &mut self,
        id: NodeId,
        context: SchemaDataNode,
        variables: FxHashMap<String, Value>,
    ) {
        let Some(node) = self.node_mut(id) else { return };
        let context_changed = node.context.data_id() != context.data_id();
        let variables_changed = node.variables != variables;
        if context_changed {
            node.context = context;
        }
        if variables_changed {
            node.variables = variables;
        }
        if context_changed || variables_changed {
            for evaluation in node.evaluations.iter_mut().chain(&mut node.validator_evals) {
                evaluation.invalidate();
            }
        }
    }

    // --- public query API ---

    pub fn definition(&self, id: NodeId) -> Option<Arc<formwork_model::ControlDefinition>> {
        self.node(id).map(|n| n.form.definition().clone())
    }

    /// The current evaluated definition view.
    pub fn resolved_definition(&self, id: NodeId) -> Option<ResolvedDefinition> {
        let node = self.node(id)?;
        let mut overrides = FxHashMap::default();
        for (path, cell) in node.override_paths.iter().zip(&node.override_cells) {
            let value = self.reactor.peek(*cell);
            if !value.is_undefined() {
                overrides.insert(path.clone(), value);
            }
        }
        Some(ResolvedDefinition::with_overrides(
            node.form.definition().clone(),
            overrides,
        ))
    }

    pub fn data_node(&self, id: NodeId) -> Option<SchemaDataNode> {
        self.node(id).and_then(|n| n.data.clone())
    }

    pub fn visible(&self, id: NodeId) -> bool {
        self.node(id)
            .map(|n| self.reactor.peek(n.visible_cell).truthy())
            .unwrap_or(false)
    }

    pub fn readonly(&self, id: NodeId) -> bool {
        self.node(id)
            .map(|n| self.reactor.peek(n.readonly_cell).truthy())
            .unwrap_or(false)
    }

    pub fn disabled(&self, id: NodeId) -> bool {
        self.node(id)
            .map(|n| self.reactor.peek(n.disabled_cell).truthy())
            .unwrap_or(false)
    }

    pub fn touched(&self, id: NodeId) -> bool {
        self.node(id).map(|n| n.touched).unwrap_or(false)
    }

    pub fn busy(&self, id: NodeId) -> bool {
        self.node(id).map(|n| n.busy).unwrap_or(false)
    }

    pub fn set_busy(&mut self, id: NodeId, busy: bool) {
        if let Some(node) = self.node_mut(id) {
            node.busy = busy;
        }
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .and_then(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn title(&self, id: NodeId) -> Option<String> {
        self.resolved_definition(id).and_then(|r| r.title())
    }

    pub fn errors(&self, id: NodeId) -> Vec<(String, String)> {
        self.node(id)
            .and_then(|n| n.data.as_ref())
            .map(|d| self.graph.errors(&self.reactor, d.data_id()))
            .unwrap_or_default()
    }

    /// The option set the node exposes, allowed-options filter applied.
    pub fn field_options(&self, id: NodeId) -> Vec<FieldOption> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let Some(data) = &node.data else {
            return Vec::new();
        };
        let Some(resolved) = self.resolved_definition(id) else {
            return Vec::new();
        };
        resolved_field_options(data.schema().field(), &resolved)
    }

    /// Validity of this node and everything under it.
    pub fn valid(&self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return true;
        };
        let own = match &node.data {
            Some(data) => !self.graph.has_errors(&self.reactor, data.data_id()),
            None => true,
        };
        own && self
            .children(id)
            .iter()
            .all(|child| self.valid(*child))
    }

    /// Validate children first, then this node; returns aggregate
    /// validity. Forces a full pass so freshly-entered data is judged.
    pub fn validate(&mut self) -> bool {
        self.set_touched(self.root, true, false);
        self.stabilize();
        self.valid(self.root)
    }

    pub fn set_touched(&mut self, id: NodeId, touched: bool, not_children: bool) {
        let data_id = {
            let Some(node) = self.node_mut(id) else { return };
            node.touched = touched;
            node.data.as_ref().map(|d| d.data_id())
        };
        if let Some(data_id) = data_id {
            self.graph.set_touched(&mut self.reactor, data_id, touched);
        }
        if !not_children {
            for child in self.children(id) {
                self.set_touched(child, touched, false);
            }
        }
    }

    pub fn set_force_hidden(&mut self, id: NodeId, force: bool) {
        if let Some(node) = self.node_mut(id) {
            node.force_hidden = force;
        }
        self.stabilize();
    }

    pub fn set_force_disabled(&mut self, id: NodeId, force: bool) {
        if let Some(node) = self.node_mut(id) {
            node.force_disabled = force;
        }
        self.stabilize();
    }

    pub fn set_force_readonly(&mut self, id: NodeId, force: bool) {
        if let Some(node) = self.node_mut(id) {
            node.force_readonly = force;
        }
        self.stabilize();
    }

    // --- metadata / UI attachment ---

    pub fn meta(&self, id: NodeId, key: &str) -> Option<Value> {
        self.node(id).and_then(|n| n.meta.get(key).cloned())
    }

    pub fn set_meta(&mut self, id: NodeId, key: impl Into<String>, value: Value) {
        if let Some(node) = self.node_mut(id) {
            node.meta.insert(key.into(), value);
        }
    }

    pub fn attach_ui(&mut self, id: NodeId, ui: Box<dyn UiAttachment>) {
        if let Some(node) = self.node_mut(id) {
            node.ui = Some(ui);
        }
    }

    pub fn ensure_visible(&mut self, id: NodeId) {
        if let Some(node) = self.node_mut(id) {
            if let Some(ui) = node.ui.as_mut() {
                ui.ensure_visible();
            }
        }
    }

    /// Register a disable lock; the node stays disabled until every
    /// lock of every kind is released.
    pub fn add_disable_lock(&mut self, id: NodeId, kind: impl Into<String>) {
        if let Some(node) = self.node_mut(id) {
            *node.disable_locks.entry(kind.into()).or_insert(0) += 1;
        }
        self.stabilize();
    }

    pub fn release_disable_lock(&mut self, id: NodeId, kind: &str) {
        if let Some(node) = self.node_mut(id) {
            if let Some(count) = node.disable_locks.get_mut(kind) {
                *count -= 1;
                if *count == 0 {
                    node.disable_locks.remove(kind);
                }
            }
        }
        self.stabilize();
    }

    // --- data access ---

    /// Write a value at a `/`-separated data path (numeric segments
    /// index collection elements), then re-stabilize.
    pub fn set_data(&mut self, path: &str, value: Value) {
        if let Some(node) = self.navigate(path) {
            let FormState { reactor, graph, .. } = self;
            node.set_value(graph, reactor, value);
        }
        self.stabilize();
    }

    /// Read the current value at a data path.
    pub fn data(&mut self, path: &str) -> Value {
        match self.navigate(path) {
            Some(node) => node.value(&self.graph, &self.reactor),
            None => Value::Undefined,
        }
    }

    fn navigate(&mut self, path: &str) -> Option<SchemaDataNode> {
        let mut current = self.root_data.clone();
        for segment in path.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            let FormState { reactor, graph, .. } = self;
            current = if let Ok(index) = segment.parse::<usize>() {
                current.child_element(graph, reactor, index)?
            } else {
                current.child_field(graph, reactor, segment)
            };
        }
        Some(current)
    }

    /// Count of live dynamic expression registrations across the
    /// tree. Element teardown must drive this back down; tests assert
    /// it tracks the data.
    pub fn live_evaluations(&self) -> usize {
        self.nodes
            .iter()
            .flatten()
            .map(|n| {
                n.evaluations.iter().filter(|e| e.is_dynamic()).count()
                    + n.validator_evals.iter().filter(|e| e.is_dynamic()).count()
            })
            .sum()
    }

    /// Count of live state nodes.
    pub fn live_nodes(&self) -> usize {
        self.nodes.iter().flatten().count()
    }
}

fn is_display_only(kind: &ControlKind) -> bool {
    matches!(
        kind,
        ControlKind::Group {
            group_options,
            ..
        } if group_options.display_only
    )
}

fn merge_variables(
    parent: &FxHashMap<String, Value>,
    own: FxHashMap<String, Value>,
) -> FxHashMap<String, Value> {
    if parent.is_empty() {
        return own;
    }
    let mut merged = parent.clone();
    merged.extend(own);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use formwork_model::control::GroupOptions;
    use formwork_model::schema::{FieldType, SchemaField};
    use formwork_model::ControlDefinition;

    fn simple_state(root_control: ControlDefinition, data: serde_json::Value) -> FormState {
        let schema = SchemaTree::new(SchemaField::compound(
            "",
            vec![
                SchemaField::scalar("a", FieldType::String),
                SchemaField::scalar("b", FieldType::String),
            ],
        ));
        FormState::new(
            schema,
            FormTree::new(root_control),
            Value::from(serde_json::Value::from(data)),
            FormOptions::default(),
        )
    }

    #[test]
    fn readonly_and_disabled_propagate_to_descendants() {
        let mut state = simple_state(
            ControlDefinition::group(vec![
                ControlDefinition::group(vec![ControlDefinition::data("a")]).with_readonly(true),
                ControlDefinition::data("b").with_disabled(true),
            ]),
            serde_json::json!({}),
        );
        state.stabilize();
        let readonly_group = state.children(state.root())[0];
        let a = state.children(readonly_group)[0];
        let b = state.children(state.root())[1];

        assert!(state.readonly(readonly_group));
        assert!(state.readonly(a), "readonly inherits downward");
        assert!(!state.readonly(b));
        assert!(state.disabled(b));
        assert!(!state.disabled(a));
    }

    #[test]
    fn disable_locks_hold_until_released() {
        let mut state = simple_state(
            ControlDefinition::group(vec![ControlDefinition::data("a")]),
            serde_json::json!({}),
        );
        let a = state.children(state.root())[0];
        assert!(!state.disabled(a));

        state.add_disable_lock(a, "saving");
        assert!(state.disabled(a));
        state.add_disable_lock(a, "saving");
        state.release_disable_lock(a, "saving");
        assert!(state.disabled(a), "still one lock outstanding");
        state.release_disable_lock(a, "saving");
        assert!(!state.disabled(a));
    }

    #[test]
    fn touched_propagates_unless_suppressed() {
        let mut state = simple_state(
            ControlDefinition::group(vec![
                ControlDefinition::data("a"),
                ControlDefinition::data("b"),
            ]),
            serde_json::json!({}),
        );
        let root = state.root();
        let a = state.children(root)[0];

        state.set_touched(root, true, false);
        assert!(state.touched(root));
        assert!(state.touched(a));

        state.set_touched(root, false, false);
        state.set_touched(root, true, true);
        assert!(state.touched(root));
        assert!(!state.touched(a), "not_children suppresses propagation");
    }

    #[test]
    fn meta_is_per_node_storage() {
        let mut state = simple_state(
            ControlDefinition::group(vec![ControlDefinition::data("a")]),
            serde_json::json!({}),
        );
        let a = state.children(state.root())[0];
        assert_eq!(state.meta(a, "scroll"), None);
        state.set_meta(a, "scroll", Value::int(7));
        assert_eq!(state.meta(a, "scroll"), Some(Value::int(7)));
        assert_eq!(state.meta(state.root(), "scroll"), None);
    }

    #[test]
    fn display_only_groups_suppress_actions() {
        let mut state = simple_state(
            ControlDefinition::group(vec![
                ControlDefinition::action("save"),
                ControlDefinition::data("a"),
            ]),
            serde_json::json!({}),
        );
        let action = state.children(state.root())[0];
        assert!(state.visible(action));

        let display_only = ControlKind::Group {
            compound_field: None,
            group_options: GroupOptions {
                display_only: true,
                ..GroupOptions::default()
            },
        };
        let mut root = ControlDefinition::group(vec![
            ControlDefinition::action("save"),
            ControlDefinition::data("a"),
        ]);
        root.kind = display_only;
        let mut state = simple_state(root, serde_json::json!({}));
        state.stabilize();
        let action = state.children(state.root())[0];
        let field = state.children(state.root())[1];
        assert!(!state.visible(action), "actions hide in display-only groups");
        assert!(state.visible(field));
    }

    #[test]
    fn ui_attachment_hook_is_invoked() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct Recorder(Rc<Cell<u32>>);
        impl UiAttachment for Recorder {
            fn ensure_visible(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let mut state = simple_state(
            ControlDefinition::group(vec![ControlDefinition::data("a")]),
            serde_json::json!({}),
        );
        let a = state.children(state.root())[0];
        let calls = Rc::new(Cell::new(0));
        state.attach_ui(a, Box::new(Recorder(calls.clone())));
        state.ensure_visible(a);
        state.ensure_visible(a);
        assert_eq!(calls.get(), 2);
    }
}
