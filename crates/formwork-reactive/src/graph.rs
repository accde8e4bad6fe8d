//! The mutable data graph.
//!
//! A lazily-realized tree of data slots over the reactor, one slot per
//! navigated position. Each slot carries its canonical value cell plus
//! the mirrored `disabled` / `touched` / `errors` cells the engine
//! keeps consistent with form-state nodes.
//!
//! Collection elements get stable, monotonically allocated keys:
//! append allocates, removal splices, whole-array writes reconcile by
//! index. Writes propagate down into realized children and up through
//! ancestors; both directions stop at idempotent writes.

use crate::reactor::Reactor;
use crate::slot::CellId;
use formwork_model::Value;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Stable identity for one collection element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementKey(pub u64);

/// Generational handle for a data-graph position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataId {
    pub index: u32,
    pub generation: u32,
}

impl DataId {
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
    };
}

/// How a slot hangs off its parent.
#[derive(Debug, Clone)]
enum DataStep {
    Field(Arc<str>),
    Element(ElementKey),
}

struct DataSlot {
    generation: u32,
    alive: bool,
    value: CellId,
    disabled: CellId,
    touched: CellId,
    /// Object of error-slot name → message, or `Null` when clear.
    errors: CellId,
    fields: FxHashMap<Arc<str>, DataId>,
    /// Realized elements in positional order.
    elements: Vec<(ElementKey, DataId)>,
    next_key: u64,
    parent: Option<(DataId, DataStep)>,
}

/// The data tree. Values are owned by the reactor's cells; the graph
/// owns the navigation structure.
pub struct DataGraph {
    slots: Vec<DataSlot>,
    free: Vec<u32>,
    root: DataId,
}

impl DataGraph {
    pub fn new(reactor: &mut Reactor, root_value: Value) -> Self {
        let mut graph = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: DataId::INVALID,
        };
        graph.root = graph.alloc(reactor, root_value, None);
        graph
    }

    pub fn root(&self) -> DataId {
        self.root
    }

    fn alloc(
        &mut self,
        reactor: &mut Reactor,
        value: Value,
        parent: Option<(DataId, DataStep)>,
    ) -> DataId {
        let scope = reactor.root_scope();
        let value = reactor.alloc_cell(scope, value);
        let disabled = reactor.alloc_cell(scope, Value::Bool(false));
        let touched = reactor.alloc_cell(scope, Value::Bool(false));
        let errors = reactor.alloc_cell(scope, Value::Null);
        let slot = DataSlot {
            generation: 0,
            alive: true,
            value,
            disabled,
            touched,
            errors,
            fields: FxHashMap::default(),
            elements: Vec::new(),
            next_key: 0,
            parent,
        };
        if let Some(index) = self.free.pop() {
            let generation = self.slots[index as usize].generation + 1;
            self.slots[index as usize] = DataSlot { generation, ..slot };
            DataId { index, generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(slot);
            DataId {
                index,
                generation: 0,
            }
        }
    }

    fn slot(&self, id: DataId) -> Option<&DataSlot> {
        let slot = self.slots.get(id.index as usize)?;
        (slot.alive && slot.generation == id.generation).then_some(slot)
    }

    fn slot_mut(&mut self, id: DataId) -> Option<&mut DataSlot> {
        let slot = self.slots.get_mut(id.index as usize)?;
        (slot.alive && slot.generation == id.generation).then_some(slot)
    }

    pub fn is_alive(&self, id: DataId) -> bool {
        self.slot(id).is_some()
    }

    // --- value access ---

    /// Untracked read. Dead positions read as `Undefined`.
    pub fn value(&self, reactor: &Reactor, id: DataId) -> Value {
        self.slot(id)
            .map(|s| reactor.peek(s.value))
            .unwrap_or(Value::Undefined)
    }

    /// Tracked read, for dependency capture.
    pub fn value_tracked(&self, reactor: &mut Reactor, id: DataId) -> Value {
        match self.slot(id) {
            Some(s) => reactor.get(s.value),
            None => Value::Undefined,
        }
    }

    pub fn value_cell(&self, id: DataId) -> CellId {
        self.slot(id).map(|s| s.value).unwrap_or(CellId::INVALID)
    }

    pub fn disabled_cell(&self, id: DataId) -> CellId {
        self.slot(id).map(|s| s.disabled).unwrap_or(CellId::INVALID)
    }

    pub fn touched_cell(&self, id: DataId) -> CellId {
        self.slot(id).map(|s| s.touched).unwrap_or(CellId::INVALID)
    }

    pub fn errors_cell(&self, id: DataId) -> CellId {
        self.slot(id).map(|s| s.errors).unwrap_or(CellId::INVALID)
    }

    // --- navigation ---

    /// Realize (or fetch) the child slot for an object field.
    pub fn child_field(&mut self, reactor: &mut Reactor, id: DataId, name: &str) -> DataId {
        if let Some(slot) = self.slot(id) {
            if let Some(child) = slot.fields.get(name) {
                return *child;
            }
        } else {
            return DataId::INVALID;
        }
        let parent_value = self.value(reactor, id);
        let child_value = parent_value
            .get(name)
            .cloned()
            .unwrap_or(Value::Undefined);
        let name: Arc<str> = name.into();
        let child = self.alloc(
            reactor,
            child_value,
            Some((id, DataStep::Field(name.clone()))),
        );
        if let Some(slot) = self.slot_mut(id) {
            slot.fields.insert(name, child);
        }
        child
    }

    /// Current element count. Non-array values (including unset) count
    /// as the empty sequence.
    pub fn element_count(&self, reactor: &Reactor, id: DataId) -> usize {
        self.value(reactor, id)
            .as_array()
            .map(|a| a.len())
            .unwrap_or(0)
    }

    /// Realize (or fetch) the element slot at `index`. Out-of-range
    /// indexes yield `None`.
    pub fn child_element(
        &mut self,
        reactor: &mut Reactor,
        id: DataId,
        index: usize,
    ) -> Option<DataId> {
        let len = self.element_count(reactor, id);
        if index >= len {
            return None;
        }
        self.realize_elements(reactor, id, index + 1);
        self.slot(id)
            .and_then(|s| s.elements.get(index))
            .map(|(_, child)| *child)
    }

    /// Stable key of the element at `index`, if realized or realizable.
    pub fn element_key(
        &mut self,
        reactor: &mut Reactor,
        id: DataId,
        index: usize,
    ) -> Option<ElementKey> {
        self.child_element(reactor, id, index)?;
        self.slot(id)
            .and_then(|s| s.elements.get(index))
            .map(|(key, _)| *key)
    }

    fn realize_elements(&mut self, reactor: &mut Reactor, id: DataId, up_to: usize) {
        let realized = match self.slot(id) {
            Some(s) => s.elements.len(),
            None => return,
        };
        let parent_value = self.value(reactor, id);
        for index in realized..up_to {
            let element_value = parent_value
                .get_index(index)
                .cloned()
                .unwrap_or(Value::Undefined);
            let key = {
                let Some(slot) = self.slot_mut(id) else { return };
                let key = ElementKey(slot.next_key);
                slot.next_key += 1;
                key
            };
            let child = self.alloc(reactor, element_value, Some((id, DataStep::Element(key))));
            if let Some(slot) = self.slot_mut(id) {
                slot.elements.push((key, child));
            }
        }
    }

    // --- writes ---

    /// Write a value at a position. Pushes the value down into
    /// realized children and recomposes ancestors. Equality
    /// short-circuits both directions.
    pub fn set_value(&mut self, reactor: &mut Reactor, id: DataId, value: Value) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let cell = slot.value;
        if !reactor.set(cell, value.clone()) {
            return false;
        }
        self.push_down(reactor, id, &value);
        self.propagate_up(reactor, id, &value);
        true
    }

    fn push_down(&mut self, reactor: &mut Reactor, id: DataId, value: &Value) {
        // Object fields: update realized children, missing keys go
        // undefined.
        let fields: Vec<(Arc<str>, DataId)> = match self.slot(id) {
            Some(s) => s.fields.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            None => return,
        };
        for (name, child) in fields {
            let child_value = value.get(&name).cloned().unwrap_or(Value::Undefined);
            self.set_child_value(reactor, child, child_value);
        }

        // Elements: reconcile realized slots by index, dispose extras.
        let new_len = value.as_array().map(|a| a.len()).unwrap_or(0);
        let elements: Vec<(ElementKey, DataId)> = match self.slot(id) {
            Some(s) => s.elements.clone(),
            None => return,
        };
        for (index, (_, child)) in elements.iter().enumerate() {
            if index < new_len {
                let element_value = value.get_index(index).cloned().unwrap_or(Value::Undefined);
                self.set_child_value(reactor, *child, element_value);
            } else {
                self.dispose_subtree(reactor, *child);
            }
        }
        if elements.len() > new_len {
            if let Some(slot) = self.slot_mut(id) {
                slot.elements.truncate(new_len);
            }
        }
    }

    /// Downward write: updates the child and its own subtree but does
    /// not climb back up (the parent already holds the composed value).
    fn set_child_value(&mut self, reactor: &mut Reactor, id: DataId, value: Value) {
        let Some(slot) = self.slot(id) else { return };
        let cell = slot.value;
        if reactor.set(cell, value.clone()) {
            self.push_down(reactor, id, &value);
        }
    }

    fn propagate_up(&mut self, reactor: &mut Reactor, id: DataId, value: &Value) {
        let Some((parent, step)) = self.slot(id).and_then(|s| s.parent.clone()) else {
            return;
        };
        let parent_value = self.value(reactor, parent);
        let new_parent_value = match &step {
            DataStep::Field(name) => parent_value.with_field(name, value.clone()),
            DataStep::Element(key) => {
                let Some(index) = self
                    .slot(parent)
                    .and_then(|s| s.elements.iter().position(|(k, _)| k == key))
                else {
                    return;
                };
                parent_value.with_element(index, value.clone())
            }
        };
        let Some(parent_slot) = self.slot(parent) else {
            return;
        };
        let parent_cell = parent_slot.value;
        if reactor.set(parent_cell, new_parent_value.clone()) {
            // Sibling slots may be stale after recomposition.
            self.push_down(reactor, parent, &new_parent_value);
            self.propagate_up(reactor, parent, &new_parent_value);
        }
    }

    // --- structured element ops ---

    /// Append an element, allocating a fresh key.
    pub fn push_element(&mut self, reactor: &mut Reactor, id: DataId, value: Value) {
        let current = self.value(reactor, id);
        let mut items = current.as_array().cloned().unwrap_or_default();
        let index = items.len();
        items.push(value);
        self.realize_elements(reactor, id, index);
        self.set_value(reactor, id, Value::array(items));
    }

    /// Insert an element at `index`, splicing realized keys so that
    /// elements after the insertion keep their identity.
    pub fn insert_element(&mut self, reactor: &mut Reactor, id: DataId, index: usize, value: Value) {
        let current = self.value(reactor, id);
        let mut items = current.as_array().cloned().unwrap_or_default();
        if index > items.len() {
            return;
        }
        // Realize everything so the key splice lines up.
        self.realize_elements(reactor, id, items.len());
        items.insert(index, value.clone());

        let inserted = {
            let Some(slot) = self.slot_mut(id) else { return };
            let key = ElementKey(slot.next_key);
            slot.next_key += 1;
            key
        };
        let child = self.alloc(reactor, value, Some((id, DataStep::Element(inserted))));
        if let Some(slot) = self.slot_mut(id) {
            if index <= slot.elements.len() {
                slot.elements.insert(index, (inserted, child));
            }
        }
        self.set_value(reactor, id, Value::array(items));
    }

    /// Remove the element at `index`, disposing its subtree. Elements
    /// after it keep their keys.
    pub fn remove_element(&mut self, reactor: &mut Reactor, id: DataId, index: usize) {
        let current = self.value(reactor, id);
        let mut items = current.as_array().cloned().unwrap_or_default();
        if index >= items.len() {
            return;
        }
        self.realize_elements(reactor, id, items.len());
        items.remove(index);

        let removed = {
            let Some(slot) = self.slot_mut(id) else { return };
            if index < slot.elements.len() {
                Some(slot.elements.remove(index))
            } else {
                None
            }
        };
        if let Some((_, child)) = removed {
            self.dispose_subtree(reactor, child);
        }
        self.set_value(reactor, id, Value::array(items));
    }

    /// Dispose a position and everything under it, releasing cells.
    pub fn dispose_subtree(&mut self, reactor: &mut Reactor, id: DataId) {
        let Some(slot) = self.slot_mut(id) else { return };
        slot.alive = false;
        let fields: Vec<DataId> = slot.fields.values().copied().collect();
        let elements: Vec<DataId> = slot.elements.iter().map(|(_, c)| *c).collect();
        let cells = [slot.value, slot.disabled, slot.touched, slot.errors];
        slot.fields.clear();
        slot.elements.clear();
        for child in fields.into_iter().chain(elements) {
            self.dispose_subtree(reactor, child);
        }
        for cell in cells {
            reactor.free_cell(cell);
        }
        self.free.push(id.index);
    }

    // --- mirrored state ---

    pub fn set_disabled(&mut self, reactor: &mut Reactor, id: DataId, disabled: bool) -> bool {
        match self.slot(id) {
            Some(s) => reactor.set(s.disabled, Value::Bool(disabled)),
            None => false,
        }
    }

    pub fn disabled(&self, reactor: &Reactor, id: DataId) -> bool {
        self.slot(id)
            .map(|s| reactor.peek(s.disabled).truthy())
            .unwrap_or(false)
    }

    pub fn set_touched(&mut self, reactor: &mut Reactor, id: DataId, touched: bool) -> bool {
        match self.slot(id) {
            Some(s) => reactor.set(s.touched, Value::Bool(touched)),
            None => false,
        }
    }

    pub fn touched(&self, reactor: &Reactor, id: DataId) -> bool {
        self.slot(id)
            .map(|s| reactor.peek(s.touched).truthy())
            .unwrap_or(false)
    }

    /// Set or clear one named error slot.
    pub fn set_error(
        &mut self,
        reactor: &mut Reactor,
        id: DataId,
        slot_name: &str,
        message: Option<String>,
    ) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let cell = slot.errors;
        let current = reactor.peek(cell);
        let updated = match message {
            Some(message) => current.with_field(slot_name, Value::string(message)),
            None => match current.as_object() {
                Some(fields) if fields.contains_key(slot_name) => {
                    let mut fields = (*fields).clone();
                    fields.shift_remove(slot_name);
                    if fields.is_empty() {
                        Value::Null
                    } else {
                        Value::Object(Arc::new(fields))
                    }
                }
                _ => return false,
            },
        };
        reactor.set(cell, updated)
    }

    /// All current error messages, by slot name.
    pub fn errors(&self, reactor: &Reactor, id: DataId) -> Vec<(String, String)> {
        self.slot(id)
            .map(|s| reactor.peek(s.errors))
            .and_then(|v| {
                v.as_object().map(|fields| {
                    fields
                        .iter()
                        .filter_map(|(k, v)| v.as_str().map(|m| (k.clone(), m.to_string())))
                        .collect()
                })
            })
            .unwrap_or_default()
    }

    pub fn has_errors(&self, reactor: &Reactor, id: DataId) -> bool {
        !self.errors(reactor, id).is_empty()
    }

    pub fn clear_errors(&mut self, reactor: &mut Reactor, id: DataId) -> bool {
        match self.slot(id) {
            Some(s) => reactor.set(s.errors, Value::Null),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Reactor, DataGraph) {
        let mut reactor = Reactor::new();
        let graph = DataGraph::new(&mut reactor, serde_json::json!({}).into());
        (reactor, graph)
    }

    #[test]
    fn field_navigation_realizes_lazily() {
        let mut reactor = Reactor::new();
        let mut graph = DataGraph::new(
            &mut reactor,
            Value::object([("name", Value::string("World"))]),
        );
        let root = graph.root();
        let name = graph.child_field(&mut reactor, root, "name");
        assert_eq!(graph.value(&reactor, name), Value::string("World"));

        let missing = graph.child_field(&mut reactor, root, "missing");
        assert_eq!(graph.value(&reactor, missing), Value::Undefined);
    }

    #[test]
    fn child_write_recomposes_parent() {
        let (mut reactor, mut graph) = setup();
        let root = graph.root();
        let name = graph.child_field(&mut reactor, root, "name");
        graph.set_value(&mut reactor, name, Value::string("x"));
        assert_eq!(
            graph.value(&reactor, root).get("name"),
            Some(&Value::string("x"))
        );
    }

    #[test]
    fn parent_write_pushes_into_children() {
        let (mut reactor, mut graph) = setup();
        let root = graph.root();
        let name = graph.child_field(&mut reactor, root, "name");
        graph.set_value(&mut reactor, root, Value::object([("name", Value::int(7))]));
        assert_eq!(graph.value(&reactor, name), Value::int(7));
    }

    #[test]
    fn element_keys_are_stable_across_in_place_writes() {
        let (mut reactor, mut graph) = setup();
        let root = graph.root();
        let list = graph.child_field(&mut reactor, root, "items");
        graph.set_value(
            &mut reactor,
            list,
            Value::array([Value::int(1), Value::int(2)]),
        );

        let key0 = graph.element_key(&mut reactor, list, 0).unwrap();
        let key1 = graph.element_key(&mut reactor, list, 1).unwrap();

        graph.set_value(
            &mut reactor,
            list,
            Value::array([Value::int(9), Value::int(2)]),
        );
        assert_eq!(graph.element_key(&mut reactor, list, 0), Some(key0));
        assert_eq!(graph.element_key(&mut reactor, list, 1), Some(key1));
    }

    #[test]
    fn remove_element_preserves_later_keys() {
        let (mut reactor, mut graph) = setup();
        let root = graph.root();
        let list = graph.child_field(&mut reactor, root, "items");
        graph.set_value(
            &mut reactor,
            list,
            Value::array([Value::int(1), Value::int(2), Value::int(3)]),
        );
        let key2 = graph.element_key(&mut reactor, list, 2).unwrap();

        graph.remove_element(&mut reactor, list, 0);
        assert_eq!(graph.element_count(&reactor, list), 2);
        assert_eq!(graph.element_key(&mut reactor, list, 1), Some(key2));
        assert_eq!(
            graph.value(&reactor, list),
            Value::array([Value::int(2), Value::int(3)])
        );
    }

    #[test]
    fn shrinking_array_disposes_element_slots() {
        let (mut reactor, mut graph) = setup();
        let root = graph.root();
        let list = graph.child_field(&mut reactor, root, "items");
        graph.set_value(
            &mut reactor,
            list,
            Value::array([Value::int(1), Value::int(2)]),
        );
        let second = graph.child_element(&mut reactor, list, 1).unwrap();

        graph.set_value(&mut reactor, list, Value::array([Value::int(1)]));
        assert!(!graph.is_alive(second));
        assert_eq!(graph.child_element(&mut reactor, list, 1), None);
    }

    #[test]
    fn non_array_collection_degrades_to_empty() {
        let (mut reactor, mut graph) = setup();
        let root = graph.root();
        let list = graph.child_field(&mut reactor, root, "items");
        graph.set_value(&mut reactor, list, Value::string("oops"));
        assert_eq!(graph.element_count(&reactor, list), 0);
        assert_eq!(graph.child_element(&mut reactor, list, 0), None);
    }

    #[test]
    fn error_slots() {
        let (mut reactor, mut graph) = setup();
        let root = graph.root();
        let field = graph.child_field(&mut reactor, root, "f");
        graph.set_error(&mut reactor, field, "default", Some("Required".into()));
        graph.set_error(&mut reactor, field, "jsonata", Some("Bad".into()));
        assert_eq!(graph.errors(&reactor, field).len(), 2);

        graph.set_error(&mut reactor, field, "default", None);
        assert_eq!(
            graph.errors(&reactor, field),
            vec![("jsonata".to_string(), "Bad".to_string())]
        );
        graph.clear_errors(&mut reactor, field);
        assert!(!graph.has_errors(&reactor, field));
    }
}
