//! The cell arena: versioned values, tracking, scopes, passes.

use crate::scope::{ScopeId, ScopeSlot};
use crate::slot::CellId;
use formwork_model::Value;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use thiserror::Error;

/// Substrate-level misuse. Normal engine code never sees these: the
/// sentinel API (`peek`/`set`) degrades silently on dead handles, and
/// only the `try_` variants surface them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReactorError {
    #[error("cell is no longer alive")]
    DeadCell,
    #[error("scope is no longer alive")]
    DeadScope,
}

struct CellSlot {
    generation: u32,
    alive: bool,
    value: Value,
    /// Bumped on every changed write.
    version: u64,
    last_changed_pass: u64,
}

/// A dependency snapshot: cells read by a computation plus the version
/// each had at the time. `deps_changed` answers "must this re-run?"
/// without re-running it.
#[derive(Debug, Clone, Default)]
pub struct DepRecord {
    pub deps: SmallVec<[(CellId, u64); 8]>,
}

/// One recorded cell change (diagnostics only).
#[derive(Debug, Clone)]
pub struct ChangeEntry {
    pub pass: u64,
    pub cell: CellId,
    pub old_value: Value,
    pub new_value: Value,
}

/// Arena of value cells with read-tracking and cleanup scopes.
pub struct Reactor {
    cells: Vec<CellSlot>,
    free_cells: Vec<u32>,
    scopes: Vec<ScopeSlot>,
    free_scopes: Vec<u32>,
    root_scope: ScopeId,
    /// Stack of active tracking frames; reads land in the top frame.
    tracking: Vec<FxHashSet<CellId>>,
    pass: u64,
    writes_this_pass: u64,
    log_enabled: bool,
    log: Vec<ChangeEntry>,
}

impl Reactor {
    pub fn new() -> Self {
        let mut reactor = Self {
            cells: Vec::new(),
            free_cells: Vec::new(),
            scopes: Vec::new(),
            free_scopes: Vec::new(),
            root_scope: ScopeId::INVALID,
            tracking: Vec::new(),
            pass: 0,
            writes_this_pass: 0,
            log_enabled: false,
            log: Vec::new(),
        };
        reactor.root_scope = reactor.create_scope(ScopeId::INVALID);
        reactor
    }

    pub fn root_scope(&self) -> ScopeId {
        self.root_scope
    }

    // --- scopes ---

    /// Create a child scope. An invalid parent attaches to nothing
    /// (used only for the root).
    pub fn create_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = if let Some(index) = self.free_scopes.pop() {
            let slot = &mut self.scopes[index as usize];
            let generation = slot.generation + 1;
            *slot = ScopeSlot::new(generation, parent);
            ScopeId { index, generation }
        } else {
            let index = self.scopes.len() as u32;
            self.scopes.push(ScopeSlot::new(0, parent));
            ScopeId {
                index,
                generation: 0,
            }
        };
        if let Some(parent_slot) = self.scope_slot_mut(parent) {
            parent_slot.children.push(id);
        }
        id
    }

    /// Register a cleanup callback; runs when the scope is disposed.
    pub fn on_cleanup(&mut self, scope: ScopeId, cleanup: impl FnOnce() + 'static) {
        if let Some(slot) = self.scope_slot_mut(scope) {
            slot.cleanups.push(Box::new(cleanup));
        }
    }

    /// Dispose a scope: own cleanups first, then children top-down,
    /// then owned cells. Idempotent on stale handles.
    pub fn dispose_scope(&mut self, scope: ScopeId) {
        let Some(slot) = self.scope_slot_mut(scope) else {
            return;
        };
        slot.alive = false;
        let cleanups = std::mem::take(&mut slot.cleanups);
        let children = std::mem::take(&mut slot.children);
        let cells = std::mem::take(&mut slot.cells);
        let parent = slot.parent;
        for cleanup in cleanups {
            cleanup();
        }
        for child in children {
            self.dispose_scope(child);
        }
        for cell in cells {
            self.free_cell(cell);
        }
        if let Some(parent_slot) = self.scope_slot_mut(parent) {
            parent_slot.children.retain(|c| *c != scope);
        }
        self.free_scopes.push(scope.index);
    }

    pub fn scope_alive(&self, scope: ScopeId) -> bool {
        self.scope_slot(scope).is_some()
    }

    /// Count of live scopes, the root included. Used by tests to prove
    /// teardown released everything.
    pub fn live_scopes(&self) -> usize {
        self.scopes.iter().filter(|s| s.alive).count()
    }

    fn scope_slot(&self, scope: ScopeId) -> Option<&ScopeSlot> {
        let slot = self.scopes.get(scope.index as usize)?;
        (slot.alive && slot.generation == scope.generation).then_some(slot)
    }

    fn scope_slot_mut(&mut self, scope: ScopeId) -> Option<&mut ScopeSlot> {
        let slot = self.scopes.get_mut(scope.index as usize)?;
        (slot.alive && slot.generation == scope.generation).then_some(slot)
    }

    // --- cells ---

    /// Allocate a cell owned by `scope`.
    pub fn alloc_cell(&mut self, scope: ScopeId, initial: Value) -> CellId {
        let id = if let Some(index) = self.free_cells.pop() {
            let slot = &mut self.cells[index as usize];
            let generation = slot.generation + 1;
            *slot = CellSlot {
                generation,
                alive: true,
                value: initial,
                version: 0,
                last_changed_pass: self.pass,
            };
            CellId { index, generation }
        } else {
            let index = self.cells.len() as u32;
            self.cells.push(CellSlot {
                generation: 0,
                alive: true,
                value: initial,
                version: 0,
                last_changed_pass: self.pass,
            });
            CellId {
                index,
                generation: 0,
            }
        };
        if let Some(slot) = self.scope_slot_mut(scope) {
            slot.cells.push(id);
        }
        id
    }

    pub fn free_cell(&mut self, cell: CellId) {
        if let Some(slot) = self.cell_slot_mut(cell) {
            slot.alive = false;
            slot.value = Value::Undefined;
            self.free_cells.push(cell.index);
        }
    }

    pub fn cell_alive(&self, cell: CellId) -> bool {
        self.cell_slot(cell).is_some()
    }

    /// Read without tracking. Dead cells read as `Undefined`.
    pub fn peek(&self, cell: CellId) -> Value {
        self.cell_slot(cell)
            .map(|s| s.value.clone())
            .unwrap_or(Value::Undefined)
    }

    /// Tracked read: records the cell in the active tracking frame.
    pub fn get(&mut self, cell: CellId) -> Value {
        if let Some(frame) = self.tracking.last_mut() {
            frame.insert(cell);
        }
        self.peek(cell)
    }

    /// Write with equality short-circuit. Returns whether the value
    /// changed. Writing a dead cell is a silent no-op.
    pub fn set(&mut self, cell: CellId, value: Value) -> bool {
        let pass = self.pass;
        let log_enabled = self.log_enabled;
        let Some(slot) = self.cell_slot_mut(cell) else {
            tracing::debug!(?cell, "write to dead cell ignored");
            return false;
        };
        if slot.value == value {
            return false;
        }
        let old_value = std::mem::replace(&mut slot.value, value.clone());
        slot.version += 1;
        slot.last_changed_pass = pass;
        self.writes_this_pass += 1;
        if log_enabled {
            self.log.push(ChangeEntry {
                pass,
                cell,
                old_value,
                new_value: value,
            });
        }
        true
    }

    pub fn try_set(&mut self, cell: CellId, value: Value) -> Result<bool, ReactorError> {
        if !self.cell_alive(cell) {
            return Err(ReactorError::DeadCell);
        }
        Ok(self.set(cell, value))
    }

    /// Version of a cell; dead cells report 0.
    pub fn version(&self, cell: CellId) -> u64 {
        self.cell_slot(cell).map(|s| s.version).unwrap_or(0)
    }

    fn cell_slot(&self, cell: CellId) -> Option<&CellSlot> {
        let slot = self.cells.get(cell.index as usize)?;
        (slot.alive && slot.generation == cell.generation).then_some(slot)
    }

    fn cell_slot_mut(&mut self, cell: CellId) -> Option<&mut CellSlot> {
        let slot = self.cells.get_mut(cell.index as usize)?;
        (slot.alive && slot.generation == cell.generation).then_some(slot)
    }

    // --- tracking / passes ---

    /// Run `f` with a fresh tracking frame; returns its result plus
    /// every cell it read (directly or through nested `get`s).
    pub fn with_tracking<T>(
        &mut self,
        f: impl FnOnce(&mut Reactor) -> T,
    ) -> (T, SmallVec<[CellId; 8]>) {
        self.push_tracking();
        let result = f(self);
        (result, self.pop_tracking())
    }

    /// Open a tracking frame explicitly. Useful when the computation
    /// holds its own borrows and a closure would not fit.
    pub fn push_tracking(&mut self) {
        self.tracking.push(FxHashSet::default());
    }

    /// Close the innermost tracking frame and return the cells read
    /// while it was open.
    pub fn pop_tracking(&mut self) -> SmallVec<[CellId; 8]> {
        let frame = self.tracking.pop().unwrap_or_default();
        frame.into_iter().collect()
    }

    /// Snapshot current versions of the given cells.
    pub fn record_deps(&self, deps: &[CellId]) -> DepRecord {
        DepRecord {
            deps: deps.iter().map(|c| (*c, self.version(*c))).collect(),
        }
    }

    /// True if any recorded dependency changed (or died) since the
    /// snapshot was taken.
    pub fn deps_changed(&self, record: &DepRecord) -> bool {
        record
            .deps
            .iter()
            .any(|(cell, version)| self.version(*cell) != *version)
    }

    /// Begin a propagation pass: bumps the pass counter and resets the
    /// per-pass write count.
    pub fn begin_pass(&mut self) -> u64 {
        self.pass += 1;
        self.writes_this_pass = 0;
        self.pass
    }

    pub fn current_pass(&self) -> u64 {
        self.pass
    }

    /// Number of changed writes since `begin_pass`; zero means the
    /// system is quiescent.
    pub fn writes_this_pass(&self) -> u64 {
        self.writes_this_pass
    }

    // --- diagnostics ---

    pub fn enable_change_log(&mut self) {
        self.log_enabled = true;
    }

    pub fn change_log(&self) -> &[ChangeEntry] {
        &self.log
    }

    pub fn changes_at_pass(&self, pass: u64) -> Vec<&ChangeEntry> {
        self.log.iter().filter(|e| e.pass == pass).collect()
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_set_get() {
        let mut r = Reactor::new();
        let root = r.root_scope();
        let cell = r.alloc_cell(root, Value::int(1));
        assert_eq!(r.peek(cell), Value::int(1));

        assert!(r.set(cell, Value::int(2)));
        assert!(!r.set(cell, Value::int(2)), "equal write short-circuits");
        assert_eq!(r.version(cell), 1);
    }

    #[test]
    fn generation_guards_reuse() {
        let mut r = Reactor::new();
        let root = r.root_scope();
        let cell = r.alloc_cell(root, Value::int(1));
        r.free_cell(cell);
        assert_eq!(r.peek(cell), Value::Undefined);

        let reused = r.alloc_cell(root, Value::int(9));
        assert_eq!(reused.index, cell.index);
        assert_ne!(reused.generation, cell.generation);
        assert_eq!(r.peek(cell), Value::Undefined, "stale id stays dead");
        assert_eq!(r.peek(reused), Value::int(9));
    }

    #[test]
    fn scope_disposal_releases_cells_and_runs_cleanups() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut r = Reactor::new();
        let root = r.root_scope();
        let scope = r.create_scope(root);
        let child = r.create_scope(scope);
        let cell = r.alloc_cell(child, Value::int(5));

        let ran = Rc::new(Cell::new(0));
        let ran_outer = ran.clone();
        let ran_inner = ran.clone();
        r.on_cleanup(scope, move || ran_outer.set(ran_outer.get() + 1));
        r.on_cleanup(child, move || ran_inner.set(ran_inner.get() + 1));

        r.dispose_scope(scope);
        assert_eq!(ran.get(), 2);
        assert!(!r.scope_alive(scope));
        assert!(!r.scope_alive(child));
        assert!(!r.cell_alive(cell));
    }

    #[test]
    fn tracking_captures_reads() {
        let mut r = Reactor::new();
        let root = r.root_scope();
        let a = r.alloc_cell(root, Value::int(1));
        let b = r.alloc_cell(root, Value::int(2));

        let (_, deps) = r.with_tracking(|r| {
            let _ = r.get(a);
            let _ = r.get(b);
        });
        assert_eq!(deps.len(), 2);

        let record = r.record_deps(&deps);
        assert!(!r.deps_changed(&record));
        r.set(a, Value::int(3));
        assert!(r.deps_changed(&record));
    }

    #[test]
    fn pass_write_accounting() {
        let mut r = Reactor::new();
        let root = r.root_scope();
        let cell = r.alloc_cell(root, Value::int(0));

        r.begin_pass();
        assert_eq!(r.writes_this_pass(), 0);
        r.set(cell, Value::int(1));
        r.set(cell, Value::int(1));
        assert_eq!(r.writes_this_pass(), 1);
    }
}
