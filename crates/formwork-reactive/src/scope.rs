//! Hierarchical cleanup scopes.
//!
//! Every cell and cleanup callback is registered against a scope;
//! disposing a scope runs its own cleanups first, then its children
//! top-down, then releases owned cells. This is the engine's central
//! resource-safety primitive: tearing down a form-state node disposes
//! its scope, which releases every evaluation the node ever created.

/// Generational handle for a cleanup scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    pub index: u32,
    pub generation: u32,
}

impl ScopeId {
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.index != u32::MAX
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Internal scope state, stored in the reactor's scope arena.
pub(crate) struct ScopeSlot {
    pub generation: u32,
    pub alive: bool,
    pub parent: ScopeId,
    pub children: Vec<ScopeId>,
    pub cells: Vec<crate::slot::CellId>,
    pub cleanups: Vec<Box<dyn FnOnce()>>,
}

impl ScopeSlot {
    pub fn new(generation: u32, parent: ScopeId) -> Self {
        Self {
            generation,
            alive: true,
            parent,
            children: Vec::new(),
            cells: Vec::new(),
            cleanups: Vec::new(),
        }
    }
}
