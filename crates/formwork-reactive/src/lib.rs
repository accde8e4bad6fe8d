//! Reactive-cell substrate for the Formwork form engine.
//!
//! Provides the primitives the engine is built on: a generational
//! arena of versioned value cells, hierarchical cleanup scopes,
//! read-tracking for dependency capture, and the mutable data graph
//! (schema-shaped navigation with stable element identity).
//!
//! The propagation model is full re-evaluation with
//! equality-short-circuited writes: a write that does not change a
//! cell's value bumps nothing, which is what lets write-during-read
//! feedback (default application, clear-on-hide) re-stabilize instead
//! of looping.

pub mod graph;
pub mod reactor;
pub mod scope;
pub mod slot;

pub use graph::{DataGraph, DataId, ElementKey};
pub use reactor::{ChangeEntry, DepRecord, Reactor, ReactorError};
pub use scope::ScopeId;
pub use slot::CellId;
