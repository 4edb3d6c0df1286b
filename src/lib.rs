//! actionflow: Serialized Command Execution
//!
//! Every mutation of shared state is a command executed on one serialization thread in FIFO
//! order. Undoable commands record checkpoint-based undo items and provenance steps; background
//! filters compute off that thread under per-resource locks and marshal their results back.

pub mod action;
pub mod actions;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod filter;
pub mod history;
pub mod logging;
pub mod provenance;
pub mod registry;
pub mod types;
pub mod undo;

pub use action::{
    action_handle, Action, ActionContext, ActionContextHandle, ActionHandle, ActionResult,
    ActionScope, ActionSource, ActionStatus, BasicContext, CommandProperties,
};
pub use engine::Engine;
pub use error::{ActionError, EngineError, ParseError, RegistryError};
