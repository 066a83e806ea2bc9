//! Declarative command tree
//!
//! A [`ModuleSpec`] describes a command node as plain data. Resolving it produces a [`Module`],
//! which is either a composite of named child modules, a leaf bound to a handler, or a set of
//! named methods dispatched as leaves.
//!
//! Configuration flows down the tree: every module sees the merge of its ancestors' config and
//! its own, with the closest scope winning. `${name}` placeholders in config strings are filled
//! in from the invocation options right before a handler runs.

pub mod config;
pub mod error;
pub mod module;
pub mod spec;
pub mod task;

pub use error::{ModuleError, TaskError};
pub use module::{Mode, Module};
pub use spec::{Handler, HandlerError, HandlerResult, Invocation, MethodSpec, ModuleSpec, Options};
pub use task::{DefaultHooks, ExecResult, Outcome, Report, TaskHooks};
