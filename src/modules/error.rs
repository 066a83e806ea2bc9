use thiserror::Error;

use crate::modules::config::SubstitutionError;
use crate::modules::spec::HandlerError;

/// Errors raised while resolving a `ModuleSpec` into a `Module`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("Module must be created with a command")]
    MissingCommand,
    #[error("Module '{0}' has no actions, handler or methods to use as subcommands")]
    NoActionsHandlerOrMethods(String),
    #[error("Command cannot shadow module property '{0}'")]
    CommandShadowsProperty(String),
    #[error("Module '{parent}' declares action '{action}' more than once")]
    DuplicateAction { parent: String, action: String },
}

/// Errors raised while running a task
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Substitution(#[from] SubstitutionError),
    #[error("Task '{task}' failed: {source}")]
    Handler {
        task: String,
        #[source]
        source: HandlerError,
    },
    #[error("Module '{0}' has no handler, a subcommand must be given")]
    NotRunnable(String),
}
