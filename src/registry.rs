//! Collection of top-level modules and their binding to the command line parser

use std::collections::HashMap;
use std::sync::Arc;

use clap::{Arg, ArgMatches};
use log::{debug, error, warn};
use thiserror::Error;

use crate::config_file::parse_value;
use crate::modules::{Module, ModuleError, ModuleSpec, Options, Outcome, TaskError};

/// Id of the raw tokens following a leaf command, split into arguments and options on dispatch
pub const ARGS: &str = "args";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Failed to load plugin {plugin}: {message}")]
    Plugin { plugin: String, message: String },
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No command given")]
    NoCommand,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error(transparent)]
    Build(#[from] ModuleError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Anything the registry accepts: a raw spec, or an already resolved module
pub enum Registrable {
    Spec(ModuleSpec),
    Module(Arc<Module>),
}

impl From<ModuleSpec> for Registrable {
    fn from(spec: ModuleSpec) -> Self {
        Registrable::Spec(spec)
    }
}

impl From<Arc<Module>> for Registrable {
    fn from(module: Arc<Module>) -> Self {
        Registrable::Module(module)
    }
}

/// A provider of modules found outside the binary, eg installed plugins
pub trait PluginSource {
    /// Discover modules to register.
    ///
    /// # Errors
    ///
    /// Returns `DiscoveryError` if discovery fails as a whole.
    fn discover(&self) -> Result<Vec<Registrable>, DiscoveryError>;
}

/// Plugin source backed by a fixed list of specs
#[derive(Debug, Clone, Default)]
pub struct StaticPlugins {
    specs: Vec<ModuleSpec>,
}

impl StaticPlugins {
    #[must_use]
    pub fn new(specs: Vec<ModuleSpec>) -> Self {
        StaticPlugins { specs }
    }
}

impl PluginSource for StaticPlugins {
    fn discover(&self) -> Result<Vec<Registrable>, DiscoveryError> {
        Ok(self.specs.iter().cloned().map(Registrable::from).collect())
    }
}

/// Top-level modules keyed by id, in registration order
#[derive(Debug, Default)]
pub struct Registry {
    modules: Vec<Arc<Module>>,
    index: HashMap<String, usize>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, resolving it first if given as a spec. Registering an id again
    /// replaces the earlier module but keeps its position.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError` if a spec cannot be resolved.
    pub fn register(&mut self, item: impl Into<Registrable>) -> Result<Arc<Module>, ModuleError> {
        let module = match item.into() {
            Registrable::Spec(spec) => Module::new(spec, None)?,
            Registrable::Module(module) => module,
        };
        debug!("Registering {} ({})...", module.name(), module.id());
        match self.index.get(module.id()) {
            Some(&position) => self.modules[position] = Arc::clone(&module),
            None => {
                self.index.insert(module.id().to_string(), self.modules.len());
                self.modules.push(Arc::clone(&module));
            }
        }
        Ok(module)
    }

    /// Register every item in order, stopping at the first invalid spec.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError` if a spec cannot be resolved.
    pub fn register_all<I, T>(&mut self, items: I) -> Result<(), ModuleError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Registrable>,
    {
        for item in items {
            self.register(item)?;
        }
        Ok(())
    }

    /// Register whatever `source` discovers. A failed discovery, or a discovered spec that can't
    /// be resolved, is logged and skipped. Returns the number of modules registered.
    pub fn load_plugins(&mut self, source: &dyn PluginSource) -> usize {
        let found = match source.discover() {
            Ok(found) => found,
            Err(e) => {
                warn!("Failed to load plugins: {e}");
                return 0;
            }
        };
        if found.is_empty() {
            debug!("No plugins discovered");
        }

        let mut registered = 0;
        for item in found {
            match self.register(item) {
                Ok(_) => registered += 1,
                Err(e) => error!("Skipping plugin module: {e}"),
            }
        }
        registered
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<Module>> {
        self.index.get(id).map(|&position| &self.modules[position])
    }

    #[must_use]
    pub fn modules(&self) -> &[Arc<Module>] {
        &self.modules
    }

    #[must_use]
    pub fn module_ids(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.id()).collect()
    }

    #[must_use]
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Add one subcommand per registered module to `cli`, expanding nested actions.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError` if a nested spec is invalid.
    pub fn register_all_commands(&self, cli: clap::Command) -> Result<clap::Command, ModuleError> {
        self.modules
            .iter()
            .try_fold(cli.disable_help_subcommand(true), |cli, module| {
                Ok(cli.subcommand(build_command(module)?))
            })
    }

    /// Run the leaf module matched by `matches` with the given invocation options.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` if no registered command matches, or the task fails to run.
    pub fn dispatch(&self, matches: &ArgMatches, options: Options) -> Result<Outcome, DispatchError> {
        let (command, sub_matches) = matches.subcommand().ok_or(DispatchError::NoCommand)?;
        debug!("Command {command} invoked");
        let module = self
            .get(command)
            .ok_or_else(|| DispatchError::UnknownCommand(command.to_string()))?;
        dispatch_module(module, sub_matches, options)
    }
}

/// Parser command for `module`. Modules with sub-actions demand one of them, leaves take any
/// trailing tokens, hyphenated or not. Module commands may be named `help`, so the implicit
/// help subcommand is disabled.
///
/// # Errors
///
/// Returns `ModuleError` if a nested spec is invalid.
pub fn build_command(module: &Arc<Module>) -> Result<clap::Command, ModuleError> {
    let command = clap::Command::new(module.id().to_string())
        .about(module.describe().to_string())
        .disable_help_subcommand(true);
    if module.is_leaf() {
        return Ok(command.arg(
            Arg::new(ARGS)
                .value_name("ARGS")
                .num_args(1..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true),
        ));
    }

    let command = module
        .children()?
        .iter()
        .try_fold(command, |command, child| {
            Ok::<_, ModuleError>(command.subcommand(build_command(child)?))
        })?;
    Ok(command
        .subcommand_required(true)
        .arg_required_else_help(true))
}

/// Split raw command tokens into positional arguments and options.
///
/// `--key=value` and `--key value` set `key`, a `--key` followed by another option or by nothing
/// sets it to `true`. Values are typed with [`parse_value`]. Tokens after a bare `--` and tokens
/// with a single leading dash, like `-1`, are positional.
#[must_use]
pub fn split_invocation(tokens: Vec<String>) -> (Vec<String>, Options) {
    let mut args = Vec::new();
    let mut options = Options::new();
    let mut tokens = tokens.into_iter().peekable();
    while let Some(token) = tokens.next() {
        if token == "--" {
            args.extend(tokens);
            break;
        }
        let key = token.strip_prefix("--").unwrap_or_default();
        if key.is_empty() || key.starts_with('=') {
            args.push(token);
            continue;
        }
        let (key, value) = match key.split_once('=') {
            Some((key, value)) => (key.to_string(), parse_value(value)),
            None => {
                let value = tokens.next_if(|next| !next.starts_with("--"));
                (key.to_string(), value.map_or(true.into(), |value| parse_value(&value)))
            }
        };
        options.insert(key, value);
    }
    (args, options)
}

fn dispatch_module(
    module: &Arc<Module>,
    matches: &ArgMatches,
    mut options: Options,
) -> Result<Outcome, DispatchError> {
    if let Some((action, sub_matches)) = matches.subcommand() {
        let child = module
            .children()?
            .iter()
            .find(|child| child.id() == action)
            .ok_or_else(|| DispatchError::UnknownCommand(format!("{} {action}", module.id())))?;
        return dispatch_module(child, sub_matches, options);
    }

    let tokens = if module.is_leaf() {
        matches
            .get_many::<String>(ARGS)
            .map(|values| values.cloned().collect())
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    let (args, flags) = split_invocation(tokens);
    if !flags.is_empty() {
        debug!("Command options override: {flags:?}");
    }
    options.extend(flags);
    Ok(module.invoke(args, options)?)
}
