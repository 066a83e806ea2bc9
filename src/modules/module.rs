use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::modules::config::{Inheritance, resolve_options};
use crate::modules::error::{ModuleError, TaskError};
use crate::modules::spec::{Handler, Invocation, MethodSpec, ModuleSpec, Options};
use crate::modules::task::{DefaultHooks, Outcome, Report, TaskHooks, TaskState};

/// Leaf commands are bound onto their hosting module, so they can't reuse these names
const RESERVED_PROPERTIES: [&str; 20] = [
    "id",
    "name",
    "command",
    "describe",
    "description",
    "config",
    "parent",
    "children",
    "builder",
    "handler",
    "actions",
    "methods",
    "mode",
    "hooks",
    "invoke",
    "run_task",
    "before_task",
    "after_task",
    "require_config",
    "require_tools",
];

/// What a module does when its command is matched, fixed at construction
pub enum Mode {
    /// Dispatches to child modules built from nested specs
    Composite(Vec<(String, ModuleSpec)>),
    /// Runs a handler through the task lifecycle
    Leaf(Handler),
    /// Dispatches to one synthesized leaf per named method
    MethodDispatch(Vec<MethodSpec>),
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Composite(actions) => f
                .debug_tuple("Composite")
                .field(&actions.iter().map(|(name, _)| name).collect::<Vec<_>>())
                .finish(),
            Mode::Leaf(_) => f.write_str("Leaf"),
            Mode::MethodDispatch(methods) => f
                .debug_tuple("MethodDispatch")
                .field(&methods.iter().map(|m| &m.name).collect::<Vec<_>>())
                .finish(),
        }
    }
}

fn child_command<'a>(action: &'a str, spec: &'a ModuleSpec) -> &'a str {
    if spec.command.is_empty() {
        action
    } else {
        &spec.command
    }
}

fn check_unique<'a>(
    parent: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), ModuleError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ModuleError::DuplicateAction {
                parent: parent.to_string(),
                action: name.to_string(),
            });
        }
    }
    Ok(())
}

/// A resolved command node.
///
/// Children of composite and method-dispatch modules are built on first use and owned by their
/// parent. A child only keeps a weak reference back to its parent, for reporting.
pub struct Module {
    id: String,
    name: String,
    describe: String,
    inherited: Inheritance,
    mode: Mode,
    parent: Weak<Module>,
    children: OnceLock<Vec<Arc<Module>>>,
    hooks: Arc<dyn TaskHooks>,
    state: Mutex<TaskState>,
}

impl Module {
    /// Resolve `spec` into a module, inheriting config and requirements from `parent`.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::MissingCommand` if `spec` has no command,
    /// `ModuleError::NoActionsHandlerOrMethods` if it has nothing to run,
    /// `ModuleError::CommandShadowsProperty` if a leaf command uses a reserved name, or
    /// `ModuleError::DuplicateAction` if two sub-actions share a name.
    pub fn new(spec: ModuleSpec, parent: Option<&Arc<Module>>) -> Result<Arc<Module>, ModuleError> {
        if spec.command.trim().is_empty() {
            return Err(ModuleError::MissingCommand);
        }
        debug!("Initializing module {} with {spec:?}...", spec.command);

        let ModuleSpec {
            command: id,
            name,
            describe,
            config,
            require_config,
            require_tools,
            actions,
            handler,
            methods,
            hooks,
        } = spec;

        let root = Inheritance::default();
        let inherited = parent
            .map_or(&root, |p| &p.inherited)
            .calculate(&id, &config, &require_config, &require_tools);

        let mode = if !actions.is_empty() {
            check_unique(&id, actions.iter().map(|(a, s)| child_command(a, s)))?;
            Mode::Composite(actions)
        } else if let Some(handler) = handler {
            if RESERVED_PROPERTIES.contains(&id.as_str()) {
                return Err(ModuleError::CommandShadowsProperty(id));
            }
            debug!("Decorating handler of {id} to be invoked with module hooks...");
            Mode::Leaf(handler)
        } else if methods.is_empty() {
            return Err(ModuleError::NoActionsHandlerOrMethods(id));
        } else {
            check_unique(&id, methods.iter().map(|m| m.name.as_str()))?;
            debug!(
                "No actions or handler, binding {} methods as subcommands ({})...",
                methods.len(),
                methods.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(", ")
            );
            Mode::MethodDispatch(methods)
        };

        let hooks = hooks
            .or_else(|| parent.map(|p| Arc::clone(&p.hooks)))
            .unwrap_or_else(|| Arc::new(DefaultHooks));

        Ok(Arc::new(Module {
            name: name.unwrap_or_else(|| id.clone()),
            describe: describe.unwrap_or_else(|| format!("Perform {id}")),
            id,
            inherited,
            mode,
            parent: parent.map(Arc::downgrade).unwrap_or_default(),
            children: OnceLock::new(),
            hooks,
            state: Mutex::new(TaskState::default()),
        }))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn describe(&self) -> &str {
        &self.describe
    }

    /// Own config merged over every ancestor's
    #[must_use]
    pub fn config(&self) -> &Options {
        self.inherited.config()
    }

    #[must_use]
    pub fn require_config(&self) -> &[String] {
        self.inherited.require_config()
    }

    #[must_use]
    pub fn require_tools(&self) -> &[String] {
        self.inherited.require_tools()
    }

    /// Commands from the top-level module down to this one
    #[must_use]
    pub fn entry_path(&self) -> &[String] {
        self.inherited.entry_path()
    }

    #[must_use]
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.mode, Mode::Leaf(_))
    }

    #[must_use]
    pub fn parent(&self) -> Option<Arc<Module>> {
        self.parent.upgrade()
    }

    /// Child modules, one per action or method, built on the first call.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError` if any nested spec is invalid.
    pub fn children(self: &Arc<Self>) -> Result<&[Arc<Module>], ModuleError> {
        if let Some(children) = self.children.get() {
            return Ok(children);
        }
        let built = self.build_children()?;
        Ok(self.children.get_or_init(|| built))
    }

    fn build_children(self: &Arc<Self>) -> Result<Vec<Arc<Module>>, ModuleError> {
        match &self.mode {
            Mode::Leaf(_) => Ok(Vec::new()),
            Mode::Composite(actions) => {
                debug!(
                    "Building subcommands of {} [{}]...",
                    self.id,
                    actions
                        .iter()
                        .map(|(action, _)| action.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                actions
                    .iter()
                    .map(|(action, spec)| {
                        let mut spec = spec.clone();
                        if spec.command.is_empty() {
                            spec.command.clone_from(action);
                        }
                        Module::new(spec, Some(self))
                    })
                    .collect()
            }
            Mode::MethodDispatch(methods) => methods
                .iter()
                .map(|method| {
                    let describe = method
                        .description
                        .clone()
                        .unwrap_or_else(|| format!("Performs {}", method.name));
                    let spec = ModuleSpec::new(method.name.clone())
                        .describe(describe)
                        .handler_arc(Arc::clone(&method.handler));
                    Module::new(spec, Some(self))
                })
                .collect(),
        }
    }

    /// Run this module's handler with positional `args` and keyword `options`.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::NotRunnable` if this module is not a leaf, or any error from
    /// [`Module::run_task`].
    pub fn invoke(&self, args: Vec<String>, options: Options) -> Result<Outcome, TaskError> {
        debug!("Invoking {} with args {args:?}, {options:?}...", self.id);
        self.run_task(&self.id, Invocation::new(args, options))
    }

    /// Run the handler between the `before_task` and `after_task` hooks. Config placeholders
    /// are resolved against the invocation options right before the handler is called.
    ///
    /// A handler reporting failure through its outcome is not an error; the outcome is reported
    /// and returned.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::NotRunnable` if this module is not a leaf,
    /// `TaskError::Substitution` if a config placeholder is unresolved, or
    /// `TaskError::Handler` if the handler itself fails.
    pub fn run_task(&self, task: &str, invocation: Invocation) -> Result<Outcome, TaskError> {
        let Mode::Leaf(handler) = &self.mode else {
            return Err(TaskError::NotRunnable(self.id.clone()));
        };

        self.state.lock().start = Some(Instant::now());
        if self.hooks.before_task(task, &invocation).is_break() {
            let report_name = self.report_name(task);
            warn!("Task {report_name} skipped");
            let report = Report::new(report_name, &Outcome::Skipped, self.state.lock().elapsed());
            self.state.lock().last = Some(report);
            return Ok(Outcome::Skipped);
        }

        debug!("Applying task {task} to {}...", self.name);
        let options = resolve_options(self.config(), &invocation.options)?;
        let resolved = Invocation::new(invocation.args, options);
        let outcome = handler(task, &resolved).map_err(|source| TaskError::Handler {
            task: self.report_name(task),
            source,
        })?;

        let report = Report::new(self.report_name(task), &outcome, self.state.lock().elapsed());
        self.hooks.after_task(&report);
        self.state.lock().last = Some(report);
        Ok(outcome)
    }

    fn report_name(&self, task: &str) -> String {
        match self.parent() {
            Some(parent) => format!("{} {task}", parent.id),
            None => task.to_string(),
        }
    }

    /// Report of the most recent run, if any
    #[must_use]
    pub fn last_report(&self) -> Option<Report> {
        self.state.lock().last.clone()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("describe", &self.describe)
            .field("config", self.config())
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::task::ExecResult;
    use serde_json::{Value, json};
    use std::ops::ControlFlow;

    fn noop() -> impl Fn(&str, &Invocation) -> crate::modules::spec::HandlerResult + Send + Sync {
        |_, _| Ok(Outcome::Unit)
    }

    fn options(value: Value) -> Options {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        skip: bool,
        before: Mutex<Vec<String>>,
        reports: Mutex<Vec<Report>>,
    }

    impl TaskHooks for RecordingHooks {
        fn before_task(&self, task: &str, _invocation: &Invocation) -> ControlFlow<()> {
            self.before.lock().push(task.to_string());
            if self.skip {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }

        fn after_task(&self, report: &Report) {
            self.reports.lock().push(report.clone());
        }
    }

    #[test]
    fn test_created_with_handler() {
        let module = Module::new(ModuleSpec::new("foo").handler(noop()), None).unwrap();
        assert_eq!(module.id(), "foo");
        assert_eq!(module.name(), "foo");
        assert_eq!(module.describe(), "Perform foo");
        assert!(module.is_leaf());
        assert!(module.config().is_empty());
    }

    #[test]
    fn test_created_with_actions() {
        let spec = ModuleSpec::new("foo").action("bar", ModuleSpec::new("bar").handler(noop()));
        let module = Module::new(spec, None).unwrap();
        assert!(matches!(module.mode(), Mode::Composite(_)));
        assert_eq!(module.children().unwrap()[0].id(), "bar");
    }

    #[test]
    fn test_created_with_methods() {
        let spec = ModuleSpec::new("foo")
            .describe("Foo things")
            .method(MethodSpec::new("bar", noop()))
            .method(MethodSpec::new("baz", noop()).describe("Bazzes the foo"));
        let module = Module::new(spec, None).unwrap();
        assert!(matches!(module.mode(), Mode::MethodDispatch(_)));
        assert_eq!(module.describe(), "Foo things");

        let children = module.children().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].describe(), "Performs bar");
        assert_eq!(children[1].describe(), "Bazzes the foo");
        assert!(children.iter().all(|c| c.is_leaf()));
    }

    #[test]
    fn test_missing_command() {
        let err = Module::new(ModuleSpec::default().handler(noop()), None).unwrap_err();
        assert_eq!(err, ModuleError::MissingCommand);
        let err = Module::new(ModuleSpec::new("  ").handler(noop()), None).unwrap_err();
        assert_eq!(err, ModuleError::MissingCommand);
    }

    #[test]
    fn test_no_actions_handler_or_methods() {
        let err = Module::new(ModuleSpec::new("foo"), None).unwrap_err();
        assert_eq!(err, ModuleError::NoActionsHandlerOrMethods("foo".to_string()));
    }

    #[test]
    fn test_command_cannot_shadow_property() {
        let err = Module::new(ModuleSpec::new("config").handler(noop()), None).unwrap_err();
        assert_eq!(err, ModuleError::CommandShadowsProperty("config".to_string()));

        // Composite modules are not bound onto a host
        let spec = ModuleSpec::new("config").action("show", ModuleSpec::new("").handler(noop()));
        assert!(Module::new(spec, None).is_ok());
    }

    #[test]
    fn test_duplicate_actions_rejected() {
        let spec = ModuleSpec::new("foo")
            .method(MethodSpec::new("bar", noop()))
            .method(MethodSpec::new("bar", noop()));
        let err = Module::new(spec, None).unwrap_err();
        assert_eq!(
            err,
            ModuleError::DuplicateAction {
                parent: "foo".to_string(),
                action: "bar".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_action_commands_rejected() {
        let spec = ModuleSpec::new("foo")
            .action("a", ModuleSpec::new("").handler(noop()))
            .action("b", ModuleSpec::new("a").handler(noop()))
            .action("c", ModuleSpec::new("").handler(noop()));
        let err = Module::new(spec, None).unwrap_err();
        assert_eq!(
            err,
            ModuleError::DuplicateAction {
                parent: "foo".to_string(),
                action: "a".to_string()
            }
        );
    }

    #[test]
    fn test_actions_take_priority_over_handler() {
        let spec = ModuleSpec::new("foo")
            .handler(noop())
            .action("bar", ModuleSpec::new("").handler(noop()));
        let module = Module::new(spec, None).unwrap();
        assert!(matches!(module.mode(), Mode::Composite(_)));
    }

    #[test]
    fn test_composite_children_point_back_and_inherit() {
        let spec = ModuleSpec::new("root")
            .config("shared", "parent")
            .config("override", "parent")
            .action("a", ModuleSpec::new("").handler(noop()))
            .action("b", ModuleSpec::new("").config("override", "b").handler(noop()))
            .action("c", ModuleSpec::new("").handler(noop()));
        let module = Module::new(spec, None).unwrap();
        let children = module.children().unwrap();

        assert_eq!(children.len(), 3);
        let ids: Vec<&str> = children.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        for child in children {
            let parent = child.parent().unwrap();
            assert!(Arc::ptr_eq(&parent, &module));
            assert_eq!(child.config()["shared"], json!("parent"));
        }
        assert_eq!(children[0].config()["override"], json!("parent"));
        assert_eq!(children[1].config()["override"], json!("b"));
    }

    #[test]
    fn test_children_are_built_once() {
        let spec = ModuleSpec::new("root").action("a", ModuleSpec::new("").handler(noop()));
        let module = Module::new(spec, None).unwrap();
        let first = Arc::clone(&module.children().unwrap()[0]);
        let second = Arc::clone(&module.children().unwrap()[0]);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_grandchild_inherits_transitively() {
        let spec = ModuleSpec::new("gp")
            .config("a", "gp")
            .config("b", "gp")
            .require_tool("git")
            .action(
                "p",
                ModuleSpec::new("")
                    .config("b", "p")
                    .require_config("token")
                    .action("c", ModuleSpec::new("").handler(noop())),
            );
        let module = Module::new(spec, None).unwrap();
        let parent = Arc::clone(&module.children().unwrap()[0]);
        let child = Arc::clone(&parent.children().unwrap()[0]);

        assert_eq!(Value::Object(child.config().clone()), json!({"a": "gp", "b": "p"}));
        assert_eq!(child.require_tools(), ["git".to_string()]);
        assert_eq!(child.require_config(), ["token".to_string()]);
        assert_eq!(child.entry_path(), ["gp", "p", "c"]);
    }

    #[test]
    fn test_handler_observes_substituted_config() {
        let seen = Arc::new(Mutex::new(None));
        let recorded = Arc::clone(&seen);
        let spec = ModuleSpec::new("foo").config("k", "${a}").handler(move |_, invocation| {
            *recorded.lock() = invocation.option("k").cloned();
            Ok(Outcome::Unit)
        });
        let module = Module::new(spec, None).unwrap();
        let outcome = module.invoke(vec![], options(json!({"a": "bar"}))).unwrap();

        assert_eq!(outcome, Outcome::Unit);
        assert_eq!(*seen.lock(), Some(json!("bar")));
    }

    #[test]
    fn test_handler_receives_task_name_and_args() {
        let spec = ModuleSpec::new("echo").handler(|task, invocation| {
            assert_eq!(task, "echo");
            Ok(Outcome::from(invocation.args.len() == 2))
        });
        let module = Module::new(spec, None).unwrap();
        let outcome = module
            .invoke(vec!["x".to_string(), "y".to_string()], Options::new())
            .unwrap();
        assert!(outcome.is_success());
    }

    #[test]
    fn test_unresolved_placeholder_aborts_before_handler() {
        let spec = ModuleSpec::new("foo")
            .config("k", "${missing}")
            .handler(|_, _| panic!("handler must not run"));
        let module = Module::new(spec, None).unwrap();
        let err = module.invoke(vec![], Options::new()).unwrap_err();
        assert!(matches!(err, TaskError::Substitution(_)));
    }

    #[test]
    fn test_reports_prefixed_with_parent_command() {
        let hooks = Arc::new(RecordingHooks::default());
        let spec = ModuleSpec::new("parent").hooks(hooks.clone()).action(
            "child",
            ModuleSpec::new("").handler(|_, _| {
                Ok(ExecResult {
                    code: 7,
                    output: "broken".to_string(),
                }
                .into())
            }),
        );
        let module = Module::new(spec, None).unwrap();
        let child = Arc::clone(&module.children().unwrap()[0]);
        let outcome = child.invoke(vec![], Options::new()).unwrap();

        assert!(!outcome.is_success());
        let reports = hooks.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].task, "parent child");
        assert!(!reports[0].success);
        assert_eq!(reports[0].output.as_deref(), Some("broken"));
        assert_eq!(*hooks.before.lock(), vec!["child".to_string()]);
    }

    #[test]
    fn test_before_task_can_skip() {
        let hooks = Arc::new(RecordingHooks {
            skip: true,
            ..Default::default()
        });
        let spec = ModuleSpec::new("foo")
            .hooks(hooks.clone())
            .handler(|_, _| panic!("handler must not run"));
        let module = Module::new(spec, None).unwrap();
        let outcome = module.invoke(vec![], Options::new()).unwrap();

        assert_eq!(outcome, Outcome::Skipped);
        assert!(hooks.reports.lock().is_empty());
        assert!(!module.last_report().unwrap().success);
    }

    #[test]
    fn test_handler_error_propagates() {
        let hooks = Arc::new(RecordingHooks::default());
        let spec = ModuleSpec::new("foo")
            .hooks(hooks.clone())
            .handler(|_, _| Err("crashed".into()));
        let module = Module::new(spec, None).unwrap();
        let err = module.invoke(vec![], Options::new()).unwrap_err();

        assert!(matches!(err, TaskError::Handler { ref task, .. } if task == "foo"));
        assert!(hooks.reports.lock().is_empty());
    }

    #[test]
    fn test_composite_is_not_runnable() {
        let spec = ModuleSpec::new("root").action("a", ModuleSpec::new("").handler(noop()));
        let module = Module::new(spec, None).unwrap();
        let err = module.invoke(vec![], Options::new()).unwrap_err();
        assert!(matches!(err, TaskError::NotRunnable(ref id) if id == "root"));
    }

    #[test]
    fn test_elapsed_time_is_measured_per_run() {
        let spec = ModuleSpec::new("sleep").handler(|_, _| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(Outcome::Unit)
        });
        let module = Module::new(spec, None).unwrap();
        assert!(module.last_report().is_none());

        module.invoke(vec![], Options::new()).unwrap();
        let first = module.last_report().unwrap();
        assert!(first.success);
        assert!(first.elapsed >= std::time::Duration::from_millis(5));

        module.invoke(vec![], Options::new()).unwrap();
        assert!(module.last_report().unwrap().elapsed >= std::time::Duration::from_millis(5));
    }
}
