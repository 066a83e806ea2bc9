use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::modules::task::{Outcome, TaskHooks};

/// String-keyed configuration or invocation options
pub type Options = serde_json::Map<String, Value>;

/// Error returned by a user-supplied handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<Outcome, HandlerError>;

/// A leaf action, called with the task name and the resolved invocation
pub type Handler = Arc<dyn Fn(&str, &Invocation) -> HandlerResult + Send + Sync>;

/// Arguments handed to a handler: positional arguments following the command path, and the
/// keyword options with config placeholders already resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub options: Options,
}

impl Invocation {
    #[must_use]
    pub fn new(args: Vec<String>, options: Options) -> Self {
        Invocation { args, options }
    }

    /// Positional argument at `index`, if given
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// String option, or `None` when missing or not a string
    #[must_use]
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// A named sub-action of a method-dispatch module
#[derive(Clone)]
pub struct MethodSpec {
    pub name: String,
    pub description: Option<String>,
    pub handler: Handler,
}

impl MethodSpec {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&str, &Invocation) -> HandlerResult + Send + Sync + 'static,
    {
        MethodSpec {
            name: name.into(),
            description: None,
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Debug for MethodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Authoring-time description of a command node.
///
/// Exactly one of `actions`, `handler` or `methods` decides what the resolved module does, checked
/// in that order. A spec with none of them is rejected when resolved.
#[derive(Clone, Default)]
pub struct ModuleSpec {
    pub command: String,
    pub name: Option<String>,
    pub describe: Option<String>,
    pub config: Options,
    pub require_config: Vec<String>,
    pub require_tools: Vec<String>,
    /// Nested sub-commands, in declaration order
    pub actions: Vec<(String, ModuleSpec)>,
    pub handler: Option<Handler>,
    pub methods: Vec<MethodSpec>,
    /// Lifecycle hooks, inherited from the parent module when unset
    pub hooks: Option<Arc<dyn TaskHooks>>,
}

impl ModuleSpec {
    pub fn new(command: impl Into<String>) -> Self {
        ModuleSpec {
            command: command.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn describe(mut self, describe: impl Into<String>) -> Self {
        self.describe = Some(describe.into());
        self
    }

    #[must_use]
    pub fn config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn require_config(mut self, key: impl Into<String>) -> Self {
        self.require_config.push(key.into());
        self
    }

    #[must_use]
    pub fn require_tool(mut self, tool: impl Into<String>) -> Self {
        self.require_tools.push(tool.into());
        self
    }

    /// Adds a nested sub-command. The action name becomes the child's command unless the child
    /// spec already carries one.
    #[must_use]
    pub fn action(mut self, name: impl Into<String>, spec: ModuleSpec) -> Self {
        self.actions.push((name.into(), spec));
        self
    }

    #[must_use]
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Invocation) -> HandlerResult + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn handler_arc(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub fn method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn TaskHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }
}

impl fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSpec")
            .field("command", &self.command)
            .field("name", &self.name)
            .field("describe", &self.describe)
            .field("config", &self.config)
            .field("require_config", &self.require_config)
            .field("require_tools", &self.require_tools)
            .field("actions", &self.actions)
            .field("handler", &self.handler.is_some())
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_preserves_action_order() {
        let spec = ModuleSpec::new("root")
            .action("c", ModuleSpec::new(""))
            .action("a", ModuleSpec::new(""))
            .action("b", ModuleSpec::new(""));
        let names: Vec<&str> = spec.actions.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_invocation_accessors() {
        let mut options = Options::new();
        options.insert("dir".to_string(), json!("/tmp"));
        options.insert("count".to_string(), json!(3));
        let invocation = Invocation::new(vec!["first".to_string()], options);
        assert_eq!(invocation.arg(0), Some("first"));
        assert_eq!(invocation.arg(1), None);
        assert_eq!(invocation.option_str("dir"), Some("/tmp"));
        assert_eq!(invocation.option_str("count"), None);
        assert_eq!(invocation.option("count"), Some(&json!(3)));
    }
}
