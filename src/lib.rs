//! Core implementation of the Oi command line tool
//!
//! Oi builds its command line from declarative module specs: named commands with nested
//! actions, handlers or methods, each carrying configuration that flows down to its children.
//! Built-in modules and plugin-provided modules are collected in a [`Registry`], which binds
//! them to a clap command tree and dispatches the matched command through a uniform task
//! lifecycle.

use log::debug;

use crate::config_file::{ConfigError, JsonFile, parse_define};
use crate::modules::{ModuleError, Options};
use crate::registry::{PluginSource, Registry};

pub mod builtin;
pub mod config_file;
pub mod logger;
pub mod modules;
pub mod registry;

/// Assemble the registry from the built-in modules followed by whatever `plugins` provides.
///
/// # Errors
///
/// Returns `ModuleError` if a built-in module is invalid. Plugin failures are logged and
/// skipped.
pub fn build_registry(plugins: &dyn PluginSource) -> Result<Registry, ModuleError> {
    let mut registry = Registry::new();
    registry.register_all(builtin::modules())?;
    let loaded = registry.load_plugins(plugins);
    debug!(
        "Registered {} modules ({loaded} from plugins): [{}]",
        registry.len(),
        registry.module_ids().join(", ")
    );
    Ok(registry)
}

/// Invocation options: the stored configuration at `config_path`, overridden by `KEY=VALUE`
/// defines. The config file location itself is available as the `config` option.
///
/// # Errors
///
/// Returns `ConfigError::InvalidDefine` if a define is malformed.
pub fn load_options(config_path: &str, defines: &[String]) -> Result<Options, ConfigError> {
    let file = JsonFile::new(config_path);
    let mut options = file.read_or_default();
    options.insert(
        builtin::CONFIG_OPTION.to_string(),
        file.path().display().to_string().into(),
    );
    for define in defines {
        let (key, value) = parse_define(define)?;
        options.insert(key, value);
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleSpec;
    use crate::registry::StaticPlugins;
    use serde_json::json;

    #[test]
    fn test_plugins_follow_builtins() {
        let plugins = StaticPlugins::new(vec![
            ModuleSpec::new("deploy").handler(|_, _| Ok(().into())),
        ]);
        let registry = build_registry(&plugins).unwrap();
        assert_eq!(registry.module_ids(), vec!["config", "options", "deploy"]);
    }

    #[test]
    fn test_defines_override_stored_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"env": "dev", "region": "eu"}"#).unwrap();

        let options = load_options(&path.to_string_lossy(), &["env=prod".to_string()]).unwrap();
        assert_eq!(options["env"], json!("prod"));
        assert_eq!(options["region"], json!("eu"));
        assert_eq!(options["config"], json!(path.to_string_lossy()));
    }
}
