//! Modules shipped with the `oi` binary

use serde_json::Value;

use crate::config_file::{DEFAULT_CONFIG_PATH, JsonFile, parse_define};
use crate::modules::{HandlerError, Invocation, MethodSpec, ModuleSpec, Outcome};

/// Invocation option holding the path of the persistent config file
pub const CONFIG_OPTION: &str = "config";

fn config_file(invocation: &Invocation) -> JsonFile {
    JsonFile::new(invocation.option_str(CONFIG_OPTION).unwrap_or(DEFAULT_CONFIG_PATH))
}

fn required_arg<'a>(invocation: &'a Invocation, index: usize, name: &str) -> Result<&'a str, HandlerError> {
    invocation
        .arg(index)
        .ok_or_else(|| format!("missing <{name}> argument").into())
}

fn print_json(value: &Value) -> Result<(), HandlerError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `oi config <list|get|set|path>`: read and update the persistent configuration
#[must_use]
pub fn config_module() -> ModuleSpec {
    ModuleSpec::new(CONFIG_OPTION)
        .name("Config")
        .describe("Read and update the persistent configuration")
        .method(
            MethodSpec::new("list", |_, invocation| {
                let options = config_file(invocation).read()?;
                print_json(&Value::Object(options))?;
                Ok(Outcome::Unit)
            })
            .describe("Print every stored entry"),
        )
        .method(
            MethodSpec::new("get", |_, invocation| {
                let key = required_arg(invocation, 0, "key")?;
                match config_file(invocation).read()?.get(key) {
                    Some(value) => {
                        print_json(value)?;
                        Ok(Outcome::Unit)
                    }
                    None => {
                        log::error!("No config entry named {key}");
                        Ok(Outcome::Bool(false))
                    }
                }
            })
            .describe("Print one stored entry"),
        )
        .method(
            MethodSpec::new("set", |_, invocation| {
                let key = required_arg(invocation, 0, "key")?;
                let value = required_arg(invocation, 1, "value")?;
                let (key, value) = parse_define(&format!("{key}={value}"))?;
                config_file(invocation).append(&key, value)?;
                Ok(Outcome::Unit)
            })
            .describe("Store an entry; JSON values keep their type"),
        )
        .method(
            MethodSpec::new("path", |_, invocation| {
                println!("{}", config_file(invocation).path().display());
                Ok(Outcome::Unit)
            })
            .describe("Print the location of the config file"),
        )
}

/// `oi options [KEYS...]`: print the options a handler would receive
#[must_use]
pub fn options_module() -> ModuleSpec {
    ModuleSpec::new("options")
        .describe("Print the resolved invocation options")
        .handler(|_, invocation| {
            let mut options = invocation.options.clone();
            if !invocation.args.is_empty() {
                options.retain(|key, _| invocation.args.contains(key));
            }
            print_json(&Value::Object(options))?;
            Ok(Outcome::Unit)
        })
}

/// Every built-in module, in help order
#[must_use]
pub fn modules() -> Vec<ModuleSpec> {
    vec![config_module(), options_module()]
}
