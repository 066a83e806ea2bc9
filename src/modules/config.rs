use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::modules::spec::Options;

/// Matches `${name}` placeholders in config strings
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubstitutionError {
    #[error("Unresolved placeholder ${{{placeholder}}} in config value `{key}`")]
    UnresolvedPlaceholder { key: String, placeholder: String },
}

/// Expand a leading `~` to the current user's home directory.
#[must_use]
pub fn expand_home(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{rest}", home.display()),
        None => path.to_string(),
    }
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Replace every `${name}` in `template` with `options[name]`.
///
/// # Errors
///
/// Returns `SubstitutionError::UnresolvedPlaceholder` if a name is missing from `options` or
/// maps to `null`.
pub fn substitute(key: &str, template: &str, options: &Options) -> Result<String, SubstitutionError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let replacement = options.get(name.as_str()).and_then(render).ok_or_else(|| {
            SubstitutionError::UnresolvedPlaceholder {
                key: key.to_string(),
                placeholder: name.as_str().to_string(),
            }
        })?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(&replacement);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Final value of `key` for one invocation.
///
/// Keys absent from `local` come straight from `options`. Non-string local values are used as
/// they are. Local strings get their placeholders filled from `options` and a leading `~`
/// expanded.
///
/// # Errors
///
/// Returns `SubstitutionError` if a placeholder cannot be resolved.
pub fn resolve(local: &Options, options: &Options, key: &str) -> Result<Option<Value>, SubstitutionError> {
    let Some(value) = local.get(key) else {
        return Ok(options.get(key).cloned());
    };
    let Value::String(template) = value else {
        debug!("Substituting non-string config value {key} not supported");
        return Ok(Some(value.clone()));
    };

    let resolved = expand_home(&substitute(key, template, options)?);
    if resolved != *template {
        debug!("Substituting config {key}: {template} => {resolved}");
    }
    Ok(Some(Value::String(resolved)))
}

/// Resolve every invocation option and every local config entry, merging both into the options
/// a handler receives.
///
/// # Errors
///
/// Returns `SubstitutionError` if any placeholder cannot be resolved.
pub fn resolve_options(local: &Options, options: &Options) -> Result<Options, SubstitutionError> {
    let mut resolved = Options::new();
    for key in options.keys().chain(local.keys()) {
        if resolved.contains_key(key) {
            continue;
        }
        if let Some(value) = resolve(local, options, key)? {
            resolved.insert(key.clone(), value);
        }
    }
    Ok(resolved)
}

/// Scope a module inherits from its ancestors
#[derive(Debug, Default, Clone)]
pub struct Inheritance {
    config: Options,
    require_config: Vec<String>,
    require_tools: Vec<String>,
    entry_path: Vec<String>,
}

fn merge_requirements(inherited: &[String], own: &[String]) -> Vec<String> {
    let mut merged = inherited.to_vec();
    for item in own {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

impl Inheritance {
    /// Scope of a child named `command` declaring its own config and requirements. Child config
    /// keys win over inherited ones; nested values are replaced, not merged.
    #[must_use]
    pub fn calculate(
        &self,
        command: &str,
        config: &Options,
        require_config: &[String],
        require_tools: &[String],
    ) -> Inheritance {
        let mut merged = self.config.clone();
        merged.extend(config.clone());
        Inheritance {
            config: merged,
            require_config: merge_requirements(&self.require_config, require_config),
            require_tools: merge_requirements(&self.require_tools, require_tools),
            entry_path: self.merge_entry_path(command),
        }
    }

    fn merge_entry_path(&self, entry: &str) -> Vec<String> {
        let mut new_entry_path = self.entry_path.clone();
        new_entry_path.push(entry.to_string());
        new_entry_path
    }

    #[must_use]
    pub fn config(&self) -> &Options {
        &self.config
    }

    #[must_use]
    pub fn require_config(&self) -> &[String] {
        &self.require_config
    }

    #[must_use]
    pub fn require_tools(&self) -> &[String] {
        &self.require_tools
    }

    /// Commands from the root down to this scope
    #[must_use]
    pub fn entry_path(&self) -> &[String] {
        &self.entry_path
    }
}
