//! JSON file backed persistent configuration

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use log::{debug, error};
use serde_json::Value;
use thiserror::Error;

use crate::modules::Options;
use crate::modules::config::expand_home;

/// Where the configuration lives unless `--config` says otherwise
pub const DEFAULT_CONFIG_PATH: &str = "~/.oi/config.json";

/// Errors that can occur while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to parse JSON config file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Config file {0} does not contain a JSON object")]
    NotAnObject(PathBuf),
    #[error("Invalid option `{0}`, expected KEY=VALUE")]
    InvalidDefine(String),
}

/// A JSON object stored in a file, created empty on first access
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: &str) -> Self {
        JsonFile {
            path: PathBuf::from(expand_home(path)),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Make sure the file and its parent directory exist.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be created.
    pub fn touch(&self) -> Result<(), ConfigError> {
        debug!("Touching file {}...", self.path.display());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }

    /// Read the stored object. An empty file reads as an empty object.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be created or read, `ConfigError::Json` if it
    /// is not valid JSON, or `ConfigError::NotAnObject` if it holds something else than an object.
    pub fn read(&self) -> Result<Options, ConfigError> {
        debug!("Reading file {}...", self.path.display());
        self.touch()?;
        let contents = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        if contents.trim().is_empty() {
            return Ok(Options::new());
        }
        match serde_json::from_str(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ConfigError::NotAnObject(self.path.clone())),
            Err(source) => Err(ConfigError::Json {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Like [`JsonFile::read`], but logs failures and falls back to an empty object.
    #[must_use]
    pub fn read_or_default(&self) -> Options {
        self.read().unwrap_or_else(|e| {
            error!("Failed to read config: {e}");
            Options::new()
        })
    }

    /// Store `value` under `key`, keeping every other entry.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read back or written.
    pub fn append(&self, key: &str, value: Value) -> Result<(), ConfigError> {
        debug!("Appending {{\"{key}\": {value}}} to file {}...", self.path.display());
        let mut options = self.read()?;
        options.insert(key.to_string(), value);
        let contents = serde_json::to_string_pretty(&options).map_err(|source| ConfigError::Json {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, contents).map_err(|e| self.io_error(e))?;
        debug!("Updated file {}", self.path.display());
        Ok(())
    }
}

/// Parse a `KEY=VALUE` override, typing the value with [`parse_value`].
///
/// # Errors
///
/// Returns `ConfigError::InvalidDefine` if there is no `=` or the key is empty.
pub fn parse_define(define: &str) -> Result<(String, Value), ConfigError> {
    let (key, value) = define
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .ok_or_else(|| ConfigError::InvalidDefine(define.to_string()))?;
    Ok((key.trim().to_string(), parse_value(value)))
}

/// Values that parse as JSON keep their type, anything else is a plain string
#[must_use]
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
