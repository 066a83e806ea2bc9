use std::fmt;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Reset, Style};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::modules::spec::Invocation;

const SUCCESS_COLOR: Style = Style::new().fg_color(Some(anstyle::Color::Ansi(AnsiColor::Green)));
const ERROR_COLOR: Style = Style::new().fg_color(Some(anstyle::Color::Ansi(AnsiColor::Red)));

/// Result shape of a shell execution helper: a non-zero `code` signals failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub code: i64,
    #[serde(default)]
    pub output: String,
}

/// What a handler reported back
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Outcome {
    /// The handler returned nothing in particular
    #[default]
    Unit,
    /// `before_task` stopped the run before the handler was called
    Skipped,
    Bool(bool),
    Exec(ExecResult),
    Value(Value),
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl Outcome {
    /// A task failed if it returned `false`, was skipped, or returned an object with a truthy
    /// `code`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Outcome::Unit => true,
            Outcome::Skipped => false,
            Outcome::Bool(ok) => *ok,
            Outcome::Exec(result) => result.code == 0,
            Outcome::Value(Value::Bool(ok)) => *ok,
            Outcome::Value(Value::Object(map)) => !map.get("code").is_some_and(is_truthy),
            Outcome::Value(_) => true,
        }
    }

    /// Captured output to show alongside a failure
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Outcome::Exec(result) if !result.output.is_empty() => Some(&result.output),
            Outcome::Value(Value::Object(map)) => map.get("output").and_then(Value::as_str),
            _ => None,
        }
    }
}

impl From<()> for Outcome {
    fn from((): ()) -> Self {
        Outcome::Unit
    }
}

impl From<bool> for Outcome {
    fn from(ok: bool) -> Self {
        Outcome::Bool(ok)
    }
}

impl From<ExecResult> for Outcome {
    fn from(result: ExecResult) -> Self {
        Outcome::Exec(result)
    }
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Outcome::Unit,
            Value::Bool(ok) => Outcome::Bool(ok),
            Value::Object(ref map) if map.get("code").is_some_and(Value::is_i64) => {
                serde_json::from_value::<ExecResult>(value.clone())
                    .map_or(Outcome::Value(value), Outcome::Exec)
            }
            other => Outcome::Value(other),
        }
    }
}

/// Renders durations like `0.4s` or `2m 3.1s`.
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let tenths = d.subsec_millis() / 100;
    if total_secs < 60 {
        format!("{total_secs}.{tenths}s")
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        format!("{mins}m {secs}.{tenths}s")
    }
}

/// Outcome of one task run, as passed to [`TaskHooks::after_task`]
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Task name, prefixed with the parent module's command
    pub task: String,
    pub success: bool,
    pub elapsed: Duration,
    pub output: Option<String>,
}

impl Report {
    #[must_use]
    pub fn new(task: String, outcome: &Outcome, elapsed: Duration) -> Self {
        Report {
            task,
            success: outcome.is_success(),
            elapsed,
            output: outcome.output().map(str::to_string),
        }
    }

    /// Log the result: success at info level, failure at error level with any output.
    pub fn log(&self) {
        if self.success {
            info!("{SUCCESS_COLOR}✓{Reset} {self}");
        } else {
            error!("{ERROR_COLOR}✘{Reset} {self}");
            if let Some(output) = &self.output {
                error!("{output}");
            }
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "succeeded" } else { "failed" };
        write!(f, "{} {status} in {}", self.task, format_duration(self.elapsed))
    }
}

/// Hooks wrapped around every task a module runs.
///
/// Both methods have defaults, so an implementation overrides only what it needs.
pub trait TaskHooks: Send + Sync {
    /// Called before the handler. Returning `Break` skips the handler and fails the run.
    fn before_task(&self, _task: &str, _invocation: &Invocation) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Called after the handler returns
    fn after_task(&self, report: &Report) {
        report.log();
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl TaskHooks for DefaultHooks {}

/// Per-invocation state of a module
#[derive(Debug, Default, Clone)]
pub(crate) struct TaskState {
    pub start: Option<Instant>,
    pub last: Option<Report>,
}

impl TaskState {
    pub fn elapsed(&self) -> Duration {
        self.start.map_or(Duration::ZERO, |start| start.elapsed())
    }
}
