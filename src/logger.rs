use std::io::{IsTerminal, Write};
use std::time::Instant;

use anstyle::{AnsiColor, Reset, Style};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

struct OiLogger {
    filter: LevelFilter,
    start: Instant,
    color: bool,
}

impl Log for OiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut stderr = std::io::stderr().lock();
        let elapsed = self.start.elapsed().as_secs_f64();
        let style = if self.color {
            level_style(record.level())
        } else {
            Style::new()
        };
        let _ = if self.filter >= LevelFilter::Debug {
            writeln!(
                stderr,
                "[{elapsed:.3}s] {style}{:5}{Reset} {} {}",
                record.level(),
                record.target(),
                record.args()
            )
        } else if record.level() <= Level::Warn {
            writeln!(stderr, "{style}{}{Reset}: {}", record.level(), record.args())
        } else {
            writeln!(stderr, "{}", record.args())
        };
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn filter_from_env(debug: bool) -> LevelFilter {
    if debug {
        return LevelFilter::Debug;
    }
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Initialize the global logger, writing to stderr. `debug` forces debug level, otherwise the
/// level comes from `RUST_LOG` and defaults to info.
///
/// # Errors
///
/// Returns `SetLoggerError` if a logger was already installed.
pub fn init(debug: bool) -> Result<(), SetLoggerError> {
    let filter = filter_from_env(debug);
    let logger = OiLogger {
        filter,
        start: Instant::now(),
        color: std::io::stderr().is_terminal(),
    };

    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(filter);
    log::debug!("Initialised log with level {filter}");
    Ok(())
}

/// Terminal style for a log level's label
#[must_use]
pub fn level_style(level: Level) -> Style {
    let color = match level {
        Level::Error => AnsiColor::Red,
        Level::Warn => AnsiColor::Yellow,
        Level::Info => AnsiColor::Blue,
        Level::Debug | Level::Trace => AnsiColor::BrightBlack,
    };
    Style::new().fg_color(Some(anstyle::Color::Ansi(color)))
}
