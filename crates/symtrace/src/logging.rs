//! Logger setup and step-numbered progress messages.
//!
//! Everything logs through the `log` facade under the [`LOG_TARGET`] family of targets.
//! [`init_logging`] installs an `env_logger` formatter on stderr, optionally duplicated into a
//! file. Setting [`SKIP_HANDLERS_ENV`] leaves handler installation to the embedder. Step
//! numbering is owned by a [`StepCounter`] that the compile session passes around.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use log::{Level, LevelFilter};

use crate::config::env_flag;

/// Root target for engine messages.
pub const LOG_TARGET: &str = "symtrace";
/// Target for per-node graph construction messages.
pub const GRAPH_TARGET: &str = "symtrace::graph";
/// Target for generated graphs and guards. Sits between debug and info in verbosity.
pub const CODE_TARGET: &str = "symtrace::code";
/// Level used for [`CODE_TARGET`] output.
pub const CODE_LEVEL: Level = Level::Debug;

/// When set to a true value, [`init_logging`] only applies the level.
pub const SKIP_HANDLERS_ENV: &str = "SYMTRACE_SKIP_LOG_HANDLERS";

/// Installs the stderr formatter and applies `level` to the engine targets.
///
/// Handlers are skipped when [`SKIP_HANDLERS_ENV`] is set, so loggers installed by a test
/// harness keep working.
pub fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> io::Result<()> {
    init_logging_with(level, log_file, !env_flag(SKIP_HANDLERS_ENV, false))
}

/// Like [`init_logging`], with handler installation decided by the caller.
///
/// With `install_handlers` false nothing is installed and `log_file` is not created.
pub fn init_logging_with(
    level: LevelFilter,
    log_file: Option<&Path>,
    install_handlers: bool,
) -> io::Result<()> {
    if install_handlers {
        let file = match log_file {
            Some(path) => Some(Mutex::new(File::create(path)?)),
            None => None,
        };
        let mut builder = env_logger::Builder::new();
        builder
            .filter_level(LevelFilter::Warn)
            .filter_module(LOG_TARGET, level)
            .format(move |buf, record| {
                let line = format!(
                    "{}: [{}] [{}] {}",
                    record.target(),
                    record.level(),
                    buf.timestamp(),
                    record.args()
                );
                if let Some(file) = &file {
                    if let Ok(mut file) = file.lock() {
                        let _ = writeln!(file, "{line}");
                    }
                }
                writeln!(buf, "{line}")
            });
        // A logger may already be installed by the embedding application.
        let _ = builder.try_init();
    }
    set_loggers_level(level);
    Ok(())
}

/// Sets the global max level used by the engine targets.
pub fn set_loggers_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Sequential step numbering for one compilation session.
#[derive(Debug)]
pub struct StepCounter {
    next: u32,
}

impl Default for StepCounter {
    fn default() -> Self {
        StepCounter { next: 1 }
    }
}

impl StepCounter {
    pub fn new() -> Self {
        StepCounter::default()
    }

    /// Claims the next step number and returns a logger that prefixes it.
    pub fn step_logger(&mut self, target: &'static str) -> StepLogger {
        let step = self.next;
        self.next += 1;
        StepLogger { target, step }
    }

    /// Number the next claimed step will receive.
    pub fn peek(&self) -> u32 {
        self.next
    }
}

/// Logs messages prefixed with a fixed step number.
#[derive(Debug, Clone, Copy)]
pub struct StepLogger {
    target: &'static str,
    step: u32,
}

impl StepLogger {
    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn format(&self, msg: &str) -> String {
        format!("Step {}: {msg}", self.step)
    }

    pub fn log(&self, level: Level, msg: &str) {
        log::log!(target: self.target, level, "{}", self.format(msg));
    }
}
