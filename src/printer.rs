// src/printer.rs

//! User-facing progress lines for transfers
//!
//! A [`Printer`] receives one line per transfer step ("transferring version
//! ...", "...resource 0 chart[helmChart] (copy)"). It is separate from the
//! error channel so partial progress stays visible when a transfer fails, and
//! separate from `tracing`, which carries operator diagnostics.
//!
//! Implementations:
//! - `SilentPrinter`: discards everything
//! - `LogPrinter`: forwards lines to tracing at info level
//! - `StdoutPrinter`: writes lines to standard output
//! - `MemoryPrinter`: collects lines, used by tests and embedding callers

use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Sink for progress lines
///
/// Implementations must be thread-safe: copy tasks of one version report
/// from pool threads.
pub trait Printer: Send + Sync {
    /// Emit one line (without trailing newline)
    fn print_line(&self, line: &str);
}

/// Shared printer handle
pub type SharedPrinter = Arc<dyn Printer>;

/// Printer that drops every line
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentPrinter;

impl Printer for SilentPrinter {
    fn print_line(&self, _line: &str) {}
}

/// Printer that logs lines through tracing
#[derive(Debug, Default, Clone)]
pub struct LogPrinter {
    name: String,
}

impl LogPrinter {
    /// Create a log printer prefixing each line with `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Printer for LogPrinter {
    fn print_line(&self, line: &str) {
        if self.name.is_empty() {
            info!("{}", line);
        } else {
            info!("{}: {}", self.name, line);
        }
    }
}

/// Printer writing to standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutPrinter;

impl Printer for StdoutPrinter {
    fn print_line(&self, line: &str) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        // A closed stdout must not abort a transfer.
        let _ = writeln!(lock, "{}", line);
    }
}

/// Printer collecting lines in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryPrinter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryPrinter {
    /// Create an empty collecting printer
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines printed so far
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Check whether any printed line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl Printer for MemoryPrinter {
    fn print_line(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}

/// Default printer used when a caller supplies none
pub fn silent() -> SharedPrinter {
    Arc::new(SilentPrinter)
}
