//! Output sink the host injects into the interpreter.
//!
//! `print`/`display` hand their payload to a [`Port`] together with the id of the
//! call site, so a host editor can attach the output to the right node. The
//! interpreter also reports recoverable diagnostics through
//! [`Port::write_error`]. Ports are shared across threads by the host and must
//! synchronize themselves.

use crate::ast::{Expr, Uid};
use std::io::Write;
use std::sync::{Mutex, PoisonError};

pub trait Port: Send + Sync {
    /// Program output produced by the expression `source_id`
    fn write(&self, payload: &Expr, source_id: Uid);

    /// Diagnostics: refused operations, type errors, parse failures
    fn write_error(&self, _message: &str, _source_id: Uid) {}
}

/// Text a port shows for a payload: strings without their quotes
pub fn render(payload: &Expr) -> String {
    match payload.as_str() {
        Some(s) => s.to_owned(),
        None => payload.to_string(),
    }
}

/// Writes output to stdout and diagnostics to stderr
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutPort;

impl Port for StdoutPort {
    fn write(&self, payload: &Expr, _source_id: Uid) {
        // A closed stdout is not an interpreter error
        let _ = writeln!(std::io::stdout().lock(), "{}", render(payload));
    }

    fn write_error(&self, message: &str, _source_id: Uid) {
        let _ = writeln!(std::io::stderr().lock(), "{message}");
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentPort;

impl Port for SilentPort {
    fn write(&self, _payload: &Expr, _source_id: Uid) {}
}

/// Records everything in memory
#[derive(Debug, Default)]
pub struct BufferPort {
    output: Mutex<Vec<(Uid, Expr)>>,
    errors: Mutex<Vec<(Uid, String)>>,
}

impl BufferPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the payloads written so far
    pub fn take(&self) -> Vec<(Uid, Expr)> {
        std::mem::take(&mut *self.output.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Drain the diagnostics written so far
    pub fn take_errors(&self) -> Vec<(Uid, String)> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Rendered output, without draining it
    pub fn lines(&self) -> Vec<String> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, payload)| render(payload))
            .collect()
    }

    /// Diagnostic messages, without draining them
    pub fn error_lines(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl Port for BufferPort {
    fn write(&self, payload: &Expr, source_id: Uid) {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((source_id, payload.clone()));
    }

    fn write_error(&self, message: &str, source_id: Uid) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((source_id, message.to_owned()));
    }
}
