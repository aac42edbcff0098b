// File: src/errors.rs
//
// Error handling and reporting for the engine.
// Provides structured error types with source location information
// and pretty-printed error messages, matching the taxonomy of spec.md §7.

use colored::Colorize;
use std::fmt;

/// Source location information for tracking where a TAC line came from.
///
/// The compiler (out of scope for this core) is the component that would
/// normally populate `column`/`file`; this engine only ever receives and
/// forwards a line number from the `Line` it was executing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: usize,
    pub column: Option<usize>,
    pub file: Option<String>,
}

impl SourceLocation {
    pub fn new(line: usize) -> Self {
        Self { line, column: None, file: None }
    }

    pub fn unknown() -> Self {
        Self { line: 0, column: None, file: None }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.file, self.column) {
            (Some(file), Some(col)) => write!(f, "{}:{}:{}", file, self.line, col),
            (Some(file), None) => write!(f, "{}:{}", file, self.line),
            (None, _) => write!(f, "line {}", self.line),
        }
    }
}

/// Error taxonomy, one kind per distinct failure described in spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised by the out-of-scope compiler; the core only carries the variant
    /// so host surfaces can distinguish it from runtime failures.
    CompilerError,
    /// Catch-all unexpected condition: unknown opcode, unreachable path.
    RuntimeError,
    /// Operand of the wrong variant for the opcode (e.g. indexing a Number).
    TypeError,
    /// Map lookup missed after a full `__isa` walk.
    KeyError,
    /// Out-of-range list/string index.
    IndexError,
    /// String/list result exceeded the ~16M cap, or `__isa` walk exceeded
    /// 1000 hops.
    LimitExceeded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::CompilerError => write!(f, "Compiler Error"),
            ErrorKind::RuntimeError => write!(f, "Runtime Error"),
            ErrorKind::TypeError => write!(f, "Type Error"),
            ErrorKind::KeyError => write!(f, "Key Error"),
            ErrorKind::IndexError => write!(f, "Index Error"),
            ErrorKind::LimitExceeded => write!(f, "Limit Exceeded"),
        }
    }
}

/// A structured error carrying its kind, message, and source line.
#[derive(Debug, Clone)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: SourceLocation,
    pub note: Option<String>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), location: SourceLocation::unknown(), note: None }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.location = SourceLocation::new(line);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RuntimeError, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KeyError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexError, message)
    }

    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LimitExceeded, message)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind_str = format!("{}", self.kind);
        writeln!(f, "{}: {}", kind_str.red().bold(), self.message.bold())?;
        writeln!(f, "{}", format!("  --> {}", self.location).bright_blue())?;
        if let Some(ref note) = self.note {
            writeln!(f, "   {} {}", "=".bright_cyan(), format!("note: {}", note).bright_cyan())?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_line() {
        let err = EngineError::key_error("'foo' not found").with_line(12);
        let rendered = format!("{}", err);
        assert!(rendered.contains("Key Error"));
        assert!(rendered.contains("12"));
    }
}
