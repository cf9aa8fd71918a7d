//! Error kinds, the runtime throw channel, and the public exception surface.
//!
//! Internally every fallible engine operation returns [`RunResult`]. A
//! [`RunError`] is either a JavaScript value already thrown by user code or a
//! pending engine error (kind + message) that is materialized into an
//! ordinary error object the moment user code can observe it (a `catch`
//! clause) or converted into a public [`Exception`] when it escapes the
//! top-level entry point.
//!
//! `finally` clauses never observe the in-flight error; abrupt completions
//! crossing them are reified as control-flow records (see `heap.rs`).

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can throw.
pub type RunResult<T> = Result<T, RunError>;

/// The standard error constructors the core can raise.
///
/// The string representation matches the JavaScript constructor name exactly
/// (`ErrorKind::TypeError` -> "TypeError").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The base constructor; also the classification for thrown values
    /// that are not engine error objects.
    Error,
    /// Malformed source text, from the lexer or parser.
    SyntaxError,
    /// Unresolvable binding reads, strict-mode unresolvable writes, and
    /// invalid assignment targets.
    ReferenceError,
    /// Calling non-callables, `this` coercion failures, property access on
    /// `undefined`/`null`.
    TypeError,
    /// Recursion-guard overflow, invalid array lengths, operand-stack
    /// exhaustion.
    RangeError,
    /// Broken interpreter invariants. Never caught by user code paths in
    /// debug builds; converted like any other error in release builds.
    InternalError,
}

/// An engine-raised error that has not yet been observed by user code.
///
/// Stays in this cheap form until a `catch` binds it (at which point it
/// becomes an error object on the heap) or until it escapes `evaluate`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleError {
    pub kind: ErrorKind,
    pub message: String,
    /// 1-based source line, when known at raise time.
    pub line: Option<u32>,
}

/// A thrown error travelling up through the interpreter.
#[derive(Debug, Clone)]
pub enum RunError {
    /// A value thrown by user code (`throw expr`), or an engine error that a
    /// `catch` clause has already materialized.
    Thrown(Value),
    /// An engine error not yet materialized as a heap object.
    Simple(SimpleError),
}

impl RunError {
    #[must_use]
    pub fn simple(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Simple(SimpleError {
            kind,
            message: message.into(),
            line: None,
        })
    }

    #[must_use]
    pub fn syntax(message: impl Into<String>, line: u32) -> Self {
        Self::Simple(SimpleError {
            kind: ErrorKind::SyntaxError,
            message: message.into(),
            line: Some(line),
        })
    }

    #[must_use]
    pub fn reference(message: impl Into<String>) -> Self {
        Self::simple(ErrorKind::ReferenceError, message)
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::simple(ErrorKind::TypeError, message)
    }

    #[must_use]
    pub fn range(message: impl Into<String>) -> Self {
        Self::simple(ErrorKind::RangeError, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        debug_assert!(false, "internal error raised: {message}");
        Self::Simple(SimpleError {
            kind: ErrorKind::InternalError,
            message,
            line: None,
        })
    }

    /// Stamps a source line onto a simple error that does not carry one yet.
    #[must_use]
    pub fn with_line(mut self, line: u32) -> Self {
        if let Self::Simple(simple) = &mut self
            && simple.line.is_none()
        {
            simple.line = Some(line);
        }
        self
    }
}

/// The standard "maximum call stack" message, shared by the parser depth
/// guard and the interpreter recursion check.
pub(crate) const STACK_OVERFLOW_MESSAGE: &str = "Maximum call stack size exceeded";

/// Public error type returned by `Engine::evaluate` and friends.
///
/// Carries the constructor kind, the message, and the source line when the
/// engine knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    kind: ErrorKind,
    message: String,
    line: Option<u32>,
}

impl Exception {
    #[must_use]
    pub fn new(kind: ErrorKind, message: String, line: Option<u32>) -> Self {
        Self { kind, message, line }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.line
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}

impl From<SimpleError> for Exception {
    fn from(simple: SimpleError) -> Self {
        Self {
            kind: simple.kind,
            message: simple.message,
            line: simple.line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display_matches_constructor_names() {
        assert_eq!(ErrorKind::TypeError.to_string(), "TypeError");
        assert_eq!(ErrorKind::SyntaxError.to_string(), "SyntaxError");
        let parsed: ErrorKind = "RangeError".parse().expect("parse error kind");
        assert_eq!(parsed, ErrorKind::RangeError);
    }

    #[test]
    fn with_line_does_not_overwrite() {
        let err = RunError::syntax("bad token", 3).with_line(9);
        match err {
            RunError::Simple(simple) => assert_eq!(simple.line, Some(3)),
            RunError::Thrown(_) => panic!("expected simple error"),
        }
    }

    #[test]
    fn exception_display_includes_line() {
        let exc = Exception::new(ErrorKind::ReferenceError, "x is not defined".into(), Some(2));
        assert_eq!(exc.to_string(), "ReferenceError: x is not defined (line 2)");
    }
}
