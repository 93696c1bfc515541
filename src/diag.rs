// Copyright (c) 2016-2020 Fabian Schuiki

//! Diagnostics and the error taxonomy of the preprocessor.
//!
//! Fatal conditions surface as an [`Error`] returned from the driver.
//! Everything else becomes a [`Diagnostic`] accumulated in encounter order;
//! processing continues on the next logical line.

use std::fmt;

use thiserror::Error;

/// A fatal preprocessing failure. Only conditions that terminate the
/// invocation are represented here; recoverable conditions are reported as
/// [`Diagnostic`]s instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The primary input or an include file could not be opened or read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// An include reference did not resolve to an existing file.
    #[error("include not found: {0}")]
    IncludeNotFound(String),
    /// Tokenization failed in a context that cannot be skipped.
    #[error("lexical error: {0}")]
    Lex(String),
    /// A directive line was malformed beyond recovery.
    #[error("directive error: {0}")]
    Directive(String),
    /// Macro expansion failed in a context that cannot be skipped.
    #[error("expansion error: {0}")]
    Expansion(String),
    /// A controlling expression could not be evaluated.
    #[error("expression error: {0}")]
    Expression(String),
    /// An `#error` directive was reached in an enabled branch.
    #[error("{0}")]
    User(String),
}

/// Diagnostic severity. Warnings never affect the output; errors mark the
/// line they occurred on but processing continues unless the condition is
/// fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single reported condition, located at a file and logical line.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub file: String,
    pub line: u64,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(file: impl Into<String>, line: u64, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Warning,
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    pub fn error(file: impl Into<String>, line: u64, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}: {}: {}",
            self.file, self.line, self.severity, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_rendering() {
        let d = Diagnostic::error("main.f", 12, "unknown directive '#frobnicate'");
        assert_eq!(
            d.to_string(),
            "main.f:12: error: unknown directive '#frobnicate'"
        );
        let w = Diagnostic::warning("main.f", 3, "extra tokens after #endif");
        assert_eq!(w.to_string(), "main.f:3: warning: extra tokens after #endif");
    }
}
