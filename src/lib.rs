// Copyright (c) 2016-2020 Fabian Schuiki

//! A `#`-directive preprocessor for a column-sensitive scientific language.
//!
//! The input mixes native source statements with directive lines such as
//! `#define`, `#if`, and `#include`. This crate interprets the directives,
//! expands macros (object-like, function-like, and variadic, with `#`
//! stringizing and `##` pasting), and emits preprocessed text whose line
//! numbering matches the input: directive lines and suppressed conditional
//! branches come out as blank lines.
//!
//! The usual entry point is [`preprocess`] or [`preprocess_buffer`]; the
//! [`Preprocessor`] type gives finer control and access to the accumulated
//! [`Diagnostic`]s.

pub mod builtins;
pub mod cond;
pub mod config;
pub mod diag;
pub mod eval;
pub mod expand;
pub mod include;
pub mod preproc;
pub mod source;
pub mod table;
pub mod token;

pub use crate::config::Config;
pub use crate::diag::{Diagnostic, Error, Severity};
pub use crate::preproc::Preprocessor;

use std::io::Write;
use std::path::Path;

/// Preprocess a file on disk, writing the result to `output`. Returns the
/// diagnostics accumulated along the way.
pub fn preprocess(
    input: &Path,
    output: &mut dyn Write,
    config: Config,
) -> Result<Vec<Diagnostic>, Error> {
    let mut pp = Preprocessor::from_file(input, config)?;
    pp.run(output)?;
    Ok(pp.diagnostics().to_vec())
}

/// Preprocess an in-memory buffer presented under `name`, writing the
/// result to `output`.
pub fn preprocess_buffer(
    name: &str,
    text: &str,
    output: &mut dyn Write,
    config: Config,
) -> Result<Vec<Diagnostic>, Error> {
    let mut pp = Preprocessor::from_buffer(name, text, config)?;
    pp.run(output)?;
    Ok(pp.diagnostics().to_vec())
}
