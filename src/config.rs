// Copyright (c) 2016-2020 Fabian Schuiki

//! Caller-owned preprocessing configuration.
//!
//! Populated by the command-line front-end or a library caller before the
//! preprocessor is constructed. There is no process-wide state; every
//! invocation owns its configuration for its lifetime.

use std::path::PathBuf;

/// Configuration for one preprocessing invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Initial macro definitions, as `(name, optional value)`. A missing
    /// value defines the macro as `1`.
    pub defines: Vec<(String, Option<String>)>,
    /// Names to remove from the table at startup, applied after `defines`.
    pub undefines: Vec<String>,
    /// Ordered include search path.
    pub include_dirs: Vec<PathBuf>,
    /// When false, source lines are emitted verbatim; directive processing
    /// still occurs.
    pub expand_macros: bool,
    /// When true, `!`-comments are stripped from emitted source lines.
    pub exclude_comments: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            defines: Vec::new(),
            undefines: Vec::new(),
            include_dirs: Vec::new(),
            expand_macros: true,
            exclude_comments: false,
        }
    }
}

impl Config {
    /// Record a `-D`-style definition given as `NAME` or `NAME=VALUE`.
    pub fn define(&mut self, spec: &str) {
        match spec.split_once('=') {
            Some((name, value)) => self
                .defines
                .push((name.to_string(), Some(value.to_string()))),
            None => self.defines.push((spec.to_string(), None)),
        }
    }

    pub fn undefine(&mut self, name: &str) {
        self.undefines.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_specs() {
        let mut config = Config::default();
        config.define("FOO");
        config.define("BAR=baz(1)");
        assert_eq!(config.defines[0], ("FOO".to_string(), None));
        assert_eq!(
            config.defines[1],
            ("BAR".to_string(), Some("baz(1)".to_string()))
        );
    }
}
