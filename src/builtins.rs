// Copyright (c) 2016-2020 Fabian Schuiki

//! The predefined dynamic macros.
//!
//! All of these are computed at expansion time from the current processing
//! context, honoring `#line` overrides, and cannot be removed with `#undef`.

use chrono::Local;

use crate::expand::ExpandContext;
use crate::table::{Macro, MacroTable};
use crate::token::Token;

/// Install the builtin macros into a fresh table. Called before any
/// user-supplied definitions so the latter shadow nothing by accident;
/// attempts to redefine or undefine these are rejected by the directive
/// interpreter.
pub fn install(table: &mut MacroTable) {
    table.insert(Macro::builtin("__LINE__", line));
    table.insert(Macro::builtin("__FILE__", file));
    table.insert(Macro::builtin("__FILENAME__", filename));
    table.insert(Macro::builtin("__DATE__", date));
    table.insert(Macro::builtin("__TIME__", time));
    table.insert(Macro::builtin("__TIMESTAMP__", timestamp));
}

fn line(ctx: &ExpandContext) -> Vec<Token> {
    vec![Token::number(ctx.line.to_string())]
}

fn file(ctx: &ExpandContext) -> Vec<Token> {
    vec![Token::string(&ctx.file)]
}

fn filename(ctx: &ExpandContext) -> Vec<Token> {
    let base = ctx
        .file
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(&ctx.file);
    vec![Token::string(base)]
}

/// `"Mmm dd yyyy"` with the day space-padded, e.g. `"Jan  3 2026"`.
fn date(_: &ExpandContext) -> Vec<Token> {
    vec![Token::string(&Local::now().format("%b %e %Y").to_string())]
}

/// `"HH:MM:SS"`, zero-padded.
fn time(_: &ExpandContext) -> Vec<Token> {
    vec![Token::string(&Local::now().format("%H:%M:%S").to_string())]
}

/// `"Dow Mmm dd yyyy HH:MM:SS"`.
fn timestamp(_: &ExpandContext) -> Vec<Token> {
    vec![Token::string(
        &Local::now().format("%a %b %e %Y %H:%M:%S").to_string(),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::Expander;
    use crate::token::{render, Mode, Tokenizer};

    fn expand(src: &str, file: &str, line: u64) -> String {
        let mut table = MacroTable::new();
        install(&mut table);
        let ctx = ExpandContext {
            file: file.to_string(),
            line,
        };
        let mut expander = Expander::new(&table, ctx);
        let tokens = Tokenizer::run(src, Mode::Source).unwrap();
        let out = expander.expand(tokens);
        assert!(expander.take_errors().is_empty());
        render(&out, false)
    }

    #[test]
    fn line_and_file() {
        assert_eq!(expand("__LINE__", "dir/a.f", 7), "7");
        assert_eq!(expand("__FILE__", "dir/a.f", 7), "\"dir/a.f\"");
        assert_eq!(expand("__FILENAME__", "dir/a.f", 7), "\"a.f\"");
    }

    #[test]
    fn date_shape() {
        let out = expand("__DATE__", "a.f", 1);
        // "Mmm dd yyyy" in quotes: 13 characters total.
        assert_eq!(out.len(), 13);
        assert!(out.starts_with('"') && out.ends_with('"'));
        assert_eq!(out.as_bytes()[4], b' ');
    }

    #[test]
    fn time_shape() {
        let out = expand("__TIME__", "a.f", 1);
        assert_eq!(out.len(), 10);
        assert_eq!(out.as_bytes()[3], b':');
        assert_eq!(out.as_bytes()[6], b':');
    }

    #[test]
    fn timestamp_shape() {
        let out = expand("__TIMESTAMP__", "a.f", 1);
        // "Dow Mmm dd yyyy HH:MM:SS"
        assert_eq!(out.len(), 26);
        assert!(out.contains(':'));
    }

    #[test]
    fn builtins_are_marked() {
        let mut table = MacroTable::new();
        install(&mut table);
        assert!(table.lookup("__LINE__").unwrap().is_builtin());
        assert!(table.lookup("__TIMESTAMP__").unwrap().is_builtin());
    }
}
