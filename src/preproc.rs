// Copyright (c) 2016-2020 Fabian Schuiki

//! The directive interpreter.
//!
//! This is the top-level driver. It pulls logical lines from the stack of
//! input sources, classifies each as a directive or a source line, and
//! either interprets the directive or expands and emits the line. Every
//! logical input line yields exactly one output line: directive lines and
//! lines suppressed by the conditional stack become blank lines so that
//! line numbers survive into the downstream compiler.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::Path;

use log::debug;

use crate::builtins;
use crate::cond::CondStack;
use crate::config::Config;
use crate::diag::{Diagnostic, Error};
use crate::eval::evaluate;
use crate::expand::{ExpandContext, Expander};
use crate::include::{self, IncludeKind};
use crate::source::{LogicalLine, SourceFrame, SourceStack};
use crate::table::{Macro, MacroTable};
use crate::token::{render, Mode, Token, TokenKind, Tokenizer};

/// Hard cap on include nesting. Cycles are prevented by user-placed guards;
/// this bound merely keeps an unguarded self-include from exhausting the
/// process.
const MAX_INCLUDE_DEPTH: usize = 64;

/// A single preprocessing invocation. Owns the macro table, the conditional
/// stack, and the stack of open sources for its lifetime.
pub struct Preprocessor {
    sources: SourceStack,
    table: MacroTable,
    conds: CondStack,
    config: Config,
    diags: Vec<Diagnostic>,
}

impl Preprocessor {
    /// Create a preprocessor reading from a file on disk.
    pub fn from_file(path: &Path, config: Config) -> Result<Preprocessor, Error> {
        let frame = SourceFrame::open(path, 0)?;
        Preprocessor::new(frame, config)
    }

    /// Create a preprocessor reading from an in-memory buffer presented
    /// under the given name.
    pub fn from_buffer(name: &str, text: &str, config: Config) -> Result<Preprocessor, Error> {
        Preprocessor::new(SourceFrame::from_buffer(name, text), config)
    }

    /// Create a preprocessor reading from an arbitrary byte stream
    /// presented under the given name. Quoted includes resolve relative to
    /// the working directory.
    pub fn from_reader(
        name: &str,
        input: Box<dyn std::io::BufRead>,
        config: Config,
    ) -> Result<Preprocessor, Error> {
        Preprocessor::new(SourceFrame::from_reader(name, input), config)
    }

    fn new(bottom: SourceFrame, config: Config) -> Result<Preprocessor, Error> {
        let mut table = MacroTable::new();
        builtins::install(&mut table);
        for (name, value) in &config.defines {
            let body = match value {
                Some(text) => Tokenizer::run(text, Mode::Source)
                    .map_err(|e| Error::Lex(format!("in definition of '{}': {}", name, e)))?,
                None => vec![Token::number("1")],
            };
            table.insert(Macro::object(name.clone(), body));
        }
        // Startup undefs apply after the initial defines.
        for name in &config.undefines {
            if table.lookup(name).map(|m| m.is_builtin()).unwrap_or(false) {
                continue;
            }
            table.remove(name);
        }
        Ok(Preprocessor {
            sources: SourceStack::new(bottom),
            table,
            conds: CondStack::new(),
            config,
            diags: Vec::new(),
        })
    }

    /// The diagnostics reported so far, in encounter order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    /// The table of currently active macros.
    pub fn macros(&self) -> &MacroTable {
        &self.table
    }

    fn report(&mut self, diag: Diagnostic) {
        debug!("{}", diag);
        self.diags.push(diag);
    }

    /// Run the preprocessor to completion, writing output lines as they are
    /// produced. Returns on the first fatal condition.
    pub fn run(&mut self, output: &mut dyn Write) -> Result<(), Error> {
        while let Some(line) = self.next_line()? {
            self.process_line(&line, output)?;
        }
        Ok(())
    }

    /// The next logical line from the topmost source, popping exhausted
    /// frames. Conditionals left open by a popped frame are reported and
    /// discarded.
    fn next_line(&mut self) -> Result<Option<LogicalLine>, Error> {
        loop {
            let top = match self.sources.top_mut() {
                Some(top) => top,
                None => return Ok(None),
            };
            if let Some(line) = top.next_logical()? {
                return Ok(Some(line));
            }
            let frame = self.sources.pop().unwrap();
            if frame.missing_final_newline() {
                self.report(Diagnostic::warning(
                    frame.reported_file(),
                    frame.last_line_number(),
                    "no newline at end of file",
                ));
            }
            let dropped = self.conds.truncate(frame.cond_depth);
            if dropped > 0 {
                self.report(Diagnostic::error(
                    frame.reported_file(),
                    frame.last_line_number(),
                    format!("{} unterminated conditional(s) at end of input", dropped),
                ));
            }
        }
    }

    fn process_line(&mut self, line: &LogicalLine, output: &mut dyn Write) -> Result<(), Error> {
        let top = self.sources.top().expect("source stack is never empty");
        let file = top.reported_file().to_string();
        let lineno = top.reported_line(line.number);
        match line.text.trim_start().strip_prefix('#') {
            Some(rest) => {
                self.handle_directive(rest, &file, lineno)?;
                // Directive lines always become blank lines.
                writeln!(output)?;
                Ok(())
            }
            None if !self.conds.emit() => {
                writeln!(output)?;
                Ok(())
            }
            None => self.emit_source_line(line, &file, lineno, output),
        }
    }

    /// Expand and write an enabled source line.
    fn emit_source_line(
        &mut self,
        line: &LogicalLine,
        file: &str,
        lineno: u64,
        output: &mut dyn Write,
    ) -> Result<(), Error> {
        if !self.config.expand_macros && !self.config.exclude_comments {
            writeln!(output, "{}", line.text)?;
            return Ok(());
        }
        let tokens = match Tokenizer::run(&line.text, Mode::Source) {
            Ok(tokens) => tokens,
            Err(message) => {
                self.report(Diagnostic::error(file, lineno, Error::Lex(message).to_string()));
                writeln!(output, "{}", line.text)?;
                return Ok(());
            }
        };
        let tokens = if self.config.expand_macros {
            let ctx = ExpandContext {
                file: file.to_string(),
                line: lineno,
            };
            let (expanded, errors) = {
                let mut expander = Expander::new(&self.table, ctx);
                let expanded = expander.expand(tokens);
                (expanded, expander.take_errors())
            };
            for message in errors {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    Error::Expansion(message).to_string(),
                ));
            }
            expanded
        } else {
            tokens
        };
        let text = render(&tokens, self.config.exclude_comments);
        if text == line.text {
            writeln!(output, "{}", text)?;
        } else {
            // Expansion or comment stripping may leave dangling blanks.
            writeln!(output, "{}", text.trim_end())?;
        }
        Ok(())
    }

    fn handle_directive(&mut self, rest: &str, file: &str, lineno: u64) -> Result<(), Error> {
        let body = rest.trim_start();
        if body.is_empty() || body.starts_with('!') {
            // The null directive.
            return Ok(());
        }
        let (name, rest) = match take_ident(body) {
            Some(split) => split,
            None => {
                if self.conds.emit() {
                    self.report(Diagnostic::error(file, lineno, "malformed directive"));
                }
                return Ok(());
            }
        };
        let dir = DIRECTIVES_TABLE.with(|tbl| tbl.get(name).copied().unwrap_or(Directive::Unknown));

        // The conditional directives are always interpreted so nesting
        // bookkeeping stays correct inside disabled regions; everything
        // else only takes effect while emitting.
        match dir {
            Directive::If => {
                let cond = self.conds.wants_condition() && self.eval_condition(rest, file, lineno);
                self.conds.push(cond);
                return Ok(());
            }
            Directive::Ifdef | Directive::Ifndef => {
                let cond = match self.parse_name(rest, dir, file, lineno) {
                    Some(name) => self.table.contains(&name) == (dir == Directive::Ifdef),
                    None => false,
                };
                self.conds.push(self.conds.wants_condition() && cond);
                return Ok(());
            }
            Directive::Elif => {
                let cond =
                    self.conds.wants_elif_condition() && self.eval_condition(rest, file, lineno);
                if let Err(message) = self.conds.elif(cond) {
                    self.report(Diagnostic::error(file, lineno, message));
                }
                return Ok(());
            }
            Directive::Elifdef | Directive::Elifndef => {
                let cond = match self.parse_name(rest, dir, file, lineno) {
                    Some(name) => self.table.contains(&name) == (dir == Directive::Elifdef),
                    None => false,
                };
                let cond = self.conds.wants_elif_condition() && cond;
                if let Err(message) = self.conds.elif(cond) {
                    self.report(Diagnostic::error(file, lineno, message));
                }
                return Ok(());
            }
            Directive::Else => {
                self.check_trailing(rest, dir, file, lineno);
                if let Err(message) = self.conds.else_() {
                    self.report(Diagnostic::error(file, lineno, message));
                }
                return Ok(());
            }
            Directive::Endif => {
                self.check_trailing(rest, dir, file, lineno);
                if let Err(message) = self.conds.endif() {
                    self.report(Diagnostic::error(file, lineno, message));
                }
                return Ok(());
            }
            _ => (),
        }

        if !self.conds.emit() {
            return Ok(());
        }
        match dir {
            Directive::Define => self.handle_define(rest, file, lineno),
            Directive::Undef => self.handle_undef(rest, file, lineno),
            Directive::Include => self.handle_include(rest, file, lineno),
            Directive::Error => {
                return Err(Error::User(format!(
                    "{}:{}: #error: {}",
                    file,
                    lineno,
                    rest.trim()
                )));
            }
            Directive::Warning => {
                self.report(Diagnostic::warning(file, lineno, rest.trim()));
            }
            Directive::Line => self.handle_line(rest, file, lineno),
            Directive::Pragma => {
                // Retained but semantically a no-op; the content is only
                // surfaced in the debug log.
                debug!("{}:{}: #pragma {}", file, lineno, rest.trim());
            }
            Directive::Unknown => {
                let error = Error::Directive(format!("unknown directive '#{}'", name));
                self.report(Diagnostic::error(file, lineno, error.to_string()));
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    /// Parse the controlling expression of `#if`/`#elif`: replace `defined`,
    /// expand, evaluate. Any failure reports a diagnostic and yields false.
    fn eval_condition(&mut self, src: &str, file: &str, lineno: u64) -> bool {
        let tokens = match Tokenizer::run(src, Mode::Expression) {
            Ok(tokens) => tokens,
            Err(message) => {
                self.report(Diagnostic::error(file, lineno, Error::Lex(message).to_string()));
                return false;
            }
        };
        let tokens = match self.replace_defined(tokens) {
            Ok(tokens) => tokens,
            Err(message) => {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    Error::Expression(message).to_string(),
                ));
                return false;
            }
        };
        let ctx = ExpandContext {
            file: file.to_string(),
            line: lineno,
        };
        let (expanded, errors) = {
            let mut expander = Expander::new(&self.table, ctx);
            let expanded = expander.expand(tokens);
            (expanded, expander.take_errors())
        };
        if !errors.is_empty() {
            for message in errors {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    Error::Expansion(message).to_string(),
                ));
            }
            return false;
        }
        match evaluate(&expanded) {
            Ok(value) => value != 0,
            Err(error) => {
                self.report(Diagnostic::error(file, lineno, error.to_string()));
                false
            }
        }
    }

    /// Replace every `defined NAME` / `defined(NAME)` with `1` or `0`.
    /// This runs before macro expansion, on the raw directive tokens.
    fn replace_defined(&self, tokens: Vec<Token>) -> Result<Vec<Token>, String> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut iter = tokens.into_iter().peekable();
        while let Some(tok) = iter.next() {
            if tok.kind != TokenKind::Ident || tok.text != "defined" {
                out.push(tok);
                continue;
            }
            while iter.peek().map(|t| t.is_ws_or_comment()).unwrap_or(false) {
                iter.next();
            }
            let parenthesized = match iter.peek() {
                Some(t) if t.kind == TokenKind::LParen => {
                    iter.next();
                    while iter.peek().map(|t| t.is_ws_or_comment()).unwrap_or(false) {
                        iter.next();
                    }
                    true
                }
                _ => false,
            };
            let name = match iter.next() {
                Some(t) if t.kind == TokenKind::Ident => t.text,
                _ => return Err("expected macro name after 'defined'".to_string()),
            };
            if parenthesized {
                while iter.peek().map(|t| t.is_ws_or_comment()).unwrap_or(false) {
                    iter.next();
                }
                match iter.next() {
                    Some(t) if t.kind == TokenKind::RParen => (),
                    _ => return Err("expected ')' after 'defined'".to_string()),
                }
            }
            let value = if self.table.contains(&name) { "1" } else { "0" };
            out.push(Token::number(value));
        }
        Ok(out)
    }

    fn handle_define(&mut self, rest: &str, file: &str, lineno: u64) {
        let s = rest.trim_start();
        let (name, after) = match take_ident(s) {
            Some(split) => split,
            None => {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    "expected macro name after #define",
                ));
                return;
            }
        };
        if self
            .table
            .lookup(name)
            .map(|m| m.is_builtin())
            .unwrap_or(false)
        {
            self.report(Diagnostic::error(
                file,
                lineno,
                format!("cannot redefine builtin macro '{}'", name),
            ));
            return;
        }
        // A parenthesis with no intervening whitespace opens a parameter
        // list; anything else starts the body.
        let makro = if let Some(param_src) = after.strip_prefix('(') {
            let close = match param_src.find(')') {
                Some(i) => i,
                None => {
                    self.report(Diagnostic::error(
                        file,
                        lineno,
                        format!("unterminated parameter list in definition of '{}'", name),
                    ));
                    return;
                }
            };
            let (params, variadic) =
                match self.parse_params(&param_src[..close], name, file, lineno) {
                    Some(parsed) => parsed,
                    None => return,
                };
            let body = match self.parse_body(&param_src[close + 1..], file, lineno) {
                Some(body) => body,
                None => return,
            };
            Macro::function(name, params, variadic, body)
        } else {
            let body = match self.parse_body(after, file, lineno) {
                Some(body) => body,
                None => return,
            };
            Macro::object(name, body)
        };
        debug!("defined macro '{}'", name);
        self.table.insert(makro);
    }

    /// Parse a parameter list: identifiers separated by commas, with an
    /// optional trailing `...`.
    fn parse_params(
        &mut self,
        src: &str,
        name: &str,
        file: &str,
        lineno: u64,
    ) -> Option<(Vec<String>, bool)> {
        let mut params = Vec::new();
        let mut variadic = false;
        if src.trim().is_empty() {
            return Some((params, variadic));
        }
        let pieces: Vec<&str> = src.split(',').map(|p| p.trim()).collect();
        for (i, piece) in pieces.iter().enumerate() {
            if *piece == "..." {
                if i + 1 != pieces.len() {
                    self.report(Diagnostic::error(
                        file,
                        lineno,
                        format!("'...' must be the last parameter of '{}'", name),
                    ));
                    return None;
                }
                variadic = true;
            } else if is_ident(piece) {
                if params.iter().any(|p| p == piece) {
                    self.report(Diagnostic::error(
                        file,
                        lineno,
                        format!("duplicate parameter '{}' in definition of '{}'", piece, name),
                    ));
                    return None;
                }
                params.push(piece.to_string());
            } else {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    format!("invalid parameter '{}' in definition of '{}'", piece, name),
                ));
                return None;
            }
        }
        Some((params, variadic))
    }

    /// Tokenize a macro body. Interior whitespace collapses to a single
    /// space for faithful rendering; comments do not survive into bodies.
    fn parse_body(&mut self, src: &str, file: &str, lineno: u64) -> Option<Vec<Token>> {
        let tokens = match Tokenizer::run(src, Mode::Source) {
            Ok(tokens) => tokens,
            Err(message) => {
                self.report(Diagnostic::error(file, lineno, message));
                return None;
            }
        };
        let mut body: Vec<Token> = Vec::new();
        for tok in tokens {
            match tok.kind {
                TokenKind::Comment => (),
                TokenKind::Whitespace => {
                    if body.last().map(|t| !t.is_whitespace()).unwrap_or(false) {
                        body.push(Token::space());
                    }
                }
                _ => body.push(tok),
            }
        }
        while body.last().map(|t| t.is_whitespace()).unwrap_or(false) {
            body.pop();
        }
        Some(body)
    }

    fn handle_undef(&mut self, rest: &str, file: &str, lineno: u64) {
        let name = match self.parse_name(rest, Directive::Undef, file, lineno) {
            Some(name) => name,
            None => return,
        };
        if self
            .table
            .lookup(&name)
            .map(|m| m.is_builtin())
            .unwrap_or(false)
        {
            self.report(Diagnostic::error(
                file,
                lineno,
                format!("cannot undefine builtin macro '{}'", name),
            ));
            return;
        }
        if self.table.remove(&name).is_none() {
            self.report(Diagnostic::warning(
                file,
                lineno,
                format!("#undef of undefined macro '{}'", name),
            ));
        }
    }

    fn handle_include(&mut self, rest: &str, file: &str, lineno: u64) {
        let spec = rest.trim();
        let (name, kind) = match parse_include_ref(spec) {
            Some(parsed) => parsed,
            None => {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    "expected \"...\" or <...> after #include",
                ));
                return;
            }
        };
        if self.sources.depth() >= MAX_INCLUDE_DEPTH {
            self.report(Diagnostic::error(
                file,
                lineno,
                format!("include depth limit exceeded at '{}'", name),
            ));
            return;
        }
        let current_dir = self
            .sources
            .top()
            .expect("source stack is never empty")
            .dir()
            .to_path_buf();
        let path = match include::resolve(name, kind, &current_dir, &self.config.include_dirs) {
            Some(path) => path,
            None => {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    Error::IncludeNotFound(name.to_string()).to_string(),
                ));
                return;
            }
        };
        debug!("including '{}'", path.display());
        match SourceFrame::open(&path, self.conds.depth()) {
            Ok(frame) => self.sources.push(frame),
            Err(error) => {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    format!("cannot open '{}': {}", path.display(), error),
                ));
            }
        }
    }

    fn handle_line(&mut self, rest: &str, file: &str, lineno: u64) {
        let tokens = match Tokenizer::run(rest, Mode::Source) {
            Ok(tokens) => tokens,
            Err(message) => {
                self.report(Diagnostic::error(file, lineno, message));
                return;
            }
        };
        let significant: Vec<&Token> = tokens.iter().filter(|t| !t.is_ws_or_comment()).collect();
        let number = significant
            .first()
            .filter(|t| t.kind == TokenKind::Number)
            .and_then(|t| t.text.parse::<u64>().ok());
        let number = match number {
            Some(n) => n,
            None => {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    "expected line number after #line",
                ));
                return;
            }
        };
        let new_file = match significant.get(1) {
            Some(t) if t.kind == TokenKind::StringLit => {
                Some(t.text.trim_matches('"').to_string())
            }
            Some(t) => {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    format!("unexpected token '{}' after #line", t.text),
                ));
                return;
            }
            None => None,
        };
        let top = self.sources.top_mut().expect("source stack is never empty");
        top.set_line_override(number, new_file);
    }

    /// Parse the single identifier operand of `#ifdef`-style directives.
    fn parse_name(
        &mut self,
        rest: &str,
        dir: Directive,
        file: &str,
        lineno: u64,
    ) -> Option<String> {
        match take_ident(rest.trim_start()) {
            Some((name, _)) => Some(name.to_string()),
            None => {
                self.report(Diagnostic::error(
                    file,
                    lineno,
                    format!("expected macro name after {}", dir),
                ));
                None
            }
        }
    }

    /// Warn about tokens trailing an operand-less directive.
    fn check_trailing(&mut self, rest: &str, dir: Directive, file: &str, lineno: u64) {
        let rest = rest.trim();
        if !rest.is_empty() && !rest.starts_with('!') {
            self.report(Diagnostic::warning(
                file,
                lineno,
                format!("extra tokens after {}", dir),
            ));
        }
    }
}

/// Split a leading identifier off a string.
fn take_ident(s: &str) -> Option<(&str, &str)> {
    let first = s.bytes().next()?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let end = s
        .bytes()
        .position(|b| !(b.is_ascii_alphanumeric() || b == b'_'))
        .unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

fn is_ident(s: &str) -> bool {
    matches!(take_ident(s), Some((name, rest)) if name == s && rest.is_empty())
}

/// Parse `"name"` or `<name>` out of an include directive.
fn parse_include_ref(spec: &str) -> Option<(&str, IncludeKind)> {
    if let Some(rest) = spec.strip_prefix('"') {
        let end = rest.find('"')?;
        return Some((&rest[..end], IncludeKind::Quoted));
    }
    if let Some(rest) = spec.strip_prefix('<') {
        let end = rest.find('>')?;
        return Some((&rest[..end], IncludeKind::Angled));
    }
    None
}

/// The different directives recognized by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Define,
    Undef,
    Include,
    If,
    Ifdef,
    Ifndef,
    Elif,
    Elifdef,
    Elifndef,
    Else,
    Endif,
    Error,
    Warning,
    Line,
    Pragma,
    Unknown,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Directive::Define => write!(f, "#define"),
            Directive::Undef => write!(f, "#undef"),
            Directive::Include => write!(f, "#include"),
            Directive::If => write!(f, "#if"),
            Directive::Ifdef => write!(f, "#ifdef"),
            Directive::Ifndef => write!(f, "#ifndef"),
            Directive::Elif => write!(f, "#elif"),
            Directive::Elifdef => write!(f, "#elifdef"),
            Directive::Elifndef => write!(f, "#elifndef"),
            Directive::Else => write!(f, "#else"),
            Directive::Endif => write!(f, "#endif"),
            Directive::Error => write!(f, "#error"),
            Directive::Warning => write!(f, "#warning"),
            Directive::Line => write!(f, "#line"),
            Directive::Pragma => write!(f, "#pragma"),
            Directive::Unknown => write!(f, "unknown"),
        }
    }
}

thread_local!(static DIRECTIVES_TABLE: HashMap<&'static str, Directive> = {
    let mut table = HashMap::new();
    table.insert("define", Directive::Define);
    table.insert("undef", Directive::Undef);
    table.insert("include", Directive::Include);
    table.insert("if", Directive::If);
    table.insert("ifdef", Directive::Ifdef);
    table.insert("ifndef", Directive::Ifndef);
    table.insert("elif", Directive::Elif);
    table.insert("elifdef", Directive::Elifdef);
    table.insert("elifndef", Directive::Elifndef);
    table.insert("else", Directive::Else);
    table.insert("endif", Directive::Endif);
    table.insert("error", Directive::Error);
    table.insert("warning", Directive::Warning);
    table.insert("line", Directive::Line);
    table.insert("pragma", Directive::Pragma);
    table
});
