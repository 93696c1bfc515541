// Copyright (c) 2016-2020 Fabian Schuiki

//! The macro expander.
//!
//! Expansion rescans a token sequence against the macro table until no
//! expandable identifier remains. The rescanning loop is an iterative
//! worklist over a token deque rather than a recursive function; expanded
//! bodies are pushed back onto the front of the worklist and rescanned in
//! place. Recursion is prevented by paint sets: every token of an expanded
//! body is painted with the name of the macro that produced it, and a
//! painted identifier never expands again, even if token pasting moves it
//! somewhere else.

use std::collections::VecDeque;

use crate::table::{Macro, MacroKind, MacroTable};
use crate::token::{HideSet, Mode, Token, TokenKind, Tokenizer};

/// The processing position an expansion happens at, consulted by builtin
/// macros such as `__LINE__` and `__FILE__`.
#[derive(Debug, Clone)]
pub struct ExpandContext {
    pub file: String,
    pub line: u64,
}

/// Where a parameter reference in a macro body points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamRef {
    Named(usize),
    VaArgs,
}

/// The gathered arguments of one function-like invocation.
struct Invocation {
    /// One raw token sequence per named parameter.
    named: Vec<Vec<Token>>,
    /// The variadic tail, joined by its separating commas. Empty for a
    /// variadic macro invoked without trailing arguments.
    va: Vec<Token>,
}

/// Expands token sequences against a macro table. Expansion errors are
/// collected rather than aborting; the affected invocation is emitted
/// verbatim and the caller decides how to report.
pub struct Expander<'a> {
    table: &'a MacroTable,
    ctx: ExpandContext,
    errors: Vec<String>,
}

impl<'a> Expander<'a> {
    pub fn new(table: &'a MacroTable, ctx: ExpandContext) -> Expander<'a> {
        Expander {
            table,
            ctx,
            errors: Vec::new(),
        }
    }

    /// Errors accumulated since construction, in encounter order.
    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Fully expand a token sequence.
    pub fn expand(&mut self, input: Vec<Token>) -> Vec<Token> {
        let table = self.table;
        let mut out = Vec::new();
        let mut work: VecDeque<Token> = input.into();
        while let Some(tok) = work.pop_front() {
            if tok.kind != TokenKind::Ident || tok.hide.contains(&tok.text) {
                out.push(tok);
                continue;
            }
            let makro = match table.lookup(&tok.text) {
                Some(m) => m,
                None => {
                    out.push(tok);
                    continue;
                }
            };
            match makro.kind {
                MacroKind::Object => {
                    let body = self.macro_body(makro);
                    let mut body = self.paste(body);
                    self.paint(&mut body, &tok);
                    push_front(&mut work, body);
                }
                MacroKind::Function => {
                    if !next_is_lparen(&work) {
                        // Not an invocation; the name passes through.
                        out.push(tok);
                        continue;
                    }
                    match self.gather(&makro.name, &mut work) {
                        Ok((args, consumed)) => match self.bind(makro, args) {
                            Some(inv) => {
                                let body = self.substitute(makro, &makro.body, &inv, &tok.hide);
                                let mut body = self.paste(body);
                                self.paint(&mut body, &tok);
                                push_front(&mut work, body);
                            }
                            None => {
                                // Arity mismatch: replay the invocation.
                                out.push(tok);
                                out.extend(consumed);
                            }
                        },
                        Err(consumed) => {
                            // Unterminated invocation: emit what was read.
                            out.push(tok);
                            out.extend(consumed);
                        }
                    }
                }
            }
        }
        out
    }

    /// The body tokens of a macro: the static body, or the builtin callback
    /// applied to the current context.
    fn macro_body(&self, makro: &Macro) -> Vec<Token> {
        match makro.builtin {
            Some(f) => f(&self.ctx),
            None => makro.body.clone(),
        }
    }

    /// Paint an expanded body: every token is forbidden from re-expanding
    /// the macro that produced it, and inherits the invocation's own paint.
    fn paint(&self, body: &mut [Token], invocation: &Token) {
        for t in body.iter_mut() {
            t.hide.extend(&invocation.hide);
            t.hide.insert(&invocation.text);
        }
    }

    /// Read the argument list of an invocation off the worklist, starting at
    /// the whitespace before the opening parenthesis. Arguments are split at
    /// top-level commas with nested parentheses respected. On an
    /// unterminated invocation the consumed tokens are handed back.
    fn gather(
        &mut self,
        name: &str,
        work: &mut VecDeque<Token>,
    ) -> Result<(Vec<Vec<Token>>, Vec<Token>), Vec<Token>> {
        let mut consumed = Vec::new();
        while work.front().map(|t| t.is_ws_or_comment()).unwrap_or(false) {
            consumed.push(work.pop_front().unwrap());
        }
        // The caller verified the parenthesis is there.
        consumed.push(work.pop_front().unwrap());
        let mut args = vec![Vec::new()];
        let mut depth = 1usize;
        loop {
            let tok = match work.pop_front() {
                Some(t) => t,
                None => {
                    self.error(format!("unterminated invocation of macro '{}'", name));
                    return Err(consumed);
                }
            };
            consumed.push(tok.clone());
            match tok.kind {
                TokenKind::LParen => {
                    depth += 1;
                    args.last_mut().unwrap().push(tok);
                }
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok((args, consumed));
                    }
                    args.last_mut().unwrap().push(tok);
                }
                TokenKind::Comma if depth == 1 => args.push(Vec::new()),
                _ => args.last_mut().unwrap().push(tok),
            }
        }
    }

    /// Check the gathered argument count against the parameter list and
    /// split off the variadic tail. Returns `None` on an arity mismatch.
    fn bind(&mut self, makro: &Macro, mut args: Vec<Vec<Token>>) -> Option<Invocation> {
        let p = makro.params.len();
        // `F()` provides zero arguments to a parameterless macro, not one
        // empty one.
        if p == 0 && args.len() == 1 && args[0].iter().all(|t| t.is_ws_or_comment()) {
            args.clear();
        }
        if makro.variadic {
            if args.len() < p {
                self.error(format!(
                    "macro '{}' requires at least {} argument(s), got {}",
                    makro.name,
                    p,
                    args.len()
                ));
                return None;
            }
        } else if args.len() != p {
            self.error(format!(
                "macro '{}' requires {} argument(s), got {}",
                makro.name,
                p,
                args.len()
            ));
            return None;
        }
        let tail = args.split_off(p);
        let mut va = Vec::new();
        for (i, arg) in tail.into_iter().enumerate() {
            if i > 0 {
                va.push(Token::new(TokenKind::Comma, ","));
            }
            va.extend(arg);
        }
        // Arguments are trimmed of surrounding whitespace; interior
        // whitespace (including around the commas joining the variadic
        // tail) is preserved.
        let named = args.into_iter().map(trim_ws).collect();
        Some(Invocation {
            named,
            va: trim_ws(va),
        })
    }

    fn param_ref(&self, makro: &Macro, tok: &Token) -> Option<ParamRef> {
        if tok.kind != TokenKind::Ident {
            return None;
        }
        if let Some(i) = makro.params.iter().position(|p| p == &tok.text) {
            return Some(ParamRef::Named(i));
        }
        if makro.variadic && tok.text == "__VA_ARGS__" {
            return Some(ParamRef::VaArgs);
        }
        None
    }

    fn arg_raw<'i>(&self, inv: &'i Invocation, p: ParamRef) -> &'i [Token] {
        match p {
            ParamRef::Named(i) => &inv.named[i],
            ParamRef::VaArgs => &inv.va,
        }
    }

    /// Produce the substituted body of a function-like invocation:
    /// stringizing, raw insertion next to `##`, expanded insertion
    /// elsewhere, and `__VA_OPT__` selection.
    fn substitute(
        &mut self,
        makro: &Macro,
        body: &[Token],
        inv: &Invocation,
        caller_hide: &HideSet,
    ) -> Vec<Token> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < body.len() {
            let tok = &body[i];
            // `#param` stringizes the raw argument.
            if tok.kind == TokenKind::Hash {
                let mut j = i + 1;
                while j < body.len() && body[j].is_whitespace() {
                    j += 1;
                }
                if let Some(p) = body.get(j).and_then(|t| self.param_ref(makro, t)) {
                    out.push(stringize(self.arg_raw(inv, p)));
                    i = j + 1;
                    continue;
                }
            }
            if tok.kind == TokenKind::Ident && tok.text == "__VA_OPT__" {
                if !makro.variadic {
                    self.error("'__VA_OPT__' outside a variadic macro");
                    i += 1;
                    continue;
                }
                match read_group(body, i + 1) {
                    Some((inner, next)) => {
                        if inv.va.iter().any(|t| !t.is_ws_or_comment()) {
                            let replaced = self.substitute(makro, inner, inv, caller_hide);
                            out.extend(replaced);
                        }
                        i = next;
                        continue;
                    }
                    None => {
                        self.error("expected '(...)' after '__VA_OPT__'");
                        i += 1;
                        continue;
                    }
                }
            }
            if tok.kind == TokenKind::Ident && tok.text == "__VA_ARGS__" && !makro.variadic {
                self.error("'__VA_ARGS__' outside a variadic macro");
                i += 1;
                continue;
            }
            if let Some(p) = self.param_ref(makro, tok) {
                if adjacent_to_paste(body, i) {
                    // Raw insertion; the paste pass will see these tokens.
                    out.extend(self.arg_raw(inv, p).iter().cloned());
                } else {
                    let mut arg: Vec<Token> = self.arg_raw(inv, p).to_vec();
                    for t in arg.iter_mut() {
                        t.hide.extend(caller_hide);
                    }
                    out.extend(self.expand(arg));
                }
                i += 1;
                continue;
            }
            out.push(tok.clone());
            i += 1;
        }
        out
    }

    /// Resolve every `##` in a substituted body by pasting its neighbors
    /// into a single re-tokenized lexeme. Pasted tokens carry the union of
    /// both operands' paint sets.
    fn paste(&mut self, tokens: Vec<Token>) -> Vec<Token> {
        if !tokens.iter().any(|t| t.kind == TokenKind::HashHash) {
            return tokens;
        }
        let mut out: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].kind != TokenKind::HashHash {
                out.push(tokens[i].clone());
                i += 1;
                continue;
            }
            while out.last().map(|t| t.is_whitespace()).unwrap_or(false) {
                out.pop();
            }
            let left = out.pop();
            let mut j = i + 1;
            while j < tokens.len() && tokens[j].is_whitespace() {
                j += 1;
            }
            let right = tokens.get(j);
            match (left, right) {
                (Some(l), Some(r)) => {
                    let joined = format!("{}{}", l.text, r.text);
                    let mut hide = l.hide.clone();
                    hide.extend(&r.hide);
                    match retokenize_single(&joined) {
                        Some(mut t) => {
                            t.hide = hide;
                            out.push(t);
                        }
                        None => {
                            self.error(format!(
                                "pasting '{}' and '{}' does not form a valid token",
                                l.text, r.text
                            ));
                            out.push(Token {
                                kind: TokenKind::Other,
                                text: joined,
                                hide,
                            });
                        }
                    }
                    i = j + 1;
                }
                (left, _) => {
                    self.error("'##' at the start or end of a macro body");
                    if let Some(l) = left {
                        out.push(l);
                    }
                    i = j;
                }
            }
        }
        out
    }
}

/// Drop whitespace and comment tokens from both ends of a sequence.
fn trim_ws(mut tokens: Vec<Token>) -> Vec<Token> {
    while tokens.last().map(|t| t.is_ws_or_comment()).unwrap_or(false) {
        tokens.pop();
    }
    let start = tokens
        .iter()
        .position(|t| !t.is_ws_or_comment())
        .unwrap_or(tokens.len());
    tokens.drain(..start);
    tokens
}

/// Whether the next significant token on the worklist opens an invocation.
fn next_is_lparen(work: &VecDeque<Token>) -> bool {
    work.iter()
        .find(|t| !t.is_ws_or_comment())
        .map(|t| t.kind == TokenKind::LParen)
        .unwrap_or(false)
}

fn push_front(work: &mut VecDeque<Token>, tokens: Vec<Token>) {
    for tok in tokens.into_iter().rev() {
        work.push_front(tok);
    }
}

/// Whether the body token at `i` has a `##` as its nearest significant
/// neighbor on either side.
fn adjacent_to_paste(body: &[Token], i: usize) -> bool {
    let before = body[..i]
        .iter()
        .rev()
        .find(|t| !t.is_whitespace())
        .map(|t| t.kind == TokenKind::HashHash)
        .unwrap_or(false);
    let after = body[i + 1..]
        .iter()
        .find(|t| !t.is_whitespace())
        .map(|t| t.kind == TokenKind::HashHash)
        .unwrap_or(false);
    before || after
}

/// Read a parenthesized group starting at `start` (whitespace allowed before
/// the `(`). Returns the tokens between the parentheses and the index just
/// past the closing one.
fn read_group(body: &[Token], start: usize) -> Option<(&[Token], usize)> {
    let mut i = start;
    while i < body.len() && body[i].is_whitespace() {
        i += 1;
    }
    if body.get(i).map(|t| t.kind) != Some(TokenKind::LParen) {
        return None;
    }
    let open = i + 1;
    let mut depth = 1usize;
    let mut j = open;
    while j < body.len() {
        match body[j].kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some((&body[open..j], j + 1));
                }
            }
            _ => (),
        }
        j += 1;
    }
    None
}

/// Convert an argument's raw tokens into a single string literal: interior
/// whitespace runs collapse to one space, leading and trailing whitespace is
/// dropped, and quotes and backslashes inside string or character tokens are
/// escaped.
fn stringize(arg: &[Token]) -> Token {
    let mut text = String::from("\"");
    let mut pending_space = false;
    let mut started = false;
    for tok in arg {
        if tok.is_ws_or_comment() {
            pending_space = started;
            continue;
        }
        if pending_space {
            text.push(' ');
            pending_space = false;
        }
        started = true;
        match tok.kind {
            TokenKind::StringLit | TokenKind::CharLit => {
                for c in tok.text.chars() {
                    if c == '"' || c == '\\' {
                        text.push('\\');
                    }
                    text.push(c);
                }
            }
            _ => text.push_str(&tok.text),
        }
    }
    text.push('"');
    Token::new(TokenKind::StringLit, text)
}

/// Re-tokenize a pasted lexeme; the paste is valid only if exactly one token
/// comes back.
fn retokenize_single(text: &str) -> Option<Token> {
    let tokens = Tokenizer::run(text, Mode::Source).ok()?;
    match tokens.len() {
        1 => tokens.into_iter().next(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Macro, MacroTable};
    use crate::token::render;

    fn ctx() -> ExpandContext {
        ExpandContext {
            file: "test.f".to_string(),
            line: 1,
        }
    }

    fn toks(src: &str) -> Vec<Token> {
        Tokenizer::run(src, Mode::Source).unwrap()
    }

    /// Define macros from `#define`-style bodies and expand `src`.
    fn expand_with(defs: &[(&str, &[&str], bool, &str)], src: &str) -> (String, Vec<String>) {
        let mut table = MacroTable::new();
        for (name, params, variadic, body) in defs {
            let body = toks(body);
            if params.is_empty() && !variadic {
                table.insert(Macro::object(*name, body));
            } else {
                table.insert(Macro::function(
                    *name,
                    params.iter().map(|p| p.to_string()).collect(),
                    *variadic,
                    body,
                ));
            }
        }
        let mut expander = Expander::new(&table, ctx());
        let result = expander.expand(toks(src));
        (render(&result, false), expander.take_errors())
    }

    fn expand_ok(defs: &[(&str, &[&str], bool, &str)], src: &str) -> String {
        let (out, errors) = expand_with(defs, src);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        out
    }

    #[test]
    fn object_like() {
        assert_eq!(expand_ok(&[("N", &[], false, "10")], "a = N"), "a = 10");
    }

    #[test]
    fn object_like_chain() {
        let defs: &[(&str, &[&str], bool, &str)] =
            &[("A", &[], false, "B"), ("B", &[], false, "C"), ("C", &[], false, "42")];
        assert_eq!(expand_ok(defs, "A"), "42");
    }

    #[test]
    fn function_like_basic() {
        assert_eq!(
            expand_ok(&[("SQ", &["x"], false, "((x)*(x))")], "SQ(3 + 1)"),
            "((3 + 1)*(3 + 1))"
        );
    }

    #[test]
    fn function_like_without_parens_is_verbatim() {
        assert_eq!(expand_ok(&[("F", &["x"], false, "x")], "F + 1"), "F + 1");
    }

    #[test]
    fn nested_invocations() {
        let defs: &[(&str, &[&str], bool, &str)] =
            &[("ADD", &["a", "b"], false, "a + b"), ("ONE", &[], false, "1")];
        assert_eq!(expand_ok(defs, "ADD(ONE, ADD(2, 3))"), "1 + 2 + 3");
    }

    #[test]
    fn arguments_with_nested_parens() {
        assert_eq!(
            expand_ok(&[("F", &["x"], false, "x")], "F((a, b))"),
            "(a, b)"
        );
    }

    #[test]
    fn stringize_argument() {
        assert_eq!(
            expand_ok(&[("S", &["x"], false, "#x")], "s = S(hello world)"),
            "s = \"hello world\""
        );
        // Interior whitespace collapses, ends are trimmed.
        assert_eq!(
            expand_ok(&[("S", &["x"], false, "#x")], "S(  a   +  b  )"),
            "\"a + b\""
        );
    }

    #[test]
    fn stringize_escapes_string_tokens() {
        assert_eq!(
            expand_ok(&[("S", &["x"], false, "#x")], r#"S("hi")"#),
            r#""\"hi\"""#
        );
    }

    #[test]
    fn token_pasting() {
        assert_eq!(
            expand_ok(
                &[("C", &["a", "b"], false, "a##_##b")],
                "integer :: C(var,1)"
            ),
            "integer :: var_1"
        );
    }

    #[test]
    fn pasted_number_with_suffix() {
        assert_eq!(
            expand_ok(&[("K", &["n"], false, "n##_k")], "K(12)"),
            "12_k"
        );
    }

    #[test]
    fn paste_failure_reports_error() {
        let (out, errors) = expand_with(&[("P", &["a"], false, "a##+")], "P(x)");
        assert_eq!(out, "x+");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("does not form a valid token"));
    }

    #[test]
    fn variadic_with_va_opt() {
        let defs: &[(&str, &[&str], bool, &str)] = &[(
            "L",
            &["fmt"],
            true,
            "print *, fmt __VA_OPT__(,) __VA_ARGS__",
        )];
        assert_eq!(expand_ok(defs, r#"L("x", 1, 2)"#), r#"print *, "x" , 1, 2"#);
        assert_eq!(expand_ok(defs, r#"L("x")"#).trim_end(), r#"print *, "x""#);
    }

    #[test]
    fn variadic_arity() {
        let defs: &[(&str, &[&str], bool, &str)] =
            &[("V", &["a", "b"], true, "__VA_ARGS__")];
        // k >= named parameter count is required.
        let (_, errors) = expand_with(defs, "V(1)");
        assert_eq!(errors.len(), 1);
        assert!(expand_with(defs, "V(1, 2)").1.is_empty());
        assert!(expand_with(defs, "V(1, 2, 3)").1.is_empty());
    }

    #[test]
    fn non_variadic_arity_mismatch() {
        let defs: &[(&str, &[&str], bool, &str)] = &[("F", &["a", "b"], false, "a b")];
        let (out, errors) = expand_with(defs, "F(1)");
        // The invocation is emitted verbatim.
        assert_eq!(out, "F(1)");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("requires 2 argument(s)"));
    }

    #[test]
    fn empty_argument_counts() {
        assert_eq!(
            expand_ok(&[("F", &["a", "b"], false, "[a|b]")], "F(,x)"),
            "[|x]"
        );
    }

    #[test]
    fn zero_argument_invocation() {
        assert_eq!(expand_ok(&[("Z", &[], true, "z")], "Z()"), "z");
    }

    #[test]
    fn va_args_outside_variadic_is_an_error() {
        let (_, errors) = expand_with(&[("F", &["a"], false, "__VA_ARGS__")], "F(1)");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("__VA_ARGS__"));
    }

    #[test]
    fn self_recursion_is_painted() {
        let (out, errors) = expand_with(&[("X", &[], false, "X+1")], "y = X");
        assert_eq!(out, "y = X+1");
        assert!(errors.is_empty());
    }

    #[test]
    fn mutual_recursion_is_painted() {
        let defs: &[(&str, &[&str], bool, &str)] =
            &[("A", &[], false, "B"), ("B", &[], false, "A")];
        // A -> B -> A, where the final A is painted by the first expansion.
        assert_eq!(expand_ok(defs, "A"), "A");
    }

    #[test]
    fn paint_survives_pasting() {
        // X expands to a paste that reassembles the name X; the pasted
        // token carries the paint and must not expand again.
        let defs: &[(&str, &[&str], bool, &str)] = &[("X", &[], false, "X##Y")];
        assert_eq!(expand_ok(defs, "X"), "XY");
        let defs: &[(&str, &[&str], bool, &str)] =
            &[("XY", &[], false, "1"), ("X", &[], false, "X##Y")];
        // The pasted XY inherits X's paint only for the name X; XY itself
        // is a different name and expands.
        assert_eq!(expand_ok(defs, "X"), "1");
    }

    #[test]
    fn unterminated_invocation() {
        let (out, errors) = expand_with(&[("F", &["x"], false, "x")], "F(1, 2");
        assert_eq!(out, "F(1, 2");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unterminated"));
    }

    #[test]
    fn arguments_are_expanded_before_substitution() {
        let defs: &[(&str, &[&str], bool, &str)] =
            &[("N", &[], false, "5"), ("F", &["x"], false, "x x")];
        assert_eq!(expand_ok(defs, "F(N)"), "5 5");
    }

    #[test]
    fn raw_argument_next_to_paste() {
        // The argument adjacent to ## is inserted raw, not expanded.
        let defs: &[(&str, &[&str], bool, &str)] =
            &[("N", &[], false, "5"), ("F", &["x"], false, "x##_tag")];
        assert_eq!(expand_ok(defs, "F(N)"), "N_tag");
    }
}
