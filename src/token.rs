// Copyright (c) 2016-2020 Fabian Schuiki

//! Tokens and the line tokenizer.
//!
//! The preprocessor operates on logical lines, each of which is split into a
//! sequence of classified tokens. Tokens own their lexemes and carry a paint
//! set: the names of macros that must not expand at this token's position.
//! Concatenating the lexemes of a token sequence reproduces the source text,
//! which is how expanded lines are rendered back out.
//!
//! The tokenizer has two modes. In source mode a `!` begins a comment that
//! runs to the end of the line, matching the downstream language. In
//! expression mode, used for `#if`/`#elif` controlling expressions, `!` and
//! `!=` are operators and no comment syntax exists.

use std::fmt;

/// Operators recognized in directive bodies and controlling expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    LogicNot,
    LogicAnd,
    LogicOr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    Shl,
    Shr,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Opcode::Add => "+",
            Opcode::Sub => "-",
            Opcode::Mul => "*",
            Opcode::Div => "/",
            Opcode::Pow => "**",
            Opcode::Rem => "%",
            Opcode::BitAnd => "&",
            Opcode::BitOr => "|",
            Opcode::BitXor => "^",
            Opcode::BitNot => "~",
            Opcode::LogicNot => "!",
            Opcode::LogicAnd => "&&",
            Opcode::LogicOr => "||",
            Opcode::Lt => "<",
            Opcode::Gt => ">",
            Opcode::Le => "<=",
            Opcode::Ge => ">=",
            Opcode::Eq => "==",
            Opcode::Ne => "!=",
            Opcode::Shl => "<<",
            Opcode::Shr => ">>",
        };
        write!(f, "{}", s)
    }
}

/// The different kinds of token the tokenizer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    StringLit,
    CharLit,
    Operator(Opcode),
    Hash,
    HashHash,
    LParen,
    RParen,
    Comma,
    Whitespace,
    Comment,
    Newline,
    Other,
}

/// The set of macro names forbidden from expanding at a token's position.
/// Typical sizes are tiny (a handful of names at most), so a plain vector
/// with linear lookup is used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HideSet(Vec<String>);

impl HideSet {
    pub fn new() -> HideSet {
        HideSet(Vec::new())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn insert(&mut self, name: &str) {
        if !self.contains(name) {
            self.0.push(name.to_string());
        }
    }

    /// Union the other set into this one.
    pub fn extend(&mut self, other: &HideSet) {
        for name in &other.0 {
            self.insert(name);
        }
    }
}

/// A classified slice of a logical line. The lexeme is owned; the paint set
/// rides with the token through substitution and pasting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub hide: HideSet,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Token {
        Token {
            kind,
            text: text.into(),
            hide: HideSet::new(),
        }
    }

    pub fn number(text: impl Into<String>) -> Token {
        Token::new(TokenKind::Number, text)
    }

    /// A string literal token for the given content, quoted and escaped.
    pub fn string(content: &str) -> Token {
        let mut text = String::with_capacity(content.len() + 2);
        text.push('"');
        for c in content.chars() {
            if c == '"' || c == '\\' {
                text.push('\\');
            }
            text.push(c);
        }
        text.push('"');
        Token::new(TokenKind::StringLit, text)
    }

    pub fn space() -> Token {
        Token::new(TokenKind::Whitespace, " ")
    }

    pub fn is_whitespace(&self) -> bool {
        self.kind == TokenKind::Whitespace
    }

    pub fn is_ws_or_comment(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }
}

/// Tokenizer mode; see the module docs for the `!` disambiguation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Source,
    Expression,
}

/// Splits a logical line into tokens. Implemented as a byte cursor over the
/// input; all recognized syntax is ASCII, and any other byte sequence falls
/// through as `Other` one scalar at a time.
pub struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    mode: Mode,
}

impl<'a> Tokenizer<'a> {
    pub fn new(src: &'a str, mode: Mode) -> Tokenizer<'a> {
        Tokenizer { src, pos: 0, mode }
    }

    /// Tokenize the whole input, stopping at the first lexical error.
    pub fn run(src: &'a str, mode: Mode) -> Result<Vec<Token>, String> {
        Tokenizer::new(src, mode).collect()
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Consume bytes while the predicate holds, starting at the current
    /// position, and return the consumed slice.
    fn eat_while(&mut self, f: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if !f(b) {
                break;
            }
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token::new(kind, &self.src[start..self.pos])
    }

    /// Scan a string or character literal. The opening delimiter has already
    /// been consumed. Backslash escapes are honored; hitting the end of the
    /// line before the closing delimiter is a lexical error.
    fn scan_quoted(&mut self, delim: u8, start: usize) -> Result<Token, String> {
        loop {
            match self.bump() {
                Some(b'\\') => {
                    // Escape: skip the next byte whatever it is.
                    self.bump();
                }
                Some(b) if b == delim => {
                    let kind = if delim == b'"' {
                        TokenKind::StringLit
                    } else {
                        TokenKind::CharLit
                    };
                    return Ok(self.token(kind, start));
                }
                Some(b'\n') | None => {
                    let what = if delim == b'"' { "string" } else { "character" };
                    return Err(format!("unterminated {} literal", what));
                }
                Some(_) => (),
            }
        }
    }

    /// Scan a number: a digit run optionally absorbing a hex prefix and a
    /// trailing kind-style suffix, so that a pasted lexeme like `12_k`
    /// re-tokenizes as a single token. Interpretation of the digits is left
    /// to the expression evaluator.
    fn scan_number(&mut self, start: usize) -> Token {
        if self.src[start..].starts_with("0x") || self.src[start..].starts_with("0X") {
            self.pos = start + 2;
            self.eat_while(|b| b.is_ascii_hexdigit());
        } else {
            self.eat_while(|b| b.is_ascii_digit());
        }
        // Suffix: alphanumerics and underscores glued to the digit run.
        self.eat_while(|b| b.is_ascii_alphanumeric() || b == b'_');
        self.token(TokenKind::Number, start)
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Token, String>;

    fn next(&mut self) -> Option<Result<Token, String>> {
        let start = self.pos;
        let b = self.bump()?;
        use self::Opcode::*;
        use self::TokenKind::*;
        let op = |this: &Tokenizer<'a>, opcode| Ok(this.token(Operator(opcode), start));
        let tok = match b {
            b' ' | b'\t' => {
                self.eat_while(|b| b == b' ' || b == b'\t');
                Ok(self.token(Whitespace, start))
            }
            b'\n' => Ok(self.token(Newline, start)),
            b'\r' if self.peek() == Some(b'\n') => {
                self.bump();
                Ok(Token::new(Newline, "\n"))
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                self.eat_while(|b| b.is_ascii_alphanumeric() || b == b'_');
                Ok(self.token(Ident, start))
            }
            b'0'..=b'9' => {
                self.pos = start;
                Ok(self.scan_number(start))
            }
            b'"' => self.scan_quoted(b'"', start),
            b'\'' => self.scan_quoted(b'\'', start),
            b'(' => Ok(self.token(LParen, start)),
            b')' => Ok(self.token(RParen, start)),
            b',' => Ok(self.token(Comma, start)),
            b'#' => {
                if self.peek() == Some(b'#') {
                    self.bump();
                    Ok(self.token(HashHash, start))
                } else {
                    Ok(self.token(Hash, start))
                }
            }
            b'!' if self.mode == Mode::Source => {
                // Comment to end of line.
                self.eat_while(|b| b != b'\n');
                Ok(self.token(Comment, start))
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.bump();
                    op(self, Ne)
                } else {
                    op(self, LogicNot)
                }
            }
            b'+' => op(self, Add),
            b'-' => op(self, Sub),
            b'*' => {
                if self.peek() == Some(b'*') {
                    self.bump();
                    op(self, Pow)
                } else {
                    op(self, Mul)
                }
            }
            b'/' => op(self, Div),
            b'%' => op(self, Rem),
            b'~' => op(self, BitNot),
            b'^' => op(self, BitXor),
            b'&' => {
                if self.peek() == Some(b'&') {
                    self.bump();
                    op(self, LogicAnd)
                } else {
                    op(self, BitAnd)
                }
            }
            b'|' => {
                if self.peek() == Some(b'|') {
                    self.bump();
                    op(self, LogicOr)
                } else {
                    op(self, BitOr)
                }
            }
            b'<' => match self.peek() {
                Some(b'=') => {
                    self.bump();
                    op(self, Le)
                }
                Some(b'<') => {
                    self.bump();
                    op(self, Shl)
                }
                _ => op(self, Lt),
            },
            b'>' => match self.peek() {
                Some(b'=') => {
                    self.bump();
                    op(self, Ge)
                }
                Some(b'>') => {
                    self.bump();
                    op(self, Shr)
                }
                _ => op(self, Gt),
            },
            b'=' if self.peek() == Some(b'=') => {
                self.bump();
                op(self, Eq)
            }
            _ => {
                // Anything else passes through one scalar at a time; make
                // sure not to split a multi-byte UTF-8 sequence.
                while self
                    .peek()
                    .map(|b| b & 0b1100_0000 == 0b1000_0000)
                    .unwrap_or(false)
                {
                    self.pos += 1;
                }
                Ok(self.token(Other, start))
            }
        };
        Some(tok)
    }
}

/// Render a token sequence back to text by concatenating lexemes. When
/// `exclude_comments` is set, comment tokens are dropped.
pub fn render(tokens: &[Token], exclude_comments: bool) -> String {
    let mut out = String::new();
    for tok in tokens {
        if exclude_comments && tok.kind == TokenKind::Comment {
            continue;
        }
        out.push_str(&tok.text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str, mode: Mode) -> Vec<TokenKind> {
        Tokenizer::run(src, mode)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn identifiers_and_numbers() {
        let toks = Tokenizer::run("foo _bar12 42 0xFF 0755 12_k", Mode::Source).unwrap();
        let texts: Vec<_> = toks
            .iter()
            .filter(|t| !t.is_whitespace())
            .map(|t| (t.kind, t.text.as_str()))
            .collect();
        assert_eq!(
            texts,
            vec![
                (TokenKind::Ident, "foo"),
                (TokenKind::Ident, "_bar12"),
                (TokenKind::Number, "42"),
                (TokenKind::Number, "0xFF"),
                (TokenKind::Number, "0755"),
                (TokenKind::Number, "12_k"),
            ]
        );
    }

    #[test]
    fn operators() {
        use super::Opcode::*;
        let toks = Tokenizer::run("a**b<=c<<d&&e!=f", Mode::Expression).unwrap();
        let ops: Vec<_> = toks
            .iter()
            .filter_map(|t| match t.kind {
                TokenKind::Operator(op) => Some(op),
                _ => None,
            })
            .collect();
        assert_eq!(ops, vec![Pow, Le, Shl, LogicAnd, Ne]);
    }

    #[test]
    fn hash_and_hashhash() {
        assert_eq!(
            kinds("#x##y", Mode::Source),
            vec![
                TokenKind::Hash,
                TokenKind::Ident,
                TokenKind::HashHash,
                TokenKind::Ident
            ]
        );
    }

    #[test]
    fn bang_is_comment_in_source_mode() {
        let toks = Tokenizer::run("x = 1 ! trailing note", Mode::Source).unwrap();
        let last = toks.last().unwrap();
        assert_eq!(last.kind, TokenKind::Comment);
        assert_eq!(last.text, "! trailing note");
    }

    #[test]
    fn bang_is_operator_in_expression_mode() {
        assert_eq!(
            kinds("!defined", Mode::Expression),
            vec![TokenKind::Operator(Opcode::LogicNot), TokenKind::Ident]
        );
    }

    #[test]
    fn string_literals() {
        let toks = Tokenizer::run(r#""hi \"there\"" 'c'"#, Mode::Source).unwrap();
        assert_eq!(toks[0].kind, TokenKind::StringLit);
        assert_eq!(toks[0].text, r#""hi \"there\"""#);
        assert_eq!(toks[2].kind, TokenKind::CharLit);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let result: Result<Vec<_>, _> = Tokenizer::new("\"oops", Mode::Source).collect();
        assert!(result.is_err());
    }

    #[test]
    fn render_round_trip() {
        let src = "  x = foo(1, 2) + y ! note";
        let toks = Tokenizer::run(src, Mode::Source).unwrap();
        assert_eq!(render(&toks, false), src);
        assert_eq!(render(&toks, true), "  x = foo(1, 2) + y ");
    }

    #[test]
    fn hide_set_basics() {
        let mut h = HideSet::new();
        assert!(!h.contains("X"));
        h.insert("X");
        h.insert("X");
        assert!(h.contains("X"));
        let mut other = HideSet::new();
        other.insert("Y");
        h.extend(&other);
        assert!(h.contains("X") && h.contains("Y"));
    }
}
