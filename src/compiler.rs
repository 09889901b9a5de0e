//! Compile structure map source into a [`StructMap`].
//!
//! Single pass, recursive descent over [`Lexer`] tokens. Struct types resolve only against
//! structs compiled earlier in the same source. Errors carry the 1-based source line; whether
//! the first error ends the compile is set by [`CompileOptions::stop_on_first_error`].

use crate::ast::*;
use crate::lexer::{line_of, Lexer, Token, TokenKind};
use std::collections::VecDeque;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Halt at the first error (otherwise skip to the next `};` and continue).
    pub stop_on_first_error: bool,
    /// Shown as the prefix of each [`Compilation::error_log`] line.
    pub file_name: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions { stop_on_first_error: true, file_name: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("expecting '{expected}', got '{found}'")]
    Expected { line: usize, expected: String, found: String },
    #[error("expected type, got '{found}' instead")]
    UnknownType { line: usize, found: String },
    #[error("parent class '{base}' not defined")]
    UnknownBase { line: usize, base: String },
    #[error("struct '{name}' already defined")]
    DuplicateStruct { line: usize, name: String },
    #[error("bitfield width '{width}' is not valid for '{name}'")]
    BadBitfield { line: usize, name: String, width: String },
    #[error("unexpected character '{ch}'")]
    BadChar { line: usize, ch: char },
    #[error("unexpected end of input")]
    UnexpectedEof { line: usize },
}

impl CompileError {
    pub fn line(&self) -> usize {
        match self {
            CompileError::Expected { line, .. }
            | CompileError::UnknownType { line, .. }
            | CompileError::UnknownBase { line, .. }
            | CompileError::DuplicateStruct { line, .. }
            | CompileError::BadBitfield { line, .. }
            | CompileError::BadChar { line, .. }
            | CompileError::UnexpectedEof { line } => *line,
        }
    }
}

/// Output of [`compile`]: the structs that compiled plus every error met on the way.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub map: StructMap,
    pub errors: Vec<CompileError>,
    file_name: Option<String>,
}

impl Compilation {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    /// One `<file>:<line> - <message>` line per error.
    pub fn error_log(&self) -> String {
        let file = self.file_name.as_deref().unwrap_or("<input>");
        let mut log = String::new();
        for e in &self.errors {
            let _ = writeln!(log, "{}:{} - {}", file, e.line(), e);
        }
        log
    }
}

pub fn compile(source: &str, options: &CompileOptions) -> Compilation {
    let mut c = Compiler::new(source);
    let mut errors = Vec::new();
    loop {
        match c.item() {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                tracing::debug!(line = e.line(), error = %e, "compile error");
                errors.push(e);
                if options.stop_on_first_error || !c.resync() {
                    break;
                }
            }
        }
    }
    tracing::debug!(structs = c.map.len(), errors = errors.len(), "compile finished");
    Compilation { map: c.map, errors, file_name: options.file_name.clone() }
}

/// Lexer tokens with `name:width` identifiers split into `name`, `:`, `width`.
struct TokenStream<'a> {
    lexer: Lexer<'a>,
    pending: VecDeque<Token<'a>>,
}

impl<'a> TokenStream<'a> {
    fn next(&mut self) -> Option<Token<'a>> {
        if let Some(t) = self.pending.pop_front() {
            return Some(t);
        }
        let t = self.lexer.next_token()?;
        if t.kind != TokenKind::Ident || !t.text.contains(':') {
            return Some(t);
        }
        split_colons(t, &mut self.pending);
        self.pending.pop_front()
    }
}

fn split_colons<'a>(t: Token<'a>, out: &mut VecDeque<Token<'a>>) {
    let b = t.text.as_bytes();
    let piece = |from: usize, to: usize| {
        let text = &t.text[from..to];
        let kind = if text == ":" {
            TokenKind::Delimiter
        } else if text.bytes().all(|c| c.is_ascii_digit()) {
            TokenKind::Number
        } else {
            TokenKind::Ident
        };
        Token { kind, text, offset: t.offset + from }
    };
    let mut start = 0;
    for i in 0..b.len() {
        let single = b[i] == b':' && b.get(i + 1) != Some(&b':') && (i == 0 || b[i - 1] != b':');
        if single {
            if i > start {
                out.push_back(piece(start, i));
            }
            out.push_back(piece(i, i + 1));
            start = i + 1;
        }
    }
    if start < b.len() {
        out.push_back(piece(start, b.len()));
    }
}

struct Compiler<'a> {
    src: &'a str,
    tokens: TokenStream<'a>,
    map: StructMap,
}

impl<'a> Compiler<'a> {
    fn new(src: &'a str) -> Self {
        Compiler {
            src,
            tokens: TokenStream { lexer: Lexer::new(src), pending: VecDeque::new() },
            map: StructMap::new(),
        }
    }

    fn line(&self, offset: usize) -> usize {
        line_of(self.src, offset)
    }

    /// Why the token stream ran dry: end of input or a character the lexer rejects.
    fn stuck(&self) -> CompileError {
        let off = self.tokens.lexer.offset();
        if self.tokens.lexer.at_end() {
            return CompileError::UnexpectedEof { line: self.line(self.src.len()) };
        }
        match self.src[off..].chars().next() {
            Some(ch) => CompileError::BadChar { line: self.line(off), ch },
            None => CompileError::UnexpectedEof { line: self.line(off) },
        }
    }

    fn next(&mut self) -> Result<Token<'a>, CompileError> {
        self.tokens.next().ok_or_else(|| self.stuck())
    }

    fn next_opt(&mut self) -> Result<Option<Token<'a>>, CompileError> {
        match self.tokens.next() {
            Some(t) => Ok(Some(t)),
            None if self.tokens.lexer.at_end() => Ok(None),
            None => Err(self.stuck()),
        }
    }

    fn expected(&self, t: &Token, expected: &str) -> CompileError {
        CompileError::Expected { line: self.line(t.offset), expected: expected.to_string(), found: t.text.to_string() }
    }

    fn expect(&mut self, lit: &str) -> Result<Token<'a>, CompileError> {
        let t = self.next()?;
        if t.is(lit) {
            Ok(t)
        } else {
            Err(self.expected(&t, lit))
        }
    }

    fn ident(&mut self, what: &str) -> Result<Token<'a>, CompileError> {
        let t = self.next()?;
        if t.kind == TokenKind::Ident {
            Ok(t)
        } else {
            Err(self.expected(&t, what))
        }
    }

    /// Skip past the next `};`. Returns false when the input ran out first.
    fn resync(&mut self) -> bool {
        self.tokens.pending.clear();
        let mut close = false;
        loop {
            match self.tokens.next() {
                Some(t) if t.text == ";" && close => return true,
                Some(t) => close = t.text == "}",
                None if self.tokens.lexer.at_end() => return false,
                None => {
                    self.tokens.lexer.bump();
                    close = false;
                }
            }
        }
    }

    /// One top-level item. `Ok(false)` at end of input.
    fn item(&mut self) -> Result<bool, CompileError> {
        let Some(t) = self.next_opt()? else {
            return Ok(false);
        };
        if t.kind == TokenKind::Preprocessor {
            self.directive(t)?;
        } else if t.is("struct") {
            self.struct_def()?;
        } else {
            return Err(self.expected(&t, "struct"));
        }
        Ok(true)
    }

    /// `#define NAME value`; other directives are ignored.
    fn directive(&mut self, t: Token<'a>) -> Result<(), CompileError> {
        let body = t.text.trim_start_matches('#').trim_start();
        let (keyword, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        if !keyword.eq_ignore_ascii_case("define") {
            tracing::trace!(directive = keyword, "ignored directive");
            return Ok(());
        }
        let rest = rest.trim_start();
        let (name, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if name.is_empty() {
            return Err(CompileError::Expected {
                line: self.line(t.offset),
                expected: "define name".into(),
                found: String::new(),
            });
        }
        let value = value.replace("\\\r\n", " ").replace("\\\n", " ").trim().to_string();
        tracing::debug!(name, value = %value, "define");
        self.map.insert_define(name.to_string(), value);
        Ok(())
    }

    fn struct_def(&mut self) -> Result<(), CompileError> {
        let name = self.ident("struct name")?;
        let mut t = self.next()?;
        let mut parent = None;
        let mut base = None;
        if t.text == ":" {
            self.expect("inherits")?;
            let b = self.ident("base struct name")?;
            parent = Some(
                self.map
                    .find(b.text)
                    .ok_or_else(|| CompileError::UnknownBase { line: self.line(b.offset), base: b.text.to_string() })?,
            );
            base = Some(b.text.to_string());
            t = self.next()?;
        }
        // Name checks precede the body: after an error, resync expects this struct's `};` still ahead.
        if parent.is_none() && self.map.roots().any(|(_, s)| s.name.eq_ignore_ascii_case(name.text)) {
            return Err(CompileError::DuplicateStruct { line: self.line(name.offset), name: name.text.to_string() });
        }
        if t.text != "{" {
            return Err(self.expected(&t, "{"));
        }
        let members = self.body()?;
        self.expect(";")?;

        let def = StructDef { name: name.text.to_string(), base, members, children: Vec::new() };
        match parent {
            Some(p) => {
                tracing::debug!(name = name.text, base = %self.map.get(p).name, "specialization");
                self.map.insert_child(p, def);
            }
            None => {
                let line = self.line(name.offset);
                self.map
                    .insert_root(def)
                    .map_err(|_| CompileError::DuplicateStruct { line, name: name.text.to_string() })?;
                tracing::debug!(name = name.text, "struct");
            }
        }
        Ok(())
    }

    /// Members up to and including the closing `}`.
    fn body(&mut self) -> Result<Vec<Member>, CompileError> {
        let mut members = Vec::new();
        loop {
            let t = self.next()?;
            if t.text == "}" {
                return Ok(members);
            }
            if t.kind == TokenKind::Preprocessor {
                self.directive(t)?;
            } else if t.is("if") {
                members.push(Member::Condition(self.condition()?));
            } else {
                members.push(Member::Var(self.var(t)?));
            }
        }
    }

    fn condition(&mut self) -> Result<ConditionDef, CompileError> {
        self.expect("(")?;
        let tokens = self.balanced("(", ")")?;
        if tokens.is_empty() {
            return Err(CompileError::Expected {
                line: self.line(self.tokens.lexer.offset()),
                expected: "condition".into(),
                found: ")".into(),
            });
        }
        self.expect("{")?;
        let members = self.body()?;
        Ok(ConditionDef { tokens, members })
    }

    /// Token texts up to the `close` matching an already consumed `open`. Adjacent delimiters
    /// forming `==`, `!=`, `<<` or `>>` are joined back into one operator.
    fn balanced(&mut self, open: &str, close: &str) -> Result<Vec<String>, CompileError> {
        let mut depth = 0usize;
        let mut out: Vec<String> = Vec::new();
        let mut prev_end = usize::MAX;
        loop {
            let t = self.next()?;
            if t.text == close {
                if depth == 0 {
                    return Ok(out);
                }
                depth -= 1;
            } else if t.text == open {
                depth += 1;
            }
            let joined = match out.last_mut() {
                Some(last) if prev_end == t.offset && is_split_operator(last, t.text) => {
                    last.push_str(t.text);
                    true
                }
                _ => false,
            };
            if !joined {
                out.push(t.text.to_string());
            }
            prev_end = t.offset + t.text.len();
        }
    }

    fn var(&mut self, first: Token<'a>) -> Result<VarDef, CompileError> {
        let mut t = first;
        let (mut hidden, mut debug) = (false, false);
        loop {
            if t.is("hidden") {
                hidden = true;
            } else if t.is("debug") {
                debug = true;
            } else {
                break;
            }
            t = self.next()?;
        }

        let (mut element, mut dims) = self.type_of(&t)?;
        let name = self.ident("member name")?;
        let mut t = self.next()?;
        while t.text == "[" {
            let open = t;
            let tokens = self.balanced("[", "]")?;
            if tokens.is_empty() {
                return Err(self.expected(&open, "array length"));
            }
            dims.push(ArrayDimension { tokens });
            t = self.next()?;
        }

        if t.text == ":" {
            let width = self.next()?;
            let bits = width.text.parse::<u8>().ok();
            let bad = || CompileError::BadBitfield {
                line: self.line(width.offset),
                name: name.text.to_string(),
                width: width.text.to_string(),
            };
            match (&mut element, bits) {
                (ElementType::Basic(b), Some(n))
                    if b.kind == BasicKind::Integer && n > 0 && n as u32 <= b.byte_width as u32 * 8 =>
                {
                    b.bit_width = n;
                }
                _ => return Err(bad()),
            }
            t = self.next()?;
        }

        let mut constraint = None;
        if t.text == "=" {
            let lit = self.next()?;
            constraint = Some(self.literal(&lit));
            t = self.next()?;
        }
        if t.text != ";" {
            return Err(self.expected(&t, ";"));
        }

        Ok(VarDef {
            name: name.text.to_string(),
            ty: VarDefType { element, dims },
            constraint,
            hidden,
            debug,
        })
    }

    /// Quote-stripped, unescaped constraint text. A bare `#define` name stands for its value.
    fn literal(&self, t: &Token) -> String {
        match t.kind {
            TokenKind::Str => unescape(t.text),
            TokenKind::Ident => self.map.define(t.text).unwrap_or(t.text).to_string(),
            _ => t.text.to_string(),
        }
    }

    /// Resolve a type name: a built-in, else a struct compiled so far.
    fn type_of(&self, t: &Token) -> Result<(ElementType, Vec<ArrayDimension>), CompileError> {
        if t.kind == TokenKind::Ident {
            if let Some((basic, leading)) = builtin(t.text) {
                let dims = leading.map(ArrayDimension::literal).into_iter().collect();
                return Ok((ElementType::Basic(basic), dims));
            }
            if let Some(id) = self.map.find(t.text) {
                return Ok((ElementType::Complex(id), Vec::new()));
            }
        }
        Err(CompileError::UnknownType { line: self.line(t.offset), found: t.text.to_string() })
    }
}

/// Built-in type names, matched case-insensitively. `charN` for an unlisted `N` is a one-byte
/// char array of `N` elements, returned as the leading dimension.
fn builtin(name: &str) -> Option<(Basic, Option<u64>)> {
    let lower = name.to_ascii_lowercase();
    let digits = |s: &str| s.bytes().all(|c| c.is_ascii_digit());
    let int_width = |s: &str| match s {
        "8" => 1,
        "16" => 2,
        "64" => 8,
        _ => 4,
    };
    let plain = |kind, byte_width| Basic { kind, byte_width, bit_width: 0, signed: false };

    if let Some(rest) = lower.strip_prefix("uint").filter(|r| digits(r)) {
        return Some((Basic::integer(int_width(rest), false), None));
    }
    if let Some(rest) = lower.strip_prefix("int").filter(|r| digits(r)) {
        return Some((Basic::integer(int_width(rest), true), None));
    }
    if let Some(rest) = lower.strip_prefix("nibble").filter(|r| digits(r)) {
        let bits: u32 = rest.parse().unwrap_or(0);
        let bytes = if bits == 0 { 2 } else { (bits / 8).max(1) };
        return (bytes <= 16).then(|| (plain(BasicKind::Nibble, bytes as u8), None));
    }
    match lower.as_str() {
        "float" => return Some((Basic { signed: true, ..plain(BasicKind::Float, 4) }, None)),
        "double" => return Some((Basic { signed: true, ..plain(BasicKind::Float, 8) }, None)),
        _ => {}
    }
    if let Some(rest) = lower.strip_prefix("char").filter(|r| digits(r)) {
        return match rest {
            "" | "8" => Some((plain(BasicKind::Char, 1), None)),
            "16" => Some((plain(BasicKind::Char, 2), None)),
            "64" => Some((plain(BasicKind::Char, 8), None)),
            n => n.parse().ok().map(|len| (plain(BasicKind::Char, 1), Some(len))),
        };
    }
    if let Some(rest) = lower.strip_prefix("strz") {
        let width = match rest {
            "" | "8" => 1,
            "16" => 2,
            "64" => 8,
            _ => return None,
        };
        return Some((plain(BasicKind::StrZ, width), None));
    }
    None
}

fn is_split_operator(first: &str, second: &str) -> bool {
    matches!((first, second), ("=", "=") | ("!", "=") | ("<", "<") | (">", ">"))
}

fn unescape(quoted: &str) -> String {
    let mut chars = quoted.chars();
    let quote = chars.next();
    let mut inner: String = chars.collect();
    if quote.is_some() && inner.ends_with(|c| Some(c) == quote) {
        inner.pop();
    }
    let mut out = String::with_capacity(inner.len());
    let mut it = inner.chars().peekable();
    while let Some(c) = it.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match it.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let hex: String = std::iter::from_fn(|| it.next_if(|c| c.is_ascii_hexdigit())).take(2).collect();
                match u8::from_str_radix(&hex, 16) {
                    Ok(b) => out.push(b as char),
                    Err(_) => out.push('x'),
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_widths() {
        let w = |n: &str| builtin(n).map(|(b, d)| (b.kind, b.byte_width, b.signed, d));
        assert_eq!(w("uint8"), Some((BasicKind::Integer, 1, false, None)));
        assert_eq!(w("INT16"), Some((BasicKind::Integer, 2, true, None)));
        assert_eq!(w("int"), Some((BasicKind::Integer, 4, true, None)));
        assert_eq!(w("uint24"), Some((BasicKind::Integer, 4, false, None)));
        assert_eq!(w("nibble"), Some((BasicKind::Nibble, 2, false, None)));
        assert_eq!(w("nibble32"), Some((BasicKind::Nibble, 4, false, None)));
        assert_eq!(w("char16"), Some((BasicKind::Char, 2, false, None)));
        assert_eq!(w("char4"), Some((BasicKind::Char, 1, false, Some(4))));
        assert_eq!(w("strz64"), Some((BasicKind::StrZ, 8, false, None)));
        assert_eq!(w("double"), Some((BasicKind::Float, 8, true, None)));
        assert_eq!(w("integer"), None);
        assert_eq!(w("strzz"), None);
    }

    #[test]
    fn colon_identifiers_split() {
        let mut out = VecDeque::new();
        split_colons(Token { kind: TokenKind::Ident, text: "a:4", offset: 10 }, &mut out);
        let texts: Vec<_> = out.iter().map(|t| (t.text, t.kind, t.offset)).collect();
        assert_eq!(
            texts,
            vec![("a", TokenKind::Ident, 10), (":", TokenKind::Delimiter, 11), ("4", TokenKind::Number, 12)]
        );
        out.clear();
        split_colons(Token { kind: TokenKind::Ident, text: "ns::x", offset: 0 }, &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn unescape_strings() {
        assert_eq!(unescape("\"ABCD\""), "ABCD");
        assert_eq!(unescape("'a\\tb'"), "a\tb");
        assert_eq!(unescape("\"\\x41\\\"\""), "A\"");
    }
}
