//! Pull-based tokenizer for structure map source.
//!
//! The lexer hands out one token per call and never looks further ahead than the token it is
//! producing. Comments are skipped transparently. Tokens borrow their text from the source, so
//! scanning past a token ([`Lexer::skip`]) costs nothing beyond moving the position.
//!
//! Recognized, in priority order:
//!
//! - `#` preprocessor lines, up to the end of line (a trailing `\` continues the line)
//! - identifiers `[A-Za-z_][A-Za-z0-9_:]*`
//! - `//` and `/* */` comments (skipped)
//! - two-character operators `-> || && ++ -- /= -= *= += ^= >= <=`
//! - numbers: `0x` hex, otherwise the charset `[-.eE0-9]`
//! - single-character delimiters `()*[]&,{};:=!<>?.\+/%^|~`
//! - `"` or `'` quoted strings, where `\` escapes any following character

const WHITE: &[u8] = b" \r\t\n";
const DELIMITERS: &[u8] = b"()*[]&,{};:=!<>?.\\+/%^|~";
const TWO_CHAR_OPS: [&[u8; 2]; 12] = [
    b"->", b"||", b"&&", b"++", b"--", b"/=", b"-=", b"*=", b"+=", b"^=", b">=", b"<=",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Preprocessor,
    Ident,
    Operator,
    Number,
    Delimiter,
    Str,
}

/// One lexed token; `offset` is the byte offset of its first character in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub offset: usize,
}

impl<'a> Token<'a> {
    pub fn is(&self, text: &str) -> bool {
        self.text.eq_ignore_ascii_case(text)
    }
}

#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src, pos: 0 }
    }

    /// Byte offset of the next unread character.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    /// True once only whitespace and comments remain.
    pub fn at_end(&self) -> bool {
        let mut probe = self.clone();
        probe.skip_trivia();
        probe.pos >= probe.src.len()
    }

    /// Advance past the next token without producing it. Returns false at end of input
    /// or on an unrecognized character.
    pub fn skip(&mut self) -> bool {
        self.next_token().is_some()
    }

    /// Step over one character, e.g. one the lexer rejected.
    pub fn bump(&mut self) {
        self.skip_trivia();
        self.pos += self.src[self.pos..].chars().next().map_or(0, char::len_utf8);
    }

    /// Produce the next token, or `None` at end of input or on an unrecognized character
    /// (in which case the position is left on that character).
    pub fn next_token(&mut self) -> Option<Token<'a>> {
        self.skip_trivia();
        let bytes = self.src.as_bytes();
        let start = self.pos;
        let c = *bytes.get(start)?;
        let at = |i: usize| bytes.get(i).copied().unwrap_or(0);

        let kind = if c == b'#' {
            self.pos += 1;
            let mut last_non_white = 0u8;
            while self.pos < bytes.len() {
                let b = bytes[self.pos];
                if b == b'\n' && last_non_white != b'\\' {
                    break;
                }
                if !WHITE.contains(&b) {
                    last_non_white = b;
                }
                self.pos += 1;
            }
            TokenKind::Preprocessor
        } else if c == b'_' || c.is_ascii_alphabetic() {
            self.pos += 1;
            while self.pos < bytes.len()
                && (bytes[self.pos] == b'_' || bytes[self.pos] == b':' || bytes[self.pos].is_ascii_alphanumeric())
            {
                self.pos += 1;
            }
            TokenKind::Ident
        } else if TWO_CHAR_OPS.iter().any(|op| op[0] == c && op[1] == at(start + 1)) {
            self.pos += 2;
            TokenKind::Operator
        } else if c.is_ascii_digit() || c == b'-' {
            let hex = c == b'0' && at(start + 1) == b'x';
            if hex {
                self.pos += 2;
            }
            while self.pos < bytes.len() {
                let b = bytes[self.pos];
                let ok = matches!(b, b'-' | b'.' | b'e' | b'E')
                    || b.is_ascii_digit()
                    || (hex && b.is_ascii_hexdigit());
                if !ok {
                    break;
                }
                self.pos += 1;
            }
            TokenKind::Number
        } else if DELIMITERS.contains(&c) {
            self.pos += 1;
            TokenKind::Delimiter
        } else if c == b'"' || c == b'\'' {
            self.pos += 1;
            while self.pos < bytes.len() {
                let b = bytes[self.pos];
                if b == b'\\' {
                    self.pos += 1;
                    self.pos += self.src[self.pos..].chars().next().map_or(0, char::len_utf8);
                } else {
                    self.pos += 1;
                    if b == c {
                        break;
                    }
                }
            }
            self.pos = self.pos.min(bytes.len());
            TokenKind::Str
        } else {
            return None;
        };

        Some(Token {
            kind,
            text: &self.src[start..self.pos],
            offset: start,
        })
    }

    fn skip_trivia(&mut self) {
        let bytes = self.src.as_bytes();
        loop {
            while self.pos < bytes.len() && WHITE.contains(&bytes[self.pos]) {
                self.pos += 1;
            }
            let rest = &bytes[self.pos..];
            if rest.starts_with(b"//") {
                match rest.iter().position(|&b| b == b'\n') {
                    Some(nl) => self.pos += nl + 1,
                    None => self.pos = bytes.len(),
                }
            } else if rest.starts_with(b"/*") {
                match self.src[self.pos + 2..].find("*/") {
                    Some(end) => self.pos += 2 + end + 2,
                    None => self.pos = bytes.len(),
                }
            } else {
                return;
            }
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        self.next_token()
    }
}

/// 1-based line number of `offset` within `src`.
pub fn line_of(src: &str, offset: usize) -> usize {
    let end = offset.min(src.len());
    src.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}
