//! Byte-level tokenizer for the PDF object grammar.
//!
//! One token per [`Lexer::next_token`] call; [`Token::Eof`] at exhaustion.
//! The grammar is whitespace-tolerant: tokens may abut wherever a delimiter
//! byte separates them, and the lexer never requires whitespace that the
//! grammar does not.

use tracing::warn;

use crate::error::{PdfError, Result};

/// A lexical token of the PDF object grammar.
///
/// Keywords carry their raw bytes; the caller decides whether they are
/// structural (`obj`, `stream`, `R`) or content-stream operators.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Real(f64),
    Bool(bool),
    Null,
    /// A name token (`/Name`), stored without the slash, `#xx` escapes
    /// already applied.
    Name(String),
    /// A literal `(...)` or hex `<...>` string, as raw bytes.
    String(Vec<u8>),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    /// Any bare keyword: object structure or a content operator.
    Keyword(Vec<u8>),
    /// End of input. Returned indefinitely once reached.
    Eof,
}

impl Token {
    pub fn is_keyword(&self, kw: &[u8]) -> bool {
        matches!(self, Token::Keyword(k) if k == kw)
    }
}

pub const fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x00' | b'\x0c')
}

pub const fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

const fn is_regular_end(b: u8) -> bool {
    is_whitespace(b) || is_delimiter(b)
}

const fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Tokenizer over a byte buffer.
pub struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position in the buffer.
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Set the current position.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Skip whitespace and `%` comments.
    pub fn skip_whitespace(&mut self) {
        while self.pos < self.data.len() {
            let b = self.data[self.pos];
            if b == b'%' {
                while self.pos < self.data.len()
                    && self.data[self.pos] != b'\n'
                    && self.data[self.pos] != b'\r'
                {
                    self.pos += 1;
                }
                continue;
            }
            if !is_whitespace(b) {
                return;
            }
            self.pos += 1;
        }
    }

    /// Consume raw bytes up to (not including) the next occurrence of
    /// `target` preceded by a whitespace or delimiter boundary, leaving the
    /// cursor on `target`. Trailing whitespace before `target` is trimmed.
    /// Used for inline image data, where arbitrary binary bytes run up to an
    /// end marker.
    pub fn read_until_marker(&mut self, target: &[u8]) -> Vec<u8> {
        let start = self.pos;
        let mut i = self.pos;
        while i + target.len() <= self.data.len() {
            if &self.data[i..i + target.len()] == target
                && (i == start || is_regular_end(self.data[i - 1]))
                && self
                    .data
                    .get(i + target.len())
                    .is_none_or(|&b| is_regular_end(b))
            {
                let mut end = i;
                while end > start && is_whitespace(self.data[end - 1]) {
                    end -= 1;
                }
                self.pos = i;
                return self.data[start..end].to_vec();
            }
            i += 1;
        }
        // No marker: everything left is data.
        self.pos = self.data.len();
        self.data[start..].to_vec()
    }

    /// Consume raw bytes up to and including a literal byte sequence, with
    /// no boundary requirement. Used for the ASCII85 `~>` end-of-data
    /// marker inside inline images.
    pub fn read_through(&mut self, target: &[u8]) -> Vec<u8> {
        let start = self.pos;
        let mut i = self.pos;
        while i + target.len() <= self.data.len() {
            if &self.data[i..i + target.len()] == target {
                self.pos = i + target.len();
                return self.data[start..self.pos].to_vec();
            }
            i += 1;
        }
        self.pos = self.data.len();
        self.data[start..].to_vec()
    }

    fn parse_name(&mut self) -> Result<Token> {
        self.advance(); // '/'
        let mut name = Vec::new();
        while let Some(b) = self.peek() {
            if is_regular_end(b) {
                break;
            }
            if b == b'#' {
                if let (Some(c1), Some(c2)) = (self.peek_at(1), self.peek_at(2))
                    && let (Some(h), Some(l)) = (hex_value(c1), hex_value(c2))
                {
                    self.advance();
                    self.advance();
                    self.advance();
                    name.push((h << 4) | l);
                    continue;
                }
                // Invalid escape: drop the '#', keep the following bytes.
                self.advance();
            } else {
                name.push(self.advance().unwrap());
            }
        }
        Ok(Token::Name(String::from_utf8_lossy(&name).into_owned()))
    }

    fn parse_number(&mut self) -> Result<Token> {
        let start = self.pos;
        let mut has_dot = false;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.advance();
        }
        if self.peek() == Some(b'.') {
            has_dot = true;
            self.advance();
        }
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                self.advance();
            } else if b == b'.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }
        let s = std::str::from_utf8(&self.data[start..self.pos]).map_err(|_| {
            PdfError::TokenError {
                pos: start,
                msg: "invalid number".into(),
            }
        })?;
        if has_dot {
            // A bare "." or "-." has no digits; treat as zero like most
            // readers do rather than failing the stream.
            Ok(Token::Real(s.parse().unwrap_or(0.0)))
        } else {
            match s.parse::<i64>() {
                Ok(v) => Ok(Token::Int(v)),
                Err(_) => Err(PdfError::TokenError {
                    pos: start,
                    msg: format!("invalid int: {}", s),
                }),
            }
        }
    }

    fn parse_string(&mut self) -> Result<Token> {
        self.advance(); // '('
        let mut result = Vec::new();
        let mut depth = 1usize;
        loop {
            match self.advance() {
                Some(b'(') => {
                    depth += 1;
                    result.push(b'(');
                }
                Some(b')') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    result.push(b')');
                }
                Some(b'\\') => match self.advance() {
                    Some(b'n') => result.push(b'\n'),
                    Some(b'r') => result.push(b'\r'),
                    Some(b't') => result.push(b'\t'),
                    Some(b'b') => result.push(0x08),
                    Some(b'f') => result.push(0x0c),
                    Some(b'(') => result.push(b'('),
                    Some(b')') => result.push(b')'),
                    Some(b'\\') => result.push(b'\\'),
                    Some(b'\r') => {
                        // Line continuation: swallow an optional \n too.
                        if self.peek() == Some(b'\n') {
                            self.advance();
                        }
                    }
                    Some(b'\n') => {}
                    Some(c) if c.is_ascii_digit() && c < b'8' => {
                        // Octal escape, 1-3 digits.
                        let mut octal = (c - b'0') as u32;
                        for _ in 0..2 {
                            match self.peek() {
                                Some(d) if d.is_ascii_digit() && d < b'8' => {
                                    self.advance();
                                    octal = octal * 8 + (d - b'0') as u32;
                                }
                                _ => break,
                            }
                        }
                        result.push((octal & 0xff) as u8);
                    }
                    Some(c) => result.push(c),
                    None => return Err(PdfError::UnexpectedEof),
                },
                Some(c) => result.push(c),
                None => return Err(PdfError::UnexpectedEof),
            }
        }
        Ok(Token::String(result))
    }

    fn parse_hex_string(&mut self) -> Result<Token> {
        self.advance(); // '<'
        let mut result = Vec::new();
        let mut pending: Option<u8> = None;
        loop {
            match self.peek() {
                Some(b'>') => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    if let Some(nibble) = hex_value(c) {
                        self.advance();
                        match pending.take() {
                            Some(high) => result.push((high << 4) | nibble),
                            None => pending = Some(nibble),
                        }
                    } else if is_whitespace(c) {
                        self.advance();
                    } else {
                        warn!(pos = self.pos, byte = c, "bad byte in hex string");
                        self.advance();
                    }
                }
                None => break,
            }
        }
        // Odd digit count: the final digit is the high nibble.
        if let Some(nibble) = pending {
            result.push(nibble << 4);
        }
        Ok(Token::String(result))
    }

    fn parse_keyword(&mut self) -> Result<Token> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_regular_end(b) {
                break;
            }
            self.advance();
        }
        let bytes = &self.data[start..self.pos];
        match bytes {
            b"true" => Ok(Token::Bool(true)),
            b"false" => Ok(Token::Bool(false)),
            b"null" => Ok(Token::Null),
            _ => Ok(Token::Keyword(bytes.to_vec())),
        }
    }

    /// Produce the next token. [`Token::Eof`] once the buffer is exhausted.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace();
        if self.at_end() {
            return Ok(Token::Eof);
        }
        let b = self.peek().unwrap();
        match b {
            b'/' => self.parse_name(),
            b'(' => self.parse_string(),
            b'<' => {
                if self.peek_at(1) == Some(b'<') {
                    self.pos += 2;
                    Ok(Token::DictStart)
                } else {
                    self.parse_hex_string()
                }
            }
            b'>' => {
                if self.peek_at(1) == Some(b'>') {
                    self.pos += 2;
                    Ok(Token::DictEnd)
                } else {
                    // A lone '>' is corrupt; skip it rather than aborting.
                    warn!(pos = self.pos, "stray '>' in object stream");
                    self.pos += 1;
                    self.next_token()
                }
            }
            b'[' => {
                self.pos += 1;
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.pos += 1;
                Ok(Token::ArrayEnd)
            }
            b'{' | b'}' => {
                // PostScript procedure braces appear in Type 4 functions;
                // surface them as keywords so callers can skip them.
                self.pos += 1;
                Ok(Token::Keyword(vec![b]))
            }
            b')' => {
                warn!(pos = self.pos, "stray ')' in object stream");
                self.pos += 1;
                self.next_token()
            }
            b'+' | b'-' => {
                if matches!(self.peek_at(1), Some(c) if c.is_ascii_digit() || c == b'.') {
                    self.parse_number()
                } else {
                    self.parse_keyword()
                }
            }
            b'.' => {
                if matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
                    self.parse_number()
                } else {
                    self.parse_keyword()
                }
            }
            c if c.is_ascii_digit() => self.parse_number(),
            _ => self.parse_keyword(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(data: &[u8]) -> Vec<Token> {
        let mut lexer = Lexer::new(data);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token().unwrap();
            if tok == Token::Eof {
                return out;
            }
            out.push(tok);
        }
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens(b"1 -2 +3 4.5 -.5 ."),
            vec![
                Token::Int(1),
                Token::Int(-2),
                Token::Int(3),
                Token::Real(4.5),
                Token::Real(-0.5),
                Token::Keyword(b".".to_vec()),
            ]
        );
    }

    #[test]
    fn test_names_with_escapes() {
        assert_eq!(
            tokens(b"/Name /A#20B /#2F"),
            vec![
                Token::Name("Name".into()),
                Token::Name("A B".into()),
                Token::Name("/".into()),
            ]
        );
    }

    #[test]
    fn test_name_invalid_hex_escape_drops_hash() {
        assert_eq!(tokens(b"/A#ZZ"), vec![Token::Name("AZZ".into())]);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(b"(a\\(b\\)c) (\\101\\12) (line\\\ncont) ((nested))"),
            vec![
                Token::String(b"a(b)c".to_vec()),
                Token::String(b"A\n".to_vec()),
                Token::String(b"linecont".to_vec()),
                Token::String(b"(nested)".to_vec()),
            ]
        );
    }

    #[test]
    fn test_hex_string_odd_length() {
        assert_eq!(
            tokens(b"<48656C6C6F> <9>"),
            vec![
                Token::String(b"Hello".to_vec()),
                Token::String(vec![0x90]),
            ]
        );
    }

    #[test]
    fn test_tokens_without_whitespace() {
        assert_eq!(
            tokens(b"<</A 1/B[2 3]>>"),
            vec![
                Token::DictStart,
                Token::Name("A".into()),
                Token::Int(1),
                Token::Name("B".into()),
                Token::ArrayStart,
                Token::Int(2),
                Token::Int(3),
                Token::ArrayEnd,
                Token::DictEnd,
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            tokens(b"1 % a comment\n2"),
            vec![Token::Int(1), Token::Int(2)]
        );
    }

    #[test]
    fn test_eof_is_sticky() {
        let mut lexer = Lexer::new(b"1");
        assert_eq!(lexer.next_token().unwrap(), Token::Int(1));
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_read_until_marker() {
        let mut lexer = Lexer::new(b"binary\xff\xfe data EI rest");
        let data = lexer.read_until_marker(b"EI");
        assert_eq!(data, b"binary\xff\xfe data");
        assert!(lexer.remaining().starts_with(b"EI"));
    }
}
