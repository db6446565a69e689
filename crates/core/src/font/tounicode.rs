//! ToUnicode CMap parsing.
//!
//! A ToUnicode CMap maps character codes to Unicode strings through
//! `bfchar` pairs and `bfrange` runs. The CMap grammar shares its token
//! shapes with the object grammar, so the regular lexer does the reading.

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::parser::lexer::{Lexer, Token};

/// Character code to Unicode mapping from a ToUnicode CMap.
#[derive(Debug, Default)]
pub struct ToUnicodeMap {
    map: FxHashMap<u32, String>,
    /// Code byte width from the codespace ranges; 1 when absent.
    code_len: usize,
}

fn code_from_bytes(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

fn unicode_from_bytes(bytes: &[u8]) -> String {
    // Destination strings are UTF-16BE code units.
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|c| {
            if c.len() == 2 {
                u16::from_be_bytes([c[0], c[1]])
            } else {
                c[0] as u16
            }
        })
        .collect();
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

impl ToUnicodeMap {
    /// Parse the decoded bytes of a ToUnicode stream.
    pub fn parse(data: &[u8]) -> Self {
        let mut result = ToUnicodeMap {
            map: FxHashMap::default(),
            code_len: 1,
        };
        let mut lexer = Lexer::new(data);

        loop {
            let token = match lexer.next_token() {
                Ok(Token::Eof) => break,
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "unreadable ToUnicode data");
                    break;
                }
            };
            match token {
                Token::Keyword(kw) if kw == b"begincodespacerange" => {
                    if let (Ok(Token::String(lo)), Ok(Token::String(_hi))) =
                        (lexer.next_token(), lexer.next_token())
                    {
                        result.code_len = lo.len().clamp(1, 4);
                    }
                }
                Token::Keyword(kw) if kw == b"beginbfchar" => {
                    result.parse_bfchar(&mut lexer);
                }
                Token::Keyword(kw) if kw == b"beginbfrange" => {
                    result.parse_bfrange(&mut lexer);
                }
                _ => {}
            }
        }
        result
    }

    fn parse_bfchar(&mut self, lexer: &mut Lexer<'_>) {
        loop {
            let src = match lexer.next_token() {
                Ok(Token::String(s)) => s,
                _ => return,
            };
            let Ok(Token::String(dst)) = lexer.next_token() else {
                return;
            };
            self.map
                .insert(code_from_bytes(&src), unicode_from_bytes(&dst));
        }
    }

    fn parse_bfrange(&mut self, lexer: &mut Lexer<'_>) {
        loop {
            let lo = match lexer.next_token() {
                Ok(Token::String(s)) => code_from_bytes(&s),
                _ => return,
            };
            let hi = match lexer.next_token() {
                Ok(Token::String(s)) => code_from_bytes(&s),
                _ => return,
            };
            if hi < lo || hi - lo > 0xFFFF {
                warn!(lo, hi, "bfrange out of order or oversized, skipped");
                return;
            }
            match lexer.next_token() {
                // <lo> <hi> <dst>: consecutive codes increment the last
                // UTF-16 unit of dst.
                Ok(Token::String(dst)) => {
                    for code in lo..=hi {
                        let mut bytes = dst.clone();
                        let delta = code - lo;
                        if let Some(last) = bytes.last_mut() {
                            *last = last.wrapping_add(delta as u8);
                        }
                        self.map.insert(code, unicode_from_bytes(&bytes));
                    }
                }
                // <lo> <hi> [<d0> <d1> ...]: one destination per code.
                Ok(Token::ArrayStart) => {
                    let mut code = lo;
                    loop {
                        match lexer.next_token() {
                            Ok(Token::String(dst)) => {
                                self.map.insert(code, unicode_from_bytes(&dst));
                                code += 1;
                            }
                            Ok(Token::ArrayEnd) => break,
                            _ => return,
                        }
                    }
                }
                _ => return,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn code_len(&self) -> usize {
        self.code_len
    }

    pub fn get(&self, code: u32) -> Option<&str> {
        self.map.get(&code).map(String::as_str)
    }

    /// Decode a show-text string through the mapping. Codes without a
    /// mapping fall back to Latin-1 (single byte) or are dropped.
    pub fn decode(&self, bytes: &[u8]) -> String {
        let mut out = String::new();
        for chunk in bytes.chunks(self.code_len.max(1)) {
            let code = code_from_bytes(chunk);
            match self.get(code) {
                Some(s) => out.push_str(s),
                None if self.code_len == 1 => out.push(chunk[0] as char),
                None => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMAP: &[u8] = b"/CIDInit /ProcSet findresource begin\n\
        1 begincodespacerange\n<00> <ff>\nendcodespacerange\n\
        2 beginbfchar\n<41> <0041>\n<42> <00480069>\nendbfchar\n\
        1 beginbfrange\n<61> <63> <0061>\nendbfrange\nendcmap\n";

    #[test]
    fn test_bfchar_single_and_multi() {
        let map = ToUnicodeMap::parse(CMAP);
        assert_eq!(map.get(0x41), Some("A"));
        assert_eq!(map.get(0x42), Some("Hi"));
    }

    #[test]
    fn test_bfrange_increments() {
        let map = ToUnicodeMap::parse(CMAP);
        assert_eq!(map.get(0x61), Some("a"));
        assert_eq!(map.get(0x62), Some("b"));
        assert_eq!(map.get(0x63), Some("c"));
        assert_eq!(map.get(0x64), None);
    }

    #[test]
    fn test_two_byte_codespace_decode() {
        let data = b"1 begincodespacerange\n<0000> <ffff>\nendcodespacerange\n\
            1 beginbfchar\n<0102> <0058>\nendbfchar\n";
        let map = ToUnicodeMap::parse(data);
        assert_eq!(map.code_len(), 2);
        assert_eq!(map.decode(&[0x01, 0x02]), "X");
    }

    #[test]
    fn test_bfrange_array_form() {
        let data = b"1 beginbfrange\n<01> <02> [<0041> <0042>]\nendbfrange\n";
        let map = ToUnicodeMap::parse(data);
        assert_eq!(map.get(1), Some("A"));
        assert_eq!(map.get(2), Some("B"));
    }
}
