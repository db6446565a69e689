//! Recursive-descent composer over the lexer, building [`PDFObject`] values.
//!
//! Handles arrays and dictionaries of unbounded nesting depth, the
//! `objid genno R` indirect-reference lookahead, and `obj ... endobj`
//! wrappers. Stream data extraction stays in the document layer, which
//! knows how to resolve an indirect `/Length` and slice the file buffer.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{PdfError, Result};
use crate::model::objects::{PDFObjRef, PDFObject};
use crate::parser::lexer::{Lexer, Token};

pub struct PDFParser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> PDFParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            lexer: Lexer::new(data),
        }
    }

    pub fn tell(&self) -> usize {
        self.lexer.tell()
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.lexer.set_pos(pos);
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.lexer.remaining()
    }

    /// Parse one object. Fails with `UnexpectedEof` at end of input.
    pub fn parse_object(&mut self) -> Result<PDFObject> {
        let token = self.lexer.next_token()?;
        self.parse_from_token(token)
    }

    /// Parse one object, or `None` at end of input.
    pub fn parse_object_opt(&mut self) -> Result<Option<PDFObject>> {
        match self.lexer.next_token()? {
            Token::Eof => Ok(None),
            token => self.parse_from_token(token).map(Some),
        }
    }

    fn parse_from_token(&mut self, token: Token) -> Result<PDFObject> {
        match token {
            Token::Null => Ok(PDFObject::Null),
            Token::Bool(b) => Ok(PDFObject::Bool(b)),
            Token::Int(i) => self.parse_int_or_ref(i),
            Token::Real(r) => Ok(PDFObject::Real(r)),
            Token::Name(n) => Ok(PDFObject::Name(n)),
            Token::String(s) => Ok(PDFObject::String(s)),
            Token::ArrayStart => self.parse_array(),
            Token::DictStart => self.parse_dict().map(PDFObject::Dict),
            Token::Eof => Err(PdfError::UnexpectedEof),
            other => Err(PdfError::SyntaxError(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }

    /// An integer may begin an `objid genno R` reference. Look ahead for
    /// `Int Keyword(R)` and rewind on a miss.
    fn parse_int_or_ref(&mut self, value: i64) -> Result<PDFObject> {
        let mark = self.lexer.tell();
        if let Token::Int(genno) = self.lexer.next_token()?
            && self.lexer.next_token()?.is_keyword(b"R")
            && value >= 0
            && genno >= 0
        {
            return Ok(PDFObject::Ref(PDFObjRef::new(value as u32, genno as u32)));
        }
        self.lexer.set_pos(mark);
        Ok(PDFObject::Int(value))
    }

    fn parse_array(&mut self) -> Result<PDFObject> {
        let mut items = Vec::new();
        loop {
            match self.lexer.next_token()? {
                Token::ArrayEnd => return Ok(PDFObject::Array(items)),
                Token::Eof => {
                    warn!("unterminated array");
                    return Ok(PDFObject::Array(items));
                }
                token => items.push(self.parse_from_token(token)?),
            }
        }
    }

    fn parse_dict(&mut self) -> Result<HashMap<String, PDFObject>> {
        let mut dict = HashMap::new();
        loop {
            let key = match self.lexer.next_token()? {
                Token::DictEnd => return Ok(dict),
                Token::Eof => {
                    warn!("unterminated dictionary");
                    return Ok(dict);
                }
                Token::Name(n) => n,
                other => {
                    // A non-name key is corrupt; skip the token and carry
                    // on with the rest of the dictionary.
                    warn!(token = ?other, "non-name dictionary key skipped");
                    continue;
                }
            };
            match self.lexer.next_token()? {
                Token::DictEnd => {
                    warn!(key = %key, "dictionary key without value");
                    return Ok(dict);
                }
                Token::Eof => {
                    warn!("unterminated dictionary");
                    return Ok(dict);
                }
                token => {
                    dict.insert(key, self.parse_from_token(token)?);
                }
            }
        }
    }

    /// Parse an `objid genno obj <object> endobj` wrapper, returning the
    /// ids and the body. The `endobj` keyword is optional in the wild.
    pub fn parse_indirect_object(&mut self) -> Result<(u32, u32, PDFObject)> {
        let objid = match self.lexer.next_token()? {
            Token::Int(i) if i >= 0 => i as u32,
            other => {
                return Err(PdfError::SyntaxError(format!(
                    "expected object number, got {:?}",
                    other
                )));
            }
        };
        let genno = match self.lexer.next_token()? {
            Token::Int(i) if i >= 0 => i as u32,
            other => {
                return Err(PdfError::SyntaxError(format!(
                    "expected generation number, got {:?}",
                    other
                )));
            }
        };
        if !self.lexer.next_token()?.is_keyword(b"obj") {
            return Err(PdfError::SyntaxError("expected 'obj' keyword".into()));
        }
        let obj = self.parse_object()?;
        let mark = self.lexer.tell();
        if !self.lexer.next_token()?.is_keyword(b"endobj") {
            self.lexer.set_pos(mark);
        }
        Ok((objid, genno, obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_structures() {
        let mut parser = PDFParser::new(b"<</Kids [1 0 R 2 0 R] /Count 2 /X <</Y (z)>>>>");
        let obj = parser.parse_object().unwrap();
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get("Count"), Some(&PDFObject::Int(2)));
        let kids = dict.get("Kids").unwrap().as_array().unwrap();
        assert_eq!(kids[0], PDFObject::Ref(PDFObjRef::new(1, 0)));
        assert_eq!(kids[1], PDFObject::Ref(PDFObjRef::new(2, 0)));
        let inner = dict.get("X").unwrap().as_dict().unwrap();
        assert_eq!(inner.get("Y"), Some(&PDFObject::String(b"z".to_vec())));
    }

    #[test]
    fn test_ref_lookahead_rewinds() {
        // "3 4 5" is three integers, not a reference.
        let mut parser = PDFParser::new(b"[3 4 5]");
        let obj = parser.parse_object().unwrap();
        assert_eq!(
            obj.as_array().unwrap(),
            &[PDFObject::Int(3), PDFObject::Int(4), PDFObject::Int(5)]
        );
    }

    #[test]
    fn test_indirect_object_wrapper() {
        let mut parser = PDFParser::new(b"7 0 obj\n<</Type /Page>>\nendobj");
        let (objid, genno, obj) = parser.parse_indirect_object().unwrap();
        assert_eq!((objid, genno), (7, 0));
        assert_eq!(
            obj.as_dict().unwrap().get("Type"),
            Some(&PDFObject::Name("Page".into()))
        );
    }

    #[test]
    fn test_unterminated_array_recovers() {
        let mut parser = PDFParser::new(b"[1 2");
        let obj = parser.parse_object().unwrap();
        assert_eq!(obj.as_array().unwrap().len(), 2);
    }
}
