//! PDF object model: the tagged value union, indirect references, and
//! stream objects.
//!
//! Dictionaries and arrays may contain indirect references; structural
//! interpretation must resolve them through the document first. Cycles are
//! possible, so resolution is cycle-tolerant (see `PDFDocument::resolve`).

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{PdfError, Result};

/// A PDF object value.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    /// A name token (written `/Name`), stored without the slash.
    Name(String),
    /// A string, kept as raw bytes; PDF strings are not necessarily UTF-8.
    String(Vec<u8>),
    Array(Vec<PDFObject>),
    Dict(HashMap<String, PDFObject>),
    Stream(Box<PDFStream>),
    /// An indirect reference (`objid genno R`).
    Ref(PDFObjRef),
}

impl PDFObject {
    /// Human-readable type name for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            PDFObject::Null => "null",
            PDFObject::Bool(_) => "bool",
            PDFObject::Int(_) => "int",
            PDFObject::Real(_) => "real",
            PDFObject::Name(_) => "name",
            PDFObject::String(_) => "string",
            PDFObject::Array(_) => "array",
            PDFObject::Dict(_) => "dict",
            PDFObject::Stream(_) => "stream",
            PDFObject::Ref(_) => "ref",
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, PDFObject::Null)
    }

    fn type_error<T>(&self, expected: &'static str) -> Result<T> {
        Err(PdfError::TypeError {
            expected,
            got: self.type_name().to_string(),
        })
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            PDFObject::Bool(b) => Ok(*b),
            _ => self.type_error("bool"),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            PDFObject::Int(i) => Ok(*i),
            _ => self.type_error("int"),
        }
    }

    pub fn as_real(&self) -> Result<f64> {
        match self {
            PDFObject::Real(r) => Ok(*r),
            _ => self.type_error("real"),
        }
    }

    /// Numeric value: accepts both int and real.
    pub fn as_num(&self) -> Result<f64> {
        match self {
            PDFObject::Int(i) => Ok(*i as f64),
            PDFObject::Real(r) => Ok(*r),
            _ => self.type_error("number"),
        }
    }

    pub fn as_name(&self) -> Result<&str> {
        match self {
            PDFObject::Name(n) => Ok(n),
            _ => self.type_error("name"),
        }
    }

    pub fn as_string(&self) -> Result<&[u8]> {
        match self {
            PDFObject::String(s) => Ok(s),
            _ => self.type_error("string"),
        }
    }

    pub fn as_array(&self) -> Result<&[PDFObject]> {
        match self {
            PDFObject::Array(a) => Ok(a),
            _ => self.type_error("array"),
        }
    }

    /// Dictionary access; a stream's attribute dict also qualifies.
    pub fn as_dict(&self) -> Result<&HashMap<String, PDFObject>> {
        match self {
            PDFObject::Dict(d) => Ok(d),
            PDFObject::Stream(s) => Ok(&s.attrs),
            _ => self.type_error("dict"),
        }
    }

    pub fn as_stream(&self) -> Result<&PDFStream> {
        match self {
            PDFObject::Stream(s) => Ok(s),
            _ => self.type_error("stream"),
        }
    }

    pub fn as_ref_obj(&self) -> Result<PDFObjRef> {
        match self {
            PDFObject::Ref(r) => Ok(*r),
            _ => self.type_error("ref"),
        }
    }
}

/// An indirect object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PDFObjRef {
    /// Object number.
    pub objid: u32,
    /// Generation number.
    pub genno: u32,
}

impl PDFObjRef {
    pub const fn new(objid: u32, genno: u32) -> Self {
        Self { objid, genno }
    }
}

/// A stream object: an attribute dictionary plus raw (still encoded) data.
///
/// The raw bytes are a zero-copy slice of the file buffer. Filter decoding
/// goes through `PDFDocument::decode_stream`, which consults the document
/// for indirect Filter/DecodeParms entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PDFStream {
    pub attrs: HashMap<String, PDFObject>,
    rawdata: Bytes,
    /// Object number, when the stream came from an indirect object.
    pub objid: Option<u32>,
    /// Generation number, when the stream came from an indirect object.
    pub genno: Option<u32>,
}

impl PDFStream {
    pub fn new(attrs: HashMap<String, PDFObject>, rawdata: impl Into<Bytes>) -> Self {
        Self {
            attrs,
            rawdata: rawdata.into(),
            objid: None,
            genno: None,
        }
    }

    pub fn with_id(
        attrs: HashMap<String, PDFObject>,
        rawdata: impl Into<Bytes>,
        objid: u32,
        genno: u32,
    ) -> Self {
        Self {
            attrs,
            rawdata: rawdata.into(),
            objid: Some(objid),
            genno: Some(genno),
        }
    }

    /// Raw (undecoded) stream data.
    pub fn raw_data(&self) -> &[u8] {
        self.rawdata.as_ref()
    }

    /// Raw stream data as a shared handle.
    pub fn raw_bytes(&self) -> Bytes {
        self.rawdata.clone()
    }

    /// Attribute lookup. The value may be an indirect reference.
    pub fn get(&self, key: &str) -> Option<&PDFObject> {
        self.attrs.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessor_type_errors() {
        let obj = PDFObject::Name("Foo".to_string());
        assert_eq!(obj.as_name().unwrap(), "Foo");
        let err = obj.as_int().unwrap_err();
        assert!(matches!(
            err,
            PdfError::TypeError { expected: "int", ref got } if got == "name"
        ));
    }

    #[test]
    fn test_as_num_accepts_both() {
        assert_eq!(PDFObject::Int(3).as_num().unwrap(), 3.0);
        assert_eq!(PDFObject::Real(2.5).as_num().unwrap(), 2.5);
        assert!(PDFObject::Null.as_num().is_err());
    }

    #[test]
    fn test_stream_dict_access() {
        let mut attrs = HashMap::new();
        attrs.insert("Length".to_string(), PDFObject::Int(5));
        let stream = PDFObject::Stream(Box::new(PDFStream::new(attrs, &b"hello"[..])));
        assert_eq!(
            stream.as_dict().unwrap().get("Length"),
            Some(&PDFObject::Int(5))
        );
        assert_eq!(stream.as_stream().unwrap().raw_data(), b"hello");
    }
}
