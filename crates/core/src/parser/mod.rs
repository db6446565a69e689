//! PDF object syntax parsing.
//!
//! - `lexer`: byte-level tokenizer for the PDF object grammar
//! - `object_parser`: recursive-descent composer building `PDFObject` values

pub mod lexer;
pub mod object_parser;

pub use lexer::{Lexer, Token};
pub use object_parser::PDFParser;
