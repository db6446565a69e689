//! Error types for PDF parsing and interpretation.
//!
//! Three kinds of failure flow through [`PdfError`]:
//!
//! - Fatal document-level errors ([`PdfError::EmptyDocument`],
//!   [`PdfError::NoValidXRef`], [`PdfError::Io`]) abort a document open.
//! - [`PdfError::MissingData`] is a suspension signal, not a failure: the
//!   byte source does not yet hold the requested range. Callers feed the
//!   range and retry. It must never be swallowed by recovery paths.
//! - Everything else is structural and recoverable: callers catch it at the
//!   point of use, log, and substitute a safe default.

use std::io;
use thiserror::Error;

/// Result type alias for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;

/// The main error type for PDF processing operations.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Zero-length input. Distinguishable from structural corruption.
    #[error("The PDF file is empty, i.e. its size is zero bytes.")]
    EmptyDocument,

    /// No usable cross-reference structure, even after a recovery scan.
    #[error("Invalid PDF structure: no valid cross-reference table or stream")]
    NoValidXRef,

    /// The byte source does not hold the requested range yet. Control flow,
    /// not an error: feed `[begin, end)` and retry.
    #[error("Missing data [{begin}, {end})")]
    MissingData { begin: usize, end: usize },

    /// A single corrupt cross-reference entry. Callers may clear caches and
    /// re-parse the document in recovery mode.
    #[error("Bad XRef entry for object {0}")]
    XRefEntry(u32),

    /// Tokenization failure at a byte position.
    #[error("Token error at position {pos}: {msg}")]
    TokenError { pos: usize, msg: String },

    /// Ran past the end of the buffer mid-construct.
    #[error("Unexpected end of file")]
    UnexpectedEof,

    /// A malformed construct above the token level.
    #[error("Syntax error: {0}")]
    SyntaxError(String),

    /// An object had the wrong type for the context using it.
    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: &'static str, got: String },

    /// A required dictionary key was absent.
    #[error("Key not found: {0}")]
    KeyError(String),

    /// An indirect reference that no xref section can place.
    #[error("Object not found: {0}")]
    ObjectNotFound(u32),

    /// A stream filter failed to decode.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Evaluation was abandoned through a cancel token.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PdfError {
    /// True for the missing-data suspension signal.
    ///
    /// Recovery paths that substitute defaults for structural errors must
    /// check this first and re-raise instead of swallowing.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, PdfError::MissingData { .. })
    }
}
