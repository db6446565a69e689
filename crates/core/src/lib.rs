//! vellum - a PDF document and content interpretation engine.
//!
//! Turns a raw PDF byte stream into a resolved object graph (pages,
//! resources, fonts) and interprets page content streams into a normalized,
//! replayable operator list plus positioned text. Pixel rasterization, font
//! program transcoding and color space math are external collaborators
//! consuming the operator list through the [`interp::oplist::RenderSink`]
//! boundary.

pub mod api;
pub mod codec;
pub mod document;
pub mod error;
pub mod font;
pub mod interp;
pub mod model;
pub mod parser;
pub mod utils;

pub use api::high_level;

pub use document::catalog::PDFDocument;
pub use document::page::PDFPage;
pub use error::{PdfError, Result};
pub use model::objects::{PDFObjRef, PDFObject, PDFStream};
