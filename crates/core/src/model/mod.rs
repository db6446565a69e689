//! The PDF object model.

pub mod objects;

pub use objects::{PDFObjRef, PDFObject, PDFStream};
