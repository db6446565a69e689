//! Document structure: byte sources, cross-reference tables, the document
//! object graph, and pages.

pub mod catalog;
pub mod page;
pub mod source;
pub mod xref;

pub use catalog::{DocumentInfo, PDFDocument};
pub use page::{Annotation, PDFPage};
pub use source::{ByteSource, ChunkedSource, MemSource, RangeLoader};
pub use xref::{XRef, XRefEntry, XRefKind};
