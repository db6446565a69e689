//! Font resources: loading, metrics, and text decoding.
//!
//! Font program transcoding is out of scope; what the engine needs from a
//! font is its metrics (widths, ascent, writing mode) for text positioning
//! and its ToUnicode mapping for text extraction. Loaded fonts are cached
//! on the document and announced to the render sink exactly once.

pub mod info;
pub mod tounicode;

pub use info::{FontKey, LoadedFont, load_font};
pub use tounicode::ToUnicodeMap;
