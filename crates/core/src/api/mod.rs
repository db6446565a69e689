//! Public entry points.

pub mod high_level;

pub use high_level::{
    extract_page_text, extract_text, open_document, open_document_from_bytes,
    open_document_streamed, page_operator_list,
};
