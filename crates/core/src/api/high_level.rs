//! High-level document API: open a document (buffered or streamed),
//! produce page operator lists, extract text.

use std::sync::Arc;

use bytes::Bytes;

use crate::document::catalog::PDFDocument;
use crate::document::source::{ByteSource, ChunkedSource, RangeLoader, fetch_with_retry};
use crate::error::Result;
use crate::interp::{CancelToken, EvaluatorOptions, RenderIntent, RenderSink, TextItem};

/// Open a document over a complete buffer and verify the first page is
/// reachable, recovering via a full scan when the table is stale.
pub fn open_document<D: AsRef<[u8]>>(data: D) -> Result<PDFDocument> {
    let mut doc = PDFDocument::new(data)?;
    doc.check_first_page()?;
    Ok(doc)
}

/// Like [`open_document`], without copying the input buffer.
pub fn open_document_from_bytes(data: Bytes) -> Result<PDFDocument> {
    let mut doc = PDFDocument::new_from_bytes(data)?;
    doc.check_first_page()?;
    Ok(doc)
}

/// Open a document of known length over a range transport. Each byte
/// range the parser needs and does not hold is fetched through `loader`
/// and the parse resumed, so only the ranges actually touched are read.
pub fn open_document_streamed(
    length: usize,
    loader: &mut dyn RangeLoader,
) -> Result<PDFDocument> {
    let source: Arc<dyn ByteSource> = Arc::new(ChunkedSource::new(length));
    let mut doc = fetch_with_retry(source.as_ref(), loader, || {
        PDFDocument::from_source(Arc::clone(&source))
    })?;
    fetch_with_retry(source.as_ref(), loader, || doc.check_first_page())?;
    Ok(doc)
}

/// Build the operator list for one page, streaming chunks through `sink`
/// when one is given. Returns the total operator count.
pub fn page_operator_list(
    doc: &PDFDocument,
    page_index: usize,
    sink: Option<&dyn RenderSink>,
    intent: RenderIntent,
    options: EvaluatorOptions,
    cancel: Option<&CancelToken>,
) -> Result<usize> {
    let page = doc.get_page(page_index)?;
    page.get_operator_list(doc, sink, intent, options, cancel)
}

/// Positioned text runs for one page.
pub fn extract_page_text(doc: &PDFDocument, page_index: usize) -> Result<Vec<TextItem>> {
    let page = doc.get_page(page_index)?;
    page.extract_text(doc)
}

/// All text in the document, pages separated by a newline. Run order
/// follows the content stream, not visual layout.
pub fn extract_text<D: AsRef<[u8]>>(data: D) -> Result<String> {
    let doc = open_document(data)?;
    let mut out = String::new();
    for index in 0..doc.num_pages() {
        for item in extract_page_text(&doc, index)? {
            out.push_str(&item.text);
        }
        out.push('\n');
    }
    Ok(out)
}
