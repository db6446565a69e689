//! Opening documents over an incrementally fed byte source.

mod common;

use common::single_page_pdf;
use vellum_core::document::{ByteSource, ChunkedSource};
use vellum_core::error::PdfError;
use vellum_core::high_level::{extract_page_text, open_document_streamed};

#[test]
fn test_streamed_open_fetches_ranges_on_demand() {
    let pdf = single_page_pdf(b"BT /F1 12 Tf (streamed) Tj ET");
    let mut loads: Vec<(usize, usize)> = Vec::new();
    let mut loader = |begin: usize, end: usize| {
        loads.push((begin, end));
        Ok(pdf[begin..end.min(pdf.len())].to_vec())
    };
    let doc = open_document_streamed(pdf.len(), &mut loader).expect("open");
    assert_eq!(doc.num_pages(), 1);
    assert!(!loads.is_empty());

    let items = extract_page_text(&doc, 0).expect("extract");
    assert_eq!(items[0].text, "streamed");
}

#[test]
fn test_chunked_source_reports_missing_before_feed() {
    let source = ChunkedSource::new(100_000);
    let err = source.read_at(70_000, 70_010).unwrap_err();
    assert!(matches!(err, PdfError::MissingData { begin, .. } if begin == 65_536));
}

#[test]
fn test_loader_failure_propagates() {
    let pdf = single_page_pdf(b"");
    let mut loader =
        |_begin: usize, _end: usize| Err(PdfError::SyntaxError("transport failed".into()));
    let err = open_document_streamed(pdf.len(), &mut loader).unwrap_err();
    assert!(matches!(err, PdfError::SyntaxError(_)));
}
