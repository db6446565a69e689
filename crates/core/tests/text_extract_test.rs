//! Positioned text extraction over whole documents.

mod common;

use common::{page_skeleton, single_page_pdf};
use vellum_core::high_level::{extract_page_text, extract_text, open_document};
use vellum_core::interp::TextDirection;

#[test]
fn test_simple_show_text() {
    let doc = open_document(single_page_pdf(b"BT /F1 12 Tf 100 700 Td (Hello) Tj ET"))
        .expect("open");
    let items = extract_page_text(&doc, 0).expect("extract");
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.text, "Hello");
    assert_eq!(item.dir, TextDirection::Ltr);
    assert_eq!(item.angle, 0.0);
    assert_eq!(item.size, 12.0);
    assert_eq!(item.x, 100.0);
    // Baseline shifted up by the default ascent (0.8 em).
    assert!((item.y - 709.6).abs() < 1e-9);
}

#[test]
fn test_spacing_adjustments_become_spaces() {
    // The space glyph is 250 units wide. -500 is two spaces, -100 one,
    // -50 below the threshold.
    let content = b"BT /F1 10 Tf \
                    [(A) -500 (B)] TJ 0 -20 Td \
                    [(A) -100 (B)] TJ 0 -20 Td \
                    [(A) -50 (B)] TJ ET";
    let doc = open_document(single_page_pdf(content)).expect("open");
    let items = extract_page_text(&doc, 0).expect("extract");
    let texts: Vec<&str> = items.iter().map(|i| i.text.as_str()).collect();
    assert_eq!(texts, vec!["A  B", "A B", "AB"]);
}

#[test]
fn test_consecutive_show_ops_accumulate() {
    // Nothing moves the cursor between the two shows, so they fuse into
    // one run positioned at the first show.
    let content = b"BT /F1 12 Tf 100 700 Td (Hi) Tj ( there) Tj ET";
    let doc = open_document(single_page_pdf(content)).expect("open");
    let items = extract_page_text(&doc, 0).expect("extract");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].text, "Hi there");
    assert_eq!(items[0].x, 100.0);
}

#[test]
fn test_positive_adjustment_adds_nothing() {
    let doc = open_document(single_page_pdf(b"BT /F1 10 Tf [(A) 500 (B)] TJ ET"))
        .expect("open");
    let items = extract_page_text(&doc, 0).expect("extract");
    assert_eq!(items[0].text, "AB");
}

#[test]
fn test_positioning_op_closes_the_run() {
    let content = b"BT /F1 10 Tf 0 100 Td (one) Tj 0 -20 Td (two) Tj ET";
    let doc = open_document(single_page_pdf(content)).expect("open");
    let items = extract_page_text(&doc, 0).expect("extract");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].text, "one");
    assert_eq!(items[1].text, "two");
    assert!(items[1].y < items[0].y);
}

#[test]
fn test_text_matrix_positions_runs() {
    let content = b"BT /F1 10 Tf 2 0 0 2 50 60 Tm (big) Tj ET";
    let doc = open_document(single_page_pdf(content)).expect("open");
    let items = extract_page_text(&doc, 0).expect("extract");
    let item = &items[0];
    assert_eq!(item.x, 50.0);
    // Vertical scale doubles the effective size.
    assert_eq!(item.size, 20.0);
}

#[test]
fn test_ctm_applies_to_text() {
    let content = b"1 0 0 1 10 20 cm BT /F1 10 Tf 0 0 Td (moved) Tj ET";
    let doc = open_document(single_page_pdf(content)).expect("open");
    let items = extract_page_text(&doc, 0).expect("extract");
    assert_eq!(items[0].x, 10.0);
}

#[test]
fn test_form_xobject_text_replayed_from_cache() {
    let pdf = page_skeleton(b"/Fx Do /Fx Do", "", "/XObject << /Fx 6 0 R >>")
        .stream(
            6,
            "/Subtype /Form /BBox [0 0 100 100] /Resources << /Font << /F1 5 0 R >> >>",
            b"BT /F1 8 Tf (nested) Tj ET",
        )
        .build(1);
    let doc = open_document(pdf).expect("open");
    let items = extract_page_text(&doc, 0).expect("extract");
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.text == "nested"));
}

#[test]
fn test_to_unicode_drives_rtl_reordering() {
    // A and B map to Hebrew alef and bet; the run comes back in visual
    // order with an RTL base direction.
    let cmap = b"1 begincodespacerange\n<00> <ff>\nendcodespacerange\n\
                 2 beginbfchar\n<41> <05D0>\n<42> <05D1>\nendbfchar\n";
    let pdf = common::PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(
            3,
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R \
             /Resources << /Font << /F1 5 0 R >> >> >>",
        )
        .stream(4, "", b"BT /F1 12 Tf (AB) Tj ET")
        .object(
            5,
            "<< /Type /Font /Subtype /Type1 /BaseFont /Mapped /ToUnicode 6 0 R >>",
        )
        .stream(6, "", cmap)
        .build(1);
    let doc = open_document(pdf).expect("open");
    let items = extract_page_text(&doc, 0).expect("extract");
    assert_eq!(items[0].dir, TextDirection::Rtl);
    assert_eq!(items[0].text.chars().next(), Some('\u{5d1}'));
}

#[test]
fn test_whole_document_text() {
    let text = extract_text(single_page_pdf(b"BT /F1 12 Tf (Hi) Tj ( there) Tj ET"))
        .expect("extract");
    assert_eq!(text, "Hi there\n");
}

#[test]
fn test_show_text_without_font_skipped() {
    let doc = open_document(single_page_pdf(b"BT (orphan) Tj ET")).expect("open");
    let items = extract_page_text(&doc, 0).expect("extract");
    assert!(items.is_empty());
}
