//! Document-level behavior: opening, page geometry, metadata.

mod common;

use common::{PdfBuilder, page_skeleton, single_page_pdf};
use vellum_core::error::PdfError;
use vellum_core::high_level::open_document;

#[test]
fn test_open_reports_version_and_page_count() {
    let doc = open_document(single_page_pdf(b"")).expect("open");
    assert_eq!(doc.version(), "1.7");
    assert_eq!(doc.num_pages(), 1);
    assert!(!doc.is_linearized());
}

#[test]
fn test_empty_input_is_distinguished() {
    let err = open_document(b"").unwrap_err();
    assert!(matches!(err, PdfError::EmptyDocument));
}

#[test]
fn test_garbage_input_has_no_xref() {
    let err = open_document(&b"this is not a pdf at all, nothing to see"[..]).unwrap_err();
    assert!(matches!(err, PdfError::NoValidXRef));
}

#[test]
fn test_object_zero_is_never_found() {
    let doc = open_document(single_page_pdf(b"")).expect("open");
    assert!(matches!(doc.getobj(0), Err(PdfError::ObjectNotFound(0))));
}

#[test]
fn test_media_box_falls_back_to_letter() {
    let pdf = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(3, "<< /Type /Page /Parent 2 0 R >>")
        .build(1);
    let doc = open_document(pdf).expect("open");
    let page = doc.get_page(0).expect("page");
    assert_eq!(page.media_box(&doc).unwrap(), (0.0, 0.0, 612.0, 792.0));
    assert_eq!(page.user_unit(&doc).unwrap(), 1.0);
    assert_eq!(page.rotate(&doc).unwrap(), 0);
}

#[test]
fn test_media_box_inherited_from_page_tree() {
    let pdf = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(
            2,
            "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 200 100] >>",
        )
        .object(3, "<< /Type /Page /Parent 2 0 R >>")
        .build(1);
    let doc = open_document(pdf).expect("open");
    let page = doc.get_page(0).expect("page");
    assert_eq!(page.media_box(&doc).unwrap(), (0.0, 0.0, 200.0, 100.0));
}

#[test]
fn test_view_is_crop_clipped_to_media() {
    let pdf = page_skeleton(b"", "/CropBox [-20 -20 100 100]", "").build(1);
    let doc = open_document(pdf).expect("open");
    let page = doc.get_page(0).expect("page");
    assert_eq!(page.view(&doc).unwrap(), (0.0, 0.0, 100.0, 100.0));
}

#[test]
fn test_disjoint_crop_box_is_ignored() {
    let pdf = page_skeleton(b"", "/CropBox [-500 -500 -100 -100]", "").build(1);
    let doc = open_document(pdf).expect("open");
    let page = doc.get_page(0).expect("page");
    assert_eq!(page.view(&doc).unwrap(), (0.0, 0.0, 612.0, 792.0));
}

#[test]
fn test_rotation_normalized() {
    for (raw, expected) in [("450", 90), ("-90", 270), ("45", 0), ("360", 0)] {
        let pdf = page_skeleton(b"", &format!("/Rotate {raw}"), "").build(1);
        let doc = open_document(pdf).expect("open");
        let page = doc.get_page(0).expect("page");
        assert_eq!(page.rotate(&doc).unwrap(), expected, "Rotate {raw}");
    }
}

#[test]
fn test_nonpositive_user_unit_rejected() {
    let pdf = page_skeleton(b"", "/UserUnit -2", "").build(1);
    let doc = open_document(pdf).expect("open");
    let page = doc.get_page(0).expect("page");
    assert_eq!(page.user_unit(&doc).unwrap(), 1.0);
}

#[test]
fn test_contents_array_is_concatenated() {
    let pdf = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .object(
            3,
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents [4 0 R 5 0 R] >>",
        )
        .stream(4, "", b"q")
        .stream(5, "", b"Q")
        .build(1);
    let doc = open_document(pdf).expect("open");
    let page = doc.get_page(0).expect("page");
    assert_eq!(page.content_bytes(&doc).unwrap(), b"q\nQ");
}

#[test]
fn test_document_info_strings() {
    let pdf = page_skeleton(b"", "", "")
        .object(
            6,
            "<< /Title (A Fixture) /Producer (vellum tests) /PageCount 7 >>",
        )
        .trailer("/Info 6 0 R")
        .build(1);
    let doc = open_document(pdf).expect("open");
    let info = doc.document_info();
    assert_eq!(info.title.as_deref(), Some("A Fixture"));
    assert_eq!(info.producer.as_deref(), Some("vellum tests"));
    assert!(info.custom.contains_key("PageCount"));
}

#[test]
fn test_annotations_parsed_once_per_page() {
    let pdf = page_skeleton(b"", "/Annots [6 0 R]", "")
        .object(6, "<< /Subtype /Square /Rect [0 0 10 10] >>")
        .build(1);
    let doc = open_document(pdf).expect("open");
    let page = doc.get_page(0).expect("page");
    let first = page.annotations(&doc).expect("annotations");
    assert_eq!(first.len(), 1);
    // The second lookup serves the cached parse.
    let second = page.annotations(&doc).expect("annotations");
    assert_eq!(first.as_ptr(), second.as_ptr());
}

#[test]
fn test_fingerprint_without_id_hashes_prefix() {
    let doc = open_document(single_page_pdf(b"")).expect("open");
    let fingerprint = doc.fingerprint().expect("fingerprint");
    assert_eq!(fingerprint.len(), 32);
    assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_page_cache_returns_same_page() {
    let doc = open_document(single_page_pdf(b"")).expect("open");
    let a = doc.get_page(0).expect("page");
    let b = doc.get_page(0).expect("page");
    assert!(std::sync::Arc::ptr_eq(&a, &b));
}

#[test]
fn test_page_index_out_of_range() {
    let doc = open_document(single_page_pdf(b"")).expect("open");
    assert!(doc.get_page(1).is_err());
}
