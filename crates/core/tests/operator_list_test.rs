//! Page evaluation end to end: content streams through the evaluator into
//! flushed operator chunks.

mod common;

use std::sync::Mutex;

use common::{page_skeleton, single_page_pdf};
use vellum_core::high_level::{open_document, page_operator_list};
use vellum_core::interp::{
    EvaluatorOptions, ObjPayload, OpCode, Operand, OperatorChunk, RenderIntent, RenderSink,
};

#[derive(Default)]
struct CollectSink {
    chunks: Mutex<Vec<OperatorChunk>>,
    objects: Mutex<Vec<String>>,
    pages_started: Mutex<Vec<(usize, bool)>>,
}

impl CollectSink {
    fn ops(&self) -> Vec<OpCode> {
        self.chunks
            .lock()
            .unwrap()
            .iter()
            .flat_map(|c| c.ops.clone())
            .collect()
    }
}

impl RenderSink for CollectSink {
    fn start_render_page(&self, page_index: usize, _intent: RenderIntent, has_blend_modes: bool) {
        self.pages_started
            .lock()
            .unwrap()
            .push((page_index, has_blend_modes));
    }

    fn render_chunk(&self, chunk: OperatorChunk) {
        self.chunks.lock().unwrap().push(chunk);
    }

    fn send_object(&self, obj_id: &str, _payload: ObjPayload) {
        self.objects.lock().unwrap().push(obj_id.to_string());
    }
}

fn run(pdf: Vec<u8>) -> (CollectSink, usize) {
    let doc = open_document(pdf).expect("open");
    let sink = CollectSink::default();
    let total = page_operator_list(
        &doc,
        0,
        Some(&sink),
        RenderIntent::Display,
        EvaluatorOptions::default(),
        None,
    )
    .expect("operator list");
    (sink, total)
}

#[test]
fn test_text_block_ops_in_order() {
    let (sink, total) = run(single_page_pdf(b"BT /F1 12 Tf 100 700 Td (Hello) Tj ET"));
    let ops = sink.ops();
    assert_eq!(
        ops,
        vec![
            OpCode::BeginText,
            OpCode::Dependency,
            OpCode::SetFont,
            OpCode::MoveText,
            OpCode::ShowText,
            OpCode::EndText,
        ]
    );
    assert_eq!(total, 6);

    // The font travels out of band, announced before the chunk that
    // depends on it.
    let objects = sink.objects.lock().unwrap();
    assert_eq!(objects.len(), 1);
    assert!(objects[0].starts_with("f0_"));

    let pages = sink.pages_started.lock().unwrap();
    assert_eq!(*pages, vec![(0, false)]);
}

#[test]
fn test_font_operand_rewritten_to_loaded_name() {
    let (sink, _) = run(single_page_pdf(b"BT /F1 12 Tf ET"));
    let chunks = sink.chunks.lock().unwrap();
    let chunk = &chunks[0];
    let set_font = chunk
        .ops
        .iter()
        .position(|&op| op == OpCode::SetFont)
        .expect("setFont present");
    match &chunk.args[set_font][0] {
        Operand::Id(id) => assert!(id.starts_with("f0_")),
        other => panic!("expected a loaded font id, got {other:?}"),
    }
}

#[test]
fn test_unknown_operator_skipped() {
    let (sink, _) = run(single_page_pdf(b"q nosuchop 1 0 0 1 10 10 cm Q"));
    assert_eq!(
        sink.ops(),
        vec![OpCode::Save, OpCode::Transform, OpCode::Restore]
    );
}

#[test]
fn test_unbalanced_save_closed_at_end() {
    let (sink, _) = run(single_page_pdf(b"q q Q"));
    assert_eq!(
        sink.ops(),
        vec![OpCode::Save, OpCode::Save, OpCode::Restore, OpCode::Restore]
    );
}

#[test]
fn test_small_inline_image_carried_in_chunk() {
    let mut content = b"BI /W 2 /H 2 /BPC 8 /CS /G ID ".to_vec();
    content.extend_from_slice(&[0x00, 0x40, 0x80, 0xff]);
    content.extend_from_slice(b"\nEI");
    let (sink, _) = run(single_page_pdf(&content));

    let chunks = sink.chunks.lock().unwrap();
    let chunk = &chunks[0];
    assert_eq!(chunk.ops, vec![OpCode::PaintInlineImageXObject]);
    match &chunk.args[0][0] {
        Operand::Image(image) => {
            assert_eq!(image.width, 2);
            assert_eq!(image.height, 2);
            // Grayscale expands to RGBA.
            assert_eq!(image.data.len(), 16);
            assert_eq!(&image.data[..4], &[0, 0, 0, 255]);
        }
        other => panic!("expected inline image data, got {other:?}"),
    }
    assert_eq!(chunk.transfers.len(), 1);
}

#[test]
fn test_missing_xobject_passes_through() {
    let (sink, _) = run(single_page_pdf(b"/Missing Do"));
    assert_eq!(sink.ops(), vec![OpCode::PaintXObject]);
}

#[test]
fn test_form_xobject_bracketed() {
    let pdf = page_skeleton(b"/Fx Do", "", "/XObject << /Fx 6 0 R >>")
        .stream(6, "/Subtype /Form /BBox [0 0 50 50]", b"0 0 10 10 re f")
        .build(1);
    let (sink, _) = run(pdf);
    assert_eq!(
        sink.ops(),
        vec![
            OpCode::PaintFormXObjectBegin,
            OpCode::Rectangle,
            OpCode::Fill,
            OpCode::PaintFormXObjectEnd,
        ]
    );
}

#[test]
fn test_transparency_group_wraps_form() {
    let pdf = page_skeleton(b"/Fx Do", "", "/XObject << /Fx 6 0 R >>")
        .stream(
            6,
            "/Subtype /Form /BBox [0 0 50 50] /Group << /S /Transparency /I true >>",
            b"0 0 10 10 re f",
        )
        .build(1);
    let (sink, _) = run(pdf);
    let ops = sink.ops();
    assert_eq!(ops.first(), Some(&OpCode::BeginGroup));
    assert_eq!(ops.last(), Some(&OpCode::EndGroup));
    assert!(ops.contains(&OpCode::PaintFormXObjectBegin));
}

#[test]
fn test_blend_mode_detection() {
    let pdf = page_skeleton(b"/G0 gs", "", "/ExtGState << /G0 << /BM /Multiply >> >>").build(1);
    let (sink, _) = run(pdf);
    let pages = sink.pages_started.lock().unwrap();
    assert_eq!(*pages, vec![(0, true)]);
}

#[test]
fn test_gstate_entries_in_sorted_order() {
    let pdf = page_skeleton(
        b"/G0 gs",
        "",
        "/ExtGState << /G0 << /LW 2 /CA 0.5 /Font [5 0 R 10] >> >>",
    )
    .build(1);
    let (sink, _) = run(pdf);
    let ops = sink.ops();
    // The font side effect lands before the state op, and the normalized
    // entry list is key-sorted however the dictionary hashes.
    assert_eq!(ops, vec![OpCode::Dependency, OpCode::SetGState]);
    let chunks = sink.chunks.lock().unwrap();
    let idx = chunks[0]
        .ops
        .iter()
        .position(|&op| op == OpCode::SetGState)
        .unwrap();
    match &chunks[0].args[idx][0] {
        Operand::Dict(entries) => {
            let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, vec!["CA", "Font", "LW"]);
        }
        other => panic!("expected a state dict, got {other:?}"),
    }
}

#[test]
fn test_annotation_appearance_rendered() {
    let pdf = page_skeleton(b"", "/Annots [6 0 R]", "")
        .object(
            6,
            "<< /Subtype /Square /Rect [0 0 100 100] /AP << /N 7 0 R >> >>",
        )
        .stream(7, "/Subtype /Form /BBox [0 0 100 100]", b"0 0 50 50 re f")
        .build(1);
    let (sink, _) = run(pdf);
    assert_eq!(
        sink.ops(),
        vec![
            OpCode::BeginAnnotations,
            OpCode::BeginAnnotation,
            OpCode::Rectangle,
            OpCode::Fill,
            OpCode::EndAnnotation,
            OpCode::EndAnnotations,
        ]
    );
}

#[test]
fn test_ink_suppresses_overlapping_signature_widget() {
    let pdf = page_skeleton(b"", "/Annots [6 0 R 8 0 R]", "")
        .object(
            6,
            "<< /Subtype /Widget /FT /Sig /Rect [10 10 60 60] /AP << /N 7 0 R >> >>",
        )
        .stream(7, "/Subtype /Form /BBox [0 0 50 50]", b"0 0 50 50 re f")
        .object(
            8,
            "<< /Subtype /Ink /Rect [20 20 40 40] /AP << /N 9 0 R >> >>",
        )
        .stream(9, "/Subtype /Form /BBox [0 0 20 20]", b"0 0 5 5 re S")
        .build(1);
    let (sink, _) = run(pdf);
    let ops = sink.ops();
    let begins = ops
        .iter()
        .filter(|&&op| op == OpCode::BeginAnnotation)
        .count();
    // The signature widget's appearance is blocked; only the ink draws.
    assert_eq!(begins, 1);
    assert!(ops.contains(&OpCode::Stroke));
    assert!(!ops.contains(&OpCode::Fill));
}

#[test]
fn test_repeated_image_quads_collapse() {
    let mut content = Vec::new();
    for _ in 0..5 {
        content.extend_from_slice(b"q 1 0 0 1 10 0 cm /Im Do Q ");
    }
    let pdf = page_skeleton(&content, "", "/XObject << /Im 6 0 R >>")
        .stream(
            6,
            "/Subtype /Image /Width 1 /Height 1 /BitsPerComponent 8 /ColorSpace /DeviceGray",
            &[0x80],
        )
        .build(1);
    let (sink, _) = run(pdf);
    let ops = sink.ops();
    // The first quad carries the dependency marker and stays plain; the
    // remaining four merge into a single repeat.
    assert_eq!(
        ops,
        vec![
            OpCode::Save,
            OpCode::Transform,
            OpCode::Dependency,
            OpCode::PaintImageXObject,
            OpCode::Restore,
            OpCode::PaintImageXObjectRepeat,
        ]
    );
    let chunks = sink.chunks.lock().unwrap();
    let repeat = chunks[0].ops.iter().position(|&op| op == OpCode::PaintImageXObjectRepeat).unwrap();
    match &chunks[0].args[repeat][3] {
        Operand::Positions(positions) => assert_eq!(positions.len(), 8),
        other => panic!("expected positions, got {other:?}"),
    }
}

#[test]
fn test_long_page_flushes_multiple_chunks() {
    let mut content = Vec::new();
    for _ in 0..600 {
        content.extend_from_slice(b"q 1 0 0 1 1 1 cm Q\n");
    }
    let (sink, total) = run(single_page_pdf(&content));
    assert_eq!(total, 1800);
    let chunks = sink.chunks.lock().unwrap();
    assert!(chunks.len() >= 2);
    assert!(chunks.last().unwrap().last_chunk);
    assert!(chunks[..chunks.len() - 1].iter().all(|c| !c.last_chunk));
    let delivered: usize = chunks.iter().map(|c| c.length).sum();
    assert_eq!(delivered, 1800);
}

#[test]
fn test_empty_page_flushes_final_chunk() {
    let (sink, total) = run(single_page_pdf(b""));
    assert_eq!(total, 0);
    let chunks = sink.chunks.lock().unwrap();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].last_chunk);
    assert!(chunks[0].ops.is_empty());
}
