#[path = "../tests/common/mod.rs"]
mod common;

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use vellum_core::high_level::{extract_page_text, open_document, page_operator_list};
use vellum_core::interp::{
    EvaluatorOptions, ObjPayload, OperatorChunk, RenderIntent, RenderSink,
};

use common::{page_skeleton, single_page_pdf};

/// Swallows everything; the work under measurement is evaluation, not
/// delivery.
struct NullSink;

impl RenderSink for NullSink {
    fn start_render_page(&self, _page_index: usize, _intent: RenderIntent, _has_blend_modes: bool) {}

    fn render_chunk(&self, chunk: OperatorChunk) {
        black_box(chunk.ops.len());
    }

    fn send_object(&self, obj_id: &str, _payload: ObjPayload) {
        black_box(obj_id.len());
    }
}

fn text_heavy_pdf(blocks: usize) -> Vec<u8> {
    let mut content = Vec::new();
    for i in 0..blocks {
        content.extend_from_slice(
            format!(
                "BT /F1 10 Tf 72 {} Td [(line {i} with) -250 (adjusted) -250 (runs)] TJ ET\n",
                720 - (i % 60) * 12
            )
            .as_bytes(),
        );
    }
    single_page_pdf(&content)
}

fn graphics_heavy_pdf(quads: usize) -> Vec<u8> {
    let mut content = Vec::new();
    for i in 0..quads {
        content.extend_from_slice(
            format!("q 1 0 0 1 {} 0 cm /Im Do Q\n", (i % 50) * 10).as_bytes(),
        );
    }
    page_skeleton(&content, "", "/XObject << /Im 6 0 R >>")
        .stream(
            6,
            "/Subtype /Image /Width 1 /Height 1 /BitsPerComponent 8 /ColorSpace /DeviceGray",
            &[0x80],
        )
        .build(1)
}

fn bench_open_document(c: &mut Criterion) {
    let pdf = text_heavy_pdf(200);

    let mut group = c.benchmark_group("open_document");
    group.throughput(Throughput::Bytes(pdf.len() as u64));
    group.bench_with_input(BenchmarkId::new("text", 200), &pdf, |b, data| {
        b.iter(|| {
            let doc = open_document(&data[..]).expect("open");
            black_box(doc.num_pages());
        })
    });
    group.finish();
}

fn bench_operator_list(c: &mut Criterion) {
    let sink = NullSink;

    let mut group = c.benchmark_group("operator_list");
    for blocks in [50usize, 500] {
        let doc = open_document(text_heavy_pdf(blocks)).expect("open");
        group.bench_with_input(BenchmarkId::new("text", blocks), &doc, |b, doc| {
            b.iter(|| {
                let total = page_operator_list(
                    doc,
                    0,
                    Some(&sink),
                    RenderIntent::Display,
                    EvaluatorOptions::default(),
                    None,
                )
                .expect("operator list");
                black_box(total);
            })
        });
    }
    {
        let doc = open_document(graphics_heavy_pdf(500)).expect("open");
        group.bench_with_input(BenchmarkId::new("image_quads", 500), &doc, |b, doc| {
            b.iter(|| {
                let total = page_operator_list(
                    doc,
                    0,
                    Some(&sink),
                    RenderIntent::Display,
                    EvaluatorOptions::default(),
                    None,
                )
                .expect("operator list");
                black_box(total);
            })
        });
    }
    group.finish();
}

fn bench_extract_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_text");
    for blocks in [50usize, 500] {
        let doc = open_document(text_heavy_pdf(blocks)).expect("open");
        group.bench_with_input(BenchmarkId::new("page", blocks), &doc, |b, doc| {
            b.iter(|| {
                let items = extract_page_text(doc, 0).expect("extract");
                black_box(items.len());
            })
        });
    }
    group.finish();
}

criterion_group!(
    content_prep,
    bench_open_document,
    bench_operator_list,
    bench_extract_text
);
criterion_main!(content_prep);
