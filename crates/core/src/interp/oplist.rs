//! The normalized operator list and the sink boundary it streams through.
//!
//! An [`OperatorList`] accumulates `(OpCode, operands)` pairs and, when
//! bound to a [`RenderSink`], flushes them in chunks so a consumer can
//! start painting before interpretation finishes. Chunks prefer to break
//! at `restore`/`endText` boundaries near the chunk limit. Out-of-band
//! resources (fonts, large images) travel through [`RenderSink::send_object`]
//! and are referenced from the list by id through `dependency` markers.

use std::collections::HashMap;

use bytes::Bytes;
use indexmap::IndexSet;

use super::opcodes::OpCode;
use super::optimizer;

/// Hard chunk limit.
pub const CHUNK_SIZE: usize = 1000;
/// Soft limit: past this, flush at the next natural boundary.
pub const CHUNK_SIZE_ABOUT: usize = CHUNK_SIZE - 5;

/// Rendering intent a list is produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderIntent {
    Display,
    Print,
}

/// Pixel layout of decoded image payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Grayscale1bpp,
    Rgb24bpp,
    Rgba32bpp,
}

/// Decoded image samples carried inline in an operator list.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: usize,
    pub height: usize,
    pub kind: ImageKind,
    pub data: Bytes,
    /// Cached payloads are replayed by reference and must not be moved
    /// into a chunk's transfer list.
    pub cached: bool,
}

impl ImageData {
    /// Identity comparison on the underlying buffer, not its contents.
    pub fn same_data(&self, other: &ImageData) -> bool {
        self.data.as_ptr() == other.data.as_ptr() && self.data.len() == other.data.len()
    }
}

/// Transparency group parameters for `beginGroup`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupOptions {
    pub matrix: [f64; 6],
    pub bbox: Option<[f64; 4]>,
    pub smask: bool,
    pub isolated: bool,
    pub knockout: bool,
}

/// Replayable operator data without a sink attached.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperatorListIR {
    pub ops: Vec<OpCode>,
    pub args: Vec<Operands>,
}

/// A tiling pattern lowered to its own operator list plus tile geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct TilingPatternIR {
    pub operator_list: OperatorListIR,
    pub matrix: [f64; 6],
    pub bbox: [f64; 4],
    pub xstep: f64,
    pub ystep: f64,
    pub paint_type: i64,
    pub tiling_type: i64,
    /// Base color for uncolored (paint type 2) patterns.
    pub color: Vec<f64>,
}

/// Placement of one inline image inside a packed atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasEntry {
    pub transform: [f64; 6],
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

/// One mask of a grouped `paintImageMaskXObjectGroup`, with its placement.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskGroupEntry {
    pub image: ImageData,
    pub transform: [f64; 6],
}

/// One operand of a normalized operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Name(String),
    Str(Vec<u8>),
    Array(Vec<Operand>),
    Dict(Vec<(String, Operand)>),
    /// Resource identifier ("img_p0_1", "f0_2").
    Id(String),
    Image(ImageData),
    /// Flat x/y pairs for the repeat operators.
    Positions(Vec<f64>),
    /// Atlas placement map for grouped inline images.
    Placements(Vec<AtlasEntry>),
    /// Mask collection for grouped image masks.
    Masks(Vec<MaskGroupEntry>),
    Group(Box<GroupOptions>),
    Tiling(Box<TilingPatternIR>),
}

impl Operand {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Operand::Int(i) => Some(*i as f64),
            Operand::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Operand::Name(n) => Some(n),
            _ => None,
        }
    }
}

pub type Operands = Vec<Operand>;

/// One flushed slice of an operator list.
#[derive(Debug, Clone)]
pub struct OperatorChunk {
    pub ops: Vec<OpCode>,
    pub args: Vec<Operands>,
    pub last_chunk: bool,
    /// Operator count of this chunk after optimization.
    pub length: usize,
    pub page_index: usize,
    pub intent: RenderIntent,
    /// Image buffers whose ownership moves with the chunk.
    pub transfers: Vec<Bytes>,
}

/// Out-of-band resource payloads, announced once per id.
#[derive(Debug, Clone)]
pub enum ObjPayload {
    Font {
        loaded_name: String,
        base_font: String,
        subtype: String,
        vertical: bool,
    },
    /// An image too large for eager decoding; raw samples plus layout, for
    /// the consumer to decode.
    ImageStream {
        width: usize,
        height: usize,
        attrs: HashMap<String, String>,
        data: Bytes,
    },
    /// A JPEG handed through undecoded.
    JpegStream(Bytes),
}

/// Consumer boundary for rendering output.
///
/// Methods take `&self`; implementations provide their own interior
/// mutability, as list and evaluator both hold the sink during a page.
pub trait RenderSink: Send + Sync {
    fn start_render_page(&self, page_index: usize, intent: RenderIntent, has_blend_modes: bool);
    fn render_chunk(&self, chunk: OperatorChunk);
    fn send_object(&self, obj_id: &str, payload: ObjPayload);
}

/// Accumulates normalized operators, flushing chunks through a sink.
pub struct OperatorList<'a> {
    ops: Vec<OpCode>,
    args: Vec<Operands>,
    dependencies: IndexSet<String>,
    page_index: usize,
    intent: RenderIntent,
    sink: Option<&'a dyn RenderSink>,
    total_length: usize,
}

impl<'a> OperatorList<'a> {
    pub fn new(page_index: usize, intent: RenderIntent, sink: Option<&'a dyn RenderSink>) -> Self {
        Self {
            ops: Vec::new(),
            args: Vec::new(),
            dependencies: IndexSet::new(),
            page_index,
            intent,
            sink,
            total_length: 0,
        }
    }

    /// A list that never flushes; used for nested scopes (tiling patterns,
    /// annotation appearances) that are merged or embedded afterwards.
    pub fn unbounded(page_index: usize, intent: RenderIntent) -> Self {
        Self::new(page_index, intent, None)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Total operators emitted across all flushed chunks plus the buffer.
    pub fn total_length(&self) -> usize {
        self.total_length + self.ops.len()
    }

    pub fn last_op(&self) -> Option<OpCode> {
        self.ops.last().copied()
    }

    pub fn add_op(&mut self, op: OpCode, args: Operands) {
        self.ops.push(op);
        self.args.push(args);
        if self.sink.is_some() {
            if self.ops.len() >= CHUNK_SIZE {
                self.flush(false);
            } else if self.ops.len() >= CHUNK_SIZE_ABOUT
                && matches!(op, OpCode::Restore | OpCode::EndText)
            {
                // Heuristic: a restore or endText is a natural boundary.
                self.flush(false);
            }
        }
    }

    /// Record that this list depends on an out-of-band resource. Idempotent
    /// per id: only the first call emits a marker.
    pub fn add_dependency(&mut self, obj_id: &str) {
        if self.dependencies.contains(obj_id) {
            return;
        }
        self.dependencies.insert(obj_id.to_string());
        self.add_op(OpCode::Dependency, vec![Operand::Id(obj_id.to_string())]);
    }

    /// Emit dependency markers for each id not yet depended on.
    pub fn add_dependencies(&mut self, ids: &IndexSet<String>) {
        for id in ids {
            self.add_dependency(id);
        }
    }

    /// Append a nested list. Its dependency set merges silently, without
    /// markers: the parent already emitted them via `add_dependencies`.
    /// Each operation goes through [`add_op`](Self::add_op) so the chunk
    /// size bound holds across merged appearance lists.
    pub fn add_op_list(&mut self, other: OperatorList<'_>) {
        for dep in other.dependencies {
            self.dependencies.insert(dep);
        }
        for (op, args) in other.ops.into_iter().zip(other.args) {
            self.add_op(op, args);
        }
    }

    pub fn dependencies(&self) -> &IndexSet<String> {
        &self.dependencies
    }

    /// Flush buffered operators through the sink. No-op without a sink.
    pub fn flush(&mut self, last_chunk: bool) {
        let Some(sink) = self.sink else {
            return;
        };
        optimizer::optimize(&mut self.ops, &mut self.args);

        let ops = std::mem::take(&mut self.ops);
        let args = std::mem::take(&mut self.args);
        let length = ops.len();
        self.total_length += length;

        let mut transfers = Vec::new();
        for operands in &args {
            for operand in operands {
                if let Operand::Image(image) = operand
                    && !image.cached
                {
                    transfers.push(image.data.clone());
                }
            }
        }

        sink.render_chunk(OperatorChunk {
            ops,
            args,
            last_chunk,
            length,
            page_index: self.page_index,
            intent: self.intent,
            transfers,
        });
    }

    /// Extract the replayable form, bypassing the sink.
    pub fn into_ir(self) -> OperatorListIR {
        OperatorListIR {
            ops: self.ops,
            args: self.args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        chunks: Mutex<Vec<OperatorChunk>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                chunks: Mutex::new(Vec::new()),
            }
        }
    }

    impl RenderSink for RecordingSink {
        fn start_render_page(&self, _: usize, _: RenderIntent, _: bool) {}
        fn render_chunk(&self, chunk: OperatorChunk) {
            self.chunks.lock().unwrap().push(chunk);
        }
        fn send_object(&self, _: &str, _: ObjPayload) {}
    }

    #[test]
    fn test_chunk_at_hard_limit() {
        let sink = RecordingSink::new();
        let mut list = OperatorList::new(0, RenderIntent::Display, Some(&sink));
        for _ in 0..CHUNK_SIZE {
            list.add_op(OpCode::MoveTo, vec![Operand::Int(0), Operand::Int(0)]);
        }
        assert_eq!(list.len(), 0);
        let chunks = sink.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].length, CHUNK_SIZE);
        assert!(!chunks[0].last_chunk);
    }

    #[test]
    fn test_soft_flush_at_restore() {
        let sink = RecordingSink::new();
        let mut list = OperatorList::new(0, RenderIntent::Display, Some(&sink));
        for _ in 0..CHUNK_SIZE_ABOUT {
            list.add_op(OpCode::MoveTo, vec![]);
        }
        assert!(sink.chunks.lock().unwrap().is_empty());
        list.add_op(OpCode::Restore, vec![]);
        let chunks = sink.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].length, CHUNK_SIZE_ABOUT + 1);
    }

    #[test]
    fn test_dependency_idempotent() {
        let mut list = OperatorList::unbounded(0, RenderIntent::Display);
        list.add_dependency("img_p0_1");
        list.add_dependency("img_p0_1");
        assert_eq!(list.len(), 1);
        assert_eq!(list.last_op(), Some(OpCode::Dependency));
    }

    #[test]
    fn test_add_op_list_merges_deps_silently() {
        let mut child = OperatorList::unbounded(0, RenderIntent::Display);
        child.add_dependency("f0_1");
        child.add_op(OpCode::ShowText, vec![Operand::Str(b"hi".to_vec())]);
        let child_len = child.len();

        let mut parent = OperatorList::unbounded(0, RenderIntent::Display);
        let deps = child.dependencies().clone();
        parent.add_dependencies(&deps);
        let markers = parent.len();
        parent.add_op_list(child);

        assert_eq!(parent.len(), markers + child_len);
        // A later add_dependency for the same id emits nothing.
        parent.add_dependency("f0_1");
        assert_eq!(parent.len(), markers + child_len);
    }

    #[test]
    fn test_add_op_list_keeps_chunk_bound() {
        let sink = RecordingSink::new();
        let mut list = OperatorList::new(0, RenderIntent::Display, Some(&sink));
        let mut nested = OperatorList::unbounded(0, RenderIntent::Display);
        for _ in 0..1200 {
            nested.add_op(OpCode::Rectangle, vec![]);
            nested.add_op(OpCode::Fill, vec![]);
        }
        list.add_op_list(nested);
        list.flush(true);
        let chunks = sink.chunks.lock().unwrap();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.length <= CHUNK_SIZE));
        let total: usize = chunks.iter().map(|c| c.length).sum();
        assert_eq!(total, 2400);
    }

    #[test]
    fn test_total_length_accumulates() {
        let sink = RecordingSink::new();
        let mut list = OperatorList::new(0, RenderIntent::Display, Some(&sink));
        for _ in 0..7 {
            list.add_op(OpCode::EndPath, vec![]);
        }
        list.flush(true);
        assert_eq!(list.total_length(), 7);
        assert!(sink.chunks.lock().unwrap()[0].last_chunk);
    }
}
