//! Content stream evaluation: validated operations to a normalized,
//! self-contained operator list.
//!
//! The evaluator resolves every resource reference an operation names
//! (fonts, XObjects, graphics state dictionaries, patterns) so the output
//! list replays without access to the document. Per-operation failures
//! degrade to a logged skip when `ignore_errors` is set; missing-data and
//! cancellation always propagate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{info, warn};

use super::opcodes::OpCode;
use super::oplist::{
    GroupOptions, ImageData, ImageKind, ObjPayload, Operand, OperatorList, RenderIntent,
    RenderSink, TilingPatternIR,
};
use super::preprocessor::{ContentPreprocessor, Operation};
use crate::document::catalog::PDFDocument;
use crate::error::{PdfError, Result};
use crate::font::{LoadedFont, load_font};
use crate::model::objects::{PDFObject, PDFStream};
use crate::utils::{MATRIX_IDENTITY, Matrix};

/// Images with width + height below this are decoded eagerly and carried
/// inline in the operator list.
const SMALL_IMAGE_DIMENSIONS: usize = 200;

/// Nested form XObject depth cap, for forms that lack an object id and
/// cannot be cycle-checked.
const MAX_FORM_DEPTH: usize = 32;

/// Cooperative cancellation flag shared between a caller and a running
/// evaluation. Checked between operations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PdfError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvaluatorOptions {
    /// Pixel count above which images are dropped; -1 for no limit.
    pub max_image_size: i64,
    /// Degrade per-operation errors to logged skips.
    pub ignore_errors: bool,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            max_image_size: -1,
            ignore_errors: true,
        }
    }
}

/// Evaluation state saved and restored by q/Q.
#[derive(Clone, Default)]
struct EvalState {
    font: Option<Arc<LoadedFont>>,
    text_rendering_mode: i64,
}

/// Single-slot cache for the most recently painted named image, so
/// immediate repaints of the same resource skip re-decoding.
#[derive(Default)]
struct ImageCacheSlot {
    key: Option<String>,
    op: Option<(OpCode, Vec<Operand>)>,
}

pub struct PDFPageEvaluator<'a> {
    doc: &'a PDFDocument,
    page_index: usize,
    options: EvaluatorOptions,
    sink: Option<&'a dyn RenderSink>,
    cancel: Option<&'a CancelToken>,
    state: EvalState,
    state_stack: Vec<EvalState>,
    /// Object ids of forms currently being expanded.
    form_stack: Vec<u32>,
    form_depth: usize,
    image_cache: ImageCacheSlot,
    image_counter: usize,
}

impl<'a> PDFPageEvaluator<'a> {
    pub fn new(
        doc: &'a PDFDocument,
        page_index: usize,
        options: EvaluatorOptions,
        sink: Option<&'a dyn RenderSink>,
        cancel: Option<&'a CancelToken>,
    ) -> Self {
        Self {
            doc,
            page_index,
            options,
            sink,
            cancel,
            state: EvalState::default(),
            state_stack: Vec::new(),
            form_stack: Vec::new(),
            form_depth: 0,
            image_cache: ImageCacheSlot::default(),
            image_counter: 0,
        }
    }

    /// Currently selected font, when a setFont has been evaluated.
    pub fn current_font(&self) -> Option<Arc<LoadedFont>> {
        self.state.font.clone()
    }

    /// Evaluate a content stream against its resources, appending to
    /// `oplist`. `initial_ctm` seeds the preprocessor for nested scopes.
    pub fn evaluate(
        &mut self,
        content: &[u8],
        resources: &HashMap<String, PDFObject>,
        oplist: &mut OperatorList<'_>,
        initial_ctm: Option<Matrix>,
    ) -> Result<()> {
        let mut preprocessor = match initial_ctm {
            Some(ctm) => ContentPreprocessor::with_ctm(content, ctm),
            None => ContentPreprocessor::new(content),
        };

        loop {
            if let Some(cancel) = self.cancel {
                cancel.check()?;
            }
            let Some(operation) = preprocessor.read()? else {
                break;
            };
            match self.execute(operation, &preprocessor, resources, oplist) {
                Ok(()) => {}
                Err(e) if e.is_missing_data() || matches!(e, PdfError::Cancelled) => {
                    return Err(e);
                }
                Err(e) if self.options.ignore_errors => {
                    warn!(error = %e, "skipping failed operation");
                }
                Err(e) => return Err(e),
            }
        }

        // Unbalanced saves are common inside forms; close them so the
        // consumer's state stack stays balanced.
        for _ in 0..preprocessor.saved_states_depth() {
            oplist.add_op(OpCode::Restore, Vec::new());
        }
        Ok(())
    }

    fn execute(
        &mut self,
        operation: Operation,
        preprocessor: &ContentPreprocessor<'_>,
        resources: &HashMap<String, PDFObject>,
        oplist: &mut OperatorList<'_>,
    ) -> Result<()> {
        let Operation { op, mut args } = operation;
        match op {
            OpCode::SetStrokeColorN | OpCode::SetFillColorN => {
                let pattern_name = match args.last() {
                    Some(Operand::Name(name)) => Some(name.clone()),
                    _ => None,
                };
                if let Some(name) = pattern_name
                    && let Some(pattern) = self.lookup_resource(resources, "Pattern", &name)?
                {
                    return self.handle_pattern(op, &args, resources, &pattern, oplist);
                }
            }
            OpCode::PaintXObject => {
                let Some(Operand::Name(name)) = args.first() else {
                    return Err(PdfError::SyntaxError("Do without a name operand".into()));
                };
                let name = name.clone();
                return self.handle_xobject(&name, preprocessor, resources, oplist);
            }
            OpCode::SetFont => {
                let Some(Operand::Name(font_name)) = args.first() else {
                    return Err(PdfError::SyntaxError("Tf without a font name".into()));
                };
                let font_name = font_name.clone();
                let font = self.handle_set_font(resources, &font_name, None, oplist)?;
                args[0] = Operand::Id(font.loaded_name.clone());
            }
            OpCode::BeginInlineImage => {
                let stream = inline_image_stream(&args)?;
                return self.build_paint_image(&stream, true, None, oplist);
            }
            OpCode::Save => {
                self.state_stack.push(self.state.clone());
            }
            OpCode::Restore => {
                // A restore on an empty stack keeps the current state.
                if let Some(prev) = self.state_stack.pop() {
                    self.state = prev;
                }
            }
            OpCode::SetTextRenderingMode => {
                if let Some(mode) = args.first().and_then(Operand::as_num) {
                    self.state.text_rendering_mode = mode as i64;
                }
            }
            OpCode::ShadingFill => {
                let Some(Operand::Name(name)) = args.first() else {
                    return Err(PdfError::SyntaxError("sh without a name operand".into()));
                };
                let name = name.clone();
                let Some(shading) = self.lookup_resource(resources, "Shading", &name)? else {
                    warn!(name = %name, "shading resource not found, skipping");
                    return Ok(());
                };
                args = vec![self.shading_ir(&shading)?];
            }
            OpCode::SetGState => {
                let Some(Operand::Name(name)) = args.first() else {
                    return Err(PdfError::SyntaxError("gs without a name operand".into()));
                };
                let name = name.clone();
                let Some(gstate) = self.lookup_resource(resources, "ExtGState", &name)? else {
                    return Ok(());
                };
                let dict = gstate.as_dict()?.clone();
                return self.set_gstate(&dict, resources, oplist);
            }
            _ => {}
        }
        oplist.add_op(op, args);
        Ok(())
    }

    /// Look up a named entry in a resource sub-dictionary, resolved.
    fn lookup_resource(
        &self,
        resources: &HashMap<String, PDFObject>,
        category: &str,
        name: &str,
    ) -> Result<Option<PDFObject>> {
        let Some(sub) = resources.get(category) else {
            return Ok(None);
        };
        let sub = self.doc.resolve_shared(sub)?;
        let Ok(dict) = sub.as_dict() else {
            return Ok(None);
        };
        match dict.get(name) {
            Some(entry) => Ok(Some(self.doc.resolve(entry)?)),
            None => Ok(None),
        }
    }

    // ---- patterns and shadings ------------------------------------------

    fn handle_pattern(
        &mut self,
        op: OpCode,
        args: &[Operand],
        resources: &HashMap<String, PDFObject>,
        pattern: &PDFObject,
        oplist: &mut OperatorList<'_>,
    ) -> Result<()> {
        let dict = pattern.as_dict()?;
        let pattern_type = dict
            .get("PatternType")
            .and_then(|t| self.doc.resolve(t).ok())
            .and_then(|t| t.as_int().ok())
            .unwrap_or(0);
        match pattern_type {
            1 => {
                let stream = pattern.as_stream()?;
                self.handle_tiling(op, args, resources, stream, oplist)
            }
            2 => {
                let Some(shading) = dict.get("Shading") else {
                    warn!("shading pattern without a shading entry, skipping");
                    return Ok(());
                };
                let shading = self.doc.resolve(shading)?;
                let ir = self.shading_ir(&shading)?;
                oplist.add_op(op, vec![ir]);
                Ok(())
            }
            other => {
                warn!(pattern_type = other, "unknown pattern type, skipping");
                Ok(())
            }
        }
    }

    /// Lower a tiling pattern to its own operator list. Dependencies bubble
    /// to the parent so they resolve before the nested list replays.
    fn handle_tiling(
        &mut self,
        op: OpCode,
        args: &[Operand],
        resources: &HashMap<String, PDFObject>,
        pattern: &PDFStream,
        oplist: &mut OperatorList<'_>,
    ) -> Result<()> {
        let content = self.doc.decode_stream(pattern)?;
        let pat_resources = match pattern.get("Resources") {
            Some(res) => self.doc.resolve(res)?.as_dict()?.clone(),
            None => resources.clone(),
        };

        let mut tiling_list = OperatorList::unbounded(self.page_index, RenderIntent::Display);
        self.evaluate(&content, &pat_resources, &mut tiling_list, None)?;

        let bbox = self
            .nums4(pattern.get("BBox"))?
            .ok_or_else(|| PdfError::KeyError("BBox".into()))?;
        let xstep = self
            .num_attr(pattern.get("XStep"))?
            .ok_or_else(|| PdfError::KeyError("XStep".into()))?;
        let ystep = self
            .num_attr(pattern.get("YStep"))?
            .ok_or_else(|| PdfError::KeyError("YStep".into()))?;

        let deps = tiling_list.dependencies().clone();
        oplist.add_dependencies(&deps);

        let ir = TilingPatternIR {
            operator_list: tiling_list.into_ir(),
            matrix: self
                .nums6(pattern.get("Matrix"))?
                .unwrap_or([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
            bbox,
            xstep,
            ystep,
            paint_type: self
                .num_attr(pattern.get("PaintType"))?
                .map(|n| n as i64)
                .unwrap_or(1),
            tiling_type: self
                .num_attr(pattern.get("TilingType"))?
                .map(|n| n as i64)
                .unwrap_or(1),
            // Components before the pattern name color uncolored patterns.
            color: args[..args.len().saturating_sub(1)]
                .iter()
                .filter_map(Operand::as_num)
                .collect(),
        };

        oplist.add_op(op, vec![Operand::Tiling(Box::new(ir))]);
        Ok(())
    }

    /// Summarize a shading dictionary into replayable operands.
    fn shading_ir(&self, shading: &PDFObject) -> Result<Operand> {
        let dict = shading.as_dict()?;
        let mut entries = Vec::new();
        for key in [
            "ShadingType",
            "Coords",
            "Domain",
            "Extend",
            "ColorSpace",
            "BBox",
        ] {
            if let Some(value) = dict.get(key) {
                let resolved = self.doc.resolve(value)?;
                entries.push((key.to_string(), object_to_operand(&resolved)));
            }
        }
        Ok(Operand::Dict(entries))
    }

    // ---- XObjects --------------------------------------------------------

    fn handle_xobject(
        &mut self,
        name: &str,
        preprocessor: &ContentPreprocessor<'_>,
        resources: &HashMap<String, PDFObject>,
        oplist: &mut OperatorList<'_>,
    ) -> Result<()> {
        // The image cache holds one compiled op: repeated paints of the
        // same resource replay it directly.
        if self.image_cache.key.as_deref() == Some(name)
            && let Some((op, cached_args)) = self.image_cache.op.clone()
        {
            oplist.add_op(op, cached_args);
            return Ok(());
        }

        let Some(sub) = resources.get("XObject") else {
            oplist.add_op(OpCode::PaintXObject, vec![Operand::Name(name.to_string())]);
            return Ok(());
        };
        let sub = self.doc.resolve_shared(sub)?;
        let Some(entry) = sub.as_dict()?.get(name) else {
            oplist.add_op(OpCode::PaintXObject, vec![Operand::Name(name.to_string())]);
            return Ok(());
        };
        let objid = match entry {
            PDFObject::Ref(r) => Some(r.objid),
            _ => None,
        };
        let resolved = self.doc.resolve_shared(entry)?;
        let xobj = resolved.as_stream()?;

        match xobj.get("Subtype").and_then(|s| s.as_name().ok()) {
            Some("Form") => {
                self.build_form_xobject(resources, xobj, objid, false, preprocessor.ctm(), oplist)
            }
            Some("Image") => self.build_paint_image(xobj, false, Some(name.to_string()), oplist),
            other => {
                warn!(subtype = ?other, "unhandled XObject subtype, skipping");
                Ok(())
            }
        }
    }

    fn build_form_xobject(
        &mut self,
        resources: &HashMap<String, PDFObject>,
        xobj: &PDFStream,
        objid: Option<u32>,
        smask: bool,
        ctm: Matrix,
        oplist: &mut OperatorList<'_>,
    ) -> Result<()> {
        if let Some(objid) = objid
            && self.form_stack.contains(&objid)
        {
            warn!(objid, "form XObject paints itself, skipping");
            return Ok(());
        }
        if self.form_depth >= MAX_FORM_DEPTH {
            warn!("form nesting too deep, skipping");
            return Ok(());
        }

        let matrix = self.nums6(xobj.get("Matrix"))?;
        let bbox = self.nums4(xobj.get("BBox"))?;

        let group = match xobj.get("Group") {
            Some(group) => {
                let group = self.doc.resolve(group)?;
                let dict = group.as_dict()?;
                let is_transparency =
                    matches!(dict.get("S"), Some(PDFObject::Name(s)) if s == "Transparency");
                let flag = |key: &str| {
                    dict.get(key)
                        .and_then(|v| self.doc.resolve(v).ok())
                        .and_then(|v| v.as_bool().ok())
                        .unwrap_or(false)
                };
                Some(GroupOptions {
                    matrix: matrix.unwrap_or([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
                    bbox,
                    smask,
                    isolated: is_transparency && flag("I"),
                    knockout: is_transparency && flag("K"),
                })
            }
            None => None,
        };

        if let Some(group) = &group {
            oplist.add_op(
                OpCode::BeginGroup,
                vec![Operand::Group(Box::new(group.clone()))],
            );
        }
        oplist.add_op(
            OpCode::PaintFormXObjectBegin,
            vec![
                opt_nums_operand(matrix.as_ref().map(|m| &m[..])),
                opt_nums_operand(bbox.as_ref().map(|b| &b[..])),
            ],
        );

        let content = self.doc.decode_stream(xobj)?;
        let form_resources = match xobj.get("Resources") {
            Some(res) => self.doc.resolve(res)?.as_dict()?.clone(),
            None => resources.clone(),
        };

        if let Some(objid) = objid {
            self.form_stack.push(objid);
        }
        self.form_depth += 1;
        let result = self.evaluate(&content, &form_resources, oplist, Some(ctm));
        self.form_depth -= 1;
        if objid.is_some() {
            self.form_stack.pop();
        }
        result?;

        oplist.add_op(OpCode::PaintFormXObjectEnd, Vec::new());
        if let Some(group) = group {
            oplist.add_op(OpCode::EndGroup, vec![Operand::Group(Box::new(group))]);
        }
        Ok(())
    }

    fn handle_smask(
        &mut self,
        smask: &HashMap<String, PDFObject>,
        resources: &HashMap<String, PDFObject>,
        oplist: &mut OperatorList<'_>,
    ) -> Result<()> {
        let content = smask
            .get("G")
            .ok_or_else(|| PdfError::KeyError("G".into()))?;
        let objid = match content {
            PDFObject::Ref(r) => Some(r.objid),
            _ => None,
        };
        let resolved = self.doc.resolve_shared(content)?;
        let stream = resolved.as_stream()?;
        self.build_form_xobject(resources, stream, objid, true, MATRIX_IDENTITY, oplist)
    }

    // ---- images ----------------------------------------------------------

    fn build_paint_image(
        &mut self,
        image: &PDFStream,
        inline: bool,
        cache_key: Option<String>,
        oplist: &mut OperatorList<'_>,
    ) -> Result<()> {
        let w = self.num_attr(image.get("Width"))?.unwrap_or(0.0);
        let h = self.num_attr(image.get("Height"))?.unwrap_or(0.0);
        if w <= 0.0 || h <= 0.0 {
            warn!("image with zero dimension, skipping");
            return Ok(());
        }
        if self.options.max_image_size != -1 && w * h > self.options.max_image_size as f64 {
            warn!("image exceeded the maximum allowed size and was removed");
            return Ok(());
        }
        let (w, h) = (w as usize, h as usize);

        if self.bool_attr(image.get("ImageMask"))?.unwrap_or(false) {
            return self.build_image_mask(image, w, h, cache_key, oplist);
        }

        let soft_mask = image.contains("SMask");
        let mask = image.contains("Mask");
        let is_jpeg = matches!(
            self.doc.final_filter(image)?.as_deref(),
            Some("DCTDecode") | Some("DCT")
        );

        // Small inline images decode eagerly and ride along in the list.
        if inline
            && !soft_mask
            && !mask
            && !is_jpeg
            && (w + h) < SMALL_IMAGE_DIMENSIONS
            && let Some(rgba) = self.create_rgba(image, w, h)?
        {
            let img = ImageData {
                width: w,
                height: h,
                kind: ImageKind::Rgba32bpp,
                data: Bytes::from(rgba),
                cached: false,
            };
            oplist.add_op(OpCode::PaintInlineImageXObject, vec![Operand::Image(img)]);
            return Ok(());
        }

        self.image_counter += 1;
        let obj_id = format!("img_p{}_{}", self.page_index, self.image_counter);
        oplist.add_dependency(&obj_id);
        let args = vec![
            Operand::Id(obj_id.clone()),
            Operand::Int(w as i64),
            Operand::Int(h as i64),
        ];

        if !soft_mask && !mask && is_jpeg {
            // Natively decodable; hand the compressed bytes through.
            oplist.add_op(OpCode::PaintJpegXObject, args.clone());
            if let Some(sink) = self.sink {
                sink.send_object(&obj_id, ObjPayload::JpegStream(image.raw_bytes()));
            }
            self.remember_image(cache_key, OpCode::PaintJpegXObject, args);
            return Ok(());
        }

        if let Some(sink) = self.sink {
            let data = Bytes::from(self.doc.decode_stream(image)?);
            let mut attrs = HashMap::new();
            for (key, label) in [
                ("BitsPerComponent", "bpc"),
                ("ColorSpace", "colorspace"),
                ("Filter", "filter"),
                ("Decode", "decode"),
            ] {
                if let Some(value) = image.get(key) {
                    attrs.insert(label.to_string(), format!("{:?}", self.doc.resolve(value)?));
                }
            }
            sink.send_object(
                &obj_id,
                ObjPayload::ImageStream {
                    width: w,
                    height: h,
                    attrs,
                    data,
                },
            );
        }
        oplist.add_op(OpCode::PaintImageXObject, args.clone());
        self.remember_image(cache_key, OpCode::PaintImageXObject, args);
        Ok(())
    }

    fn build_image_mask(
        &mut self,
        image: &PDFStream,
        w: usize,
        h: usize,
        cache_key: Option<String>,
        oplist: &mut OperatorList<'_>,
    ) -> Result<()> {
        let bytes_per_row = (w + 7) >> 3;
        let mut data = self.doc.decode_stream(image)?;
        data.truncate(bytes_per_row * h);

        // Decode [1 0] inverts the mask sense.
        let inverse = self
            .nums_attr(image.get("Decode"))?
            .is_some_and(|d| d.first().copied().unwrap_or(0.0) > 0.0);
        if inverse {
            for b in &mut data {
                *b = !*b;
            }
        }

        let img = ImageData {
            width: w,
            height: h,
            kind: ImageKind::Grayscale1bpp,
            data: Bytes::from(data),
            cached: true,
        };
        let args = vec![Operand::Image(img)];
        oplist.add_op(OpCode::PaintImageMaskXObject, args.clone());
        self.remember_image(cache_key, OpCode::PaintImageMaskXObject, args);
        Ok(())
    }

    fn remember_image(&mut self, key: Option<String>, op: OpCode, args: Vec<Operand>) {
        if key.is_some() {
            self.image_cache = ImageCacheSlot {
                key,
                op: Some((op, args)),
            };
        }
    }

    /// Eager RGBA decode for small images. `None` for sample formats that
    /// need the consumer's image pipeline.
    fn create_rgba(&self, image: &PDFStream, w: usize, h: usize) -> Result<Option<Vec<u8>>> {
        let bpc = self.num_attr(image.get("BitsPerComponent"))?.unwrap_or(8.0) as usize;
        let cs = match image.get("ColorSpace") {
            Some(cs) => match self.doc.resolve(cs)? {
                PDFObject::Name(name) => name,
                _ => return Ok(None),
            },
            None => "DeviceGray".to_string(),
        };
        let data = self.doc.decode_stream(image)?;

        let mut rgba = Vec::with_capacity(w * h * 4);
        match (cs.as_str(), bpc) {
            ("DeviceGray" | "CalGray", 8) => {
                if data.len() < w * h {
                    return Ok(None);
                }
                for &v in &data[..w * h] {
                    rgba.extend_from_slice(&[v, v, v, 255]);
                }
            }
            ("DeviceGray" | "CalGray", 1) => {
                let stride = (w + 7) >> 3;
                if data.len() < stride * h {
                    return Ok(None);
                }
                for row in 0..h {
                    for col in 0..w {
                        let byte = data[row * stride + (col >> 3)];
                        let v = if (byte >> (7 - (col & 7))) & 1 == 1 {
                            255
                        } else {
                            0
                        };
                        rgba.extend_from_slice(&[v, v, v, 255]);
                    }
                }
            }
            ("DeviceRGB" | "CalRGB", 8) => {
                if data.len() < w * h * 3 {
                    return Ok(None);
                }
                for px in data[..w * h * 3].chunks_exact(3) {
                    rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
            }
            _ => return Ok(None),
        }
        Ok(Some(rgba))
    }

    // ---- fonts and graphics state ---------------------------------------

    /// Load a font by resource name or direct reference, announce it to the
    /// sink on first load, and record the dependency.
    fn handle_set_font(
        &mut self,
        resources: &HashMap<String, PDFObject>,
        font_name: &str,
        font_ref: Option<&PDFObject>,
        oplist: &mut OperatorList<'_>,
    ) -> Result<Arc<LoadedFont>> {
        let font_obj = match font_ref {
            Some(obj) => obj.clone(),
            None => {
                let fonts = resources
                    .get("Font")
                    .ok_or_else(|| PdfError::KeyError("Font".into()))?;
                let fonts = self.doc.resolve_shared(fonts)?;
                fonts
                    .as_dict()?
                    .get(font_name)
                    .ok_or_else(|| PdfError::KeyError(font_name.to_string()))?
                    .clone()
            }
        };
        let font = load_font(self.doc, self.page_index, font_name, &font_obj)?;
        self.state.font = Some(Arc::clone(&font));

        if font.mark_sent()
            && let Some(sink) = self.sink
        {
            sink.send_object(
                &font.loaded_name,
                ObjPayload::Font {
                    loaded_name: font.loaded_name.clone(),
                    base_font: font.base_font.clone(),
                    subtype: font.subtype.clone(),
                    vertical: font.vertical,
                },
            );
        }
        oplist.add_dependency(&font.loaded_name);
        Ok(font)
    }

    /// Translate an ExtGState dictionary into a normalized state operand.
    fn set_gstate(
        &mut self,
        gstate: &HashMap<String, PDFObject>,
        resources: &HashMap<String, PDFObject>,
        oplist: &mut OperatorList<'_>,
    ) -> Result<()> {
        let mut entries: Vec<(String, Operand)> = Vec::new();
        // Sorted key walk keeps the side-effect ops (font dependency,
        // soft-mask group) in one order regardless of dict layout.
        let mut keys: Vec<&String> = gstate.keys().collect();
        keys.sort();
        for key in keys {
            let value = &gstate[key];
            match key.as_str() {
                "Type" => {}
                "LW" | "LC" | "LJ" | "ML" | "D" | "RI" | "FL" | "CA" | "ca" | "BM" => {
                    let resolved = self.doc.resolve(value)?;
                    entries.push((key.clone(), object_to_operand(&resolved)));
                }
                "Font" => {
                    let pair = self.doc.resolve(value)?;
                    let pair = pair.as_array()?;
                    if pair.len() != 2 {
                        warn!("graphics state font entry is not a [font size] pair");
                        continue;
                    }
                    let font = self.handle_set_font(resources, "", Some(&pair[0]), oplist)?;
                    let size = object_to_operand(&self.doc.resolve(&pair[1])?);
                    entries.push((
                        key.clone(),
                        Operand::Array(vec![Operand::Id(font.loaded_name.clone()), size]),
                    ));
                }
                "SMask" => {
                    let resolved = self.doc.resolve(value)?;
                    if matches!(&resolved, PDFObject::Name(n) if n == "None") {
                        entries.push((key.clone(), Operand::Bool(false)));
                    } else if let Ok(dict) = resolved.as_dict() {
                        let dict = dict.clone();
                        self.handle_smask(&dict, resources, oplist)?;
                        entries.push((key.clone(), Operand::Bool(true)));
                    } else {
                        warn!("unsupported soft mask type");
                    }
                }
                "OP" | "op" | "OPM" | "BG" | "BG2" | "UCR" | "UCR2" | "TR" | "TR2" | "HT"
                | "SM" | "SA" | "AIS" | "TK" => {
                    info!(key = %key, "graphics state key not interpreted");
                }
                other => {
                    info!(key = %other, "unknown graphics state key");
                }
            }
        }
        oplist.add_op(OpCode::SetGState, vec![Operand::Dict(entries)]);
        Ok(())
    }

    // ---- attribute helpers ----------------------------------------------

    fn num_attr(&self, obj: Option<&PDFObject>) -> Result<Option<f64>> {
        match obj {
            Some(obj) => Ok(self.doc.resolve(obj)?.as_num().ok()),
            None => Ok(None),
        }
    }

    fn bool_attr(&self, obj: Option<&PDFObject>) -> Result<Option<bool>> {
        match obj {
            Some(obj) => Ok(self.doc.resolve(obj)?.as_bool().ok()),
            None => Ok(None),
        }
    }

    fn nums_attr(&self, obj: Option<&PDFObject>) -> Result<Option<Vec<f64>>> {
        let Some(obj) = obj else {
            return Ok(None);
        };
        let resolved = self.doc.resolve(obj)?;
        let Ok(arr) = resolved.as_array() else {
            return Ok(None);
        };
        let mut nums = Vec::with_capacity(arr.len());
        for item in arr {
            match self.doc.resolve(item)?.as_num() {
                Ok(n) => nums.push(n),
                Err(_) => return Ok(None),
            }
        }
        Ok(Some(nums))
    }

    fn nums4(&self, obj: Option<&PDFObject>) -> Result<Option<[f64; 4]>> {
        Ok(self
            .nums_attr(obj)?
            .filter(|n| n.len() == 4)
            .map(|n| [n[0], n[1], n[2], n[3]]))
    }

    fn nums6(&self, obj: Option<&PDFObject>) -> Result<Option<[f64; 6]>> {
        Ok(self
            .nums_attr(obj)?
            .filter(|n| n.len() == 6)
            .map(|n| [n[0], n[1], n[2], n[3], n[4], n[5]]))
    }
}

/// Build a stream object from the parsed inline image operands, with the
/// abbreviated keys and filter names expanded to their standard forms.
fn inline_image_stream(args: &[Operand]) -> Result<PDFStream> {
    let (Some(Operand::Dict(entries)), Some(Operand::Str(data))) = (args.first(), args.get(1))
    else {
        return Err(PdfError::SyntaxError("malformed inline image".into()));
    };
    let mut attrs = HashMap::new();
    for (key, value) in entries {
        attrs.insert(expand_abbreviation(key), operand_to_object(value));
    }
    Ok(PDFStream::new(attrs, data.clone()))
}

fn expand_abbreviation(key: &str) -> String {
    match key {
        "W" => "Width",
        "H" => "Height",
        "BPC" => "BitsPerComponent",
        "CS" => "ColorSpace",
        "F" => "Filter",
        "IM" => "ImageMask",
        "D" => "Decode",
        "DP" => "DecodeParms",
        "I" => "Interpolate",
        other => other,
    }
    .to_string()
}

fn operand_to_object(operand: &Operand) -> PDFObject {
    match operand {
        Operand::Null => PDFObject::Null,
        Operand::Bool(b) => PDFObject::Bool(*b),
        Operand::Int(i) => PDFObject::Int(*i),
        Operand::Real(r) => PDFObject::Real(*r),
        Operand::Name(n) => PDFObject::Name(expand_name_abbreviation(n)),
        Operand::Str(s) => PDFObject::String(s.clone()),
        Operand::Array(items) => PDFObject::Array(items.iter().map(operand_to_object).collect()),
        Operand::Dict(entries) => PDFObject::Dict(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), operand_to_object(v)))
                .collect(),
        ),
        _ => PDFObject::Null,
    }
}

/// Filter and colorspace names have short forms inside inline images.
fn expand_name_abbreviation(name: &str) -> String {
    match name {
        "AHx" => "ASCIIHexDecode",
        "A85" => "ASCII85Decode",
        "LZW" => "LZWDecode",
        "Fl" => "FlateDecode",
        "RL" => "RunLengthDecode",
        "CCF" => "CCITTFaxDecode",
        "DCT" => "DCTDecode",
        "G" => "DeviceGray",
        "RGB" => "DeviceRGB",
        "CMYK" => "DeviceCMYK",
        "I" => "Indexed",
        other => other,
    }
    .to_string()
}

fn object_to_operand(obj: &PDFObject) -> Operand {
    match obj {
        PDFObject::Null => Operand::Null,
        PDFObject::Bool(b) => Operand::Bool(*b),
        PDFObject::Int(i) => Operand::Int(*i),
        PDFObject::Real(r) => Operand::Real(*r),
        PDFObject::Name(n) => Operand::Name(n.clone()),
        PDFObject::String(s) => Operand::Str(s.clone()),
        PDFObject::Array(items) => Operand::Array(items.iter().map(object_to_operand).collect()),
        PDFObject::Dict(dict) => {
            let mut entries: Vec<(String, Operand)> = dict
                .iter()
                .map(|(k, v)| (k.clone(), object_to_operand(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Operand::Dict(entries)
        }
        PDFObject::Stream(_) | PDFObject::Ref(_) => Operand::Null,
    }
}

fn opt_nums_operand(nums: Option<&[f64]>) -> Operand {
    match nums {
        Some(nums) => Operand::Array(nums.iter().map(|&n| Operand::Real(n)).collect()),
        None => Operand::Null,
    }
}

/// Breadth-first scan of a resource tree for non-default blend modes.
/// Cycles through XObject resources are guarded by the visited set.
pub fn has_blend_modes(doc: &PDFDocument, resources: &HashMap<String, PDFObject>) -> bool {
    let mut visited: HashSet<u32> = HashSet::new();
    let mut nodes = vec![resources.clone()];

    while let Some(node) = nodes.pop() {
        if let Some(ext_gstate) = node.get("ExtGState")
            && let Ok(ext_gstate) = doc.resolve(ext_gstate)
            && let Ok(dict) = ext_gstate.as_dict()
        {
            for value in dict.values() {
                let Ok(gs) = doc.resolve(value) else {
                    continue;
                };
                let Ok(gs) = gs.as_dict() else {
                    continue;
                };
                match gs.get("BM").and_then(|bm| doc.resolve(bm).ok()) {
                    Some(PDFObject::Name(name)) if name != "Normal" && name != "Compatible" => {
                        return true;
                    }
                    _ => {}
                }
            }
        }

        if let Some(xobjects) = node.get("XObject")
            && let Ok(xobjects) = doc.resolve(xobjects)
            && let Ok(dict) = xobjects.as_dict()
        {
            for value in dict.values() {
                if let PDFObject::Ref(r) = value
                    && !visited.insert(r.objid)
                {
                    continue;
                }
                let Ok(xobj) = doc.resolve_shared(value) else {
                    continue;
                };
                let Ok(stream) = xobj.as_stream() else {
                    continue;
                };
                if let Some(res) = stream.get("Resources")
                    && let Ok(res) = doc.resolve(res)
                    && let Ok(dict) = res.as_dict()
                {
                    nodes.push(dict.clone());
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_image_stream_expands_keys() {
        let args = vec![
            Operand::Dict(vec![
                ("W".into(), Operand::Int(4)),
                ("H".into(), Operand::Int(2)),
                ("F".into(), Operand::Name("Fl".into())),
            ]),
            Operand::Str(vec![1, 2, 3]),
        ];
        let stream = inline_image_stream(&args).unwrap();
        assert_eq!(stream.get("Width"), Some(&PDFObject::Int(4)));
        assert_eq!(stream.get("Height"), Some(&PDFObject::Int(2)));
        assert_eq!(
            stream.get("Filter"),
            Some(&PDFObject::Name("FlateDecode".into()))
        );
        assert_eq!(stream.raw_data(), &[1, 2, 3]);
    }

    #[test]
    fn test_inline_image_stream_rejects_malformed() {
        assert!(inline_image_stream(&[Operand::Int(1)]).is_err());
    }

    #[test]
    fn test_object_operand_round_trip() {
        let obj = PDFObject::Array(vec![
            PDFObject::Int(3),
            PDFObject::Name("DeviceRGB".into()),
            PDFObject::Bool(true),
        ]);
        let operand = object_to_operand(&obj);
        assert_eq!(operand_to_object(&operand), obj);
    }

    #[test]
    fn test_opt_nums_operand() {
        assert_eq!(opt_nums_operand(None), Operand::Null);
        assert_eq!(
            opt_nums_operand(Some(&[1.0, 2.0])),
            Operand::Array(vec![Operand::Real(1.0), Operand::Real(2.0)])
        );
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(PdfError::Cancelled)));
    }
}
