//! Text extraction from content streams.
//!
//! Walks the same validated operation stream as the evaluator but tracks
//! only the text machinery: the text matrix, font size and metrics, and
//! the spacing parameters. Consecutive show-text operations accumulate
//! into one run; the run closes into a positioned item (string in visual
//! order, origin from the state at run open) on the first operator that
//! does not show text.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use unicode_bidi::BidiInfo;

use super::opcodes::OpCode;
use super::oplist::Operand;
use super::preprocessor::ContentPreprocessor;
use crate::document::catalog::PDFDocument;
use crate::error::{PdfError, Result};
use crate::font::{LoadedFont, load_font};
use crate::model::objects::PDFObject;
use crate::utils::Matrix;

/// A negative spacing adjustment larger than this fraction of the space
/// glyph reads as an intentional word gap.
const SPACE_FACTOR: f64 = 0.35;
/// Above this many space widths, one space per width is synthesized.
const MULTI_SPACE_FACTOR: f64 = 1.5;

/// Nested form depth cap.
const MAX_FORM_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextDirection {
    Ltr,
    Rtl,
    Ttb,
}

impl TextDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TextDirection::Ltr => "ltr",
            TextDirection::Rtl => "rtl",
            TextDirection::Ttb => "ttb",
        }
    }
}

/// One extracted text run, positioned in device space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub text: String,
    pub dir: TextDirection,
    pub x: f64,
    pub y: f64,
    /// Baseline angle in radians.
    pub angle: f64,
    /// Font height in device units.
    pub size: f64,
}

/// Text-positioning state carried across operations and into forms.
#[derive(Debug, Clone)]
pub struct TextState {
    pub font_size: f64,
    pub text_matrix: [f64; 6],
    pub leading: f64,
    pub h_scale: f64,
    pub text_rise: f64,
    pub char_spacing: f64,
    pub word_spacing: f64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font_size: 0.0,
            text_matrix: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            leading: 0.0,
            h_scale: 1.0,
            text_rise: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
        }
    }
}

/// Rendering parameters of the current text position under a CTM.
pub struct RenderParams {
    pub render_matrix: [f64; 6],
    pub v_scale: f64,
    pub angle: f64,
}

impl TextState {
    pub fn new() -> Self {
        Self::default()
    }

    /// BT resets the text matrix, nothing else.
    pub fn begin_text_object(&mut self) {
        self.text_matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
    }

    pub fn set_text_matrix(&mut self, m: [f64; 6]) {
        self.text_matrix = m;
    }

    pub fn translate_text_matrix(&mut self, x: f64, y: f64) {
        let m = &mut self.text_matrix;
        m[4] = m[0] * x + m[2] * y + m[4];
        m[5] = m[1] * x + m[3] * y + m[5];
    }

    /// Compose the text matrix with the CTM and the font size, horizontal
    /// scale and rise into the effective rendering matrix.
    pub fn calc_render_params(&self, cm: Matrix) -> RenderParams {
        let tm = &self.text_matrix;
        let a = self.font_size;
        let b = a * self.h_scale;
        let c = self.text_rise;
        let v_scale = tm[2].hypot(tm[3]);
        let angle = tm[1].atan2(tm[0]);
        let (cm0, cm1, cm2, cm3, cm4, cm5) = cm;
        let m0 = tm[0] * cm0 + tm[1] * cm2;
        let m1 = tm[0] * cm1 + tm[1] * cm3;
        let m2 = tm[2] * cm0 + tm[3] * cm2;
        let m3 = tm[2] * cm1 + tm[3] * cm3;
        let m4 = tm[4] * cm0 + tm[5] * cm2 + cm4;
        let m5 = tm[4] * cm1 + tm[5] * cm3 + cm5;
        RenderParams {
            render_matrix: [b * m0, b * m1, a * m2, a * m3, c * m2 + m4, c * m3 + m5],
            v_scale,
            angle,
        }
    }
}

/// Single-slot cache of the last visited XObject's extracted items.
#[derive(Default)]
struct XObjectTextCache {
    key: Option<String>,
    texts: Option<Vec<TextItem>>,
}

/// A run being accumulated across consecutive show-text operations. The
/// positioning inputs are frozen at the first show so later state changes
/// inside the run (there are none by construction) cannot move it.
struct OpenRun {
    text: String,
    font: Arc<LoadedFont>,
    state: TextState,
    ctm: Matrix,
}

impl OpenRun {
    fn append(
        run: &mut Option<OpenRun>,
        chunk: &str,
        font: &Arc<LoadedFont>,
        state: &TextState,
        ctm: Matrix,
    ) {
        match run {
            Some(open) => open.text.push_str(chunk),
            None => {
                *run = Some(OpenRun {
                    text: chunk.to_string(),
                    font: Arc::clone(font),
                    state: state.clone(),
                    ctm,
                });
            }
        }
    }

    fn close(run: &mut Option<OpenRun>, items: &mut Vec<TextItem>) {
        if let Some(open) = run.take() {
            items.push(make_item(&open.text, &open.font, &open.state, open.ctm));
        }
    }
}

pub struct TextExtractor<'a> {
    doc: &'a PDFDocument,
    page_index: usize,
    depth: usize,
}

impl<'a> TextExtractor<'a> {
    pub fn new(doc: &'a PDFDocument, page_index: usize) -> Self {
        Self {
            doc,
            page_index,
            depth: 0,
        }
    }

    /// Extract positioned text runs from a content stream. `state` is
    /// shared with nested forms, matching how the text matrix carries
    /// across a form boundary.
    pub fn extract(
        &mut self,
        content: &[u8],
        resources: &HashMap<String, PDFObject>,
        state: &mut TextState,
    ) -> Result<Vec<TextItem>> {
        let mut items: Vec<TextItem> = Vec::new();
        let mut preprocessor = ContentPreprocessor::new(content);
        let mut font: Option<Arc<LoadedFont>> = None;
        let mut xobj_cache = XObjectTextCache::default();
        let mut run: Option<OpenRun> = None;

        while let Some(operation) = preprocessor.read()? {
            let args = &operation.args;
            if !shows_text(operation.op) {
                OpenRun::close(&mut run, &mut items);
            }
            match operation.op {
                OpCode::SetFont => {
                    match self.load_named_font(resources, args.first()) {
                        Ok(loaded) => font = Some(loaded),
                        Err(e) if e.is_missing_data() => return Err(e),
                        Err(e) => warn!(error = %e, "font load failed during extraction"),
                    }
                    state.font_size = args.get(1).and_then(Operand::as_num).unwrap_or(0.0);
                }
                OpCode::SetTextRise => {
                    state.text_rise = args.first().and_then(Operand::as_num).unwrap_or(0.0);
                }
                OpCode::SetHScale => {
                    state.h_scale =
                        args.first().and_then(Operand::as_num).unwrap_or(100.0) / 100.0;
                }
                OpCode::SetLeading => {
                    state.leading = args.first().and_then(Operand::as_num).unwrap_or(0.0);
                }
                OpCode::MoveText => {
                    let x = args.first().and_then(Operand::as_num).unwrap_or(0.0);
                    let y = args.get(1).and_then(Operand::as_num).unwrap_or(0.0);
                    state.translate_text_matrix(x, y);
                }
                OpCode::SetLeadingMoveText => {
                    let x = args.first().and_then(Operand::as_num).unwrap_or(0.0);
                    let y = args.get(1).and_then(Operand::as_num).unwrap_or(0.0);
                    state.leading = -y;
                    state.translate_text_matrix(x, y);
                }
                OpCode::NextLine => {
                    state.translate_text_matrix(0.0, -state.leading);
                }
                OpCode::SetTextMatrix => {
                    let mut m = [0.0; 6];
                    for (k, slot) in m.iter_mut().enumerate() {
                        *slot = args.get(k).and_then(Operand::as_num).unwrap_or(0.0);
                    }
                    state.set_text_matrix(m);
                }
                OpCode::SetCharSpacing => {
                    state.char_spacing = args.first().and_then(Operand::as_num).unwrap_or(0.0);
                }
                OpCode::SetWordSpacing => {
                    state.word_spacing = args.first().and_then(Operand::as_num).unwrap_or(0.0);
                }
                OpCode::BeginText => state.begin_text_object(),
                OpCode::ShowSpacedText => {
                    let Some(font) = &font else {
                        warn!("spaced show-text without a font, skipping");
                        continue;
                    };
                    let Some(Operand::Array(parts)) = args.first() else {
                        continue;
                    };
                    let mut chunk = String::new();
                    for part in parts {
                        match part {
                            Operand::Str(bytes) => chunk.push_str(&font.decode_text(bytes)),
                            other => {
                                let Some(adjustment) = other.as_num() else {
                                    continue;
                                };
                                let space_width = font.space_width();
                                if adjustment < 0.0 && space_width > 0.0 {
                                    let fake_spaces = -adjustment / space_width;
                                    if fake_spaces > MULTI_SPACE_FACTOR {
                                        for _ in 0..fake_spaces.round() as usize {
                                            chunk.push(' ');
                                        }
                                    } else if fake_spaces > SPACE_FACTOR {
                                        chunk.push(' ');
                                    }
                                }
                            }
                        }
                    }
                    OpenRun::append(&mut run, &chunk, font, state, preprocessor.ctm());
                }
                OpCode::ShowText | OpCode::NextLineShowText => {
                    // A line break could add a space here, but that inserts
                    // too many for selection purposes.
                    let Some(font) = &font else {
                        warn!("show-text without a font, skipping");
                        continue;
                    };
                    if let Some(Operand::Str(bytes)) = args.first() {
                        let chunk = font.decode_text(bytes);
                        OpenRun::append(&mut run, &chunk, font, state, preprocessor.ctm());
                    }
                }
                OpCode::NextLineSetSpacingShowText => {
                    let Some(font) = &font else {
                        continue;
                    };
                    if let Some(Operand::Str(bytes)) = args.get(2) {
                        let chunk = font.decode_text(bytes);
                        OpenRun::append(&mut run, &chunk, font, state, preprocessor.ctm());
                    }
                }
                OpCode::PaintXObject => {
                    let Some(Operand::Name(name)) = args.first() else {
                        continue;
                    };
                    if xobj_cache.key.as_deref() == Some(name.as_str()) {
                        if let Some(texts) = &xobj_cache.texts {
                            items.extend(texts.iter().cloned());
                        }
                        continue;
                    }
                    match self.extract_form(resources, name, state) {
                        Ok(Some(texts)) => {
                            items.extend(texts.iter().cloned());
                            xobj_cache = XObjectTextCache {
                                key: Some(name.clone()),
                                texts: Some(texts),
                            };
                        }
                        Ok(None) => {
                            xobj_cache = XObjectTextCache {
                                key: Some(name.clone()),
                                texts: None,
                            };
                        }
                        Err(e) if e.is_missing_data() => return Err(e),
                        Err(e) => warn!(error = %e, "form extraction failed"),
                    }
                }
                OpCode::SetGState => {
                    let Some(Operand::Name(name)) = args.first() else {
                        continue;
                    };
                    match self.gstate_font(resources, name) {
                        Ok(Some((loaded, size))) => {
                            font = Some(loaded);
                            state.font_size = size;
                        }
                        Ok(None) => {}
                        Err(e) if e.is_missing_data() => return Err(e),
                        Err(e) => warn!(error = %e, "graphics state font load failed"),
                    }
                }
                _ => {}
            }
        }
        OpenRun::close(&mut run, &mut items);
        Ok(items)
    }

    fn load_named_font(
        &self,
        resources: &HashMap<String, PDFObject>,
        name: Option<&Operand>,
    ) -> Result<Arc<LoadedFont>> {
        let Some(Operand::Name(name)) = name else {
            return Err(PdfError::SyntaxError("Tf without a font name".into()));
        };
        let fonts = resources
            .get("Font")
            .ok_or_else(|| PdfError::KeyError("Font".into()))?;
        let fonts = self.doc.resolve_shared(fonts)?;
        let font_obj = fonts
            .as_dict()?
            .get(name)
            .ok_or_else(|| PdfError::KeyError(name.clone()))?;
        load_font(self.doc, self.page_index, name, font_obj)
    }

    /// Recurse into a form XObject. `None` for image and other subtypes.
    fn extract_form(
        &mut self,
        resources: &HashMap<String, PDFObject>,
        name: &str,
        state: &mut TextState,
    ) -> Result<Option<Vec<TextItem>>> {
        let Some(xobjects) = resources.get("XObject") else {
            return Ok(None);
        };
        let xobjects = self.doc.resolve_shared(xobjects)?;
        let Some(entry) = xobjects.as_dict()?.get(name) else {
            return Ok(None);
        };
        let resolved = self.doc.resolve_shared(entry)?;
        let Ok(stream) = resolved.as_stream() else {
            return Ok(None);
        };
        if stream.get("Subtype").and_then(|s| s.as_name().ok()) != Some("Form") {
            return Ok(None);
        }
        if self.depth >= MAX_FORM_DEPTH {
            warn!("form nesting too deep during extraction, skipping");
            return Ok(None);
        }

        let content = self.doc.decode_stream(stream)?;
        let form_resources = match stream.get("Resources") {
            Some(res) => self.doc.resolve(res)?.as_dict()?.clone(),
            None => resources.clone(),
        };
        self.depth += 1;
        let result = self.extract(&content, &form_resources, state);
        self.depth -= 1;
        result.map(Some)
    }

    /// A graphics state dictionary can switch fonts mid-stream.
    fn gstate_font(
        &self,
        resources: &HashMap<String, PDFObject>,
        name: &str,
    ) -> Result<Option<(Arc<LoadedFont>, f64)>> {
        let Some(ext_gstate) = resources.get("ExtGState") else {
            return Ok(None);
        };
        let ext_gstate = self.doc.resolve_shared(ext_gstate)?;
        let Ok(dict) = ext_gstate.as_dict() else {
            return Ok(None);
        };
        let Some(gs) = dict.get(name) else {
            return Ok(None);
        };
        let gs = self.doc.resolve(gs)?;
        let Ok(gs) = gs.as_dict() else {
            return Ok(None);
        };
        let Some(pair) = gs.get("Font") else {
            return Ok(None);
        };
        let pair = self.doc.resolve(pair)?;
        let pair = pair.as_array()?;
        if pair.len() != 2 {
            return Ok(None);
        }
        let font = load_font(self.doc, self.page_index, "", &pair[0])?;
        let size = self.doc.resolve(&pair[1])?.as_num().unwrap_or(0.0);
        Ok(Some((font, size)))
    }
}

fn shows_text(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::ShowText
            | OpCode::ShowSpacedText
            | OpCode::NextLineShowText
            | OpCode::NextLineSetSpacingShowText
    )
}

fn make_item(chunk: &str, font: &LoadedFont, state: &TextState, ctm: Matrix) -> TextItem {
    let (text, dir) = if font.vertical {
        (chunk.to_string(), TextDirection::Ttb)
    } else {
        visual_order(chunk)
    };

    let params = state.calc_render_params(ctm);
    let font_height = state.font_size * params.v_scale;
    let font_ascent = if font.ascent != 0.0 {
        font.ascent * font_height
    } else if font.descent != 0.0 {
        (1.0 + font.descent) * font_height
    } else {
        font_height
    };

    let mut x = params.render_matrix[4] - font_ascent * params.angle.sin();
    let mut y = params.render_matrix[5] + font_ascent * params.angle.cos();
    if dir == TextDirection::Ttb {
        x += params.v_scale / 2.0;
        y -= params.v_scale;
    }

    TextItem {
        text,
        dir,
        x,
        y,
        angle: params.angle,
        size: font_height,
    }
}

/// Reorder a logical-order string into visual order, reporting the base
/// paragraph direction.
fn visual_order(text: &str) -> (String, TextDirection) {
    let info = BidiInfo::new(text, None);
    let Some(para) = info.paragraphs.first() else {
        return (text.to_string(), TextDirection::Ltr);
    };
    let dir = if para.level.is_rtl() {
        TextDirection::Rtl
    } else {
        TextDirection::Ltr
    };
    let reordered = info.reorder_line(para, para.range.clone()).into_owned();
    (reordered, dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MATRIX_IDENTITY;

    #[test]
    fn test_translate_text_matrix() {
        let mut state = TextState::new();
        state.set_text_matrix([2.0, 0.0, 0.0, 2.0, 10.0, 20.0]);
        state.translate_text_matrix(5.0, 7.0);
        assert_eq!(state.text_matrix[4], 20.0);
        assert_eq!(state.text_matrix[5], 34.0);
    }

    #[test]
    fn test_begin_text_resets_matrix_only() {
        let mut state = TextState::new();
        state.leading = 14.0;
        state.set_text_matrix([2.0, 0.0, 0.0, 2.0, 10.0, 20.0]);
        state.begin_text_object();
        assert_eq!(state.text_matrix, [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(state.leading, 14.0);
    }

    #[test]
    fn test_render_params_identity() {
        let mut state = TextState::new();
        state.font_size = 12.0;
        state.set_text_matrix([1.0, 0.0, 0.0, 1.0, 100.0, 200.0]);
        let params = state.calc_render_params(MATRIX_IDENTITY);
        assert_eq!(params.render_matrix[4], 100.0);
        assert_eq!(params.render_matrix[5], 200.0);
        assert_eq!(params.v_scale, 1.0);
        assert_eq!(params.angle, 0.0);
        assert_eq!(params.render_matrix[0], 12.0);
        assert_eq!(params.render_matrix[3], 12.0);
    }

    #[test]
    fn test_render_params_rotated() {
        let mut state = TextState::new();
        state.font_size = 10.0;
        // 90 degree rotation.
        state.set_text_matrix([0.0, 1.0, -1.0, 0.0, 0.0, 0.0]);
        let params = state.calc_render_params(MATRIX_IDENTITY);
        assert!((params.angle - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert_eq!(params.v_scale, 1.0);
    }

    #[test]
    fn test_visual_order_latin() {
        let (text, dir) = visual_order("hello");
        assert_eq!(text, "hello");
        assert_eq!(dir, TextDirection::Ltr);
    }

    #[test]
    fn test_visual_order_hebrew() {
        let (text, dir) = visual_order("\u{5e9}\u{5dc}\u{5d5}\u{5dd}");
        assert_eq!(dir, TextDirection::Rtl);
        // Visual order reverses the logical order.
        assert_eq!(text.chars().next(), Some('\u{5dd}'));
    }
}
