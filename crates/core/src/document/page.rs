//! A single page: inherited attributes, geometry, content streams,
//! annotations, and the entry points that turn a page into an operator
//! list or positioned text.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use tracing::warn;

use crate::document::catalog::PDFDocument;
use crate::error::{PdfError, Result};
use crate::interp::{
    CancelToken, EvaluatorOptions, OpCode, Operand, OperatorList, PDFPageEvaluator, RenderIntent,
    RenderSink, TextExtractor, TextItem, TextState, has_blend_modes,
};
use crate::model::objects::{PDFObject, PDFStream};
use crate::utils::{
    MATRIX_IDENTITY, Matrix, Rect, apply_matrix_pt, intersect_rect, normalize_rect, rects_overlap,
};

/// US Letter, the fallback when a page carries no usable MediaBox.
const LETTER_SIZE_MEDIABOX: Rect = (0.0, 0.0, 612.0, 792.0);

const DEFAULT_USER_UNIT: f64 = 1.0;

/// Annotation flag bits (PDF 32000-1 table 165).
const FLAG_HIDDEN: i64 = 0x02;
const FLAG_PRINT: i64 = 0x04;
const FLAG_NOVIEW: i64 = 0x20;

/// A page in the document tree. Attribute lookups that the format allows
/// to be inherited walk the Parent chain on demand.
pub struct PDFPage {
    index: usize,
    attrs: HashMap<String, PDFObject>,
    objid: Option<u32>,
    annotations: OnceLock<Vec<Annotation>>,
}

impl PDFPage {
    pub fn new(index: usize, attrs: HashMap<String, PDFObject>, objid: Option<u32>) -> Self {
        Self {
            index,
            attrs,
            objid,
            annotations: OnceLock::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn objid(&self) -> Option<u32> {
        self.objid
    }

    pub fn attrs(&self) -> &HashMap<String, PDFObject> {
        &self.attrs
    }

    /// Look up `key` on this page, falling back to ancestors through the
    /// Parent chain. Cycles in the chain terminate the walk.
    fn inheritable(&self, doc: &PDFDocument, key: &str) -> Result<Option<PDFObject>> {
        let mut dict = self.attrs.clone();
        let mut visited: HashSet<u32> = HashSet::new();
        if let Some(objid) = self.objid {
            visited.insert(objid);
        }
        loop {
            if let Some(value) = dict.get(key) {
                return Ok(Some(doc.resolve(value)?));
            }
            let Some(parent) = dict.get("Parent") else {
                return Ok(None);
            };
            if let PDFObject::Ref(r) = parent
                && !visited.insert(r.objid)
            {
                warn!(key, "parent chain cycle during attribute lookup");
                return Ok(None);
            }
            match doc.resolve(parent) {
                Ok(obj) => match obj.as_dict() {
                    Ok(d) => dict = d.clone(),
                    Err(_) => return Ok(None),
                },
                Err(e) if e.is_missing_data() => return Err(e),
                Err(e) => {
                    warn!(key, error = %e, "unreadable parent during attribute lookup");
                    return Ok(None);
                }
            }
        }
    }

    /// The page's resource dictionary. Pages without one render with an
    /// empty dictionary rather than failing outright.
    pub fn resources(&self, doc: &PDFDocument) -> Result<HashMap<String, PDFObject>> {
        match self.inheritable(doc, "Resources")? {
            Some(obj) => match obj.as_dict() {
                Ok(d) => Ok(d.clone()),
                Err(_) => {
                    warn!("page Resources is not a dictionary");
                    Ok(HashMap::new())
                }
            },
            None => Ok(HashMap::new()),
        }
    }

    fn bounding_box(&self, doc: &PDFDocument, name: &str) -> Result<Option<Rect>> {
        let Some(obj) = self.inheritable(doc, name)? else {
            return Ok(None);
        };
        let Some(rect) = rect_from_object(doc, &obj) else {
            return Ok(None);
        };
        let rect = normalize_rect(rect);
        if rect.2 - rect.0 == 0.0 || rect.3 - rect.1 == 0.0 {
            warn!(name, "empty or invalid bounding box");
            return Ok(None);
        }
        Ok(Some(rect))
    }

    pub fn media_box(&self, doc: &PDFDocument) -> Result<Rect> {
        Ok(self
            .bounding_box(doc, "MediaBox")?
            .unwrap_or(LETTER_SIZE_MEDIABOX))
    }

    pub fn crop_box(&self, doc: &PDFDocument) -> Result<Rect> {
        match self.bounding_box(doc, "CropBox")? {
            Some(rect) => Ok(rect),
            None => self.media_box(doc),
        }
    }

    /// The visible region: the crop box clipped to the media box. A crop
    /// box entirely outside the media box falls back to the media box.
    pub fn view(&self, doc: &PDFDocument) -> Result<Rect> {
        let media_box = self.media_box(doc)?;
        let crop_box = self.crop_box(doc)?;
        if crop_box == media_box {
            return Ok(media_box);
        }
        match intersect_rect(crop_box, media_box) {
            Some(rect) => Ok(rect),
            None => {
                warn!("crop box does not intersect the media box");
                Ok(media_box)
            }
        }
    }

    /// Page rotation clamped to a multiple of 90 in `0..360`.
    pub fn rotate(&self, doc: &PDFDocument) -> Result<i64> {
        let rotate = match self.inheritable(doc, "Rotate")? {
            Some(obj) => obj.as_int().unwrap_or(0),
            None => 0,
        };
        if rotate % 90 != 0 {
            return Ok(0);
        }
        Ok(((rotate % 360) + 360) % 360)
    }

    /// The UserUnit scale. Non-numeric or non-positive values fall back
    /// to the default of 1/72 inch units.
    pub fn user_unit(&self, doc: &PDFDocument) -> Result<f64> {
        let Some(obj) = self.attrs.get("UserUnit") else {
            return Ok(DEFAULT_USER_UNIT);
        };
        match doc.resolve(obj)?.as_num() {
            Ok(n) if n > 0.0 => Ok(n),
            _ => Ok(DEFAULT_USER_UNIT),
        }
    }

    /// The page's content, with a Contents array concatenated into a
    /// single stream. Unreadable fragments are skipped.
    pub fn content_bytes(&self, doc: &PDFDocument) -> Result<Vec<u8>> {
        let Some(contents) = self.attrs.get("Contents") else {
            return Ok(Vec::new());
        };
        let contents = doc.resolve(contents)?;
        match &contents {
            PDFObject::Array(parts) => {
                let mut data = Vec::new();
                for part in parts {
                    match doc.resolve(part) {
                        Ok(PDFObject::Stream(stream)) => {
                            if !data.is_empty() {
                                data.push(b'\n');
                            }
                            data.extend_from_slice(&doc.decode_stream(&stream)?);
                        }
                        Err(e) if e.is_missing_data() => return Err(e),
                        _ => warn!("content array entry is not a stream"),
                    }
                }
                Ok(data)
            }
            PDFObject::Stream(stream) => doc.decode_stream(stream),
            _ => Ok(Vec::new()),
        }
    }

    /// The page's annotations, parsed once and cached. Signature widgets
    /// overlapped by an ink annotation are marked to suppress their
    /// appearance, so a hand-drawn signature is not painted over by the
    /// field it fills. A MissingData suspension leaves the cache unset so
    /// the retry parses again.
    pub fn annotations(&self, doc: &PDFDocument) -> Result<&[Annotation]> {
        if let Some(cached) = self.annotations.get() {
            return Ok(cached);
        }
        let mut annotations = match self.parse_annotations(doc) {
            Ok(annotations) => annotations,
            Err(e) if e.is_missing_data() => return Err(e),
            Err(e) => {
                warn!(page = self.index, error = %e, "unparsable annotations");
                Vec::new()
            }
        };

        let ink_rects: Vec<Rect> = annotations
            .iter()
            .filter(|a| a.subtype == "Ink")
            .map(|a| a.rect)
            .collect();
        if !ink_rects.is_empty() {
            for annotation in &mut annotations {
                if annotation.subtype == "Widget"
                    && annotation.field_type.as_deref() == Some("Sig")
                    && ink_rects.iter().any(|r| rects_overlap(*r, annotation.rect))
                {
                    annotation.block_render = true;
                }
            }
        }
        Ok(self.annotations.get_or_init(|| annotations))
    }

    fn parse_annotations(&self, doc: &PDFDocument) -> Result<Vec<Annotation>> {
        let Some(annots) = self.attrs.get("Annots") else {
            return Ok(Vec::new());
        };
        let annots = doc.resolve(annots)?;
        let Ok(entries) = annots.as_array() else {
            return Ok(Vec::new());
        };
        let mut annotations = Vec::new();
        for entry in entries {
            let dict = match doc.resolve(entry) {
                Ok(obj) => match obj.as_dict() {
                    Ok(d) => d.clone(),
                    Err(_) => continue,
                },
                Err(e) if e.is_missing_data() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "unreadable annotation");
                    continue;
                }
            };
            if let Some(annotation) = Annotation::from_dict(doc, &dict) {
                annotations.push(annotation);
            }
        }
        Ok(annotations)
    }

    /// Build the page's operator list, streaming chunks through `sink`.
    /// Returns the total number of operators produced.
    pub fn get_operator_list(
        &self,
        doc: &PDFDocument,
        sink: Option<&dyn RenderSink>,
        intent: RenderIntent,
        options: EvaluatorOptions,
        cancel: Option<&CancelToken>,
    ) -> Result<usize> {
        let resources = self.resources(doc)?;
        if let Some(sink) = sink {
            sink.start_render_page(self.index, intent, has_blend_modes(doc, &resources));
        }

        let mut oplist = OperatorList::new(self.index, intent, sink);
        let mut evaluator = PDFPageEvaluator::new(doc, self.index, options, sink, cancel);
        let content = self.content_bytes(doc)?;
        evaluator.evaluate(&content, &resources, &mut oplist, None)?;

        let annotations = self.annotations(doc)?;
        let renderable: Vec<&Annotation> = annotations
            .iter()
            .filter(|a| a.renderable(intent))
            .collect();
        if !renderable.is_empty() {
            oplist.add_op(OpCode::BeginAnnotations, Vec::new());
            for annotation in renderable {
                match annotation.operator_list(doc, self.index, intent, &mut evaluator) {
                    Ok(sub) => oplist.add_op_list(sub),
                    Err(e) if e.is_missing_data() || matches!(e, PdfError::Cancelled) => {
                        return Err(e);
                    }
                    Err(e) => warn!(error = %e, "skipping broken annotation appearance"),
                }
            }
            oplist.add_op(OpCode::EndAnnotations, Vec::new());
        }
        oplist.flush(true);
        Ok(oplist.total_length())
    }

    /// Extract positioned text runs from the page's content.
    pub fn extract_text(&self, doc: &PDFDocument) -> Result<Vec<TextItem>> {
        let resources = self.resources(doc)?;
        let content = self.content_bytes(doc)?;
        let mut state = TextState::new();
        TextExtractor::new(doc, self.index).extract(&content, &resources, &mut state)
    }
}

/// A parsed annotation: geometry, flags, and the normal appearance stream
/// when one is present.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub subtype: String,
    pub rect: Rect,
    pub flags: i64,
    /// Field type for widget annotations, walking the field's Parent
    /// chain ("Sig", "Tx", ...).
    pub field_type: Option<String>,
    appearance: Option<PDFStream>,
    /// Set when another annotation supersedes this one visually.
    pub block_render: bool,
}

impl Annotation {
    fn from_dict(doc: &PDFDocument, dict: &HashMap<String, PDFObject>) -> Option<Annotation> {
        let subtype = match dict.get("Subtype").and_then(|s| doc.resolve(s).ok()) {
            Some(PDFObject::Name(n)) => n,
            _ => String::new(),
        };
        let rect = dict
            .get("Rect")
            .and_then(|r| doc.resolve(r).ok())
            .and_then(|r| rect_from_object(doc, &r))
            .map(normalize_rect)
            .unwrap_or((0.0, 0.0, 0.0, 0.0));
        let flags = dict
            .get("F")
            .and_then(|f| doc.resolve(f).ok())
            .and_then(|f| f.as_int().ok())
            .unwrap_or(0);
        Some(Annotation {
            subtype,
            rect,
            flags,
            field_type: field_type(doc, dict),
            appearance: normal_appearance(doc, dict),
            block_render: false,
        })
    }

    pub fn viewable(&self) -> bool {
        self.flags == 0 || (self.flags & FLAG_HIDDEN == 0 && self.flags & FLAG_NOVIEW == 0)
    }

    pub fn printable(&self) -> bool {
        self.flags & FLAG_PRINT != 0 && self.flags & FLAG_HIDDEN == 0
    }

    /// Whether the annotation takes part in rendering for `intent`.
    /// Flags other than a lone print flag always render; a print-only
    /// annotation defers to the per-intent visibility flags.
    pub fn renderable(&self, intent: RenderIntent) -> bool {
        if self.flags != FLAG_PRINT {
            return true;
        }
        match intent {
            RenderIntent::Display => self.viewable(),
            RenderIntent::Print => self.printable(),
        }
    }

    /// Evaluate the normal appearance into a standalone operator list,
    /// bracketed by begin/end markers that carry the placement transform.
    fn operator_list<'a>(
        &self,
        doc: &PDFDocument,
        page_index: usize,
        intent: RenderIntent,
        evaluator: &mut PDFPageEvaluator<'_>,
    ) -> Result<OperatorList<'a>> {
        let mut list = OperatorList::unbounded(page_index, intent);
        let Some(appearance) = &self.appearance else {
            return Ok(list);
        };
        if self.block_render {
            return Ok(list);
        }

        let bbox = appearance
            .get("BBox")
            .and_then(|b| doc.resolve(b).ok())
            .and_then(|b| rect_from_object(doc, &b))
            .unwrap_or((0.0, 0.0, 1.0, 1.0));
        let matrix = appearance
            .get("Matrix")
            .and_then(|m| doc.resolve(m).ok())
            .and_then(|m| matrix_from_object(doc, &m))
            .unwrap_or(MATRIX_IDENTITY);
        let transform = transform_matrix(self.rect, bbox, matrix);

        list.add_op(
            OpCode::BeginAnnotation,
            vec![
                rect_operand(self.rect),
                matrix_operand(transform),
                matrix_operand(matrix),
            ],
        );
        let resources = match appearance.get("Resources").map(|r| doc.resolve(r)) {
            Some(Ok(obj)) => obj.as_dict().cloned().unwrap_or_default(),
            Some(Err(e)) if e.is_missing_data() => return Err(e),
            _ => HashMap::new(),
        };
        let content = doc.decode_stream(appearance)?;
        evaluator.evaluate(&content, &resources, &mut list, None)?;
        list.add_op(OpCode::EndAnnotation, Vec::new());
        Ok(list)
    }
}

/// Field type for widget annotations, possibly inherited from a parent
/// field node.
fn field_type(doc: &PDFDocument, dict: &HashMap<String, PDFObject>) -> Option<String> {
    let mut dict = dict.clone();
    let mut visited: HashSet<u32> = HashSet::new();
    loop {
        if let Some(ft) = dict.get("FT")
            && let Ok(PDFObject::Name(n)) = doc.resolve(ft)
        {
            return Some(n);
        }
        let parent = dict.get("Parent")?;
        if let PDFObject::Ref(r) = parent
            && !visited.insert(r.objid)
        {
            return None;
        }
        match doc.resolve(parent) {
            Ok(obj) => dict = obj.as_dict().ok()?.clone(),
            Err(_) => return None,
        }
    }
}

/// The normal (/AP /N) appearance stream. A state dictionary is resolved
/// through the /AS name.
fn normal_appearance(doc: &PDFDocument, dict: &HashMap<String, PDFObject>) -> Option<PDFStream> {
    let ap = doc.resolve(dict.get("AP")?).ok()?;
    let normal = doc.resolve(ap.as_dict().ok()?.get("N")?).ok()?;
    match normal {
        PDFObject::Stream(stream) => Some(*stream),
        PDFObject::Dict(states) => {
            let state = match doc.resolve(dict.get("AS")?).ok()? {
                PDFObject::Name(n) => n,
                _ => return None,
            };
            match doc.resolve(states.get(&state)?).ok()? {
                PDFObject::Stream(stream) => Some(*stream),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Map the appearance's transformed bounding box onto the annotation
/// rectangle. A degenerate box yields the identity.
fn transform_matrix(rect: Rect, bbox: Rect, matrix: Matrix) -> Matrix {
    let corners = [
        apply_matrix_pt(matrix, (bbox.0, bbox.1)),
        apply_matrix_pt(matrix, (bbox.0, bbox.3)),
        apply_matrix_pt(matrix, (bbox.2, bbox.1)),
        apply_matrix_pt(matrix, (bbox.2, bbox.3)),
    ];
    let min_x = corners.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let min_y = corners.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_x = corners
        .iter()
        .map(|p| p.0)
        .fold(f64::NEG_INFINITY, f64::max);
    let max_y = corners
        .iter()
        .map(|p| p.1)
        .fold(f64::NEG_INFINITY, f64::max);
    if min_x == max_x || min_y == max_y {
        return MATRIX_IDENTITY;
    }
    let x_ratio = (rect.2 - rect.0) / (max_x - min_x);
    let y_ratio = (rect.3 - rect.1) / (max_y - min_y);
    (
        x_ratio,
        0.0,
        0.0,
        y_ratio,
        rect.0 - min_x * x_ratio,
        rect.1 - min_y * y_ratio,
    )
}

fn rect_from_object(doc: &PDFDocument, obj: &PDFObject) -> Option<Rect> {
    let arr = obj.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let mut nums = [0.0f64; 4];
    for (slot, item) in nums.iter_mut().zip(arr) {
        *slot = doc.resolve(item).ok()?.as_num().ok()?;
    }
    Some((nums[0], nums[1], nums[2], nums[3]))
}

fn matrix_from_object(doc: &PDFDocument, obj: &PDFObject) -> Option<Matrix> {
    let arr = obj.as_array().ok()?;
    if arr.len() != 6 {
        return None;
    }
    let mut nums = [0.0f64; 6];
    for (slot, item) in nums.iter_mut().zip(arr) {
        *slot = doc.resolve(item).ok()?.as_num().ok()?;
    }
    Some((nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]))
}

fn rect_operand(rect: Rect) -> Operand {
    Operand::Array(vec![
        Operand::Real(rect.0),
        Operand::Real(rect.1),
        Operand::Real(rect.2),
        Operand::Real(rect.3),
    ])
}

fn matrix_operand(m: Matrix) -> Operand {
    Operand::Array(vec![
        Operand::Real(m.0),
        Operand::Real(m.1),
        Operand::Real(m.2),
        Operand::Real(m.3),
        Operand::Real(m.4),
        Operand::Real(m.5),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_normalization() {
        // Checked through the pure arithmetic the getter applies.
        let norm = |r: i64| -> i64 {
            if r % 90 != 0 {
                return 0;
            }
            ((r % 360) + 360) % 360
        };
        assert_eq!(norm(0), 0);
        assert_eq!(norm(90), 90);
        assert_eq!(norm(450), 90);
        assert_eq!(norm(-90), 270);
        assert_eq!(norm(45), 0);
    }

    #[test]
    fn test_transform_matrix_scales_bbox_onto_rect() {
        let rect = (10.0, 10.0, 30.0, 50.0);
        let bbox = (0.0, 0.0, 10.0, 10.0);
        let m = transform_matrix(rect, bbox, MATRIX_IDENTITY);
        assert_eq!(m, (2.0, 0.0, 0.0, 4.0, 10.0, 10.0));
    }

    #[test]
    fn test_transform_matrix_degenerate_bbox() {
        let rect = (0.0, 0.0, 10.0, 10.0);
        let bbox = (5.0, 0.0, 5.0, 10.0);
        assert_eq!(transform_matrix(rect, bbox, MATRIX_IDENTITY), MATRIX_IDENTITY);
    }

    #[test]
    fn test_annotation_renderability() {
        let annotation = |flags: i64| Annotation {
            subtype: "Text".into(),
            rect: (0.0, 0.0, 1.0, 1.0),
            flags,
            field_type: None,
            appearance: None,
            block_render: false,
        };
        // A lone print flag gates on intent; anything else always renders.
        assert!(annotation(0).renderable(RenderIntent::Display));
        assert!(annotation(FLAG_HIDDEN).renderable(RenderIntent::Display));
        assert!(annotation(FLAG_PRINT).renderable(RenderIntent::Print));
        assert!(annotation(FLAG_PRINT).renderable(RenderIntent::Display));
        assert!(!annotation(FLAG_HIDDEN).viewable());
        assert!(!annotation(FLAG_HIDDEN | FLAG_PRINT).printable());
    }
}
