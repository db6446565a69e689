//! Operator codes for the normalized operator list.
//!
//! The numeric values are part of the output contract: a recorded operator
//! list replays against any consumer that agrees on this numbering, so the
//! values are stable and explicit.

/// A normalized content operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Dependency = 1,
    SetLineWidth = 2,
    SetLineCap = 3,
    SetLineJoin = 4,
    SetMiterLimit = 5,
    SetDash = 6,
    SetRenderingIntent = 7,
    SetFlatness = 8,
    SetGState = 9,
    Save = 10,
    Restore = 11,
    Transform = 12,
    MoveTo = 13,
    LineTo = 14,
    CurveTo = 15,
    CurveTo2 = 16,
    CurveTo3 = 17,
    ClosePath = 18,
    Rectangle = 19,
    Stroke = 20,
    CloseStroke = 21,
    Fill = 22,
    EoFill = 23,
    FillStroke = 24,
    EoFillStroke = 25,
    CloseFillStroke = 26,
    CloseEoFillStroke = 27,
    EndPath = 28,
    Clip = 29,
    EoClip = 30,
    BeginText = 31,
    EndText = 32,
    SetCharSpacing = 33,
    SetWordSpacing = 34,
    SetHScale = 35,
    SetLeading = 36,
    SetFont = 37,
    SetTextRenderingMode = 38,
    SetTextRise = 39,
    MoveText = 40,
    SetLeadingMoveText = 41,
    SetTextMatrix = 42,
    NextLine = 43,
    ShowText = 44,
    ShowSpacedText = 45,
    NextLineShowText = 46,
    NextLineSetSpacingShowText = 47,
    SetCharWidth = 48,
    SetCharWidthAndBounds = 49,
    SetStrokeColorSpace = 50,
    SetFillColorSpace = 51,
    SetStrokeColor = 52,
    SetStrokeColorN = 53,
    SetFillColor = 54,
    SetFillColorN = 55,
    SetStrokeGray = 56,
    SetFillGray = 57,
    SetStrokeRgbColor = 58,
    SetFillRgbColor = 59,
    SetStrokeCmykColor = 60,
    SetFillCmykColor = 61,
    ShadingFill = 62,
    BeginInlineImage = 63,
    BeginImageData = 64,
    EndInlineImage = 65,
    PaintXObject = 66,
    MarkPoint = 67,
    MarkPointProps = 68,
    BeginMarkedContent = 69,
    BeginMarkedContentProps = 70,
    EndMarkedContent = 71,
    BeginCompat = 72,
    EndCompat = 73,
    PaintFormXObjectBegin = 74,
    PaintFormXObjectEnd = 75,
    BeginGroup = 76,
    EndGroup = 77,
    BeginAnnotations = 78,
    EndAnnotations = 79,
    BeginAnnotation = 80,
    EndAnnotation = 81,
    PaintJpegXObject = 82,
    PaintImageMaskXObject = 83,
    PaintImageMaskXObjectGroup = 84,
    PaintImageXObject = 85,
    PaintInlineImageXObject = 86,
    PaintInlineImageXObjectGroup = 87,
    PaintImageXObjectRepeat = 88,
    PaintImageMaskXObjectRepeat = 89,
    PaintSolidColorImageMask = 90,
    ConstructPath = 91,
}

/// How a content-stream keyword maps to an operator.
#[derive(Debug, Clone, Copy)]
pub struct OpSpec {
    pub op: OpCode,
    /// Expected operand count; the maximum when `variable_args`.
    pub num_args: usize,
    pub variable_args: bool,
}

const fn fixed(op: OpCode, num_args: usize) -> OpSpec {
    OpSpec {
        op,
        num_args,
        variable_args: false,
    }
}

const fn variable(op: OpCode, num_args: usize) -> OpSpec {
    OpSpec {
        op,
        num_args,
        variable_args: true,
    }
}

/// Look up the spec for a content-stream keyword. `None` for keywords that
/// are not operators (the caller logs and skips them).
pub fn op_spec(keyword: &[u8]) -> Option<OpSpec> {
    Some(match keyword {
        // Graphics state
        b"w" => fixed(OpCode::SetLineWidth, 1),
        b"J" => fixed(OpCode::SetLineCap, 1),
        b"j" => fixed(OpCode::SetLineJoin, 1),
        b"M" => fixed(OpCode::SetMiterLimit, 1),
        b"d" => fixed(OpCode::SetDash, 2),
        b"ri" => fixed(OpCode::SetRenderingIntent, 1),
        b"i" => fixed(OpCode::SetFlatness, 1),
        b"gs" => fixed(OpCode::SetGState, 1),
        b"q" => fixed(OpCode::Save, 0),
        b"Q" => fixed(OpCode::Restore, 0),
        b"cm" => fixed(OpCode::Transform, 6),

        // Path construction and painting
        b"m" => fixed(OpCode::MoveTo, 2),
        b"l" => fixed(OpCode::LineTo, 2),
        b"c" => fixed(OpCode::CurveTo, 6),
        b"v" => fixed(OpCode::CurveTo2, 4),
        b"y" => fixed(OpCode::CurveTo3, 4),
        b"h" => fixed(OpCode::ClosePath, 0),
        b"re" => fixed(OpCode::Rectangle, 4),
        b"S" => fixed(OpCode::Stroke, 0),
        b"s" => fixed(OpCode::CloseStroke, 0),
        b"f" | b"F" => fixed(OpCode::Fill, 0),
        b"f*" => fixed(OpCode::EoFill, 0),
        b"B" => fixed(OpCode::FillStroke, 0),
        b"B*" => fixed(OpCode::EoFillStroke, 0),
        b"b" => fixed(OpCode::CloseFillStroke, 0),
        b"b*" => fixed(OpCode::CloseEoFillStroke, 0),
        b"n" => fixed(OpCode::EndPath, 0),

        // Clipping
        b"W" => fixed(OpCode::Clip, 0),
        b"W*" => fixed(OpCode::EoClip, 0),

        // Text
        b"BT" => fixed(OpCode::BeginText, 0),
        b"ET" => fixed(OpCode::EndText, 0),
        b"Tc" => fixed(OpCode::SetCharSpacing, 1),
        b"Tw" => fixed(OpCode::SetWordSpacing, 1),
        b"Tz" => fixed(OpCode::SetHScale, 1),
        b"TL" => fixed(OpCode::SetLeading, 1),
        b"Tf" => fixed(OpCode::SetFont, 2),
        b"Tr" => fixed(OpCode::SetTextRenderingMode, 1),
        b"Ts" => fixed(OpCode::SetTextRise, 1),
        b"Td" => fixed(OpCode::MoveText, 2),
        b"TD" => fixed(OpCode::SetLeadingMoveText, 2),
        b"Tm" => fixed(OpCode::SetTextMatrix, 6),
        b"T*" => fixed(OpCode::NextLine, 0),
        b"Tj" => fixed(OpCode::ShowText, 1),
        b"TJ" => fixed(OpCode::ShowSpacedText, 1),
        b"'" => fixed(OpCode::NextLineShowText, 1),
        b"\"" => fixed(OpCode::NextLineSetSpacingShowText, 3),

        // Type3 glyph metrics
        b"d0" => fixed(OpCode::SetCharWidth, 2),
        b"d1" => fixed(OpCode::SetCharWidthAndBounds, 6),

        // Color
        b"CS" => fixed(OpCode::SetStrokeColorSpace, 1),
        b"cs" => fixed(OpCode::SetFillColorSpace, 1),
        b"SC" => variable(OpCode::SetStrokeColor, 4),
        b"SCN" => variable(OpCode::SetStrokeColorN, 33),
        b"sc" => variable(OpCode::SetFillColor, 4),
        b"scn" => variable(OpCode::SetFillColorN, 33),
        b"G" => fixed(OpCode::SetStrokeGray, 1),
        b"g" => fixed(OpCode::SetFillGray, 1),
        b"RG" => fixed(OpCode::SetStrokeRgbColor, 3),
        b"rg" => fixed(OpCode::SetFillRgbColor, 3),
        b"K" => fixed(OpCode::SetStrokeCmykColor, 4),
        b"k" => fixed(OpCode::SetFillCmykColor, 4),

        // Shading
        b"sh" => fixed(OpCode::ShadingFill, 1),

        // Inline images
        b"BI" => fixed(OpCode::BeginInlineImage, 0),
        b"ID" => fixed(OpCode::BeginImageData, 0),
        b"EI" => fixed(OpCode::EndInlineImage, 1),

        // XObjects and marked content
        b"Do" => fixed(OpCode::PaintXObject, 1),
        b"MP" => fixed(OpCode::MarkPoint, 1),
        b"DP" => fixed(OpCode::MarkPointProps, 2),
        b"BMC" => fixed(OpCode::BeginMarkedContent, 1),
        b"BDC" => fixed(OpCode::BeginMarkedContentProps, 2),
        b"EMC" => fixed(OpCode::EndMarkedContent, 0),

        // Compatibility sections
        b"BX" => fixed(OpCode::BeginCompat, 0),
        b"EX" => fixed(OpCode::EndCompat, 0),

        _ => return None,
    })
}

impl OpCode {
    /// Stable lowercase-camel operator name, for diagnostics and dumps.
    pub const fn name(self) -> &'static str {
        match self {
            OpCode::Dependency => "dependency",
            OpCode::SetLineWidth => "setLineWidth",
            OpCode::SetLineCap => "setLineCap",
            OpCode::SetLineJoin => "setLineJoin",
            OpCode::SetMiterLimit => "setMiterLimit",
            OpCode::SetDash => "setDash",
            OpCode::SetRenderingIntent => "setRenderingIntent",
            OpCode::SetFlatness => "setFlatness",
            OpCode::SetGState => "setGState",
            OpCode::Save => "save",
            OpCode::Restore => "restore",
            OpCode::Transform => "transform",
            OpCode::MoveTo => "moveTo",
            OpCode::LineTo => "lineTo",
            OpCode::CurveTo => "curveTo",
            OpCode::CurveTo2 => "curveTo2",
            OpCode::CurveTo3 => "curveTo3",
            OpCode::ClosePath => "closePath",
            OpCode::Rectangle => "rectangle",
            OpCode::Stroke => "stroke",
            OpCode::CloseStroke => "closeStroke",
            OpCode::Fill => "fill",
            OpCode::EoFill => "eoFill",
            OpCode::FillStroke => "fillStroke",
            OpCode::EoFillStroke => "eoFillStroke",
            OpCode::CloseFillStroke => "closeFillStroke",
            OpCode::CloseEoFillStroke => "closeEOFillStroke",
            OpCode::EndPath => "endPath",
            OpCode::Clip => "clip",
            OpCode::EoClip => "eoClip",
            OpCode::BeginText => "beginText",
            OpCode::EndText => "endText",
            OpCode::SetCharSpacing => "setCharSpacing",
            OpCode::SetWordSpacing => "setWordSpacing",
            OpCode::SetHScale => "setHScale",
            OpCode::SetLeading => "setLeading",
            OpCode::SetFont => "setFont",
            OpCode::SetTextRenderingMode => "setTextRenderingMode",
            OpCode::SetTextRise => "setTextRise",
            OpCode::MoveText => "moveText",
            OpCode::SetLeadingMoveText => "setLeadingMoveText",
            OpCode::SetTextMatrix => "setTextMatrix",
            OpCode::NextLine => "nextLine",
            OpCode::ShowText => "showText",
            OpCode::ShowSpacedText => "showSpacedText",
            OpCode::NextLineShowText => "nextLineShowText",
            OpCode::NextLineSetSpacingShowText => "nextLineSetSpacingShowText",
            OpCode::SetCharWidth => "setCharWidth",
            OpCode::SetCharWidthAndBounds => "setCharWidthAndBounds",
            OpCode::SetStrokeColorSpace => "setStrokeColorSpace",
            OpCode::SetFillColorSpace => "setFillColorSpace",
            OpCode::SetStrokeColor => "setStrokeColor",
            OpCode::SetStrokeColorN => "setStrokeColorN",
            OpCode::SetFillColor => "setFillColor",
            OpCode::SetFillColorN => "setFillColorN",
            OpCode::SetStrokeGray => "setStrokeGray",
            OpCode::SetFillGray => "setFillGray",
            OpCode::SetStrokeRgbColor => "setStrokeRGBColor",
            OpCode::SetFillRgbColor => "setFillRGBColor",
            OpCode::SetStrokeCmykColor => "setStrokeCMYKColor",
            OpCode::SetFillCmykColor => "setFillCMYKColor",
            OpCode::ShadingFill => "shadingFill",
            OpCode::BeginInlineImage => "beginInlineImage",
            OpCode::BeginImageData => "beginImageData",
            OpCode::EndInlineImage => "endInlineImage",
            OpCode::PaintXObject => "paintXObject",
            OpCode::MarkPoint => "markPoint",
            OpCode::MarkPointProps => "markPointProps",
            OpCode::BeginMarkedContent => "beginMarkedContent",
            OpCode::BeginMarkedContentProps => "beginMarkedContentProps",
            OpCode::EndMarkedContent => "endMarkedContent",
            OpCode::BeginCompat => "beginCompat",
            OpCode::EndCompat => "endCompat",
            OpCode::PaintFormXObjectBegin => "paintFormXObjectBegin",
            OpCode::PaintFormXObjectEnd => "paintFormXObjectEnd",
            OpCode::BeginGroup => "beginGroup",
            OpCode::EndGroup => "endGroup",
            OpCode::BeginAnnotations => "beginAnnotations",
            OpCode::EndAnnotations => "endAnnotations",
            OpCode::BeginAnnotation => "beginAnnotation",
            OpCode::EndAnnotation => "endAnnotation",
            OpCode::PaintJpegXObject => "paintJpegXObject",
            OpCode::PaintImageMaskXObject => "paintImageMaskXObject",
            OpCode::PaintImageMaskXObjectGroup => "paintImageMaskXObjectGroup",
            OpCode::PaintImageXObject => "paintImageXObject",
            OpCode::PaintInlineImageXObject => "paintInlineImageXObject",
            OpCode::PaintInlineImageXObjectGroup => "paintInlineImageXObjectGroup",
            OpCode::PaintImageXObjectRepeat => "paintImageXObjectRepeat",
            OpCode::PaintImageMaskXObjectRepeat => "paintImageMaskXObjectRepeat",
            OpCode::PaintSolidColorImageMask => "paintSolidColorImageMask",
            OpCode::ConstructPath => "constructPath",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_lookup() {
        let spec = op_spec(b"cm").unwrap();
        assert_eq!(spec.op, OpCode::Transform);
        assert_eq!(spec.num_args, 6);
        assert!(!spec.variable_args);

        let spec = op_spec(b"scn").unwrap();
        assert_eq!(spec.op, OpCode::SetFillColorN);
        assert_eq!(spec.num_args, 33);
        assert!(spec.variable_args);

        assert!(op_spec(b"nonsense").is_none());
    }

    #[test]
    fn test_fill_aliases() {
        assert_eq!(op_spec(b"f").unwrap().op, OpCode::Fill);
        assert_eq!(op_spec(b"F").unwrap().op, OpCode::Fill);
    }
}
