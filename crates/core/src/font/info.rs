//! Loaded font resources.
//!
//! A [`LoadedFont`] carries the metrics the interpreter needs: glyph
//! widths for advance computation, ascent/descent for baseline placement,
//! the writing mode, and the ToUnicode mapping for extraction. Fonts are
//! cached on the document, keyed by indirect reference when one exists so
//! the same font shared across pages loads once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashMap;
use tracing::{info, warn};

use super::tounicode::ToUnicodeMap;
use crate::document::catalog::PDFDocument;
use crate::error::Result;
use crate::model::objects::PDFObject;

/// Fallback ascent (fraction of em) when the descriptor has none.
const DEFAULT_ASCENT: f64 = 0.8;

/// Cache key for a font resource. Inline font dictionaries have no object
/// id, so they key by page and resource name instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FontKey {
    Ref(u32),
    Name(usize, String),
}

pub struct LoadedFont {
    /// Name under which the font is announced to the sink ("f3_2").
    pub loaded_name: String,
    pub base_font: String,
    pub subtype: String,
    /// Vertical writing mode (a CMap encoding ending in "-V").
    pub vertical: bool,
    /// Ascent and descent as fractions of the em square.
    pub ascent: f64,
    pub descent: f64,
    default_width: f64,
    widths: FxHashMap<u32, f64>,
    pub to_unicode: Option<ToUnicodeMap>,
    code_len: usize,
    sent: AtomicBool,
}

impl LoadedFont {
    /// Glyph width for a character code in glyph-space units (per 1000).
    pub fn glyph_width(&self, code: u32) -> f64 {
        self.widths.get(&code).copied().unwrap_or(self.default_width)
    }

    /// Width of the space glyph in glyph-space units; 0 when unknown.
    pub fn space_width(&self) -> f64 {
        self.widths.get(&32).copied().unwrap_or(self.default_width)
    }

    /// Bytes per character code: 2 for composite fonts, 1 otherwise.
    pub fn code_len(&self) -> usize {
        self.code_len
    }

    /// Marks the font as announced. True on the first call only.
    pub fn mark_sent(&self) -> bool {
        !self.sent.swap(true, Ordering::SeqCst)
    }

    /// Character codes of a show-text string, in order.
    pub fn codes<'a>(&self, bytes: &'a [u8]) -> impl Iterator<Item = u32> + 'a {
        let len = self.code_len.max(1);
        bytes
            .chunks(len)
            .map(|c| c.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
    }

    /// Decode a show-text string to Unicode, preferring the ToUnicode map.
    pub fn decode_text(&self, bytes: &[u8]) -> String {
        if let Some(map) = &self.to_unicode {
            return map.decode(bytes);
        }
        if self.code_len == 2 {
            let units: Vec<u16> = bytes
                .chunks(2)
                .map(|c| {
                    if c.len() == 2 {
                        u16::from_be_bytes([c[0], c[1]])
                    } else {
                        c[0] as u16
                    }
                })
                .collect();
            return char::decode_utf16(units)
                .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect();
        }
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Load a font resource through the document cache.
///
/// `font_obj` is the raw resource entry; an indirect reference keys the
/// cache by object id, anything else by `(page, resource name)`.
pub fn load_font(
    doc: &PDFDocument,
    page_index: usize,
    res_name: &str,
    font_obj: &PDFObject,
) -> Result<Arc<LoadedFont>> {
    let key = match font_obj {
        PDFObject::Ref(r) => FontKey::Ref(r.objid),
        _ => FontKey::Name(page_index, res_name.to_string()),
    };

    if let Ok(cache) = doc.font_cache().lock()
        && let Some(font) = cache.get(&key)
    {
        return Ok(Arc::clone(font));
    }

    let resolved = doc.resolve_shared(font_obj)?;
    let dict = resolved.as_dict()?;
    let font = Arc::new(build_font(doc, page_index, dict)?);

    if let Ok(mut cache) = doc.font_cache().lock() {
        cache.insert(key, Arc::clone(&font));
    }
    Ok(font)
}

fn build_font(
    doc: &PDFDocument,
    page_index: usize,
    dict: &HashMap<String, PDFObject>,
) -> Result<LoadedFont> {
    let subtype = dict
        .get("Subtype")
        .and_then(|s| s.as_name().ok())
        .unwrap_or("")
        .to_string();
    let base_font = dict
        .get("BaseFont")
        .and_then(|b| doc.resolve(b).ok())
        .and_then(|b| b.as_name().map(str::to_string).ok())
        .unwrap_or_default();

    let vertical = dict
        .get("Encoding")
        .and_then(|e| doc.resolve(e).ok())
        .and_then(|e| e.as_name().map(str::to_string).ok())
        .is_some_and(|name| name.ends_with("-V"));

    let composite = subtype == "Type0";
    let (metrics_dict, code_len) = if composite {
        let descendant = dict
            .get("DescendantFonts")
            .and_then(|d| doc.resolve(d).ok())
            .and_then(|d| d.as_array().ok().and_then(|a| a.first().cloned()))
            .and_then(|d| doc.resolve(&d).ok())
            .and_then(|d| d.as_dict().cloned().ok());
        match descendant {
            Some(d) => (d, 2),
            None => {
                warn!(base_font = %base_font, "composite font without descendant");
                (dict.clone(), 2)
            }
        }
    } else {
        (dict.clone(), 1)
    };

    let (ascent, descent, missing_width) = descriptor_metrics(doc, &metrics_dict);

    let (widths, default_width) = if composite {
        let default = metrics_dict
            .get("DW")
            .and_then(|w| doc.resolve(w).ok())
            .and_then(|w| w.as_num().ok())
            .unwrap_or(1000.0);
        let widths = metrics_dict
            .get("W")
            .and_then(|w| resolve_array(doc, w))
            .map(|arr| parse_cid_widths(&arr))
            .unwrap_or_default();
        (widths, default)
    } else {
        let first_char = dict
            .get("FirstChar")
            .and_then(|f| doc.resolve(f).ok())
            .and_then(|f| f.as_int().ok())
            .unwrap_or(0);
        let widths = dict
            .get("Widths")
            .and_then(|w| resolve_array(doc, w))
            .map(|arr| parse_simple_widths(&arr, first_char))
            .unwrap_or_default();
        (widths, missing_width)
    };

    let to_unicode = dict
        .get("ToUnicode")
        .and_then(|t| doc.resolve_shared(t).ok())
        .and_then(|t| {
            let stream = t.as_stream().ok()?;
            let data = match doc.decode_stream(stream) {
                Ok(data) => data,
                Err(e) => {
                    info!(error = %e, "undecodable ToUnicode stream");
                    return None;
                }
            };
            let map = ToUnicodeMap::parse(&data);
            (!map.is_empty()).then_some(map)
        });

    Ok(LoadedFont {
        loaded_name: format!("f{}_{}", page_index, doc.next_font_number()),
        base_font,
        subtype,
        vertical,
        ascent,
        descent,
        default_width,
        widths,
        to_unicode,
        code_len,
        sent: AtomicBool::new(false),
    })
}

fn descriptor_metrics(
    doc: &PDFDocument,
    dict: &HashMap<String, PDFObject>,
) -> (f64, f64, f64) {
    let descriptor = dict
        .get("FontDescriptor")
        .and_then(|d| doc.resolve(d).ok())
        .and_then(|d| d.as_dict().cloned().ok());
    let Some(descriptor) = descriptor else {
        return (DEFAULT_ASCENT, 0.0, 0.0);
    };
    let num = |key: &str| {
        descriptor
            .get(key)
            .and_then(|v| doc.resolve(v).ok())
            .and_then(|v| v.as_num().ok())
    };
    let ascent = match num("Ascent") {
        Some(a) if a != 0.0 => a / 1000.0,
        _ => DEFAULT_ASCENT,
    };
    let descent = num("Descent").map(|d| d / 1000.0).unwrap_or(0.0);
    let missing_width = num("MissingWidth").unwrap_or(0.0);
    (ascent, descent, missing_width)
}

fn resolve_array(doc: &PDFDocument, obj: &PDFObject) -> Option<Vec<PDFObject>> {
    let resolved = doc.resolve(obj).ok()?;
    let arr = resolved.as_array().ok()?;
    Some(
        arr.iter()
            .map(|item| doc.resolve(item).unwrap_or_else(|_| item.clone()))
            .collect(),
    )
}

/// Simple-font /Widths: one entry per code starting at /FirstChar.
fn parse_simple_widths(arr: &[PDFObject], first_char: i64) -> FxHashMap<u32, f64> {
    let mut widths = FxHashMap::default();
    for (i, item) in arr.iter().enumerate() {
        if let Ok(w) = item.as_num() {
            let code = first_char + i as i64;
            if code >= 0 {
                widths.insert(code as u32, w);
            }
        }
    }
    widths
}

/// Composite-font /W: `start [w...]` runs or `start end w` range fills.
fn parse_cid_widths(arr: &[PDFObject]) -> FxHashMap<u32, f64> {
    let mut widths = FxHashMap::default();
    let mut i = 0;
    while i < arr.len() {
        let Ok(start) = arr[i].as_int() else {
            break;
        };
        match arr.get(i + 1) {
            Some(PDFObject::Array(run)) => {
                for (j, item) in run.iter().enumerate() {
                    if let Ok(w) = item.as_num() {
                        widths.insert((start + j as i64).max(0) as u32, w);
                    }
                }
                i += 2;
            }
            Some(end_obj) => {
                let (Ok(end), Some(Ok(w))) =
                    (end_obj.as_int(), arr.get(i + 2).map(|o| o.as_num()))
                else {
                    break;
                };
                if end >= start && end - start <= 65535 {
                    for code in start..=end {
                        widths.insert(code.max(0) as u32, w);
                    }
                }
                i += 3;
            }
            None => break,
        }
    }
    widths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_widths_offset_by_first_char() {
        let arr = vec![
            PDFObject::Int(500),
            PDFObject::Real(250.0),
            PDFObject::Int(600),
        ];
        let widths = parse_simple_widths(&arr, 65);
        assert_eq!(widths.get(&65), Some(&500.0));
        assert_eq!(widths.get(&66), Some(&250.0));
        assert_eq!(widths.get(&67), Some(&600.0));
        assert_eq!(widths.get(&64), None);
    }

    #[test]
    fn test_cid_widths_run_form() {
        let arr = vec![
            PDFObject::Int(10),
            PDFObject::Array(vec![PDFObject::Int(400), PDFObject::Int(450)]),
        ];
        let widths = parse_cid_widths(&arr);
        assert_eq!(widths.get(&10), Some(&400.0));
        assert_eq!(widths.get(&11), Some(&450.0));
    }

    #[test]
    fn test_cid_widths_range_form() {
        let arr = vec![
            PDFObject::Int(100),
            PDFObject::Int(102),
            PDFObject::Int(750),
        ];
        let widths = parse_cid_widths(&arr);
        assert_eq!(widths.get(&100), Some(&750.0));
        assert_eq!(widths.get(&102), Some(&750.0));
        assert_eq!(widths.get(&103), None);
    }

    #[test]
    fn test_cid_widths_mixed_forms() {
        let arr = vec![
            PDFObject::Int(1),
            PDFObject::Array(vec![PDFObject::Int(300)]),
            PDFObject::Int(5),
            PDFObject::Int(6),
            PDFObject::Int(500),
        ];
        let widths = parse_cid_widths(&arr);
        assert_eq!(widths.get(&1), Some(&300.0));
        assert_eq!(widths.get(&5), Some(&500.0));
        assert_eq!(widths.get(&6), Some(&500.0));
    }
}
