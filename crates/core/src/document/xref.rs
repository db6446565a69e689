//! Cross-reference tables: where every indirect object lives.
//!
//! A document carries its xref sections newest-first; lookups fall through
//! to older sections so incremental updates shadow earlier definitions.
//! Three ways to build one: the classic `xref` table, the decoded entry
//! rows of a cross-reference stream, and a brute-force scan of the whole
//! file when both are broken.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::{PdfError, Result};
use crate::model::objects::PDFObject;
use crate::parser::PDFParser;

/// Where an in-use object is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefKind {
    /// Byte offset of an `objid genno obj` record in the file.
    Offset(usize),
    /// Member of a compressed object stream.
    InStream { container: u32, index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRefEntry {
    pub kind: XRefKind,
    pub genno: u32,
}

/// One cross-reference section plus its trailer dictionary.
#[derive(Debug, Default)]
pub struct XRef {
    pub entries: FxHashMap<u32, XRefEntry>,
    pub trailer: HashMap<String, PDFObject>,
    /// Built by the recovery scan rather than a real table.
    pub is_fallback: bool,
}

impl XRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, objid: u32) -> Option<&XRefEntry> {
        self.entries.get(&objid)
    }
}

fn is_eol_ws(b: u8) -> bool {
    b == b' ' || b == b'\n' || b == b'\r'
}

pub(crate) fn skip_ws(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() && is_eol_ws(data[pos]) {
        pos += 1;
    }
    pos
}

pub(crate) fn read_number(data: &[u8], pos: usize) -> Result<(u64, usize)> {
    let start = pos;
    let mut end = pos;
    while end < data.len() && data[end].is_ascii_digit() {
        end += 1;
    }
    if end == start {
        return Err(PdfError::SyntaxError("expected number".into()));
    }
    let num = std::str::from_utf8(&data[start..end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PdfError::SyntaxError("invalid number".into()))?;
    Ok((num, end))
}

/// Locate the value after the final `startxref` keyword by scanning 1 KiB
/// windows backwards from end of file. Windows overlap by the keyword
/// length so a match straddling a boundary is still seen.
pub fn find_startxref(data: &[u8]) -> Result<usize> {
    const NEEDLE: &[u8] = b"startxref";
    const WINDOW: usize = 1024;

    if data.len() < NEEDLE.len() {
        return Err(PdfError::NoValidXRef);
    }

    let mut window_end = data.len();
    loop {
        let window_start = window_end.saturating_sub(WINDOW);
        let hay = &data[window_start..window_end];
        let mut found = None;
        if hay.len() >= NEEDLE.len() {
            for pos in 0..=hay.len() - NEEDLE.len() {
                if &hay[pos..pos + NEEDLE.len()] == NEEDLE {
                    found = Some(window_start + pos);
                }
            }
        }
        if let Some(i) = found {
            let rest = &data[i + NEEDLE.len()..];
            let pos = skip_ws(rest, 0);
            let (value, _) = read_number(rest, pos).map_err(|_| PdfError::NoValidXRef)?;
            return Ok(value as usize);
        }
        if window_start == 0 {
            return Err(PdfError::NoValidXRef);
        }
        window_end = window_start + NEEDLE.len() - 1;
    }
}

/// Parse a classic `xref` table starting at `pos` in `data`.
pub fn parse_classic_table(data: &[u8], pos: usize) -> Result<XRef> {
    let data = data.get(pos..).ok_or(PdfError::NoValidXRef)?;
    if !data.starts_with(b"xref") {
        return Err(PdfError::SyntaxError("expected 'xref' keyword".into()));
    }

    let mut xref = XRef::new();
    let mut cursor = skip_ws(data, 4);

    loop {
        cursor = skip_ws(data, cursor);
        if cursor >= data.len() {
            break;
        }
        if data[cursor..].starts_with(b"trailer") {
            cursor += 7;
            break;
        }

        let (start_objid, next) = read_number(data, cursor)?;
        cursor = skip_ws(data, next);
        let (count, next) = read_number(data, cursor)?;
        cursor = next;

        // Skip the rest of the subsection header line.
        while cursor < data.len() && data[cursor] != b'\n' && data[cursor] != b'\r' {
            cursor += 1;
        }
        while cursor < data.len() && (data[cursor] == b'\n' || data[cursor] == b'\r') {
            cursor += 1;
        }

        let mut base_objid = start_objid;
        for i in 0..count {
            let (offset, next) = read_number(data, cursor)?;
            cursor = next;
            while cursor < data.len() && data[cursor] == b' ' {
                cursor += 1;
            }
            let (genno, next) = read_number(data, cursor)?;
            cursor = next;
            while cursor < data.len() && data[cursor] == b' ' {
                cursor += 1;
            }
            let marker = if cursor < data.len() { data[cursor] } else { b'f' };
            cursor += 1;

            // Some writers start the first subsection at 1 but still emit the
            // object 0 free-list head (0000000000 65535 f). Shift the base so
            // that entry maps to object 0 and the rest stay aligned.
            if i == 0 && base_objid > 0 && marker == b'f' && offset == 0 && genno == 65535 {
                base_objid -= 1;
            }

            let objid = (base_objid + i) as u32;

            while cursor < data.len() && data[cursor] != b'\n' && data[cursor] != b'\r' {
                cursor += 1;
            }
            while cursor < data.len() && (data[cursor] == b'\n' || data[cursor] == b'\r') {
                cursor += 1;
            }

            if marker == b'n' {
                xref.entries.insert(
                    objid,
                    XRefEntry {
                        kind: XRefKind::Offset(offset as usize),
                        genno: genno as u32,
                    },
                );
            }
        }
    }

    // Trailer dictionary follows the `trailer` keyword.
    let cursor = skip_ws(data, cursor);
    if data[cursor..].starts_with(b"<<") {
        let mut parser = PDFParser::new(&data[cursor..]);
        if let Ok(trailer_obj) = parser.parse_object()
            && let Ok(dict) = trailer_obj.as_dict()
        {
            xref.trailer = dict.clone();
        }
    }

    Ok(xref)
}

fn read_bytes_as_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Fill `xref` from the decoded rows of a cross-reference stream.
///
/// `widths` is the /W triple; a zero first width means every row is type 1.
/// `index` is the list of (first object id, count) runs the rows cover.
pub fn entries_from_stream_data(
    xref: &mut XRef,
    data: &[u8],
    widths: (usize, usize, usize),
    index: &[(u32, usize)],
) {
    let (w0, w1, w2) = widths;
    let entry_size = w0 + w1 + w2;
    if entry_size == 0 {
        return;
    }

    let mut data_pos = 0;
    for &(start_objid, count) in index {
        for i in 0..count {
            if data_pos + entry_size > data.len() {
                return;
            }
            let objid = start_objid + i as u32;
            let obj_type = if w0 > 0 {
                read_bytes_as_int(&data[data_pos..data_pos + w0])
            } else {
                1
            };
            let field1 = read_bytes_as_int(&data[data_pos + w0..data_pos + w0 + w1]);
            let field2 = read_bytes_as_int(&data[data_pos + w0 + w1..data_pos + entry_size]);
            data_pos += entry_size;

            match obj_type {
                0 => {}
                1 => {
                    xref.entries.insert(
                        objid,
                        XRefEntry {
                            kind: XRefKind::Offset(field1 as usize),
                            genno: field2 as u32,
                        },
                    );
                }
                2 => {
                    xref.entries.insert(
                        objid,
                        XRefEntry {
                            kind: XRefKind::InStream {
                                container: field1 as u32,
                                index: field2 as usize,
                            },
                            genno: 0,
                        },
                    );
                }
                other => {
                    warn!(obj_type = other, objid, "unknown xref stream entry type");
                }
            }
        }
    }
}

static OBJ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s+(\d+)\s+obj\b").unwrap());

/// Brute-force recovery: scan the whole file for `objid genno obj` records
/// and the last trailer dictionary. Later records shadow earlier ones, so a
/// file with incremental updates resolves to its newest objects.
pub fn recover_scan(data: &[u8]) -> Result<XRef> {
    let mut xref = XRef::new();
    xref.is_fallback = true;

    for cap in OBJ_RE.captures_iter(data) {
        let objid = match std::str::from_utf8(&cap[1])
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(value) if value <= u32::MAX as u64 => value as u32,
            _ => continue,
        };
        let genno = match std::str::from_utf8(&cap[2])
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(value) if value <= u32::MAX as u64 => value as u32,
            _ => continue,
        };
        let pos = cap.get(0).unwrap().start();
        xref.entries.insert(
            objid,
            XRefEntry {
                kind: XRefKind::Offset(pos),
                genno,
            },
        );
    }

    if let Some(trailer_pos) = find_trailer(data) {
        let rest = &data[trailer_pos + 7..];
        let skip = skip_ws(rest, 0);
        if rest[skip..].starts_with(b"<<") {
            let mut parser = PDFParser::new(&rest[skip..]);
            if let Ok(trailer_obj) = parser.parse_object()
                && let Ok(dict) = trailer_obj.as_dict()
            {
                xref.trailer = dict.clone();
            }
        }
    }

    // No trailer at all: fish for a dictionary carrying /Root so the
    // catalog is still reachable.
    if !xref.trailer.contains_key("Root") {
        static ROOT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/Root\s+\d+\s+\d+\s+R").unwrap());
        if let Some(m) = ROOT_RE.find_iter(data).last() {
            let mut parser = PDFParser::new(&data[m.start() + 5..]);
            if let Ok(root) = parser.parse_object() {
                xref.trailer.insert("Root".into(), root);
            }
        }
    }

    if xref.entries.is_empty() {
        return Err(PdfError::NoValidXRef);
    }
    Ok(xref)
}

/// Position of the last `trailer` keyword.
fn find_trailer(data: &[u8]) -> Option<usize> {
    const NEEDLE: &[u8] = b"trailer";
    (0..data.len().saturating_sub(NEEDLE.len()))
        .rev()
        .find(|&i| &data[i..i + NEEDLE.len()] == NEEDLE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_startxref_last_occurrence() {
        let data = b"startxref\n1\nmore bytes here\nstartxref\n742\n%%EOF";
        assert_eq!(find_startxref(data).unwrap(), 742);
    }

    #[test]
    fn test_find_startxref_steps_back_beyond_tail_window() {
        let mut data = b"junk startxref\n99\n".to_vec();
        data.extend(std::iter::repeat_n(b'%', 3000));
        assert_eq!(find_startxref(&data).unwrap(), 99);
    }

    #[test]
    fn test_find_startxref_missing() {
        assert!(matches!(
            find_startxref(b"%PDF-1.4 no table here"),
            Err(PdfError::NoValidXRef)
        ));
    }

    #[test]
    fn test_classic_table_with_trailer() {
        let data = b"xref\n0 3\n0000000000 65535 f \n0000000015 00000 n \n0000000099 00000 n \ntrailer\n<</Size 3 /Root 1 0 R>>\n";
        let xref = parse_classic_table(data, 0).unwrap();
        assert_eq!(xref.entries.len(), 2);
        assert_eq!(
            xref.get(1).unwrap().kind,
            XRefKind::Offset(15)
        );
        assert_eq!(
            xref.trailer.get("Size"),
            Some(&PDFObject::Int(3))
        );
        assert!(!xref.is_fallback);
    }

    #[test]
    fn test_classic_table_off_by_one_subsection() {
        // Subsection claims to start at 1 but leads with the free-list head.
        let data = b"xref\n1 3\n0000000000 65535 f \n0000000015 00000 n \n0000000099 00000 n \ntrailer\n<<>>\n";
        let xref = parse_classic_table(data, 0).unwrap();
        assert_eq!(xref.get(1).unwrap().kind, XRefKind::Offset(15));
        assert_eq!(xref.get(2).unwrap().kind, XRefKind::Offset(99));
        assert!(xref.get(3).is_none());
    }

    #[test]
    fn test_stream_entries_all_types() {
        let mut xref = XRef::new();
        // W = [1 2 1]; rows: free, offset 0x0102 gen 3, member 5 of stream 9.
        let rows = [
            0u8, 0, 0, 0, //
            1, 0x01, 0x02, 3, //
            2, 0, 9, 5,
        ];
        entries_from_stream_data(&mut xref, &rows, (1, 2, 1), &[(0, 3)]);
        assert!(xref.get(0).is_none());
        assert_eq!(
            xref.get(1).unwrap(),
            &XRefEntry {
                kind: XRefKind::Offset(0x0102),
                genno: 3
            }
        );
        assert_eq!(
            xref.get(2).unwrap().kind,
            XRefKind::InStream {
                container: 9,
                index: 5
            }
        );
    }

    #[test]
    fn test_stream_entries_implicit_type_one() {
        let mut xref = XRef::new();
        let rows = [0u8, 42, 0];
        entries_from_stream_data(&mut xref, &rows, (0, 2, 1), &[(7, 1)]);
        assert_eq!(xref.get(7).unwrap().kind, XRefKind::Offset(42));
    }

    #[test]
    fn test_recover_scan_newest_wins() {
        let data = b"5 0 obj\n(old)\nendobj\nfiller\n5 0 obj\n(new)\nendobj\ntrailer\n<</Root 5 0 R>>";
        let xref = recover_scan(data).unwrap();
        assert!(xref.is_fallback);
        assert_eq!(xref.get(5).unwrap().kind, XRefKind::Offset(28));
        assert!(xref.trailer.contains_key("Root"));
    }
}
