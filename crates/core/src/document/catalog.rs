//! The document: header, cross-reference chain, object resolution, caches.
//!
//! A [`PDFDocument`] owns a [`ByteSource`] and the newest-first list of xref
//! sections parsed from it. Object lookups walk that list so incremental
//! updates shadow older definitions; per-section failures fall through to
//! the next section. [`PdfError::MissingData`] always propagates so a
//! streamed source can suspend, fetch and retry.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use indexmap::IndexMap;
use tracing::{info, warn};

use super::page::PDFPage;
use super::source::{ByteSource, MemSource, RangeLoader, fetch_with_retry};
use super::xref::{self, XRef, XRefKind};
use crate::codec;
use crate::error::{PdfError, Result};
use crate::font::{FontKey, LoadedFont};
use crate::model::objects::{PDFObject, PDFStream};
use crate::parser::PDFParser;

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;
pub const DEFAULT_PAGE_CACHE_CAPACITY: usize = 16;

/// Zero-filled placeholder some writers emit for the trailer /ID.
const PLACEHOLDER_ID: [u8; 16] = [0; 16];

struct ObjectCache {
    capacity: usize,
    map: IndexMap<u32, Arc<PDFObject>>,
}

impl ObjectCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: IndexMap::new(),
        }
    }

    fn get(&mut self, objid: u32) -> Option<Arc<PDFObject>> {
        if self.capacity == 0 {
            return None;
        }
        let index = self.map.get_index_of(&objid)?;
        let value = Arc::clone(self.map.get_index(index)?.1);
        if index + 1 != self.map.len() {
            self.map.move_index(index, self.map.len() - 1);
        }
        Some(value)
    }

    fn insert(&mut self, objid: u32, value: Arc<PDFObject>) {
        if self.capacity == 0 {
            return;
        }
        if self.map.contains_key(&objid) {
            self.map.shift_remove(&objid);
        }
        self.map.insert(objid, value);
        if self.map.len() > self.capacity {
            self.map.shift_remove_index(0);
        }
    }

    fn clear(&mut self) {
        self.map.clear();
    }
}

struct PageCache {
    capacity: usize,
    map: IndexMap<usize, Arc<PDFPage>>,
}

impl PageCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: IndexMap::new(),
        }
    }

    fn get(&mut self, index: usize) -> Option<Arc<PDFPage>> {
        if self.capacity == 0 {
            return None;
        }
        let pos = self.map.get_index_of(&index)?;
        let value = Arc::clone(self.map.get_index(pos)?.1);
        if pos + 1 != self.map.len() {
            self.map.move_index(pos, self.map.len() - 1);
        }
        Some(value)
    }

    fn insert(&mut self, index: usize, page: Arc<PDFPage>) {
        if self.capacity == 0 {
            return;
        }
        if self.map.contains_key(&index) {
            self.map.shift_remove(&index);
        }
        self.map.insert(index, page);
        if self.map.len() > self.capacity {
            self.map.shift_remove_index(0);
        }
    }

    fn clear(&mut self) {
        self.map.clear();
    }
}

/// Decoded object stream body plus its member table.
struct ObjStmContent {
    data: Bytes,
    /// (object id, offset relative to /First) per member, in stream order.
    members: Vec<(u32, usize)>,
    first: usize,
}

/// Parameters from a valid linearization dictionary.
#[derive(Debug, Clone)]
pub struct Linearization {
    pub num_pages: usize,
    pub first_page_objid: Option<u32>,
}

/// Document information dictionary with type-checked fields.
///
/// Entries of the wrong type are dropped with a log line rather than
/// failing the whole lookup. Non-standard keys with simple value types are
/// kept under `custom`.
#[derive(Debug, Default, Clone)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub mod_date: Option<String>,
    pub trapped: Option<String>,
    pub custom: HashMap<String, PDFObject>,
}

/// PDF document: provides access to objects, pages and metadata.
pub struct PDFDocument {
    source: Arc<dyn ByteSource>,
    version: String,
    xrefs: Vec<XRef>,
    catalog: HashMap<String, PDFObject>,
    linearization: Option<Linearization>,
    cache: Mutex<ObjectCache>,
    page_cache: Mutex<PageCache>,
    objstm_cache: Mutex<HashMap<u32, Arc<ObjStmContent>>>,
    font_cache: Mutex<HashMap<FontKey, Arc<LoadedFont>>>,
    font_counter: AtomicUsize,
}

impl fmt::Debug for PDFDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PDFDocument")
            .field("version", &self.version)
            .field("len", &self.source.len())
            .field("xrefs", &self.xrefs.len())
            .field("linearized", &self.is_linearized())
            .finish_non_exhaustive()
    }
}

impl PDFDocument {
    /// Open a document over a complete in-memory buffer.
    pub fn new<D: AsRef<[u8]>>(data: D) -> Result<Self> {
        Self::new_from_bytes(Bytes::copy_from_slice(data.as_ref()))
    }

    /// Open a document over shared bytes (zero-copy).
    pub fn new_from_bytes(data: Bytes) -> Result<Self> {
        Self::from_source(Arc::new(MemSource::new(data)))
    }

    /// Open a document over an arbitrary byte source. With an incomplete
    /// streamed source this fails with `MissingData` until the ranges it
    /// reports have been fed.
    pub fn from_source(source: Arc<dyn ByteSource>) -> Result<Self> {
        let mut doc = Self {
            source,
            version: String::new(),
            xrefs: Vec::new(),
            catalog: HashMap::new(),
            linearization: None,
            cache: Mutex::new(ObjectCache::new(DEFAULT_CACHE_CAPACITY)),
            page_cache: Mutex::new(PageCache::new(DEFAULT_PAGE_CACHE_CAPACITY)),
            objstm_cache: Mutex::new(HashMap::new()),
            font_cache: Mutex::new(HashMap::new()),
            font_counter: AtomicUsize::new(0),
        };
        doc.parse_header()?;
        doc.parse(false)?;
        Ok(doc)
    }

    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }

    /// Header version string ("1.7"), empty when the header is absent.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn catalog(&self) -> &HashMap<String, PDFObject> {
        &self.catalog
    }

    /// Newest trailer dictionary.
    pub fn trailer(&self) -> Option<&HashMap<String, PDFObject>> {
        self.xrefs.first().map(|x| &x.trailer)
    }

    pub fn is_linearized(&self) -> bool {
        self.linearization.is_some()
    }

    pub(crate) fn font_cache(&self) -> &Mutex<HashMap<FontKey, Arc<LoadedFont>>> {
        &self.font_cache
    }

    pub(crate) fn next_font_number(&self) -> usize {
        self.font_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ---- header and xref chain ----------------------------------------

    fn parse_header(&mut self) -> Result<()> {
        if self.source.is_empty() {
            return Err(PdfError::EmptyDocument);
        }
        let head = self.source.read_at(0, 1024.min(self.source.len()))?;
        let data = head.as_ref();
        let Some(start) = data.windows(5).position(|w| w == b"%PDF-") else {
            warn!("no PDF header found in the first kilobyte");
            return Ok(());
        };
        let mut version = String::new();
        for &b in &data[start + 5..] {
            if version.len() >= 12 || !(b.is_ascii_digit() || b == b'.') {
                break;
            }
            version.push(b as char);
        }
        if !version
            .split_once('.')
            .is_some_and(|(maj, min)| !maj.is_empty() && !min.is_empty())
        {
            warn!(version = %version, "invalid PDF header version");
        }
        self.version = version;
        Ok(())
    }

    /// Build the xref chain and locate the catalog.
    ///
    /// With `recovery` set, skips `startxref` entirely and rebuilds the
    /// table from a whole-file object scan.
    fn parse(&mut self, recovery: bool) -> Result<()> {
        self.xrefs.clear();
        self.catalog.clear();
        self.linearization = None;

        if !recovery {
            match self.find_startxref().and_then(|pos| self.load_xrefs(pos)) {
                Ok(()) if !self.xrefs.is_empty() => {}
                Err(e) if e.is_missing_data() => return Err(e),
                other => {
                    if let Err(e) = other {
                        warn!(error = %e, "xref chain unusable, scanning for objects");
                    }
                    self.xrefs.clear();
                    self.load_fallback()?;
                }
            }
        } else {
            self.load_fallback()?;
        }

        for i in 0..self.xrefs.len() {
            let Some(root_ref) = self.xrefs[i].trailer.get("Root").cloned() else {
                continue;
            };
            if let Ok(root_obj) = self.resolve_shared(&root_ref)
                && let Ok(dict) = root_obj.as_dict()
            {
                self.catalog = dict.clone();
                break;
            }
        }

        if self.catalog.is_empty() {
            if !recovery {
                info!("catalog unreachable through xrefs, retrying with a full scan");
                return self.parse(true);
            }
            return Err(PdfError::NoValidXRef);
        }

        self.linearization = self.probe_linearization();
        Ok(())
    }

    /// Locate the final `startxref` value, widening the searched suffix of
    /// the file until it is found.
    fn find_startxref(&self) -> Result<usize> {
        let len = self.source.len();
        let mut suffix = 1024.min(len);
        loop {
            let buf = self.source.read_at(len - suffix, len)?;
            match xref::find_startxref(buf.as_ref()) {
                Ok(pos) => return Ok(pos),
                Err(e) if suffix == len => return Err(e),
                Err(_) => suffix = (suffix * 4).min(len),
            }
        }
    }

    fn load_xrefs(&mut self, mut pos: usize) -> Result<()> {
        let mut visited = HashSet::new();

        while !visited.contains(&pos) {
            visited.insert(pos);

            let xref = self.load_xref_at(pos)?;

            // Hybrid files put a cross-reference stream behind /XRefStm; it
            // shadows the classic table that points at it.
            let xref_stm = xref
                .trailer
                .get("XRefStm")
                .and_then(|p| p.as_int().ok())
                .map(|n| n as usize);
            let prev = xref
                .trailer
                .get("Prev")
                .and_then(|p| p.as_int().ok())
                .map(|n| n as usize);

            self.xrefs.push(xref);

            if let Some(stm_pos) = xref_stm
                && !visited.contains(&stm_pos)
            {
                visited.insert(stm_pos);
                match self.load_xref_stream(stm_pos) {
                    Ok(stm) => self.xrefs.push(stm),
                    Err(e) if e.is_missing_data() => return Err(e),
                    Err(e) => warn!(error = %e, pos = stm_pos, "XRefStm unusable"),
                }
            }

            match prev {
                Some(prev_pos) => pos = prev_pos,
                None => break,
            }
        }

        Ok(())
    }

    fn load_xref_at(&self, pos: usize) -> Result<XRef> {
        let (buf, complete) = self.source.read_tail(pos)?;
        if buf.starts_with(b"xref") {
            match xref::parse_classic_table(buf.as_ref(), 0) {
                Err(e) if !complete && !e.is_missing_data() => {
                    Err(self.missing_after(pos, buf.len()))
                }
                other => other,
            }
        } else {
            self.load_xref_stream(pos)
        }
    }

    fn load_xref_stream(&self, pos: usize) -> Result<XRef> {
        let obj = self.parse_object_at(pos, 0, false)?;
        let stream = obj.as_stream()?;
        match stream.get("Type") {
            Some(PDFObject::Name(name)) if name == "XRef" => {}
            _ => {
                return Err(PdfError::SyntaxError(
                    "object at startxref is not a cross-reference stream".into(),
                ));
            }
        }

        let w_arr = stream
            .get("W")
            .ok_or_else(|| PdfError::KeyError("W".into()))?
            .as_array()?;
        if w_arr.len() != 3 {
            return Err(PdfError::SyntaxError("/W must have 3 elements".into()));
        }
        let widths = (
            w_arr[0].as_int()? as usize,
            w_arr[1].as_int()? as usize,
            w_arr[2].as_int()? as usize,
        );

        let size = stream
            .get("Size")
            .ok_or_else(|| PdfError::KeyError("Size".into()))?
            .as_int()? as usize;

        let index = if let Some(idx) = stream.get("Index") {
            let arr = idx.as_array()?;
            let mut pairs = Vec::new();
            let mut i = 0;
            while i + 1 < arr.len() {
                pairs.push((arr[i].as_int()? as u32, arr[i + 1].as_int()? as usize));
                i += 2;
            }
            pairs
        } else {
            vec![(0, size)]
        };

        let data = self.decode_stream(stream)?;

        let mut result = XRef::new();
        xref::entries_from_stream_data(&mut result, &data, widths, &index);

        for (key, value) in &stream.attrs {
            if !matches!(
                key.as_str(),
                "Length" | "Filter" | "DecodeParms" | "W" | "Index"
            ) {
                result.trailer.insert(key.clone(), value.clone());
            }
        }

        Ok(result)
    }

    fn load_fallback(&mut self) -> Result<()> {
        let (buf, complete) = self.source.read_tail(0)?;
        if !complete {
            return Err(self.missing_after(0, buf.len()));
        }
        let fallback = xref::recover_scan(buf.as_ref())?;
        self.xrefs.push(fallback);
        self.index_objstm_members();
        Ok(())
    }

    /// After a recovery scan, register members of every object stream the
    /// scan found, so compressed-only objects stay reachable. Directly
    /// scanned records win over stream members.
    fn index_objstm_members(&mut self) {
        let Some(fallback) = self.xrefs.last() else {
            return;
        };
        let objids: Vec<u32> = fallback.entries.keys().copied().collect();

        let mut additions = Vec::new();
        for objid in objids {
            let Ok(obj) = self.getobj_shared(objid) else {
                continue;
            };
            let Ok(stream) = obj.as_stream() else {
                continue;
            };
            match stream.get("Type") {
                Some(PDFObject::Name(name)) if name == "ObjStm" => {}
                _ => continue,
            }
            if let Ok(content) = self.objstm_content(objid) {
                for (index, &(member, _)) in content.members.iter().enumerate() {
                    additions.push((member, objid, index));
                }
            }
        }

        if let Some(fallback) = self.xrefs.last_mut() {
            for (member, container, index) in additions {
                fallback.entries.entry(member).or_insert(xref::XRefEntry {
                    kind: XRefKind::InStream { container, index },
                    genno: 0,
                });
            }
        }
    }

    fn probe_linearization(&self) -> Option<Linearization> {
        let (buf, _) = self.source.read_tail(0).ok()?;
        let data = buf.as_ref();
        let mut pos = 0;
        // Skip the header line and any binary marker comments.
        loop {
            pos = xref::skip_ws(data, pos);
            if pos < data.len() && data[pos] == b'%' {
                while pos < data.len() && data[pos] != b'\n' && data[pos] != b'\r' {
                    pos += 1;
                }
            } else {
                break;
            }
        }
        if pos >= data.len() {
            return None;
        }

        let mut parser = PDFParser::new(&data[pos..]);
        let (_, _, obj) = parser.parse_indirect_object().ok()?;
        let dict = obj.as_dict().ok()?;

        if dict.get("Linearized")?.as_num().ok()? <= 0.0 {
            return None;
        }
        let length = dict.get("L")?.as_int().ok()? as usize;
        if length != self.source.len() {
            warn!(
                declared = length,
                actual = self.source.len(),
                "linearization /L does not match file length"
            );
            return None;
        }
        let num_pages = dict.get("N")?.as_int().ok()? as usize;
        let first_page_objid = dict
            .get("O")
            .and_then(|o| o.as_int().ok())
            .map(|n| n as u32);

        Some(Linearization {
            num_pages,
            first_page_objid,
        })
    }

    fn missing_after(&self, offset: usize, have: usize) -> PdfError {
        match self
            .source
            .first_missing_range(offset + have, self.source.len())
        {
            Some((begin, end)) => PdfError::MissingData { begin, end },
            None => PdfError::UnexpectedEof,
        }
    }

    // ---- object access -------------------------------------------------

    /// Get an object by ID, cloning out of the shared cache.
    pub fn getobj(&self, objid: u32) -> Result<PDFObject> {
        Ok((*self.getobj_shared(objid)?).clone())
    }

    /// Get an object by ID, feeding missing byte ranges through `loader`
    /// until the fetch completes.
    pub fn getobj_with_loader(
        &self,
        objid: u32,
        loader: &mut dyn RangeLoader,
    ) -> Result<PDFObject> {
        fetch_with_retry(self.source.as_ref(), loader, || self.getobj(objid))
    }

    /// Get an object by ID without cloning the cached value.
    pub fn getobj_shared(&self, objid: u32) -> Result<Arc<PDFObject>> {
        if objid == 0 {
            return Err(PdfError::ObjectNotFound(0));
        }

        // Thread-local cycle detection; a shared set would false-positive
        // when two threads resolve the same object concurrently.
        thread_local! {
            static RESOLVING: RefCell<HashSet<u32>> = RefCell::new(HashSet::new());
        }

        struct ThreadLocalGuard {
            objid: u32,
        }

        impl Drop for ThreadLocalGuard {
            fn drop(&mut self) {
                RESOLVING.with(|set| {
                    set.borrow_mut().remove(&self.objid);
                });
            }
        }

        let is_circular = RESOLVING.with(|set| {
            let mut borrowed = set.borrow_mut();
            if borrowed.contains(&objid) {
                true
            } else {
                borrowed.insert(objid);
                false
            }
        });
        if is_circular {
            return Err(PdfError::SyntaxError(format!(
                "circular reference detected for obj {objid}"
            )));
        }
        let _guard = ThreadLocalGuard { objid };

        if let Ok(mut cache) = self.cache.lock()
            && let Some(obj) = cache.get(objid)
        {
            return Ok(obj);
        }

        let mut had_entry = false;
        for section in &self.xrefs {
            let Some(entry) = section.get(objid) else {
                continue;
            };
            had_entry = true;
            let parsed = match entry.kind {
                XRefKind::Offset(offset) => {
                    self.parse_object_at(offset, objid, section.is_fallback)
                }
                XRefKind::InStream { container, index } => {
                    self.parse_object_from_stream(container, index)
                }
            };
            let obj = match parsed {
                Ok(obj) => obj,
                Err(e) if e.is_missing_data() => return Err(e),
                // Try the next (older) section, as incremental updates may
                // shadow a broken entry with a working one.
                Err(_) => continue,
            };

            let obj = Arc::new(obj);
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(objid, Arc::clone(&obj));
            }
            return Ok(obj);
        }

        if had_entry {
            Err(PdfError::XRefEntry(objid))
        } else {
            Err(PdfError::ObjectNotFound(objid))
        }
    }

    /// Resolve a reference chain to its target object.
    pub fn resolve(&self, obj: &PDFObject) -> Result<PDFObject> {
        Ok((*self.resolve_shared(obj)?).clone())
    }

    /// Resolve a reference chain without cloning.
    pub fn resolve_shared(&self, obj: &PDFObject) -> Result<Arc<PDFObject>> {
        let mut seen = HashSet::new();
        let mut current = match obj {
            PDFObject::Ref(r) => {
                seen.insert(r.objid);
                self.getobj_shared(r.objid)?
            }
            _ => return Ok(Arc::new(obj.clone())),
        };
        loop {
            match current.as_ref() {
                PDFObject::Ref(r) => {
                    if !seen.insert(r.objid) {
                        return Err(PdfError::SyntaxError(format!(
                            "circular reference detected for obj {}",
                            r.objid
                        )));
                    }
                    current = self.getobj_shared(r.objid)?;
                }
                _ => return Ok(current),
            }
        }
    }

    /// Parse an `objid genno obj` record at a file offset.
    fn parse_object_at(&self, offset: usize, expected_objid: u32, fallback: bool) -> Result<PDFObject> {
        if offset >= self.source.len() {
            return Err(PdfError::SyntaxError(format!(
                "object offset {} exceeds file size {}",
                offset,
                self.source.len()
            )));
        }
        let (buf, complete) = self.source.read_tail(offset)?;
        match self.parse_object_in(&buf, expected_objid, fallback, complete, offset) {
            Err(e) if !complete && !e.is_missing_data() => {
                Err(self.missing_after(offset, buf.len()))
            }
            other => other,
        }
    }

    fn parse_object_in(
        &self,
        buf: &Bytes,
        expected_objid: u32,
        fallback: bool,
        complete: bool,
        abs_offset: usize,
    ) -> Result<PDFObject> {
        let data = buf.as_ref();

        let (objid, pos) = xref::read_number(data, 0)?;
        let pos = xref::skip_ws(data, pos);
        let (genno, pos) = xref::read_number(data, pos)?;
        let pos = xref::skip_ws(data, pos);
        if !data[pos..].starts_with(b"obj") {
            return Err(PdfError::SyntaxError(format!(
                "expected 'obj' at offset {abs_offset}"
            )));
        }
        // A mislabeled record means the table entry is stale, not that the
        // document is broken. Callers treat it like any other bad entry.
        if expected_objid != 0 && objid as u32 != expected_objid {
            return Err(PdfError::XRefEntry(expected_objid));
        }
        let body = xref::skip_ws(data, pos + 3);

        let mut parser = PDFParser::new(&data[body..]);
        let obj = parser.parse_object()?;

        if let PDFObject::Dict(ref dict) = obj {
            let remaining = parser.remaining();
            let keyword = xref::skip_ws(remaining, 0);
            if remaining[keyword..].starts_with(b"stream") {
                let mut start = keyword + 6;
                if start < remaining.len() && remaining[start] == b'\r' {
                    start += 1;
                }
                if start < remaining.len() && remaining[start] == b'\n' {
                    start += 1;
                }
                // Offset of the stream data inside `buf`.
                let rel = body + parser.tell() + start;

                // XRef and ObjStm streams are load-bearing; their /Length
                // often cannot be resolved yet, so scan for endstream.
                let force_scan = matches!(
                    dict.get("Type"),
                    Some(PDFObject::Name(name)) if name == "XRef" || name == "ObjStm"
                );
                let length: usize = if fallback || force_scan {
                    0
                } else {
                    dict.get("Length")
                        .and_then(|len| self.resolve(len).ok())
                        .and_then(|len| len.as_int().ok())
                        .filter(|&len| len > 0)
                        .map(|len| len as usize)
                        .unwrap_or(0)
                };

                let stream_data = if length > 0 && rel + length <= data.len() {
                    buf.slice(rel..rel + length)
                } else {
                    // Missing or corrupt /Length: scan for endstream.
                    match find_endstream(&data[rel..]) {
                        Some(end) => buf.slice(rel..rel + end),
                        None if !complete => {
                            return Err(self.missing_after(abs_offset, buf.len()));
                        }
                        None => buf.slice(rel..),
                    }
                };

                return Ok(PDFObject::Stream(Box::new(PDFStream::with_id(
                    dict.clone(),
                    stream_data,
                    objid as u32,
                    genno as u32,
                ))));
            }
        }

        Ok(obj)
    }

    /// Parse a member of a compressed object stream.
    fn parse_object_from_stream(&self, container: u32, index: usize) -> Result<PDFObject> {
        let content = self.objstm_content(container)?;
        let &(_, offset) = content.members.get(index).ok_or_else(|| {
            PdfError::SyntaxError(format!(
                "object stream {container} has no member {index}"
            ))
        })?;
        let start = content.first + offset;
        if start > content.data.len() {
            return Err(PdfError::SyntaxError(
                "object stream member offset out of bounds".into(),
            ));
        }
        let mut parser = PDFParser::new(&content.data[start..]);
        parser.parse_object()
    }

    fn objstm_content(&self, container: u32) -> Result<Arc<ObjStmContent>> {
        if let Ok(cache) = self.objstm_cache.lock()
            && let Some(content) = cache.get(&container)
        {
            return Ok(Arc::clone(content));
        }

        let obj = self.getobj_shared(container)?;
        let stream = obj.as_stream()?;
        match stream.get("Type") {
            Some(PDFObject::Name(name)) if name == "ObjStm" => {}
            _ => {
                return Err(PdfError::SyntaxError(format!(
                    "object {container} is not an object stream"
                )));
            }
        }
        let n = stream
            .get("N")
            .ok_or_else(|| PdfError::KeyError("N".into()))?
            .as_int()? as usize;
        let first = stream
            .get("First")
            .ok_or_else(|| PdfError::KeyError("First".into()))?
            .as_int()? as usize;

        let data = Bytes::from(self.decode_stream(stream)?);
        if first > data.len() {
            return Err(PdfError::SyntaxError(
                "object stream /First exceeds data length".into(),
            ));
        }

        let mut header = PDFParser::new(&data[..first]);
        let mut members = Vec::with_capacity(n);
        for _ in 0..n {
            let objid = header.parse_object()?.as_int()? as u32;
            let offset = header.parse_object()?.as_int()? as usize;
            members.push((objid, offset));
        }

        let content = Arc::new(ObjStmContent {
            data,
            members,
            first,
        });
        if let Ok(mut cache) = self.objstm_cache.lock() {
            cache.insert(container, Arc::clone(&content));
        }
        Ok(content)
    }

    // ---- stream decoding -----------------------------------------------

    /// Decode a stream through its filter chain.
    pub fn decode_stream(&self, stream: &PDFStream) -> Result<Vec<u8>> {
        let filters = self.filter_chain(stream)?;
        let mut data = stream.raw_data().to_vec();

        for (name, parms) in &filters {
            match name.as_str() {
                "FlateDecode" | "Fl" => {
                    data = codec::flate_decode(&data);
                    data = apply_predictor(data, parms.as_ref())?;
                }
                "LZWDecode" | "LZW" => {
                    let early = parms
                        .as_ref()
                        .and_then(|p| p.get("EarlyChange"))
                        .and_then(|v| v.as_int().ok())
                        .unwrap_or(1);
                    data = codec::lzw_decode_with_earlychange(&data, early);
                    data = apply_predictor(data, parms.as_ref())?;
                }
                "ASCII85Decode" | "A85" => {
                    data = codec::ascii85_decode(&data)?;
                }
                "ASCIIHexDecode" | "AHx" => {
                    data = codec::asciihex_decode(&data)?;
                }
                "RunLengthDecode" | "RL" => {
                    data = codec::run_length_decode(&data);
                }
                // Image codecs are decoded downstream by the consumer of the
                // operator list; hand the remaining bytes through untouched.
                "DCTDecode" | "DCT" | "JPXDecode" | "JBIG2Decode" | "CCITTFaxDecode" | "CCF" => {
                    return Ok(data);
                }
                other => {
                    warn!(filter = other, "unsupported stream filter");
                    return Ok(data);
                }
            }
        }

        Ok(data)
    }

    /// Decode a stream to shared bytes; zero-copy when it has no filters.
    pub fn decode_stream_bytes(&self, stream: &PDFStream) -> Result<Bytes> {
        if self.filter_chain(stream)?.is_empty() {
            return Ok(stream.raw_bytes());
        }
        Ok(Bytes::from(self.decode_stream(stream)?))
    }

    /// The name of the last filter in the chain, after resolution.
    pub fn final_filter(&self, stream: &PDFStream) -> Result<Option<String>> {
        Ok(self.filter_chain(stream)?.pop().map(|(name, _)| name))
    }

    /// Resolve /Filter and /DecodeParms into an aligned list of
    /// (filter name, parameter dict) pairs.
    #[allow(clippy::type_complexity)]
    fn filter_chain(
        &self,
        stream: &PDFStream,
    ) -> Result<Vec<(String, Option<HashMap<String, PDFObject>>)>> {
        let names: Vec<String> = match stream.get("Filter") {
            None => return Ok(Vec::new()),
            Some(filter) => match self.resolve(filter)? {
                PDFObject::Name(name) => vec![name],
                PDFObject::Array(arr) => {
                    let mut names = Vec::with_capacity(arr.len());
                    for item in &arr {
                        names.push(self.resolve(item)?.as_name()?.to_string());
                    }
                    names
                }
                PDFObject::Null => return Ok(Vec::new()),
                other => {
                    return Err(PdfError::TypeError {
                        expected: "name or array",
                        got: other.type_name().to_string(),
                    });
                }
            },
        };

        let parms: Vec<Option<HashMap<String, PDFObject>>> = match stream.get("DecodeParms") {
            None => vec![None; names.len()],
            Some(parms) => match self.resolve(parms)? {
                PDFObject::Dict(d) => {
                    let mut list = vec![None; names.len()];
                    if let Some(first) = list.first_mut() {
                        *first = Some(d);
                    }
                    list
                }
                PDFObject::Array(arr) => {
                    let mut list = Vec::with_capacity(names.len());
                    for i in 0..names.len() {
                        let entry = match arr.get(i) {
                            Some(obj) => match self.resolve(obj)? {
                                PDFObject::Dict(d) => Some(d),
                                _ => None,
                            },
                            None => None,
                        };
                        list.push(entry);
                    }
                    list
                }
                _ => vec![None; names.len()],
            },
        };

        Ok(names.into_iter().zip(parms).collect())
    }

    // ---- metadata ------------------------------------------------------

    /// A stable identifier for the document: the first trailer /ID when one
    /// is present and not the all-zero placeholder, otherwise an MD5 of the
    /// first kilobyte.
    pub fn fingerprint(&self) -> Result<String> {
        for section in &self.xrefs {
            if let Some(PDFObject::Array(arr)) = section.trailer.get("ID")
                && let Some(PDFObject::String(id)) = arr.first()
                && !id.is_empty()
                && id.as_slice() != PLACEHOLDER_ID
            {
                return Ok(hex_string(id));
            }
        }
        let head = self.source.read_at(0, 1024.min(self.source.len()))?;
        Ok(hex_string(&md5::compute(head.as_ref()).0))
    }

    /// Type-checked document information dictionary.
    pub fn document_info(&self) -> DocumentInfo {
        let mut out = DocumentInfo::default();
        let Some(dict) = self.info_dict() else {
            return out;
        };

        for (key, value) in &dict {
            let slot = match key.as_str() {
                "Title" => Some(&mut out.title),
                "Author" => Some(&mut out.author),
                "Subject" => Some(&mut out.subject),
                "Keywords" => Some(&mut out.keywords),
                "Creator" => Some(&mut out.creator),
                "Producer" => Some(&mut out.producer),
                "CreationDate" => Some(&mut out.creation_date),
                "ModDate" => Some(&mut out.mod_date),
                _ => None,
            };
            if let Some(slot) = slot {
                match self.resolve(value) {
                    Ok(PDFObject::String(s)) => *slot = Some(text_string(&s)),
                    Ok(_) | Err(_) => {
                        info!(key = %key, "document info entry has the wrong type");
                    }
                }
                continue;
            }
            if key == "Trapped" {
                match self.resolve(value) {
                    Ok(PDFObject::Name(n)) => out.trapped = Some(n),
                    _ => info!("document info /Trapped is not a name"),
                }
                continue;
            }
            // Custom entries are kept only for simple value types.
            if let Ok(resolved) = self.resolve(value) {
                match resolved {
                    PDFObject::String(ref s) => {
                        out.custom
                            .insert(key.clone(), PDFObject::String(s.clone()));
                    }
                    PDFObject::Name(_)
                    | PDFObject::Int(_)
                    | PDFObject::Real(_)
                    | PDFObject::Bool(_) => {
                        out.custom.insert(key.clone(), resolved);
                    }
                    _ => {}
                }
            }
        }
        out
    }

    fn info_dict(&self) -> Option<HashMap<String, PDFObject>> {
        for section in &self.xrefs {
            if let Some(info_ref) = section.trailer.get("Info")
                && let Ok(obj) = self.resolve_shared(info_ref)
                && let Ok(dict) = obj.as_dict()
            {
                return Some(dict.clone());
            }
        }
        None
    }

    /// Whether the document carries an interactive form (fields or XFA).
    pub fn has_acro_form(&self) -> Result<bool> {
        let probe = || -> Result<bool> {
            let Some(obj) = self.catalog.get("AcroForm") else {
                return Ok(false);
            };
            let resolved = self.resolve_shared(obj)?;
            let dict = resolved.as_dict()?;
            let has_fields = match dict.get("Fields") {
                Some(fields) => !self.resolve(fields)?.as_array()?.is_empty(),
                None => false,
            };
            let has_xfa = match dict.get("XFA") {
                Some(xfa) => match self.resolve(xfa)? {
                    PDFObject::Array(a) => !a.is_empty(),
                    PDFObject::Stream(s) => !s.raw_data().is_empty(),
                    PDFObject::String(s) => !s.is_empty(),
                    _ => false,
                },
                None => false,
            };
            Ok(has_fields || has_xfa)
        };
        match probe() {
            Err(e) if e.is_missing_data() => Err(e),
            Err(e) => {
                warn!(error = %e, "AcroForm probe failed");
                Ok(false)
            }
            ok => ok,
        }
    }

    /// Whether the document carries a portable collection.
    pub fn has_collection(&self) -> Result<bool> {
        let probe = || -> Result<bool> {
            let Some(obj) = self.catalog.get("Collection") else {
                return Ok(false);
            };
            let resolved = self.resolve_shared(obj)?;
            Ok(!resolved.as_dict()?.is_empty())
        };
        match probe() {
            Err(e) if e.is_missing_data() => Err(e),
            Err(e) => {
                warn!(error = %e, "Collection probe failed");
                Ok(false)
            }
            ok => ok,
        }
    }

    // ---- pages ----------------------------------------------------------

    /// Total page count, preferring the linearization parameters.
    pub fn num_pages(&self) -> usize {
        if let Some(lin) = &self.linearization {
            return lin.num_pages;
        }
        self.tree_page_count()
    }

    fn tree_page_count(&self) -> usize {
        if let Some(pages_ref) = self.catalog.get("Pages")
            && let Ok(pages) = self.resolve_shared(pages_ref)
            && let Ok(dict) = pages.as_dict()
            && let Some(count) = dict.get("Count")
            && let Ok(count) = self.resolve(count)
            && let Ok(n) = count.as_int()
            && n >= 0
        {
            return n as usize;
        }
        0
    }

    /// Get a page by zero-based index, through the page cache.
    pub fn get_page(&self, index: usize) -> Result<Arc<PDFPage>> {
        if let Ok(mut cache) = self.page_cache.lock()
            && let Some(page) = cache.get(index)
        {
            return Ok(page);
        }
        let page = Arc::new(self.build_page(index)?);
        if let Ok(mut cache) = self.page_cache.lock() {
            cache.insert(index, Arc::clone(&page));
        }
        Ok(page)
    }

    fn build_page(&self, index: usize) -> Result<PDFPage> {
        // Linearized documents name the first page object directly; validate
        // before trusting it, broken linearization data is common.
        if index == 0
            && let Some(lin) = &self.linearization
            && let Some(objid) = lin.first_page_objid
        {
            match self.getobj_shared(objid) {
                Ok(obj)
                    if obj.as_dict().is_ok_and(|d| {
                        matches!(d.get("Type"), Some(PDFObject::Name(n)) if n == "Page")
                    }) =>
                {
                    let attrs = obj.as_dict()?.clone();
                    return Ok(PDFPage::new(index, attrs, Some(objid)));
                }
                Err(e) if e.is_missing_data() => return Err(e),
                _ => info!("linearized first-page shortcut failed, walking the page tree"),
            }
        }

        let (attrs, objid) = self.page_dict_at(index)?;
        Ok(PDFPage::new(index, attrs, objid))
    }

    fn page_dict_at(&self, index: usize) -> Result<(HashMap<String, PDFObject>, Option<u32>)> {
        let pages = self
            .catalog
            .get("Pages")
            .ok_or_else(|| PdfError::KeyError("Pages".into()))?;
        let mut visited = HashSet::new();
        if let PDFObject::Ref(r) = pages {
            visited.insert(r.objid);
        }
        let root = self.resolve_shared(pages)?;
        let mut remaining = index;
        self.walk_page_tree(root.as_dict()?, &mut remaining, &mut visited)?
            .ok_or_else(|| PdfError::SyntaxError(format!("page index {index} out of range")))
    }

    fn walk_page_tree(
        &self,
        node: &HashMap<String, PDFObject>,
        remaining: &mut usize,
        visited: &mut HashSet<u32>,
    ) -> Result<Option<(HashMap<String, PDFObject>, Option<u32>)>> {
        let kids = match node.get("Kids") {
            Some(kids) => self.resolve(kids)?,
            None => return Ok(None),
        };
        for kid in kids.as_array()? {
            let kid_objid = match kid {
                PDFObject::Ref(r) => {
                    if !visited.insert(r.objid) {
                        warn!(objid = r.objid, "page tree cycle");
                        continue;
                    }
                    Some(r.objid)
                }
                _ => None,
            };
            let kid_obj = match self.resolve_shared(kid) {
                Ok(obj) => obj,
                Err(e) if e.is_missing_data() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "unreadable page tree node");
                    continue;
                }
            };
            let Ok(dict) = kid_obj.as_dict() else {
                warn!("page tree node is not a dictionary");
                continue;
            };

            let is_interior = matches!(dict.get("Type"), Some(PDFObject::Name(n)) if n == "Pages")
                || dict.contains_key("Kids");
            if is_interior {
                // Trust /Count only to skip whole subtrees; descending
                // recounts leaves so a wrong Count cannot misplace a page.
                let count = dict
                    .get("Count")
                    .and_then(|c| self.resolve(c).ok())
                    .and_then(|c| c.as_int().ok())
                    .filter(|&c| c >= 0)
                    .map(|c| c as usize);
                if let Some(count) = count
                    && *remaining >= count
                {
                    *remaining -= count;
                    continue;
                }
                if let Some(found) = self.walk_page_tree(dict, remaining, visited)? {
                    return Ok(Some(found));
                }
            } else {
                if *remaining == 0 {
                    return Ok(Some((dict.clone(), kid_objid)));
                }
                *remaining -= 1;
            }
        }
        Ok(None)
    }

    /// Verify the first page is reachable; on a stale cross-reference
    /// entry, drop all caches and rebuild the table from a full scan.
    pub fn check_first_page(&mut self) -> Result<()> {
        match self.get_page(0) {
            Ok(_) => Ok(()),
            Err(PdfError::XRefEntry(objid)) => {
                warn!(objid, "bad xref entry for the first page, rebuilding via scan");
                self.clear_caches();
                self.parse(true)?;
                self.get_page(0).map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    fn clear_caches(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
        if let Ok(mut cache) = self.page_cache.lock() {
            cache.clear();
        }
        if let Ok(mut cache) = self.objstm_cache.lock() {
            cache.clear();
        }
        if let Ok(mut cache) = self.font_cache.lock() {
            cache.clear();
        }
    }
}

fn find_endstream(data: &[u8]) -> Option<usize> {
    const NEEDLE: &[u8] = b"endstream";
    if data.len() < NEEDLE.len() {
        return None;
    }
    for pos in 0..=data.len() - NEEDLE.len() {
        if &data[pos..pos + NEEDLE.len()] == NEEDLE {
            let mut end = pos;
            while end > 0
                && (data[end - 1] == b' ' || data[end - 1] == b'\n' || data[end - 1] == b'\r')
            {
                end -= 1;
            }
            return Some(end);
        }
    }
    None
}

fn apply_predictor(
    data: Vec<u8>,
    parms: Option<&HashMap<String, PDFObject>>,
) -> Result<Vec<u8>> {
    let Some(parms) = parms else {
        return Ok(data);
    };
    let predictor = parms
        .get("Predictor")
        .and_then(|p| p.as_int().ok())
        .unwrap_or(1);
    if predictor < 10 {
        if predictor == 2 {
            warn!("TIFF predictor is not supported, returning raw data");
        }
        return Ok(data);
    }
    let columns = parms
        .get("Columns")
        .and_then(|c| c.as_int().ok())
        .unwrap_or(1) as usize;
    let colors = parms
        .get("Colors")
        .and_then(|c| c.as_int().ok())
        .unwrap_or(1) as usize;
    let bits = parms
        .get("BitsPerComponent")
        .and_then(|b| b.as_int().ok())
        .unwrap_or(8) as usize;
    codec::apply_png_predictor(&data, columns, colors, bits)
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Decode a text string: UTF-16 with a BOM, Latin-1 otherwise.
pub(crate) fn text_string(bytes: &[u8]) -> String {
    fn utf16(units: impl Iterator<Item = u16>) -> String {
        char::decode_utf16(units)
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        return utf16(
            bytes[2..]
                .chunks(2)
                .filter(|c| c.len() == 2)
                .map(|c| u16::from_be_bytes([c[0], c[1]])),
        );
    }
    if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xFE {
        return utf16(
            bytes[2..]
                .chunks(2)
                .filter(|c| c.len() == 2)
                .map(|c| u16::from_le_bytes([c[0], c[1]])),
        );
    }
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x00, 0xAB, 0x10]), "00ab10");
    }

    #[test]
    fn test_text_string_utf16be() {
        let bytes = [0xFE, 0xFF, 0x00, b'H', 0x00, b'i'];
        assert_eq!(text_string(&bytes), "Hi");
    }

    #[test]
    fn test_text_string_latin1() {
        assert_eq!(text_string(b"caf\xe9"), "caf\u{e9}");
    }

    #[test]
    fn test_find_endstream_trims_eol() {
        let data = b"abc\r\nendstream";
        assert_eq!(find_endstream(data), Some(3));
        assert_eq!(find_endstream(b"no terminator"), None);
    }
}
