//! The byte-source boundary between the document and its transport.
//!
//! A [`ByteSource`] yields ranges of the file. A fully-buffered source
//! ([`MemSource`]) never suspends; a [`ChunkedSource`] backed by a streamed
//! transport raises [`PdfError::MissingData`] for ranges it does not hold
//! yet. Missing data is control flow, not failure: the caller feeds the
//! reported range and retries.

use std::sync::Mutex;

use bytes::Bytes;

use crate::error::{PdfError, Result};

/// Random-access byte supply for a document.
pub trait ByteSource: Send + Sync {
    /// Total length of the file, known up front.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bytes in `[begin, end)`. `MissingData` if any part is absent.
    fn read_at(&self, begin: usize, end: usize) -> Result<Bytes>;

    /// The contiguous run of available bytes starting at `begin`, and
    /// whether that run reaches end-of-file. `MissingData` if the byte at
    /// `begin` itself is absent.
    fn read_tail(&self, begin: usize) -> Result<(Bytes, bool)>;

    /// The first absent sub-range of `[begin, end)`, if any.
    fn first_missing_range(&self, begin: usize, end: usize) -> Option<(usize, usize)>;

    /// Deliver bytes at an offset. No-op for sources that are complete.
    fn feed(&self, offset: usize, data: &[u8]);
}

/// A source over a complete in-memory buffer. Never suspends.
pub struct MemSource {
    data: Bytes,
}

impl MemSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ByteSource for MemSource {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn read_at(&self, begin: usize, end: usize) -> Result<Bytes> {
        let end = end.min(self.data.len());
        if begin > end {
            return Ok(Bytes::new());
        }
        Ok(self.data.slice(begin..end))
    }

    fn read_tail(&self, begin: usize) -> Result<(Bytes, bool)> {
        let begin = begin.min(self.data.len());
        Ok((self.data.slice(begin..), true))
    }

    fn first_missing_range(&self, _begin: usize, _end: usize) -> Option<(usize, usize)> {
        None
    }

    fn feed(&self, _offset: usize, _data: &[u8]) {}
}

/// Fixed chunk granularity for streamed input.
pub const CHUNK_SIZE: usize = 65536;

struct ChunkedInner {
    data: Vec<u8>,
    present: Vec<bool>,
}

/// A source filled incrementally in fixed-size chunks.
///
/// Ranges covering absent chunks raise `MissingData` with the chunk-aligned
/// extent of the first gap, so the transport can issue one range request
/// per suspension.
pub struct ChunkedSource {
    length: usize,
    inner: Mutex<ChunkedInner>,
}

impl ChunkedSource {
    pub fn new(length: usize) -> Self {
        let chunks = length.div_ceil(CHUNK_SIZE);
        Self {
            length,
            inner: Mutex::new(ChunkedInner {
                data: vec![0; length],
                present: vec![false; chunks],
            }),
        }
    }

    fn missing_in(inner: &ChunkedInner, begin: usize, end: usize, length: usize) -> Option<(usize, usize)> {
        let end = end.min(length);
        if begin >= end {
            return None;
        }
        let first = begin / CHUNK_SIZE;
        let last = (end - 1) / CHUNK_SIZE;
        let mut gap_start = None;
        for chunk in first..=last {
            match (inner.present[chunk], gap_start) {
                (false, None) => gap_start = Some(chunk),
                (true, Some(start)) => {
                    return Some((start * CHUNK_SIZE, (chunk * CHUNK_SIZE).min(length)));
                }
                _ => {}
            }
        }
        gap_start.map(|start| (start * CHUNK_SIZE, ((last + 1) * CHUNK_SIZE).min(length)))
    }
}

impl ByteSource for ChunkedSource {
    fn len(&self) -> usize {
        self.length
    }

    fn read_at(&self, begin: usize, end: usize) -> Result<Bytes> {
        let end = end.min(self.length);
        if begin >= end {
            return Ok(Bytes::new());
        }
        let inner = self.inner.lock().unwrap();
        if let Some((gap_begin, gap_end)) = Self::missing_in(&inner, begin, end, self.length) {
            return Err(PdfError::MissingData {
                begin: gap_begin,
                end: gap_end,
            });
        }
        Ok(Bytes::copy_from_slice(&inner.data[begin..end]))
    }

    fn read_tail(&self, begin: usize) -> Result<(Bytes, bool)> {
        if begin >= self.length {
            return Ok((Bytes::new(), true));
        }
        let inner = self.inner.lock().unwrap();
        let first = begin / CHUNK_SIZE;
        if !inner.present[first] {
            return Err(PdfError::MissingData {
                begin: first * CHUNK_SIZE,
                end: ((first + 1) * CHUNK_SIZE).min(self.length),
            });
        }
        let mut chunk = first;
        while chunk + 1 < inner.present.len() && inner.present[chunk + 1] {
            chunk += 1;
        }
        let end = ((chunk + 1) * CHUNK_SIZE).min(self.length);
        Ok((
            Bytes::copy_from_slice(&inner.data[begin..end]),
            end == self.length,
        ))
    }

    fn first_missing_range(&self, begin: usize, end: usize) -> Option<(usize, usize)> {
        let inner = self.inner.lock().unwrap();
        Self::missing_in(&inner, begin, end, self.length)
    }

    fn feed(&self, offset: usize, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let end = (offset + data.len()).min(self.length);
        if offset >= end {
            return;
        }
        inner.data[offset..end].copy_from_slice(&data[..end - offset]);
        // Only chunks fully covered by delivered bytes count as present.
        let first = offset.div_ceil(CHUNK_SIZE).min(inner.present.len());
        let last = if end == self.length {
            inner.present.len()
        } else {
            end / CHUNK_SIZE
        };
        for chunk in first..last {
            inner.present[chunk] = true;
        }
        // An offset-0 feed covers chunk 0 even when shorter than one chunk,
        // as long as it reaches end-of-file.
        if offset == 0 && end == self.length && !inner.present.is_empty() {
            inner.present[0] = true;
        }
    }
}

/// The transport side of the missing-data loop: fetch a byte range.
pub trait RangeLoader {
    fn load(&mut self, begin: usize, end: usize) -> Result<Vec<u8>>;
}

impl<F> RangeLoader for F
where
    F: FnMut(usize, usize) -> Result<Vec<u8>>,
{
    fn load(&mut self, begin: usize, end: usize) -> Result<Vec<u8>> {
        self(begin, end)
    }
}

/// Run `op`, feeding each reported missing range through `loader` and
/// retrying, until it completes or fails with a real error.
pub fn fetch_with_retry<T>(
    source: &dyn ByteSource,
    loader: &mut dyn RangeLoader,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    loop {
        match op() {
            Err(PdfError::MissingData { begin, end }) => {
                let data = loader.load(begin, end)?;
                source.feed(begin, &data);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_source_never_missing() {
        let src = MemSource::new(&b"hello world"[..]);
        assert_eq!(src.read_at(0, 5).unwrap().as_ref(), b"hello");
        assert!(src.first_missing_range(0, 11).is_none());
        let (tail, complete) = src.read_tail(6).unwrap();
        assert_eq!(tail.as_ref(), b"world");
        assert!(complete);
    }

    #[test]
    fn test_chunked_source_reports_gap() {
        let src = ChunkedSource::new(CHUNK_SIZE * 3);
        let err = src.read_at(10, 20).unwrap_err();
        assert!(matches!(
            err,
            PdfError::MissingData { begin: 0, end } if end == CHUNK_SIZE
        ));

        src.feed(0, &vec![7u8; CHUNK_SIZE]);
        assert_eq!(src.read_at(10, 20).unwrap().as_ref(), &[7u8; 10][..]);

        // Second chunk still missing.
        let err = src.read_at(0, CHUNK_SIZE + 1).unwrap_err();
        assert!(matches!(err, PdfError::MissingData { begin, .. } if begin == CHUNK_SIZE));
    }

    #[test]
    fn test_chunked_tail_stops_at_gap() {
        let src = ChunkedSource::new(CHUNK_SIZE * 3);
        src.feed(0, &vec![1u8; CHUNK_SIZE]);
        let (tail, complete) = src.read_tail(100).unwrap();
        assert_eq!(tail.len(), CHUNK_SIZE - 100);
        assert!(!complete);
    }

    #[test]
    fn test_fetch_with_retry_feeds_and_retries() {
        let src = ChunkedSource::new(CHUNK_SIZE);
        let mut loads = Vec::new();
        let mut loader = |begin: usize, end: usize| {
            loads.push((begin, end));
            Ok(vec![9u8; end - begin])
        };
        let out = fetch_with_retry(&src, &mut loader, || src.read_at(5, 8)).unwrap();
        assert_eq!(out.as_ref(), &[9u8, 9, 9][..]);
        assert_eq!(loads, vec![(0, CHUNK_SIZE)]);
    }
}
