//! FlateDecode (zlib) and the PNG predictor pass.

use std::io::Read;

use flate2::read::ZlibDecoder;
use flate2::{Decompress, FlushDecompress, Status};

use crate::error::Result;

/// Decode zlib-compressed data.
///
/// Corrupt streams are common in the wild (truncated tails, bad checksums).
/// When the strict decoder fails, decoding restarts byte-by-byte and keeps
/// whatever output was produced before the failure point.
pub fn flate_decode(data: &[u8]) -> Vec<u8> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    if decoder.read_to_end(&mut decompressed).is_err() {
        decompressed = decompress_corrupted(data);
    }
    decompressed
}

/// Best-effort zlib decompression for corrupted streams.
///
/// Returns partial output up to the point the decoder fails, which is often
/// a CRC error near the end of an otherwise usable stream.
fn decompress_corrupted(data: &[u8]) -> Vec<u8> {
    let mut decoder = Decompress::new(true);
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut buf = [0u8; 4096];
    let mut i = 0usize;
    while i < data.len() {
        let before_out = decoder.total_out();
        let before_in = decoder.total_in();
        let res = decoder.decompress(&data[i..i + 1], &mut buf, FlushDecompress::None);
        let produced = (decoder.total_out() - before_out) as usize;
        if produced > 0 {
            out.extend_from_slice(&buf[..produced]);
        }
        let consumed = (decoder.total_in() - before_in) as usize;
        i += consumed.max(1);
        match res {
            Ok(Status::StreamEnd) | Err(_) => break,
            Ok(_) => {}
        }
    }
    out
}

/// Reverse PNG row prediction (Predictor >= 10).
///
/// Each row is prefixed by one filter-type byte; the remaining bytes are
/// reconstructed against the previous row and the pixel to the left.
pub fn apply_png_predictor(
    data: &[u8],
    columns: usize,
    colors: usize,
    bits_per_component: usize,
) -> Result<Vec<u8>> {
    let row_bytes = colors * columns * bits_per_component / 8;
    let bpp = std::cmp::max(1, colors * bits_per_component / 8);
    let row_size = row_bytes + 1;

    let mut result = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_bytes];

    for row_start in (0..data.len()).step_by(row_size) {
        if row_start + row_size > data.len() {
            break;
        }

        let filter_type = data[row_start];
        let row_data = &data[row_start + 1..row_start + row_size];
        let mut current_row = vec![0u8; row_bytes];

        match filter_type {
            0 => {
                current_row.copy_from_slice(row_data);
            }
            1 => {
                // Sub: left neighbor.
                for i in 0..row_bytes {
                    let left = if i >= bpp { current_row[i - bpp] } else { 0 };
                    current_row[i] = row_data[i].wrapping_add(left);
                }
            }
            2 => {
                // Up: byte above.
                for i in 0..row_bytes {
                    current_row[i] = row_data[i].wrapping_add(prev_row[i]);
                }
            }
            3 => {
                // Average of left and above.
                for i in 0..row_bytes {
                    let left = if i >= bpp { current_row[i - bpp] as u16 } else { 0 };
                    let above = prev_row[i] as u16;
                    current_row[i] = row_data[i].wrapping_add(((left + above) / 2) as u8);
                }
            }
            4 => {
                for i in 0..row_bytes {
                    let left = if i >= bpp { current_row[i - bpp] } else { 0 };
                    let above = prev_row[i];
                    let upper_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
                    let paeth = paeth_predictor(left, above, upper_left);
                    current_row[i] = row_data[i].wrapping_add(paeth);
                }
            }
            _ => {
                // Unknown filter type, keep the row as-is.
                current_row.copy_from_slice(row_data);
            }
        }

        result.extend_from_slice(&current_row);
        prev_row = current_row;
    }

    Ok(result)
}

/// Paeth predictor function used in PNG filtering.
const fn paeth_predictor(left: u8, above: u8, upper_left: u8) -> u8 {
    let a = left as i32;
    let b = above as i32;
    let c = upper_left as i32;
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        above
    } else {
        upper_left
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_flate_roundtrip() {
        let original = b"stream content with some repetition repetition repetition";
        let compressed = zlib_compress(original);
        assert_eq!(flate_decode(&compressed), original);
    }

    #[test]
    fn test_flate_truncated_keeps_prefix() {
        let original = vec![7u8; 4096];
        let compressed = zlib_compress(&original);
        let cut = &compressed[..compressed.len() - 6];
        let out = flate_decode(cut);
        assert!(!out.is_empty());
        assert!(out.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_png_predictor_up() {
        // Two rows of 3 bytes, filter type 2 (Up).
        let data = [2, 1, 2, 3, 2, 1, 1, 1];
        let out = apply_png_predictor(&data, 3, 1, 8).unwrap();
        assert_eq!(out, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_predictor_sub() {
        let data = [1, 10, 10, 10];
        let out = apply_png_predictor(&data, 3, 1, 8).unwrap();
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[test]
    fn test_png_predictor_paeth() {
        // Single row: Paeth with no previous row degenerates to Sub.
        let data = [4, 5, 5, 5];
        let out = apply_png_predictor(&data, 3, 1, 8).unwrap();
        assert_eq!(out, vec![5, 10, 15]);
    }
}
