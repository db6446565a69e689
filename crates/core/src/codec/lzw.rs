//! LZWDecode via the weezl crate.

use weezl::{BitOrder, decode::Decoder};

/// Decode LZW data with the PDF defaults (MSB-first, 8-bit, EarlyChange 1).
pub fn lzw_decode(data: &[u8]) -> Vec<u8> {
    lzw_decode_with_earlychange(data, 1)
}

/// Decode LZW data honoring the DecodeParms EarlyChange setting.
///
/// EarlyChange 0 switches code sizes one code later (the TIFF convention).
/// Corrupt input yields whatever decoded before the failure point.
pub fn lzw_decode_with_earlychange(data: &[u8], early_change: i64) -> Vec<u8> {
    let mut decoder = if early_change == 0 {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };
    let mut output = Vec::new();
    let _ = decoder.into_vec(&mut output).decode(data);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lzw_known_vector() {
        // Classic sample from the PDF reference: expands to "-----A---B".
        let data = [0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01];
        assert_eq!(lzw_decode(&data), b"-----A---B");
    }

    #[test]
    fn test_lzw_garbage_is_partial() {
        let out = lzw_decode(&[0xFF, 0xFF, 0xFF]);
        assert!(out.len() < 16);
    }
}
