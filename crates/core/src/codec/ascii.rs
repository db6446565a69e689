//! ASCII85Decode and ASCIIHexDecode.

use crate::error::Result;

/// Decode ASCII85-encoded data.
///
/// Handles the optional `<~` prefix, the `~>` end marker, embedded
/// whitespace, the `z` shorthand for four zero bytes, and a trailing
/// partial group (padded with `u`, keeping `len - 1` output bytes).
pub fn ascii85_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut input = data;
    if input.starts_with(b"<~") {
        input = &input[2..];
    }
    if let Some(pos) = input.iter().position(|&c| c == b'~') {
        input = &input[..pos];
    }

    let mut out = Vec::with_capacity(input.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut n = 0usize;

    for &b in input {
        if b.is_ascii_whitespace() || b == 0 {
            continue;
        }
        if b == b'z' && n == 0 {
            out.extend_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        group[n] = b;
        n += 1;
        if n == 5 {
            let mut value: u32 = 0;
            for &c in &group {
                value = value.wrapping_mul(85).wrapping_add((c - b'!') as u32);
            }
            out.extend_from_slice(&value.to_be_bytes());
            n = 0;
        }
    }

    if n > 0 {
        // Partial group: pad with 'u' and keep n-1 bytes.
        for slot in group.iter_mut().skip(n) {
            *slot = b'u';
        }
        let mut value: u32 = 0;
        for &c in &group {
            value = value.wrapping_mul(85).wrapping_add((c - b'!') as u32);
        }
        let bytes = value.to_be_bytes();
        out.extend_from_slice(&bytes[..n - 1]);
    }

    Ok(out)
}

/// Decode ASCIIHex-encoded data.
///
/// Skips whitespace, stops at `>`, and pads an odd trailing nibble with
/// zero (so `7>` decodes as 0x70).
pub fn asciihex_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;

    for &b in data {
        if b == b'>' {
            break;
        }
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => continue,
        };
        match high.take() {
            None => high = Some(digit),
            Some(h) => out.push((h << 4) | digit),
        }
    }

    if let Some(h) = high {
        out.push(h << 4);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii85_hello() {
        let decoded = ascii85_decode(b"87cURD_*#-6q/;CDfTZ)~>").unwrap();
        assert_eq!(decoded, b"Hello, PDF world");
    }

    #[test]
    fn test_ascii85_z_shorthand() {
        assert_eq!(ascii85_decode(b"z~>").unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_ascii85_partial_group() {
        // "87cUR" -> "Hell", the 2-char tail "/c" contributes one byte.
        let decoded = ascii85_decode(b"87cUR/c~>").unwrap();
        assert_eq!(decoded, b"Hell.");
    }

    #[test]
    fn test_ascii85_whitespace_tolerant() {
        let with_ws = ascii85_decode(b"87cUR D_*#- 6q/;C\nDfTZ)~>").unwrap();
        assert_eq!(with_ws, b"Hello, PDF world");
    }

    #[test]
    fn test_asciihex_basic() {
        assert_eq!(asciihex_decode(b"48656C6C6F>").unwrap(), b"Hello");
        assert_eq!(asciihex_decode(b"48 65 6c 6c 6f>").unwrap(), b"Hello");
    }

    #[test]
    fn test_asciihex_odd_pads_zero() {
        assert_eq!(asciihex_decode(b"7>").unwrap(), vec![0x70]);
    }
}
