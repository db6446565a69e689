//! RunLengthDecode.

/// Decode RunLength-encoded data.
///
/// A length byte 0-127 copies the next length+1 bytes literally; 129-255
/// repeats the next byte 257-length times; 128 is the end-of-data marker.
/// Truncated input stops decoding without error.
pub fn run_length_decode(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let length = data[i];
        i += 1;

        match length {
            128 => break,
            0..=127 => {
                let count = length as usize + 1;
                if i + count <= data.len() {
                    result.extend_from_slice(&data[i..i + count]);
                    i += count;
                } else {
                    result.extend_from_slice(&data[i..]);
                    break;
                }
            }
            129..=255 => {
                if i < data.len() {
                    let count = 257 - length as usize;
                    let byte = data[i];
                    i += 1;
                    result.extend(std::iter::repeat_n(byte, count));
                }
            }
        }
    }

    result
}
