//! Stream filter decoders.
//!
//! Implements the filters the engine needs to read cross-reference streams,
//! object streams, content streams and image data:
//! - `flate` - FlateDecode (zlib) with PNG predictor support
//! - `lzw` - LZWDecode
//! - `ascii` - ASCII85Decode and ASCIIHexDecode
//! - `runlength` - RunLengthDecode
//!
//! Filter selection and DecodeParms resolution happen in the document layer;
//! everything here is a pure bytes-in/bytes-out function.

pub mod ascii;
pub mod flate;
pub mod lzw;
pub mod runlength;

pub use ascii::{ascii85_decode, asciihex_decode};
pub use flate::{apply_png_predictor, flate_decode};
pub use lzw::{lzw_decode, lzw_decode_with_earlychange};
pub use runlength::run_length_decode;
