//! Kiln-ADPCM: 4-bit IMA ADPCM codec
//!
//! **This is a pure codec** - it handles only compression/decompression of
//! mono sample data. There is no header, no magic, no sample rate; the
//! instrument header owns all of that.
//!
//! Each stored byte carries two samples, high nibble first. The decoder
//! state is two small integers ([`AdpcmState`]), so a player can snapshot
//! it at a loop point and restore it on loop wrap instead of re-decoding
//! from the start - that property is load-bearing for the sample reader.
//!
//! Compression is fixed 4:1 against 16-bit PCM.

mod decode;
mod encode;

pub use decode::{decode_block, Decoder};
pub use encode::encode;

/// Decoded samples per stored byte.
pub const SAMPLES_PER_BYTE: usize = 2;

/// IMA ADPCM step size table (89 entries).
pub(crate) const STEP_TABLE: [i16; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408, 449,
    494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066, 2272,
    2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630, 9493,
    10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794, 32767,
];

/// IMA ADPCM step index adjustment per nibble.
pub(crate) const INDEX_TABLE: [i8; 16] = [
    -1, -1, -1, -1, 2, 4, 6, 8, -1, -1, -1, -1, 2, 4, 6, 8,
];

/// Codec state: predictor and step index.
///
/// `Default` gives the initial state for sample offset zero. Copyable so
/// callers can checkpoint it (e.g. at a sample's loop start).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdpcmState {
    pub predictor: i16,
    pub step_index: u8,
}
