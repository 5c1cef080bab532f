//! ADPCM encoding

use crate::{AdpcmState, INDEX_TABLE, STEP_TABLE};

/// Encode one sample against the running state, returning the 4-bit code.
fn encode_sample(state: &mut AdpcmState, sample: i16) -> u8 {
    let step = STEP_TABLE[state.step_index as usize] as i32;
    let mut diff = sample as i32 - state.predictor as i32;

    let mut nibble = 0u8;
    if diff < 0 {
        nibble |= 8;
        diff = -diff;
    }
    if diff >= step {
        nibble |= 4;
        diff -= step;
    }
    if diff >= step >> 1 {
        nibble |= 2;
        diff -= step >> 1;
    }
    if diff >= step >> 2 {
        nibble |= 1;
    }

    // Update the predictor by running the decoder's reconstruction, so
    // encoder and decoder states stay in lockstep.
    let step = STEP_TABLE[state.step_index as usize] as i32;
    let mut rebuilt = step >> 3;
    if nibble & 1 != 0 {
        rebuilt += step >> 2;
    }
    if nibble & 2 != 0 {
        rebuilt += step >> 1;
    }
    if nibble & 4 != 0 {
        rebuilt += step;
    }
    if nibble & 8 != 0 {
        rebuilt = -rebuilt;
    }
    state.predictor = (state.predictor as i32 + rebuilt).clamp(-32768, 32767) as i16;

    let index = state.step_index as i32 + INDEX_TABLE[nibble as usize] as i32;
    state.step_index = index.clamp(0, STEP_TABLE.len() as i32 - 1) as u8;

    nibble
}

/// Encode PCM samples, two per output byte, high nibble first.
///
/// An odd trailing sample is padded with a repeat of itself.
pub fn encode(samples: &[i16]) -> Vec<u8> {
    let mut state = AdpcmState::default();
    let mut out = Vec::with_capacity(samples.len().div_ceil(2));
    for pair in samples.chunks(2) {
        let hi = encode_sample(&mut state, pair[0]);
        let lo = encode_sample(&mut state, *pair.get(1).unwrap_or(&pair[0]));
        out.push((hi << 4) | lo);
    }
    out
}
