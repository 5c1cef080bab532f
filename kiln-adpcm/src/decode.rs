//! ADPCM decoding

use crate::{AdpcmState, INDEX_TABLE, STEP_TABLE};

/// Streaming nibble decoder.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    state: AdpcmState,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder::default()
    }

    /// Resume from a previously captured state.
    pub fn from_state(state: AdpcmState) -> Decoder {
        Decoder { state }
    }

    /// Current state, for checkpointing.
    pub fn state(&self) -> AdpcmState {
        self.state
    }

    /// Decode one 4-bit code into a sample.
    pub fn decode_nibble(&mut self, nibble: u8) -> i16 {
        let nibble = nibble & 0x0F;
        let step = STEP_TABLE[self.state.step_index as usize] as i32;

        // diff = (step / 8) + (step / 4) * b0 + (step / 2) * b1 + step * b2
        let mut diff = step >> 3;
        if nibble & 1 != 0 {
            diff += step >> 2;
        }
        if nibble & 2 != 0 {
            diff += step >> 1;
        }
        if nibble & 4 != 0 {
            diff += step;
        }
        if nibble & 8 != 0 {
            diff = -diff;
        }

        let predictor = (self.state.predictor as i32 + diff).clamp(-32768, 32767);
        self.state.predictor = predictor as i16;

        let index = self.state.step_index as i32 + INDEX_TABLE[nibble as usize] as i32;
        self.state.step_index = index.clamp(0, STEP_TABLE.len() as i32 - 1) as u8;

        self.state.predictor
    }

    /// Decode one byte (two samples, high nibble first).
    #[inline]
    pub fn decode_byte(&mut self, byte: u8) -> (i16, i16) {
        (self.decode_nibble(byte >> 4), self.decode_nibble(byte))
    }
}

/// Decode a whole block to at most `n_samples` samples.
pub fn decode_block(data: &[u8], n_samples: usize) -> Vec<i16> {
    let mut dec = Decoder::new();
    let mut out = Vec::with_capacity(n_samples);
    for &byte in data {
        let (a, b) = dec.decode_byte(byte);
        out.push(a);
        if out.len() == n_samples {
            break;
        }
        out.push(b);
        if out.len() == n_samples {
            break;
        }
    }
    out
}
