//! Pitch math and waveform tables
//!
//! Pitch is tracked in *periods*, the tracker-native inverse-pitch unit:
//! 64 periods per semitone, smaller period = higher pitch. Converting a
//! period to a playback rate needs `2^(x/768)`, which is done with a 16.16
//! fixed-point table built at compile time - no floating point anywhere in
//! the audio path.

/// Period of C-0 (note 1). Each semitone up subtracts 64.
pub const PERIOD_MAX_NOTE1: i32 = 7680;

/// Periods per semitone.
pub const PERIODS_PER_SEMITONE: i32 = 64;

/// Period at which a sample plays at its base rate (C-4, note 49).
pub const PERIOD_BASE: i32 = 4608;

/// Periods per octave.
pub const PERIODS_PER_OCTAVE: i32 = 768;

/// 16.16 values of `2^(b/768)` for each bit `b` of a table index.
///
/// `exp2_frac` multiplies these together for the set bits of its argument;
/// rounding each 16.16 product keeps the accumulated error under 0.1 cents
/// across the whole octave.
const EXP2_STEP: [u32; 10] = [
    65595, 65654, 65773, 66011, 66489, 67456, 69433, 73562, 82570, 104032,
];

const fn exp2_frac(i: u32) -> u32 {
    let mut acc: u64 = 1 << 16;
    let mut bit = 0;
    while bit < EXP2_STEP.len() {
        if i & (1 << bit) != 0 {
            acc = (acc * EXP2_STEP[bit] as u64 + (1 << 15)) >> 16;
        }
        bit += 1;
    }
    acc as u32
}

const fn build_exp2_table() -> [u32; 769] {
    let mut table = [0u32; 769];
    let mut i = 0;
    while i < table.len() {
        table[i] = exp2_frac(i as u32);
        i += 1;
    }
    table
}

/// `EXP2_TABLE[i]` = `2^(i/768)` in 16.16 fixed point, one octave inclusive.
pub(crate) const EXP2_TABLE: [u32; 769] = build_exp2_table();

/// Half sine wave for vibrato and tremolo, amplitude 0..=255.
///
/// One full wobble cycle is 64 phase steps; the second half reuses the
/// table with the sign flipped (see [`wobble_delta`]).
pub(crate) const SINE_TABLE: [u8; 32] = [
    0, 25, 50, 74, 98, 120, 142, 162, 180, 197, 212, 225, 236, 244, 250, 254, 255, 254, 250, 244,
    236, 225, 212, 197, 180, 162, 142, 120, 98, 74, 50, 25,
];

/// Period for a note (1..=96) with an instrument finetune.
///
/// Finetune is in half-period steps, matching the stored i8 range to
/// +/- one semitone.
pub fn note_to_period(note: u8, finetune: i8) -> i32 {
    let period =
        PERIOD_MAX_NOTE1 - (note as i32 - 1) * PERIODS_PER_SEMITONE - finetune as i32 / 2;
    period.max(1)
}

/// Playback rate in Hz for a period, given the sample's base rate at C-4.
pub fn period_to_hz(period: i32, base_rate: u32) -> u32 {
    let diff = PERIOD_BASE - period.max(1);
    let octave = diff.div_euclid(PERIODS_PER_OCTAVE);
    let frac = diff.rem_euclid(PERIODS_PER_OCTAVE) as usize;
    let scaled = (base_rate as u64 * EXP2_TABLE[frac] as u64) >> 16;
    let hz = if octave >= 0 {
        scaled << octave.min(16)
    } else {
        scaled >> ((-octave) as u32).min(63)
    };
    hz.min(u32::MAX as u64) as u32
}

/// Microseconds per sequencer tick at a given bpm.
///
/// The tracker convention: one tick is 1/24th of a beat-pair, i.e.
/// `2.5s / bpm`.
pub fn tick_interval_us(bpm: u16) -> u32 {
    2_500_000 / bpm.max(1) as u32
}

/// Signed vibrato/tremolo offset for a wobble phase and depth.
///
/// Phase wraps at 64 and covers both wave polarities; depth is the effect
/// nibble (0..=15).
pub fn wobble_delta(phase: u8, depth: u8) -> i32 {
    let phase = (phase & 0x3F) as usize;
    let delta = SINE_TABLE[phase % 32] as i32 * depth as i32 / 32;
    if phase >= 32 { -delta } else { delta }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exp2_table_endpoints() {
        assert_eq!(EXP2_TABLE[0], 1 << 16);
        // Full octave: within rounding of exactly 2.0
        assert!((EXP2_TABLE[768] as i64 - (2 << 16)).abs() <= 2);
        // Equal-tempered semitone
        let semitone = EXP2_TABLE[64] as f64 / 65536.0;
        assert!((semitone - 1.059463).abs() < 0.0001);
    }

    #[test]
    fn test_exp2_table_monotonic() {
        for w in EXP2_TABLE.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn test_c4_plays_at_base_rate() {
        assert_eq!(note_to_period(49, 0), PERIOD_BASE);
        assert_eq!(period_to_hz(PERIOD_BASE, 8363), 8363);
        assert_eq!(period_to_hz(PERIOD_BASE, 22050), 22050);
    }

    #[test]
    fn test_octaves_double() {
        let c4 = period_to_hz(note_to_period(49, 0), 8363);
        let c5 = period_to_hz(note_to_period(61, 0), 8363);
        let c3 = period_to_hz(note_to_period(37, 0), 8363);
        assert_eq!(c5, c4 * 2);
        // Downward octaves lose at most one Hz to truncation
        assert!((c3 as i64 - c4 as i64 / 2).abs() <= 1);
    }

    #[test]
    fn test_finetune_bends_pitch() {
        let flat = period_to_hz(note_to_period(49, -128), 8363);
        let sharp = period_to_hz(note_to_period(49, 127), 8363);
        let plain = period_to_hz(note_to_period(49, 0), 8363);
        assert!(flat < plain && plain < sharp);
    }

    #[test]
    fn test_period_floor() {
        // Periods never reach zero, even for absurd note/finetune pairs
        assert!(note_to_period(96, 127) >= 1);
        assert!(period_to_hz(0, 8363) > 0);
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(tick_interval_us(125), 20_000);
        assert_eq!(tick_interval_us(250), 10_000);
        // bpm 0 must not divide by zero
        assert_eq!(tick_interval_us(0), 2_500_000);
    }

    #[test]
    fn test_wobble_polarity() {
        assert_eq!(wobble_delta(0, 15), 0);
        assert_eq!(wobble_delta(32, 15), 0);
        assert!(wobble_delta(16, 15) > 0);
        assert!(wobble_delta(48, 15) < 0);
        assert_eq!(wobble_delta(16, 15), -wobble_delta(48, 15));
        // Depth zero silences the wobble entirely
        for phase in 0..64 {
            assert_eq!(wobble_delta(phase, 0), 0);
        }
    }
}
