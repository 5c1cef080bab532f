//! Instrument header and envelope point layouts

use crate::MAX_ENVELOPE_POINTS;

/// Stored sample data format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// 16-bit signed little-endian PCM
    #[default]
    Pcm16,
    /// 4-bit IMA ADPCM, two samples per byte
    Adpcm,
}

impl SampleFormat {
    pub fn from_raw(raw: u8) -> Option<SampleFormat> {
        match raw {
            0 => Some(SampleFormat::Pcm16),
            1 => Some(SampleFormat::Adpcm),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            SampleFormat::Pcm16 => 0,
            SampleFormat::Adpcm => 1,
        }
    }

    /// Decoded samples per 256 stored bytes, over 256.
    ///
    /// Used by the sample-offset effect, which measures its parameter in
    /// 256-byte pages of stored data.
    pub fn compression_factor(self) -> u8 {
        match self {
            SampleFormat::Pcm16 => 1,
            SampleFormat::Adpcm => 2,
        }
    }
}

/// Fixed-size instrument header (36 bytes, little-endian).
///
/// One instrument = one sample plus playback parameters plus an optional
/// volume envelope. The engine caches one decoded header per channel and
/// re-fetches whenever a note names a new instrument.
///
/// ```text
/// 0x00  u32  sample data virtual address
/// 0x04  u32  sample data size (bytes)
/// 0x08  u32  loop start (samples)
/// 0x0C  u32  loop end (samples; 0 = no loop)
/// 0x10  u32  base sample rate (Hz at C-4)
/// 0x14  u32  envelope point table virtual address
/// 0x18  u16  fadeout rate (subtracted from the 16-bit fadeout per tick)
/// 0x1A  u8   envelope point count
/// 0x1B  u8   envelope sustain point
/// 0x1C  u8   envelope loop start point
/// 0x1D  u8   envelope loop end point
/// 0x1E  u8   envelope type (bit 0: on, bit 1: sustain, bit 2: loop)
/// 0x1F  u8   sample format (see SampleFormat)
/// 0x20  u8   compression factor
/// 0x21  i8   finetune (-128..127, 1/2 period unit steps)
/// 0x22  i8   relative note number (added to pattern notes)
/// 0x23  u8   default volume (0..=64)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstrumentHeader {
    pub sample_data: u32,
    pub sample_size: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    pub sample_rate: u32,
    pub envelope: EnvelopeHeader,
    pub fadeout: u16,
    pub format: u8,
    pub compression: u8,
    pub finetune: i8,
    pub relative_note: i8,
    pub volume: u8,
}

/// Envelope portion of an instrument header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub points: u32,
    pub n_points: u8,
    pub sustain_point: u8,
    pub loop_start_point: u8,
    pub loop_end_point: u8,
    pub ty: u8,
}

impl EnvelopeHeader {
    const TYPE_ON: u8 = 1 << 0;
    const TYPE_SUSTAIN: u8 = 1 << 1;
    const TYPE_LOOP: u8 = 1 << 2;

    pub fn is_enabled(&self) -> bool {
        self.ty & Self::TYPE_ON != 0 && self.n_points > 0
    }

    pub fn has_sustain(&self) -> bool {
        self.ty & Self::TYPE_SUSTAIN != 0
    }

    pub fn has_loop(&self) -> bool {
        self.ty & Self::TYPE_LOOP != 0
    }
}

impl InstrumentHeader {
    pub const SIZE: usize = 36;

    pub fn from_bytes(b: &[u8; Self::SIZE]) -> InstrumentHeader {
        InstrumentHeader {
            sample_data: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            sample_size: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            loop_start: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            loop_end: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
            sample_rate: u32::from_le_bytes([b[16], b[17], b[18], b[19]]),
            envelope: EnvelopeHeader {
                points: u32::from_le_bytes([b[20], b[21], b[22], b[23]]),
                n_points: b[26].min(MAX_ENVELOPE_POINTS as u8),
                sustain_point: b[27],
                loop_start_point: b[28],
                loop_end_point: b[29],
                ty: b[30],
            },
            fadeout: u16::from_le_bytes([b[24], b[25]]),
            format: b[31],
            compression: b[32],
            finetune: b[33] as i8,
            relative_note: b[34] as i8,
            volume: b[35],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..4].copy_from_slice(&self.sample_data.to_le_bytes());
        b[4..8].copy_from_slice(&self.sample_size.to_le_bytes());
        b[8..12].copy_from_slice(&self.loop_start.to_le_bytes());
        b[12..16].copy_from_slice(&self.loop_end.to_le_bytes());
        b[16..20].copy_from_slice(&self.sample_rate.to_le_bytes());
        b[20..24].copy_from_slice(&self.envelope.points.to_le_bytes());
        b[24..26].copy_from_slice(&self.fadeout.to_le_bytes());
        b[26] = self.envelope.n_points;
        b[27] = self.envelope.sustain_point;
        b[28] = self.envelope.loop_start_point;
        b[29] = self.envelope.loop_end_point;
        b[30] = self.envelope.ty;
        b[31] = self.format;
        b[32] = self.compression;
        b[33] = self.finetune as u8;
        b[34] = self.relative_note as u8;
        b[35] = self.volume;
        b
    }

    /// Decoded sample count.
    pub fn n_samples(&self) -> u32 {
        match SampleFormat::from_raw(self.format) {
            Some(SampleFormat::Pcm16) => self.sample_size / 2,
            Some(SampleFormat::Adpcm) => self.sample_size * 2,
            None => 0,
        }
    }
}

/// Tick offset of a packed envelope point (low 9 bits).
#[inline]
pub fn envelope_offset(point: u16) -> u16 {
    point & 0x01FF
}

/// Volume value of a packed envelope point (high 7 bits, 0..=64 expected).
#[inline]
pub fn envelope_value(point: u16) -> u16 {
    point >> 9
}

/// Pack an envelope point from a tick offset and a volume value.
pub fn pack_envelope_point(offset: u16, value: u16) -> u16 {
    (offset & 0x01FF) | (value << 9)
}
