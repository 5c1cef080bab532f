//! Effect command decoding
//!
//! The stored form is a type byte plus a parameter byte. [`Effect`] turns
//! that pair into a tagged variant so the sequencer dispatches on an enum
//! instead of raw integers. Parameters are kept raw (nibble splitting and
//! "zero means reuse last" memory are playback semantics, not format
//! semantics, and live in the sequencer).

use crate::NO_EFFECT;

/// A decoded effect command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Effect {
    #[default]
    None,
    /// 0x00: cycle base note / +hi nibble / +lo nibble each tick
    Arpeggio(u8),
    /// 0x01: slide pitch up every tick after the first
    PortaUp(u8),
    /// 0x02: slide pitch down every tick after the first
    PortaDown(u8),
    /// 0x03: glide toward the row's note
    TonePorta(u8),
    /// 0x04: pitch wobble
    Vibrato(u8),
    /// 0x05: continue tone portamento, param is a volume slide
    TonePortaVolSlide(u8),
    /// 0x06: continue vibrato, param is a volume slide
    VibratoVolSlide(u8),
    /// 0x07: volume wobble
    Tremolo(u8),
    /// 0x09: start sample playback at an offset (tick 0 only)
    SampleOffset(u8),
    /// 0x0A: per-tick volume slide, nibbles are up/down
    VolumeSlide(u8),
    /// 0x0B: jump to a phrase (tick 0 only)
    PositionJump(u8),
    /// 0x0C: set channel volume (tick 0 only)
    SetVolume(u8),
    /// 0x0D: break to a row of the next phrase, decimal-nibble encoded
    PatternBreak(u8),
    /// 0x0F: param <= 32 sets tempo (ticks/row), else bpm
    SetTempoBpm(u8),
    /// 0x10 (Gxx): set global volume
    SetGlobalVolume(u8),
    /// 0x11 (Hxy): per-tick global volume slide
    GlobalVolumeSlide(u8),
    /// 0x15 (Lxx): jump the volume envelope cursor
    SetEnvelopePos(u8),
    /// 0x1B (Rxy): retrigger every y ticks with volume slide x
    Retrigger(u8),
    /// 0x1D (Txy): gate the note on for x ticks, off for y
    Tremor(u8),
    /// 0xE1: one-shot pitch slide up at tick 0
    FinePortaUp(u8),
    /// 0xE2: one-shot pitch slide down at tick 0
    FinePortaDown(u8),
    /// 0xE4: select vibrato waveform
    VibratoWaveform(u8),
    /// 0xE6: x=0 marks the loop start row, x>0 loops back x times
    PatternLoop(u8),
    /// 0xE7: select tremolo waveform
    TremoloWaveform(u8),
    /// 0xE9: retrigger every x ticks, no volume slide
    RetriggerShort(u8),
    /// 0xEA: one-shot volume slide up at tick 0
    FineVolumeUp(u8),
    /// 0xEB: one-shot volume slide down at tick 0
    FineVolumeDown(u8),
    /// 0xEC: silence the channel at tick x
    NoteCut(u8),
    /// 0xED: delay the row's note until tick x
    NoteDelay(u8),
    /// 0xEE: repeat the current row x extra times
    PatternDelay(u8),
    /// Anything this engine does not interpret. Never fatal.
    Unknown { ty: u8, param: u8 },
}

impl Effect {
    /// Decode a stored (type, parameter) pair.
    pub fn from_raw(ty: u8, param: u8) -> Effect {
        match ty {
            NO_EFFECT => Effect::None,
            0x00 => Effect::Arpeggio(param),
            0x01 => Effect::PortaUp(param),
            0x02 => Effect::PortaDown(param),
            0x03 => Effect::TonePorta(param),
            0x04 => Effect::Vibrato(param),
            0x05 => Effect::TonePortaVolSlide(param),
            0x06 => Effect::VibratoVolSlide(param),
            0x07 => Effect::Tremolo(param),
            0x09 => Effect::SampleOffset(param),
            0x0A => Effect::VolumeSlide(param),
            0x0B => Effect::PositionJump(param),
            0x0C => Effect::SetVolume(param),
            0x0D => Effect::PatternBreak(param),
            0x0F => Effect::SetTempoBpm(param),
            0x10 => Effect::SetGlobalVolume(param),
            0x11 => Effect::GlobalVolumeSlide(param),
            0x15 => Effect::SetEnvelopePos(param),
            0x1B => Effect::Retrigger(param),
            0x1D => Effect::Tremor(param),
            0x0E => match param >> 4 {
                0x1 => Effect::FinePortaUp(param & 0x0F),
                0x2 => Effect::FinePortaDown(param & 0x0F),
                0x4 => Effect::VibratoWaveform(param & 0x0F),
                0x6 => Effect::PatternLoop(param & 0x0F),
                0x7 => Effect::TremoloWaveform(param & 0x0F),
                0x9 => Effect::RetriggerShort(param & 0x0F),
                0xA => Effect::FineVolumeUp(param & 0x0F),
                0xB => Effect::FineVolumeDown(param & 0x0F),
                0xC => Effect::NoteCut(param & 0x0F),
                0xD => Effect::NoteDelay(param & 0x0F),
                0xE => Effect::PatternDelay(param & 0x0F),
                _ => Effect::Unknown { ty, param },
            },
            _ => Effect::Unknown { ty, param },
        }
    }

    /// True for commands that act on the song rather than the carrying
    /// channel: navigation, tempo and global volume. A silent channel can
    /// still carry one of these.
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            Effect::PositionJump(_)
                | Effect::PatternBreak(_)
                | Effect::SetTempoBpm(_)
                | Effect::SetGlobalVolume(_)
                | Effect::GlobalVolumeSlide(_)
                | Effect::PatternLoop(_)
                | Effect::PatternDelay(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_effects() {
        assert_eq!(Effect::from_raw(NO_EFFECT, 0), Effect::None);
        assert_eq!(Effect::from_raw(0x00, 0x47), Effect::Arpeggio(0x47));
        assert_eq!(Effect::from_raw(0x0D, 0x23), Effect::PatternBreak(0x23));
        assert_eq!(Effect::from_raw(0x0F, 0x7D), Effect::SetTempoBpm(0x7D));
    }

    #[test]
    fn test_sub_effects() {
        assert_eq!(Effect::from_raw(0x0E, 0x6A), Effect::PatternLoop(0x0A));
        assert_eq!(Effect::from_raw(0x0E, 0x93), Effect::RetriggerShort(0x03));
        assert_eq!(Effect::from_raw(0x0E, 0xC2), Effect::NoteCut(0x02));
        assert_eq!(Effect::from_raw(0x0E, 0xD1), Effect::NoteDelay(0x01));
    }

    #[test]
    fn test_global_commands_flagged() {
        assert!(Effect::from_raw(0x0B, 0x01).is_global());
        assert!(Effect::from_raw(0x0D, 0x23).is_global());
        assert!(Effect::from_raw(0x0F, 0x06).is_global());
        assert!(Effect::from_raw(0x10, 0x20).is_global());
        assert!(Effect::from_raw(0x0E, 0x62).is_global());
        assert!(Effect::from_raw(0x0E, 0xE2).is_global());
        assert!(!Effect::from_raw(0x00, 0x47).is_global());
        assert!(!Effect::from_raw(0x0C, 0x40).is_global());
        assert!(!Effect::None.is_global());
    }

    #[test]
    fn test_unknown_preserved() {
        // Panning (0x08) is not implemented; it must round-trip into Unknown
        assert_eq!(
            Effect::from_raw(0x08, 0x80),
            Effect::Unknown { ty: 0x08, param: 0x80 }
        );
        assert_eq!(
            Effect::from_raw(0x0E, 0x31),
            Effect::Unknown { ty: 0x0E, param: 0x31 }
        );
        assert_eq!(
            Effect::from_raw(0x2A, 0x00),
            Effect::Unknown { ty: 0x2A, param: 0x00 }
        );
    }
}
