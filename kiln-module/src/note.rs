//! Note decoding, cleanup and encoding

use crate::{NO_EFFECT, NO_INSTRUMENT, NO_NOTE, NO_VOLUME, NOTE_OFF};

/// Maximum bytes one stored note can occupy.
///
/// Five raw bytes uncompressed; a compact note carrying all five fields
/// would be six, but the asset pipeline never emits that (it verifies the
/// compact form is only used when it saves space). Readers still budget for
/// six, following Postel's Law.
pub const MAX_ENCODED_SIZE: usize = 6;

/// One decoded pattern note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    /// 1..=96 playable, 97 = key-off, 0xFF = none
    pub note: u8,
    /// 0-based instrument index, 0xFF = none
    pub instrument: u8,
    /// Raw volume column byte, 0xFF = none
    pub volume: u8,
    /// Effect type byte, 0xFF = none
    pub effect_type: u8,
    /// Effect parameter byte
    pub effect_param: u8,
}

impl Default for Note {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Note {
    /// A note carrying nothing.
    pub const EMPTY: Note = Note {
        note: NO_NOTE,
        instrument: NO_INSTRUMENT,
        volume: NO_VOLUME,
        effect_type: NO_EFFECT,
        effect_param: 0,
    };

    /// Decode one note from the head of `buf`.
    ///
    /// Returns the note and the number of bytes consumed, or `None` if the
    /// buffer is too short for the encoding it starts with. Fields absent
    /// from a compact note get their sentinels, except the effect parameter
    /// which defaults to zero (the format stores a parameter without a type
    /// for bare arpeggios, see [`Note::clean`]).
    pub fn decode(buf: &[u8]) -> Option<(Note, usize)> {
        let &enc = buf.first()?;
        if enc & 0x80 == 0 {
            // Raw form: all five fields.
            if buf.len() < 5 {
                return None;
            }
            let note = Note {
                note: buf[0],
                instrument: buf[1],
                volume: buf[2],
                effect_type: buf[3],
                effect_param: buf[4],
            };
            return Some((note, 5));
        }

        // Bits 5-6 set means the pattern is likely corrupt, but the size
        // formula masks them off and the fields still land in order, so
        // decode proceeds (Postel's Law).
        let size = (enc & 0x9F).count_ones() as usize;
        if buf.len() < size {
            return None;
        }
        let mut at = 1;
        let mut field = |present: bool, absent: u8| {
            if present {
                at += 1;
                buf[at - 1]
            } else {
                absent
            }
        };
        let note = Note {
            note: field(enc & (1 << 0) != 0, NO_NOTE),
            instrument: field(enc & (1 << 1) != 0, NO_INSTRUMENT),
            volume: field(enc & (1 << 2) != 0, NO_VOLUME),
            effect_type: field(enc & (1 << 3) != 0, NO_EFFECT),
            effect_param: field(enc & (1 << 4) != 0, 0),
        };
        Some((note, size))
    }

    /// Apply the format's cleanup rules in place.
    ///
    /// - note numbers past key-off clamp to key-off; zero means none
    /// - instrument indices out of range become none
    /// - volume column dead zones (0x00-0x0F, 0x51-0x5F, and the panning
    ///   band 0xC0-0xEF, which this engine does not implement) collapse to
    ///   the no-value sentinel
    /// - a parameter with no effect type selects arpeggio, an encoding
    ///   quirk kept for compatibility
    pub fn clean(&mut self, n_instruments: u16) {
        if self.note == 0 {
            self.note = NO_NOTE;
        }
        if self.note != NO_NOTE && self.note > NOTE_OFF {
            self.note = NOTE_OFF;
        }

        if self.instrument != NO_INSTRUMENT && self.instrument as u16 >= n_instruments {
            self.instrument = NO_INSTRUMENT;
        }

        if self.volume <= 0x0F
            || (0x51..=0x5F).contains(&self.volume)
            || (0xC0..=0xEF).contains(&self.volume)
        {
            self.volume = NO_VOLUME;
        }

        if self.effect_type == NO_EFFECT && self.effect_param != 0 {
            self.effect_type = 0; // arpeggio
        }
    }

    /// Encode into `out`, using the compact form when it saves space.
    ///
    /// Returns the number of bytes written.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> usize {
        let mut enc = 0x80u8;
        let mut fields = [0u8; 5];
        let mut n = 0;
        let mut put = |bit: u8, value: u8, absent: u8| {
            if value != absent {
                enc |= 1 << bit;
                fields[n] = value;
                n += 1;
            }
        };
        put(0, self.note, NO_NOTE);
        put(1, self.instrument, NO_INSTRUMENT);
        put(2, self.volume, NO_VOLUME);
        put(3, self.effect_type, NO_EFFECT);
        put(4, self.effect_param, 0);

        // The raw form is only unambiguous while the note byte's top bit is
        // clear; a missing note (0xFF) must go compact even when that is no
        // shorter.
        if n + 1 < 5 || self.note & 0x80 != 0 {
            out.push(enc);
            out.extend_from_slice(&fields[..n]);
            n + 1
        } else {
            out.extend_from_slice(&[
                self.note,
                self.instrument,
                self.volume,
                self.effect_type,
                self.effect_param,
            ]);
            5
        }
    }

    #[inline]
    pub fn has_note(&self) -> bool {
        self.note >= 1 && self.note <= crate::NOTE_MAX
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        self.note == NOTE_OFF
    }

    #[inline]
    pub fn has_instrument(&self) -> bool {
        self.instrument != NO_INSTRUMENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_raw() {
        let buf = [49, 2, 0x30, 0x0A, 0x12];
        let (note, used) = Note::decode(&buf).unwrap();
        assert_eq!(used, 5);
        assert_eq!(note.note, 49);
        assert_eq!(note.instrument, 2);
        assert_eq!(note.volume, 0x30);
        assert_eq!(note.effect_type, 0x0A);
        assert_eq!(note.effect_param, 0x12);
    }

    #[test]
    fn test_decode_compact() {
        // Note + effect type only
        let buf = [0x80 | 0x01 | 0x08, 52, 0x0D];
        let (note, used) = Note::decode(&buf).unwrap();
        assert_eq!(used, 3);
        assert_eq!(note.note, 52);
        assert_eq!(note.instrument, NO_INSTRUMENT);
        assert_eq!(note.volume, NO_VOLUME);
        assert_eq!(note.effect_type, 0x0D);
        assert_eq!(note.effect_param, 0);
    }

    #[test]
    fn test_decode_empty_compact() {
        let (note, used) = Note::decode(&[0x80, 99, 99]).unwrap();
        assert_eq!(used, 1);
        assert_eq!(note, Note::EMPTY);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(Note::decode(&[]).is_none());
        assert!(Note::decode(&[0x83, 49]).is_none());
        assert!(Note::decode(&[49, 2, 0x30]).is_none());
    }

    #[test]
    fn test_decode_tolerates_reserved_bits() {
        // Bits 5-6 set: likely corrupt, but size must follow the 0x9F mask
        let buf = [0x80 | 0x60 | 0x01, 49];
        let (note, used) = Note::decode(&buf).unwrap();
        assert_eq!(used, 2);
        assert_eq!(note.note, 49);
    }

    #[test]
    fn test_clean_note_range() {
        let mut note = Note {
            note: 120,
            ..Note::EMPTY
        };
        note.clean(1);
        assert_eq!(note.note, NOTE_OFF);

        let mut none = Note::EMPTY;
        none.clean(1);
        assert_eq!(none.note, NO_NOTE);

        let mut zero = Note {
            note: 0,
            ..Note::EMPTY
        };
        zero.clean(1);
        assert_eq!(zero.note, NO_NOTE);
    }

    #[test]
    fn test_clean_instrument_range() {
        let mut note = Note {
            instrument: 4,
            ..Note::EMPTY
        };
        note.clean(4);
        assert_eq!(note.instrument, NO_INSTRUMENT);

        let mut ok = Note {
            instrument: 3,
            ..Note::EMPTY
        };
        ok.clean(4);
        assert_eq!(ok.instrument, 3);
    }

    #[test]
    fn test_clean_volume_dead_zones() {
        for v in [0x00, 0x0F, 0x51, 0x5F, 0xC0, 0xEF] {
            let mut note = Note {
                volume: v,
                ..Note::EMPTY
            };
            note.clean(1);
            assert_eq!(note.volume, NO_VOLUME, "0x{:02x} should clean to none", v);
        }
        for v in [0x10, 0x50, 0x60, 0xF0] {
            let mut note = Note {
                volume: v,
                ..Note::EMPTY
            };
            note.clean(1);
            assert_eq!(note.volume, v, "0x{:02x} should survive", v);
        }
    }

    #[test]
    fn test_clean_bare_param_selects_arpeggio() {
        let mut note = Note {
            effect_param: 0x47,
            ..Note::EMPTY
        };
        note.clean(1);
        assert_eq!(note.effect_type, 0);
        assert_eq!(note.effect_param, 0x47);
    }

    #[test]
    fn test_roundtrip() {
        let cases = [
            Note::EMPTY,
            Note {
                note: 49,
                instrument: 0,
                volume: 0x40,
                effect_type: NO_EFFECT,
                effect_param: 0,
            },
            Note {
                note: 97,
                ..Note::EMPTY
            },
            Note {
                note: 49,
                instrument: 1,
                volume: 0x30,
                effect_type: 0x0D,
                effect_param: 0x23,
            },
            // Four fields but no note: must not emit a raw form starting 0xFF
            Note {
                instrument: 1,
                volume: 0x30,
                effect_type: 0x0A,
                effect_param: 0x12,
                ..Note::EMPTY
            },
        ];
        for case in cases {
            let mut buf = Vec::new();
            let written = case.encode_into(&mut buf);
            assert_eq!(written, buf.len());
            let (decoded, used) = Note::decode(&buf).unwrap();
            assert_eq!(used, written);
            assert_eq!(decoded, case);
        }
    }

    #[test]
    fn test_encode_prefers_smaller_form() {
        // All five fields set: raw form, 5 bytes
        let full = Note {
            note: 49,
            instrument: 1,
            volume: 0x30,
            effect_type: 0x0A,
            effect_param: 0x21,
        };
        let mut buf = Vec::new();
        assert_eq!(full.encode_into(&mut buf), 5);
        assert_eq!(buf[0] & 0x80, 0);

        // Single field: compact, 2 bytes
        let sparse = Note {
            note: 49,
            ..Note::EMPTY
        };
        buf.clear();
        assert_eq!(sparse.encode_into(&mut buf), 2);
        assert_eq!(buf[0], 0x81);
    }
}
