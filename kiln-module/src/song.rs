//! Song and pattern header layouts

/// Fixed-size song header (32 bytes, little-endian).
///
/// The sequencer copies this once at `play()` and keeps the copy; the
/// tables it points at are re-fetched through the store for every access.
///
/// ```text
/// 0x00  u32  pattern-order table virtual address (one u8 per phrase)
/// 0x04  u16  pattern-order table length (phrases)
/// 0x06  u16  restart position (phrase index to wrap to when looping)
/// 0x08  u32  pattern header table virtual address
/// 0x0C  u32  instrument header table virtual address
/// 0x10  u16  pattern count
/// 0x12  u16  instrument count
/// 0x14  u8   channel count
/// 0x15  u8   flags (bit 0: loop at end of order table)
/// 0x16  u16  initial tempo (ticks per row)
/// 0x18  u16  initial bpm
/// 0x1A  u8   initial global volume (0..=64)
/// 0x1B  -    reserved (5 bytes)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SongHeader {
    pub pattern_order: u32,
    pub pattern_order_len: u16,
    pub restart_position: u16,
    pub patterns: u32,
    pub instruments: u32,
    pub n_patterns: u16,
    pub n_instruments: u16,
    pub n_channels: u8,
    pub flags: u8,
    pub tempo: u16,
    pub bpm: u16,
    pub volume: u8,
}

impl SongHeader {
    pub const SIZE: usize = 32;

    const FLAG_LOOP: u8 = 1 << 0;

    pub fn from_bytes(b: &[u8; Self::SIZE]) -> SongHeader {
        SongHeader {
            pattern_order: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            pattern_order_len: u16::from_le_bytes([b[4], b[5]]),
            restart_position: u16::from_le_bytes([b[6], b[7]]),
            patterns: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            instruments: u32::from_le_bytes([b[12], b[13], b[14], b[15]]),
            n_patterns: u16::from_le_bytes([b[16], b[17]]),
            n_instruments: u16::from_le_bytes([b[18], b[19]]),
            n_channels: b[20],
            flags: b[21],
            tempo: u16::from_le_bytes([b[22], b[23]]),
            bpm: u16::from_le_bytes([b[24], b[25]]),
            volume: b[26],
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..4].copy_from_slice(&self.pattern_order.to_le_bytes());
        b[4..6].copy_from_slice(&self.pattern_order_len.to_le_bytes());
        b[6..8].copy_from_slice(&self.restart_position.to_le_bytes());
        b[8..12].copy_from_slice(&self.patterns.to_le_bytes());
        b[12..16].copy_from_slice(&self.instruments.to_le_bytes());
        b[16..18].copy_from_slice(&self.n_patterns.to_le_bytes());
        b[18..20].copy_from_slice(&self.n_instruments.to_le_bytes());
        b[20] = self.n_channels;
        b[21] = self.flags;
        b[22..24].copy_from_slice(&self.tempo.to_le_bytes());
        b[24..26].copy_from_slice(&self.bpm.to_le_bytes());
        b[26] = self.volume;
        b
    }

    /// Whether playback wraps to `restart_position` at the end of the song.
    pub fn is_looping(&self) -> bool {
        self.flags & Self::FLAG_LOOP != 0
    }

    pub fn set_looping(&mut self, looping: bool) {
        if looping {
            self.flags |= Self::FLAG_LOOP;
        } else {
            self.flags &= !Self::FLAG_LOOP;
        }
    }
}

/// Fixed-size pattern header (8 bytes, little-endian).
///
/// ```text
/// 0x00  u32  note data virtual address
/// 0x04  u16  note data size in bytes
/// 0x06  u16  row count
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternHeader {
    pub data: u32,
    pub data_size: u16,
    pub n_rows: u16,
}

impl PatternHeader {
    pub const SIZE: usize = 8;

    pub fn from_bytes(b: &[u8; Self::SIZE]) -> PatternHeader {
        PatternHeader {
            data: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            data_size: u16::from_le_bytes([b[4], b[5]]),
            n_rows: u16::from_le_bytes([b[6], b[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0..4].copy_from_slice(&self.data.to_le_bytes());
        b[4..6].copy_from_slice(&self.data_size.to_le_bytes());
        b[6..8].copy_from_slice(&self.n_rows.to_le_bytes());
        b
    }
}
