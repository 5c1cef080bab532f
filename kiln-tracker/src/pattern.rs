//! Streaming pattern note reader
//!
//! Pattern data is a variable-length note stream, so there is no random
//! access: the reader keeps a decode cursor and replays from the top of the
//! pattern when asked for a note behind it. The sequencer reads rows in
//! order, so in practice the cursor only ever rewinds on a pattern loop or
//! a backwards position jump.

use kiln_module::{MAX_ENCODED_SIZE, Note, PatternHeader, SongHeader};
use kiln_vmem::{BlockAnchor, RoMem};
use tracing::{debug, trace, warn};

use crate::TrackerError;

#[derive(Debug, Default)]
pub struct PatternReader {
    song: SongHeader,
    header: PatternHeader,
    index: u16,
    /// Notes decoded since the top of the pattern data.
    note_cursor: u32,
    /// Byte offset of the next encoded note.
    offset: u32,
    anchor: BlockAnchor,
    /// Whether this pattern already warned about truncated note data.
    warned_truncated: bool,
}

impl PatternReader {
    pub fn new(song: &SongHeader) -> Result<PatternReader, TrackerError> {
        if song.n_patterns == 0 {
            return Err(TrackerError::NoPatterns);
        }
        Ok(PatternReader {
            song: *song,
            index: u16::MAX,
            ..PatternReader::default()
        })
    }

    /// Rows in the currently loaded pattern.
    pub fn n_rows(&self) -> u16 {
        self.header.n_rows
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    /// Fetch a pattern's header and reset the decode cursor to its top.
    ///
    /// On failure the reader is left empty (zero rows), never pointing at
    /// stale data.
    pub fn load_pattern<S: RoMem>(&mut self, store: &S, index: u16) -> Result<(), TrackerError> {
        self.header = PatternHeader::default();
        self.index = u16::MAX;
        self.note_cursor = 0;
        self.offset = 0;
        self.warned_truncated = false;

        if index >= self.song.n_patterns {
            warn!(index, n_patterns = self.song.n_patterns, "pattern out of range");
            return Err(TrackerError::BadPattern(index));
        }

        let va = self.song.patterns + index as u32 * PatternHeader::SIZE as u32;
        let mut buf = [0u8; PatternHeader::SIZE];
        store.copy(va, &mut buf)?;
        self.header = PatternHeader::from_bytes(&buf);
        self.index = index;
        trace!(index, rows = self.header.n_rows, "pattern loaded");
        Ok(())
    }

    /// Decode the note at (row, channel), cleaned per the format rules.
    ///
    /// Random access is emulated by seeking the stream; asking for notes in
    /// row-major order is free.
    pub fn get_note<S: RoMem>(
        &mut self,
        store: &S,
        row: u16,
        channel: u8,
    ) -> Result<Note, TrackerError> {
        let target = row as u32 * self.song.n_channels as u32 + channel as u32;

        if target < self.note_cursor {
            debug!(target, cursor = self.note_cursor, "rewinding pattern stream");
            self.note_cursor = 0;
            self.offset = 0;
        } else if target > self.note_cursor {
            trace!(from = self.note_cursor, to = target, "skipping ahead in pattern");
        }

        let mut note = Note::EMPTY;
        while self.note_cursor <= target {
            note = self.next_note(store)?;
            self.note_cursor += 1;
        }
        note.clean(self.song.n_instruments);
        Ok(note)
    }

    /// Let go of the pinned store block between row bursts.
    pub fn release_ref<S: RoMem>(&mut self, store: &S) {
        store.release_anchor(&mut self.anchor);
    }

    fn next_note<S: RoMem>(&mut self, store: &S) -> Result<Note, TrackerError> {
        let data_size = self.header.data_size as u32;
        if self.offset >= data_size {
            // Fewer encoded notes than rows * channels. The remainder of the
            // pattern plays as silence.
            if !self.warned_truncated {
                warn!(pattern = self.index, "note data ends early, padding with empty rows");
                self.warned_truncated = true;
            }
            return Ok(Note::EMPTY);
        }

        let va = self.header.data + self.offset;
        let len = MAX_ENCODED_SIZE.min((data_size - self.offset) as usize);
        let mut buf = [0u8; MAX_ENCODED_SIZE];
        store.copy_anchored(&mut self.anchor, va, &mut buf[..len])?;

        match Note::decode(&buf[..len]) {
            Some((note, used)) => {
                self.offset += used as u32;
                Ok(note)
            }
            None => Err(TrackerError::CorruptPattern { va }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_module::{NO_NOTE, NO_VOLUME};
    use kiln_vmem::RamStore;

    /// Assemble one pattern and a song header pointing at it.
    fn one_pattern_song(n_channels: u8, rows: &[&[Note]]) -> (RamStore, SongHeader) {
        let mut store = RamStore::default();
        let mut data = Vec::new();
        for row in rows {
            assert_eq!(row.len(), n_channels as usize);
            for note in *row {
                note.encode_into(&mut data);
            }
        }
        let data_va = store.append(&data);
        let header = PatternHeader {
            data: data_va,
            data_size: data.len() as u16,
            n_rows: rows.len() as u16,
        };
        let patterns_va = store.append(&header.to_bytes());
        let song = SongHeader {
            patterns: patterns_va,
            n_patterns: 1,
            n_instruments: 8,
            n_channels,
            ..SongHeader::default()
        };
        (store, song)
    }

    fn plain(note: u8) -> Note {
        Note {
            note,
            instrument: 0,
            ..Note::EMPTY
        }
    }

    #[test]
    fn test_sequential_reads() {
        let rows: &[&[Note]] = &[
            &[plain(49), Note::EMPTY],
            &[Note::EMPTY, plain(52)],
            &[plain(97), Note::EMPTY],
        ];
        let (store, song) = one_pattern_song(2, rows);
        let mut reader = PatternReader::new(&song).unwrap();
        reader.load_pattern(&store, 0).unwrap();
        assert_eq!(reader.n_rows(), 3);

        for (row, expect) in rows.iter().enumerate() {
            for (ch, want) in expect.iter().enumerate() {
                let got = reader.get_note(&store, row as u16, ch as u8).unwrap();
                assert_eq!(got.note, want.note, "row {} ch {}", row, ch);
            }
        }
    }

    #[test]
    fn test_rewind_replays_from_top() {
        let rows: &[&[Note]] = &[&[plain(49)], &[plain(51)], &[plain(53)]];
        let (store, song) = one_pattern_song(1, rows);
        let mut reader = PatternReader::new(&song).unwrap();
        reader.load_pattern(&store, 0).unwrap();

        assert_eq!(reader.get_note(&store, 2, 0).unwrap().note, 53);
        // Backwards: the stream seeks to the top and decodes forward again
        assert_eq!(reader.get_note(&store, 0, 0).unwrap().note, 49);
        assert_eq!(reader.get_note(&store, 1, 0).unwrap().note, 51);
    }

    #[test]
    fn test_truncated_data_pads_with_silence() {
        let rows: &[&[Note]] = &[&[plain(49)]];
        let (store, mut song) = one_pattern_song(1, rows);
        // Lie about the row count: rows 1..4 have no backing notes
        song.n_patterns = 1;
        let mut reader = PatternReader::new(&song).unwrap();
        reader.load_pattern(&store, 0).unwrap();
        reader.header.n_rows = 4;

        assert_eq!(reader.get_note(&store, 0, 0).unwrap().note, 49);
        let pad = reader.get_note(&store, 3, 0).unwrap();
        assert_eq!(pad.note, NO_NOTE);
        assert_eq!(pad.volume, NO_VOLUME);
    }

    #[test]
    fn test_bad_pattern_index_clears_state() {
        let (store, song) = one_pattern_song(1, &[&[plain(49)]]);
        let mut reader = PatternReader::new(&song).unwrap();
        reader.load_pattern(&store, 0).unwrap();
        assert!(matches!(
            reader.load_pattern(&store, 7),
            Err(TrackerError::BadPattern(7))
        ));
        assert_eq!(reader.n_rows(), 0);
    }

    #[test]
    fn test_no_patterns_rejected() {
        let song = SongHeader::default();
        assert!(matches!(
            PatternReader::new(&song),
            Err(TrackerError::NoPatterns)
        ));
    }

    #[test]
    fn test_release_unpins_store_block() {
        let (store, song) = one_pattern_song(1, &[&[plain(49)], &[plain(50)]]);
        let mut reader = PatternReader::new(&song).unwrap();
        reader.load_pattern(&store, 0).unwrap();
        reader.get_note(&store, 0, 0).unwrap();
        assert_eq!(store.pinned_blocks(), 1);
        reader.release_ref(&store);
        assert_eq!(store.pinned_blocks(), 0);
    }

    #[test]
    fn test_notes_are_cleaned() {
        // Note 120 clamps to key-off, instrument 200 is out of range
        let dirty = Note {
            note: 120,
            instrument: 200,
            ..Note::EMPTY
        };
        let (store, song) = one_pattern_song(1, &[&[dirty]]);
        let mut reader = PatternReader::new(&song).unwrap();
        reader.load_pattern(&store, 0).unwrap();
        let note = reader.get_note(&store, 0, 0).unwrap();
        assert_eq!(note.note, kiln_module::NOTE_OFF);
        assert_eq!(note.instrument, kiln_module::NO_INSTRUMENT);
    }
}
