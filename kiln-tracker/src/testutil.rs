//! Test fixtures: in-memory song assembly and a recording channel bank

use kiln_module::{
    InstrumentHeader, Note, PatternHeader, SampleFormat, SongHeader, pack_envelope_point,
};
use kiln_vmem::{RamStore, RoMem, VirtAddr};

use crate::mixer::{ChannelBank, LoopMode};
use crate::sample::SampleSource;
use crate::NUM_CHANNELS;

/// Route engine logs to the test harness, honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A note with just a pitch and an instrument.
pub fn note(note: u8, instrument: u8) -> Note {
    Note {
        note,
        instrument,
        ..Note::EMPTY
    }
}

/// A note carrying an effect.
pub fn fx(n: u8, instrument: u8, effect_type: u8, effect_param: u8) -> Note {
    Note {
        note: n,
        instrument,
        effect_type,
        effect_param,
        ..Note::EMPTY
    }
}

/// An effect on its own, no note.
pub fn bare_fx(effect_type: u8, effect_param: u8) -> Note {
    fx(0xFF, 0xFF, effect_type, effect_param)
}

/// Key-off.
pub fn off() -> Note {
    Note {
        note: kiln_module::NOTE_OFF,
        ..Note::EMPTY
    }
}

/// Assembles a complete song image into a [`RamStore`].
///
/// Sample data, envelope points and pattern data are appended as they are
/// added; [`SongBuilder::finish`] lays down the header tables and the song
/// header, returning the store and the song's address.
pub struct SongBuilder {
    store: RamStore,
    instruments: Vec<InstrumentHeader>,
    patterns: Vec<PatternHeader>,
    order: Vec<u8>,
    n_channels: u8,
    tempo: u16,
    bpm: u16,
    flags: u8,
    restart: u16,
    volume: u8,
}

impl SongBuilder {
    pub fn new(n_channels: u8) -> SongBuilder {
        SongBuilder {
            store: RamStore::default(),
            instruments: Vec::new(),
            patterns: Vec::new(),
            order: Vec::new(),
            n_channels,
            tempo: 6,
            bpm: 125,
            flags: 0,
            restart: 0,
            volume: 64,
        }
    }

    pub fn tempo(&mut self, tempo: u16, bpm: u16) -> &mut Self {
        self.tempo = tempo;
        self.bpm = bpm;
        self
    }

    pub fn looping(&mut self, restart: u16) -> &mut Self {
        self.flags |= 1;
        self.restart = restart;
        self
    }

    pub fn global_volume(&mut self, volume: u8) -> &mut Self {
        self.volume = volume;
        self
    }

    /// Add a 16-bit PCM instrument; returns its index.
    pub fn instrument(&mut self, samples: &[i16], sample_rate: u32, looped: Option<(u32, u32)>) -> u8 {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let va = self.store.append(&bytes);
        let (loop_start, loop_end) = looped.unwrap_or((0, 0));
        self.instruments.push(InstrumentHeader {
            sample_data: va,
            sample_size: bytes.len() as u32,
            loop_start,
            loop_end,
            sample_rate,
            format: SampleFormat::Pcm16.to_raw(),
            compression: SampleFormat::Pcm16.compression_factor(),
            volume: 64,
            ..InstrumentHeader::default()
        });
        (self.instruments.len() - 1) as u8
    }

    /// Add an ADPCM instrument from PCM source samples.
    pub fn adpcm_instrument(
        &mut self,
        samples: &[i16],
        sample_rate: u32,
        looped: Option<(u32, u32)>,
    ) -> u8 {
        let bytes = kiln_adpcm::encode(samples);
        let va = self.store.append(&bytes);
        let (loop_start, loop_end) = looped.unwrap_or((0, 0));
        self.instruments.push(InstrumentHeader {
            sample_data: va,
            sample_size: bytes.len() as u32,
            loop_start,
            loop_end,
            sample_rate,
            format: SampleFormat::Adpcm.to_raw(),
            compression: SampleFormat::Adpcm.compression_factor(),
            volume: 64,
            ..InstrumentHeader::default()
        });
        (self.instruments.len() - 1) as u8
    }

    /// Attach a volume envelope to an instrument.
    pub fn envelope(
        &mut self,
        instrument: u8,
        points: &[(u16, u16)],
        ty: u8,
        sustain_point: u8,
        fadeout: u16,
    ) -> &mut Self {
        let packed: Vec<u8> = points
            .iter()
            .flat_map(|(offset, value)| pack_envelope_point(*offset, *value).to_le_bytes())
            .collect();
        let va = self.store.append(&packed);
        let ins = &mut self.instruments[instrument as usize];
        ins.envelope.points = va;
        ins.envelope.n_points = points.len() as u8;
        ins.envelope.sustain_point = sustain_point;
        ins.envelope.ty = ty;
        ins.fadeout = fadeout;
        self
    }

    /// Add a pattern; `rows` is row-major, one note per channel.
    pub fn pattern(&mut self, rows: &[&[Note]]) -> u8 {
        let mut data = Vec::new();
        for row in rows {
            assert_eq!(row.len(), self.n_channels as usize, "row width");
            for n in *row {
                n.encode_into(&mut data);
            }
        }
        let va = self.store.append(&data);
        self.patterns.push(PatternHeader {
            data: va,
            data_size: data.len() as u16,
            n_rows: rows.len() as u16,
        });
        (self.patterns.len() - 1) as u8
    }

    pub fn order(&mut self, entries: &[u8]) -> &mut Self {
        self.order.extend_from_slice(entries);
        self
    }

    /// Lay down the tables and the song header.
    pub fn finish(mut self) -> (RamStore, VirtAddr) {
        let instruments_va = self.store.top();
        for ins in &self.instruments {
            self.store.append(&ins.to_bytes());
        }
        let patterns_va = self.store.top();
        for pat in &self.patterns {
            self.store.append(&pat.to_bytes());
        }
        let order_va = self.store.append(&self.order);
        let song = SongHeader {
            pattern_order: order_va,
            pattern_order_len: self.order.len() as u16,
            restart_position: self.restart,
            patterns: patterns_va,
            instruments: instruments_va,
            n_patterns: self.patterns.len() as u16,
            n_instruments: self.instruments.len() as u16,
            n_channels: self.n_channels,
            flags: self.flags,
            tempo: self.tempo,
            bpm: self.bpm,
            volume: self.volume,
        };
        let song_va = self.store.append(&song.to_bytes());
        (self.store, song_va)
    }

    /// Build and decode the song header without going through a store read.
    pub fn finish_header(self) -> (RamStore, SongHeader) {
        let (store, va) = self.finish();
        let mut buf = [0u8; SongHeader::SIZE];
        store.copy(va, &mut buf).unwrap();
        (store, SongHeader::from_bytes(&buf))
    }
}

/// Recording [`ChannelBank`] for driving the sequencer without audio.
#[derive(Debug, Default)]
pub struct MockBank {
    pub plays: Vec<(usize, SampleSource, LoopMode)>,
    pub stops: Vec<usize>,
    pub volumes: Vec<(usize, i32)>,
    pub speeds: Vec<(usize, u32)>,
    pub positions: Vec<(usize, u32)>,
    pub loops: Vec<(usize, LoopMode)>,
    pub tick_intervals: Vec<u32>,
    playing: [bool; NUM_CHANNELS],
}

impl MockBank {
    pub fn new() -> MockBank {
        MockBank::default()
    }

    /// Pretend the channel's sample ran out.
    pub fn finish_channel(&mut self, ch: usize) {
        self.playing[ch] = false;
    }

    pub fn play_count(&self, ch: usize) -> usize {
        self.plays.iter().filter(|(c, _, _)| *c == ch).count()
    }

    pub fn stop_count(&self, ch: usize) -> usize {
        self.stops.iter().filter(|c| **c == ch).count()
    }

    pub fn last_volume(&self, ch: usize) -> Option<i32> {
        self.volumes.iter().rev().find(|(c, _)| *c == ch).map(|(_, v)| *v)
    }

    pub fn last_speed(&self, ch: usize) -> Option<u32> {
        self.speeds.iter().rev().find(|(c, _)| *c == ch).map(|(_, v)| *v)
    }
}

impl ChannelBank for MockBank {
    fn play(&mut self, src: SampleSource, ch: usize, loop_mode: LoopMode) -> bool {
        self.plays.push((ch, src, loop_mode));
        self.playing[ch] = true;
        true
    }

    fn stop(&mut self, ch: usize) {
        self.stops.push(ch);
        self.playing[ch] = false;
    }

    fn pause(&mut self, _ch: usize) {}

    fn resume(&mut self, _ch: usize) {}

    fn is_playing(&self, ch: usize) -> bool {
        self.playing[ch]
    }

    fn set_volume(&mut self, ch: usize, volume: i32) {
        self.volumes.push((ch, volume));
    }

    fn set_speed(&mut self, ch: usize, hz: u32) {
        self.speeds.push((ch, hz));
    }

    fn set_pos(&mut self, ch: usize, sample: u32) {
        self.positions.push((ch, sample));
    }

    fn set_loop(&mut self, ch: usize, mode: LoopMode) {
        self.loops.push((ch, mode));
    }

    fn set_tick_interval(&mut self, us: u32) {
        self.tick_intervals.push(us);
    }
}
