//! The tick state machine
//!
//! The sequencer owns everything musical: the position in the song, the
//! per-channel note state machines, effect processing, and volume
//! envelopes. It touches audio only through [`ChannelBank`], and it touches
//! song data only through [`RoMem`] - both are passed into [`tick`] so the
//! sequencer itself stays a plain state struct.
//!
//! # Tick cadence
//!
//! Rows are `tempo` ticks long (times `delay + 1` when a pattern-delay
//! effect repeats the row). Every tick:
//!
//! 1. `ticks` advances; on row overflow the next row's notes are loaded
//! 2. volume columns, effects and envelopes run for every live channel
//! 3. `commit` pushes the resulting state into the mixer
//!
//! The invariant `0 <= ticks < tempo * (delay + 1)` holds between ticks.
//!
//! [`tick`]: TrackerSequencer::tick

mod effects;
mod envelope;
mod row;

use kiln_module::{
    Effect, InstrumentHeader, MAX_ENVELOPE_POINTS, NO_INSTRUMENT, Note, SongHeader, VOLUME_MAX,
};
use kiln_vmem::RoMem;
use tracing::{debug, trace, warn};

use crate::mixer::{ChannelBank, LoopMode};
use crate::pattern::PatternReader;
use crate::sample::SampleSource;
use crate::utils::{period_to_hz, tick_interval_us};
use crate::{MAX_VOLUME, MAX_VOLUME_LOG2, NUM_CHANNELS, TrackerError, TrackerEvent};

/// Lifecycle of one sequencer channel.
///
/// `Start` and `Stop` are edge states: they request a mixer action that
/// [`TrackerSequencer::commit`] performs, then settle into `Playing` /
/// `Stopped`. `Coasting` is a key-off without an envelope - the sample
/// keeps going but no longer loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    Start,
    Playing,
    Coasting,
    Finish,
    Stop,
    #[default]
    Stopped,
}

#[derive(Debug, Clone, Copy, Default)]
struct Wobble {
    phase: u8,
    speed: u8,
    depth: u8,
    /// Waveform select (E4x/E7x). Stored but only sine is rendered.
    waveform: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct Retrig {
    phase: u8,
    interval: u8,
    slide: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct Tremor {
    phase: u8,
    on: u8,
    off: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct EnvelopePos {
    /// Current point (segment runs from here to the next point).
    point: u8,
    /// Ticks into the current segment.
    tick: u16,
    /// Cursor has run off the last point.
    done: bool,
}

#[derive(Debug)]
struct Channel {
    state: ChannelState,
    /// The row's decoded note, kept for the volume column.
    note: Note,
    instrument: InstrumentHeader,
    instrument_idx: u8,
    env_points: [u16; MAX_ENVELOPE_POINTS],

    /// Pattern note plus relative note, 1..=96.
    real_note: u8,
    /// Committed pitch.
    period: i32,
    /// Pitch after this tick's transient nudges (arpeggio, vibrato).
    live_period: i32,
    target_period: i32,
    porta_active: bool,

    /// Musical volume, 0..=64.
    volume: i32,
    tremolo_nudge: i32,
    tremor_mute: bool,
    env_value: i32,
    fadeout: u16,

    /// Pending sample-offset for the next trigger, in decoded samples.
    start_offset: u32,
    /// Tick at which a `Start` state commits (note delay).
    apply_on_tick: u16,
    envelope: EnvelopePos,

    // Sticky effect parameters
    effect: Effect,
    tone_porta: u8,
    fine_porta_up: u8,
    fine_porta_down: u8,
    fine_vol_up: u8,
    fine_vol_down: u8,
    vibrato: Wobble,
    tremolo: Wobble,
    retrig: Retrig,
    tremor: Tremor,
}

impl Default for Channel {
    fn default() -> Channel {
        Channel {
            state: ChannelState::Stopped,
            note: Note::EMPTY,
            instrument: InstrumentHeader::default(),
            instrument_idx: NO_INSTRUMENT,
            env_points: [0; MAX_ENVELOPE_POINTS],
            real_note: 0,
            period: 0,
            live_period: 0,
            target_period: 0,
            porta_active: false,
            volume: 0,
            tremolo_nudge: 0,
            tremor_mute: false,
            env_value: VOLUME_MAX as i32,
            fadeout: 0,
            start_offset: 0,
            apply_on_tick: 0,
            envelope: EnvelopePos::default(),
            effect: Effect::None,
            tone_porta: 0,
            fine_porta_up: 0,
            fine_porta_down: 0,
            fine_vol_up: 0,
            fine_vol_down: 0,
            vibrato: Wobble::default(),
            tremolo: Wobble::default(),
            retrig: Retrig::default(),
            tremor: Tremor::default(),
        }
    }
}

impl Channel {
    fn active(&self) -> bool {
        self.state != ChannelState::Stopped
    }

    fn envelope_enabled(&self) -> bool {
        self.instrument_idx != NO_INSTRUMENT && self.instrument.envelope.is_enabled()
    }
}

/// A pending break/jump scheduled for the next row boundary.
#[derive(Debug, Clone, Copy)]
struct Jump {
    /// Target phrase; `None` means "the next phrase in order".
    phrase: Option<u16>,
    row: u16,
}

#[derive(Debug)]
pub struct TrackerSequencer {
    song: SongHeader,
    pattern: PatternReader,
    channels: [Channel; NUM_CHANNELS],
    n_channels: usize,

    playing: bool,
    paused: bool,

    ticks: u16,
    tempo: u16,
    bpm: u16,
    /// Extra repeats of the current row (pattern delay).
    delay: u16,

    /// Position in the order table.
    phrase: u16,
    /// Row most recently loaded.
    row: u16,
    /// Row to load at the next boundary.
    next_row: u16,
    jump: Option<Jump>,

    // Pattern loop (E6x)
    loop_start_row: u16,
    loop_count: u8,
    loop_jump: bool,

    /// Song-wide musical volume, 0..=64, moved by Gxx/Hxy.
    global_volume: i32,
    /// Caller-controlled output volume, 0..=MAX_VOLUME.
    user_volume: i32,
    channel_volume: [i32; NUM_CHANNELS],
    /// Tempo trim in percent; positive plays faster.
    tempo_modifier: i32,

    event: Option<TrackerEvent>,
}

impl Default for TrackerSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerSequencer {
    pub fn new() -> TrackerSequencer {
        TrackerSequencer {
            song: SongHeader::default(),
            pattern: PatternReader::default(),
            channels: Default::default(),
            n_channels: 0,
            playing: false,
            paused: false,
            ticks: 0,
            tempo: 6,
            bpm: 125,
            delay: 0,
            phrase: 0,
            row: 0,
            next_row: 0,
            jump: None,
            loop_start_row: 0,
            loop_count: 0,
            loop_jump: false,
            global_volume: VOLUME_MAX as i32,
            user_volume: MAX_VOLUME,
            channel_volume: [MAX_VOLUME; NUM_CHANNELS],
            tempo_modifier: 0,
            event: None,
        }
    }

    /// Begin playing a song from the top of its order table.
    ///
    /// Validation happens before any state changes: a rejected song leaves
    /// whatever was playing untouched.
    pub fn play<S: RoMem, M: ChannelBank>(
        &mut self,
        store: &S,
        mixer: &mut M,
        song: SongHeader,
    ) -> Result<(), TrackerError> {
        if song.n_channels as usize > NUM_CHANNELS {
            return Err(TrackerError::TooManyChannels {
                got: song.n_channels,
                max: NUM_CHANNELS as u8,
            });
        }
        if song.pattern_order_len == 0 {
            return Err(TrackerError::EmptyOrder);
        }
        if song.is_looping() && song.restart_position >= song.pattern_order_len {
            return Err(TrackerError::BadRestart(song.restart_position));
        }

        let mut pattern = PatternReader::new(&song)?;
        let mut entry = [0u8; 1];
        store.copy(song.pattern_order, &mut entry)?;
        pattern.load_pattern(store, entry[0] as u16)?;

        if self.playing {
            self.stop(mixer);
        }

        self.song = song;
        self.pattern = pattern;
        self.n_channels = song.n_channels as usize;
        // Same 1..=32 range Fxx enforces; keeps the row clock in u16
        self.tempo = song.tempo.clamp(1, 32);
        self.bpm = song.bpm.max(1);
        self.global_volume = (song.volume as i32).min(VOLUME_MAX as i32);
        self.phrase = 0;
        self.row = 0;
        self.next_row = 0;
        self.delay = 0;
        // Primed so the very next tick overflows into row zero
        self.ticks = self.tempo - 1;
        self.jump = None;
        self.loop_start_row = 0;
        self.loop_count = 0;
        self.loop_jump = false;
        for channel in &mut self.channels {
            *channel = Channel::default();
        }
        self.playing = true;
        self.paused = false;
        mixer.set_tick_interval(self.tick_interval());
        debug!(
            patterns = song.n_patterns,
            channels = song.n_channels,
            tempo = self.tempo,
            bpm = self.bpm,
            "song started"
        );
        Ok(())
    }

    /// Stop playback and silence every channel. Idempotent.
    pub fn stop<M: ChannelBank>(&mut self, mixer: &mut M) {
        for ch in 0..self.n_channels {
            if mixer.is_playing(ch) {
                mixer.stop(ch);
            }
            self.channels[ch] = Channel::default();
        }
        if self.playing {
            debug!("song stopped");
        }
        self.playing = false;
        self.paused = false;
    }

    pub fn pause<M: ChannelBank>(&mut self, mixer: &mut M) {
        if self.playing && !self.paused {
            self.paused = true;
            for ch in 0..self.n_channels {
                mixer.pause(ch);
            }
        }
    }

    pub fn resume<M: ChannelBank>(&mut self, mixer: &mut M) {
        if self.playing && self.paused {
            self.paused = false;
            for ch in 0..self.n_channels {
                mixer.resume(ch);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        !self.playing
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Caller-facing output volume, 0..=[`MAX_VOLUME`].
    pub fn set_user_volume(&mut self, volume: i32) {
        self.user_volume = volume.clamp(0, MAX_VOLUME);
    }

    /// Per-channel output trim, 0..=[`MAX_VOLUME`].
    pub fn set_channel_volume(&mut self, ch: usize, volume: i32) {
        if ch < NUM_CHANNELS {
            self.channel_volume[ch] = volume.clamp(0, MAX_VOLUME);
        }
    }

    /// Speed the song up or down by a percentage without touching its bpm.
    pub fn set_tempo_modifier(&mut self, percent: i32) {
        self.tempo_modifier = percent.clamp(-50, 400);
    }

    /// Jump to a phrase and row at the next row boundary.
    pub fn set_position(&mut self, phrase: u16, row: u16) {
        if self.playing {
            trace!(phrase, row, "position change scheduled");
            self.jump = Some(Jump {
                phrase: Some(phrase),
                row,
            });
        }
    }

    /// Poll the event mailbox.
    pub fn take_event(&mut self) -> Option<TrackerEvent> {
        self.event.take()
    }

    pub fn current_position(&self) -> (u16, u16) {
        (self.phrase, self.row)
    }

    /// Advance the clock by one tick.
    pub fn tick<S: RoMem, M: ChannelBank>(&mut self, store: &S, mixer: &mut M) {
        if !self.playing || self.paused {
            return;
        }

        self.ticks += 1;
        if self.ticks >= self.tempo * (self.delay + 1) {
            self.ticks = 0;
            self.delay = 0;
            if !self.load_next_notes(store, mixer) {
                return;
            }
        }

        self.process();
        self.commit(mixer);
    }

    /// Run volume columns, effects and envelopes for every live channel.
    fn process(&mut self) {
        for ch in 0..self.n_channels {
            if !self.channels[ch].active() {
                // Song-level commands run even from silent channels
                if self.channels[ch].effect.is_global() {
                    self.process_effects(ch);
                }
                continue;
            }
            {
                let channel = &mut self.channels[ch];
                channel.live_period = channel.period;
                channel.tremolo_nudge = 0;
                channel.tremor_mute = false;
            }
            self.process_volume(ch);
            self.process_effects(ch);
            envelope::process(&mut self.channels[ch]);
        }
    }

    /// Push this tick's channel state into the mixer.
    fn commit<M: ChannelBank>(&mut self, mixer: &mut M) {
        for ch in 0..self.n_channels {
            let apply_tick = self.channels[ch].apply_on_tick;
            match self.channels[ch].state {
                ChannelState::Stopped => continue,
                ChannelState::Start => {
                    if self.ticks < apply_tick {
                        // Note delay: the previous note keeps its settings
                        // until the trigger lands
                        continue;
                    }
                    if !self.trigger(mixer, ch) {
                        continue;
                    }
                }
                ChannelState::Stop => {
                    mixer.stop(ch);
                    self.channels[ch].state = ChannelState::Stopped;
                    continue;
                }
                ChannelState::Coasting => {
                    if !mixer.is_playing(ch) {
                        self.channels[ch].state = ChannelState::Stopped;
                        continue;
                    }
                    mixer.set_loop(ch, LoopMode::Once);
                }
                ChannelState::Playing | ChannelState::Finish => {
                    if !mixer.is_playing(ch) {
                        self.channels[ch].state = ChannelState::Stopped;
                        continue;
                    }
                }
            }

            let channel = &self.channels[ch];
            let mut v = (channel.volume + channel.tremolo_nudge).clamp(0, VOLUME_MAX as i32);
            if channel.tremor_mute {
                v = 0;
            }
            if channel.envelope_enabled() {
                v = (v * channel.env_value) >> 6;
                if channel.state == ChannelState::Finish {
                    v = ((v as i64 * channel.fadeout as i64) >> 16) as i32;
                }
            }
            v = (v * self.global_volume) >> 4;
            v = (v * 4).min(MAX_VOLUME);
            v = (v * self.user_volume) >> MAX_VOLUME_LOG2;
            v = (v * self.channel_volume[ch]) >> MAX_VOLUME_LOG2;
            mixer.set_volume(ch, v);

            let hz = period_to_hz(channel.live_period, channel.instrument.sample_rate);
            mixer.set_speed(ch, hz);
        }

        mixer.set_tick_interval(self.tick_interval());
    }

    /// (Re)trigger a channel's sample. Returns false if the channel died.
    fn trigger<M: ChannelBank>(&mut self, mixer: &mut M, ch: usize) -> bool {
        let channel = &mut self.channels[ch];
        let src = match SampleSource::from_instrument(&channel.instrument) {
            Some(src) if src.n_samples() > 0 => src,
            _ => {
                warn!(channel = ch, "trigger with no playable sample");
                channel.state = ChannelState::Stopped;
                return false;
            }
        };
        if mixer.is_playing(ch) {
            mixer.stop(ch);
        }
        let mode = if src.has_loop() {
            LoopMode::Repeat
        } else {
            LoopMode::Once
        };
        if !mixer.play(src, ch, mode) {
            channel.state = ChannelState::Stopped;
            return false;
        }
        if channel.start_offset > 0 {
            mixer.set_pos(ch, channel.start_offset);
            channel.start_offset = 0;
            if !mixer.is_playing(ch) {
                // Offset past the end of the sample
                channel.state = ChannelState::Stopped;
                return false;
            }
        }
        channel.state = ChannelState::Playing;
        true
    }

    /// Effective microseconds per tick, after the tempo modifier.
    fn tick_interval(&self) -> u32 {
        let us = tick_interval_us(self.bpm) as u64;
        (us * 100 / (100 + self.tempo_modifier) as u64).max(1) as u32
    }

    fn post_event(&mut self, event: TrackerEvent) {
        if self.event.is_some() {
            trace!(?event, "replacing unread tracker event");
        }
        self.event = Some(event);
    }
}
