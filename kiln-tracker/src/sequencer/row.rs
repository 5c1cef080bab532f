//! Row boundaries: advancing through patterns and the order table
//!
//! `load_next_notes` runs once per row, at the tick that overflows the
//! previous one. It resolves where the next row actually is - pattern loops
//! first, then scheduled breaks/jumps, then natural overflow into the next
//! phrase - and folds each channel's note into its state machine.

use kiln_module::{
    Effect, InstrumentHeader, MAX_ENVELOPE_POINTS, NO_INSTRUMENT, NOTE_MAX, Note, VOLUME_MAX,
};
use kiln_vmem::RoMem;
use tracing::{debug, warn};

use crate::mixer::ChannelBank;
use crate::sequencer::{ChannelState, EnvelopePos, TrackerSequencer};
use crate::utils::note_to_period;
use crate::{TrackerError, TrackerEvent};

impl TrackerSequencer {
    /// Load the next row's notes. Returns false when playback ended (end of
    /// a non-looping song, or an unrecoverable read error).
    pub(super) fn load_next_notes<S: RoMem, M: ChannelBank>(
        &mut self,
        store: &S,
        mixer: &mut M,
    ) -> bool {
        // Pattern loops are resolved before the order table is consulted,
        // so a loop on the last row replays rows of this same pattern.
        if self.loop_jump {
            self.loop_jump = false;
            self.next_row = self.loop_start_row;
        } else if let Some(jump) = self.jump.take() {
            let phrase = jump.phrase.unwrap_or(self.phrase.wrapping_add(1));
            if !self.enter_phrase(store, mixer, phrase) {
                return false;
            }
            self.next_row = jump.row;
            if self.next_row >= self.pattern.n_rows() {
                warn!(row = jump.row, rows = self.pattern.n_rows(), "jump row past end of pattern, stopping");
                self.post_event(TrackerEvent::SongEnded);
                self.stop(mixer);
                return false;
            }
        } else if self.next_row >= self.pattern.n_rows() {
            if !self.enter_phrase(store, mixer, self.phrase + 1) {
                return false;
            }
            self.next_row = 0;
        }

        for ch in 0..self.n_channels {
            let note = match self.pattern.get_note(store, self.next_row, ch as u8) {
                Ok(note) => note,
                Err(err) => {
                    warn!(channel = ch, %err, "failed to read pattern, stopping");
                    self.stop(mixer);
                    return false;
                }
            };
            if let Err(err) = self.apply_note(store, ch, note) {
                warn!(channel = ch, %err, "failed to load instrument, stopping");
                self.stop(mixer);
                return false;
            }
        }
        self.pattern.release_ref(store);

        self.row = self.next_row;
        self.next_row += 1;
        true
    }

    /// Move to a phrase of the order table, loading its pattern.
    ///
    /// Handles end-of-song: looping songs wrap to the restart position,
    /// others stop. Returns false when playback ended.
    fn enter_phrase<S: RoMem, M: ChannelBank>(
        &mut self,
        store: &S,
        mixer: &mut M,
        phrase: u16,
    ) -> bool {
        let mut phrase = phrase;
        if phrase >= self.song.pattern_order_len {
            if self.song.is_looping() {
                phrase = self.song.restart_position;
                debug!(phrase, "wrapping to restart position");
            } else {
                debug!("end of song");
                self.post_event(TrackerEvent::SongEnded);
                self.stop(mixer);
                return false;
            }
        }

        let mut entry = [0u8; 1];
        if let Err(err) = store.copy(self.song.pattern_order + phrase as u32, &mut entry) {
            warn!(phrase, %err, "failed to read order table, stopping");
            self.stop(mixer);
            return false;
        }
        if let Err(err) = self.pattern.load_pattern(store, entry[0] as u16) {
            warn!(phrase, pattern = entry[0], %err, "failed to load pattern, stopping");
            self.stop(mixer);
            return false;
        }

        if phrase != self.phrase {
            // Loop bookkeeping is per-pattern
            self.loop_start_row = 0;
            self.loop_count = 0;
        }
        self.phrase = phrase;
        true
    }

    /// Fold one channel's note for the new row into its state.
    fn apply_note<S: RoMem>(
        &mut self,
        store: &S,
        ch: usize,
        note: Note,
    ) -> Result<(), TrackerError> {
        let effect = Effect::from_raw(note.effect_type, note.effect_param);

        // Instrument changes are fetched before anything else; the rest of
        // the row logic reads the cached header.
        if note.has_instrument() && note.instrument != self.channels[ch].instrument_idx {
            let (instrument, points) = self.fetch_instrument(store, note.instrument)?;
            let channel = &mut self.channels[ch];
            channel.instrument = instrument;
            channel.env_points = points;
            channel.instrument_idx = note.instrument;
        }

        let channel = &mut self.channels[ch];
        channel.apply_on_tick = 0;

        if note.is_note_off() {
            if channel.active() {
                // Envelopes fade the note out; plain samples coast to their
                // natural end without looping.
                channel.state = if channel.envelope_enabled() {
                    ChannelState::Finish
                } else {
                    ChannelState::Coasting
                };
            }
        } else if note.has_note() {
            let glide = matches!(effect, Effect::TonePorta(_) | Effect::TonePortaVolSlide(_))
                || (note.volume != kiln_module::NO_VOLUME && note.volume >> 4 == 0xF);

            let real = (note.note as i16 + channel.instrument.relative_note as i16)
                .clamp(1, NOTE_MAX as i16);
            let period = note_to_period(real as u8, channel.instrument.finetune);

            if glide && channel.active() {
                // Glide to the new note instead of retriggering
                channel.target_period = period;
                channel.porta_active = true;
            } else if channel.instrument_idx == NO_INSTRUMENT
                || channel.instrument.sample_size == 0
                || channel.instrument.n_samples() == 0
            {
                warn!(channel = ch, note = note.note, "note with no playable instrument");
                channel.state = ChannelState::Stop;
            } else {
                channel.real_note = real as u8;
                channel.period = period;
                channel.live_period = period;
                channel.target_period = period;
                channel.porta_active = false;
                channel.volume = (channel.instrument.volume as i32).min(VOLUME_MAX as i32);
                channel.fadeout = u16::MAX;
                channel.env_value = VOLUME_MAX as i32;
                channel.envelope = EnvelopePos::default();
                channel.vibrato.phase = 0;
                channel.tremolo.phase = 0;
                channel.retrig.phase = 0;
                channel.tremor = super::Tremor::default();
                channel.start_offset = 0;
                channel.state = ChannelState::Start;
                if let Effect::NoteDelay(delay) = effect {
                    channel.apply_on_tick = delay as u16;
                }
            }
        } else if note.has_instrument() && channel.active() {
            // Instrument without a note: refresh volume and envelope
            channel.volume = (channel.instrument.volume as i32).min(VOLUME_MAX as i32);
            channel.fadeout = u16::MAX;
            channel.envelope = EnvelopePos::default();
        }

        channel.note = note;
        channel.effect = effect;
        Ok(())
    }

    /// Read an instrument header and its envelope points from the store.
    fn fetch_instrument<S: RoMem>(
        &self,
        store: &S,
        index: u8,
    ) -> Result<(InstrumentHeader, [u16; MAX_ENVELOPE_POINTS]), TrackerError> {
        let va = self.song.instruments + index as u32 * InstrumentHeader::SIZE as u32;
        let mut buf = [0u8; InstrumentHeader::SIZE];
        store.copy(va, &mut buf)?;
        let instrument = InstrumentHeader::from_bytes(&buf);

        let mut points = [0u16; MAX_ENVELOPE_POINTS];
        if instrument.envelope.is_enabled() {
            let n = instrument.envelope.n_points as usize;
            let mut raw = [0u8; MAX_ENVELOPE_POINTS * 2];
            store.copy(instrument.envelope.points, &mut raw[..n * 2])?;
            for (i, point) in points.iter_mut().take(n).enumerate() {
                *point = u16::from_le_bytes([raw[i * 2], raw[i * 2 + 1]]);
            }
        }
        Ok((instrument, points))
    }
}
