//! Per-tick effect and volume-column processing
//!
//! Dispatch is over the decoded [`Effect`] enum. The general shape: tick 0
//! latches sticky parameters (a zero nibble means "reuse the last one"),
//! later ticks do the per-tick work. Row-navigation effects (jump, break,
//! tempo) act once on tick 0 and then clear themselves so a pattern delay
//! does not re-run them.
//!
//! Unknown effects post a [`TrackerEvent`] and are otherwise ignored -
//! playback never dies because a song uses an effect this engine lacks.

use kiln_module::{Effect, NO_VOLUME, VOLUME_MAX};
use tracing::{debug, trace};

use crate::sequencer::{Channel, ChannelState, TrackerSequencer, envelope};
use crate::utils::{note_to_period, wobble_delta};
use crate::TrackerEvent;

/// Apply a slide nibble pair to a 0..=64 volume. Up wins if both are set.
fn volume_slide(volume: i32, param: u8) -> i32 {
    let up = (param >> 4) as i32;
    let down = (param & 0x0F) as i32;
    if up != 0 {
        (volume + up).min(VOLUME_MAX as i32)
    } else {
        (volume - down).max(0)
    }
}

/// Volume change for a retrigger (Rxy), by slide nibble.
fn retrigger_volume(volume: i32, slide: u8) -> i32 {
    let v = match slide {
        1 => volume - 1,
        2 => volume - 2,
        3 => volume - 4,
        4 => volume - 8,
        5 => volume - 16,
        6 => volume * 2 / 3,
        7 => volume / 2,
        9 => volume + 1,
        10 => volume + 2,
        11 => volume + 4,
        12 => volume + 8,
        13 => volume + 16,
        14 => volume * 3 / 2,
        15 => volume * 2,
        _ => volume,
    };
    v.clamp(0, VOLUME_MAX as i32)
}

fn run_vibrato(channel: &mut Channel) {
    let delta = wobble_delta(channel.vibrato.phase, channel.vibrato.depth);
    channel.vibrato.phase = (channel.vibrato.phase + channel.vibrato.speed) & 0x3F;
    channel.live_period = (channel.period + delta).max(1);
}

fn run_tremolo(channel: &mut Channel) {
    channel.tremolo_nudge = wobble_delta(channel.tremolo.phase, channel.tremolo.depth);
    channel.tremolo.phase = (channel.tremolo.phase + channel.tremolo.speed) & 0x3F;
}

fn run_tone_porta(channel: &mut Channel) {
    if !channel.porta_active {
        return;
    }
    let step = channel.tone_porta as i32 * 4;
    let target = channel.target_period;
    let period = channel.period;
    channel.period = if period < target {
        (period + step).min(target)
    } else {
        (period - step).max(target)
    };
    channel.live_period = channel.period;
}

impl TrackerSequencer {
    /// Interpret the row's volume column for one channel.
    pub(super) fn process_volume(&mut self, ch: usize) {
        let t = self.ticks;
        let channel = &mut self.channels[ch];
        let v = channel.note.volume;
        if v == NO_VOLUME {
            return;
        }

        if (0x10..=0x50).contains(&v) {
            if t == 0 {
                channel.volume = (v - 0x10) as i32;
            }
            return;
        }
        let nibble = (v & 0x0F) as i32;
        match v >> 4 {
            // Per-tick slides
            0x6 if t != 0 => channel.volume = (channel.volume - nibble).max(0),
            0x7 if t != 0 => channel.volume = (channel.volume + nibble).min(VOLUME_MAX as i32),
            // One-shot fine slides
            0x8 if t == 0 => channel.volume = (channel.volume - nibble).max(0),
            0x9 if t == 0 => channel.volume = (channel.volume + nibble).min(VOLUME_MAX as i32),
            // Vibrato controls
            0xA if t == 0 => channel.vibrato.speed = v & 0x0F,
            0xB => {
                if t == 0 {
                    if v & 0x0F != 0 {
                        channel.vibrato.depth = v & 0x0F;
                    }
                } else {
                    run_vibrato(channel);
                }
            }
            // Tone portamento
            0xF => {
                if t == 0 {
                    if v & 0x0F != 0 {
                        channel.tone_porta = (v & 0x0F) << 4;
                    }
                } else {
                    run_tone_porta(channel);
                }
            }
            _ => {}
        }
    }

    /// Run the row's effect column for one channel at the current tick.
    pub(super) fn process_effects(&mut self, ch: usize) {
        let t = self.ticks;
        let effect = self.channels[ch].effect;

        match effect {
            Effect::None => {}

            Effect::Arpeggio(param) => {
                if param != 0 {
                    let channel = &mut self.channels[ch];
                    let add = match t % 3 {
                        1 => (param >> 4) as i16,
                        2 => (param & 0x0F) as i16,
                        _ => 0,
                    };
                    let note = (channel.real_note as i16 + add).min(kiln_module::NOTE_MAX as i16);
                    channel.live_period = note_to_period(note as u8, channel.instrument.finetune);
                }
            }

            Effect::PortaUp(param) => {
                if t != 0 {
                    let channel = &mut self.channels[ch];
                    channel.period = (channel.period - param as i32 * 4).max(1);
                    channel.live_period = channel.period;
                }
            }

            Effect::PortaDown(param) => {
                if t != 0 {
                    let channel = &mut self.channels[ch];
                    channel.period += param as i32 * 4;
                    channel.live_period = channel.period;
                }
            }

            Effect::TonePorta(param) => {
                let channel = &mut self.channels[ch];
                if t == 0 {
                    if param != 0 {
                        channel.tone_porta = param;
                    }
                    // A glide row never retriggers; cancel a pending Start
                    if channel.state == ChannelState::Start {
                        channel.state = ChannelState::Playing;
                    }
                } else {
                    run_tone_porta(channel);
                }
            }

            Effect::TonePortaVolSlide(param) => {
                let channel = &mut self.channels[ch];
                if t == 0 {
                    if channel.state == ChannelState::Start {
                        channel.state = ChannelState::Playing;
                    }
                } else {
                    run_tone_porta(channel);
                    channel.volume = volume_slide(channel.volume, param);
                }
            }

            Effect::Vibrato(param) => {
                let channel = &mut self.channels[ch];
                if t == 0 {
                    if param >> 4 != 0 {
                        channel.vibrato.speed = param >> 4;
                    }
                    if param & 0x0F != 0 {
                        channel.vibrato.depth = param & 0x0F;
                    }
                } else {
                    run_vibrato(channel);
                }
            }

            Effect::VibratoVolSlide(param) => {
                if t != 0 {
                    let channel = &mut self.channels[ch];
                    run_vibrato(channel);
                    channel.volume = volume_slide(channel.volume, param);
                }
            }

            Effect::Tremolo(param) => {
                let channel = &mut self.channels[ch];
                if t == 0 {
                    if param >> 4 != 0 {
                        channel.tremolo.speed = param >> 4;
                    }
                    if param & 0x0F != 0 {
                        channel.tremolo.depth = param & 0x0F;
                    }
                } else {
                    run_tremolo(channel);
                }
            }

            Effect::SampleOffset(param) => {
                if t == 0 {
                    let channel = &mut self.channels[ch];
                    if channel.state == ChannelState::Start {
                        let factor = channel.instrument.compression.max(1) as u32;
                        channel.start_offset = param as u32 * 256 * factor;
                    }
                }
            }

            Effect::VolumeSlide(param) => {
                if t != 0 {
                    let channel = &mut self.channels[ch];
                    channel.volume = volume_slide(channel.volume, param);
                }
            }

            Effect::PositionJump(param) => {
                if t == 0 {
                    trace!(phrase = param, "position jump");
                    self.jump = Some(super::Jump {
                        phrase: Some(param as u16),
                        row: 0,
                    });
                    self.channels[ch].effect = Effect::None;
                }
            }

            Effect::SetVolume(param) => {
                if t == 0 {
                    self.channels[ch].volume = (param as i32).min(VOLUME_MAX as i32);
                }
            }

            Effect::PatternBreak(param) => {
                if t == 0 {
                    // Decimal-encoded nibbles, a format oddity kept as-is
                    let row = ((param >> 4) * 10 + (param & 0x0F)) as u16;
                    match &mut self.jump {
                        Some(jump) => jump.row = row,
                        None => {
                            self.jump = Some(super::Jump { phrase: None, row });
                        }
                    }
                    self.channels[ch].effect = Effect::None;
                }
            }

            Effect::SetTempoBpm(param) => {
                if t == 0 {
                    if param == 0 {
                        debug!("ignoring zero tempo command");
                    } else if param <= 32 {
                        self.tempo = param as u16;
                    } else {
                        self.bpm = param as u16;
                    }
                    self.channels[ch].effect = Effect::None;
                }
            }

            Effect::SetGlobalVolume(param) => {
                if t == 0 {
                    self.global_volume = (param as i32).min(VOLUME_MAX as i32);
                }
            }

            Effect::GlobalVolumeSlide(param) => {
                if t != 0 {
                    self.global_volume = volume_slide(self.global_volume, param);
                }
            }

            Effect::SetEnvelopePos(param) => {
                if t == 0 {
                    envelope::seek(&mut self.channels[ch], param);
                }
            }

            Effect::Retrigger(param) => {
                let channel = &mut self.channels[ch];
                if t == 0 {
                    if param & 0x0F != 0 {
                        channel.retrig.interval = param & 0x0F;
                    }
                    if param >> 4 != 0 {
                        channel.retrig.slide = param >> 4;
                    }
                    // The counter restarts on every row carrying Rxy, with
                    // or without a fresh note
                    channel.retrig.phase = 0;
                } else {
                    channel.retrig.phase += 1;
                }
                if channel.retrig.interval != 0 && channel.retrig.phase >= channel.retrig.interval
                {
                    channel.retrig.phase = 0;
                    channel.volume = retrigger_volume(channel.volume, channel.retrig.slide);
                    channel.fadeout = u16::MAX;
                    channel.envelope = super::EnvelopePos::default();
                    channel.state = ChannelState::Start;
                    channel.apply_on_tick = t;
                }
            }

            Effect::Tremor(param) => {
                let channel = &mut self.channels[ch];
                if t == 0 {
                    // x+1 on, y+1 off; 0/0 degenerates to alternating ticks
                    channel.tremor.on = (param >> 4) + 1;
                    channel.tremor.off = (param & 0x0F) + 1;
                }
                let cycle = channel.tremor.on + channel.tremor.off;
                channel.tremor_mute = channel.tremor.phase >= channel.tremor.on;
                channel.tremor.phase = (channel.tremor.phase + 1) % cycle;
            }

            Effect::FinePortaUp(param) => {
                if t == 0 {
                    let channel = &mut self.channels[ch];
                    if param != 0 {
                        channel.fine_porta_up = param;
                    }
                    channel.period = (channel.period - channel.fine_porta_up as i32 * 4).max(1);
                    channel.live_period = channel.period;
                }
            }

            Effect::FinePortaDown(param) => {
                if t == 0 {
                    let channel = &mut self.channels[ch];
                    if param != 0 {
                        channel.fine_porta_down = param;
                    }
                    channel.period += channel.fine_porta_down as i32 * 4;
                    channel.live_period = channel.period;
                }
            }

            Effect::VibratoWaveform(param) => {
                if t == 0 {
                    let channel = &mut self.channels[ch];
                    if param & 0x03 != 0 {
                        debug!(waveform = param, "non-sine vibrato waveform, rendering sine");
                    }
                    channel.vibrato.waveform = param;
                }
            }

            Effect::PatternLoop(param) => {
                if t == 0 {
                    if param == 0 {
                        self.loop_start_row = self.row;
                    } else if self.loop_count == 0 {
                        self.loop_count = param;
                        self.loop_jump = true;
                    } else {
                        self.loop_count -= 1;
                        if self.loop_count > 0 {
                            self.loop_jump = true;
                        }
                    }
                }
            }

            Effect::TremoloWaveform(param) => {
                if t == 0 {
                    let channel = &mut self.channels[ch];
                    if param & 0x03 != 0 {
                        debug!(waveform = param, "non-sine tremolo waveform, rendering sine");
                    }
                    channel.tremolo.waveform = param;
                }
            }

            Effect::RetriggerShort(param) => {
                if param != 0 && t != 0 && t % param as u16 == 0 {
                    let channel = &mut self.channels[ch];
                    channel.fadeout = u16::MAX;
                    channel.envelope = super::EnvelopePos::default();
                    channel.state = ChannelState::Start;
                    channel.apply_on_tick = t;
                }
            }

            Effect::FineVolumeUp(param) => {
                if t == 0 {
                    let channel = &mut self.channels[ch];
                    if param != 0 {
                        channel.fine_vol_up = param;
                    }
                    channel.volume =
                        (channel.volume + channel.fine_vol_up as i32).min(VOLUME_MAX as i32);
                }
            }

            Effect::FineVolumeDown(param) => {
                if t == 0 {
                    let channel = &mut self.channels[ch];
                    if param != 0 {
                        channel.fine_vol_down = param;
                    }
                    channel.volume = (channel.volume - channel.fine_vol_down as i32).max(0);
                }
            }

            Effect::NoteCut(param) => {
                if t == param as u16 {
                    self.channels[ch].volume = 0;
                }
            }

            // Handled at row load (it gates apply_on_tick)
            Effect::NoteDelay(_) => {}

            Effect::PatternDelay(param) => {
                if t == 0 && self.delay == 0 {
                    self.delay = param as u16;
                }
            }

            Effect::Unknown { ty, param } => {
                if t == 0 {
                    debug!(channel = ch, ty, param, "unknown effect skipped");
                    self.post_event(TrackerEvent::UnknownEffect {
                        channel: ch as u8,
                        ty,
                        param,
                    });
                    self.channels[ch].effect = Effect::None;
                }
            }
        }
    }
}
