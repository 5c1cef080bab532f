//! Fixed-point channel mixer
//!
//! Eight channels of mono samples, resampled by linear interpolation and
//! accumulated into an i32 buffer. No allocation happens on the mix path;
//! sample bytes stream through each channel's [`SampleReader`].
//!
//! Positions are 12-bit fixed point: a channel advances by
//! `(hz << SAMPLE_FRAC_BITS) / device_rate` per output frame, so pitch is
//! exact to 1/4096th of a sample and identical on every host.
//!
//! The mixer also owns the tick countdown - the number of output frames
//! until the sequencer must run again - because only the mixer knows how
//! many frames it has actually rendered.

use kiln_vmem::{MemFault, RoMem};
use tracing::warn;

use crate::sample::{SampleReader, SampleSource};
use crate::{MAX_VOLUME, MAX_VOLUME_LOG2, NUM_CHANNELS};

/// Fractional bits in channel playback positions.
pub const SAMPLE_FRAC_BITS: u32 = 12;

const FRAC_ONE: u64 = 1 << SAMPLE_FRAC_BITS;
const FRAC_MASK: u64 = FRAC_ONE - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Play to the end of the sample and stop.
    #[default]
    Once,
    /// Wrap from the loop end back to the loop start forever.
    Repeat,
}

/// What the sequencer needs from a mixer.
///
/// [`ChannelMixer`] is the real implementation; tests drive the sequencer
/// against a recording fake instead.
pub trait ChannelBank {
    /// Start a sample on a channel. Returns false if the channel or sample
    /// is unusable; the caller treats that as the channel ending.
    fn play(&mut self, src: SampleSource, ch: usize, loop_mode: LoopMode) -> bool;
    fn stop(&mut self, ch: usize);
    fn pause(&mut self, ch: usize);
    fn resume(&mut self, ch: usize);
    /// True while the channel holds a sample that has not run out. Paused
    /// channels still count as playing.
    fn is_playing(&self, ch: usize) -> bool;
    /// Device-scale volume, 0..=[`MAX_VOLUME`].
    fn set_volume(&mut self, ch: usize, volume: i32);
    /// Playback rate in Hz.
    fn set_speed(&mut self, ch: usize, hz: u32);
    /// Jump the playback position to a decoded sample index.
    fn set_pos(&mut self, ch: usize, sample: u32);
    fn set_loop(&mut self, ch: usize, mode: LoopMode);
    /// Microseconds between sequencer ticks; restarts the countdown.
    fn set_tick_interval(&mut self, us: u32);
}

#[derive(Debug, Default)]
struct Slot {
    reader: SampleReader,
    /// Playback position, samples in 52.12 fixed point.
    offset: u64,
    /// Per-frame advance, samples in 20.12 fixed point.
    increment: u64,
    volume: i32,
    loop_mode: LoopMode,
    paused: bool,
    /// Set after the first failed read so one fault logs one warning.
    faulted: bool,
}

#[derive(Debug)]
pub struct ChannelMixer {
    device_rate: u32,
    slots: [Slot; NUM_CHANNELS],
    /// Bitmask of channels holding a live sample.
    active: u32,
    /// Frames per sequencer tick; zero until a song starts.
    tick_frames: u32,
    /// Frames left until the next tick boundary.
    to_tick: u32,
}

impl ChannelMixer {
    pub fn new(device_rate: u32) -> ChannelMixer {
        ChannelMixer {
            device_rate: device_rate.max(1),
            slots: Default::default(),
            active: 0,
            tick_frames: 0,
            to_tick: 0,
        }
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Frames that may be rendered before the sequencer must tick.
    pub fn frames_to_tick(&self) -> u32 {
        self.to_tick
    }

    /// Consume a pending tick boundary, restarting the countdown.
    pub fn tick_elapsed(&mut self) -> bool {
        if self.tick_frames > 0 && self.to_tick == 0 {
            self.to_tick = self.tick_frames;
            true
        } else {
            false
        }
    }

    /// Render `out.len()` frames, accumulating into `out`.
    ///
    /// The caller zeroes (or pre-fills) the buffer; every active, unpaused
    /// channel adds its contribution. A channel whose sample read faults is
    /// stopped, not fatal.
    pub fn mix_audio<S: RoMem>(&mut self, store: &S, out: &mut [i32]) {
        let mut mask = self.active;
        while mask != 0 {
            let ch = mask.trailing_zeros() as usize;
            mask &= mask - 1;

            if self.slots[ch].paused {
                continue;
            }
            match mix_channel(&mut self.slots[ch], store, out) {
                Ok(still_playing) => {
                    if !still_playing {
                        self.active &= !(1 << ch);
                    }
                }
                Err(fault) => {
                    if !self.slots[ch].faulted {
                        warn!(channel = ch, %fault, "sample read failed, dropping channel");
                        self.slots[ch].faulted = true;
                    }
                    self.active &= !(1 << ch);
                }
            }
            self.slots[ch].reader.release_ref(store);
        }
        self.to_tick = self.to_tick.saturating_sub(out.len() as u32);
    }
}

/// Mix one channel into `out`. Returns whether the sample is still going.
fn mix_channel<S: RoMem>(
    slot: &mut Slot,
    store: &S,
    out: &mut [i32],
) -> Result<bool, MemFault> {
    let src = *slot.reader.source();
    let n_samples = src.n_samples() as u64;
    let looping = slot.loop_mode == LoopMode::Repeat && src.has_loop();
    let end = if looping { src.loop_end as u64 } else { n_samples };
    let loop_len = src.loop_end.saturating_sub(src.loop_start) as u64;

    for frame in out.iter_mut() {
        let mut idx = slot.offset >> SAMPLE_FRAC_BITS;
        if idx >= end {
            if looping {
                // Wrapping preserves the fractional phase. The increment can
                // exceed the loop length (tiny loop, high pitch), so keep
                // subtracting until the position is back inside.
                while slot.offset >> SAMPLE_FRAC_BITS >= end {
                    slot.offset -= loop_len << SAMPLE_FRAC_BITS;
                }
                idx = slot.offset >> SAMPLE_FRAC_BITS;
            } else {
                return Ok(false);
            }
        }

        let s0 = slot.reader.sample_at(store, idx as u32)? as i32;
        let frac = (slot.offset & FRAC_MASK) as i32;
        let sample = if frac == 0 {
            s0
        } else {
            let s1 = if idx + 1 >= end {
                if looping {
                    slot.reader.sample_at(store, src.loop_start)? as i32
                } else {
                    // Hold the last sample rather than interpolate into junk
                    s0
                }
            } else {
                slot.reader.sample_at(store, (idx + 1) as u32)? as i32
            };
            s0 + (((s1 - s0) * frac) >> SAMPLE_FRAC_BITS)
        };

        *frame += (sample * slot.volume) >> MAX_VOLUME_LOG2;
        slot.offset += slot.increment;
    }
    Ok(true)
}

impl ChannelBank for ChannelMixer {
    fn play(&mut self, src: SampleSource, ch: usize, loop_mode: LoopMode) -> bool {
        if ch >= NUM_CHANNELS {
            warn!(channel = ch, "play on nonexistent channel");
            return false;
        }
        if src.n_samples() == 0 {
            return false;
        }
        let slot = &mut self.slots[ch];
        slot.reader = SampleReader::new(src);
        slot.offset = 0;
        slot.increment = 0;
        slot.volume = 0;
        slot.loop_mode = if src.has_loop() { loop_mode } else { LoopMode::Once };
        slot.paused = false;
        slot.faulted = false;
        self.active |= 1 << ch;
        true
    }

    fn stop(&mut self, ch: usize) {
        if ch < NUM_CHANNELS {
            self.active &= !(1 << ch);
            self.slots[ch].paused = false;
        }
    }

    fn pause(&mut self, ch: usize) {
        if ch < NUM_CHANNELS && self.is_playing(ch) {
            self.slots[ch].paused = true;
        }
    }

    fn resume(&mut self, ch: usize) {
        if ch < NUM_CHANNELS {
            self.slots[ch].paused = false;
        }
    }

    fn is_playing(&self, ch: usize) -> bool {
        ch < NUM_CHANNELS && self.active & (1 << ch) != 0
    }

    fn set_volume(&mut self, ch: usize, volume: i32) {
        if ch < NUM_CHANNELS {
            self.slots[ch].volume = volume.clamp(0, MAX_VOLUME);
        }
    }

    fn set_speed(&mut self, ch: usize, hz: u32) {
        if ch < NUM_CHANNELS {
            self.slots[ch].increment = ((hz as u64) << SAMPLE_FRAC_BITS) / self.device_rate as u64;
        }
    }

    fn set_pos(&mut self, ch: usize, sample: u32) {
        if ch >= NUM_CHANNELS {
            return;
        }
        let slot = &mut self.slots[ch];
        let src = *slot.reader.source();
        let mut sample = sample as u64;
        if slot.loop_mode == LoopMode::Repeat && src.has_loop() {
            // A looping channel folds far positions back into the loop
            if sample >= src.loop_end as u64 {
                let loop_len = (src.loop_end - src.loop_start) as u64;
                sample = src.loop_start as u64 + (sample - src.loop_start as u64) % loop_len;
            }
        } else if sample >= src.n_samples() as u64 {
            // Offsets past a one-shot sample play nothing (9xx convention)
            self.active &= !(1 << ch);
            return;
        }
        slot.offset = sample << SAMPLE_FRAC_BITS;
    }

    fn set_loop(&mut self, ch: usize, mode: LoopMode) {
        if ch < NUM_CHANNELS {
            self.slots[ch].loop_mode = mode;
        }
    }

    fn set_tick_interval(&mut self, us: u32) {
        self.tick_frames =
            ((us as u64 * self.device_rate as u64 / 1_000_000) as u32).max(1);
        self.to_tick = self.tick_frames;
    }
}
