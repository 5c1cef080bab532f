//! Kiln-tracker: sample-accurate tracker music playback
//!
//! A pattern-sequenced music engine in the XM lineage: songs are patterns of
//! per-channel notes, an order table arranges patterns into phrases, and a
//! tick clock (derived from tempo and bpm) drives effect processing between
//! rows. Song data is never held in RAM; every byte is fetched on demand
//! through [`kiln_vmem::RoMem`].
//!
//! The engine splits into:
//!
//! - [`PatternReader`]: streams compressed notes out of pattern data
//! - [`TrackerSequencer`]: the tick state machine - rows, effects, envelopes
//! - [`ChannelMixer`]: fixed-point sample playback and accumulation
//! - [`TrackerPlayer`]: owns all three and renders on a pull model
//!
//! The sequencer drives the mixer through the [`ChannelBank`] trait rather
//! than a concrete type, so sequencing logic is testable against a recording
//! fake with no audio rendering involved.
//!
//! All mixing is integer fixed-point. Sample positions carry
//! [`mixer::SAMPLE_FRAC_BITS`] fractional bits and pitch conversion goes
//! through a 16.16 lookup table, so output is bit-exact across hosts.

mod output;
mod pattern;
mod sample;
mod sequencer;
#[cfg(test)]
pub(crate) mod testutil;
pub mod utils;

pub mod mixer;

pub use mixer::{ChannelBank, ChannelMixer, LoopMode};
pub use output::TrackerPlayer;
pub use pattern::PatternReader;
pub use sample::{SampleReader, SampleSource};
pub use sequencer::{ChannelState, TrackerSequencer};

use kiln_vmem::{MemFault, VirtAddr};

/// Number of mixer channels. Songs may use fewer, never more.
pub const NUM_CHANNELS: usize = 8;

/// Full scale of the device volume range the mixer consumes.
pub const MAX_VOLUME: i32 = 1 << MAX_VOLUME_LOG2;

/// log2 of [`MAX_VOLUME`]; volume application is a multiply and a shift.
pub const MAX_VOLUME_LOG2: u32 = 10;

/// Things that can go wrong starting or continuing playback.
///
/// None of these panic the engine; they end (or refuse to start) one
/// playback session.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Mem(#[from] MemFault),

    #[error("song has no patterns")]
    NoPatterns,

    #[error("song order table is empty")]
    EmptyOrder,

    #[error("pattern {0} out of range")]
    BadPattern(u16),

    #[error("song wants {got} channels, engine mixes at most {max}")]
    TooManyChannels { got: u8, max: u8 },

    #[error("restart position {0} past the end of the order table")]
    BadRestart(u16),

    #[error("corrupt pattern data at 0x{va:08x}")]
    CorruptPattern { va: VirtAddr },
}

/// Out-of-band notifications from the sequencer.
///
/// One-slot mailbox: the newest event wins if the caller does not poll
/// [`TrackerSequencer::take_event`] between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// An effect this engine does not interpret was encountered (and
    /// skipped - unknown effects are never fatal).
    UnknownEffect { channel: u8, ty: u8, param: u8 },
    /// A non-looping song played its last row.
    SongEnded,
}
