//! Kiln-module: tracker song data layouts
//!
//! This crate defines the binary layouts the playback engine consumes:
//! the fixed-size song/pattern/instrument headers, the packed envelope
//! points, and the variable-length compressed note encoding. Everything is
//! little-endian and position-independent (cross references are virtual
//! addresses into the read-only store, never host pointers).
//!
//! The layouts are *consumed* here, not produced - the asset pipeline that
//! writes them lives outside this workspace - but an encoder for the note
//! format is provided so tooling and tests can assemble songs.
//!
//! # Note encoding
//!
//! A note is five logical fields: note number, instrument, volume column
//! byte, effect type, effect parameter. On disk it is either five raw bytes,
//! or a compact form flagged by the top bit of the first byte:
//!
//! ```text
//! 1 e e p t v i n     bit 0: note present        bit 3: effect type present
//! ^                   bit 1: instrument present  bit 4: effect param present
//! compact flag        bit 2: volume present      bits 5-6: reserved
//! ```
//!
//! followed by the present fields in field order. Total size is
//! `popcount(enc & 0x9F)` bytes - the mask keeps the flag bit so the
//! encoding byte pays for itself.

mod effect;
mod instrument;
mod note;
mod song;

pub use effect::Effect;
pub use instrument::{
    EnvelopeHeader, InstrumentHeader, SampleFormat, envelope_offset, envelope_value,
    pack_envelope_point,
};
pub use note::{MAX_ENCODED_SIZE, Note};
pub use song::{PatternHeader, SongHeader};

/// Note number for key-off (release).
pub const NOTE_OFF: u8 = 97;

/// Highest playable note number (B-7; 1 = C-0).
pub const NOTE_MAX: u8 = 96;

/// "No note" sentinel.
pub const NO_NOTE: u8 = 0xFF;

/// "No instrument" sentinel. Real instruments are 0-based indices.
pub const NO_INSTRUMENT: u8 = 0xFF;

/// "No volume column value" sentinel.
pub const NO_VOLUME: u8 = 0xFF;

/// "No effect" sentinel.
pub const NO_EFFECT: u8 = 0xFF;

/// "No effect parameter" sentinel.
pub const NO_PARAM: u8 = 0xFF;

/// Maximum volume-envelope points an instrument may carry.
pub const MAX_ENVELOPE_POINTS: usize = 12;

/// Musical volume scale used by channel, global and envelope values.
pub const VOLUME_MAX: u8 = 64;
