//! Sample data access for the mixer
//!
//! Samples are fetched from the read-only store in small chunks, one mixer
//! channel at a time. PCM is random access. ADPCM is a forward-only stream;
//! the reader hides that by keeping the decoder state, rewinding when asked
//! for an earlier sample, and checkpointing the decoder at the loop start so
//! a loop wrap restores state in O(1) instead of re-decoding the approach.

use kiln_adpcm::{AdpcmState, Decoder};
use kiln_module::{InstrumentHeader, SampleFormat};
use kiln_vmem::{BlockAnchor, MemFault, RoMem, VirtAddr};
use tracing::debug;

/// Bytes fetched per store access.
const CHUNK: usize = 32;

/// Where a playing sample lives and how it loops.
///
/// A plain descriptor, copied out of an [`InstrumentHeader`] when a note
/// triggers. Loop bounds are in decoded samples; `loop_end == 0` means
/// unlooped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleSource {
    pub data: VirtAddr,
    /// Stored size in bytes.
    pub size: u32,
    pub format: SampleFormat,
    pub loop_start: u32,
    pub loop_end: u32,
}

impl SampleSource {
    /// Build a source from an instrument, or `None` if its format byte is
    /// not one this engine decodes.
    pub fn from_instrument(ins: &InstrumentHeader) -> Option<SampleSource> {
        Some(SampleSource {
            data: ins.sample_data,
            size: ins.sample_size,
            format: SampleFormat::from_raw(ins.format)?,
            loop_start: ins.loop_start,
            loop_end: ins.loop_end,
        })
    }

    pub fn n_samples(&self) -> u32 {
        match self.format {
            SampleFormat::Pcm16 => self.size / 2,
            SampleFormat::Adpcm => self.size * 2,
        }
    }

    pub fn has_loop(&self) -> bool {
        self.loop_end > self.loop_start && self.loop_end <= self.n_samples()
    }
}

/// Per-channel sample fetcher.
#[derive(Debug, Default)]
pub struct SampleReader {
    src: SampleSource,
    chunk: [u8; CHUNK],
    /// Byte offset of `chunk[0]` in the sample data; `chunk_len == 0` means
    /// nothing cached.
    chunk_base: u32,
    chunk_len: usize,
    anchor: BlockAnchor,

    // ADPCM stream position: `cursor` is the next sample the decoder will
    // produce, `hist` holds the last `have` decoded samples (hist[1] newest).
    dec: Decoder,
    cursor: u32,
    hist: [i16; 2],
    have: u8,
    /// Decoder state captured just before decoding the loop-start sample.
    loop_mark: Option<(AdpcmState, u32)>,
}

impl SampleReader {
    pub fn new(src: SampleSource) -> SampleReader {
        SampleReader {
            src,
            ..SampleReader::default()
        }
    }

    pub fn source(&self) -> &SampleSource {
        &self.src
    }

    /// Fetch the decoded sample at `idx`.
    ///
    /// The mixer reads mostly-forward with occasional loop wraps; both
    /// formats support arbitrary `idx`, ADPCM just pays more for going
    /// backwards past its checkpoint.
    pub fn sample_at<S: RoMem>(&mut self, store: &S, idx: u32) -> Result<i16, MemFault> {
        debug_assert!(idx < self.src.n_samples());
        match self.src.format {
            SampleFormat::Pcm16 => self.pcm_at(store, idx),
            SampleFormat::Adpcm => self.adpcm_at(store, idx),
        }
    }

    /// Let go of the pinned store block between mix bursts.
    pub fn release_ref<S: RoMem>(&mut self, store: &S) {
        store.release_anchor(&mut self.anchor);
    }

    fn byte_at<S: RoMem>(&mut self, store: &S, offset: u32) -> Result<u8, MemFault> {
        if self.chunk_len == 0
            || offset < self.chunk_base
            || offset >= self.chunk_base + self.chunk_len as u32
        {
            let len = CHUNK.min((self.src.size - offset) as usize);
            store.copy_anchored(&mut self.anchor, self.src.data + offset, &mut self.chunk[..len])?;
            self.chunk_base = offset;
            self.chunk_len = len;
        }
        Ok(self.chunk[(offset - self.chunk_base) as usize])
    }

    fn pcm_at<S: RoMem>(&mut self, store: &S, idx: u32) -> Result<i16, MemFault> {
        let lo = self.byte_at(store, idx * 2)?;
        let hi = self.byte_at(store, idx * 2 + 1)?;
        Ok(i16::from_le_bytes([lo, hi]))
    }

    fn adpcm_at<S: RoMem>(&mut self, store: &S, idx: u32) -> Result<i16, MemFault> {
        // Already decoded and still in the history window?
        if self.have >= 1 && idx + 1 == self.cursor {
            return Ok(self.hist[1]);
        }
        if self.have >= 2 && idx + 2 == self.cursor {
            return Ok(self.hist[0]);
        }

        if idx + 1 < self.cursor {
            // Going backwards. Restore the loop checkpoint when it covers
            // the target, else start the stream over.
            match self.loop_mark {
                Some((state, mark)) if idx >= mark => {
                    self.dec = Decoder::from_state(state);
                    self.cursor = mark;
                }
                _ => {
                    debug!(idx, cursor = self.cursor, "rewinding adpcm stream");
                    self.dec = Decoder::new();
                    self.cursor = 0;
                }
            }
            self.have = 0;
        }

        while self.cursor <= idx {
            self.decode_next(store)?;
        }
        Ok(self.hist[1])
    }

    fn decode_next<S: RoMem>(&mut self, store: &S) -> Result<(), MemFault> {
        if self.loop_mark.is_none() && self.src.has_loop() && self.cursor == self.src.loop_start {
            self.loop_mark = Some((self.dec.state(), self.cursor));
        }

        let byte = self.byte_at(store, self.cursor / 2)?;
        let nibble = if self.cursor % 2 == 0 { byte >> 4 } else { byte };
        let sample = self.dec.decode_nibble(nibble);

        self.hist[0] = self.hist[1];
        self.hist[1] = sample;
        self.have = (self.have + 1).min(2);
        self.cursor += 1;
        Ok(())
    }
}
