//! Pull-model playback facade
//!
//! [`TrackerPlayer`] owns the store, sequencer and mixer, and renders audio
//! whenever the output device asks for frames. Sequencer ticks are
//! interleaved sample-accurately: the mixer renders up to the next tick
//! boundary, the sequencer runs, and rendering resumes - so effect timing
//! does not depend on the device's buffer size.

use kiln_module::SongHeader;
use kiln_vmem::{RoMem, VirtAddr};

use crate::mixer::ChannelMixer;
use crate::sequencer::TrackerSequencer;
use crate::{TrackerError, TrackerEvent};

/// Frames mixed per inner loop pass; also the accumulator size.
const MIX_CHUNK: usize = 128;

pub struct TrackerPlayer<S: RoMem> {
    store: S,
    sequencer: TrackerSequencer,
    mixer: ChannelMixer,
    scratch: [i32; MIX_CHUNK],
}

impl<S: RoMem> TrackerPlayer<S> {
    /// A player rendering at `device_rate` Hz, mono.
    pub fn new(store: S, device_rate: u32) -> TrackerPlayer<S> {
        TrackerPlayer {
            store,
            sequencer: TrackerSequencer::new(),
            mixer: ChannelMixer::new(device_rate),
            scratch: [0; MIX_CHUNK],
        }
    }

    /// Start the song whose header lives at `song` in the store.
    pub fn play(&mut self, song: VirtAddr) -> Result<(), TrackerError> {
        let mut buf = [0u8; SongHeader::SIZE];
        self.store.copy(song, &mut buf)?;
        self.play_song(SongHeader::from_bytes(&buf))
    }

    /// Start from an already-decoded header.
    pub fn play_song(&mut self, song: SongHeader) -> Result<(), TrackerError> {
        self.sequencer.play(&self.store, &mut self.mixer, song)
    }

    pub fn stop(&mut self) {
        self.sequencer.stop(&mut self.mixer);
    }

    pub fn pause(&mut self) {
        self.sequencer.pause(&mut self.mixer);
    }

    pub fn resume(&mut self) {
        self.sequencer.resume(&mut self.mixer);
    }

    pub fn is_stopped(&self) -> bool {
        self.sequencer.is_stopped()
    }

    pub fn is_paused(&self) -> bool {
        self.sequencer.is_paused()
    }

    /// Output volume, 0..=[`crate::MAX_VOLUME`].
    pub fn set_volume(&mut self, volume: i32) {
        self.sequencer.set_user_volume(volume);
    }

    pub fn set_channel_volume(&mut self, ch: usize, volume: i32) {
        self.sequencer.set_channel_volume(ch, volume);
    }

    /// Speed the song up or down by a percentage; positive is faster.
    pub fn set_tempo_modifier(&mut self, percent: i32) {
        self.sequencer.set_tempo_modifier(percent);
    }

    /// Jump to a phrase and row at the next row boundary.
    pub fn set_position(&mut self, phrase: u16, row: u16) {
        self.sequencer.set_position(phrase, row);
    }

    pub fn take_event(&mut self) -> Option<TrackerEvent> {
        self.sequencer.take_event()
    }

    pub fn current_position(&self) -> (u16, u16) {
        self.sequencer.current_position()
    }

    /// Render `out.len()` mono frames.
    ///
    /// Always fills the whole buffer; a stopped or paused player renders
    /// silence (plus any still-ringing channels, there are none once the
    /// sequencer has stopped them).
    pub fn pull(&mut self, out: &mut [i16]) {
        let mut done = 0;
        while done < out.len() {
            let mut n = (out.len() - done).min(MIX_CHUNK);
            if !self.sequencer.is_stopped() && !self.sequencer.is_paused() {
                if self.mixer.tick_elapsed() {
                    self.sequencer.tick(&self.store, &mut self.mixer);
                }
                // Never render across a tick boundary
                n = n.min(self.mixer.frames_to_tick().max(1) as usize);
            }

            let scratch = &mut self.scratch[..n];
            scratch.fill(0);
            self.mixer.mix_audio(&self.store, scratch);
            for (dst, &acc) in out[done..done + n].iter_mut().zip(scratch.iter()) {
                *dst = acc.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            }
            done += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{SongBuilder, init_logs, note};
    use kiln_module::Note;

    fn simple_song() -> (kiln_vmem::RamStore, u32) {
        let mut builder = SongBuilder::new(1);
        let samples: Vec<i16> =
            (0..2048).map(|i| if i % 16 < 8 { 6000 } else { -6000 }).collect();
        let ins = builder.instrument(&samples, 8363, Some((0, 2048)));
        let pattern = builder.pattern(&[
            &[note(49, ins)],
            &[Note::EMPTY],
            &[Note::EMPTY],
            &[Note::EMPTY],
        ]);
        builder.order(&[pattern]);
        builder.finish()
    }

    #[test]
    fn test_pull_renders_audio() {
        init_logs();
        let (store, song_va) = simple_song();
        let mut player = TrackerPlayer::new(store, 22050);
        player.play(song_va).unwrap();

        // A bit over one tick (20ms at bpm 125 = 441 frames at 22050)
        let mut out = [0i16; 2000];
        player.pull(&mut out);

        // Until the first tick fires there is silence; after it the square
        // wave must be audible
        assert!(out[..64].iter().all(|&s| s == 0));
        assert!(out.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_stop_silences_output() {
        let (store, song_va) = simple_song();
        let mut player = TrackerPlayer::new(store, 22050);
        player.play(song_va).unwrap();

        let mut out = [0i16; 1024];
        player.pull(&mut out);
        player.stop();
        assert!(player.is_stopped());

        let mut tail = [0i16; 512];
        player.pull(&mut tail);
        assert!(tail.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_pause_freezes_and_resume_continues() {
        let (store, song_va) = simple_song();
        let mut player = TrackerPlayer::new(store, 22050);
        player.play(song_va).unwrap();

        let mut out = [0i16; 1024];
        player.pull(&mut out);

        player.pause();
        assert!(player.is_paused());
        let mut quiet = [0i16; 512];
        player.pull(&mut quiet);
        assert!(quiet.iter().all(|&s| s == 0));

        player.resume();
        let mut loud = [0i16; 512];
        player.pull(&mut loud);
        assert!(loud.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_song_end_posts_event() {
        let (store, song_va) = simple_song();
        let mut player = TrackerPlayer::new(store, 22050);
        player.play(song_va).unwrap();

        // 4 rows * 6 ticks * 441 frames: drain well past the song's end
        let mut out = [0i16; 16384];
        player.pull(&mut out);
        assert!(player.is_stopped());
        assert_eq!(player.take_event(), Some(TrackerEvent::SongEnded));
    }

    #[test]
    fn test_user_volume_scales_output() {
        let (store, song_va) = simple_song();
        let mut player = TrackerPlayer::new(store, 22050);
        player.play(song_va).unwrap();
        let mut loud = [0i16; 2048];
        player.pull(&mut loud);
        let loud_peak = loud.iter().map(|s| s.unsigned_abs()).max().unwrap();

        let (store, song_va) = simple_song();
        let mut player = TrackerPlayer::new(store, 22050);
        player.set_volume(crate::MAX_VOLUME / 4);
        player.play(song_va).unwrap();
        let mut soft = [0i16; 2048];
        player.pull(&mut soft);
        let soft_peak = soft.iter().map(|s| s.unsigned_abs()).max().unwrap();

        assert!(loud_peak > 0);
        assert!(soft_peak > 0);
        assert!(soft_peak < loud_peak / 2);
    }
}
