//! Volume envelope and fadeout processing
//!
//! Envelopes are piecewise-linear over packed points (tick offset in the
//! low 9 bits, value in the high 7). The cursor walks one tick per call,
//! holding at the sustain point until key-off and wrapping at the loop end
//! point. Fadeout is a 16-bit countdown that only runs after key-off; the
//! committed volume is scaled by both.

use kiln_module::{VOLUME_MAX, envelope_offset, envelope_value};

use crate::sequencer::{Channel, ChannelState};

/// Advance one channel's envelope by a tick.
///
/// Channels without an envelope take the short path: key-off stops them
/// outright (their samples coast out via `Coasting` instead).
pub(super) fn process(channel: &mut Channel) {
    if !channel.envelope_enabled() {
        channel.env_value = VOLUME_MAX as i32;
        if channel.state == ChannelState::Finish {
            channel.state = ChannelState::Stop;
        }
        return;
    }

    // Fadeout runs from key-off until it hits zero
    if channel.state == ChannelState::Finish {
        channel.fadeout = channel.fadeout.saturating_sub(channel.instrument.fadeout);
        if channel.fadeout == 0 {
            channel.state = ChannelState::Stop;
            return;
        }
    }

    let env = channel.instrument.envelope;
    let n = env.n_points as usize;
    let points = &channel.env_points[..n];
    let cursor = &mut channel.envelope;
    let at = cursor.point as usize;

    // Value at the cursor
    let (value, segment_over) = if at + 1 >= n {
        (envelope_value(points[n - 1]) as i32, true)
    } else {
        let t0 = envelope_offset(points[at]) as i32;
        let t1 = envelope_offset(points[at + 1]) as i32;
        let v0 = envelope_value(points[at]) as i32;
        let v1 = envelope_value(points[at + 1]) as i32;
        let span = (t1 - t0).max(1);
        let k = (cursor.tick as i32).min(span);
        (v0 + (v1 - v0) * k / span, k >= span)
    };
    channel.env_value = value.clamp(0, VOLUME_MAX as i32);

    // Sustain pins the cursor at its point until key-off
    let finishing = matches!(channel.state, ChannelState::Finish | ChannelState::Stop);
    if !finishing && env.has_sustain() && cursor.point == env.sustain_point && cursor.tick == 0 {
        return;
    }

    if at + 1 >= n {
        // Past the last point: one final tick at the end value, then the
        // channel is done
        if cursor.done {
            channel.state = ChannelState::Stop;
        } else {
            cursor.done = true;
        }
    } else if segment_over {
        cursor.point += 1;
        cursor.tick = 0;
        if env.has_loop() && cursor.point >= env.loop_end_point {
            cursor.point = env.loop_start_point.min((n - 1) as u8);
        }
    } else {
        cursor.tick += 1;
    }
}

/// Jump the envelope cursor to an absolute tick position (Lxx).
pub(super) fn seek(channel: &mut Channel, pos: u8) {
    if !channel.envelope_enabled() {
        return;
    }
    let n = channel.instrument.envelope.n_points as usize;
    let points = &channel.env_points[..n];
    let target = pos as u16;

    let mut at = 0;
    while at + 1 < n && envelope_offset(points[at + 1]) <= target {
        at += 1;
    }
    channel.envelope.point = at as u8;
    channel.envelope.tick = target.saturating_sub(envelope_offset(points[at]));
    channel.envelope.done = false;
}
