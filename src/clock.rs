//! Presentation timestamps for assembled frames and audio blocks.
//!
//! Video timestamps are ideal: the first frame anchors the clock and every
//! later frame is placed at `anchor + offset × frame_interval`, which removes
//! network jitter entirely. Audio advances 4 ms per block from its first
//! block and is pulled halfway back towards wall time whenever it drifts more
//! than 100 ms.

use tracing::{debug, info};

use crate::video::PAL_FRAME_INTERVAL_NS;

pub const AUDIO_BLOCK_INTERVAL_NS: u64 = 4_000_000;
pub const DRIFT_CHECK_BLOCKS: u64 = 250;
pub const DRIFT_LIMIT_NS: i64 = 100_000_000;

/// Offset of `frame_num` from `first_frame` in 16-bit wraparound space.
pub fn frame_offset(frame_num: u16, first_frame: u16) -> i64 {
    let mut diff = frame_num as i64 - first_frame as i64;
    if diff < -32768 {
        diff += 65536;
    } else if diff > 32768 {
        diff -= 65536;
    }
    diff
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    start_ns: i64,
    first_frame: u16,
}

#[derive(Debug)]
pub struct VideoClock {
    anchor: Option<Anchor>,
    frame_interval_ns: u64,
    last: Option<(u16, i64)>,
}

impl VideoClock {
    pub fn new(frame_interval_ns: u64) -> Self {
        Self {
            anchor: None,
            frame_interval_ns,
            last: None,
        }
    }

    pub fn frame_interval_ns(&self) -> u64 {
        self.frame_interval_ns
    }

    /// Switches to a new frame interval, re-anchoring at the last stamped frame
    /// so timestamps already handed out stay consistent.
    pub fn set_frame_interval(&mut self, frame_interval_ns: u64) {
        if frame_interval_ns == self.frame_interval_ns {
            return;
        }
        if let Some((frame_num, ts)) = self.last {
            self.anchor = Some(Anchor {
                start_ns: ts,
                first_frame: frame_num,
            });
        }
        debug!(
            "Video clock: frame interval {} ns -> {} ns",
            self.frame_interval_ns, frame_interval_ns
        );
        self.frame_interval_ns = frame_interval_ns;
    }

    pub fn timestamp(&mut self, frame_num: u16, now_ns: u64) -> u64 {
        let anchor = *self.anchor.get_or_insert_with(|| {
            info!("Video clock anchored at frame {}", frame_num);
            Anchor {
                start_ns: now_ns as i64,
                first_frame: frame_num,
            }
        });

        let offset = frame_offset(frame_num, anchor.first_frame);
        let ts = anchor.start_ns + offset * self.frame_interval_ns as i64;
        self.last = Some((frame_num, ts));
        ts.max(0) as u64
    }

    pub fn reset(&mut self) {
        self.anchor = None;
        self.last = None;
    }
}

impl Default for VideoClock {
    fn default() -> Self {
        Self::new(PAL_FRAME_INTERVAL_NS)
    }
}

#[derive(Debug, Default)]
pub struct AudioClock {
    base_ns: Option<i64>,
    blocks: u64,
    corrections: u64,
}

impl AudioClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the next audio block.
    ///
    /// Every [`DRIFT_CHECK_BLOCKS`] blocks the stamp is compared with `now_ns`;
    /// beyond [`DRIFT_LIMIT_NS`] half the drift is removed, so the returned
    /// timestamps may step backwards at that point.
    pub fn next_timestamp(&mut self, now_ns: u64) -> u64 {
        let base = *self.base_ns.get_or_insert(now_ns as i64);
        let mut ts = base + (self.blocks * AUDIO_BLOCK_INTERVAL_NS) as i64;
        self.blocks += 1;

        if self.blocks % DRIFT_CHECK_BLOCKS == 0 {
            let drift = ts - now_ns as i64;
            if drift.abs() > DRIFT_LIMIT_NS {
                let correction = drift / 2;
                self.base_ns = Some(base - correction);
                ts -= correction;
                self.corrections += 1;
                info!(
                    "Audio clock: drift {:.1} ms, corrected by {:.1} ms",
                    drift as f64 / 1e6,
                    correction as f64 / 1e6
                );
            }
        }

        ts.max(0) as u64
    }

    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::NTSC_FRAME_INTERVAL_NS;
    use proptest::prelude::*;

    const START: u64 = 1_000_000_000_000;

    #[test]
    fn test_frame_offset_wraps() {
        assert_eq!(frame_offset(100, 98), 2);
        assert_eq!(frame_offset(1, 65535), 2);
        assert_eq!(frame_offset(65535, 1), -2);
        assert_eq!(frame_offset(32768, 0), 32768);
    }

    #[test]
    fn test_video_timestamps_are_ideal() {
        let mut clock = VideoClock::default();
        assert_eq!(clock.timestamp(98, START), START);
        // Arrival jitter does not matter.
        assert_eq!(clock.timestamp(100, START + 7_777_777), START + 2 * PAL_FRAME_INTERVAL_NS);
        assert_eq!(clock.timestamp(99, 0), START + PAL_FRAME_INTERVAL_NS);
    }

    #[test]
    fn test_video_timestamp_across_wrap() {
        let mut clock = VideoClock::default();
        clock.timestamp(65534, START);
        assert_eq!(clock.timestamp(1, START), START + 3 * PAL_FRAME_INTERVAL_NS);
    }

    #[test]
    fn test_interval_change_keeps_last_timestamp() {
        let mut clock = VideoClock::default();
        clock.timestamp(10, START);
        let at_12 = clock.timestamp(12, START);

        clock.set_frame_interval(NTSC_FRAME_INTERVAL_NS);
        assert_eq!(clock.timestamp(12, START), at_12);
        assert_eq!(clock.timestamp(13, START), at_12 + NTSC_FRAME_INTERVAL_NS);
    }

    #[test]
    fn test_video_reset_reanchors() {
        let mut clock = VideoClock::default();
        clock.timestamp(10, START);
        clock.reset();
        assert_eq!(clock.timestamp(500, 42), 42);
    }

    #[test]
    fn test_audio_steady_stream_not_corrected() {
        let mut clock = AudioClock::new();
        for i in 0..1000u64 {
            let now = START + i * AUDIO_BLOCK_INTERVAL_NS;
            assert_eq!(clock.next_timestamp(now), now);
        }
        assert_eq!(clock.corrections(), 0);
    }

    #[test]
    fn test_audio_drift_correction_halves_drift() {
        let mut clock = AudioClock::new();
        // Wall time stands still while 250 blocks are stamped.
        let mut last = 0;
        for _ in 0..250 {
            last = clock.next_timestamp(START);
        }
        let expected_drift = 249 * AUDIO_BLOCK_INTERVAL_NS;
        assert_eq!(last, START + expected_drift - expected_drift / 2);
        assert_eq!(clock.corrections(), 1);

        // The base moved too, so the next block continues from the corrected stamp.
        assert_eq!(clock.next_timestamp(START), last + AUDIO_BLOCK_INTERVAL_NS);
    }

    #[test]
    fn test_audio_small_drift_tolerated() {
        let mut clock = AudioClock::new();
        for i in 0..250u64 {
            // 0.3 ms per block slower than nominal: 75 ms after 250 blocks.
            clock.next_timestamp(START + i * (AUDIO_BLOCK_INTERVAL_NS - 300_000));
        }
        assert_eq!(clock.corrections(), 0);
    }

    proptest! {
        #[test]
        fn test_video_timestamps_monotonic(
            first in any::<u16>(),
            a in -32767i64..=32767,
            b in -32767i64..=32767,
        ) {
            prop_assume!(a < b);
            let mut clock = VideoClock::default();
            clock.timestamp(first, START);
            let n1 = (first as i64 + a).rem_euclid(65536) as u16;
            let n2 = (first as i64 + b).rem_euclid(65536) as u16;
            prop_assert!(clock.timestamp(n2, START) > clock.timestamp(n1, START));
        }
    }
}
