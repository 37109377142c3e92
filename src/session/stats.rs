use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::atomic::AtomicCell;
use tracing::info;

/// Receive-side counters of one UDP stream.
#[derive(Default)]
pub struct StreamCounters {
    pub packets: AtomicU64,
    pub bytes: AtomicU64,
    pub malformed: AtomicU64,
    pub out_of_sequence: AtomicU64,
    last_packet_ns: AtomicCell<Option<u64>>,
}

impl StreamCounters {
    pub fn record_packet(&self, len: usize, now_ns: u64) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.last_packet_ns.store(Some(now_ns));
    }

    /// Arrival time of the most recent valid packet.
    pub fn last_packet_ns(&self) -> Option<u64> {
        self.last_packet_ns.load()
    }

    pub fn clear_last_packet(&self) {
        self.last_packet_ns.store(None);
    }
}

/// Counters shared by the receivers, the driver and the assembler.
///
/// Everything except the last-packet times is reset each time a batch is logged.
#[derive(Default)]
pub struct SessionStats {
    pub video: Arc<StreamCounters>,
    pub audio: Arc<StreamCounters>,
    pub frames_completed: AtomicU64,
    pub frames_delivered: AtomicU64,
    pub frame_drops: AtomicU64,
    pub packet_drops: AtomicU64,
    pub duplicate_packets: AtomicU64,
    pub stale_packets: AtomicU64,
    pub audio_blocks: AtomicU64,
    pub audio_decode_errors: AtomicU64,
    pub placeholder_frames: AtomicU64,
    pub reconnect_requests: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsBatch {
    pub video_packets: u64,
    pub video_bytes: u64,
    pub audio_packets: u64,
    pub audio_bytes: u64,
    pub malformed: u64,
    pub out_of_sequence: u64,
    pub frames_completed: u64,
    pub frames_delivered: u64,
    pub frame_drops: u64,
    pub packet_drops: u64,
    pub duplicate_packets: u64,
    pub stale_packets: u64,
    pub audio_blocks: u64,
    pub audio_decode_errors: u64,
    pub placeholder_frames: u64,
    pub reconnect_requests: u64,
}

impl StatsBatch {
    /// Share of started frames that were delivered, in percent.
    pub fn completion_percent(&self) -> f64 {
        let started = self.frames_completed + self.frame_drops;
        if started == 0 {
            return 0.0;
        }
        self.frames_completed as f64 * 100.0 / started as f64
    }
}

impl SessionStats {
    /// Reads and zeroes the counters.
    pub fn take_batch(&self) -> StatsBatch {
        let take = |c: &AtomicU64| c.swap(0, Ordering::Relaxed);
        StatsBatch {
            video_packets: take(&self.video.packets),
            video_bytes: take(&self.video.bytes),
            audio_packets: take(&self.audio.packets),
            audio_bytes: take(&self.audio.bytes),
            malformed: take(&self.video.malformed) + take(&self.audio.malformed),
            out_of_sequence: take(&self.video.out_of_sequence) + take(&self.audio.out_of_sequence),
            frames_completed: take(&self.frames_completed),
            frames_delivered: take(&self.frames_delivered),
            frame_drops: take(&self.frame_drops),
            packet_drops: take(&self.packet_drops),
            duplicate_packets: take(&self.duplicate_packets),
            stale_packets: take(&self.stale_packets),
            audio_blocks: take(&self.audio_blocks),
            audio_decode_errors: take(&self.audio_decode_errors),
            placeholder_frames: take(&self.placeholder_frames),
            reconnect_requests: take(&self.reconnect_requests),
        }
    }

    /// Logs one summary line for the elapsed period and resets the counters.
    pub fn log_batch(&self, elapsed: Duration) -> StatsBatch {
        let batch = self.take_batch();
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);

        info!(
            "Stream stats ({:.1}s): video {:.0} pkt/s {:.2} Mbps, audio {:.0} pkt/s, \
             frames {:.1} fps delivered, {} completed, {} dropped ({:.1}% complete), \
             packets {} dropped, {} malformed, {} out of sequence",
            secs,
            batch.video_packets as f64 / secs,
            batch.video_bytes as f64 * 8.0 / secs / 1e6,
            batch.audio_packets as f64 / secs,
            batch.frames_delivered as f64 / secs,
            batch.frames_completed,
            batch.frame_drops,
            batch.completion_percent(),
            batch.packet_drops,
            batch.malformed,
            batch.out_of_sequence,
        );
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_batch_resets_counters() {
        let stats = SessionStats::default();
        stats.video.record_packet(780, 10);
        stats.video.record_packet(780, 20);
        stats.audio.record_packet(770, 30);
        stats.frames_completed.fetch_add(3, Ordering::Relaxed);
        stats.frame_drops.fetch_add(1, Ordering::Relaxed);

        let batch = stats.log_batch(Duration::from_secs(5));
        assert_eq!(batch.video_packets, 2);
        assert_eq!(batch.video_bytes, 1560);
        assert_eq!(batch.audio_packets, 1);
        assert_eq!(batch.completion_percent(), 75.0);

        assert_eq!(stats.take_batch(), StatsBatch::default());
        assert_eq!(stats.video.last_packet_ns(), Some(20));
    }

    #[test]
    fn test_completion_without_frames() {
        assert_eq!(StatsBatch::default().completion_percent(), 0.0);
    }
}
