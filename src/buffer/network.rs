use std::sync::Arc;

use tracing::info;

use super::kind::{Audio, Video};
use super::ring::PacketRingBuffer;
use super::slot::PacketSlot;

/// One video packet plus, when one was ready, the oldest audio packet.
#[derive(Debug, Clone, Default)]
pub struct PacketPair {
    video: PacketSlot,
    audio: PacketSlot,
    has_audio: bool,
}

impl PacketPair {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video(&self) -> &PacketSlot {
        &self.video
    }

    pub fn audio(&self) -> Option<&PacketSlot> {
        self.has_audio.then_some(&self.audio)
    }

    /// Earliest arrival time of the packets in the pair.
    pub fn arrival_us(&self) -> u64 {
        match self.audio() {
            Some(audio) => audio.arrival_us().min(self.video.arrival_us()),
            None => self.video.arrival_us(),
        }
    }
}

/// The video and audio jitter buffers of one session.
pub struct NetworkBuffer {
    video: Arc<PacketRingBuffer<Video>>,
    audio: Arc<PacketRingBuffer<Audio>>,
}

impl NetworkBuffer {
    pub fn new(max_delay_ms: u32) -> Self {
        Self {
            video: Arc::new(PacketRingBuffer::with_max_delay(max_delay_ms)),
            audio: Arc::new(PacketRingBuffer::with_max_delay(max_delay_ms)),
        }
    }

    pub fn video(&self) -> &Arc<PacketRingBuffer<Video>> {
        &self.video
    }

    pub fn audio(&self) -> &Arc<PacketRingBuffer<Audio>> {
        &self.audio
    }

    pub fn set_delay(&self, video_delay_ms: u32, audio_delay_ms: u32, now_us: u64) {
        self.video.set_delay(video_delay_ms, now_us);
        self.audio.set_delay(audio_delay_ms, now_us);
    }

    /// Pops the next ready video packet together with a ready audio packet, if any.
    ///
    /// Audio is never released on its own; without a ready video packet nothing is popped.
    pub fn pop_pair_into(&self, now_us: u64, pair: &mut PacketPair) -> bool {
        if !self.video.pop_if_ready_into(now_us, &mut pair.video) {
            return false;
        }
        pair.has_audio = self.audio.pop_if_ready_into(now_us, &mut pair.audio);
        true
    }

    pub fn flush(&self) {
        self.video.reset();
        self.audio.reset();
        info!("Network buffers flushed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_audio_packet, build_video_packet};

    #[test]
    fn test_pair_needs_video() {
        let buffers = NetworkBuffer::new(500);
        buffers.audio().push(&build_audio_packet(1, |_| 0), 0);

        let mut pair = PacketPair::new();
        assert!(!buffers.pop_pair_into(1_000, &mut pair));
        assert_eq!(buffers.audio().len(), 1);
    }

    #[test]
    fn test_pair_with_and_without_audio() {
        let buffers = NetworkBuffer::new(500);
        buffers.video().push(&build_video_packet(1, 1, 0, false, 0), 300);
        buffers.video().push(&build_video_packet(2, 1, 4, false, 0), 400);
        buffers.audio().push(&build_audio_packet(7, |_| 0), 100);

        let mut pair = PacketPair::new();
        assert!(buffers.pop_pair_into(1_000, &mut pair));
        assert_eq!(pair.video().line_num(), 0);
        assert_eq!(pair.audio().map(|a| a.sequence_num()), Some(7));
        assert_eq!(pair.arrival_us(), 100);

        assert!(buffers.pop_pair_into(1_000, &mut pair));
        assert_eq!(pair.video().line_num(), 4);
        assert!(pair.audio().is_none());
        assert_eq!(pair.arrival_us(), 400);
    }

    #[test]
    fn test_independent_delays() {
        let buffers = NetworkBuffer::new(500);
        buffers.set_delay(10, 100, 0);
        buffers.video().push(&build_video_packet(1, 1, 0, false, 0), 0);
        buffers.audio().push(&build_audio_packet(1, |_| 0), 0);

        let mut pair = PacketPair::new();
        assert!(buffers.pop_pair_into(20_000, &mut pair));
        assert!(pair.audio().is_none());
        assert_eq!(buffers.audio().len(), 1);
    }

    #[test]
    fn test_flush() {
        let buffers = NetworkBuffer::new(500);
        buffers.video().push(&build_video_packet(1, 1, 0, false, 0), 0);
        buffers.audio().push(&build_audio_packet(1, |_| 0), 0);
        buffers.flush();
        assert!(buffers.video().is_empty());
        assert!(buffers.audio().is_empty());
    }
}
