use std::cmp::Ordering;

use crate::error::PacketError;
use crate::protocol::{
    AUDIO_HEADER_SIZE, AUDIO_PACKET_SIZE, AudioHeader, MAX_AUDIO_PACKET_RATE,
    MAX_VIDEO_PACKET_RATE, VIDEO_HEADER_SIZE, VIDEO_PACKET_SIZE, VideoHeader, seq_diff,
};

/// Ordering fields extracted from a packet header when it is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotKey {
    pub sequence_num: u16,
    pub frame_num: u16,
    pub line_num: u16,
}

/// Per-stream parameters of a [`PacketRingBuffer`](super::PacketRingBuffer).
pub trait StreamKind: Send + Sync + 'static {
    const NAME: &'static str;
    const PACKET_SIZE: usize;
    const MIN_HEADER_SIZE: usize;
    /// How many stored packets an insertion may move back past.
    const SEARCH_DEPTH: usize;
    const MAX_PACKET_RATE: u32;
    /// Sequence distance beyond which the stream is considered restarted.
    const JUMP_THRESHOLD: i16;

    /// Reads the ordering key. `data` holds at least `MIN_HEADER_SIZE` bytes.
    fn parse_key(data: &[u8]) -> SlotKey;

    /// Wraparound-aware order of two keys.
    fn compare(a: &SlotKey, b: &SlotKey) -> Ordering;

    /// Full datagram validation done by the receiver before buffering.
    fn validate(data: &[u8]) -> Result<(), PacketError>;
}

#[derive(Debug, Clone, Copy)]
pub struct Video;

#[derive(Debug, Clone, Copy)]
pub struct Audio;

impl StreamKind for Video {
    const NAME: &'static str = "Video";
    const PACKET_SIZE: usize = VIDEO_PACKET_SIZE;
    const MIN_HEADER_SIZE: usize = VIDEO_HEADER_SIZE;
    const SEARCH_DEPTH: usize = 8;
    const MAX_PACKET_RATE: u32 = MAX_VIDEO_PACKET_RATE;
    const JUMP_THRESHOLD: i16 = 100;

    fn parse_key(data: &[u8]) -> SlotKey {
        match VideoHeader::parse(data) {
            Ok(header) => SlotKey {
                sequence_num: header.sequence_num,
                frame_num: header.frame_num,
                line_num: header.line_num,
            },
            Err(_) => SlotKey::default(),
        }
    }

    fn compare(a: &SlotKey, b: &SlotKey) -> Ordering {
        seq_diff(a.frame_num, b.frame_num)
            .cmp(&0)
            .then(a.line_num.cmp(&b.line_num))
    }

    fn validate(data: &[u8]) -> Result<(), PacketError> {
        PacketError::check_size(data.len(), VIDEO_PACKET_SIZE)?;
        VideoHeader::parse_validated(data).map(|_| ())
    }
}

impl StreamKind for Audio {
    const NAME: &'static str = "Audio";
    const PACKET_SIZE: usize = AUDIO_PACKET_SIZE;
    const MIN_HEADER_SIZE: usize = AUDIO_HEADER_SIZE;
    const SEARCH_DEPTH: usize = 6;
    const MAX_PACKET_RATE: u32 = MAX_AUDIO_PACKET_RATE;
    const JUMP_THRESHOLD: i16 = 50;

    fn parse_key(data: &[u8]) -> SlotKey {
        SlotKey {
            sequence_num: AudioHeader::parse(data)
                .map(|h| h.sequence_num)
                .unwrap_or_default(),
            ..SlotKey::default()
        }
    }

    fn compare(a: &SlotKey, b: &SlotKey) -> Ordering {
        seq_diff(a.sequence_num, b.sequence_num).cmp(&0)
    }

    fn validate(data: &[u8]) -> Result<(), PacketError> {
        PacketError::check_size(data.len(), AUDIO_PACKET_SIZE)?;
        AudioHeader::parse(data).map(|_| ())
    }
}
