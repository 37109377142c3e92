use crate::error::PacketError;
use crate::protocol::{
    AUDIO_CHANNELS, AUDIO_HEADER_SIZE, AUDIO_PACKET_SIZE, AUDIO_SAMPLE_RATE, AudioHeader,
};

/// One 4 ms block of interleaved stereo 16-bit PCM at the C64's 47 976 Hz.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub sequence_num: u16,
    pub timestamp_ns: u64,
    samples: Vec<i16>,
}

impl AudioBlock {
    /// Decodes an audio datagram. The timestamp is left at zero for the clock to fill in.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        PacketError::check_size(data.len(), AUDIO_PACKET_SIZE)?;
        let header = AudioHeader::parse(data)?;

        let samples = data[AUDIO_HEADER_SIZE..]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        Ok(Self {
            sequence_num: header.sequence_num,
            timestamp_ns: 0,
            samples,
        })
    }

    /// Returns an iterator over the samples of one channel.
    pub fn iter_channel(&self, channel_idx: usize) -> impl Iterator<Item = &i16> {
        assert!(
            channel_idx < AUDIO_CHANNELS,
            "Channel index {} out of bounds (max {})",
            channel_idx,
            AUDIO_CHANNELS - 1
        );
        self.samples.iter().skip(channel_idx).step_by(AUDIO_CHANNELS)
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / AUDIO_CHANNELS
    }

    pub const fn channels(&self) -> usize {
        AUDIO_CHANNELS
    }

    pub const fn sample_rate(&self) -> u32 {
        AUDIO_SAMPLE_RATE
    }

    /// Interleaved samples, left channel first.
    pub fn data(&self) -> &[i16] {
        &self.samples
    }
}
