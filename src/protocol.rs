//! Wire format of the C64 Ultimate UDP streams.
//!
//! Both streams are little-endian and carry one fixed-size datagram per packet.
//!
//! ```text
//! Video (780 bytes)
//! ┌──────┬───────┬──────┬─────┬─────┬─────┬──────────┬───────────────────────┐
//! │ seq  │ frame │ line │ ppl │ lpp │ bpp │ encoding │ raster: 4 × 192 bytes │
//! │ u16  │ u16   │ u16  │ u16 │ u8  │ u8  │ u16      │ two 4-bit pixels/byte │
//! └──────┴───────┴──────┴─────┴─────┴─────┴──────────┴───────────────────────┘
//!                  bit 15 of `line` marks the last packet of a frame
//!
//! Audio (770 bytes)
//! ┌──────┬──────────────────────────────────────────┐
//! │ seq  │ 192 stereo frames of interleaved i16 L/R │
//! └──────┴──────────────────────────────────────────┘
//! ```

use crate::error::PacketError;

pub const VIDEO_PACKET_SIZE: usize = 780;
pub const VIDEO_HEADER_SIZE: usize = 12;
pub const AUDIO_PACKET_SIZE: usize = 770;
pub const AUDIO_HEADER_SIZE: usize = 2;
/// Largest datagram either stream produces.
pub const MAX_PACKET_SIZE: usize = VIDEO_PACKET_SIZE;

pub const PIXELS_PER_LINE: u16 = 384;
pub const LINES_PER_PACKET: u8 = 4;
pub const BITS_PER_PIXEL: u8 = 4;
pub const BYTES_PER_LINE: usize = PIXELS_PER_LINE as usize * BITS_PER_PIXEL as usize / 8;
pub const RASTER_BYTES: usize = BYTES_PER_LINE * LINES_PER_PACKET as usize;

pub const PAL_HEIGHT: u32 = 272;
pub const NTSC_HEIGHT: u32 = 240;
pub const MAX_PACKETS_PER_FRAME: usize = PAL_HEIGHT as usize / LINES_PER_PACKET as usize;

pub const LAST_PACKET_FLAG: u16 = 0x8000;
const LINE_NUMBER_MASK: u16 = 0x7FFF;

pub const AUDIO_CHANNELS: usize = 2;
pub const AUDIO_FRAMES_PER_PACKET: usize = 192;
pub const AUDIO_SAMPLES_PER_PACKET: usize = AUDIO_FRAMES_PER_PACKET * AUDIO_CHANNELS;
pub const AUDIO_SAMPLE_RATE: u32 = 47_976;

/// Upper bound of the packet rate of each stream, used to size buffers from a delay.
pub const MAX_VIDEO_PACKET_RATE: u32 = 3590;
pub const MAX_AUDIO_PACKET_RATE: u32 = 250;

pub const DEFAULT_VIDEO_PORT: u16 = 11000;
pub const DEFAULT_AUDIO_PORT: u16 = 11001;
pub const CONTROL_PORT: u16 = 64;

/// Signed distance from `b` to `a` in 16-bit wraparound space.
///
/// Positive when `a` is ahead of `b` by less than half the number space.
#[inline]
pub fn seq_diff(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

#[inline]
fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoHeader {
    pub sequence_num: u16,
    pub frame_num: u16,
    /// Line number with the last-packet flag stripped.
    pub line_num: u16,
    pub last_packet: bool,
    pub pixels_per_line: u16,
    pub lines_per_packet: u8,
    pub bits_per_pixel: u8,
    pub encoding: u16,
}

impl VideoHeader {
    /// Reads the header fields without checking the raster format.
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < VIDEO_HEADER_SIZE {
            return Err(PacketError::TooShort {
                len: data.len(),
                min: VIDEO_HEADER_SIZE,
            });
        }

        let raw_line = read_u16(data, 4);
        Ok(Self {
            sequence_num: read_u16(data, 0),
            frame_num: read_u16(data, 2),
            line_num: raw_line & LINE_NUMBER_MASK,
            last_packet: raw_line & LAST_PACKET_FLAG != 0,
            pixels_per_line: read_u16(data, 6),
            lines_per_packet: data[8],
            bits_per_pixel: data[9],
            encoding: read_u16(data, 10),
        })
    }

    /// Parses and checks that the packet describes the one raster format the device sends.
    pub fn parse_validated(data: &[u8]) -> Result<Self, PacketError> {
        let header = Self::parse(data)?;
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<(), PacketError> {
        if self.pixels_per_line != PIXELS_PER_LINE
            || self.lines_per_packet != LINES_PER_PACKET
            || self.bits_per_pixel != BITS_PER_PIXEL
        {
            return Err(PacketError::BadGeometry {
                pixels_per_line: self.pixels_per_line,
                lines_per_packet: self.lines_per_packet,
                bits_per_pixel: self.bits_per_pixel,
            });
        }

        if self.line_num % self.lines_per_packet as u16 != 0 {
            return Err(PacketError::MisalignedLine {
                line_num: self.line_num,
                lines_per_packet: self.lines_per_packet,
            });
        }

        Ok(())
    }

    /// Slot of this packet within its frame.
    pub fn packet_index(&self) -> usize {
        (self.line_num / self.lines_per_packet.max(1) as u16) as usize
    }

    /// Writes the header into the first [`VIDEO_HEADER_SIZE`] bytes of `out`.
    pub fn write_to(&self, out: &mut [u8]) {
        let mut line = self.line_num & LINE_NUMBER_MASK;
        if self.last_packet {
            line |= LAST_PACKET_FLAG;
        }
        out[0..2].copy_from_slice(&self.sequence_num.to_le_bytes());
        out[2..4].copy_from_slice(&self.frame_num.to_le_bytes());
        out[4..6].copy_from_slice(&line.to_le_bytes());
        out[6..8].copy_from_slice(&self.pixels_per_line.to_le_bytes());
        out[8] = self.lines_per_packet;
        out[9] = self.bits_per_pixel;
        out[10..12].copy_from_slice(&self.encoding.to_le_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    pub sequence_num: u16,
}

impl AudioHeader {
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < AUDIO_HEADER_SIZE {
            return Err(PacketError::TooShort {
                len: data.len(),
                min: AUDIO_HEADER_SIZE,
            });
        }
        Ok(Self {
            sequence_num: read_u16(data, 0),
        })
    }
}

/// Builds a well-formed video datagram. Every raster byte is set to `fill`.
pub fn build_video_packet(
    sequence_num: u16,
    frame_num: u16,
    line_num: u16,
    last_packet: bool,
    fill: u8,
) -> [u8; VIDEO_PACKET_SIZE] {
    let mut packet = [fill; VIDEO_PACKET_SIZE];
    VideoHeader {
        sequence_num,
        frame_num,
        line_num,
        last_packet,
        pixels_per_line: PIXELS_PER_LINE,
        lines_per_packet: LINES_PER_PACKET,
        bits_per_pixel: BITS_PER_PIXEL,
        encoding: 0,
    }
    .write_to(&mut packet);
    packet
}

/// Builds an audio datagram whose samples are produced by `sample(index)`.
pub fn build_audio_packet(
    sequence_num: u16,
    mut sample: impl FnMut(usize) -> i16,
) -> [u8; AUDIO_PACKET_SIZE] {
    let mut packet = [0u8; AUDIO_PACKET_SIZE];
    packet[0..2].copy_from_slice(&sequence_num.to_le_bytes());
    for (i, chunk) in packet[AUDIO_HEADER_SIZE..].chunks_exact_mut(2).enumerate() {
        chunk.copy_from_slice(&sample(i).to_le_bytes());
    }
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_constants() {
        assert_eq!(BYTES_PER_LINE, 192);
        assert_eq!(RASTER_BYTES, 768);
        assert_eq!(VIDEO_HEADER_SIZE + RASTER_BYTES, VIDEO_PACKET_SIZE);
        assert_eq!(AUDIO_HEADER_SIZE + AUDIO_SAMPLES_PER_PACKET * 2, AUDIO_PACKET_SIZE);
        assert_eq!(MAX_PACKETS_PER_FRAME, 68);
    }

    #[test]
    fn test_parse_video_header_fields() {
        let packet = build_video_packet(0x1234, 100, 268, true, 0);
        let header = VideoHeader::parse(&packet).unwrap();

        assert_eq!(header.sequence_num, 0x1234);
        assert_eq!(header.frame_num, 100);
        assert_eq!(header.line_num, 268);
        assert!(header.last_packet);
        assert_eq!(header.packet_index(), 67);
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_parse_reads_little_endian() {
        let mut packet = build_video_packet(0, 0, 0, false, 0);
        packet[0] = 0x01;
        packet[1] = 0x02;
        packet[4] = 0x08;
        packet[5] = 0x80;

        let header = VideoHeader::parse(&packet).unwrap();
        assert_eq!(header.sequence_num, 0x0201);
        assert_eq!(header.line_num, 8);
        assert!(header.last_packet);
    }

    #[test]
    fn test_short_packets_rejected() {
        assert_eq!(
            VideoHeader::parse(&[0u8; 11]),
            Err(PacketError::TooShort { len: 11, min: 12 })
        );
        assert_eq!(
            AudioHeader::parse(&[0u8; 1]),
            Err(PacketError::TooShort { len: 1, min: 2 })
        );
    }

    #[test]
    fn test_bad_geometry_rejected() {
        let mut packet = build_video_packet(1, 1, 0, false, 0);
        packet[6..8].copy_from_slice(&320u16.to_le_bytes());

        assert!(matches!(
            VideoHeader::parse_validated(&packet),
            Err(PacketError::BadGeometry {
                pixels_per_line: 320,
                ..
            })
        ));
    }

    #[test]
    fn test_misaligned_line_rejected() {
        let packet = build_video_packet(1, 1, 6, false, 0);
        assert_eq!(
            VideoHeader::parse_validated(&packet),
            Err(PacketError::MisalignedLine {
                line_num: 6,
                lines_per_packet: 4
            })
        );
    }

    #[test]
    fn test_audio_header() {
        let packet = build_audio_packet(0xFFFE, |i| i as i16);
        assert_eq!(AudioHeader::parse(&packet).unwrap().sequence_num, 0xFFFE);
        assert_eq!(i16::from_le_bytes([packet[4], packet[5]]), 1);
    }

    #[test]
    fn test_seq_diff_wraps() {
        assert_eq!(seq_diff(1, 0), 1);
        assert_eq!(seq_diff(0, 65535), 1);
        assert_eq!(seq_diff(65535, 0), -1);
        assert_eq!(seq_diff(100, 100), 0);
    }
}
