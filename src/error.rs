//! Errors raised while decoding stream datagrams.
//!
//! Malformed packets never abort a stream: receivers count them and move on,
//! so these errors mostly end up in rate-limited log lines and statistics.
//! Session and I/O setup failures use [`anyhow`] with context instead.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("unexpected packet size: {len} bytes, expected {expected}")]
    WrongSize { len: usize, expected: usize },

    #[error(
        "unsupported raster format: {pixels_per_line} px/line, {lines_per_packet} lines/packet, {bits_per_pixel} bpp"
    )]
    BadGeometry {
        pixels_per_line: u16,
        lines_per_packet: u8,
        bits_per_pixel: u8,
    },

    #[error("line {line_num} is not aligned to {lines_per_packet} lines per packet")]
    MisalignedLine { line_num: u16, lines_per_packet: u8 },
}

impl PacketError {
    /// Checks an exact datagram size.
    pub fn check_size(len: usize, expected: usize) -> Result<(), Self> {
        if len == expected {
            Ok(())
        } else {
            Err(Self::WrongSize { len, expected })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_size() {
        assert!(PacketError::check_size(780, 780).is_ok());
        assert_eq!(
            PacketError::check_size(779, 780),
            Err(PacketError::WrongSize {
                len: 779,
                expected: 780
            })
        );
    }

    #[test]
    fn test_display_messages() {
        let err = PacketError::MisalignedLine {
            line_num: 6,
            lines_per_packet: 4,
        };
        assert_eq!(err.to_string(), "line 6 is not aligned to 4 lines per packet");
    }
}
