//! Frame shown while the stream is silent.

use super::frame::{VideoFrame, VideoGeometry};
use super::palette::PALETTE;

const BACKGROUND: [u8; 4] = [0x00, 0x00, 0x80, 0xFF];
const BORDER: [u8; 4] = PALETTE[14];
const TEXT: [u8; 4] = PALETTE[1];

const BORDER_TOP: u32 = 8;
const BORDER_SIDE: u32 = 16;
const BANNER_WIDTH: u32 = 160;
const BANNER_HEIGHT: u32 = 24;

/// Dark blue screen with a light blue border and a striped banner in the middle.
pub fn render_placeholder(geometry: VideoGeometry, timestamp_ns: u64) -> VideoFrame {
    let VideoGeometry { width, height, .. } = geometry;
    let mut data = Vec::with_capacity(geometry.frame_bytes());

    let banner_x = width.saturating_sub(BANNER_WIDTH) / 2;
    let banner_y = height.saturating_sub(BANNER_HEIGHT) / 2;

    for y in 0..height {
        for x in 0..width {
            let border = y < BORDER_TOP
                || y + BORDER_TOP >= height
                || x < BORDER_SIDE
                || x + BORDER_SIDE >= width;
            let in_banner = (banner_x..banner_x + BANNER_WIDTH).contains(&x)
                && (banner_y..banner_y + BANNER_HEIGHT).contains(&y);
            let stripe = (y - banner_y.min(y)) % 4 < 2 && (x - banner_x.min(x)) % 8 < 6;

            let colour = if in_banner && stripe {
                TEXT
            } else if border {
                BORDER
            } else {
                BACKGROUND
            };
            data.extend_from_slice(&colour);
        }
    }

    VideoFrame {
        frame_num: None,
        width,
        height,
        timestamp_ns,
        data,
    }
}
