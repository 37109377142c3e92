//! VIC-II colour palette and 4-bit to RGBA conversion.

use std::sync::OnceLock;

use crate::protocol::{BYTES_PER_LINE, PIXELS_PER_LINE};

/// The 16 VIC-II colours as RGBA bytes.
pub const PALETTE: [[u8; 4]; 16] = [
    [0x00, 0x00, 0x00, 0xFF], // black
    [0xEF, 0xEF, 0xEF, 0xFF], // white
    [0x8D, 0x2F, 0x34, 0xFF], // red
    [0x6A, 0xD4, 0xCD, 0xFF], // cyan
    [0x98, 0x35, 0xA4, 0xFF], // purple
    [0x4C, 0xB4, 0x42, 0xFF], // green
    [0x2C, 0x29, 0xB1, 0xFF], // blue
    [0xEF, 0xEF, 0x5D, 0xFF], // yellow
    [0x98, 0x4E, 0x20, 0xFF], // orange
    [0x5B, 0x38, 0x00, 0xFF], // brown
    [0xD1, 0x67, 0x6D, 0xFF], // light red
    [0x4A, 0x4A, 0x4A, 0xFF], // dark grey
    [0x7B, 0x7B, 0x7B, 0xFF], // mid grey
    [0x9F, 0xEF, 0x93, 0xFF], // light green
    [0x6D, 0x6A, 0xEF, 0xFF], // light blue
    [0xB2, 0xB2, 0xB2, 0xFF], // light grey
];

pub const BLACK: [u8; 4] = PALETTE[0];

/// Bytes of one RGBA output row.
pub const RGBA_LINE_BYTES: usize = PIXELS_PER_LINE as usize * 4;

/// RGBA for both pixels of every possible source byte. The low nibble is the left pixel.
fn pair_lut() -> &'static [[u8; 8]; 256] {
    static LUT: OnceLock<[[u8; 8]; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = [[0u8; 8]; 256];
        for (byte, entry) in lut.iter_mut().enumerate() {
            entry[..4].copy_from_slice(&PALETTE[byte & 0x0F]);
            entry[4..].copy_from_slice(&PALETTE[byte >> 4]);
        }
        lut
    })
}

/// Converts packed 4-bit pixels to RGBA. `dst` must hold 8 bytes per source byte.
pub fn convert_pixels(src: &[u8], dst: &mut [u8]) {
    let lut = pair_lut();
    for (byte, out) in src.iter().zip(dst.chunks_exact_mut(8)) {
        out.copy_from_slice(&lut[*byte as usize]);
    }
}

/// Converts one raster line of [`BYTES_PER_LINE`] bytes into [`RGBA_LINE_BYTES`] bytes.
pub fn convert_line(src: &[u8], dst: &mut [u8]) {
    convert_pixels(&src[..BYTES_PER_LINE], &mut dst[..RGBA_LINE_BYTES]);
}
