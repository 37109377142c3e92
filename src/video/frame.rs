use crate::protocol::{NTSC_HEIGHT, PAL_HEIGHT, PIXELS_PER_LINE};

pub const PAL_FRAME_INTERVAL_NS: u64 = 19_950_124;
/// The device paces NTSC frames at 59.841 Hz, slightly above the nominal 59.826 Hz.
pub const NTSC_FRAME_INTERVAL_NS: u64 = 16_710_875;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoStandard {
    Pal,
    Ntsc,
}

impl VideoStandard {
    pub fn frame_interval_ns(self) -> u64 {
        match self {
            VideoStandard::Pal => PAL_FRAME_INTERVAL_NS,
            VideoStandard::Ntsc => NTSC_FRAME_INTERVAL_NS,
        }
    }

    pub fn fps(self) -> f64 {
        1_000_000_000.0 / self.frame_interval_ns() as f64
    }
}

/// Output dimensions and timing of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    pub width: u32,
    pub height: u32,
    pub standard: VideoStandard,
}

impl VideoGeometry {
    pub const PAL: Self = Self {
        width: PIXELS_PER_LINE as u32,
        height: PAL_HEIGHT,
        standard: VideoStandard::Pal,
    };

    pub const NTSC: Self = Self {
        width: PIXELS_PER_LINE as u32,
        height: NTSC_HEIGHT,
        standard: VideoStandard::Ntsc,
    };

    /// Geometry for a frame whose last line ends at `height`.
    ///
    /// Unusual heights keep their size and pick the nearer standard for timing.
    pub fn from_height(height: u32) -> Self {
        match height {
            PAL_HEIGHT => Self::PAL,
            NTSC_HEIGHT => Self::NTSC,
            h if h <= 250 => Self { height: h, ..Self::NTSC },
            h => Self { height: h, ..Self::PAL },
        }
    }

    pub fn frame_interval_ns(&self) -> u64 {
        self.standard.frame_interval_ns()
    }

    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl Default for VideoGeometry {
    fn default() -> Self {
        Self::PAL
    }
}

/// A complete RGBA frame ready for presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Stream frame number; `None` for placeholder frames.
    pub frame_num: Option<u16>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ns: u64,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn is_placeholder(&self) -> bool {
        self.frame_num.is_none()
    }

    /// RGBA of the pixel at (`x`, `y`).
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[offset..offset + 4]);
        px
    }
}
