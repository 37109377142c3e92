//! Video side of the stream: frame assembly, colour conversion and frame types.

mod assembler;
mod frame;
pub mod palette;
mod placeholder;

pub use assembler::{AssembledFrame, FRAME_TIMEOUT_NS, FrameAssembler, FrameAssembly};
pub use frame::{
    NTSC_FRAME_INTERVAL_NS, PAL_FRAME_INTERVAL_NS, VideoFrame, VideoGeometry, VideoStandard,
};
pub use placeholder::render_placeholder;
