//! Receive side of the C64 Ultimate's UDP video and audio streams.
//!
//! ```text
//!  UDP :11000 ─► StreamReceiver<Video> ─► PacketRingBuffer<Video> ─┐
//!                                                                  ├─► PipelineDriver ─► FrameAssembler ─► VideoFrame ─► sink
//!  UDP :11001 ─► StreamReceiver<Audio> ─► PacketRingBuffer<Audio> ─┘         │
//!                                                                            └─► AudioClock ─► AudioBlock ─► sink
//! ```
//!
//! [`session::StreamSession`] wires these together and owns the threads.

pub mod audio;
pub mod buffer;
pub mod clock;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod util;
pub mod video;

pub use error::PacketError;
pub use pipeline::{MediaOutput, Pushable, ReconnectRequest};
pub use session::{StreamConfig, StreamSession};
