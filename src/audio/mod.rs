//! Audio data types.
//!
//! The C64 Ultimate sends uncompressed 16-bit stereo PCM in 4 ms blocks;
//! [`AudioBlock`] is one decoded block with its presentation timestamp.

mod block;

pub use block::AudioBlock;
