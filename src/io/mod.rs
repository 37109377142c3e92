//! Network I/O with the C64 Ultimate.
//!
//! - [`StreamReceiver`] - receives one UDP stream into its jitter buffer
//! - [`control`] - TCP start/stop commands for the device's stream service

pub mod control;
mod receiver;

pub use control::{ControlClient, StreamId};
pub use receiver::{StreamReceiver, bind_udp};
