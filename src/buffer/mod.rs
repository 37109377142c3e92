//! Jitter buffers sitting between the UDP receivers and the pipeline driver.
//!
//! - [`PacketRingBuffer`] - bounded, reordering, delay-gated buffer for one stream
//! - [`NetworkBuffer`] - the video/audio pair consumed by the driver
//!
//! Each ring has exactly one producer (its receiver thread) and one consumer
//! (the driver thread).

mod kind;
mod network;
mod ring;
mod slot;

pub use kind::{Audio, SlotKey, StreamKind, Video};
pub use network::{NetworkBuffer, PacketPair};
pub use ring::{
    MAX_DELAY_MS, MIN_CAPACITY, PacketRingBuffer, PushOutcome, RingStatsSnapshot, slots_for,
};
pub use slot::PacketSlot;
