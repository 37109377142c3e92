//! Session orchestration: configuration, shared statistics and the
//! [`StreamSession`] that owns the receiver and driver threads.

mod config;
mod session;
mod stats;

pub use config::{MAX_CAPACITY_DELAY_MS, StreamConfig};
pub use session::StreamSession;
pub use stats::{SessionStats, StatsBatch, StreamCounters};
