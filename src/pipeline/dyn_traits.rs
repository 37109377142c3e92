//! Object-safe output traits.
//!
//! The driver hands every frame, audio block and reconnect request to a
//! [`Pushable`] sink. Sinks are shared as `Arc<dyn Pushable<T>>`, so the
//! embedding application decides what happens with the data: render it, queue
//! it to another thread via a channel, or collect it in a test.

use std::sync::Arc;

use crossbeam::channel::{Sender, TrySendError};
use tracing::warn;

/// Passive receiver - can receive pushed data.
///
/// Implementations must not block for long: `push` runs on the driver thread.
pub trait Pushable<T>: Send + Sync {
    fn push(&self, input: T);
}

impl<T: Send + Sync> Pushable<T> for Arc<dyn Pushable<T>> {
    fn push(&self, input: T) {
        (**self).push(input)
    }
}

/// Forwards into a channel without blocking; a full channel drops the item.
impl<T: Send> Pushable<T> for Sender<T> {
    fn push(&self, input: T) {
        match self.try_send(input) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                warn!("Output channel disconnected, dropping item");
            }
        }
    }
}
