//! Output side of a session: the driver thread and the sink trait it pushes into.

mod driver;
mod dyn_traits;

pub use driver::{
    MediaOutput, PLACEHOLDER_AFTER_NS, PLACEHOLDER_INTERVAL_NS, PipelineDriver,
    RECONNECT_AFTER_NS, ReconnectRequest, STATS_INTERVAL_NS,
};
pub use dyn_traits::Pushable;
