//! Receiver side: jitter buffer, frame statistics and the read controller

pub mod buffer;
pub mod reader;
pub mod stats;

use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::ReceiverConfig;

pub use buffer::{recommended_nb_slots, BufferCounters, DecodeSlot, ReceiverBuffer};
pub use reader::{spawn_read_loop, ReadController, SharedReport, StreamReport};
pub use stats::{DecodingHealth, FrameStats, StatsSnapshot};

/// Buffer shared by the receive task and the read controller
pub type SharedReceiverBuffer = Arc<Mutex<ReceiverBuffer>>;

/// Create a new shared receiver buffer
pub fn create_shared_buffer(config: &ReceiverConfig) -> SharedReceiverBuffer {
    Arc::new(Mutex::new(ReceiverBuffer::new(config)))
}
