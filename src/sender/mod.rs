//! Sender side: framing, FEC and the outbound frame FIFO

pub mod fifo;
pub mod pipeline;

pub use fifo::{create_shared_fifo, FrameFifo, SharedFrameFifo};
pub use pipeline::{EncodedFrame, FramePipeline, PipelineStats};
