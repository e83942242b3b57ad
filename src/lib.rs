//! # Remote IQ Streamer
//!
//! Point-to-point streaming of a continuous I/Q sample stream over UDP,
//! protected by block erasure coding and tolerant to clock-rate mismatch
//! between sender and receiver.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────── SENDER ─────────────────────────────────┐
//! │                                                                              │
//! │  I/Q source ──► FramePipeline (sender::pipeline)                             │
//! │                 │  block 0 = metadata, blocks 1..127 = samples               │
//! │                 │  FecEncoder (codec) adds M recovery blocks                 │
//! │                 ▼                                                            │
//! │            FrameFifo (sender::fifo)  bounded, overwrites oldest              │
//! │                 │                                                            │
//! │                 ▼                                                            │
//! │            FrameSender (network::sender)  one 512-byte datagram per block    │
//! └─────────────────┼────────────────────────────────────────────────────────────┘
//!                   │ UDP, any order, some lost
//! ┌─────────────────┼──────────────────────────────────── RECEIVER ──────────────┐
//! │                 ▼                                                            │
//! │            FrameReceiver (network::receiver)  parse, lock, write             │
//! │                 │                                                            │
//! │                 ▼                                                            │
//! │            ReceiverBuffer (receiver::buffer)                                 │
//! │              ring of decode slots ── FecDecoder rebuilds missing blocks      │
//! │              circular sample buffer                                          │
//! │                 │                                                            │
//! │                 ▼                                                            │
//! │            ReadController (receiver::reader)  fixed tick, drift correction   │
//! │                 │  SampleConverter (sample::format)                          │
//! │                 ▼                                                            │
//! │            application samples                                               │
//! └──────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod monitor;
pub mod network;
pub mod protocol;
pub mod receiver;
pub mod sample;
pub mod sender;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default stream sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

    /// Default UDP data port
    pub const DEFAULT_DATA_PORT: u16 = 9090;

    /// Default HTTP port of the diagnostics endpoint
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Default recovery blocks per frame
    pub const DEFAULT_NB_FEC_BLOCKS: u8 = 8;

    /// Default spread of a frame's datagrams, percent of the frame duration
    pub const DEFAULT_TX_DELAY_PERCENT: u32 = 35;

    /// Default depth of the outbound frame FIFO
    pub const DEFAULT_FIFO_DEPTH: usize = 20;

    /// Default number of receiver decoder slots
    pub const DEFAULT_NB_DECODER_SLOTS: usize = 16;

    /// Lower bound when sizing decoder slots automatically
    pub const MIN_NB_DECODER_SLOTS: usize = 4;

    /// Upper bound on decoder slots (about 131 MB of ring)
    pub const MAX_NB_DECODER_SLOTS: usize = 2048;

    /// Default read tick in milliseconds
    pub const DEFAULT_TICK_MS: u64 = 50;

    /// Default weight of the newest read/write balance estimate
    pub const DEFAULT_CORRECTION_ALPHA: f64 = 0.75;

    /// Default reads between two balance estimates (about one second)
    pub const DEFAULT_CORRECTION_PERIOD: u32 = 40;

    /// Default balance correction limit as sample rate / divisor per read
    pub const DEFAULT_CORRECTION_LIMIT_DIVISOR: u32 = 400;

    /// Receive socket buffers are sized for at least this sample rate
    pub const SOCKET_BUFFER_FLOOR_RATE: u32 = 96_000;
}
