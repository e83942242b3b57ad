//! Error types for the I/Q streaming library

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("FEC error: {0}")]
    Fec(#[from] FecError),

    #[error("Sample format error: {0}")]
    Format(#[from] FormatError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire frame codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed datagram: {0} bytes")]
    MalformedDatagram(usize),

    #[error("Invalid block header: {0}")]
    InvalidHeader(String),

    #[error("Invalid metadata: checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    InvalidMetadata { stored: u32, computed: u32 },
}

/// Erasure coding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FecError {
    #[error("Insufficient blocks: {received} received, {required} required")]
    InsufficientBlocks { received: usize, required: usize },

    #[error("Too many recovery blocks: {0}")]
    TooManyRecoveryBlocks(usize),

    #[error("Invalid original block count: {0}")]
    InvalidBlockCount(usize),

    #[error("Invalid block size: {0} bytes")]
    BlockSize(usize),

    #[error("Erasure engine error: {0}")]
    Engine(String),
}

/// Sample format errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unsupported sample width: {0} bits")]
    UnsupportedSampleWidth(u8),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Multicast join failed: {0}")]
    MulticastJoinFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

impl From<reed_solomon_erasure::Error> for FecError {
    fn from(e: reed_solomon_erasure::Error) -> Self {
        FecError::Engine(format!("{:?}", e))
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
