//! Wire format shared by sender and receiver
//!
//! Every datagram is exactly [`UDP_SIZE`] bytes: an 8 byte [`BlockHeader`]
//! followed by one [`ProtectedBlock`] of payload. A frame is
//! [`NB_ORIGINAL_BLOCKS`] original blocks plus up to [`MAX_FEC_BLOCKS`]
//! recovery blocks sharing one 16-bit frame index.
//!
//! ```text
//!  0       2     3       4      5      6        8                      512
//!  +-------+-----+-------+------+------+--------+------------------------+
//!  | frame |blk  |sample |sample| pad  |reserved|   protected block      |
//!  | index |index|bytes  |bits  |      |        |   (504 bytes)          |
//!  +-------+-----+-------+------+------+--------+------------------------+
//! ```
//!
//! Block 0 of each frame starts with a [`FrameMetadata`] record closed by a
//! CRC-32 of the preceding metadata bytes. All integers are little-endian.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ProtocolError;

/// Size of one datagram on the wire
pub const UDP_SIZE: usize = 512;

/// Size of the per-block header
pub const HEADER_SIZE: usize = 8;

/// Size of the payload carried by one block
pub const BLOCK_SIZE: usize = UDP_SIZE - HEADER_SIZE;

/// Number of original (systematic) blocks per frame
pub const NB_ORIGINAL_BLOCKS: usize = 128;

/// Maximum number of recovery blocks per frame (block index is 8 bits)
pub const MAX_FEC_BLOCKS: usize = 127;

/// Serialized size of [`FrameMetadata`] including its checksum
pub const METADATA_SIZE: usize = 30;

/// Sample bytes carried by one frame (block 0 holds metadata only)
pub const FRAME_DATA_SIZE: usize = (NB_ORIGINAL_BLOCKS - 1) * BLOCK_SIZE;

/// Opaque payload of one block
pub type ProtectedBlock = [u8; BLOCK_SIZE];

/// Per-block header prepended to every datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHeader {
    /// Frame index, wraps modulo 65536
    pub frame_index: u16,
    /// Block index within the frame (0..K for originals, K.. for recovery)
    pub block_index: u8,
    /// Bytes per I or Q component on the wire
    pub sample_bytes: u8,
    /// Significant bits per I or Q component
    pub sample_bits: u8,
}

impl BlockHeader {
    pub fn new(frame_index: u16, block_index: u8, sample_bytes: u8, sample_bits: u8) -> Self {
        Self {
            frame_index,
            block_index,
            sample_bytes,
            sample_bits,
        }
    }

    /// Serialize the header
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut buf = &mut out[..];
        buf.put_u16_le(self.frame_index);
        buf.put_u8(self.block_index);
        buf.put_u8(self.sample_bytes);
        buf.put_u8(self.sample_bits);
        buf.put_u8(0); // padding
        buf.put_u16_le(0); // reserved
        out
    }

    /// Parse a header from the start of `data`
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedDatagram(data.len()));
        }

        let mut buf = data;
        let header = Self {
            frame_index: buf.get_u16_le(),
            block_index: buf.get_u8(),
            sample_bytes: buf.get_u8(),
            sample_bits: buf.get_u8(),
        };

        if header.block_index as usize >= NB_ORIGINAL_BLOCKS + MAX_FEC_BLOCKS {
            return Err(ProtocolError::InvalidHeader(format!(
                "block index {} out of range",
                header.block_index
            )));
        }

        if !matches!(header.sample_bytes, 1 | 2 | 4) {
            return Err(ProtocolError::InvalidHeader(format!(
                "sample bytes {}",
                header.sample_bytes
            )));
        }

        Ok(header)
    }

    /// Whether this block carries original data (as opposed to recovery data)
    pub fn is_original(&self) -> bool {
        (self.block_index as usize) < NB_ORIGINAL_BLOCKS
    }
}

/// One datagram: header plus protected block
#[derive(Clone)]
pub struct WireBlock {
    pub header: BlockHeader,
    pub block: ProtectedBlock,
}

impl WireBlock {
    pub fn new(header: BlockHeader, block: ProtectedBlock) -> Self {
        Self { header, block }
    }

    /// Serialize into a datagram buffer
    pub fn encode_into(&self, out: &mut [u8; UDP_SIZE]) {
        out[..HEADER_SIZE].copy_from_slice(&self.header.encode());
        out[HEADER_SIZE..].copy_from_slice(&self.block);
    }

    /// Serialize into a new datagram
    pub fn to_bytes(&self) -> [u8; UDP_SIZE] {
        let mut out = [0u8; UDP_SIZE];
        self.encode_into(&mut out);
        out
    }

    /// Parse a received datagram
    ///
    /// Anything shorter than a full datagram is rejected.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < UDP_SIZE {
            return Err(ProtocolError::MalformedDatagram(data.len()));
        }

        let header = BlockHeader::decode(data)?;
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&data[HEADER_SIZE..UDP_SIZE]);

        Ok(Self { header, block })
    }
}

impl std::fmt::Debug for WireBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireBlock")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// Stream description carried at the start of block 0 of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Center frequency in Hz
    pub center_frequency: u64,
    /// Stream sample rate in samples per second
    pub sample_rate: u32,
    /// Bytes per I or Q component
    pub sample_bytes: u8,
    /// Significant bits per I or Q component
    pub sample_bits: u8,
    /// Original blocks per frame (K)
    pub nb_original_blocks: u8,
    /// Recovery blocks per frame (M)
    pub nb_fec_blocks: u8,
    pub device_index: u8,
    pub channel_index: u8,
    /// Capture timestamp, seconds part
    pub tv_sec: u32,
    /// Capture timestamp, microseconds part
    pub tv_usec: u32,
}

impl FrameMetadata {
    /// Serialize and append the checksum
    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        let mut out = [0u8; METADATA_SIZE];
        let mut buf = &mut out[..];
        buf.put_u64_le(self.center_frequency);
        buf.put_u32_le(self.sample_rate);
        buf.put_u8(self.sample_bytes);
        buf.put_u8(self.sample_bits);
        buf.put_u8(self.nb_original_blocks);
        buf.put_u8(self.nb_fec_blocks);
        buf.put_u8(self.device_index);
        buf.put_u8(self.channel_index);
        buf.put_u32_le(self.tv_sec);
        buf.put_u32_le(self.tv_usec);

        let crc = checksum(&out[..METADATA_SIZE - 4]);
        out[METADATA_SIZE - 4..].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Write the serialized metadata at the start of a block
    pub fn write_to(&self, block: &mut ProtectedBlock) {
        block[..METADATA_SIZE].copy_from_slice(&self.encode());
    }

    /// Parse metadata, returning the fields and whether the checksum matched
    pub fn decode(data: &[u8]) -> Result<(Self, bool), ProtocolError> {
        if data.len() < METADATA_SIZE {
            return Err(ProtocolError::MalformedDatagram(data.len()));
        }

        let mut buf = &data[..METADATA_SIZE];
        let meta = Self {
            center_frequency: buf.get_u64_le(),
            sample_rate: buf.get_u32_le(),
            sample_bytes: buf.get_u8(),
            sample_bits: buf.get_u8(),
            nb_original_blocks: buf.get_u8(),
            nb_fec_blocks: buf.get_u8(),
            device_index: buf.get_u8(),
            channel_index: buf.get_u8(),
            tv_sec: buf.get_u32_le(),
            tv_usec: buf.get_u32_le(),
        };
        let stored = buf.get_u32_le();

        Ok((meta, stored == checksum(&data[..METADATA_SIZE - 4])))
    }

    /// Parse metadata from a block 0 payload, rejecting a checksum mismatch
    pub fn from_block(block: &ProtectedBlock) -> Result<Self, ProtocolError> {
        let (meta, valid) = Self::decode(block)?;

        if valid {
            Ok(meta)
        } else {
            let stored = u32::from_le_bytes([
                block[METADATA_SIZE - 4],
                block[METADATA_SIZE - 3],
                block[METADATA_SIZE - 2],
                block[METADATA_SIZE - 1],
            ]);
            Err(ProtocolError::InvalidMetadata {
                stored,
                computed: checksum(&block[..METADATA_SIZE - 4]),
            })
        }
    }

    /// Same stream format, ignoring the timestamp
    pub fn same_format(&self, other: &FrameMetadata) -> bool {
        self.center_frequency == other.center_frequency
            && self.sample_rate == other.sample_rate
            && self.sample_bytes == other.sample_bytes
            && self.sample_bits == other.sample_bits
            && self.nb_original_blocks == other.nb_original_blocks
            && self.nb_fec_blocks == other.nb_fec_blocks
            && self.device_index == other.device_index
            && self.channel_index == other.channel_index
    }

    /// Bytes of one I/Q pair on the wire
    pub fn sample_pair_bytes(&self) -> usize {
        2 * (self.sample_bytes & 0x0F) as usize
    }

    /// Capture timestamp in microseconds
    pub fn timestamp_us(&self) -> i64 {
        self.tv_sec as i64 * 1_000_000 + self.tv_usec as i64
    }

    /// Duration of signal carried by one frame
    pub fn frame_duration(&self) -> Option<Duration> {
        let bytes_per_sec = self.sample_rate as u64 * self.sample_pair_bytes() as u64;

        if bytes_per_sec == 0 {
            return None;
        }

        Some(Duration::from_micros(
            FRAME_DATA_SIZE as u64 * 1_000_000 / bytes_per_sec,
        ))
    }
}

/// CRC-32 over metadata bytes
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
