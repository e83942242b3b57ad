//! Sender frame pipeline
//!
//! Slices the sample stream into frames of K blocks: block 0 carries the
//! stream metadata, blocks 1..K carry packed samples. A completed frame gets
//! its recovery blocks and is queued for the network task.
//!
//! ```text
//!  Empty ──► AccumulatingBlock0 ──► AccumulatingData(1..K-1) ──► Complete
//!    ▲        stamp metadata          fill 504-byte blocks          │
//!    └──────────────────── FEC encode, enqueue ◄────────────────────┘
//! ```

use chrono::Utc;

use crate::codec::FecEncoder;
use crate::config::SenderConfig;
use crate::error::Result;
use crate::protocol::{
    BlockHeader, FrameMetadata, ProtectedBlock, WireBlock, BLOCK_SIZE, NB_ORIGINAL_BLOCKS,
};
use crate::sample::{format, IqSample, SampleSink, SampleWidth};
use crate::sender::fifo::SharedFrameFifo;

/// All blocks of one frame, ready for transmission
#[derive(Debug)]
pub struct EncodedFrame {
    pub frame_index: u16,
    /// Original blocks in index order, then recovery blocks
    pub blocks: Vec<WireBlock>,
    /// Whether recovery blocks were produced
    pub protected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Empty,
    AccumulatingBlock0,
    AccumulatingData { block_index: usize, offset: usize },
    Complete,
}

/// Frame builder feeding the outbound FIFO
pub struct FramePipeline {
    config: SenderConfig,
    input_width: SampleWidth,
    wire_width: SampleWidth,
    encoder: FecEncoder,
    fifo: SharedFrameFifo,
    state: FrameState,
    frame_index: u16,
    /// Original blocks of the frame being built
    blocks: Vec<ProtectedBlock>,
    /// Samples converted to wire layout
    scratch: Vec<u8>,
    stats: PipelineStats,
}

impl FramePipeline {
    /// Create a pipeline for samples of `input_width`
    pub fn new(config: &SenderConfig, input_width: SampleWidth, fifo: SharedFrameFifo) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config: config.clone(),
            input_width,
            wire_width: config.sample_width()?,
            encoder: Self::build_encoder(config.nb_fec_blocks),
            fifo,
            state: FrameState::Empty,
            frame_index: 0,
            blocks: vec![[0u8; BLOCK_SIZE]; NB_ORIGINAL_BLOCKS],
            scratch: Vec::new(),
            stats: PipelineStats::default(),
        })
    }

    /// Build the encoder, degrading to unprotected frames if it is unavailable
    fn build_encoder(nb_fec_blocks: u8) -> FecEncoder {
        match FecEncoder::new(nb_fec_blocks as usize) {
            Ok(encoder) => encoder,
            Err(e) => {
                tracing::warn!("FEC engine unavailable ({}), sending unprotected frames", e);
                FecEncoder::unprotected()
            }
        }
    }

    /// Replace the settings as a whole
    ///
    /// A frame in progress is discarded when the wire width changes.
    pub fn apply_settings(&mut self, config: &SenderConfig) -> Result<()> {
        config.validate()?;
        let wire_width = config.sample_width()?;

        if config.nb_fec_blocks != self.config.nb_fec_blocks {
            self.encoder = Self::build_encoder(config.nb_fec_blocks);
        }

        if wire_width != self.wire_width {
            self.state = FrameState::Empty;
        }

        tracing::info!(
            "Sender settings: {} FEC blocks, {} bits, {} S/s, device {} channel {}",
            config.nb_fec_blocks,
            config.sample_bits,
            config.stream_sample_rate(),
            config.device_index,
            config.channel_index
        );

        self.wire_width = wire_width;
        self.config = config.clone();
        Ok(())
    }

    /// Feed samples of the input width
    pub fn feed(&mut self, samples: &[IqSample]) {
        if samples.is_empty() {
            return;
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();

        if self.input_width == self.wire_width {
            format::pack(self.wire_width, samples, &mut scratch);
        } else {
            let converted = format::convert(self.input_width, self.wire_width, samples);
            format::pack(self.wire_width, &converted, &mut scratch);
        }

        self.stats.samples_in += samples.len() as u64;
        self.feed_bytes(&scratch);
        self.scratch = scratch;
    }

    /// Run the frame state machine over wire-layout bytes
    fn feed_bytes(&mut self, mut data: &[u8]) {
        loop {
            self.state = match self.state {
                FrameState::Empty if data.is_empty() => break,
                FrameState::Empty => FrameState::AccumulatingBlock0,
                FrameState::AccumulatingBlock0 => {
                    self.stamp_metadata();
                    FrameState::AccumulatingData {
                        block_index: 1,
                        offset: 0,
                    }
                }
                FrameState::AccumulatingData { .. } if data.is_empty() => break,
                FrameState::AccumulatingData {
                    block_index,
                    offset,
                } => {
                    let n = data.len().min(BLOCK_SIZE - offset);
                    self.blocks[block_index][offset..offset + n].copy_from_slice(&data[..n]);
                    data = &data[n..];

                    if offset + n < BLOCK_SIZE {
                        FrameState::AccumulatingData {
                            block_index,
                            offset: offset + n,
                        }
                    } else if block_index + 1 < NB_ORIGINAL_BLOCKS {
                        FrameState::AccumulatingData {
                            block_index: block_index + 1,
                            offset: 0,
                        }
                    } else {
                        FrameState::Complete
                    }
                }
                FrameState::Complete => {
                    self.complete_frame();
                    FrameState::Empty
                }
            };
        }
    }

    /// Current stream metadata with a fresh timestamp
    pub fn metadata(&self) -> FrameMetadata {
        let now = Utc::now();

        FrameMetadata {
            center_frequency: self.config.center_frequency,
            sample_rate: self.config.stream_sample_rate(),
            sample_bytes: self.wire_width.bytes(),
            sample_bits: self.wire_width.bits(),
            nb_original_blocks: NB_ORIGINAL_BLOCKS as u8,
            nb_fec_blocks: self.encoder.nb_fec_blocks() as u8,
            device_index: self.config.device_index,
            channel_index: self.config.channel_index,
            tv_sec: now.timestamp() as u32,
            tv_usec: now.timestamp_subsec_micros(),
        }
    }

    fn stamp_metadata(&mut self) {
        let meta = self.metadata();
        let block = &mut self.blocks[0];
        block.fill(0);
        meta.write_to(block);
    }

    fn complete_frame(&mut self) {
        let recovery = if self.encoder.is_protected() {
            match self.encoder.encode(&self.blocks) {
                Ok(recovery) => recovery,
                Err(e) => {
                    self.stats.fec_failures += 1;
                    tracing::warn!(
                        "FEC encode failed for frame {}: {}, sending unprotected",
                        self.frame_index,
                        e
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let sample_bytes = self.wire_width.bytes();
        let sample_bits = self.wire_width.bits();
        let frame_index = self.frame_index;
        let protected = !recovery.is_empty();

        let blocks: Vec<WireBlock> = self
            .blocks
            .iter()
            .copied()
            .chain(recovery)
            .enumerate()
            .map(|(index, block)| {
                let header = BlockHeader::new(frame_index, index as u8, sample_bytes, sample_bits);
                WireBlock::new(header, block)
            })
            .collect();

        if !protected {
            self.stats.frames_unprotected += 1;
        }
        self.stats.frames_built += 1;

        self.fifo.push(EncodedFrame {
            frame_index,
            blocks,
            protected,
        });

        self.frame_index = self.frame_index.wrapping_add(1);
    }

    /// Index the next completed frame will carry
    pub fn next_frame_index(&self) -> u16 {
        self.frame_index
    }

    /// Start numbering frames from `index`
    pub fn set_next_frame_index(&mut self, index: u16) {
        self.frame_index = index;
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Get statistics
    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }
}

impl SampleSink for FramePipeline {
    fn write(&mut self, samples: &[IqSample]) {
        self.feed(samples);
    }
}

/// Pipeline statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub samples_in: u64,
    pub frames_built: u64,
    pub frames_unprotected: u64,
    pub fec_failures: u64,
}
