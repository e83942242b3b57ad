//! Receiver jitter buffer
//!
//! Datagrams land in a ring of decode slots addressed by frame index modulo
//! the slot count. Each slot owns one frame's worth of the circular sample
//! buffer: original block `i` (1..K) is copied straight to its position in
//! the ring, block 0 and recovery blocks stay in the slot. Once K distinct
//! blocks are in, missing originals are rebuilt by the FEC decoder.
//!
//! ```text
//!  slot:     0          1          2               N-1
//!  ring:  [ frame ][ frame ][ frame ] ... [ frame ]     frame = 127 blocks
//!                    ▲ write head               ▲ read cursor (about N/2 away)
//! ```
//!
//! The 16-bit frame index is unwrapped against the write head, so the ring
//! stays contiguous across the 65535 → 0 wrap whatever the slot count.

use crate::codec::FecDecoder;
use crate::config::ReceiverConfig;
use crate::constants::{MAX_NB_DECODER_SLOTS, MIN_NB_DECODER_SLOTS};
use crate::protocol::{
    FrameMetadata, ProtectedBlock, WireBlock, BLOCK_SIZE, FRAME_DATA_SIZE, MAX_FEC_BLOCKS,
    NB_ORIGINAL_BLOCKS,
};
use crate::receiver::stats::{FrameCounts, FrameStats, StatsSnapshot};
use crate::sample::SampleWidth;

/// Bytes of signal held by one slot
pub const FRAME_BYTES: usize = FRAME_DATA_SIZE;

const NB_BLOCK_INDEXES: usize = NB_ORIGINAL_BLOCKS + MAX_FEC_BLOCKS;

/// Receive state of one in-flight frame
pub struct DecodeSlot {
    /// Unwrapped frame index owning the slot
    frame: Option<i64>,
    seen: [bool; NB_BLOCK_INDEXES],
    block_count: usize,
    original_count: usize,
    decoded: bool,
    block_zero: ProtectedBlock,
    /// Recovery blocks kept for decode, by block index
    recovery: Vec<(usize, ProtectedBlock)>,
}

impl DecodeSlot {
    fn new() -> Self {
        Self {
            frame: None,
            seen: [false; NB_BLOCK_INDEXES],
            block_count: 0,
            original_count: 0,
            decoded: false,
            block_zero: [0u8; BLOCK_SIZE],
            recovery: Vec::new(),
        }
    }

    fn claim(&mut self, frame: i64) {
        self.frame = Some(frame);
        self.seen = [false; NB_BLOCK_INDEXES];
        self.block_count = 0;
        self.original_count = 0;
        self.decoded = false;
        self.block_zero = [0u8; BLOCK_SIZE];
        self.recovery.clear();
    }

    fn counts(&self) -> FrameCounts {
        FrameCounts {
            blocks: self.block_count,
            original: self.original_count,
            recovery: self.recovery.len(),
            decoded: self.decoded,
        }
    }

    /// 16-bit index of the frame held, if any
    pub fn frame_index(&self) -> Option<u16> {
        self.frame.map(|f| f as u16)
    }

    /// Distinct blocks received
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Original blocks stored
    pub fn original_count(&self) -> usize {
        self.original_count
    }

    /// Recovery blocks stored
    pub fn recovery_count(&self) -> usize {
        self.recovery.len()
    }

    /// All K original blocks are available
    pub fn is_decoded(&self) -> bool {
        self.decoded
    }
}

/// Counters that are never reset by polling
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BufferCounters {
    pub blocks_written: u64,
    pub duplicate_blocks: u64,
    pub late_blocks: u64,
    pub frames_recovered: u64,
    pub decode_failures: u64,
    pub invalid_metadata: u64,
    pub restarts: u64,
}

/// Slot ring plus circular sample buffer
pub struct ReceiverBuffer {
    config: ReceiverConfig,
    slots: Vec<DecodeSlot>,
    /// Circular sample buffer, one frame per slot
    frames: Vec<u8>,
    /// Stitching area for reads crossing the ring end
    scratch: Vec<u8>,
    decoder: FecDecoder,
    /// Unwrapped index of the newest frame
    frame_head: Option<i64>,
    read_index: usize,
    /// Write head minus read cursor in bytes, sampled at each head advance
    wr_delta: i64,
    nb_reads: u32,
    nb_writes: u32,
    nominal_read_bytes: u64,
    /// Samples to add to each read
    balance_correction: f64,
    balance_limit: f64,
    current_meta: FrameMetadata,
    buffer_len_sec: f64,
    /// Capture time of the samples at the read cursor
    tv_out_us: i64,
    stats: FrameStats,
    counters: BufferCounters,
}

impl ReceiverBuffer {
    pub fn new(config: &ReceiverConfig) -> Self {
        let mut buffer = Self {
            config: config.clone(),
            slots: Vec::new(),
            frames: Vec::new(),
            scratch: Vec::new(),
            decoder: FecDecoder::new(),
            frame_head: None,
            read_index: 0,
            wr_delta: 0,
            nb_reads: 0,
            nb_writes: 0,
            nominal_read_bytes: 0,
            balance_correction: 0.0,
            balance_limit: 0.0,
            current_meta: FrameMetadata::default(),
            buffer_len_sec: 0.0,
            tv_out_us: 0,
            stats: FrameStats::new(),
            counters: BufferCounters::default(),
        };
        buffer.set_nb_slots(config.nb_decoder_slots);
        buffer
    }

    /// Reallocate the ring for `nb_slots` slots (rounded up to even, at most
    /// [`MAX_NB_DECODER_SLOTS`])
    ///
    /// Everything buffered is dropped; the next block restarts the stream.
    pub fn set_nb_slots(&mut self, nb_slots: usize) {
        let nb_slots = (nb_slots.clamp(2, MAX_NB_DECODER_SLOTS) + 1) & !1;

        self.slots = (0..nb_slots).map(|_| DecodeSlot::new()).collect();
        self.frames = vec![0u8; nb_slots * FRAME_BYTES];
        self.frame_head = None;
        self.wr_delta = self.ring_size() as i64 / 2;
        self.init_read_index(0);
        self.update_buffer_len();

        tracing::debug!("Decoder ring: {} slots, {} bytes", nb_slots, self.frames.len());
    }

    /// Return to the empty initial state, keeping the slot count
    pub fn reset(&mut self) {
        let nb_slots = self.slots.len();
        self.current_meta = FrameMetadata::default();
        self.balance_correction = 0.0;
        self.balance_limit = 0.0;
        self.tv_out_us = 0;
        self.stats = FrameStats::new();
        self.decoder.reset_stats();
        self.set_nb_slots(nb_slots);
    }

    /// Store one received block
    ///
    /// Returns the new stream metadata when a completed frame reveals a
    /// format change.
    pub fn write_block(&mut self, block: &WireBlock) -> Option<FrameMetadata> {
        let nb_slots = self.slots.len() as i64;

        let frame = match self.frame_head {
            None => {
                let frame = block.header.frame_index as i64;
                self.restart(frame);
                frame
            }
            Some(head) => {
                let delta = block.header.frame_index.wrapping_sub(head as u16) as i16 as i64;
                let frame = head + delta;

                if delta > 0 {
                    self.advance_head(frame);
                } else if delta < 0 {
                    let index = self.slot_of(frame);
                    let occupant = self.slots[index].frame;

                    match occupant {
                        Some(owner) if owner == frame => {}
                        _ if -delta > nb_slots => {
                            tracing::info!(
                                "Frame {} is {} frames behind the head, restarting stream",
                                block.header.frame_index,
                                -delta
                            );
                            self.counters.restarts += 1;
                            self.restart(frame);
                        }
                        Some(owner) if owner > frame => {
                            self.counters.late_blocks += 1;
                            return None;
                        }
                        // first block of a frame overtaken by a newer one
                        _ => self.reclaim(index, frame),
                    }
                }

                frame
            }
        };

        let index = self.slot_of(frame);
        let block_index = block.header.block_index as usize;
        let slot = &mut self.slots[index];

        if slot.seen[block_index] {
            self.counters.duplicate_blocks += 1;
            return None;
        }
        slot.seen[block_index] = true;

        if slot.block_count < NB_ORIGINAL_BLOCKS {
            if block_index == 0 {
                slot.block_zero = block.block;
                slot.original_count += 1;
            } else if block_index < NB_ORIGINAL_BLOCKS {
                let offset = index * FRAME_BYTES + (block_index - 1) * BLOCK_SIZE;
                self.frames[offset..offset + BLOCK_SIZE].copy_from_slice(&block.block);
                slot.original_count += 1;
            } else {
                slot.recovery.push((block_index, block.block));
            }
        }

        slot.block_count += 1;
        self.counters.blocks_written += 1;

        if slot.block_count == NB_ORIGINAL_BLOCKS {
            self.complete_frame(index)
        } else {
            None
        }
    }

    fn slot_of(&self, frame: i64) -> usize {
        frame.rem_euclid(self.slots.len() as i64) as usize
    }

    fn restart(&mut self, frame: i64) {
        let index = self.slot_of(frame);

        for slot in self.slots.iter_mut() {
            slot.frame = None;
        }
        self.slots[index].claim(frame);
        self.frame_head = Some(frame);
        self.init_read_index(index);
    }

    fn init_read_index(&mut self, head_slot: usize) {
        let nb_slots = self.slots.len();
        self.read_index = ((head_slot + nb_slots / 2) % nb_slots) * FRAME_BYTES;
        self.wr_delta = self.ring_size() as i64 / 2;
        self.nb_reads = 0;
        self.nb_writes = 0;
        self.nominal_read_bytes = 0;
    }

    fn advance_head(&mut self, frame: i64) {
        let index = self.slot_of(frame);

        self.frame_head = Some(frame);
        self.check_slot_data(index);
        self.rw_correction_estimate(index);
        self.nb_writes += 1;

        self.reclaim(index, frame);
    }

    /// Retire the slot's current frame into the statistics and hand it to `frame`
    fn reclaim(&mut self, index: usize, frame: i64) {
        let slot = &mut self.slots[index];
        if slot.frame.is_some() {
            self.stats.record(slot.counts());
        }
        slot.claim(frame);
    }

    /// Sample the write/read distance and the output timestamp
    fn check_slot_data(&mut self, index: usize) {
        let ring = self.ring_size() as i64;
        self.wr_delta = (index * FRAME_BYTES) as i64 - self.read_index as i64;
        let rw_delay_bytes = if self.wr_delta > 0 {
            self.wr_delta
        } else {
            ring + self.wr_delta
        };

        let meta = &self.current_meta;
        let bytes_per_sec = meta.sample_rate as i64 * meta.sample_pair_bytes() as i64;

        if bytes_per_sec > 0 {
            self.tv_out_us = meta.timestamp_us() - rw_delay_bytes * 1_000_000 / bytes_per_sec;
        }

        let slot = &self.slots[index];
        if slot.frame.is_some() && !slot.decoded {
            tracing::debug!(
                "Incomplete frame in slot {}: {} blocks, {} recovery",
                index,
                slot.block_count,
                slot.recovery.len()
            );
        }
    }

    /// Renew the read/write balance correction
    ///
    /// Aims the read cursor at the start of the slot opposite the write head,
    /// net of the nominal read/write byte balance since the last estimate.
    fn rw_correction_estimate(&mut self, index: usize) {
        if self.nb_reads < self.config.correction_period {
            return;
        }

        let nb_slots = self.slots.len();
        let ring = self.ring_size() as i64;
        let pivot_index = (((index + nb_slots / 2) % nb_slots) * FRAME_BYTES) as i64;
        let read_index = self.read_index as i64;

        let normalized = if read_index < pivot_index {
            read_index + ring - pivot_index
        } else {
            read_index - pivot_index
        };
        let rw_delta =
            self.nominal_read_bytes as i64 - self.nb_writes as i64 * FRAME_BYTES as i64;

        let d_bytes = if normalized < ring / 2 {
            -normalized - rw_delta
        } else {
            ring - normalized - rw_delta
        };

        let pair_bytes = self.current_meta.sample_pair_bytes().max(1) as f64;
        let estimate = d_bytes as f64 / (pair_bytes * self.nb_reads as f64);
        let alpha = self.config.correction_alpha;

        self.balance_correction = ((1.0 - alpha) * self.balance_correction + alpha * estimate)
            .clamp(-self.balance_limit, self.balance_limit);

        self.nb_reads = 0;
        self.nb_writes = 0;
        self.nominal_read_bytes = 0;
    }

    fn complete_frame(&mut self, index: usize) -> Option<FrameMetadata> {
        let slot = &mut self.slots[index];
        slot.decoded = true;

        if !slot.recovery.is_empty() {
            let nb_fec_blocks = if slot.seen[0] {
                self.current_meta.nb_fec_blocks as usize
            } else {
                slot.recovery.len()
            };

            let base = index * FRAME_BYTES;
            let mut received: Vec<(usize, &[u8])> = Vec::with_capacity(NB_ORIGINAL_BLOCKS);

            for i in (0..NB_ORIGINAL_BLOCKS).filter(|&i| slot.seen[i]) {
                let data: &[u8] = if i == 0 {
                    &slot.block_zero
                } else {
                    &self.frames[base + (i - 1) * BLOCK_SIZE..base + i * BLOCK_SIZE]
                };
                received.push((i, data));
            }
            for (i, block) in &slot.recovery {
                received.push((*i, block));
            }

            match self.decoder.decode(&received, nb_fec_blocks) {
                Ok(blocks) => {
                    let missing: Vec<usize> =
                        (0..NB_ORIGINAL_BLOCKS).filter(|&i| !slot.seen[i]).collect();

                    for &i in &missing {
                        if i == 0 {
                            slot.block_zero = blocks[0];
                            if FrameMetadata::from_block(&slot.block_zero).is_err() {
                                tracing::debug!("Recovered metadata has an invalid checksum");
                            }
                        } else {
                            let offset = base + (i - 1) * BLOCK_SIZE;
                            self.frames[offset..offset + BLOCK_SIZE].copy_from_slice(&blocks[i]);
                        }
                    }

                    self.counters.frames_recovered += 1;
                    tracing::debug!(
                        "Frame in slot {}: recovered {} blocks from {} recovery",
                        index,
                        missing.len(),
                        slot.recovery.len()
                    );
                }
                Err(e) => {
                    slot.decoded = false;
                    self.counters.decode_failures += 1;
                    tracing::debug!("Frame in slot {}: decode failed: {}", index, e);
                }
            }
        }

        if !(slot.seen[0] || slot.decoded) {
            return None;
        }

        match FrameMetadata::from_block(&slot.block_zero) {
            Ok(meta) => self.apply_metadata(meta),
            Err(e) => {
                self.counters.invalid_metadata += 1;
                tracing::debug!("Ignoring metadata of slot {}: {}", index, e);
                None
            }
        }
    }

    fn apply_metadata(&mut self, meta: FrameMetadata) -> Option<FrameMetadata> {
        let previous = self.current_meta;
        self.current_meta = meta;

        if meta.same_format(&previous) {
            return None;
        }

        tracing::info!(
            "Stream format: {} Hz, {} S/s, {} bits in {} bytes, K={} M={}, device {} channel {}",
            meta.center_frequency,
            meta.sample_rate,
            meta.sample_bits,
            meta.sample_bytes & 0x0F,
            meta.nb_original_blocks,
            meta.nb_fec_blocks,
            meta.device_index,
            meta.channel_index
        );

        if SampleWidth::from_bits(meta.sample_bits).is_err() {
            tracing::warn!("Unsupported sample width in stream: {} bits", meta.sample_bits);
        }

        if meta.sample_rate != 0 {
            self.balance_limit =
                meta.sample_rate as f64 / self.config.correction_limit_divisor as f64;

            if self.config.auto_slots && meta.sample_rate != previous.sample_rate {
                let nb_slots = recommended_nb_slots(&meta);
                if nb_slots != self.slots.len() {
                    tracing::info!("Resizing decoder ring to {} slots", nb_slots);
                    self.set_nb_slots(nb_slots);
                }
            }

            self.update_buffer_len();
        }

        Some(meta)
    }

    fn update_buffer_len(&mut self) {
        let bytes_per_sec =
            self.current_meta.sample_rate as f64 * self.current_meta.sample_pair_bytes() as f64;

        self.buffer_len_sec = if bytes_per_sec > 0.0 {
            self.ring_size() as f64 / bytes_per_sec
        } else {
            0.0
        };
    }

    /// Read `length` bytes at the read cursor and advance it
    ///
    /// `nominal` is the uncorrected byte count the caller aimed for, used by
    /// the balance estimate. A read longer than the ring is truncated; a read
    /// crossing the ring end is stitched into a contiguous copy.
    pub fn read_data(&mut self, length: usize, nominal: usize) -> &[u8] {
        self.nb_reads += 1;
        self.nominal_read_bytes += nominal as u64;

        let size = self.frames.len();
        let length = length.min(size);
        let start = self.read_index;

        if start + length < size {
            self.read_index += length;
            &self.frames[start..start + length]
        } else if start + length == size {
            self.read_index = 0;
            &self.frames[start..]
        } else {
            let head = length - (size - start);
            self.scratch.clear();
            self.scratch.extend_from_slice(&self.frames[start..]);
            self.scratch.extend_from_slice(&self.frames[..head]);
            self.read_index = head;
            &self.scratch
        }
    }

    /// Read/write imbalance in percent, 0 when the cursors are half a ring apart
    ///
    /// Negative when the write head leads, positive when the read cursor leads.
    pub fn gauge(&self) -> i32 {
        let ring = self.ring_size() as i64;
        if ring == 0 {
            return -50;
        }

        let val = (self.wr_delta * 100 / ring) as i32;
        if val < 0 {
            -val - 50
        } else {
            50 - val
        }
    }

    /// Samples to add to the next read
    pub fn balance_correction(&self) -> f64 {
        self.balance_correction
    }

    /// Metadata of the most recent completed frame
    pub fn current_meta(&self) -> &FrameMetadata {
        &self.current_meta
    }

    /// Signal held by the whole ring in seconds
    pub fn buffer_len_sec(&self) -> f64 {
        self.buffer_len_sec
    }

    /// Capture timestamp of the samples at the read cursor, in microseconds
    pub fn timestamp_us(&self) -> i64 {
        self.tv_out_us
    }

    pub fn nb_slots(&self) -> usize {
        self.slots.len()
    }

    /// Circular buffer size in bytes
    pub fn ring_size(&self) -> usize {
        self.frames.len()
    }

    /// Slot currently holding `frame_index`
    pub fn slot(&self, frame_index: u16) -> Option<&DecodeSlot> {
        self.slots
            .iter()
            .find(|s| s.frame_index() == Some(frame_index))
    }

    /// Signal bytes of the slot holding `frame_index`
    pub fn frame_data(&self, frame_index: u16) -> Option<&[u8]> {
        let index = self
            .slots
            .iter()
            .position(|s| s.frame_index() == Some(frame_index))?;
        Some(&self.frames[index * FRAME_BYTES..(index + 1) * FRAME_BYTES])
    }

    /// Statistics of the frames retired since the last call
    pub fn drain_stats(&mut self) -> StatsSnapshot {
        self.stats.drain_and_reset()
    }

    pub fn counters(&self) -> BufferCounters {
        self.counters.clone()
    }

    pub fn decoder_stats(&self) -> crate::codec::decoder::DecoderStats {
        self.decoder.stats()
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }
}

/// Slot count holding about two seconds of the stream
pub fn recommended_nb_slots(meta: &FrameMetadata) -> usize {
    let frames =
        (4 * (meta.sample_bytes & 0x0F) as u64 * meta.sample_rate as u64) as f64 / FRAME_BYTES as f64;
    let raw = (frames.ceil() as usize / 2) * 2 + 2;
    raw.clamp(MIN_NB_DECODER_SLOTS, MAX_NB_DECODER_SLOTS)
}
