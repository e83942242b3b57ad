//! FEC decoder
//!
//! Rebuilds the K original blocks of a frame from any K distinct blocks
//! among the K + M that were sent.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::codec::build_engine;
use crate::error::FecError;
use crate::protocol::{ProtectedBlock, BLOCK_SIZE, MAX_FEC_BLOCKS, NB_ORIGINAL_BLOCKS};

/// Erasure decoder
///
/// Engines are built lazily per recovery count and kept for reuse.
pub struct FecDecoder {
    engines: Vec<Option<ReedSolomon>>,
    /// Frames decoded
    frames_decoded: u64,
    /// Original blocks rebuilt from recovery data
    blocks_recovered: u64,
    /// Decode failures
    failures: u64,
}

impl FecDecoder {
    pub fn new() -> Self {
        Self {
            engines: (0..=MAX_FEC_BLOCKS).map(|_| None).collect(),
            frames_decoded: 0,
            blocks_recovered: 0,
            failures: 0,
        }
    }

    /// Decode one frame
    ///
    /// `received` holds `(block index, payload)` pairs. `nb_fec_blocks` is the
    /// recovery count of the stream when known; the highest recovery index
    /// present raises it if needed. Returns all K original blocks.
    pub fn decode(
        &mut self,
        received: &[(usize, &[u8])],
        nb_fec_blocks: usize,
    ) -> Result<Vec<ProtectedBlock>, FecError> {
        match self.decode_inner(received, nb_fec_blocks) {
            Ok((blocks, recovered)) => {
                self.frames_decoded += 1;
                self.blocks_recovered += recovered as u64;
                Ok(blocks)
            }
            Err(e) => {
                self.failures += 1;
                Err(e)
            }
        }
    }

    fn decode_inner(
        &mut self,
        received: &[(usize, &[u8])],
        nb_fec_blocks: usize,
    ) -> Result<(Vec<ProtectedBlock>, usize), FecError> {
        let mut nb_fec = nb_fec_blocks;

        for &(index, data) in received {
            if data.len() != BLOCK_SIZE {
                return Err(FecError::BlockSize(data.len()));
            }
            if index >= NB_ORIGINAL_BLOCKS + MAX_FEC_BLOCKS {
                return Err(FecError::TooManyRecoveryBlocks(index + 1 - NB_ORIGINAL_BLOCKS));
            }
            if index >= NB_ORIGINAL_BLOCKS {
                nb_fec = nb_fec.max(index + 1 - NB_ORIGINAL_BLOCKS);
            }
        }

        if nb_fec > MAX_FEC_BLOCKS {
            return Err(FecError::TooManyRecoveryBlocks(nb_fec));
        }

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; NB_ORIGINAL_BLOCKS + nb_fec];
        let mut present = 0;

        for &(index, data) in received {
            if shards[index].is_none() {
                shards[index] = Some(data.to_vec());
                present += 1;
            }
        }

        if present < NB_ORIGINAL_BLOCKS {
            return Err(FecError::InsufficientBlocks {
                received: present,
                required: NB_ORIGINAL_BLOCKS,
            });
        }

        let missing = shards[..NB_ORIGINAL_BLOCKS]
            .iter()
            .filter(|s| s.is_none())
            .count();

        if missing > 0 {
            self.engine(nb_fec)?.reconstruct_data(&mut shards)?;
        }

        let mut blocks = Vec::with_capacity(NB_ORIGINAL_BLOCKS);

        for (index, shard) in shards.into_iter().take(NB_ORIGINAL_BLOCKS).enumerate() {
            let data = shard.ok_or_else(|| {
                FecError::Engine(format!("block {} not reconstructed", index))
            })?;
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(&data);
            blocks.push(block);
        }

        Ok((blocks, missing))
    }

    fn engine(&mut self, nb_fec_blocks: usize) -> Result<&ReedSolomon, FecError> {
        let slot = &mut self.engines[nb_fec_blocks];

        if slot.is_none() {
            *slot = Some(build_engine(nb_fec_blocks)?);
        }

        slot.as_ref()
            .ok_or_else(|| FecError::Engine("engine unavailable".to_string()))
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            blocks_recovered: self.blocks_recovered,
            failures: self.failures,
        }
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.frames_decoded = 0;
        self.blocks_recovered = 0;
        self.failures = 0;
    }
}

impl Default for FecDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub blocks_recovered: u64,
    pub failures: u64,
}
