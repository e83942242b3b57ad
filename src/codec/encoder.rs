//! FEC encoder
//!
//! Produces the recovery blocks of one frame from its K original blocks.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::codec::build_engine;
use crate::error::FecError;
use crate::protocol::{ProtectedBlock, BLOCK_SIZE, MAX_FEC_BLOCKS, NB_ORIGINAL_BLOCKS};

/// Recovery block encoder for a fixed recovery count
pub struct FecEncoder {
    /// None when FEC is disabled or the engine could not be built
    engine: Option<ReedSolomon>,
    nb_fec_blocks: usize,
    /// Frames encoded
    frames_encoded: u64,
    /// Recovery blocks produced
    recovery_blocks: u64,
    /// Encode failures
    failures: u64,
}

impl FecEncoder {
    /// Create an encoder producing `nb_fec_blocks` recovery blocks per frame
    ///
    /// Zero recovery blocks gives an unprotected encoder.
    pub fn new(nb_fec_blocks: usize) -> Result<Self, FecError> {
        if nb_fec_blocks > MAX_FEC_BLOCKS {
            return Err(FecError::TooManyRecoveryBlocks(nb_fec_blocks));
        }

        let engine = if nb_fec_blocks == 0 {
            None
        } else {
            Some(build_engine(nb_fec_blocks)?)
        };

        Ok(Self {
            engine,
            nb_fec_blocks,
            frames_encoded: 0,
            recovery_blocks: 0,
            failures: 0,
        })
    }

    /// Encoder that never produces recovery blocks
    pub fn unprotected() -> Self {
        Self {
            engine: None,
            nb_fec_blocks: 0,
            frames_encoded: 0,
            recovery_blocks: 0,
            failures: 0,
        }
    }

    /// Compute the recovery blocks for one frame of K original blocks
    pub fn encode(&mut self, originals: &[ProtectedBlock]) -> Result<Vec<ProtectedBlock>, FecError> {
        if originals.len() != NB_ORIGINAL_BLOCKS {
            return Err(FecError::InvalidBlockCount(originals.len()));
        }

        let engine = match &self.engine {
            Some(engine) => engine,
            None => {
                self.frames_encoded += 1;
                return Ok(Vec::new());
            }
        };

        let mut recovery = vec![[0u8; BLOCK_SIZE]; self.nb_fec_blocks];

        if let Err(e) = engine.encode_sep(originals, &mut recovery) {
            self.failures += 1;
            return Err(e.into());
        }

        self.frames_encoded += 1;
        self.recovery_blocks += recovery.len() as u64;

        Ok(recovery)
    }

    /// Recovery blocks produced per frame
    pub fn nb_fec_blocks(&self) -> usize {
        self.nb_fec_blocks
    }

    /// Whether recovery blocks are being produced
    pub fn is_protected(&self) -> bool {
        self.engine.is_some()
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            recovery_blocks: self.recovery_blocks,
            failures: self.failures,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone, Default)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub recovery_blocks: u64,
    pub failures: u64,
}
