//! Erasure coding engine
//!
//! Systematic Reed-Solomon over GF(2^8) working block-wise: K original
//! blocks plus M recovery blocks, any K of which rebuild the originals.
//! Block size is always [`crate::protocol::BLOCK_SIZE`].

pub mod encoder;
pub mod decoder;

pub use encoder::FecEncoder;
pub use decoder::FecDecoder;

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::FecError;
use crate::protocol::{MAX_FEC_BLOCKS, NB_ORIGINAL_BLOCKS};

/// Build an engine for K original blocks and `nb_fec_blocks` recovery blocks
pub(crate) fn build_engine(nb_fec_blocks: usize) -> Result<ReedSolomon, FecError> {
    if nb_fec_blocks == 0 || nb_fec_blocks > MAX_FEC_BLOCKS {
        return Err(FecError::TooManyRecoveryBlocks(nb_fec_blocks));
    }

    Ok(ReedSolomon::new(NB_ORIGINAL_BLOCKS, nb_fec_blocks)?)
}
