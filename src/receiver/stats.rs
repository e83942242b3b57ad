//! Per-frame reception statistics
//!
//! Accumulated as decode slots are retired and drained by the diagnostics
//! poller, so every figure covers the frames retired since the last poll.

use serde::Serialize;

use crate::protocol::{MAX_FEC_BLOCKS, NB_ORIGINAL_BLOCKS};

/// Block counts of one retired frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCounts {
    /// Distinct blocks received, originals and recovery
    pub blocks: usize,
    /// Original blocks received directly
    pub original: usize,
    /// Recovery blocks stored for decode
    pub recovery: usize,
    /// All K originals available after decode
    pub decoded: bool,
}

/// Running statistics since the last drain
#[derive(Debug, Clone)]
pub struct FrameStats {
    frames: u64,
    incomplete: u64,
    min_blocks: usize,
    min_original: usize,
    max_recovery: usize,
    sum_blocks: u64,
    sum_original: u64,
    sum_recovery: u64,
    all_decoded: bool,
}

impl FrameStats {
    pub fn new() -> Self {
        Self {
            frames: 0,
            incomplete: 0,
            min_blocks: NB_ORIGINAL_BLOCKS + MAX_FEC_BLOCKS + 1,
            min_original: NB_ORIGINAL_BLOCKS,
            max_recovery: 0,
            sum_blocks: 0,
            sum_original: 0,
            sum_recovery: 0,
            all_decoded: true,
        }
    }

    /// Account for a retired frame
    pub fn record(&mut self, counts: FrameCounts) {
        self.frames += 1;
        self.min_blocks = self.min_blocks.min(counts.blocks);
        self.min_original = self.min_original.min(counts.original);
        self.max_recovery = self.max_recovery.max(counts.recovery);
        self.sum_blocks += counts.blocks as u64;
        self.sum_original += counts.original as u64;
        self.sum_recovery += counts.recovery as u64;
        self.all_decoded &= counts.decoded;

        if !counts.decoded {
            self.incomplete += 1;
        }
    }

    /// Frames recorded since the last drain
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Take a snapshot and start a new window
    pub fn drain_and_reset(&mut self) -> StatsSnapshot {
        let avg = |sum: u64| {
            if self.frames == 0 {
                0.0
            } else {
                sum as f64 / self.frames as f64
            }
        };

        let snapshot = StatsSnapshot {
            frames: self.frames,
            frames_incomplete: self.incomplete,
            min_blocks: self.min_blocks,
            min_original: self.min_original,
            max_recovery: self.max_recovery,
            avg_blocks: avg(self.sum_blocks),
            avg_original: avg(self.sum_original),
            avg_recovery: avg(self.sum_recovery),
            frames_decoded: self.all_decoded,
        };

        *self = Self::new();
        snapshot
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics of one polling window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub frames_incomplete: u64,
    pub min_blocks: usize,
    pub min_original: usize,
    pub max_recovery: usize,
    pub avg_blocks: f64,
    pub avg_original: f64,
    pub avg_recovery: f64,
    /// Every frame of the window was fully decoded
    pub frames_decoded: bool,
}

impl StatsSnapshot {
    /// Decoding health for a stream sending `nb_fec_blocks` recovery blocks
    ///
    /// `None` when no frame was retired during the window. Only frames that
    /// received at least one block are retired: a frame lost whole on the
    /// wire never reaches the statistics and cannot lower the health.
    pub fn health(&self, nb_fec_blocks: usize) -> Option<DecodingHealth> {
        if self.frames == 0 {
            return None;
        }

        Some(if self.min_blocks < NB_ORIGINAL_BLOCKS {
            DecodingHealth::Unrecoverable
        } else if self.min_blocks < NB_ORIGINAL_BLOCKS + nb_fec_blocks {
            DecodingHealth::RecoveredWithFec
        } else {
            DecodingHealth::FullyOriginal
        })
    }

    /// Every block of every frame arrived
    pub fn all_blocks_received(&self, nb_fec_blocks: usize) -> bool {
        self.frames > 0 && self.min_blocks == NB_ORIGINAL_BLOCKS + nb_fec_blocks
    }
}

/// Worst-case decoding outcome over a polling window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodingHealth {
    /// At least one frame had fewer than K blocks
    Unrecoverable,
    /// Some frame needed recovery blocks
    RecoveredWithFec,
    /// Every block of every frame arrived
    FullyOriginal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(blocks: usize, original: usize, recovery: usize, decoded: bool) -> FrameCounts {
        FrameCounts {
            blocks,
            original,
            recovery,
            decoded,
        }
    }

    #[test]
    fn test_drain_resets_window() {
        let mut stats = FrameStats::new();
        stats.record(counts(136, 128, 0, true));
        stats.record(counts(130, 122, 6, true));

        let snapshot = stats.drain_and_reset();
        assert_eq!(snapshot.frames, 2);
        assert_eq!(snapshot.min_blocks, 130);
        assert_eq!(snapshot.min_original, 122);
        assert_eq!(snapshot.max_recovery, 6);
        assert_eq!(snapshot.avg_blocks, 133.0);
        assert_eq!(snapshot.avg_recovery, 3.0);
        assert!(snapshot.frames_decoded);

        let empty = stats.drain_and_reset();
        assert_eq!(empty.frames, 0);
        assert_eq!(empty.min_original, NB_ORIGINAL_BLOCKS);
        assert_eq!(empty.avg_blocks, 0.0);
        assert!(empty.frames_decoded);
        assert_eq!(empty.health(8), None);
    }

    #[test]
    fn test_health_levels() {
        let mut stats = FrameStats::new();
        stats.record(counts(136, 128, 0, true));
        let snapshot = stats.drain_and_reset();
        assert_eq!(snapshot.health(8), Some(DecodingHealth::FullyOriginal));
        assert!(snapshot.all_blocks_received(8));

        stats.record(counts(136, 128, 0, true));
        stats.record(counts(131, 120, 8, true));
        assert_eq!(
            stats.drain_and_reset().health(8),
            Some(DecodingHealth::RecoveredWithFec)
        );

        stats.record(counts(127, 120, 7, false));
        let snapshot = stats.drain_and_reset();
        assert_eq!(snapshot.health(8), Some(DecodingHealth::Unrecoverable));
        assert!(!snapshot.frames_decoded);
        assert_eq!(snapshot.frames_incomplete, 1);
    }

    #[test]
    fn test_unprotected_stream_is_fully_original_when_complete() {
        let mut stats = FrameStats::new();
        stats.record(counts(128, 128, 0, true));
        assert_eq!(
            stats.drain_and_reset().health(0),
            Some(DecodingHealth::FullyOriginal)
        );
    }
}
