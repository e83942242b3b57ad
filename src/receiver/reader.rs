//! Rate-adaptive read controller
//!
//! Drains the circular buffer on a fixed tick. Each read covers the elapsed
//! time at the stream's sample rate, plus the buffer's read/write balance
//! correction, so the read cursor follows the sender's clock instead of
//! ours.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ReceiverConfig;
use crate::error::Result;
use crate::receiver::stats::{DecodingHealth, StatsSnapshot};
use crate::receiver::SharedReceiverBuffer;
use crate::sample::{IqSample, SampleConverter, SampleSink, SampleWidth};

/// Diagnostics published about once per second
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    /// Capture time of the samples being read, ms since the epoch
    pub timestamp_ms: i64,
    pub buffer_len_sec: f64,
    pub gauge: i32,
    pub health: Option<DecodingHealth>,
    pub all_blocks_received: bool,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub nb_original_blocks: u8,
    pub nb_fec_blocks: u8,
    pub sample_bits: u8,
    pub sample_bytes: u8,
    pub sample_rate: u32,
    pub center_frequency: u64,
    /// Samples added to each read
    pub correction: f64,
    pub samples_delivered: u64,
}

/// Latest report, shared with the diagnostics endpoint
pub type SharedReport = Arc<RwLock<Option<StreamReport>>>;

/// Tick-driven reader of the receiver buffer
pub struct ReadController {
    config: ReceiverConfig,
    buffer: SharedReceiverBuffer,
    converter: Option<SampleConverter>,
    /// Wire width the converter was last built for
    wire_bits: u8,
    /// Sub-sample remainder of rate × elapsed, in samples × 10^6
    carry: u64,
    last_tick: Option<Instant>,
    ticks: u32,
    report_every: u32,
    samples_delivered: u64,
}

impl ReadController {
    pub fn new(config: &ReceiverConfig, buffer: SharedReceiverBuffer) -> Result<Self> {
        config.validate()?;
        SampleWidth::from_bits(config.output_sample_bits)?;

        Ok(Self {
            config: config.clone(),
            buffer,
            converter: None,
            wire_bits: 0,
            carry: 0,
            last_tick: None,
            ticks: 0,
            report_every: (1000 / config.tick_ms).max(1) as u32,
            samples_delivered: 0,
        })
    }

    /// Read what the time since the previous tick is worth
    pub fn tick(&mut self, sink: &mut dyn SampleSink) -> Option<StreamReport> {
        let now = Instant::now();
        let elapsed = match self.last_tick.replace(now) {
            Some(last) => now.duration_since(last),
            None => Duration::from_millis(self.config.tick_ms),
        };
        self.tick_elapsed(elapsed, sink)
    }

    /// Read `elapsed` worth of samples into `sink`
    ///
    /// Returns a report every second worth of ticks.
    pub fn tick_elapsed(&mut self, elapsed: Duration, sink: &mut dyn SampleSink) -> Option<StreamReport> {
        let mut buffer = self.buffer.lock();
        let meta = *buffer.current_meta();
        let pair_bytes = meta.sample_pair_bytes();

        if meta.sample_rate > 0 && pair_bytes > 0 {
            let total = meta.sample_rate as u64 * elapsed.as_micros() as u64 + self.carry;
            let nominal = total / 1_000_000;
            self.carry = total % 1_000_000;

            let mut length = nominal as i64;
            if self.config.auto_correction {
                length += buffer.balance_correction().round() as i64;
                length = length.clamp(0, meta.sample_rate as i64 / 5);
            }

            if meta.sample_bits != self.wire_bits {
                self.wire_bits = meta.sample_bits;
                self.converter =
                    match SampleConverter::new(meta.sample_bits, self.config.output_sample_bits) {
                        Ok(converter) => Some(converter),
                        Err(e) => {
                            tracing::warn!("Cannot deliver stream samples: {}", e);
                            None
                        }
                    };
            }

            let data = buffer.read_data(length as usize * pair_bytes, nominal as usize * pair_bytes);
            let samples: &[IqSample] = match self.converter.as_mut() {
                Some(converter) => converter.convert(data),
                None => &[],
            };
            drop(buffer);

            self.samples_delivered += samples.len() as u64;
            sink.write(samples);
        } else {
            drop(buffer);
        }

        self.ticks += 1;
        if self.ticks < self.report_every {
            return None;
        }
        self.ticks = 0;

        Some(self.report())
    }

    /// Build a report, draining the frame statistics
    pub fn report(&mut self) -> StreamReport {
        let mut buffer = self.buffer.lock();
        let meta = *buffer.current_meta();
        let stats = buffer.drain_stats();
        let nb_fec_blocks = meta.nb_fec_blocks as usize;

        StreamReport {
            timestamp_ms: buffer.timestamp_us() / 1000,
            buffer_len_sec: buffer.buffer_len_sec(),
            gauge: buffer.gauge(),
            health: stats.health(nb_fec_blocks),
            all_blocks_received: stats.all_blocks_received(nb_fec_blocks),
            stats,
            nb_original_blocks: meta.nb_original_blocks,
            nb_fec_blocks: meta.nb_fec_blocks,
            sample_bits: meta.sample_bits,
            sample_bytes: meta.sample_bytes,
            sample_rate: meta.sample_rate,
            center_frequency: meta.center_frequency,
            correction: buffer.balance_correction(),
            samples_delivered: self.samples_delivered,
        }
    }

    pub fn samples_delivered(&self) -> u64 {
        self.samples_delivered
    }
}

/// Run `controller` every tick until `shutdown` turns true
pub fn spawn_read_loop<S: SampleSink + 'static>(
    mut controller: ReadController,
    mut sink: S,
    report: SharedReport,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = Duration::from_millis(controller.config.tick_ms);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(r) = controller.tick(&mut sink) {
                        tracing::debug!(
                            "Stream: gauge {}%, health {:?}, {} frames, min {} blocks",
                            r.gauge,
                            r.health,
                            r.stats.frames,
                            r.stats.min_blocks
                        );
                        *report.write() = Some(r);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Read loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BlockHeader, FrameMetadata, WireBlock, BLOCK_SIZE, NB_ORIGINAL_BLOCKS};
    use crate::receiver::buffer::FRAME_BYTES;
    use crate::receiver::create_shared_buffer;

    #[derive(Default)]
    struct CountingSink {
        samples: u64,
        chunks: Vec<Vec<IqSample>>,
        keep: bool,
    }

    impl SampleSink for CountingSink {
        fn write(&mut self, samples: &[IqSample]) {
            self.samples += samples.len() as u64;
            if self.keep {
                self.chunks.push(samples.to_vec());
            }
        }
    }

    fn config() -> ReceiverConfig {
        ReceiverConfig {
            nb_decoder_slots: 8,
            auto_slots: false,
            ..Default::default()
        }
    }

    fn template(sample_bits: u8) -> Vec<WireBlock> {
        let width = SampleWidth::from_bits(sample_bits).unwrap();
        let meta = FrameMetadata {
            sample_rate: 48_000,
            sample_bytes: width.bytes(),
            sample_bits,
            nb_original_blocks: NB_ORIGINAL_BLOCKS as u8,
            ..Default::default()
        };

        (0..NB_ORIGINAL_BLOCKS)
            .map(|i| {
                let mut block = [0u8; BLOCK_SIZE];
                if i == 0 {
                    meta.write_to(&mut block);
                } else {
                    block.fill(0x11);
                }
                WireBlock::new(BlockHeader::new(0, i as u8, width.bytes(), sample_bits), block)
            })
            .collect()
    }

    fn write_frame(buffer: &SharedReceiverBuffer, template: &[WireBlock], frame_index: u16) {
        let mut buffer = buffer.lock();
        for block in template {
            let mut block = block.clone();
            block.header.frame_index = frame_index;
            buffer.write_block(&block);
        }
    }

    #[test]
    fn test_no_read_before_stream() {
        let buffer = create_shared_buffer(&config());
        let mut controller = ReadController::new(&config(), buffer).unwrap();
        let mut sink = CountingSink::default();

        for _ in 0..19 {
            assert!(controller.tick_elapsed(Duration::from_millis(50), &mut sink).is_none());
        }
        let report = controller.tick_elapsed(Duration::from_millis(50), &mut sink).unwrap();

        assert_eq!(sink.samples, 0);
        assert_eq!(report.health, None);
        assert_eq!(report.sample_rate, 0);
    }

    #[test]
    fn test_read_length_follows_elapsed_time() {
        let buffer = create_shared_buffer(&config());
        write_frame(&buffer, &template(16), 0);

        let mut controller = ReadController::new(&config(), buffer).unwrap();
        let mut sink = CountingSink::default();

        controller.tick_elapsed(Duration::from_millis(50), &mut sink);
        assert_eq!(sink.samples, 2_400);

        // 1 ms split over uneven ticks still yields 48 samples
        for _ in 0..3 {
            controller.tick_elapsed(Duration::from_micros(333), &mut sink);
        }
        controller.tick_elapsed(Duration::from_micros(1), &mut sink);
        assert_eq!(sink.samples, 2_400 + 48);
    }

    #[test]
    fn test_output_width_conversion() {
        let cfg = ReceiverConfig {
            output_sample_bits: 24,
            ..config()
        };
        let buffer = create_shared_buffer(&cfg);
        write_frame(&buffer, &template(16), 0);
        write_frame(&buffer, &template(16), 1);

        let mut controller = ReadController::new(&cfg, buffer).unwrap();
        let mut sink = CountingSink {
            keep: true,
            ..Default::default()
        };

        // the read cursor starts on the opposite slot, move it onto frame 0
        for _ in 0..4 {
            controller.tick_elapsed(Duration::from_micros(333_375), &mut sink);
        }
        sink.chunks.clear();
        controller.tick_elapsed(Duration::from_millis(10), &mut sink);

        let chunk = &sink.chunks[0];
        assert_eq!(chunk.len(), 480);
        assert!(chunk.iter().all(|s| *s == IqSample::new(0x1111 << 8, 0x1111 << 8)));
    }

    #[test]
    fn test_report_drains_stats() {
        let buffer = create_shared_buffer(&config());
        let template = template(16);
        for i in 0..10u16 {
            write_frame(&buffer, &template, i);
        }

        let mut controller = ReadController::new(&config(), buffer).unwrap();
        let report = controller.report();

        // frames 0 and 1 retired by 8 and 9
        assert_eq!(report.stats.frames, 2);
        assert_eq!(report.health, Some(DecodingHealth::FullyOriginal));
        assert!(report.all_blocks_received);
        assert_eq!(report.sample_rate, 48_000);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["health"], "fully_original");
        assert_eq!(json["min_blocks"], 128);

        assert_eq!(controller.report().stats.frames, 0);
    }

    /// Sender clock `ppm` faster than ours; returns the written-minus-read
    /// byte lag over the second half of the run and the last gauge
    fn simulate_drift(ppm: f64, seconds: u64, auto_correction: bool) -> (i64, i64, i32) {
        let cfg = ReceiverConfig {
            auto_correction,
            ..config()
        };
        let buffer = create_shared_buffer(&cfg);
        let mut controller = ReadController::new(&cfg, buffer.clone()).unwrap();
        let mut sink = CountingSink::default();
        let template = template(16);

        let frame_secs = FRAME_BYTES as f64 / (4.0 * 48_000.0 * (1.0 + ppm * 1e-6));
        let tick = Duration::from_millis(50);
        let nb_ticks = seconds * 20;
        let mut frames: u64 = 0;
        let (mut min_lag, mut max_lag) = (i64::MAX, i64::MIN);

        for n in 1..=nb_ticks {
            let now = n as f64 * 0.05;
            while (frames + 1) as f64 * frame_secs <= now {
                write_frame(&buffer, &template, frames as u16);
                frames += 1;
            }

            controller.tick_elapsed(tick, &mut sink);

            if n > nb_ticks / 2 {
                let lag = (frames * FRAME_BYTES as u64) as i64 - (sink.samples * 4) as i64;
                min_lag = min_lag.min(lag);
                max_lag = max_lag.max(lag);
            }
        }

        let gauge = buffer.lock().gauge();
        (min_lag, max_lag, gauge)
    }

    #[test]
    fn test_drift_correction_settles() {
        let (min_lag, max_lag, gauge) = simulate_drift(1_000.0, 600, true);

        assert!(max_lag - min_lag < 2 * FRAME_BYTES as i64, "lag {}..{}", min_lag, max_lag);
        assert!(gauge.abs() <= 10, "gauge {}", gauge);
    }

    #[test]
    fn test_drift_correction_settles_slow_sender() {
        let (min_lag, max_lag, gauge) = simulate_drift(-1_000.0, 600, true);

        assert!(max_lag - min_lag < 2 * FRAME_BYTES as i64, "lag {}..{}", min_lag, max_lag);
        assert!(gauge.abs() <= 10, "gauge {}", gauge);
    }

    #[test]
    fn test_uncorrected_reads_drift() {
        let (_, max_lag, _) = simulate_drift(1_000.0, 600, false);
        assert!(max_lag > 2 * FRAME_BYTES as i64, "lag {}", max_lag);
    }
}
