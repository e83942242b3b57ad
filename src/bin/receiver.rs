//! I/Q Receiver Application
//!
//! Receives the FEC-protected stream, rebuilds lost blocks and delivers
//! samples at the sender's pace. The delivered samples are consumed by a
//! level meter in place of a downstream DSP chain.
//!
//! Usage: `iq-receiver [config.toml]`

use anyhow::Result;
use crossbeam_channel::bounded;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remote_iq_streamer::{
    config::AppConfig,
    monitor::{MonitorServer, MonitorState},
    network::FrameReceiver,
    protocol::FrameMetadata,
    receiver::{create_shared_buffer, spawn_read_loop, ReadController, SharedReport},
    sample::IqSample,
};

/// Samples consumed and the peak component magnitude of the last chunk
#[derive(Default)]
struct LevelMeter {
    samples: AtomicU64,
    peak: AtomicU64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting I/Q receiver");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(Path::new(&path))?,
        None => AppConfig::load_or_default(),
    };
    config.validate()?;

    let buffer = create_shared_buffer(&config.receiver);
    let report: SharedReport = Arc::new(RwLock::new(None));

    // Format change notifications from the receive task
    let (meta_tx, meta_rx) = bounded::<FrameMetadata>(16);
    let mut frame_receiver = FrameReceiver::new(buffer.clone());
    frame_receiver.set_metadata_channel(meta_tx);
    frame_receiver.start(&config.network).await?;

    // Delivered samples go to the consumer thread
    let (sample_tx, sample_rx) = bounded::<Vec<IqSample>>(256);
    let meter = Arc::new(LevelMeter::default());
    let consumer_meter = meter.clone();
    std::thread::Builder::new()
        .name("sample-consumer".to_string())
        .spawn(move || {
            for chunk in sample_rx {
                let peak = chunk
                    .iter()
                    .map(|s| s.i.unsigned_abs().max(s.q.unsigned_abs()))
                    .max()
                    .unwrap_or(0);
                consumer_meter
                    .samples
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                consumer_meter.peak.store(peak as u64, Ordering::Relaxed);
            }
        })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = ReadController::new(&config.receiver, buffer.clone())?;
    let read_handle = spawn_read_loop(controller, sample_tx, report.clone(), shutdown_rx);

    if config.monitor.enabled {
        let server = MonitorServer::new(
            config.monitor.clone(),
            MonitorState::receiver(buffer.clone(), report.clone()),
        );
        let _monitor_handle = server.start_background();
    }

    tracing::info!("Receiving - press Ctrl+C to stop");

    let mut event_interval = tokio::time::interval(Duration::from_secs(1));
    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    stats_interval.tick().await;

    loop {
        tokio::select! {
            _ = event_interval.tick() => {
                for meta in meta_rx.try_iter() {
                    tracing::info!(
                        "Stream changed: {} S/s at {} Hz, {} bits, {} recovery blocks",
                        meta.sample_rate,
                        meta.center_frequency,
                        meta.sample_bits,
                        meta.nb_fec_blocks
                    );
                }
            }
            _ = stats_interval.tick() => {
                let net = frame_receiver.stats();
                let counters = buffer.lock().counters();

                match report.read().as_ref() {
                    Some(r) => tracing::info!(
                        "Stats: {} datagrams ({} malformed), {} frames recovered, {} decode failures, gauge {}%, health {:?}, correction {:+.2}, {} samples out, peak {}",
                        net.datagrams,
                        net.malformed,
                        counters.frames_recovered,
                        counters.decode_failures,
                        r.gauge,
                        r.health,
                        r.correction,
                        meter.samples.load(Ordering::Relaxed),
                        meter.peak.load(Ordering::Relaxed)
                    ),
                    None => tracing::info!(
                        "Stats: {} datagrams ({} malformed), waiting for stream",
                        net.datagrams,
                        net.malformed
                    ),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = read_handle.await;
    frame_receiver.stop().await;

    Ok(())
}
