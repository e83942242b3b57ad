//! I/Q Sender Application
//!
//! Streams a synthetic tone as FEC-protected frames over UDP.
//!
//! Usage: `iq-sender [config.toml]`. Set `IQ_CLOCK_PPM` to skew the tone
//! source clock and exercise the receiver's drift correction.

use anyhow::Result;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remote_iq_streamer::{
    config::AppConfig,
    monitor::{MonitorServer, MonitorState},
    network::FrameSender,
    sample::{ToneConfig, ToneGenerator},
    sender::{create_shared_fifo, FramePipeline},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting I/Q sender");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(Path::new(&path))?,
        None => AppConfig::load_or_default(),
    };
    config.validate()?;

    let sender_config = &config.sender;
    let width = sender_config.sample_width()?;
    let fifo = create_shared_fifo(sender_config.fifo_depth);
    let pipeline = Arc::new(Mutex::new(FramePipeline::new(
        sender_config,
        width,
        fifo.clone(),
    )?));

    let mut frame_sender = FrameSender::new(fifo.clone());
    frame_sender.start(&config.network, sender_config).await?;

    if config.monitor.enabled {
        let server = MonitorServer::new(config.monitor.clone(), MonitorState::sender(fifo.clone()));
        let _monitor_handle = server.start_background();
    }

    let clock_offset_ppm = std::env::var("IQ_CLOCK_PPM")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    let mut generator = ToneGenerator::new(ToneConfig {
        sample_rate: sender_config.stream_sample_rate(),
        width,
        clock_offset_ppm,
        ..Default::default()
    });
    generator.start(pipeline.clone())?;

    tracing::info!("Streaming - press Ctrl+C to stop");

    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    stats_interval.tick().await;

    loop {
        tokio::select! {
            _ = stats_interval.tick() => {
                let pipeline_stats = pipeline.lock().stats();
                let sender_stats = frame_sender.stats();
                tracing::info!(
                    "Stats: {} samples in, {} frames built ({} unprotected), {} frames sent, {:.1} KB sent, {} send errors, {} frames overwritten",
                    pipeline_stats.samples_in,
                    pipeline_stats.frames_built,
                    pipeline_stats.frames_unprotected,
                    sender_stats.frames_sent,
                    sender_stats.bytes_sent as f64 / 1024.0,
                    sender_stats.send_errors,
                    fifo.overwritten_count()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    generator.stop();
    frame_sender.stop().await;

    Ok(())
}
