//! Outbound datagram task
//!
//! Drains the frame FIFO and emits one datagram per block. The blocks of a
//! frame are spread over a share of the frame's duration so a whole frame
//! never hits the network as one burst.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{NetworkConfig, SenderConfig};
use crate::error::Result;
use crate::network::udp::{create_send_socket, UdpSocket};
use crate::protocol::{FRAME_DATA_SIZE, UDP_SIZE};
use crate::sender::{EncodedFrame, SharedFrameFifo};

/// Nominal duration of one frame of the stream described by `config`
pub fn frame_duration(config: &SenderConfig) -> Duration {
    let pair_bytes = config
        .sample_width()
        .map(|w| w.pair_bytes())
        .unwrap_or(4) as u64;
    let bytes_per_sec = config.stream_sample_rate() as u64 * pair_bytes;

    if bytes_per_sec == 0 {
        return Duration::ZERO;
    }

    Duration::from_micros(FRAME_DATA_SIZE as u64 * 1_000_000 / bytes_per_sec)
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Send statistics
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub frames_sent: u64,
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
}

/// Network half of the sender
pub struct FrameSender {
    fifo: SharedFrameFifo,
    counters: Arc<Counters>,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl FrameSender {
    pub fn new(fifo: SharedFrameFifo) -> Self {
        Self {
            fifo,
            counters: Arc::new(Counters::default()),
            shutdown: None,
            handle: None,
        }
    }

    /// Open the socket and start draining the FIFO
    ///
    /// A socket that cannot be created fails the start; nothing is retried
    /// until the next start.
    pub async fn start(&mut self, network: &NetworkConfig, sender: &SenderConfig) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let destination = network.destination()?;
        let socket = create_send_socket(network)?;
        let pacing = frame_duration(sender) * sender.tx_delay_percent / 100;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = SendTask {
            socket,
            destination,
            pacing,
            fifo: self.fifo.clone(),
            counters: self.counters.clone(),
            warned: false,
        };

        self.handle = Some(tokio::spawn(task.run(shutdown_rx)));
        self.shutdown = Some(shutdown_tx);

        tracing::info!(
            "Sending to {}, frame spread over {:?}",
            destination,
            pacing
        );
        Ok(())
    }

    /// Finish the frame in flight, then close the socket
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Stop, then start with new settings
    pub async fn reconfigure(&mut self, network: &NetworkConfig, sender: &SenderConfig) -> Result<()> {
        self.stop().await;
        self.start(network, sender).await
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Get statistics
    pub fn stats(&self) -> SenderStats {
        SenderStats {
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            datagrams_sent: self.counters.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
        }
    }
}

struct SendTask {
    socket: UdpSocket,
    destination: SocketAddr,
    /// Time over which one frame's datagrams are spread
    pacing: Duration,
    fifo: SharedFrameFifo,
    counters: Arc<Counters>,
    warned: bool,
}

impl SendTask {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            while let Some(frame) = self.fifo.pop() {
                self.send_frame(&frame).await;

                if *shutdown.borrow() {
                    break;
                }
            }

            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = self.fifo.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Frame sender stopped");
    }

    async fn send_frame(&mut self, frame: &EncodedFrame) {
        let nb_blocks = frame.blocks.len().max(1) as u32;
        let block_delay = self.pacing / nb_blocks;
        let mut pending = Duration::ZERO;
        let mut datagram = [0u8; UDP_SIZE];

        for block in &frame.blocks {
            block.encode_into(&mut datagram);

            match self.socket.send_to(&datagram, self.destination).await {
                Ok(n) => {
                    self.counters.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                    self.counters.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
                    if !self.warned {
                        tracing::warn!("Send to {} failed: {}", self.destination, e);
                        self.warned = true;
                    }
                }
            }

            pending += block_delay;
            if pending >= Duration::from_millis(1) {
                tokio::time::sleep(pending).await;
                pending = Duration::ZERO;
            }
        }

        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BlockHeader, WireBlock, BLOCK_SIZE};
    use crate::sender::create_shared_fifo;
    use tokio::time::timeout;

    fn frame(index: u16, nb_blocks: usize) -> EncodedFrame {
        EncodedFrame {
            frame_index: index,
            blocks: (0..nb_blocks)
                .map(|i| WireBlock::new(BlockHeader::new(index, i as u8, 2, 16), [i as u8; BLOCK_SIZE]))
                .collect(),
            protected: false,
        }
    }

    #[test]
    fn test_frame_duration() {
        let config = SenderConfig::default();
        // 64008 bytes at 48 kS/s of 16-bit pairs
        assert_eq!(frame_duration(&config), Duration::from_micros(333_375));
    }

    #[tokio::test]
    async fn test_sends_every_block() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let network = NetworkConfig {
            data_port: receiver.local_addr().unwrap().port(),
            ..Default::default()
        };
        let sender_config = SenderConfig {
            tx_delay_percent: 0,
            ..Default::default()
        };

        let fifo = create_shared_fifo(4);
        let mut sender = FrameSender::new(fifo.clone());
        sender.start(&network, &sender_config).await.unwrap();
        assert!(sender.is_running());

        fifo.push(frame(42, 5));

        let mut buf = [0u8; 1024];
        for i in 0..5 {
            let (n, _) = timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(n, UDP_SIZE);

            let block = WireBlock::decode(&buf[..n]).unwrap();
            assert_eq!(block.header.frame_index, 42);
            assert_eq!(block.header.block_index, i);
        }

        sender.stop().await;
        assert!(!sender.is_running());

        let stats = sender.stats();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.datagrams_sent, 5);
        assert_eq!(stats.bytes_sent, 5 * UDP_SIZE as u64);
    }

    #[tokio::test]
    async fn test_pacing_spreads_frame() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let network = NetworkConfig {
            data_port: receiver.local_addr().unwrap().port(),
            ..Default::default()
        };
        // 333 ms frames, half of it for 10 blocks
        let sender_config = SenderConfig {
            tx_delay_percent: 50,
            ..Default::default()
        };

        let fifo = create_shared_fifo(4);
        let mut sender = FrameSender::new(fifo.clone());
        sender.start(&network, &sender_config).await.unwrap();

        let started = std::time::Instant::now();
        fifo.push(frame(1, 10));

        let mut buf = [0u8; 1024];
        for _ in 0..10 {
            timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
        }
        // the last datagram leaves after nine block delays of ~16.7 ms
        assert!(started.elapsed() >= Duration::from_millis(140));

        sender.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_destination_fails_start() {
        let network = NetworkConfig {
            data_address: "not-an-address".to_string(),
            ..Default::default()
        };
        let mut sender = FrameSender::new(create_shared_fifo(2));

        assert!(sender.start(&network, &SenderConfig::default()).await.is_err());
        assert!(!sender.is_running());
    }
}
