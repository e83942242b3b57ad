//! Inbound datagram task

use socket2::SockRef;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::NetworkConfig;
use crate::error::{ProtocolError, Result};
use crate::network::udp::{create_receive_socket, recv_buffer_size, UdpSocket};
use crate::protocol::{FrameMetadata, WireBlock, UDP_SIZE};
use crate::receiver::SharedReceiverBuffer;

#[derive(Default)]
struct Counters {
    datagrams: AtomicU64,
    bytes: AtomicU64,
    malformed: AtomicU64,
    recv_errors: AtomicU64,
    format_changes: AtomicU64,
    events_dropped: AtomicU64,
}

/// Receive statistics
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    pub datagrams: u64,
    pub bytes: u64,
    pub malformed: u64,
    pub recv_errors: u64,
    pub format_changes: u64,
    /// Format changes not delivered because the metadata channel was full
    pub events_dropped: u64,
}

/// Network half of the receiver
///
/// Every valid datagram is written into the shared buffer under its lock.
/// Stream format changes are forwarded on the metadata channel if one is set.
pub struct FrameReceiver {
    buffer: SharedReceiverBuffer,
    metadata_tx: Option<crossbeam_channel::Sender<FrameMetadata>>,
    counters: Arc<Counters>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl FrameReceiver {
    pub fn new(buffer: SharedReceiverBuffer) -> Self {
        Self {
            buffer,
            metadata_tx: None,
            counters: Arc::new(Counters::default()),
            local_addr: None,
            shutdown: None,
            handle: None,
        }
    }

    /// Set the channel receiving stream format changes
    pub fn set_metadata_channel(&mut self, tx: crossbeam_channel::Sender<FrameMetadata>) {
        self.metadata_tx = Some(tx);
    }

    /// Bind and start receiving
    ///
    /// A bind or multicast join failure is returned and nothing is started.
    pub async fn start(&mut self, network: &NetworkConfig) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let meta = *self.buffer.lock().current_meta();
        let sample_bytes = (meta.sample_bytes & 0x0F).max(2) as usize;
        let socket = create_receive_socket(network, recv_buffer_size(meta.sample_rate, sample_bytes))?;
        let local = socket.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = ReceiveTask {
            socket,
            buffer: self.buffer.clone(),
            metadata_tx: self.metadata_tx.clone(),
            counters: self.counters.clone(),
            fixed_recv_buffer: network.recv_buffer_size.is_some(),
        };

        self.handle = Some(tokio::spawn(task.run(shutdown_rx)));
        self.shutdown = Some(shutdown_tx);
        self.local_addr = Some(local);

        tracing::info!("Receiving on {}", local);
        Ok(())
    }

    /// Stop receiving and clear the buffer
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
            self.buffer.lock().reset();
        }
        self.local_addr = None;
    }

    /// Stop, then start on a new address
    pub async fn reconfigure(&mut self, network: &NetworkConfig) -> Result<()> {
        self.stop().await;
        self.start(network).await
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Address the socket is bound to while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Get statistics
    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            datagrams: self.counters.datagrams.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            recv_errors: self.counters.recv_errors.load(Ordering::Relaxed),
            format_changes: self.counters.format_changes.load(Ordering::Relaxed),
            events_dropped: self.counters.events_dropped.load(Ordering::Relaxed),
        }
    }
}

struct ReceiveTask {
    socket: UdpSocket,
    buffer: SharedReceiverBuffer,
    metadata_tx: Option<crossbeam_channel::Sender<FrameMetadata>>,
    counters: Arc<Counters>,
    fixed_recv_buffer: bool,
}

impl ReceiveTask {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // one spare byte so oversized datagrams are detected
        let mut buf = [0u8; UDP_SIZE + 1];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, _)) => self.handle_datagram(&buf[..len]),
                    Err(e) => {
                        self.counters.recv_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Receive error: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Frame receiver stopped");
    }

    fn handle_datagram(&self, data: &[u8]) {
        self.counters.datagrams.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);

        let block = match self.parse(data) {
            Ok(block) => block,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Dropped datagram: {}", e);
                return;
            }
        };

        let change = self.buffer.lock().write_block(&block);

        if let Some(meta) = change {
            self.counters.format_changes.fetch_add(1, Ordering::Relaxed);
            self.resize_socket_buffer(&meta);

            if let Some(tx) = &self.metadata_tx {
                if let Err(e) = tx.try_send(meta) {
                    self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Format change not delivered: {}", e);
                }
            }
        }
    }

    fn parse(&self, data: &[u8]) -> std::result::Result<WireBlock, ProtocolError> {
        if data.len() != UDP_SIZE {
            return Err(ProtocolError::MalformedDatagram(data.len()));
        }
        WireBlock::decode(data)
    }

    fn resize_socket_buffer(&self, meta: &FrameMetadata) {
        if self.fixed_recv_buffer {
            return;
        }

        let size = recv_buffer_size(meta.sample_rate, (meta.sample_bytes & 0x0F).max(1) as usize);
        if let Err(e) = SockRef::from(&self.socket).set_recv_buffer_size(size) {
            tracing::warn!("Cannot resize receive buffer to {} bytes: {}", size, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReceiverConfig, SenderConfig};
    use crate::receiver::create_shared_buffer;
    use crate::sample::{IqSample, SampleSink, SampleWidth};
    use crate::sender::{create_shared_fifo, FramePipeline};
    use std::time::Duration;

    fn fixed_ring_buffer() -> SharedReceiverBuffer {
        create_shared_buffer(&ReceiverConfig {
            auto_slots: false,
            ..Default::default()
        })
    }

    fn any_port() -> NetworkConfig {
        NetworkConfig {
            data_port: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_malformed_datagrams_dropped() {
        let mut receiver = FrameReceiver::new(fixed_ring_buffer());
        receiver.start(&any_port()).await.unwrap();
        let addr = receiver.local_addr().unwrap();
        let tx = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

        tx.send_to(&[0u8; 100], addr).await.unwrap();
        tx.send_to(&[0u8; 600], addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = receiver.stats();
        assert_eq!(stats.datagrams, 2);
        assert_eq!(stats.malformed, 2);

        receiver.stop().await;
        assert!(!receiver.is_running());
        assert!(receiver.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_frame_reaches_buffer() {
        let buffer = fixed_ring_buffer();
        let (meta_tx, meta_rx) = crossbeam_channel::unbounded();
        let mut receiver = FrameReceiver::new(buffer.clone());
        receiver.set_metadata_channel(meta_tx);
        receiver.start(&any_port()).await.unwrap();
        let addr = receiver.local_addr().unwrap();

        let fifo = create_shared_fifo(4);
        let mut pipeline =
            FramePipeline::new(&SenderConfig::default(), SampleWidth::Bits16, fifo.clone()).unwrap();
        let samples: Vec<IqSample> = (0..20_000).map(|i| IqSample::new(i, -i)).collect();
        pipeline.write(&samples);

        let frame = fifo.pop().unwrap();
        let tx = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for block in &frame.blocks {
            tx.send_to(&block.to_bytes(), addr).await.unwrap();
        }

        let meta = tokio::task::spawn_blocking(move || meta_rx.recv_timeout(Duration::from_secs(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.sample_rate, 48_000);
        assert_eq!(meta.nb_fec_blocks, 8);

        let decoded = buffer.lock().slot(frame.frame_index).map(|s| s.is_decoded());
        assert_eq!(decoded, Some(true));
        assert_eq!(receiver.stats().format_changes, 1);

        receiver.stop().await;
        assert!(buffer.lock().slot(frame.frame_index).is_none());
    }

    #[tokio::test]
    async fn test_undelivered_format_change_counted() {
        let socket = crate::network::udp::create_socket(
            "127.0.0.1:0".parse().unwrap(),
            &crate::network::udp::SocketOptions::default(),
        )
        .unwrap();
        // a zero-capacity channel with nobody receiving is always full
        let (meta_tx, _meta_rx) = crossbeam_channel::bounded(0);
        let counters = Arc::new(Counters::default());
        let task = ReceiveTask {
            socket,
            buffer: fixed_ring_buffer(),
            metadata_tx: Some(meta_tx),
            counters: counters.clone(),
            fixed_recv_buffer: true,
        };

        let fifo = create_shared_fifo(4);
        let mut pipeline =
            FramePipeline::new(&SenderConfig::default(), SampleWidth::Bits16, fifo.clone()).unwrap();
        let samples: Vec<IqSample> = (0..20_000).map(|i| IqSample::new(i, -i)).collect();
        pipeline.write(&samples);

        for block in &fifo.pop().unwrap().blocks {
            task.handle_datagram(&block.to_bytes());
        }

        assert_eq!(counters.format_changes.load(Ordering::Relaxed), 1);
        assert_eq!(counters.events_dropped.load(Ordering::Relaxed), 1);
    }
}
