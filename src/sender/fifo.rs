//! Bounded frame FIFO between the pipeline and the network task
//!
//! The producer never blocks: when the FIFO is full the oldest unsent frame
//! is dropped to make room. Stale frames are worth less than fresh ones for
//! a real-time signal.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::sender::pipeline::EncodedFrame;

/// Lock-free frame FIFO with overwrite-on-full
pub struct FrameFifo {
    queue: ArrayQueue<EncodedFrame>,
    notify: Notify,
    pushed: AtomicU64,
    overwritten: AtomicU64,
}

impl FrameFifo {
    /// Create a FIFO holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
            pushed: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        }
    }

    /// Push a frame, dropping the oldest one when full
    ///
    /// Returns false if a frame was dropped.
    pub fn push(&self, frame: EncodedFrame) -> bool {
        self.pushed.fetch_add(1, Ordering::Relaxed);

        let kept = match self.queue.force_push(frame) {
            None => true,
            Some(dropped) => {
                self.overwritten.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Frame FIFO full, dropped frame {}", dropped.frame_index);
                false
            }
        };

        self.notify.notify_one();
        kept
    }

    /// Pop the oldest frame
    pub fn pop(&self) -> Option<EncodedFrame> {
        self.queue.pop()
    }

    /// Wait until a frame has been pushed since the last wake-up
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Drop every queued frame
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Frames pushed since creation
    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Frames dropped because the FIFO was full
    pub fn overwritten_count(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a frame FIFO
pub type SharedFrameFifo = Arc<FrameFifo>;

/// Create a new shared frame FIFO
pub fn create_shared_fifo(capacity: usize) -> SharedFrameFifo {
    Arc::new(FrameFifo::new(capacity))
}
