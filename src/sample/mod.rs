//! I/Q sample types, width conversion and a synthetic source

pub mod format;
pub mod generator;

pub use format::{convert, convert_bits, IqSample, SampleConverter, SampleWidth};
pub use generator::{ToneConfig, ToneGenerator};

/// Consumer of a sample stream
///
/// Implemented by the sender frame pipeline and by whatever the receiver
/// application hands decoded samples to. Must never block.
pub trait SampleSink: Send {
    fn write(&mut self, samples: &[IqSample]);
}

impl SampleSink for crossbeam_channel::Sender<Vec<IqSample>> {
    fn write(&mut self, samples: &[IqSample]) {
        // a full channel drops the chunk rather than stalling the stream
        let _ = self.try_send(samples.to_vec());
    }
}

impl<T: SampleSink> SampleSink for std::sync::Arc<parking_lot::Mutex<T>> {
    fn write(&mut self, samples: &[IqSample]) {
        self.lock().write(samples);
    }
}
