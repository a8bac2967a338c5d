//! Scripted backend stream for testing without hardware.
//!
//! [`MockStream`] implements the full backend capability set but has no clock
//! of its own: the paired [`MockHandle`] drives individual buffer exchanges,
//! injects error buffers, and scripts lifecycle failures, so tests control
//! every cycle deterministically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::buffer::{SampleBlock, StreamBuffer};
use crate::models::error::StreamError;
use crate::models::format::{AudioSystem, ChannelSpec, Latency, StreamFormat};
use crate::traits::blocking_stream::BlockingStream;
use crate::traits::device_stream::{BufferCallback, DeviceStream};

struct MockShared {
    callback: Mutex<Option<BufferCallback>>,
    latency: Mutex<Latency>,
    running: AtomicBool,
    master: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    pumps: AtomicUsize,
    prefills: AtomicUsize,
    stop_requests: AtomicUsize,
    fail_next_start: AtomicBool,
    fail_next_stop: AtomicBool,
}

/// A backend stream whose exchanges are driven by a [`MockHandle`].
pub struct MockStream {
    shared: Arc<MockShared>,
    format: StreamFormat,
    interleaved: bool,
    frames: usize,
}

/// Test-side controller for a [`MockStream`].
///
/// Remains usable after the stream has been boxed and handed to an aggregate.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<MockShared>,
    channels: ChannelSpec,
    interleaved: bool,
}

impl MockStream {
    /// Creates a stream and the handle that drives it.
    pub fn new(
        sample_rate: u32,
        channels: ChannelSpec,
        frames: usize,
        interleaved: bool,
    ) -> (Self, MockHandle) {
        let shared = Arc::new(MockShared {
            callback: Mutex::new(None),
            latency: Mutex::new(Latency::default()),
            running: AtomicBool::new(false),
            master: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            pumps: AtomicUsize::new(0),
            prefills: AtomicUsize::new(0),
            stop_requests: AtomicUsize::new(0),
            fail_next_start: AtomicBool::new(false),
            fail_next_stop: AtomicBool::new(false),
        });
        let handle = MockHandle {
            shared: Arc::clone(&shared),
            channels,
            interleaved,
        };
        let stream = Self {
            shared,
            format: StreamFormat {
                sample_rate,
                channels,
            },
            interleaved,
            frames,
        };
        (stream, handle)
    }
}

impl MockHandle {
    /// Performs one buffer exchange against the registered callback.
    ///
    /// `input` supplies the device's captured samples (`None` when the stream
    /// has no input channels); the returned block holds whatever the callback
    /// wrote as this device's output for `frames` frames.
    pub fn exchange(&self, input: Option<&SampleBlock>, frames: usize) -> SampleBlock {
        let outputs = self.channels.outputs as usize;
        let output = SampleBlock::new(self.interleaved, outputs, frames);
        self.exchange_with_output(input, output, frames)
    }

    /// Like [`MockHandle::exchange`], but with a caller-supplied output block,
    /// so tests can prove it was overwritten (real drivers hand the engine
    /// whatever the last cycle left in that memory).
    pub fn exchange_with_output(
        &self,
        input: Option<&SampleBlock>,
        mut output: SampleBlock,
        frames: usize,
    ) -> SampleBlock {
        let outputs = self.channels.outputs as usize;
        let callback = self.shared.callback.lock().clone();
        if let Some(callback) = callback {
            let mut buffer = StreamBuffer::new(
                frames,
                input.map(SampleBlock::as_view),
                (outputs > 0).then(|| output.as_view_mut()),
            );
            callback(&mut buffer);
        }
        output
    }

    /// Delivers an exchange carrying a native fault.
    pub fn deliver_error(&self, frames: usize, error: StreamError) {
        let callback = self.shared.callback.lock().clone();
        if let Some(callback) = callback {
            let mut buffer = StreamBuffer::error(frames, error);
            callback(&mut buffer);
        }
    }

    /// Scripts the next `start` call to fail.
    pub fn fail_next_start(&self) {
        self.shared.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Scripts the next `stop` call to fail (the stream still stops).
    pub fn fail_next_stop(&self) {
        self.shared.fail_next_stop.store(true, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Latency) {
        *self.shared.latency.lock() = latency;
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Whether the most recent start was in master (clock-source) mode.
    pub fn started_as_master(&self) -> bool {
        self.shared.master.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }

    /// Number of `process_buffer` pump requests received.
    pub fn pumps(&self) -> usize {
        self.shared.pumps.load(Ordering::SeqCst)
    }

    pub fn prefills(&self) -> usize {
        self.shared.prefills.load(Ordering::SeqCst)
    }

    pub fn stop_requests(&self) -> usize {
        self.shared.stop_requests.load(Ordering::SeqCst)
    }
}

impl DeviceStream for MockStream {
    fn start(&mut self) -> Result<(), StreamError> {
        if self.shared.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(StreamError::DeviceNotAvailable);
        }
        self.shared.starts.fetch_add(1, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        self.shared.stops.fetch_add(1, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);
        if self.shared.fail_next_stop.swap(false, Ordering::SeqCst) {
            return Err(StreamError::backend(self.system(), 1));
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn request_stop(&self) {
        self.shared.stop_requests.fetch_add(1, Ordering::SeqCst);
        self.shared.running.store(false, Ordering::SeqCst);
    }

    fn frames(&self) -> Result<usize, StreamError> {
        Ok(self.frames)
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn interleaved(&self) -> bool {
        self.interleaved
    }

    fn system(&self) -> AudioSystem {
        AudioSystem::Loopback
    }

    fn latency(&self) -> Result<Latency, StreamError> {
        Ok(*self.shared.latency.lock())
    }

    fn set_buffer_callback(&mut self, callback: BufferCallback) {
        *self.shared.callback.lock() = Some(callback);
    }
}

impl BlockingStream for MockStream {
    fn start_master_buffer(&mut self) -> Result<(), StreamError> {
        self.shared.master.store(true, Ordering::SeqCst);
        self.start()
    }

    fn stop_master_buffer(&mut self) {
        let _ = self.stop();
    }

    fn start_slave_buffer(&mut self) -> Result<(), StreamError> {
        self.shared.master.store(false, Ordering::SeqCst);
        self.start()
    }

    fn stop_slave_buffer(&mut self) {
        let _ = self.stop();
    }

    fn process_buffer(&mut self, _blocking: bool) -> Result<(), StreamError> {
        self.shared.pumps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn block_master_buffer(&mut self) -> Result<bool, StreamError> {
        Ok(true)
    }

    fn prefill_output_buffer(&mut self) -> Result<(), StreamError> {
        self.shared.prefills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
